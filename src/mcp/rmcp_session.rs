//! Sessions over the official `rmcp` SDK.
//!
//! Supports stdio servers launched as child processes and Streamable HTTP
//! endpoints. Every request is bounded by the configured request timeout so
//! that a hung server cannot stall the health loop forever.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use async_trait::async_trait;
use reqwest::header::{HeaderMap, HeaderName, HeaderValue};
use rmcp::{
    model::{CallToolRequestParam, ClientRequest, PingRequest},
    service::{Peer, RoleClient, ServiceError, ServiceExt},
    transport::{
        StreamableHttpClientTransport, TokioChildProcess,
        streamable_http_client::StreamableHttpClientTransportConfig,
    },
};
use tokio::process::Command;
use tokio::sync::Mutex;
use tracing::debug;

use crate::mcp::catalog::ToolDescriptor;
use crate::mcp::config::{ConnectionMode, RemoteServerConfig};
use crate::mcp::error::{McpError, McpResult};
use crate::mcp::transport::{ServerIdentity, Session, SessionFactory};

/// Default bound for a single request, handshake included.
pub const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

const API_KEY_HEADER: &str = "apikey";
const IMPERSONATING_USER_HEADER: &str = "impersonatinguser";

type DynClientService = rmcp::service::RunningService<
    rmcp::service::RoleClient,
    Box<dyn rmcp::service::DynService<rmcp::service::RoleClient>>,
>;

/// Creates `rmcp` client sessions for one configured server.
#[derive(Debug, Clone)]
pub struct RmcpSessionFactory {
    name: String,
    mode: ConnectionMode,
    request_timeout: Duration,
}

impl RmcpSessionFactory {
    /// Validate the server's connection mode and build a factory for it.
    pub fn from_config(config: &RemoteServerConfig, request_timeout: Duration) -> McpResult<Self> {
        Ok(Self {
            name: config.name.clone(),
            mode: config.connection_mode()?,
            request_timeout,
        })
    }

    async fn connect(&self) -> anyhow::Result<DynClientService> {
        let service = match &self.mode {
            ConnectionMode::ChildProcess { command, args, env } => {
                let mut cmd = Command::new(command);
                cmd.args(args);
                for (k, v) in env {
                    cmd.env(k, v);
                }

                let transport = TokioChildProcess::new(cmd)
                    .with_context(|| format!("failed to launch '{command}'"))?;
                ().into_dyn().serve(transport).await?
            }
            ConnectionMode::Http {
                endpoint,
                api_key,
                impersonating_user,
            } => {
                let mut headers = HeaderMap::new();
                if let Some(key) = api_key {
                    headers.insert(
                        HeaderName::from_static(API_KEY_HEADER),
                        HeaderValue::from_str(key).context("apiKey is not a valid header value")?,
                    );
                    if let Some(user) = impersonating_user {
                        headers.insert(
                            HeaderName::from_static(IMPERSONATING_USER_HEADER),
                            HeaderValue::from_str(user)
                                .context("impersonatingUser is not a valid header value")?,
                        );
                    }
                }
                let client = reqwest::Client::builder()
                    .default_headers(headers)
                    .build()
                    .context("failed to build HTTP client")?;

                let transport = StreamableHttpClientTransport::with_client(
                    client,
                    StreamableHttpClientTransportConfig::with_uri(endpoint.to_string()),
                );
                ().into_dyn().serve(transport).await?
            }
        };
        Ok(service)
    }
}

#[async_trait]
impl SessionFactory for RmcpSessionFactory {
    fn server_name(&self) -> &str {
        &self.name
    }

    async fn create_session(&self) -> McpResult<Arc<dyn Session>> {
        let service = tokio::time::timeout(self.request_timeout, self.connect())
            .await
            .map_err(|elapsed| McpError::Connection {
                server: self.name.clone(),
                reason: format!("handshake {elapsed} ({:?})", self.request_timeout),
            })?
            .map_err(|e| McpError::Connection {
                server: self.name.clone(),
                reason: format!("{e:#}"),
            })?;

        let identity = match service.peer_info() {
            Some(info) => ServerIdentity {
                name: info.server_info.name.clone(),
                version: info.server_info.version.clone(),
                instructions: info.instructions.clone(),
                supports_tools: info.capabilities.tools.is_some(),
            },
            None => ServerIdentity {
                name: self.name.clone(),
                version: String::new(),
                instructions: None,
                supports_tools: false,
            },
        };

        Ok(Arc::new(RmcpSession {
            server: self.name.clone(),
            peer: service.peer().clone(),
            service: Mutex::new(Some(service)),
            identity,
            request_timeout: self.request_timeout,
        }))
    }
}

struct RmcpSession {
    server: String,
    peer: Peer<RoleClient>,
    // taken on close
    service: Mutex<Option<DynClientService>>,
    identity: ServerIdentity,
    request_timeout: Duration,
}

impl std::fmt::Debug for RmcpSession {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RmcpSession")
            .field("server", &self.server)
            .field("identity", &self.identity)
            .finish()
    }
}

impl RmcpSession {
    async fn request<T>(
        &self,
        method: &str,
        fut: impl Future<Output = Result<T, ServiceError>> + Send,
    ) -> McpResult<T> {
        match tokio::time::timeout(self.request_timeout, fut).await {
            Ok(Ok(value)) => Ok(value),
            Ok(Err(e)) => Err(classify(&self.server, e)),
            Err(_elapsed) => Err(McpError::Transport {
                server: self.server.clone(),
                reason: format!("{method} timed out after {:?}", self.request_timeout),
            }),
        }
    }
}

/// A JSON-RPC error reply means the server is alive; anything else means the
/// channel is unusable.
fn classify(server: &str, err: ServiceError) -> McpError {
    match err {
        ServiceError::McpError(data) => McpError::Remote {
            server: server.to_string(),
            message: data.message.to_string(),
        },
        other => McpError::Transport {
            server: server.to_string(),
            reason: other.to_string(),
        },
    }
}

#[async_trait]
impl Session for RmcpSession {
    async fn ping(&self) -> McpResult<()> {
        let ping = ClientRequest::PingRequest(PingRequest {
            method: Default::default(),
            extensions: Default::default(),
        });
        self.request("ping", self.peer.send_request(ping)).await?;
        Ok(())
    }

    async fn list_tools(&self) -> McpResult<Vec<ToolDescriptor>> {
        let tools = self
            .request("tools/list", self.peer.list_all_tools())
            .await?;
        Ok(tools.into_iter().map(ToolDescriptor::from).collect())
    }

    async fn call_tool(
        &self,
        name: &str,
        arguments: serde_json::Value,
    ) -> McpResult<serde_json::Value> {
        let params = CallToolRequestParam {
            name: name.to_string().into(),
            arguments: arguments.as_object().cloned(),
        };
        let result = self
            .request("tools/call", self.peer.call_tool(params))
            .await?;

        serde_json::to_value(result).map_err(|e| McpError::Remote {
            server: self.server.clone(),
            message: format!("unreadable tools/call result: {e}"),
        })
    }

    fn identity(&self) -> ServerIdentity {
        self.identity.clone()
    }

    async fn close(&self) {
        let Some(service) = self.service.lock().await.take() else {
            return;
        };
        match service.cancel().await {
            Ok(reason) => debug!(
                name: "mcp.session.closed",
                server = %self.server,
                reason = ?reason,
                "Session closed"
            ),
            Err(e) => debug!(
                name: "mcp.session.close_failed",
                server = %self.server,
                error = %e,
                "Session task ended abnormally"
            ),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mcp::config::McpServerEntry;

    #[test]
    fn test_factory_rejects_ambiguous_config() {
        let config = RemoteServerConfig::new(
            "alpha",
            McpServerEntry {
                url: Some("http://localhost:9/mcp".to_string()),
                command: Some("npx".to_string()),
                ..McpServerEntry::default()
            },
        );
        let err = RmcpSessionFactory::from_config(&config, DEFAULT_REQUEST_TIMEOUT).unwrap_err();
        assert!(matches!(err, McpError::Config { .. }));
    }

    #[test]
    fn test_remote_errors_are_not_transport_errors() {
        let remote = classify(
            "alpha",
            ServiceError::McpError(rmcp::model::ErrorData::internal_error("boom", None)),
        );
        assert!(matches!(remote, McpError::Remote { .. }));

        let closed = classify("alpha", ServiceError::TransportClosed);
        assert!(closed.is_transport());
    }

    #[tokio::test]
    async fn test_missing_command_is_connection_error() {
        let config = RemoteServerConfig::new(
            "ghost",
            McpServerEntry {
                command: Some("tool-console-no-such-binary".to_string()),
                ..McpServerEntry::default()
            },
        );
        let factory = RmcpSessionFactory::from_config(&config, DEFAULT_REQUEST_TIMEOUT).unwrap();

        let err = factory.create_session().await.unwrap_err();
        assert!(matches!(err, McpError::Connection { server, .. } if server == "ghost"));
    }
}
