//! Invocation layer over the connectors and the tool registry.
//!
//! The hub is what the console (or an agent loop) holds on to: it owns one
//! [`ResilientConnector`] per configured server, the shared [`ToolRegistry`]
//! and the [`ToolSynchronizer`] tying the two together. Tool calls are
//! resolved against a registry snapshot and dispatched either to a native
//! plugin or to the owning connector.

use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use std::time::Duration;

use futures::future::join_all;
use serde::Serialize;
use tracing::{error, info};

use crate::mcp::catalog::ToolSource;
use crate::mcp::config::McpConfig;
use crate::mcp::connector::{ConnectorSettings, ConnectorState, ResilientConnector};
use crate::mcp::error::{McpError, McpResult};
use crate::mcp::registry::{NativeTool, ToolRegistry, sanitize_tool_name};
use crate::mcp::rmcp_session::{DEFAULT_REQUEST_TIMEOUT, RmcpSessionFactory};
use crate::mcp::sync::{SyncReport, ToolSynchronizer};
use crate::mcp::transport::SessionFactory;

#[derive(Debug, Clone, Copy)]
pub struct HubSettings {
    pub connector: ConnectorSettings,
    /// Bound for each request sent to a remote server.
    pub request_timeout: Duration,
}

impl Default for HubSettings {
    fn default() -> Self {
        Self {
            connector: ConnectorSettings::default(),
            request_timeout: DEFAULT_REQUEST_TIMEOUT,
        }
    }
}

/// Connection state and registry contents of one server.
#[derive(Debug, Clone, Serialize)]
pub struct ServerStatus {
    pub name: String,
    pub state: ConnectorState,
    /// Tools currently in the registry for this server, possibly stale.
    pub tools: usize,
}

pub struct McpHub {
    connectors: BTreeMap<String, Arc<ResilientConnector>>,
    registry: Arc<ToolRegistry>,
    synchronizer: Arc<ToolSynchronizer>,
    rejected: BTreeMap<String, McpError>,
}

impl std::fmt::Debug for McpHub {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("McpHub")
            .field("servers", &self.connectors.keys().collect::<Vec<_>>())
            .field("rejected", &self.rejected.keys().collect::<Vec<_>>())
            .field("registry", &self.registry)
            .finish()
    }
}

impl McpHub {
    /// Build connectors for every valid server of `cfg`.
    ///
    /// Invalid entries are logged and reported by [`rejected`](Self::rejected);
    /// they never prevent the other servers from starting.
    pub fn from_config(cfg: &McpConfig, settings: HubSettings, registry: Arc<ToolRegistry>) -> Self {
        let mut factories: Vec<Arc<dyn SessionFactory>> = Vec::new();
        let mut rejected = BTreeMap::new();
        // sanitized name -> server that claimed it
        let mut claimed: HashMap<String, String> = HashMap::new();

        for server in cfg.servers() {
            let key = sanitize_tool_name(&server.name);
            let factory = match claimed.get(&key) {
                Some(owner) => Err(McpError::Config {
                    server: server.name.clone(),
                    reason: format!("name collides with server '{owner}'"),
                }),
                None => RmcpSessionFactory::from_config(&server, settings.request_timeout),
            };
            match factory {
                Ok(factory) => {
                    claimed.insert(key, server.name.clone());
                    factories.push(Arc::new(factory));
                }
                Err(e) => {
                    error!(
                        name: "mcp.config.rejected",
                        server = %server.name,
                        error = %e,
                        "Skipping MCP server"
                    );
                    rejected.insert(server.name, e);
                }
            }
        }

        let mut hub = Self::from_factories(factories, settings.connector, registry);
        hub.rejected = rejected;
        hub
    }

    /// Build a hub over arbitrary session factories.
    pub fn from_factories(
        factories: Vec<Arc<dyn SessionFactory>>,
        settings: ConnectorSettings,
        registry: Arc<ToolRegistry>,
    ) -> Self {
        let connectors: BTreeMap<String, Arc<ResilientConnector>> = factories
            .into_iter()
            .map(|factory| {
                let connector = ResilientConnector::new(factory, settings);
                (connector.name().to_string(), Arc::new(connector))
            })
            .collect();

        let synchronizer = ToolSynchronizer::attach(connectors.clone(), Arc::clone(&registry));

        Self {
            connectors,
            registry,
            synchronizer,
            rejected: BTreeMap::new(),
        }
    }

    /// Start every connector's health loop.
    ///
    /// Tools show up in the registry as servers become reachable.
    pub fn start(&self) {
        for connector in self.connectors.values() {
            connector.start();
        }
        info!(
            name: "mcp.hub.started",
            servers = self.connectors.len(),
            rejected = self.rejected.len(),
            "MCP hub started"
        );
    }

    /// Register a local plugin under `plugin`; its tools become `plugin__tool`.
    pub fn register_plugin(&self, plugin: &str, tools: Vec<Arc<dyn NativeTool>>) -> McpResult<()> {
        let key = sanitize_tool_name(plugin);
        if key.contains("__") {
            return Err(McpError::Config {
                server: plugin.to_string(),
                reason: "plugin name must not contain '__'".to_string(),
            });
        }
        if let Some(server) = self.connectors.keys().find(|s| sanitize_tool_name(s) == key) {
            return Err(McpError::Config {
                server: plugin.to_string(),
                reason: format!("name is already used by remote server '{server}'"),
            });
        }
        self.registry.register_native_plugin(plugin, tools);
        Ok(())
    }

    pub fn registry(&self) -> &Arc<ToolRegistry> {
        &self.registry
    }

    pub fn connector(&self, server: &str) -> Option<&Arc<ResilientConnector>> {
        self.connectors.get(server)
    }

    /// Servers whose configuration was rejected, with the reason.
    pub fn rejected(&self) -> &BTreeMap<String, McpError> {
        &self.rejected
    }

    pub fn statuses(&self) -> Vec<ServerStatus> {
        let snapshot = self.registry.snapshot();
        self.connectors
            .values()
            .map(|connector| ServerStatus {
                name: connector.name().to_string(),
                state: connector.state(),
                tools: snapshot.get(connector.name()).map_or(0, |set| set.len()),
            })
            .collect()
    }

    /// Run a synchronization pass now.
    pub async fn sync_now(&self) -> SyncReport {
        self.synchronizer.sync_now().await
    }

    /// Execute a namespaced tool, e.g. "`time__now`" or "`console__echo`".
    pub async fn call_tool(
        &self,
        namespaced_tool: &str,
        arguments: serde_json::Value,
    ) -> McpResult<serde_json::Value> {
        let resolved = self
            .registry
            .snapshot()
            .resolve(namespaced_tool)
            .ok_or_else(|| McpError::UnknownTool(namespaced_tool.to_string()))?;

        match resolved.source {
            ToolSource::Native => {
                let tool = self
                    .registry
                    .native_tool(&resolved.server, &resolved.tool)
                    .ok_or_else(|| McpError::UnknownTool(namespaced_tool.to_string()))?;
                tool.call(arguments).await.map_err(|e| McpError::Native {
                    tool: namespaced_tool.to_string(),
                    reason: format!("{e:#}"),
                })
            }
            ToolSource::Remote => {
                let connector = self
                    .connectors
                    .get(&resolved.server)
                    .ok_or_else(|| McpError::UnknownTool(namespaced_tool.to_string()))?;
                connector.call_tool(&resolved.tool, arguments).await
            }
        }
    }

    /// Stop every connector and close their sessions.
    pub async fn shutdown(&self) {
        join_all(self.connectors.values().map(|c| c.shutdown())).await;
        info!(name: "mcp.hub.stopped", "MCP hub stopped");
    }
}
