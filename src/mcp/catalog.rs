//! Tool catalogs: what a server offers and how it is fetched.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::mcp::connector::ResilientConnector;
use crate::mcp::error::{McpError, McpResult};

/// One remote-callable function.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolDescriptor {
    /// Tool name, unique within its owning server's catalog.
    pub name: String,
    pub description: String,
    /// JSON Schema for the tool arguments.
    pub input_schema: serde_json::Value,
}

impl From<rmcp::model::Tool> for ToolDescriptor {
    fn from(tool: rmcp::model::Tool) -> Self {
        Self {
            name: tool.name.to_string(),
            description: tool.description.map(|d| d.to_string()).unwrap_or_default(),
            // input_schema is Arc<JsonObject>
            input_schema: serde_json::Value::Object((*tool.input_schema).clone()),
        }
    }
}

/// Where the tools of a [`ServerToolSet`] are executed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ToolSource {
    /// Forwarded to a remote server through its connector.
    Remote,
    /// Handled in-process by a registered plugin.
    Native,
}

/// The catalog currently attributed to one server name.
///
/// Always replaced wholesale in the registry, never patched.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ServerToolSet {
    pub server: String,
    pub source: ToolSource,
    pub tools: Vec<ToolDescriptor>,
    /// Registry generation at which this set was installed.
    pub generation: u64,
    pub fetched_at: DateTime<Utc>,
}

impl ServerToolSet {
    pub fn new(server: impl Into<String>, source: ToolSource, tools: Vec<ToolDescriptor>) -> Self {
        Self {
            server: server.into(),
            source,
            tools,
            generation: 0,
            fetched_at: Utc::now(),
        }
    }

    pub fn tool(&self, name: &str) -> Option<&ToolDescriptor> {
        self.tools.iter().find(|t| t.name == name)
    }

    pub fn len(&self) -> usize {
        self.tools.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tools.is_empty()
    }
}

/// Fetch the current catalog of a connected server.
///
/// Fails with [`McpError::NotConnected`] when the connector has no session.
/// Any other failure is reported as [`McpError::CatalogFetch`]; a transport
/// failure has already moved the connector to disconnected by then.
pub async fn fetch_catalog(connector: &ResilientConnector) -> McpResult<ServerToolSet> {
    let server = connector.name();
    match connector.list_tools().await {
        Ok(tools) => {
            tracing::debug!(
                name: "mcp.catalog.fetched",
                server = %server,
                tools = tools.len(),
                "Fetched tool catalog"
            );
            Ok(ServerToolSet::new(server, ToolSource::Remote, tools))
        }
        Err(e @ McpError::NotConnected { .. }) => Err(e),
        Err(e) => Err(McpError::CatalogFetch {
            server: server.to_string(),
            reason: e.to_string(),
        }),
    }
}
