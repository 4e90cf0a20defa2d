//! Error taxonomy for remote tool servers.

/// Errors raised by connectors, the catalog fetcher and the synchronizer.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum McpError {
    /// The server entry is invalid or ambiguous. Fatal for that server only.
    #[error("invalid configuration for MCP server '{server}': {reason}")]
    Config { server: String, reason: String },

    /// Session creation failed.
    #[error("failed to connect MCP server '{server}': {reason}")]
    Connection { server: String, reason: String },

    /// An access or call was attempted while the connector is disconnected.
    #[error("MCP server '{server}' is not connected ({operation})")]
    NotConnected { server: String, operation: String },

    /// The request never got a usable reply: send failure, closed channel, timeout.
    #[error("transport failure talking to MCP server '{server}': {reason}")]
    Transport { server: String, reason: String },

    /// The server answered with a JSON-RPC error. The session is still alive.
    #[error("MCP server '{server}' returned an error: {message}")]
    Remote { server: String, message: String },

    /// Listing the server's tools failed during a synchronization pass.
    #[error("failed to fetch tool catalog from '{server}': {reason}")]
    CatalogFetch { server: String, reason: String },

    #[error("unknown tool: {0}")]
    UnknownTool(String),

    /// A local plugin tool failed.
    #[error("native tool '{tool}' failed: {reason}")]
    Native { tool: String, reason: String },
}

impl McpError {
    pub(crate) fn not_connected(server: &str, operation: &str) -> Self {
        Self::NotConnected {
            server: server.to_string(),
            operation: operation.to_string(),
        }
    }

    /// Whether this failure means the session is unusable and must be discarded.
    pub fn is_transport(&self) -> bool {
        matches!(self, Self::Transport { .. })
    }
}

pub type McpResult<T> = Result<T, McpError>;
