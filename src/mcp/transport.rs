//! Transport abstraction consumed by the resilient connector.
//!
//! A [`SessionFactory`] knows how to reach one remote server and produces
//! [`Session`]s. A session is a single established request/response channel;
//! once any call on it fails at the transport level it is never reused.

use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::mcp::catalog::ToolDescriptor;
use crate::mcp::error::McpResult;

/// Identity and capabilities reported by a server during the handshake.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ServerIdentity {
    pub name: String,
    pub version: String,
    /// Free-form usage instructions the server sends to clients.
    pub instructions: Option<String>,
    /// Whether the server advertises the tools capability.
    pub supports_tools: bool,
}

/// One live connection to a remote tool server.
#[async_trait]
pub trait Session: Send + Sync + std::fmt::Debug {
    /// Side-effect-free liveness probe (`ping`).
    async fn ping(&self) -> McpResult<()>;

    /// Enumerate the tools the server currently offers (`tools/list`).
    async fn list_tools(&self) -> McpResult<Vec<ToolDescriptor>>;

    /// Invoke one tool (`tools/call`) and return the raw result document.
    async fn call_tool(
        &self,
        name: &str,
        arguments: serde_json::Value,
    ) -> McpResult<serde_json::Value>;

    fn identity(&self) -> ServerIdentity;

    /// Release the underlying channel. Further calls fail with a transport error.
    async fn close(&self);
}

/// Establishes sessions to one configured server.
#[async_trait]
pub trait SessionFactory: Send + Sync + std::fmt::Debug {
    /// Name of the server this factory connects to.
    fn server_name(&self) -> &str;

    async fn create_session(&self) -> McpResult<Arc<dyn Session>>;
}
