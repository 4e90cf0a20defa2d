//! Model Context Protocol (MCP) client side of the console.
//!
//! Each configured server gets a [`ResilientConnector`](connector::ResilientConnector)
//! that keeps a session alive with periodic probes. Reachability changes feed
//! the [`ToolSynchronizer`](sync::ToolSynchronizer), which refreshes the shared
//! [`ToolRegistry`](registry::ToolRegistry) one server at a time. The
//! [`McpHub`](hub::McpHub) ties these together and dispatches tool calls.
//!
//! # Configuration
//!
//! MCP servers are configured via `mcp.json`:
//!
//! ```json
//! {
//!   "mcpServers": {
//!     "time": {
//!       "command": "npx",
//!       "args": ["-y", "@mcpcentral/mcp-time"]
//!     },
//!     "search": {
//!       "url": "https://search.example.com/mcp",
//!       "apiKey": "${SEARCH_API_KEY}",
//!       "serverSystemMessage": "Use search for anything about invoices."
//!     }
//!   }
//! }
//! ```
//!
//! # Tool Namespacing
//!
//! Tools are namespaced by server name: `server_name__tool_name`
//! (e.g., `time__now`, `console__echo`).

pub mod catalog;
pub mod config;
pub mod connector;
pub mod error;
pub mod hub;
pub mod registry;
pub mod rmcp_session;
pub mod sync;
pub mod transport;

#[cfg(test)]
pub(crate) mod test_support;

pub use connector::{ConnectorSettings, ConnectorState, ResilientConnector};
pub use error::{McpError, McpResult};
pub use hub::{HubSettings, McpHub, ServerStatus};
pub use registry::{NativeTool, ToolRegistry};
pub use sync::{SyncReport, ToolSynchronizer};
