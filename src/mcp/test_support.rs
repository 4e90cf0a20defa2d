//! In-memory fake server used by unit tests.

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::{Semaphore, watch};

use crate::mcp::catalog::ToolDescriptor;
use crate::mcp::connector::{ConnectorSettings, ConnectorState, ResilientConnector};
use crate::mcp::error::{McpError, McpResult};
use crate::mcp::transport::{ServerIdentity, Session, SessionFactory};

const WAIT_LIMIT: Duration = Duration::from_secs(5);

pub(crate) fn tool(name: &str) -> ToolDescriptor {
    ToolDescriptor {
        name: name.to_string(),
        description: format!("{name} tool"),
        input_schema: serde_json::json!({ "type": "object", "properties": {} }),
    }
}

#[derive(Debug, Default)]
struct FakeState {
    name: String,
    tools: Mutex<Vec<ToolDescriptor>>,
    unreachable: AtomicBool,
    fail_list_tools: AtomicBool,
    fail_calls: AtomicBool,
    list_gate: Mutex<Option<Arc<Semaphore>>>,
    connect_attempts: AtomicUsize,
    sessions_created: AtomicUsize,
    sessions_closed: AtomicUsize,
    pings: AtomicUsize,
    calls: AtomicUsize,
    lists: AtomicUsize,
    lists_in_flight: AtomicUsize,
    max_lists_in_flight: AtomicUsize,
}

/// A scriptable remote server; cheap to clone, all clones share state.
#[derive(Debug, Clone)]
pub(crate) struct FakeServer {
    state: Arc<FakeState>,
}

impl FakeServer {
    pub(crate) fn new(name: &str, tools: Vec<ToolDescriptor>) -> Self {
        Self {
            state: Arc::new(FakeState {
                name: name.to_string(),
                tools: Mutex::new(tools),
                ..FakeState::default()
            }),
        }
    }

    pub(crate) fn factory(&self) -> Arc<dyn SessionFactory> {
        Arc::new(self.clone())
    }

    pub(crate) fn connector(&self) -> ResilientConnector {
        ResilientConnector::new(self.factory(), ConnectorSettings::default())
    }

    pub(crate) fn connector_with_interval(&self, probe_interval: Duration) -> ResilientConnector {
        ResilientConnector::new(self.factory(), ConnectorSettings { probe_interval })
    }

    pub(crate) fn set_reachable(&self, reachable: bool) {
        self.state.unreachable.store(!reachable, Ordering::SeqCst);
    }

    pub(crate) fn set_tools(&self, tools: Vec<ToolDescriptor>) {
        *self.state.tools.lock().unwrap() = tools;
    }

    pub(crate) fn fail_list_tools(&self, fail: bool) {
        self.state.fail_list_tools.store(fail, Ordering::SeqCst);
    }

    pub(crate) fn fail_calls(&self, fail: bool) {
        self.state.fail_calls.store(fail, Ordering::SeqCst);
    }

    /// Make `tools/list` hang until [`release_list_tools`](Self::release_list_tools).
    pub(crate) fn block_list_tools(&self) {
        *self.state.list_gate.lock().unwrap() = Some(Arc::new(Semaphore::new(0)));
    }

    pub(crate) fn release_list_tools(&self) {
        if let Some(gate) = self.state.list_gate.lock().unwrap().take() {
            gate.add_permits(Semaphore::MAX_PERMITS / 2);
        }
    }

    pub(crate) fn sessions_created(&self) -> usize {
        self.state.sessions_created.load(Ordering::SeqCst)
    }

    pub(crate) fn sessions_closed(&self) -> usize {
        self.state.sessions_closed.load(Ordering::SeqCst)
    }

    pub(crate) fn pings(&self) -> usize {
        self.state.pings.load(Ordering::SeqCst)
    }

    pub(crate) fn calls(&self) -> usize {
        self.state.calls.load(Ordering::SeqCst)
    }

    pub(crate) fn lists(&self) -> usize {
        self.state.lists.load(Ordering::SeqCst)
    }

    pub(crate) fn max_lists_in_flight(&self) -> usize {
        self.state.max_lists_in_flight.load(Ordering::SeqCst)
    }

    pub(crate) async fn wait_for_pings(&self, count: usize) {
        wait_until(|| self.pings() >= count).await;
    }

    pub(crate) async fn wait_for_connect_attempts(&self, count: usize) {
        wait_until(|| self.state.connect_attempts.load(Ordering::SeqCst) >= count).await;
    }

    pub(crate) async fn wait_for_lists(&self, count: usize) {
        wait_until(|| self.lists() >= count).await;
    }
}

pub(crate) async fn wait_until(mut condition: impl FnMut() -> bool) {
    tokio::time::timeout(WAIT_LIMIT, async {
        while !condition() {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    })
    .await
    .expect("condition not reached in time");
}

pub(crate) async fn wait_for_state(
    receiver: &mut watch::Receiver<ConnectorState>,
    target: ConnectorState,
) {
    tokio::time::timeout(WAIT_LIMIT, receiver.wait_for(|state| *state == target))
        .await
        .expect("state not reached in time")
        .expect("state channel closed");
}

#[async_trait]
impl SessionFactory for FakeServer {
    fn server_name(&self) -> &str {
        &self.state.name
    }

    async fn create_session(&self) -> McpResult<Arc<dyn Session>> {
        self.state.connect_attempts.fetch_add(1, Ordering::SeqCst);
        if self.state.unreachable.load(Ordering::SeqCst) {
            return Err(McpError::Connection {
                server: self.state.name.clone(),
                reason: "connection refused".to_string(),
            });
        }
        self.state.sessions_created.fetch_add(1, Ordering::SeqCst);
        Ok(Arc::new(FakeSession {
            state: Arc::clone(&self.state),
            closed: AtomicBool::new(false),
        }))
    }
}

#[derive(Debug)]
struct FakeSession {
    state: Arc<FakeState>,
    closed: AtomicBool,
}

impl FakeSession {
    fn transport_error(&self, reason: &str) -> McpError {
        McpError::Transport {
            server: self.state.name.clone(),
            reason: reason.to_string(),
        }
    }

    fn check_alive(&self) -> McpResult<()> {
        if self.closed.load(Ordering::SeqCst) {
            return Err(self.transport_error("session closed"));
        }
        if self.state.unreachable.load(Ordering::SeqCst) {
            return Err(self.transport_error("connection reset"));
        }
        Ok(())
    }
}

#[async_trait]
impl Session for FakeSession {
    async fn ping(&self) -> McpResult<()> {
        self.state.pings.fetch_add(1, Ordering::SeqCst);
        self.check_alive()
    }

    async fn list_tools(&self) -> McpResult<Vec<ToolDescriptor>> {
        self.state.lists.fetch_add(1, Ordering::SeqCst);
        let in_flight = self.state.lists_in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.state
            .max_lists_in_flight
            .fetch_max(in_flight, Ordering::SeqCst);

        let gate = self.state.list_gate.lock().unwrap().clone();
        if let Some(gate) = gate {
            let _permit = gate.acquire().await;
        }

        let result = if self.state.fail_list_tools.load(Ordering::SeqCst) {
            Err(self.transport_error("tools/list timed out"))
        } else {
            self.check_alive()
                .map(|()| self.state.tools.lock().unwrap().clone())
        };
        self.state.lists_in_flight.fetch_sub(1, Ordering::SeqCst);
        result
    }

    async fn call_tool(
        &self,
        name: &str,
        arguments: serde_json::Value,
    ) -> McpResult<serde_json::Value> {
        self.state.calls.fetch_add(1, Ordering::SeqCst);
        if self.state.fail_calls.load(Ordering::SeqCst) {
            return Err(self.transport_error("broken pipe"));
        }
        self.check_alive()?;
        let known = self.state.tools.lock().unwrap().iter().any(|t| t.name == name);
        if !known {
            return Err(McpError::Remote {
                server: self.state.name.clone(),
                message: format!("unknown tool {name}"),
            });
        }
        Ok(serde_json::json!({ "tool": name, "arguments": arguments }))
    }

    fn identity(&self) -> ServerIdentity {
        ServerIdentity {
            name: self.state.name.clone(),
            version: "1.0.0".to_string(),
            instructions: None,
            supports_tools: true,
        }
    }

    async fn close(&self) {
        if !self.closed.swap(true, Ordering::SeqCst) {
            self.state.sessions_closed.fetch_add(1, Ordering::SeqCst);
        }
    }
}
