//! Resilient connector over an unreliable remote tool server.
//!
//! A [`ResilientConnector`] owns at most one live [`Session`] and is always in
//! exactly one [`ConnectorState`]. A background health loop creates sessions
//! and probes them on a fixed schedule; callers never wait for a reconnect,
//! they get [`McpError::NotConnected`] immediately instead.
//!
//! ```text
//!                 session created + ping ok
//!   Disconnected ───────────────────────────▶ Connected
//!        ▲                                        │
//!        └────── ping failed / transport error ───┘
//! ```
//!
//! State changes are delivered to a single observer callback, in order, from
//! a dispatcher task. The callback runs on the blocking pool so that a slow
//! observer never holds up the health loop.

use std::sync::{Arc, Mutex, MutexGuard, PoisonError, RwLock};
use std::time::Duration;

use serde::Serialize;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::mcp::catalog::ToolDescriptor;
use crate::mcp::error::{McpError, McpResult};
use crate::mcp::transport::{ServerIdentity, Session, SessionFactory};

/// Delay between two health-check iterations.
pub const DEFAULT_PROBE_INTERVAL: Duration = Duration::from_secs(10);

/// Connection state of one connector.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ConnectorState {
    Disconnected,
    Connected,
}

/// Callback invoked with `true` when a server becomes reachable and `false`
/// when it stops being reachable.
pub type ConnectionObserver = Arc<dyn Fn(bool) + Send + Sync>;

/// Tunables for the health loop.
#[derive(Debug, Clone, Copy)]
pub struct ConnectorSettings {
    pub probe_interval: Duration,
}

impl Default for ConnectorSettings {
    fn default() -> Self {
        Self {
            probe_interval: DEFAULT_PROBE_INTERVAL,
        }
    }
}

/// Wraps a session that may be absent or stale and recovers automatically.
pub struct ResilientConnector {
    inner: Arc<ConnectorInner>,
    cancel: CancellationToken,
    tasks: Mutex<Vec<JoinHandle<()>>>,
    events: Mutex<Option<mpsc::UnboundedReceiver<bool>>>,
}

struct ConnectorInner {
    name: String,
    factory: Arc<dyn SessionFactory>,
    settings: ConnectorSettings,
    session: RwLock<Option<Arc<dyn Session>>>,
    state: watch::Sender<ConnectorState>,
    events: mpsc::UnboundedSender<bool>,
    observer: RwLock<Option<ConnectionObserver>>,
    // health-check iterations never overlap
    probe_lock: tokio::sync::Mutex<()>,
}

impl std::fmt::Debug for ResilientConnector {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ResilientConnector")
            .field("name", &self.inner.name)
            .field("state", &self.state())
            .field("probe_interval", &self.inner.settings.probe_interval)
            .finish()
    }
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

impl ResilientConnector {
    /// Create a connector in the `Disconnected` state.
    ///
    /// Nothing happens on the network until [`start`](Self::start) spawns the
    /// health loop.
    pub fn new(factory: Arc<dyn SessionFactory>, settings: ConnectorSettings) -> Self {
        let (events_tx, events_rx) = mpsc::unbounded_channel();
        let (state, _) = watch::channel(ConnectorState::Disconnected);

        Self {
            inner: Arc::new(ConnectorInner {
                name: factory.server_name().to_string(),
                factory,
                settings,
                session: RwLock::new(None),
                state,
                events: events_tx,
                observer: RwLock::new(None),
                probe_lock: tokio::sync::Mutex::new(()),
            }),
            cancel: CancellationToken::new(),
            tasks: Mutex::new(Vec::new()),
            events: Mutex::new(Some(events_rx)),
        }
    }

    /// Name of the remote server.
    pub fn name(&self) -> &str {
        &self.inner.name
    }

    pub fn state(&self) -> ConnectorState {
        *self.inner.state.borrow()
    }

    pub fn is_connected(&self) -> bool {
        self.inner.current().is_some()
    }

    /// Watch state transitions without taking the observer slot.
    pub fn subscribe_state(&self) -> watch::Receiver<ConnectorState> {
        self.inner.state.subscribe()
    }

    /// Register the connection observer.
    ///
    /// There is a single slot: registering a second observer replaces the
    /// first, which is not retained.
    pub fn set_observer<F>(&self, observer: F)
    where
        F: Fn(bool) + Send + Sync + 'static,
    {
        let mut slot = self
            .inner
            .observer
            .write()
            .unwrap_or_else(PoisonError::into_inner);
        if slot.is_some() {
            debug!(
                name: "mcp.connector.observer_replaced",
                server = %self.inner.name,
                "Replacing connection observer"
            );
        }
        *slot = Some(Arc::new(observer));
    }

    /// Spawn the health loop and the notification dispatcher.
    ///
    /// The first health check runs immediately. Calling `start` again is a no-op.
    pub fn start(&self) {
        let Some(events) = lock(&self.events).take() else {
            return;
        };

        let mut tasks = lock(&self.tasks);
        tasks.push(tokio::spawn(dispatch_events(
            Arc::clone(&self.inner),
            events,
            self.cancel.clone(),
        )));
        tasks.push(tokio::spawn(health_loop(
            Arc::clone(&self.inner),
            self.cancel.clone(),
        )));

        info!(
            name: "mcp.connector.started",
            server = %self.inner.name,
            probe_interval_ms = self.inner.settings.probe_interval.as_millis(),
            "Health loop started"
        );
    }

    /// Run one health-check iteration now.
    ///
    /// This is what the background loop does on every tick: create a session
    /// if there is none, ping it, and publish a state change if one happened.
    pub async fn probe_once(&self) {
        self.inner.probe_once().await;
    }

    /// Stop the health loop, wait for it to finish and close the held session.
    ///
    /// The connector stays usable as a read-only handle afterwards; every call
    /// fails with `NotConnected`.
    pub async fn shutdown(&self) {
        self.cancel.cancel();

        let tasks = std::mem::take(&mut *lock(&self.tasks));
        for task in tasks {
            if let Err(e) = task.await {
                if !e.is_cancelled() {
                    warn!(
                        name: "mcp.connector.task_failed",
                        server = %self.inner.name,
                        error = %e,
                        "Connector task ended abnormally"
                    );
                }
            }
        }

        let session = {
            let mut slot = self
                .inner
                .session
                .write()
                .unwrap_or_else(PoisonError::into_inner);
            self.inner.state.send_replace(ConnectorState::Disconnected);
            slot.take()
        };
        if let Some(session) = session {
            session.close().await;
        }

        info!(name: "mcp.connector.stopped", server = %self.inner.name, "Connector stopped");
    }

    /// Identity and capabilities reported by the connected server.
    pub fn server_identity(&self) -> McpResult<ServerIdentity> {
        Ok(self.session_for("server_identity")?.identity())
    }

    /// List the tools the server currently offers.
    pub async fn list_tools(&self) -> McpResult<Vec<ToolDescriptor>> {
        let session = self.session_for("list_tools")?;
        let result = session.list_tools().await;
        self.settle(&session, result).await
    }

    /// Invoke a tool on the server.
    pub async fn call_tool(
        &self,
        name: &str,
        arguments: serde_json::Value,
    ) -> McpResult<serde_json::Value> {
        let session = self.session_for("call_tool")?;
        let result = session.call_tool(name, arguments).await;
        self.settle(&session, result).await
    }

    fn session_for(&self, operation: &str) -> McpResult<Arc<dyn Session>> {
        self.inner
            .current()
            .ok_or_else(|| McpError::not_connected(&self.inner.name, operation))
    }

    /// Transport failures discard the session; the health loop reconnects on
    /// its own schedule.
    async fn settle<T>(&self, session: &Arc<dyn Session>, result: McpResult<T>) -> McpResult<T> {
        if let Err(e) = &result {
            if e.is_transport() {
                self.inner.invalidate(session, &e.to_string()).await;
            }
        }
        result
    }
}

impl Drop for ResilientConnector {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}

impl ConnectorInner {
    fn current(&self) -> Option<Arc<dyn Session>> {
        self.session
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    async fn probe_once(&self) {
        let _iteration = self.probe_lock.lock().await;

        let (session, fresh) = match self.current() {
            Some(session) => (session, false),
            None => match self.factory.create_session().await {
                Ok(session) => (session, true),
                Err(e) => {
                    warn!(
                        name: "mcp.connector.connect_failed",
                        server = %self.name,
                        error = %e,
                        "Failed to create session"
                    );
                    return;
                }
            },
        };

        debug!(name: "mcp.connector.ping", server = %self.name, "Pinging server");

        let ping = session.ping().await;
        match ping {
            Ok(()) if fresh => self.install(session),
            Ok(()) => {}
            Err(e) => {
                warn!(
                    name: "mcp.connector.ping_failed",
                    server = %self.name,
                    error = %e,
                    "Ping to the MCP server failed"
                );
                if fresh {
                    session.close().await;
                } else {
                    self.invalidate(&session, &e.to_string()).await;
                }
            }
        }
    }

    fn install(&self, session: Arc<dyn Session>) {
        let identity = session.identity();
        {
            let mut slot = self.session.write().unwrap_or_else(PoisonError::into_inner);
            *slot = Some(session);
            self.state.send_replace(ConnectorState::Connected);
            // queued under the lock so events keep transition order
            self.publish(true);
        }

        info!(
            name: "mcp.connector.connected",
            server = %self.name,
            remote = %identity.name,
            version = %identity.version,
            "MCP server connected"
        );
    }

    /// Drop `failed` if it is still the current session.
    async fn invalidate(&self, failed: &Arc<dyn Session>, reason: &str) {
        let dropped = {
            let mut slot = self.session.write().unwrap_or_else(PoisonError::into_inner);
            match slot.as_ref() {
                Some(current) if Arc::ptr_eq(current, failed) => {
                    self.state.send_replace(ConnectorState::Disconnected);
                    self.publish(false);
                    slot.take()
                }
                _ => None,
            }
        };

        if let Some(session) = dropped {
            warn!(
                name: "mcp.connector.disconnected",
                server = %self.name,
                reason = %reason,
                "MCP server disconnected"
            );
            session.close().await;
        }
    }

    fn publish(&self, reachable: bool) {
        // The receiver only goes away after shutdown.
        if self.events.send(reachable).is_err() {
            debug!(
                name: "mcp.connector.event_dropped",
                server = %self.name,
                reachable,
                "No dispatcher for connection event"
            );
        }
    }

    fn observer(&self) -> Option<ConnectionObserver> {
        self.observer
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }
}

async fn health_loop(inner: Arc<ConnectorInner>, cancel: CancellationToken) {
    loop {
        tokio::select! {
            () = cancel.cancelled() => break,
            () = inner.probe_once() => {}
        }
        tokio::select! {
            () = cancel.cancelled() => break,
            () = tokio::time::sleep(inner.settings.probe_interval) => {}
        }
    }
    debug!(name: "mcp.connector.loop_stopped", server = %inner.name, "Health loop stopped");
}

async fn dispatch_events(
    inner: Arc<ConnectorInner>,
    mut events: mpsc::UnboundedReceiver<bool>,
    cancel: CancellationToken,
) {
    loop {
        let reachable = tokio::select! {
            () = cancel.cancelled() => break,
            event = events.recv() => match event {
                Some(reachable) => reachable,
                None => break,
            },
        };

        let Some(observer) = inner.observer() else {
            continue;
        };
        if let Err(e) = tokio::task::spawn_blocking(move || observer(reachable)).await {
            warn!(
                name: "mcp.connector.observer_failed",
                server = %inner.name,
                error = %e,
                "Connection observer panicked"
            );
        }
    }
}
