//! Keeps the registry in step with what each remote server offers.
//!
//! A [`ToolSynchronizer`] observes every connector. Each time one of them
//! becomes reachable it runs a synchronization pass: every connected server's
//! catalog is fetched and swapped into the [`ToolRegistry`]. Passes never
//! overlap. A trigger that arrives while a pass is running is folded into a
//! single follow-up pass instead of starting a second one.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};

use futures::future::join_all;
use serde::Serialize;
use tokio::runtime::Handle;
use tokio::sync::{Mutex, OwnedMutexGuard};
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::mcp::catalog::fetch_catalog;
use crate::mcp::connector::ResilientConnector;
use crate::mcp::error::McpError;
use crate::mcp::registry::ToolRegistry;

/// Outcome of one synchronization pass.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct SyncReport {
    /// Servers whose tool set was replaced, with the new tool count.
    pub synced: BTreeMap<String, usize>,
    /// Servers that were not connected when the pass reached them.
    pub skipped: Vec<String>,
    /// Servers whose fetch failed; their previous set was kept.
    pub failed: BTreeMap<String, String>,
}

pub struct ToolSynchronizer {
    connectors: BTreeMap<String, Arc<ResilientConnector>>,
    registry: Arc<ToolRegistry>,
    runtime: Handle,
    pass_lock: Arc<Mutex<()>>,
    pending: AtomicBool,
    passes: AtomicU64,
}

impl std::fmt::Debug for ToolSynchronizer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ToolSynchronizer")
            .field("servers", &self.connectors.keys().collect::<Vec<_>>())
            .field("passes", &self.passes_completed())
            .finish()
    }
}

impl ToolSynchronizer {
    /// Create a synchronizer and register it as the observer of every connector.
    ///
    /// Must be called from within a Tokio runtime; passes are spawned on it.
    pub fn attach(
        connectors: BTreeMap<String, Arc<ResilientConnector>>,
        registry: Arc<ToolRegistry>,
    ) -> Arc<Self> {
        let sync = Arc::new(Self {
            connectors,
            registry,
            runtime: Handle::current(),
            pass_lock: Arc::new(Mutex::new(())),
            pending: AtomicBool::new(false),
            passes: AtomicU64::new(0),
        });

        for connector in sync.connectors.values() {
            let weak = Arc::downgrade(&sync);
            connector.set_observer(move |reachable| {
                if !reachable {
                    return;
                }
                if let Some(sync) = weak.upgrade() {
                    sync.trigger();
                }
            });
        }

        sync
    }

    pub fn registry(&self) -> &Arc<ToolRegistry> {
        &self.registry
    }

    pub fn passes_completed(&self) -> u64 {
        self.passes.load(Ordering::SeqCst)
    }

    /// Request a pass in the background.
    ///
    /// If a pass is already running, the request is coalesced: the running
    /// pass performs at most one more pass when it finishes.
    pub fn trigger(self: &Arc<Self>) {
        self.pending.store(true, Ordering::SeqCst);

        let Ok(guard) = Arc::clone(&self.pass_lock).try_lock_owned() else {
            debug!(name: "mcp.sync.coalesced", "Synchronization already running");
            return;
        };

        let sync = Arc::clone(self);
        self.runtime.spawn(async move { sync.drain(guard).await });
    }

    /// Run a pass now, after any pass already in flight.
    ///
    /// Triggers that arrive while this pass runs are served by a follow-up
    /// pass before returning; the report covers this pass only.
    pub async fn sync_now(self: &Arc<Self>) -> SyncReport {
        let guard = Arc::clone(&self.pass_lock).lock_owned().await;
        self.pending.store(false, Ordering::SeqCst);
        let report = self.run_pass().await;
        Arc::clone(self).drain(guard).await;
        report
    }

    async fn drain(self: Arc<Self>, mut guard: OwnedMutexGuard<()>) {
        loop {
            while self.pending.swap(false, Ordering::SeqCst) {
                self.run_pass().await;
            }
            drop(guard);

            // A trigger may have lost the lock race right before the drop.
            if !self.pending.load(Ordering::SeqCst) {
                return;
            }
            match Arc::clone(&self.pass_lock).try_lock_owned() {
                Ok(next) => guard = next,
                Err(_) => return,
            }
        }
    }

    async fn run_pass(&self) -> SyncReport {
        let pass_id = Uuid::new_v4();
        debug!(name: "mcp.sync.started", pass = %pass_id, "Synchronization pass started");

        let fetches = self.connectors.iter().map(|(name, connector)| async move {
            if !connector.is_connected() {
                return (name, None);
            }
            (name, Some(fetch_catalog(connector).await))
        });

        let mut report = SyncReport::default();
        for (name, outcome) in join_all(fetches).await {
            match outcome {
                None | Some(Err(McpError::NotConnected { .. })) => {
                    report.skipped.push(name.clone());
                }
                Some(Ok(set)) => {
                    let installed = self.registry.replace_server(set);
                    info!(
                        name: "mcp.sync.server_synced",
                        pass = %pass_id,
                        server = %name,
                        tools = installed.len(),
                        generation = installed.generation,
                        "MCP server tools synchronized"
                    );
                    report.synced.insert(name.clone(), installed.len());
                }
                Some(Err(e)) => {
                    warn!(
                        name: "mcp.sync.fetch_failed",
                        pass = %pass_id,
                        server = %name,
                        error = %e,
                        "Keeping previous tool set"
                    );
                    report.failed.insert(name.clone(), e.to_string());
                }
            }
        }

        self.passes.fetch_add(1, Ordering::SeqCst);
        info!(
            name: "mcp.sync.finished",
            pass = %pass_id,
            synced = report.synced.len(),
            skipped = report.skipped.len(),
            failed = report.failed.len(),
            "Synchronization pass finished"
        );
        report
    }
}
