//! Registry of account session actors.
//!
//! Tracks one handle per account, starts connect sequences, and tears every
//! actor down on shutdown. Thread-safe and cheap to clone.

use std::sync::{Arc, Mutex};

use dashmap::DashMap;
use tokio::task::JoinHandle;
use tracing::{info, warn};

use crate::config::{AccountConfig, ServerConfig};

use super::manager::{SessionActor, SessionDeps, SessionHandle};
use super::reconnect::ReconnectPolicy;
use super::SessionState;

/// Registry for session actors, keyed by account name.
#[derive(Clone, Default)]
pub struct SessionRegistry {
    handles: Arc<DashMap<String, SessionHandle>>,
    // std Mutex: never held across an await.
    tasks: Arc<Mutex<Vec<JoinHandle<()>>>>,
}

impl SessionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Spawn an actor for one account and track it. A re-spawn under the
    /// same name replaces the handle; the old actor winds down when its
    /// channel closes.
    pub fn spawn(
        &self,
        account: AccountConfig,
        server: ServerConfig,
        policy: ReconnectPolicy,
        deps: SessionDeps,
    ) -> SessionHandle {
        let (handle, task) = SessionActor::spawn(account, server, policy, deps);
        self.handles
            .insert(handle.account().to_string(), handle.clone());
        self.tasks.lock().expect("mutex poisoned").push(task);
        handle
    }

    pub fn get(&self, account: &str) -> Option<SessionHandle> {
        self.handles.get(account).map(|h| h.clone())
    }

    pub fn accounts(&self) -> Vec<String> {
        self.handles.iter().map(|e| e.key().clone()).collect()
    }

    /// Snapshot the handles so no map guard is held across an await.
    fn snapshot(&self) -> Vec<SessionHandle> {
        self.handles.iter().map(|e| e.value().clone()).collect()
    }

    /// Start a connect sequence on every account.
    pub async fn connect_all(&self) {
        for handle in self.snapshot() {
            if let Err(e) = handle.connect().await {
                warn!(account = %handle.account(), error = %e, "Failed to initiate connect");
            }
        }
    }

    /// Current state per account.
    pub async fn states(&self) -> Vec<(String, SessionState)> {
        let mut out = Vec::new();
        for handle in self.snapshot() {
            if let Ok(state) = handle.state().await {
                out.push((handle.account().to_string(), state));
            }
        }
        out
    }

    /// Stop every actor and wait for their tasks to finish.
    pub async fn shutdown(&self) {
        for handle in self.snapshot() {
            if let Err(e) = handle.stop().await {
                warn!(account = %handle.account(), error = %e, "Failed to stop session");
            }
        }

        // Dropping the handles closes the command channels; actors exit once
        // their queues drain.
        self.handles.clear();

        let tasks: Vec<_> = std::mem::take(&mut *self.tasks.lock().expect("mutex poisoned"));
        let count = tasks.len();
        for task in tasks {
            if let Err(e) = task.await {
                if e.is_panic() {
                    warn!(error = %e, "Session actor panicked");
                }
            }
        }
        info!(count, "Session registry shut down");
    }
}
