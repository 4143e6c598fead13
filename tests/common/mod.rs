//! Common test utilities.

#![allow(dead_code)]

use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use chrono::Utc;
use tempfile::TempDir;

use minekeeper::auth::CredentialAcquirer;
use minekeeper::provider::{
    ConnectParams, LinkEvent, ProviderError, SessionLink, SessionProvider,
};
use minekeeper::session::SessionDeps;
use minekeeper::status::StatusWriter;
use minekeeper::store::{CredentialRecord, FileCredentialStore, Profile};

// ============================================================================
// Records
// ============================================================================

/// A record that passes the usability predicate.
pub fn usable_record(account: &str) -> CredentialRecord {
    CredentialRecord {
        access_token: "cached-access-token".to_string(),
        refresh_token: Some("cached-refresh-token".to_string()),
        session_token: format!("{account}-0123456789abcdef0123456789abcdef"),
        expires_at: None,
        profile: Profile {
            display_name: account.to_string(),
            remote_id: "11112222333344445555666677778888".to_string(),
        },
        updated_at: Utc::now(),
    }
}

// ============================================================================
// Scripted Acquirer
// ============================================================================

pub enum AcquirerScript {
    Succeed(CredentialRecord),
    Fail(String),
}

/// Acquirer that always plays the same script and counts invocations.
pub struct ScriptedAcquirer {
    script: AcquirerScript,
    pub calls: Arc<AtomicUsize>,
}

impl ScriptedAcquirer {
    pub fn succeeding(record: CredentialRecord) -> Self {
        Self {
            script: AcquirerScript::Succeed(record),
            calls: Arc::new(AtomicUsize::new(0)),
        }
    }

    pub fn failing(message: &str) -> Self {
        Self {
            script: AcquirerScript::Fail(message.to_string()),
            calls: Arc::new(AtomicUsize::new(0)),
        }
    }
}

#[async_trait]
impl CredentialAcquirer for ScriptedAcquirer {
    async fn acquire(&self, _account: &str) -> anyhow::Result<CredentialRecord> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        match &self.script {
            AcquirerScript::Succeed(record) => Ok(record.clone()),
            AcquirerScript::Fail(message) => anyhow::bail!("{message}"),
        }
    }
}

// ============================================================================
// Fake Provider
// ============================================================================

/// In-memory provider: every connect yields a link that plays the scripted
/// events, then stays open. Chat lines and connect parameters are recorded
/// for assertions.
pub struct FakeProvider {
    events: Vec<LinkEvent>,
    pub sent: Arc<Mutex<Vec<String>>>,
    pub connects: Arc<AtomicUsize>,
    pub last_params: Arc<Mutex<Option<ConnectParams>>>,
}

impl FakeProvider {
    /// Links that report establishment immediately, with no rotated token.
    pub fn establishing() -> Self {
        Self::with_events(vec![LinkEvent::Established {
            session_token: None,
        }])
    }

    pub fn with_events(events: Vec<LinkEvent>) -> Self {
        Self {
            events,
            sent: Arc::new(Mutex::new(Vec::new())),
            connects: Arc::new(AtomicUsize::new(0)),
            last_params: Arc::new(Mutex::new(None)),
        }
    }
}

#[async_trait]
impl SessionProvider for FakeProvider {
    async fn connect(&self, params: ConnectParams) -> Result<Box<dyn SessionLink>, ProviderError> {
        self.connects.fetch_add(1, Ordering::SeqCst);
        *self.last_params.lock().unwrap() = Some(params);
        Ok(Box::new(FakeLink {
            events: self.events.clone().into(),
            sent: self.sent.clone(),
        }))
    }
}

struct FakeLink {
    events: VecDeque<LinkEvent>,
    sent: Arc<Mutex<Vec<String>>>,
}

#[async_trait]
impl SessionLink for FakeLink {
    async fn send_chat(&mut self, line: &str) -> Result<(), ProviderError> {
        self.sent.lock().unwrap().push(line.to_string());
        Ok(())
    }

    async fn next_event(&mut self) -> Option<LinkEvent> {
        match self.events.pop_front() {
            Some(event) => Some(event),
            // Stay open until the actor closes us.
            None => std::future::pending().await,
        }
    }

    async fn close(&mut self) {}
}

// ============================================================================
// Dependency Wiring
// ============================================================================

/// Build session deps over a temp-dir store and status file.
pub fn test_deps(
    tmp: &TempDir,
    acquirer: ScriptedAcquirer,
    provider: FakeProvider,
) -> (SessionDeps, Arc<FileCredentialStore>) {
    let store = Arc::new(FileCredentialStore::new(tmp.path().join("credentials")));
    let deps = SessionDeps {
        store: store.clone(),
        acquirer: Arc::new(acquirer),
        provider: Arc::new(provider),
        status: StatusWriter::new(tmp.path().join("status.json")),
    };
    (deps, store)
}
