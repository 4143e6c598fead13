//! Per-account session actor.
//!
//! Each account gets a dedicated task that serializes its own state
//! transitions via message passing: no two resolve/connect sequences are
//! ever in flight for the same account, and no lock is held while waiting
//! on the network. Other accounts' actors run freely in the meantime.

use std::sync::Arc;

use chrono::Utc;
use thiserror::Error;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tracing::{debug, info, warn};

use crate::auth::{CredentialAcquirer, SESSION_TOKEN_LIFETIME_DAYS};
use crate::config::{AccountConfig, ServerConfig};
use crate::provider::{ConnectParams, LinkEvent, LiveCredential, SessionLink, SessionProvider};
use crate::status::{StatusRecord, StatusWriter};
use crate::store::{CredentialRecord, CredentialStore, Profile};

use super::reconnect::ReconnectPolicy;
use super::{DisconnectReason, SessionState};

// ============================================================================
// Configuration Constants
// ============================================================================

/// Channel capacity for actor commands. Command traffic is a trickle (relay
/// lines and lifecycle requests); senders block if it ever fills.
const CHANNEL_CAPACITY: usize = 64;

// ============================================================================
// Error Types
// ============================================================================

/// Errors from session operations.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum SessionError {
    /// A connect was requested while a sequence is already in flight or live.
    #[error("already connected")]
    AlreadyConnected,

    /// A command arrived while the session is not connected. The command is
    /// dropped, not buffered.
    #[error("not connected, command dropped")]
    NotConnected,

    /// The manager was explicitly stopped; stopped is terminal.
    #[error("session manager stopped")]
    Stopped,

    /// Forwarding to the live link failed.
    #[error("link error: {0}")]
    Link(String),

    /// The actor task is gone.
    #[error("session actor has shut down")]
    ActorShutdown,
}

// ============================================================================
// Commands
// ============================================================================

enum SessionCommand {
    Connect {
        reply: oneshot::Sender<Result<(), SessionError>>,
    },
    SendChat {
        line: String,
        reply: oneshot::Sender<Result<(), SessionError>>,
    },
    GetState {
        reply: oneshot::Sender<SessionState>,
    },
    Stop {
        reply: oneshot::Sender<()>,
    },
}

// ============================================================================
// Handle
// ============================================================================

/// Cheap-to-clone handle to one account's session actor.
#[derive(Clone)]
pub struct SessionHandle {
    account: String,
    tx: mpsc::Sender<SessionCommand>,
}

impl SessionHandle {
    pub fn account(&self) -> &str {
        &self.account
    }

    /// Request a connect sequence. Returns once the sequence is initiated;
    /// progress is observable via `state()` and the status egress.
    pub async fn connect(&self) -> Result<(), SessionError> {
        let (reply, rx) = oneshot::channel();
        self.tx
            .send(SessionCommand::Connect { reply })
            .await
            .map_err(|_| SessionError::ActorShutdown)?;
        rx.await.map_err(|_| SessionError::ActorShutdown)?
    }

    /// Forward one chat line to the live session, verbatim.
    pub async fn send_chat(&self, line: &str) -> Result<(), SessionError> {
        let (reply, rx) = oneshot::channel();
        self.tx
            .send(SessionCommand::SendChat {
                line: line.to_string(),
                reply,
            })
            .await
            .map_err(|_| SessionError::ActorShutdown)?;
        rx.await.map_err(|_| SessionError::ActorShutdown)?
    }

    pub async fn state(&self) -> Result<SessionState, SessionError> {
        let (reply, rx) = oneshot::channel();
        self.tx
            .send(SessionCommand::GetState { reply })
            .await
            .map_err(|_| SessionError::ActorShutdown)?;
        rx.await.map_err(|_| SessionError::ActorShutdown)
    }

    /// Stop the manager. Terminal: no further automatic transitions. An
    /// acquisition already in flight completes on its own and is discarded.
    pub async fn stop(&self) -> Result<(), SessionError> {
        let (reply, rx) = oneshot::channel();
        self.tx
            .send(SessionCommand::Stop { reply })
            .await
            .map_err(|_| SessionError::ActorShutdown)?;
        rx.await.map_err(|_| SessionError::ActorShutdown)
    }
}

// ============================================================================
// Dependencies
// ============================================================================

/// Shared collaborators injected into every actor.
#[derive(Clone)]
pub struct SessionDeps {
    pub store: Arc<dyn CredentialStore>,
    pub acquirer: Arc<dyn CredentialAcquirer>,
    pub provider: Arc<dyn SessionProvider>,
    pub status: StatusWriter,
}

// ============================================================================
// Actor
// ============================================================================

/// The per-account state machine task.
pub struct SessionActor {
    account: String,
    password_fallback: Option<String>,
    server: ServerConfig,
    policy: ReconnectPolicy,
    deps: SessionDeps,

    rx: mpsc::Receiver<SessionCommand>,
    state: SessionState,
    link: Option<Box<dyn SessionLink>>,
    /// Record backing the live credential, for rotated-token persistence.
    current_record: Option<CredentialRecord>,
    retry_at: Option<Instant>,
    stopped: bool,
}

/// What the select loop decided to do next. Computed first so the borrow on
/// the link future ends before the handler touches `self` again.
enum Step {
    Command(Option<SessionCommand>),
    Link(Option<LinkEvent>),
    Retry,
}

impl SessionActor {
    /// Spawn the actor for one account.
    pub fn spawn(
        account: AccountConfig,
        server: ServerConfig,
        policy: ReconnectPolicy,
        deps: SessionDeps,
    ) -> (SessionHandle, JoinHandle<()>) {
        let (tx, rx) = mpsc::channel(CHANNEL_CAPACITY);
        let name = account.name.clone();

        let actor = Self {
            account: account.name,
            password_fallback: account.password,
            server,
            policy,
            deps,
            rx,
            state: SessionState::Idle,
            link: None,
            current_record: None,
            retry_at: None,
            stopped: false,
        };

        let task = tokio::spawn(actor.run());
        (SessionHandle { account: name, tx }, task)
    }

    async fn run(mut self) {
        loop {
            let step = tokio::select! {
                cmd = self.rx.recv() => Step::Command(cmd),
                event = Self::next_link_event(&mut self.link) => Step::Link(event),
                _ = Self::sleep_until(self.retry_at), if self.retry_at.is_some() && !self.stopped => {
                    Step::Retry
                }
            };

            match step {
                Step::Command(None) => break,
                Step::Command(Some(cmd)) => self.handle_command(cmd).await,
                Step::Link(event) => self.handle_link_event(event).await,
                Step::Retry => {
                    self.retry_at = None;
                    info!(account = %self.account, "Reconnecting after backoff");
                    self.connect_cycle().await;
                }
            }
        }

        if let Some(mut link) = self.link.take() {
            link.close().await;
        }
        debug!(account = %self.account, "Session actor stopped");
    }

    async fn next_link_event(link: &mut Option<Box<dyn SessionLink>>) -> Option<LinkEvent> {
        match link {
            Some(link) => link.next_event().await,
            None => std::future::pending().await,
        }
    }

    async fn sleep_until(at: Option<Instant>) {
        match at {
            Some(at) => tokio::time::sleep_until(at).await,
            None => std::future::pending().await,
        }
    }

    // ------------------------------------------------------------------------
    // Command Handling
    // ------------------------------------------------------------------------

    async fn handle_command(&mut self, cmd: SessionCommand) {
        match cmd {
            SessionCommand::Connect { reply } => {
                if self.stopped {
                    let _ = reply.send(Err(SessionError::Stopped));
                } else if self.state.is_active() {
                    let _ = reply.send(Err(SessionError::AlreadyConnected));
                } else {
                    self.retry_at = None;
                    let _ = reply.send(Ok(()));
                    self.connect_cycle().await;
                }
            }

            SessionCommand::SendChat { line, reply } => {
                let result = self.forward_chat(&line).await;
                let _ = reply.send(result);
            }

            SessionCommand::GetState { reply } => {
                let _ = reply.send(self.state);
            }

            SessionCommand::Stop { reply } => {
                self.stopped = true;
                self.retry_at = None;
                if let Some(mut link) = self.link.take() {
                    link.close().await;
                }
                if self.state != SessionState::Disconnected {
                    self.transition(SessionState::Disconnected, &DisconnectReason::Stopped.to_string())
                        .await;
                }
                let _ = reply.send(());
            }
        }
    }

    async fn forward_chat(&mut self, line: &str) -> Result<(), SessionError> {
        if self.state != SessionState::Connected {
            // Dropped, not buffered: a command from before a disconnect must
            // never replay into a later session.
            warn!(account = %self.account, "Dropping command while not connected");
            return Err(SessionError::NotConnected);
        }
        let Some(link) = self.link.as_mut() else {
            warn!(account = %self.account, "Dropping command, link is gone");
            return Err(SessionError::NotConnected);
        };
        link.send_chat(line)
            .await
            .map_err(|e| SessionError::Link(e.to_string()))
    }

    // ------------------------------------------------------------------------
    // Connect Cycle
    // ------------------------------------------------------------------------

    /// One pass of the state machine: resolve a credential, open the link.
    /// `Connected` is entered when the link reports establishment.
    async fn connect_cycle(&mut self) {
        self.transition(SessionState::ResolvingCredential, "resolving credential")
            .await;

        let credential = match self.resolve_credential().await {
            Ok(credential) => credential,
            Err(reason) => {
                self.enter_disconnected(reason).await;
                return;
            }
        };

        self.transition(SessionState::Connecting, "connecting").await;

        let params = ConnectParams::new(&self.server, &self.account, credential);
        match self.deps.provider.connect(params).await {
            Ok(link) => {
                self.link = Some(link);
                // Stay in Connecting until the link reports Established.
            }
            Err(e) => {
                self.enter_disconnected(DisconnectReason::ConnectionLost(e.to_string()))
                    .await;
            }
        }
    }

    /// Resolve the credential to connect with.
    ///
    /// Fast path: a usable cached record, used without invoking the acquirer
    /// at all — this is what makes restarts silent. Slow path: run the
    /// acquirer and persist before use. Last resort: static password.
    async fn resolve_credential(&mut self) -> Result<LiveCredential, DisconnectReason> {
        match self.deps.store.is_usable(&self.account).await {
            Ok(true) => match self.deps.store.get(&self.account).await {
                Ok(Some(record)) => {
                    info!(account = %self.account, "Using cached credential");
                    let token = record.session_token.clone();
                    self.current_record = Some(record);
                    return Ok(LiveCredential::SessionToken(token));
                }
                Ok(None) => {}
                Err(e) => {
                    warn!(account = %self.account, error = %e, "Credential store degraded");
                }
            },
            Ok(false) => {}
            Err(e) => {
                warn!(account = %self.account, error = %e, "Credential store degraded");
            }
        }

        match self.deps.acquirer.acquire(&self.account).await {
            Ok(record) => {
                // Persist before use; a store failure is degraded mode, not
                // a reason to waste the acquisition.
                if let Err(e) = self.deps.store.put(&self.account, &record).await {
                    warn!(
                        account = %self.account,
                        error = %e,
                        "Failed to cache credential, continuing uncached"
                    );
                }
                let token = record.session_token.clone();
                self.current_record = Some(record);
                Ok(LiveCredential::SessionToken(token))
            }
            Err(e) => {
                if let Some(password) = self.password_fallback.clone() {
                    warn!(
                        account = %self.account,
                        error = %format!("{e:#}"),
                        "Acquisition failed, falling back to static password"
                    );
                    Ok(LiveCredential::Password(password))
                } else {
                    Err(DisconnectReason::AcquisitionFailed(format!("{e:#}")))
                }
            }
        }
    }

    // ------------------------------------------------------------------------
    // Link Events
    // ------------------------------------------------------------------------

    async fn handle_link_event(&mut self, event: Option<LinkEvent>) {
        match event {
            Some(LinkEvent::Established { session_token }) => {
                self.transition(SessionState::Connected, "connected").await;
                if let Some(token) = session_token {
                    self.persist_rotated_token(token).await;
                }
            }

            Some(LinkEvent::Chat { message }) => {
                debug!(account = %self.account, %message, "Chat observed");
            }

            Some(LinkEvent::Closed { kind, reason }) => {
                if let Some(mut link) = self.link.take() {
                    link.close().await;
                }
                self.enter_disconnected(DisconnectReason::from_close(kind, reason))
                    .await;
            }

            None => {
                self.link = None;
                if self.state.is_active() {
                    self.enter_disconnected(DisconnectReason::ConnectionLost(
                        "link closed without reason".to_string(),
                    ))
                    .await;
                }
            }
        }
    }

    /// Persist a session token the handshake derived or rotated, beyond what
    /// was already stored. A token that just round-tripped gets the full
    /// lifetime horizon.
    async fn persist_rotated_token(&mut self, token: String) {
        if self
            .current_record
            .as_ref()
            .is_some_and(|r| r.session_token == token)
        {
            return;
        }

        let mut record = self.current_record.clone().unwrap_or(CredentialRecord {
            access_token: String::new(),
            refresh_token: None,
            session_token: String::new(),
            expires_at: None,
            profile: Profile::minimal(&self.account),
            updated_at: Utc::now(),
        });
        record.session_token = token;
        record.expires_at = Some(Utc::now() + chrono::Duration::days(SESSION_TOKEN_LIFETIME_DAYS));

        if let Err(e) = self.deps.store.put(&self.account, &record).await {
            warn!(
                account = %self.account,
                error = %e,
                "Failed to persist rotated session token"
            );
        } else {
            info!(account = %self.account, "Persisted rotated session token");
        }
        self.current_record = Some(record);
    }

    // ------------------------------------------------------------------------
    // Transitions
    // ------------------------------------------------------------------------

    async fn transition(&mut self, state: SessionState, message: &str) {
        debug!(account = %self.account, from = %self.state, to = %state, "State transition");
        self.state = state;

        let record = StatusRecord::now(&self.account, state == SessionState::Connected, message);
        if let Err(e) = self.deps.status.write(&record).await {
            // Status egress is observability, not control flow.
            warn!(account = %self.account, error = %e, "Failed to write status record");
        }
    }

    async fn enter_disconnected(&mut self, reason: DisconnectReason) {
        let message = reason.to_string();
        warn!(account = %self.account, %message, "Session disconnected");
        self.transition(SessionState::Disconnected, &message).await;

        if !self.stopped {
            let delay = self.policy.next_delay();
            debug!(
                account = %self.account,
                delay_seconds = delay.as_secs(),
                "Scheduling reconnect"
            );
            self.retry_at = Some(Instant::now() + delay);
        }
    }
}
