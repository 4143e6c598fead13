//! Session lifecycle.
//!
//! One actor per account owns the connection state machine; the registry
//! tracks all actors and shuts them down together. State is ephemeral and
//! never persisted — after a restart every account starts from `Idle` and
//! rides the cached-credential fast path back to `Connected`.

use std::fmt;

use crate::provider::CloseKind;

pub mod manager;
pub mod reconnect;
pub mod registry;

pub use manager::{SessionActor, SessionDeps, SessionError, SessionHandle};
pub use reconnect::ReconnectPolicy;
pub use registry::SessionRegistry;

// ============================================================================
// SessionState
// ============================================================================

/// Where an account's connection currently stands.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Idle,
    ResolvingCredential,
    Connecting,
    Connected,
    Disconnected,
}

impl SessionState {
    /// True while a connect sequence is in flight or live.
    pub fn is_active(&self) -> bool {
        matches!(
            self,
            Self::ResolvingCredential | Self::Connecting | Self::Connected
        )
    }
}

impl fmt::Display for SessionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Idle => "idle",
            Self::ResolvingCredential => "resolving credential",
            Self::Connecting => "connecting",
            Self::Connected => "connected",
            Self::Disconnected => "disconnected",
        };
        f.write_str(s)
    }
}

// ============================================================================
// DisconnectReason
// ============================================================================

/// Why a session left `Connected` (or never got there). The embedded reason
/// string is preserved verbatim for the status egress.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DisconnectReason {
    AcquisitionFailed(String),
    Kicked(String),
    ProtocolError(String),
    ConnectionLost(String),
    Stopped,
}

impl DisconnectReason {
    pub fn from_close(kind: CloseKind, reason: String) -> Self {
        match kind {
            CloseKind::Kicked => Self::Kicked(reason),
            CloseKind::ProtocolError => Self::ProtocolError(reason),
            CloseKind::ConnectionLost => Self::ConnectionLost(reason),
        }
    }
}

impl fmt::Display for DisconnectReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::AcquisitionFailed(e) => write!(f, "acquisition failed: {e}"),
            Self::Kicked(e) => write!(f, "kicked: {e}"),
            Self::ProtocolError(e) => write!(f, "protocol error: {e}"),
            Self::ConnectionLost(e) => write!(f, "connection lost: {e}"),
            Self::Stopped => f.write_str("stopped"),
        }
    }
}
