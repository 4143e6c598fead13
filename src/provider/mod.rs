//! Session provider seam.
//!
//! The wire protocol is an external capability: the session layer talks to
//! it through [`SessionProvider`] / [`SessionLink`] and never sees packets.
//! Production uses the subprocess implementation; tests plug in an in-memory
//! fake behind the same traits.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;

pub mod subprocess;

pub use subprocess::SubprocessProvider;

// ============================================================================
// Connection Parameters
// ============================================================================

/// The credential presented when opening a session.
#[derive(Debug, Clone)]
pub enum LiveCredential {
    /// A Minecraft session token from the credential store or acquirer.
    SessionToken(String),
    /// Static password fallback (offline/legacy servers).
    Password(String),
}

/// Everything a provider needs to open one session.
#[derive(Debug, Clone)]
pub struct ConnectParams {
    pub host: String,
    pub port: u16,
    pub version: String,
    pub account: String,
    pub credential: LiveCredential,
}

impl ConnectParams {
    pub fn new(
        server: &crate::config::ServerConfig,
        account: &str,
        credential: LiveCredential,
    ) -> Self {
        Self {
            host: server.host.clone(),
            port: server.port,
            version: server.version.clone(),
            account: account.to_string(),
            credential,
        }
    }
}

// ============================================================================
// Link Events
// ============================================================================

/// Why a link went away. Reported by the protocol client; the reason string
/// is preserved verbatim for observability.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CloseKind {
    Kicked,
    ProtocolError,
    ConnectionLost,
}

/// Lifecycle events emitted by a live link.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum LinkEvent {
    /// The remote service confirmed session establishment.
    Established {
        /// A rotated/derived session token observed during login, if the
        /// handshake produced one beyond what was presented.
        #[serde(default)]
        session_token: Option<String>,
    },
    /// In-game chat line observed by the client.
    Chat { message: String },
    /// The session ended.
    Closed {
        #[serde(default = "default_close_kind")]
        kind: CloseKind,
        reason: String,
    },
}

fn default_close_kind() -> CloseKind {
    CloseKind::ConnectionLost
}

// ============================================================================
// Errors
// ============================================================================

#[derive(Debug, Error)]
pub enum ProviderError {
    #[error("failed to spawn protocol client '{command}': {source}")]
    Spawn {
        command: String,
        #[source]
        source: std::io::Error,
    },

    #[error("link i/o error: {0}")]
    Io(#[from] std::io::Error),

    #[error("link is closed")]
    Closed,
}

// ============================================================================
// Traits
// ============================================================================

/// A live connection to the remote service.
#[async_trait]
pub trait SessionLink: Send {
    /// Forward one chat line verbatim.
    async fn send_chat(&mut self, line: &str) -> Result<(), ProviderError>;

    /// Next lifecycle event. `None` after the link has fully closed.
    async fn next_event(&mut self) -> Option<LinkEvent>;

    /// Tear the link down. Idempotent.
    async fn close(&mut self);
}

/// Opens sessions against the remote service.
#[async_trait]
pub trait SessionProvider: Send + Sync {
    async fn connect(&self, params: ConnectParams) -> Result<Box<dyn SessionLink>, ProviderError>;
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn link_events_round_trip_the_wire_shape() {
        let line = r#"{"event":"established","session_token":"rotated-token"}"#;
        let event: LinkEvent = serde_json::from_str(line).unwrap();
        assert_eq!(
            event,
            LinkEvent::Established {
                session_token: Some("rotated-token".to_string())
            }
        );
    }

    #[test]
    fn closed_event_defaults_to_connection_lost() {
        let line = r#"{"event":"closed","reason":"read timed out"}"#;
        let event: LinkEvent = serde_json::from_str(line).unwrap();
        assert_eq!(
            event,
            LinkEvent::Closed {
                kind: CloseKind::ConnectionLost,
                reason: "read timed out".to_string()
            }
        );
    }

    #[test]
    fn kicked_event_carries_reason_verbatim() {
        let line = r#"{"event":"closed","kind":"kicked","reason":"You are banned!"}"#;
        let event: LinkEvent = serde_json::from_str(line).unwrap();
        assert_eq!(
            event,
            LinkEvent::Closed {
                kind: CloseKind::Kicked,
                reason: "You are banned!".to_string()
            }
        );
    }
}
