//! The persisted credential document and its usability rules.

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

// ============================================================================
// Usability Constants
// ============================================================================

/// Sentinels the upstream tooling writes when token capture failed.
///
/// A document carrying one of these must never be handed to a caller.
pub const PLACEHOLDER_SENTINELS: &[&str] = &["undefined", "null"];

/// Real session tokens are long opaque blobs; anything shorter is garbage.
pub const MIN_SESSION_TOKEN_LEN: usize = 32;

/// Safety margin before expiry. A token inside the margin is treated as
/// already expired so a session never starts on a credential about to die.
pub const EXPIRY_MARGIN_MINUTES: i64 = 5;

// ============================================================================
// Profile
// ============================================================================

/// Remote identity attached to a credential.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Profile {
    pub display_name: String,
    /// Remote service id (the Minecraft profile UUID).
    #[serde(default)]
    pub remote_id: String,
}

impl Profile {
    /// Minimal profile used when stored profile data is malformed.
    pub fn minimal(account: &str) -> Self {
        Self {
            display_name: account.to_string(),
            remote_id: String::new(),
        }
    }
}

// ============================================================================
// CredentialRecord
// ============================================================================

/// One durable credential per account, overwritten on every re-acquisition.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CredentialRecord {
    /// Opaque Microsoft access token from the identity provider.
    pub access_token: String,
    #[serde(default)]
    pub refresh_token: Option<String>,
    /// The token actually presented to the game server.
    pub session_token: String,
    /// Absent means the token is treated as non-expiring.
    #[serde(default)]
    pub expires_at: Option<DateTime<Utc>>,
    pub profile: Profile,
    /// Maintained by the store on every write.
    pub updated_at: DateTime<Utc>,
}

impl CredentialRecord {
    /// Usability predicate, evaluated against an explicit clock so expiry
    /// behavior is testable without waiting.
    pub fn is_usable_at(&self, now: DateTime<Utc>) -> bool {
        let token = self.session_token.trim();
        if token.is_empty() {
            return false;
        }
        if PLACEHOLDER_SENTINELS.contains(&token) {
            return false;
        }
        if token.len() < MIN_SESSION_TOKEN_LEN {
            return false;
        }
        match self.expires_at {
            None => true,
            Some(expires_at) => expires_at > now + Duration::minutes(EXPIRY_MARGIN_MINUTES),
        }
    }

    pub fn is_usable(&self) -> bool {
        self.is_usable_at(Utc::now())
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    fn record(session_token: &str, expires_at: Option<DateTime<Utc>>) -> CredentialRecord {
        CredentialRecord {
            access_token: "access".to_string(),
            refresh_token: None,
            session_token: session_token.to_string(),
            expires_at,
            profile: Profile::minimal("tester"),
            updated_at: Utc::now(),
        }
    }

    fn real_token() -> String {
        "a".repeat(MIN_SESSION_TOKEN_LEN)
    }

    #[test]
    fn empty_token_is_unusable() {
        assert!(!record("", None).is_usable());
    }

    #[test]
    fn placeholder_token_is_unusable() {
        assert!(!record("undefined", None).is_usable());
        assert!(!record("null", None).is_usable());
    }

    #[test]
    fn short_token_is_unusable() {
        assert!(!record("abc123", None).is_usable());
    }

    #[test]
    fn non_expiring_token_is_usable() {
        assert!(record(&real_token(), None).is_usable());
    }

    #[test]
    fn token_outside_margin_is_usable() {
        let now = Utc::now();
        let rec = record(&real_token(), Some(now + Duration::minutes(10)));
        assert!(rec.is_usable_at(now));
    }

    #[test]
    fn token_inside_margin_is_unusable() {
        let now = Utc::now();
        let rec = record(&real_token(), Some(now + Duration::minutes(10)));
        // Six minutes later only four minutes remain, inside the margin.
        assert!(!rec.is_usable_at(now + Duration::minutes(6)));
    }

    #[test]
    fn expired_token_is_unusable() {
        let now = Utc::now();
        let rec = record(&real_token(), Some(now - Duration::minutes(1)));
        assert!(!rec.is_usable_at(now));
    }

    #[test]
    fn legacy_document_without_optional_fields_deserializes() {
        let json = r#"{
            "access_token": "access",
            "session_token": "0123456789abcdef0123456789abcdef",
            "profile": {"display_name": "alice"},
            "updated_at": "2025-01-01T00:00:00Z"
        }"#;
        let rec: CredentialRecord = serde_json::from_str(json).unwrap();
        assert!(rec.refresh_token.is_none());
        assert!(rec.expires_at.is_none());
        assert_eq!(rec.profile.remote_id, "");
    }
}
