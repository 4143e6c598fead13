//! Economy API client.
//!
//! Collaborator boundary: the chat front-end checks balances before issuing
//! payment commands. One endpoint, bearer auth, typed failures so callers
//! can tell "bad key" from "unknown player" from "API down".

use serde::Deserialize;
use thiserror::Error;

// ============================================================================
// Errors
// ============================================================================

#[derive(Debug, Error)]
pub enum EconomyError {
    #[error("economy API rejected the key (unauthorized)")]
    Unauthorized,

    /// The API reports unknown players as a server error, not a 404.
    #[error("player '{0}' not found")]
    PlayerNotFound(String),

    #[error("economy API error ({status}): {body}")]
    Api { status: u16, body: String },

    #[error("economy API request failed: {0}")]
    Transport(#[from] reqwest::Error),

    #[error("malformed balance payload: {0}")]
    Malformed(String),
}

// ============================================================================
// Types
// ============================================================================

#[derive(Debug, Clone, PartialEq)]
pub struct PlayerBalance {
    pub money: f64,
}

#[derive(Debug, Deserialize)]
struct StatsEnvelope {
    result: StatsResult,
}

#[derive(Debug, Deserialize)]
struct StatsResult {
    /// The API serializes money as a decimal string.
    money: String,
}

// ============================================================================
// Client
// ============================================================================

/// Thin client for the remote economy API.
#[derive(Debug, Clone)]
pub struct EconomyClient {
    http: reqwest::Client,
    base_url: String,
    api_key: String,
}

impl EconomyClient {
    pub fn new(base_url: impl Into<String>, api_key: impl Into<String>) -> Self {
        Self {
            http: reqwest::Client::new(),
            base_url: base_url.into(),
            api_key: api_key.into(),
        }
    }

    /// Look up a player's balance.
    pub async fn balance(&self, username: &str) -> Result<PlayerBalance, EconomyError> {
        let url = format!(
            "{}/v1/stats/{}",
            self.base_url.trim_end_matches('/'),
            username
        );
        let response = self
            .http
            .get(&url)
            .bearer_auth(&self.api_key)
            .send()
            .await?;

        match response.status().as_u16() {
            200 => {
                let envelope: StatsEnvelope = response
                    .json()
                    .await
                    .map_err(|e| EconomyError::Malformed(e.to_string()))?;
                let money = envelope
                    .result
                    .money
                    .parse::<f64>()
                    .map_err(|e| EconomyError::Malformed(e.to_string()))?;
                Ok(PlayerBalance { money })
            }
            401 => Err(EconomyError::Unauthorized),
            500 => Err(EconomyError::PlayerNotFound(username.to_string())),
            status => {
                let body = response.text().await.unwrap_or_default();
                Err(EconomyError::Api { status, body })
            }
        }
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn balance_payload_parses() {
        let json = r#"{"result": {"money": "12345678.50"}}"#;
        let envelope: StatsEnvelope = serde_json::from_str(json).unwrap();
        assert_eq!(envelope.result.money, "12345678.50");
        assert_eq!(envelope.result.money.parse::<f64>().unwrap(), 12_345_678.5);
    }
}
