//! Microsoft identity-provider client.
//!
//! Speaks the consumer OAuth endpoints: device-code start/poll and the
//! authorization-code exchange used by the callback flow. Poll responses are
//! modeled as a closed tagged union with one explicit fallback branch —
//! callers never probe response shapes speculatively.

use anyhow::{Context, Result, bail};
use base64::Engine;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use chrono::{DateTime, Duration, Utc};
use serde::Deserialize;
use sha2::{Digest, Sha256};

// ============================================================================
// Constants
// ============================================================================

/// Public Azure application id registered for third-party Minecraft clients.
pub const DEFAULT_CLIENT_ID: &str = "389b1b32-b5d5-43b2-bddc-84ce938d6737";

const DEVICE_CODE_URL: &str =
    "https://login.microsoftonline.com/consumers/oauth2/v2.0/devicecode";
const TOKEN_URL: &str = "https://login.microsoftonline.com/consumers/oauth2/v2.0/token";
const AUTHORIZE_URL: &str = "https://login.microsoftonline.com/consumers/oauth2/v2.0/authorize";
const SCOPES: &str = "XboxLive.signin offline_access";

// ============================================================================
// Types
// ============================================================================

/// Tokens returned from a completed exchange or refresh.
#[derive(Debug, Clone)]
pub struct TokenSet {
    pub access_token: String,
    pub refresh_token: Option<String>,
    /// When the access token expires.
    pub expires_at: DateTime<Utc>,
}

/// A started device-code flow: show `user_code` and `verification_uri` to a
/// human, then poll until the provider resolves the exchange.
#[derive(Debug, Clone, Deserialize)]
pub struct DeviceAuthorization {
    pub device_code: String,
    pub user_code: String,
    pub verification_uri: String,
    /// Seconds until the whole flow expires (provider-defined, ~15 minutes).
    pub expires_in: u64,
    /// Seconds to wait between polls.
    pub interval: u64,
}

/// One poll of the device-code token endpoint.
///
/// Closed union of the shapes the provider is known to return, with
/// `Unrecognized` carrying the raw body for anything new.
#[derive(Debug)]
pub enum DevicePoll {
    Issued(TokenSet),
    Pending,
    SlowDown,
    Declined,
    Expired,
    Unrecognized(String),
}

// ============================================================================
// PKCE
// ============================================================================

/// Generate a PKCE code verifier and challenge.
///
/// Returns `(verifier, challenge)`: 32 random bytes base64url-encoded, and
/// its SHA-256 base64url-encoded.
pub fn generate_pkce() -> (String, String) {
    use rand::Rng;

    let mut bytes = [0u8; 32];
    rand::rng().fill(&mut bytes);
    let verifier = URL_SAFE_NO_PAD.encode(bytes);

    let mut hasher = Sha256::new();
    hasher.update(verifier.as_bytes());
    let challenge = URL_SAFE_NO_PAD.encode(hasher.finalize());

    (verifier, challenge)
}

// ============================================================================
// Device-Code Flow
// ============================================================================

/// Start a device-code flow.
pub async fn start_device_code(
    client: &reqwest::Client,
    client_id: &str,
) -> Result<DeviceAuthorization> {
    let response = client
        .post(DEVICE_CODE_URL)
        .form(&[("client_id", client_id), ("scope", SCOPES)])
        .send()
        .await
        .context("sending device-code request")?;

    if !response.status().is_success() {
        let status = response.status();
        let body = response.text().await.unwrap_or_default();
        bail!("device-code start failed ({}): {}", status, body);
    }

    response
        .json::<DeviceAuthorization>()
        .await
        .context("parsing device-code response")
}

/// Poll the token endpoint once for a pending device-code flow.
pub async fn poll_device_code(
    client: &reqwest::Client,
    client_id: &str,
    device_code: &str,
) -> Result<DevicePoll> {
    let response = client
        .post(TOKEN_URL)
        .form(&[
            ("client_id", client_id),
            ("grant_type", "urn:ietf:params:oauth:grant-type:device_code"),
            ("device_code", device_code),
        ])
        .send()
        .await
        .context("polling device-code token endpoint")?;

    let status = response.status();
    if status.is_success() {
        return Ok(DevicePoll::Issued(parse_token_response(response).await?));
    }

    let body = response.text().await.unwrap_or_default();
    if status != reqwest::StatusCode::BAD_REQUEST {
        bail!("device-code poll failed ({}): {}", status, body);
    }

    // The provider signals flow progress through the error field of a 400.
    let code = serde_json::from_str::<serde_json::Value>(&body)
        .ok()
        .and_then(|v| v["error"].as_str().map(str::to_string))
        .unwrap_or_default();

    Ok(match code.as_str() {
        "authorization_pending" => DevicePoll::Pending,
        "slow_down" => DevicePoll::SlowDown,
        "authorization_declined" => DevicePoll::Declined,
        "expired_token" => DevicePoll::Expired,
        _ => DevicePoll::Unrecognized(body),
    })
}

// ============================================================================
// Callback Flow
// ============================================================================

/// Build the authorization URL the callback flow redirects a human to.
pub fn build_authorize_url(
    client_id: &str,
    redirect_uri: &str,
    challenge: &str,
    state: &str,
) -> String {
    let mut url = url::Url::parse(AUTHORIZE_URL).expect("valid authorize URL");
    url.query_pairs_mut()
        .append_pair("client_id", client_id)
        .append_pair("response_type", "code")
        .append_pair("redirect_uri", redirect_uri)
        .append_pair("scope", SCOPES)
        .append_pair("code_challenge", challenge)
        .append_pair("code_challenge_method", "S256")
        .append_pair("state", state);
    url.to_string()
}

/// Exchange an authorization code for tokens.
pub async fn exchange_code(
    client: &reqwest::Client,
    client_id: &str,
    redirect_uri: &str,
    code: &str,
    verifier: &str,
) -> Result<TokenSet> {
    let response = client
        .post(TOKEN_URL)
        .form(&[
            ("client_id", client_id),
            ("grant_type", "authorization_code"),
            ("code", code),
            ("redirect_uri", redirect_uri),
            ("code_verifier", verifier),
        ])
        .send()
        .await
        .context("sending token exchange request")?;

    if !response.status().is_success() {
        let status = response.status();
        let body = response.text().await.unwrap_or_default();
        bail!("token exchange failed ({}): {}", status, body);
    }

    parse_token_response(response).await
}

/// Replay a refresh token for a fresh access token.
pub async fn refresh_token(
    client: &reqwest::Client,
    client_id: &str,
    refresh: &str,
) -> Result<TokenSet> {
    let response = client
        .post(TOKEN_URL)
        .form(&[
            ("client_id", client_id),
            ("grant_type", "refresh_token"),
            ("refresh_token", refresh),
            ("scope", SCOPES),
        ])
        .send()
        .await
        .context("sending token refresh request")?;

    if !response.status().is_success() {
        let status = response.status();
        let body = response.text().await.unwrap_or_default();
        bail!("token refresh failed ({}): {}", status, body);
    }

    parse_token_response(response).await
}

// ============================================================================
// Private Helpers
// ============================================================================

async fn parse_token_response(response: reqwest::Response) -> Result<TokenSet> {
    let body: serde_json::Value = response.json().await.context("parsing token response")?;

    let access_token = body["access_token"]
        .as_str()
        .context("missing access_token")?
        .to_string();
    let refresh_token = body["refresh_token"].as_str().map(str::to_string);
    let expires_in = body["expires_in"].as_i64().unwrap_or(3600);

    Ok(TokenSet {
        access_token,
        refresh_token,
        expires_at: Utc::now() + Duration::seconds(expires_in),
    })
}

// ============================================================================
// Tests
// ============================================================================
