//! The fixed token chain from a Microsoft access token to a game session.
//!
//! Microsoft token → Xbox Live user ticket → XSTS authorization → Minecraft
//! session token (plus a profile fetch). Each step is a short point-to-point
//! exchange; any failure aborts the whole acquisition with the upstream body
//! surfaced verbatim.

use anyhow::{Context, Result, bail};
use serde_json::json;

// ============================================================================
// Constants
// ============================================================================

const XBL_AUTH_URL: &str = "https://user.auth.xboxlive.com/user/authenticate";
const XSTS_AUTH_URL: &str = "https://xsts.auth.xboxlive.com/xsts/authorize";
const GAME_LOGIN_URL: &str = "https://api.minecraftservices.com/authentication/login_with_xbox";
const GAME_PROFILE_URL: &str = "https://api.minecraftservices.com/minecraft/profile";

// ============================================================================
// Types
// ============================================================================

/// A ticket from one of the Xbox authentication hops.
#[derive(Debug, Clone)]
pub struct XboxTicket {
    pub token: String,
    pub user_hash: String,
}

/// The final session credential issued by the game service.
#[derive(Debug, Clone)]
pub struct GameSession {
    pub session_token: String,
    /// Provider-declared lifetime in seconds. The acquirer deliberately
    /// overrides this with its own horizon; kept for observability.
    pub expires_in: i64,
}

/// The remote identity behind a session token.
#[derive(Debug, Clone)]
pub struct GameProfile {
    pub id: String,
    pub name: String,
}

// ============================================================================
// Chain Steps
// ============================================================================

/// Step 1: trade the Microsoft access token for an Xbox Live user ticket.
pub async fn authenticate_user(
    client: &reqwest::Client,
    access_token: &str,
) -> Result<XboxTicket> {
    let body = json!({
        "Properties": {
            "AuthMethod": "RPS",
            "SiteName": "user.auth.xboxlive.com",
            "RpsTicket": format!("d={access_token}"),
        },
        "RelyingParty": "http://auth.xboxlive.com",
        "TokenType": "JWT",
    });

    let response = client
        .post(XBL_AUTH_URL)
        .json(&body)
        .send()
        .await
        .context("sending Xbox user authentication request")?;

    if !response.status().is_success() {
        let status = response.status();
        let text = response.text().await.unwrap_or_default();
        bail!("Xbox user authentication failed ({}): {}", status, text);
    }

    parse_ticket(response).await
}

/// Step 2: authorize the user ticket against the game relying party.
pub async fn authorize_xsts(client: &reqwest::Client, user_ticket: &str) -> Result<XboxTicket> {
    let body = json!({
        "Properties": {
            "SandboxId": "RETAIL",
            "UserTokens": [user_ticket],
        },
        "RelyingParty": "rp://api.minecraftservices.com/",
        "TokenType": "JWT",
    });

    let response = client
        .post(XSTS_AUTH_URL)
        .json(&body)
        .send()
        .await
        .context("sending XSTS authorization request")?;

    if !response.status().is_success() {
        let status = response.status();
        let text = response.text().await.unwrap_or_default();
        bail!("XSTS authorization failed ({}): {}", status, text);
    }

    parse_ticket(response).await
}

/// Step 3: present the XSTS authorization for the final session token.
pub async fn login_with_xbox(
    client: &reqwest::Client,
    user_hash: &str,
    xsts_token: &str,
) -> Result<GameSession> {
    let body = json!({
        "identityToken": format!("XBL3.0 x={user_hash};{xsts_token}"),
    });

    let response = client
        .post(GAME_LOGIN_URL)
        .json(&body)
        .send()
        .await
        .context("sending game login request")?;

    if !response.status().is_success() {
        let status = response.status();
        let text = response.text().await.unwrap_or_default();
        bail!("game login failed ({}): {}", status, text);
    }

    let body: serde_json::Value = response.json().await.context("parsing game login response")?;
    Ok(GameSession {
        session_token: body["access_token"]
            .as_str()
            .context("missing access_token in game login response")?
            .to_string(),
        expires_in: body["expires_in"].as_i64().unwrap_or(86400),
    })
}

/// Fetch the profile behind a session token.
pub async fn fetch_profile(client: &reqwest::Client, session_token: &str) -> Result<GameProfile> {
    let response = client
        .get(GAME_PROFILE_URL)
        .bearer_auth(session_token)
        .send()
        .await
        .context("sending profile request")?;

    if !response.status().is_success() {
        let status = response.status();
        let text = response.text().await.unwrap_or_default();
        bail!("profile fetch failed ({}): {}", status, text);
    }

    let body: serde_json::Value = response.json().await.context("parsing profile response")?;
    Ok(GameProfile {
        id: body["id"]
            .as_str()
            .context("missing id in profile response")?
            .to_string(),
        name: body["name"]
            .as_str()
            .context("missing name in profile response")?
            .to_string(),
    })
}

// ============================================================================
// Private Helpers
// ============================================================================

/// Both Xbox hops answer with the same envelope: a token plus the user hash
/// under `DisplayClaims.xui[0].uhs`.
async fn parse_ticket(response: reqwest::Response) -> Result<XboxTicket> {
    let body: serde_json::Value = response.json().await.context("parsing Xbox response")?;

    let token = body["Token"]
        .as_str()
        .context("missing Token in Xbox response")?
        .to_string();
    let user_hash = body["DisplayClaims"]["xui"][0]["uhs"]
        .as_str()
        .context("missing user hash in Xbox response")?
        .to_string();

    Ok(XboxTicket { token, user_hash })
}
