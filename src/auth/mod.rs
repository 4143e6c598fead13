//! Credential acquisition.
//!
//! Turns a human sign-in (device code or browser callback) into a durable
//! [`CredentialRecord`]. The result is an explicit return value threaded
//! through the call chain — there is no shared captured-token state.

use std::sync::Arc;
use std::time::Duration;

use anyhow::{Result, bail};
use async_trait::async_trait;
use chrono::Utc;
use tokio::time::Instant;
use tracing::info;

use crate::config::{AuthConfig, AuthMode};
use crate::store::{CredentialRecord, Profile};

pub mod callback;
pub mod microsoft;
pub mod xbox;

pub use microsoft::{DEFAULT_CLIENT_ID, DeviceAuthorization, DevicePoll, TokenSet};

// ============================================================================
// Policy Constants
// ============================================================================

/// Horizon applied to a session token once the chain completes.
///
/// The game service declares a much shorter lifetime, but a token that has
/// round-tripped successfully keeps working until the server rejects it, and
/// re-running the chain forces an interactive re-approval. Treating the
/// stored record as valid for a year keeps restarts silent; the usability
/// check and the server itself catch tokens that actually died.
pub const SESSION_TOKEN_LIFETIME_DAYS: i64 = 365;

/// Bound on a callback acquisition, matching the provider's device-code
/// window.
const CALLBACK_TIMEOUT: Duration = Duration::from_secs(15 * 60);

// ============================================================================
// Acquirer Trait
// ============================================================================

/// Strategy interface for credential acquisition.
///
/// The session layer depends on this seam; tests substitute scripted
/// implementations.
#[async_trait]
pub trait CredentialAcquirer: Send + Sync {
    /// Run one acquisition for an account.
    ///
    /// Any failure aborts the whole attempt; the caller decides whether to
    /// fall back or back off.
    async fn acquire(&self, account: &str) -> Result<CredentialRecord>;
}

// ============================================================================
// Microsoft Acquirer
// ============================================================================

/// Callback invoked when a device-code flow needs a human: shows the user
/// code and verification URL.
pub type DevicePrompt = Arc<dyn Fn(&DeviceAuthorization) + Send + Sync>;

/// Production acquirer speaking the Microsoft exchange contracts.
pub struct MicrosoftAcquirer {
    http: reqwest::Client,
    mode: AuthMode,
    client_id: String,
    callback_host: String,
    callback_port: u16,
    prompt: DevicePrompt,
}

impl MicrosoftAcquirer {
    pub fn new(config: &AuthConfig) -> Self {
        Self::with_prompt(
            config,
            Arc::new(|auth: &DeviceAuthorization| {
                info!(
                    code = %auth.user_code,
                    url = %auth.verification_uri,
                    "Sign in required: open the URL and enter the code"
                );
            }),
        )
    }

    /// Construct with a custom prompt, e.g. stdout for the interactive
    /// `login` command.
    pub fn with_prompt(config: &AuthConfig, prompt: DevicePrompt) -> Self {
        Self {
            http: reqwest::Client::new(),
            mode: config.mode,
            client_id: config
                .client_id
                .clone()
                .unwrap_or_else(|| DEFAULT_CLIENT_ID.to_string()),
            callback_host: config.callback.host.clone(),
            callback_port: config.callback.port,
            prompt,
        }
    }

    async fn run_device_flow(&self, account: &str) -> Result<TokenSet> {
        let auth = microsoft::start_device_code(&self.http, &self.client_id).await?;
        (self.prompt)(&auth);

        let deadline = Instant::now() + Duration::from_secs(auth.expires_in);
        let mut interval = Duration::from_secs(auth.interval.max(1));

        loop {
            if Instant::now() >= deadline {
                bail!("device-code flow for '{account}' expired before approval");
            }
            tokio::time::sleep(interval).await;

            match microsoft::poll_device_code(&self.http, &self.client_id, &auth.device_code)
                .await?
            {
                DevicePoll::Issued(tokens) => return Ok(tokens),
                DevicePoll::Pending => {}
                DevicePoll::SlowDown => interval += Duration::from_secs(5),
                DevicePoll::Declined => bail!("sign-in for '{account}' was declined"),
                DevicePoll::Expired => {
                    bail!("device code for '{account}' expired before approval")
                }
                DevicePoll::Unrecognized(body) => {
                    bail!("unrecognized device-code token response: {body}")
                }
            }
        }
    }

    /// Run the fixed chain from provider tokens to a credential record.
    async fn complete_chain(&self, tokens: TokenSet) -> Result<CredentialRecord> {
        let user = xbox::authenticate_user(&self.http, &tokens.access_token).await?;
        let xsts = xbox::authorize_xsts(&self.http, &user.token).await?;
        let session = xbox::login_with_xbox(&self.http, &xsts.user_hash, &xsts.token).await?;
        let profile = xbox::fetch_profile(&self.http, &session.session_token).await?;

        Ok(CredentialRecord {
            access_token: tokens.access_token,
            refresh_token: tokens.refresh_token,
            session_token: session.session_token,
            expires_at: Some(Utc::now() + chrono::Duration::days(SESSION_TOKEN_LIFETIME_DAYS)),
            profile: Profile {
                display_name: profile.name,
                remote_id: profile.id,
            },
            updated_at: Utc::now(),
        })
    }
}

#[async_trait]
impl CredentialAcquirer for MicrosoftAcquirer {
    async fn acquire(&self, account: &str) -> Result<CredentialRecord> {
        info!(account, mode = ?self.mode, "Acquiring credential");

        let tokens = match self.mode {
            AuthMode::DeviceCode => self.run_device_flow(account).await?,
            AuthMode::Callback => {
                callback::acquire_via_callback(
                    self.http.clone(),
                    &self.client_id,
                    &self.callback_host,
                    self.callback_port,
                    CALLBACK_TIMEOUT,
                )
                .await?
            }
        };

        let record = self.complete_chain(tokens).await?;
        info!(
            account,
            profile = %record.profile.display_name,
            "Credential acquired"
        );
        Ok(record)
    }
}
