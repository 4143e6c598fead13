//! Scoped callback acquisition server.
//!
//! A short-lived local HTTP endpoint that exists only while one acquisition
//! is outstanding. A human opens the start page, is redirected to the
//! identity provider, and lands back on `/auth/callback` with an
//! authorization code. The listener is released on every exit path —
//! success, provider error, and timeout alike.

use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result, bail};
use axum::extract::{Query, State};
use axum::http::StatusCode;
use axum::response::{Html, IntoResponse, Redirect};
use axum::routing::get;
use axum::{Json, Router};
use base64::Engine;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use serde::Deserialize;
use tokio::sync::{Mutex, oneshot};
use tower_http::timeout::TimeoutLayer;
use tracing::{info, warn};

use crate::build_info;

use super::microsoft::{self, TokenSet, generate_pkce};

// ============================================================================
// Constants
// ============================================================================

/// Per-request timeout on the callback routes. The exchange behind
/// `/auth/callback` is a handful of short upstream calls.
const REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

// ============================================================================
// Callback State
// ============================================================================

/// Shared state for one outstanding acquisition.
#[derive(Clone)]
pub struct CallbackState {
    inner: Arc<StateInner>,
}

struct StateInner {
    http: reqwest::Client,
    client_id: String,
    redirect_uri: String,
    /// Anti-replay nonce; the callback must echo it back exactly.
    state: String,
    pkce_verifier: String,
    pkce_challenge: String,
    /// Consumed on the first completed exchange.
    result_tx: Mutex<Option<oneshot::Sender<Result<TokenSet>>>>,
}

impl CallbackState {
    /// Create state for one acquisition plus the receiver its result arrives
    /// on. The state nonce and PKCE pair are freshly random per acquisition.
    pub fn new_acquisition(
        http: reqwest::Client,
        client_id: String,
        redirect_uri: String,
    ) -> (Self, oneshot::Receiver<Result<TokenSet>>) {
        use rand::Rng;

        let mut nonce = [0u8; 16];
        rand::rng().fill(&mut nonce);
        let (verifier, challenge) = generate_pkce();

        let (tx, rx) = oneshot::channel();
        let state = Self {
            inner: Arc::new(StateInner {
                http,
                client_id,
                redirect_uri,
                state: URL_SAFE_NO_PAD.encode(nonce),
                pkce_verifier: verifier,
                pkce_challenge: challenge,
                result_tx: Mutex::new(Some(tx)),
            }),
        };
        (state, rx)
    }

    /// The state nonce sent to the identity provider.
    pub fn nonce(&self) -> &str {
        &self.inner.state
    }

    async fn deliver(&self, result: Result<TokenSet>) {
        let mut slot = self.inner.result_tx.lock().await;
        match slot.take() {
            Some(tx) => {
                let _ = tx.send(result);
            }
            None => warn!("Callback result delivered after acquisition completed"),
        }
    }
}

// ============================================================================
// Router
// ============================================================================

pub fn build_router(state: CallbackState) -> Router {
    Router::new()
        .route("/", get(start_page))
        .route("/auth/start", get(auth_start))
        .route("/auth/callback", get(auth_callback))
        .route("/health", get(health))
        .layer(TimeoutLayer::with_status_code(
            StatusCode::REQUEST_TIMEOUT,
            REQUEST_TIMEOUT,
        ))
        .with_state(state)
}

// ============================================================================
// Handlers
// ============================================================================

async fn start_page() -> Html<String> {
    Html(format!(
        "<html><body>\
         <h1>minekeeper v{}</h1>\
         <p><a href=\"/auth/start\">Sign in with Microsoft</a></p>\
         </body></html>",
        build_info::VERSION
    ))
}

async fn auth_start(State(state): State<CallbackState>) -> Redirect {
    let url = microsoft::build_authorize_url(
        &state.inner.client_id,
        &state.inner.redirect_uri,
        &state.inner.pkce_challenge,
        &state.inner.state,
    );
    Redirect::temporary(&url)
}

#[derive(Debug, Deserialize)]
struct CallbackParams {
    code: Option<String>,
    state: Option<String>,
    error: Option<String>,
    error_description: Option<String>,
}

async fn auth_callback(
    State(state): State<CallbackState>,
    Query(params): Query<CallbackParams>,
) -> impl IntoResponse {
    if let Some(error) = params.error {
        let detail = params.error_description.unwrap_or_default();
        let message = format!("authorization failed: {error}: {detail}");
        state.deliver(Err(anyhow::anyhow!(message.clone()))).await;
        return (StatusCode::BAD_REQUEST, Html(page(&message)));
    }

    if params.state.as_deref() != Some(state.inner.state.as_str()) {
        // Do not complete the acquisition: a mismatched state is a replayed
        // or forged callback, and the real one may still arrive.
        return (
            StatusCode::BAD_REQUEST,
            Html(page("state mismatch, request rejected")),
        );
    }

    let Some(code) = params.code else {
        return (StatusCode::BAD_REQUEST, Html(page("missing code parameter")));
    };

    let exchanged = microsoft::exchange_code(
        &state.inner.http,
        &state.inner.client_id,
        &state.inner.redirect_uri,
        &code,
        &state.inner.pkce_verifier,
    )
    .await;

    match exchanged {
        Ok(tokens) => {
            state.deliver(Ok(tokens)).await;
            (
                StatusCode::OK,
                Html(page("Signed in. You can close this window.")),
            )
        }
        Err(e) => {
            let message = format!("{e:#}");
            state.deliver(Err(e)).await;
            (StatusCode::BAD_GATEWAY, Html(page(&message)))
        }
    }
}

async fn health() -> Json<serde_json::Value> {
    Json(serde_json::json!({"status": "ok"}))
}

fn page(message: &str) -> String {
    format!("<html><body><p>{message}</p></body></html>")
}

// ============================================================================
// Scoped Acquisition
// ============================================================================

/// Run one callback acquisition: bind the listener, wait for the exchange to
/// complete (bounded by `timeout`), then release the endpoint.
pub async fn acquire_via_callback(
    http: reqwest::Client,
    client_id: &str,
    host: &str,
    port: u16,
    timeout: Duration,
) -> Result<TokenSet> {
    let redirect_uri = format!("http://{host}:{port}/auth/callback");
    let (state, result_rx) =
        CallbackState::new_acquisition(http, client_id.to_string(), redirect_uri);
    let app = build_router(state);

    let listener = tokio::net::TcpListener::bind((host, port))
        .await
        .with_context(|| format!("binding callback listener on {host}:{port}"))?;
    let addr = listener.local_addr().context("reading callback address")?;
    info!(%addr, "Callback acquisition listening, open http://{addr}/ to sign in");

    let (shutdown_tx, shutdown_rx) = oneshot::channel::<()>();
    let server = tokio::spawn(async move {
        let serve = axum::serve(listener, app).with_graceful_shutdown(async {
            let _ = shutdown_rx.await;
        });
        if let Err(e) = serve.await {
            warn!(error = %e, "Callback server error");
        }
    });

    let outcome = tokio::time::timeout(timeout, result_rx).await;

    // Release the listening endpoint on every exit path before surfacing
    // the outcome.
    let _ = shutdown_tx.send(());
    let _ = server.await;

    match outcome {
        Ok(Ok(result)) => result,
        Ok(Err(_)) => bail!("callback acquisition aborted before completing"),
        Err(_) => bail!(
            "callback acquisition timed out after {}s",
            timeout.as_secs()
        ),
    }
}
