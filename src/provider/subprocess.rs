//! Subprocess session provider.
//!
//! Spawns the configured protocol client once per session. Connection
//! parameters travel via environment variables; the client reports lifecycle
//! events as JSON lines on stdout and accepts chat lines on stdin. Client
//! stderr is forwarded to the process log with an account prefix.

use std::process::Stdio;

use async_trait::async_trait;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader, Lines};
use tokio::process::{Child, ChildStdin, ChildStdout};
use tracing::{debug, warn};

use crate::config::ProviderConfig;

use super::{ConnectParams, LinkEvent, LiveCredential, ProviderError, SessionLink, SessionProvider};

// ============================================================================
// Provider
// ============================================================================

/// Spawns one protocol-client process per session.
#[derive(Debug, Clone)]
pub struct SubprocessProvider {
    config: ProviderConfig,
}

impl SubprocessProvider {
    pub fn new(config: ProviderConfig) -> Self {
        Self { config }
    }
}

#[async_trait]
impl SessionProvider for SubprocessProvider {
    async fn connect(&self, params: ConnectParams) -> Result<Box<dyn SessionLink>, ProviderError> {
        let mut command = tokio::process::Command::new(&self.config.command);
        command
            .args(&self.config.args)
            .envs(&self.config.env)
            .env("MINEKEEPER_HOST", &params.host)
            .env("MINEKEEPER_PORT", params.port.to_string())
            .env("MINEKEEPER_VERSION", &params.version)
            .env("MINEKEEPER_ACCOUNT", &params.account)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);

        match &params.credential {
            LiveCredential::SessionToken(token) => {
                command.env("MINEKEEPER_SESSION_TOKEN", token);
            }
            LiveCredential::Password(password) => {
                command.env("MINEKEEPER_PASSWORD", password);
            }
        }

        let mut child = command.spawn().map_err(|source| ProviderError::Spawn {
            command: self.config.command.clone(),
            source,
        })?;

        debug!(
            account = %params.account,
            command = %self.config.command,
            "Protocol client spawned"
        );

        let stdin = child.stdin.take().ok_or(ProviderError::Closed)?;
        let stdout = child.stdout.take().ok_or(ProviderError::Closed)?;
        if let Some(stderr) = child.stderr.take() {
            forward_stderr(params.account.clone(), stderr);
        }

        Ok(Box::new(SubprocessLink {
            account: params.account,
            child,
            stdin: Some(stdin),
            stdout: BufReader::new(stdout).lines(),
            closed: false,
        }))
    }
}

/// Forward client stderr lines into the process log.
fn forward_stderr(account: String, stderr: tokio::process::ChildStderr) {
    tokio::spawn(async move {
        let mut lines = BufReader::new(stderr).lines();
        while let Ok(Some(line)) = lines.next_line().await {
            if !line.trim().is_empty() {
                warn!(account = %account, "[client] {line}");
            }
        }
    });
}

// ============================================================================
// Link
// ============================================================================

struct SubprocessLink {
    account: String,
    child: Child,
    stdin: Option<ChildStdin>,
    stdout: Lines<BufReader<ChildStdout>>,
    closed: bool,
}

#[async_trait]
impl SessionLink for SubprocessLink {
    async fn send_chat(&mut self, line: &str) -> Result<(), ProviderError> {
        let stdin = self.stdin.as_mut().ok_or(ProviderError::Closed)?;
        stdin.write_all(line.as_bytes()).await?;
        stdin.write_all(b"\n").await?;
        stdin.flush().await?;
        Ok(())
    }

    async fn next_event(&mut self) -> Option<LinkEvent> {
        if self.closed {
            return None;
        }
        loop {
            match self.stdout.next_line().await {
                Ok(Some(line)) => {
                    let line = line.trim();
                    if line.is_empty() {
                        continue;
                    }
                    match serde_json::from_str::<LinkEvent>(line) {
                        Ok(event) => {
                            if matches!(event, LinkEvent::Closed { .. }) {
                                self.closed = true;
                            }
                            return Some(event);
                        }
                        // Anything that isn't an event line is client chatter.
                        Err(_) => debug!(account = %self.account, "[client] {line}"),
                    }
                }
                Ok(None) | Err(_) => {
                    // stdout is gone; report the exit as a close event once.
                    self.closed = true;
                    let reason = match self.child.wait().await {
                        Ok(status) => format!("protocol client exited: {status}"),
                        Err(e) => format!("protocol client lost: {e}"),
                    };
                    return Some(LinkEvent::Closed {
                        kind: super::CloseKind::ConnectionLost,
                        reason,
                    });
                }
            }
        }
    }

    async fn close(&mut self) {
        self.closed = true;
        self.stdin.take();
        if let Err(e) = self.child.kill().await {
            debug!(account = %self.account, error = %e, "Protocol client already gone");
        }
    }
}
