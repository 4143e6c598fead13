//! File-based command ingress.
//!
//! External actors drop a single line of text into the command file; the
//! relay polls for it, deletes the file, then forwards the line to the
//! account's session. Deleting before forwarding makes consumption
//! idempotent: a command can never be re-delivered, and one submitted while
//! the session is down is dropped, not buffered.

use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::time::Duration;

use tokio::fs;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{debug, info, warn};

use crate::session::{SessionError, SessionHandle};

/// Command file for one account.
///
/// The primary account owns the base path; secondary accounts get the
/// account name spliced in before the extension, e.g. `command.txt` and
/// `command_alt1.txt`.
pub fn command_path_for(base: &Path, account: &str, primary: bool) -> PathBuf {
    if primary {
        return base.to_path_buf();
    }
    let stem = base
        .file_stem()
        .map(|s| s.to_string_lossy().to_string())
        .unwrap_or_else(|| "command".to_string());
    let mut name = format!("{stem}_{account}");
    if let Some(ext) = base.extension() {
        name.push('.');
        name.push_str(&ext.to_string_lossy());
    }
    base.with_file_name(name)
}

/// Polls one command file and forwards into one session.
pub struct CommandRelay;

impl CommandRelay {
    pub fn spawn(
        path: PathBuf,
        handle: SessionHandle,
        poll_interval: Duration,
        mut shutdown_rx: watch::Receiver<bool>,
    ) -> JoinHandle<()> {
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(poll_interval);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            info!(
                account = %handle.account(),
                path = %path.display(),
                "Command relay watching"
            );

            loop {
                tokio::select! {
                    _ = ticker.tick() => {
                        if let Some(line) = consume_command(&path).await {
                            forward(&handle, &line).await;
                        }
                    }
                    _ = shutdown_rx.changed() => break,
                }
            }
            debug!(account = %handle.account(), "Command relay stopped");
        })
    }
}

/// Read and clear the command file. Returns the first non-empty line.
async fn consume_command(path: &Path) -> Option<String> {
    let contents = match fs::read_to_string(path).await {
        Ok(c) => c,
        Err(e) if e.kind() == ErrorKind::NotFound => return None,
        Err(e) => {
            warn!(path = %path.display(), error = %e, "Failed to read command file");
            return None;
        }
    };

    // Clear before forwarding so the command cannot be delivered twice.
    if let Err(e) = fs::remove_file(path).await {
        if e.kind() != ErrorKind::NotFound {
            warn!(path = %path.display(), error = %e, "Failed to clear command file");
            return None;
        }
    }

    let line = contents.lines().find(|l| !l.trim().is_empty())?;
    Some(line.trim().to_string())
}

async fn forward(handle: &SessionHandle, line: &str) {
    match handle.send_chat(line).await {
        Ok(()) => info!(account = %handle.account(), command = %line, "Command forwarded"),
        Err(SessionError::NotConnected) => {
            warn!(account = %handle.account(), command = %line, "Command dropped, not connected");
        }
        Err(e) => {
            warn!(account = %handle.account(), command = %line, error = %e, "Command failed");
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
    fn primary_account_uses_base_path() {
        let base = Path::new("/data/command.txt");
        assert_eq!(command_path_for(base, "alice", true), base);
    }

    #[test]
    fn secondary_account_gets_suffixed_path() {
        let base = Path::new("/data/command.txt");
        assert_eq!(
            command_path_for(base, "alt1", false),
            PathBuf::from("/data/command_alt1.txt")
        );
    }

    #[tokio::test]
    async fn consume_clears_the_file() {
        let tmp = tempfile::TempDir::new().unwrap();
        let path = tmp.path().join("command.txt");
        tokio::fs::write(&path, "/pay alice 10000000\n").await.unwrap();

        let line = consume_command(&path).await;
        assert_eq!(line.as_deref(), Some("/pay alice 10000000"));
        assert!(!path.exists());

        // A second poll sees nothing: consumption is idempotent.
        assert!(consume_command(&path).await.is_none());
    }

    #[tokio::test]
    async fn blank_file_yields_nothing() {
        let tmp = tempfile::TempDir::new().unwrap();
        let path = tmp.path().join("command.txt");
        tokio::fs::write(&path, "\n  \n").await.unwrap();
        assert!(consume_command(&path).await.is_none());
        assert!(!path.exists());
    }
}
