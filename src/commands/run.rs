//! The keeper daemon.
//!
//! Spawns one session actor and one command relay per configured account,
//! starts connect sequences, and runs until ctrl-c.

use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use tokio::sync::watch;
use tracing::{info, warn};

use minekeeper::auth::MicrosoftAcquirer;
use minekeeper::config::{Config, resolve_path};
use minekeeper::provider::SubprocessProvider;
use minekeeper::relay::{CommandRelay, command_path_for};
use minekeeper::session::{ReconnectPolicy, SessionDeps, SessionRegistry};
use minekeeper::status::StatusWriter;
use minekeeper::store::FileCredentialStore;

pub async fn run(config_path: &str) -> Result<()> {
    let config = Config::load(config_path)
        .await
        .with_context(|| format!("loading config from {config_path}"))?;
    // Configuration errors are the one fatal class: nothing to keep online.
    config.validate().context("invalid configuration")?;

    let config_path = Path::new(config_path);
    let store = FileCredentialStore::new(resolve_path(config_path, &config.store.path));
    // Store trouble is degraded mode, never fatal: sessions can run uncached.
    match store.migrate().await {
        Ok(0) => {}
        Ok(count) => info!(count, "Migrated credential documents"),
        Err(e) => warn!(error = %e, "Credential store degraded, continuing uncached"),
    }

    let deps = SessionDeps {
        store: Arc::new(store),
        acquirer: Arc::new(MicrosoftAcquirer::new(&config.auth)),
        provider: Arc::new(SubprocessProvider::new(config.provider.clone())),
        status: StatusWriter::new(resolve_path(config_path, &config.relay.status_file)),
    };

    let policy = ReconnectPolicy::fixed(Duration::from_secs(config.reconnect.delay_seconds));
    let registry = SessionRegistry::new();
    let (shutdown_tx, shutdown_rx) = watch::channel(false);

    let command_base = resolve_path(config_path, &config.relay.command_file);
    let poll_interval = Duration::from_millis(config.relay.poll_interval_ms);
    let mut relays = Vec::new();

    for (i, account) in config.accounts.iter().enumerate() {
        let handle = registry.spawn(
            account.clone(),
            config.server.clone(),
            policy,
            deps.clone(),
        );
        relays.push(CommandRelay::spawn(
            command_path_for(&command_base, &account.name, i == 0),
            handle,
            poll_interval,
            shutdown_rx.clone(),
        ));
    }

    info!(
        accounts = config.accounts.len(),
        server = %format!("{}:{}", config.server.host, config.server.port),
        "minekeeper starting"
    );
    registry.connect_all().await;

    tokio::signal::ctrl_c()
        .await
        .context("waiting for shutdown signal")?;
    info!("Shutting down");

    let _ = shutdown_tx.send(true);
    for relay in relays {
        let _ = relay.await;
    }
    registry.shutdown().await;

    Ok(())
}
