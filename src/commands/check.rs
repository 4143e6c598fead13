//! Credential usability report.

use std::path::Path;

use anyhow::{Context, Result};

use minekeeper::config::{Config, resolve_path};
use minekeeper::status::read_status;
use minekeeper::store::{CredentialStore, FileCredentialStore};

pub async fn run(config_path: &str) -> Result<()> {
    let config = Config::load(config_path)
        .await
        .with_context(|| format!("loading config from {config_path}"))?;
    config.validate().context("invalid configuration")?;

    let config_path = Path::new(config_path);
    let store = FileCredentialStore::new(resolve_path(config_path, &config.store.path));

    for account in &config.accounts {
        // Read-only peek: `get` instead of `is_usable` so checking never
        // purges a record out from under a running daemon.
        match store.get(&account.name).await? {
            Some(record) if record.is_usable() => {
                let until = record
                    .expires_at
                    .map(|t| t.format("%Y-%m-%d %H:%M UTC").to_string())
                    .unwrap_or_else(|| "never".to_string());
                println!(
                    "{}: usable (as {}, expires {})",
                    account.name, record.profile.display_name, until
                );
            }
            Some(_) => println!("{}: cached but unusable, will re-acquire", account.name),
            None => println!("{}: no cached credential", account.name),
        }
    }

    let status_path = resolve_path(config_path, &config.relay.status_file);
    if let Some(status) = read_status(&status_path).await {
        println!(
            "last transition: {} — {} ({}, {})",
            status.account_id,
            status.message,
            if status.connected {
                "connected"
            } else {
                "disconnected"
            },
            status.timestamp.format("%Y-%m-%d %H:%M:%S UTC")
        );
    }

    Ok(())
}
