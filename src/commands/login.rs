//! Interactive login for one account.
//!
//! Runs the configured acquisition strategy in the foreground and persists
//! the resulting credential, so the daemon's next start rides the cached
//! fast path without a human present.

use std::path::Path;
use std::sync::Arc;

use anyhow::{Context, Result, bail};

use minekeeper::auth::{CredentialAcquirer, MicrosoftAcquirer};
use minekeeper::config::{Config, resolve_path};
use minekeeper::store::{CredentialStore, FileCredentialStore};

pub async fn run(account: &str, config_path: &str) -> Result<()> {
    let config = Config::load(config_path)
        .await
        .with_context(|| format!("loading config from {config_path}"))?;

    if config.account(account).is_none() {
        bail!("account '{account}' is not listed in {config_path}");
    }

    let acquirer = MicrosoftAcquirer::with_prompt(
        &config.auth,
        Arc::new(|auth| {
            println!();
            println!("To sign in, open:  {}", auth.verification_uri);
            println!("and enter the code:  {}", auth.user_code);
            println!();
        }),
    );

    println!("Authenticating '{account}'...");
    let record = acquirer.acquire(account).await?;

    let store = FileCredentialStore::new(resolve_path(Path::new(config_path), &config.store.path));
    store
        .put(account, &record)
        .await
        .context("caching acquired credential")?;

    println!(
        "Signed in as {} ({}). Credential cached; the daemon will reuse it silently.",
        record.profile.display_name, record.profile.remote_id
    );
    Ok(())
}
