use std::io::ErrorKind;
use std::path::{Path, PathBuf};

use tokio::fs;

use serde::Deserialize;
use thiserror::Error;

// ============================================================================
// Config (root)
// ============================================================================

/// Top-level daemon configuration.
///
/// Loaded from a YAML file with `${VAR}` environment expansion so deployments
/// can keep secrets out of the file itself. A missing file yields defaults;
/// defaults alone are not runnable (`validate` requires at least one account).
#[derive(Debug, Default, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub auth: AuthConfig,
    #[serde(default)]
    pub store: StoreConfig,
    #[serde(default)]
    pub relay: RelayConfig,
    #[serde(default)]
    pub reconnect: ReconnectConfig,
    #[serde(default)]
    pub provider: ProviderConfig,
    /// Optional economy API access for balance lookups.
    #[serde(default)]
    pub economy: Option<EconomyConfig>,
    /// Accounts to keep online. At least one is required to run.
    #[serde(default)]
    pub accounts: Vec<AccountConfig>,
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config file: {0}")]
    Io(#[from] std::io::Error),

    #[error("failed to parse config file: {0}")]
    Yaml(#[from] serde_yaml::Error),

    #[error("environment variable '{0}' is not set")]
    MissingEnvVar(String),

    #[error("unclosed variable reference '${{' (missing '}}')")]
    UnclosedVarReference,

    #[error("no accounts configured")]
    NoAccounts,

    #[error("account at index {0} has a blank name")]
    BlankAccountName(usize),

    #[error("duplicate account '{0}'")]
    DuplicateAccount(String),
}

impl Config {
    pub async fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let contents = match fs::read_to_string(path).await {
            Ok(c) => c,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(Self::default()),
            Err(e) => return Err(ConfigError::Io(e)),
        };
        let expanded = expand_env_vars(&contents)?;
        Ok(serde_yaml::from_str(&expanded)?)
    }

    /// Validate startup invariants.
    ///
    /// A config that fails here is fatal: there is no account to keep online,
    /// so retrying would never help.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.accounts.is_empty() {
            return Err(ConfigError::NoAccounts);
        }
        let mut seen = std::collections::HashSet::new();
        for (i, account) in self.accounts.iter().enumerate() {
            if account.name.trim().is_empty() {
                return Err(ConfigError::BlankAccountName(i));
            }
            if !seen.insert(account.name.as_str()) {
                return Err(ConfigError::DuplicateAccount(account.name.clone()));
            }
        }
        Ok(())
    }

    pub fn account(&self, name: &str) -> Option<&AccountConfig> {
        self.accounts.iter().find(|a| a.name == name)
    }
}

/// Resolve a path relative to the config file directory.
///
/// Absolute paths are returned as-is, so behavior does not depend on the
/// current working directory.
pub fn resolve_path(config_path: &Path, path: &Path) -> PathBuf {
    if path.is_absolute() {
        return path.to_path_buf();
    }
    let config_dir = config_path.parent().unwrap_or_else(|| Path::new("."));
    config_dir.join(path)
}

// ============================================================================
// Environment Variable Expansion
// ============================================================================

/// Expand environment variables in a string.
///
/// Supports shell-compatible syntax:
/// - `${VAR}` - required variable, errors if not set
/// - `${VAR:-default}` - optional variable with default value
/// - `$$` - escaped `$` (only needed before `{`)
///
/// A plain `$` that does not start a `${` reference passes through literally.
fn expand_env_vars(input: &str) -> Result<String, ConfigError> {
    let mut out = String::with_capacity(input.len());
    let mut rest = input;

    while let Some(pos) = rest.find('$') {
        out.push_str(&rest[..pos]);
        rest = &rest[pos + 1..];
        if let Some(after) = rest.strip_prefix('$') {
            out.push('$');
            rest = after;
        } else if let Some(after) = rest.strip_prefix('{') {
            let end = after
                .find('}')
                .ok_or(ConfigError::UnclosedVarReference)?;
            out.push_str(&lookup_var(&after[..end])?);
            rest = &after[end + 1..];
        } else {
            out.push('$');
        }
    }
    out.push_str(rest);
    Ok(out)
}

/// Resolve the inside of a `${...}` reference, honoring `:-` defaults.
fn lookup_var(reference: &str) -> Result<String, ConfigError> {
    let (name, default) = match reference.split_once(":-") {
        Some((name, default)) => (name, Some(default)),
        None => (reference, None),
    };
    match std::env::var(name) {
        Ok(value) => Ok(value),
        Err(_) => match default {
            Some(d) => Ok(d.to_string()),
            None => Err(ConfigError::MissingEnvVar(name.to_string())),
        },
    }
}

// ============================================================================
// Private Helpers (Serde Defaults)
// ============================================================================

fn default_server_host() -> String {
    "localhost".to_string()
}

fn default_server_port() -> u16 {
    25565
}

fn default_game_version() -> String {
    "1.21.5".to_string()
}

fn default_callback_host() -> String {
    "127.0.0.1".to_string()
}

fn default_callback_port() -> u16 {
    3000
}

fn default_store_path() -> PathBuf {
    PathBuf::from(".minekeeper/credentials")
}

fn default_command_file() -> PathBuf {
    PathBuf::from(".minekeeper/command.txt")
}

fn default_status_file() -> PathBuf {
    PathBuf::from(".minekeeper/status.json")
}

fn default_poll_interval_ms() -> u64 {
    500
}

fn default_reconnect_delay() -> u64 {
    30
}

fn default_provider_command() -> String {
    "minekeeper-client".to_string()
}

// ============================================================================
// ServerConfig
// ============================================================================

/// The remote game server to hold sessions on.
#[derive(Debug, Clone, Deserialize)]
pub struct ServerConfig {
    #[serde(default = "default_server_host")]
    pub host: String,
    #[serde(default = "default_server_port")]
    pub port: u16,
    /// Protocol version the provider client should speak.
    #[serde(default = "default_game_version")]
    pub version: String,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: default_server_host(),
            port: default_server_port(),
            version: default_game_version(),
        }
    }
}

// ============================================================================
// AuthConfig
// ============================================================================

/// How credentials are acquired when no usable record is cached.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AuthMode {
    /// Out-of-band sign-in with a short user code (headless friendly).
    #[default]
    DeviceCode,
    /// Browser redirect to a short-lived local HTTP endpoint.
    Callback,
}

#[derive(Debug, Clone, Deserialize)]
pub struct AuthConfig {
    #[serde(default)]
    pub mode: AuthMode,
    /// Azure application (public client) id. Overrides the built-in default.
    #[serde(default)]
    pub client_id: Option<String>,
    #[serde(default)]
    pub callback: CallbackConfig,
}

impl Default for AuthConfig {
    fn default() -> Self {
        Self {
            mode: AuthMode::default(),
            client_id: None,
            callback: CallbackConfig::default(),
        }
    }
}

/// Bind address for the scoped callback acquisition server.
#[derive(Debug, Clone, Deserialize)]
pub struct CallbackConfig {
    #[serde(default = "default_callback_host")]
    pub host: String,
    #[serde(default = "default_callback_port")]
    pub port: u16,
}

impl Default for CallbackConfig {
    fn default() -> Self {
        Self {
            host: default_callback_host(),
            port: default_callback_port(),
        }
    }
}

// ============================================================================
// StoreConfig
// ============================================================================

#[derive(Debug, Clone, Deserialize)]
pub struct StoreConfig {
    /// Directory holding one credential document per account.
    #[serde(default = "default_store_path")]
    pub path: PathBuf,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            path: default_store_path(),
        }
    }
}

// ============================================================================
// RelayConfig
// ============================================================================

/// File-based command ingress and status egress.
#[derive(Debug, Clone, Deserialize)]
pub struct RelayConfig {
    #[serde(default = "default_command_file")]
    pub command_file: PathBuf,
    #[serde(default = "default_status_file")]
    pub status_file: PathBuf,
    #[serde(default = "default_poll_interval_ms")]
    pub poll_interval_ms: u64,
}

impl Default for RelayConfig {
    fn default() -> Self {
        Self {
            command_file: default_command_file(),
            status_file: default_status_file(),
            poll_interval_ms: default_poll_interval_ms(),
        }
    }
}

// ============================================================================
// ReconnectConfig
// ============================================================================

#[derive(Debug, Clone, Deserialize)]
pub struct ReconnectConfig {
    /// Fixed delay between a disconnect and the next connection attempt.
    #[serde(default = "default_reconnect_delay")]
    pub delay_seconds: u64,
}

impl Default for ReconnectConfig {
    fn default() -> Self {
        Self {
            delay_seconds: default_reconnect_delay(),
        }
    }
}

// ============================================================================
// ProviderConfig
// ============================================================================

/// The external protocol client spawned per connected account.
#[derive(Debug, Clone, Deserialize)]
pub struct ProviderConfig {
    #[serde(default = "default_provider_command")]
    pub command: String,
    #[serde(default)]
    pub args: Vec<String>,
    /// Extra environment variables passed to the client.
    #[serde(default)]
    pub env: std::collections::HashMap<String, String>,
}

impl Default for ProviderConfig {
    fn default() -> Self {
        Self {
            command: default_provider_command(),
            args: Vec::new(),
            env: std::collections::HashMap::new(),
        }
    }
}

// ============================================================================
// EconomyConfig
// ============================================================================

#[derive(Debug, Clone, Deserialize)]
pub struct EconomyConfig {
    pub base_url: String,
    pub api_key: String,
}

// ============================================================================
// AccountConfig
// ============================================================================

/// One logical account to keep online.
#[derive(Debug, Clone, Deserialize)]
pub struct AccountConfig {
    /// Account identifier (the in-game username).
    pub name: String,
    /// Static password fallback used when credential acquisition fails.
    #[serde(default)]
    pub password: Option<String>,
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::{NamedTempFile, TempDir};

    #[test]
    fn test_default_config() {
        let config = Config::default();
        assert_eq!(config.server.host, "localhost");
        assert_eq!(config.server.port, 25565);
        assert_eq!(config.auth.mode, AuthMode::DeviceCode);
        assert_eq!(config.auth.callback.port, 3000);
        assert_eq!(config.reconnect.delay_seconds, 30);
        assert!(config.accounts.is_empty());
        assert!(config.economy.is_none());
    }

    #[tokio::test]
    async fn test_load_missing_file_returns_defaults() {
        let tmp_dir = TempDir::new().unwrap();
        let missing = tmp_dir.path().join("missing-config.yaml");
        let config = Config::load(&missing).await.unwrap();
        assert_eq!(config.server.port, 25565);
    }

    #[tokio::test]
    async fn test_load_valid_yaml() {
        let mut file = NamedTempFile::new().unwrap();
        writeln!(
            file,
            r#"
server:
  host: "east.donutsmp.net"
  port: 25565
auth:
  mode: callback
reconnect:
  delay_seconds: 10
accounts:
  - name: "alice"
  - name: "bob"
    password: "hunter2"
"#
        )
        .unwrap();

        let config = Config::load(file.path()).await.unwrap();
        assert_eq!(config.server.host, "east.donutsmp.net");
        assert_eq!(config.auth.mode, AuthMode::Callback);
        assert_eq!(config.reconnect.delay_seconds, 10);
        assert_eq!(config.accounts.len(), 2);
        assert_eq!(config.accounts[0].name, "alice");
        assert_eq!(config.accounts[1].password.as_deref(), Some("hunter2"));
        config.validate().unwrap();
    }

    #[tokio::test]
    async fn test_load_partial_yaml_uses_defaults() {
        let mut file = NamedTempFile::new().unwrap();
        writeln!(
            file,
            r#"
server:
  port: 19132
"#
        )
        .unwrap();

        let config = Config::load(file.path()).await.unwrap();
        assert_eq!(config.server.host, "localhost"); // default
        assert_eq!(config.server.port, 19132);
        assert_eq!(config.relay.poll_interval_ms, 500); // default
    }

    #[test]
    fn test_validate_rejects_empty_accounts() {
        let config = Config::default();
        assert!(matches!(config.validate(), Err(ConfigError::NoAccounts)));
    }

    #[tokio::test]
    async fn test_validate_rejects_blank_name() {
        let mut file = NamedTempFile::new().unwrap();
        writeln!(
            file,
            r#"
accounts:
  - name: "  "
"#
        )
        .unwrap();

        let config = Config::load(file.path()).await.unwrap();
        assert!(matches!(
            config.validate(),
            Err(ConfigError::BlankAccountName(0))
        ));
    }

    #[tokio::test]
    async fn test_validate_rejects_duplicates() {
        let mut file = NamedTempFile::new().unwrap();
        writeln!(
            file,
            r#"
accounts:
  - name: "alice"
  - name: "alice"
"#
        )
        .unwrap();

        let config = Config::load(file.path()).await.unwrap();
        match config.validate() {
            Err(ConfigError::DuplicateAccount(name)) => assert_eq!(name, "alice"),
            other => panic!("expected DuplicateAccount, got {other:?}"),
        }
    }

    #[test]
    fn test_resolve_path_absolute() {
        let config_path = Path::new("/etc/minekeeper/minekeeper.yaml");
        let result = resolve_path(config_path, Path::new("/var/data/credentials"));
        assert_eq!(result, PathBuf::from("/var/data/credentials"));
    }

    #[test]
    fn test_resolve_path_relative() {
        let config_path = Path::new("/etc/minekeeper/minekeeper.yaml");
        let result = resolve_path(config_path, Path::new(".minekeeper/credentials"));
        assert_eq!(
            result,
            PathBuf::from("/etc/minekeeper/.minekeeper/credentials")
        );
    }

    // ========================================================================
    // Environment Variable Expansion Tests
    // ========================================================================

    #[test]
    fn test_expand_env_vars_no_vars() {
        let input = "plain string without variables";
        assert_eq!(expand_env_vars(input).unwrap(), input);
    }

    #[test]
    fn test_expand_env_vars_required_var() {
        // SAFETY: Single-threaded test
        unsafe { std::env::set_var("MK_TEST_REQUIRED", "tok-123") };
        let result = expand_env_vars("prefix ${MK_TEST_REQUIRED} suffix").unwrap();
        assert_eq!(result, "prefix tok-123 suffix");
        unsafe { std::env::remove_var("MK_TEST_REQUIRED") };
    }

    #[test]
    fn test_expand_env_vars_missing_required_var() {
        // SAFETY: Single-threaded test
        unsafe { std::env::remove_var("MK_MISSING_VAR") };
        match expand_env_vars("value: ${MK_MISSING_VAR}") {
            Err(ConfigError::MissingEnvVar(name)) => assert_eq!(name, "MK_MISSING_VAR"),
            other => panic!("expected MissingEnvVar, got {other:?}"),
        }
    }

    #[test]
    fn test_expand_env_vars_with_default() {
        // SAFETY: Single-threaded test
        unsafe { std::env::remove_var("MK_UNSET_WITH_DEFAULT") };
        let result = expand_env_vars("value: ${MK_UNSET_WITH_DEFAULT:-fallback}").unwrap();
        assert_eq!(result, "value: fallback");
    }

    #[test]
    fn test_expand_env_vars_escaped_dollar() {
        let result = expand_env_vars("price: $$100 and ${MK_ESC:-x}").unwrap();
        assert_eq!(result, "price: $100 and x");
    }

    #[test]
    fn test_expand_env_vars_literal_dollar() {
        assert_eq!(expand_env_vars("cost is $50").unwrap(), "cost is $50");
    }

    #[test]
    fn test_expand_env_vars_unclosed_brace() {
        assert!(matches!(
            expand_env_vars("value: ${UNCLOSED"),
            Err(ConfigError::UnclosedVarReference)
        ));
    }

    #[tokio::test]
    async fn test_config_load_with_env_var() {
        // SAFETY: Single-threaded test
        unsafe { std::env::set_var("MK_TEST_API_KEY", "secret123") };

        let mut file = NamedTempFile::new().unwrap();
        writeln!(
            file,
            r#"
economy:
  base_url: "https://api.donutsmp.net"
  api_key: ${{MK_TEST_API_KEY}}
"#
        )
        .unwrap();

        let config = Config::load(file.path()).await.unwrap();
        let economy = config.economy.expect("economy config should exist");
        assert_eq!(economy.api_key, "secret123");

        unsafe { std::env::remove_var("MK_TEST_API_KEY") };
    }
}
