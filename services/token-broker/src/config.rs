//! Configuration types and loading
//!
//! Config precedence: CLI args > env vars > config file > defaults.
//! The login sidecar bearer token is loaded from LOGIN_EXECUTOR_TOKEN or
//! `[login].token_file`, never stored in the TOML directly.

use common::Secret;
use serde::Deserialize;
use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::time::Duration;
use token_pool::{MaintenanceConfig, PoolConfig};

/// Root configuration
#[derive(Debug, Deserialize)]
pub struct Config {
    pub service: ServiceConfig,
    pub storage: StorageConfig,
    pub login: LoginConfig,
    #[serde(default)]
    pub maintenance: MaintenanceConfig,
    #[serde(default)]
    pub pool: PoolConfig,
}

/// Operational HTTP listener (health and metrics only)
#[derive(Debug, Deserialize)]
pub struct ServiceConfig {
    pub listen_addr: SocketAddr,
    #[serde(default = "default_max_connections")]
    pub max_connections: usize,
}

#[derive(Debug, Deserialize)]
pub struct StorageConfig {
    /// JSON file of site credentials
    pub credentials_path: PathBuf,
    /// JSON file holding cached tokens and acquisition history
    pub state_path: PathBuf,
}

/// Login sidecar settings
#[derive(Debug, Deserialize)]
pub struct LoginConfig {
    pub endpoint: String,
    /// Upper bound on a single login HTTP call; request deadlines may cut it
    /// shorter
    #[serde(default = "default_login_timeout")]
    pub timeout_secs: u64,
    /// Path to a file containing the sidecar bearer token (alternative to
    /// LOGIN_EXECUTOR_TOKEN)
    #[serde(default)]
    pub token_file: Option<PathBuf>,
    #[serde(skip)]
    pub auth_token: Option<Secret<String>>,
}

impl LoginConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }
}

fn default_max_connections() -> usize {
    256
}

fn default_login_timeout() -> u64 {
    300
}

impl Config {
    /// Load configuration from a TOML file, then overlay environment variables.
    ///
    /// Sidecar token resolution order:
    /// 1. LOGIN_EXECUTOR_TOKEN env var
    /// 2. token_file path from config
    pub fn load(path: &Path) -> common::Result<Self> {
        let contents = std::fs::read_to_string(path)?;
        let mut config: Config = toml::from_str(&contents)?;

        if !config.login.endpoint.starts_with("http://")
            && !config.login.endpoint.starts_with("https://")
        {
            return Err(common::Error::Config(format!(
                "login.endpoint must start with http:// or https://, got: {}",
                config.login.endpoint
            )));
        }
        if config.login.timeout_secs == 0 {
            return Err(common::Error::Config(
                "login.timeout_secs must be greater than 0".into(),
            ));
        }
        if config.service.max_connections == 0 {
            return Err(common::Error::Config(
                "service.max_connections must be greater than 0".into(),
            ));
        }
        if config.maintenance.interval_secs == 0 {
            return Err(common::Error::Config(
                "maintenance.interval_secs must be greater than 0".into(),
            ));
        }
        config.pool.validate()?;

        if let Ok(token) = std::env::var("LOGIN_EXECUTOR_TOKEN") {
            config.login.auth_token = Some(Secret::new(token));
        } else if let Some(ref token_file) = config.login.token_file {
            let token = std::fs::read_to_string(token_file).map_err(|e| {
                common::Error::Config(format!(
                    "failed to read token_file {}: {e}",
                    token_file.display()
                ))
            })?;
            let token = token.trim().to_owned();
            if !token.is_empty() {
                config.login.auth_token = Some(Secret::new(token));
            }
        }

        Ok(config)
    }

    /// Resolve config file path from CLI arg or CONFIG_PATH env var.
    pub fn resolve_path(cli_path: Option<&str>) -> PathBuf {
        if let Some(p) = cli_path {
            return PathBuf::from(p);
        }
        if let Ok(p) = std::env::var("CONFIG_PATH") {
            return PathBuf::from(p);
        }
        PathBuf::from("token-broker.toml")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    /// Serializes tests that touch process environment variables.
    static ENV_MUTEX: Mutex<()> = Mutex::new(());

    /// SAFETY: Callers must hold ENV_MUTEX to prevent concurrent env mutation.
    unsafe fn set_env(key: &str, val: &str) {
        unsafe { std::env::set_var(key, val) };
    }

    unsafe fn remove_env(key: &str) {
        unsafe { std::env::remove_var(key) };
    }

    fn valid_toml() -> &'static str {
        r#"
[service]
listen_addr = "127.0.0.1:9090"

[storage]
credentials_path = "/var/lib/token-broker/credentials.json"
state_path = "/var/lib/token-broker/state.json"

[login]
endpoint = "http://127.0.0.1:7000/login"

[maintenance]
sites = ["court_zxfw"]

[pool]
max_logins_per_site = 1
"#
    }

    fn write_config(dir: &tempfile::TempDir, contents: &str) -> PathBuf {
        let path = dir.path().join("token-broker.toml");
        std::fs::write(&path, contents).unwrap();
        path
    }

    #[test]
    fn load_valid_config_with_defaults() {
        let _lock = ENV_MUTEX.lock().unwrap();
        let dir = tempfile::tempdir().unwrap();
        let path = write_config(&dir, valid_toml());
        unsafe { remove_env("LOGIN_EXECUTOR_TOKEN") };

        let config = Config::load(&path).unwrap();
        assert_eq!(config.service.max_connections, 256);
        assert_eq!(config.login.timeout(), Duration::from_secs(300));
        assert_eq!(config.maintenance.sites, vec!["court_zxfw"]);
        assert_eq!(config.maintenance.interval_secs, 300);
        assert_eq!(config.pool.max_logins_per_site, 1);
        assert_eq!(config.pool.max_concurrent_logins, 4);
        assert!(config.login.auth_token.is_none());
    }

    #[test]
    fn missing_pool_and_maintenance_tables_use_defaults() {
        let _lock = ENV_MUTEX.lock().unwrap();
        let dir = tempfile::tempdir().unwrap();
        let path = write_config(
            &dir,
            r#"
[service]
listen_addr = "127.0.0.1:9090"

[storage]
credentials_path = "creds.json"
state_path = "state.json"

[login]
endpoint = "https://login.internal/login"
"#,
        );
        unsafe { remove_env("LOGIN_EXECUTOR_TOKEN") };

        let config = Config::load(&path).unwrap();
        assert!(config.maintenance.sites.is_empty());
        assert_eq!(config.pool.default_timeout_secs, 120);
    }

    #[test]
    fn load_missing_file() {
        let result = Config::load(Path::new("/nonexistent/path/token-broker.toml"));
        assert!(result.is_err());
    }

    #[test]
    fn load_invalid_toml() {
        let dir = tempfile::tempdir().unwrap();
        let path = write_config(&dir, "not valid {{{{ toml");
        assert!(Config::load(&path).is_err());
    }

    #[test]
    fn endpoint_without_scheme_rejected() {
        let _lock = ENV_MUTEX.lock().unwrap();
        let dir = tempfile::tempdir().unwrap();
        let path = write_config(
            &dir,
            &valid_toml().replace("http://127.0.0.1:7000/login", "127.0.0.1:7000/login"),
        );

        let err = Config::load(&path).unwrap_err().to_string();
        assert!(err.contains("login.endpoint must start with http"), "got: {err}");
    }

    #[test]
    fn zero_login_timeout_rejected() {
        let _lock = ENV_MUTEX.lock().unwrap();
        let dir = tempfile::tempdir().unwrap();
        let contents = valid_toml().replace(
            "endpoint = \"http://127.0.0.1:7000/login\"",
            "endpoint = \"http://127.0.0.1:7000/login\"\ntimeout_secs = 0",
        );
        let path = write_config(&dir, &contents);
        assert!(Config::load(&path).is_err());
    }

    #[test]
    fn invalid_pool_settings_rejected() {
        let _lock = ENV_MUTEX.lock().unwrap();
        let dir = tempfile::tempdir().unwrap();
        let contents = valid_toml().replace("max_logins_per_site = 1", "max_logins_per_site = 0");
        let path = write_config(&dir, &contents);

        let err = Config::load(&path).unwrap_err().to_string();
        assert!(err.contains("pool.max_logins_per_site"), "got: {err}");
    }

    #[test]
    fn auth_token_from_env() {
        let _lock = ENV_MUTEX.lock().unwrap();
        let dir = tempfile::tempdir().unwrap();
        let path = write_config(&dir, valid_toml());

        unsafe { set_env("LOGIN_EXECUTOR_TOKEN", "sidecar-env-123") };
        let config = Config::load(&path).unwrap();
        unsafe { remove_env("LOGIN_EXECUTOR_TOKEN") };

        assert_eq!(
            config.login.auth_token.as_ref().unwrap().expose(),
            "sidecar-env-123"
        );
    }

    #[test]
    fn auth_token_from_file_is_trimmed() {
        let _lock = ENV_MUTEX.lock().unwrap();
        let dir = tempfile::tempdir().unwrap();
        let token_path = dir.path().join("sidecar_token");
        std::fs::write(&token_path, "sidecar-file-456\n").unwrap();
        let contents = valid_toml().replace(
            "endpoint = \"http://127.0.0.1:7000/login\"",
            &format!(
                "endpoint = \"http://127.0.0.1:7000/login\"\ntoken_file = \"{}\"",
                token_path.display()
            ),
        );
        let path = write_config(&dir, &contents);
        unsafe { remove_env("LOGIN_EXECUTOR_TOKEN") };

        let config = Config::load(&path).unwrap();
        assert_eq!(
            config.login.auth_token.as_ref().unwrap().expose(),
            "sidecar-file-456"
        );
    }

    #[test]
    fn env_token_overrides_missing_file() {
        let _lock = ENV_MUTEX.lock().unwrap();
        let dir = tempfile::tempdir().unwrap();
        let contents = valid_toml().replace(
            "endpoint = \"http://127.0.0.1:7000/login\"",
            "endpoint = \"http://127.0.0.1:7000/login\"\ntoken_file = \"/nonexistent/sidecar_token\"",
        );
        let path = write_config(&dir, &contents);

        unsafe { set_env("LOGIN_EXECUTOR_TOKEN", "env-wins") };
        let config = Config::load(&path).unwrap();
        unsafe { remove_env("LOGIN_EXECUTOR_TOKEN") };

        assert_eq!(config.login.auth_token.as_ref().unwrap().expose(), "env-wins");
    }

    #[test]
    fn missing_token_file_is_an_error() {
        let _lock = ENV_MUTEX.lock().unwrap();
        let dir = tempfile::tempdir().unwrap();
        let contents = valid_toml().replace(
            "endpoint = \"http://127.0.0.1:7000/login\"",
            "endpoint = \"http://127.0.0.1:7000/login\"\ntoken_file = \"/nonexistent/sidecar_token\"",
        );
        let path = write_config(&dir, &contents);
        unsafe { remove_env("LOGIN_EXECUTOR_TOKEN") };

        assert!(Config::load(&path).is_err());
    }

    #[test]
    fn resolve_path_precedence() {
        let _lock = ENV_MUTEX.lock().unwrap();

        unsafe { set_env("CONFIG_PATH", "/env/token-broker.toml") };
        assert_eq!(
            Config::resolve_path(Some("/cli/wins.toml")),
            PathBuf::from("/cli/wins.toml")
        );
        assert_eq!(
            Config::resolve_path(None),
            PathBuf::from("/env/token-broker.toml")
        );

        unsafe { remove_env("CONFIG_PATH") };
        assert_eq!(Config::resolve_path(None), PathBuf::from("token-broker.toml"));
    }
}
