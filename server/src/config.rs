//! Server configuration.

use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::Deserialize;

use crate::error::{ServerError, ServerResult};
use crate::node::DagNodeConfig;

/// Environment variable overriding the root username.
pub const ENV_ROOT_USER: &str = "DAGPOOL_ROOT_USER";

/// Environment variable overriding the root password.
pub const ENV_ROOT_PASSWORD: &str = "DAGPOOL_ROOT_PASSWORD";

/// Configuration for the DagPool server.
#[derive(Clone, Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Config {
    /// Socket address the RPC front end binds to.
    #[serde(default = "default_listen_address")]
    pub listen: SocketAddr,

    /// Directory holding the embedded database and any local repos
    /// that are configured with relative paths.
    #[serde(rename = "data-dir")]
    #[serde(default = "default_data_dir")]
    pub data_dir: PathBuf,

    /// The root user.
    ///
    /// Seeded into the user table at startup and protected from
    /// removal. Overridable with `DAGPOOL_ROOT_USER`.
    #[serde(rename = "root-user")]
    #[serde(default = "default_root_user")]
    pub root_user: String,

    /// The root password. Overridable with `DAGPOOL_ROOT_PASSWORD`.
    #[serde(rename = "root-password")]
    #[serde(default = "default_root_user")]
    pub root_password: String,

    /// Database connection.
    #[serde(default = "Default::default")]
    pub database: DatabaseConfig,

    /// Garbage collection.
    #[serde(rename = "garbage-collection")]
    #[serde(default = "Default::default")]
    pub garbage_collection: GarbageCollectionConfig,

    /// DagNodes opened at startup.
    ///
    /// Nodes already registered in the database take precedence; new
    /// entries here are registered on first start.
    #[serde(rename = "dag-node")]
    #[serde(default = "Vec::new")]
    pub dag_nodes: Vec<DagNodeConfig>,
}

/// Database connection configuration.
#[derive(Clone, Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct DatabaseConfig {
    /// Connection URL.
    ///
    /// Defaults to an embedded SQLite database under the data dir.
    #[serde(default)]
    pub url: Option<String>,
}

/// Garbage collection configuration.
#[derive(Clone, Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct GarbageCollectionConfig {
    /// Seconds between collection cycles. 0 disables the collector.
    #[serde(rename = "period-seconds")]
    #[serde(default = "default_gc_period")]
    pub period_seconds: u64,
}

impl Config {
    /// Resolves the database URL, defaulting to SQLite under the data
    /// dir.
    pub fn database_url(&self) -> String {
        match &self.database.url {
            Some(url) => url.clone(),
            None => format!(
                "sqlite://{}?mode=rwc",
                self.data_dir.join("dagpool.db").display()
            ),
        }
    }

    pub fn gc_period(&self) -> Duration {
        Duration::from_secs(self.garbage_collection.period_seconds)
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            listen: default_listen_address(),
            data_dir: default_data_dir(),
            root_user: default_root_user(),
            root_password: default_root_user(),
            database: Default::default(),
            garbage_collection: Default::default(),
            dag_nodes: Vec::new(),
        }
    }
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self { url: None }
    }
}

impl Default for GarbageCollectionConfig {
    fn default() -> Self {
        Self {
            period_seconds: default_gc_period(),
        }
    }
}

fn default_listen_address() -> SocketAddr {
    "127.0.0.1:50001".parse().unwrap()
}

fn default_data_dir() -> PathBuf {
    PathBuf::from("./dp-data")
}

fn default_root_user() -> String {
    "dagpool".to_string()
}

fn default_gc_period() -> u64 {
    3600
}

/// Loads the configuration from a TOML file.
pub fn load_config_from_path(path: &Path) -> ServerResult<Config> {
    let contents = std::fs::read_to_string(path).map_err(ServerError::storage_error)?;
    load_config_from_str(&contents)
}

/// Loads the configuration from a TOML string.
pub fn load_config_from_str(contents: &str) -> ServerResult<Config> {
    let mut config: Config = toml::from_str(contents).map_err(ServerError::storage_error)?;
    apply_env_overrides(&mut config);
    Ok(config)
}

/// Applies `DAGPOOL_ROOT_USER` / `DAGPOOL_ROOT_PASSWORD`.
pub fn apply_env_overrides(config: &mut Config) {
    if let Ok(user) = std::env::var(ENV_ROOT_USER) {
        if !user.is_empty() {
            config.root_user = user;
        }
    }
    if let Ok(password) = std::env::var(ENV_ROOT_PASSWORD) {
        if !password.is_empty() {
            config.root_password = password;
        }
    }
}
