use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("failed to read config file: {0}")]
    Io(#[from] std::io::Error),
    #[error("failed to parse config: {0}")]
    Parse(#[from] toml::de::Error),
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub api: ApiConfig,
    #[serde(default)]
    pub endpoints: EndpointsConfig,
    #[serde(default)]
    pub poll: PollConfig,
    #[serde(default)]
    pub storage: StorageConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ApiConfig {
    /// Panel backend base URL - env WO_API_BASE
    #[serde(default = "default_base_url")]
    pub base_url: String,
    /// Header carrying the session token - env WO_AUTH_HEADER
    #[serde(default = "default_auth_header")]
    pub auth_header: String,
    /// Per-request timeout in milliseconds.
    #[serde(default = "default_timeout_ms")]
    pub timeout_ms: u64,
    #[serde(default = "default_login_path")]
    pub login_path: String,
    #[serde(default = "default_register_path")]
    pub register_path: String,
    #[serde(default = "default_health_path")]
    pub health_path: String,
}

/// Paths of one collection's endpoints.
#[derive(Debug, Clone, Deserialize)]
pub struct EndpointConfig {
    pub list: String,
    pub create: String,
    pub update: String,
    pub delete: String,
    #[serde(default)]
    pub enable: Option<String>,
    #[serde(default)]
    pub disable: Option<String>,
    /// Treat an empty remote list as "no data" and show the snapshot instead.
    #[serde(default)]
    pub empty_list_uses_fallback: bool,
}

#[derive(Debug, Clone, Deserialize)]
pub struct EndpointsConfig {
    #[serde(default = "default_client_endpoints")]
    pub clients: EndpointConfig,
    #[serde(default = "default_group_endpoints")]
    pub groups: EndpointConfig,
    #[serde(default = "default_copy_setup_endpoints")]
    pub copy_setups: EndpointConfig,
    #[serde(default)]
    pub reports: ReportEndpointsConfig,
}

/// List paths of the read-only dashboard collections.
#[derive(Debug, Clone, Deserialize)]
pub struct ReportEndpointsConfig {
    #[serde(default = "default_orders_path")]
    pub orders: String,
    #[serde(default = "default_positions_path")]
    pub positions: String,
    #[serde(default = "default_holdings_path")]
    pub holdings: String,
    #[serde(default = "default_summary_path")]
    pub summary: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct PollConfig {
    /// Fixed delay between session polls.
    #[serde(default = "default_poll_interval_ms")]
    pub interval_ms: u64,
    /// Hard cap on poll attempts.
    #[serde(default = "default_poll_max_attempts")]
    pub max_attempts: u32,
}

#[derive(Debug, Clone, Deserialize)]
pub struct StorageConfig {
    /// Directory for session and fallback files - env WO_DATA_DIR
    #[serde(default = "default_data_dir")]
    pub dir: PathBuf,
    /// Key namespace inside the directory.
    #[serde(default = "default_prefix")]
    pub prefix: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct LoggingConfig {
    #[serde(default = "default_log_level")]
    pub level: String,
    #[serde(default)]
    pub json: bool,
}

fn default_base_url() -> String {
    "http://127.0.0.1:5001".to_string()
}
fn default_auth_header() -> String {
    "X-Auth-Token".to_string()
}
fn default_timeout_ms() -> u64 {
    15_000
}
fn default_login_path() -> String {
    "/users/login".to_string()
}
fn default_register_path() -> String {
    "/users/register".to_string()
}
fn default_health_path() -> String {
    "/health".to_string()
}
fn default_poll_interval_ms() -> u64 {
    3000
}
fn default_poll_max_attempts() -> u32 {
    20
}
fn default_orders_path() -> String {
    "/get_orders".to_string()
}
fn default_positions_path() -> String {
    "/get_positions".to_string()
}
fn default_holdings_path() -> String {
    "/get_holdings".to_string()
}
fn default_summary_path() -> String {
    "/get_summary".to_string()
}
fn default_data_dir() -> PathBuf {
    PathBuf::from(".wealth-ocean")
}
fn default_prefix() -> String {
    "wo".to_string()
}
fn default_log_level() -> String {
    "info".to_string()
}

fn endpoints(list: &str, item: &str) -> EndpointConfig {
    EndpointConfig {
        list: format!("/{}", list),
        create: format!("/add_{}", item),
        update: format!("/edit_{}", item),
        delete: format!("/delete_{}s", item),
        enable: None,
        disable: None,
        empty_list_uses_fallback: false,
    }
}

fn default_client_endpoints() -> EndpointConfig {
    endpoints("get_clients", "client")
}
fn default_group_endpoints() -> EndpointConfig {
    EndpointConfig {
        empty_list_uses_fallback: true,
        ..endpoints("groups", "group")
    }
}
fn default_copy_setup_endpoints() -> EndpointConfig {
    EndpointConfig {
        create: "/set_copy_setup".to_string(),
        enable: Some("/enable_copy_setup".to_string()),
        disable: Some("/disable_copy_setup".to_string()),
        ..endpoints("copy_setups", "copy_setup")
    }
}

impl Default for ApiConfig {
    fn default() -> Self {
        Self {
            base_url: default_base_url(),
            auth_header: default_auth_header(),
            timeout_ms: default_timeout_ms(),
            login_path: default_login_path(),
            register_path: default_register_path(),
            health_path: default_health_path(),
        }
    }
}

impl Default for EndpointsConfig {
    fn default() -> Self {
        Self {
            clients: default_client_endpoints(),
            groups: default_group_endpoints(),
            copy_setups: default_copy_setup_endpoints(),
            reports: ReportEndpointsConfig::default(),
        }
    }
}

impl Default for ReportEndpointsConfig {
    fn default() -> Self {
        Self {
            orders: default_orders_path(),
            positions: default_positions_path(),
            holdings: default_holdings_path(),
            summary: default_summary_path(),
        }
    }
}

impl Default for PollConfig {
    fn default() -> Self {
        Self {
            interval_ms: default_poll_interval_ms(),
            max_attempts: default_poll_max_attempts(),
        }
    }
}

impl PollConfig {
    pub fn interval(&self) -> Duration {
        Duration::from_millis(self.interval_ms)
    }
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            dir: default_data_dir(),
            prefix: default_prefix(),
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            json: false,
        }
    }
}

impl Config {
    /// Load config from a TOML file, then overlay environment variables.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let contents = std::fs::read_to_string(path)?;
        let mut config: Config = toml::from_str(&contents)?;
        config.apply_env();
        Ok(config)
    }

    /// Defaults plus environment overrides (no file needed).
    pub fn from_env() -> Self {
        let mut config = Config::default();
        config.apply_env();
        config
    }

    fn apply_env(&mut self) {
        if let Ok(url) = std::env::var("WO_API_BASE") {
            self.api.base_url = url;
        }
        if let Ok(header) = std::env::var("WO_AUTH_HEADER") {
            self.api.auth_header = header;
        }
        if let Ok(dir) = std::env::var("WO_DATA_DIR") {
            self.storage.dir = PathBuf::from(dir);
        }
    }
}
