use serde::Deserialize;
use std::env;
use std::fs;
use std::path::Path;
use std::str::FromStr;

/// Application configuration
#[derive(Debug, Clone, Deserialize, Default)]
pub struct Config {
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub database: DatabaseConfig,
    #[serde(default)]
    pub storage: StorageConfig,
    #[serde(default)]
    pub quota: QuotaConfig,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ServerConfig {
    #[serde(default = "default_host")]
    pub host: String,
    #[serde(default = "default_port")]
    pub port: u16,
    #[serde(default = "default_max_upload_bytes")]
    pub max_upload_bytes: usize,
}

#[derive(Debug, Clone, Deserialize)]
pub struct DatabaseConfig {
    #[serde(default = "default_db_path")]
    pub path: String,
    #[serde(default = "default_max_connections")]
    pub max_connections: u32,
    /// How long a writer waits for the SQLite write lock
    #[serde(default = "default_busy_timeout")]
    pub busy_timeout_secs: u64,
}

/// Which blob store backs the content store
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StorageBackend {
    Local,
    Memory,
}

impl FromStr for StorageBackend {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "local" => Ok(StorageBackend::Local),
            "memory" => Ok(StorageBackend::Memory),
            other => Err(format!("unknown storage backend '{}'", other)),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct StorageConfig {
    #[serde(default = "default_backend")]
    pub backend: StorageBackend,
    #[serde(default = "default_local_path")]
    pub local_path: String,
    #[serde(default = "default_storage_timeout")]
    pub timeout_secs: u64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct QuotaConfig {
    /// Quota given to accounts provisioned on first request
    #[serde(default = "default_quota_bytes")]
    pub default_bytes: i64,
}

// Default values
fn default_host() -> String {
    "0.0.0.0".to_string()
}

fn default_port() -> u16 {
    1309
}

fn default_max_upload_bytes() -> usize {
    100 * 1024 * 1024
}

fn default_db_path() -> String {
    "data/filevault.db".to_string()
}

fn default_max_connections() -> u32 {
    5
}

fn default_busy_timeout() -> u64 {
    30
}

fn default_backend() -> StorageBackend {
    StorageBackend::Local
}

fn default_local_path() -> String {
    "data/blobs".to_string()
}

fn default_storage_timeout() -> u64 {
    30
}

fn default_quota_bytes() -> i64 {
    10 * 1024 * 1024
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
            max_upload_bytes: default_max_upload_bytes(),
        }
    }
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            path: default_db_path(),
            max_connections: default_max_connections(),
            busy_timeout_secs: default_busy_timeout(),
        }
    }
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            backend: default_backend(),
            local_path: default_local_path(),
            timeout_secs: default_storage_timeout(),
        }
    }
}

impl Default for QuotaConfig {
    fn default() -> Self {
        Self {
            default_bytes: default_quota_bytes(),
        }
    }
}

impl Config {
    /// Load configuration from file and environment variables
    pub fn load() -> anyhow::Result<Self> {
        let mut config = Self::load_from_file()?;
        config.apply_env_overrides();
        config.ensure_directories()?;
        tracing::info!(
            "Storage config: backend={:?}, local_path={}, timeout={}s",
            config.storage.backend,
            config.storage.local_path,
            config.storage.timeout_secs
        );
        Ok(config)
    }

    /// Load configuration from the first TOML file found
    fn load_from_file() -> anyhow::Result<Self> {
        let config_paths = [
            "filevault.toml",
            "config.toml",
            "data/filevault.toml",
            "data/config.toml",
        ];

        for path in config_paths {
            if Path::new(path).exists() {
                let content = fs::read_to_string(path)?;
                let config = Self::from_toml(&content)?;
                tracing::info!("Loaded configuration from {}", path);
                return Ok(config);
            }
        }

        tracing::info!("No configuration file found, using defaults");
        Ok(Config::default())
    }

    pub fn from_toml(content: &str) -> anyhow::Result<Self> {
        Ok(toml::from_str(content)?)
    }

    /// Apply environment variable overrides
    /// Format: FV_CONF_<SECTION>_<KEY>
    fn apply_env_overrides(&mut self) {
        self.apply_overrides(|key| env::var(key).ok());
    }

    fn apply_overrides(&mut self, lookup: impl Fn(&str) -> Option<String>) {
        // Server overrides
        if let Some(val) = lookup("FV_CONF_SERVER_HOST") {
            self.server.host = val;
        }
        if let Some(port) = lookup("FV_CONF_SERVER_PORT").and_then(|v| v.parse().ok()) {
            self.server.port = port;
        }
        if let Some(max) = lookup("FV_CONF_SERVER_MAX_UPLOAD_BYTES").and_then(|v| v.parse().ok()) {
            self.server.max_upload_bytes = max;
        }

        // Database overrides
        if let Some(val) = lookup("FV_CONF_DATABASE_PATH") {
            self.database.path = val;
        }
        if let Some(max) = lookup("FV_CONF_DATABASE_MAX_CONNECTIONS").and_then(|v| v.parse().ok()) {
            self.database.max_connections = max;
        }
        if let Some(secs) = lookup("FV_CONF_DATABASE_BUSY_TIMEOUT_SECS").and_then(|v| v.parse().ok()) {
            self.database.busy_timeout_secs = secs;
        }

        // Storage overrides
        if let Some(val) = lookup("FV_CONF_STORAGE_BACKEND") {
            match val.parse::<StorageBackend>() {
                Ok(backend) => self.storage.backend = backend,
                Err(e) => tracing::warn!("Ignoring FV_CONF_STORAGE_BACKEND: {}", e),
            }
        }
        if let Some(val) = lookup("FV_CONF_STORAGE_LOCAL_PATH") {
            self.storage.local_path = val;
        }
        if let Some(secs) = lookup("FV_CONF_STORAGE_TIMEOUT_SECS").and_then(|v| v.parse().ok()) {
            self.storage.timeout_secs = secs;
        }

        // Quota overrides
        if let Some(bytes) = lookup("FV_CONF_QUOTA_DEFAULT_BYTES").and_then(|v| v.parse().ok()) {
            self.quota.default_bytes = bytes;
        }
    }

    /// Ensure required directories exist
    fn ensure_directories(&self) -> anyhow::Result<()> {
        if let Some(parent) = Path::new(&self.database.path).parent() {
            fs::create_dir_all(parent)?;
        }

        if self.storage.backend == StorageBackend::Local {
            fs::create_dir_all(&self.storage.local_path)?;
        }

        Ok(())
    }
}
