//! Configuration loading and data directory resolution

use std::path::{Path, PathBuf};

use serde::Deserialize;

use crate::{Error, Result};

/// Resolve the data directory with the standard priority order:
/// 1. Command-line argument (highest priority)
/// 2. `YIBA_DATA_DIR` environment variable
/// 3. `data_dir` key in the platform config file
/// 4. OS-dependent compiled default (fallback)
pub fn resolve_data_dir(cli_arg: Option<&str>) -> PathBuf {
    if let Some(path) = cli_arg {
        return PathBuf::from(path);
    }

    if let Ok(path) = std::env::var("YIBA_DATA_DIR") {
        return PathBuf::from(path);
    }

    if let Some(config_path) = platform_config_file() {
        if let Ok(toml_content) = std::fs::read_to_string(&config_path) {
            if let Ok(value) = toml::from_str::<toml::Value>(&toml_content) {
                if let Some(dir) = value.get("data_dir").and_then(|v| v.as_str()) {
                    return PathBuf::from(dir);
                }
            }
        }
    }

    default_data_dir()
}

fn platform_config_file() -> Option<PathBuf> {
    let user_config = dirs::config_dir().map(|d| d.join("yiba").join("config.toml"));
    if let Some(path) = &user_config {
        if path.exists() {
            return user_config;
        }
    }
    let system_config = PathBuf::from("/etc/yiba/config.toml");
    if system_config.exists() {
        return Some(system_config);
    }
    None
}

fn default_data_dir() -> PathBuf {
    dirs::data_local_dir()
        .map(|d| d.join("yiba"))
        .unwrap_or_else(|| PathBuf::from("./yiba_data"))
}

/// SQLite database location under the data directory
pub fn database_path(data_dir: &Path) -> PathBuf {
    data_dir.join("yiba.db")
}

/// Full application configuration, loaded from `<data_dir>/config.toml`.
/// Every field has a development-friendly default so a missing file is a
/// valid zero-config startup.
#[derive(Debug, Clone, Deserialize, Default)]
pub struct AppConfig {
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub storage: StorageConfig,
    #[serde(default)]
    pub mailer: MailerConfig,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ServerConfig {
    #[serde(default = "default_bind")]
    pub bind: String,
    #[serde(default = "default_port")]
    pub port: u16,
    /// Honors the `x-dev-actor` bypass header. Must stay false outside
    /// development.
    #[serde(default)]
    pub dev_bypass: bool,
    #[serde(default = "default_session_ttl")]
    pub session_ttl_seconds: i64,
    /// Requests per window for the public lead endpoint
    #[serde(default = "default_rate_limit")]
    pub lead_rate_limit: u32,
    #[serde(default = "default_rate_window")]
    pub lead_rate_window_seconds: u64,
    /// Maximum accepted document upload size
    #[serde(default = "default_max_upload")]
    pub max_upload_bytes: usize,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind: default_bind(),
            port: default_port(),
            dev_bypass: false,
            session_ttl_seconds: default_session_ttl(),
            lead_rate_limit: default_rate_limit(),
            lead_rate_window_seconds: default_rate_window(),
            max_upload_bytes: default_max_upload(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "backend", rename_all = "lowercase")]
pub enum StorageConfig {
    /// Files under `<data_dir>/documents` (development)
    Local,
    /// S3-compatible object store (production)
    S3 {
        endpoint: String,
        bucket: String,
        region: String,
        access_key: String,
        secret_key: String,
    },
}

impl Default for StorageConfig {
    fn default() -> Self {
        StorageConfig::Local
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "provider", rename_all = "lowercase")]
pub enum MailerProvider {
    /// Log-only delivery for development
    Log,
    /// JSON HTTP delivery API
    Http { endpoint: String, api_key: String },
}

impl Default for MailerProvider {
    fn default() -> Self {
        MailerProvider::Log
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct MailerConfig {
    #[serde(default, flatten)]
    pub provider: MailerProvider,
    #[serde(default = "default_from")]
    pub from_address: String,
    /// At most this many queue rows are claimed per drain invocation
    #[serde(default = "default_batch")]
    pub batch_size: i64,
    /// Attempts cap before a row moves to terminal FAILED
    #[serde(default = "default_attempts")]
    pub max_attempts: i64,
    #[serde(default = "default_interval")]
    pub interval_seconds: u64,
}

impl Default for MailerConfig {
    fn default() -> Self {
        Self {
            provider: MailerProvider::Log,
            from_address: default_from(),
            batch_size: default_batch(),
            max_attempts: default_attempts(),
            interval_seconds: default_interval(),
        }
    }
}

fn default_bind() -> String {
    "127.0.0.1".to_string()
}
fn default_port() -> u16 {
    5780
}
fn default_session_ttl() -> i64 {
    8 * 60 * 60
}
fn default_rate_limit() -> u32 {
    10
}
fn default_rate_window() -> u64 {
    60
}
fn default_max_upload() -> usize {
    20 * 1024 * 1024
}
fn default_from() -> String {
    "no-reply@yibaverified.co.za".to_string()
}
fn default_batch() -> i64 {
    25
}
fn default_attempts() -> i64 {
    3
}
fn default_interval() -> u64 {
    60
}

/// Load `<data_dir>/config.toml`, falling back to defaults when absent
pub fn load_config(data_dir: &Path) -> Result<AppConfig> {
    let path = data_dir.join("config.toml");
    if !path.exists() {
        return Ok(AppConfig::default());
    }
    let content = std::fs::read_to_string(&path)?;
    toml::from_str(&content).map_err(|e| Error::Config(format!("{}: {}", path.display(), e)))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_without_config_file() {
        let dir = tempfile::tempdir().unwrap();
        let config = load_config(dir.path()).unwrap();
        assert_eq!(config.server.port, 5780);
        assert!(!config.server.dev_bypass);
        assert!(matches!(config.storage, StorageConfig::Local));
        assert!(matches!(config.mailer.provider, MailerProvider::Log));
        assert_eq!(config.mailer.max_attempts, 3);
    }

    #[test]
    fn test_load_config_file() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(
            dir.path().join("config.toml"),
            r#"
[server]
port = 6000
dev_bypass = true

[storage]
backend = "s3"
endpoint = "https://s3.example.test"
bucket = "yiba-docs"
region = "af-south-1"
access_key = "AK"
secret_key = "SK"

[mailer]
provider = "http"
endpoint = "https://mail.example.test/send"
api_key = "key"
batch_size = 5
"#,
        )
        .unwrap();

        let config = load_config(dir.path()).unwrap();
        assert_eq!(config.server.port, 6000);
        assert!(config.server.dev_bypass);
        assert!(matches!(config.storage, StorageConfig::S3 { .. }));
        assert_eq!(config.mailer.batch_size, 5);
        match &config.mailer.provider {
            MailerProvider::Http { endpoint, .. } => {
                assert_eq!(endpoint, "https://mail.example.test/send")
            }
            other => panic!("unexpected provider: {:?}", other),
        }
    }

    #[test]
    fn test_invalid_config_rejected() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("config.toml"), "server = 5").unwrap();
        assert!(load_config(dir.path()).is_err());
    }

    #[test]
    fn test_cli_arg_wins() {
        let dir = resolve_data_dir(Some("/tmp/yiba-test"));
        assert_eq!(dir, PathBuf::from("/tmp/yiba-test"));
    }
}
