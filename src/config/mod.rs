use anyhow::{Context, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};
use tracing::info;

#[derive(Debug, Clone, Deserialize, Default)]
pub struct Config {
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub auth: AuthConfig,
    #[serde(default)]
    pub identity: IdentityConfig,
    #[serde(default)]
    pub email: EmailConfig,
    #[serde(default)]
    pub uploads: UploadConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ServerConfig {
    #[serde(default = "default_host")]
    pub host: String,
    #[serde(default = "default_port")]
    pub port: u16,
    #[serde(default = "default_data_dir")]
    pub data_dir: PathBuf,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
            data_dir: default_data_dir(),
        }
    }
}

fn default_host() -> String {
    "0.0.0.0".to_string()
}

fn default_port() -> u16 {
    8080
}

fn default_data_dir() -> PathBuf {
    PathBuf::from("./data")
}

#[derive(Debug, Clone, Deserialize)]
pub struct AuthConfig {
    /// Secret that keys session token hashes. A random value is generated
    /// when unset, which invalidates all sessions on restart.
    #[serde(default = "default_session_secret")]
    pub session_secret: String,
    #[serde(default = "default_admin_username")]
    pub admin_username: String,
    /// Initial admin password, used only when the admin account is created.
    pub admin_password: Option<String>,
    #[serde(default = "default_session_ttl_hours")]
    pub session_ttl_hours: i64,
}

impl Default for AuthConfig {
    fn default() -> Self {
        Self {
            session_secret: default_session_secret(),
            admin_username: default_admin_username(),
            admin_password: None,
            session_ttl_hours: default_session_ttl_hours(),
        }
    }
}

fn default_session_secret() -> String {
    // Generate a random secret if not provided
    format!("{}{}", uuid::Uuid::new_v4(), uuid::Uuid::new_v4())
}

fn default_admin_username() -> String {
    crate::db::DEFAULT_ADMIN_USERNAME.to_string()
}

fn default_session_ttl_hours() -> i64 {
    24
}

/// External identity provider endpoint. Authentication is disabled unless
/// both the endpoint and the API key are present.
#[derive(Debug, Clone, Deserialize, Default)]
pub struct IdentityConfig {
    pub endpoint: Option<String>,
    pub api_key: Option<String>,
    #[serde(default = "default_identity_timeout")]
    pub timeout_secs: u64,
}

fn default_identity_timeout() -> u64 {
    10
}

#[derive(Debug, Clone, Deserialize)]
pub struct EmailConfig {
    pub smtp_host: Option<String>,
    #[serde(default = "default_smtp_port")]
    pub smtp_port: u16,
    pub smtp_username: Option<String>,
    pub smtp_password: Option<String>,
    #[serde(default = "default_smtp_tls")]
    pub smtp_tls: bool,
    pub from_address: Option<String>,
    #[serde(default = "default_from_name")]
    pub from_name: String,
    /// Where contact-form messages are delivered; falls back to from_address.
    pub contact_recipient: Option<String>,
}

impl Default for EmailConfig {
    fn default() -> Self {
        Self {
            smtp_host: None,
            smtp_port: default_smtp_port(),
            smtp_username: None,
            smtp_password: None,
            smtp_tls: default_smtp_tls(),
            from_address: None,
            from_name: default_from_name(),
            contact_recipient: None,
        }
    }
}

impl EmailConfig {
    pub fn is_configured(&self) -> bool {
        self.smtp_host.is_some() && self.from_address.is_some()
    }
}

fn default_smtp_port() -> u16 {
    587
}

fn default_smtp_tls() -> bool {
    true
}

fn default_from_name() -> String {
    "Refundly".to_string()
}

#[derive(Debug, Clone, Deserialize)]
pub struct UploadConfig {
    #[serde(default = "default_max_upload_size")]
    pub max_size_bytes: u64,
}

impl Default for UploadConfig {
    fn default() -> Self {
        Self {
            max_size_bytes: default_max_upload_size(),
        }
    }
}

fn default_max_upload_size() -> u64 {
    crate::storage::DEFAULT_MAX_UPLOAD_SIZE_BYTES
}

#[derive(Debug, Clone, Deserialize)]
pub struct LoggingConfig {
    #[serde(default = "default_log_level")]
    pub level: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
        }
    }
}

fn default_log_level() -> String {
    "info".to_string()
}

impl Config {
    pub fn load(path: &Path) -> Result<Self> {
        if path.exists() {
            info!("Loading configuration from {}", path.display());
            let content = std::fs::read_to_string(path)
                .with_context(|| format!("Failed to read config file: {}", path.display()))?;
            let config: Config =
                toml::from_str(&content).with_context(|| "Failed to parse configuration file")?;
            Ok(config)
        } else {
            info!("No config file found, using defaults");
            Ok(Config::default())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_apply_when_sections_missing() {
        let config: Config = toml::from_str("").unwrap();
        assert_eq!(config.server.port, 8080);
        assert_eq!(config.auth.session_ttl_hours, 24);
        assert_eq!(config.uploads.max_size_bytes, 5 * 1024 * 1024);
        assert!(!config.email.is_configured());
        assert!(config.identity.endpoint.is_none());
    }

    #[test]
    fn partial_sections_keep_field_defaults() {
        let config: Config = toml::from_str(
            r#"
            [server]
            port = 3000

            [email]
            smtp_host = "smtp.example.com"
            from_address = "noreply@example.com"
            "#,
        )
        .unwrap();
        assert_eq!(config.server.port, 3000);
        assert_eq!(config.server.host, "0.0.0.0");
        assert_eq!(config.email.smtp_port, 587);
        assert!(config.email.is_configured());
    }

    #[test]
    fn generated_session_secret_is_long() {
        let config = Config::default();
        assert!(config.auth.session_secret.len() >= 32);
    }
}
