use anyhow::{Context, Result};
use rust_decimal::Decimal;
use serde::Deserialize;
use std::path::{Path, PathBuf};
use tracing::info;

#[derive(Debug, Clone, Default, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub auth: AuthConfig,
    #[serde(default)]
    pub cart: CartConfig,
    #[serde(default)]
    pub cache: CacheConfig,
    #[serde(default)]
    pub analytics: AnalyticsConfig,
    #[serde(default)]
    pub maintenance: MaintenanceConfig,
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
    /// Lifetime of a login session and its cookie
    #[serde(default = "default_session_days")]
    pub session_days: i64,
    #[serde(default = "default_cookie_name")]
    pub cookie_name: String,
    /// Mark auth cookies `Secure` (enable behind HTTPS)
    #[serde(default)]
    pub secure_cookies: bool,
    /// Bootstrap administrator, created at startup when missing
    pub admin_email: Option<String>,
    pub admin_password: Option<String>,
}

impl Default for AuthConfig {
    fn default() -> Self {
        Self {
            session_days: default_session_days(),
            cookie_name: default_cookie_name(),
            secure_cookies: false,
            admin_email: None,
            admin_password: None,
        }
    }
}

fn default_session_days() -> i64 {
    7
}

fn default_cookie_name() -> String {
    "auth_token".to_string()
}

#[derive(Debug, Clone, Deserialize)]
pub struct CartConfig {
    /// Tax rate applied to the cart subtotal (0.10 = 10%)
    #[serde(default = "default_tax_rate")]
    pub tax_rate: Decimal,
    /// Hours after creation before an untouched active cart expires
    #[serde(default = "default_expiry_hours")]
    pub expiry_hours: i64,
    /// Cookie carrying the guest cart identity
    #[serde(default = "default_session_cookie")]
    pub session_cookie: String,
}

impl Default for CartConfig {
    fn default() -> Self {
        Self {
            tax_rate: default_tax_rate(),
            expiry_hours: default_expiry_hours(),
            session_cookie: default_session_cookie(),
        }
    }
}

fn default_tax_rate() -> Decimal {
    Decimal::new(10, 2)
}

fn default_expiry_hours() -> i64 {
    72
}

fn default_session_cookie() -> String {
    "cart_session_id".to_string()
}

#[derive(Debug, Clone, Deserialize)]
pub struct CacheConfig {
    /// Seconds a cached query result is served without refetching
    #[serde(default = "default_fresh_secs")]
    pub fresh_secs: u64,
    /// Seconds before a cached result is dropped entirely
    #[serde(default = "default_retain_secs")]
    pub retain_secs: u64,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            fresh_secs: default_fresh_secs(),
            retain_secs: default_retain_secs(),
        }
    }
}

fn default_fresh_secs() -> u64 {
    300
}

fn default_retain_secs() -> u64 {
    600
}

#[derive(Debug, Clone, Deserialize)]
pub struct AnalyticsConfig {
    #[serde(default = "default_analytics_days")]
    pub default_days: i64,
    #[serde(default = "default_analytics_max_days")]
    pub max_days: i64,
}

impl Default for AnalyticsConfig {
    fn default() -> Self {
        Self {
            default_days: default_analytics_days(),
            max_days: default_analytics_max_days(),
        }
    }
}

fn default_analytics_days() -> i64 {
    30
}

fn default_analytics_max_days() -> i64 {
    365
}

#[derive(Debug, Clone, Deserialize)]
pub struct MaintenanceConfig {
    #[serde(default = "default_maintenance_enabled")]
    pub enabled: bool,
    /// Interval between cart-expiry / cache-purge sweeps
    #[serde(default = "default_sweep_interval")]
    pub sweep_interval_secs: u64,
}

impl Default for MaintenanceConfig {
    fn default() -> Self {
        Self {
            enabled: default_maintenance_enabled(),
            sweep_interval_secs: default_sweep_interval(),
        }
    }
}

fn default_maintenance_enabled() -> bool {
    true
}

fn default_sweep_interval() -> u64 {
    300
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
            Self::from_toml(&content)
        } else {
            info!("No config file found, using defaults");
            Ok(Config::default())
        }
    }

    pub fn from_toml(content: &str) -> Result<Self> {
        toml::from_str(content).with_context(|| "Failed to parse configuration file")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = Config::default();
        assert_eq!(config.server.port, 8080);
        assert_eq!(config.auth.cookie_name, "auth_token");
        assert_eq!(config.auth.session_days, 7);
        assert_eq!(config.cart.tax_rate, Decimal::new(10, 2));
        assert_eq!(config.cache.fresh_secs, 300);
        assert_eq!(config.cache.retain_secs, 600);
    }

    #[test]
    fn test_partial_toml_keeps_section_defaults() {
        let config = Config::from_toml(
            r#"
            [server]
            port = 9000

            [cart]
            tax_rate = 0.2
            "#,
        )
        .unwrap();

        assert_eq!(config.server.port, 9000);
        assert_eq!(config.server.host, "0.0.0.0");
        assert_eq!(config.cart.tax_rate, Decimal::new(2, 1));
        assert_eq!(config.cart.expiry_hours, 72);
        assert_eq!(config.analytics.default_days, 30);
    }
}
