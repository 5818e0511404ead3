use serde::{Deserialize, Serialize};
use std::fs;
use std::time::Duration;
use thiserror::Error;
use url::Url;

use crate::settlement::OutcomeMessages;
use crate::settlement::RedirectRepair;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to read config file {path}: {source}")]
    Io {
        path: String,
        source: std::io::Error,
    },

    #[error("Failed to parse config: {0}")]
    Parse(#[from] serde_yaml::Error),

    #[error("Invalid configuration: {0}")]
    Invalid(String),
}

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct AppConfig {
    pub log_level: String,
    pub log_dir: String,
    pub log_file: String,
    pub use_json: bool,
    pub rotation: String,
    /// Branch-level reconciliation detail (target `SETTLE`)
    pub enable_tracing: bool,
    pub api: ApiConfig,
    pub return_page: ReturnPageConfig,
    #[serde(default)]
    pub storage: StorageConfig,
    /// Localized outcome texts
    #[serde(default)]
    pub messages: OutcomeMessages,
}

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct ApiConfig {
    pub base_url: String,
    #[serde(default = "default_timeout_ms")]
    pub timeout_ms: u64,
}

fn default_timeout_ms() -> u64 {
    10_000
}

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct ReturnPageConfig {
    /// Origin the application is served from
    pub canonical_origin: String,
    #[serde(default = "default_return_path")]
    pub return_path: String,
    /// Origins that may wrongly serve the return page (backend, proxies)
    #[serde(default)]
    pub foreign_origins: Vec<String>,
    /// Old application origins that may appear in redirect markers
    #[serde(default)]
    pub stale_origins: Vec<String>,
    #[serde(default = "default_inspect_delay_ms")]
    pub inspect_delay_ms: u64,
}

fn default_return_path() -> String {
    "/payment/return".to_string()
}

fn default_inspect_delay_ms() -> u64 {
    1500
}

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct StorageConfig {
    pub session_dir: String,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            session_dir: "./data/sessions".to_string(),
        }
    }
}

impl AppConfig {
    /// Load `config/<env>.yaml`
    pub fn load(env: &str) -> Result<Self, ConfigError> {
        Self::from_file(&format!("config/{}.yaml", env))
    }

    pub fn from_file(path: &str) -> Result<Self, ConfigError> {
        let content = fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_string(),
            source,
        })?;
        Self::from_yaml(&content)
    }

    pub fn from_yaml(content: &str) -> Result<Self, ConfigError> {
        let config: AppConfig = serde_yaml::from_str(content)?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        self.api_base_url()?;
        self.canonical_origin()?;
        if !self.return_page.return_path.starts_with('/') {
            return Err(ConfigError::Invalid(format!(
                "return_path must start with '/': {}",
                self.return_page.return_path
            )));
        }
        for origin in self
            .return_page
            .foreign_origins
            .iter()
            .chain(&self.return_page.stale_origins)
        {
            parse_url("origin", origin)?;
        }
        Ok(())
    }

    pub fn api_base_url(&self) -> Result<Url, ConfigError> {
        parse_url("api.base_url", &self.api.base_url)
    }

    pub fn canonical_origin(&self) -> Result<Url, ConfigError> {
        parse_url("return_page.canonical_origin", &self.return_page.canonical_origin)
    }

    pub fn api_timeout(&self) -> Duration {
        Duration::from_millis(self.api.timeout_ms)
    }

    /// Build the origin mapping for cross-origin return repair
    pub fn redirect_repair(&self) -> Result<RedirectRepair, ConfigError> {
        Ok(
            RedirectRepair::new(self.canonical_origin()?, self.return_page.return_path.clone())
                .with_foreign_origins(&self.return_page.foreign_origins)
                .with_stale_origins(&self.return_page.stale_origins)
                .with_inspect_delay(Duration::from_millis(self.return_page.inspect_delay_ms)),
        )
    }
}

fn parse_url(field: &str, value: &str) -> Result<Url, ConfigError> {
    Url::parse(value).map_err(|e| ConfigError::Invalid(format!("{field}: {value} ({e})")))
}

#[cfg(test)]
mod tests {
    use super::*;

    const YAML: &str = r#"
log_level: "info"
log_dir: "./logs"
log_file: "swap-settlement.log"
use_json: false
rotation: "daily"
enable_tracing: true
api:
  base_url: "http://localhost:8080/api"
return_page:
  canonical_origin: "https://app.example.com"
  foreign_origins:
    - "https://api.example.com"
  stale_origins:
    - "http://localhost:3000"
messages:
  no_params: "Không tìm thấy thông tin thanh toán"
"#;

    #[test]
    fn test_config_deserialize_with_defaults() {
        let config = AppConfig::from_yaml(YAML).unwrap();

        assert_eq!(config.api.timeout_ms, 10_000);
        assert_eq!(config.return_page.return_path, "/payment/return");
        assert_eq!(config.return_page.inspect_delay_ms, 1500);
        assert_eq!(config.storage.session_dir, "./data/sessions");
        assert_eq!(config.messages.no_params, "Không tìm thấy thông tin thanh toán");
        // Unset messages keep the built-in text
        assert_eq!(config.messages.unsettled, "Payment failed or not yet finished");
    }

    #[test]
    fn test_redirect_repair_from_config() {
        let config = AppConfig::from_yaml(YAML).unwrap();
        let repair = config.redirect_repair().unwrap();
        let foreign = Url::parse("https://api.example.com/return?responseCode=00").unwrap();
        assert!(repair.is_foreign(&foreign));
        assert_eq!(repair.canonical_origin().host_str(), Some("app.example.com"));
    }

    #[test]
    fn test_invalid_return_path() {
        let yaml = YAML.replace(
            "  canonical_origin: \"https://app.example.com\"",
            "  canonical_origin: \"https://app.example.com\"\n  return_path: \"payment/return\"",
        );
        assert!(matches!(
            AppConfig::from_yaml(&yaml),
            Err(ConfigError::Invalid(_))
        ));
    }

    #[test]
    fn test_invalid_origin() {
        let yaml = YAML.replace("https://api.example.com", "not a url");
        assert!(matches!(
            AppConfig::from_yaml(&yaml),
            Err(ConfigError::Invalid(_))
        ));
    }
}
