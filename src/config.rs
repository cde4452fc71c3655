use std::path::Path;

use error_stack::{Report, ResultExt};
use serde::Deserialize;

use crate::auth::{ApiCredentials, env_credential};
use crate::error::ConfigError;
use crate::model::ExchangeKind;

fn default_log_level() -> String {
    "info".into()
}

fn default_log_format() -> String {
    "text".into()
}

fn default_data_dir() -> String {
    "./data".into()
}

fn default_true() -> bool {
    true
}

#[derive(Debug, Default, Deserialize)]
pub struct AppConfig {
    #[serde(default)]
    pub general: GeneralConfig,
    #[serde(default)]
    pub exchanges: Vec<ExchangeConfig>,
}

#[derive(Debug, Deserialize)]
pub struct GeneralConfig {
    #[serde(default = "default_log_level")]
    pub log_level: String,
    /// Accepted values: `"text"` | `"json"`
    #[serde(default = "default_log_format")]
    pub log_format: String,
    #[serde(default = "default_data_dir")]
    pub data_dir: String,
}

impl Default for GeneralConfig {
    fn default() -> Self {
        Self {
            log_level: default_log_level(),
            log_format: default_log_format(),
            data_dir: default_data_dir(),
        }
    }
}

#[derive(Debug, Deserialize)]
pub struct ExchangeConfig {
    pub name: String,
    #[serde(default = "default_true")]
    pub enabled: bool,
    /// Overrides the built-in API base URL when set.
    #[serde(default)]
    pub base_url: Option<String>,
}

/// Load and validate an `AppConfig` from a TOML file at `path`.
///
/// A missing file is not an error: every field has a default and the
/// exchange list falls back to both built-in exchanges.
pub fn load(path: &Path) -> Result<AppConfig, Report<ConfigError>> {
    if !path.exists() {
        return Ok(AppConfig::default());
    }

    let content = std::fs::read_to_string(path)
        .change_context(ConfigError::ReadFile)
        .attach_with(|| format!("path: {}", path.display()))?;

    let config: AppConfig = toml::from_str(&content).change_context(ConfigError::Parse {
        reason: "invalid TOML syntax or schema mismatch".into(),
    })?;

    validate(&config)?;

    Ok(config)
}

fn validate(config: &AppConfig) -> Result<(), Report<ConfigError>> {
    for exchange in &config.exchanges {
        if ExchangeKind::from_str(&exchange.name).is_none() {
            return Err(Report::new(ConfigError::Validation {
                field: format!("exchanges: unknown exchange name \"{}\"", exchange.name),
            }));
        }
    }

    if !matches!(config.general.log_format.as_str(), "text" | "json") {
        return Err(Report::new(ConfigError::Validation {
            field: format!(
                "general.log_format \"{}\" is not \"text\" or \"json\"",
                config.general.log_format
            ),
        }));
    }

    Ok(())
}

impl AppConfig {
    /// Whether `kind` is enabled. Exchanges not mentioned in the config are
    /// enabled by default.
    pub fn exchange_enabled(&self, kind: ExchangeKind) -> bool {
        self.exchanges
            .iter()
            .find(|e| e.name == kind.as_str())
            .map(|e| e.enabled)
            .unwrap_or(true)
    }

    /// Base URL override for `kind`, when configured.
    pub fn base_url_override(&self, kind: ExchangeKind) -> Option<&str> {
        self.exchanges
            .iter()
            .find(|e| e.name == kind.as_str())
            .and_then(|e| e.base_url.as_deref())
    }
}

/// Credentials for the exchange the CLI selected, sourced from the
/// environment. Only the selected exchange's variables are required, and a
/// missing or empty value fails before any request is signed.
#[derive(Debug)]
pub enum Credentials {
    Bingx(ApiCredentials),
    Gate { cookie: String },
}

pub fn load_credentials(kind: ExchangeKind) -> Result<Credentials, Report<ConfigError>> {
    match kind {
        ExchangeKind::Bingx => Ok(Credentials::Bingx(ApiCredentials::new(
            env_credential("BINGX_APIKEY")?,
            env_credential("BINGX_SECRETKEY")?,
        ))),
        ExchangeKind::Gate => Ok(Credentials::Gate {
            cookie: env_credential("GATE_COOKIES")?,
        }),
    }
}
