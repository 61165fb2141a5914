//! Prediction options and engine configuration
//!
//! [`PredictOptions`] is what every engine call receives. [`EngineConfig`]
//! carries the default options plus logging settings, loaded from a TOML file
//! and then overridden from `LOCALPRED_*` environment variables.

use crate::ensemble::CombinationMethod;
use crate::errors::{PredictError, Result};
use crate::tree::MissingStrategy;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::path::Path;
use std::str::FromStr;
use tracing::info;

/// Environment variable names read by [`EngineConfig::apply_env`]
pub const ENV_BY_NAME: &str = "LOCALPRED_BY_NAME";
pub const ENV_STRATEGY: &str = "LOCALPRED_STRATEGY";
pub const ENV_METHOD: &str = "LOCALPRED_METHOD";
pub const ENV_MULTIPLE: &str = "LOCALPRED_MULTIPLE";
pub const ENV_LOG_LEVEL: &str = "LOCALPRED_LOG_LEVEL";

/// Number of categories returned in multiple-output mode
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(try_from = "Value", into = "Value")]
pub enum Multiple {
    /// Single prediction (`0`)
    #[default]
    Off,
    /// At most this many categories
    Top(usize),
    /// Every category of the distribution
    All,
}

impl Multiple {
    pub fn is_off(self) -> bool {
        self == Multiple::Off
    }

    /// Maximum number of entries, `None` meaning unlimited
    pub fn limit(self) -> Option<usize> {
        match self {
            Multiple::Off => Some(0),
            Multiple::Top(n) => Some(n),
            Multiple::All => None,
        }
    }
}

impl FromStr for Multiple {
    type Err = PredictError;

    fn from_str(text: &str) -> Result<Self> {
        match text.trim().to_ascii_lowercase().as_str() {
            "all" | "unlimited" => Ok(Multiple::All),
            other => other
                .parse::<usize>()
                .map(Multiple::from)
                .map_err(|_| PredictError::invalid_option(format!("invalid multiple {text:?}"))),
        }
    }
}

impl From<usize> for Multiple {
    fn from(n: usize) -> Self {
        if n == 0 {
            Multiple::Off
        } else {
            Multiple::Top(n)
        }
    }
}

impl TryFrom<Value> for Multiple {
    type Error = PredictError;

    fn try_from(value: Value) -> Result<Self> {
        match &value {
            Value::Number(n) => n
                .as_u64()
                .map(|n| Multiple::from(n as usize))
                .ok_or_else(|| PredictError::invalid_option(format!("invalid multiple {n}"))),
            Value::String(s) => s.parse(),
            Value::Null => Ok(Multiple::Off),
            other => Err(PredictError::invalid_option(format!("invalid multiple {other}"))),
        }
    }
}

impl From<Multiple> for Value {
    fn from(multiple: Multiple) -> Self {
        match multiple {
            Multiple::Off => Value::from(0),
            Multiple::Top(n) => Value::from(n),
            Multiple::All => Value::from("all"),
        }
    }
}

/// Per-call options shared by every engine
///
/// Keys are accepted in snake_case or camelCase.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct PredictOptions {
    /// Input keys are field names rather than ids
    #[serde(alias = "byName")]
    pub by_name: bool,
    /// Missing-value strategy; ensembles fall back to their own default when unset
    #[serde(alias = "missing_strategy", alias = "missingStrategy")]
    pub strategy: Option<MissingStrategy>,
    pub multiple: Multiple,
    /// Vote combination method; ensembles fall back to their own default when unset
    pub method: Option<CombinationMethod>,
    pub threshold: Option<u32>,
    pub category: Option<String>,
    #[serde(alias = "addConfidence")]
    pub add_confidence: bool,
    #[serde(alias = "addDistribution")]
    pub add_distribution: bool,
    #[serde(alias = "addCount")]
    pub add_count: bool,
    #[serde(alias = "addMedian")]
    pub add_median: bool,
    #[serde(alias = "addMin")]
    pub add_min: bool,
    #[serde(alias = "addMax")]
    pub add_max: bool,
    /// Reject input keys that do not resolve to a field
    pub strict: bool,
}

impl PredictOptions {
    /// Parse options from a JSON object
    pub fn from_json(value: &Value) -> Result<Self> {
        let options: PredictOptions = serde_json::from_value(value.clone())
            .map_err(|e| PredictError::invalid_option(e.to_string()))?;
        options.validate()?;
        Ok(options)
    }

    pub fn validate(&self) -> Result<()> {
        if self.threshold == Some(0) {
            return Err(PredictError::invalid_option("threshold must be at least 1"));
        }
        if self.method == Some(CombinationMethod::Threshold) {
            if self.threshold.is_none() {
                return Err(PredictError::invalid_option(
                    "threshold method requires a threshold",
                ));
            }
            if self.category.is_none() {
                return Err(PredictError::invalid_option(
                    "threshold method requires a category",
                ));
            }
        }
        Ok(())
    }

    /// Strategy in effect, given a resource default
    pub fn strategy_or(&self, default: MissingStrategy) -> MissingStrategy {
        self.strategy.unwrap_or(default)
    }
}

/// Logging configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Log level or `EnvFilter` directive
    pub level: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
        }
    }
}

/// Engine configuration file
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    pub defaults: PredictOptions,
    pub logging: LoggingConfig,
}

impl EngineConfig {
    /// Load configuration from a TOML file
    pub fn load_from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        info!("Loading configuration from: {}", path.display());

        let content = std::fs::read_to_string(path)?;
        let config = Self::from_toml_str(&content)?;

        info!("Configuration loaded successfully");
        Ok(config)
    }

    pub fn from_toml_str(content: &str) -> Result<Self> {
        let config: EngineConfig = toml::from_str(content)
            .map_err(|e| PredictError::Config(format!("Failed to parse config: {e}")))?;
        config.defaults.validate()?;
        Ok(config)
    }

    /// Override values from `LOCALPRED_*` environment variables
    pub fn apply_env(&mut self) -> Result<()> {
        self.apply_overrides(|key| std::env::var(key).ok())
    }

    /// Override values from any key lookup using the environment variable names
    pub fn apply_overrides<F>(&mut self, lookup: F) -> Result<()>
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(val) = lookup(ENV_BY_NAME) {
            self.defaults.by_name = parse_flag(ENV_BY_NAME, &val)?;
        }
        if let Some(val) = lookup(ENV_STRATEGY) {
            self.defaults.strategy = Some(val.parse()?);
        }
        if let Some(val) = lookup(ENV_METHOD) {
            self.defaults.method = Some(val.parse()?);
        }
        if let Some(val) = lookup(ENV_MULTIPLE) {
            self.defaults.multiple = val.parse()?;
        }
        if let Some(val) = lookup(ENV_LOG_LEVEL) {
            self.logging.level = val;
        }
        self.defaults.validate()
    }
}

fn parse_flag(key: &str, value: &str) -> Result<bool> {
    match value.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Ok(true),
        "0" | "false" | "no" | "off" | "" => Ok(false),
        other => Err(PredictError::invalid_option(format!(
            "{key} expects a boolean, found {other:?}"
        ))),
    }
}
