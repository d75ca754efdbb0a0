/// Engine configuration
///
/// All knobs of the resilience engine live here. Configuration is layered:
/// built-in defaults, then an optional file (TOML, YAML or JSON, inferred from
/// the extension), then `RESILIENCE__*` environment variables, e.g.
/// `RESILIENCE__RETRY__MAX_ATTEMPTS=5` or `RESILIENCE__RETRY__BASE_DELAY=250ms`.
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;

/// Environment variable prefix for overrides
pub const ENV_PREFIX: &str = "RESILIENCE";

/// Default configuration file name inside the platform config directory
pub const DEFAULT_CONFIG_FILE: &str = "engine.toml";

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Failed to load configuration: {0}")]
    Load(#[from] config::ConfigError),

    #[error("Invalid configuration: {0}")]
    Invalid(String),
}

/// Retry scheduling parameters
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RetryPolicy {
    /// Attempts allowed before recovery is considered (including the first)
    pub max_attempts: u32,

    /// Delay before the second attempt
    #[serde(with = "humantime_serde")]
    pub base_delay: Duration,

    /// Cap on any single delay (before jitter)
    #[serde(with = "humantime_serde")]
    pub max_delay: Duration,

    /// Growth factor between consecutive delays
    pub backoff_multiplier: f64,

    /// Multiply each delay by a uniform factor in [0.5, 1.5]
    pub jitter_enabled: bool,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            base_delay: Duration::from_secs(1),
            max_delay: Duration::from_secs(30),
            backoff_multiplier: 2.0,
            jitter_enabled: true,
        }
    }
}

/// How long sealed reports are kept in memory
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RetentionPolicy {
    /// Maximum number of sealed reports
    pub max_reports: usize,

    /// Maximum age of a sealed report (none = count-bounded only)
    #[serde(with = "humantime_serde")]
    pub max_age: Option<Duration>,
}

impl Default for RetentionPolicy {
    fn default() -> Self {
        Self {
            max_reports: 10_000,
            max_age: None,
        }
    }
}

/// Failure pattern detection over recent reports
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PatternConfig {
    /// A category is flagged when its failure count exceeds this value
    pub threshold: usize,

    /// Window the count is taken over
    #[serde(with = "humantime_serde")]
    pub window: Duration,
}

impl Default for PatternConfig {
    fn default() -> Self {
        Self {
            threshold: 10,
            window: Duration::from_secs(300),
        }
    }
}

/// Complete engine configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    pub retry: RetryPolicy,

    /// Timeout applied to every single call of the wrapped operation
    #[serde(with = "humantime_serde")]
    pub attempt_timeout: Option<Duration>,

    /// How often suspended operations check their cancellation flag
    #[serde(with = "humantime_serde")]
    pub poll_interval: Duration,

    /// Per-operation cap for strategies marked retryable within recovery
    pub max_strategy_attempts: u32,

    pub retention: RetentionPolicy,

    pub patterns: PatternConfig,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            retry: RetryPolicy::default(),
            attempt_timeout: Some(Duration::from_secs(30)),
            poll_interval: Duration::from_millis(50),
            max_strategy_attempts: 2,
            retention: RetentionPolicy::default(),
            patterns: PatternConfig::default(),
        }
    }
}

impl EngineConfig {
    /// Default configuration file location for this platform, if one can be determined
    pub fn default_path() -> Option<PathBuf> {
        directories::ProjectDirs::from("org", "registry", "registry-resilience")
            .map(|dirs| dirs.config_dir().join(DEFAULT_CONFIG_FILE))
    }

    /// Load configuration from defaults, an optional file and the environment
    ///
    /// An explicitly given `path` must exist; the default path is optional.
    pub fn load(path: Option<&Path>) -> Result<Self, ConfigError> {
        let mut builder = config::Config::builder();

        match path {
            Some(path) => {
                builder = builder.add_source(config::File::from(path).required(true));
            }
            None => {
                if let Some(default) = Self::default_path() {
                    builder = builder.add_source(config::File::from(default).required(false));
                }
            }
        }

        builder = builder.add_source(
            config::Environment::with_prefix(ENV_PREFIX)
                .separator("__")
                .try_parsing(true),
        );

        let config: EngineConfig = builder.build()?.try_deserialize()?;
        config.validate()?;

        tracing::debug!(
            max_attempts = config.retry.max_attempts,
            base_delay = %humantime::format_duration(config.retry.base_delay),
            max_delay = %humantime::format_duration(config.retry.max_delay),
            jitter = config.retry.jitter_enabled,
            "Engine configuration loaded"
        );

        Ok(config)
    }

    /// Check cross-field constraints
    pub fn validate(&self) -> Result<(), ConfigError> {
        let retry = &self.retry;

        if retry.max_attempts == 0 {
            return Err(ConfigError::Invalid(
                "retry.max_attempts must be at least 1".to_string(),
            ));
        }

        if !retry.backoff_multiplier.is_finite() || retry.backoff_multiplier < 1.0 {
            return Err(ConfigError::Invalid(format!(
                "retry.backoff_multiplier must be a finite value >= 1.0 (got {})",
                retry.backoff_multiplier
            )));
        }

        if retry.base_delay > retry.max_delay {
            return Err(ConfigError::Invalid(format!(
                "retry.base_delay ({}) exceeds retry.max_delay ({})",
                humantime::format_duration(retry.base_delay),
                humantime::format_duration(retry.max_delay)
            )));
        }

        if self.poll_interval.is_zero() {
            return Err(ConfigError::Invalid(
                "poll_interval must be non-zero".to_string(),
            ));
        }

        if matches!(self.attempt_timeout, Some(t) if t.is_zero()) {
            return Err(ConfigError::Invalid(
                "attempt_timeout must be non-zero when set".to_string(),
            ));
        }

        if self.retention.max_reports == 0 {
            return Err(ConfigError::Invalid(
                "retention.max_reports must be at least 1".to_string(),
            ));
        }

        Ok(())
    }

    /// Preset with millisecond delays and no jitter, for tests and simulations
    pub fn fast() -> Self {
        Self {
            retry: RetryPolicy {
                max_attempts: 3,
                base_delay: Duration::from_millis(1),
                max_delay: Duration::from_millis(20),
                backoff_multiplier: 2.0,
                jitter_enabled: false,
            },
            attempt_timeout: Some(Duration::from_secs(5)),
            poll_interval: Duration::from_millis(5),
            ..Self::default()
        }
    }
}
