//! Runtime configuration for adjudication, DUR and prior authorization.
//!
//! There is no global configuration: callers build an `AdjudicationConfig`
//! and hand it to the engines they construct.

use std::path::Path;

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Configuration errors.
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Failed to parse config file: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("Failed to serialize config: {0}")]
    Serialize(#[from] toml::ser::Error),

    #[error("Invalid config value for {field}: {reason}")]
    Invalid { field: &'static str, reason: String },
}

pub type ConfigResult<T> = Result<T, ConfigError>;

/// Upper bound for every day-count setting (about ten years).
pub const MAX_CONFIG_DAYS: u32 = 3650;

/// Tunables for claim adjudication.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AdjudicationConfig {
    /// Percent of the previous supply that must be used before a refill
    #[serde(default = "default_early_refill_threshold_percent")]
    pub early_refill_threshold_percent: u8,

    /// How far back step therapy looks for prerequisite fills
    #[serde(default = "default_step_therapy_lookback_days")]
    pub step_therapy_lookback_days: u32,

    #[serde(default = "default_pa_default_duration_days")]
    pub pa_default_duration_days: u32,

    #[serde(default = "default_pa_partial_duration_days")]
    pub pa_partial_duration_days: u32,

    #[serde(default = "default_pa_emergency_duration_days")]
    pub pa_emergency_duration_days: u32,

    /// Days after a denial during which an appeal is accepted
    #[serde(default = "default_appeal_window_days")]
    pub appeal_window_days: u32,

    /// Reject claims whose Major DUR alerts were not overridden
    #[serde(default = "default_true")]
    pub enforce_dur: bool,

    /// Enforce formulary quantity, days-supply, age and gender limits
    #[serde(default = "default_true")]
    pub enforce_plan_limits: bool,
}

impl Default for AdjudicationConfig {
    fn default() -> Self {
        Self {
            early_refill_threshold_percent: default_early_refill_threshold_percent(),
            step_therapy_lookback_days: default_step_therapy_lookback_days(),
            pa_default_duration_days: default_pa_default_duration_days(),
            pa_partial_duration_days: default_pa_partial_duration_days(),
            pa_emergency_duration_days: default_pa_emergency_duration_days(),
            appeal_window_days: default_appeal_window_days(),
            enforce_dur: true,
            enforce_plan_limits: true,
        }
    }
}

fn default_early_refill_threshold_percent() -> u8 {
    80
}

fn default_step_therapy_lookback_days() -> u32 {
    365
}

fn default_pa_default_duration_days() -> u32 {
    365
}

fn default_pa_partial_duration_days() -> u32 {
    90
}

fn default_pa_emergency_duration_days() -> u32 {
    30
}

fn default_appeal_window_days() -> u32 {
    60
}

fn default_true() -> bool {
    true
}

impl AdjudicationConfig {
    pub fn new() -> Self {
        Self::default()
    }

    /// Load configuration from environment variables.
    ///
    /// Supported variables (unparseable values are ignored):
    /// - `RXADJ_EARLY_REFILL_THRESHOLD`: percent, 1-100
    /// - `RXADJ_STEP_THERAPY_LOOKBACK_DAYS`
    /// - `RXADJ_PA_DEFAULT_DURATION_DAYS`
    /// - `RXADJ_PA_PARTIAL_DURATION_DAYS`
    /// - `RXADJ_PA_EMERGENCY_DURATION_DAYS`
    /// - `RXADJ_APPEAL_WINDOW_DAYS`
    /// - `RXADJ_ENFORCE_DUR`: "true" or "false"
    /// - `RXADJ_ENFORCE_PLAN_LIMITS`: "true" or "false"
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Same as `from_env` with a caller-supplied variable source.
    pub fn from_lookup<F>(lookup: F) -> Self
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut config = Self::default();

        if let Some(v) = lookup("RXADJ_EARLY_REFILL_THRESHOLD").and_then(|v| v.trim().parse().ok()) {
            config.early_refill_threshold_percent = v;
        }
        if let Some(v) = lookup("RXADJ_STEP_THERAPY_LOOKBACK_DAYS").and_then(|v| v.trim().parse().ok()) {
            config.step_therapy_lookback_days = v;
        }
        if let Some(v) = lookup("RXADJ_PA_DEFAULT_DURATION_DAYS").and_then(|v| v.trim().parse().ok()) {
            config.pa_default_duration_days = v;
        }
        if let Some(v) = lookup("RXADJ_PA_PARTIAL_DURATION_DAYS").and_then(|v| v.trim().parse().ok()) {
            config.pa_partial_duration_days = v;
        }
        if let Some(v) = lookup("RXADJ_PA_EMERGENCY_DURATION_DAYS").and_then(|v| v.trim().parse().ok()) {
            config.pa_emergency_duration_days = v;
        }
        if let Some(v) = lookup("RXADJ_APPEAL_WINDOW_DAYS").and_then(|v| v.trim().parse().ok()) {
            config.appeal_window_days = v;
        }
        if let Some(v) = lookup("RXADJ_ENFORCE_DUR") {
            config.enforce_dur = v.trim().to_lowercase() == "true";
        }
        if let Some(v) = lookup("RXADJ_ENFORCE_PLAN_LIMITS") {
            config.enforce_plan_limits = v.trim().to_lowercase() == "true";
        }

        config
    }

    /// Load configuration from a TOML file. Missing keys take their defaults.
    pub fn from_file<P: AsRef<Path>>(path: P) -> ConfigResult<Self> {
        let contents = std::fs::read_to_string(path.as_ref())?;
        let config: Self = toml::from_str(&contents)?;
        config.validate()?;
        Ok(config)
    }

    /// Save configuration to a TOML file.
    pub fn save<P: AsRef<Path>>(&self, path: P) -> ConfigResult<()> {
        let contents = toml::to_string_pretty(self)?;
        std::fs::write(path, contents)?;
        Ok(())
    }

    /// Reject values the engines cannot work with.
    pub fn validate(&self) -> ConfigResult<()> {
        if !(1..=100).contains(&self.early_refill_threshold_percent) {
            return Err(ConfigError::Invalid {
                field: "early_refill_threshold_percent",
                reason: format!("{} is not in 1..=100", self.early_refill_threshold_percent),
            });
        }
        let durations = [
            ("step_therapy_lookback_days", self.step_therapy_lookback_days),
            ("pa_default_duration_days", self.pa_default_duration_days),
            ("pa_partial_duration_days", self.pa_partial_duration_days),
            ("pa_emergency_duration_days", self.pa_emergency_duration_days),
            ("appeal_window_days", self.appeal_window_days),
        ];
        for (field, days) in durations {
            if days == 0 {
                return Err(ConfigError::Invalid {
                    field,
                    reason: "must be at least one day".into(),
                });
            }
            if days > MAX_CONFIG_DAYS {
                return Err(ConfigError::Invalid {
                    field,
                    reason: format!("{} exceeds {} days", days, MAX_CONFIG_DAYS),
                });
            }
        }
        Ok(())
    }
}

/// Builder for customizing configuration.
#[derive(Debug, Default)]
pub struct ConfigBuilder {
    config: AdjudicationConfig,
}

impl ConfigBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn early_refill_threshold_percent(mut self, percent: u8) -> Self {
        self.config.early_refill_threshold_percent = percent;
        self
    }

    pub fn step_therapy_lookback_days(mut self, days: u32) -> Self {
        self.config.step_therapy_lookback_days = days;
        self
    }

    pub fn pa_default_duration_days(mut self, days: u32) -> Self {
        self.config.pa_default_duration_days = days;
        self
    }

    pub fn pa_partial_duration_days(mut self, days: u32) -> Self {
        self.config.pa_partial_duration_days = days;
        self
    }

    pub fn pa_emergency_duration_days(mut self, days: u32) -> Self {
        self.config.pa_emergency_duration_days = days;
        self
    }

    pub fn appeal_window_days(mut self, days: u32) -> Self {
        self.config.appeal_window_days = days;
        self
    }

    pub fn enforce_dur(mut self, enabled: bool) -> Self {
        self.config.enforce_dur = enabled;
        self
    }

    pub fn enforce_plan_limits(mut self, enabled: bool) -> Self {
        self.config.enforce_plan_limits = enabled;
        self
    }

    /// Build and validate the configuration.
    pub fn build(self) -> ConfigResult<AdjudicationConfig> {
        self.config.validate()?;
        Ok(self.config)
    }
}
