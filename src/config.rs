use std::path::Path;
use std::time::Duration;

use anyhow::{Context, Result};
use serde::Deserialize;
use thiserror::Error;

use crate::render::OutputFormat;
use crate::sink::aggregated::collector::{SortKey, SortSpec};
use crate::sink::aggregated::window::{Interval, IntervalError};

/// Invalid configuration, detected before any event is processed.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ConfigError {
    #[error(transparent)]
    Interval(#[from] IntervalError),

    #[error("interval {input:?} is too large")]
    IntervalOutOfRange { input: String },

    #[error("aggregator.queue_capacity must be positive")]
    ZeroQueueCapacity,

    #[error("aggregator.interval must be positive")]
    ZeroInterval,

    #[error("log_level must not be empty")]
    EmptyLogLevel,
}

/// Top-level configuration file.
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Config {
    /// Logging filter directive. Default: "info".
    #[serde(default = "default_log_level")]
    pub log_level: String,

    /// Offline log parser settings.
    #[serde(default)]
    pub parser: ParserConfig,

    /// Live aggregator settings.
    #[serde(default)]
    pub aggregator: AggregatorConfig,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            log_level: default_log_level(),
            parser: ParserConfig::default(),
            aggregator: AggregatorConfig::default(),
        }
    }
}

/// Offline parser configuration.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ParserConfig {
    /// Report malformed lines. Default: false.
    #[serde(default)]
    pub verbose: bool,

    /// Sort key for each bucket's table. Default: tag.
    #[serde(default)]
    pub sort: SortKey,

    #[serde(default)]
    pub reverse: bool,

    /// Bucket width as `<integer><s|m|h>`. Unset means one bucket for the whole file.
    #[serde(default)]
    pub interval: Option<String>,

    /// Default: pretty.
    #[serde(default)]
    pub output: OutputFormat,
}

impl ParserConfig {
    /// Parsed bucket width.
    pub fn interval(&self) -> Result<Interval, ConfigError> {
        match &self.interval {
            Some(raw) => Ok(raw.parse()?),
            None => Ok(Interval::unbounded()),
        }
    }

    pub fn sort_spec(&self) -> SortSpec {
        SortSpec::new(self.sort, self.reverse)
    }
}

/// Live aggregator configuration.
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct AggregatorConfig {
    /// Bounded queue size between producers and the consumer. Default: 65536.
    #[serde(default = "default_queue_capacity")]
    pub queue_capacity: usize,

    /// Bucket width. Unset means a single bucket for the whole run.
    #[serde(default, with = "humantime_serde")]
    pub interval: Option<Duration>,

    /// Order of aggregates in each flushed report. Default: tag.
    #[serde(default)]
    pub sort: SortKey,

    #[serde(default)]
    pub reverse: bool,
}

impl Default for AggregatorConfig {
    fn default() -> Self {
        Self {
            queue_capacity: default_queue_capacity(),
            interval: None,
            sort: SortKey::default(),
            reverse: false,
        }
    }
}

impl AggregatorConfig {
    pub fn interval(&self) -> Interval {
        self.interval
            .map(Interval::from_duration)
            .unwrap_or_default()
    }

    /// Sets the bucket width from `<integer><s|m|h>` text.
    pub fn set_interval(&mut self, raw: &str) -> Result<(), ConfigError> {
        let interval: Interval = raw.parse()?;
        let duration = Duration::try_from_secs_f64(interval.as_secs_f64()).map_err(|_| {
            ConfigError::IntervalOutOfRange {
                input: raw.to_string(),
            }
        })?;
        self.interval = Some(duration);
        Ok(())
    }

    pub fn sort_spec(&self) -> SortSpec {
        SortSpec::new(self.sort, self.reverse)
    }
}

// --- Default value functions ---

fn default_log_level() -> String {
    "info".to_string()
}

fn default_queue_capacity() -> usize {
    65536
}

impl Config {
    /// Load configuration from a YAML file.
    pub fn load(path: &Path) -> Result<Self> {
        let data = std::fs::read_to_string(path)
            .with_context(|| format!("reading config file {}", path.display()))?;

        let cfg: Config = serde_yaml::from_str(&data)
            .with_context(|| format!("parsing config file {}", path.display()))?;

        cfg.validate()
            .with_context(|| format!("validating config file {}", path.display()))?;

        Ok(cfg)
    }

    /// Validate the configuration for consistency.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.log_level.trim().is_empty() {
            return Err(ConfigError::EmptyLogLevel);
        }

        self.parser.interval()?;

        if self.aggregator.queue_capacity == 0 {
            return Err(ConfigError::ZeroQueueCapacity);
        }
        if self.aggregator.interval.is_some_and(|d| d.is_zero()) {
            return Err(ConfigError::ZeroInterval);
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use std::io::Write;

    use super::*;

    #[test]
    fn test_empty_config_uses_defaults() {
        let cfg: Config = serde_yaml::from_str("{}").expect("parse");
        assert_eq!(cfg.log_level, "info");
        assert!(!cfg.parser.verbose);
        assert_eq!(cfg.parser.sort, SortKey::Tag);
        assert_eq!(cfg.parser.output, OutputFormat::Pretty);
        assert_eq!(cfg.parser.interval().expect("interval"), Interval::unbounded());
        assert_eq!(cfg.aggregator.queue_capacity, 65536);
        assert!(cfg.aggregator.interval().is_unbounded());
        cfg.validate().expect("valid");
    }

    #[test]
    fn test_full_config() {
        let yaml = r#"
log_level: debug
parser:
  verbose: true
  sort: avg
  reverse: true
  interval: 5m
  output: csv
aggregator:
  queue_capacity: 1024
  interval: 30s
  sort: count
"#;
        let cfg: Config = serde_yaml::from_str(yaml).expect("parse");
        cfg.validate().expect("valid");

        assert_eq!(cfg.log_level, "debug");
        assert_eq!(cfg.parser.sort_spec(), SortSpec::new(SortKey::Avg, true));
        assert_eq!(cfg.parser.interval().expect("interval"), Interval::from_secs(300));
        assert_eq!(cfg.parser.output, OutputFormat::Csv);
        assert_eq!(cfg.aggregator.queue_capacity, 1024);
        assert_eq!(cfg.aggregator.interval(), Interval::from_secs(30));
        assert_eq!(cfg.aggregator.sort_spec(), SortSpec::new(SortKey::Count, false));
    }

    #[test]
    fn test_validate_rejects_bad_values() {
        let mut cfg = Config::default();
        cfg.parser.interval = Some("10x".to_string());
        assert!(matches!(
            cfg.validate(),
            Err(ConfigError::Interval(IntervalError::UnknownUnit { .. }))
        ));

        let mut cfg = Config::default();
        cfg.aggregator.queue_capacity = 0;
        assert_eq!(cfg.validate(), Err(ConfigError::ZeroQueueCapacity));

        let mut cfg = Config::default();
        cfg.aggregator.interval = Some(Duration::ZERO);
        assert_eq!(cfg.validate(), Err(ConfigError::ZeroInterval));
    }

    #[test]
    fn test_set_interval_from_flag() {
        let mut cfg = AggregatorConfig::default();
        cfg.set_interval("5m").expect("valid");
        assert_eq!(cfg.interval(), Interval::from_secs(300));

        assert!(matches!(
            cfg.set_interval("5d"),
            Err(ConfigError::Interval(IntervalError::UnknownUnit { .. }))
        ));
        assert_eq!(cfg.interval(), Interval::from_secs(300));
    }

    #[test]
    fn test_set_interval_rejects_overflow() {
        let mut cfg = AggregatorConfig::default();
        let err = cfg
            .set_interval("18446744073709551615s")
            .expect_err("too large");
        assert_eq!(
            err,
            ConfigError::IntervalOutOfRange {
                input: "18446744073709551615s".to_string()
            }
        );
        assert!(cfg.interval.is_none());
    }

    #[test]
    fn test_interval_error_does_not_name_a_section() {
        let err = ConfigError::from(IntervalError::Zero {
            input: "0s".to_string(),
        });
        assert_eq!(err.to_string(), "interval \"0s\" must be positive");
    }

    #[test]
    fn test_unknown_field_is_rejected() {
        assert!(serde_yaml::from_str::<Config>("parser:\n  colour: red\n").is_err());
    }

    #[test]
    fn test_load_from_file() {
        let mut file = tempfile::NamedTempFile::new().expect("tempfile");
        writeln!(file, "parser:\n  interval: 2h").expect("write");

        let cfg = Config::load(file.path()).expect("load");
        assert_eq!(cfg.parser.interval().expect("interval"), Interval::from_secs(7200));
    }

    #[test]
    fn test_load_reports_invalid_interval() {
        let mut file = tempfile::NamedTempFile::new().expect("tempfile");
        writeln!(file, "parser:\n  interval: 0s").expect("write");

        let err = Config::load(file.path()).expect_err("invalid");
        assert!(format!("{err:#}").contains("must be positive"));
    }
}
