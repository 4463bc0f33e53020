use std::collections::BTreeMap;
use std::env;
use std::fmt;
use std::fs;
use std::path::Path;
use std::time::Duration;

use anyhow::{Context, Result};
use serde::{Deserialize, Deserializer, de};
use tracing::level_filters::LevelFilter;

/// Controls the log format
#[derive(Clone, Copy, Debug, Eq, PartialEq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    /// Auto detect (pretty for tty, simplified for other)
    Auto,
    /// With colors
    Pretty,
    /// Simplified log output
    Simplified,
    /// Dump out JSON lines
    Json,
}

/// Controls the logging system.
#[derive(Clone, Debug, Deserialize)]
#[serde(default)]
pub struct Logging {
    /// The log level.
    #[serde(deserialize_with = "deserialize_level_filter")]
    pub level: LevelFilter,
    /// Controls the log format.
    pub format: LogFormat,
}

impl Default for Logging {
    fn default() -> Self {
        Logging {
            level: LevelFilter::INFO,
            format: LogFormat::Auto,
        }
    }
}

/// Control the metrics.
#[derive(Clone, Debug, Deserialize)]
#[serde(default)]
pub struct Metrics {
    /// host/port of statsd instance
    pub statsd: Option<String>,
    /// The prefix that should be added to all metrics.
    pub prefix: String,
    /// A map containing custom tags and their values.
    ///
    /// These tags will be appended to every metric.
    pub custom_tags: BTreeMap<String, String>,
}

impl Default for Metrics {
    fn default() -> Self {
        Metrics {
            statsd: env::var("STATSD_SERVER").ok(),
            prefix: "timedcache".into(),
            custom_tags: BTreeMap::new(),
        }
    }
}

/// Settings for a single [`TimedCache`](crate::TimedCache).
#[derive(Clone, Copy, Debug, Deserialize, Eq, PartialEq)]
#[serde(default)]
pub struct CacheConfig {
    /// How long a stored entry is served without asking the loader again.
    ///
    /// Must be greater than zero unless the cache is disabled.
    #[serde(with = "humantime_serde")]
    pub ttl: Duration,

    /// Turns the cache into a pass-through: every read goes to the loader.
    pub disabled: bool,

    /// How often expired entries are swept out of memory.
    ///
    /// `null` keeps expired entries until they are overwritten or deleted.
    #[serde(with = "humantime_serde")]
    pub sweep_interval: Option<Duration>,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            ttl: Duration::from_secs(30),
            disabled: false,
            sweep_interval: Some(Duration::from_secs(60)),
        }
    }
}

#[derive(Clone, Debug, Default, Deserialize)]
#[serde(default)]
pub struct Config {
    pub logging: Logging,

    pub metrics: Metrics,

    /// Per-cache settings, keyed by cache name.
    pub caches: BTreeMap<String, CacheConfig>,
}

impl Config {
    /// Returns the settings for the cache `name`, or the defaults if it is not configured.
    pub fn cache(&self, name: &str) -> CacheConfig {
        self.caches.get(name).copied().unwrap_or_default()
    }

    pub fn get(path: Option<&Path>) -> Result<Self> {
        match path {
            Some(path) => Self::from_reader(
                fs::File::open(path).context("failed to open configuration file")?,
            ),
            None => Ok(Config::default()),
        }
    }

    fn from_reader(mut reader: impl std::io::Read) -> Result<Self> {
        let mut config = String::new();
        reader
            .read_to_string(&mut config)
            .context("failed reading config file")?;
        // check for empty files explicitly
        if config.trim().is_empty() {
            anyhow::bail!("config file empty");
        }
        serde_yaml::from_str(&config).context("failed to parse config YAML")
    }
}

#[derive(Debug)]
struct LevelFilterVisitor;

impl de::Visitor<'_> for LevelFilterVisitor {
    type Value = LevelFilter;

    fn expecting(&self, formatter: &mut fmt::Formatter) -> fmt::Result {
        write!(
            formatter,
            r#"one of the strings "off", "error", "warn", "info", "debug", or "trace""#
        )
    }

    fn visit_str<E>(self, v: &str) -> Result<Self::Value, E>
    where
        E: de::Error,
    {
        match v {
            "off" => Ok(LevelFilter::OFF),
            "error" => Ok(LevelFilter::ERROR),
            "warn" => Ok(LevelFilter::WARN),
            "info" => Ok(LevelFilter::INFO),
            "debug" => Ok(LevelFilter::DEBUG),
            "trace" => Ok(LevelFilter::TRACE),
            _ => Err(de::Error::unknown_variant(
                v,
                &["off", "error", "warn", "info", "debug", "trace"],
            )),
        }
    }
}

fn deserialize_level_filter<'de, D: Deserializer<'de>>(
    deserializer: D,
) -> Result<LevelFilter, D::Error> {
    deserializer.deserialize_str(LevelFilterVisitor)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cache_config() {
        // Setting one cache should leave the defaults of the others alone.
        let cfg = Config::get(None).unwrap();
        assert_eq!(cfg.cache("security_groups"), CacheConfig::default());

        let yaml = r#"
            caches:
              security_groups:
                ttl: 2m
        "#;
        let cfg = Config::from_reader(yaml.as_bytes()).unwrap();
        let sg = cfg.cache("security_groups");
        assert_eq!(sg.ttl, Duration::from_secs(120));
        assert!(!sg.disabled);
        assert_eq!(sg.sweep_interval, Some(Duration::from_secs(60)));
        assert_eq!(cfg.cache("load_balancers"), CacheConfig::default());
    }

    #[test]
    fn test_disabling_sweep() {
        let yaml = r#"
            caches:
              vms:
                disabled: true
                sweep_interval: null
        "#;
        let cfg = Config::from_reader(yaml.as_bytes()).unwrap();
        let vms = cfg.cache("vms");
        assert!(vms.disabled);
        assert_eq!(vms.sweep_interval, None);
        assert_eq!(vms.ttl, CacheConfig::default().ttl);
    }

    #[test]
    fn test_logging() {
        let yaml = r#"
            logging:
              level: debug
              format: json
        "#;
        let cfg = Config::from_reader(yaml.as_bytes()).unwrap();
        assert_eq!(cfg.logging.level, LevelFilter::DEBUG);
        assert_eq!(cfg.logging.format, LogFormat::Json);

        let yaml = r#"
            logging:
              level: loud
        "#;
        assert!(Config::from_reader(yaml.as_bytes()).is_err());
    }

    #[test]
    fn test_empty_config() {
        let result = Config::from_reader("  \n".as_bytes());
        insta::assert_snapshot!(result.unwrap_err().to_string(), @"config file empty");
    }
}
