use std::path::Path;
use std::time::Duration;

use anyhow::{bail, Context, Result};
use serde::Deserialize;

/// Top-level configuration for the navtel agent.
#[derive(Debug, Deserialize)]
pub struct Config {
    /// Logging verbosity (debug, info, warn, error). Default: "info".
    #[serde(default = "default_log_level")]
    pub log_level: String,

    /// Measurement update listener configuration.
    #[serde(default)]
    pub listen: ListenConfig,

    /// How often to flush snapshots to the sinks. Default: 2s.
    #[serde(default = "default_flush_interval", with = "humantime_serde")]
    pub flush_interval: Duration,

    /// Measurement keys the agent accepts, in order. The order defines
    /// the CSV column layout and the influx field set.
    #[serde(default)]
    pub measurements: Vec<String>,

    /// Telemetry sink configuration.
    #[serde(default)]
    pub sinks: SinksConfig,
}

/// Measurement update listener configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct ListenConfig {
    /// UDP listen address for `<key> <value>` update lines.
    /// Default: "127.0.0.1:8125".
    #[serde(default = "default_listen_addr")]
    pub addr: String,
}

/// Telemetry sink configuration.
#[derive(Debug, Default, Clone, Deserialize)]
pub struct SinksConfig {
    /// Carbon (Graphite) network sink configuration.
    #[serde(default)]
    pub carbon: CarbonConfig,

    /// Rolling CSV file sink configuration.
    #[serde(default)]
    pub csv: CsvConfig,

    /// InfluxDB sink configuration.
    #[serde(default)]
    pub influx: InfluxConfig,
}

/// Carbon (Graphite) network sink configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct CarbonConfig {
    /// Enable the carbon sink. Default: false.
    #[serde(default)]
    pub enabled: bool,

    /// Collector hostname. Default: "localhost".
    #[serde(default = "default_carbon_host")]
    pub host: String,

    /// Port for the newline-delimited text protocol. Default: 2003.
    #[serde(default = "default_text_port")]
    pub text_port: u16,

    /// Port for the length-prefixed pickle protocol. Default: 2004.
    #[serde(default = "default_pickle_port")]
    pub pickle_port: u16,

    /// Use the pickle protocol instead of text. Default: true.
    #[serde(default = "default_true")]
    pub pickle: bool,

    /// Upper bound on one connect-write-close round trip. Default: 5s.
    #[serde(default = "default_io_timeout", with = "humantime_serde")]
    pub io_timeout: Duration,

    /// Key namespacing configuration.
    #[serde(default)]
    pub prefixes: PrefixConfig,
}

/// Key namespacing configuration for the carbon sink.
#[derive(Debug, Clone, Deserialize)]
pub struct PrefixConfig {
    /// Global prefix applied to every key. Default: "stats".
    #[serde(default = "default_global_prefix")]
    pub global_prefix: String,

    /// Prefix for counter metrics. Default: "counters".
    #[serde(default = "default_counter_prefix")]
    pub counter: String,

    /// Prefix for timer metrics. Default: "timers".
    #[serde(default = "default_timer_prefix")]
    pub timer: String,

    /// Prefix for gauge metrics. Default: "gauges".
    #[serde(default = "default_gauge_prefix")]
    pub gauge: String,

    /// Prefix for set metrics. Default: "sets".
    #[serde(default = "default_set_prefix")]
    pub set: String,

    /// Suffix appended to every key. Default: "".
    #[serde(default)]
    pub global_suffix: String,

    /// Namespace segment for the sink's own health metrics.
    /// Default: "statsd".
    #[serde(default = "default_stats_prefix")]
    pub stats_prefix: String,

    /// Use the legacy statsd namespace layout. Default: false.
    #[serde(default)]
    pub legacy_namespace: bool,

    /// Sanitize keys for Graphite (whitespace and path separators).
    /// Default: true.
    #[serde(default = "default_true")]
    pub sanitize_keys: bool,
}

/// Rolling CSV file sink configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct CsvConfig {
    /// Enable the CSV sink. Default: false.
    #[serde(default)]
    pub enabled: bool,

    /// Base path for log files; the UTC hour and ".csv" are appended.
    /// Any directories must exist. Default: "navlog".
    #[serde(default = "default_log_base")]
    pub log_base: String,
}

/// InfluxDB sink configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct InfluxConfig {
    /// Enable the influx sink. Default: false.
    #[serde(default)]
    pub enabled: bool,

    /// InfluxDB base URL. Default: "http://127.0.0.1:8086".
    #[serde(default = "default_influx_url")]
    pub url: String,

    /// Target database (also used as the measurement name).
    /// Default: "nav".
    #[serde(default = "default_influx_database")]
    pub database: String,

    /// Queued points that trigger a drain. Default: 100.
    #[serde(default = "default_influx_batch_size")]
    pub batch_size: usize,

    /// Maximum time between drains. Default: 30s.
    #[serde(default = "default_flush_budget", with = "humantime_serde")]
    pub flush_budget: Duration,
}

// --- Default value functions ---

fn default_log_level() -> String {
    "info".to_string()
}

fn default_listen_addr() -> String {
    "127.0.0.1:8125".to_string()
}

fn default_flush_interval() -> Duration {
    Duration::from_secs(2)
}

fn default_true() -> bool {
    true
}

fn default_carbon_host() -> String {
    "localhost".to_string()
}

fn default_text_port() -> u16 {
    2003
}

fn default_pickle_port() -> u16 {
    2004
}

fn default_io_timeout() -> Duration {
    Duration::from_secs(5)
}

fn default_global_prefix() -> String {
    "stats".to_string()
}

fn default_counter_prefix() -> String {
    "counters".to_string()
}

fn default_timer_prefix() -> String {
    "timers".to_string()
}

fn default_gauge_prefix() -> String {
    "gauges".to_string()
}

fn default_set_prefix() -> String {
    "sets".to_string()
}

fn default_stats_prefix() -> String {
    "statsd".to_string()
}

fn default_log_base() -> String {
    "navlog".to_string()
}

fn default_influx_url() -> String {
    "http://127.0.0.1:8086".to_string()
}

fn default_influx_database() -> String {
    "nav".to_string()
}

fn default_influx_batch_size() -> usize {
    100
}

fn default_flush_budget() -> Duration {
    Duration::from_secs(30)
}

// --- Default trait impls ---

impl Default for Config {
    fn default() -> Self {
        Self {
            log_level: default_log_level(),
            listen: ListenConfig::default(),
            flush_interval: default_flush_interval(),
            measurements: Vec::new(),
            sinks: SinksConfig::default(),
        }
    }
}

impl Default for ListenConfig {
    fn default() -> Self {
        Self {
            addr: default_listen_addr(),
        }
    }
}

impl Default for CarbonConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            host: default_carbon_host(),
            text_port: default_text_port(),
            pickle_port: default_pickle_port(),
            pickle: true,
            io_timeout: default_io_timeout(),
            prefixes: PrefixConfig::default(),
        }
    }
}

impl Default for PrefixConfig {
    fn default() -> Self {
        Self {
            global_prefix: default_global_prefix(),
            counter: default_counter_prefix(),
            timer: default_timer_prefix(),
            gauge: default_gauge_prefix(),
            set: default_set_prefix(),
            global_suffix: String::new(),
            stats_prefix: default_stats_prefix(),
            legacy_namespace: false,
            sanitize_keys: true,
        }
    }
}

impl Default for CsvConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            log_base: default_log_base(),
        }
    }
}

impl Default for InfluxConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            url: default_influx_url(),
            database: default_influx_database(),
            batch_size: default_influx_batch_size(),
            flush_budget: default_flush_budget(),
        }
    }
}

// --- Validation and loading ---

impl Config {
    /// Load configuration from a YAML file.
    pub fn load(path: &Path) -> Result<Self> {
        let data = std::fs::read_to_string(path)
            .with_context(|| format!("reading config file {}", path.display()))?;

        let cfg: Config = serde_yaml::from_str(&data)
            .with_context(|| format!("parsing config file {}", path.display()))?;

        cfg.validate()?;

        Ok(cfg)
    }

    /// Validate the configuration for required fields and consistency.
    pub fn validate(&self) -> Result<()> {
        if self.listen.addr.is_empty() {
            bail!("listen.addr is required");
        }

        if self.flush_interval.is_zero() {
            bail!("flush_interval must be positive");
        }

        let carbon = &self.sinks.carbon;
        let csv = &self.sinks.csv;
        let influx = &self.sinks.influx;

        if !carbon.enabled && !csv.enabled && !influx.enabled {
            bail!("at least one sink must be enabled");
        }

        if carbon.enabled {
            if carbon.host.is_empty() {
                bail!("sinks.carbon.host is required");
            }
            if carbon.io_timeout.is_zero() {
                bail!("sinks.carbon.io_timeout must be positive");
            }
        }

        if csv.enabled && csv.log_base.is_empty() {
            bail!("sinks.csv.log_base is required");
        }

        if influx.enabled {
            if influx.url.is_empty() {
                bail!("sinks.influx.url is required");
            }
            if influx.batch_size == 0 {
                bail!("sinks.influx.batch_size must be positive");
            }
            if influx.flush_budget.is_zero() {
                bail!("sinks.influx.flush_budget must be positive");
            }
        }

        if (csv.enabled || influx.enabled) && self.measurements.is_empty() {
            bail!("measurements must be set when the csv or influx sink is enabled");
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_from_minimal_yaml() {
        let cfg: Config = serde_yaml::from_str(
            r"
sinks:
  carbon:
    enabled: true
",
        )
        .expect("parse");

        assert_eq!(cfg.listen.addr, "127.0.0.1:8125");
        assert_eq!(cfg.flush_interval, Duration::from_secs(2));
        assert!(cfg.sinks.carbon.enabled);
        assert!(cfg.sinks.carbon.pickle);
        assert_eq!(cfg.sinks.carbon.text_port, 2003);
        assert_eq!(cfg.sinks.carbon.pickle_port, 2004);
        assert_eq!(cfg.sinks.carbon.prefixes.global_prefix, "stats");
        assert!(!cfg.sinks.carbon.prefixes.legacy_namespace);
        assert!(!cfg.sinks.csv.enabled);
        assert!(!cfg.sinks.influx.enabled);
        assert_eq!(cfg.sinks.influx.batch_size, 100);
        assert_eq!(cfg.sinks.influx.flush_budget, Duration::from_secs(30));

        cfg.validate().expect("valid");
    }

    #[test]
    fn test_validate_requires_a_sink() {
        let cfg = Config::default();
        let err = cfg.validate().expect_err("no sinks enabled");
        assert!(err.to_string().contains("at least one sink"));
    }

    #[test]
    fn test_validate_requires_measurements_for_csv() {
        let mut cfg = Config::default();
        cfg.sinks.csv.enabled = true;
        let err = cfg.validate().expect_err("no measurements");
        assert!(err.to_string().contains("measurements"));

        cfg.measurements = vec!["navigation.speedOverGround".to_string()];
        cfg.validate().expect("valid with measurements");
    }

    #[test]
    fn test_validate_rejects_zero_interval() {
        let mut cfg = Config::default();
        cfg.sinks.carbon.enabled = true;
        cfg.flush_interval = Duration::ZERO;
        assert!(cfg.validate().is_err());
    }

    #[test]
    fn test_durations_parse_as_humantime() {
        let cfg: Config = serde_yaml::from_str(
            r"
flush_interval: 500ms
sinks:
  influx:
    enabled: true
    flush_budget: 1m
",
        )
        .expect("parse");

        assert_eq!(cfg.flush_interval, Duration::from_millis(500));
        assert_eq!(cfg.sinks.influx.flush_budget, Duration::from_secs(60));
    }
}
