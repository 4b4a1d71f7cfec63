//! Configuration of the benchmark driver.
//!
//! Configuration is loaded from multiple sources with the following precedence (highest to
//! lowest):
//!
//! 1. Environment variables (prefixed with `IOT__`)
//! 2. YAML configuration file (specified via `-c` or `--config` flag)
//! 3. Defaults
//!
//! # Environment Variables
//!
//! Environment variables use `IOT__` as a prefix and double underscores (`__`) to denote nested
//! configuration structures. For example:
//!
//! - `IOT__WORKERS=8` sets the number of workers
//! - `IOT__BACKEND__BATCH_SIZE=100` buffers inserts of the in-memory backend
//! - `IOT__WORKLOAD__CLUSTER__NODES=2` sets the number of nodes of the cluster
//!
//! # YAML Configuration File
//!
//! The above configuration in YAML format would look like this:
//!
//! ```yaml
//! workers: 8
//!
//! backend:
//!   type: memory
//!   batch_size: 100
//!
//! workload:
//!   cluster:
//!     nodes: 2
//! ```

use std::borrow::Cow;
use std::fmt;
use std::path::Path;
use std::time::Duration;

use anyhow::Result;
use figment::providers::{Env, Format, Serialized, Yaml};
use iotbench_workload::{Phase, WorkloadConfig};
use serde::{Deserialize, Serialize};
use tracing::level_filters::LevelFilter;

/// Environment variable prefix for all configuration options.
const ENV_PREFIX: &str = "IOT__";

/// The storage backend that workers connect to.
///
/// The `type` field selects the backend.
#[derive(Clone, Debug, Deserialize, Serialize, PartialEq)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum Backend {
    /// Records are kept in the memory of this process.
    ///
    /// All workers share one store, so records written by one worker are visible to all others.
    /// The store is lost when the process exits.
    ///
    /// # Example
    ///
    /// ```yaml
    /// backend:
    ///   type: memory
    ///   batch_size: 100
    ///   preload: true
    /// ```
    Memory {
        /// Number of inserts buffered in the shared write batch before they are applied.
        ///
        /// Values of `0` and `1` apply inserts immediately.
        ///
        /// # Environment Variable
        ///
        /// `IOT__BACKEND__BATCH_SIZE`
        #[serde(default)]
        batch_size: usize,

        /// Load `workload.record_count` records before the run phase starts.
        ///
        /// The in-memory store starts out empty, so without preloading, the run phase only
        /// finds records that it inserted itself.
        ///
        /// # Environment Variable
        ///
        /// `IOT__BACKEND__PRELOAD`
        #[serde(default)]
        preload: bool,
    },
}

/// [Sentry](https://sentry.io/) error reporting configuration.
///
/// Sentry is disabled by default and only enabled when a DSN is provided. Warnings and errors
/// logged by the driver, such as failed inserts, are reported as events.
#[derive(Debug, Deserialize, Serialize)]
#[serde(default)]
pub struct Sentry {
    /// Sentry DSN (Data Source Name).
    ///
    /// # Default
    ///
    /// `None` (Sentry disabled)
    ///
    /// # Environment Variable
    ///
    /// `IOT__SENTRY__DSN`
    pub dsn: Option<String>,

    /// Environment name of this run, e.g. `"staging"`.
    ///
    /// # Environment Variable
    ///
    /// `IOT__SENTRY__ENVIRONMENT`
    pub environment: Option<Cow<'static, str>>,

    /// Error event sampling rate.
    ///
    /// # Default
    ///
    /// `1.0` (send all errors)
    ///
    /// # Environment Variable
    ///
    /// `IOT__SENTRY__SAMPLE_RATE`
    pub sample_rate: f32,

    /// Performance trace sampling rate.
    ///
    /// # Default
    ///
    /// `0.01` (send 1% of traces)
    ///
    /// # Environment Variable
    ///
    /// `IOT__SENTRY__TRACES_SAMPLE_RATE`
    pub traces_sample_rate: f32,

    /// Enable Sentry SDK debug mode.
    ///
    /// # Default
    ///
    /// `false`
    ///
    /// # Environment Variable
    ///
    /// `IOT__SENTRY__DEBUG`
    pub debug: bool,
}

impl Sentry {
    /// Returns whether Sentry integration is enabled.
    pub fn is_enabled(&self) -> bool {
        self.dsn.is_some()
    }
}

impl Default for Sentry {
    fn default() -> Self {
        Self {
            dsn: None,
            environment: None,
            sample_rate: 1.0,
            traces_sample_rate: 0.01,
            debug: false,
        }
    }
}

/// Log output format.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Hash, Deserialize, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    /// Chooses [`LogFormat::Pretty`] for TTY, otherwise [`LogFormat::Simplified`].
    Auto,

    /// Pretty printing with colors.
    Pretty,

    /// Compact plain text output without colors.
    Simplified,

    /// JSON lines.
    Json,
}

/// The logging format parse error.
#[derive(Clone, Debug)]
pub struct FormatParseError(String);

impl fmt::Display for FormatParseError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            r#"error parsing "{}" as format: expected one of "auto", "pretty", "simplified", "json""#,
            self.0
        )
    }
}

impl std::error::Error for FormatParseError {}

impl std::str::FromStr for LogFormat {
    type Err = FormatParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let result = match s {
            "" => LogFormat::Auto,
            s if s.eq_ignore_ascii_case("auto") => LogFormat::Auto,
            s if s.eq_ignore_ascii_case("pretty") => LogFormat::Pretty,
            s if s.eq_ignore_ascii_case("simplified") => LogFormat::Simplified,
            s if s.eq_ignore_ascii_case("json") => LogFormat::Json,
            s => return Err(FormatParseError(s.into())),
        };

        Ok(result)
    }
}

mod display_fromstr {
    pub fn serialize<T, S>(value: &T, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: serde::Serializer,
        T: std::fmt::Display,
    {
        serializer.collect_str(&value)
    }

    pub fn deserialize<'de, T, D>(deserializer: D) -> Result<T, D::Error>
    where
        D: serde::Deserializer<'de>,
        T: std::str::FromStr,
        <T as std::str::FromStr>::Err: std::fmt::Display,
    {
        use serde::Deserialize;
        let s = <std::borrow::Cow<'de, str>>::deserialize(deserializer)?;
        s.parse().map_err(serde::de::Error::custom)
    }
}

/// Logging configuration. Logs are always written to stderr.
#[derive(Debug, Deserialize, Serialize)]
#[serde(default)]
pub struct Logging {
    /// Minimum log level to output.
    ///
    /// `RUST_LOG` overrides this setting. It is either a plain level or a full filter directive.
    /// Retries are logged at `WARN`, the averages of every scan at `INFO`.
    ///
    /// # Default
    ///
    /// `INFO`
    ///
    /// # Environment Variable
    ///
    /// `IOT__LOGGING__LEVEL`
    #[serde(with = "display_fromstr")]
    pub level: LevelFilter,

    /// Log output format.
    ///
    /// # Default
    ///
    /// `Auto` (pretty for TTY, simplified otherwise)
    ///
    /// # Environment Variable
    ///
    /// `IOT__LOGGING__FORMAT`
    pub format: LogFormat,
}

impl Default for Logging {
    fn default() -> Self {
        Self {
            level: LevelFilter::INFO,
            format: LogFormat::Auto,
        }
    }
}

/// Main configuration struct of the driver.
#[derive(Debug, Deserialize, Serialize)]
#[serde(default)]
pub struct Config {
    /// The storage backend.
    ///
    /// # Default
    ///
    /// `memory` without batching
    pub backend: Backend,

    /// Number of workers, each running its own engine against its own backend connection.
    ///
    /// # Default
    ///
    /// `1`
    ///
    /// # Environment Variable
    ///
    /// `IOT__WORKERS`
    pub workers: usize,

    /// The phase executed by the `start` command.
    ///
    /// # Default
    ///
    /// `load`
    ///
    /// # Environment Variable
    ///
    /// `IOT__PHASE`
    pub phase: Phase,

    /// Number of invocations per worker.
    ///
    /// Without an operation count or a duration, workers run until the process is interrupted.
    ///
    /// # Environment Variable
    ///
    /// `IOT__OPERATION_COUNT`
    pub operation_count: Option<u64>,

    /// Maximum duration of the run, e.g. `10m`.
    ///
    /// # Environment Variable
    ///
    /// `IOT__DURATION`
    #[serde(with = "humantime_serde")]
    pub duration: Option<Duration>,

    /// Target invocations per second of the whole run, divided evenly among workers.
    ///
    /// Intended latencies are measured against this schedule. Without a target, workers issue
    /// invocations as fast as the backend responds.
    ///
    /// # Environment Variable
    ///
    /// `IOT__TARGET_OPS_PER_SEC`
    pub target_ops_per_sec: Option<f64>,

    /// Logging configuration.
    pub logging: Logging,

    /// Sentry configuration.
    pub sentry: Sentry,

    /// The workload executed by every worker.
    ///
    /// # Environment Variables
    ///
    /// Options are set individually, e.g. `IOT__WORKLOAD__FIELD_LENGTH=64`.
    pub workload: WorkloadConfig,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            backend: Backend::Memory {
                batch_size: 0,
                preload: false,
            },
            workers: 1,
            phase: Phase::Load,
            operation_count: None,
            duration: None,
            target_ops_per_sec: None,
            logging: Logging::default(),
            sentry: Sentry::default(),
            workload: WorkloadConfig::default(),
        }
    }
}

impl Config {
    /// Loads the configuration from defaults, an optional YAML file and the environment.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let mut figment = figment::Figment::from(Serialized::defaults(Config::default()));
        if let Some(path) = path {
            figment = figment.merge(Yaml::file(path));
        }
        let config: Config = figment
            .merge(Env::prefixed(ENV_PREFIX).split("__"))
            .extract()?;

        if config.workers == 0 {
            anyhow::bail!("`workers` must be at least 1");
        }

        Ok(config)
    }
}

#[cfg(test)]
mod tests {
    use std::collections::BTreeSet;
    use std::io::Write;

    use iotbench_workload::config::{LengthDistribution, ScanMode};

    use super::*;

    #[test]
    fn defaults() {
        figment::Jail::expect_with(|_jail| {
            let config = Config::load(None).unwrap();

            assert_eq!(config.workers, 1);
            assert_eq!(config.phase, Phase::Load);
            assert_eq!(config.duration, None);
            assert_eq!(config.workload, WorkloadConfig::default());
            assert!(!config.sentry.is_enabled());

            Ok(())
        });
    }

    #[test]
    fn configurable_via_env() {
        figment::Jail::expect_with(|jail| {
            jail.set_env("IOT__WORKERS", "8");
            jail.set_env("IOT__PHASE", "run");
            jail.set_env("IOT__DURATION", "90s");
            jail.set_env("IOT__BACKEND__TYPE", "memory");
            jail.set_env("IOT__BACKEND__BATCH_SIZE", "100");
            jail.set_env("IOT__SENTRY__DSN", "abcde");
            jail.set_env("IOT__SENTRY__SAMPLE_RATE", "0.5");
            jail.set_env("IOT__LOGGING__FORMAT", "json");
            jail.set_env("IOT__WORKLOAD__FIELD_LENGTH", "64");
            jail.set_env("IOT__WORKLOAD__PROPORTIONS__SCAN", "0.5");
            jail.set_env("IOT__WORKLOAD__CLUSTER__NODES", "2");

            let config = Config::load(None).unwrap();

            assert_eq!(config.workers, 8);
            assert_eq!(config.phase, Phase::Run);
            assert_eq!(config.duration, Some(Duration::from_secs(90)));
            assert_eq!(
                config.backend,
                Backend::Memory {
                    batch_size: 100,
                    preload: false,
                }
            );
            assert_eq!(config.sentry.dsn.as_deref(), Some("abcde"));
            assert_eq!(config.sentry.sample_rate, 0.5);
            assert_eq!(config.logging.format, LogFormat::Json);
            assert_eq!(config.workload.field_length, 64);
            assert_eq!(config.workload.proportions.scan, 0.5);
            assert_eq!(config.workload.cluster.nodes, 2);
            assert_eq!(config.workload.cluster.instances_per_node, 11);

            Ok(())
        });
    }

    #[test]
    fn configurable_via_yaml() {
        let mut tempfile = tempfile::NamedTempFile::new().unwrap();
        tempfile
            .write_all(
                br#"
            workers: 4
            operation_count: 1000
            target_ops_per_sec: 200.5
            logging:
                level: debug
            workload:
                client: cli27
                field_length_distribution: zipfian
                data_integrity: false
                scan_mode: range
                insertion_retry_interval: 250ms
                latency_tracked_errors: [NOT_FOUND]
                cluster:
                    overflow_instances: [1, 2]
            "#,
            )
            .unwrap();

        figment::Jail::expect_with(|_jail| {
            let config = Config::load(Some(tempfile.path())).unwrap();

            assert_eq!(config.workers, 4);
            assert_eq!(config.operation_count, Some(1000));
            assert_eq!(config.target_ops_per_sec, Some(200.5));
            assert_eq!(config.logging.level, LevelFilter::DEBUG);

            let workload = &config.workload;
            assert_eq!(workload.client, "cli27");
            assert_eq!(
                workload.field_length_distribution,
                LengthDistribution::Zipfian
            );
            assert!(!workload.data_integrity);
            assert_eq!(workload.scan_mode, ScanMode::Range);
            assert_eq!(
                workload.insertion_retry_interval,
                Duration::from_millis(250)
            );
            assert!(workload.latency_tracked_errors.contains("NOT_FOUND"));
            assert_eq!(workload.cluster.overflow_instances, BTreeSet::from([1, 2]));

            Ok(())
        });
    }

    #[test]
    fn env_overrides_yaml() {
        let mut tempfile = tempfile::NamedTempFile::new().unwrap();
        tempfile
            .write_all(
                br#"
            workers: 4
            backend:
                type: memory
                preload: true
            "#,
            )
            .unwrap();

        figment::Jail::expect_with(|jail| {
            jail.set_env("IOT__WORKERS", "2");

            let config = Config::load(Some(tempfile.path())).unwrap();
            assert_eq!(config.workers, 2);
            assert_eq!(
                config.backend,
                Backend::Memory {
                    batch_size: 0,
                    preload: true,
                }
            );

            Ok(())
        });
    }

    #[test]
    fn zero_workers_are_rejected() {
        figment::Jail::expect_with(|jail| {
            jail.set_env("IOT__WORKERS", "0");
            assert!(Config::load(None).is_err());
            Ok(())
        });
    }
}
