//! Workload options.
//!
//! [`WorkloadConfig`] holds every option the workload engine recognizes. It is usually embedded in
//! the configuration of the `iotbench` binary under the `workload` key, so all environment
//! variables below are shown with the `IOT__WORKLOAD__` prefix.
//!
//! ```yaml
//! workload:
//!   client: cli23
//!   field_length: 64
//!   proportions:
//!     insert: 0.9
//!     scan: 0.1
//!   insertion_retry_limit: 3
//!   insertion_retry_interval: 1s
//! ```

use std::collections::BTreeSet;
use std::path::PathBuf;
use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Which of the two driver phases a worker executes.
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq, Hash, Deserialize, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Phase {
    /// Inserts records only, with retries on failure.
    #[default]
    Load,
    /// Issues the configured operation mix.
    Run,
}

/// Statistical law used for field lengths.
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq, Hash, Deserialize, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum LengthDistribution {
    /// Every field is exactly `field_length` bytes.
    #[default]
    Constant,
    /// Uniform between `1` and `field_length`.
    Uniform,
    /// Zipfian between `1` and `field_length`, favoring short fields.
    Zipfian,
    /// Loaded from the file at `field_length_histogram`.
    Histogram,
}

/// Statistical law used to choose existing records for reads, scans and updates.
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq, Hash, Deserialize, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum RequestDistribution {
    /// Uniform over all acknowledged records.
    #[default]
    Uniform,
    /// Exponentially biased towards the most recently acknowledged records.
    Exponential,
}

/// Statistical law used for scan lengths.
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq, Hash, Deserialize, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ScanLengthDistribution {
    /// Uniform between `1` and `max_scan_length`.
    #[default]
    Uniform,
    /// Zipfian between `1` and `max_scan_length`, favoring short scans.
    Zipfian,
}

/// The query shape issued by the SCAN operation.
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq, Hash, Deserialize, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ScanMode {
    /// A recent and a historical window of one time series.
    #[default]
    DualWindow,
    /// Up to the drawn scan length of records starting at a key.
    Range,
}

/// How record numbers map to key timestamps.
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq, Hash, Deserialize, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum InsertOrder {
    /// Timestamps follow the record numbers.
    #[default]
    Ordered,
    /// Timestamps are a hash of the record numbers.
    Hashed,
}

/// Relative weights of the operations in the run phase.
///
/// Weights do not need to sum up to `1`. Operations with a weight of `0` are never chosen.
#[derive(Clone, Debug, PartialEq, Deserialize, Serialize)]
#[serde(default)]
pub struct Proportions {
    /// Weight of single-record reads.
    ///
    /// # Default
    ///
    /// `0`
    ///
    /// # Environment Variable
    ///
    /// `IOT__WORKLOAD__PROPORTIONS__READ`
    pub read: f64,

    /// Weight of single-record updates.
    ///
    /// # Default
    ///
    /// `0.05`
    pub update: f64,

    /// Weight of inserts.
    ///
    /// # Default
    ///
    /// `1.0`
    pub insert: f64,

    /// Weight of scans.
    ///
    /// # Default
    ///
    /// `0.00005`
    pub scan: f64,

    /// Weight of read-modify-write sequences.
    ///
    /// # Default
    ///
    /// `0`
    pub read_modify_write: f64,
}

impl Default for Proportions {
    fn default() -> Self {
        Self {
            read: 0.0,
            update: 0.05,
            insert: 1.0,
            scan: 0.00005,
            read_modify_write: 0.0,
        }
    }
}

/// Fixed cluster topology used to route overflow inserts.
///
/// Every worker of a benchmark run knows the full topology. Once the synthetic record counter
/// passes a sixteenth of the per-worker capacity, only the instances listed in
/// `overflow_instances` keep inserting.
#[derive(Clone, Debug, PartialEq, Deserialize, Serialize)]
#[serde(default)]
pub struct ClusterConfig {
    /// Number of driver nodes.
    ///
    /// # Default
    ///
    /// `4`
    ///
    /// # Environment Variable
    ///
    /// `IOT__WORKLOAD__CLUSTER__NODES`
    pub nodes: u32,

    /// Number of driver instances on each node.
    ///
    /// # Default
    ///
    /// `11`
    pub instances_per_node: u32,

    /// Global ranks of the instances that keep inserting past the threshold.
    ///
    /// The rank of an instance is `(node - 1) * instances_per_node + instance`.
    ///
    /// # Default
    ///
    /// `[42, 40, 39, 38, 44, 43, 34, 37, 41]`
    pub overflow_instances: BTreeSet<u32>,

    /// Number of records inserted by the whole cluster.
    ///
    /// # Default
    ///
    /// `4000000000`
    pub total_insert_budget: u64,
}

impl Default for ClusterConfig {
    fn default() -> Self {
        Self {
            nodes: 4,
            instances_per_node: 11,
            overflow_instances: BTreeSet::from([42, 40, 39, 38, 44, 43, 34, 37, 41]),
            total_insert_budget: 4_000_000_000,
        }
    }
}

/// All options of the workload engine.
#[derive(Clone, Debug, PartialEq, Deserialize, Serialize)]
#[serde(default)]
pub struct WorkloadConfig {
    /// Name of the table records are written to.
    ///
    /// # Default
    ///
    /// `"usertable"`
    ///
    /// # Environment Variable
    ///
    /// `IOT__WORKLOAD__TABLE`
    pub table: String,

    /// Name of this driver instance.
    ///
    /// A three letter prefix followed by the node digit and the instance number on that node,
    /// e.g. `cli23` for instance 3 on node 2. The name is part of every record key.
    ///
    /// # Default
    ///
    /// `"cli11"`
    ///
    /// # Environment Variable
    ///
    /// `IOT__WORKLOAD__CLIENT`
    pub client: String,

    /// Number of fields per record, named `field0` to `field{n-1}`.
    ///
    /// # Default
    ///
    /// `1`
    pub field_count: usize,

    /// Length of a field in bytes, or the upper bound for non-constant distributions.
    ///
    /// # Default
    ///
    /// `1000`
    pub field_length: u64,

    /// Distribution of field lengths.
    ///
    /// # Default
    ///
    /// `constant`
    pub field_length_distribution: LengthDistribution,

    /// Histogram file used with the `histogram` field length distribution.
    ///
    /// The first line is `BlockSize <n>`, every following line is `<bucket> <count>`. Bucket `i`
    /// yields fields of `(i + 1) * n` bytes.
    ///
    /// # Default
    ///
    /// `"hist.txt"`
    pub field_length_histogram: PathBuf,

    /// Whether reads and scans request all fields or a single random field.
    ///
    /// # Default
    ///
    /// `true`
    pub read_all_fields: bool,

    /// Whether updates write all fields or a single random field.
    ///
    /// # Default
    ///
    /// `false`
    pub write_all_fields: bool,

    /// Whether payloads are deterministic and verified when read back.
    ///
    /// Requires the `constant` field length distribution.
    ///
    /// # Default
    ///
    /// `true`
    pub data_integrity: bool,

    /// Operation mix of the run phase.
    pub proportions: Proportions,

    /// Distribution used to choose existing records.
    ///
    /// # Default
    ///
    /// `uniform`
    pub request_distribution: RequestDistribution,

    /// Percentile of the exponential request distribution.
    ///
    /// # Default
    ///
    /// `95`
    pub exponential_percentile: f64,

    /// Fraction of the key space covered by `exponential_percentile` percent of all requests.
    ///
    /// # Default
    ///
    /// `0.8571428571`
    pub exponential_frac: f64,

    /// Maximum number of records requested by a scan.
    ///
    /// # Default
    ///
    /// `100`
    pub max_scan_length: u64,

    /// Distribution of scan lengths.
    ///
    /// # Default
    ///
    /// `uniform`
    pub scan_length_distribution: ScanLengthDistribution,

    /// Query shape of the SCAN operation.
    ///
    /// # Default
    ///
    /// `dual_window`
    pub scan_mode: ScanMode,

    /// Minimum number of digits of the serialized key timestamp.
    ///
    /// # Default
    ///
    /// `1`
    pub zero_padding: usize,

    /// Mapping from record numbers to key timestamps.
    ///
    /// # Default
    ///
    /// `ordered`
    pub insert_order: InsertOrder,

    /// First record number inserted by this instance.
    ///
    /// # Default
    ///
    /// `0`
    pub insert_start: u64,

    /// Number of records this instance inserts.
    ///
    /// # Default
    ///
    /// The per-worker capacity, `total_insert_budget / (nodes * instances_per_node)`.
    pub insert_count: Option<u64>,

    /// Number of records that were durably written before this run started.
    ///
    /// Reads may target these records right away.
    ///
    /// # Default
    ///
    /// `0`
    pub record_count: u64,

    /// Distance in time units between the chosen record and the timestamp of a read key.
    ///
    /// # Default
    ///
    /// `5000`
    pub read_lag: u64,

    /// How many times a failed insert is retried.
    ///
    /// # Default
    ///
    /// `0`
    ///
    /// # Environment Variable
    ///
    /// `IOT__WORKLOAD__INSERTION_RETRY_LIMIT`
    pub insertion_retry_limit: u32,

    /// Average wait between insert retries.
    ///
    /// Each wait is drawn uniformly from `[0.8, 1.2)` times this interval.
    ///
    /// # Default
    ///
    /// `3s`
    ///
    /// # Environment Variable
    ///
    /// `IOT__WORKLOAD__INSERTION_RETRY_INTERVAL`
    #[serde(with = "humantime_serde")]
    pub insertion_retry_interval: Duration,

    /// Whether every failed operation is labeled with its specific status code.
    ///
    /// # Default
    ///
    /// `false`
    pub report_latency_for_each_error: bool,

    /// Status codes that get their own latency label, e.g. `NOT_FOUND`.
    ///
    /// Other failures are labeled `<OPERATION>-FAILED`.
    ///
    /// # Default
    ///
    /// Empty
    pub latency_tracked_errors: BTreeSet<String>,

    /// Logical timestamp of record number zero.
    ///
    /// # Default
    ///
    /// Wall-clock time in milliseconds when the workload is created.
    pub timestamp_origin: Option<u64>,

    /// Seed for all generators and deterministic payloads.
    ///
    /// Payloads written with one seed only verify when read back with the same seed.
    ///
    /// # Default
    ///
    /// A random seed, logged at startup.
    pub seed: Option<u64>,

    /// Cluster topology for overflow routing.
    pub cluster: ClusterConfig,
}

impl Default for WorkloadConfig {
    fn default() -> Self {
        Self {
            table: "usertable".to_owned(),
            client: "cli11".to_owned(),
            field_count: 1,
            field_length: 1000,
            field_length_distribution: LengthDistribution::Constant,
            field_length_histogram: PathBuf::from("hist.txt"),
            read_all_fields: true,
            write_all_fields: false,
            data_integrity: true,
            proportions: Proportions::default(),
            request_distribution: RequestDistribution::Uniform,
            exponential_percentile: 95.0,
            exponential_frac: 0.8571428571,
            max_scan_length: 100,
            scan_length_distribution: ScanLengthDistribution::Uniform,
            scan_mode: ScanMode::DualWindow,
            zero_padding: 1,
            insert_order: InsertOrder::Ordered,
            insert_start: 0,
            insert_count: None,
            record_count: 0,
            read_lag: 5000,
            insertion_retry_limit: 0,
            insertion_retry_interval: Duration::from_secs(3),
            report_latency_for_each_error: false,
            latency_tracked_errors: BTreeSet::new(),
            timestamp_origin: None,
            seed: None,
            cluster: ClusterConfig::default(),
        }
    }
}
