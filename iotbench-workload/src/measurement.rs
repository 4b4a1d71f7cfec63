//! Latency and outcome measurements shared by all workers.
//!
//! Latencies are recorded in microseconds into [`DDSketch`]es, one pair per label: the *actual*
//! latency measured around the backend call, and the *intended* latency measured from the time
//! the operation should have started under the target rate.

use std::collections::BTreeMap;
use std::fmt;
use std::sync::Mutex;
use std::time::Duration;

use iotbench_storage::WindowScan;
use sketches_ddsketch::DDSketch;

use crate::verify::VerifyOutcome;

/// Label under which verification latencies and statuses are recorded.
pub const VERIFY_LABEL: &str = "VERIFY";

/// Status code of successful operations.
pub const STATUS_OK: &str = "OK";

/// Actual and intended latency sketches of one label.
#[derive(Clone, Default)]
pub struct LatencySketches {
    /// Latency of the call itself, in microseconds.
    pub actual: DDSketch,
    /// Latency since the intended start, in microseconds.
    pub intended: DDSketch,
}

impl LatencySketches {
    /// Number of recorded samples.
    pub fn count(&self) -> usize {
        self.actual.count()
    }
}

impl fmt::Debug for LatencySketches {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LatencySketches")
            .field("count", &self.count())
            .finish_non_exhaustive()
    }
}

/// Summary statistics of a latency sketch, in microseconds.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct LatencySummary {
    /// Mean latency.
    pub avg: f64,
    /// Median latency.
    pub p50: f64,
    /// 90th percentile.
    pub p90: f64,
    /// 99th percentile.
    pub p99: f64,
    /// Maximum latency.
    pub max: f64,
}

impl LatencySummary {
    /// Summarizes a sketch, or returns `None` if it is empty.
    pub fn of(sketch: &DDSketch) -> Option<Self> {
        let count = sketch.count();
        if count == 0 {
            return None;
        }

        let quantile = |q| sketch.quantile(q).ok().flatten();
        Some(Self {
            avg: sketch.sum()? / count as f64,
            p50: quantile(0.5)?,
            p90: quantile(0.9)?,
            p99: quantile(0.99)?,
            max: sketch.max()?,
        })
    }
}

/// Outcome counts of dual-window scans.
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq)]
pub struct WindowCounts {
    /// Successful dual-window scans.
    pub scans: u64,
    /// Scans whose recent window was empty.
    pub recent_empty: u64,
    /// Scans whose historical window was empty or failed.
    pub historical_empty: u64,
    /// Scans whose historical window failed.
    pub historical_failed: u64,
}

#[derive(Default)]
struct Recorder {
    latencies: BTreeMap<String, LatencySketches>,
    statuses: BTreeMap<String, BTreeMap<String, u64>>,
    windows: BTreeMap<String, WindowCounts>,
    verification: BTreeMap<VerifyOutcome, u64>,
    bytes_written: u64,
}

/// The measurement recorder of a run.
///
/// All workers share one instance. Recording takes a short lock, reporting reads a
/// [`Snapshot`] once all workers have stopped.
#[derive(Default)]
pub struct Measurements {
    inner: Mutex<Recorder>,
}

impl Measurements {
    /// Creates an empty recorder.
    pub fn new() -> Self {
        Self::default()
    }

    /// Records a latency sample under `label`.
    pub fn measure(&self, label: &str, actual: Duration, intended: Duration) {
        let mut inner = self.inner.lock().unwrap();
        let sketches = inner.latencies.entry(label.to_owned()).or_default();

        sketches.actual.add(micros(actual));
        sketches.intended.add(micros(intended));
    }

    /// Counts an outcome of `operation` with the given status code.
    pub fn report_status(&self, operation: &str, code: &str) {
        let mut inner = self.inner.lock().unwrap();
        *inner
            .statuses
            .entry(operation.to_owned())
            .or_default()
            .entry(code.to_owned())
            .or_default() += 1;
    }

    /// Counts empty and failed windows of a dual-window scan.
    pub fn record_window_scan(&self, operation: &str, scan: &WindowScan) {
        let mut inner = self.inner.lock().unwrap();
        let counts = inner.windows.entry(operation.to_owned()).or_default();

        counts.scans += 1;
        counts.recent_empty += u64::from(scan.recent_is_empty());
        counts.historical_empty += u64::from(scan.historical_is_empty());
        counts.historical_failed += u64::from(scan.historical.is_none());
    }

    /// Records the outcome and duration of a verification.
    pub fn record_verification(&self, outcome: VerifyOutcome, latency: Duration) {
        self.measure(VERIFY_LABEL, latency, latency);
        self.report_status(VERIFY_LABEL, outcome.code());
        *self
            .inner
            .lock()
            .unwrap()
            .verification
            .entry(outcome)
            .or_default() += 1;
    }

    /// Adds to the number of payload bytes written by successful inserts.
    pub fn add_bytes_written(&self, bytes: u64) {
        self.inner.lock().unwrap().bytes_written += bytes;
    }

    /// Copies the current state for reporting.
    pub fn snapshot(&self) -> Snapshot {
        let inner = self.inner.lock().unwrap();
        Snapshot {
            latencies: inner.latencies.clone(),
            statuses: inner.statuses.clone(),
            windows: inner.windows.clone(),
            verification: inner.verification.clone(),
            bytes_written: inner.bytes_written,
        }
    }
}

impl fmt::Debug for Measurements {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let inner = self.inner.lock().unwrap();
        f.debug_struct("Measurements")
            .field("labels", &inner.latencies.len())
            .field("bytes_written", &inner.bytes_written)
            .finish_non_exhaustive()
    }
}

fn micros(duration: Duration) -> f64 {
    duration.as_secs_f64() * 1_000_000.0
}

/// A copy of all measurements at one point in time.
#[derive(Clone, Debug, Default)]
pub struct Snapshot {
    /// Latency sketches by label, e.g. `INSERT` or `READ-NOT_FOUND`.
    pub latencies: BTreeMap<String, LatencySketches>,
    /// Outcome counts by operation and status code.
    pub statuses: BTreeMap<String, BTreeMap<String, u64>>,
    /// Dual-window scan outcome counts by operation.
    pub windows: BTreeMap<String, WindowCounts>,
    /// Verification outcome counts.
    pub verification: BTreeMap<VerifyOutcome, u64>,
    /// Payload bytes written by successful inserts.
    pub bytes_written: u64,
}

impl Snapshot {
    /// Number of samples recorded under `label`.
    pub fn count(&self, label: &str) -> usize {
        self.latencies.get(label).map_or(0, LatencySketches::count)
    }

    /// Number of outcomes of `operation` with the given status code.
    pub fn status_count(&self, operation: &str, code: &str) -> u64 {
        self.statuses
            .get(operation)
            .and_then(|codes| codes.get(code))
            .copied()
            .unwrap_or_default()
    }

    /// Number of verifications with the given outcome.
    pub fn verifications(&self, outcome: VerifyOutcome) -> u64 {
        self.verification.get(&outcome).copied().unwrap_or_default()
    }
}
