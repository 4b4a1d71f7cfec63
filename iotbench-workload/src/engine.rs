//! The per-worker workload engine.

use std::sync::Arc;
use std::time::Duration;

use iotbench_storage::{Backend, FieldMap, FieldSet, RecordKey, WindowQuery};
use rand::Rng;
use rand::rngs::SmallRng;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

use crate::chooser::{OperationChooser, OperationKind};
use crate::config::ScanMode;
use crate::error::WorkloadError;
use crate::generator::{ExponentialGenerator, NumberGenerator};
use crate::payload::embedded_value;
use crate::proxy::InstrumentedBackend;
use crate::router::ShardRouter;
use crate::sequence::InsertSequence;
use crate::synthesizer::RecordSynthesizer;
use crate::verify::Verifier;

/// Upper bound of draws when choosing an acknowledged record with the exponential law.
const MAX_KEY_ATTEMPTS: usize = 1_000;

/// Bounded retries of failed inserts.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct RetryPolicy {
    /// Number of retries after the first attempt.
    pub limit: u32,
    /// Average wait between attempts.
    pub interval: Duration,
}

impl RetryPolicy {
    /// Draws the wait before the next retry, between `0.8` and `1.2` times the interval.
    pub fn backoff<R: Rng + ?Sized>(&self, rng: &mut R) -> Duration {
        self.interval.mul_f64(rng.random_range(0.8..1.2))
    }
}

/// Chooses existing records for reads, scans and updates.
#[derive(Debug)]
pub(crate) enum KeyChooser {
    /// Uniform over the acknowledged part of `first..=last`.
    Uniform {
        first: u64,
        last: u64,
        rng: SmallRng,
    },
    /// Offsets back from the latest acknowledged record.
    Exponential {
        first: u64,
        offsets: ExponentialGenerator,
    },
}

impl KeyChooser {
    pub(crate) fn uniform(first: u64, last: u64, rng: SmallRng) -> Self {
        Self::Uniform { first, last, rng }
    }

    /// Chooses a record at or below `limit`, the latest acknowledged record.
    fn choose(&mut self, limit: u64) -> u64 {
        match self {
            Self::Uniform { first, last, rng } => {
                let upper = limit.min(*last);
                if upper < *first {
                    return limit;
                }
                rng.random_range(*first..=upper)
            }
            Self::Exponential { first, offsets } => {
                for _ in 0..MAX_KEY_ATTEMPTS {
                    let offset = offsets.next_value();
                    if let Some(record) = limit.checked_sub(offset) {
                        return record.max(*first);
                    }
                }
                limit
            }
        }
    }
}

/// The outcome of one invocation of the run phase.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct Invocation {
    /// The operation that was chosen.
    pub operation: OperationKind,
    /// Whether the operation succeeded.
    pub ok: bool,
}

/// Generates and issues the operations of one worker.
///
/// An engine owns its generators and its backend connection. Invocations are sequential: the
/// engine never issues a call before the previous one has returned. The only state shared with
/// other engines is the insert sequence and the measurements.
#[derive(Debug)]
pub struct WorkloadEngine {
    pub(crate) table: String,
    pub(crate) backend: InstrumentedBackend,
    pub(crate) chooser: OperationChooser,
    pub(crate) synthesizer: RecordSynthesizer,
    pub(crate) keys: KeyChooser,
    pub(crate) scan_length: Box<dyn NumberGenerator>,
    pub(crate) router: ShardRouter,
    pub(crate) sequence: Arc<InsertSequence>,
    pub(crate) verifier: Option<Verifier>,
    pub(crate) retry: RetryPolicy,
    pub(crate) scan_mode: ScanMode,
    pub(crate) read_all_fields: bool,
    pub(crate) write_all_fields: bool,
    pub(crate) run_start_time: u64,
    pub(crate) rng: SmallRng,
    pub(crate) cancel: CancellationToken,
}

impl WorkloadEngine {
    /// The instrumented backend of this engine.
    pub fn backend(&self) -> &InstrumentedBackend {
        &self.backend
    }

    /// The token that stops this engine.
    pub fn cancellation(&self) -> &CancellationToken {
        &self.cancel
    }

    /// Initializes the backend connection.
    pub async fn init(&self) -> Result<(), WorkloadError> {
        self.backend
            .init()
            .await
            .map_err(|source| WorkloadError::Init {
                backend: self.backend.name(),
                source,
            })
    }

    /// Releases the backend connection and flushes pending writes.
    pub async fn cleanup(&self) -> Result<(), WorkloadError> {
        self.backend
            .cleanup()
            .await
            .map_err(|source| WorkloadError::Cleanup {
                backend: self.backend.name(),
                source,
            })
    }

    /// Performs one invocation of the load phase: a single insert.
    pub async fn do_insert(&mut self) -> bool {
        self.insert_next().await
    }

    /// Performs one invocation of the run phase.
    pub async fn do_transaction(&mut self) -> Invocation {
        let operation = self.chooser.next_operation();
        let ok = match operation {
            OperationKind::Insert => self.insert_next().await,
            OperationKind::Scan => self.transaction_scan().await,
            OperationKind::Read => self.transaction_read().await,
            OperationKind::Update => self.transaction_update().await,
            OperationKind::ReadModifyWrite => self.transaction_read_modify_write().await,
        };

        Invocation { operation, ok }
    }

    /// Chooses an acknowledged record number.
    ///
    /// Falls back to the first record number if nothing has been acknowledged yet.
    fn next_record(&mut self) -> u64 {
        match self.sequence.last_acknowledged() {
            Some(limit) => self.keys.choose(limit),
            None => self.sequence_start(),
        }
    }

    fn sequence_start(&self) -> u64 {
        match &self.keys {
            KeyChooser::Uniform { first, .. } | KeyChooser::Exponential { first, .. } => *first,
        }
    }

    fn read_fields(&mut self) -> Option<FieldSet> {
        (!self.read_all_fields).then(|| self.synthesizer.projection())
    }

    fn update_values(&mut self, key: &RecordKey) -> FieldMap {
        if self.write_all_fields {
            self.synthesizer.values(key)
        } else {
            self.synthesizer.single_value(key)
        }
    }

    async fn insert_next(&mut self) -> bool {
        let record = self.sequence.next_record();
        if !self.router.admits(record) {
            tracing::trace!(record, "record routed to overflow instances");
            return true;
        }

        let key = self.synthesizer.write_key(record);
        let values = self.synthesizer.values(&key);
        let ok = self.insert_with_retries(&key, &values).await;

        self.sequence.acknowledge(record);
        if ok {
            let bytes = values.values().map(|data| data.len() as u64).sum();
            self.backend.measurements().add_bytes_written(bytes);
        }

        ok
    }

    async fn insert_with_retries(&mut self, key: &RecordKey, values: &FieldMap) -> bool {
        let mut retries = 0;

        loop {
            let error = match self.backend.insert(&self.table, key, values).await {
                Ok(()) => return true,
                Err(error) => error,
            };

            if retries >= self.retry.limit {
                tracing::error!(
                    error = &error as &dyn std::error::Error,
                    %key,
                    attempts = retries + 1,
                    "insert failed, not retrying any more"
                );
                return false;
            }

            retries += 1;
            let backoff = self.retry.backoff(&mut self.rng);
            tracing::warn!(
                error = &error as &dyn std::error::Error,
                %key,
                retry = retries,
                ?backoff,
                "insert failed, retrying"
            );

            tokio::select! {
                _ = self.cancel.cancelled() => {
                    tracing::debug!(%key, "retry interrupted by shutdown");
                    return false;
                }
                _ = tokio::time::sleep(backoff) => {}
            }
        }
    }

    async fn transaction_scan(&mut self) -> bool {
        let record = self.next_record();
        let key = self.synthesizer.read_key(record);
        let len = self.scan_length.next_value() as usize;
        let fields = self.read_fields();

        match self.scan_mode {
            ScanMode::Range => self
                .backend
                .scan(&self.table, &key, len, fields.as_ref())
                .await
                .is_ok(),
            ScanMode::DualWindow => {
                let query = WindowQuery::new(
                    key.sensor(),
                    key.client(),
                    key.timestamp(),
                    self.run_start_time,
                )
                .with_limit(len);

                let scan = match self
                    .backend
                    .dual_window_scan(&self.table, &query, fields.as_ref())
                    .await
                {
                    Ok(scan) => scan,
                    Err(_) => return false,
                };

                self.backend
                    .measurements()
                    .record_window_scan(OperationKind::Scan.label(), &scan);

                let recent_avg = running_average(&scan.recent);
                let historical_avg = running_average(scan.historical_records());
                if recent_avg.is_none() || historical_avg.is_none() {
                    tracing::debug!(
                        device = %query.device_id(),
                        recent_empty = scan.recent_is_empty(),
                        historical_empty = scan.historical_is_empty(),
                        "scan returned empty windows"
                    );
                }
                tracing::info!(
                    device = %query.device_id(),
                    recent_avg,
                    historical_avg,
                    "window averages"
                );

                true
            }
        }
    }

    async fn transaction_read(&mut self) -> bool {
        let record = self.next_record();
        let key = self.synthesizer.read_key(record);
        let fields = self.read_fields();

        match self.backend.read(&self.table, &key, fields.as_ref()).await {
            Ok(cells) => {
                self.verify(&key, &cells);
                true
            }
            Err(_) => false,
        }
    }

    async fn transaction_update(&mut self) -> bool {
        let record = self.next_record();
        let key = self.synthesizer.write_key(record);
        let values = self.update_values(&key);

        self.backend.update(&self.table, &key, &values).await.is_ok()
    }

    async fn transaction_read_modify_write(&mut self) -> bool {
        let record = self.next_record();
        let key = self.synthesizer.write_key(record);
        let fields = self.read_fields();
        let values = self.update_values(&key);

        let start = Instant::now();
        let intended = self.backend.intended_start().unwrap_or(start);

        let read = self.backend.read(&self.table, &key, fields.as_ref()).await;
        let updated = self.backend.update(&self.table, &key, &values).await;

        let end = Instant::now();
        let ok = read.is_ok() && updated.is_ok();

        let cells = read.unwrap_or_default();
        self.verify(&key, &cells);

        self.backend.measurements().measure(
            OperationKind::ReadModifyWrite.label(),
            end - start,
            end.saturating_duration_since(intended),
        );

        ok
    }

    fn verify(&self, key: &RecordKey, cells: &FieldMap) {
        let Some(verifier) = &self.verifier else {
            return;
        };

        let start = Instant::now();
        let outcome = verifier.verify(key, cells);
        self.backend
            .measurements()
            .record_verification(outcome, start.elapsed());
    }
}

/// Averages the values embedded in all fields of the given records.
///
/// Fields that do not carry a value are skipped. Returns `None` if no value was found.
fn running_average(records: &[FieldMap]) -> Option<f64> {
    let mut average = 0.0;
    let mut count = 0u64;

    for value in records
        .iter()
        .flat_map(|record| record.values())
        .filter_map(|data| embedded_value(data))
    {
        count += 1;
        average += (value - average) / count as f64;
    }

    (count > 0).then_some(average)
}
