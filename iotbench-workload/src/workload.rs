//! A validated workload that hands out one [`WorkloadEngine`] per worker.

use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};

use iotbench_storage::{BoxedBackend, ClientId};
use rand::rngs::SmallRng;
use tokio_util::sync::CancellationToken;

use crate::chooser::OperationChooser;
use crate::config::{
    LengthDistribution, RequestDistribution, ScanLengthDistribution, WorkloadConfig,
};
use crate::engine::{KeyChooser, RetryPolicy, WorkloadEngine};
use crate::error::ConfigError;
use crate::generator::{
    ConstantGenerator, ExponentialGenerator, Histogram, NumberGenerator, UniformGenerator,
    ZipfianGenerator, stream_rng,
};
use crate::measurement::Measurements;
use crate::proxy::{ErrorLabels, InstrumentedBackend};
use crate::router::ShardRouter;
use crate::sequence::InsertSequence;
use crate::synthesizer::{KeyLayout, PayloadMode, RecordSynthesizer};
use crate::verify::Verifier;

/// Number of independent RNG streams reserved for each worker.
const STREAMS_PER_WORKER: u64 = 16;

/// The validated configuration and the state shared by all workers of a run.
///
/// Creating a workload checks the whole configuration, so that configuration errors abort the
/// run before any backend is touched. Workers then obtain their engines through
/// [`engine`](Self::engine).
#[derive(Debug)]
pub struct Workload {
    config: WorkloadConfig,
    client: ClientId,
    router: ShardRouter,
    histogram: Option<Histogram>,
    seed: u64,
    timestamp_origin: u64,
    key_space: u64,
    sequence: Arc<InsertSequence>,
    measurements: Arc<Measurements>,
    cancel: CancellationToken,
}

impl Workload {
    /// Validates the configuration and sets up the shared state.
    pub fn new(config: WorkloadConfig) -> Result<Self, ConfigError> {
        let client: ClientId = config.client.parse()?;
        let router = ShardRouter::new(&config.cluster, &client)?;

        if config.field_count == 0 {
            return Err(ConfigError::invalid("field_count", "must be at least 1"));
        }
        if config.max_scan_length == 0 {
            return Err(ConfigError::invalid("max_scan_length", "must be at least 1"));
        }
        if config.data_integrity
            && config.field_length_distribution != LengthDistribution::Constant
        {
            return Err(ConfigError::IntegrityRequiresConstantLength);
        }
        if config.field_length == 0
            && config.field_length_distribution != LengthDistribution::Histogram
        {
            return Err(ConfigError::invalid("field_length", "must be at least 1"));
        }

        let histogram = match config.field_length_distribution {
            LengthDistribution::Histogram => Some(Histogram::load(&config.field_length_histogram)?),
            _ => None,
        };

        let seed = config.seed.unwrap_or_else(rand::random);
        let timestamp_origin = config.timestamp_origin.unwrap_or_else(wall_clock_millis);
        let insert_count = config.insert_count.unwrap_or(router.capacity());
        let key_space = config.record_count.saturating_add(insert_count).max(1);

        let workload = Self {
            sequence: Arc::new(InsertSequence::new(
                config.insert_start.saturating_add(config.record_count),
            )),
            measurements: Arc::new(Measurements::new()),
            cancel: CancellationToken::new(),
            config,
            client,
            router,
            histogram,
            seed,
            timestamp_origin,
            key_space,
        };

        // Build the generators once to surface parameter errors before the run starts.
        workload.parts(0)?;

        tracing::info!(
            client = %workload.client,
            rank = workload.router.rank(),
            overflow = workload.router.is_overflow(),
            threshold = workload.router.threshold(),
            seed,
            timestamp_origin,
            "workload configured"
        );

        Ok(workload)
    }

    /// Replaces the token that stops all engines of this workload.
    pub fn with_cancellation(mut self, cancel: CancellationToken) -> Self {
        self.cancel = cancel;
        self
    }

    /// The validated configuration.
    pub fn config(&self) -> &WorkloadConfig {
        &self.config
    }

    /// The client all engines write as.
    pub fn client(&self) -> &ClientId {
        &self.client
    }

    /// The overflow router of this instance.
    pub fn router(&self) -> &ShardRouter {
        &self.router
    }

    /// The seed of all generators and payloads.
    pub fn seed(&self) -> u64 {
        self.seed
    }

    /// Logical timestamp of record number zero, also used as the run start time of scans.
    pub fn timestamp_origin(&self) -> u64 {
        self.timestamp_origin
    }

    /// The insert sequence shared by all engines.
    pub fn sequence(&self) -> &Arc<InsertSequence> {
        &self.sequence
    }

    /// The recorder shared by all engines.
    pub fn measurements(&self) -> &Arc<Measurements> {
        &self.measurements
    }

    /// The token that stops all engines.
    pub fn cancellation(&self) -> &CancellationToken {
        &self.cancel
    }

    /// Creates the engine of one worker around its own backend connection.
    ///
    /// Engines of different workers draw from independent RNG streams.
    pub fn engine(&self, worker: u64, backend: BoxedBackend) -> Result<WorkloadEngine, ConfigError> {
        let parts = self.parts(worker)?;
        let labels = ErrorLabels {
            each_error: self.config.report_latency_for_each_error,
            tracked: self.config.latency_tracked_errors.clone(),
        };

        Ok(WorkloadEngine {
            table: self.config.table.clone(),
            backend: InstrumentedBackend::new(backend, Arc::clone(&self.measurements), labels),
            chooser: parts.chooser,
            synthesizer: parts.synthesizer,
            keys: parts.keys,
            scan_length: parts.scan_length,
            router: self.router.clone(),
            sequence: Arc::clone(&self.sequence),
            verifier: self.config.data_integrity.then(|| {
                Verifier::new(self.seed, self.config.field_length as usize)
            }),
            retry: RetryPolicy {
                limit: self.config.insertion_retry_limit,
                interval: self.config.insertion_retry_interval,
            },
            scan_mode: self.config.scan_mode,
            read_all_fields: self.config.read_all_fields,
            write_all_fields: self.config.write_all_fields,
            run_start_time: self.timestamp_origin,
            rng: parts.rng,
            cancel: self.cancel.clone(),
        })
    }

    fn parts(&self, worker: u64) -> Result<EngineParts, ConfigError> {
        let config = &self.config;
        let mut stream = worker.wrapping_mul(STREAMS_PER_WORKER);
        let mut rng = || {
            stream += 1;
            stream_rng(self.seed, stream)
        };

        let chooser = OperationChooser::new(&config.proportions, rng())?;

        let field_length: Box<dyn NumberGenerator> = match config.field_length_distribution {
            LengthDistribution::Constant => Box::new(ConstantGenerator::new(config.field_length)),
            LengthDistribution::Uniform => {
                Box::new(UniformGenerator::new(1, config.field_length, rng()))
            }
            LengthDistribution::Zipfian => {
                Box::new(ZipfianGenerator::new(1, config.field_length, rng())?)
            }
            LengthDistribution::Histogram => match &self.histogram {
                Some(histogram) => Box::new(histogram.generator(rng())?),
                None => {
                    return Err(ConfigError::invalid(
                        "field_length_histogram",
                        "histogram was not loaded",
                    ));
                }
            },
        };

        let scan_length: Box<dyn NumberGenerator> = match config.scan_length_distribution {
            ScanLengthDistribution::Uniform => {
                Box::new(UniformGenerator::new(1, config.max_scan_length, rng()))
            }
            ScanLengthDistribution::Zipfian => {
                Box::new(ZipfianGenerator::new(1, config.max_scan_length, rng())?)
            }
        };

        let lower = config.insert_start;
        let upper = lower.saturating_add(self.key_space - 1);
        let keys = match config.request_distribution {
            RequestDistribution::Uniform => KeyChooser::uniform(lower, upper, rng()),
            RequestDistribution::Exponential => {
                let range = self.key_space as f64 * config.exponential_frac;
                KeyChooser::Exponential {
                    first: lower,
                    offsets: ExponentialGenerator::new(
                        config.exponential_percentile,
                        range,
                        rng(),
                    )?,
                }
            }
        };

        let payload = if config.data_integrity {
            PayloadMode::Deterministic { seed: self.seed }
        } else {
            PayloadMode::Random
        };

        let layout = KeyLayout {
            client: self.client.clone(),
            field_count: config.field_count,
            insert_order: config.insert_order,
            timestamp_origin: self.timestamp_origin,
            read_lag: config.read_lag,
            zero_padding: config.zero_padding,
        };
        let synthesizer = RecordSynthesizer::new(layout, payload, field_length, &mut rng);

        Ok(EngineParts {
            chooser,
            synthesizer,
            keys,
            scan_length,
            rng: rng(),
        })
    }
}

struct EngineParts {
    chooser: OperationChooser,
    synthesizer: RecordSynthesizer,
    keys: KeyChooser,
    scan_length: Box<dyn NumberGenerator>,
    rng: SmallRng,
}

fn wall_clock_millis() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map_or(0, |elapsed| elapsed.as_millis() as u64)
}
