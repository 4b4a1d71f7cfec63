//! The workload engine of the IoT benchmark harness.
//!
//! A [`Workload`] validates the configuration once and hands out one [`WorkloadEngine`] per
//! worker. Each engine owns its generators and its backend connection, while the insert
//! sequence and the [`Measurements`] are shared by all workers of a run:
//!
//! - In the load phase, [`WorkloadEngine::do_insert`] writes the next record of the sequence and
//!   retries failed inserts with a jittered backoff.
//! - In the run phase, [`WorkloadEngine::do_transaction`] draws an operation from the configured
//!   mix and issues it against records that have already been acknowledged.
//!
//! Every backend call goes through an [`InstrumentedBackend`], which records actual and
//! intended latencies as well as outcome counts. [`run_worker`] drives an engine in a loop,
//! optionally paced to a target rate.
#![warn(missing_docs)]
#![warn(missing_debug_implementations)]

pub mod chooser;
pub mod config;
mod engine;
mod error;
pub mod generator;
pub mod measurement;
pub mod payload;
mod proxy;
pub mod router;
mod sequence;
pub mod synthesizer;
mod verify;
mod worker;
mod workload;

pub use chooser::{OperationChooser, OperationKind};
pub use config::{Phase, WorkloadConfig};
pub use engine::{Invocation, RetryPolicy, WorkloadEngine};
pub use error::{ConfigError, WorkloadError};
pub use measurement::{LatencySummary, Measurements, Snapshot};
pub use proxy::{ErrorLabels, InstrumentedBackend};
pub use router::ShardRouter;
pub use sequence::InsertSequence;
pub use verify::{Verifier, VerifyOutcome};
pub use worker::{WorkerOptions, WorkerSummary, run_worker};
pub use workload::Workload;
