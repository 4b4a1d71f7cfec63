//! The invocation loop of a single worker.

use std::time::Duration;

use tokio::time::Instant;

use crate::config::Phase;
use crate::engine::WorkloadEngine;
use crate::error::WorkloadError;

/// Limits and pacing of one worker.
#[derive(Clone, Copy, Debug, Default, PartialEq)]
pub struct WorkerOptions {
    /// Whether the worker loads records or runs the transaction mix.
    pub phase: Phase,
    /// Stop after this many invocations.
    pub operation_count: Option<u64>,
    /// Stop once this much time has passed.
    pub duration: Option<Duration>,
    /// Target invocations per second of this worker.
    ///
    /// Without a target, invocations are issued back to back and intended latencies equal
    /// actual latencies.
    pub target_ops_per_sec: Option<f64>,
}

/// What a worker did until it stopped.
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq)]
pub struct WorkerSummary {
    /// Invocations issued.
    pub operations: u64,
    /// Invocations that reported a failure.
    pub failures: u64,
    /// Time from the first invocation until the worker stopped.
    pub elapsed: Duration,
}

/// Drives `engine` until the operation count or the duration is exhausted, or the engine is
/// cancelled.
///
/// Cancellation is checked between invocations and interrupts pacing waits, but never an
/// invocation in flight. The backend is initialized before the first and cleaned up after the
/// last invocation. Failures to do so are fatal for this worker.
pub async fn run_worker(
    mut engine: WorkloadEngine,
    options: WorkerOptions,
) -> Result<WorkerSummary, WorkloadError> {
    engine.init().await?;

    let start = Instant::now();
    let deadline = options.duration.map(|duration| start + duration);
    let pace = options
        .target_ops_per_sec
        .filter(|ops| ops.is_finite() && *ops > 0.0);

    let cancel = engine.cancellation().clone();
    let mut summary = WorkerSummary::default();

    loop {
        if cancel.is_cancelled() {
            tracing::debug!("worker cancelled");
            break;
        }
        if options
            .operation_count
            .is_some_and(|count| summary.operations >= count)
        {
            break;
        }

        let intended = match pace {
            Some(ops) => start + Duration::from_secs_f64(summary.operations as f64 / ops),
            None => Instant::now(),
        };
        if deadline.is_some_and(|deadline| intended >= deadline) {
            break;
        }

        if pace.is_some() {
            tokio::select! {
                _ = cancel.cancelled() => break,
                _ = tokio::time::sleep_until(intended) => {}
            }
            engine.backend().set_intended_start(Some(intended));
        }

        let ok = match options.phase {
            Phase::Load => engine.do_insert().await,
            Phase::Run => engine.do_transaction().await.ok,
        };

        summary.operations += 1;
        summary.failures += u64::from(!ok);
    }

    summary.elapsed = start.elapsed();
    engine.backend().set_intended_start(None);
    engine.cleanup().await?;

    tracing::debug!(
        operations = summary.operations,
        failures = summary.failures,
        elapsed = ?summary.elapsed,
        "worker finished"
    );

    Ok(summary)
}

#[cfg(test)]
mod tests {
    use iotbench_storage::InMemoryBackend;

    use super::*;
    use crate::config::{Proportions, WorkloadConfig};
    use crate::workload::Workload;

    fn workload(config: WorkloadConfig) -> Workload {
        Workload::new(WorkloadConfig {
            seed: Some(7),
            timestamp_origin: Some(1_000_000),
            field_length: 64,
            ..config
        })
        .unwrap()
    }

    #[tokio::test]
    async fn load_phase_inserts_operation_count_records() {
        let workload = workload(WorkloadConfig::default());
        let backend = InMemoryBackend::new();
        let engine = workload.engine(0, Box::new(backend.clone())).unwrap();

        let options = WorkerOptions {
            phase: Phase::Load,
            operation_count: Some(50),
            ..Default::default()
        };
        let summary = run_worker(engine, options).await.unwrap();

        assert_eq!(summary.operations, 50);
        assert_eq!(summary.failures, 0);
        assert_eq!(backend.len("usertable"), 50);
        assert_eq!(workload.sequence().last_acknowledged(), Some(49));

        let snapshot = workload.measurements().snapshot();
        assert_eq!(snapshot.count("INSERT"), 50);
        assert_eq!(snapshot.count("INIT"), 1);
        assert_eq!(snapshot.count("CLEANUP"), 1);
        assert_eq!(snapshot.bytes_written, 50 * 64);
    }

    #[tokio::test]
    async fn run_phase_reads_loaded_records() {
        let config = WorkloadConfig {
            proportions: Proportions {
                read: 1.0,
                update: 0.0,
                insert: 0.0,
                scan: 0.0,
                read_modify_write: 0.0,
            },
            read_lag: 0,
            ..Default::default()
        };
        let workload = workload(config);
        let backend = InMemoryBackend::new();

        let load = WorkerOptions {
            phase: Phase::Load,
            operation_count: Some(20),
            ..Default::default()
        };
        let engine = workload.engine(0, Box::new(backend.clone())).unwrap();
        run_worker(engine, load).await.unwrap();

        let run = WorkerOptions {
            phase: Phase::Run,
            operation_count: Some(100),
            ..Default::default()
        };
        let engine = workload.engine(1, Box::new(backend.clone())).unwrap();
        let summary = run_worker(engine, run).await.unwrap();

        assert_eq!(summary.operations, 100);
        let snapshot = workload.measurements().snapshot();
        assert_eq!(
            snapshot.count("READ") + snapshot.count("READ-FAILED"),
            100
        );
    }

    #[tokio::test(start_paused = true)]
    async fn target_rate_paces_invocations() {
        let workload = workload(WorkloadConfig::default());
        let engine = workload
            .engine(0, Box::new(InMemoryBackend::new()))
            .unwrap();

        let options = WorkerOptions {
            phase: Phase::Load,
            operation_count: Some(11),
            target_ops_per_sec: Some(100.0),
            ..Default::default()
        };
        let summary = run_worker(engine, options).await.unwrap();

        assert_eq!(summary.operations, 11);
        assert!(summary.elapsed >= Duration::from_millis(100), "{:?}", summary.elapsed);
    }

    #[tokio::test(start_paused = true)]
    async fn duration_bounds_the_run() {
        let workload = workload(WorkloadConfig::default());
        let engine = workload
            .engine(0, Box::new(InMemoryBackend::new()))
            .unwrap();

        let options = WorkerOptions {
            phase: Phase::Load,
            duration: Some(Duration::from_secs(1)),
            target_ops_per_sec: Some(10.0),
            ..Default::default()
        };
        let summary = run_worker(engine, options).await.unwrap();

        assert_eq!(summary.operations, 10);
    }

    #[tokio::test]
    async fn cancelled_worker_stops_before_first_invocation() {
        let workload = workload(WorkloadConfig::default());
        let engine = workload
            .engine(0, Box::new(InMemoryBackend::new()))
            .unwrap();
        workload.cancellation().cancel();

        let summary = run_worker(engine, WorkerOptions::default()).await.unwrap();
        assert_eq!(summary.operations, 0);
    }
}
