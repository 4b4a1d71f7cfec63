//! Runs the workers of one phase and reports their measurements.

use std::time::Duration;

use anyhow::{Context, Result};
use indicatif::{ProgressBar, ProgressStyle};
use iotbench_storage::{BoxedBackend, InMemoryBackend};
use iotbench_workload::{
    Phase, WorkerOptions, WorkerSummary, Workload, WorkloadConfig, WorkloadError, run_worker,
};
use tokio::signal::unix::SignalKind;
use tokio::task::JoinSet;

use crate::config::{Backend, Config};
use crate::report;

/// Hands out one connection per worker.
#[derive(Debug)]
enum Connector {
    Memory(InMemoryBackend),
}

impl Connector {
    fn new(backend: &Backend) -> Self {
        match backend {
            Backend::Memory { batch_size, .. } => {
                Self::Memory(InMemoryBackend::with_batch_size(*batch_size))
            }
        }
    }

    fn connect(&self) -> BoxedBackend {
        match self {
            Self::Memory(store) => Box::new(store.clone()),
        }
    }
}

/// Executes `phase` with all configured workers.
///
/// Worker startup failures are fatal and reported after all other workers have stopped. An
/// interrupt or termination signal stops the workers after their current invocation.
pub async fn execute(config: Config, phase: Phase) -> Result<()> {
    let workload =
        Workload::new(config.workload.clone()).context("invalid workload configuration")?;
    let connector = Connector::new(&config.backend);

    if phase == Phase::Run && matches!(config.backend, Backend::Memory { preload: true, .. }) {
        preload(&config.workload, &workload, &connector).await?;
    }

    let options = WorkerOptions {
        phase,
        operation_count: config.operation_count,
        duration: config.duration,
        target_ops_per_sec: config
            .target_ops_per_sec
            .map(|ops| ops / config.workers as f64),
    };

    if options.operation_count.is_none() && options.duration.is_none() {
        tracing::warn!("no operation count or duration configured, running until interrupted");
    }

    let mut tasks = JoinSet::new();
    for worker in 0..config.workers {
        let engine = workload.engine(worker as u64, connector.connect())?;
        tasks.spawn(run_worker(engine, options));
    }
    tracing::info!(workers = config.workers, ?phase, "workers started");

    let cancel = workload.cancellation().clone();
    let watcher = tokio::spawn(async move {
        elegant_departure::get_shutdown_guard().wait().await;
        tracing::info!("stopping workers ...");
        cancel.cancel();
    });
    let signals = tokio::spawn(async {
        elegant_departure::tokio::depart()
            .on_termination()
            .on_sigint()
            .on_signal(SignalKind::hangup())
            .await
    });

    let bar = ProgressBar::new_spinner()
        .with_style(ProgressStyle::with_template("{spinner} {msg} {elapsed}")?)
        .with_message(format!("Running {phase:?} phase:"));
    bar.enable_steady_tick(Duration::from_millis(100));

    let mut total = WorkerSummary::default();
    let mut failure: Option<WorkloadError> = None;
    while let Some(result) = tasks.join_next().await {
        match result? {
            Ok(summary) => {
                total.operations += summary.operations;
                total.failures += summary.failures;
                total.elapsed = total.elapsed.max(summary.elapsed);
            }
            Err(error) => {
                tracing::error!(error = &error as &dyn std::error::Error, "worker failed");
                failure.get_or_insert(error);
            }
        }
    }

    bar.finish_and_clear();
    watcher.abort();
    signals.abort();

    let snapshot = workload.measurements().snapshot();
    report::print_report(phase, config.workers, &total, &snapshot);

    match failure {
        Some(error) => Err(error).context("worker could not start"),
        None => Ok(()),
    }
}

/// Loads the durable records of the run phase into the shared store.
///
/// The preload replays the seed and timestamp origin of `workload`, so that the records it
/// writes verify in the run phase. Its measurements are discarded.
async fn preload(
    config: &WorkloadConfig,
    workload: &Workload,
    connector: &Connector,
) -> Result<()> {
    if config.record_count == 0 {
        return Ok(());
    }

    let preload = Workload::new(WorkloadConfig {
        record_count: 0,
        seed: Some(workload.seed()),
        timestamp_origin: Some(workload.timestamp_origin()),
        ..config.clone()
    })?;

    let options = WorkerOptions {
        phase: Phase::Load,
        operation_count: Some(config.record_count),
        ..Default::default()
    };
    let engine = preload.engine(0, connector.connect())?;
    let summary = run_worker(engine, options).await?;

    tracing::info!(
        records = summary.operations,
        failures = summary.failures,
        elapsed = ?summary.elapsed,
        "preloaded records"
    );

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn preload_fills_shared_store() {
        let config = WorkloadConfig {
            record_count: 25,
            seed: Some(3),
            timestamp_origin: Some(1_000_000),
            ..Default::default()
        };
        let workload = Workload::new(config.clone()).unwrap();
        let connector = Connector::new(&Backend::Memory {
            batch_size: 10,
            preload: true,
        });

        preload(&config, &workload, &connector).await.unwrap();

        let Connector::Memory(store) = &connector;
        assert_eq!(store.len("usertable"), 25);
        assert_eq!(store.pending(), 0);
    }
}
