//! End-to-end scenarios of engines running against instrumented backends.

use std::collections::BTreeMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use anyhow::Result;
use iotbench_storage::{
    Backend, BackendError, BackendResult, FieldMap, FieldSet, InMemoryBackend, RecordKey,
    WindowQuery, WindowScan,
};
use iotbench_workload::config::{ClusterConfig, InsertOrder, Proportions, ScanMode};
use iotbench_workload::generator::{ConstantGenerator, stream_rng};
use iotbench_workload::payload::random_payload;
use iotbench_workload::synthesizer::{KeyLayout, PayloadMode, RecordSynthesizer};
use iotbench_workload::{
    OperationKind, Phase, Verifier, VerifyOutcome, WorkerOptions, Workload, WorkloadConfig,
    run_worker,
};
use tracing_subscriber::EnvFilter;

const TABLE: &str = "usertable";

fn init_tracing() {
    let env_filter = EnvFilter::new("ERROR")
        .add_directive("iotbench_workload=TRACE".parse().unwrap())
        .add_directive("iotbench_storage=TRACE".parse().unwrap());

    tracing_subscriber::fmt::fmt()
        .with_env_filter(env_filter)
        .with_test_writer()
        .compact()
        .try_init()
        .ok();
}

fn config() -> WorkloadConfig {
    WorkloadConfig {
        seed: Some(42),
        timestamp_origin: Some(1_700_000_000_000),
        field_length: 64,
        ..Default::default()
    }
}

fn only(operation: OperationKind) -> Proportions {
    let mut proportions = Proportions {
        read: 0.0,
        update: 0.0,
        insert: 0.0,
        scan: 0.0,
        read_modify_write: 0.0,
    };
    match operation {
        OperationKind::Insert => proportions.insert = 1.0,
        OperationKind::Scan => proportions.scan = 1.0,
        OperationKind::Read => proportions.read = 1.0,
        OperationKind::Update => proportions.update = 1.0,
        OperationKind::ReadModifyWrite => proportions.read_modify_write = 1.0,
    }
    proportions
}

/// Records which calls reach the backend and the size of every written field.
#[derive(Clone, Debug, Default)]
struct RecordingBackend {
    inner: InMemoryBackend,
    calls: Arc<Mutex<BTreeMap<&'static str, usize>>>,
    written: Arc<Mutex<Vec<usize>>>,
    scan_limits: Arc<Mutex<Vec<usize>>>,
}

impl RecordingBackend {
    fn record(&self, call: &'static str) {
        *self.calls.lock().unwrap().entry(call).or_default() += 1;
    }

    fn record_values(&self, values: &FieldMap) {
        let mut written = self.written.lock().unwrap();
        written.extend(values.values().map(|data| data.len()));
    }

    fn calls(&self, call: &str) -> usize {
        self.calls.lock().unwrap().get(call).copied().unwrap_or(0)
    }
}

#[async_trait::async_trait]
impl Backend for RecordingBackend {
    fn name(&self) -> &'static str {
        "recording"
    }

    async fn insert(&self, table: &str, key: &RecordKey, values: &FieldMap) -> BackendResult<()> {
        self.record("insert");
        self.record_values(values);
        self.inner.insert(table, key, values).await
    }

    async fn read(
        &self,
        table: &str,
        key: &RecordKey,
        fields: Option<&FieldSet>,
    ) -> BackendResult<FieldMap> {
        self.record("read");
        self.inner.read(table, key, fields).await
    }

    async fn update(&self, table: &str, key: &RecordKey, values: &FieldMap) -> BackendResult<()> {
        self.record("update");
        self.record_values(values);
        self.inner.update(table, key, values).await
    }

    async fn delete(&self, table: &str, key: &RecordKey) -> BackendResult<()> {
        self.record("delete");
        self.inner.delete(table, key).await
    }

    async fn scan(
        &self,
        table: &str,
        start_key: &RecordKey,
        limit: usize,
        fields: Option<&FieldSet>,
    ) -> BackendResult<Vec<FieldMap>> {
        self.record("scan");
        self.scan_limits.lock().unwrap().push(limit);
        self.inner.scan(table, start_key, limit, fields).await
    }

    async fn dual_window_scan(
        &self,
        table: &str,
        query: &WindowQuery,
        fields: Option<&FieldSet>,
    ) -> BackendResult<WindowScan> {
        self.record("dual_window_scan");
        self.inner.dual_window_scan(table, query, fields).await
    }
}

/// Rejects every insert.
#[derive(Debug, Default)]
struct FailingBackend {
    attempts: Arc<Mutex<usize>>,
}

#[async_trait::async_trait]
impl Backend for FailingBackend {
    fn name(&self) -> &'static str {
        "failing"
    }

    async fn insert(&self, _: &str, _: &RecordKey, _: &FieldMap) -> BackendResult<()> {
        *self.attempts.lock().unwrap() += 1;
        Err(BackendError::Unavailable("node is down".into()))
    }

    async fn read(&self, _: &str, _: &RecordKey, _: Option<&FieldSet>) -> BackendResult<FieldMap> {
        Err(BackendError::NotImplemented("failing"))
    }

    async fn update(&self, _: &str, _: &RecordKey, _: &FieldMap) -> BackendResult<()> {
        Err(BackendError::NotImplemented("failing"))
    }

    async fn delete(&self, _: &str, _: &RecordKey) -> BackendResult<()> {
        Err(BackendError::NotImplemented("failing"))
    }

    async fn scan(
        &self,
        _: &str,
        _: &RecordKey,
        _: usize,
        _: Option<&FieldSet>,
    ) -> BackendResult<Vec<FieldMap>> {
        Err(BackendError::NotImplemented("failing"))
    }

    async fn dual_window_scan(
        &self,
        _: &str,
        _: &WindowQuery,
        _: Option<&FieldSet>,
    ) -> BackendResult<WindowScan> {
        Err(BackendError::NotImplemented("failing"))
    }
}

#[tokio::test]
async fn insert_only_mix_never_scans() -> Result<()> {
    init_tracing();

    let workload = Workload::new(WorkloadConfig {
        proportions: only(OperationKind::Insert),
        ..config()
    })?;
    let backend = RecordingBackend::default();
    let mut engine = workload.engine(0, Box::new(backend.clone()))?;

    for _ in 0..1_000 {
        let invocation = engine.do_transaction().await;
        assert_eq!(invocation.operation, OperationKind::Insert);
        assert!(invocation.ok);
    }

    assert_eq!(backend.calls("insert"), 1_000);
    assert_eq!(backend.calls("dual_window_scan"), 0);
    assert_eq!(backend.calls("scan"), 0);
    assert_eq!(backend.calls("read"), 0);
    assert_eq!(backend.calls("update"), 0);

    Ok(())
}

#[tokio::test]
async fn constant_length_payloads_are_exact() -> Result<()> {
    init_tracing();

    let workload = Workload::new(WorkloadConfig {
        field_count: 4,
        write_all_fields: true,
        proportions: Proportions {
            insert: 0.5,
            update: 0.5,
            ..only(OperationKind::Insert)
        },
        ..config()
    })?;
    let backend = RecordingBackend::default();
    let mut engine = workload.engine(0, Box::new(backend.clone()))?;

    for _ in 0..500 {
        engine.do_transaction().await;
    }

    assert!(backend.calls("update") > 0);
    let written = backend.written.lock().unwrap();
    assert_eq!(written.len(), 500 * 4);
    assert!(written.iter().all(|len| *len == 64));

    Ok(())
}

#[tokio::test(start_paused = true)]
async fn failed_inserts_retry_exactly_the_limit() -> Result<()> {
    init_tracing();

    for limit in [0, 1, 3] {
        let workload = Workload::new(WorkloadConfig {
            insertion_retry_limit: limit,
            insertion_retry_interval: Duration::from_secs(3),
            ..config()
        })?;
        let backend = FailingBackend::default();
        let attempts = Arc::clone(&backend.attempts);
        let mut engine = workload.engine(0, Box::new(backend))?;

        let start = tokio::time::Instant::now();
        assert!(!engine.do_insert().await);

        assert_eq!(*attempts.lock().unwrap(), limit as usize + 1);
        assert!(start.elapsed() >= Duration::from_millis(2_400) * limit);
        assert!(start.elapsed() <= Duration::from_millis(3_600) * limit);

        // exhausting retries fails the operation, not the worker
        assert_eq!(workload.sequence().last_acknowledged(), Some(0));
        let snapshot = workload.measurements().snapshot();
        assert_eq!(snapshot.count("INSERT-FAILED"), limit as usize + 1);
        assert_eq!(
            snapshot.status_count("INSERT", "SERVICE_UNAVAILABLE"),
            u64::from(limit) + 1
        );
    }

    Ok(())
}

#[tokio::test(start_paused = true)]
async fn shutdown_interrupts_retry_backoff() -> Result<()> {
    let workload = Workload::new(WorkloadConfig {
        insertion_retry_limit: 5,
        insertion_retry_interval: Duration::from_secs(60),
        ..config()
    })?;
    let backend = FailingBackend::default();
    let attempts = Arc::clone(&backend.attempts);
    let mut engine = workload.engine(0, Box::new(backend))?;

    workload.cancellation().cancel();
    let start = tokio::time::Instant::now();
    assert!(!engine.do_insert().await);

    assert_eq!(*attempts.lock().unwrap(), 1);
    assert!(start.elapsed() < Duration::from_secs(1));

    Ok(())
}

#[tokio::test]
async fn dual_window_scans_are_counted() -> Result<()> {
    init_tracing();

    let workload = Workload::new(WorkloadConfig {
        proportions: only(OperationKind::Scan),
        ..config()
    })?;
    let backend = RecordingBackend::default();

    let load = WorkerOptions {
        phase: Phase::Load,
        operation_count: Some(200),
        ..Default::default()
    };
    run_worker(workload.engine(0, Box::new(backend.clone()))?, load).await?;

    let run = WorkerOptions {
        phase: Phase::Run,
        operation_count: Some(100),
        ..Default::default()
    };
    let summary = run_worker(workload.engine(1, Box::new(backend.clone()))?, run).await?;

    assert_eq!(summary.failures, 0);
    assert_eq!(backend.calls("dual_window_scan"), 100);

    let snapshot = workload.measurements().snapshot();
    assert_eq!(snapshot.count("SCAN"), 100);
    assert_eq!(snapshot.windows["SCAN"].scans, 100);
    assert_eq!(snapshot.windows["SCAN"].historical_failed, 0);

    Ok(())
}

#[tokio::test]
async fn stored_payloads_verify_after_read_back() -> Result<()> {
    let layout = KeyLayout {
        client: "cli11".parse()?,
        field_count: 3,
        insert_order: InsertOrder::Ordered,
        timestamp_origin: 1_000_000,
        read_lag: 0,
        zero_padding: 1,
    };
    let mut stream = 0;
    let mut synthesizer = RecordSynthesizer::new(
        layout,
        PayloadMode::Deterministic { seed: 42 },
        Box::new(ConstantGenerator::new(64)),
        || {
            stream += 1;
            stream_rng(42, stream)
        },
    );

    let backend = InMemoryBackend::new();
    let verifier = Verifier::new(42, 64);
    let mut rng = stream_rng(42, 100);

    for record in 0..20 {
        let key = synthesizer.write_key(record);
        let values = synthesizer.values(&key);
        backend.insert(TABLE, &key, &values).await?;

        let cells = backend.read(TABLE, &key, None).await?;
        assert_eq!(verifier.verify(&key, &cells), VerifyOutcome::Match);

        // A value drawn at random in place of the replayed one must not verify.
        let field = synthesizer.field_names()[0].clone();
        let overwrite = FieldMap::from([(field, random_payload(&mut rng, 64))]);
        backend.update(TABLE, &key, &overwrite).await?;

        let cells = backend.read(TABLE, &key, None).await?;
        assert_eq!(verifier.verify(&key, &cells), VerifyOutcome::Mismatch);
    }

    let missing = synthesizer.write_key(1_000);
    let cells = backend.read(TABLE, &missing, None).await.unwrap_or_default();
    assert_eq!(verifier.verify(&missing, &cells), VerifyOutcome::Missing);

    Ok(())
}

#[tokio::test]
async fn read_modify_write_reads_then_updates() -> Result<()> {
    init_tracing();

    let workload = Workload::new(WorkloadConfig {
        proportions: only(OperationKind::ReadModifyWrite),
        ..config()
    })?;
    let backend = RecordingBackend::default();

    let load = WorkerOptions {
        phase: Phase::Load,
        operation_count: Some(20),
        ..Default::default()
    };
    run_worker(workload.engine(0, Box::new(backend.clone()))?, load).await?;
    assert_eq!(backend.calls("insert"), 20);

    let run = WorkerOptions {
        phase: Phase::Run,
        operation_count: Some(200),
        ..Default::default()
    };
    let summary = run_worker(workload.engine(1, Box::new(backend.clone()))?, run).await?;
    assert_eq!(summary.operations, 200);

    assert_eq!(backend.calls("read"), 200);
    assert_eq!(backend.calls("update"), 200);
    assert_eq!(backend.calls("insert"), 20);

    let snapshot = workload.measurements().snapshot();
    assert_eq!(snapshot.count("READ-MODIFY-WRITE"), 200);
    assert_eq!(snapshot.count("READ") + snapshot.count("READ-FAILED"), 200);
    assert_eq!(snapshot.count("UPDATE"), 200);

    // every read is verified, whether or not the record was found
    let matched = snapshot.verifications(VerifyOutcome::Match);
    let missing = snapshot.verifications(VerifyOutcome::Missing);
    assert_eq!(snapshot.verifications(VerifyOutcome::Mismatch), 0);
    assert_eq!(matched + missing, 200);
    assert_eq!(matched, snapshot.count("READ") as u64);

    Ok(())
}

#[tokio::test]
async fn records_past_the_threshold_skip_non_overflow_instances() -> Result<()> {
    init_tracing();

    // 44 instances with a capacity of 32 records each, so the threshold is 2.
    let workload = Workload::new(WorkloadConfig {
        client: "cli11".to_owned(),
        cluster: ClusterConfig {
            total_insert_budget: 44 * 16 * 2,
            ..Default::default()
        },
        ..config()
    })?;
    assert_eq!(workload.router().threshold(), 2);

    let backend = RecordingBackend::default();
    let load = WorkerOptions {
        phase: Phase::Load,
        operation_count: Some(10),
        ..Default::default()
    };
    let summary = run_worker(workload.engine(0, Box::new(backend.clone()))?, load).await?;

    assert_eq!(summary.operations, 10);
    assert_eq!(summary.failures, 0);
    assert_eq!(backend.calls("insert"), 2);
    assert_eq!(backend.inner.len(TABLE), 2);
    assert_eq!(workload.sequence().last_acknowledged(), Some(1));

    Ok(())
}

#[tokio::test]
async fn range_scans_use_the_drawn_length() -> Result<()> {
    init_tracing();

    let workload = Workload::new(WorkloadConfig {
        proportions: only(OperationKind::Scan),
        scan_mode: ScanMode::Range,
        max_scan_length: 10,
        ..config()
    })?;
    let backend = RecordingBackend::default();

    let load = WorkerOptions {
        phase: Phase::Load,
        operation_count: Some(50),
        ..Default::default()
    };
    run_worker(workload.engine(0, Box::new(backend.clone()))?, load).await?;

    let run = WorkerOptions {
        phase: Phase::Run,
        operation_count: Some(100),
        ..Default::default()
    };
    let summary = run_worker(workload.engine(1, Box::new(backend.clone()))?, run).await?;

    assert_eq!(summary.failures, 0);
    assert_eq!(backend.calls("scan"), 100);
    assert_eq!(backend.calls("dual_window_scan"), 0);

    let limits = backend.scan_limits.lock().unwrap();
    assert_eq!(limits.len(), 100);
    assert!(limits.iter().all(|limit| (1..=10).contains(limit)));

    let snapshot = workload.measurements().snapshot();
    assert_eq!(snapshot.count("SCAN"), 100);
    assert!(!snapshot.windows.contains_key("SCAN"));

    Ok(())
}
