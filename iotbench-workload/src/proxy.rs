//! Instrumentation around the storage backend.

use std::borrow::Cow;
use std::collections::BTreeSet;
use std::future::Future;
use std::sync::{Arc, Mutex};

use iotbench_storage::{
    Backend, BackendError, BackendResult, BoxedBackend, FieldMap, FieldSet, RecordKey,
    WindowQuery, WindowScan,
};
use tokio::time::Instant;
use tracing::Instrument;

use crate::measurement::{Measurements, STATUS_OK};

/// How failed calls are labeled in the latency measurements.
#[derive(Clone, Debug, Default, Eq, PartialEq)]
pub struct ErrorLabels {
    /// Label every failure with its status code.
    pub each_error: bool,
    /// Status codes that are labeled specifically even if `each_error` is off.
    pub tracked: BTreeSet<String>,
}

impl ErrorLabels {
    /// The latency label of a call to `operation` with the given outcome.
    ///
    /// Successful calls use the operation name. Failures use `<operation>-<code>` if the code is
    /// tracked, otherwise `<operation>-FAILED`.
    pub fn label<'a>(&self, operation: &'a str, error: Option<&BackendError>) -> Cow<'a, str> {
        match error {
            None => Cow::Borrowed(operation),
            Some(error) if self.each_error || self.tracked.contains(error.code()) => {
                Cow::Owned(format!("{operation}-{}", error.code()))
            }
            Some(_) => Cow::Owned(format!("{operation}-FAILED")),
        }
    }
}

/// A [`Backend`] that measures every call of the backend it wraps.
///
/// Each call records its actual latency, its latency since the intended start, and a status
/// count. Results are passed through untouched.
#[derive(Debug)]
pub struct InstrumentedBackend {
    inner: BoxedBackend,
    measurements: Arc<Measurements>,
    labels: ErrorLabels,
    intended_start: Mutex<Option<Instant>>,
}

impl InstrumentedBackend {
    /// Wraps `inner`, reporting into `measurements`.
    pub fn new(inner: BoxedBackend, measurements: Arc<Measurements>, labels: ErrorLabels) -> Self {
        Self {
            inner,
            measurements,
            labels,
            intended_start: Mutex::new(None),
        }
    }

    /// The recorder this backend reports into.
    pub fn measurements(&self) -> &Arc<Measurements> {
        &self.measurements
    }

    /// Sets the time at which the current operation should have started.
    ///
    /// Without an intended start, the intended latency equals the actual latency.
    pub fn set_intended_start(&self, intended: Option<Instant>) {
        *self.intended_start.lock().unwrap() = intended;
    }

    /// The intended start of the current operation, if set.
    pub fn intended_start(&self) -> Option<Instant> {
        *self.intended_start.lock().unwrap()
    }

    async fn measure<T, F>(&self, operation: &'static str, call: F) -> BackendResult<T>
    where
        F: Future<Output = BackendResult<T>>,
    {
        let span = tracing::trace_span!("backend", backend = self.inner.name(), operation);
        let start = Instant::now();
        let intended = self.intended_start().unwrap_or(start);

        let result = call.instrument(span).await;

        let end = Instant::now();
        let label = self.labels.label(operation, result.as_ref().err());
        self.measurements
            .measure(&label, end - start, end.saturating_duration_since(intended));

        let code = match &result {
            Ok(_) => STATUS_OK,
            Err(error) => error.code(),
        };
        self.measurements.report_status(operation, code);

        result
    }
}

#[async_trait::async_trait]
impl Backend for InstrumentedBackend {
    fn name(&self) -> &'static str {
        self.inner.name()
    }

    async fn init(&self) -> BackendResult<()> {
        self.measure("INIT", self.inner.init()).await
    }

    async fn cleanup(&self) -> BackendResult<()> {
        self.measure("CLEANUP", self.inner.cleanup()).await
    }

    async fn insert(&self, table: &str, key: &RecordKey, values: &FieldMap) -> BackendResult<()> {
        self.measure("INSERT", self.inner.insert(table, key, values)).await
    }

    async fn read(
        &self,
        table: &str,
        key: &RecordKey,
        fields: Option<&FieldSet>,
    ) -> BackendResult<FieldMap> {
        self.measure("READ", self.inner.read(table, key, fields)).await
    }

    async fn update(&self, table: &str, key: &RecordKey, values: &FieldMap) -> BackendResult<()> {
        self.measure("UPDATE", self.inner.update(table, key, values)).await
    }

    async fn delete(&self, table: &str, key: &RecordKey) -> BackendResult<()> {
        self.measure("DELETE", self.inner.delete(table, key)).await
    }

    async fn scan(
        &self,
        table: &str,
        start_key: &RecordKey,
        limit: usize,
        fields: Option<&FieldSet>,
    ) -> BackendResult<Vec<FieldMap>> {
        self.measure("SCAN", self.inner.scan(table, start_key, limit, fields)).await
    }

    async fn dual_window_scan(
        &self,
        table: &str,
        query: &WindowQuery,
        fields: Option<&FieldSet>,
    ) -> BackendResult<WindowScan> {
        self.measure("SCAN", self.inner.dual_window_scan(table, query, fields)).await
    }
}
