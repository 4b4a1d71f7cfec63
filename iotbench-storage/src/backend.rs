use std::collections::{BTreeMap, BTreeSet};
use std::fmt::Debug;

use bytes::Bytes;
use thiserror::Error;

use crate::key::RecordKey;
use crate::window::{WindowQuery, WindowScan};

/// The fields of a record, mapping field names to their payload.
pub type FieldMap = BTreeMap<String, Bytes>;

/// A projection of field names. `None` in a read means "all fields".
pub type FieldSet = BTreeSet<String>;

/// A type-erased [`Backend`] instance.
pub type BoxedBackend = Box<dyn Backend>;

/// The contract between the workload engine and a storage engine adapter.
///
/// One backend instance is created per worker, and calls on it are never issued concurrently
/// by the engine. Adapters are expected to enforce their own request timeouts.
#[async_trait::async_trait]
pub trait Backend: Debug + Send + Sync + 'static {
    /// The backend name, used for diagnostics.
    fn name(&self) -> &'static str;

    /// Prepares the connection. Called once per worker before any operation.
    async fn init(&self) -> BackendResult<()> {
        Ok(())
    }

    /// Releases the connection and flushes buffered writes. Called once per worker.
    async fn cleanup(&self) -> BackendResult<()> {
        Ok(())
    }

    /// Inserts a record under the given key.
    async fn insert(&self, table: &str, key: &RecordKey, values: &FieldMap) -> BackendResult<()>;

    /// Reads a record, optionally restricted to a set of fields.
    async fn read(
        &self,
        table: &str,
        key: &RecordKey,
        fields: Option<&FieldSet>,
    ) -> BackendResult<FieldMap>;

    /// Overwrites the given fields of a record.
    async fn update(&self, table: &str, key: &RecordKey, values: &FieldMap) -> BackendResult<()>;

    /// Deletes a record.
    async fn delete(&self, table: &str, key: &RecordKey) -> BackendResult<()>;

    /// Returns up to `limit` records at or after `start_key`, in backend-native order.
    async fn scan(
        &self,
        table: &str,
        start_key: &RecordKey,
        limit: usize,
        fields: Option<&FieldSet>,
    ) -> BackendResult<Vec<FieldMap>>;

    /// Runs the recent and the historical window queries of a [`WindowQuery`].
    ///
    /// A failing recent window fails the whole call. A failing historical window is reported as
    /// [`WindowScan::historical`] being `None`. See [`WindowQuery::execute`] for a helper that
    /// implements these semantics on top of a single-window fetch.
    async fn dual_window_scan(
        &self,
        table: &str,
        query: &WindowQuery,
        fields: Option<&FieldSet>,
    ) -> BackendResult<WindowScan>;
}

/// Errors reported by storage backends.
///
/// Every variant maps to a stable status code through [`BackendError::code`], which the
/// instrumentation layer uses to label failed operations.
#[derive(Debug, Error)]
pub enum BackendError {
    /// The requested record does not exist.
    #[error("record not found")]
    NotFound,

    /// The backend does not implement the operation.
    #[error("operation not supported by the {0} backend")]
    NotImplemented(&'static str),

    /// The request was rejected as malformed.
    #[error("bad request: {0}")]
    BadRequest(String),

    /// The request was rejected due to missing permissions.
    #[error("forbidden: {0}")]
    Forbidden(String),

    /// The backend is temporarily unable to serve requests.
    #[error("service unavailable: {0}")]
    Unavailable(String),

    /// The backend returned data that contradicts what was written.
    #[error("unexpected state: {0}")]
    UnexpectedState(String),

    /// IO errors from the underlying connection.
    #[error("i/o error: {0}")]
    Io(#[from] std::io::Error),

    /// Any other error stemming from one of the storage backends, which might be specific to that
    /// backend or to a certain operation.
    #[error("storage backend error: {context}")]
    Generic {
        /// What the backend was doing when the error occurred.
        context: String,
        /// The underlying error.
        #[source]
        cause: Box<dyn std::error::Error + Send + Sync>,
    },
}

impl BackendError {
    /// Wraps an arbitrary error with some context.
    pub fn generic(
        context: impl Into<String>,
        cause: impl Into<Box<dyn std::error::Error + Send + Sync>>,
    ) -> Self {
        Self::Generic {
            context: context.into(),
            cause: cause.into(),
        }
    }

    /// The status code of this error, as used in outcome labels such as `READ-NOT_FOUND`.
    pub fn code(&self) -> &'static str {
        match self {
            Self::NotFound => "NOT_FOUND",
            Self::NotImplemented(_) => "NOT_IMPLEMENTED",
            Self::BadRequest(_) => "BAD_REQUEST",
            Self::Forbidden(_) => "FORBIDDEN",
            Self::Unavailable(_) => "SERVICE_UNAVAILABLE",
            Self::UnexpectedState(_) => "UNEXPECTED_STATE",
            Self::Io(_) | Self::Generic { .. } => "ERROR",
        }
    }
}

/// Result type for backend operations.
pub type BackendResult<T> = Result<T, BackendError>;
