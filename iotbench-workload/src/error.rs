use std::path::PathBuf;

use iotbench_storage::{BackendError, KeyError};
use thiserror::Error;

/// Errors in the workload configuration, detected before any operation is issued.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// No operation has a positive proportion.
    #[error("operation mix is empty: at least one proportion must be positive")]
    EmptyOperationMix,

    /// A proportion is negative or not a finite number.
    #[error("invalid proportion for {operation}: {value}")]
    InvalidProportion {
        /// The operation the proportion belongs to.
        operation: &'static str,
        /// The configured value.
        value: f64,
    },

    /// Data integrity checks need a constant field length.
    #[error("data integrity checks require the `constant` field length distribution")]
    IntegrityRequiresConstantLength,

    /// An option has a value outside of its valid range.
    #[error("invalid value for `{option}`: {reason}")]
    InvalidOption {
        /// Name of the option.
        option: &'static str,
        /// What is wrong with the value.
        reason: String,
    },

    /// The field length histogram could not be read.
    #[error("failed to read field length histogram {}", path.display())]
    HistogramIo {
        /// Path of the histogram file.
        path: PathBuf,
        /// The underlying error.
        #[source]
        source: std::io::Error,
    },

    /// The field length histogram has an invalid format.
    #[error("malformed field length histogram {} at line {line}", path.display())]
    HistogramFormat {
        /// Path of the histogram file.
        path: PathBuf,
        /// The 1-based line number of the offending line.
        line: usize,
    },

    /// The client id cannot be decoded.
    #[error(transparent)]
    Client(#[from] KeyError),

    /// The client does not fit into the configured cluster topology.
    #[error("invalid cluster topology: {0}")]
    Topology(String),
}

impl ConfigError {
    pub(crate) fn invalid(option: &'static str, reason: impl Into<String>) -> Self {
        Self::InvalidOption {
            option,
            reason: reason.into(),
        }
    }
}

/// Errors that stop a worker.
///
/// Failures of individual operations are never reported through this type. They are recorded
/// as measurements and the worker continues with the next invocation.
#[derive(Debug, Error)]
pub enum WorkloadError {
    /// The workload configuration is invalid.
    #[error("invalid workload configuration")]
    Config(#[from] ConfigError),

    /// The backend failed to initialize.
    #[error("failed to initialize the {backend} backend")]
    Init {
        /// Name of the backend.
        backend: &'static str,
        /// The underlying error.
        #[source]
        source: BackendError,
    },

    /// The backend failed to clean up.
    #[error("failed to clean up the {backend} backend")]
    Cleanup {
        /// Name of the backend.
        backend: &'static str,
        /// The underlying error.
        #[source]
        source: BackendError,
    },
}
