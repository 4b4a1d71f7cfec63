//! The storage layer of the benchmark harness.
//!
//! This crate defines the contract every storage engine adapter has to satisfy in order to be
//! driven by the workload engine: the [`Backend`] trait, the record model ([`RecordKey`],
//! [`FieldMap`]) and the windowed scan shape used by the IoT scan operation ([`WindowQuery`]).
//!
//! It also ships an [`InMemoryBackend`], which implements the full contract and is used for
//! dry runs of the harness and in tests.
#![warn(missing_docs)]
#![warn(missing_debug_implementations)]

mod backend;
mod in_memory;
pub mod key;
pub mod window;

pub use backend::{Backend, BackendError, BackendResult, BoxedBackend, FieldMap, FieldSet};
pub use in_memory::InMemoryBackend;
pub use key::{ClientId, KEY_SEPARATOR, KeyError, RecordKey};
pub use window::{TimeWindow, WindowQuery, WindowScan};
