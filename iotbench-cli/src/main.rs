//! Command line driver of the IoT benchmark harness.
//!
//! The driver loads its configuration, starts one workload engine per worker against the
//! configured storage backend and prints a report of the measured latencies once all workers
//! have stopped. See [`config`] for the available options.
#![warn(missing_docs)]
#![warn(missing_debug_implementations)]

mod cli;
pub mod config;
mod observability;
mod report;
mod runner;

fn main() -> anyhow::Result<()> {
    cli::execute()
}
