//! Human-readable summary of the measurements of a run.

use std::time::Duration;

use bytesize::ByteSize;
use iotbench_workload::measurement::{LatencySketches, WindowCounts};
use iotbench_workload::{LatencySummary, Phase, Snapshot, VerifyOutcome, WorkerSummary};
use yansi::Paint;

/// Prints the totals of all workers followed by one section per measured label.
pub fn print_report(phase: Phase, workers: usize, summary: &WorkerSummary, snapshot: &Snapshot) {
    let elapsed = summary.elapsed;

    println!();
    println!(
        "{} {} (workers: {}, elapsed: {:.2?})",
        "## Phase".bold(),
        format!("{phase:?}").to_uppercase().bold().blue(),
        workers.bold(),
        elapsed,
    );
    print!("  {} invocations", summary.operations.bold());
    if summary.failures > 0 {
        print!(
            ", {}",
            format!("{} FAILED", summary.failures).bold().red()
        );
    }
    println!();
    print_ops(summary.operations as usize, elapsed);
    println!();

    for (label, sketches) in &snapshot.latencies {
        println!();
        print_label(label, sketches, elapsed);

        if let Some(codes) = snapshot.statuses.get(label) {
            let codes: Vec<_> = codes
                .iter()
                .map(|(code, count)| format!("{code}={count}"))
                .collect();
            println!("  statuses: {}", codes.join(", "));
        }

        if let Some(windows) = snapshot.windows.get(label) {
            print_windows(windows);
        }
    }

    if !snapshot.verification.is_empty() {
        println!();
        print_verification(snapshot);
    }

    if snapshot.bytes_written > 0 {
        println!();
        print!(
            "{} {}",
            "WRITTEN:".bold().green(),
            ByteSize::b(snapshot.bytes_written).bold()
        );
        print_throughput(snapshot.bytes_written, elapsed);
    }
}

fn print_label(label: &str, sketches: &LatencySketches, elapsed: Duration) {
    let title = format!("{label}:");
    let title = if is_failure(label) {
        title.bold().red()
    } else {
        title.bold().green()
    };

    println!("{} ({} ops)", title, sketches.count().bold());
    print_ops(sketches.count(), elapsed);
    println!();
    if let Some(summary) = LatencySummary::of(&sketches.actual) {
        print_percentiles("actual", &summary);
    }
    if let Some(summary) = LatencySummary::of(&sketches.intended) {
        print_percentiles("intended", &summary);
    }
}

fn is_failure(label: &str) -> bool {
    match label.strip_prefix("READ-MODIFY-WRITE") {
        Some(rest) => !rest.is_empty(),
        None => label.contains('-'),
    }
}

fn print_percentiles(kind: &str, summary: &LatencySummary) {
    let avg = micros(summary.avg);
    let p50 = micros(summary.p50);
    let p90 = micros(summary.p90);
    let p99 = micros(summary.p99);
    let max = micros(summary.max);
    println!(
        "  {kind:>8} avg: {:.2?}; p50: {p50:.2?}; p90: {p90:.2?}; p99: {p99:.2?}; max: {max:.2?}",
        avg.bold()
    );
}

fn print_windows(windows: &WindowCounts) {
    println!(
        "  windows: {} scans; recent empty: {}; historical empty: {}; historical failed: {}",
        windows.scans.bold(),
        windows.recent_empty,
        windows.historical_empty,
        windows.historical_failed,
    );
}

fn print_verification(snapshot: &Snapshot) {
    let matched = snapshot.verifications(VerifyOutcome::Match);
    let mismatched = snapshot.verifications(VerifyOutcome::Mismatch);
    let missing = snapshot.verifications(VerifyOutcome::Missing);

    print!("{} {} matched", "VERIFIED:".bold().green(), matched.bold());
    if mismatched > 0 {
        print!(", {}", format!("{mismatched} MISMATCHED").bold().red());
    } else {
        print!(", 0 mismatched");
    }
    println!(", {missing} missing");
}

fn print_ops(ops: usize, elapsed: Duration) {
    let ops_ps = ops as f64 / elapsed.as_secs_f64().max(f64::EPSILON);
    print!("  {:.2} operations/s", ops_ps.bold());
}

fn print_throughput(total: u64, elapsed: Duration) {
    let throughput = (total as f64 / elapsed.as_secs_f64().max(f64::EPSILON)) as u64;
    println!(", {:.2}/s", ByteSize::b(throughput).bold());
}

fn micros(value: f64) -> Duration {
    Duration::from_secs_f64(value.max(0.0) / 1_000_000.0)
}
