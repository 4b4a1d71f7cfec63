use std::collections::BTreeSet;
use std::sync::Mutex;
use std::sync::atomic::{AtomicU64, Ordering};

/// The insert sequence shared by all workers of a run.
///
/// Record numbers are handed out with [`next_record`](Self::next_record) and reported back with
/// [`acknowledge`](Self::acknowledge) once the insert has completed. Acknowledgements may arrive
/// out of order. [`last_acknowledged`](Self::last_acknowledged) only advances over a gap-free
/// prefix, so every record number at or below it has completed.
///
/// Handing out numbers is lock-free. Acknowledgements take a short lock.
#[derive(Debug)]
pub struct InsertSequence {
    next: AtomicU64,
    acknowledged: Mutex<AckWindow>,
}

#[derive(Debug)]
struct AckWindow {
    /// All record numbers below this one are acknowledged.
    limit: u64,
    /// Acknowledged record numbers above `limit`.
    pending: BTreeSet<u64>,
}

impl InsertSequence {
    /// Creates a sequence whose first record number is `first`.
    ///
    /// All record numbers below `first` are treated as acknowledged.
    pub fn new(first: u64) -> Self {
        Self {
            next: AtomicU64::new(first),
            acknowledged: Mutex::new(AckWindow {
                limit: first,
                pending: BTreeSet::new(),
            }),
        }
    }

    /// Hands out the next record number.
    pub fn next_record(&self) -> u64 {
        self.next.fetch_add(1, Ordering::Relaxed)
    }

    /// The number of the next record that will be handed out.
    pub fn peek(&self) -> u64 {
        self.next.load(Ordering::Relaxed)
    }

    /// Marks an insert as completed.
    pub fn acknowledge(&self, record: u64) {
        let mut window = self.acknowledged.lock().unwrap();

        if record < window.limit {
            return;
        }
        if record > window.limit {
            window.pending.insert(record);
            return;
        }

        window.limit += 1;
        loop {
            let next = window.limit;
            if !window.pending.remove(&next) {
                break;
            }
            window.limit += 1;
        }
    }

    /// The highest record number below which all inserts are acknowledged, if any.
    pub fn last_acknowledged(&self) -> Option<u64> {
        self.acknowledged.lock().unwrap().limit.checked_sub(1)
    }
}
