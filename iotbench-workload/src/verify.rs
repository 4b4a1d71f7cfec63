use iotbench_storage::{FieldMap, RecordKey};

use crate::payload::deterministic_payload;

/// Result of checking a record that was read back.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Hash, PartialOrd, Ord)]
pub enum VerifyOutcome {
    /// Every returned field holds the expected payload.
    Match,
    /// At least one returned field differs from the expected payload.
    Mismatch,
    /// No data was returned although data was expected.
    Missing,
}

impl VerifyOutcome {
    /// The status code reported for this outcome under the `VERIFY` label.
    pub fn code(self) -> &'static str {
        match self {
            Self::Match => "OK",
            Self::Mismatch => "UNEXPECTED_STATE",
            Self::Missing => "ERROR",
        }
    }
}

/// Recomputes deterministic payloads and compares them with the data read back.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct Verifier {
    seed: u64,
    field_length: usize,
}

impl Verifier {
    /// Creates a verifier for payloads written with `seed` and a constant `field_length`.
    pub fn new(seed: u64, field_length: usize) -> Self {
        Self { seed, field_length }
    }

    /// Checks the fields read for `key`.
    ///
    /// Only the returned fields are checked, so projections verify as well.
    pub fn verify(&self, key: &RecordKey, cells: &FieldMap) -> VerifyOutcome {
        if cells.is_empty() {
            return VerifyOutcome::Missing;
        }

        let intact = cells.iter().all(|(field, data)| {
            *data == deterministic_payload(self.seed, key, field, self.field_length)
        });

        if intact {
            VerifyOutcome::Match
        } else {
            VerifyOutcome::Mismatch
        }
    }
}
