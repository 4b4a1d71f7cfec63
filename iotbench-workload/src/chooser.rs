//! Weighted choice of the next operation in the run phase.

use std::fmt;

use rand::Rng;
use rand::rngs::SmallRng;
use rand_distr::weighted::WeightedIndex;

use crate::config::Proportions;
use crate::error::ConfigError;

/// An operation of the run phase.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Hash, PartialOrd, Ord)]
pub enum OperationKind {
    /// Insert a new record.
    Insert,
    /// Scan a time range.
    Scan,
    /// Read a single record.
    Read,
    /// Update a single record.
    Update,
    /// Read a record, then update it.
    ReadModifyWrite,
}

impl OperationKind {
    /// All operations, in the order the scheduler considers them.
    pub const ALL: [Self; 5] = [
        Self::Insert,
        Self::Scan,
        Self::Read,
        Self::Update,
        Self::ReadModifyWrite,
    ];

    /// The measurement label of this operation.
    pub fn label(self) -> &'static str {
        match self {
            Self::Insert => "INSERT",
            Self::Scan => "SCAN",
            Self::Read => "READ",
            Self::Update => "UPDATE",
            Self::ReadModifyWrite => "READ-MODIFY-WRITE",
        }
    }

    fn proportion(self, proportions: &Proportions) -> f64 {
        match self {
            Self::Insert => proportions.insert,
            Self::Scan => proportions.scan,
            Self::Read => proportions.read,
            Self::Update => proportions.update,
            Self::ReadModifyWrite => proportions.read_modify_write,
        }
    }
}

impl fmt::Display for OperationKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

/// Weighted choice over the operations of the run phase.
#[derive(Clone, Debug)]
pub struct OperationChooser {
    operations: Vec<OperationKind>,
    distribution: WeightedIndex<f64>,
    rng: SmallRng,
}

impl OperationChooser {
    /// Builds the chooser from the configured proportions.
    ///
    /// Operations with a weight of zero are excluded. Fails if a weight is negative or not
    /// finite, or if no operation remains.
    pub fn new(proportions: &Proportions, rng: SmallRng) -> Result<Self, ConfigError> {
        let mut operations = Vec::new();
        let mut weights = Vec::new();

        for operation in OperationKind::ALL {
            let weight = operation.proportion(proportions);
            if !weight.is_finite() || weight < 0.0 {
                return Err(ConfigError::InvalidProportion {
                    operation: operation.label(),
                    value: weight,
                });
            }
            if weight > 0.0 {
                operations.push(operation);
                weights.push(weight);
            }
        }

        if operations.is_empty() {
            return Err(ConfigError::EmptyOperationMix);
        }

        let distribution = WeightedIndex::new(weights)
            .map_err(|e| ConfigError::invalid("proportions", e.to_string()))?;

        Ok(Self {
            operations,
            distribution,
            rng,
        })
    }

    /// Whether the operation can ever be chosen.
    pub fn includes(&self, operation: OperationKind) -> bool {
        self.operations.contains(&operation)
    }

    /// Chooses the next operation.
    pub fn next_operation(&mut self) -> OperationKind {
        let index = self.rng.sample(&self.distribution);
        self.operations[index]
    }
}

#[cfg(test)]
mod tests {
    use std::collections::BTreeMap;

    use super::*;
    use crate::generator::stream_rng;

    #[test]
    fn zero_weights_are_excluded() {
        let proportions = Proportions {
            read: 0.0,
            update: 0.0,
            insert: 1.0,
            scan: 0.0,
            read_modify_write: 0.0,
        };
        let mut chooser = OperationChooser::new(&proportions, stream_rng(1, 0)).unwrap();

        assert!(!chooser.includes(OperationKind::Scan));
        for _ in 0..1_000 {
            assert_eq!(chooser.next_operation(), OperationKind::Insert);
        }
    }

    #[test]
    fn empty_mix_is_rejected() {
        let proportions = Proportions {
            read: 0.0,
            update: 0.0,
            insert: 0.0,
            scan: 0.0,
            read_modify_write: 0.0,
        };
        let result = OperationChooser::new(&proportions, stream_rng(1, 0));
        assert!(matches!(result, Err(ConfigError::EmptyOperationMix)));
    }

    #[test]
    fn negative_weight_is_rejected() {
        let proportions = Proportions {
            read: -0.5,
            ..Default::default()
        };
        let result = OperationChooser::new(&proportions, stream_rng(1, 0));
        assert!(matches!(
            result,
            Err(ConfigError::InvalidProportion {
                operation: "READ",
                ..
            })
        ));
    }

    #[test]
    fn observed_mix_converges_to_proportions() {
        let proportions = Proportions {
            read: 0.2,
            update: 0.1,
            insert: 0.5,
            scan: 0.15,
            read_modify_write: 0.05,
        };
        let mut chooser = OperationChooser::new(&proportions, stream_rng(7, 0)).unwrap();

        const N: usize = 100_000;
        let mut observed = BTreeMap::<OperationKind, usize>::new();
        for _ in 0..N {
            *observed.entry(chooser.next_operation()).or_default() += 1;
        }

        let chi_squared: f64 = OperationKind::ALL
            .iter()
            .map(|operation| {
                let expected = operation.proportion(&proportions) * N as f64;
                let actual = observed.get(operation).copied().unwrap_or_default() as f64;
                (actual - expected).powi(2) / expected
            })
            .sum();

        // critical value of the chi-squared distribution, 4 degrees of freedom, p = 0.001
        assert!(chi_squared < 18.47, "chi-squared = {chi_squared}");
    }
}
