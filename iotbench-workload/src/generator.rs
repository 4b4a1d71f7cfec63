//! Number generators following different statistical laws.
//!
//! Every generator owns its RNG and is meant to be used by a single worker. Workers that need
//! the same law each build their own instance, seeded through [`stream_rng`] so that a fixed
//! workload seed reproduces all draws.

use std::fmt;
use std::path::Path;

use rand::rngs::SmallRng;
use rand::{Rng, SeedableRng};
use rand_distr::weighted::WeightedIndex;
use rand_distr::{Distribution, Exp, Zipf};

use crate::error::ConfigError;

/// Skew of the zipfian generators.
pub const ZIPFIAN_CONSTANT: f64 = 0.99;

/// Creates the RNG for one generator of one worker.
///
/// Different `stream`s yield independent sequences for the same `seed`.
pub fn stream_rng(seed: u64, stream: u64) -> SmallRng {
    SmallRng::seed_from_u64(seed ^ stream.wrapping_mul(0x9e37_79b9_7f4a_7c15))
}

/// A source of numbers.
pub trait NumberGenerator: fmt::Debug + Send + Sync {
    /// Advances the generator and returns the new value.
    fn next_value(&mut self) -> u64;

    /// Returns the value most recently produced by [`next_value`](Self::next_value).
    fn last_value(&self) -> u64;
}

/// Always produces the same value.
#[derive(Clone, Debug)]
pub struct ConstantGenerator {
    value: u64,
}

impl ConstantGenerator {
    /// Creates a generator producing `value`.
    pub fn new(value: u64) -> Self {
        Self { value }
    }
}

impl NumberGenerator for ConstantGenerator {
    fn next_value(&mut self) -> u64 {
        self.value
    }

    fn last_value(&self) -> u64 {
        self.value
    }
}

/// Uniformly distributed values in an inclusive range.
#[derive(Clone, Debug)]
pub struct UniformGenerator {
    lower: u64,
    upper: u64,
    rng: SmallRng,
    last: u64,
}

impl UniformGenerator {
    /// Creates a generator over `lower..=upper`.
    ///
    /// An inverted range collapses to `lower`.
    pub fn new(lower: u64, upper: u64, rng: SmallRng) -> Self {
        Self {
            lower,
            upper: upper.max(lower),
            rng,
            last: lower,
        }
    }
}

impl NumberGenerator for UniformGenerator {
    fn next_value(&mut self) -> u64 {
        self.last = self.rng.random_range(self.lower..=self.upper);
        self.last
    }

    fn last_value(&self) -> u64 {
        self.last
    }
}

/// Zipfian values in an inclusive range, where `min` is the most popular value.
#[derive(Clone, Debug)]
pub struct ZipfianGenerator {
    min: u64,
    distribution: Zipf<f64>,
    rng: SmallRng,
    last: u64,
}

impl ZipfianGenerator {
    /// Creates a generator over `min..=max` with the default [`ZIPFIAN_CONSTANT`].
    pub fn new(min: u64, max: u64, rng: SmallRng) -> Result<Self, ConfigError> {
        let items = max.saturating_sub(min).saturating_add(1);
        let distribution = Zipf::new(items as f64, ZIPFIAN_CONSTANT)
            .map_err(|e| ConfigError::invalid("zipfian", e.to_string()))?;

        Ok(Self {
            min,
            distribution,
            rng,
            last: min,
        })
    }
}

impl NumberGenerator for ZipfianGenerator {
    fn next_value(&mut self) -> u64 {
        let rank = self.distribution.sample(&mut self.rng) as u64;
        self.last = self.min + rank.saturating_sub(1);
        self.last
    }

    fn last_value(&self) -> u64 {
        self.last
    }
}

/// Exponentially distributed values, most of them small.
///
/// The distribution is parametrized such that `percentile` percent of all values fall below
/// `range`.
#[derive(Clone, Debug)]
pub struct ExponentialGenerator {
    distribution: Exp<f64>,
    rng: SmallRng,
    last: u64,
}

impl ExponentialGenerator {
    /// Creates a generator where `percentile` percent of values are below `range`.
    pub fn new(percentile: f64, range: f64, rng: SmallRng) -> Result<Self, ConfigError> {
        if !(0.0..100.0).contains(&percentile) || percentile == 0.0 {
            return Err(ConfigError::invalid(
                "exponential_percentile",
                format!("{percentile} is not within (0, 100)"),
            ));
        }
        if !(range > 0.0 && range.is_finite()) {
            return Err(ConfigError::invalid(
                "exponential_frac",
                format!("key range {range} must be positive"),
            ));
        }

        let gamma = -(1.0 - percentile / 100.0).ln() / range;
        let distribution = Exp::new(gamma)
            .map_err(|e| ConfigError::invalid("exponential_percentile", e.to_string()))?;

        Ok(Self {
            distribution,
            rng,
            last: 0,
        })
    }
}

impl NumberGenerator for ExponentialGenerator {
    fn next_value(&mut self) -> u64 {
        self.last = self.distribution.sample(&mut self.rng) as u64;
        self.last
    }

    fn last_value(&self) -> u64 {
        self.last
    }
}

/// A discrete distribution of field lengths loaded from a file.
#[derive(Clone, Debug, PartialEq)]
pub struct Histogram {
    block_size: u64,
    buckets: Vec<u64>,
}

impl Histogram {
    /// Reads a histogram file.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let contents = std::fs::read_to_string(path).map_err(|source| ConfigError::HistogramIo {
            path: path.to_owned(),
            source,
        })?;

        Self::parse(path, &contents)
    }

    /// Parses the contents of a histogram file.
    ///
    /// The first line holds the block size as `BlockSize <n>`. Every following line holds a
    /// bucket as `<index> <count>`. Columns are separated by tabs or spaces. Buckets missing
    /// from the file have a count of zero.
    pub fn parse(path: &Path, contents: &str) -> Result<Self, ConfigError> {
        let malformed = |line| ConfigError::HistogramFormat {
            path: path.to_owned(),
            line,
        };

        let mut lines = contents
            .lines()
            .enumerate()
            .map(|(index, line)| (index + 1, line.trim()))
            .filter(|(_, line)| !line.is_empty());

        let (header_line, header) = lines.next().ok_or_else(|| malformed(1))?;
        let block_size = match header.split_whitespace().collect::<Vec<_>>()[..] {
            ["BlockSize", size] => size.parse().map_err(|_| malformed(header_line))?,
            _ => return Err(malformed(header_line)),
        };

        let mut buckets = Vec::new();
        for (number, line) in lines {
            let [index, count] = line.split_whitespace().collect::<Vec<_>>()[..] else {
                return Err(malformed(number));
            };
            let index: usize = index.parse().map_err(|_| malformed(number))?;
            let count: u64 = count.parse().map_err(|_| malformed(number))?;

            if buckets.len() <= index {
                buckets.resize(index + 1, 0);
            }
            buckets[index] = count;
        }

        if buckets.iter().all(|count| *count == 0) {
            return Err(ConfigError::invalid(
                "field_length_histogram",
                format!("{} contains no samples", path.display()),
            ));
        }

        Ok(Self {
            block_size,
            buckets,
        })
    }

    /// The width of each bucket in bytes.
    pub fn block_size(&self) -> u64 {
        self.block_size
    }

    /// Creates a generator sampling from this histogram.
    pub fn generator(&self, rng: SmallRng) -> Result<HistogramGenerator, ConfigError> {
        let distribution = WeightedIndex::new(&self.buckets)
            .map_err(|e| ConfigError::invalid("field_length_histogram", e.to_string()))?;

        Ok(HistogramGenerator {
            block_size: self.block_size,
            distribution,
            rng,
            last: 0,
        })
    }
}

/// Samples from a [`Histogram`].
///
/// Bucket `i` produces `(i + 1) * block_size`.
#[derive(Clone, Debug)]
pub struct HistogramGenerator {
    block_size: u64,
    distribution: WeightedIndex<u64>,
    rng: SmallRng,
    last: u64,
}

impl NumberGenerator for HistogramGenerator {
    fn next_value(&mut self) -> u64 {
        let bucket = self.distribution.sample(&mut self.rng) as u64;
        self.last = (bucket + 1) * self.block_size;
        self.last
    }

    fn last_value(&self) -> u64 {
        self.last
    }
}
