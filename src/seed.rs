//! Per-run seed generation.
//!
//! Seeds are produced by walking the configured range with a stride that is
//! coprime to the range's size, starting from an offset derived from a base
//! value. For `n` no larger than the range every seed is distinct, and the
//! same base always yields the same sequence.
//!
//! ```text
//! seed(i) = min + (offset + i * stride) mod span      span = max - min + 1
//! ```

use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

/// Inclusive range seeds are drawn from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct SeedRange {
    pub min: u64,
    pub max: u64,
}

impl Default for SeedRange {
    fn default() -> Self {
        Self {
            min: 1,
            max: 1_000_000,
        }
    }
}

impl SeedRange {
    /// Number of distinct values in the range, or 0 if `min > max`.
    pub fn span(&self) -> u128 {
        if self.min > self.max {
            0
        } else {
            u128::from(self.max - self.min) + 1
        }
    }

    pub fn contains(&self, seed: u64) -> bool {
        (self.min..=self.max).contains(&seed)
    }
}

/// Deterministic generator of distinct per-run seeds.
///
/// # Example
///
/// ```
/// use flaky_detector::seed::{SeedGenerator, SeedRange};
///
/// let generator = SeedGenerator::new(42, SeedRange { min: 1, max: 100 });
/// let seeds = generator.seeds(10);
///
/// assert_eq!(seeds.len(), 10);
/// assert_eq!(seeds, generator.seeds(10));
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SeedGenerator {
    base: u64,
    range: SeedRange,
    offset: u128,
    stride: u128,
}

impl SeedGenerator {
    /// Creates a generator for `range` from a fixed base value.
    ///
    /// An empty range (`min > max`) is treated as the single value `min`.
    pub fn new(base: u64, range: SeedRange) -> Self {
        let range = if range.min > range.max {
            SeedRange {
                min: range.min,
                max: range.min,
            }
        } else {
            range
        };
        let span = range.span();
        let offset = u128::from(splitmix64(base)) % span;
        let stride = coprime_stride(splitmix64(base ^ 0x5eed_5eed_5eed_5eed), span);

        Self {
            base,
            range,
            offset,
            stride,
        }
    }

    /// Creates a generator with a base drawn from the thread RNG.
    pub fn from_entropy(range: SeedRange) -> Self {
        Self::new(rand::random(), range)
    }

    /// The base value; feeding it back to [`SeedGenerator::new`] reproduces
    /// the sequence.
    pub fn base(&self) -> u64 {
        self.base
    }

    pub fn range(&self) -> SeedRange {
        self.range
    }

    /// Seed for one run index.
    pub fn seed(&self, run_index: usize) -> u64 {
        let span = self.range.span();
        let step = (self.offset + (run_index as u128 % span) * self.stride) % span;
        // step < span, so the sum stays within [min, max]
        self.range.min + step as u64
    }

    /// Seeds for runs `0..n`, in run order.
    ///
    /// When `n` exceeds the number of values in the range, seeds repeat and
    /// a coverage warning is logged.
    pub fn seeds(&self, n: usize) -> Vec<u64> {
        let span = self.range.span();
        if n as u128 > span {
            warn!(
                "Requested {} runs but seed range {}..={} only holds {} distinct values; seeds will repeat",
                n, self.range.min, self.range.max, span
            );
        }
        debug!(
            "Generating {} seeds from base {} (stride {})",
            n, self.base, self.stride
        );
        (0..n).map(|i| self.seed(i)).collect()
    }
}

/// SplitMix64 finaliser, used to spread the base value over the range.
fn splitmix64(mut x: u64) -> u64 {
    x = x.wrapping_add(0x9e37_79b9_7f4a_7c15);
    x = (x ^ (x >> 30)).wrapping_mul(0xbf58_476d_1ce4_e5b9);
    x = (x ^ (x >> 27)).wrapping_mul(0x94d0_49bb_1331_11eb);
    x ^ (x >> 31)
}

fn gcd(mut a: u128, mut b: u128) -> u128 {
    while b != 0 {
        (a, b) = (b, a % b);
    }
    a
}

/// Picks a stride in `[1, span)` with `gcd(stride, span) == 1`, so that the
/// walk visits every value of the range before repeating.
fn coprime_stride(mix: u64, span: u128) -> u128 {
    if span <= 2 {
        return 1;
    }
    let mut stride = u128::from(mix) % (span - 1) + 1;
    while gcd(stride, span) != 1 {
        stride = stride % (span - 1) + 1;
    }
    stride
}

#[cfg(test)]
mod tests {
    use std::collections::HashSet;

    use proptest::prelude::*;

    use super::*;

    #[test]
    fn test_default_range() {
        let range = SeedRange::default();
        assert_eq!(range.span(), 1_000_000);
        assert!(range.contains(1));
        assert!(!range.contains(0));
    }

    #[test]
    fn test_full_u64_range_does_not_overflow() {
        let generator = SeedGenerator::new(
            7,
            SeedRange {
                min: 0,
                max: u64::MAX,
            },
        );
        let seeds = generator.seeds(100);
        assert_eq!(seeds.iter().collect::<HashSet<_>>().len(), 100);
    }

    #[test]
    fn test_exhausted_range_repeats() {
        let generator = SeedGenerator::new(3, SeedRange { min: 10, max: 12 });
        let seeds = generator.seeds(6);
        assert_eq!(seeds[..3].iter().collect::<HashSet<_>>().len(), 3);
        assert_eq!(seeds[..3], seeds[3..]);
        assert!(seeds.iter().all(|s| (10..=12).contains(s)));
    }

    #[test]
    fn test_single_value_range() {
        let generator = SeedGenerator::new(99, SeedRange { min: 5, max: 5 });
        assert_eq!(generator.seeds(3), vec![5, 5, 5]);
    }

    #[test]
    fn test_inverted_range_collapses_to_min() {
        let generator = SeedGenerator::new(1, SeedRange { min: 9, max: 2 });
        assert_eq!(generator.seeds(2), vec![9, 9]);
    }

    #[test]
    fn test_parity_alternates_over_even_span() {
        // Even span forces an odd stride, so consecutive seeds alternate parity.
        let seeds = SeedGenerator::new(12345, SeedRange::default()).seeds(20);
        let even = seeds.iter().filter(|s| *s % 2 == 0).count();
        assert_eq!(even, 10);
    }

    #[test]
    fn test_different_bases_differ() {
        let a = SeedGenerator::new(1, SeedRange::default()).seeds(5);
        let b = SeedGenerator::new(2, SeedRange::default()).seeds(5);
        assert_ne!(a, b);
    }

    proptest! {
        #![proptest_config(ProptestConfig::with_cases(64))]

        #[test]
        fn seeds_are_distinct_within_span(
            base in any::<u64>(),
            min in 0_u64..1_000,
            width in 0_u64..500,
            n in 1_usize..200,
        ) {
            let range = SeedRange { min, max: min + width };
            let seeds = SeedGenerator::new(base, range).seeds(n);

            prop_assert_eq!(seeds.len(), n);
            prop_assert!(seeds.iter().all(|s| range.contains(*s)));

            let distinct = seeds.iter().collect::<HashSet<_>>().len();
            let expected = n.min(range.span() as usize);
            prop_assert_eq!(distinct, expected);
        }

        #[test]
        fn seeds_are_deterministic(base in any::<u64>(), n in 0_usize..50) {
            let range = SeedRange::default();
            prop_assert_eq!(
                SeedGenerator::new(base, range).seeds(n),
                SeedGenerator::new(base, range).seeds(n)
            );
        }
    }
}
