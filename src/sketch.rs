//! The sliding KMV sketch: bounded-memory distinct counting per flow over a
//! time-based window.
//!
//! A sketch owns `m` buckets of `k` entries each. Every arriving record
//! advances the global clock to its timestamp, routes to one bucket by flow
//! label, and drives that bucket's insertion state machine with the
//! element's fingerprint. Estimation combines per-bucket KMV estimates with
//! a harmonic mean, skipping buckets that hold nothing in-window.
//!
//! # Caller contract
//! - Records must arrive in non-decreasing timestamp order. Out-of-order
//!   input silently corrupts the compressed timestamps; debug builds assert.
//! - `periodic_clean` must run at least once every `N` time units of stream
//!   progress, or expired entries can alias back into the window.
//!
//! All storage is allocated at construction. The record path performs no
//! allocation; estimation reuses a scratch buffer owned by the sketch.

use std::fmt;

use crate::at::Window;
use crate::bucket::{Bucket, BucketSnapshot};
use crate::hash;

/// Construction-time parameter validation failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[non_exhaustive]
pub enum ConfigError {
    /// Window length must be positive.
    ZeroWindow,
    /// Each bucket needs at least one entry.
    ZeroEntries,
    /// The sketch needs at least one bucket.
    ZeroBuckets,
    /// Fingerprint bit-width outside `[1, 64]`.
    HashBitsOutOfRange { delta1: u32 },
    /// Timestamp bit-width outside `[1, 63]`.
    TimestampBitsOutOfRange { delta2: u32 },
    /// The compressed encoding needs `2N` distinct values plus a sentinel.
    WindowExceedsTimestampRange { n: u64, max: u64 },
}

impl fmt::Display for ConfigError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::ZeroWindow => write!(f, "window length must be positive"),
            Self::ZeroEntries => write!(f, "per-bucket entry count must be at least 1"),
            Self::ZeroBuckets => write!(f, "bucket count must be at least 1"),
            Self::HashBitsOutOfRange { delta1 } => {
                write!(f, "hash bit-width out of range: {delta1} (expected 1..=64)")
            }
            Self::TimestampBitsOutOfRange { delta2 } => {
                write!(
                    f,
                    "timestamp bit-width out of range: {delta2} (expected 1..=63)"
                )
            }
            Self::WindowExceedsTimestampRange { n, max } => {
                write!(
                    f,
                    "window length {n} exceeds half the timestamp range (max {max})"
                )
            }
        }
    }
}

impl std::error::Error for ConfigError {}

/// A bucket index outside `[0, m)` was passed to a per-bucket operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BucketIndexError {
    pub index: usize,
    pub buckets: u32,
}

impl fmt::Display for BucketIndexError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "bucket index out of range: {} (buckets: {})",
            self.index, self.buckets
        )
    }
}

impl std::error::Error for BucketIndexError {}

/// Bits of state one bucket carries: `k` entries of `delta1 + delta2` bits,
/// plus the lock bit, the lock timestamp, the lock upper bound, and the head
/// index.
pub fn bucket_bits(k: u32, delta1: u32, delta2: u32) -> u64 {
    let entry_bits = u64::from(k) * u64::from(delta1 + delta2);
    let head_bits = u64::from(k.next_power_of_two().trailing_zeros());
    entry_bits + 1 + u64::from(delta2) + u64::from(delta1) + head_bits
}

/// Sliding KMV sketch over `m` buckets of `k` minimum fingerprints.
#[derive(Debug)]
pub struct Sketch {
    n: u64,
    k: u32,
    m: u32,
    delta1: u32,
    delta2: u32,
    hash_range: u64,
    timestamp_range: u64,
    window: Window,
    t: u64,
    buckets: Box<[Bucket]>,
    // Reused by `estimate` for the per-bucket fingerprint collection.
    scratch: Vec<u64>,
}

impl Sketch {
    /// Builds a sketch for a window of `n` time units, with `m` buckets of
    /// `k` entries, `delta1`-bit fingerprints and `delta2`-bit timestamps.
    pub fn new(n: u64, k: u32, m: u32, delta1: u32, delta2: u32) -> Result<Self, ConfigError> {
        if n == 0 {
            return Err(ConfigError::ZeroWindow);
        }
        if k == 0 {
            return Err(ConfigError::ZeroEntries);
        }
        if m == 0 {
            return Err(ConfigError::ZeroBuckets);
        }
        if !(1..=64).contains(&delta1) {
            return Err(ConfigError::HashBitsOutOfRange { delta1 });
        }
        if !(1..=63).contains(&delta2) {
            return Err(ConfigError::TimestampBitsOutOfRange { delta2 });
        }
        let timestamp_range = hash::timestamp_range(delta2);
        if n > timestamp_range / 2 {
            return Err(ConfigError::WindowExceedsTimestampRange {
                n,
                max: timestamp_range / 2,
            });
        }

        let hash_range = hash::hash_range(delta1);
        let window = Window::new(n);
        let buckets = (0..m)
            .map(|_| Bucket::new(k as usize, window, hash_range))
            .collect::<Vec<_>>()
            .into_boxed_slice();

        Ok(Self {
            n,
            k,
            m,
            delta1,
            delta2,
            hash_range,
            timestamp_range,
            window,
            t: 0,
            buckets,
            scratch: Vec::with_capacity(k as usize),
        })
    }

    /// Full-width fingerprints and 48-bit timestamps.
    pub fn with_default_widths(n: u64, k: u32, m: u32) -> Result<Self, ConfigError> {
        Self::new(n, k, m, 64, 48)
    }

    /// Processes one record, advancing the clock to its timestamp.
    ///
    /// Timestamps must be non-decreasing across calls (including calls to
    /// the cleaning operations); this is asserted in debug builds only.
    pub fn record(&mut self, flow_label: u64, element_id: u64, timestamp: u64) {
        debug_assert!(
            timestamp >= self.t,
            "timestamps must be non-decreasing: {timestamp} < {}",
            self.t
        );
        self.t = timestamp;
        let idx = hash::bucket_index(flow_label, self.m);
        let hy = hash::element_hash(element_id, self.hash_range);
        let bucket = &mut self.buckets[idx];

        bucket.maintain_lock(self.window, self.hash_range, self.t);

        // The top of the hash range doubles as the empty-slot sentinel; a
        // fingerprint equal to it cannot be stored without breaking the
        // emptiness encoding, so the arrival only advances the clock.
        if hy == self.hash_range {
            return;
        }

        if bucket.refresh_duplicate(self.window, hy, self.t) {
            return;
        }

        if bucket.is_locked() {
            bucket.insert_locked(self.window, self.hash_range, hy, self.t);
        } else {
            bucket.insert_unlocked(self.window, self.hash_range, hy, self.t);
        }
    }

    /// Expires stale entries in every bucket and refreshes head and lock
    /// state.
    ///
    /// Must run at least once every `n` time units of stream progress.
    pub fn periodic_clean(&mut self, now: u64) {
        debug_assert!(now >= self.t, "timestamps must be non-decreasing");
        self.t = now;
        for bucket in self.buckets.iter_mut() {
            bucket.clean(self.window, self.hash_range, now);
        }
    }

    /// Cleans a single bucket, for callers that amortize cleaning across the
    /// stream.
    pub fn periodic_clean_bucket(&mut self, now: u64, index: usize) -> Result<(), BucketIndexError> {
        if index >= self.buckets.len() {
            return Err(BucketIndexError {
                index,
                buckets: self.m,
            });
        }
        debug_assert!(now >= self.t, "timestamps must be non-decreasing");
        self.t = now;
        self.buckets[index].clean(self.window, self.hash_range, now);
        Ok(())
    }

    /// Estimates the distinct count per flow-bucket over the current window,
    /// harmonically averaged across non-empty buckets.
    ///
    /// Returns `0.0` when nothing is in-window.
    pub fn estimate(&mut self) -> f64 {
        let mut harmonic_sum = 0.0f64;
        let mut effective_m = self.m;

        for bucket in self.buckets.iter_mut() {
            bucket.maintain_lock(self.window, self.hash_range, self.t);
            bucket.collect_in_window(self.window, self.hash_range, self.t, &mut self.scratch);

            if self.scratch.is_empty() {
                effective_m -= 1;
                continue;
            }

            let k_prime = self.scratch.len() as f64;
            // The largest of the k' smallest fingerprints.
            let alpha = self.scratch.iter().copied().max().unwrap_or(0) as f64;
            let n_i = k_prime / alpha * self.hash_range as f64 - 1.0;
            if n_i > 0.0 {
                harmonic_sum += 1.0 / n_i;
            }
        }

        if harmonic_sum > 0.0 && effective_m > 0 {
            f64::from(effective_m) / harmonic_sum
        } else {
            0.0
        }
    }

    /// Current global time (the last timestamp seen).
    pub fn current_time(&self) -> u64 {
        self.t
    }

    /// Window length `N`.
    pub fn window_size(&self) -> u64 {
        self.n
    }

    /// Entries per bucket.
    pub fn k(&self) -> u32 {
        self.k
    }

    /// Number of buckets.
    pub fn m(&self) -> u32 {
        self.m
    }

    /// Fingerprint bit-width.
    pub fn delta1(&self) -> u32 {
        self.delta1
    }

    /// Timestamp bit-width.
    pub fn delta2(&self) -> u32 {
        self.delta2
    }

    /// Largest fingerprint value; also the empty-slot sentinel.
    pub fn hash_range(&self) -> u64 {
        self.hash_range
    }

    /// Largest representable raw timestamp.
    pub fn timestamp_range(&self) -> u64 {
        self.timestamp_range
    }

    /// Total bits of bucket state implied by the configured parameters.
    pub fn memory_bits(&self) -> u64 {
        u64::from(self.m) * bucket_bits(self.k, self.delta1, self.delta2)
    }

    /// Read-only snapshot of bucket `index` at the current time, or `None`
    /// when the index is out of range.
    pub fn bucket(&self, index: usize) -> Option<BucketSnapshot> {
        self.buckets
            .get(index)
            .map(|b| b.snapshot(self.window, self.t))
    }
}

#[cfg(test)]
impl Sketch {
    /// Asserts per-bucket structural invariants; valid only for streams that
    /// honored the cleaning contract.
    pub(crate) fn debug_validate(&self) {
        for bucket in self.buckets.iter() {
            bucket.debug_validate(self.window, self.hash_range, self.t);
        }
    }
}


#[cfg(all(test, feature = "sketch-proptest"))]
mod proptests {
    use super::Sketch;
    use proptest::prelude::*;

    const PROPTEST_CASES: u32 = 32;

    proptest! {
        #![proptest_config(ProptestConfig::with_cases(
            crate::test_utils::proptest_cases(PROPTEST_CASES)
        ))]

        /// Structural invariants hold after arbitrary streams that honor the
        /// cleaning contract (clean every N/2 units).
        #[test]
        fn invariants_hold_under_contract(
            k in 1u32..8,
            m in 1u32..4,
            ops in proptest::collection::vec((0u64..16, 0u64..64, 0u64..40), 0..200),
        ) {
            let n = 100u64;
            let mut s = Sketch::new(n, k, m, 32, 16).unwrap();
            let mut t = 0u64;
            let mut last_clean = 0u64;
            for (flow, element, dt) in ops {
                t += dt;
                if t - last_clean >= n / 2 {
                    s.periodic_clean(t);
                    last_clean = t;
                }
                s.record(flow, element, t);
                s.debug_validate();
            }
            let _ = s.estimate();
            s.debug_validate();
        }

        /// Identical parameter sets fed identical streams stay bit-identical.
        #[test]
        fn streams_replay_deterministically(
            ops in proptest::collection::vec((0u64..8, 0u64..32, 0u64..20), 0..100),
        ) {
            let mut a = Sketch::new(1000, 4, 4, 32, 16).unwrap();
            let mut b = Sketch::new(1000, 4, 4, 32, 16).unwrap();
            let mut t = 0u64;
            for (flow, element, dt) in &ops {
                t += dt;
                a.record(*flow, *element, t);
                b.record(*flow, *element, t);
            }
            prop_assert_eq!(a.estimate().to_bits(), b.estimate().to_bits());
            for i in 0..4 {
                prop_assert_eq!(a.bucket(i), b.bucket(i));
            }
        }
    }
}
