//! Sliding KMV sketch: approximate distinct counting per flow over a
//! time-based sliding window, in bounded memory.
//!
//! The sketch keeps, per bucket, the `k` smallest fingerprints of the
//! elements routed there, each tagged with a compressed arrival time:
//! - Fingerprint timestamps are stored modulo `2N` (`N` being the window
//!   length), so a slot costs `delta1 + delta2` bits instead of two words.
//! - When a bucket's largest in-window fingerprint expires, the bucket
//!   defers the rescan with a lock zone that tracks the smallest competitor
//!   seen since, instead of rescanning on every arrival.
//! - Estimation is the classical KMV formula per bucket, harmonically
//!   averaged across buckets that hold in-window data.
//!
//! Single-threaded by design: every operation takes `&mut self`, nothing
//! allocates on the record path, and all storage is created at
//! construction.
//!
//! Ingest flow (one record):
//! 1) Advance the clock to the record's timestamp.
//! 2) Route to a bucket by flow label, fingerprint the element.
//! 3) Refresh the bucket's lock state, then run the insertion state machine.
//!
//! Callers must feed non-decreasing timestamps and run `periodic_clean` at
//! least once per window of stream progress; see [`Sketch`] for the
//! contract.

pub mod at;
pub mod bucket;
pub mod dataset;
pub mod driver;
pub mod hash;
pub mod sketch;
#[cfg(test)]
pub mod test_utils;

pub use at::{AdjustedTs, Window};
pub use bucket::{BucketSnapshot, EntrySnapshot};
pub use dataset::{load_records, read_records, synthetic_records, LoadStats, Record};
pub use driver::{run_experiment, MemoryBudget, RunReport, SketchParams, SweepGrid};
pub use sketch::{bucket_bits, BucketIndexError, ConfigError, Sketch};
