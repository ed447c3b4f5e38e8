//! Per-bucket k-minimum storage with a deferred-rescan lock zone.
//!
//! A bucket holds the `k` smallest element fingerprints seen for its flows,
//! each tagged with a compressed arrival time. `head` indexes the largest
//! in-window fingerprint (the k-th minimum), which is the rejection threshold
//! for incoming values once the bucket is full.
//!
//! # The lock zone
//!
//! When the head's timestamp expires, the true k-th minimum among the
//! remaining in-window entries is unknown without a full rescan. Instead of
//! rescanning on every arrival, the bucket enters a locked state:
//!
//! - `lock_time` holds the stale head's expiry instant, so the lock itself
//!   times out roughly `N` time units later.
//! - `lock_max` tracks the smallest fingerprint observed so far in the zone
//!   between the stale head and the top of the hash range. It only ever
//!   decreases while the lock holds.
//!
//! The lock resolves when a new true k-minimum forces an eviction of the
//! stale head, when the head becomes current again, or when the lock times
//! out.
//!
//! # Invariants
//! - A slot is empty iff its fingerprint equals the hash-range sentinel iff
//!   its timestamp is unset. Every mutation below preserves the equivalence.
//! - Whenever the head entry is in-window, it carries the maximum in-window
//!   fingerprint of the bucket.
//! - While locked, `lock_max` is non-increasing; once `lock_time` leaves the
//!   window the lock is released at the next maintenance point.

use crate::at::{AdjustedTs, Window};

/// One k-minimum slot: a fingerprint plus its compressed arrival time.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub(crate) struct Entry {
    pub(crate) h: u64,
    pub(crate) at: AdjustedTs,
}

impl Entry {
    fn empty(w: Window, hash_range: u64) -> Self {
        Self {
            h: hash_range,
            at: AdjustedTs::unset(w),
        }
    }

    #[inline(always)]
    fn is_empty(&self, w: Window, hash_range: u64) -> bool {
        self.h == hash_range || self.at.is_unset(w)
    }
}

/// Read-only copy of one slot, taken at a specific observation time.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct EntrySnapshot {
    /// Stored fingerprint; equals the sketch's hash range when empty.
    pub hash: u64,
    /// Raw adjusted-timestamp value; equals `2N` when unset.
    pub timestamp: u64,
    /// Whether the slot was in-window at snapshot time.
    pub in_window: bool,
}

/// Read-only copy of a bucket's state, taken at a specific observation time.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct BucketSnapshot {
    pub lock: bool,
    /// Raw adjusted-timestamp value of the lock; only meaningful while
    /// `lock` is set.
    pub lock_time: u64,
    pub lock_max: u64,
    pub head: usize,
    pub entries: Vec<EntrySnapshot>,
}

/// A bucket of `k` entries plus the lock-zone state.
#[derive(Clone, Debug)]
pub(crate) struct Bucket {
    entries: Box<[Entry]>,
    lock: bool,
    lock_time: AdjustedTs,
    lock_max: u64,
    head: u32,
}

impl Bucket {
    pub(crate) fn new(k: usize, w: Window, hash_range: u64) -> Self {
        Self {
            entries: vec![Entry::empty(w, hash_range); k].into_boxed_slice(),
            lock: false,
            lock_time: AdjustedTs::unset(w),
            lock_max: hash_range,
            head: 0,
        }
    }

    #[inline(always)]
    pub(crate) fn is_locked(&self) -> bool {
        self.lock
    }

    #[inline(always)]
    fn head_entry(&self) -> &Entry {
        &self.entries[self.head as usize]
    }

    /// Brings the lock state up to date with `now`.
    ///
    /// Three transitions, in order:
    /// 1. A lock whose own timestamp left the window is released (timeout).
    /// 2. A lock whose head slot no longer holds a stale value is released:
    ///    either the head's timestamp was refreshed by a duplicate arrival
    ///    (back in-window), or cleaning emptied the slot. In both cases the
    ///    stale threshold the lock was protecting is gone.
    /// 3. An unlocked bucket whose head entry carries a real but expired
    ///    timestamp becomes locked, stamping the lock with the head's expiry
    ///    instant so the lock survives roughly `N` more time units.
    ///
    /// An empty head (unset timestamp) never activates the lock: there is no
    /// stale threshold to protect, and inserts should fill slots normally.
    pub(crate) fn maintain_lock(&mut self, w: Window, hash_range: u64, now: u64) {
        if self.lock && !self.lock_time.in_window(w, now) {
            self.lock = false;
        }
        if self.lock {
            let head_at = self.head_entry().at;
            if head_at.is_unset(w) || head_at.in_window(w, now) {
                self.lock = false;
            }
        }
        if !self.lock {
            let head_at = self.head_entry().at;
            if let Some(expiry) = head_at.notional_expiry(w, now) {
                if !head_at.in_window(w, now) {
                    self.lock = true;
                    self.lock_time = expiry;
                    self.lock_max = hash_range;
                }
            }
        }
    }

    /// Refreshes the arrival time of an already-stored fingerprint.
    ///
    /// Returns true when `hy` was found; the caller stops processing the
    /// arrival in that case. Empty slots never match because the caller
    /// rejects `hy == hash_range` before hashing reaches this point.
    pub(crate) fn refresh_duplicate(&mut self, w: Window, hy: u64, now: u64) -> bool {
        for entry in self.entries.iter_mut() {
            if entry.h == hy {
                entry.at.record(w, now);
                return true;
            }
        }
        false
    }

    /// Unlocked insertion path.
    ///
    /// Empty slots are probed first, then expired ones. Any fingerprint is
    /// accepted into such a slot, including values above the current head;
    /// non-minima either get displaced later or expire. When the bucket has
    /// no free slot, only a value below the head (a new true k-minimum) gets
    /// in, evicting the head.
    pub(crate) fn insert_unlocked(&mut self, w: Window, hash_range: u64, hy: u64, now: u64) {
        let head = self.head_entry();
        let head_h = head.h;
        let head_valid = !head.is_empty(w, hash_range) && head.at.in_window(w, now);
        if let Some(pos) = self.insert_position(w, hash_range, now) {
            self.entries[pos] = Entry {
                h: hy,
                at: AdjustedTs::recorded(w, now),
            };
            if !head_valid {
                // The previous head carried no usable threshold (empty slot,
                // or revived alongside stale siblings): rescan for the true
                // in-window maximum.
                self.update_head(w, hash_range, now);
            } else if hy > head_h {
                self.head = pos as u32;
            }
        } else if hy < head_h {
            self.entries[self.head as usize] = Entry {
                h: hy,
                at: AdjustedTs::recorded(w, now),
            };
            self.update_head(w, hash_range, now);
        }
        // Otherwise hy is at or above the k-th minimum: rejected.
    }

    /// Locked insertion path.
    ///
    /// Values below the stale head are still k-minima and go into an expired
    /// slot away from the head when one exists. Otherwise the stale head
    /// itself is evicted, the head rescanned, and the lock resolves: the new
    /// k-minimum destroyed the threshold the lock was tracking. Values
    /// between the stale head and `lock_max` only shrink the tracked upper
    /// bound.
    pub(crate) fn insert_locked(&mut self, w: Window, hash_range: u64, hy: u64, now: u64) {
        let head_h = self.head_entry().h;
        if hy < head_h {
            if let Some(pos) = self.expired_non_head_position(w, now) {
                self.entries[pos] = Entry {
                    h: hy,
                    at: AdjustedTs::recorded(w, now),
                };
            } else {
                self.entries[self.head as usize] = Entry {
                    h: hy,
                    at: AdjustedTs::recorded(w, now),
                };
                self.update_head(w, hash_range, now);
                self.lock = false;
            }
        } else if head_h < hy && hy < self.lock_max {
            self.lock_max = hy;
        }
        // hy at or above lock_max: nothing to learn from this arrival.
    }

    /// First empty slot, then first expired slot, if any.
    fn insert_position(&self, w: Window, hash_range: u64, now: u64) -> Option<usize> {
        self.entries
            .iter()
            .position(|e| e.h == hash_range)
            .or_else(|| self.entries.iter().position(|e| !e.at.in_window(w, now)))
    }

    /// First expired slot other than the head, if any. The head slot is the
    /// lock's stale threshold and must not be silently repurposed.
    fn expired_non_head_position(&self, w: Window, now: u64) -> Option<usize> {
        let head = self.head as usize;
        self.entries
            .iter()
            .enumerate()
            .position(|(i, e)| i != head && !e.at.in_window(w, now))
    }

    /// Repoints `head` at the maximum in-window fingerprint, or slot 0 when
    /// nothing is in-window.
    pub(crate) fn update_head(&mut self, w: Window, hash_range: u64, now: u64) {
        let mut max_h = None;
        let mut max_idx = 0u32;
        for (i, entry) in self.entries.iter().enumerate() {
            if entry.h != hash_range && entry.at.in_window(w, now) && Some(entry.h) > max_h {
                max_h = Some(entry.h);
                max_idx = i as u32;
            }
        }
        self.head = max_idx;
    }

    /// Expires stale slots and restores the empty-slot equivalence.
    ///
    /// After the sweep the head is recomputed and the lock state refreshed,
    /// so a bucket is always internally consistent when cleaning returns.
    pub(crate) fn clean(&mut self, w: Window, hash_range: u64, now: u64) {
        for entry in self.entries.iter_mut() {
            entry.at.clean(w, now);
            if entry.at.is_unset(w) {
                entry.h = hash_range;
            }
        }
        self.update_head(w, hash_range, now);
        self.maintain_lock(w, hash_range, now);
    }

    /// Collects the in-window fingerprints the estimator may use.
    ///
    /// The head is excluded while the lock holds: its fingerprint predates
    /// the lock and no longer reflects in-window data.
    pub(crate) fn collect_in_window(
        &self,
        w: Window,
        hash_range: u64,
        now: u64,
        out: &mut Vec<u64>,
    ) {
        out.clear();
        for (i, entry) in self.entries.iter().enumerate() {
            if entry.h == hash_range || !entry.at.in_window(w, now) {
                continue;
            }
            if self.lock && i == self.head as usize {
                continue;
            }
            out.push(entry.h);
        }
    }

    pub(crate) fn snapshot(&self, w: Window, now: u64) -> BucketSnapshot {
        BucketSnapshot {
            lock: self.lock,
            lock_time: self.lock_time.raw(),
            lock_max: self.lock_max,
            head: self.head as usize,
            entries: self
                .entries
                .iter()
                .map(|e| EntrySnapshot {
                    hash: e.h,
                    timestamp: e.at.raw(),
                    in_window: e.at.in_window(w, now),
                })
                .collect(),
        }
    }
}

#[cfg(test)]
impl Bucket {
    /// Asserts the structural invariants that hold after any completed
    /// operation, given the caller honored the cleaning contract.
    pub(crate) fn debug_validate(&self, w: Window, hash_range: u64, now: u64) {
        assert!((self.head as usize) < self.entries.len());
        assert!(self.lock_max <= hash_range);
        for entry in self.entries.iter() {
            // Empty-slot equivalence: sentinel fingerprint iff unset time.
            assert_eq!(entry.h == hash_range, entry.at.is_unset(w));
        }
        let head = self.head_entry();
        if head.at.in_window(w, now) {
            let max_in_window = self
                .entries
                .iter()
                .filter(|e| e.h != hash_range && e.at.in_window(w, now))
                .map(|e| e.h)
                .max();
            assert_eq!(Some(head.h), max_in_window);
        }
        if self.lock {
            // The lock's timestamp was recorded at activation; it may have
            // since left the window (released lazily on the next touch), but
            // it can never be unset while the lock bit holds.
            assert!(!self.lock_time.is_unset(w));
        }
    }
}
