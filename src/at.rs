//! Modular arrival-time encoding for sliding-window membership tests.
//!
//! A window of length `N` only ever needs to distinguish ages in `[0, N)`
//! (in-window) from ages in `[N, 2N)` (expired). Storing `t mod 2N` instead of
//! the full timestamp is therefore enough, and costs `ceil(log2(2N + 1))` bits
//! per slot instead of a full word. The value `2N` itself is reserved as the
//! "unset" sentinel, so the encoding domain is `[0, 2N]`.
//!
//! # Invariants
//! - `record` always normalises into `[0, 2N)`; the sentinel can never be
//!   produced by recording a real timestamp.
//! - After `record(t)`, `in_window(now)` is correct for all `now` with
//!   `now - t < 2N`. Beyond that the encoding wraps and an expired slot can
//!   alias back into the window.
//! - Zero age is in-window: `record(t)` followed by `in_window(t)` is true.
//!
//! # Edge cases
//! The aliasing hazard is why callers must run `clean` over every slot at
//! least once per `N` time units: `clean` resets any slot whose age is in
//! `[N, 2N)` to the sentinel before the age can wrap past `2N`.

/// Window geometry shared by every timestamp in a sketch.
///
/// Bundles the window length `N` with the precomputed modulus `2N` so the
/// arithmetic below never recomputes (or overflows) the span.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Window {
    n: u64,
    span: u64,
}

impl Window {
    /// Creates the geometry for a window of length `n`.
    ///
    /// # Preconditions
    /// - `n > 0` and `2 * n` must not overflow `u64`. The sketch constructor
    ///   validates both before any `Window` is built.
    pub fn new(n: u64) -> Self {
        debug_assert!(n > 0);
        debug_assert!(n <= u64::MAX / 2);
        Self { n, span: 2 * n }
    }

    /// Window length `N`.
    #[inline(always)]
    pub fn len(self) -> u64 {
        self.n
    }

    /// Encoding modulus `2N`; also the "unset" sentinel value.
    #[inline(always)]
    pub fn span(self) -> u64 {
        self.span
    }
}

/// A compressed arrival time in `[0, 2N]`, with `2N` meaning "unset".
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct AdjustedTs(u64);

impl AdjustedTs {
    /// An unset timestamp (the sentinel `2N`).
    #[inline(always)]
    pub fn unset(w: Window) -> Self {
        Self(w.span())
    }

    /// A timestamp already recorded at time `t`.
    #[inline(always)]
    pub fn recorded(w: Window, t: u64) -> Self {
        Self(t % w.span())
    }

    /// Raw encoded value, for snapshots and tests.
    #[inline(always)]
    pub fn raw(self) -> u64 {
        self.0
    }

    #[inline(always)]
    pub fn is_unset(self, w: Window) -> bool {
        self.0 == w.span()
    }

    /// Overwrites the slot with the arrival time `t`, normalised into
    /// `[0, 2N)`.
    #[inline(always)]
    pub fn record(&mut self, w: Window, t: u64) {
        self.0 = t % w.span();
    }

    /// Age of the recorded time relative to `now`, in `[0, 2N)`.
    ///
    /// Returns `None` when unset. The subtraction is done entirely in
    /// residues mod `2N`, so it cannot overflow even for `now` close to
    /// `u64::MAX`.
    #[inline(always)]
    pub fn age(self, w: Window, now: u64) -> Option<u64> {
        if self.is_unset(w) {
            return None;
        }
        let span = w.span();
        Some(((now % span) + span - self.0) % span)
    }

    /// Whether the recorded time falls inside the window `(now - N, now]`.
    ///
    /// Unset slots are never in-window.
    #[inline(always)]
    pub fn in_window(self, w: Window, now: u64) -> bool {
        match self.age(w, now) {
            Some(age) => age < w.len(),
            None => false,
        }
    }

    /// Resets the slot to unset if its age has reached `N`.
    ///
    /// Must run over every live slot at least once per `N` time units;
    /// otherwise ages can wrap past `2N` and alias back into the window.
    #[inline(always)]
    pub fn clean(&mut self, w: Window, now: u64) {
        if let Some(age) = self.age(w, now) {
            if age >= w.len() {
                self.0 = w.span();
            }
        }
    }

    /// The encoding of the recorded time's expiry instant `t + N`.
    ///
    /// Used when a bucket head goes stale: the lock's own timestamp is set to
    /// the head's expiry so the lock itself stays in-window for roughly `N`
    /// more time units. Returns `None` when unset.
    #[inline(always)]
    pub fn notional_expiry(self, w: Window, now: u64) -> Option<AdjustedTs> {
        let age = self.age(w, now)?;
        let span = w.span();
        // Residue of the original arrival time, then shift by N.
        let t0 = ((now % span) + span - age) % span;
        Some(AdjustedTs((t0 + w.len()) % span))
    }
}

#[cfg(test)]
mod tests {
    use super::{AdjustedTs, Window};

    const W: u64 = 100;

    fn w() -> Window {
        Window::new(W)
    }

    #[test]
    fn unset_is_never_in_window() {
        let at = AdjustedTs::unset(w());
        assert!(at.is_unset(w()));
        assert_eq!(at.raw(), 2 * W);
        for now in [0, 1, W, 2 * W, 10 * W] {
            assert!(!at.in_window(w(), now));
        }
    }

    #[test]
    fn zero_age_is_in_window() {
        let mut at = AdjustedTs::unset(w());
        at.record(w(), 42);
        assert!(at.in_window(w(), 42));
        assert_eq!(at.age(w(), 42), Some(0));
    }

    #[test]
    fn record_normalises_below_span() {
        let mut at = AdjustedTs::unset(w());
        at.record(w(), 2 * W); // exactly the sentinel value before reduction
        assert_eq!(at.raw(), 0);
        assert!(!at.is_unset(w()));
        at.record(w(), 5 * W + 7);
        assert_eq!(at.raw(), W + 7);
    }

    #[test]
    fn window_boundary_is_exclusive() {
        let mut at = AdjustedTs::unset(w());
        at.record(w(), 10);
        assert!(at.in_window(w(), 10 + W - 1));
        assert!(!at.in_window(w(), 10 + W));
    }

    #[test]
    fn clean_resets_expired_only() {
        let mut fresh = AdjustedTs::unset(w());
        fresh.record(w(), 50);
        fresh.clean(w(), 50 + W - 1);
        assert!(!fresh.is_unset(w()));

        let mut stale = AdjustedTs::unset(w());
        stale.record(w(), 50);
        stale.clean(w(), 50 + W);
        assert!(stale.is_unset(w()));
    }

    #[test]
    fn clean_is_a_no_op_on_unset() {
        let mut at = AdjustedTs::unset(w());
        at.clean(w(), 3);
        assert!(at.is_unset(w()));
    }

    #[test]
    fn aliasing_without_cleaning() {
        // Recorded at 0, checked at 2N + 10: the residue wraps and the slot
        // looks in-window again. This is the hazard periodic cleaning exists
        // to prevent.
        let mut at = AdjustedTs::unset(w());
        at.record(w(), 0);
        assert!(!at.in_window(w(), W));
        assert!(at.in_window(w(), 2 * W + 10));
    }

    #[test]
    fn age_survives_large_now_values() {
        let mut at = AdjustedTs::unset(w());
        let base = u64::MAX - 30;
        at.record(w(), base);
        assert_eq!(at.age(w(), base + 20), Some(20));
        assert!(at.in_window(w(), base + 20));
    }

    #[test]
    fn notional_expiry_is_arrival_plus_window() {
        let mut at = AdjustedTs::unset(w());
        at.record(w(), 0);
        // Head went stale at some `now` past its expiry.
        let expiry = at.notional_expiry(w(), 101).unwrap();
        assert_eq!(expiry.raw(), W);
        // The expiry encoding stays in-window for N more units.
        assert!(expiry.in_window(w(), 101));
        assert!(!expiry.in_window(w(), 2 * W));
        assert_eq!(AdjustedTs::unset(w()).notional_expiry(w(), 5), None);
    }
}
