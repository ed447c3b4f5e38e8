//! Fixed-seed scalar hashes for bucket routing and element fingerprints.
//!
//! Two independent functions with different jobs:
//! - `bucket_index` routes a flow label to a bucket. Distribution quality
//!   only matters at the granularity of `m`, so FNV-1a over the label bytes
//!   is enough.
//! - `element_hash` produces the uniform value the KMV estimator is built
//!   on. It needs full avalanche behavior, so it runs a MurmurHash3-style
//!   mix with the 64-bit finalizer.
//!
//! Both are seeded with compile-time constants: reruns over the same input
//! stream must produce bit-identical sketch state, and tests pin literal
//! outputs below.

const FNV_OFFSET_BASIS: u64 = 0xcbf2_9ce4_8422_2325;
const FNV_PRIME: u64 = 0x0000_0100_0000_01b3;

/// Fixed seed for `element_hash`. Changing it changes every estimate.
const ELEMENT_SEED: i32 = 0x9747_b28c_u32 as i32;

const MURMUR_C1: u64 = 0x87c3_7b91_1142_53d5;
const MURMUR_C2: u64 = 0x4cf5_ad43_2745_937f;

/// FNV-1a over the eight little-endian bytes of `data`.
#[inline]
pub fn fnv1a_64(data: u64) -> u64 {
    let mut hash = FNV_OFFSET_BASIS;
    for b in data.to_le_bytes() {
        hash ^= u64::from(b);
        hash = hash.wrapping_mul(FNV_PRIME);
    }
    hash
}

/// MurmurHash3 finalization mix.
#[inline]
fn fmix64(mut k: u64) -> u64 {
    k ^= k >> 33;
    k = k.wrapping_mul(0xff51_afd7_ed55_8ccd);
    k ^= k >> 33;
    k = k.wrapping_mul(0xc4ce_b9fe_1a85_ec53);
    k ^= k >> 33;
    k
}

/// MurmurHash3-style 64-bit hash of a single word.
///
/// The seed is sign-extended to 64 bits before mixing; the literal outputs
/// pinned in the tests depend on that detail.
#[inline]
pub fn murmur3_64(key: u64, seed: i32) -> u64 {
    let mut h1 = seed as i64 as u64;
    let mut h2 = seed as i64 as u64;

    let mut k1 = key;
    k1 = k1.wrapping_mul(MURMUR_C1);
    k1 = k1.rotate_left(31);
    k1 = k1.wrapping_mul(MURMUR_C2);
    h1 ^= k1;

    h1 = h1.rotate_left(27);
    h1 = h1.wrapping_mul(5).wrapping_add(0x52dc_e729);

    // Finalization over the eight input bytes.
    h1 ^= 8;
    h2 ^= 8;
    h1 = h1.wrapping_add(h2);
    h2 = h2.wrapping_add(h1);
    h1 = fmix64(h1);
    h2 = fmix64(h2);
    h1.wrapping_add(h2)
}

/// Routes a flow label to a bucket index in `[0, m)`.
#[inline]
pub fn bucket_index(flow_label: u64, m: u32) -> usize {
    debug_assert!(m > 0);
    let hash = fnv1a_64(flow_label) & (i64::MAX as u64);
    (hash % u64::from(m)) as usize
}

/// Uniform element fingerprint masked to `[0, hash_range]`.
///
/// `hash_range` must be of the form `2^delta1 - 1` so the mask keeps the
/// distribution uniform.
#[inline]
pub fn element_hash(element_id: u64, hash_range: u64) -> u64 {
    murmur3_64(element_id, ELEMENT_SEED) & hash_range
}

/// Largest value an element hash can take for a `delta1`-bit fingerprint.
///
/// This doubles as the "empty slot" sentinel throughout the sketch.
#[inline]
pub fn hash_range(delta1: u32) -> u64 {
    debug_assert!((1..=64).contains(&delta1));
    if delta1 == 64 {
        u64::MAX
    } else {
        (1u64 << delta1) - 1
    }
}

/// Largest raw timestamp a `delta2`-bit encoding can represent.
#[inline]
pub fn timestamp_range(delta2: u32) -> u64 {
    debug_assert!((1..=63).contains(&delta2));
    (1u64 << delta2) - 1
}


#[cfg(all(test, feature = "sketch-proptest"))]
mod proptests {
    use super::*;
    use proptest::prelude::*;

    const PROPTEST_CASES: u32 = 64;

    proptest! {
        #![proptest_config(ProptestConfig::with_cases(
            crate::test_utils::proptest_cases(PROPTEST_CASES)
        ))]

        #[test]
        fn bucket_index_is_in_range(flow in any::<u64>(), m in 1u32..10_000) {
            prop_assert!(bucket_index(flow, m) < m as usize);
        }

        #[test]
        fn element_hash_respects_mask(id in any::<u64>(), delta1 in 1u32..=64) {
            let range = hash_range(delta1);
            prop_assert!(element_hash(id, range) <= range);
        }
    }
}
