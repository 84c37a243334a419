//! Stateless 64-bit hashing of cycle values.
//!
//! All functions are pure: the same input yields the same output on every
//! thread, run and platform.

/// Finalizer from MurmurHash3: a bijective mix of all 64 input bits.
#[must_use]
pub fn hash_u64(mut value: u64) -> u64 {
    value ^= value >> 33;
    value = value.wrapping_mul(0xff51_afd7_ed55_8ccd);
    value ^= value >> 33;
    value = value.wrapping_mul(0xc4ce_b9fe_1a85_ec53);
    value ^= value >> 33;
    value
}

/// Hash of `value` reduced into `[min, max]`, inclusive.
#[must_use]
pub fn hash_range(value: u64, min: u64, max: u64) -> u64 {
    let span = max - min;
    if span == u64::MAX {
        return hash_u64(value);
    }
    min + hash_u64(value) % (span + 1)
}

/// Hash of `value` mapped onto `[0, 1)`.
#[must_use]
pub fn hash_unit(value: u64) -> f64 {
    (hash_u64(value) >> 11) as f64 / (1u64 << 53) as f64
}
