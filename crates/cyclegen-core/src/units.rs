//! Parsing of counts, rates and durations written with unit suffixes.
//!
//! Counts accept decimal multipliers (`K`, `M`, `B`/`G`, `T`, `P`, `E`) and
//! `_` digit separators, so `10M`, `1_000` and `2k` are all valid.

use std::time::Duration;

fn multiplier(suffix: char) -> Option<u64> {
    match suffix.to_ascii_uppercase() {
        'K' => Some(1_000),
        'M' => Some(1_000_000),
        'B' | 'G' => Some(1_000_000_000),
        'T' => Some(1_000_000_000_000),
        'P' => Some(1_000_000_000_000_000),
        'E' => Some(1_000_000_000_000_000_000),
        _ => None,
    }
}

fn split_suffix(text: &str) -> (&str, u64) {
    match text.chars().last() {
        Some(c) if c.is_ascii_alphabetic() => match multiplier(c) {
            Some(m) => (&text[..text.len() - 1], m),
            None => (text, 1),
        },
        _ => (text, 1),
    }
}

/// Parses a non-negative integer count with an optional unit suffix.
pub fn parse_count(input: &str) -> Result<u64, String> {
    let cleaned: String = input.trim().chars().filter(|c| *c != '_').collect();
    if cleaned.is_empty() {
        return Err("empty value".to_string());
    }
    let (digits, mult) = split_suffix(&cleaned);
    let base: u64 = digits
        .parse()
        .map_err(|_| format!("`{input}` is not a whole number"))?;
    base.checked_mul(mult)
        .ok_or_else(|| format!("`{input}` overflows a 64-bit count"))
}

/// Parses a non-negative decimal with an optional unit suffix (`2.5K` = 2500.0).
pub fn parse_decimal(input: &str) -> Result<f64, String> {
    let cleaned: String = input.trim().chars().filter(|c| *c != '_').collect();
    if cleaned.is_empty() {
        return Err("empty value".to_string());
    }
    let (digits, mult) = split_suffix(&cleaned);
    let base: f64 = digits
        .parse()
        .map_err(|_| format!("`{input}` is not a number"))?;
    if !base.is_finite() || base < 0.0 {
        return Err(format!("`{input}` must be a finite, non-negative number"));
    }
    Ok(base * mult as f64)
}

/// Parses a duration such as `250ms`, `30s`, `1h30m` or `1.5s`; a bare number
/// is milliseconds.
pub fn parse_duration(input: &str) -> Result<Duration, String> {
    let text = input.trim();
    if !text.is_empty() && text.chars().all(|c| c.is_ascii_digit() || c == '_') {
        let millis = parse_count(text).map_err(|_| format!("`{input}` is not a duration"))?;
        return Ok(Duration::from_millis(millis));
    }
    humantime::parse_duration(text).map_err(|err| format!("`{input}` is not a duration: {err}"))
}
