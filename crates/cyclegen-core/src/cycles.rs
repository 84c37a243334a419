//! Half-open cycle intervals.
//!
//! Accepted forms:
//! - `M` covers `[0, M)`
//! - `N..M` covers `[N, M)`
//! - `N..+K` covers `[N, N + K)`
//!
//! Every term may carry a unit suffix (`10M`, `1K..+500`). The text of each
//! end is kept as written so summaries can echo it back.

use std::fmt;
use std::hash::{Hash, Hasher};
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::{CoreError, CoreResult};
use crate::units::parse_count;

/// Half-open interval `[first, last)` of cycle numbers.
///
/// Equality and hashing look at the numeric bounds only.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CycleRange {
    first: u64,
    last: u64,
    #[serde(default)]
    first_spec: String,
    #[serde(default)]
    last_spec: String,
}

impl CycleRange {
    /// Builds a range, requiring `first < last`.
    pub fn new(first: u64, last: u64) -> CoreResult<Self> {
        if first >= last {
            return Err(CoreError::config(format!(
                "cycle range must satisfy first < last, got {first}..{last}"
            )));
        }
        Ok(Self::from_bounds(first, last))
    }

    fn from_bounds(first: u64, last: u64) -> Self {
        Self {
            first,
            last,
            first_spec: first.to_string(),
            last_spec: last.to_string(),
        }
    }

    /// Parses one of the textual forms described at module level.
    pub fn parse(spec: &str) -> CoreResult<Self> {
        let text = spec.trim();
        let err = |message: String| CoreError::parse("cycle range", spec, message);

        let (first, last, first_spec, last_spec) = match text.split_once("..") {
            None => {
                if text.starts_with('+') {
                    return Err(err(
                        "relative end `+K` needs a start, write `N..+K`".to_string(),
                    ));
                }
                (0, parse_count(text).map_err(err)?, "0", text)
            }
            Some((start, end)) => {
                let start = start.trim();
                let end = end.trim();
                if start.is_empty() || end.is_empty() {
                    return Err(err("both ends of `N..M` are required".to_string()));
                }
                let first = parse_count(start).map_err(err)?;
                let last = match end.strip_prefix('+') {
                    Some(relative) => {
                        let len = parse_count(relative).map_err(err)?;
                        first
                            .checked_add(len)
                            .ok_or_else(|| err("relative end overflows".to_string()))?
                    }
                    None => parse_count(end).map_err(err)?,
                };
                (first, last, start, end)
            }
        };

        if first >= last {
            return Err(err(format!(
                "first cycle {first} must be below last cycle {last}"
            )));
        }
        Ok(Self {
            first,
            last,
            first_spec: first_spec.to_string(),
            last_spec: last_spec.to_string(),
        })
    }

    /// Start of the range as the user wrote it.
    #[must_use]
    pub fn first_spec(&self) -> &str {
        &self.first_spec
    }

    /// End of the range as the user wrote it, `+K` included.
    #[must_use]
    pub fn last_spec(&self) -> &str {
        &self.last_spec
    }

    /// The range in its written form, e.g. `1K..+500`.
    #[must_use]
    pub fn spec(&self) -> String {
        format!("{}..{}", self.first_spec, self.last_spec)
    }

    /// First cycle, inclusive.
    #[must_use]
    pub fn first(&self) -> u64 {
        self.first
    }

    /// Last cycle, exclusive.
    #[must_use]
    pub fn last(&self) -> u64 {
        self.last
    }

    /// Number of cycles in one pass.
    #[must_use]
    pub fn count(&self) -> u64 {
        self.last - self.first
    }

    /// Whether `cycle` falls inside the range.
    #[must_use]
    pub fn contains(&self, cycle: u64) -> bool {
        cycle >= self.first && cycle < self.last
    }

    /// Copy with a new first cycle; fails if it would not stay below `last`.
    pub fn with_first(&self, first: u64) -> CoreResult<Self> {
        Self::new(first, self.last)
    }

    /// Copy with a new last cycle; fails if it would not stay above `first`.
    pub fn with_last(&self, last: u64) -> CoreResult<Self> {
        Self::new(self.first, last)
    }
}

impl Default for CycleRange {
    /// A single cycle, `0..1`.
    fn default() -> Self {
        Self::from_bounds(0, 1)
    }
}

impl PartialEq for CycleRange {
    fn eq(&self, other: &Self) -> bool {
        (self.first, self.last) == (other.first, other.last)
    }
}

impl Eq for CycleRange {}

impl Hash for CycleRange {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.first.hash(state);
        self.last.hash(state);
    }
}

impl fmt::Display for CycleRange {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}..{}", self.first, self.last)
    }
}

impl FromStr for CycleRange {
    type Err = CoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_single_term_is_count_from_zero() {
        let range = CycleRange::parse("1000").unwrap();
        assert_eq!(range.first(), 0);
        assert_eq!(range.last(), 1000);
        assert_eq!(range.count(), 1000);
    }

    #[test]
    fn test_explicit_bounds() {
        let range = CycleRange::parse("5..10").unwrap();
        assert_eq!((range.first(), range.last(), range.count()), (5, 10, 5));
        assert!(range.contains(5));
        assert!(!range.contains(10));
    }

    #[test]
    fn test_relative_end() {
        let range = CycleRange::parse("1K..+500").unwrap();
        assert_eq!(range.first(), 1_000);
        assert_eq!(range.last(), 1_500);
    }

    #[test]
    fn test_units_on_both_ends() {
        let range = CycleRange::parse("1M..2M").unwrap();
        assert_eq!(range.count(), 1_000_000);
    }

    #[test]
    fn test_rejects_empty_and_inverted() {
        assert!(CycleRange::parse("10..10").is_err());
        assert!(CycleRange::parse("10..5").is_err());
        assert!(CycleRange::parse("0").is_err());
        assert!(CycleRange::parse("5..+0").is_err());
    }

    #[test]
    fn test_rejects_malformed() {
        assert!(CycleRange::parse("").is_err());
        assert!(CycleRange::parse("..5").is_err());
        assert!(CycleRange::parse("5..").is_err());
        assert!(CycleRange::parse("+5").is_err());
        assert!(CycleRange::parse("a..b").is_err());
        assert!(CycleRange::parse("1..2..3").is_err());
    }

    #[test]
    fn test_with_first_and_last() {
        let range = CycleRange::parse("0..100").unwrap();
        assert_eq!(range.with_last(200).unwrap().count(), 200);
        assert_eq!(range.with_first(50).unwrap().count(), 50);
        assert!(range.with_first(100).is_err());
        assert!(range.with_last(0).is_err());
    }

    #[test]
    fn test_keeps_written_ends() {
        let range = CycleRange::parse(" 1K..+500 ").unwrap();
        assert_eq!(range.first_spec(), "1K");
        assert_eq!(range.last_spec(), "+500");
        assert_eq!(range.spec(), "1K..+500");

        let implied = CycleRange::parse("10M").unwrap();
        assert_eq!((implied.first_spec(), implied.last_spec()), ("0", "10M"));

        let built = CycleRange::new(2, 9).unwrap();
        assert_eq!(built.spec(), "2..9");
    }

    #[test]
    fn test_equality_ignores_written_form() {
        assert_eq!(
            CycleRange::parse("1K..2K").unwrap(),
            CycleRange::parse("1000..+1000").unwrap()
        );
        assert_ne!(
            CycleRange::parse("1K").unwrap(),
            CycleRange::parse("1..1K").unwrap()
        );
    }

    #[test]
    fn test_display_round_trip() {
        let range = CycleRange::parse("3..+7").unwrap();
        assert_eq!(range.to_string(), "3..10");
        assert_eq!(range.to_string().parse::<CycleRange>().unwrap(), range);
    }
}
