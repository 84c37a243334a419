//! Mixed-radix mapping between ordinals and fixed-width labels.
//!
//! A spec lists one character set per column, separated by `,` or `;`.
//! Within a column, `a-z` expands to an inclusive printable-ASCII range and
//! other characters stand for themselves. A `*n` suffix repeats the column
//! `n` times, so `A-Z;0-9*3` describes labels such as `Q042`.
//!
//! Column `i` has radix `card[i]` and place value `modulo[i]`, the product of
//! every later column's cardinality. An ordinal maps to one index per column:
//! `index[i] = (ordinal / modulo[i]) % card[i]`. Ordinals at or beyond the
//! total cardinality wrap around.

use std::fmt;
use std::sync::Arc;

use crate::error::{BinderError, BinderResult};

const FIRST_PRINTABLE: u32 = 32;
const LAST_PRINTABLE: u32 = 126;
const NOT_IN_COLUMN: u8 = u8::MAX;
/// Widest label a spec may describe, counting repeated columns.
pub const MAX_COLUMNS: usize = 64;

type ElementFn<T> = Arc<dyn Fn(u64) -> T + Send + Sync>;

/// Deterministic, reversible mapping from ordinals to column values.
pub struct Combiner<T> {
    columns: Vec<Vec<char>>,
    modulo: Vec<u64>,
    inverted: Vec<[u8; 128]>,
    cardinality: u64,
    element: ElementFn<T>,
}

impl<T> Clone for Combiner<T> {
    fn clone(&self) -> Self {
        Self {
            columns: self.columns.clone(),
            modulo: self.modulo.clone(),
            inverted: self.inverted.clone(),
            cardinality: self.cardinality,
            element: Arc::clone(&self.element),
        }
    }
}

impl<T> fmt::Debug for Combiner<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Combiner")
            .field("columns", &self.columns.len())
            .field("cardinality", &self.cardinality)
            .finish()
    }
}

impl Combiner<u64> {
    /// Combiner whose element function returns the column index itself.
    pub fn indexed(spec: &str) -> BinderResult<Self> {
        Self::new(spec, |index| index)
    }
}

impl<T> Combiner<T> {
    /// Parses `spec` and attaches the element function applied to each column index.
    pub fn new<F>(spec: &str, element: F) -> BinderResult<Self>
    where
        F: Fn(u64) -> T + Send + Sync + 'static,
    {
        let columns = parse_spec(spec)?;

        let mut modulo = vec![1u64; columns.len()];
        for i in (0..columns.len().saturating_sub(1)).rev() {
            modulo[i] = modulo[i + 1]
                .checked_mul(columns[i + 1].len() as u64)
                .ok_or_else(|| BinderError::CardinalityOverflow {
                    spec: spec.to_string(),
                })?;
        }
        let cardinality = modulo[0]
            .checked_mul(columns[0].len() as u64)
            .ok_or_else(|| BinderError::CardinalityOverflow {
                spec: spec.to_string(),
            })?;

        let inverted = columns
            .iter()
            .map(|column| {
                let mut index = [NOT_IN_COLUMN; 128];
                for (position, c) in column.iter().enumerate() {
                    index[*c as usize] = position as u8;
                }
                index
            })
            .collect();

        Ok(Self {
            columns,
            modulo,
            inverted,
            cardinality,
            element: Arc::new(element),
        })
    }

    /// Number of distinct labels.
    #[must_use]
    pub fn cardinality(&self) -> u64 {
        self.cardinality
    }

    /// Number of columns (label width).
    #[must_use]
    pub fn width(&self) -> usize {
        self.columns.len()
    }

    /// Characters of column `i`.
    #[must_use]
    pub fn column(&self, i: usize) -> Option<&[char]> {
        self.columns.get(i).map(Vec::as_slice)
    }

    /// Element values for `ordinal`, one per column.
    #[must_use]
    pub fn apply(&self, ordinal: u64) -> Vec<T> {
        self.get_indexes(ordinal)
            .into_iter()
            .map(|index| (self.element)(u64::from(index)))
            .collect()
    }

    /// Column indexes for `ordinal`.
    #[must_use]
    pub fn get_indexes(&self, ordinal: u64) -> Vec<u32> {
        let mut remaining = ordinal % self.cardinality;
        self.columns
            .iter()
            .zip(&self.modulo)
            .map(|(column, &place)| {
                let selector = (remaining / place) % column.len() as u64;
                remaining %= place;
                selector as u32
            })
            .collect()
    }

    /// Label for `ordinal`.
    #[must_use]
    pub fn get_encoding(&self, ordinal: u64) -> String {
        self.get_indexes(ordinal)
            .into_iter()
            .zip(&self.columns)
            .map(|(index, column)| column[index as usize])
            .collect()
    }

    /// Label for an index vector.
    pub fn encoding_for(&self, indexes: &[u32]) -> BinderResult<String> {
        self.check_indexes(indexes)?;
        Ok(indexes
            .iter()
            .zip(&self.columns)
            .map(|(&index, column)| column[index as usize])
            .collect())
    }

    /// Column indexes for a label.
    pub fn indexes_for(&self, label: &str) -> BinderResult<Vec<u32>> {
        let chars: Vec<char> = label.chars().collect();
        if chars.len() != self.columns.len() {
            return Err(BinderError::InvalidLabel {
                label: label.to_string(),
                message: format!(
                    "expected {} characters, got {}",
                    self.columns.len(),
                    chars.len()
                ),
            });
        }
        chars
            .iter()
            .zip(&self.inverted)
            .enumerate()
            .map(|(column, (&c, inverted))| {
                let index = if (c as u32) < 128 {
                    inverted[c as usize]
                } else {
                    NOT_IN_COLUMN
                };
                if index == NOT_IN_COLUMN {
                    Err(BinderError::InvalidLabel {
                        label: label.to_string(),
                        message: format!("`{c}` is not in column {column}"),
                    })
                } else {
                    Ok(u32::from(index))
                }
            })
            .collect()
    }

    /// Ordinal for a label; inverse of [`Combiner::get_encoding`].
    pub fn get_ordinal(&self, label: &str) -> BinderResult<u64> {
        let indexes = self.indexes_for(label)?;
        self.ordinal_for(&indexes)
    }

    /// Ordinal for an index vector; inverse of [`Combiner::get_indexes`].
    pub fn ordinal_for(&self, indexes: &[u32]) -> BinderResult<u64> {
        self.check_indexes(indexes)?;
        // Each term is below the total cardinality, so the sum cannot overflow.
        Ok(indexes
            .iter()
            .zip(&self.modulo)
            .map(|(&index, &place)| u64::from(index) * place)
            .sum())
    }

    /// Element values for an index vector.
    pub fn get_array(&self, indexes: &[u32]) -> BinderResult<Vec<T>> {
        self.check_indexes(indexes)?;
        Ok(indexes
            .iter()
            .map(|&index| (self.element)(u64::from(index)))
            .collect())
    }

    /// Element values for a label.
    pub fn array_for_label(&self, label: &str) -> BinderResult<Vec<T>> {
        let indexes = self.indexes_for(label)?;
        self.get_array(&indexes)
    }

    fn check_indexes(&self, indexes: &[u32]) -> BinderResult<()> {
        if indexes.len() != self.columns.len() {
            return Err(BinderError::InvalidIndexes {
                message: format!(
                    "expected {} indexes, got {}",
                    self.columns.len(),
                    indexes.len()
                ),
            });
        }
        for (column, (&index, chars)) in indexes.iter().zip(&self.columns).enumerate() {
            if index as usize >= chars.len() {
                return Err(BinderError::InvalidIndexes {
                    message: format!(
                        "index {index} out of range for column {column} of size {}",
                        chars.len()
                    ),
                });
            }
        }
        Ok(())
    }
}

/// Expands a spec into its column character sets.
pub fn parse_spec(spec: &str) -> BinderResult<Vec<Vec<char>>> {
    let mut columns = Vec::new();
    for (position, part) in spec.split([',', ';']).enumerate() {
        let (body, repeat) = split_repeat(part);
        let repeat = match repeat {
            Some(digits) => digits
                .parse::<u32>()
                .map_err(|_| BinderError::spec(spec, format!("bad repeat count in `{part}`")))?,
            None => 1,
        };
        if repeat == 0 {
            return Err(BinderError::spec(
                spec,
                format!("column `{part}` is repeated zero times"),
            ));
        }
        let chars = column_chars(spec, body)?;
        if chars.is_empty() {
            return Err(BinderError::spec(spec, format!("column {position} is empty")));
        }
        let width = columns.len().saturating_add(repeat as usize);
        if width > MAX_COLUMNS {
            return Err(BinderError::spec(
                spec,
                format!("{width} columns exceed the limit of {MAX_COLUMNS}"),
            ));
        }
        for _ in 0..repeat {
            columns.push(chars.clone());
        }
    }
    Ok(columns)
}

/// Splits `body*digits` into its parts; anything else has no repeat.
fn split_repeat(part: &str) -> (&str, Option<&str>) {
    match part.rfind('*') {
        Some(at) => {
            let digits = &part[at + 1..];
            if !digits.is_empty() && digits.chars().all(|c| c.is_ascii_digit()) {
                (&part[..at], Some(digits))
            } else {
                (part, None)
            }
        }
        None => (part, None),
    }
}

fn column_chars(spec: &str, body: &str) -> BinderResult<Vec<char>> {
    let input: Vec<char> = body.chars().collect();
    let mut chars = Vec::new();
    let mut pos = 0;
    while pos < input.len() {
        if pos + 2 < input.len() && input[pos + 1] == '-' {
            let (start, end) = (input[pos], input[pos + 2]);
            check_printable(spec, start)?;
            check_printable(spec, end)?;
            if end < start {
                return Err(BinderError::spec(
                    spec,
                    format!("range `{start}-{end}` is reversed, write `{end}-{start}`"),
                ));
            }
            chars.extend(start..=end);
            pos += 3;
        } else {
            check_printable(spec, input[pos])?;
            chars.push(input[pos]);
            pos += 1;
        }
    }

    let mut seen = [false; 128];
    for c in &chars {
        if std::mem::replace(&mut seen[*c as usize], true) {
            return Err(BinderError::spec(
                spec,
                format!("`{c}` appears twice in column `{body}`"),
            ));
        }
    }
    Ok(chars)
}

fn check_printable(spec: &str, c: char) -> BinderResult<()> {
    let code = c as u32;
    if !(FIRST_PRINTABLE..=LAST_PRINTABLE).contains(&code) {
        return Err(BinderError::spec(
            spec,
            format!("character code {code} is outside printable ASCII"),
        ));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_spec_ranges_and_repeats() {
        let columns = parse_spec("A-C;0-1*2").unwrap();
        assert_eq!(columns.len(), 3);
        assert_eq!(columns[0], vec!['A', 'B', 'C']);
        assert_eq!(columns[1], vec!['0', '1']);
        assert_eq!(columns[2], vec!['0', '1']);
    }

    #[test]
    fn test_literal_characters_and_dash() {
        let columns = parse_spec("xyz,-").unwrap();
        assert_eq!(columns[0], vec!['x', 'y', 'z']);
        assert_eq!(columns[1], vec!['-']);
    }

    #[test]
    fn test_radix_factors() {
        let combiner = Combiner::indexed("A-C;0-1*2").unwrap();
        assert_eq!(combiner.modulo, vec![4, 2, 1]);
        assert_eq!(combiner.cardinality(), 12);
        assert_eq!(combiner.width(), 3);
    }

    #[test]
    fn test_encoding_sequence() {
        let combiner = Combiner::indexed("A-B;0-2").unwrap();
        let labels: Vec<String> = (0..6).map(|o| combiner.get_encoding(o)).collect();
        assert_eq!(labels, vec!["A0", "A1", "A2", "B0", "B1", "B2"]);
    }

    #[test]
    fn test_ordinal_wraps_around() {
        let combiner = Combiner::indexed("A-B;0-2").unwrap();
        assert_eq!(combiner.get_encoding(6), "A0");
        assert_eq!(combiner.get_indexes(7), vec![0, 1]);
    }

    #[test]
    fn test_label_round_trip() {
        let combiner = Combiner::indexed("A-Z;0-9*3").unwrap();
        assert_eq!(combiner.get_encoding(0), "A000");
        let ordinal = combiner.get_ordinal("Q042").unwrap();
        assert_eq!(combiner.get_encoding(ordinal), "Q042");
        assert_eq!(ordinal, 16 * 1000 + 42);
    }

    #[test]
    fn test_element_function_receives_index() {
        let combiner = Combiner::new("a-c;x-z", |i| i * 10).unwrap();
        assert_eq!(combiner.apply(5), vec![10, 20]);
        assert_eq!(combiner.get_array(&[2, 0]).unwrap(), vec![20, 0]);
        assert_eq!(combiner.array_for_label("cy").unwrap(), vec![20, 10]);
    }

    #[test]
    fn test_rejects_bad_labels_and_indexes() {
        let combiner = Combiner::indexed("A-B;0-2").unwrap();
        assert!(combiner.get_ordinal("A").is_err());
        assert!(combiner.get_ordinal("C0").is_err());
        assert!(combiner.get_ordinal("A9").is_err());
        assert!(combiner.get_ordinal("Aé").is_err());
        assert!(combiner.ordinal_for(&[0, 3]).is_err());
        assert!(combiner.encoding_for(&[0]).is_err());
        assert_eq!(combiner.encoding_for(&[1, 2]).unwrap(), "B2");
    }

    #[test]
    fn test_rejects_bad_specs() {
        assert!(matches!(
            parse_spec("z-a"),
            Err(BinderError::InvalidSpec { .. })
        ));
        assert!(parse_spec("").is_err());
        assert!(parse_spec("a-c;").is_err());
        assert!(parse_spec("aa").is_err());
        assert!(parse_spec("a*0").is_err());
        assert!(parse_spec("\u{1}-a").is_err());
        assert!(parse_spec("é").is_err());
    }

    #[test]
    fn test_star_without_digits_is_literal() {
        let columns = parse_spec("a*").unwrap();
        assert_eq!(columns, vec![vec!['a', '*']]);
    }

    #[test]
    fn test_cardinality_overflow() {
        // 95^9 fits in 64 bits, 95^10 does not.
        assert!(Combiner::indexed(" -~*9").is_ok());
        let too_wide = " -~*10";
        assert!(matches!(
            Combiner::indexed(too_wide),
            Err(BinderError::CardinalityOverflow { .. })
        ));
    }

    #[test]
    fn test_rejects_too_many_columns() {
        assert_eq!(parse_spec("a*64").unwrap().len(), MAX_COLUMNS);
        assert!(matches!(
            parse_spec("a*4000000000"),
            Err(BinderError::InvalidSpec { .. })
        ));
        assert!(matches!(
            parse_spec("a*60;b*5"),
            Err(BinderError::InvalidSpec { .. })
        ));
    }

    #[test]
    fn test_largest_ordinal_round_trips() {
        let combiner = Combiner::indexed(" -~*9").unwrap();
        let last = combiner.cardinality() - 1;
        let label = combiner.get_encoding(last);
        assert_eq!(label, "~".repeat(9));
        assert_eq!(combiner.get_ordinal(&label).unwrap(), last);
    }
}
