//! Op sequencing: which template runs for a given cycle.
//!
//! A plan of `sum(ratios)` slots is built once; cycle `c` uses slot
//! `c % plan.len()`, so the choice is a pure function of the cycle.

use std::cmp::Ordering;

use cyclegen_core::{CoreError, CoreResult, SequencerKind};

const MAX_PLAN_LEN: u64 = 1_000_000;

/// Fixed op plan over a set of weighted items.
#[derive(Debug, Clone)]
pub struct OpSequence<T> {
    items: Vec<T>,
    plan: Vec<usize>,
}

impl<T> OpSequence<T> {
    /// Builds the plan for `weighted` items. Items with ratio 0 never appear.
    ///
    /// # Errors
    ///
    /// Fails when every ratio is 0 or the ratios sum past one million.
    pub fn build(kind: SequencerKind, weighted: Vec<(T, u64)>) -> CoreResult<Self> {
        let total = weighted
            .iter()
            .try_fold(0u64, |acc, (_, ratio)| acc.checked_add(*ratio))
            .filter(|total| *total <= MAX_PLAN_LEN)
            .ok_or_else(|| {
                CoreError::config(format!(
                    "op ratios must sum to at most {MAX_PLAN_LEN}"
                ))
            })?;
        if total == 0 {
            return Err(CoreError::config("every op has ratio 0; nothing to run"));
        }

        let ratios: Vec<u64> = weighted.iter().map(|(_, ratio)| *ratio).collect();
        let plan = match kind {
            SequencerKind::Concat => concat(&ratios),
            SequencerKind::Bucket => bucket(&ratios),
            SequencerKind::Interval => interval(&ratios),
        };
        Ok(Self {
            items: weighted.into_iter().map(|(item, _)| item).collect(),
            plan,
        })
    }

    /// Item for `cycle`.
    #[must_use]
    pub fn get(&self, cycle: u64) -> &T {
        let slot = (cycle % self.plan.len() as u64) as usize;
        &self.items[self.plan[slot]]
    }

    /// Index of the item chosen for `cycle`.
    #[must_use]
    pub fn index_for(&self, cycle: u64) -> usize {
        self.plan[(cycle % self.plan.len() as u64) as usize]
    }

    /// Plan length, i.e. the sum of the ratios.
    #[must_use]
    pub fn len(&self) -> usize {
        self.plan.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.plan.is_empty()
    }

    /// Item indexes in plan order.
    #[must_use]
    pub fn plan(&self) -> &[usize] {
        &self.plan
    }

    /// All items, including those with ratio 0.
    #[must_use]
    pub fn items(&self) -> &[T] {
        &self.items
    }
}

fn concat(ratios: &[u64]) -> Vec<usize> {
    ratios
        .iter()
        .enumerate()
        .flat_map(|(i, ratio)| std::iter::repeat(i).take(*ratio as usize))
        .collect()
}

fn bucket(ratios: &[u64]) -> Vec<usize> {
    let mut remaining = ratios.to_vec();
    let mut plan = Vec::with_capacity(ratios.iter().sum::<u64>() as usize);
    while remaining.iter().any(|r| *r > 0) {
        for (i, left) in remaining.iter_mut().enumerate() {
            if *left > 0 {
                *left -= 1;
                plan.push(i);
            }
        }
    }
    plan
}

fn interval(ratios: &[u64]) -> Vec<usize> {
    // (position numerator, position denominator, item)
    let mut slots: Vec<(u64, u64, usize)> = ratios
        .iter()
        .enumerate()
        .flat_map(|(i, ratio)| (0..*ratio).map(move |j| (j, *ratio, i)))
        .collect();
    slots.sort_by(|a, b| {
        let lhs = u128::from(a.0) * u128::from(b.1);
        let rhs = u128::from(b.0) * u128::from(a.1);
        match lhs.cmp(&rhs) {
            Ordering::Equal => a.2.cmp(&b.2),
            other => other,
        }
    });
    slots.into_iter().map(|(_, _, i)| i).collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn letters(kind: SequencerKind, weighted: &[(char, u64)]) -> String {
        let seq = OpSequence::build(kind, weighted.to_vec()).unwrap();
        (0..seq.len() as u64).map(|c| *seq.get(c)).collect()
    }

    #[test]
    fn test_concat() {
        assert_eq!(letters(SequencerKind::Concat, &[('A', 3), ('B', 1)]), "AAAB");
    }

    #[test]
    fn test_bucket() {
        assert_eq!(letters(SequencerKind::Bucket, &[('A', 3), ('B', 1)]), "ABAA");
        assert_eq!(
            letters(SequencerKind::Bucket, &[('A', 2), ('B', 2), ('C', 1)]),
            "ABCAB"
        );
    }

    #[test]
    fn test_interval() {
        assert_eq!(letters(SequencerKind::Interval, &[('A', 2), ('B', 3)]), "ABBAB");
        assert_eq!(letters(SequencerKind::Interval, &[('A', 1), ('B', 1)]), "AB");
    }

    #[test]
    fn test_zero_ratio_excluded() {
        let seq = OpSequence::build(SequencerKind::Bucket, vec![('A', 0), ('B', 2)]).unwrap();
        assert_eq!(seq.len(), 2);
        assert_eq!(seq.items().len(), 2);
        assert!((0..10).all(|c| *seq.get(c) == 'B'));
        assert_eq!(seq.index_for(7), 1);
    }

    #[test]
    fn test_cycle_wraps_over_plan() {
        let seq = OpSequence::build(SequencerKind::Concat, vec![('A', 1), ('B', 1)]).unwrap();
        assert_eq!(*seq.get(u64::MAX), 'B');
        assert_eq!(*seq.get(1_000_000), 'A');
    }

    #[test]
    fn test_rejects_empty_and_huge_plans() {
        assert!(OpSequence::build(SequencerKind::Bucket, vec![('A', 0)]).is_err());
        assert!(OpSequence::<char>::build(SequencerKind::Bucket, vec![]).is_err());
        assert!(OpSequence::build(SequencerKind::Bucket, vec![('A', 2_000_000)]).is_err());
        assert!(OpSequence::build(SequencerKind::Bucket, vec![('A', u64::MAX), ('B', 1)]).is_err());
    }
}
