//! Cycle sources shared by all workers.
//!
//! Workers claim segments of up to `stride` consecutive cycles. Each claimed
//! cycle also gets an ordinal: its position in the run's claim order. Ordinals
//! start at 0, are contiguous and never repeat, even across recycle passes and
//! range changes, which is what the completion tracker keys on.

use std::sync::Arc;

use parking_lot::RwLock;

use cyclegen_core::{CoreError, CoreResult, CycleRange};

use crate::sync::{AtomicU64, AtomicUsize, Ordering};

/// Cycles handed to one worker by a single claim.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CycleSegment {
    /// Ordinal of the first cycle in the segment.
    pub ordinal: u64,
    /// Pass index, starting at 0.
    pub recycle: u64,
    cycles: SegmentCycles,
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum SegmentCycles {
    Range { start: u64, len: u64 },
    List(Arc<[u64]>, usize, usize),
}

impl CycleSegment {
    /// Number of cycles in the segment.
    #[must_use]
    pub fn len(&self) -> u64 {
        match &self.cycles {
            SegmentCycles::Range { len, .. } => *len,
            SegmentCycles::List(_, from, to) => (to - from) as u64,
        }
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// `(ordinal, cycle)` pairs in claim order.
    pub fn iter(&self) -> impl Iterator<Item = (u64, u64)> + Send + '_ {
        (0..self.len()).map(move |i| (self.ordinal + i, self.cycle_at(i)))
    }

    fn cycle_at(&self, index: u64) -> u64 {
        match &self.cycles {
            SegmentCycles::Range { start, .. } => start + index,
            SegmentCycles::List(list, from, _) => list[from + index as usize],
        }
    }
}

/// A source of cycles that workers claim from concurrently.
pub trait Input: Send + Sync {
    /// Claims up to `stride` cycles. `None` once the input is exhausted.
    ///
    /// # Errors
    ///
    /// Returns `CoreError::FatalEngine` if the cycle counter would overflow.
    fn claim(&self, stride: u64) -> CoreResult<Option<CycleSegment>>;

    /// Total cycles this input will hand out, if known.
    fn total(&self) -> Option<u64>;

    /// Replaces the cycle range of a running input.
    fn set_range(&self, range: CycleRange) -> CoreResult<()> {
        let _ = range;
        Err(CoreError::invalid_state(
            "this input does not support changing the cycle range",
        ))
    }
}

#[derive(Debug, Clone)]
struct Bounds {
    range: CycleRange,
    recycles: u64,
    /// `range.count() * recycles`: one past the last claimable position.
    total: u64,
    fold: bool,
    ordinal_base: u64,
    position_base: u64,
}

impl Bounds {
    fn new(range: CycleRange, recycles: u64, fold: bool) -> CoreResult<Self> {
        let total = range.count().checked_mul(recycles).ok_or_else(|| {
            CoreError::config(format!(
                "{recycles} passes over {range} overflow the cycle counter"
            ))
        })?;
        Ok(Self {
            range,
            recycles,
            total,
            fold,
            ordinal_base: 0,
            position_base: 0,
        })
    }
}

/// Atomic cycle counter over a range, repeated `recycles` times.
///
/// The position counter runs from 0 to `count * recycles`; a position maps to
/// pass `position / count` and cycle `first + position % count`. Claims are a
/// CAS on that one counter, so no segment ever spans a pass boundary.
#[derive(Debug)]
pub struct CycleInput {
    bounds: RwLock<Bounds>,
    position: AtomicU64,
}

impl CycleInput {
    /// Counter over `range` for `recycles` passes.
    ///
    /// With `fold`, pass `p` presents cycles shifted by `p * range.count()`.
    pub fn new(range: CycleRange, recycles: u64, fold: bool) -> CoreResult<Self> {
        if recycles == 0 {
            return Err(CoreError::config("recycles must be > 0"));
        }
        Ok(Self {
            bounds: RwLock::new(Bounds::new(range, recycles, fold)?),
            position: AtomicU64::new(0),
        })
    }

    /// Current range.
    #[must_use]
    pub fn range(&self) -> CycleRange {
        self.bounds.read().range.clone()
    }

    /// Positions claimed so far, across passes.
    #[must_use]
    pub fn claimed(&self) -> u64 {
        let bounds = self.bounds.read();
        let position = self.position.load(Ordering::Acquire).min(bounds.total);
        bounds.ordinal_base + position.saturating_sub(bounds.position_base)
    }
}

impl Input for CycleInput {
    fn claim(&self, stride: u64) -> CoreResult<Option<CycleSegment>> {
        let stride = stride.max(1);
        let bounds = self.bounds.read();
        let count = bounds.range.count();

        let mut current = self.position.load(Ordering::Acquire);
        loop {
            if current >= bounds.total {
                return Ok(None);
            }
            let pass = current / count;
            let offset = current % count;
            let len = stride.min(count - offset);
            match self.position.compare_exchange_weak(
                current,
                current + len,
                Ordering::AcqRel,
                Ordering::Acquire,
            ) {
                Ok(_) => {
                    let fold_shift = if bounds.fold {
                        pass.checked_mul(count)
                    } else {
                        Some(0)
                    };
                    let start = fold_shift
                        .and_then(|shift| (bounds.range.first() + offset).checked_add(shift))
                        .ok_or_else(|| {
                            CoreError::fatal(format!(
                                "cycle counter overflow at pass {pass}, offset {offset}"
                            ))
                        })?;
                    return Ok(Some(CycleSegment {
                        ordinal: bounds.ordinal_base + (current - bounds.position_base),
                        recycle: pass,
                        cycles: SegmentCycles::Range { start, len },
                    }));
                }
                Err(actual) => current = actual,
            }
        }
    }

    fn total(&self) -> Option<u64> {
        let bounds = self.bounds.read();
        Some(bounds.ordinal_base + (bounds.total - bounds.position_base.min(bounds.total)))
    }

    /// Moves a running counter onto a new range.
    ///
    /// A new first cycle restarts the current pass at that cycle. A new last
    /// cycle keeps the current cycle; if it now lies beyond the range the
    /// counter moves to the start of the next pass. An exhausted counter stays
    /// exhausted.
    fn set_range(&self, range: CycleRange) -> CoreResult<()> {
        let mut bounds = self.bounds.write();
        let old = bounds.clone();
        let mut next = Bounds::new(range.clone(), old.recycles, old.fold)?;

        let position = self.position.load(Ordering::Acquire);
        let ordinal_now = old.ordinal_base + (position.min(old.total) - old.position_base);

        let new_position = if position >= old.total {
            next.total
        } else {
            let old_count = old.range.count();
            let pass = position / old_count;
            let cycle = old.range.first() + position % old_count;
            let offset = if range.first() != old.range.first() || cycle < range.first() {
                0
            } else {
                cycle - range.first()
            };
            let (pass, offset) = if offset >= range.count() {
                (pass + 1, 0)
            } else {
                (pass, offset)
            };
            pass.checked_mul(range.count())
                .and_then(|p| p.checked_add(offset))
                .map_or(next.total, |p| p.min(next.total))
        };

        next.ordinal_base = ordinal_now;
        next.position_base = new_position;
        self.position.store(new_position, Ordering::Release);
        *bounds = next;
        tracing::info!(range = %range, position = new_position, "Cycle range changed");
        Ok(())
    }
}

/// Externally supplied cycle list, handed out in order.
#[derive(Debug)]
pub struct SequenceInput {
    cycles: Arc<[u64]>,
    next: AtomicUsize,
}

impl SequenceInput {
    /// Input over exactly these cycles.
    #[must_use]
    pub fn new(cycles: Vec<u64>) -> Self {
        Self {
            cycles: cycles.into(),
            next: AtomicUsize::new(0),
        }
    }
}

impl Input for SequenceInput {
    fn claim(&self, stride: u64) -> CoreResult<Option<CycleSegment>> {
        let stride = usize::try_from(stride.max(1)).unwrap_or(usize::MAX);
        let mut current = self.next.load(Ordering::Acquire);
        loop {
            if current >= self.cycles.len() {
                return Ok(None);
            }
            let end = current.saturating_add(stride).min(self.cycles.len());
            match self.next.compare_exchange_weak(
                current,
                end,
                Ordering::AcqRel,
                Ordering::Acquire,
            ) {
                Ok(_) => {
                    return Ok(Some(CycleSegment {
                        ordinal: current as u64,
                        recycle: 0,
                        cycles: SegmentCycles::List(Arc::clone(&self.cycles), current, end),
                    }))
                }
                Err(actual) => current = actual,
            }
        }
    }

    fn total(&self) -> Option<u64> {
        Some(self.cycles.len() as u64)
    }
}
