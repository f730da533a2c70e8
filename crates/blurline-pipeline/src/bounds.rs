//! Interval bounds inference.
//!
//! The region a stage must provide is the union of the coordinates its
//! consumers read, computed by interval arithmetic over the call arguments
//! and propagated from consumers to producers.

use std::fmt;

use crate::error::PipelineError;
use crate::expr::BinOp;
use crate::lower::{Compiled, Plan, Source};
use crate::types::ScalarType;

/// A closed integer interval `[min, max]`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct Interval {
    /// Smallest value, inclusive.
    pub min: i64,
    /// Largest value, inclusive.
    pub max: i64,
}

/// One interval per dimension.
pub type Region = Vec<Interval>;

impl Interval {
    /// The interval `[min, max]`.
    pub fn new(min: i64, max: i64) -> Self {
        Self { min, max }
    }

    /// The single value `v`.
    pub fn point(v: i64) -> Self {
        Self::new(v, v)
    }

    /// The `extent` values starting at `min`.
    pub fn from_extent(min: i64, extent: i64) -> Self {
        Self::new(min, min + extent - 1)
    }

    /// Number of values in the interval.
    pub fn extent(&self) -> i64 {
        self.max - self.min + 1
    }

    /// Smallest interval holding both.
    pub fn union(&self, other: &Interval) -> Interval {
        Interval::new(self.min.min(other.min), self.max.max(other.max))
    }

    fn of_type(ty: ScalarType) -> Self {
        Self::new(ty.min_value(), ty.max_value())
    }
}

impl fmt::Display for Interval {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "[{}, {}]", self.min, self.max)
    }
}

/// Restrict an interval to the values of `ty`.
///
/// Results that do not fit are wrapped at run time, so any value of the type
/// is possible. Coordinates (`int32`) that overflow cannot be bounded.
fn fit(iv: Option<Interval>, ty: ScalarType) -> Option<Interval> {
    match iv {
        Some(iv) if ty.contains(iv.min) && ty.contains(iv.max) => Some(iv),
        _ if ty == ScalarType::I32 => None,
        _ => Some(Interval::of_type(ty)),
    }
}

fn binary(op: BinOp, a: Interval, b: Interval) -> Option<Interval> {
    let iv = match op {
        BinOp::Add => Interval::new(a.min.checked_add(b.min)?, a.max.checked_add(b.max)?),
        BinOp::Sub => Interval::new(a.min.checked_sub(b.max)?, a.max.checked_sub(b.min)?),
        BinOp::Mul => {
            let corners = [
                a.min.checked_mul(b.min)?,
                a.min.checked_mul(b.max)?,
                a.max.checked_mul(b.min)?,
                a.max.checked_mul(b.max)?,
            ];
            Interval::new(
                corners.iter().copied().min()?,
                corners.iter().copied().max()?,
            )
        }
        BinOp::Min => Interval::new(a.min.min(b.min), a.max.min(b.max)),
        BinOp::Max => Interval::new(a.min.max(b.min), a.max.max(b.max)),
        // only division by a positive constant is monotonic
        BinOp::Div if b.min == b.max && b.min > 0 => Interval::new(a.min / b.min, a.max / b.min),
        BinOp::Mod if b.min == b.max && b.min > 0 => {
            let m = b.min;
            if a.min >= 0 && a.max < m {
                a
            } else if a.min >= 0 {
                Interval::new(0, m - 1)
            } else {
                Interval::new(1 - m, m - 1)
            }
        }
        BinOp::Div | BinOp::Mod => return None,
    };
    Some(iv)
}

/// Bounds of `expr` when each coordinate ranges over `region`.
///
/// Returns `None` when the value cannot be bounded.
pub(crate) fn bounds_of(expr: &Compiled, region: &[Interval]) -> Option<Interval> {
    match expr {
        Compiled::Const(v) => Some(Interval::point(*v)),
        Compiled::Coord(dim) => region.get(*dim).copied(),
        Compiled::Binary { op, ty, lhs, rhs } => {
            let lhs = bounds_of(lhs, region);
            let rhs = bounds_of(rhs, region);
            let iv = match (lhs, rhs) {
                (Some(a), Some(b)) => binary(*op, a, b),
                _ => None,
            };
            fit(iv, *ty)
        }
        Compiled::Cast { ty, value } => fit(bounds_of(value, region), *ty),
        // loaded values are data dependent
        Compiled::Load { ty, .. } => fit(None, *ty),
    }
}

/// Regions required from every stage and from the input.
#[derive(Debug, Clone)]
pub(crate) struct Requirements {
    pub stages: Vec<Option<Region>>,
    pub input: Option<Region>,
}

fn merge(slot: &mut Option<Region>, region: Region) {
    match slot {
        Some(current) => {
            for (c, r) in current.iter_mut().zip(region.iter()) {
                *c = c.union(r);
            }
        }
        None => *slot = Some(region),
    }
}

/// Propagate `region` of stage `start` to everything it reads, directly or not.
pub(crate) fn required_regions(
    plan: &Plan,
    start: usize,
    region: Region,
) -> Result<Requirements, PipelineError> {
    let mut reqs = Requirements {
        stages: vec![None; plan.stages.len()],
        input: None,
    };
    reqs.stages[start] = Some(region);

    // stages are stored producers first
    for idx in (0..=start).rev() {
        let Some(region) = reqs.stages[idx].clone() else {
            continue;
        };
        let stage = &plan.stages[idx];
        let mut failed = None;
        stage.value.visit_loads(&mut |source, args| {
            if failed.is_some() {
                return;
            }
            let read: Option<Region> = args.iter().map(|a| bounds_of(a, &region)).collect();
            match (read, source) {
                (Some(read), Source::Input) => merge(&mut reqs.input, read),
                (Some(read), Source::Stage(p)) => merge(&mut reqs.stages[p], read),
                (None, _) => failed = Some(source),
            }
        });
        if let Some(source) = failed {
            let producer = match source {
                Source::Input => plan.input.name().to_string(),
                Source::Stage(p) => plan.stages[p].name.clone(),
            };
            return Err(PipelineError::UnboundedAccess {
                consumer: stage.name.clone(),
                producer,
            });
        }
    }

    Ok(reqs)
}
