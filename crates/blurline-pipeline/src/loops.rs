//! Loop nests derived from a stage's dimensions and its split/reorder directives.
//!
//! Every dimension starts as one loop; a split replaces a loop node by an
//! outer and an inner node. Splits whose extent is not a multiple of the
//! factor clip the last inner iteration, so the iterations of any loop
//! partition the stage's region and every coordinate is visited exactly once.

use std::fmt;

use crate::schedule::{Directive, ScheduleError};
use crate::stage::Stage;

/// How the iterations of a loop are executed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoopKind {
    /// One iteration after the other.
    Serial,
    /// Iterations distributed over the worker pool.
    Parallel,
    /// Iterations evaluated in batches of the given number of lanes.
    Vectorized(usize),
}

impl fmt::Display for LoopKind {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            LoopKind::Serial => f.write_str("for"),
            LoopKind::Parallel => f.write_str("parallel for"),
            LoopKind::Vectorized(width) => write!(f, "vectorized<{width}> for"),
        }
    }
}

#[derive(Debug, Clone, Copy)]
pub(crate) enum NodeKind {
    Pure { dim: usize },
    Outer { parent: usize, factor: usize },
    Inner { parent: usize, outer: usize, factor: usize },
}

#[derive(Debug, Clone, Copy)]
pub(crate) struct Split {
    pub outer: usize,
    pub inner: usize,
    pub factor: usize,
}

#[derive(Debug, Clone)]
pub(crate) struct LoopNode {
    pub name: String,
    pub kind: NodeKind,
    pub split: Option<Split>,
}

/// The resolved loops of one stage.
#[derive(Debug, Clone)]
pub struct LoopNest {
    pub(crate) nodes: Vec<LoopNode>,
    /// loop nodes, outermost first
    pub(crate) order: Vec<usize>,
    pub(crate) kinds: Vec<LoopKind>,
    /// node -> level in `order`
    pub(crate) level: Vec<Option<usize>>,
    /// dimension -> root node
    pub(crate) pure: Vec<usize>,
    pub(crate) split_nodes: Vec<usize>,
}

struct Builder<'a> {
    stage: &'a str,
    nodes: Vec<LoopNode>,
    order: Vec<usize>,
    marks: Vec<(usize, LoopKind)>,
}

impl Builder<'_> {
    fn find(&self, dim: &str) -> Result<usize, ScheduleError> {
        self.order
            .iter()
            .copied()
            .find(|&n| self.nodes[n].name == dim)
            .ok_or_else(|| ScheduleError::UnknownLoop {
                stage: self.stage.to_string(),
                dim: dim.to_string(),
            })
    }

    fn name_taken(&self, name: &str) -> bool {
        self.nodes.iter().any(|n| n.name == name)
    }

    fn split(&mut self, dim: &str, outer: &str, inner: &str, factor: usize) -> Result<(), ScheduleError> {
        let node = self.find(dim)?;
        if factor == 0 {
            return Err(ScheduleError::InvalidFactor {
                stage: self.stage.to_string(),
                dim: dim.to_string(),
                factor,
            });
        }
        if outer == inner {
            return Err(ScheduleError::DuplicateLoop {
                stage: self.stage.to_string(),
                dim: inner.to_string(),
            });
        }
        for name in [outer, inner] {
            if name != dim && self.name_taken(name) {
                return Err(ScheduleError::DuplicateLoop {
                    stage: self.stage.to_string(),
                    dim: name.to_string(),
                });
            }
        }

        let outer_node = self.nodes.len();
        let inner_node = outer_node + 1;
        self.nodes.push(LoopNode {
            name: outer.to_string(),
            kind: NodeKind::Outer {
                parent: node,
                factor,
            },
            split: None,
        });
        self.nodes.push(LoopNode {
            name: inner.to_string(),
            kind: NodeKind::Inner {
                parent: node,
                outer: outer_node,
                factor,
            },
            split: None,
        });
        self.nodes[node].split = Some(Split {
            outer: outer_node,
            inner: inner_node,
            factor,
        });
        // the split node keeps its identity but gives up its name
        self.nodes[node].name = format!("{dim}.split");

        let pos = self.order.iter().position(|&n| n == node).unwrap_or(0);
        self.order.splice(pos..=pos, [outer_node, inner_node]);
        Ok(())
    }

    fn reorder(&mut self, innermost_first: &[String]) -> Result<(), ScheduleError> {
        let mut nodes = Vec::with_capacity(innermost_first.len());
        for dim in innermost_first {
            let node = self.find(dim)?;
            if nodes.contains(&node) {
                return Err(ScheduleError::InvalidReorder {
                    stage: self.stage.to_string(),
                    dim: dim.clone(),
                });
            }
            nodes.push(node);
        }

        let mut slots: Vec<usize> = nodes
            .iter()
            .filter_map(|n| self.order.iter().position(|o| o == n))
            .collect();
        slots.sort_unstable();
        for (slot, node) in slots.into_iter().zip(nodes.into_iter().rev()) {
            self.order[slot] = node;
        }
        Ok(())
    }

    fn mark(&mut self, dim: &str, kind: LoopKind) -> Result<(), ScheduleError> {
        let node = self.find(dim)?;
        self.marks.retain(|(n, _)| *n != node);
        self.marks.push((node, kind));
        Ok(())
    }
}

impl LoopNest {
    /// Resolve the directives of `stage` into a loop nest.
    pub(crate) fn resolve(stage: &Stage, directives: &[Directive]) -> Result<Self, ScheduleError> {
        let arity = stage.arity();
        let mut builder = Builder {
            stage: stage.name(),
            nodes: stage
                .vars()
                .iter()
                .enumerate()
                .map(|(dim, var)| LoopNode {
                    name: var.name().to_string(),
                    kind: NodeKind::Pure { dim },
                    split: None,
                })
                .collect(),
            // first dimension innermost
            order: (0..arity).rev().collect(),
            marks: Vec::new(),
        };

        for directive in directives {
            match directive {
                Directive::Split {
                    dim,
                    outer,
                    inner,
                    factor,
                } => builder.split(dim, outer, inner, *factor)?,
                Directive::Tile {
                    x,
                    y,
                    xi,
                    yi,
                    x_factor,
                    y_factor,
                } => {
                    if x == y {
                        return Err(ScheduleError::SameDimensions {
                            stage: stage.name().to_string(),
                            dim: x.clone(),
                        });
                    }
                    builder.split(x, x, xi, *x_factor)?;
                    builder.split(y, y, yi, *y_factor)?;
                    builder.reorder(&[xi.clone(), yi.clone(), x.clone(), y.clone()])?;
                }
                Directive::Reorder(dims) => builder.reorder(dims)?,
                Directive::Parallel(dim) => builder.mark(dim, LoopKind::Parallel)?,
                Directive::Vectorize { dim, width } => {
                    if *width == 0 {
                        return Err(ScheduleError::InvalidVectorWidth {
                            stage: stage.name().to_string(),
                            dim: dim.clone(),
                            width: *width,
                        });
                    }
                    builder.mark(dim, LoopKind::Vectorized(*width))?
                }
            }
        }

        let Builder {
            nodes,
            order,
            marks,
            ..
        } = builder;

        let mut kinds = vec![LoopKind::Serial; order.len()];
        for (node, kind) in marks {
            let Some(pos) = order.iter().position(|&n| n == node) else {
                return Err(ScheduleError::MarkedLoopSplit {
                    stage: stage.name().to_string(),
                    dim: nodes[node].name.trim_end_matches(".split").to_string(),
                });
            };
            if matches!(kind, LoopKind::Vectorized(_)) && pos + 1 != order.len() {
                return Err(ScheduleError::NotInnermost {
                    stage: stage.name().to_string(),
                    dim: nodes[node].name.clone(),
                });
            }
            kinds[pos] = kind;
        }

        let mut level = vec![None; nodes.len()];
        for (pos, &node) in order.iter().enumerate() {
            level[node] = Some(pos);
        }
        let split_nodes = (0..nodes.len())
            .filter(|&n| nodes[n].split.is_some())
            .collect();

        Ok(Self {
            nodes,
            order,
            kinds,
            level,
            pure: (0..arity).collect(),
            split_nodes,
        })
    }

    /// Loop names, outermost first.
    pub fn loop_names(&self) -> Vec<&str> {
        self.order.iter().map(|&n| self.nodes[n].name.as_str()).collect()
    }

    /// Loop kinds, outermost first.
    pub fn loop_kinds(&self) -> &[LoopKind] {
        &self.kinds
    }

    /// Number of loops.
    pub fn depth(&self) -> usize {
        self.order.len()
    }

    /// Level of the loop called `dim`, 0 being the outermost.
    pub fn level_of(&self, dim: &str) -> Option<usize> {
        self.order.iter().position(|&n| self.nodes[n].name == dim)
    }

    /// Whether `node` has a known value once the loops above `level` are bound.
    fn is_bound(&self, node: usize, level: usize) -> bool {
        match self.nodes[node].split {
            Some(s) => self.is_bound(s.outer, level) && self.is_bound(s.inner, level),
            None => self.level[node].is_some_and(|l| l < level),
        }
    }

    /// Extent of `node` given the loops above `level`, clipped at partial tiles.
    pub(crate) fn extent(&self, node: usize, level: usize, extents: &[i64], values: &[i64]) -> i64 {
        match self.nodes[node].kind {
            NodeKind::Pure { dim } => extents[dim],
            NodeKind::Outer { parent, factor } => {
                let factor = factor as i64;
                (self.extent(parent, level, extents, values) + factor - 1) / factor
            }
            NodeKind::Inner {
                parent,
                outer,
                factor,
            } => {
                let factor = factor as i64;
                if self.is_bound(outer, level) {
                    let rest =
                        self.extent(parent, level, extents, values) - self.relative(outer, values) * factor;
                    factor.min(rest)
                } else {
                    factor
                }
            }
        }
    }

    /// Offset of `node` from the start of its dimension; all loops under it must be bound.
    pub(crate) fn relative(&self, node: usize, values: &[i64]) -> i64 {
        match self.nodes[node].split {
            Some(s) => self.relative(s.outer, values) * s.factor as i64 + self.relative(s.inner, values),
            None => values[node],
        }
    }

    /// Inclusive range of offsets `node` takes once the loops above `level` are bound.
    pub(crate) fn relative_range(
        &self,
        node: usize,
        level: usize,
        extents: &[i64],
        values: &[i64],
    ) -> (i64, i64) {
        let (lo, hi) = match self.nodes[node].split {
            Some(s) => {
                let (olo, ohi) = self.relative_range(s.outer, level, extents, values);
                let (ilo, ihi) = self.relative_range(s.inner, level, extents, values);
                let factor = s.factor as i64;
                (olo * factor + ilo, ohi * factor + ihi)
            }
            None if self.is_bound(node, level) => (values[node], values[node]),
            None => (0, self.extent(node, level, extents, values) - 1),
        };
        (lo, hi.min(self.extent(node, level, extents, values) - 1))
    }

    /// Whether the fully bound loop values name a coordinate inside the region.
    pub(crate) fn in_domain(&self, extents: &[i64], values: &[i64]) -> bool {
        let depth = self.depth();
        self.split_nodes
            .iter()
            .all(|&n| self.relative(n, values) < self.extent(n, depth, extents, values))
    }

    /// Coordinates of the fully bound loop values inside a region starting at `mins`.
    pub(crate) fn coords(&self, mins: &[i64], values: &[i64], out: &mut [i64]) {
        for (dim, &node) in self.pure.iter().enumerate() {
            out[dim] = mins[dim] + self.relative(node, values);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::{LoopKind, LoopNest};
    use crate::expr::{Expr, Var};
    use crate::schedule::{Directive, ScheduleError, Schedule};
    use crate::stage::Stage;
    use crate::types::ScalarType;

    fn stage() -> Stage {
        Stage {
            name: "f".to_string(),
            vars: vec![Var::new("x"), Var::new("y")],
            ty: ScalarType::I32,
            body: Some(Expr::int(0)),
        }
    }

    fn directives(f: impl FnOnce(&mut Schedule)) -> Vec<Directive> {
        let mut schedule = Schedule::new();
        f(&mut schedule);
        schedule
            .get("f")
            .map(|s| s.directives.clone())
            .unwrap_or_default()
    }

    /// All coordinates visited by the nest, in loop order.
    fn visit(nest: &LoopNest, extents: &[i64]) -> Vec<(i64, i64)> {
        fn go(
            nest: &LoopNest,
            level: usize,
            extents: &[i64],
            values: &mut Vec<i64>,
            out: &mut Vec<(i64, i64)>,
        ) {
            if level == nest.depth() {
                if nest.in_domain(extents, values) {
                    let mut c = [0i64; 2];
                    nest.coords(&[0, 0], values, &mut c);
                    out.push((c[0], c[1]));
                }
                return;
            }
            let node = nest.order[level];
            for v in 0..nest.extent(node, level, extents, values) {
                values[node] = v;
                go(nest, level + 1, extents, values, out);
            }
        }
        let mut values = vec![0; nest.nodes.len()];
        let mut out = Vec::new();
        go(nest, 0, extents, &mut values, &mut out);
        out
    }

    fn assert_partition(nest: &LoopNest, w: i64, h: i64) {
        let mut seen = visit(nest, &[w, h]);
        assert_eq!(seen.len() as i64, w * h);
        seen.sort_unstable();
        seen.dedup();
        assert_eq!(seen.len() as i64, w * h);
    }

    #[test]
    fn default_order_is_first_dim_innermost() -> Result<(), ScheduleError> {
        let nest = LoopNest::resolve(&stage(), &[])?;
        assert_eq!(nest.loop_names(), vec!["y", "x"]);
        assert_eq!(visit(&nest, &[2, 2]), vec![(0, 0), (1, 0), (0, 1), (1, 1)]);
        Ok(())
    }

    #[test]
    fn tile_order_and_kinds() -> Result<(), ScheduleError> {
        let (x, y, xi, yi) = (Var::new("x"), Var::new("y"), Var::new("xi"), Var::new("yi"));
        let d = directives(|s| {
            s.stage("f")
                .tile(&x, &y, &xi, &yi, 8, 4)
                .parallel(&y)
                .vectorize(&xi, 8);
        });
        let nest = LoopNest::resolve(&stage(), &d)?;
        assert_eq!(nest.loop_names(), vec!["y", "x", "yi", "xi"]);
        assert_eq!(
            nest.loop_kinds(),
            &[
                LoopKind::Parallel,
                LoopKind::Serial,
                LoopKind::Serial,
                LoopKind::Vectorized(8)
            ]
        );
        assert_eq!(nest.level_of("x"), Some(1));
        assert_partition(&nest, 16, 8);
        assert_partition(&nest, 13, 7);
        Ok(())
    }

    #[test]
    fn partial_tiles_are_clipped() -> Result<(), ScheduleError> {
        let (x, xo, xi) = (Var::new("x"), Var::new("xo"), Var::new("xi"));
        let d = directives(|s| {
            s.stage("f").split(&x, &xo, &xi, 4);
        });
        let nest = LoopNest::resolve(&stage(), &d)?;
        let extents = [10, 1];
        let xo_node = nest.order[1];
        let xi_node = nest.order[2];
        let mut values = vec![0; nest.nodes.len()];

        assert_eq!(nest.extent(xo_node, 1, &extents, &values), 3);
        values[xo_node] = 2;
        assert_eq!(nest.extent(xi_node, 2, &extents, &values), 2);
        // the tile footprint is clipped to the region
        assert_eq!(nest.relative_range(nest.pure[0], 2, &extents, &values), (8, 9));
        Ok(())
    }

    #[test]
    fn reorder_inner_outside_outer_is_guarded() -> Result<(), ScheduleError> {
        let (x, y, xo, xi) = (Var::new("x"), Var::new("y"), Var::new("xo"), Var::new("xi"));
        let d = directives(|s| {
            s.stage("f").split(&x, &xo, &xi, 3).reorder(&[&xo, &xi, &y]);
        });
        let nest = LoopNest::resolve(&stage(), &d)?;
        assert_eq!(nest.loop_names(), vec!["y", "xi", "xo"]);
        assert_partition(&nest, 7, 3);
        Ok(())
    }

    #[test]
    fn nested_splits_partition() -> Result<(), ScheduleError> {
        let (x, y, xo, xi, xoo, xoi) = (
            Var::new("x"),
            Var::new("y"),
            Var::new("xo"),
            Var::new("xi"),
            Var::new("xoo"),
            Var::new("xoi"),
        );
        let d = directives(|s| {
            s.stage("f")
                .split(&x, &xo, &xi, 4)
                .split(&xo, &xoo, &xoi, 2)
                .split(&y, &y, &Var::new("yi"), 5);
        });
        let nest = LoopNest::resolve(&stage(), &d)?;
        assert_eq!(nest.loop_names(), vec!["y", "yi", "xoo", "xoi", "xi"]);
        assert_partition(&nest, 19, 11);
        Ok(())
    }

    #[test]
    fn invalid_directives() {
        let (x, y, xi, yi) = (Var::new("x"), Var::new("y"), Var::new("xi"), Var::new("yi"));
        let z = Var::new("z");

        let resolve = |d: Vec<Directive>| LoopNest::resolve(&stage(), &d).err();

        assert!(matches!(
            resolve(directives(|s| {
                s.stage("f").tile(&x, &y, &xi, &yi, 0, 4);
            })),
            Some(ScheduleError::InvalidFactor { factor: 0, .. })
        ));
        assert!(matches!(
            resolve(directives(|s| {
                s.stage("f").tile(&x, &x, &xi, &yi, 2, 2);
            })),
            Some(ScheduleError::SameDimensions { .. })
        ));
        assert!(matches!(
            resolve(directives(|s| {
                s.stage("f").parallel(&z);
            })),
            Some(ScheduleError::UnknownLoop { .. })
        ));
        assert!(matches!(
            resolve(directives(|s| {
                s.stage("f").split(&x, &y, &xi, 2);
            })),
            Some(ScheduleError::DuplicateLoop { .. })
        ));
        assert!(matches!(
            resolve(directives(|s| {
                s.stage("f").vectorize(&y, 4);
            })),
            Some(ScheduleError::NotInnermost { .. })
        ));
        assert!(matches!(
            resolve(directives(|s| {
                s.stage("f").vectorize(&x, 0);
            })),
            Some(ScheduleError::InvalidVectorWidth { width: 0, .. })
        ));
        assert!(matches!(
            resolve(directives(|s| {
                s.stage("f").reorder(&[&x, &x]);
            })),
            Some(ScheduleError::InvalidReorder { .. })
        ));
        assert!(matches!(
            resolve(directives(|s| {
                s.stage("f").parallel(&x).split(&x, &x, &xi, 2);
            })),
            Some(ScheduleError::MarkedLoopSplit { .. })
        ));
    }
}
