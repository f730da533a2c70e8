//! Expression evaluation over stage buffers and the bound input.

use blurline_image::BoundaryBuffer;

use crate::bounds::Interval;
use crate::lower::{Compiled, Compute, Plan, Source};
use crate::stage::MAX_DIMENSIONS;
use crate::types::Pixel;

/// Dense storage of one stage over a region, first dimension fastest.
#[derive(Debug, Clone)]
pub(crate) struct Buffer {
    pub layout: Layout,
    pub data: Vec<i64>,
}

/// Maps coordinates of a region to buffer offsets.
#[derive(Debug, Clone, Copy)]
pub(crate) struct Layout {
    dims: usize,
    mins: [i64; MAX_DIMENSIONS],
    strides: [i64; MAX_DIMENSIONS],
}

impl Layout {
    #[inline]
    pub(crate) fn offset(&self, coords: &[i64]) -> usize {
        let mut offset = 0;
        for d in 0..self.dims {
            offset += (coords[d] - self.mins[d]) * self.strides[d];
        }
        offset as usize
    }
}

impl Buffer {
    pub(crate) fn new(region: &[Interval]) -> Self {
        let mut layout = Layout {
            dims: region.len(),
            mins: [0; MAX_DIMENSIONS],
            strides: [0; MAX_DIMENSIONS],
        };
        let mut len = 1i64;
        for (d, iv) in region.iter().enumerate() {
            layout.mins[d] = iv.min;
            layout.strides[d] = len;
            len *= iv.extent();
        }
        Self {
            layout,
            data: vec![0; len.max(0) as usize],
        }
    }

    #[inline]
    pub(crate) fn get(&self, coords: &[i64]) -> i64 {
        self.data[self.layout.offset(coords)]
    }
}

/// A producer buffer visible to the loop iteration that computed it.
pub(crate) struct Scope<'s> {
    pub parent: Option<&'s Scope<'s>>,
    pub stage: usize,
    pub buffer: &'s Buffer,
}

/// The buffers readable at some point of a realization.
#[derive(Clone, Copy)]
pub(crate) struct Ctx<'s> {
    pub roots: &'s [Option<Buffer>],
    pub scope: Option<&'s Scope<'s>>,
}

impl<'s> Ctx<'s> {
    fn buffer(&self, stage: usize) -> &'s Buffer {
        let mut scope = self.scope;
        while let Some(s) = scope {
            if s.stage == stage {
                return s.buffer;
            }
            scope = s.parent;
        }
        match self.roots.get(stage) {
            Some(Some(buffer)) => buffer,
            // lowering orders producers before every read
            _ => unreachable!("stage {stage} is read before it is computed"),
        }
    }
}

/// Evaluates the stages of a plan against one bound input.
pub(crate) struct Realizer<'a, T> {
    pub plan: &'a Plan,
    pub input: BoundaryBuffer<'a, T>,
    pub parallel: bool,
    pub trace: bool,
}

impl<T: Pixel> Realizer<'_, T> {
    /// Evaluate `expr` at one coordinate.
    pub(crate) fn eval(&self, ctx: &Ctx, expr: &Compiled, coords: &[i64], counts: &mut [u64]) -> i64 {
        match expr {
            Compiled::Const(v) => *v,
            Compiled::Coord(d) => coords[*d],
            Compiled::Binary { op, ty, lhs, rhs } => {
                let l = self.eval(ctx, lhs, coords, counts);
                let r = self.eval(ctx, rhs, coords, counts);
                ty.wrap(op.apply(l, r))
            }
            Compiled::Cast { ty, value } => ty.wrap(self.eval(ctx, value, coords, counts)),
            Compiled::Load { source, args, .. } => {
                let mut at = [0i64; MAX_DIMENSIONS];
                for (a, arg) in at.iter_mut().zip(args) {
                    *a = self.eval(ctx, arg, coords, counts);
                }
                let at = &at[..args.len()];
                match *source {
                    Source::Input => self.input.read(at[0], at[1]).to_value(),
                    Source::Stage(s) => {
                        let stage = &self.plan.stages[s];
                        if stage.compute == Compute::Inline {
                            counts[s] += 1;
                            self.eval(ctx, &stage.value, at, counts)
                        } else {
                            ctx.buffer(s).get(at)
                        }
                    }
                }
            }
        }
    }

    /// Evaluate `expr` for a batch of lanes; `coords[d][lane]` is the coordinate of dimension `d`.
    pub(crate) fn eval_batch(
        &self,
        ctx: &Ctx,
        expr: &Compiled,
        coords: &[Vec<i64>],
        lanes: usize,
        counts: &mut [u64],
    ) -> Vec<i64> {
        match expr {
            Compiled::Const(v) => vec![*v; lanes],
            Compiled::Coord(d) => coords[*d].clone(),
            Compiled::Binary { op, ty, lhs, rhs } => {
                let mut l = self.eval_batch(ctx, lhs, coords, lanes, counts);
                let r = self.eval_batch(ctx, rhs, coords, lanes, counts);
                l.iter_mut()
                    .zip(r)
                    .for_each(|(a, b)| *a = ty.wrap(op.apply(*a, b)));
                l
            }
            Compiled::Cast { ty, value } => {
                let mut v = self.eval_batch(ctx, value, coords, lanes, counts);
                v.iter_mut().for_each(|a| *a = ty.wrap(*a));
                v
            }
            Compiled::Load { source, args, .. } => {
                let args: Vec<Vec<i64>> = args
                    .iter()
                    .map(|a| self.eval_batch(ctx, a, coords, lanes, counts))
                    .collect();
                match *source {
                    Source::Input => (0..lanes)
                        .map(|l| self.input.read(args[0][l], args[1][l]).to_value())
                        .collect(),
                    Source::Stage(s) => {
                        let stage = &self.plan.stages[s];
                        if stage.compute == Compute::Inline {
                            counts[s] += lanes as u64;
                            return self.eval_batch(ctx, &stage.value, &args, lanes, counts);
                        }
                        let buffer = ctx.buffer(s);
                        let mut at = [0i64; MAX_DIMENSIONS];
                        (0..lanes)
                            .map(|l| {
                                for (a, arg) in at.iter_mut().zip(&args) {
                                    *a = arg[l];
                                }
                                buffer.get(&at[..args.len()])
                            })
                            .collect()
                    }
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::Buffer;
    use crate::bounds::Interval;

    #[test]
    fn buffer_layout_is_first_dimension_fastest() {
        let mut buffer = Buffer::new(&[Interval::new(8, 17), Interval::new(4, 9)]);
        assert_eq!(buffer.data.len(), 60);
        assert_eq!(buffer.layout.offset(&[8, 4]), 0);
        assert_eq!(buffer.layout.offset(&[9, 4]), 1);
        assert_eq!(buffer.layout.offset(&[8, 5]), 10);
        assert_eq!(buffer.layout.offset(&[17, 9]), 59);

        let offset = buffer.layout.offset(&[10, 6]);
        buffer.data[offset] = 7;
        assert_eq!(buffer.get(&[10, 6]), 7);
    }

    #[test]
    fn zero_dimensional_buffer_has_one_value() {
        let buffer = Buffer::new(&[]);
        assert_eq!(buffer.data.len(), 1);
        assert_eq!(buffer.get(&[]), 0);
    }
}
