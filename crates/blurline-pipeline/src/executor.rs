//! Realization of lowered plans over concrete images.

use std::collections::BTreeMap;

use blurline_image::{BoundaryBuffer, BoundaryPolicy, Image, ImageError, ImageSize};
use rayon::prelude::*;

use crate::bounds::{self, Interval, Region};
use crate::error::PipelineError;
use crate::eval::{Buffer, Ctx, Layout, Realizer, Scope};
use crate::loops::LoopKind;
use crate::lower::{Compute, Plan};
use crate::parallel::Parallelism;
use crate::pipeline::Pipeline;
use crate::schedule::Schedule;
use crate::stage::MAX_DIMENSIONS;
use crate::types::Pixel;

/// Options of an [`Executor`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct ExecutorConfig {
    /// Where loops marked parallel run.
    pub parallelism: Parallelism,
    /// Record every buffer allocation in [`RealizeStats::allocations`].
    pub trace: bool,
}

impl ExecutorConfig {
    /// Set the parallel strategy.
    pub fn with_parallelism(mut self, parallelism: Parallelism) -> Self {
        self.parallelism = parallelism;
        self
    }

    /// Enable or disable allocation tracing.
    pub fn with_trace(mut self, trace: bool) -> Self {
        self.trace = trace;
        self
    }
}

/// One stage buffer allocated during a realization.
#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct Allocation {
    /// The stage stored in the buffer.
    pub stage: String,
    /// The region the buffer covers.
    pub region: Region,
}

/// Counters collected by one realization.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct RealizeStats {
    /// Number of times each stage body was evaluated, by stage name.
    pub evaluations: BTreeMap<String, u64>,
    /// Buffer allocations in creation order, only filled when tracing.
    pub allocations: Vec<Allocation>,
}

impl RealizeStats {
    /// Evaluations of one stage, zero if it was never evaluated.
    pub fn evaluations_of(&self, stage: &str) -> u64 {
        self.evaluations.get(stage).copied().unwrap_or(0)
    }

    /// Traced allocations of one stage.
    pub fn allocations_of<'a>(&'a self, stage: &'a str) -> impl Iterator<Item = &'a Region> + 'a {
        self.allocations
            .iter()
            .filter(move |a| a.stage == stage)
            .map(|a| &a.region)
    }
}

#[derive(Debug, Default)]
pub(crate) struct Profile {
    evaluations: Vec<u64>,
    allocations: Vec<Allocation>,
}

impl Profile {
    fn new(stages: usize) -> Self {
        Self {
            evaluations: vec![0; stages],
            allocations: Vec::new(),
        }
    }

    fn merge(mut self, other: Profile) -> Self {
        self.absorb(other);
        self
    }

    fn absorb(&mut self, other: Profile) {
        for (a, b) in self.evaluations.iter_mut().zip(other.evaluations) {
            *a += b;
        }
        self.allocations.extend(other.allocations);
    }
}

/// Shared write access to a stage buffer whose loop iterations write disjoint offsets.
#[derive(Clone, Copy)]
struct Writer {
    ptr: *mut i64,
    len: usize,
    layout: Layout,
}

// SAFETY: `LoopNest::extent` clips the last iteration of every split and
// `LoopNest::in_domain` skips leaves outside the region, so the leaves of a
// loop nest partition the stage region. Every offset is written by exactly
// one iteration and nothing reads the buffer until all iterations are done.
unsafe impl Send for Writer {}
unsafe impl Sync for Writer {}

impl Writer {
    fn new(buffer: &mut Buffer) -> Self {
        Self {
            ptr: buffer.data.as_mut_ptr(),
            len: buffer.data.len(),
            layout: buffer.layout,
        }
    }

    #[inline]
    fn write(&self, coords: &[i64], value: i64) {
        let offset = self.layout.offset(coords);
        assert!(offset < self.len, "store outside of the stage buffer");
        // SAFETY: in bounds, and no other iteration writes this offset.
        unsafe { *self.ptr.add(offset) = value };
    }
}

/// Per-stage walk state that stays fixed across its loop nest.
struct Walk<'w> {
    stage: usize,
    mins: &'w [i64],
    extents: &'w [i64],
    out: Writer,
}

impl<T: Pixel> Realizer<'_, T> {
    fn run(&self, region: Region) -> Result<(Buffer, Profile), PipelineError> {
        let plan = self.plan;
        let output = plan.output();
        let reqs = bounds::required_regions(plan, output, region)?;

        let mut profile = Profile::new(plan.stages.len());
        let mut roots: Vec<Option<Buffer>> = (0..plan.stages.len()).map(|_| None).collect();
        for idx in 0..output {
            if plan.stages[idx].compute != Compute::Root {
                continue;
            }
            let Some(region) = &reqs.stages[idx] else {
                continue;
            };
            let ctx = Ctx {
                roots: &roots,
                scope: None,
            };
            let buffer = self.compute_stage(&ctx, idx, region, &mut profile)?;
            roots[idx] = Some(buffer);
        }

        let ctx = Ctx {
            roots: &roots,
            scope: None,
        };
        let region = reqs.stages[output].clone().unwrap_or_default();
        let buffer = self.compute_stage(&ctx, output, &region, &mut profile)?;
        Ok((buffer, profile))
    }

    /// Allocate a buffer for `region` of a stage and run its loop nest.
    fn compute_stage(
        &self,
        ctx: &Ctx,
        stage: usize,
        region: &[Interval],
        profile: &mut Profile,
    ) -> Result<Buffer, PipelineError> {
        let plan = &self.plan.stages[stage];
        log::trace!("allocating `{}` over {:?}", plan.name, region);
        if self.trace {
            profile.allocations.push(Allocation {
                stage: plan.name.clone(),
                region: region.to_vec(),
            });
        }

        let mins: Vec<i64> = region.iter().map(|iv| iv.min).collect();
        let extents: Vec<i64> = region.iter().map(|iv| iv.extent()).collect();
        let mut buffer = Buffer::new(region);
        let walk = Walk {
            stage,
            mins: &mins,
            extents: &extents,
            out: Writer::new(&mut buffer),
        };
        let mut values = vec![0i64; plan.nest.nodes.len()];
        self.run_level(ctx, &walk, 0, &mut values, profile)?;
        Ok(buffer)
    }

    fn run_level(
        &self,
        ctx: &Ctx,
        walk: &Walk,
        level: usize,
        values: &mut Vec<i64>,
        profile: &mut Profile,
    ) -> Result<(), PipelineError> {
        let stage = &self.plan.stages[walk.stage];
        let nest = &stage.nest;
        if level == nest.depth() {
            if nest.in_domain(walk.extents, values) {
                let mut coords = [0i64; MAX_DIMENSIONS];
                let coords = &mut coords[..walk.mins.len()];
                nest.coords(walk.mins, values, coords);
                let value = self.eval(ctx, &stage.value, coords, &mut profile.evaluations);
                walk.out.write(coords, value);
                profile.evaluations[walk.stage] += 1;
            }
            return Ok(());
        }

        let node = nest.order[level];
        let extent = nest.extent(node, level, walk.extents, values);
        match nest.kinds[level] {
            LoopKind::Vectorized(width) if stage.hosted[level].is_empty() => {
                self.run_vectorized(ctx, walk, node, extent, width, values, profile);
                Ok(())
            }
            LoopKind::Parallel if self.parallel && extent > 1 => {
                let stages = self.plan.stages.len();
                let merged = (0..extent)
                    .into_par_iter()
                    .map(|v| {
                        let mut values = values.clone();
                        values[node] = v;
                        let mut local = Profile::new(stages);
                        self.iteration(ctx, walk, level, &mut values, &mut local)
                            .map(|_| local)
                    })
                    .try_reduce(|| Profile::new(stages), |a, b| Ok(a.merge(b)))?;
                profile.absorb(merged);
                Ok(())
            }
            _ => {
                for v in 0..extent {
                    values[node] = v;
                    self.iteration(ctx, walk, level, values, profile)?;
                }
                Ok(())
            }
        }
    }

    /// Evaluate the innermost loop in batches of `width` lanes.
    #[allow(clippy::too_many_arguments)]
    fn run_vectorized(
        &self,
        ctx: &Ctx,
        walk: &Walk,
        node: usize,
        extent: i64,
        width: usize,
        values: &mut [i64],
        profile: &mut Profile,
    ) {
        let stage = &self.plan.stages[walk.stage];
        let nest = &stage.nest;
        let dims = walk.mins.len();
        let mut coords: Vec<Vec<i64>> = vec![Vec::with_capacity(width); dims];
        let mut at = [0i64; MAX_DIMENSIONS];

        let mut start = 0;
        while start < extent {
            let end = extent.min(start + width as i64);
            coords.iter_mut().for_each(|c| c.clear());
            for v in start..end {
                values[node] = v;
                if !nest.in_domain(walk.extents, values) {
                    continue;
                }
                nest.coords(walk.mins, values, &mut at[..dims]);
                for (c, &a) in coords.iter_mut().zip(&at[..dims]) {
                    c.push(a);
                }
            }

            let lanes = coords.first().map_or((end - start) as usize, |c| c.len());
            let results = self.eval_batch(ctx, &stage.value, &coords, lanes, &mut profile.evaluations);
            for (lane, value) in results.into_iter().enumerate() {
                for (a, c) in at.iter_mut().zip(&coords) {
                    *a = c[lane];
                }
                walk.out.write(&at[..dims], value);
            }
            profile.evaluations[walk.stage] += lanes as u64;
            start = end;
        }
    }

    /// One iteration of loop `level`: compute the stages hosted there, then the loops inside.
    fn iteration(
        &self,
        ctx: &Ctx,
        walk: &Walk,
        level: usize,
        values: &mut Vec<i64>,
        profile: &mut Profile,
    ) -> Result<(), PipelineError> {
        let stage = &self.plan.stages[walk.stage];
        let hosted = &stage.hosted[level];
        if hosted.is_empty() {
            return self.run_level(ctx, walk, level + 1, values, profile);
        }

        // the part of this stage the iteration computes
        let nest = &stage.nest;
        let region: Region = nest
            .pure
            .iter()
            .enumerate()
            .map(|(d, &node)| {
                let (lo, hi) = nest.relative_range(node, level + 1, walk.extents, values);
                Interval::new(walk.mins[d] + lo, walk.mins[d] + hi)
            })
            .collect();
        if region.iter().any(|iv| iv.extent() <= 0) {
            // every point under this iteration falls outside the stage region
            return Ok(());
        }
        let reqs = bounds::required_regions(self.plan, walk.stage, region)?;
        self.with_hosted(ctx, walk, level, hosted, &reqs.stages, values, profile)
    }

    #[allow(clippy::too_many_arguments)]
    fn with_hosted(
        &self,
        ctx: &Ctx,
        walk: &Walk,
        level: usize,
        hosted: &[usize],
        regions: &[Option<Region>],
        values: &mut Vec<i64>,
        profile: &mut Profile,
    ) -> Result<(), PipelineError> {
        let Some((&producer, rest)) = hosted.split_first() else {
            return self.run_level(ctx, walk, level + 1, values, profile);
        };
        let Some(region) = &regions[producer] else {
            return self.with_hosted(ctx, walk, level, rest, regions, values, profile);
        };

        let buffer = self.compute_stage(ctx, producer, region, profile)?;
        let scope = Scope {
            parent: ctx.scope,
            stage: producer,
            buffer: &buffer,
        };
        let inner = Ctx {
            roots: ctx.roots,
            scope: Some(&scope),
        };
        self.with_hosted(&inner, walk, level, rest, regions, values, profile)
    }
}

fn input_policy<T: Pixel>(policy: BoundaryPolicy<i64>) -> BoundaryPolicy<T> {
    match policy {
        BoundaryPolicy::RepeatEdge => BoundaryPolicy::RepeatEdge,
        BoundaryPolicy::Constant(v) => BoundaryPolicy::Constant(T::from_value(T::TYPE.wrap(v))),
        BoundaryPolicy::Reflect => BoundaryPolicy::Reflect,
        BoundaryPolicy::Wrap => BoundaryPolicy::Wrap,
    }
}

/// Runs pipelines under a schedule.
///
/// # Examples
///
/// ```
/// use blurline_image::{Image, ImageSize};
/// use blurline_pipeline::{Executor, Expr, InputParam, Pipeline, ScalarType, Schedule, Var};
///
/// let (x, y) = (Var::new("x"), Var::new("y"));
/// let mut pipeline = Pipeline::new(InputParam::new("input", ScalarType::U8));
/// pipeline
///     .func(
///         "shift",
///         &[x.clone(), y.clone()],
///         Expr::call("input", vec![x.offset(1), y.expr()]),
///     )
///     .unwrap();
/// pipeline.set_output("shift").unwrap();
///
/// let size = ImageSize { width: 3, height: 1 };
/// let input = Image::new(size, vec![1u8, 2, 3]).unwrap();
/// let output: Image<u8> = Executor::default()
///     .realize(&pipeline, &Schedule::new(), &input, 3, 1)
///     .unwrap();
/// assert_eq!(output.as_slice(), &[2, 3, 3]);
/// ```
#[derive(Debug, Clone, Default)]
pub struct Executor {
    config: ExecutorConfig,
}

impl Executor {
    /// Create an executor with the given options.
    pub fn new(config: ExecutorConfig) -> Self {
        Self { config }
    }

    /// The executor options.
    pub fn config(&self) -> &ExecutorConfig {
        &self.config
    }

    /// Realize the output of `pipeline` over `[0, width) x [0, height)`.
    ///
    /// The output uses the input layout when both have the same size and is
    /// x-fastest otherwise.
    ///
    /// # Errors
    ///
    /// Fails if the schedule is invalid, the extent is empty or the sample
    /// types do not match the pipeline.
    pub fn realize<T: Pixel, U: Pixel>(
        &self,
        pipeline: &Pipeline,
        schedule: &Schedule,
        input: &Image<T>,
        width: usize,
        height: usize,
    ) -> Result<Image<U>, PipelineError> {
        let size = ImageSize { width, height };
        if width == 0 || height == 0 {
            return Err(ImageError::EmptyImage(width, height).into());
        }
        let mut output = if input.size() == size {
            Image::from_layout_of(input, U::from_value(0))?
        } else {
            Image::from_size_val(size, U::from_value(0))?
        };
        self.realize_into(pipeline, schedule, input, &mut output)?;
        Ok(output)
    }

    /// Realize the output of `pipeline` into `output`, in its own layout.
    pub fn realize_into<T: Pixel, U: Pixel>(
        &self,
        pipeline: &Pipeline,
        schedule: &Schedule,
        input: &Image<T>,
        output: &mut Image<U>,
    ) -> Result<RealizeStats, PipelineError> {
        let plan = schedule.lower(pipeline)?;
        self.realize_plan(&plan, input, output)
    }

    /// Realize a lowered plan into `output`.
    ///
    /// `output` is only written when the realization succeeds.
    ///
    /// # Errors
    ///
    /// Fails on sample type mismatches or if the worker pool cannot be built.
    pub fn realize_plan<T: Pixel, U: Pixel>(
        &self,
        plan: &Plan,
        input: &Image<T>,
        output: &mut Image<U>,
    ) -> Result<RealizeStats, PipelineError> {
        if T::TYPE != plan.input().ty() {
            return Err(PipelineError::InputType {
                name: plan.input().name().to_string(),
                expected: plan.input().ty(),
                found: T::TYPE,
            });
        }
        if U::TYPE != plan.output_type() {
            return Err(PipelineError::OutputType {
                stage: plan.output_name().to_string(),
                expected: plan.output_type(),
                found: U::TYPE,
            });
        }

        let (width, height) = (output.width() as i64, output.height() as i64);
        log::debug!(
            "realizing `{}` over {}x{} with {:?}",
            plan.output_name(),
            width,
            height,
            self.config.parallelism
        );

        let region = vec![Interval::from_extent(0, width), Interval::from_extent(0, height)];
        let boundary = BoundaryBuffer::new(input, input_policy(plan.input().boundary()));
        let trace = self.config.trace;
        let (buffer, profile) = self.config.parallelism.install(|parallel| {
            Realizer {
                plan,
                input: boundary,
                parallel,
                trace,
            }
            .run(region)
        })??;

        for y in 0..output.height() {
            for x in 0..output.width() {
                let offset = output.offset(x, y);
                output.as_slice_mut()[offset] = U::from_value(buffer.get(&[x as i64, y as i64]));
            }
        }

        let stats = RealizeStats {
            evaluations: plan
                .stages
                .iter()
                .zip(profile.evaluations)
                .map(|(s, n)| (s.name.clone(), n))
                .collect(),
            allocations: profile.allocations,
        };
        log::debug!("realized `{}`: {:?}", plan.output_name(), stats.evaluations);
        Ok(stats)
    }
}
