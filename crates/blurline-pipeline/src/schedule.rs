use std::collections::BTreeMap;

use crate::error::PipelineError;
use crate::expr::Var;
use crate::lower::Plan;
use crate::pipeline::Pipeline;

/// Errors raised when a schedule is attached to a pipeline.
#[derive(thiserror::Error, Debug, PartialEq)]
pub enum ScheduleError {
    /// The schedule names a stage the pipeline does not have.
    #[error("schedule refers to unknown stage `{0}`")]
    UnknownStage(String),

    /// A directive names a loop the stage does not have at that point.
    #[error("stage `{stage}` has no loop `{dim}`")]
    UnknownLoop {
        /// The scheduled stage.
        stage: String,
        /// The missing loop.
        dim: String,
    },

    /// A split would introduce a loop name that is already taken.
    #[error("loop name `{dim}` is already used in stage `{stage}`")]
    DuplicateLoop {
        /// The scheduled stage.
        stage: String,
        /// The reused name.
        dim: String,
    },

    /// Split and tile factors must be positive.
    #[error("split factor of `{dim}` in stage `{stage}` must be positive, got {factor}")]
    InvalidFactor {
        /// The scheduled stage.
        stage: String,
        /// The split loop.
        dim: String,
        /// The rejected factor.
        factor: usize,
    },

    /// Vector widths must be positive.
    #[error("vector width of `{dim}` in stage `{stage}` must be positive, got {width}")]
    InvalidVectorWidth {
        /// The scheduled stage.
        stage: String,
        /// The vectorized loop.
        dim: String,
        /// The rejected width.
        width: usize,
    },

    /// Tiling needs two distinct dimensions.
    #[error("cannot tile `{dim}` against itself in stage `{stage}`")]
    SameDimensions {
        /// The scheduled stage.
        stage: String,
        /// The repeated dimension.
        dim: String,
    },

    /// A reorder lists a loop twice.
    #[error("reorder of stage `{stage}` lists `{dim}` more than once")]
    InvalidReorder {
        /// The scheduled stage.
        stage: String,
        /// The repeated loop.
        dim: String,
    },

    /// A loop was marked parallel or vectorized and then split away.
    #[error("loop `{dim}` of stage `{stage}` was split after being marked")]
    MarkedLoopSplit {
        /// The scheduled stage.
        stage: String,
        /// The marked loop.
        dim: String,
    },

    /// Only the innermost loop can be vectorized.
    #[error("vectorized loop `{dim}` of stage `{stage}` is not the innermost loop")]
    NotInnermost {
        /// The scheduled stage.
        stage: String,
        /// The vectorized loop.
        dim: String,
    },

    /// The output stage can only be computed at the root.
    #[error("output stage `{0}` must be computed at the root")]
    OutputPlacement(String),

    /// Inline stages have no loops to schedule.
    #[error("stage `{0}` is computed inline and cannot have loop directives")]
    InlineScheduled(String),

    /// `compute_at` target does not consume the stage.
    #[error("`{consumer}` does not consume `{stage}`")]
    NotAConsumer {
        /// The scheduled stage.
        stage: String,
        /// The requested consumer.
        consumer: String,
    },

    /// `compute_at` targets an inline stage, which has no loops.
    #[error("cannot compute `{stage}` at inline stage `{consumer}`")]
    InlineConsumer {
        /// The scheduled stage.
        stage: String,
        /// The inline consumer.
        consumer: String,
    },

    /// Another consumer of the stage runs outside the chosen loop.
    #[error("`{stage}` computed at `{consumer}.{dim}` is also read by `{other}` outside that loop")]
    ConsumerOutsideLoop {
        /// The scheduled stage.
        stage: String,
        /// The requested consumer.
        consumer: String,
        /// The requested loop.
        dim: String,
        /// The consumer outside the loop.
        other: String,
    },
}

/// A loop transformation recorded on a stage.
#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum Directive {
    /// Split `dim` into `outer * factor + inner`, `inner` in `[0, factor)`.
    Split {
        /// The split loop.
        dim: String,
        /// The new outer loop.
        outer: String,
        /// The new inner loop.
        inner: String,
        /// The inner extent.
        factor: usize,
    },
    /// Split `x` and `y` and order the loops `y, x, yi, xi` (outermost first).
    Tile {
        /// First dimension; keeps its name as the outer loop.
        x: String,
        /// Second dimension; keeps its name as the outer loop.
        y: String,
        /// Inner loop over `x`.
        xi: String,
        /// Inner loop over `y`.
        yi: String,
        /// Tile width.
        x_factor: usize,
        /// Tile height.
        y_factor: usize,
    },
    /// Reorder loops; the list is innermost first.
    Reorder(Vec<String>),
    /// Run the iterations of a loop on the worker pool.
    Parallel(String),
    /// Evaluate the innermost loop in batches of `width` lanes.
    Vectorize {
        /// The vectorized loop.
        dim: String,
        /// Lanes per batch.
        width: usize,
    },
}

/// Where a stage's values are computed relative to its consumers.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum Placement {
    /// Materialized once over its whole required region before its consumers run.
    #[default]
    Root,
    /// Recomputed inside every iteration of `consumer`'s loop `dim`.
    At {
        /// The consuming stage.
        consumer: String,
        /// The loop of the consumer.
        dim: String,
    },
    /// Evaluated at every use, without storage.
    Inline,
}

/// The directives and placement of one stage.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct StageSchedule {
    /// Loop directives in the order they were given.
    pub directives: Vec<Directive>,
    /// The compute placement.
    pub placement: Placement,
}

/// Execution directives for the stages of a pipeline.
///
/// Directives are only recorded here; they are checked against the
/// pipeline by [`Schedule::lower`].
///
/// # Examples
///
/// ```
/// use blurline_pipeline::{Placement, Schedule, Var};
///
/// let (x, y, xi, yi) = (Var::new("x"), Var::new("y"), Var::new("xi"), Var::new("yi"));
/// let mut schedule = Schedule::new();
/// schedule
///     .stage("blur_y")
///     .tile(&x, &y, &xi, &yi, 8, 4)
///     .parallel(&y)
///     .vectorize(&xi, 8);
/// schedule.stage("blur_x").compute_at("blur_y", &x).vectorize(&x, 8);
///
/// assert_eq!(
///     schedule.get("blur_x").map(|s| &s.placement),
///     Some(&Placement::At { consumer: "blur_y".into(), dim: "x".into() })
/// );
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Default)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct Schedule {
    stages: BTreeMap<String, StageSchedule>,
}

impl Schedule {
    /// An empty schedule: every stage at the root, serial, unvectorized.
    pub fn new() -> Self {
        Self::default()
    }

    /// Directives for `name`, created on first use.
    pub fn stage(&mut self, name: &str) -> StageHandle<'_> {
        StageHandle {
            schedule: self.stages.entry(name.to_string()).or_default(),
        }
    }

    /// The recorded directives of a stage.
    pub fn get(&self, name: &str) -> Option<&StageSchedule> {
        self.stages.get(name)
    }

    /// All scheduled stages, by name.
    pub fn stages(&self) -> impl Iterator<Item = (&str, &StageSchedule)> {
        self.stages.iter().map(|(k, v)| (k.as_str(), v))
    }

    /// Validate the schedule against `pipeline` and lower both to a [`Plan`].
    pub fn lower(&self, pipeline: &Pipeline) -> Result<Plan, PipelineError> {
        crate::lower::lower(pipeline, self)
    }
}

/// Chaining handle over the directives of one stage.
pub struct StageHandle<'a> {
    schedule: &'a mut StageSchedule,
}

impl StageHandle<'_> {
    fn push(&mut self, directive: Directive) -> &mut Self {
        self.schedule.directives.push(directive);
        self
    }

    /// Split loop `dim` into `outer` and `inner` with `inner` in `[0, factor)`.
    pub fn split(&mut self, dim: &Var, outer: &Var, inner: &Var, factor: usize) -> &mut Self {
        self.push(Directive::Split {
            dim: dim.name().to_string(),
            outer: outer.name().to_string(),
            inner: inner.name().to_string(),
            factor,
        })
    }

    /// Tile `x` and `y` by `x_factor` by `y_factor`.
    ///
    /// The outer loops keep the names `x` and `y`; the loop order becomes
    /// `y, x, yi, xi` from outermost to innermost.
    pub fn tile(
        &mut self,
        x: &Var,
        y: &Var,
        xi: &Var,
        yi: &Var,
        x_factor: usize,
        y_factor: usize,
    ) -> &mut Self {
        self.push(Directive::Tile {
            x: x.name().to_string(),
            y: y.name().to_string(),
            xi: xi.name().to_string(),
            yi: yi.name().to_string(),
            x_factor,
            y_factor,
        })
    }

    /// Reorder loops, innermost first.
    pub fn reorder(&mut self, dims: &[&Var]) -> &mut Self {
        self.push(Directive::Reorder(
            dims.iter().map(|d| d.name().to_string()).collect(),
        ))
    }

    /// Mark loop `dim` parallel.
    pub fn parallel(&mut self, dim: &Var) -> &mut Self {
        self.push(Directive::Parallel(dim.name().to_string()))
    }

    /// Vectorize loop `dim` with `width` lanes.
    pub fn vectorize(&mut self, dim: &Var, width: usize) -> &mut Self {
        self.push(Directive::Vectorize {
            dim: dim.name().to_string(),
            width,
        })
    }

    /// Compute this stage inside every iteration of `consumer`'s loop `dim`.
    pub fn compute_at(&mut self, consumer: &str, dim: &Var) -> &mut Self {
        self.schedule.placement = Placement::At {
            consumer: consumer.to_string(),
            dim: dim.name().to_string(),
        };
        self
    }

    /// Materialize this stage once before its consumers.
    pub fn compute_root(&mut self) -> &mut Self {
        self.schedule.placement = Placement::Root;
        self
    }

    /// Evaluate this stage at every use.
    pub fn compute_inline(&mut self) -> &mut Self {
        self.schedule.placement = Placement::Inline;
        self
    }
}
