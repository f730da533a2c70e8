#![deny(missing_docs)]
#![doc = env!("CARGO_PKG_DESCRIPTION")]

/// interval bounds inference.
pub mod bounds;

/// error types for the pipeline module.
pub mod error;

mod eval;

/// realization of lowered plans.
pub mod executor;

/// expression trees and dimension variables.
pub mod expr;

/// loop nests resolved from schedules.
pub mod loops;

/// lowering of pipelines and schedules into plans.
pub mod lower;

/// module containing parallelization utilities.
pub mod parallel;

/// stage graphs and their construction.
pub mod pipeline;

/// per-stage execution directives.
pub mod schedule;

/// stages and the pipeline input.
pub mod stage;

/// scalar value types and pixel conversions.
pub mod types;

pub use crate::bounds::{Interval, Region};
pub use crate::error::PipelineError;
pub use crate::executor::{Allocation, Executor, ExecutorConfig, RealizeStats};
pub use crate::expr::{BinOp, Expr, Var};
pub use crate::loops::{LoopKind, LoopNest};
pub use crate::lower::Plan;
pub use crate::parallel::{ParallelError, Parallelism};
pub use crate::pipeline::Pipeline;
pub use crate::schedule::{Directive, Placement, Schedule, ScheduleError, StageHandle, StageSchedule};
pub use crate::stage::{InputParam, Stage, INPUT_DIMENSIONS, MAX_DIMENSIONS};
pub use crate::types::{Pixel, ScalarType};
