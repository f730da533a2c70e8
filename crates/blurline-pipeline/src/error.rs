use blurline_image::ImageError;

use crate::parallel::ParallelError;
use crate::schedule::ScheduleError;
use crate::types::ScalarType;

/// An error type for building, scheduling and realizing pipelines.
#[derive(thiserror::Error, Debug, PartialEq)]
pub enum PipelineError {
    /// A call site passes a different number of coordinates than the callee takes.
    #[error("`{callee}` takes {expected} coordinates but is called with {found}")]
    Arity {
        /// The called stage or input.
        callee: String,
        /// The callee's dimensionality.
        expected: usize,
        /// The number of arguments at the call site.
        found: usize,
    },

    /// Defining a stage would make the stage graph cyclic.
    #[error("defining `{stage}` would create a cycle through `{via}`")]
    Cycle {
        /// The stage being defined.
        stage: String,
        /// The callee that leads back to `stage`.
        via: String,
    },

    /// A name does not refer to a stage or to the input.
    #[error("unknown stage `{0}`")]
    UnknownStage(String),

    /// A stage with this name already exists.
    #[error("stage `{0}` is already declared")]
    DuplicateStage(String),

    /// A stage lists the same variable twice.
    #[error("stage `{stage}` lists variable `{var}` twice")]
    DuplicateVar {
        /// The stage.
        stage: String,
        /// The repeated variable.
        var: String,
    },

    /// A stage has more dimensions than the executor supports.
    #[error("stage `{stage}` has {arity} dimensions, at most {max} are supported")]
    TooManyDimensions {
        /// The stage.
        stage: String,
        /// Its dimensionality.
        arity: usize,
        /// The supported maximum.
        max: usize,
    },

    /// A stage already has a body.
    #[error("stage `{0}` is already defined")]
    AlreadyDefined(String),

    /// A stage needed for realization was declared but never defined.
    #[error("stage `{0}` is declared but not defined")]
    UndefinedStage(String),

    /// A body references a variable that is not one of the stage's dimensions.
    #[error("stage `{stage}` references unbound variable `{var}`")]
    UnboundVar {
        /// The stage.
        stage: String,
        /// The free variable.
        var: String,
    },

    /// Two types that must agree do not.
    #[error("type mismatch in {context}: expected {expected}, found {found}")]
    TypeMismatch {
        /// Where the mismatch was found.
        context: String,
        /// The required type.
        expected: ScalarType,
        /// The actual type.
        found: ScalarType,
    },

    /// No output stage was designated.
    #[error("the pipeline has no output stage")]
    MissingOutput,

    /// The output stage is not two-dimensional.
    #[error("output stage `{stage}` must be 2-D, it has {arity} dimensions")]
    OutputArity {
        /// The output stage.
        stage: String,
        /// Its dimensionality.
        arity: usize,
    },

    /// The coordinates a stage reads from a producer cannot be bounded.
    #[error("cannot bound the region of `{producer}` read by `{consumer}`")]
    UnboundedAccess {
        /// The reading stage.
        consumer: String,
        /// The stage being read.
        producer: String,
    },

    /// The bound input image has the wrong sample type.
    #[error("input `{name}` has type {expected}, bound image has type {found}")]
    InputType {
        /// The input parameter.
        name: String,
        /// The parameter type.
        expected: ScalarType,
        /// The image sample type.
        found: ScalarType,
    },

    /// The output image has the wrong sample type.
    #[error("output stage `{stage}` has type {expected}, output image has type {found}")]
    OutputType {
        /// The output stage.
        stage: String,
        /// The stage type.
        expected: ScalarType,
        /// The image sample type.
        found: ScalarType,
    },

    /// The schedule is inconsistent with the pipeline.
    #[error(transparent)]
    Schedule(#[from] ScheduleError),

    /// Buffer extents or strides are invalid.
    #[error(transparent)]
    Shape(#[from] ImageError),

    /// The worker pool could not be created.
    #[error(transparent)]
    Parallel(#[from] ParallelError),
}
