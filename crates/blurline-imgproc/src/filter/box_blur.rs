use std::str::FromStr;

use blurline_image::{Image, ImageError};
use blurline_pipeline::{
    Executor, Expr, InputParam, Pipeline, PipelineError, Plan, RealizeStats, ScalarType, Schedule,
    Var,
};

/// Name of the pipeline input.
pub const INPUT: &str = "input";

/// Name of the horizontal pass.
pub const BLUR_X: &str = "blur_x";

/// Name of the vertical pass, the pipeline output.
pub const BLUR_Y: &str = "blur_y";

/// Error returned when parsing an unknown [`BlurSchedule`] name.
#[derive(thiserror::Error, Debug, PartialEq)]
#[error("unknown schedule `{0}`, expected one of: reference, root, inline, tiled")]
pub struct UnknownSchedule(pub String);

/// Predefined schedules of the box blur.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum BlurSchedule {
    /// Output tiled 8x4 with parallel rows of tiles and 8-wide vectors; the
    /// horizontal pass recomputed per tile.
    #[default]
    Reference,
    /// Both passes materialized over their whole region, serial and scalar.
    Root,
    /// The horizontal pass evaluated at every use.
    Inline,
    /// Output tiled as in [`BlurSchedule::Reference`], horizontal pass materialized once.
    Tiled,
}

impl BlurSchedule {
    /// All presets.
    pub const ALL: [BlurSchedule; 4] = [
        BlurSchedule::Reference,
        BlurSchedule::Root,
        BlurSchedule::Inline,
        BlurSchedule::Tiled,
    ];

    /// Build the schedule.
    pub fn schedule(&self) -> Schedule {
        match self {
            BlurSchedule::Reference => reference_schedule(),
            BlurSchedule::Root => Schedule::new(),
            BlurSchedule::Inline => {
                let mut schedule = Schedule::new();
                schedule.stage(BLUR_X).compute_inline();
                schedule
            }
            BlurSchedule::Tiled => {
                let (x, y, xi, yi) = tile_vars();
                let mut schedule = Schedule::new();
                schedule
                    .stage(BLUR_Y)
                    .tile(&x, &y, &xi, &yi, 8, 4)
                    .parallel(&y)
                    .vectorize(&xi, 8);
                schedule.stage(BLUR_X).compute_root().vectorize(&x, 8);
                schedule
            }
        }
    }

    /// The preset name.
    pub fn name(&self) -> &'static str {
        match self {
            BlurSchedule::Reference => "reference",
            BlurSchedule::Root => "root",
            BlurSchedule::Inline => "inline",
            BlurSchedule::Tiled => "tiled",
        }
    }
}

impl FromStr for BlurSchedule {
    type Err = UnknownSchedule;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        BlurSchedule::ALL
            .into_iter()
            .find(|b| b.name() == s)
            .ok_or_else(|| UnknownSchedule(s.to_string()))
    }
}

fn tile_vars() -> (Var, Var, Var, Var) {
    (Var::new("x"), Var::new("y"), Var::new("xi"), Var::new("yi"))
}

/// Build the two-stage 3x3 box blur over a `uint8` input.
///
/// ```text
/// blur_x(x, y) = (u16(in(x, y)) + u16(in(x + 1, y)) + u16(in(x + 2, y))) / 3
/// blur_y(x, y) = u8((blur_x(x, y) + blur_x(x, y + 1) + blur_x(x, y + 2)) / 3)
/// ```
///
/// Reads outside the input repeat the nearest edge pixel.
pub fn box_blur_pipeline() -> Result<Pipeline, PipelineError> {
    let (x, y) = (Var::new("x"), Var::new("y"));
    let xy = [x.clone(), y.clone()];
    let three = || Expr::constant(3, ScalarType::U16);

    let mut pipeline = Pipeline::new(InputParam::new(INPUT, ScalarType::U8));

    let tap_x = |dx| {
        Expr::cast(
            ScalarType::U16,
            Expr::call(INPUT, vec![x.offset(dx), y.expr()]),
        )
    };
    let sum_x = Expr::add(Expr::add(tap_x(0), tap_x(1)), tap_x(2));
    pipeline.func(BLUR_X, &xy, Expr::div(sum_x, three()))?;

    let tap_y = |dy| Expr::call(BLUR_X, vec![x.expr(), y.offset(dy)]);
    let sum_y = Expr::add(Expr::add(tap_y(0), tap_y(1)), tap_y(2));
    pipeline.func(
        BLUR_Y,
        &xy,
        Expr::cast(ScalarType::U8, Expr::div(sum_y, three())),
    )?;

    pipeline.set_output(BLUR_Y)?;
    Ok(pipeline)
}

/// The reference schedule of the box blur.
///
/// The output is tiled 8x4, rows of tiles run in parallel and the inner
/// columns are vectorized 8-wide. The horizontal pass is computed inside each
/// tile, only over the rows that tile reads.
pub fn reference_schedule() -> Schedule {
    let (x, y, xi, yi) = tile_vars();
    let mut schedule = Schedule::new();
    schedule
        .stage(BLUR_Y)
        .tile(&x, &y, &xi, &yi, 8, 4)
        .parallel(&y)
        .vectorize(&xi, 8);
    schedule.stage(BLUR_X).compute_at(BLUR_Y, &x).vectorize(&x, 8);
    schedule
}

/// A box blur lowered once for a given schedule.
///
/// # Examples
///
/// ```
/// use blurline_image::{Image, ImageSize};
/// use blurline_imgproc::filter::{BlurSchedule, BoxBlur};
/// use blurline_pipeline::Executor;
///
/// let size = ImageSize { width: 4, height: 4 };
/// let src = Image::new(size, vec![100u8; 16]).unwrap();
/// let mut dst = Image::from_size_val(size, 0u8).unwrap();
///
/// let blur = BoxBlur::new(&BlurSchedule::Reference.schedule()).unwrap();
/// blur.apply(&Executor::default(), &src, &mut dst).unwrap();
/// assert!(dst.as_slice().iter().all(|&v| v == 100));
/// ```
#[derive(Debug, Clone)]
pub struct BoxBlur {
    plan: Plan,
}

impl BoxBlur {
    /// Build the pipeline and lower it with `schedule`.
    pub fn new(schedule: &Schedule) -> Result<Self, PipelineError> {
        let plan = schedule.lower(&box_blur_pipeline()?)?;
        Ok(Self { plan })
    }

    /// The lowered plan.
    pub fn plan(&self) -> &Plan {
        &self.plan
    }

    /// Blur `src` into `dst`, in the layout of `dst`.
    ///
    /// # Errors
    ///
    /// Fails if `dst` and `src` differ in size.
    pub fn apply(
        &self,
        executor: &Executor,
        src: &Image<u8>,
        dst: &mut Image<u8>,
    ) -> Result<RealizeStats, PipelineError> {
        check_sizes(src, dst)?;
        executor.realize_plan(&self.plan, src, dst)
    }
}

fn check_sizes(src: &Image<u8>, dst: &Image<u8>) -> Result<(), ImageError> {
    if src.size() != dst.size() {
        return Err(ImageError::InvalidImageSize(
            src.cols(),
            src.rows(),
            dst.cols(),
            dst.rows(),
        ));
    }
    Ok(())
}

/// Blur an image with the 3x3 box filter and the reference schedule.
///
/// # Arguments
///
/// * `src` - The source image.
/// * `dst` - The destination image, of the same size as `src`.
///
/// # Errors
///
/// Fails if the sizes differ or the worker pool cannot be created.
pub fn box_blur(src: &Image<u8>, dst: &mut Image<u8>) -> Result<(), PipelineError> {
    box_blur_with_schedule(src, dst, &reference_schedule(), &Executor::default())?;
    Ok(())
}

/// Blur an image with the 3x3 box filter under any schedule.
///
/// The result does not depend on the schedule.
pub fn box_blur_with_schedule(
    src: &Image<u8>,
    dst: &mut Image<u8>,
    schedule: &Schedule,
    executor: &Executor,
) -> Result<RealizeStats, PipelineError> {
    check_sizes(src, dst)?;
    let pipeline = box_blur_pipeline()?;
    log::debug!("box blur over {}", src.size());
    executor.realize_into(&pipeline, schedule, src, dst)
}
