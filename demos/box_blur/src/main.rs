use argh::FromArgs;

use blurline::image::{Image, ImageSize};
use blurline::imgproc::filter::{BlurSchedule, BoxBlur};
use blurline::pipeline::{Executor, ExecutorConfig, Parallelism};

#[derive(FromArgs)]
/// Blur a synthetic image with a scheduled 3x3 box filter
struct Args {
    /// width of the image
    #[argh(option, default = "640")]
    width: usize,

    /// height of the image
    #[argh(option, default = "480")]
    height: usize,

    /// one of reference, root, inline or tiled
    #[argh(option, short = 's', default = "BlurSchedule::Reference")]
    schedule: BlurSchedule,

    /// number of worker threads, 0 for the global pool
    #[argh(option, short = 't', default = "0")]
    threads: usize,

    /// record the region of every stage allocation
    #[argh(switch)]
    trace: bool,
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    env_logger::init();
    let args: Args = argh::from_env();

    let size = ImageSize {
        width: args.width,
        height: args.height,
    };

    // diagonal stripes
    let data = (0..size.width * size.height)
        .map(|i| {
            let (x, y) = (i % size.width, i / size.width);
            if (x + y) % 16 < 8 {
                255u8
            } else {
                0
            }
        })
        .collect();
    let src = Image::new(size, data)?;
    let mut dst = Image::from_size_val(size, 0u8)?;

    let parallelism = match args.threads {
        0 => Parallelism::Global,
        n => Parallelism::Fixed(n),
    };
    let executor = Executor::new(
        ExecutorConfig::default()
            .with_parallelism(parallelism)
            .with_trace(args.trace),
    );

    let blur = BoxBlur::new(&args.schedule.schedule())?;
    println!("{}", blur.plan());

    let start = std::time::Instant::now();
    let stats = blur.apply(&executor, &src, &mut dst)?;
    log::info!(
        "{} schedule on {} took {:?}",
        args.schedule.name(),
        size,
        start.elapsed()
    );

    for (stage, count) in &stats.evaluations {
        println!("{stage}: {count} evaluations");
    }
    if args.trace {
        for allocation in &stats.allocations {
            let region = allocation
                .region
                .iter()
                .map(|i| i.to_string())
                .collect::<Vec<_>>()
                .join(" x ");
            println!("allocate {} over {}", allocation.stage, region);
        }
    }

    Ok(())
}
