use blurline_image::{BoundaryPolicy, Image, ImageSize};
use blurline_pipeline::{
    Executor, ExecutorConfig, Expr, InputParam, Parallelism, Pipeline, PipelineError, ScalarType,
    Schedule, ScheduleError, Var,
};

fn xy() -> (Var, Var) {
    (Var::new("x"), Var::new("y"))
}

fn ramp(width: usize, height: usize) -> Result<Image<i32>, PipelineError> {
    let data = (0..width * height).map(|i| (i as i32 * 7919) % 251 - 100).collect();
    Ok(Image::new(ImageSize { width, height }, data)?)
}

/// a(x, y) = 2 * in(x, y), b = a(x - 1, y) + a(x + 1, y), c = b(x, y - 1) - b(x, y + 1)
fn three_stages() -> Result<Pipeline, PipelineError> {
    let (x, y) = xy();
    let vars = [x.clone(), y.clone()];
    let mut p = Pipeline::new(InputParam::new("input", ScalarType::I32));
    p.func(
        "a",
        &vars,
        Expr::mul(Expr::int(2), Expr::call("input", vec![x.expr(), y.expr()])),
    )?;
    p.func(
        "b",
        &vars,
        Expr::add(
            Expr::call("a", vec![x.offset(-1), y.expr()]),
            Expr::call("a", vec![x.offset(1), y.expr()]),
        ),
    )?;
    p.func(
        "c",
        &vars,
        Expr::sub(
            Expr::call("b", vec![x.expr(), y.offset(-1)]),
            Expr::call("b", vec![x.expr(), y.offset(1)]),
        ),
    )?;
    p.set_output("c")?;
    Ok(p)
}

fn three_stages_naive(src: &Image<i32>) -> Vec<i32> {
    let (w, h) = (src.width() as i64, src.height() as i64);
    let input = |x: i64, y: i64| {
        let (x, y) = (x.clamp(0, w - 1) as usize, y.clamp(0, h - 1) as usize);
        src.get(x, y).copied().unwrap_or_default()
    };
    let a = |x, y| 2 * input(x, y);
    let b = |x, y| a(x - 1, y) + a(x + 1, y);
    let mut out = Vec::new();
    for y in 0..h {
        for x in 0..w {
            out.push(b(x, y - 1) - b(x, y + 1));
        }
    }
    out
}

#[test]
fn three_stage_schedules_agree() -> Result<(), PipelineError> {
    let _ = env_logger::builder().is_test(true).try_init();
    let (x, y) = xy();
    let (xi, yi) = (Var::new("xi"), Var::new("yi"));
    let p = three_stages()?;

    let mut schedules = vec![Schedule::new()];

    let mut nested = Schedule::new();
    nested
        .stage("c")
        .tile(&x, &y, &xi, &yi, 4, 3)
        .parallel(&y)
        .vectorize(&xi, 4);
    nested.stage("b").compute_at("c", &x).vectorize(&x, 2);
    nested.stage("a").compute_at("b", &y);
    schedules.push(nested);

    let mut shared = Schedule::new();
    shared.stage("c").tile(&x, &y, &xi, &yi, 5, 2).parallel(&y);
    shared.stage("b").compute_at("c", &x);
    shared.stage("a").compute_at("c", &y);
    schedules.push(shared);

    let mut inline = Schedule::new();
    inline.stage("c").parallel(&y).vectorize(&x, 8);
    inline.stage("b").compute_inline();
    inline.stage("a").compute_at("c", &y);
    schedules.push(inline);

    let mut all_inline = Schedule::new();
    all_inline.stage("a").compute_inline();
    all_inline.stage("b").compute_inline();
    schedules.push(all_inline);

    for (width, height) in [(13, 11), (8, 3), (1, 1)] {
        let src = ramp(width, height)?;
        let expected = three_stages_naive(&src);
        for (i, schedule) in schedules.iter().enumerate() {
            let out: Image<i32> = Executor::default().realize(&p, schedule, &src, width, height)?;
            assert_eq!(out.as_slice(), expected.as_slice(), "schedule {i}");
        }
    }
    Ok(())
}

#[test]
fn narrowing_wraps() -> Result<(), PipelineError> {
    let (x, y) = xy();
    let mut p = Pipeline::new(InputParam::new("input", ScalarType::U16));
    p.func(
        "narrow",
        &[x.clone(), y.clone()],
        Expr::cast(ScalarType::U8, Expr::call("input", vec![x.expr(), y.expr()])),
    )?;
    p.set_output("narrow")?;

    let src = Image::new(ImageSize { width: 4, height: 1 }, vec![300u16, 255, 256, 65535])?;
    let out: Image<u8> = Executor::default().realize(&p, &Schedule::new(), &src, 4, 1)?;
    assert_eq!(out.as_slice(), &[44, 255, 0, 255]);
    Ok(())
}

#[test]
fn signed_division_truncates() -> Result<(), PipelineError> {
    let (x, y) = xy();
    let vars = [x.clone(), y.clone()];
    let mut p = Pipeline::new(InputParam::new("input", ScalarType::I16));
    let shifted = || {
        Expr::sub(
            Expr::call("input", vec![x.expr(), y.expr()]),
            Expr::constant(7, ScalarType::I16),
        )
    };
    p.func("half", &vars, Expr::div(shifted(), Expr::constant(2, ScalarType::I16)))?;
    p.func(
        "out",
        &vars,
        Expr::add(
            Expr::mul(
                Expr::call("half", vec![x.expr(), y.expr()]),
                Expr::constant(10, ScalarType::I16),
            ),
            Expr::rem(shifted(), Expr::constant(2, ScalarType::I16)),
        ),
    )?;
    p.set_output("out")?;

    let src = Image::new(ImageSize { width: 3, height: 1 }, vec![0i16, 7, 10])?;
    let out: Image<i16> = Executor::default().realize(&p, &Schedule::new(), &src, 3, 1)?;
    // -7 / 2 = -3 rem -1, 0 / 2 = 0 rem 0, 3 / 2 = 1 rem 1
    assert_eq!(out.as_slice(), &[-31, 0, 11]);
    Ok(())
}

#[test]
fn boundary_policies() -> Result<(), PipelineError> {
    let (x, y) = xy();
    let src = Image::new(ImageSize { width: 3, height: 1 }, vec![1u8, 2, 3])?;

    let shifted = |policy: BoundaryPolicy<i64>| -> Result<Vec<u8>, PipelineError> {
        let mut p = Pipeline::new(InputParam::new("input", ScalarType::U8).with_boundary(policy));
        p.func(
            "f",
            &[x.clone(), y.clone()],
            Expr::call("input", vec![x.offset(-3), y.expr()]),
        )?;
        p.set_output("f")?;
        let out: Image<u8> = Executor::default().realize(&p, &Schedule::new(), &src, 6, 1)?;
        Ok(out.into_vec())
    };

    assert_eq!(shifted(BoundaryPolicy::RepeatEdge)?, vec![1, 1, 1, 1, 2, 3]);
    assert_eq!(shifted(BoundaryPolicy::Constant(7))?, vec![7, 7, 7, 1, 2, 3]);
    assert_eq!(shifted(BoundaryPolicy::Reflect)?, vec![3, 2, 1, 1, 2, 3]);
    assert_eq!(shifted(BoundaryPolicy::Wrap)?, vec![1, 2, 3, 1, 2, 3]);
    Ok(())
}

#[test]
fn stages_of_other_dimensions() -> Result<(), PipelineError> {
    let (x, y) = xy();
    let (z, w) = (Var::new("z"), Var::new("w"));
    let mut p = Pipeline::new(InputParam::new("input", ScalarType::I32));
    p.func("k", &[], Expr::int(5))?;
    p.func(
        "column",
        &[x.clone()],
        Expr::add(
            Expr::call("input", vec![x.expr(), Expr::int(0)]),
            Expr::call("input", vec![x.expr(), Expr::int(1)]),
        ),
    )?;
    p.func(
        "volume",
        &[x.clone(), y.clone(), z.clone(), w.clone()],
        Expr::add(Expr::mul(z.expr(), Expr::int(100)), Expr::add(x.expr(), w.expr())),
    )?;
    p.func(
        "out",
        &[x.clone(), y.clone()],
        Expr::add(
            Expr::add(
                Expr::mul(Expr::call("column", vec![x.expr()]), y.expr()),
                Expr::call("k", vec![]),
            ),
            Expr::call(
                "volume",
                vec![x.expr(), y.expr(), Expr::int(2), Expr::int(1)],
            ),
        ),
    )?;
    p.set_output("out")?;

    let src = Image::new(ImageSize { width: 2, height: 2 }, vec![1, 2, 3, 4])?;
    let expected = |x: i32, y: i32| {
        let column = [1 + 3, 2 + 4][x as usize];
        column * y + 5 + 200 + x + 1
    };

    let mut per_column = Schedule::new();
    per_column.stage("column").compute_at("out", &x);
    per_column.stage("volume").compute_inline();
    for schedule in [Schedule::new(), per_column] {
        let out: Image<i32> = Executor::default().realize(&p, &schedule, &src, 2, 3)?;
        for y in 0..3 {
            for x in 0..2 {
                assert_eq!(out.get(x, y), Some(&expected(x as i32, y as i32)));
            }
        }
    }
    Ok(())
}

#[test]
fn schedule_errors_surface_on_realize() -> Result<(), PipelineError> {
    let (x, _) = xy();
    let p = three_stages()?;
    let src = ramp(4, 4)?;

    let mut s = Schedule::new();
    s.stage("c").vectorize(&x, 0);
    let res: Result<Image<i32>, _> = Executor::default().realize(&p, &s, &src, 4, 4);
    assert!(matches!(
        res,
        Err(PipelineError::Schedule(ScheduleError::InvalidVectorWidth { .. }))
    ));

    let executor = Executor::new(
        ExecutorConfig::default()
            .with_parallelism(Parallelism::Serial)
            .with_trace(true),
    );
    let mut out = Image::from_size_val(src.size(), 0i32)?;
    let stats = executor.realize_into(&p, &Schedule::new(), &src, &mut out)?;
    assert_eq!(
        stats.allocations.iter().map(|a| a.stage.as_str()).collect::<Vec<_>>(),
        vec!["a", "b", "c"]
    );
    Ok(())
}

#[cfg(feature = "serde")]
#[test]
fn schedules_serialize() -> Result<(), Box<dyn std::error::Error>> {
    let (x, y) = xy();
    let (xi, yi) = (Var::new("xi"), Var::new("yi"));
    let mut schedule = Schedule::new();
    schedule
        .stage("c")
        .tile(&x, &y, &xi, &yi, 8, 4)
        .parallel(&y);
    schedule.stage("b").compute_at("c", &x);

    let json = serde_json::to_string(&schedule)?;
    let back: Schedule = serde_json::from_str(&json)?;
    assert_eq!(back, schedule);

    let config = ExecutorConfig::default().with_parallelism(Parallelism::Fixed(2));
    let back: ExecutorConfig = serde_json::from_str(&serde_json::to_string(&config)?)?;
    assert_eq!(back, config);
    Ok(())
}
