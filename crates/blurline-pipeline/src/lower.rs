//! Lowering of a pipeline and its schedule into an executable [`Plan`].

use std::collections::BTreeMap;
use std::fmt;

use crate::bounds::{self, Interval, Region};
use crate::error::PipelineError;
use crate::expr::{BinOp, Expr, Var};
use crate::loops::LoopNest;
use crate::pipeline::Pipeline;
use crate::schedule::{Placement, Schedule, ScheduleError};
use crate::stage::{InputParam, Stage};
use crate::types::ScalarType;

/// What a load reads from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Source {
    Input,
    Stage(usize),
}

/// An expression with variables and callees resolved to indices.
#[derive(Debug, Clone, PartialEq)]
pub(crate) enum Compiled {
    Const(i64),
    Coord(usize),
    Binary {
        op: BinOp,
        ty: ScalarType,
        lhs: Box<Compiled>,
        rhs: Box<Compiled>,
    },
    Cast {
        ty: ScalarType,
        value: Box<Compiled>,
    },
    Load {
        source: Source,
        ty: ScalarType,
        args: Vec<Compiled>,
    },
}

impl Compiled {
    /// Visit every load, outermost first.
    pub(crate) fn visit_loads<'a>(&'a self, f: &mut impl FnMut(Source, &'a [Compiled])) {
        match self {
            Compiled::Const(_) | Compiled::Coord(_) => {}
            Compiled::Binary { lhs, rhs, .. } => {
                lhs.visit_loads(f);
                rhs.visit_loads(f);
            }
            Compiled::Cast { value, .. } => value.visit_loads(f),
            Compiled::Load { source, args, .. } => {
                f(*source, args);
                args.iter().for_each(|a| a.visit_loads(f));
            }
        }
    }
}

/// Placement with names resolved to stage indices and loop levels.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Compute {
    Root,
    At { consumer: usize, level: usize },
    Inline,
}

#[derive(Debug, Clone)]
pub(crate) struct StagePlan {
    pub name: String,
    pub vars: Vec<Var>,
    pub ty: ScalarType,
    pub body: Expr,
    pub value: Compiled,
    pub nest: LoopNest,
    pub compute: Compute,
    /// stages computed inside each loop level, producers first
    pub hosted: Vec<Vec<usize>>,
}

/// A validated pipeline and schedule, ready to be realized any number of times.
///
/// Stages reachable from the output are stored producers first; the output
/// is the last one.
#[derive(Debug, Clone)]
pub struct Plan {
    pub(crate) input: InputParam,
    pub(crate) stages: Vec<StagePlan>,
}

impl Plan {
    /// The input parameter.
    pub fn input(&self) -> &InputParam {
        &self.input
    }

    pub(crate) fn output(&self) -> usize {
        self.stages.len() - 1
    }

    /// The output stage name.
    pub fn output_name(&self) -> &str {
        &self.stages[self.output()].name
    }

    /// The output value type.
    pub fn output_type(&self) -> ScalarType {
        self.stages[self.output()].ty
    }

    /// Names of the realized stages, producers first.
    pub fn stage_names(&self) -> Vec<&str> {
        self.stages.iter().map(|s| s.name.as_str()).collect()
    }

    pub(crate) fn index_of(&self, name: &str) -> Option<usize> {
        self.stages.iter().position(|s| s.name == name)
    }

    /// The resolved loops of a stage.
    pub fn loop_nest(&self, name: &str) -> Option<&LoopNest> {
        self.index_of(name).map(|i| &self.stages[i].nest)
    }

    /// The placement of a stage, with the loop named as in the consumer's nest.
    pub fn placement(&self, name: &str) -> Option<Placement> {
        let stage = &self.stages[self.index_of(name)?];
        Some(match stage.compute {
            Compute::Root => Placement::Root,
            Compute::Inline => Placement::Inline,
            Compute::At { consumer, level } => {
                let consumer = &self.stages[consumer];
                Placement::At {
                    consumer: consumer.name.clone(),
                    dim: consumer.nest.loop_names()[level].to_string(),
                }
            }
        })
    }

    /// Regions of every producer, and of the input, needed to compute
    /// `region` of stage `name`.
    ///
    /// The returned map holds `name` itself and only the producers it reads,
    /// directly or through other stages.
    ///
    /// # Errors
    ///
    /// Fails if `name` is not realized by the plan or `region` does not have
    /// one interval per dimension.
    pub fn required_regions(
        &self,
        name: &str,
        region: &[Interval],
    ) -> Result<BTreeMap<String, Region>, PipelineError> {
        let idx = self
            .index_of(name)
            .ok_or_else(|| PipelineError::UnknownStage(name.to_string()))?;
        let arity = self.stages[idx].vars.len();
        if region.len() != arity {
            return Err(PipelineError::Arity {
                callee: name.to_string(),
                expected: arity,
                found: region.len(),
            });
        }

        let reqs = bounds::required_regions(self, idx, region.to_vec())?;
        let mut regions: BTreeMap<String, Region> = reqs
            .stages
            .into_iter()
            .enumerate()
            .filter_map(|(i, r)| r.map(|r| (self.stages[i].name.clone(), r)))
            .collect();
        if let Some(input) = reqs.input {
            regions.insert(self.input.name().to_string(), input);
        }
        Ok(regions)
    }

    fn write_stage(&self, f: &mut fmt::Formatter, idx: usize, depth: usize) -> fmt::Result {
        let stage = &self.stages[idx];
        writeln!(f, "{:w$}produce {}:", "", stage.name, w = 2 * depth)?;
        let mut depth = depth + 1;
        for (level, (name, kind)) in stage
            .nest
            .loop_names()
            .into_iter()
            .zip(stage.nest.loop_kinds())
            .enumerate()
        {
            writeln!(f, "{:w$}{kind} {name}:", "", w = 2 * depth)?;
            depth += 1;
            for &hosted in &stage.hosted[level] {
                self.write_stage(f, hosted, depth)?;
            }
        }
        writeln!(
            f,
            "{:w$}{}({}) = {}",
            "",
            stage.name,
            join(&stage.vars),
            stage.body,
            w = 2 * depth
        )
    }
}

fn join(vars: &[Var]) -> String {
    vars.iter()
        .map(|v| v.name())
        .collect::<Vec<_>>()
        .join(", ")
}

impl fmt::Display for Plan {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        for (idx, stage) in self.stages.iter().enumerate() {
            match stage.compute {
                Compute::Inline => writeln!(
                    f,
                    "inline {}({}) = {}",
                    stage.name,
                    join(&stage.vars),
                    stage.body
                )?,
                Compute::Root => self.write_stage(f, idx, 0)?,
                Compute::At { .. } => {}
            }
        }
        Ok(())
    }
}

fn compile(
    pipeline: &Pipeline,
    remap: &BTreeMap<&str, usize>,
    stage: &Stage,
    expr: &Expr,
) -> Result<(Compiled, ScalarType), PipelineError> {
    Ok(match expr {
        Expr::Const { value, ty } => (Compiled::Const(*value), *ty),
        Expr::Var(v) => {
            let dim = stage.vars().iter().position(|s| s == v).ok_or_else(|| {
                PipelineError::UnboundVar {
                    stage: stage.name().to_string(),
                    var: v.name().to_string(),
                }
            })?;
            (Compiled::Coord(dim), ScalarType::I32)
        }
        Expr::Binary { op, lhs, rhs } => {
            let (lhs, ty) = compile(pipeline, remap, stage, lhs)?;
            let (rhs, _) = compile(pipeline, remap, stage, rhs)?;
            (
                Compiled::Binary {
                    op: *op,
                    ty,
                    lhs: Box::new(lhs),
                    rhs: Box::new(rhs),
                },
                ty,
            )
        }
        Expr::Cast { ty, value } => {
            let (value, _) = compile(pipeline, remap, stage, value)?;
            (
                Compiled::Cast {
                    ty: *ty,
                    value: Box::new(value),
                },
                *ty,
            )
        }
        Expr::Call { callee, args } => {
            let (source, ty) = if callee == pipeline.input().name() {
                (Source::Input, pipeline.input().ty())
            } else {
                let idx = remap
                    .get(callee.as_str())
                    .copied()
                    .ok_or_else(|| PipelineError::UnknownStage(callee.clone()))?;
                let ty = pipeline
                    .stage(callee)
                    .map(|s| s.ty())
                    .ok_or_else(|| PipelineError::UnknownStage(callee.clone()))?;
                (Source::Stage(idx), ty)
            };
            let args = args
                .iter()
                .map(|a| compile(pipeline, remap, stage, a).map(|(c, _)| c))
                .collect::<Result<Vec<_>, _>>()?;
            (Compiled::Load { source, ty, args }, ty)
        }
    })
}

/// Whether `stage`, computed inside loop `level` of `host`, is available to
/// everything evaluated as part of `reader`.
fn within(stages: &[StagePlan], consumers: &[Vec<usize>], reader: usize, host: usize, level: usize) -> bool {
    if reader == host {
        return true;
    }
    match stages[reader].compute {
        Compute::Root => false,
        Compute::At { consumer, level: at } if consumer == host => at >= level,
        Compute::At { consumer, .. } => within(stages, consumers, consumer, host, level),
        Compute::Inline => consumers[reader]
            .iter()
            .all(|&c| within(stages, consumers, c, host, level)),
    }
}

/// Validate `schedule` against `pipeline` and build the [`Plan`].
pub(crate) fn lower(pipeline: &Pipeline, schedule: &Schedule) -> Result<Plan, PipelineError> {
    let order = pipeline.topological_order()?;
    let source: Vec<&Stage> = order.iter().map(|&i| &pipeline.stages()[i]).collect();
    let remap: BTreeMap<&str, usize> = source
        .iter()
        .enumerate()
        .map(|(i, s)| (s.name(), i))
        .collect();

    for (name, _) in schedule.stages() {
        if pipeline.stage(name).is_none() {
            return Err(ScheduleError::UnknownStage(name.to_string()).into());
        }
        if !remap.contains_key(name) {
            log::debug!("stage `{name}` is scheduled but not needed by the output");
        }
    }

    let mut stages = Vec::with_capacity(source.len());
    for stage in &source {
        let directives = schedule
            .get(stage.name())
            .map(|s| s.directives.as_slice())
            .unwrap_or_default();
        // bodies were checked when defined and reachable stages are defined
        let body = stage
            .body()
            .cloned()
            .ok_or_else(|| PipelineError::UndefinedStage(stage.name().to_string()))?;
        let (value, _) = compile(pipeline, &remap, stage, &body)?;
        let nest = LoopNest::resolve(stage, directives)?;
        stages.push(StagePlan {
            name: stage.name().to_string(),
            vars: stage.vars().to_vec(),
            ty: stage.ty(),
            body,
            value,
            hosted: vec![Vec::new(); nest.depth()],
            nest,
            compute: Compute::Root,
        });
    }

    // direct consumers and transitive producers
    let n = stages.len();
    let mut consumers = vec![Vec::new(); n];
    let mut reads = vec![vec![false; n]; n];
    for c in 0..n {
        let mut direct = Vec::new();
        stages[c].value.visit_loads(&mut |source, _| {
            if let Source::Stage(p) = source {
                if !direct.contains(&p) {
                    direct.push(p);
                }
            }
        });
        for p in direct {
            consumers[p].push(c);
            reads[c][p] = true;
            let transitive = reads[p].clone();
            for (r, t) in reads[c].iter_mut().zip(transitive) {
                *r |= t;
            }
        }
    }

    let output = n - 1;
    for idx in 0..n {
        let name = stages[idx].name.clone();
        let placement = schedule
            .get(&name)
            .map(|s| s.placement.clone())
            .unwrap_or_default();
        let compute = match placement {
            Placement::Root => Compute::Root,
            _ if idx == output => return Err(ScheduleError::OutputPlacement(name).into()),
            Placement::Inline => {
                let scheduled = schedule.get(&name).is_some_and(|s| !s.directives.is_empty());
                if scheduled {
                    return Err(ScheduleError::InlineScheduled(name).into());
                }
                Compute::Inline
            }
            Placement::At { consumer, dim } => {
                let host = remap
                    .get(consumer.as_str())
                    .copied()
                    .filter(|&c| reads[c][idx])
                    .ok_or_else(|| ScheduleError::NotAConsumer {
                        stage: name.clone(),
                        consumer: consumer.clone(),
                    })?;
                let level = stages[host].nest.level_of(&dim).ok_or_else(|| {
                    ScheduleError::UnknownLoop {
                        stage: consumer.clone(),
                        dim: dim.clone(),
                    }
                })?;
                Compute::At {
                    consumer: host,
                    level,
                }
            }
        };
        stages[idx].compute = compute;
    }

    // placements refer to consumers, so check once all are known
    for idx in 0..n {
        let Compute::At { consumer, level } = stages[idx].compute else {
            continue;
        };
        let host = &stages[consumer];
        if host.compute == Compute::Inline {
            return Err(ScheduleError::InlineConsumer {
                stage: stages[idx].name.clone(),
                consumer: host.name.clone(),
            }
            .into());
        }
        if let Some(&other) = consumers[idx]
            .iter()
            .find(|&&c| !within(&stages, &consumers, c, consumer, level))
        {
            return Err(ScheduleError::ConsumerOutsideLoop {
                stage: stages[idx].name.clone(),
                consumer: host.name.clone(),
                dim: host.nest.loop_names()[level].to_string(),
                other: stages[other].name.clone(),
            }
            .into());
        }
        stages[consumer].hosted[level].push(idx);
    }

    let plan = Plan {
        input: pipeline.input().clone(),
        stages,
    };

    // every access must be boundable, whatever the output extent
    bounds::required_regions(&plan, output, vec![Interval::point(0); 2])?;

    log::debug!("lowered pipeline:\n{plan}");
    Ok(plan)
}
