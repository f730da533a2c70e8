use std::collections::HashMap;

use crate::error::PipelineError;
use crate::expr::{Expr, Var};
use crate::stage::{InputParam, Stage, MAX_DIMENSIONS};
use crate::types::ScalarType;

/// An acyclic graph of stages reading one 2-D input.
///
/// Stages are declared with a name, dimension variables and a value type,
/// then defined with a body. Edges are implicit in the bodies' calls.
///
/// # Examples
///
/// ```
/// use blurline_pipeline::{Expr, InputParam, Pipeline, ScalarType, Var};
///
/// let (x, y) = (Var::new("x"), Var::new("y"));
/// let mut pipeline = Pipeline::new(InputParam::new("input", ScalarType::U8));
/// pipeline
///     .func("copy", &[x.clone(), y.clone()], Expr::call("input", vec![x.expr(), y.expr()]))
///     .unwrap();
/// pipeline.set_output("copy").unwrap();
/// assert_eq!(pipeline.topological_order().unwrap(), vec![0]);
/// ```
#[derive(Debug, Clone)]
pub struct Pipeline {
    input: InputParam,
    stages: Vec<Stage>,
    index: HashMap<String, usize>,
    output: Option<usize>,
}

impl Pipeline {
    /// Create an empty pipeline over the given input.
    pub fn new(input: InputParam) -> Self {
        Self {
            input,
            stages: Vec::new(),
            index: HashMap::new(),
            output: None,
        }
    }

    /// The pipeline input.
    pub fn input(&self) -> &InputParam {
        &self.input
    }

    /// All stages in declaration order.
    pub fn stages(&self) -> &[Stage] {
        &self.stages
    }

    /// Look up a stage by name.
    pub fn stage(&self, name: &str) -> Option<&Stage> {
        self.index.get(name).map(|&i| &self.stages[i])
    }

    /// Index of a stage in [`Pipeline::stages`].
    pub fn stage_index(&self, name: &str) -> Option<usize> {
        self.index.get(name).copied()
    }

    /// The designated output stage.
    pub fn output(&self) -> Option<&Stage> {
        self.output.map(|i| &self.stages[i])
    }

    /// Reserve a stage name with its dimensions and value type.
    ///
    /// Declared stages can be called by other bodies before they are defined.
    pub fn declare(&mut self, name: &str, vars: &[Var], ty: ScalarType) -> Result<(), PipelineError> {
        if self.index.contains_key(name) || name == self.input.name() {
            return Err(PipelineError::DuplicateStage(name.to_string()));
        }
        if vars.len() > MAX_DIMENSIONS {
            return Err(PipelineError::TooManyDimensions {
                stage: name.to_string(),
                arity: vars.len(),
                max: MAX_DIMENSIONS,
            });
        }
        for (i, var) in vars.iter().enumerate() {
            if vars[..i].contains(var) {
                return Err(PipelineError::DuplicateVar {
                    stage: name.to_string(),
                    var: var.name().to_string(),
                });
            }
        }

        self.index.insert(name.to_string(), self.stages.len());
        self.stages.push(Stage {
            name: name.to_string(),
            vars: vars.to_vec(),
            ty,
            body: None,
        });
        Ok(())
    }

    /// Give a declared stage its body.
    ///
    /// # Errors
    ///
    /// Fails if the stage is unknown or already defined, if the body is ill
    /// typed, calls something with the wrong number of coordinates, uses a
    /// free variable, or if the new edges would close a cycle.
    pub fn define(&mut self, name: &str, body: Expr) -> Result<(), PipelineError> {
        let idx = self
            .stage_index(name)
            .ok_or_else(|| PipelineError::UnknownStage(name.to_string()))?;
        let stage = &self.stages[idx];
        if stage.body.is_some() {
            return Err(PipelineError::AlreadyDefined(name.to_string()));
        }

        let found = self.type_of(name, &stage.vars, &body)?;
        if found != stage.ty {
            return Err(PipelineError::TypeMismatch {
                context: format!("body of `{name}`"),
                expected: stage.ty,
                found,
            });
        }

        for callee in body.callees() {
            if self.reaches(callee, name) {
                return Err(PipelineError::Cycle {
                    stage: name.to_string(),
                    via: callee.to_string(),
                });
            }
        }

        self.stages[idx].body = Some(body);
        Ok(())
    }

    /// Declare and define a stage in one step; the type is the body's type.
    pub fn func(&mut self, name: &str, vars: &[Var], body: Expr) -> Result<(), PipelineError> {
        if body.callees().contains(&name) {
            return Err(PipelineError::Cycle {
                stage: name.to_string(),
                via: name.to_string(),
            });
        }
        let ty = self.type_of(name, vars, &body)?;
        self.declare(name, vars, ty)?;
        self.define(name, body)
    }

    /// Designate the output stage; it must be 2-D.
    pub fn set_output(&mut self, name: &str) -> Result<(), PipelineError> {
        let idx = self
            .stage_index(name)
            .ok_or_else(|| PipelineError::UnknownStage(name.to_string()))?;
        let arity = self.stages[idx].arity();
        if arity != 2 {
            return Err(PipelineError::OutputArity {
                stage: name.to_string(),
                arity,
            });
        }
        self.output = Some(idx);
        Ok(())
    }

    /// Stages reachable from the output, producers before consumers.
    ///
    /// # Errors
    ///
    /// Fails without an output or when a reachable stage has no body.
    pub fn topological_order(&self) -> Result<Vec<usize>, PipelineError> {
        let output = self.output.ok_or(PipelineError::MissingOutput)?;

        let mut order = Vec::new();
        let mut visited = vec![false; self.stages.len()];
        // iterative post-order: (stage, children already pushed)
        let mut stack = vec![(output, false)];
        while let Some((idx, expanded)) = stack.pop() {
            if expanded {
                order.push(idx);
                continue;
            }
            if visited[idx] {
                continue;
            }
            visited[idx] = true;
            stack.push((idx, true));

            let stage = &self.stages[idx];
            let body = stage
                .body
                .as_ref()
                .ok_or_else(|| PipelineError::UndefinedStage(stage.name.clone()))?;
            for callee in body.callees().into_iter().rev() {
                if let Some(c) = self.stage_index(callee) {
                    if !visited[c] {
                        stack.push((c, false));
                    }
                }
            }
        }
        Ok(order)
    }

    /// Whether `target` is reachable from `from` through defined bodies.
    fn reaches(&self, from: &str, target: &str) -> bool {
        let mut stack = vec![from];
        let mut seen = Vec::new();
        while let Some(name) = stack.pop() {
            if name == target {
                return true;
            }
            if seen.contains(&name) {
                continue;
            }
            seen.push(name);
            if let Some(body) = self.stage(name).and_then(|s| s.body.as_ref()) {
                stack.extend(body.callees());
            }
        }
        false
    }

    fn type_of(&self, stage: &str, vars: &[Var], expr: &Expr) -> Result<ScalarType, PipelineError> {
        match expr {
            Expr::Const { ty, .. } => Ok(*ty),
            Expr::Var(v) => {
                if vars.contains(v) {
                    Ok(ScalarType::I32)
                } else {
                    Err(PipelineError::UnboundVar {
                        stage: stage.to_string(),
                        var: v.name().to_string(),
                    })
                }
            }
            Expr::Binary { op, lhs, rhs } => {
                let l = self.type_of(stage, vars, lhs)?;
                let r = self.type_of(stage, vars, rhs)?;
                if l != r {
                    return Err(PipelineError::TypeMismatch {
                        context: format!("{op:?} in `{stage}`"),
                        expected: l,
                        found: r,
                    });
                }
                Ok(l)
            }
            Expr::Cast { ty, value } => {
                self.type_of(stage, vars, value)?;
                Ok(*ty)
            }
            Expr::Call { callee, args } => {
                let (arity, ty) = if callee == self.input.name() {
                    (self.input.dimensions(), self.input.ty())
                } else {
                    let callee_stage = self
                        .stage(callee)
                        .ok_or_else(|| PipelineError::UnknownStage(callee.clone()))?;
                    (callee_stage.arity(), callee_stage.ty)
                };
                if args.len() != arity {
                    return Err(PipelineError::Arity {
                        callee: callee.clone(),
                        expected: arity,
                        found: args.len(),
                    });
                }
                for arg in args {
                    let arg_ty = self.type_of(stage, vars, arg)?;
                    if arg_ty != ScalarType::I32 {
                        return Err(PipelineError::TypeMismatch {
                            context: format!("coordinate of `{callee}` in `{stage}`"),
                            expected: ScalarType::I32,
                            found: arg_ty,
                        });
                    }
                }
                Ok(ty)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::Pipeline;
    use crate::error::PipelineError;
    use crate::expr::{Expr, Var};
    use crate::stage::InputParam;
    use crate::types::ScalarType;

    fn xy() -> (Var, Var) {
        (Var::new("x"), Var::new("y"))
    }

    fn pipeline() -> Pipeline {
        Pipeline::new(InputParam::new("input", ScalarType::U8))
    }

    #[test]
    fn define_and_order() -> Result<(), PipelineError> {
        let (x, y) = xy();
        let vars = [x.clone(), y.clone()];
        let mut p = pipeline();
        p.func(
            "a",
            &vars,
            Expr::cast(ScalarType::U16, Expr::call("input", vec![x.expr(), y.expr()])),
        )?;
        p.func("b", &vars, Expr::call("a", vec![x.offset(1), y.expr()]))?;
        p.func(
            "c",
            &vars,
            Expr::add(
                Expr::call("a", vec![x.expr(), y.expr()]),
                Expr::call("b", vec![x.expr(), y.offset(1)]),
            ),
        )?;
        p.set_output("c")?;

        assert_eq!(p.stage("c").map(|s| s.ty()), Some(ScalarType::U16));
        assert_eq!(p.topological_order()?, vec![0, 1, 2]);
        Ok(())
    }

    #[test]
    fn arity_mismatch() {
        let (x, y) = xy();
        let mut p = pipeline();
        let res = p.func("a", &[x.clone(), y], Expr::call("input", vec![x.expr()]));
        assert_eq!(
            res,
            Err(PipelineError::Arity {
                callee: "input".to_string(),
                expected: 2,
                found: 1
            })
        );
    }

    #[test]
    fn arity_mismatch_between_stages() -> Result<(), PipelineError> {
        let (x, y) = xy();
        let mut p = pipeline();
        p.func("a", &[x.clone()], Expr::int(1))?;
        let res = p.func("b", &[x.clone(), y.clone()], Expr::call("a", vec![x.expr(), y.expr()]));
        assert!(matches!(res, Err(PipelineError::Arity { expected: 1, found: 2, .. })));
        Ok(())
    }

    #[test]
    fn cycles_are_rejected() -> Result<(), PipelineError> {
        let (x, _) = xy();
        let vars = [x.clone()];
        let mut p = pipeline();

        assert_eq!(
            p.func("self_ref", &vars, Expr::call("self_ref", vec![x.offset(-1)])),
            Err(PipelineError::Cycle {
                stage: "self_ref".to_string(),
                via: "self_ref".to_string()
            })
        );

        p.declare("a", &vars, ScalarType::I32)?;
        p.declare("b", &vars, ScalarType::I32)?;
        p.define("b", Expr::call("a", vec![x.expr()]))?;
        assert_eq!(
            p.define("a", Expr::call("b", vec![x.expr()])),
            Err(PipelineError::Cycle {
                stage: "a".to_string(),
                via: "b".to_string()
            })
        );
        // the failed definition leaves the stage undefined
        assert!(p.stage("a").and_then(|s| s.body()).is_none());
        Ok(())
    }

    #[test]
    fn type_errors() {
        let (x, y) = xy();
        let vars = [x.clone(), y.clone()];
        let mut p = pipeline();

        let mixed = Expr::add(
            Expr::call("input", vec![x.expr(), y.expr()]),
            Expr::constant(1, ScalarType::U16),
        );
        assert!(matches!(
            p.func("mixed", &vars, mixed),
            Err(PipelineError::TypeMismatch {
                expected: ScalarType::U8,
                found: ScalarType::U16,
                ..
            })
        ));

        let bad_coord = Expr::call(
            "input",
            vec![Expr::constant(0, ScalarType::U8), y.expr()],
        );
        assert!(matches!(
            p.func("bad_coord", &vars, bad_coord),
            Err(PipelineError::TypeMismatch { .. })
        ));

        let z = Var::new("z");
        assert_eq!(
            p.func("free", &vars, z.expr()),
            Err(PipelineError::UnboundVar {
                stage: "free".to_string(),
                var: "z".to_string()
            })
        );
    }

    #[test]
    fn declaration_errors() -> Result<(), PipelineError> {
        let (x, y) = xy();
        let mut p = pipeline();
        p.declare("a", &[x.clone()], ScalarType::U8)?;

        assert_eq!(
            p.declare("a", &[x.clone()], ScalarType::U8),
            Err(PipelineError::DuplicateStage("a".to_string()))
        );
        assert_eq!(
            p.declare("input", &[x.clone()], ScalarType::U8),
            Err(PipelineError::DuplicateStage("input".to_string()))
        );
        assert!(matches!(
            p.declare("b", &[x.clone(), x.clone()], ScalarType::U8),
            Err(PipelineError::DuplicateVar { .. })
        ));
        assert_eq!(
            p.define("missing", Expr::int(0)),
            Err(PipelineError::UnknownStage("missing".to_string()))
        );
        assert!(matches!(
            p.define("a", Expr::int(0)),
            Err(PipelineError::TypeMismatch { .. })
        ));
        p.define("a", Expr::constant(0, ScalarType::U8))?;
        assert_eq!(
            p.define("a", Expr::constant(0, ScalarType::U8)),
            Err(PipelineError::AlreadyDefined("a".to_string()))
        );
        assert_eq!(
            p.set_output("a"),
            Err(PipelineError::OutputArity {
                stage: "a".to_string(),
                arity: 1
            })
        );

        let vars = [x.clone(), y.clone()];
        p.declare("b", &vars, ScalarType::U8)?;
        p.func("c", &vars, Expr::call("b", vec![x.expr(), y.expr()]))?;
        p.set_output("c")?;
        assert_eq!(
            p.topological_order(),
            Err(PipelineError::UndefinedStage("b".to_string()))
        );
        Ok(())
    }

    #[test]
    fn missing_output() {
        assert_eq!(
            pipeline().topological_order(),
            Err(PipelineError::MissingOutput)
        );
    }
}
