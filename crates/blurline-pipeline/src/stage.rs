use blurline_image::BoundaryPolicy;

use crate::expr::{Expr, Var};
use crate::types::ScalarType;

/// Dimensionality of the pipeline input.
pub const INPUT_DIMENSIONS: usize = 2;

/// Largest stage dimensionality the executor supports.
pub const MAX_DIMENSIONS: usize = 4;

/// The external 2-D image a pipeline reads, bound at realize time.
#[derive(Debug, Clone, PartialEq)]
pub struct InputParam {
    name: String,
    ty: ScalarType,
    boundary: BoundaryPolicy<i64>,
}

impl InputParam {
    /// A clamp-to-edge input of the given sample type.
    pub fn new(name: &str, ty: ScalarType) -> Self {
        Self {
            name: name.to_string(),
            ty,
            boundary: BoundaryPolicy::RepeatEdge,
        }
    }

    /// Replace the policy used for reads outside of the bound image.
    pub fn with_boundary(mut self, boundary: BoundaryPolicy<i64>) -> Self {
        self.boundary = boundary;
        self
    }

    /// The input name, used as the callee in [`Expr::Call`].
    pub fn name(&self) -> &str {
        &self.name
    }

    /// The sample type.
    pub fn ty(&self) -> ScalarType {
        self.ty
    }

    /// The boundary policy.
    pub fn boundary(&self) -> BoundaryPolicy<i64> {
        self.boundary
    }

    /// Always [`INPUT_DIMENSIONS`].
    pub fn dimensions(&self) -> usize {
        INPUT_DIMENSIONS
    }
}

/// A named pure function from integer coordinates to a scalar.
#[derive(Debug, Clone, PartialEq)]
pub struct Stage {
    pub(crate) name: String,
    pub(crate) vars: Vec<Var>,
    pub(crate) ty: ScalarType,
    pub(crate) body: Option<Expr>,
}

impl Stage {
    /// The stage name.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// The dimension variables, first one innermost by default.
    pub fn vars(&self) -> &[Var] {
        &self.vars
    }

    /// Number of dimensions.
    pub fn arity(&self) -> usize {
        self.vars.len()
    }

    /// The value type.
    pub fn ty(&self) -> ScalarType {
        self.ty
    }

    /// The body, if defined.
    pub fn body(&self) -> Option<&Expr> {
        self.body.as_ref()
    }
}
