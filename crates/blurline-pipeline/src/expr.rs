use std::fmt;
use std::sync::Arc;

use crate::types::ScalarType;

/// A named symbolic integer axis.
///
/// Variables are binding sites: stage definitions are written over them and
/// schedule directives refer to loops by their names.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Var(Arc<str>);

impl Var {
    /// Create a new variable.
    pub fn new(name: &str) -> Self {
        Self(Arc::from(name))
    }

    /// The variable name.
    pub fn name(&self) -> &str {
        &self.0
    }

    /// An expression referencing this variable.
    pub fn expr(&self) -> Expr {
        Expr::Var(self.clone())
    }

    /// The coordinate expression `self + offset`.
    pub fn offset(&self, offset: i64) -> Expr {
        if offset == 0 {
            self.expr()
        } else {
            Expr::add(self.expr(), Expr::int(offset))
        }
    }
}

impl fmt::Display for Var {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Binary operators over integer expressions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum BinOp {
    /// Addition.
    Add,
    /// Subtraction.
    Sub,
    /// Multiplication.
    Mul,
    /// Division, truncating toward zero. Dividing by zero yields zero.
    Div,
    /// Remainder of the truncating division. Zero divisor yields zero.
    Mod,
    /// Minimum.
    Min,
    /// Maximum.
    Max,
}

impl BinOp {
    /// Apply the operator on wide values; the caller wraps the result.
    #[inline]
    pub fn apply(self, lhs: i64, rhs: i64) -> i64 {
        match self {
            BinOp::Add => lhs.wrapping_add(rhs),
            BinOp::Sub => lhs.wrapping_sub(rhs),
            BinOp::Mul => lhs.wrapping_mul(rhs),
            BinOp::Div => lhs.checked_div(rhs).unwrap_or(0),
            BinOp::Mod => lhs.checked_rem(rhs).unwrap_or(0),
            BinOp::Min => lhs.min(rhs),
            BinOp::Max => lhs.max(rhs),
        }
    }

    fn symbol(self) -> &'static str {
        match self {
            BinOp::Add => "+",
            BinOp::Sub => "-",
            BinOp::Mul => "*",
            BinOp::Div => "/",
            BinOp::Mod => "%",
            BinOp::Min => "min",
            BinOp::Max => "max",
        }
    }
}

/// A pure expression tree.
///
/// Built with the explicit constructors below.
#[derive(Debug, Clone, PartialEq)]
pub enum Expr {
    /// A constant, already wrapped to its type.
    Const {
        /// The value.
        value: i64,
        /// The declared type.
        ty: ScalarType,
    },
    /// A reference to a dimension variable of the enclosing stage.
    Var(Var),
    /// A binary operation; both operands must have the same type.
    Binary {
        /// The operator.
        op: BinOp,
        /// Left operand.
        lhs: Box<Expr>,
        /// Right operand.
        rhs: Box<Expr>,
    },
    /// A conversion to another width, wrapping on narrowing.
    Cast {
        /// Target type.
        ty: ScalarType,
        /// Converted value.
        value: Box<Expr>,
    },
    /// A read of the pipeline input or of another stage at the given coordinates.
    Call {
        /// Name of the input or stage.
        callee: String,
        /// Coordinate arguments.
        args: Vec<Expr>,
    },
}

impl Expr {
    /// A constant of the given type. The value is wrapped to the type.
    pub fn constant(value: i64, ty: ScalarType) -> Self {
        Expr::Const {
            value: ty.wrap(value),
            ty,
        }
    }

    /// An `int32` constant, the type of coordinates.
    pub fn int(value: i64) -> Self {
        Self::constant(value, ScalarType::I32)
    }

    /// A variable reference.
    pub fn var(var: &Var) -> Self {
        var.expr()
    }

    /// A binary operation.
    pub fn binary(op: BinOp, lhs: Expr, rhs: Expr) -> Self {
        Expr::Binary {
            op,
            lhs: Box::new(lhs),
            rhs: Box::new(rhs),
        }
    }

    /// `lhs + rhs`
    pub fn add(lhs: Expr, rhs: Expr) -> Self {
        Self::binary(BinOp::Add, lhs, rhs)
    }

    /// `lhs - rhs`
    pub fn sub(lhs: Expr, rhs: Expr) -> Self {
        Self::binary(BinOp::Sub, lhs, rhs)
    }

    /// `lhs * rhs`
    pub fn mul(lhs: Expr, rhs: Expr) -> Self {
        Self::binary(BinOp::Mul, lhs, rhs)
    }

    /// `lhs / rhs`
    pub fn div(lhs: Expr, rhs: Expr) -> Self {
        Self::binary(BinOp::Div, lhs, rhs)
    }

    /// `lhs % rhs`
    pub fn rem(lhs: Expr, rhs: Expr) -> Self {
        Self::binary(BinOp::Mod, lhs, rhs)
    }

    /// `min(lhs, rhs)`
    pub fn min(lhs: Expr, rhs: Expr) -> Self {
        Self::binary(BinOp::Min, lhs, rhs)
    }

    /// `max(lhs, rhs)`
    pub fn max(lhs: Expr, rhs: Expr) -> Self {
        Self::binary(BinOp::Max, lhs, rhs)
    }

    /// Sum of a non-empty list of terms, folded left.
    pub fn sum(terms: impl IntoIterator<Item = Expr>) -> Option<Self> {
        terms.into_iter().reduce(Self::add)
    }

    /// Convert `value` to `ty`.
    pub fn cast(ty: ScalarType, value: Expr) -> Self {
        Expr::Cast {
            ty,
            value: Box::new(value),
        }
    }

    /// Read `callee` at `args`.
    pub fn call(callee: &str, args: Vec<Expr>) -> Self {
        Expr::Call {
            callee: callee.to_string(),
            args,
        }
    }

    /// Test if the expression references the given variable.
    pub fn uses_var(&self, var: &Var) -> bool {
        match self {
            Expr::Const { .. } => false,
            Expr::Var(v) => v == var,
            Expr::Binary { lhs, rhs, .. } => lhs.uses_var(var) || rhs.uses_var(var),
            Expr::Cast { value, .. } => value.uses_var(var),
            Expr::Call { args, .. } => args.iter().any(|a| a.uses_var(var)),
        }
    }

    /// Visit every call in the expression, outermost first.
    pub fn visit_calls<'a>(&'a self, f: &mut impl FnMut(&'a str, &'a [Expr])) {
        match self {
            Expr::Const { .. } | Expr::Var(_) => {}
            Expr::Binary { lhs, rhs, .. } => {
                lhs.visit_calls(f);
                rhs.visit_calls(f);
            }
            Expr::Cast { value, .. } => value.visit_calls(f),
            Expr::Call { callee, args } => {
                f(callee, args);
                args.iter().for_each(|a| a.visit_calls(f));
            }
        }
    }

    /// Names of everything the expression reads, without duplicates.
    pub fn callees(&self) -> Vec<&str> {
        let mut names = Vec::new();
        self.visit_calls(&mut |callee, _| {
            if !names.contains(&callee) {
                names.push(callee);
            }
        });
        names
    }
}

impl fmt::Display for Expr {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            Expr::Const { value, ty } if *ty == ScalarType::I32 => write!(f, "{value}"),
            Expr::Const { value, ty } => write!(f, "({ty}){value}"),
            Expr::Var(v) => write!(f, "{v}"),
            Expr::Binary { op, lhs, rhs } => match op {
                BinOp::Min | BinOp::Max => write!(f, "{}({lhs}, {rhs})", op.symbol()),
                _ => write!(f, "({lhs} {} {rhs})", op.symbol()),
            },
            Expr::Cast { ty, value } => write!(f, "{ty}({value})"),
            Expr::Call { callee, args } => {
                write!(f, "{callee}(")?;
                for (i, arg) in args.iter().enumerate() {
                    if i > 0 {
                        f.write_str(", ")?;
                    }
                    write!(f, "{arg}")?;
                }
                f.write_str(")")
            }
        }
    }
}
