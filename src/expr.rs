//! Expression AST for comprehension right-hand sides.
//!
//! An [`Expression`] is a tree of tensor reads, primitive applications, and
//! reduction applications. Nodes are built bottom-up, own their children, and
//! are never mutated after construction. A [`ReduceApply`] records its
//! reduction dimensions and arguments but not the destination; the
//! destination is supplied by the comprehension that consumes it.

use std::fmt;
use std::ops::{Add, Mul, Sub};

use indexmap::IndexSet;
use serde::{Deserialize, Serialize};
use smallvec::SmallVec;

use crate::affine::AffineLeaf;
use crate::tensor::TensorUse;

/// Compact list of reduction dimensions.
pub type ReduceDims = SmallVec<[AffineLeaf; 4]>;

/// Closed catalog of scalar primitives usable in comprehensions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum PrimFn {
    Add,
    Sub,
    Mul,
    Max,
    Exp,
    Log,
}

impl PrimFn {
    pub fn name(self) -> &'static str {
        match self {
            PrimFn::Add => "add",
            PrimFn::Sub => "sub",
            PrimFn::Mul => "mul",
            PrimFn::Max => "max",
            PrimFn::Exp => "exp",
            PrimFn::Log => "log",
        }
    }

    /// Applies the primitive to ordered arguments. No evaluation occurs.
    pub fn apply(self, args: impl Into<Vec<Expression>>) -> Expression {
        Expression::Prim(PrimApply {
            prim: self,
            args: args.into(),
        })
    }

    /// Pairs the primitive with explicit reduction dimensions.
    pub fn reduce(self, dims: impl IntoIterator<Item = AffineLeaf>) -> ReduceFn {
        ReduceFn::new(self, dims)
    }
}

impl fmt::Display for PrimFn {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// A reduction operator: an accumulation primitive plus the dimensions being
/// reduced over.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReduceFn {
    pub op: PrimFn,
    pub dims: ReduceDims,
}

impl ReduceFn {
    pub fn new(op: PrimFn, dims: impl IntoIterator<Item = AffineLeaf>) -> Self {
        Self {
            op,
            dims: dims.into_iter().collect(),
        }
    }

    pub fn add(dims: impl IntoIterator<Item = AffineLeaf>) -> Self {
        Self::new(PrimFn::Add, dims)
    }

    pub fn mul(dims: impl IntoIterator<Item = AffineLeaf>) -> Self {
        Self::new(PrimFn::Mul, dims)
    }

    pub fn max(dims: impl IntoIterator<Item = AffineLeaf>) -> Self {
        Self::new(PrimFn::Max, dims)
    }

    /// Applies the reduction to ordered arguments, producing a
    /// [`ReduceApply`] node.
    pub fn apply(self, args: impl Into<Vec<Expression>>) -> Expression {
        Expression::Reduce(ReduceApply {
            reduce: self,
            args: args.into(),
        })
    }
}

impl fmt::Display for ReduceFn {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "reduce_{}(", self.op)?;
        for (index, dim) in self.dims.iter().enumerate() {
            if index > 0 {
                f.write_str(", ")?;
            }
            write!(f, "{dim}")?;
        }
        f.write_str(")")
    }
}

/// Application of a primitive to ordered argument expressions.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PrimApply {
    pub prim: PrimFn,
    pub args: Vec<Expression>,
}

/// Application of a reduction to ordered argument expressions.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReduceApply {
    pub reduce: ReduceFn,
    pub args: Vec<Expression>,
}

/// A value usable on the right-hand side of a comprehension.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum Expression {
    TensorUse(TensorUse),
    Prim(PrimApply),
    Reduce(ReduceApply),
}

impl Expression {
    /// Depth-first, left-to-right visit of every reachable symbolic leaf.
    ///
    /// A [`ReduceApply`] surfaces its declared reduction dimensions before
    /// walking its arguments, even when those dimensions do not otherwise
    /// appear among them.
    pub fn visit_leaves(&self, visit: &mut impl FnMut(&AffineLeaf)) {
        match self {
            Expression::TensorUse(read) => {
                for leaf in read.indices() {
                    visit(leaf);
                }
            }
            Expression::Prim(apply) => {
                for arg in &apply.args {
                    arg.visit_leaves(visit);
                }
            }
            Expression::Reduce(apply) => {
                for dim in &apply.reduce.dims {
                    visit(dim);
                }
                for arg in &apply.args {
                    arg.visit_leaves(visit);
                }
            }
        }
    }

    /// Collects dimension leaves in first-encounter order; symbols are
    /// excluded (they never participate in reduction).
    pub fn collect_dims(&self) -> IndexSet<AffineLeaf> {
        let mut dims = IndexSet::new();
        self.visit_leaves(&mut |leaf| {
            if leaf.is_dim() {
                dims.insert(leaf.clone());
            }
        });
        dims
    }

    pub fn max(self, rhs: Expression) -> Expression {
        PrimFn::Max.apply(vec![self, rhs])
    }

    pub fn exp(self) -> Expression {
        PrimFn::Exp.apply(vec![self])
    }

    pub fn log(self) -> Expression {
        PrimFn::Log.apply(vec![self])
    }
}

impl From<TensorUse> for Expression {
    fn from(read: TensorUse) -> Self {
        Expression::TensorUse(read)
    }
}

impl Add for Expression {
    type Output = Expression;

    fn add(self, rhs: Expression) -> Expression {
        PrimFn::Add.apply(vec![self, rhs])
    }
}

impl Sub for Expression {
    type Output = Expression;

    fn sub(self, rhs: Expression) -> Expression {
        PrimFn::Sub.apply(vec![self, rhs])
    }
}

impl Mul for Expression {
    type Output = Expression;

    fn mul(self, rhs: Expression) -> Expression {
        PrimFn::Mul.apply(vec![self, rhs])
    }
}

impl Add for TensorUse {
    type Output = Expression;

    fn add(self, rhs: TensorUse) -> Expression {
        Expression::from(self) + Expression::from(rhs)
    }
}

impl Sub for TensorUse {
    type Output = Expression;

    fn sub(self, rhs: TensorUse) -> Expression {
        Expression::from(self) - Expression::from(rhs)
    }
}

impl Mul for TensorUse {
    type Output = Expression;

    fn mul(self, rhs: TensorUse) -> Expression {
        Expression::from(self) * Expression::from(rhs)
    }
}

fn fmt_args(args: &[Expression], f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.write_str("(")?;
    for (index, arg) in args.iter().enumerate() {
        if index > 0 {
            f.write_str(", ")?;
        }
        write!(f, "{arg}")?;
    }
    f.write_str(")")
}

impl fmt::Display for PrimApply {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.prim)?;
        fmt_args(&self.args, f)
    }
}

impl fmt::Display for ReduceApply {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.reduce)?;
        fmt_args(&self.args, f)
    }
}

impl fmt::Display for Expression {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Expression::TensorUse(read) => write!(f, "{read}"),
            Expression::Prim(apply) => write!(f, "{apply}"),
            Expression::Reduce(apply) => write!(f, "{apply}"),
        }
    }
}
