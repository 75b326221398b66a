//! Declarative tensor-comprehension op definitions.
//!
//! This crate builds the structural model behind index-notation tensor
//! operations: named tensors subscripted by symbolic affine indices, combined
//! with scalar primitives and reductions, and collected into comprehensions.
//! A downstream code generator consumes the finished [`OpDef`] to emit
//! loop-nest or region-based implementations; nothing here evaluates or
//! lowers anything.
//!
//! ## Architecture
//!
//! ```text
//! AffineLeaf / AffineBuildState (affine.rs)
//!         |
//!         | subscript + shape coercion
//!         v
//! TensorDef / TensorUse (tensor.rs)
//!         |
//!         | combinators
//!         v
//! Expression AST (expr.rs)
//!         |
//!         | assignment / accumulation protocol
//!         v
//! OpDef registry (opdef.rs)  ->  lowering stage (out of crate)
//! ```
//!
//! ## Example
//!
//! ```
//! use opdsl::{dims, symbols, Expression, OpDef, PrimFn, TensorDef, TypeVar};
//!
//! let (m, n, k) = dims!(m, n, k);
//! let (big_m, big_n, big_k) = symbols!(M, N, K);
//!
//! let mut matmul = OpDef::new("matmul");
//! matmul
//!     .register_tensor("A", TensorDef::new(TypeVar::new("T"), [big_m.clone(), big_k.clone()]))
//!     .unwrap();
//! matmul
//!     .register_tensor("B", TensorDef::new(TypeVar::new("T"), [big_k, big_n.clone()]))
//!     .unwrap();
//! matmul
//!     .register_tensor("C", TensorDef::new(TypeVar::new("U"), [big_m, big_n]).output())
//!     .unwrap();
//!
//! let a = matmul.use_tensor("A", &[m.clone().into(), k.clone().into()]).unwrap();
//! let b = matmul.use_tensor("B", &[k.into(), n.clone().into()]).unwrap();
//! matmul
//!     .accumulate("C", &[m.into(), n.into()], PrimFn::Add, a * b)
//!     .unwrap();
//!
//! assert_eq!(matmul.comprehensions().len(), 1);
//! # let _: &Expression = &matmul.comprehensions()[0].values()[0];
//! ```

pub mod affine;
pub mod error;
pub mod expr;
pub mod opdef;
pub mod tensor;

pub use affine::{
    AffineBuildState, AffineLeaf, AffineMap, AffineRef, AffineScope, LeafKind, LeafName,
};
pub use error::{ModelError, Result};
pub use expr::{Expression, PrimApply, PrimFn, ReduceApply, ReduceDims, ReduceFn};
pub use opdef::{Comprehension, OpDef};
pub use tensor::{IndexExpr, IndexLeaves, ShapeSpec, TensorDef, TensorId, TensorUse, TypeVar};
