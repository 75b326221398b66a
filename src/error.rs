//! Error types surfaced while building a comprehension model.

use thiserror::Error;

use crate::affine::LeafKind;

/// Errors raised synchronously at the offending construction call.
///
/// Model construction never recovers or retries: a definition that produced an
/// error is unusable and should be discarded by the caller. Partially built
/// state (e.g. tensors registered before a later failure) is left as-is.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ModelError {
    /// A tensor was subscripted with something other than a symbolic leaf.
    #[error("tensor '{tensor}' can only be subscripted by symbolic dims and symbols, got {found}")]
    InvalidIndex { tensor: String, found: String },

    /// A second tensor was registered under an existing name.
    #[error("tensor '{name}' is already registered")]
    DuplicateTensor { name: String },

    /// A `TensorDef` already attached to an operation was registered again.
    #[error("tensor def is already attached as '{tensor}' on op '{op}'")]
    AlreadyAttached { tensor: String, op: String },

    /// A comprehension was built with no bindings at all.
    #[error("comprehension must bind at least one tensor use")]
    EmptyComprehension,

    /// A tensor name was referenced before registration.
    #[error("tensor '{name}' is not registered")]
    UnknownTensor { name: String },

    /// A `TensorUse` or identity accessor ran against an unattached `TensorDef`.
    #[error("tensor def is not attached to an operation")]
    Unattached,

    /// A leaf of the given kind was introduced in a scope that forbids it.
    #[error("new {kind} '{name}' is not allowed in this scope")]
    ScopeViolation { kind: LeafKind, name: String },
}

/// Convenience alias for results returned by model construction.
pub type Result<T, E = ModelError> = std::result::Result<T, E>;
