//! Tensor registry entries and the subscript protocol types.

use std::fmt;

use serde::{Deserialize, Serialize};
use smallvec::SmallVec;

use crate::affine::{AffineLeaf, AffineMap, LeafName};
use crate::error::{ModelError, Result};

/// Element-type variable (e.g. `T`) bound to a concrete scalar type by the
/// lowering stage.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct TypeVar(LeafName);

impl TypeVar {
    pub fn new(name: impl Into<LeafName>) -> Self {
        Self(name.into())
    }

    pub fn as_str(&self) -> &str {
        self.0.as_str()
    }
}

impl fmt::Display for TypeVar {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Registry index of a tensor within its owning [`OpDef`](crate::opdef::OpDef).
///
/// Uses refer to their tensor through this id rather than a borrow, so a
/// definition stays relocatable and serializable.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct TensorId(pub u32);

/// Compact list of subscript leaves.
pub type IndexLeaves = SmallVec<[AffineLeaf; 4]>;

/// Shape specification carried by a tensor: either a pre-built shape map or a
/// sequence of symbol leaves awaiting coercion.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum ShapeSpec {
    Map(AffineMap),
    Leaves(IndexLeaves),
}

impl fmt::Display for ShapeSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ShapeSpec::Map(map) => write!(f, "{map}"),
            ShapeSpec::Leaves(leaves) => {
                f.write_str("[")?;
                for (index, leaf) in leaves.iter().enumerate() {
                    if index > 0 {
                        f.write_str(", ")?;
                    }
                    write!(f, "{leaf}")?;
                }
                f.write_str("]")
            }
        }
    }
}

/// Bookkeeping for a single tensor, held by name in the owning definition.
///
/// Created standalone, a `TensorDef` acquires its identity (name and registry
/// index) exactly once during registration and is immutable afterwards except
/// for lazy shape coercion.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TensorDef {
    type_var: TypeVar,
    shape: ShapeSpec,
    output: bool,
    name: Option<LeafName>,
    registered_index: Option<TensorId>,
    owner: Option<String>,
}

impl TensorDef {
    /// New tensor whose shape is given as symbol leaves to be coerced later.
    pub fn new(type_var: TypeVar, shape: impl IntoIterator<Item = AffineLeaf>) -> Self {
        Self {
            type_var,
            shape: ShapeSpec::Leaves(shape.into_iter().collect()),
            output: false,
            name: None,
            registered_index: None,
            owner: None,
        }
    }

    /// New tensor carrying a pre-built shape map.
    pub fn with_map(type_var: TypeVar, map: AffineMap) -> Self {
        Self {
            type_var,
            shape: ShapeSpec::Map(map),
            output: false,
            name: None,
            registered_index: None,
            owner: None,
        }
    }

    /// Marks the tensor as an output of the operation.
    pub fn output(mut self) -> Self {
        self.output = true;
        self
    }

    pub fn type_var(&self) -> &TypeVar {
        &self.type_var
    }

    pub fn shape(&self) -> &ShapeSpec {
        &self.shape
    }

    pub fn is_output(&self) -> bool {
        self.output
    }

    pub fn is_attached(&self) -> bool {
        self.name.is_some()
    }

    /// Name assigned at registration; fails before attachment.
    pub fn tensor_name(&self) -> Result<&LeafName> {
        self.name.as_ref().ok_or(ModelError::Unattached)
    }

    /// Registry index assigned at registration; fails before attachment.
    pub fn id(&self) -> Result<TensorId> {
        self.registered_index.ok_or(ModelError::Unattached)
    }

    /// Name of the operation that owns this tensor, once attached.
    pub fn owner(&self) -> Option<&str> {
        self.owner.as_deref()
    }

    /// Binds identity exactly once; re-attachment is an error and leaves the
    /// original attachment unchanged.
    pub(crate) fn attach(&mut self, index: TensorId, name: LeafName, owner: String) -> Result<()> {
        if let Some(existing) = &self.name {
            return Err(ModelError::AlreadyAttached {
                tensor: existing.to_string(),
                op: self.owner.clone().unwrap_or_default(),
            });
        }
        self.registered_index = Some(index);
        self.name = Some(name);
        self.owner = Some(owner);
        Ok(())
    }

    pub(crate) fn set_shape(&mut self, shape: ShapeSpec) {
        self.shape = shape;
    }
}

impl fmt::Display for TensorDef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = self.name.as_ref().map(LeafName::as_str).unwrap_or("?");
        let role = if self.output { "OUTPUT " } else { "" };
        write!(
            f,
            "{name} : TensorDef({role}{}, shape = {})",
            self.type_var, self.shape
        )
    }
}

/// A single subscript value.
///
/// Only symbolic leaves are legal tensor indices; the `Const` variant exists
/// so malformed subscripts are representable and rejected with a typed error
/// instead of silently coerced.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum IndexExpr {
    Leaf(AffineLeaf),
    Const(i64),
}

impl From<AffineLeaf> for IndexExpr {
    fn from(leaf: AffineLeaf) -> Self {
        IndexExpr::Leaf(leaf)
    }
}

impl From<&AffineLeaf> for IndexExpr {
    fn from(leaf: &AffineLeaf) -> Self {
        IndexExpr::Leaf(leaf.clone())
    }
}

impl From<i64> for IndexExpr {
    fn from(value: i64) -> Self {
        IndexExpr::Const(value)
    }
}

impl fmt::Display for IndexExpr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            IndexExpr::Leaf(leaf) => write!(f, "{leaf}"),
            IndexExpr::Const(value) => write!(f, "constant {value}"),
        }
    }
}

/// One use of a registered tensor: the tensor's id plus the ordered symbolic
/// indices at this site.
///
/// Uses are ephemeral: constructed fresh on every subscript, never interned.
/// The raw leaf tuple is kept as-is; resolution into integer positions is the
/// lowering stage's job.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TensorUse {
    pub tensor: TensorId,
    pub name: LeafName,
    pub indices: IndexLeaves,
}

impl TensorUse {
    pub fn tensor(&self) -> TensorId {
        self.tensor
    }

    pub fn tensor_name(&self) -> &LeafName {
        &self.name
    }

    pub fn indices(&self) -> &[AffineLeaf] {
        &self.indices
    }

    pub fn rank(&self) -> usize {
        self.indices.len()
    }
}

impl fmt::Display for TensorUse {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}[", self.name)?;
        for (index, leaf) in self.indices.iter().enumerate() {
            if index > 0 {
                f.write_str(", ")?;
            }
            write!(f, "{leaf}")?;
        }
        f.write_str("]")
    }
}
