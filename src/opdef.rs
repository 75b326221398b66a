//! Operation definitions: the registry tying tensors, numbering state, and
//! comprehensions together.
//!
//! An [`OpDef`] is the unit of consistent numbering. Tensors register into it
//! and receive a stable index; subscripting a registered tensor produces a
//! [`TensorUse`]; assigning an expression to a use appends a
//! [`Comprehension`]. The completed definition is handed to a lowering stage
//! as a read-only structure; this crate never emits loop nests itself.

use std::fmt;

use indexmap::{IndexMap, IndexSet};
use serde::{Deserialize, Serialize};

use crate::affine::{
    AffineBuildState, AffineLeaf, AffineMap, AffineRef, AffineScope, LeafName,
};
use crate::error::{ModelError, Result};
use crate::expr::{Expression, PrimFn, ReduceDims, ReduceFn};
use crate::tensor::{IndexExpr, IndexLeaves, ShapeSpec, TensorDef, TensorId, TensorUse};

/// One declarative binding: tensor uses and the expressions they are bound
/// to, all satisfied simultaneously over a shared iteration space.
///
/// Built atomically by the assignment protocol and never mutated afterwards.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Comprehension {
    definitions: Vec<TensorUse>,
    values: Vec<Expression>,
}

impl Comprehension {
    /// Builds a multi-binding comprehension; at least one binding is required.
    pub fn new(bindings: Vec<(TensorUse, Expression)>) -> Result<Self> {
        if bindings.is_empty() {
            return Err(ModelError::EmptyComprehension);
        }
        let (definitions, values) = bindings.into_iter().unzip();
        Ok(Self {
            definitions,
            values,
        })
    }

    /// Builds the common 1:1 comprehension.
    pub fn single(definition: TensorUse, value: Expression) -> Self {
        Self {
            definitions: vec![definition],
            values: vec![value],
        }
    }

    pub fn definitions(&self) -> &[TensorUse] {
        &self.definitions
    }

    pub fn values(&self) -> &[Expression] {
        &self.values
    }
}

// Deserialization must uphold the same invariant as `new`, otherwise a
// hand-edited document could smuggle in mismatched binding lists.
impl<'de> Deserialize<'de> for Comprehension {
    fn deserialize<D>(deserializer: D) -> std::result::Result<Self, D::Error>
    where
        D: serde::Deserializer<'de>,
    {
        #[derive(Deserialize)]
        struct Raw {
            definitions: Vec<TensorUse>,
            values: Vec<Expression>,
        }

        let raw = Raw::deserialize(deserializer)?;
        if raw.definitions.is_empty() || raw.definitions.len() != raw.values.len() {
            return Err(serde::de::Error::custom(
                "comprehension must bind equally many definitions and values, at least one",
            ));
        }
        Ok(Comprehension {
            definitions: raw.definitions,
            values: raw.values,
        })
    }
}

impl fmt::Display for Comprehension {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.definitions.len() == 1 {
            return write!(f, "{} = {}", self.definitions[0], self.values[0]);
        }
        f.write_str("(")?;
        for (index, definition) in self.definitions.iter().enumerate() {
            if index > 0 {
                f.write_str(", ")?;
            }
            write!(f, "{definition}")?;
        }
        f.write_str(") = (")?;
        for (index, value) in self.values.iter().enumerate() {
            if index > 0 {
                f.write_str(", ")?;
            }
            write!(f, "{value}")?;
        }
        f.write_str(")")
    }
}

/// Definition of a named op: registered tensors (insertion-ordered),
/// comprehensions (append-ordered), and the shared numbering state.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OpDef {
    name: String,
    export_name: String,
    tensors: IndexMap<LeafName, TensorDef>,
    comprehensions: Vec<Comprehension>,
    state: AffineBuildState,
}

impl OpDef {
    /// New definition whose external name defaults to the declared name.
    pub fn new(name: impl Into<String>) -> Self {
        let name = name.into();
        let export_name = name.clone();
        Self {
            name,
            export_name,
            tensors: IndexMap::new(),
            comprehensions: Vec::new(),
            state: AffineBuildState::new(),
        }
    }

    /// New definition with a distinct external-facing name.
    pub fn with_export_name(name: impl Into<String>, export_name: impl Into<String>) -> Self {
        Self {
            export_name: export_name.into(),
            ..Self::new(name)
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn export_name(&self) -> &str {
        &self.export_name
    }

    /// Registered tensors in registration order.
    pub fn tensors(&self) -> impl Iterator<Item = (&LeafName, &TensorDef)> {
        self.tensors.iter()
    }

    pub fn tensor_count(&self) -> usize {
        self.tensors.len()
    }

    pub fn comprehensions(&self) -> &[Comprehension] {
        &self.comprehensions
    }

    /// The shared numbering state, for the lowering stage to resolve leaves.
    pub fn state(&self) -> &AffineBuildState {
        &self.state
    }

    /// Registers a tensor, attaching its identity with index = current count.
    pub fn register_tensor(
        &mut self,
        name: impl Into<LeafName>,
        mut tensor: TensorDef,
    ) -> Result<TensorId> {
        let name = name.into();
        if self.tensors.contains_key(&name) {
            return Err(ModelError::DuplicateTensor {
                name: name.to_string(),
            });
        }
        let id = TensorId(self.tensors.len() as u32);
        tensor.attach(id, name.clone(), self.name.clone())?;
        self.tensors.insert(name, tensor);
        Ok(id)
    }

    /// Looks up a registered tensor by name.
    pub fn tensor(&self, name: &str) -> Result<&TensorDef> {
        self.tensors.get(name).ok_or_else(|| ModelError::UnknownTensor {
            name: name.to_string(),
        })
    }

    /// Subscripts a registered tensor with symbolic indices.
    ///
    /// Index positions are dimensions, so the resolution scope forbids new
    /// symbols. Every index must be a symbolic leaf; anything else is a
    /// definition error naming the offending value. Dimension leaves are
    /// resolved here for numbering consistency, but the returned use keeps
    /// the raw leaf tuple. Final positions belong to the lowering stage.
    pub fn use_tensor(&mut self, name: &str, indices: &[IndexExpr]) -> Result<TensorUse> {
        let (id, tensor_name) = {
            let def = self.tensor(name)?;
            (def.id()?, def.tensor_name()?.clone())
        };
        let mut scope = AffineScope::dims_only(&mut self.state);
        let mut leaves = IndexLeaves::new();
        for index in indices {
            match index {
                IndexExpr::Leaf(leaf) => {
                    scope.resolve(leaf)?;
                    leaves.push(leaf.clone());
                }
                other @ IndexExpr::Const(_) => {
                    return Err(ModelError::InvalidIndex {
                        tensor: name.to_string(),
                        found: other.to_string(),
                    });
                }
            }
        }
        Ok(TensorUse {
            tensor: id,
            name: tensor_name,
            indices: leaves,
        })
    }

    /// Binds `tensor[indices] = value` as a new 1:1 comprehension.
    pub fn assign(
        &mut self,
        name: &str,
        indices: &[IndexExpr],
        value: Expression,
    ) -> Result<()> {
        let definition = self.use_tensor(name, indices)?;
        self.comprehensions
            .push(Comprehension::single(definition, value));
        Ok(())
    }

    /// Binds `tensor[indices] op= value`, inferring the reduction dimensions.
    ///
    /// The inferred set is the dimension leaves free in `value` minus those
    /// free in the target use, ordered as first encountered in a depth-first
    /// left-to-right walk of `value`. An empty inferred set degenerates to a
    /// plain elementwise accumulation and is accepted.
    pub fn accumulate(
        &mut self,
        name: &str,
        indices: &[IndexExpr],
        op: PrimFn,
        value: Expression,
    ) -> Result<()> {
        let target = self.use_tensor(name, indices)?;
        let target_dims: IndexSet<AffineLeaf> =
            Expression::from(target.clone()).collect_dims();
        let reduce_dims: ReduceDims = value
            .collect_dims()
            .into_iter()
            .filter(|dim| !target_dims.contains(dim))
            .collect();
        let reduced = ReduceFn::new(op, reduce_dims).apply(vec![value]);
        self.comprehensions
            .push(Comprehension::single(target, reduced));
        Ok(())
    }

    /// Appends a multi-binding comprehension built from explicit pairs.
    pub fn add_comprehension(
        &mut self,
        bindings: Vec<(TensorUse, Expression)>,
    ) -> Result<()> {
        self.comprehensions.push(Comprehension::new(bindings)?);
        Ok(())
    }

    /// Coerces a shape specification into a shape map.
    ///
    /// A pre-built map passes through unchanged. A leaf sequence resolves in
    /// a symbols-only scope (shapes are parametrized purely by symbols, so a
    /// dimension leaf is a scope violation) and produces a zero-dimension
    /// map over the definition-wide symbol count.
    pub fn coerce_shape(&mut self, spec: &ShapeSpec) -> Result<AffineMap> {
        let leaves = match spec {
            ShapeSpec::Map(map) => return Ok(map.clone()),
            ShapeSpec::Leaves(leaves) => leaves,
        };
        let mut scope = AffineScope::symbols_only(&mut self.state);
        let mut results = Vec::with_capacity(leaves.len());
        for leaf in leaves {
            if leaf.is_dim() {
                return Err(ModelError::ScopeViolation {
                    kind: leaf.kind(),
                    name: leaf.name().to_string(),
                });
            }
            results.push(AffineRef::Symbol(scope.resolve(leaf)?));
        }
        assert_eq!(
            scope.new_dim_count(),
            0,
            "shape coercion for '{}' introduced dimensions",
            self.name
        );
        Ok(AffineMap::new(0, self.state.symbol_count(), results))
    }

    /// Coerces a registered tensor's shape in place, returning the map.
    pub fn coerce_tensor_shape(&mut self, name: &str) -> Result<AffineMap> {
        let spec = self.tensor(name)?.shape().clone();
        let map = self.coerce_shape(&spec)?;
        let def = self
            .tensors
            .get_mut(name)
            .ok_or_else(|| ModelError::UnknownTensor {
                name: name.to_string(),
            })?;
        def.set_shape(ShapeSpec::Map(map.clone()));
        Ok(map)
    }

    /// Serializes the definition as pretty-printed JSON.
    pub fn to_json_string(&self) -> serde_json::Result<String> {
        serde_json::to_string_pretty(self)
    }

    /// Restores a definition from its JSON form.
    ///
    /// Documents with malformed comprehension binding lists are rejected as a
    /// deserialization error rather than accepted as broken state.
    pub fn from_json_str(src: &str) -> serde_json::Result<Self> {
        serde_json::from_str(src)
    }
}

impl fmt::Display for OpDef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write_line(
            f,
            0,
            &format!("opdef @{} (export = {}) {{", self.name, self.export_name),
        )?;
        if !self.tensors.is_empty() {
            write_line(f, 1, "tensors:")?;
            for (_, tensor) in &self.tensors {
                write_line(f, 2, &tensor.to_string())?;
            }
        }
        if !self.comprehensions.is_empty() {
            write_line(f, 1, "comprehensions:")?;
            for comprehension in &self.comprehensions {
                write_line(f, 2, &comprehension.to_string())?;
            }
        }
        write_line(f, 0, "}")
    }
}

fn write_line(f: &mut fmt::Formatter<'_>, indent: usize, line: &str) -> fmt::Result {
    for _ in 0..indent {
        f.write_str("  ")?;
    }
    writeln!(f, "{line}")
}
