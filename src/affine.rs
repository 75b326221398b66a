//! Symbolic affine leaves and the per-definition numbering state.
//!
//! Index expressions in a comprehension are built from two kinds of symbolic
//! leaves: *dimensions* (axes of the iteration space, e.g. `m`) and *symbols*
//! (runtime-parametric extents, e.g. `M`). Each [`OpDef`](crate::opdef::OpDef)
//! owns one [`AffineBuildState`] that assigns every leaf name a stable integer
//! position on first use, so independently constructed sub-expressions agree
//! on numbering. Restricted [`AffineScope`]s forbid introducing one kind or
//! the other (shape specifications are symbol-only, subscripts are dim-only).
//!
//! The affine algebra itself is opaque here: [`AffineMap`] only records
//! dim/symbol counts and an ordered list of resolved references, and the crate
//! never simplifies or inspects a map beyond equality and printing.

use std::borrow::Borrow;
use std::fmt;
use std::sync::Arc;

use indexmap::IndexMap;
use serde::{Deserialize, Serialize};

use crate::error::{ModelError, Result};

/// Interned name shared by leaves, tensors, and registry keys.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct LeafName(Arc<str>);

impl LeafName {
    pub fn new(name: impl Into<String>) -> Self {
        Self(Arc::<str>::from(name.into()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl From<&str> for LeafName {
    fn from(name: &str) -> Self {
        LeafName::new(name)
    }
}

impl From<String> for LeafName {
    fn from(name: String) -> Self {
        LeafName::new(name)
    }
}

impl Borrow<str> for LeafName {
    fn borrow(&self) -> &str {
        self.as_str()
    }
}

impl fmt::Display for LeafName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl Serialize for LeafName {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: serde::Serializer,
    {
        serializer.serialize_str(self.as_str())
    }
}

impl<'de> Deserialize<'de> for LeafName {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: serde::Deserializer<'de>,
    {
        let name = String::deserialize(deserializer)?;
        Ok(LeafName::new(name))
    }
}

/// The two kinds of symbolic leaves.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum LeafKind {
    Dim,
    Symbol,
}

impl fmt::Display for LeafKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            LeafKind::Dim => f.write_str("dimension"),
            LeafKind::Symbol => f.write_str("symbol"),
        }
    }
}

/// A named symbolic placeholder, identified by name and kind.
///
/// Resolving a leaf against an allocator yields its positional
/// [`AffineRef`]; a given name always resolves to the same position for the
/// lifetime of the owning definition.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum AffineLeaf {
    Dim(LeafName),
    Symbol(LeafName),
}

impl AffineLeaf {
    pub fn dim(name: impl Into<LeafName>) -> Self {
        AffineLeaf::Dim(name.into())
    }

    pub fn symbol(name: impl Into<LeafName>) -> Self {
        AffineLeaf::Symbol(name.into())
    }

    pub fn name(&self) -> &LeafName {
        match self {
            AffineLeaf::Dim(name) | AffineLeaf::Symbol(name) => name,
        }
    }

    pub fn kind(&self) -> LeafKind {
        match self {
            AffineLeaf::Dim(_) => LeafKind::Dim,
            AffineLeaf::Symbol(_) => LeafKind::Symbol,
        }
    }

    pub fn is_dim(&self) -> bool {
        matches!(self, AffineLeaf::Dim(_))
    }

    pub fn is_symbol(&self) -> bool {
        matches!(self, AffineLeaf::Symbol(_))
    }
}

impl fmt::Display for AffineLeaf {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.name())
    }
}

/// Binds identifiers to fresh dimension leaves of the same names.
///
/// `let (m, n, k) = dims!(m, n, k);`
#[macro_export]
macro_rules! dims {
    ($($name:ident),+ $(,)?) => {
        ($( $crate::affine::AffineLeaf::dim(stringify!($name)) ),+)
    };
}

/// Binds identifiers to fresh symbol leaves of the same names.
///
/// `let (big_m, big_n) = symbols!(M, N);`
#[macro_export]
macro_rules! symbols {
    ($($name:ident),+ $(,)?) => {
        ($( $crate::affine::AffineLeaf::symbol(stringify!($name)) ),+)
    };
}

/// A leaf resolved to its integer position (`d0`, `s1`, ...).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum AffineRef {
    Dim(usize),
    Symbol(usize),
}

impl fmt::Display for AffineRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AffineRef::Dim(pos) => write!(f, "d{pos}"),
            AffineRef::Symbol(pos) => write!(f, "s{pos}"),
        }
    }
}

/// Opaque product of the affine algebra: dim/symbol counts plus an ordered
/// list of resolved result references.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AffineMap {
    dim_count: usize,
    symbol_count: usize,
    results: Vec<AffineRef>,
}

impl AffineMap {
    pub fn new(dim_count: usize, symbol_count: usize, results: Vec<AffineRef>) -> Self {
        Self {
            dim_count,
            symbol_count,
            results,
        }
    }

    pub fn dim_count(&self) -> usize {
        self.dim_count
    }

    pub fn symbol_count(&self) -> usize {
        self.symbol_count
    }

    pub fn results(&self) -> &[AffineRef] {
        &self.results
    }
}

impl fmt::Display for AffineMap {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("(")?;
        for pos in 0..self.dim_count {
            if pos > 0 {
                f.write_str(", ")?;
            }
            write!(f, "d{pos}")?;
        }
        f.write_str(")[")?;
        for pos in 0..self.symbol_count {
            if pos > 0 {
                f.write_str(", ")?;
            }
            write!(f, "s{pos}")?;
        }
        f.write_str("] -> (")?;
        for (index, result) in self.results.iter().enumerate() {
            if index > 0 {
                f.write_str(", ")?;
            }
            write!(f, "{result}")?;
        }
        f.write_str(")")
    }
}

/// Root numbering state owned by one operation definition.
///
/// Dimensions and symbols are numbered independently, densely from zero, in
/// first-resolution order. Entries are never renumbered or removed.
#[derive(Debug, Default, Clone, PartialEq, Serialize, Deserialize)]
pub struct AffineBuildState {
    dims: IndexMap<LeafName, usize>,
    symbols: IndexMap<LeafName, usize>,
}

impl AffineBuildState {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn dim_count(&self) -> usize {
        self.dims.len()
    }

    pub fn symbol_count(&self) -> usize {
        self.symbols.len()
    }

    /// Returns the position already assigned to the leaf, if any.
    pub fn position_of(&self, leaf: &AffineLeaf) -> Option<usize> {
        match leaf {
            AffineLeaf::Dim(name) => self.dims.get(name).copied(),
            AffineLeaf::Symbol(name) => self.symbols.get(name).copied(),
        }
    }
}

/// Transient resolution scope over a root [`AffineBuildState`].
///
/// A scope reads through to the root tables and records any newly introduced
/// leaves there, so scopes created later observe a consistent count. Flags
/// control whether resolution may introduce new dimensions or new symbols;
/// resolving a disallowed new leaf is a [`ModelError::ScopeViolation`].
pub struct AffineScope<'a> {
    state: &'a mut AffineBuildState,
    allow_new_dims: bool,
    allow_new_syms: bool,
    new_dims: usize,
    new_syms: usize,
}

impl<'a> AffineScope<'a> {
    /// Unrestricted scope: both kinds may be introduced.
    pub fn root(state: &'a mut AffineBuildState) -> Self {
        Self {
            state,
            allow_new_dims: true,
            allow_new_syms: true,
            new_dims: 0,
            new_syms: 0,
        }
    }

    /// Scope for shape specifications: new dimensions are forbidden.
    pub fn symbols_only(state: &'a mut AffineBuildState) -> Self {
        Self {
            allow_new_dims: false,
            ..Self::root(state)
        }
    }

    /// Scope for subscript positions: new symbols are forbidden.
    pub fn dims_only(state: &'a mut AffineBuildState) -> Self {
        Self {
            allow_new_syms: false,
            ..Self::root(state)
        }
    }

    /// Resolves a leaf to its stable position, assigning the next free
    /// position in the root table on permitted first use.
    pub fn resolve(&mut self, leaf: &AffineLeaf) -> Result<usize> {
        let (table, allowed, introduced) = match leaf {
            AffineLeaf::Dim(_) => (&mut self.state.dims, self.allow_new_dims, &mut self.new_dims),
            AffineLeaf::Symbol(_) => (
                &mut self.state.symbols,
                self.allow_new_syms,
                &mut self.new_syms,
            ),
        };
        if let Some(position) = table.get(leaf.name()).copied() {
            return Ok(position);
        }
        if !allowed {
            return Err(ModelError::ScopeViolation {
                kind: leaf.kind(),
                name: leaf.name().to_string(),
            });
        }
        let position = table.len();
        table.insert(leaf.name().clone(), position);
        *introduced += 1;
        Ok(position)
    }

    /// Number of dimensions this scope introduced into the root table.
    pub fn new_dim_count(&self) -> usize {
        self.new_dims
    }

    /// Number of symbols this scope introduced into the root table.
    pub fn new_sym_count(&self) -> usize {
        self.new_syms
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn positions_are_stable_across_interleaved_resolutions() {
        let mut state = AffineBuildState::new();
        let (m, n, k) = dims!(m, n, k);
        let mut scope = AffineScope::root(&mut state);
        assert_eq!(scope.resolve(&m).unwrap(), 0);
        assert_eq!(scope.resolve(&n).unwrap(), 1);
        assert_eq!(scope.resolve(&m).unwrap(), 0);
        assert_eq!(scope.resolve(&k).unwrap(), 2);
        assert_eq!(scope.resolve(&n).unwrap(), 1);
        assert_eq!(state.dim_count(), 3);
    }

    #[test]
    fn dims_and_symbols_number_independently() {
        let mut state = AffineBuildState::new();
        let mut scope = AffineScope::root(&mut state);
        assert_eq!(scope.resolve(&AffineLeaf::dim("m")).unwrap(), 0);
        assert_eq!(scope.resolve(&AffineLeaf::symbol("M")).unwrap(), 0);
        assert_eq!(scope.resolve(&AffineLeaf::symbol("N")).unwrap(), 1);
        assert_eq!(scope.resolve(&AffineLeaf::dim("n")).unwrap(), 1);
    }

    #[test]
    fn restricted_scope_rejects_new_leaves_of_forbidden_kind() {
        let mut state = AffineBuildState::new();
        let mut shape_scope = AffineScope::symbols_only(&mut state);
        assert_eq!(shape_scope.resolve(&AffineLeaf::symbol("M")).unwrap(), 0);
        let err = shape_scope.resolve(&AffineLeaf::dim("m")).unwrap_err();
        assert_eq!(
            err,
            ModelError::ScopeViolation {
                kind: LeafKind::Dim,
                name: "m".to_string(),
            }
        );

        let mut index_scope = AffineScope::dims_only(&mut state);
        assert_eq!(index_scope.resolve(&AffineLeaf::dim("m")).unwrap(), 0);
        let err = index_scope.resolve(&AffineLeaf::symbol("K")).unwrap_err();
        assert!(matches!(err, ModelError::ScopeViolation { .. }));
    }

    #[test]
    fn restricted_scope_still_resolves_existing_leaves() {
        let mut state = AffineBuildState::new();
        AffineScope::root(&mut state)
            .resolve(&AffineLeaf::symbol("M"))
            .unwrap();
        let mut scope = AffineScope::dims_only(&mut state);
        assert_eq!(scope.resolve(&AffineLeaf::symbol("M")).unwrap(), 0);
        assert_eq!(scope.new_sym_count(), 0);
    }

    #[test]
    fn map_display_uses_positional_asm_names() {
        let map = AffineMap::new(2, 1, vec![AffineRef::Dim(0), AffineRef::Symbol(0)]);
        assert_eq!(map.to_string(), "(d0, d1)[s0] -> (d0, s0)");

        let shape = AffineMap::new(0, 2, vec![AffineRef::Symbol(0), AffineRef::Symbol(1)]);
        assert_eq!(shape.to_string(), "()[s0, s1] -> (s0, s1)");
    }
}
