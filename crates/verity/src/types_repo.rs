//! The enumeration sort of program types seen during one analyzer run, plus
//! the subclass relation over it.
//!
//! The host language's own reflection (what are `T`'s bases? what types has
//! the program declared?) is out of scope for this engine — it is supplied
//! by a `TypeCatalog` implemented by the driver. This module only owns the
//! solver-side bookkeeping: assigning each type a distinct enumeration value
//! and keeping `smt_issubclass` reflexive and transitively closed.

use ahash::AHashMap;

use crate::solver::Facade;

/// A program type, named the way the host's reflection names it (e.g.
/// `"builtins.int"`, `"myapp.Account"`). Opaque to this crate beyond that.
pub type TypeName = String;

/// The scalar element type of a primitive symbolic variant.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PrimitiveKind {
    Bool,
    Int,
    Float,
    Str,
}

/// Which container representation a type maps to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ContainerKind {
    Seq,
    UniformTuple,
    Dict,
    Set,
    FrozenSet,
}

/// What the Proxy Factory needs to know about `T` to dispatch: is it
/// a primitive, a registered container protocol, a union of arms, a
/// callable, a user class, or an otherwise-unknown object type — if `T`
/// is a union, the factory forks over its arms; if `T` is a generic
/// container with a registered element protocol, it dispatches to the
/// matching variant. This enum is the Rust shape that dispatch needs,
/// supplied by the driver's [`TypeCatalog`] rather than parsed out of
/// `TypeName` strings.
#[derive(Debug, Clone)]
pub enum TypeShape {
    Primitive(PrimitiveKind),
    /// Element type(s) in protocol order (`[elem]` for `Seq`/`UniformTuple`/
    /// `Set`/`FrozenSet`, `[key, value]` for `Dict`).
    Container(ContainerKind, Vec<TypeName>),
    Callable(Vec<TypeName>, TypeName),
    Union(Vec<TypeName>),
    Class(TypeName),
    /// `Any`, an unbound type variable, or a type the catalog has no shape
    /// for — proxied as an [`crate::value::LazyObject`].
    Object,
}

/// Supplies the subclass edges and type shapes this module cannot discover
/// on its own: a capability trait object rather than host reflection
/// hard-coded into the core.
pub trait TypeCatalog {
    /// Direct base types of `ty`, most-derived first.
    fn bases_of(&self, ty: &TypeName) -> Vec<TypeName>;

    /// All concrete types the driver knows to subclass `ty`, including `ty`
    /// itself. Used by the Proxy Factory's subtype roll.
    fn known_subclasses(&self, ty: &TypeName) -> Vec<TypeName>;

    /// What shape `ty` has, for Proxy Factory dispatch. Default
    /// implementation treats everything as an opaque object, which is
    /// conservative but always legal — a catalog only needs to override the
    /// types it actually wants the engine to model precisely.
    fn shape_of(&self, _ty: &TypeName) -> TypeShape {
        TypeShape::Object
    }
}

/// One type's enumeration-sort constant plus the bases it was registered
/// with, so `smt_issubclass` can be asserted transitively as new types
/// arrive.
struct Registered<'ctx> {
    value: z3::ast::Int<'ctx>,
    bases: Vec<TypeName>,
}

/// Tracks the concrete program types encountered so far as values of a
/// growing integer enumeration, and asserts `smt_issubclass` facts about
/// them as they are registered.
///
/// A true `z3` finite-domain enumeration sort must be declared with all of
/// its values up front, which conflicts with types being discovered lazily
/// mid-run; this repository instead represents each type as a distinct
/// `Int` constant (one per type, values assigned by registration order) and
/// asserts the subclass relation as a quantifier-free predicate over those
/// constants, which behaves identically for every query this engine makes of
/// it (equality and the subclass predicate — never arithmetic).
pub struct TypeRepo<'ctx, 'f> {
    facade: &'f Facade<'ctx>,
    registered: AHashMap<TypeName, Registered<'ctx>>,
    next_ordinal: i64,
}

impl<'ctx, 'f> TypeRepo<'ctx, 'f> {
    #[must_use]
    pub fn new(facade: &'f Facade<'ctx>) -> Self {
        Self { facade, registered: AHashMap::new(), next_ordinal: 0 }
    }

    /// Returns the solver value for `ty`, registering it (and asserting
    /// `smt_issubclass(ty, base)` for each of its declared bases) on first
    /// use.
    pub fn get_type(&mut self, ty: &TypeName, catalog: &dyn TypeCatalog) -> z3::ast::Int<'ctx> {
        if let Some(existing) = self.registered.get(ty) {
            return existing.value.clone();
        }
        let ordinal = self.next_ordinal;
        self.next_ordinal += 1;
        let value = z3::ast::Int::from_i64(self.facade.context(), ordinal);
        let bases = catalog.bases_of(ty);
        self.registered.insert(ty.clone(), Registered { value: value.clone(), bases: bases.clone() });
        for base in &bases {
            self.get_type(base, catalog);
        }
        value
    }

    /// Asserts `smt_issubclass(sub_ty, sup_ty)` into the solver as a concrete
    /// fact (`true` or `false`), resolved from the registered base edges
    /// rather than left as an uninterpreted relation — both types must
    /// already be registered.
    pub fn assert_smt_issubclass(&self, sub_ty: &TypeName, sup_ty: &TypeName) {
        let holds = self.is_subclass(sub_ty, sup_ty);
        self.facade.assert_bool(&z3::ast::Bool::from_bool(self.facade.context(), holds));
    }

    /// `subclasses_of`, realized lazily from the catalog rather than from
    /// the solver's registered set.
    pub fn subclasses_of(&mut self, ty: &TypeName, catalog: &dyn TypeCatalog) -> Vec<TypeName> {
        let subs = catalog.known_subclasses(ty);
        for sub in &subs {
            self.get_type(sub, catalog);
        }
        subs
    }

    /// Whether `sub` has been registered as a (possibly transitive) subclass
    /// of `sup`, purely from the bases recorded at registration time. This is
    /// the Rust-side mirror of the solver fact asserted in
    /// [`Self::assert_smt_issubclass`]; the two must agree for any pair of
    /// registered types.
    #[must_use]
    pub fn is_subclass(&self, sub: &TypeName, sup: &TypeName) -> bool {
        if sub == sup {
            return true;
        }
        let Some(entry) = self.registered.get(sub) else { return false };
        entry.bases.iter().any(|base| self.is_subclass(base, sup))
    }
}
