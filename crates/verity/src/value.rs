//! The Symbolic Value Taxonomy: one tagged union over every
//! program type this engine can reason about, each variant carrying its
//! nominal type, a snapshot reference into the [`crate::heap::Heap`], and an
//! opaque handle to the solver expression(s) backing it.
//!
//! A single tagged union is the unit the rest of the engine passes around,
//! the way a host runtime value enum would carry `Int(i64)`, `Ref(HeapId)`,
//! and so on; here every variant instead *wraps a solver expression*, since
//! the whole point of this engine is to reason about values the target
//! hasn't chosen yet.

use indexmap::IndexMap;
use z3::ast::{Array, Bool, Int, Real, String as Z3Str};
use z3::Sort;

use crate::heap::Snapshot;
use crate::types_repo::TypeName;

/// A sequence view: elements live in `base` at integer indices
/// `[start, stop)`. Slicing never copies the backing array — it narrows the
/// view, per the concurrent-write correctness discipline: container
/// mutations always produce a new solver expression rather than updating
/// one in place.
///
/// `elem_sort` is kept alongside `base` (rather than recovered from it)
/// because the `z3` crate's `Array` ast does not expose its own domain and
/// range sorts after construction — whatever built the array is the only
/// place that still knows them, so it hands them along.
#[derive(Debug, Clone)]
pub struct SeqView<'ctx> {
    pub base: Array<'ctx>,
    pub elem_sort: Sort<'ctx>,
    pub start: Int<'ctx>,
    pub stop: Int<'ctx>,
}

/// A mapping or set's backing representation: an array together with its
/// length expression. For `Dict` the array's range is a `present | missing`
/// sum (built via [`crate::solver::Facade::optional_sort`]); for `Set` and
/// `FrozenSet` the range is plain `Bool`. `key_sort`/`value_sort` are kept
/// for the same reason as `SeqView::elem_sort`.
#[derive(Debug, Clone)]
pub struct ContainerRepr<'ctx> {
    pub array: Array<'ctx>,
    pub key_sort: Sort<'ctx>,
    pub value_sort: Sort<'ctx>,
    pub length: Int<'ctx>,
    /// `Some` only for `Dict`: the `present`/`missing` constructors and
    /// accessors needed to read and write through the array (see
    /// `container_ops.rs`). `Set`/`FrozenSet` leave this `None` — their
    /// range is plain `Bool`, nothing more to unpack.
    pub dict_shape: Option<DictShape<'ctx>>,
}

/// The `present | missing` sum's constructors/tester/accessor, kept
/// alongside a `Dict`'s `ContainerRepr` because the `z3` crate's `Array` ast
/// does not expose the `DatatypeSort` it was built from after construction
/// (same reason `SeqView::elem_sort` and `ContainerRepr::key_sort` are kept
/// explicitly).
#[derive(Debug, Clone)]
pub struct DictShape<'ctx> {
    pub missing_ctor: z3::FuncDecl<'ctx>,
    pub present_ctor: z3::FuncDecl<'ctx>,
    pub present_tester: z3::FuncDecl<'ctx>,
    pub value_accessor: z3::FuncDecl<'ctx>,
}

/// A type value with its upper-bound nominal type ("cap"). The solver
/// holds `issubclass(value, cap)`; the cap only ever tightens.
#[derive(Debug, Clone)]
pub struct TypeVal<'ctx> {
    pub cap: TypeName,
    pub ordinal: Int<'ctx>,
}

/// An object known only by its type until first forced
/// (`ObjectOfUnknownType`).
#[derive(Debug, Clone)]
pub struct LazyObject<'ctx> {
    pub typeval: TypeVal<'ctx>,
    /// Name used when this object's eventual concrete proxy needs a fresh
    /// solver constant, so traces stay readable (`obj!3`, not `obj!17skip2`).
    pub varname: String,
}

/// A user-class instance with symbolic (or already-concrete) members,
/// produced by the Proxy Factory's concrete-instantiation path.
#[derive(Debug, Clone)]
pub struct ProxyStruct<'ctx> {
    pub class: TypeName,
    pub fields: IndexMap<String, SymbolicValue<'ctx>>,
}

/// The tagged union. See the module doc for why every variant wraps a
/// solver handle instead of a host value.
#[derive(Debug, Clone)]
pub enum Repr<'ctx> {
    Bool(Bool<'ctx>),
    Int(Int<'ctx>),
    Float(Real<'ctx>),
    Str(Z3Str<'ctx>),
    Seq(SeqView<'ctx>),
    UniformTuple(SeqView<'ctx>),
    Dict(ContainerRepr<'ctx>),
    Set(ContainerRepr<'ctx>),
    FrozenSet(ContainerRepr<'ctx>),
    Callable(z3::FuncDecl<'ctx>),
    TypeVal(TypeVal<'ctx>),
    LazyObject(Box<LazyObject<'ctx>>),
    ProxyStruct(Box<ProxyStruct<'ctx>>),
}

/// One symbolic value: its program type, the heap generation it was created
/// in, and its representation.
#[derive(Debug, Clone)]
pub struct SymbolicValue<'ctx> {
    pub ty: TypeName,
    pub snapshot: Snapshot,
    pub repr: Repr<'ctx>,
}

impl<'ctx> SymbolicValue<'ctx> {
    #[must_use]
    pub fn new(ty: impl Into<TypeName>, snapshot: Snapshot, repr: Repr<'ctx>) -> Self {
        Self { ty: ty.into(), snapshot, repr }
    }

    /// The numeric promotion rank used by [`promote`]; `None` for
    /// non-numeric variants.
    #[must_use]
    fn numeric_rank(&self) -> Option<NumericRank> {
        match &self.repr {
            Repr::Bool(_) => Some(NumericRank::Bool),
            Repr::Int(_) => Some(NumericRank::Int),
            Repr::Float(_) => Some(NumericRank::Float),
            _ => None,
        }
    }
}

/// Position in the promotion lattice `bool -> int -> float`: mixed-type
/// arithmetic follows a fixed promotion lattice; complex values
/// are out of scope for this engine and demote to a concrete `Float` at the
/// boundary where the driver supplies one.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum NumericRank {
    Bool,
    Int,
    Float,
}

/// Computes the rank both operands of a binary numeric operation must be
/// promoted to, per the `bool -> int -> float` lattice. Returns `None` if
/// either operand is not numeric.
#[must_use]
pub fn promote(a: &SymbolicValue<'_>, b: &SymbolicValue<'_>) -> Option<NumericRank> {
    Some(a.numeric_rank()?.max(b.numeric_rank()?))
}

/// Coerces `v`'s representation up to `rank`, leaving it unchanged if it is
/// already at or above that rank. `ctx` is needed to build the lifted
/// expression (e.g. `Int::from_bool` materializes a fresh `ite`).
#[must_use]
pub fn coerce_to<'ctx>(ctx: &'ctx z3::Context, v: &SymbolicValue<'ctx>, rank: NumericRank) -> SymbolicValue<'ctx> {
    use z3::ast::Ast;
    let repr = match (&v.repr, rank) {
        (Repr::Bool(b), NumericRank::Int) => Repr::Int(b.ite(&Int::from_i64(ctx, 1), &Int::from_i64(ctx, 0))),
        (Repr::Bool(b), NumericRank::Float) => {
            Repr::Float(b.ite(&Real::from_real(ctx, 1, 1), &Real::from_real(ctx, 0, 1)))
        }
        (Repr::Int(i), NumericRank::Float) => Repr::Float(Real::from_int(i)),
        (repr, _) => repr.clone(),
    };
    SymbolicValue { ty: v.ty.clone(), snapshot: v.snapshot, repr }
}

/// Python-style floor division. Z3's native `/`/`%` on `Int` are Euclidean
/// (`x % y` is always `>= 0`), which already agrees with Python's floor
/// division whenever `y > 0` — both round toward negative infinity. They
/// diverge only when `y < 0` with a nonzero remainder: Euclidean division
/// rounds toward positive infinity there, one past the floor. Correcting
/// for that one case (`x // y = euclidean(x, y) - 1 iff y < 0 and x % y !=
/// 0`) is cheaper than re-deriving floor division directly.
#[must_use]
pub fn floor_div<'ctx>(ctx: &'ctx z3::Context, x: &Int<'ctx>, y: &Int<'ctx>) -> Int<'ctx> {
    use z3::ast::Ast;
    let zero = Int::from_i64(ctx, 0);
    let euclidean: Int<'ctx> = x / y;
    let remainder: Int<'ctx> = x % y;
    let needs_correction = Bool::and(ctx, &[&remainder._eq(&zero).not(), &y.lt(&zero)]);
    needs_correction.ite(&(&euclidean - Int::from_i64(ctx, 1)), &euclidean)
}

#[cfg(test)]
mod tests {
    use super::*;
    use z3::ast::Ast;
    use z3::Context;

    fn leaf<'ctx>(repr: Repr<'ctx>) -> SymbolicValue<'ctx> {
        SymbolicValue::new("test", Snapshot::default(), repr)
    }

    #[test]
    fn promotion_picks_the_higher_rank() {
        let cfg = crate::solver::Facade::default_config();
        let ctx = Context::new(&cfg);
        let b = leaf(Repr::Bool(Bool::from_bool(&ctx, true)));
        let i = leaf(Repr::Int(Int::from_i64(&ctx, 3)));
        assert_eq!(promote(&b, &i), Some(NumericRank::Int));
        assert_eq!(promote(&i, &i), Some(NumericRank::Int));
    }

    #[test]
    fn non_numeric_operand_has_no_rank() {
        let cfg = crate::solver::Facade::default_config();
        let ctx = Context::new(&cfg);
        let s = leaf(Repr::Str(Z3Str::from_str(&ctx, "x").unwrap()));
        let i = leaf(Repr::Int(Int::from_i64(&ctx, 3)));
        assert_eq!(promote(&s, &i), None);
    }

    #[test]
    fn coerce_bool_to_int_is_idempotent_above_rank() {
        let cfg = crate::solver::Facade::default_config();
        let ctx = Context::new(&cfg);
        let i = leaf(Repr::Int(Int::from_i64(&ctx, 5)));
        let same = coerce_to(&ctx, &i, NumericRank::Int);
        assert!(matches!(same.repr, Repr::Int(_)));
    }

    /// §8's "integer floor-div obeys sign rule ... across all combinations
    /// of operand signs": every combination of dividend/divisor sign, plus
    /// the zero-dividend and exact-division edges, checked against Python's
    /// actual floor-division table rather than the truncated-division one.
    #[test]
    fn floor_div_matches_pythons_floor_across_all_sign_combinations() {
        let cfg = crate::solver::Facade::default_config();
        let ctx = Context::new(&cfg);
        let cases = [
            (7, 2, 3),
            (-7, 2, -4),
            (7, -2, -4),
            (-7, -2, 3),
            (6, 2, 3),
            (-6, 2, -3),
            (6, -2, -3),
            (-6, -2, 3),
            (0, 5, 0),
            (0, -5, 0),
            (-1, 1, -1),
            (-1, -1, 1),
        ];
        for (x, y, expected) in cases {
            let xi = Int::from_i64(&ctx, x);
            let yi = Int::from_i64(&ctx, y);
            let got = floor_div(&ctx, &xi, &yi);
            let solver = z3::Solver::new(&ctx);
            solver.assert(&got._eq(&Int::from_i64(&ctx, expected)).not());
            assert_eq!(
                solver.check(),
                z3::SatResult::Unsat,
                "floor_div({x}, {y}) should be {expected}"
            );
        }
    }
}
