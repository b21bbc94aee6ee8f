//! Produces a symbolic value for a requested type, including user
//! classes: concrete instantiation with symbolic members where the
//! constructor's shape is known, falling back to an opaque proxy otherwise.
//!
//! Takes a "first try concrete, fall back to opaque" approach for
//! synthesizing an object of an arbitrary annotated type.

use z3::ast::{Array, Bool, Int, Real, String as Z3Str};

use crate::conditions::{ClassCatalog, ConditionsProvider};
use crate::heap::{Heap, Snapshot};
use crate::signal::{ExecResult, Signal};
use crate::solver::Facade;
use crate::state_space::StateSpace;
use crate::types_repo::{ContainerKind, PrimitiveKind, TypeCatalog, TypeName, TypeRepo, TypeShape};
use crate::value::{ContainerRepr, LazyObject, ProxyStruct, Repr, SeqView, SymbolicValue, TypeVal};

/// Everything the factory needs besides the `StateSpace` it forks with.
/// Bundled into one struct so `proxy_for_type` doesn't need a dozen
/// parameters at every recursive call site.
pub struct ProxyContext<'a, 'ctx, 'f> {
    pub facade: &'f Facade<'ctx>,
    pub types: &'a mut TypeRepo<'ctx, 'f>,
    pub catalog: &'a dyn TypeCatalog,
    pub classes: &'a dyn ClassCatalog<'ctx>,
    pub heap: &'a mut Heap<SymbolicValue<'ctx>>,
    /// Supplies class invariants for the `meet_invariants` path.
    /// `None` if the driver has no condition parser wired up (invariants are
    /// then never checked, which is always a conservative choice — a value
    /// that fails an un-consulted invariant just means the engine explores
    /// an impossible state a little longer, not an unsound one).
    pub conditions: Option<&'a dyn ConditionsProvider<'ctx>>,
}

/// `T` normalized before dispatch: typevars resolve to their bound (or
/// `object` if unbound) and `Any` resolves to `object` *before* this
/// function is reached — that resolution needs the driver's type-variable
/// bookkeeping, which is host-reflection and therefore out of scope here.
/// This factory only recognizes the handful of names every catalog is
/// expected to normalize to.
const OBJECT_TYPE: &str = "builtins.object";

/// Synthesizes a symbolic value of type `ty`.
///
/// `name` seeds readable solver constant names (`x!1`, not `!482`).
/// `meet_invariants` evaluates the class's invariants on a freshly
/// constructed instance, abandoning the path (`Signal::IgnoreAttempt`) if
/// any fails. `allow_subtypes` additionally rolls a concrete subtype of a
/// requested class before instantiation.
pub fn proxy_for_type<'ctx>(
    ctx: &mut ProxyContext<'_, 'ctx, '_>,
    space: &mut dyn StateSpace<'ctx>,
    ty: &TypeName,
    name: &str,
    meet_invariants: bool,
    allow_subtypes: bool,
) -> ExecResult<SymbolicValue<'ctx>> {
    let snapshot = ctx.heap.current_snapshot();
    match ctx.catalog.shape_of(ty) {
        TypeShape::Primitive(kind) => Ok(proxy_primitive(ctx.facade, ty, snapshot, kind, name)),
        TypeShape::Container(kind, elems) => proxy_container(ctx, ty, snapshot, kind, &elems, name),
        TypeShape::Callable(params, ret) => Ok(proxy_callable(ctx, ty, snapshot, &params, &ret, name)),
        TypeShape::Union(arms) => proxy_union(ctx, space, &arms, name, meet_invariants, allow_subtypes),
        TypeShape::Class(class) => {
            let class = if allow_subtypes { roll_subtype(ctx, space, &class)? } else { class };
            proxy_class(ctx, space, &class, snapshot, name, meet_invariants)
        }
        TypeShape::Object => Ok(proxy_object(ctx, ty, snapshot, name)),
    }
}

fn proxy_primitive<'ctx>(
    facade: &Facade<'ctx>,
    ty: &TypeName,
    snapshot: Snapshot,
    kind: PrimitiveKind,
    name: &str,
) -> SymbolicValue<'ctx> {
    let ctx = facade.context();
    let repr = match kind {
        PrimitiveKind::Bool => Repr::Bool(Bool::new_const(ctx, facade.fresh_name(name))),
        PrimitiveKind::Int => Repr::Int(Int::new_const(ctx, facade.fresh_name(name))),
        PrimitiveKind::Float => Repr::Float(Real::new_const(ctx, facade.fresh_name(name))),
        PrimitiveKind::Str => Repr::Str(Z3Str::new_const(ctx, facade.fresh_name(name))),
    };
    SymbolicValue::new(ty.clone(), snapshot, repr)
}

/// The sort backing one container's key/element/value slot: a registered
/// primitive gets its native sort, anything else (a class, `object`, an
/// unresolved typevar) is stored opaquely as a `HeapRef` and materialized
/// lazily on read, the same way `ObjectOfUnknownType` elements work.
fn element_sort<'ctx>(facade: &Facade<'ctx>, catalog: &dyn TypeCatalog, ty: &TypeName) -> z3::Sort<'ctx> {
    match catalog.shape_of(ty) {
        TypeShape::Primitive(PrimitiveKind::Bool) => facade.bool_sort(),
        TypeShape::Primitive(PrimitiveKind::Int) => facade.int_sort(),
        TypeShape::Primitive(PrimitiveKind::Float) => facade.real_sort(),
        TypeShape::Primitive(PrimitiveKind::Str) => facade.str_sort(),
        _ => facade.heap_ref_sort().clone(),
    }
}

fn proxy_container<'ctx>(
    ctx: &mut ProxyContext<'_, 'ctx, '_>,
    ty: &TypeName,
    snapshot: Snapshot,
    kind: ContainerKind,
    elems: &[TypeName],
    name: &str,
) -> ExecResult<SymbolicValue<'ctx>> {
    let facade = ctx.facade;
    let zctx = facade.context();
    let length = Int::new_const(zctx, facade.fresh_name(&format!("{name}_len")));
    facade.assert_bool(&length.ge(&Int::from_i64(zctx, 0)));

    match kind {
        ContainerKind::Seq | ContainerKind::UniformTuple => {
            let elem_ty = elems.first().cloned().unwrap_or_else(|| OBJECT_TYPE.to_string());
            let range = element_sort(facade, ctx.catalog, &elem_ty);
            let array = Array::new_const(zctx, facade.fresh_name(&format!("{name}_arr")), &facade.int_sort(), &range);
            let view = SeqView { base: array, elem_sort: range, start: Int::from_i64(zctx, 0), stop: length };
            let repr = if matches!(kind, ContainerKind::Seq) { Repr::Seq(view) } else { Repr::UniformTuple(view) };
            Ok(SymbolicValue::new(ty.clone(), snapshot, repr))
        }
        ContainerKind::Dict => {
            let key_ty = elems.first().cloned().unwrap_or_else(|| OBJECT_TYPE.to_string());
            let val_ty = elems.get(1).cloned().unwrap_or_else(|| OBJECT_TYPE.to_string());
            let key_sort = element_sort(facade, ctx.catalog, &key_ty);
            let val_sort = element_sort(facade, ctx.catalog, &val_ty);
            let optional = facade.optional_sort(&val_sort, name);
            let array =
                Array::new_const(zctx, facade.fresh_name(&format!("{name}_arr")), &key_sort, &optional.sort);
            let missing = optional.variants[0].constructor.apply(&[]);
            let default_array = Array::const_array(zctx, &key_sort, &missing);
            facade.assert_bool(&Bool::iff(&length._eq(&Int::from_i64(zctx, 0)), &array._eq(&default_array)));
            let value_sort = optional.sort.clone();
            let dict_shape = Some(crate::value::DictShape {
                missing_ctor: optional.variants[0].constructor.clone(),
                present_ctor: optional.variants[1].constructor.clone(),
                present_tester: optional.variants[1].tester.clone(),
                value_accessor: optional.variants[1].accessors[0].clone(),
            });
            Ok(SymbolicValue::new(ty.clone(), snapshot, Repr::Dict(ContainerRepr { array, key_sort, value_sort, length, dict_shape })))
        }
        ContainerKind::Set | ContainerKind::FrozenSet => {
            let key_ty = elems.first().cloned().unwrap_or_else(|| OBJECT_TYPE.to_string());
            let key_sort = element_sort(facade, ctx.catalog, &key_ty);
            let array = Array::new_const(zctx, facade.fresh_name(&format!("{name}_arr")), &key_sort, &facade.bool_sort());
            let default_array = Array::const_array(zctx, &key_sort, &Bool::from_bool(zctx, false).into());
            facade.assert_bool(&Bool::iff(&length._eq(&Int::from_i64(zctx, 0)), &array._eq(&default_array)));
            let repr = ContainerRepr { array, key_sort, value_sort: facade.bool_sort(), length, dict_shape: None };
            Ok(SymbolicValue::new(ty.clone(), snapshot, if matches!(kind, ContainerKind::Set) { Repr::Set(repr) } else { Repr::FrozenSet(repr) }))
        }
    }
}

fn proxy_callable<'ctx>(
    ctx: &mut ProxyContext<'_, 'ctx, '_>,
    ty: &TypeName,
    snapshot: Snapshot,
    params: &[TypeName],
    ret: &TypeName,
    name: &str,
) -> SymbolicValue<'ctx> {
    let facade = ctx.facade;
    let domain: Vec<_> = params.iter().map(|p| element_sort(facade, ctx.catalog, p)).collect();
    let range = element_sort(facade, ctx.catalog, ret);
    let decl = facade.uninterpreted_func(&facade.fresh_name(name), &domain, &range);
    SymbolicValue::new(ty.clone(), snapshot, Repr::Callable(decl))
}

fn proxy_union<'ctx>(
    ctx: &mut ProxyContext<'_, 'ctx, '_>,
    space: &mut dyn StateSpace<'ctx>,
    arms: &[TypeName],
    name: &str,
    meet_invariants: bool,
    allow_subtypes: bool,
) -> ExecResult<SymbolicValue<'ctx>> {
    let chosen = pick_one(space, arms.len())?;
    proxy_for_type(ctx, space, &arms[chosen], name, meet_invariants, allow_subtypes)
}

/// Picks an index in `0..len` via repeated unguided binary forks — used for
/// both union-arm selection here and subtype realization below, which
/// chooses a subtype via the same repeated-binary-decision scheme.
fn pick_one<'ctx>(space: &mut dyn StateSpace<'ctx>, len: usize) -> ExecResult<usize> {
    if len == 0 {
        return Err(Signal::Unsupported("no candidates to pick from".to_string()));
    }
    let mut lo = 0usize;
    let mut hi = len;
    while hi - lo > 1 {
        let mid = lo + (hi - lo) / 2;
        if space.smt_fork(None)? {
            hi = mid;
        } else {
            lo = mid;
        }
    }
    Ok(lo)
}

/// `allow_subtypes`'s subtype roll: picks a concrete subtype of `class`,
/// preferring `class` itself (it is always first in `known_subclasses`, per
/// the `TypeCatalog` contract every catalog implementation must follow).
fn roll_subtype<'ctx>(
    ctx: &mut ProxyContext<'_, 'ctx, '_>,
    space: &mut dyn StateSpace<'ctx>,
    class: &TypeName,
) -> ExecResult<TypeName> {
    let subs = ctx.types.subclasses_of(class, ctx.catalog);
    if subs.is_empty() {
        return Ok(class.clone());
    }
    let idx = pick_one(space, subs.len())?;
    Ok(subs[idx].clone())
}

fn proxy_class<'ctx>(
    ctx: &mut ProxyContext<'_, 'ctx, '_>,
    space: &mut dyn StateSpace<'ctx>,
    class: &TypeName,
    snapshot: Snapshot,
    name: &str,
    meet_invariants: bool,
) -> ExecResult<SymbolicValue<'ctx>> {
    let value = match ctx.classes.shape_of(class) {
        Some(shape) => {
            let mut args = Vec::with_capacity(shape.ctor_params.len());
            for (pname, pty) in &shape.ctor_params {
                let arg = proxy_for_type(ctx, space, pty, &format!("{name}_{pname}"), false, false)?;
                args.push((pname.clone(), arg));
            }
            match ctx.classes.construct(class, &args, space) {
                Ok(instance) => instance,
                Err(_) => opaque_proxy(class, snapshot, args),
            }
        }
        // No constructor shape known at all: an opaque proxy with no
        // pre-populated fields (attributes get filled in lazily by whatever
        // reads them, via the heap).
        None => opaque_proxy(class, snapshot, Vec::new()),
    };

    if meet_invariants {
        check_invariants(ctx, space, class, &value)?;
    }
    Ok(value)
}

fn opaque_proxy<'ctx>(class: &TypeName, snapshot: Snapshot, fields: Vec<(String, SymbolicValue<'ctx>)>) -> SymbolicValue<'ctx> {
    let mut map = indexmap::IndexMap::new();
    for (k, v) in fields {
        map.insert(k, v);
    }
    SymbolicValue::new(class.clone(), snapshot, Repr::ProxyStruct(Box::new(ProxyStruct { class: class.clone(), fields: map })))
}

/// Evaluates `class`'s invariants against the synthesized instance's fields;
/// abandons the path via `Signal::IgnoreAttempt` on the first failure. An
/// invariant failing here means "this particular assignment of symbolic
/// members never forms a legal instance" — precisely the "the current
/// symbolic state became self-contradictory" case `IgnoreAttempt` already
/// covers, so no new `Signal` variant is needed.
fn check_invariants<'ctx>(
    ctx: &mut ProxyContext<'_, 'ctx, '_>,
    space: &mut dyn StateSpace<'ctx>,
    class: &TypeName,
    value: &SymbolicValue<'ctx>,
) -> ExecResult<()> {
    let Some(conditions) = ctx.conditions else { return Ok(()) };
    let Ok(class_conditions) = conditions.get_class_conditions(class) else { return Ok(()) };
    let fields = match &value.repr {
        Repr::ProxyStruct(p) => p.fields.iter().map(|(k, v)| (k.clone(), v.clone())).collect(),
        _ => Vec::new(),
    };
    let bindings = crate::conditions::Bindings { params: fields, return_value: None, old: None };
    for inv in &class_conditions.invariants {
        if !inv.evaluate(&bindings, space)? {
            return Err(Signal::IgnoreAttempt);
        }
    }
    Ok(())
}

/// An object whose concrete type is not yet known: a [`LazyObject`] capped
/// at `ty`, unforced until something observes it.
fn proxy_object<'ctx>(ctx: &mut ProxyContext<'_, 'ctx, '_>, ty: &TypeName, snapshot: Snapshot, name: &str) -> SymbolicValue<'ctx> {
    let facade = ctx.facade;
    let ordinal = Int::new_const(facade.context(), facade.fresh_name(&format!("{name}_type")));
    let lazy = LazyObject { typeval: TypeVal { cap: ty.clone(), ordinal }, varname: name.to_string() };
    SymbolicValue::new(ty.clone(), snapshot, Repr::LazyObject(Box::new(lazy)))
}

/// Forces a [`LazyObject`] into a concrete proxy: rolls a subtype of its
/// cap (preferring the cap itself) and synthesizes a fresh proxy of that
/// type in its place, replacing the lazy value on forcing.
pub fn force_lazy<'ctx>(
    ctx: &mut ProxyContext<'_, 'ctx, '_>,
    space: &mut dyn StateSpace<'ctx>,
    lazy: &LazyObject<'ctx>,
) -> ExecResult<SymbolicValue<'ctx>> {
    let chosen = roll_subtype(ctx, space, &lazy.typeval.cap)?;
    proxy_for_type(ctx, space, &chosen, &lazy.varname, true, false)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;
    use z3::Context;

    struct NoCatalog;
    impl TypeCatalog for NoCatalog {
        fn bases_of(&self, _ty: &TypeName) -> Vec<TypeName> {
            Vec::new()
        }
        fn known_subclasses(&self, _ty: &TypeName) -> Vec<TypeName> {
            Vec::new()
        }
        fn shape_of(&self, ty: &TypeName) -> TypeShape {
            match ty.as_str() {
                "builtins.int" => TypeShape::Primitive(PrimitiveKind::Int),
                "builtins.bool" => TypeShape::Primitive(PrimitiveKind::Bool),
                _ => TypeShape::Object,
            }
        }
    }

    struct NoClasses;
    impl<'ctx> ClassCatalog<'ctx> for NoClasses {
        fn shape_of(&self, _class: &TypeName) -> Option<crate::conditions::ClassShape> {
            None
        }
        fn construct(
            &self,
            _class: &TypeName,
            _args: &[(String, SymbolicValue<'ctx>)],
            _space: &mut dyn StateSpace<'ctx>,
        ) -> ExecResult<SymbolicValue<'ctx>> {
            Err(Signal::Unsupported("no constructor".into()))
        }
    }

    #[test]
    fn primitive_int_proxy_is_a_fresh_int_const() {
        let cfg = Facade::default_config();
        let zctx = Context::new(&cfg);
        let facade = Facade::new(&zctx, Duration::from_secs(5));
        let mut types = TypeRepo::new(&facade);
        let mut heap: Heap<SymbolicValue> = Heap::new();
        let catalog = NoCatalog;
        let classes = NoClasses;
        let mut pctx = ProxyContext { facade: &facade, types: &mut types, catalog: &catalog, classes: &classes, heap: &mut heap, conditions: None };
        let mut tree = crate::state_space::SearchTree::new();
        let mut space = crate::state_space::Tracking::new(&facade, &mut tree, Duration::from_secs(5), 1);
        let v = proxy_for_type(&mut pctx, &mut space, &"builtins.int".to_string(), "x", false, false).unwrap();
        assert!(matches!(v.repr, Repr::Int(_)));
    }
}
