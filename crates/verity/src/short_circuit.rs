//! Intercepts calls to user-declared functions other than the one under
//! analysis, replacing the nested call with a free symbolic return value to
//! keep paths tractable. Asserts the callee's own postcondition on that free
//! value when the driver can supply one, rather than leaving it fully
//! unconstrained.
//!
//! Uses the same `Drop`-based scope-guard idiom as `FrameworkGuard` in
//! `state_space.rs` for the one-level "disengage while we decide, re-engage
//! after" mechanism.

use std::cell::Cell;
use std::collections::HashSet;

use z3::ast::{Array, Bool, Int, Real, String as Z3Str};

use crate::conditions::{Bindings, Condition};
use crate::proxy_factory::{proxy_for_type, ProxyContext};
use crate::signal::{ExecResult, Signal};
use crate::solver::Facade;
use crate::state_space::StateSpace;
use crate::types_repo::TypeName;
use crate::value::{Repr, SymbolicValue};

/// The callee-side shape the Short-Circuit Context needs: which parameters
/// are declared mutable (so `forget_contents` knows to scramble them) and
/// the effective return type once any type variables are unified against
/// the caller's actual argument types. Unification itself is
/// the driver's job (it owns the callee's generic signature); this module
/// takes the already-unified return type as input.
///
/// `postcondition`, if the driver can supply it, lets a short-circuited call
/// assert the callee's own postcondition on the fresh return value before
/// handing it back, the same way a precondition constrains an argument
/// proxy, so a caller relying on a stronger callee guarantee doesn't see
/// unreachable Refutations. `None` (the driver has no condition parser
/// wired up, or the callee has none) falls back to a fully free,
/// unconstrained value.
pub struct CalleeShape<'ctx> {
    pub mutable_params: HashSet<String>,
    pub return_type: TypeName,
    pub postcondition: Option<std::rc::Rc<dyn Condition<'ctx> + 'ctx>>,
}

/// RAII one-level disengage: while alive, [`ShortCircuitContext::engaged`]
/// is `false`. Mirrors `state_space::FrameworkGuard`.
pub struct DisengageGuard<'a> {
    depth: &'a Cell<u32>,
}

impl Drop for DisengageGuard<'_> {
    fn drop(&mut self) {
        self.depth.set(self.depth.get() - 1);
    }
}

/// One analyzer-run-scoped short-circuit policy. Never intercepts calls to
/// the function currently under analysis (`analyzed_fn`).
pub struct ShortCircuitContext<'ctx, 'f> {
    facade: &'f Facade<'ctx>,
    analyzed_fn: String,
    disengaged_depth: Cell<u32>,
}

/// What the Call Attempt protocol should do with an intercepted call site.
pub enum Decision<'ctx> {
    RunOriginal,
    Replaced(SymbolicValue<'ctx>),
}

impl<'ctx, 'f> ShortCircuitContext<'ctx, 'f> {
    #[must_use]
    pub fn new(facade: &'f Facade<'ctx>, analyzed_fn: impl Into<String>) -> Self {
        Self { facade, analyzed_fn: analyzed_fn.into(), disengaged_depth: Cell::new(0) }
    }

    #[must_use]
    pub fn engaged(&self) -> bool {
        self.disengaged_depth.get() == 0
    }

    fn disengage(&self) -> DisengageGuard<'_> {
        self.disengaged_depth.set(self.disengaged_depth.get() + 1);
        DisengageGuard { depth: &self.disengaged_depth }
    }

    /// Called at a call site for `callee_name`, following the usual
    /// three-step protocol. `args` is mutated in place: any parameter `callee` marks
    /// mutable has its contents forgotten before a replaced return is
    /// synthesized, so later readers of that argument see unconstrained
    /// state rather than whatever the never-executed callee would have left
    /// behind.
    pub fn maybe_short_circuit(
        &self,
        callee_name: &str,
        callee: &CalleeShape<'ctx>,
        args: &mut [(String, SymbolicValue<'ctx>)],
        space: &mut dyn StateSpace<'ctx>,
        proxy_ctx: &mut ProxyContext<'_, 'ctx, '_>,
    ) -> ExecResult<Decision<'ctx>> {
        if space.in_framework() || !self.engaged() || callee_name == self.analyzed_fn {
            return Ok(Decision::RunOriginal);
        }
        // Step 2: overwhelmingly prefer running the real nested call — a
        // single bad short-circuit can wreck an otherwise-good path.
        if space.fork_with_confirm_or_else(0.95)? {
            return Ok(Decision::RunOriginal);
        }
        // Step 3: short-circuit.
        let _guard = self.disengage();
        for (pname, pval) in args.iter_mut() {
            if callee.mutable_params.contains(pname) {
                forget_contents(pval, self.facade)?;
            }
        }
        let ret = proxy_for_type(proxy_ctx, space, &callee.return_type, &format!("{callee_name}_ret"), false, false)?;
        // Assert the callee's own postcondition on the free value rather
        // than leaving it unconstrained. A `false`
        // verdict here means this particular free value can never have been
        // a legal return from `callee_name` under its own contract, so the
        // path is dropped the same way an unsatisfiable precondition would
        // be rather than reported as a finding against the function actually
        // under analysis.
        if let Some(post) = &callee.postcondition {
            let bindings = Bindings { params: args.to_vec(), return_value: Some(ret.clone()), old: None };
            if !post.evaluate(&bindings, space)? {
                return Err(Signal::IgnoreAttempt);
            }
        }
        Ok(Decision::Replaced(ret))
    }
}

/// Replaces `v`'s solver handle(s) with fresh ones of the same sort,
/// leaving its nominal type and snapshot untouched. `TypeVal` and
/// `LazyObject` abort the path as unsupported: forgetting a
/// partially-realized object's dynamic type identity mid-path isn't
/// modeled.
pub fn forget_contents<'ctx>(v: &mut SymbolicValue<'ctx>, facade: &Facade<'ctx>) -> ExecResult<()> {
    let zctx = facade.context();
    v.repr = match &v.repr {
        Repr::Bool(_) => Repr::Bool(Bool::new_const(zctx, facade.fresh_name("forgotten"))),
        Repr::Int(_) => Repr::Int(Int::new_const(zctx, facade.fresh_name("forgotten"))),
        Repr::Float(_) => Repr::Float(Real::new_const(zctx, facade.fresh_name("forgotten"))),
        Repr::Str(_) => Repr::Str(Z3Str::new_const(zctx, facade.fresh_name("forgotten"))),
        Repr::Seq(view) => Repr::Seq(forget_seq_view(view, facade)),
        Repr::UniformTuple(view) => Repr::UniformTuple(forget_seq_view(view, facade)),
        Repr::Dict(c) => Repr::Dict(forget_container(c, facade)),
        Repr::Set(c) => Repr::Set(forget_container(c, facade)),
        Repr::FrozenSet(c) => Repr::FrozenSet(forget_container(c, facade)),
        Repr::Callable(decl) => {
            let domain: Vec<_> = (0..decl.arity()).map(|i| decl.domain(i)).collect();
            Repr::Callable(facade.uninterpreted_func(&facade.fresh_name("forgotten_fn"), &domain, &decl.range()))
        }
        Repr::TypeVal(_) | Repr::LazyObject(_) => {
            return Err(Signal::Unsupported("cannot forget a not-yet-realized object's type identity".to_string()));
        }
        Repr::ProxyStruct(p) => {
            let mut forgotten = p.as_ref().clone();
            for field in forgotten.fields.values_mut() {
                forget_contents(field, facade)?;
            }
            Repr::ProxyStruct(Box::new(forgotten))
        }
    };
    Ok(())
}

fn forget_seq_view<'ctx>(view: &crate::value::SeqView<'ctx>, facade: &Facade<'ctx>) -> crate::value::SeqView<'ctx> {
    let zctx = facade.context();
    let array = Array::new_const(zctx, facade.fresh_name("forgotten_arr"), &facade.int_sort(), &view.elem_sort);
    crate::value::SeqView {
        base: array,
        elem_sort: view.elem_sort.clone(),
        start: Int::from_i64(zctx, 0),
        stop: Int::new_const(zctx, facade.fresh_name("forgotten_len")),
    }
}

fn forget_container<'ctx>(c: &crate::value::ContainerRepr<'ctx>, facade: &Facade<'ctx>) -> crate::value::ContainerRepr<'ctx> {
    let zctx = facade.context();
    let array = Array::new_const(zctx, facade.fresh_name("forgotten_arr"), &c.key_sort, &c.value_sort);
    crate::value::ContainerRepr {
        array,
        key_sort: c.key_sort.clone(),
        value_sort: c.value_sort.clone(),
        length: Int::new_const(zctx, facade.fresh_name("forgotten_len")),
        dict_shape: c.dict_shape.clone(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;
    use z3::Context;

    #[test]
    fn forget_contents_on_int_yields_a_different_const() {
        let cfg = Facade::default_config();
        let ctx = Context::new(&cfg);
        let facade = Facade::new(&ctx, Duration::from_secs(5));
        let mut v = SymbolicValue::new("builtins.int", crate::heap::Snapshot::default(), Repr::Int(Int::new_const(&ctx, "orig")));
        forget_contents(&mut v, &facade).unwrap();
        match &v.repr {
            Repr::Int(i) => assert_ne!(i.to_string(), "orig"),
            _ => panic!("expected Int"),
        }
    }

    #[test]
    fn forget_contents_on_lazy_object_is_unsupported() {
        let cfg = Facade::default_config();
        let ctx = Context::new(&cfg);
        let facade = Facade::new(&ctx, Duration::from_secs(5));
        let lazy = crate::value::LazyObject {
            typeval: crate::value::TypeVal { cap: "builtins.object".to_string(), ordinal: Int::new_const(&ctx, "t") },
            varname: "o".to_string(),
        };
        let mut v = SymbolicValue::new("builtins.object", crate::heap::Snapshot::default(), Repr::LazyObject(Box::new(lazy)));
        assert!(matches!(forget_contents(&mut v, &facade), Err(Signal::Unsupported(_))));
    }

    #[test]
    fn never_short_circuits_the_analyzed_function_itself() {
        let cfg = Facade::default_config();
        let ctx = Context::new(&cfg);
        let facade = Facade::new(&ctx, Duration::from_secs(5));
        let sc = ShortCircuitContext::new(&facade, "target_fn");
        assert!(sc.engaged());
    }
}
