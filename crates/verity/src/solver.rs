//! Wraps the `z3` crate behind a small facade so the rest of the engine never
//! names a `z3` type directly: push/pop scopes, a `check` that returns
//! `SatResult`, and model extraction after a `Sat` result.

use std::time::Duration;

use z3::ast::{Ast, Bool, Dynamic};
use z3::{Config, Context, DatatypeAccessor, DatatypeBuilder, DatatypeSort, Model, SatResult, Sort};

/// Owns the `z3::Context` and the live `z3::Solver` for one path attempt.
///
/// A fresh `Facade` is built for every [`crate::state_space::StateSpace`]
/// iteration: the SMT solver is owned by the current state space and
/// never shared across paths.
pub struct Facade<'ctx> {
    ctx: &'ctx Context,
    solver: z3::Solver<'ctx>,
    heap_ref_sort: Sort<'ctx>,
    next_fresh: std::cell::Cell<u64>,
}

impl<'ctx> Facade<'ctx> {
    #[must_use]
    pub fn new(ctx: &'ctx Context, per_path_timeout: Duration) -> Self {
        let solver = z3::Solver::new(ctx);
        let params = z3::Params::new(ctx);
        params.set_u32("timeout", u32::try_from(per_path_timeout.as_millis()).unwrap_or(u32::MAX));
        solver.set_params(&params);
        Self {
            ctx,
            solver,
            heap_ref_sort: Sort::uninterpreted(ctx, "HeapRef".into()),
            next_fresh: std::cell::Cell::new(0),
        }
    }

    #[must_use]
    pub fn context(&self) -> &'ctx Context {
        self.ctx
    }

    #[must_use]
    pub fn bool_sort(&self) -> Sort<'ctx> {
        Sort::bool(self.ctx)
    }

    #[must_use]
    pub fn int_sort(&self) -> Sort<'ctx> {
        Sort::int(self.ctx)
    }

    /// Integers are modeled with `IntSort`; floats with `RealSort`
    /// (real, chosen over floating sort for feasibility).
    #[must_use]
    pub fn real_sort(&self) -> Sort<'ctx> {
        Sort::real(self.ctx)
    }

    #[must_use]
    pub fn str_sort(&self) -> Sort<'ctx> {
        Sort::string(self.ctx)
    }

    #[must_use]
    pub fn heap_ref_sort(&self) -> &Sort<'ctx> {
        &self.heap_ref_sort
    }

    #[must_use]
    pub fn array_sort(&self, domain: &Sort<'ctx>, range: &Sort<'ctx>) -> Sort<'ctx> {
        Sort::array(self.ctx, domain, range)
    }

    /// Builds the two-constructor `present | missing` sum used as the range
    /// of a symbolic dict's backing array.
    #[must_use]
    pub fn optional_sort(&self, value_sort: &Sort<'ctx>, name: &str) -> DatatypeSort<'ctx> {
        DatatypeBuilder::new(self.ctx, format!("Optional_{name}"))
            .variant("missing", vec![])
            .variant("present", vec![("value", DatatypeAccessor::Sort(value_sort.clone()))])
            .finish()
    }

    /// Declares a fresh uninterpreted function for a symbolic callable
    /// ("Callable" variant).
    #[must_use]
    pub fn uninterpreted_func(&self, name: &str, domain: &[Sort<'ctx>], range: &Sort<'ctx>) -> z3::FuncDecl<'ctx> {
        z3::FuncDecl::new(self.ctx, name, domain, range)
    }

    /// Returns a name guaranteed unused by any prior call on this facade,
    /// used to mint fresh symbolic constants (e.g. `forget_contents`).
    /// Takes `&self` (backed by a `Cell`) rather than `&mut self` because
    /// every other module holds a shared `&Facade` for its whole lifetime.
    pub fn fresh_name(&self, prefix: &str) -> String {
        let n = self.next_fresh.get() + 1;
        self.next_fresh.set(n);
        format!("{prefix}!{n}")
    }

    pub fn assert_bool(&self, expr: &Bool<'ctx>) {
        self.solver.assert(expr);
    }

    pub fn push(&self) {
        self.solver.push();
    }

    pub fn pop(&self, n: u32) {
        self.solver.pop(n);
    }

    #[must_use]
    pub fn check_sat(&self) -> SatResult {
        self.solver.check()
    }

    /// Checks whether `expr` is satisfiable in addition to the current
    /// assertions, without committing to it (used by
    /// [`crate::state_space::StateSpace::choose_possible`]).
    #[must_use]
    pub fn check_sat_assuming(&self, expr: &Bool<'ctx>) -> SatResult {
        self.solver.check_assumptions(&[expr.clone()])
    }

    #[must_use]
    pub fn get_model(&self) -> Option<Model<'ctx>> {
        self.solver.get_model()
    }

    /// Evaluates `expr` to a concrete value under `model` via
    /// `eval_in_model`. `model_completion = true` so every free variable gets
    /// *some* concrete value rather than staying uninterpreted.
    #[must_use]
    pub fn eval_in_model(&self, model: &Model<'ctx>, expr: &Dynamic<'ctx>) -> Option<Dynamic<'ctx>> {
        model.eval(expr, true)
    }

    /// Default `z3::Config` used to build the shared `Context` for an
    /// analyzer run. One `Context` outlives every path attempt; only the
    /// `Solver` (and its assertions) is per-path.
    #[must_use]
    pub fn default_config() -> Config {
        Config::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn push_pop_restores_feasibility() {
        let cfg = Facade::default_config();
        let ctx = Context::new(&cfg);
        let facade = Facade::new(&ctx, Duration::from_secs(5));
        let x = z3::ast::Int::new_const(&ctx, "x");
        facade.push();
        facade.assert_bool(&x.eq_zero_and_also(&ctx));
        assert_eq!(facade.check_sat(), SatResult::Sat);
        facade.pop(1);
        assert_eq!(facade.check_sat(), SatResult::Sat);
    }

    trait IntExt<'ctx> {
        fn eq_zero_and_also(&self, ctx: &'ctx Context) -> Bool<'ctx>;
    }

    impl<'ctx> IntExt<'ctx> for z3::ast::Int<'ctx> {
        fn eq_zero_and_also(&self, ctx: &'ctx Context) -> Bool<'ctx> {
            self._eq(&z3::ast::Int::from_i64(ctx, 0))
        }
    }
}
