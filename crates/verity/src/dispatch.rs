//! A scoped table of contract-aware builtin overrides — the "Contracted
//! builtins" design note made concrete.
//!
//! While the engine is running its own machinery (`StateSpace::in_framework`),
//! overrides never fire — only target code sees the contracted version of a
//! builtin. Modeled as an explicit table the driver installs entries into and
//! the core consults by name, a capability passed as a value rather than
//! installed as global interpreter state.

use std::cell::RefCell;

use ahash::AHashMap;

use crate::signal::ExecResult;
use crate::state_space::StateSpace;
use crate::value::SymbolicValue;

type Override<'ctx> = dyn Fn(&[SymbolicValue<'ctx>], &mut dyn StateSpace<'ctx>) -> ExecResult<SymbolicValue<'ctx>> + 'ctx;

/// Maps a builtin's name (e.g. `"builtins.len"`) to a symbolic
/// implementation the driver supplies. Never consulted while
/// `space.in_framework()` — the engine's own internals call the real
/// behavior, not the contracted stand-in, so a contract bug in an override
/// can't deadlock the engine analyzing itself.
#[derive(Default)]
pub struct DispatchTable<'ctx> {
    entries: RefCell<AHashMap<String, Box<Override<'ctx>>>>,
}

impl<'ctx> DispatchTable<'ctx> {
    #[must_use]
    pub fn new() -> Self {
        Self { entries: RefCell::new(AHashMap::new()) }
    }

    /// Registers (or replaces) the override for `name`.
    pub fn install(
        &self,
        name: impl Into<String>,
        f: impl Fn(&[SymbolicValue<'ctx>], &mut dyn StateSpace<'ctx>) -> ExecResult<SymbolicValue<'ctx>> + 'ctx,
    ) {
        self.entries.borrow_mut().insert(name.into(), Box::new(f));
    }

    /// Looks up and runs `name`'s override, or returns `None` if either
    /// nothing is registered for it or the engine is currently running its
    /// own internal code.
    pub fn dispatch(
        &self,
        name: &str,
        args: &[SymbolicValue<'ctx>],
        space: &mut dyn StateSpace<'ctx>,
    ) -> Option<ExecResult<SymbolicValue<'ctx>>> {
        if space.in_framework() {
            return None;
        }
        // Held across the call to `f`: an override that itself calls back
        // into `install`/`dispatch` on this same table would panic on the
        // `RefCell`'s already-borrowed check rather than deadlock silently.
        // No registered override is expected to recurse that way.
        let entries = self.entries.borrow();
        let f = entries.get(name)?;
        Some(f(args, space))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::heap::Snapshot;
    use crate::solver::Facade;
    use crate::state_space::{Checkpoint, FrameworkGuard, SearchTree, Tracking};
    use crate::value::Repr;
    use std::time::Duration;
    use z3::ast::{Dynamic, Int};
    use z3::Context;

    #[test]
    fn dispatch_misses_unregistered_names() {
        let table: DispatchTable = DispatchTable::new();
        let cfg = Facade::default_config();
        let ctx = Context::new(&cfg);
        let facade = Facade::new(&ctx, Duration::from_secs(5));
        let mut tree = SearchTree::new();
        let mut space = Tracking::new(&facade, &mut tree, Duration::from_secs(5), 1);
        assert!(table.dispatch("builtins.len", &[], &mut space).is_none());
    }

    #[test]
    fn dispatch_runs_registered_override_outside_framework() {
        let table: DispatchTable = DispatchTable::new();
        table.install("builtins.abs", |args, _space| Ok(args[0].clone()));
        let cfg = Facade::default_config();
        let ctx = Context::new(&cfg);
        let facade = Facade::new(&ctx, Duration::from_secs(5));
        let mut tree = SearchTree::new();
        let mut space = Tracking::new(&facade, &mut tree, Duration::from_secs(5), 1);
        let arg = SymbolicValue::new("builtins.int", Snapshot::default(), Repr::Int(Int::new_const(&ctx, "x")));
        let result = table.dispatch("builtins.abs", &[arg], &mut space);
        assert!(matches!(result, Some(Ok(_))));
    }

    /// A minimal stand-in that is always "in framework", so the skip branch
    /// can be exercised without holding a live `FrameworkGuard` borrow of
    /// the same space across the `dispatch` call that needs it mutably.
    struct AlwaysFramework;
    impl<'ctx> StateSpace<'ctx> for AlwaysFramework {
        fn choose_possible(&mut self, _expr: &z3::ast::Bool<'ctx>, _favor_true: bool) -> ExecResult<bool> {
            unreachable!("not exercised by this test")
        }
        fn smt_fork(&mut self, _expr: Option<&z3::ast::Bool<'ctx>>) -> ExecResult<bool> {
            unreachable!("not exercised by this test")
        }
        fn fork_with_confirm_or_else(&mut self, _p: f64) -> ExecResult<bool> {
            unreachable!("not exercised by this test")
        }
        fn find_model_value(&mut self, _expr: &Dynamic<'ctx>) -> ExecResult<Dynamic<'ctx>> {
            unreachable!("not exercised by this test")
        }
        fn checkpoint(&mut self) -> Checkpoint {
            unreachable!("not exercised by this test")
        }
        fn restore(&mut self, _checkpoint: Checkpoint) {
            unreachable!("not exercised by this test")
        }
        fn framework(&self) -> FrameworkGuard<'_> {
            unreachable!("not exercised by this test")
        }
        fn in_framework(&self) -> bool {
            true
        }
        fn deadline_elapsed(&self) -> bool {
            false
        }
    }

    #[test]
    fn dispatch_skips_registered_override_inside_framework() {
        let table: DispatchTable = DispatchTable::new();
        table.install("builtins.abs", |args, _space| Ok(args[0].clone()));
        let cfg = Facade::default_config();
        let ctx = Context::new(&cfg);
        let arg = SymbolicValue::new("builtins.int", Snapshot::default(), Repr::Int(Int::new_const(&ctx, "x")));
        let mut space = AlwaysFramework;
        assert!(table.dispatch("builtins.abs", &[arg], &mut space).is_none());
    }
}
