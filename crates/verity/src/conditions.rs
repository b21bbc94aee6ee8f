//! Everything the core consumes from, but does not implement itself:
//! reading contracts off a target, running target code under enforcement,
//! and the handful of host-reflection queries the Proxy Factory needs.
//!
//! None of these traits have a provided implementation in this crate beyond
//! the illustrative one in `crates/verity-cli` — a real condition parser,
//! enforcement layer, and CLI/server are out of scope, kept as separate
//! crates a host runtime calls through this trait boundary rather than
//! linked directly into the engine.

use std::collections::HashSet;
use std::rc::Rc;

use crate::messages::AnalysisMessage;
use crate::proxy_factory::ProxyContext;
use crate::signal::ExecResult;
use crate::state_space::StateSpace;
use crate::types_repo::TypeName;
use crate::value::SymbolicValue;

/// A single boolean condition (one precondition, the postcondition, or one
/// class invariant) plus enough provenance to report a failure against it.
pub trait Condition<'ctx> {
    fn evaluate(&self, bindings: &Bindings<'ctx>, space: &mut dyn StateSpace<'ctx>) -> ExecResult<bool>;
    fn filename(&self) -> &str;
    fn line(&self) -> u32;
    fn expr_source(&self) -> &str;
    /// Extra text appended to a failure message (e.g. a docstring note).
    fn addl_context(&self) -> Option<&str> {
        None
    }
}

/// The argument/return/`__old__` bindings a condition is evaluated against.
/// `old` is populated only for the postcondition.
pub struct Bindings<'ctx> {
    pub params: Vec<(String, SymbolicValue<'ctx>)>,
    pub return_value: Option<SymbolicValue<'ctx>>,
    pub old: Option<Vec<(String, SymbolicValue<'ctx>)>>,
}

/// One parameter's declared name and nominal type, in declaration order.
pub type Signature = Vec<(String, TypeName)>;

/// Everything the Call Attempt protocol needs about one target function.
pub struct FnConditions<'ctx> {
    pub pre: Vec<Box<dyn Condition<'ctx> + 'ctx>>,
    /// Only a single effective postcondition per function is represented
    /// here; multiple declared postconditions are expected to be conjoined
    /// upstream, before a `ConditionsProvider` ever produces this struct.
    pub post: Box<dyn Condition<'ctx> + 'ctx>,
    pub raises: HashSet<String>,
    pub sig: Signature,
    pub mutable_args: HashSet<String>,
}

impl<'ctx> FnConditions<'ctx> {
    /// Messages that can be produced without ever running the target, e.g.
    /// an unparsable condition expression. Collected up front so the
    /// analyzer can short-circuit straight to reporting them.
    pub fn syntax_messages(&self) -> Vec<AnalysisMessage> {
        Vec::new()
    }
}

pub struct ClassConditions<'ctx> {
    /// Shared (not owned) so the same invariant can be conjoined onto every
    /// method's pre/postcondition in `analyze_class` without requiring
    /// `Condition` itself to be `Clone`.
    pub invariants: Vec<Rc<dyn Condition<'ctx> + 'ctx>>,
    pub methods: Vec<(String, FnConditions<'ctx>)>,
}

/// Lets an `Rc<dyn Condition>` stand in anywhere a `Box<dyn Condition>` is
/// expected (e.g. pushed onto `FnConditions::pre`), so a class invariant can
/// be shared across every method it applies to.
impl<'ctx> Condition<'ctx> for Rc<dyn Condition<'ctx> + 'ctx> {
    fn evaluate(&self, bindings: &Bindings<'ctx>, space: &mut dyn StateSpace<'ctx>) -> ExecResult<bool> {
        (**self).evaluate(bindings, space)
    }
    fn filename(&self) -> &str {
        (**self).filename()
    }
    fn line(&self) -> u32 {
        (**self).line()
    }
    fn expr_source(&self) -> &str {
        (**self).expr_source()
    }
    fn addl_context(&self) -> Option<&str> {
        (**self).addl_context()
    }
}

pub trait ConditionsProvider<'ctx> {
    fn get_fn_conditions(&self, target: &dyn Target<'ctx>) -> ExecResult<FnConditions<'ctx>>;
    fn get_class_conditions(&self, class: &TypeName) -> ExecResult<ClassConditions<'ctx>>;
}

/// Disables/enables contract checking and the short-circuit interceptor
/// around a region of engine-internal code (the `framework()` scope in
/// `state_space.rs` is the mechanism; this trait is how the driver's
/// contracted-builtins layer finds out about it).
pub trait Enforcement<'ctx> {
    fn enabled_enforcement(&self) -> Box<dyn Drop + '_>;
    fn disabled_enforcement(&self) -> Box<dyn Drop + '_>;
}

/// Abstracts "a callable body plus a parameter-type list and name": the
/// core never executes host bytecode, it calls back into whatever runtime
/// the driver links in.
pub trait Target<'ctx> {
    fn name(&self) -> &str;
    fn signature(&self) -> &Signature;
    fn return_type(&self) -> &TypeName;

    /// Invokes the target body with already-synthesized bound arguments,
    /// returning its `__return__` value or propagating a `Signal::Raised`
    /// for a user exception. `args` is `&mut` so a body that mutates a
    /// declared-mutable parameter (the mutation audit step) can
    /// write its new value back into the binding the caller's mutation
    /// audit compares against — the same slot `args[i].1` started in, not a
    /// copy. `proxy_ctx` is the same context the Call Attempt used to
    /// synthesize `args`, handed to the body so a nested call site can
    /// short-circuit (`ShortCircuitContext::maybe_short_circuit` takes the
    /// identical parameter) and so an `object`-typed argument can be
    /// narrowed with `force_lazy` before the body reads through it.
    fn invoke(
        &self,
        args: &mut [(String, SymbolicValue<'ctx>)],
        space: &mut dyn StateSpace<'ctx>,
        proxy_ctx: &mut ProxyContext<'_, 'ctx, '_>,
    ) -> ExecResult<SymbolicValue<'ctx>>;
}

/// The constructor shape the Proxy Factory needs for concrete instantiation
/// of a user class: declared `__init__` parameter types, in order.
pub struct ClassShape {
    pub ctor_params: Signature,
}

/// Host-language reflection the Proxy Factory cannot do itself.
pub trait ClassCatalog<'ctx> {
    fn shape_of(&self, class: &TypeName) -> Option<ClassShape>;

    /// Invokes `class`'s constructor with synthesized arguments, completing
    /// the concrete-instantiation path. `Err` (for any reason —
    /// missing annotations, a raising constructor) signals the Proxy Factory
    /// to fall back to an opaque proxy.
    fn construct(
        &self,
        class: &TypeName,
        args: &[(String, SymbolicValue<'ctx>)],
        space: &mut dyn StateSpace<'ctx>,
    ) -> ExecResult<SymbolicValue<'ctx>>;
}

/// Reads a target's own source for the failure-site remapping step,
/// so the core never opens a file itself.
pub trait SourceLines {
    fn line_text(&self, filename: &str, line: u32) -> Option<String>;
}
