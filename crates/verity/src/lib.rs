//! A contract-directed symbolic execution engine: given a target's signature,
//! its pre/postconditions, and a way to run its body, searches for an input
//! that either confirms the postcondition holds on every reachable path or
//! refutes it with a concrete counterexample.
//!
//! The core never parses source, never executes host bytecode, and never
//! owns a CLI or server — all three are collaborator concerns the driver
//! supplies through the traits in `conditions.rs`. `crates/verity-cli`
//! wires a minimal illustrative driver together purely to demonstrate that
//! wiring; a real condition parser and enforcement layer are out of scope.

mod call_attempt;
mod calltree_analyzer;
mod conditions;
mod container_ops;
mod dispatch;
mod exception_filter;
mod heap;
mod messages;
mod proxy_factory;
mod short_circuit;
mod signal;
mod solver;
mod state_space;
mod types_repo;
mod value;

use std::time::{Duration, Instant};

pub use crate::call_attempt::CallAnalysis;
pub use crate::container_ops::{
    dict_contains, dict_del, dict_get, dict_iter_next, dict_set, seq_index, seq_slice, set_add, set_contains,
    set_iter_next, set_remove, DictIterStep,
};
pub use crate::conditions::{
    Bindings, ClassCatalog, ClassConditions, ClassShape, Condition, ConditionsProvider, Enforcement, FnConditions,
    Signature, SourceLines, Target,
};
pub use crate::dispatch::DispatchTable;
pub use crate::heap::{Heap, HeapRef, ObjectIdentity, Snapshot};
pub use crate::messages::{
    decode_execution_log, describe_call, encode_execution_log, locate_message, messages_to_json, AnalysisMessage,
    MessageCollector, MessageKind,
};
pub use crate::short_circuit::{CalleeShape, Decision as ShortCircuitDecision, ShortCircuitContext};
pub use crate::signal::{ExecResult, Frame, Raised, Signal};
pub use crate::state_space::{Replay, SearchTree, Status, StateSpace, Tracking};
pub use crate::types_repo::{ContainerKind, PrimitiveKind, TypeCatalog, TypeName, TypeRepo, TypeShape};
pub use crate::value::{floor_div, ContainerRepr, DictShape, LazyObject, ProxyStruct, Repr, SeqView, SymbolicValue, TypeVal};
pub use crate::state_space::normalize_index;
pub use crate::proxy_factory::{force_lazy, proxy_for_type, ProxyContext};

use crate::call_attempt::CallAttempt;
use crate::calltree_analyzer::{analyze, AnalyzeContext, AnalyzeOptions};
use crate::solver::Facade;

/// Run-level knobs a driver supplies for one `analyze_function`/
/// `analyze_class`/`analyze_module` call.
pub struct AnalysisOptions {
    /// Upper bound on evaluating a single condition. Not separately
    /// enforced: every condition already runs inside one path's solver
    /// session, which `per_path_timeout` already bounds end to end. A
    /// distinct per-condition watchdog would catch a single pathological
    /// contract expression, but this field is folded into the path budget
    /// rather than threading a second clock through `Condition::evaluate`.
    pub per_condition_timeout: Duration,
    pub per_path_timeout: Duration,
    pub deadline: Instant,
    /// Hard cap on attempts per target, independent of `deadline`.
    pub max_iterations: usize,
    pub rng_seed: u64,
}

impl AnalysisOptions {
    fn to_analyze_options(&self) -> AnalyzeOptions {
        AnalyzeOptions {
            per_path_timeout: self.per_path_timeout,
            overall_deadline: self.deadline,
            rng_seed: self.rng_seed,
            max_iterations: self.max_iterations,
        }
    }
}

/// Runs the full analyzer loop over one function target.
///
/// Builds its own `z3::Context` for the run: unlike `replay`, which
/// reproduces one already-known path, a fresh analyzer run has no caller to
/// share a context with.
pub fn analyze_function<'ctx>(
    target: &dyn Target<'ctx>,
    conditions: &dyn ConditionsProvider<'ctx>,
    catalog: &dyn TypeCatalog,
    classes: &dyn ClassCatalog<'ctx>,
    enforcement: &dyn Enforcement<'ctx>,
    source: &dyn SourceLines,
    options: &AnalysisOptions,
) -> Vec<AnalysisMessage> {
    let fc = match conditions.get_fn_conditions(target) {
        Ok(fc) => fc,
        Err(signal) => return vec![syntax_message(target.name(), &signal)],
    };
    let syntax = fc.syntax_messages();
    if !syntax.is_empty() {
        return syntax;
    }
    let cfg = Facade::default_config();
    let zctx = z3::Context::new(&cfg);
    let actx = AnalyzeContext { target, fc: &fc, catalog, classes, conditions: Some(conditions), enforcement, source };
    analyze(&zctx, &actx, &options.to_analyze_options()).messages
}

/// Runs every declared method of `class` with its invariants conjoined onto
/// each method's pre- and postcondition: an invariant is a promise
/// that must hold both when a method is entered and when it returns, so a
/// broken invariant is reported the same way a broken postcondition is.
///
/// `methods` pairs each method's own `Target` (the driver's only way to
/// invoke it) with the method name `get_class_conditions` filed its
/// `FnConditions` under.
pub fn analyze_class<'ctx>(
    class: &TypeName,
    methods: &[(&str, &dyn Target<'ctx>)],
    conditions: &dyn ConditionsProvider<'ctx>,
    catalog: &dyn TypeCatalog,
    classes: &dyn ClassCatalog<'ctx>,
    enforcement: &dyn Enforcement<'ctx>,
    source: &dyn SourceLines,
    options: &AnalysisOptions,
) -> Vec<AnalysisMessage> {
    let class_conditions = match conditions.get_class_conditions(class) {
        Ok(cc) => cc,
        Err(signal) => return vec![syntax_message(class, &signal)],
    };
    let crate::conditions::ClassConditions { invariants, methods: mut method_conditions } = class_conditions;
    let mut out = Vec::new();
    for (method_name, target) in methods {
        let Some(pos) = method_conditions.iter().position(|(n, _)| n == method_name) else {
            continue;
        };
        let (_, mut fc) = method_conditions.remove(pos);
        for invariant in &invariants {
            fc.pre.push(Box::new(invariant.clone()));
        }
        if !invariants.is_empty() {
            let filename = fc.post.filename().to_string();
            let line = fc.post.line();
            fc.post = Box::new(call_attempt::AllOf::new(fc.post, invariants.clone(), filename, line));
        }
        let cfg = Facade::default_config();
        let zctx = z3::Context::new(&cfg);
        let actx =
            AnalyzeContext { target: *target, fc: &fc, catalog, classes, conditions: Some(conditions), enforcement, source };
        out.extend(analyze(&zctx, &actx, &options.to_analyze_options()).messages);
    }
    out
}

/// Analyzes every function target in `functions` independently:
/// module-level analysis is just per-function analysis run over the whole
/// list, since nothing in this model couples one function's paths to
/// another's.
pub fn analyze_module<'ctx>(
    functions: &[&dyn Target<'ctx>],
    conditions: &dyn ConditionsProvider<'ctx>,
    catalog: &dyn TypeCatalog,
    classes: &dyn ClassCatalog<'ctx>,
    enforcement: &dyn Enforcement<'ctx>,
    source: &dyn SourceLines,
    options: &AnalysisOptions,
) -> Vec<AnalysisMessage> {
    let mut out = Vec::new();
    for target in functions {
        out.extend(analyze_function(*target, conditions, catalog, classes, enforcement, source, options));
    }
    out
}

/// Reproduces one path deterministically from a recorded `execution_log`:
/// replays the same fork choices a `Tracking` run made rather than
/// re-exploring the tree.
pub fn replay<'ctx>(
    target: &dyn Target<'ctx>,
    message: &AnalysisMessage,
    fc: &FnConditions<'ctx>,
    catalog: &dyn TypeCatalog,
    classes: &dyn ClassCatalog<'ctx>,
    enforcement: &dyn Enforcement<'ctx>,
    source: &dyn SourceLines,
    zctx: &'ctx z3::Context,
    per_path_timeout: Duration,
) -> ExecResult<CallAnalysis> {
    let log = message
        .execution_log
        .clone()
        .ok_or_else(|| Signal::Unsupported("message carries no execution log to replay".to_string()))?;
    let facade = Facade::new(zctx, per_path_timeout);
    let mut types = TypeRepo::new(&facade);
    let mut heap: Heap<SymbolicValue<'ctx>> = Heap::new();
    let mut proxy_ctx =
        proxy_factory::ProxyContext { facade: &facade, types: &mut types, catalog, classes, heap: &mut heap, conditions: None };
    let mut space = Replay::new(&facade, per_path_timeout, log);
    let attempt = CallAttempt { target, conditions: fc, facade: &facade, enforcement, source };
    attempt.run(&mut space, &mut proxy_ctx)
}

fn syntax_message(target_name: &str, signal: &Signal) -> AnalysisMessage {
    AnalysisMessage {
        kind: MessageKind::Syntax,
        text: format!("could not read conditions for `{target_name}`: {signal}"),
        filename: String::new(),
        line: 0,
        column: 0,
        traceback: Vec::new(),
        test_fn: Some(target_name.to_string()),
        condition_src: None,
        execution_log: None,
    }
}
