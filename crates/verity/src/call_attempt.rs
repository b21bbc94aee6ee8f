//! One end-to-end symbolic evaluation of the target procedure:
//! argument synthesis, precondition filtering, body execution, mutation
//! audit, postcondition evaluation, with failure-site remapping folded in.

use std::collections::HashSet;
use std::rc::Rc;

use crate::conditions::{Bindings, Condition, Enforcement, FnConditions, Target};
use crate::exception_filter::{filter, FilterContext, Verdict};
use crate::messages::{describe_call, locate_message, AnalysisMessage, MessageKind};
use crate::proxy_factory::{proxy_for_type, ProxyContext};
use crate::signal::{ExecResult, Signal};
use crate::solver::Facade;
use crate::state_space::{Status, StateSpace};
use crate::value::{Repr, SymbolicValue};

/// `Call Analysis`: the outcome of one attempt.
#[derive(Debug, Clone)]
pub struct CallAnalysis {
    /// `None` when the attempt never reached a verdict — it failed on a
    /// precondition (see `failing_precondition`), which carries no status
    /// of its own.
    pub verification_status: Option<Status>,
    pub failing_precondition: Option<(String, u32)>,
    pub failing_precondition_reason: Option<String>,
    pub messages: Vec<AnalysisMessage>,
}

impl CallAnalysis {
    fn verdict(status: Status, messages: Vec<AnalysisMessage>) -> Self {
        Self { verification_status: Some(status), failing_precondition: None, failing_precondition_reason: None, messages }
    }

    fn failing_precondition(filename: String, line: u32, reason: Option<String>) -> Self {
        Self { verification_status: None, failing_precondition: Some((filename, line)), failing_precondition_reason: reason, messages: Vec::new() }
    }
}

/// Runs one attempt of `target` against its conditions `fc`, following the
/// usual six-step protocol. `space` drives forking (a fresh `Tracking` per analyzer
/// iteration, or a `Replay` for [`crate::replay`]).
pub struct CallAttempt<'a, 'ctx, 'f> {
    pub target: &'a dyn Target<'ctx>,
    pub conditions: &'a FnConditions<'ctx>,
    pub facade: &'f Facade<'ctx>,
    pub enforcement: &'a dyn Enforcement<'ctx>,
    pub source: &'a dyn crate::conditions::SourceLines,
}

impl<'a, 'ctx, 'f> CallAttempt<'a, 'ctx, 'f> {
    pub fn run(
        &self,
        space: &mut dyn StateSpace<'ctx>,
        proxy_ctx: &mut ProxyContext<'_, 'ctx, '_>,
    ) -> ExecResult<CallAnalysis> {
        // Step 1: synthesize bound arguments. Nothing can intercept this —
        // no contract has been evaluated yet and there is no nested call
        // site — so no `framework()` guard is needed here.
        let mut bound_args = Vec::with_capacity(self.conditions.sig.len());
        for (pname, pty) in &self.conditions.sig {
            let arg = proxy_for_type(proxy_ctx, space, pty, pname, true, true)?;
            bound_args.push((pname.clone(), arg));
        }

        // Step 2: deep-copy into `original_args` and checkpoint.
        proxy_ctx.heap.advance_snapshot();
        let original_args = bound_args.clone();
        let checkpoint = space.checkpoint();

        let filter_ctx = FilterContext {
            declared_raises: &self.conditions.raises,
            target_filename: self.target_filename(),
            target_line: self.target_line(),
        };

        // Step 3: preconditions.
        for pre in &self.conditions.pre {
            let bindings = Bindings { params: bound_args.clone(), return_value: None, old: None };
            let _enabled = self.enforcement.enabled_enforcement();
            match pre.evaluate(&bindings, space) {
                Ok(true) => continue,
                Ok(false) => {
                    space.restore(checkpoint);
                    return Ok(CallAnalysis::failing_precondition(pre.filename().to_string(), pre.line(), None));
                }
                Err(signal) => match filter(signal, &filter_ctx)? {
                    Verdict::Ignore => return Err(Signal::IgnoreAttempt),
                    Verdict::Confirmed => {
                        space.restore(checkpoint);
                        let reason = format!("raised a declared exception while evaluating `{}`", pre.expr_source());
                        return Ok(CallAnalysis::failing_precondition(pre.filename().to_string(), pre.line(), Some(reason)));
                    }
                    Verdict::Refuted(msg) => {
                        space.restore(checkpoint);
                        return Ok(CallAnalysis::failing_precondition(pre.filename().to_string(), pre.line(), Some(msg.text)));
                    }
                },
            }
        }

        // Step 4: invoke the body.
        let return_value = {
            let _enabled = self.enforcement.enabled_enforcement();
            match self.target.invoke(&mut bound_args, space, proxy_ctx) {
                Ok(v) => v,
                Err(signal) => match filter(signal, &filter_ctx)? {
                    Verdict::Confirmed => return Ok(CallAnalysis::verdict(Status::Confirmed, Vec::new())),
                    Verdict::Refuted(msg) => return Ok(CallAnalysis::verdict(Status::Refuted, vec![msg])),
                    Verdict::Ignore => return Err(Signal::IgnoreAttempt),
                },
            }
        };

        // Step 5: mutation audit.
        for ((pname, orig), (_, current)) in original_args.iter().zip(bound_args.iter()) {
            if self.conditions.mutable_args.contains(pname) {
                continue;
            }
            if !deep_equal(self.facade, orig, current, &mut HashSet::new())? {
                let text = format!(
                    "argument `{pname}` was mutated but is not declared mutable (was {orig:?}, now {current:?})"
                );
                let msg = AnalysisMessage {
                    kind: MessageKind::PostErr,
                    text,
                    filename: self.target_filename().to_string(),
                    line: self.target_line(),
                    column: 0,
                    traceback: Vec::new(),
                    test_fn: Some(self.target.name().to_string()),
                    condition_src: None,
                    execution_log: space.execution_log(),
                };
                return Ok(CallAnalysis::verdict(Status::Refuted, vec![msg]));
            }
        }

        // Step 6: postcondition.
        let post = &self.conditions.post;
        let bindings = Bindings { params: bound_args.clone(), return_value: Some(return_value.clone()), old: Some(original_args) };
        let _enabled = self.enforcement.enabled_enforcement();
        match post.evaluate(&bindings, space) {
            Ok(true) => Ok(CallAnalysis::verdict(Status::Confirmed, Vec::new())),
            Ok(false) => {
                let arg_strings: Vec<_> = bound_args.iter().map(|(n, v)| (n.clone(), format!("{v:?}"))).collect();
                let text = describe_call(self.target.name(), &arg_strings, Some(&format!("{return_value:?}")));
                let msg = locate_message(
                    MessageKind::PostFail,
                    &format!("{text}: postcondition `{}` failed", post.expr_source()),
                    self.target_filename(),
                    post.line(),
                    None,
                    Vec::new(),
                    self.source,
                );
                let mut msg = msg;
                msg.condition_src = Some(post.expr_source().to_string());
                msg.execution_log = space.execution_log();
                Ok(CallAnalysis::verdict(Status::Refuted, vec![msg]))
            }
            Err(signal) => match filter(signal, &filter_ctx)? {
                Verdict::Confirmed => Ok(CallAnalysis::verdict(Status::Confirmed, Vec::new())),
                Verdict::Refuted(mut msg) => {
                    msg.kind = MessageKind::PostErr;
                    msg.execution_log = space.execution_log();
                    Ok(CallAnalysis::verdict(Status::Refuted, vec![msg]))
                }
                Verdict::Ignore => Err(Signal::IgnoreAttempt),
            },
        }
    }

    fn target_filename(&self) -> &str {
        self.conditions.post.filename()
    }

    fn target_line(&self) -> u32 {
        self.conditions.post.line()
    }
}

/// Conjoins a function's own postcondition with its class's invariants
/// (used by `analyze_class`): an invariant is a promise that must still hold on
/// return, so a broken invariant is reported through the same `PostFail`
/// path a broken postcondition would be, short-circuiting on whichever
/// fails first.
pub struct AllOf<'ctx> {
    post: Box<dyn Condition<'ctx> + 'ctx>,
    invariants: Vec<Rc<dyn Condition<'ctx> + 'ctx>>,
    filename: String,
    line: u32,
}

impl<'ctx> AllOf<'ctx> {
    pub fn new(
        post: Box<dyn Condition<'ctx> + 'ctx>,
        invariants: Vec<Rc<dyn Condition<'ctx> + 'ctx>>,
        filename: String,
        line: u32,
    ) -> Self {
        Self { post, invariants, filename, line }
    }
}

impl<'ctx> Condition<'ctx> for AllOf<'ctx> {
    fn evaluate(&self, bindings: &Bindings<'ctx>, space: &mut dyn StateSpace<'ctx>) -> ExecResult<bool> {
        if !self.post.evaluate(bindings, space)? {
            return Ok(false);
        }
        for invariant in &self.invariants {
            if !invariant.evaluate(bindings, space)? {
                return Ok(false);
            }
        }
        Ok(true)
    }

    fn filename(&self) -> &str {
        &self.filename
    }

    fn line(&self) -> u32 {
        self.line
    }

    fn expr_source(&self) -> &str {
        self.post.expr_source()
    }
}

/// Structural equality under the current path's assertions: two symbolic
/// values are "equal" for the mutation audit if the solver cannot find a
/// model in which they differ. `visited` guards against runaway recursion
/// through `ProxyStruct` fields — true reference cycles cannot arise here
/// since proxy fields are owned, not heap-aliased, but the guard costs
/// nothing and keeps the shape correct for the general case.
fn deep_equal<'ctx>(
    facade: &Facade<'ctx>,
    a: &SymbolicValue<'ctx>,
    b: &SymbolicValue<'ctx>,
    visited: &mut HashSet<(usize, usize)>,
) -> ExecResult<bool> {
    use z3::ast::Ast;
    match (&a.repr, &b.repr) {
        (Repr::Bool(x), Repr::Bool(y)) => provably_equal(facade, &x._eq(y)),
        (Repr::Int(x), Repr::Int(y)) => provably_equal(facade, &x._eq(y)),
        (Repr::Float(x), Repr::Float(y)) => provably_equal(facade, &x._eq(y)),
        (Repr::Str(x), Repr::Str(y)) => provably_equal(facade, &x._eq(y)),
        (Repr::Seq(x), Repr::Seq(y)) | (Repr::UniformTuple(x), Repr::UniformTuple(y)) => {
            let len_eq = provably_equal(facade, &(&x.stop - &x.start)._eq(&(&y.stop - &y.start)))?;
            Ok(len_eq && provably_equal(facade, &x.base._eq(&y.base))?)
        }
        (Repr::Dict(x), Repr::Dict(y)) | (Repr::Set(x), Repr::Set(y)) | (Repr::FrozenSet(x), Repr::FrozenSet(y)) => {
            let len_eq = provably_equal(facade, &x.length._eq(&y.length))?;
            Ok(len_eq && provably_equal(facade, &x.array._eq(&y.array))?)
        }
        // A callable's identity is its declaration, not any state it closes
        // over (the engine never models closures); nothing about a
        // `Callable` value can be mutated, so two callables are always
        // equal for audit purposes.
        (Repr::Callable(_), Repr::Callable(_)) => Ok(true),
        (Repr::TypeVal(x), Repr::TypeVal(y)) => Ok(x.cap == y.cap && provably_equal(facade, &x.ordinal._eq(&y.ordinal))?),
        (Repr::LazyObject(x), Repr::LazyObject(y)) => Ok(x.varname == y.varname && x.typeval.cap == y.typeval.cap),
        (Repr::ProxyStruct(x), Repr::ProxyStruct(y)) => {
            let key = (std::ptr::addr_of!(**x) as usize, std::ptr::addr_of!(**y) as usize);
            if !visited.insert(key) {
                return Ok(true);
            }
            if x.class != y.class || x.fields.len() != y.fields.len() {
                return Ok(false);
            }
            for (field, xv) in &x.fields {
                let Some(yv) = y.fields.get(field) else { return Ok(false) };
                if !deep_equal(facade, xv, yv, visited)? {
                    return Ok(false);
                }
            }
            Ok(true)
        }
        // Different variants: the value's own dynamic shape changed, which
        // can only happen by way of a lazy object being forced in place —
        // always a mutation as far as the audit is concerned.
        _ => Ok(false),
    }
}

/// Whether `eq` holds in every model consistent with the solver's current
/// assertions: `eq`'s negation must be unsatisfiable. A solver timeout
/// (`Unknown`) is treated conservatively as "not provably equal", so the
/// audit flags a possible mutation rather than silently missing one.
fn provably_equal<'ctx>(facade: &Facade<'ctx>, eq: &z3::ast::Bool<'ctx>) -> ExecResult<bool> {
    use z3::ast::Ast;
    Ok(facade.check_sat_assuming(&eq.not()) == z3::SatResult::Unsat)
}
