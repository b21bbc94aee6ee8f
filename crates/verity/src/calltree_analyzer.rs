//! Drives repeated `CallAttempt`s over the shared [`SearchTree`] until it is
//! exhausted or a run-level deadline elapses.
//!
//! Tracks the deepest unsatisfied precondition seen across attempts so it
//! can report a single `PRE_UNSAT` message rather than one per path, and
//! bubbles each attempt's verdict into the tree before deciding whether to
//! iterate again.

use std::time::{Duration, Instant};

use crate::call_attempt::CallAttempt;
use crate::conditions::{ClassCatalog, ConditionsProvider, Enforcement, FnConditions, SourceLines, Target};
use crate::heap::Heap;
use crate::messages::{AnalysisMessage, MessageCollector, MessageKind};
use crate::proxy_factory::ProxyContext;
use crate::signal::Signal;
use crate::solver::Facade;
use crate::state_space::{SearchTree, Status, StateSpace, Tracking};
use crate::types_repo::{TypeCatalog, TypeRepo};
use crate::value::SymbolicValue;

/// The aggregate outcome of one `analyze` run.
#[derive(Debug, Clone)]
pub struct CalltreeAnalysis {
    pub verification_status: Status,
    pub messages: Vec<AnalysisMessage>,
    /// How many distinct paths reached a Confirmed verdict — surfaced so a
    /// driver can distinguish "exhaustively confirmed" from "gave up after
    /// confirming one path and running out of time", which `verification_status`
    /// alone collapses.
    pub num_confirmed_paths: usize,
}

/// Run-level knobs not fixed by the target's own conditions.
pub struct AnalyzeOptions {
    pub per_path_timeout: Duration,
    pub overall_deadline: Instant,
    pub rng_seed: u64,
    /// Hard cap on attempts, independent of `overall_deadline`, so a bug in
    /// the tree-exhaustion logic cannot spin forever.
    pub max_iterations: usize,
}

/// Collaborators the analyzer needs beyond `fc`/`target`, one run's worth.
pub struct AnalyzeContext<'a, 'ctx> {
    pub target: &'a dyn Target<'ctx>,
    pub fc: &'a FnConditions<'ctx>,
    pub catalog: &'a dyn TypeCatalog,
    pub classes: &'a dyn ClassCatalog<'ctx>,
    pub conditions: Option<&'a dyn ConditionsProvider<'ctx>>,
    pub enforcement: &'a dyn Enforcement<'ctx>,
    pub source: &'a dyn SourceLines,
}

/// Runs `ctx.target` against `ctx.fc` until the search tree is exhausted, the
/// overall deadline elapses, or `options.max_iterations` attempts have run.
/// A fresh [`Facade`]/[`TypeRepo`]/[`Heap`]/[`Tracking`] is built for every
/// attempt (solver.rs: "a fresh Facade is built for every StateSpace
/// iteration"), all sharing `zctx` so constants minted in one attempt don't
/// leak into the next attempt's assertions but the type enumeration and
/// proxy-construction machinery stay consistent.
pub fn analyze<'ctx>(zctx: &'ctx z3::Context, ctx: &AnalyzeContext<'_, 'ctx>, options: &AnalyzeOptions) -> CalltreeAnalysis {
    let mut tree = SearchTree::new();
    let mut collector = MessageCollector::new();
    let mut num_confirmed_paths = 0usize;
    let mut deepest_precondition: Option<(String, u32, Option<String>)> = None;
    let mut reached_body = false;

    for iteration in 0..options.max_iterations {
        if Instant::now() >= options.overall_deadline || tree.exhausted(SearchTree::ROOT) {
            break;
        }
        let facade = Facade::new(zctx, options.per_path_timeout);
        let mut types = TypeRepo::new(&facade);
        let mut heap: Heap<SymbolicValue<'ctx>> = Heap::new();
        let mut proxy_ctx = ProxyContext {
            facade: &facade,
            types: &mut types,
            catalog: ctx.catalog,
            classes: ctx.classes,
            heap: &mut heap,
            conditions: ctx.conditions,
        };
        let mut space = Tracking::new(&facade, &mut tree, options.per_path_timeout, options.rng_seed.wrapping_add(iteration as u64));
        let attempt = CallAttempt { target: ctx.target, conditions: ctx.fc, facade: &facade, enforcement: ctx.enforcement, source: ctx.source };

        match attempt.run(&mut space, &mut proxy_ctx) {
            Ok(analysis) => {
                if let Some((filename, line, reason)) = analysis.failing_precondition {
                    let deeper = match &deepest_precondition {
                        Some((_, l, _)) => line >= *l,
                        None => true,
                    };
                    if deeper {
                        deepest_precondition = Some((filename, line, reason));
                    }
                    // No verdict for this path: the tree node this attempt
                    // reached is left `Unknown` so a future attempt with a
                    // different precondition outcome can still resolve it.
                    continue;
                }
                reached_body = true;
                let status = analysis.verification_status.unwrap_or(Status::Unknown);
                if status == Status::Confirmed {
                    num_confirmed_paths += 1;
                }
                collector.extend(analysis.messages);
                let (_, exhausted) = space.bubble_status(status, None);
                if exhausted && status == Status::Refuted {
                    break;
                }
            }
            Err(Signal::UnexploredPath) => {
                space.bubble_status(Status::Unknown, None);
            }
            Err(Signal::IgnoreAttempt) => {
                // The current symbolic state was self-contradictory; drop
                // this attempt without recording a status and retry.
            }
            Err(Signal::Unsupported(detail)) => {
                // A feature this engine does not model: abort this path as
                // Unknown, but (unlike `UnexploredPath`) surface it so the
                // driver learns why the subtree never resolved.
                space.bubble_status(Status::Unknown, None);
                collector.push(AnalysisMessage {
                    kind: MessageKind::CannotConfirm,
                    text: format!("could not analyze this path: {detail}"),
                    filename: ctx.fc.post.filename().to_string(),
                    line: ctx.fc.post.line(),
                    column: 0,
                    traceback: Vec::new(),
                    test_fn: Some(ctx.target.name().to_string()),
                    condition_src: None,
                    execution_log: None,
                });
            }
            Err(other) => {
                panic!("internal engine error during analysis of `{}`: {other}", ctx.target.name());
            }
        }
    }

    if !reached_body {
        if let Some((filename, line, reason)) = deepest_precondition {
            let text = match reason {
                Some(r) => format!("could not confirm a precondition holds: {r}"),
                None => "could not find an input satisfying every precondition".to_string(),
            };
            collector.push(AnalysisMessage {
                kind: MessageKind::PreUnsat,
                text,
                filename,
                line,
                column: 0,
                traceback: Vec::new(),
                test_fn: Some(ctx.target.name().to_string()),
                condition_src: None,
                execution_log: None,
            });
        }
    }

    CalltreeAnalysis { verification_status: tree.status(SearchTree::ROOT), messages: collector.finish(), num_confirmed_paths }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::conditions::{Bindings, ClassShape, Condition, Signature};
    use crate::value::Repr;
    use std::collections::HashSet;

    struct AlwaysObjectCatalog;
    impl TypeCatalog for AlwaysObjectCatalog {
        fn bases_of(&self, _ty: &crate::types_repo::TypeName) -> Vec<crate::types_repo::TypeName> {
            Vec::new()
        }
        fn known_subclasses(&self, _ty: &crate::types_repo::TypeName) -> Vec<crate::types_repo::TypeName> {
            Vec::new()
        }
        fn shape_of(&self, ty: &crate::types_repo::TypeName) -> crate::types_repo::TypeShape {
            match ty.as_str() {
                "builtins.int" => crate::types_repo::TypeShape::Primitive(crate::types_repo::PrimitiveKind::Int),
                _ => crate::types_repo::TypeShape::Object,
            }
        }
    }

    struct NoClasses;
    impl<'ctx> ClassCatalog<'ctx> for NoClasses {
        fn shape_of(&self, _class: &crate::types_repo::TypeName) -> Option<ClassShape> {
            None
        }
        fn construct(
            &self,
            _class: &crate::types_repo::TypeName,
            _args: &[(String, SymbolicValue<'ctx>)],
            _space: &mut dyn StateSpace<'ctx>,
        ) -> crate::signal::ExecResult<SymbolicValue<'ctx>> {
            Err(Signal::Unsupported("no constructor".into()))
        }
    }

    struct NoopGuard;
    impl Drop for NoopGuard {
        fn drop(&mut self) {}
    }

    struct NoEnforcement;
    impl<'ctx> Enforcement<'ctx> for NoEnforcement {
        fn enabled_enforcement(&self) -> Box<dyn Drop + '_> {
            Box::new(NoopGuard)
        }
        fn disabled_enforcement(&self) -> Box<dyn Drop + '_> {
            Box::new(NoopGuard)
        }
    }

    struct NoSource;
    impl SourceLines for NoSource {
        fn line_text(&self, _filename: &str, _line: u32) -> Option<String> {
            None
        }
    }

    struct TrueCondition;
    impl<'ctx> Condition<'ctx> for TrueCondition {
        fn evaluate(&self, _bindings: &Bindings<'ctx>, _space: &mut dyn StateSpace<'ctx>) -> crate::signal::ExecResult<bool> {
            Ok(true)
        }
        fn filename(&self) -> &str {
            "t.py"
        }
        fn line(&self) -> u32 {
            1
        }
        fn expr_source(&self) -> &str {
            "True"
        }
    }

    /// `def identity(x: int) -> int: return x`, postcondition `_ == x`.
    struct ReturnsXUnchanged;
    impl<'ctx> Target<'ctx> for ReturnsXUnchanged {
        fn name(&self) -> &str {
            "identity"
        }
        fn signature(&self) -> &Signature {
            static SIG: std::sync::OnceLock<Signature> = std::sync::OnceLock::new();
            SIG.get_or_init(|| vec![("x".to_string(), "builtins.int".to_string())])
        }
        fn return_type(&self) -> &crate::types_repo::TypeName {
            static RET: std::sync::OnceLock<String> = std::sync::OnceLock::new();
            RET.get_or_init(|| "builtins.int".to_string())
        }
        fn invoke(
            &self,
            args: &mut [(String, SymbolicValue<'ctx>)],
            _space: &mut dyn StateSpace<'ctx>,
            _proxy_ctx: &mut ProxyContext<'_, 'ctx, '_>,
        ) -> crate::signal::ExecResult<SymbolicValue<'ctx>> {
            Ok(args[0].1.clone())
        }
    }

    struct EqualsXPostcondition;
    impl<'ctx> Condition<'ctx> for EqualsXPostcondition {
        fn evaluate(&self, bindings: &Bindings<'ctx>, _space: &mut dyn StateSpace<'ctx>) -> crate::signal::ExecResult<bool> {
            let Repr::Int(x) = &bindings.params[0].1.repr else { return Ok(false) };
            let Repr::Int(ret) = &bindings.return_value.as_ref().unwrap().repr else { return Ok(false) };
            Ok(format!("{x:?}") == format!("{ret:?}"))
        }
        fn filename(&self) -> &str {
            "t.py"
        }
        fn line(&self) -> u32 {
            2
        }
        fn expr_source(&self) -> &str {
            "_ == x"
        }
    }

    #[test]
    fn identity_function_confirms_on_every_path() {
        let cfg = Facade::default_config();
        let zctx = z3::Context::new(&cfg);
        let fc = FnConditions {
            pre: vec![Box::new(TrueCondition)],
            post: Box::new(EqualsXPostcondition),
            raises: HashSet::new(),
            sig: vec![("x".to_string(), "builtins.int".to_string())],
            mutable_args: HashSet::new(),
        };
        let target = ReturnsXUnchanged;
        let catalog = AlwaysObjectCatalog;
        let classes = NoClasses;
        let enforcement = NoEnforcement;
        let source = NoSource;
        let actx = AnalyzeContext { target: &target, fc: &fc, catalog: &catalog, classes: &classes, conditions: None, enforcement: &enforcement, source: &source };
        let options = AnalyzeOptions {
            per_path_timeout: Duration::from_secs(5),
            overall_deadline: Instant::now() + Duration::from_secs(10),
            rng_seed: 1,
            max_iterations: 20,
        };
        let result = analyze(&zctx, &actx, &options);
        assert_eq!(result.verification_status, Status::Confirmed);
        assert!(result.messages.is_empty());
        assert!(result.num_confirmed_paths >= 1);
    }
}
