//! End-to-end runs of `analyze_function` through the public collaborator
//! traits only (`Target`, `ConditionsProvider`, `TypeCatalog`, `ClassCatalog`,
//! `Enforcement`, `SourceLines`) — no private engine internals touched.
//!
//! Each target's body and contracts are plain Rust `fn` pointers standing in
//! for what a real driver would read out of source and run through an
//! interpreter, the same stand-in `crates/verity-cli` uses.

use std::collections::HashSet;
use std::sync::OnceLock;
use std::time::{Duration, Instant};

use z3::ast::{Ast, Int};

use verity::{
    AnalysisOptions, Bindings, ClassCatalog, ClassConditions, ClassShape, Condition, ConditionsProvider, ContainerKind,
    Enforcement, ExecResult, FnConditions, PrimitiveKind, ProxyContext, Repr, Signal, Signature, SourceLines,
    StateSpace, SymbolicValue, Target, TypeCatalog, TypeName, TypeShape,
};

// =============================================================================
// 1. Shared harness
// =============================================================================

struct OneShotConditions {
    fc: fn() -> FnConditions<'static>,
}

impl<'ctx> ConditionsProvider<'ctx> for OneShotConditions {
    fn get_fn_conditions(&self, _target: &dyn Target<'ctx>) -> ExecResult<FnConditions<'ctx>> {
        Ok((self.fc)())
    }
    fn get_class_conditions(&self, _class: &TypeName) -> ExecResult<ClassConditions<'ctx>> {
        Err(Signal::Unsupported("this harness has no classes".to_string()))
    }
}

struct DemoCatalog;
impl TypeCatalog for DemoCatalog {
    fn bases_of(&self, _ty: &TypeName) -> Vec<TypeName> {
        Vec::new()
    }
    fn known_subclasses(&self, ty: &TypeName) -> Vec<TypeName> {
        vec![ty.clone()]
    }
    fn shape_of(&self, ty: &TypeName) -> TypeShape {
        match ty.as_str() {
            "builtins.int" => TypeShape::Primitive(PrimitiveKind::Int),
            "builtins.list" => TypeShape::Container(ContainerKind::Seq, vec!["builtins.int".to_string()]),
            _ => TypeShape::Object,
        }
    }
}

struct NoClasses;
impl<'ctx> ClassCatalog<'ctx> for NoClasses {
    fn shape_of(&self, _class: &TypeName) -> Option<ClassShape> {
        None
    }
    fn construct(&self, _class: &TypeName, _args: &[(String, SymbolicValue<'ctx>)], _space: &mut dyn StateSpace<'ctx>) -> ExecResult<SymbolicValue<'ctx>> {
        Err(Signal::Unsupported("this harness has no classes".to_string()))
    }
}

struct NoopGuard;
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

struct FnCondition {
    eval: for<'ctx> fn(&Bindings<'ctx>, &mut dyn StateSpace<'ctx>) -> ExecResult<bool>,
    line: u32,
    expr_source: &'static str,
}

impl<'ctx> Condition<'ctx> for FnCondition {
    fn evaluate(&self, bindings: &Bindings<'ctx>, space: &mut dyn StateSpace<'ctx>) -> ExecResult<bool> {
        (self.eval)(bindings, space)
    }
    fn filename(&self) -> &str {
        "demo.py"
    }
    fn line(&self) -> u32 {
        self.line
    }
    fn expr_source(&self) -> &str {
        self.expr_source
    }
}

struct FnTarget {
    name: &'static str,
    signature: Signature,
    return_type: TypeName,
    body: for<'ctx> fn(&mut [(String, SymbolicValue<'ctx>)], &mut dyn StateSpace<'ctx>) -> ExecResult<SymbolicValue<'ctx>>,
}

impl<'ctx> Target<'ctx> for FnTarget {
    fn name(&self) -> &str {
        self.name
    }
    fn signature(&self) -> &Signature {
        &self.signature
    }
    fn return_type(&self) -> &TypeName {
        &self.return_type
    }
    fn invoke(
        &self,
        args: &mut [(String, SymbolicValue<'ctx>)],
        space: &mut dyn StateSpace<'ctx>,
        _proxy_ctx: &mut ProxyContext<'_, 'ctx, '_>,
    ) -> ExecResult<SymbolicValue<'ctx>> {
        (self.body)(args, space)
    }
}

fn int_arg<'a, 'ctx>(args: &'a [(String, SymbolicValue<'ctx>)], name: &str) -> ExecResult<&'a Int<'ctx>> {
    args.iter()
        .find(|(n, _)| n == name)
        .and_then(|(_, v)| if let Repr::Int(i) = &v.repr { Some(i) } else { None })
        .ok_or_else(|| Signal::Internal(format!("missing int arg `{name}`")))
}

fn return_int<'ctx>(bindings: &Bindings<'ctx>) -> ExecResult<&Int<'ctx>> {
    match bindings.return_value.as_ref().map(|v| &v.repr) {
        Some(Repr::Int(i)) => Ok(i),
        _ => Err(Signal::Internal("no int return value".to_string())),
    }
}

fn run(target: &dyn Target<'static>, fc: fn() -> FnConditions<'static>) -> Vec<verity::AnalysisMessage> {
    let conditions = OneShotConditions { fc };
    let catalog = DemoCatalog;
    let classes = NoClasses;
    let enforcement = NoEnforcement;
    let source = NoSource;
    let options = AnalysisOptions {
        per_condition_timeout: Duration::from_secs(5),
        per_path_timeout: Duration::from_secs(5),
        deadline: Instant::now() + Duration::from_secs(10),
        max_iterations: 200,
        rng_seed: 1,
    };
    verity::analyze_function(target, &conditions, &catalog, &classes, &enforcement, &source, &options)
}

// =============================================================================
// 2. `max2(a, b) -> int`: correctly returns the larger argument
// =============================================================================

fn max2_invoke<'ctx>(args: &mut [(String, SymbolicValue<'ctx>)], space: &mut dyn StateSpace<'ctx>) -> ExecResult<SymbolicValue<'ctx>> {
    let a = int_arg(args, "a")?.clone();
    let b = int_arg(args, "b")?.clone();
    let a_is_bigger = space.choose_possible(&a.ge(&b), true)?;
    let result = if a_is_bigger { a } else { b };
    Ok(SymbolicValue::new("builtins.int", verity::Snapshot::default(), Repr::Int(result)))
}

fn max2_post<'ctx>(bindings: &Bindings<'ctx>, space: &mut dyn StateSpace<'ctx>) -> ExecResult<bool> {
    let ret = return_int(bindings)?;
    let a = int_arg(&bindings.params, "a")?;
    let b = int_arg(&bindings.params, "b")?;
    Ok(space.choose_possible(&ret.ge(a), true)? && space.choose_possible(&ret.ge(b), true)?)
}

fn max2_fc() -> FnConditions<'static> {
    FnConditions {
        pre: Vec::new(),
        post: Box::new(FnCondition { eval: max2_post, line: 1, expr_source: "_ >= a and _ >= b" }),
        raises: HashSet::new(),
        sig: vec![("a".to_string(), "builtins.int".to_string()), ("b".to_string(), "builtins.int".to_string())],
        mutable_args: HashSet::new(),
    }
}

fn max2_target() -> &'static dyn Target<'static> {
    static TARGET: OnceLock<FnTarget> = OnceLock::new();
    TARGET.get_or_init(|| FnTarget {
        name: "max2",
        signature: vec![("a".to_string(), "builtins.int".to_string()), ("b".to_string(), "builtins.int".to_string())],
        return_type: "builtins.int".to_string(),
        body: max2_invoke,
    })
}

/// A correct `max2` confirms on every path: no messages come back.
#[test]
fn max2_confirms_on_every_path() {
    let messages = run(max2_target(), max2_fc);
    assert!(messages.is_empty(), "expected max2 to confirm, got: {messages:?}");
}

// =============================================================================
// 3. `bad_max2(a, b) -> int`: always returns `a`, refuted when `b > a`
// =============================================================================

fn bad_max2_invoke<'ctx>(args: &mut [(String, SymbolicValue<'ctx>)], _space: &mut dyn StateSpace<'ctx>) -> ExecResult<SymbolicValue<'ctx>> {
    let a = int_arg(args, "a")?.clone();
    Ok(SymbolicValue::new("builtins.int", verity::Snapshot::default(), Repr::Int(a)))
}

fn bad_max2_fc() -> FnConditions<'static> {
    FnConditions {
        pre: Vec::new(),
        post: Box::new(FnCondition { eval: max2_post, line: 1, expr_source: "_ >= a and _ >= b" }),
        raises: HashSet::new(),
        sig: vec![("a".to_string(), "builtins.int".to_string()), ("b".to_string(), "builtins.int".to_string())],
        mutable_args: HashSet::new(),
    }
}

fn bad_max2_target() -> &'static dyn Target<'static> {
    static TARGET: OnceLock<FnTarget> = OnceLock::new();
    TARGET.get_or_init(|| FnTarget {
        name: "bad_max2",
        signature: vec![("a".to_string(), "builtins.int".to_string()), ("b".to_string(), "builtins.int".to_string())],
        return_type: "builtins.int".to_string(),
        body: bad_max2_invoke,
    })
}

/// A `max2` that ignores `b` is refuted with a concrete counterexample.
#[test]
fn bad_max2_is_refuted_with_a_postfail_message() {
    let messages = run(bad_max2_target(), bad_max2_fc);
    assert!(!messages.is_empty(), "expected bad_max2 to be refuted");
    assert!(messages.iter().any(|m| m.kind == verity::MessageKind::PostFail));
}
