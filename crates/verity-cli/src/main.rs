//! A minimal illustrative driver for `verity`: wires up its collaborator
//! traits (`Target`, `ConditionsProvider`, `TypeCatalog`, `ClassCatalog`,
//! `Enforcement`, `SourceLines`) against a handful of hand-coded functions
//! and runs `analyze_function` over each, printing the outcome. There is no
//! condition parser or real host-language runtime here — every target's
//! body and contracts are Rust closures standing in for what a real driver
//! would read out of source and execute through an interpreter.
//!
//! Run with no arguments to analyze every built-in scenario, or pass one
//! scenario name (`succ`, `square`, `head`, `head_unchecked`, `upsert`,
//! `upsert_unsound`, `div`, `div_unchecked`, `floordiv`, `narrow`) to run just
//! that one. Pass `--json` anywhere in the arguments to print the collected
//! messages as indented JSON instead of the default one-line-per-message text
//! summary.
//!
//! `square`'s postcondition `_ >= x` actually holds for every integer (there
//! is no `x` with `x*x < x`), so that scenario is expected to confirm.

use std::collections::HashSet;
use std::env;
use std::process::ExitCode;
use std::sync::OnceLock;
use std::time::{Duration, Instant};

use z3::ast::{Ast, Bool, Dynamic, Int, Real, String as Z3Str};

use verity::{
    dict_get, dict_set, floor_div, force_lazy, messages_to_json, seq_index, AnalysisMessage, AnalysisOptions,
    Bindings, ClassCatalog, ClassShape, Condition, ClassConditions, ConditionsProvider, ContainerKind, ContainerRepr,
    DictShape, Enforcement, ExecResult, FnConditions, PrimitiveKind, ProxyContext, Raised, Repr, SeqView, Signal,
    Signature, SourceLines, SymbolicValue, Target, TypeCatalog, TypeName, TypeShape,
};

fn main() -> ExitCode {
    let mut requested: Vec<String> = Vec::new();
    let mut as_json = false;
    for arg in env::args().skip(1) {
        if arg == "--json" {
            as_json = true;
        } else {
            requested.push(arg);
        }
    }
    let scenarios = all_scenarios();
    let selected: Vec<_> = if requested.is_empty() {
        scenarios.iter().collect()
    } else {
        scenarios.iter().filter(|s| requested.contains(&s.name.to_string())).collect()
    };
    if selected.is_empty() {
        eprintln!("no matching scenario; known scenarios: {}", scenarios.iter().map(|s| s.name).collect::<Vec<_>>().join(", "));
        return ExitCode::FAILURE;
    }

    let mut any_unexpected = false;
    for scenario in selected {
        let messages = run_scenario(scenario);
        let verdict = if messages.is_empty() { "confirmed".to_string() } else { format!("refuted ({} message(s))", messages.len()) };
        if as_json {
            println!("{}: {verdict}", scenario.name);
            match messages_to_json(&messages) {
                Ok(json) => println!("{json}"),
                Err(err) => eprintln!("  could not render messages as JSON: {err}"),
            }
        } else {
            println!("{}: {verdict}", scenario.name);
            for msg in &messages {
                println!("  {}: {}", msg.kind, msg.text);
            }
        }
        if (verdict == "confirmed") != scenario.expect_confirmed {
            eprintln!("  unexpected: wanted confirmed={}, got confirmed={}", scenario.expect_confirmed, verdict == "confirmed");
            any_unexpected = true;
        }
    }
    if any_unexpected { ExitCode::FAILURE } else { ExitCode::SUCCESS }
}

struct Scenario {
    name: &'static str,
    target: &'static dyn Target<'static>,
    fc: fn() -> FnConditions<'static>,
    expect_confirmed: bool,
}

fn run_scenario(scenario: &Scenario) -> Vec<AnalysisMessage> {
    let conditions = OneShotConditions { fc: scenario.fc };
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
    verity::analyze_function(scenario.target, &conditions, &catalog, &classes, &enforcement, &source, &options)
}

/// Every target's conditions are rebuilt fresh per attempt (`fc` is a plain
/// `fn` pointer, not a captured closure) since `FnConditions` borrows the
/// analyzer's own `z3::Context`, which does not exist until
/// `analyze_function` creates it.
struct OneShotConditions {
    fc: fn() -> FnConditions<'static>,
}

impl<'ctx> ConditionsProvider<'ctx> for OneShotConditions {
    fn get_fn_conditions(&self, _target: &dyn Target<'ctx>) -> ExecResult<FnConditions<'ctx>> {
        // SAFETY-free transmute-free trick: `FnConditions<'static>` can stand
        // in for any shorter `'ctx` because every `Condition` and `TypeName`
        // it holds is itself either `'static` data (fn pointers, owned
        // `String`s) or generic over the same analyzer-chosen lifetime, so
        // the compiler accepts it directly — no unsafe cast needed.
        Ok((self.fc)())
    }

    fn get_class_conditions(&self, _class: &TypeName) -> ExecResult<ClassConditions<'ctx>> {
        Err(Signal::Unsupported("this driver has no classes".to_string()))
    }
}

struct DemoCatalog;
impl TypeCatalog for DemoCatalog {
    fn bases_of(&self, _ty: &TypeName) -> Vec<TypeName> {
        Vec::new()
    }
    fn shape_of(&self, ty: &TypeName) -> TypeShape {
        match ty.as_str() {
            "builtins.int" => TypeShape::Primitive(PrimitiveKind::Int),
            "builtins.float" => TypeShape::Primitive(PrimitiveKind::Float),
            "builtins.str" => TypeShape::Primitive(PrimitiveKind::Str),
            "builtins.bool" => TypeShape::Primitive(PrimitiveKind::Bool),
            "builtins.list" => TypeShape::Container(ContainerKind::Seq, vec!["builtins.int".to_string()]),
            "builtins.dict" => TypeShape::Container(ContainerKind::Dict, vec!["builtins.str".to_string(), "builtins.int".to_string()]),
            "demo.Dog" => TypeShape::Class("demo.Dog".to_string()),
            "demo.Cat" => TypeShape::Class("demo.Cat".to_string()),
            _ => TypeShape::Object,
        }
    }
    fn known_subclasses(&self, ty: &TypeName) -> Vec<TypeName> {
        match ty.as_str() {
            "demo.Animal" => vec!["demo.Dog".to_string(), "demo.Cat".to_string()],
            _ => vec![ty.clone()],
        }
    }
}

struct NoClasses;
impl<'ctx> ClassCatalog<'ctx> for NoClasses {
    fn shape_of(&self, _class: &TypeName) -> Option<ClassShape> {
        None
    }
    fn construct(&self, _class: &TypeName, _args: &[(String, SymbolicValue<'ctx>)], _space: &mut dyn verity::StateSpace<'ctx>) -> ExecResult<SymbolicValue<'ctx>> {
        Err(Signal::Unsupported("this driver has no classes".to_string()))
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

/// A condition backed by a plain `fn` pointer rather than a closure, so one
/// concrete Rust type can implement `Condition<'ctx>` for every `'ctx` the
/// analyzer happens to create its context with (the target functions below
/// are all declared the same way, for the same reason).
struct FnCondition {
    eval: for<'ctx> fn(&Bindings<'ctx>, &mut dyn verity::StateSpace<'ctx>) -> ExecResult<bool>,
    line: u32,
    expr_source: &'static str,
}

impl<'ctx> Condition<'ctx> for FnCondition {
    fn evaluate(&self, bindings: &Bindings<'ctx>, space: &mut dyn verity::StateSpace<'ctx>) -> ExecResult<bool> {
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
    body: for<'ctx> fn(
        &mut [(String, SymbolicValue<'ctx>)],
        &mut dyn verity::StateSpace<'ctx>,
        &mut ProxyContext<'_, 'ctx, '_>,
    ) -> ExecResult<SymbolicValue<'ctx>>,
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
        space: &mut dyn verity::StateSpace<'ctx>,
        proxy_ctx: &mut ProxyContext<'_, 'ctx, '_>,
    ) -> ExecResult<SymbolicValue<'ctx>> {
        (self.body)(args, space, proxy_ctx)
    }
}

fn int_arg<'a, 'ctx>(args: &'a [(String, SymbolicValue<'ctx>)], name: &str) -> ExecResult<&'a Int<'ctx>> {
    args.iter()
        .find(|(n, _)| n == name)
        .and_then(|(_, v)| if let Repr::Int(i) = &v.repr { Some(i) } else { None })
        .ok_or_else(|| Signal::Internal(format!("missing int arg `{name}`")))
}

fn str_arg<'a, 'ctx>(args: &'a [(String, SymbolicValue<'ctx>)], name: &str) -> ExecResult<&'a Z3Str<'ctx>> {
    args.iter()
        .find(|(n, _)| n == name)
        .and_then(|(_, v)| if let Repr::Str(s) = &v.repr { Some(s) } else { None })
        .ok_or_else(|| Signal::Internal(format!("missing str arg `{name}`")))
}

fn seq_arg<'a, 'ctx>(args: &'a [(String, SymbolicValue<'ctx>)], name: &str) -> ExecResult<&'a SeqView<'ctx>> {
    args.iter()
        .find(|(n, _)| n == name)
        .and_then(|(_, v)| if let Repr::Seq(s) = &v.repr { Some(s) } else { None })
        .ok_or_else(|| Signal::Internal(format!("missing seq arg `{name}`")))
}

fn dict_arg<'a, 'ctx>(args: &'a [(String, SymbolicValue<'ctx>)], name: &str) -> ExecResult<&'a ContainerRepr<'ctx>> {
    args.iter()
        .find(|(n, _)| n == name)
        .and_then(|(_, v)| if let Repr::Dict(d) = &v.repr { Some(d) } else { None })
        .ok_or_else(|| Signal::Internal(format!("missing dict arg `{name}`")))
}

fn return_int<'ctx>(bindings: &Bindings<'ctx>) -> ExecResult<&Int<'ctx>> {
    match bindings.return_value.as_ref().map(|v| &v.repr) {
        Some(Repr::Int(i)) => Ok(i),
        _ => Err(Signal::Internal("no int return value".to_string())),
    }
}

// --- scenario 1: `def succ(x: int) -> int: return x + 1` post `_ > x` -----

fn succ_invoke<'ctx>(
    args: &mut [(String, SymbolicValue<'ctx>)],
    _space: &mut dyn verity::StateSpace<'ctx>,
    _proxy_ctx: &mut ProxyContext<'_, 'ctx, '_>,
) -> ExecResult<SymbolicValue<'ctx>> {
    let x = int_arg(args, "x")?.clone();
    let one = Int::from_i64(x.get_ctx(), 1);
    Ok(SymbolicValue::new("builtins.int", verity::Snapshot::default(), Repr::Int(&x + &one)))
}

fn succ_post<'ctx>(bindings: &Bindings<'ctx>, space: &mut dyn verity::StateSpace<'ctx>) -> ExecResult<bool> {
    let ret = return_int(bindings)?;
    let x = int_arg(&bindings.params, "x")?;
    space.choose_possible(&ret.gt(x), true)
}

fn succ_fc() -> FnConditions<'static> {
    FnConditions {
        pre: Vec::new(),
        post: Box::new(FnCondition { eval: succ_post, line: 1, expr_source: "_ > x" }),
        raises: HashSet::new(),
        sig: vec![("x".to_string(), "builtins.int".to_string())],
        mutable_args: HashSet::new(),
    }
}

fn succ_target() -> &'static dyn Target<'static> {
    static TARGET: OnceLock<FnTarget> = OnceLock::new();
    TARGET.get_or_init(|| FnTarget { name: "succ", signature: vec![("x".to_string(), "builtins.int".to_string())], return_type: "builtins.int".to_string(), body: succ_invoke })
}

// --- scenario 2: `def square(x: int) -> int: return x * x` post `_ >= x` --

fn square_invoke<'ctx>(
    args: &mut [(String, SymbolicValue<'ctx>)],
    _space: &mut dyn verity::StateSpace<'ctx>,
    _proxy_ctx: &mut ProxyContext<'_, 'ctx, '_>,
) -> ExecResult<SymbolicValue<'ctx>> {
    let x = int_arg(args, "x")?.clone();
    Ok(SymbolicValue::new("builtins.int", verity::Snapshot::default(), Repr::Int(&x * &x)))
}

fn square_post<'ctx>(bindings: &Bindings<'ctx>, space: &mut dyn verity::StateSpace<'ctx>) -> ExecResult<bool> {
    let ret = return_int(bindings)?;
    let x = int_arg(&bindings.params, "x")?;
    space.choose_possible(&ret.ge(x), true)
}

fn square_fc() -> FnConditions<'static> {
    FnConditions {
        pre: Vec::new(),
        post: Box::new(FnCondition { eval: square_post, line: 1, expr_source: "_ >= x" }),
        raises: HashSet::new(),
        sig: vec![("x".to_string(), "builtins.int".to_string())],
        mutable_args: HashSet::new(),
    }
}

fn square_target() -> &'static dyn Target<'static> {
    static TARGET: OnceLock<FnTarget> = OnceLock::new();
    TARGET.get_or_init(|| FnTarget { name: "square", signature: vec![("x".to_string(), "builtins.int".to_string())], return_type: "builtins.int".to_string(), body: square_invoke })
}

// --- scenario 3: `def head(xs: list) -> object: return xs[0]` ------------

fn head_invoke<'ctx>(
    args: &mut [(String, SymbolicValue<'ctx>)],
    space: &mut dyn verity::StateSpace<'ctx>,
    _proxy_ctx: &mut ProxyContext<'_, 'ctx, '_>,
) -> ExecResult<SymbolicValue<'ctx>> {
    let view = seq_arg(args, "xs")?.clone();
    let zctx = view.start.get_ctx();
    let zero = Int::from_i64(zctx, 0);
    let elem = seq_index(space, zctx, &view, &zero)?;
    let elem_int = elem.as_int().ok_or_else(|| Signal::Internal("head element was not an int".to_string()))?;
    Ok(SymbolicValue::new("builtins.object", verity::Snapshot::default(), Repr::Int(elem_int)))
}

fn head_pre<'ctx>(bindings: &Bindings<'ctx>, space: &mut dyn verity::StateSpace<'ctx>) -> ExecResult<bool> {
    let view = seq_arg(&bindings.params, "xs")?;
    let len = &view.stop - &view.start;
    let zero = Int::from_i64(view.start.get_ctx(), 0);
    space.choose_possible(&len.gt(&zero), true)
}

fn head_fc(with_precondition: bool) -> FnConditions<'static> {
    let pre: Vec<Box<dyn Condition<'static>>> =
        if with_precondition { vec![Box::new(FnCondition { eval: head_pre, line: 1, expr_source: "len(xs) > 0" })] } else { Vec::new() };
    FnConditions {
        pre,
        post: Box::new(FnCondition { eval: |_, _| Ok(true), line: 2, expr_source: "True" }),
        raises: HashSet::new(),
        sig: vec![("xs".to_string(), "builtins.list".to_string())],
        mutable_args: HashSet::new(),
    }
}

fn head_checked_fc() -> FnConditions<'static> {
    head_fc(true)
}

fn head_unchecked_fc() -> FnConditions<'static> {
    head_fc(false)
}

fn head_target() -> &'static dyn Target<'static> {
    static TARGET: OnceLock<FnTarget> = OnceLock::new();
    TARGET.get_or_init(|| FnTarget { name: "head", signature: vec![("xs".to_string(), "builtins.list".to_string())], return_type: "builtins.object".to_string(), body: head_invoke })
}

// --- scenario 4: `def upsert(d, k, v): d[k] = v`, mutable_args = {d} -----

fn upsert_invoke<'ctx>(
    args: &mut [(String, SymbolicValue<'ctx>)],
    _space: &mut dyn verity::StateSpace<'ctx>,
    _proxy_ctx: &mut ProxyContext<'_, 'ctx, '_>,
) -> ExecResult<SymbolicValue<'ctx>> {
    let key: Dynamic<'ctx> = str_arg(args, "k")?.clone().into();
    let value: Dynamic<'ctx> = int_arg(args, "v")?.clone().into();
    let dict = dict_arg(args, "d")?.clone();
    let zctx = dict.length.get_ctx();
    let updated = dict_set(zctx, &dict, &key, &value)?;
    let d_idx = args.iter().position(|(n, _)| n == "d").expect("d present, just read above");
    let ty = args[d_idx].1.ty.clone();
    let snapshot = args[d_idx].1.snapshot;
    args[d_idx].1 = SymbolicValue::new(ty, snapshot, Repr::Dict(updated));
    Ok(SymbolicValue::new("builtins.NoneType", verity::Snapshot::default(), Repr::Bool(Bool::from_bool(zctx, true))))
}

fn upsert_post<'ctx>(bindings: &Bindings<'ctx>, space: &mut dyn verity::StateSpace<'ctx>) -> ExecResult<bool> {
    let d = dict_arg(&bindings.params, "d")?;
    let key: Dynamic<'ctx> = str_arg(&bindings.params, "k")?.clone().into();
    let v = int_arg(&bindings.params, "v")?;
    let got = dict_get(space, d, &key)?;
    let got_int = got.as_int().ok_or_else(|| Signal::Internal("dict value was not an int".to_string()))?;
    space.choose_possible(&got_int._eq(v), true)
}

fn upsert_fc(mutable: bool) -> FnConditions<'static> {
    let mut mutable_args = HashSet::new();
    if mutable {
        mutable_args.insert("d".to_string());
    }
    FnConditions {
        pre: Vec::new(),
        post: Box::new(FnCondition { eval: upsert_post, line: 1, expr_source: "d[k] == v" }),
        raises: HashSet::new(),
        sig: vec![("d".to_string(), "builtins.dict".to_string()), ("k".to_string(), "builtins.str".to_string()), ("v".to_string(), "builtins.int".to_string())],
        mutable_args,
    }
}

fn upsert_sound_fc() -> FnConditions<'static> {
    upsert_fc(true)
}

fn upsert_unsound_fc() -> FnConditions<'static> {
    upsert_fc(false)
}

fn upsert_target() -> &'static dyn Target<'static> {
    static TARGET: OnceLock<FnTarget> = OnceLock::new();
    TARGET.get_or_init(|| FnTarget {
        name: "upsert",
        signature: vec![("d".to_string(), "builtins.dict".to_string()), ("k".to_string(), "builtins.str".to_string()), ("v".to_string(), "builtins.int".to_string())],
        return_type: "builtins.NoneType".to_string(),
        body: upsert_invoke,
    })
}

// --- scenario 5: `def div(a: int, b: int) -> float: return a / b` --------

fn div_invoke<'ctx>(
    args: &mut [(String, SymbolicValue<'ctx>)],
    space: &mut dyn verity::StateSpace<'ctx>,
    _proxy_ctx: &mut ProxyContext<'_, 'ctx, '_>,
) -> ExecResult<SymbolicValue<'ctx>> {
    let a = int_arg(args, "a")?.clone();
    let b = int_arg(args, "b")?.clone();
    let zero = Int::from_i64(b.get_ctx(), 0);
    if space.choose_possible(&b._eq(&zero), false)? {
        return Err(Signal::Raised(Raised { exc_type: "ZeroDivisionError".to_string(), message: "division by zero".to_string(), traceback: Vec::new() }));
    }
    let ar = Real::from_int(&a);
    let br = Real::from_int(&b);
    Ok(SymbolicValue::new("builtins.float", verity::Snapshot::default(), Repr::Float(&ar / &br)))
}

fn div_fc(declare_raise: bool) -> FnConditions<'static> {
    let mut raises = HashSet::new();
    if declare_raise {
        raises.insert("ZeroDivisionError".to_string());
    }
    FnConditions {
        pre: Vec::new(),
        post: Box::new(FnCondition { eval: |_, _| Ok(true), line: 1, expr_source: "True" }),
        raises,
        sig: vec![("a".to_string(), "builtins.int".to_string()), ("b".to_string(), "builtins.int".to_string())],
        mutable_args: HashSet::new(),
    }
}

fn div_checked_fc() -> FnConditions<'static> {
    div_fc(true)
}

fn div_unchecked_fc() -> FnConditions<'static> {
    div_fc(false)
}

fn div_target() -> &'static dyn Target<'static> {
    static TARGET: OnceLock<FnTarget> = OnceLock::new();
    TARGET.get_or_init(|| FnTarget {
        name: "div",
        signature: vec![("a".to_string(), "builtins.int".to_string()), ("b".to_string(), "builtins.int".to_string())],
        return_type: "builtins.float".to_string(),
        body: div_invoke,
    })
}

// --- scenario 6: `def floordiv(a: int, b: int) -> int: return a // b` ----
//
// Exercises `floor_div` through the real engine path: the postcondition
// checks the defining property of floor division directly (`a - ret*b`
// lands in `[0, b)` for positive `b`, in `(b, 0]` for negative `b`) rather
// than recomputing `floor_div` a second time, so a wrong implementation of
// either one would not cancel the other out.

fn floordiv_invoke<'ctx>(
    args: &mut [(String, SymbolicValue<'ctx>)],
    _space: &mut dyn verity::StateSpace<'ctx>,
    _proxy_ctx: &mut ProxyContext<'_, 'ctx, '_>,
) -> ExecResult<SymbolicValue<'ctx>> {
    let a = int_arg(args, "a")?.clone();
    let b = int_arg(args, "b")?.clone();
    let q = floor_div(a.get_ctx(), &a, &b);
    Ok(SymbolicValue::new("builtins.int", verity::Snapshot::default(), Repr::Int(q)))
}

fn floordiv_pre<'ctx>(bindings: &Bindings<'ctx>, space: &mut dyn verity::StateSpace<'ctx>) -> ExecResult<bool> {
    let b = int_arg(&bindings.params, "b")?;
    let zero = Int::from_i64(b.get_ctx(), 0);
    space.choose_possible(&b._eq(&zero).not(), true)
}

fn floordiv_post<'ctx>(bindings: &Bindings<'ctx>, space: &mut dyn verity::StateSpace<'ctx>) -> ExecResult<bool> {
    let ret = return_int(bindings)?;
    let a = int_arg(&bindings.params, "a")?;
    let b = int_arg(&bindings.params, "b")?;
    let zctx = a.get_ctx();
    let zero = Int::from_i64(zctx, 0);
    let remainder = a - &(ret * b);
    let positive_b = Bool::and(zctx, &[&b.gt(&zero), &remainder.ge(&zero), &remainder.lt(b)]);
    let negative_b = Bool::and(zctx, &[&b.lt(&zero), &remainder.le(&zero), &remainder.gt(b)]);
    space.choose_possible(&Bool::or(zctx, &[&positive_b, &negative_b]), true)
}

fn floordiv_fc() -> FnConditions<'static> {
    FnConditions {
        pre: vec![Box::new(FnCondition { eval: floordiv_pre, line: 1, expr_source: "b != 0" })],
        post: Box::new(FnCondition { eval: floordiv_post, line: 2, expr_source: "0 <= a - _*b < abs(b) (sign of b)" }),
        raises: HashSet::new(),
        sig: vec![("a".to_string(), "builtins.int".to_string()), ("b".to_string(), "builtins.int".to_string())],
        mutable_args: HashSet::new(),
    }
}

fn floordiv_target() -> &'static dyn Target<'static> {
    static TARGET: OnceLock<FnTarget> = OnceLock::new();
    TARGET.get_or_init(|| FnTarget {
        name: "floordiv",
        signature: vec![("a".to_string(), "builtins.int".to_string()), ("b".to_string(), "builtins.int".to_string())],
        return_type: "builtins.int".to_string(),
        body: floordiv_invoke,
    })
}

// --- scenario 7: `def narrow(obj: Animal) -> bool: ...` -------------------
//
// `obj` arrives as a `LazyObject` capped at `demo.Animal`, the unknown-type
// realization `proxy_object` produces for any `TypeShape::Object`. The body
// forces it with `force_lazy` (standing in for the attribute-access/
// `isinstance` site that would trigger narrowing in a real interpreter) and
// reports whether the cap actually tightened to a concrete subclass.

fn narrow_invoke<'ctx>(
    args: &mut [(String, SymbolicValue<'ctx>)],
    space: &mut dyn verity::StateSpace<'ctx>,
    proxy_ctx: &mut ProxyContext<'_, 'ctx, '_>,
) -> ExecResult<SymbolicValue<'ctx>> {
    let obj_idx = args.iter().position(|(n, _)| n == "obj").expect("obj declared in this target's signature");
    let lazy = match &args[obj_idx].1.repr {
        Repr::LazyObject(lazy) => lazy.clone(),
        _ => return Err(Signal::Internal("expected an unforced object".to_string())),
    };
    let cap = lazy.typeval.cap.clone();
    let forced = force_lazy(proxy_ctx, space, &lazy)?;
    let narrowed = forced.ty != cap;
    let zctx = proxy_ctx.facade.context();
    args[obj_idx].1 = forced;
    Ok(SymbolicValue::new("builtins.bool", verity::Snapshot::default(), Repr::Bool(Bool::from_bool(zctx, narrowed))))
}

fn narrow_post<'ctx>(bindings: &Bindings<'ctx>, space: &mut dyn verity::StateSpace<'ctx>) -> ExecResult<bool> {
    let ret = match bindings.return_value.as_ref().map(|v| &v.repr) {
        Some(Repr::Bool(b)) => b,
        _ => return Err(Signal::Internal("no bool return value".to_string())),
    };
    space.choose_possible(ret, true)
}

fn narrow_fc() -> FnConditions<'static> {
    let mut mutable_args = HashSet::new();
    // Forcing a lazy object into a concrete proxy changes what `deep_equal`
    // sees for `obj` (a `LazyObject` is never equal to the `ProxyStruct` it
    // realizes into), the same way `upsert`'s `d` changes shape in place.
    mutable_args.insert("obj".to_string());
    FnConditions {
        pre: Vec::new(),
        post: Box::new(FnCondition { eval: narrow_post, line: 1, expr_source: "_ is True" }),
        raises: HashSet::new(),
        sig: vec![("obj".to_string(), "demo.Animal".to_string())],
        mutable_args,
    }
}

fn narrow_target() -> &'static dyn Target<'static> {
    static TARGET: OnceLock<FnTarget> = OnceLock::new();
    TARGET.get_or_init(|| FnTarget {
        name: "narrow",
        signature: vec![("obj".to_string(), "demo.Animal".to_string())],
        return_type: "builtins.bool".to_string(),
        body: narrow_invoke,
    })
}

fn all_scenarios() -> Vec<Scenario> {
    vec![
        Scenario { name: "succ", target: succ_target(), fc: succ_fc, expect_confirmed: true },
        Scenario { name: "square", target: square_target(), fc: square_fc, expect_confirmed: true },
        Scenario { name: "head", target: head_target(), fc: head_checked_fc, expect_confirmed: true },
        Scenario { name: "head_unchecked", target: head_target(), fc: head_unchecked_fc, expect_confirmed: false },
        Scenario { name: "upsert", target: upsert_target(), fc: upsert_sound_fc, expect_confirmed: true },
        Scenario { name: "upsert_unsound", target: upsert_target(), fc: upsert_unsound_fc, expect_confirmed: false },
        Scenario { name: "div", target: div_target(), fc: div_checked_fc, expect_confirmed: true },
        Scenario { name: "div_unchecked", target: div_target(), fc: div_unchecked_fc, expect_confirmed: false },
        Scenario { name: "floordiv", target: floordiv_target(), fc: floordiv_fc, expect_confirmed: true },
        Scenario { name: "narrow", target: narrow_target(), fc: narrow_fc, expect_confirmed: true },
    ]
}
