//! Element-level reads and writes against a container's symbolic
//! representation, on top of what `proxy_factory.rs` constructs and
//! `short_circuit.rs` forgets.
//!
//! Every write returns a *new* `ContainerRepr` rather than mutating in
//! place — the same immutable-snapshot discipline the heap already applies
//! to user objects — so a caller decides for itself whether the new value
//! replaces the old binding or becomes a sibling one (e.g. `dict(d)`).
//!
//! Grounded on the dict decomposition law
//! (`arr = store(remaining, k, present(v)) ∧ select(remaining, k) = missing`)
//! and on the `present | missing` sum `solver.rs::Facade::optional_sort`
//! already builds for a dict's value slot.

use z3::ast::{Array, Ast, Bool, Dynamic, Int};

use crate::signal::{ExecResult, Raised, Signal};
use crate::solver::Facade;
use crate::state_space::{normalize_index, StateSpace};
use crate::value::{ContainerRepr, SeqView};

fn key_error(detail: &str) -> Signal {
    Signal::Raised(Raised { exc_type: "KeyError".to_string(), message: detail.to_string(), traceback: vec![] })
}

/// `s[index]`, normalizing `index` against the view's own (possibly already
/// narrowed) length first.
pub fn seq_index<'ctx>(
    space: &mut dyn StateSpace<'ctx>,
    ctx: &'ctx z3::Context,
    view: &SeqView<'ctx>,
    index: &Int<'ctx>,
) -> ExecResult<Dynamic<'ctx>> {
    let len = &view.stop - &view.start;
    let normalized = normalize_index(space, ctx, index, &len)?;
    let pos = &view.start + &normalized;
    Ok(view.base.select(&pos.into()))
}

/// `s[a:b]`: narrows the view without touching the backing array (the
/// "slicing yields a view" / "Concurrent-write correctness" discipline). `a` and
/// `b` are endpoints already normalized by the caller (process-slice-style
/// handling of negative/out-of-range endpoints and a non-unit `step` belongs
/// to whatever reads the slice syntax, not here).
#[must_use]
pub fn seq_slice<'ctx>(view: &SeqView<'ctx>, a: Int<'ctx>, b: Int<'ctx>) -> SeqView<'ctx> {
    SeqView { base: view.base.clone(), elem_sort: view.elem_sort.clone(), start: &view.start + &a, stop: &view.start + &b }
}

/// `key in d`.
pub fn dict_contains<'ctx>(dict: &ContainerRepr<'ctx>, key: &Dynamic<'ctx>) -> ExecResult<Bool<'ctx>> {
    let shape = dict.dict_shape.as_ref().ok_or_else(|| Signal::Internal("dict_contains on a non-dict container".into()))?;
    let slot = dict.array.select(key);
    shape
        .present_tester
        .apply(&[&slot])
        .as_bool()
        .ok_or_else(|| Signal::Internal("dict present tester did not return Bool".into()))
}

/// `d[key]`, raising `KeyError` on the branch where it is absent.
pub fn dict_get<'ctx>(
    space: &mut dyn StateSpace<'ctx>,
    dict: &ContainerRepr<'ctx>,
    key: &Dynamic<'ctx>,
) -> ExecResult<Dynamic<'ctx>> {
    let shape = dict.dict_shape.as_ref().ok_or_else(|| Signal::Internal("dict_get on a non-dict container".into()))?;
    let slot = dict.array.select(key);
    let present = shape
        .present_tester
        .apply(&[&slot])
        .as_bool()
        .ok_or_else(|| Signal::Internal("dict present tester did not return Bool".into()))?;
    if !space.choose_possible(&present, true)? {
        return Err(key_error("key not found"));
    }
    Ok(shape.value_accessor.apply(&[&slot]))
}

/// `d[key] = value`: stores `present(value)` at `key` and adjusts `length`
/// by one only on the branch where `key` was previously absent.
pub fn dict_set<'ctx>(
    ctx: &'ctx z3::Context,
    dict: &ContainerRepr<'ctx>,
    key: &Dynamic<'ctx>,
    value: &Dynamic<'ctx>,
) -> ExecResult<ContainerRepr<'ctx>> {
    let shape = dict.dict_shape.clone().ok_or_else(|| Signal::Internal("dict_set on a non-dict container".into()))?;
    let was_present = shape
        .present_tester
        .apply(&[&dict.array.select(key)])
        .as_bool()
        .ok_or_else(|| Signal::Internal("dict present tester did not return Bool".into()))?;
    let present_val = shape.present_ctor.apply(&[value]);
    let array = dict.array.store(key, &present_val);
    let delta = was_present.ite(&Int::from_i64(ctx, 0), &Int::from_i64(ctx, 1));
    let length = &dict.length + &delta;
    Ok(ContainerRepr { array, key_sort: dict.key_sort.clone(), value_sort: dict.value_sort.clone(), length, dict_shape: Some(shape) })
}

/// `del d[key]`, raising `KeyError` on the branch where it is already absent.
pub fn dict_del<'ctx>(
    ctx: &'ctx z3::Context,
    space: &mut dyn StateSpace<'ctx>,
    dict: &ContainerRepr<'ctx>,
    key: &Dynamic<'ctx>,
) -> ExecResult<ContainerRepr<'ctx>> {
    let shape = dict.dict_shape.clone().ok_or_else(|| Signal::Internal("dict_del on a non-dict container".into()))?;
    let slot = dict.array.select(key);
    let present = shape
        .present_tester
        .apply(&[&slot])
        .as_bool()
        .ok_or_else(|| Signal::Internal("dict present tester did not return Bool".into()))?;
    if !space.choose_possible(&present, true)? {
        return Err(key_error("key not found"));
    }
    let missing_val = shape.missing_ctor.apply(&[]);
    let array = dict.array.store(key, &missing_val);
    let length = &dict.length - &Int::from_i64(ctx, 1);
    Ok(ContainerRepr { array, key_sort: dict.key_sort.clone(), value_sort: dict.value_sort.clone(), length, dict_shape: Some(shape) })
}

/// `elem in s` for `Set`/`FrozenSet`.
pub fn set_contains<'ctx>(set: &ContainerRepr<'ctx>, elem: &Dynamic<'ctx>) -> ExecResult<Bool<'ctx>> {
    set.array.select(elem).as_bool().ok_or_else(|| Signal::Internal("set array range was not Bool".into()))
}

/// `s.add(elem)`: length grows by one only on the branch where `elem` was
/// not already a member.
pub fn set_add<'ctx>(ctx: &'ctx z3::Context, set: &ContainerRepr<'ctx>, elem: &Dynamic<'ctx>) -> ExecResult<ContainerRepr<'ctx>> {
    let already = set_contains(set, elem)?;
    let array = set.array.store(elem, &Bool::from_bool(ctx, true).into());
    let delta = already.ite(&Int::from_i64(ctx, 0), &Int::from_i64(ctx, 1));
    let length = &set.length + &delta;
    Ok(ContainerRepr { array, key_sort: set.key_sort.clone(), value_sort: set.value_sort.clone(), length, dict_shape: None })
}

/// `s.remove(elem)`, raising `KeyError` on the branch where `elem` is
/// already absent (`s.discard(elem)` is the same write without that check —
/// left to the caller, since only `remove` is required to raise).
pub fn set_remove<'ctx>(
    ctx: &'ctx z3::Context,
    space: &mut dyn StateSpace<'ctx>,
    set: &ContainerRepr<'ctx>,
    elem: &Dynamic<'ctx>,
) -> ExecResult<ContainerRepr<'ctx>> {
    let present = set_contains(set, elem)?;
    if !space.choose_possible(&present, true)? {
        return Err(key_error("element not found"));
    }
    let array = set.array.store(elem, &Bool::from_bool(ctx, false).into());
    let length = &set.length - &Int::from_i64(ctx, 1);
    Ok(ContainerRepr { array, key_sort: set.key_sort.clone(), value_sort: set.value_sort.clone(), length, dict_shape: None })
}

/// One step of `dict.__iter__()`: the witnessed key/value pair plus the
/// container with that one entry decomposed out.
pub struct DictIterStep<'ctx> {
    pub key: Dynamic<'ctx>,
    pub value: Dynamic<'ctx>,
    pub remaining: ContainerRepr<'ctx>,
}

/// `dict.__iter__()`'s one-step decomposition: "is there anything left to
/// yield" is a real fork (both paths are reachable target control flow), but
/// *which* key comes out is not a target decision, so it is witnessed by
/// asserting a fresh key is present and checking the assertion didn't
/// contradict the path so far — the "inconsistencies trigger path
/// abandonment" clause of §4.4's dict law — rather than forked.
///
/// Returns `Ok(None)` once `length == 0` is the only feasible branch.
pub fn dict_iter_next<'ctx>(
    facade: &Facade<'ctx>,
    space: &mut dyn StateSpace<'ctx>,
    dict: &ContainerRepr<'ctx>,
) -> ExecResult<Option<DictIterStep<'ctx>>> {
    let ctx = facade.context();
    let shape = dict.dict_shape.clone().ok_or_else(|| Signal::Internal("dict_iter_next on a non-dict container".into()))?;
    let zero = Int::from_i64(ctx, 0);
    if space.choose_possible(&dict.length._eq(&zero), false)? {
        return Ok(None);
    }
    let key = Dynamic::new_const(ctx, facade.fresh_name("dict_iter_key"), &dict.key_sort);
    let slot = dict.array.select(&key);
    let present = shape
        .present_tester
        .apply(&[&slot])
        .as_bool()
        .ok_or_else(|| Signal::Internal("dict present tester did not return Bool".into()))?;
    facade.assert_bool(&present);
    if facade.check_sat() != z3::SatResult::Sat {
        return Err(Signal::IgnoreAttempt);
    }
    let value = shape.value_accessor.apply(&[&slot]);
    let missing_val = shape.missing_ctor.apply(&[]);
    let remaining = ContainerRepr {
        array: dict.array.store(&key, &missing_val),
        key_sort: dict.key_sort.clone(),
        value_sort: dict.value_sort.clone(),
        length: &dict.length - &Int::from_i64(ctx, 1),
        dict_shape: Some(shape),
    };
    Ok(Some(DictIterStep { key, value, remaining }))
}

/// `set.__iter__()`/`frozenset.__iter__()`'s analogue of [`dict_iter_next`]:
/// same witness-then-check-consistency shape, minus a value payload.
pub fn set_iter_next<'ctx>(
    facade: &Facade<'ctx>,
    space: &mut dyn StateSpace<'ctx>,
    set: &ContainerRepr<'ctx>,
) -> ExecResult<Option<(Dynamic<'ctx>, ContainerRepr<'ctx>)>> {
    let ctx = facade.context();
    let zero = Int::from_i64(ctx, 0);
    if space.choose_possible(&set.length._eq(&zero), false)? {
        return Ok(None);
    }
    let elem = Dynamic::new_const(ctx, facade.fresh_name("set_iter_elem"), &set.key_sort);
    let is_member = set_contains(set, &elem)?;
    facade.assert_bool(&is_member);
    if facade.check_sat() != z3::SatResult::Sat {
        return Err(Signal::IgnoreAttempt);
    }
    let remaining = ContainerRepr {
        array: set.array.store(&elem, &Bool::from_bool(ctx, false).into()),
        key_sort: set.key_sort.clone(),
        value_sort: set.value_sort.clone(),
        length: &set.length - &Int::from_i64(ctx, 1),
        dict_shape: None,
    };
    Ok(Some((elem, remaining)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::state_space::{SearchTree, Tracking};
    use std::time::Duration;
    use z3::Context;

    fn dict_fixture<'ctx>(facade: &Facade<'ctx>) -> ContainerRepr<'ctx> {
        let zctx = facade.context();
        let key_sort = facade.int_sort();
        let optional = facade.optional_sort(&facade.int_sort(), "v");
        let array = Array::new_const(zctx, "d_arr", &key_sort, &optional.sort);
        let missing = optional.variants[0].constructor.apply(&[]);
        let default_array = Array::const_array(zctx, &key_sort, &missing);
        facade.assert_bool(&array._eq(&default_array));
        let dict_shape = Some(crate::value::DictShape {
            missing_ctor: optional.variants[0].constructor.clone(),
            present_ctor: optional.variants[1].constructor.clone(),
            present_tester: optional.variants[1].tester.clone(),
            value_accessor: optional.variants[1].accessors[0].clone(),
        });
        ContainerRepr { array, key_sort, value_sort: optional.sort, length: Int::from_i64(zctx, 0), dict_shape }
    }

    #[test]
    fn set_then_get_round_trips() {
        let cfg = Facade::default_config();
        let zctx = Context::new(&cfg);
        let facade = Facade::new(&zctx, Duration::from_secs(5));
        let mut tree = SearchTree::new();
        let mut space = Tracking::new(&facade, &mut tree, Duration::from_secs(5), 1);

        let empty = dict_fixture(&facade);
        let key: Dynamic = Int::from_i64(&zctx, 7).into();
        let value: Dynamic = Int::from_i64(&zctx, 99).into();
        let after_set = dict_set(&zctx, &empty, &key, &value).unwrap();

        assert!(space.choose_possible(&dict_contains(&after_set, &key).unwrap(), true).unwrap());
        let got = dict_get(&mut space, &after_set, &key).unwrap();
        assert_eq!(got.to_string(), value.to_string());
        assert_eq!(after_set.length.to_string(), Int::from_i64(&zctx, 1).to_string());
    }

    #[test]
    fn get_on_empty_dict_raises_key_error() {
        let cfg = Facade::default_config();
        let zctx = Context::new(&cfg);
        let facade = Facade::new(&zctx, Duration::from_secs(5));
        let mut tree = SearchTree::new();
        let mut space = Tracking::new(&facade, &mut tree, Duration::from_secs(5), 1);

        let empty = dict_fixture(&facade);
        let key: Dynamic = Int::from_i64(&zctx, 7).into();
        let err = dict_get(&mut space, &empty, &key).unwrap_err();
        assert!(matches!(err, Signal::Raised(r) if r.exc_type == "KeyError"));
    }

    #[test]
    fn del_then_contains_is_false_and_length_drops() {
        let cfg = Facade::default_config();
        let zctx = Context::new(&cfg);
        let facade = Facade::new(&zctx, Duration::from_secs(5));
        let mut tree = SearchTree::new();
        let mut space = Tracking::new(&facade, &mut tree, Duration::from_secs(5), 1);

        let empty = dict_fixture(&facade);
        let key: Dynamic = Int::from_i64(&zctx, 1).into();
        let value: Dynamic = Int::from_i64(&zctx, 2).into();
        let after_set = dict_set(&zctx, &empty, &key, &value).unwrap();
        let after_del = dict_del(&zctx, &mut space, &after_set, &key).unwrap();

        assert!(!space.choose_possible(&dict_contains(&after_del, &key).unwrap(), true).unwrap());
        assert_eq!(after_del.length.to_string(), Int::from_i64(&zctx, 0).to_string());
    }

    #[test]
    fn slice_length_is_stop_minus_start() {
        let cfg = Facade::default_config();
        let zctx = Context::new(&cfg);
        let facade = Facade::new(&zctx, Duration::from_secs(5));
        let array = Array::new_const(&zctx, "s_arr", &facade.int_sort(), &facade.int_sort());
        let view = SeqView { base: array, elem_sort: facade.int_sort(), start: Int::from_i64(&zctx, 0), stop: Int::from_i64(&zctx, 10) };
        let narrowed = seq_slice(&view, Int::from_i64(&zctx, 2), Int::from_i64(&zctx, 5));
        let len = &narrowed.stop - &narrowed.start;
        facade.assert_bool(&len._eq(&Int::from_i64(&zctx, 3)));
        assert_eq!(facade.check_sat(), z3::SatResult::Sat);
    }

    #[test]
    fn dict_iter_next_yields_the_one_entry_then_stops() {
        let cfg = Facade::default_config();
        let zctx = Context::new(&cfg);
        let facade = Facade::new(&zctx, Duration::from_secs(5));
        let mut tree = SearchTree::new();
        let mut space = Tracking::new(&facade, &mut tree, Duration::from_secs(5), 1);

        let empty = dict_fixture(&facade);
        let key: Dynamic = Int::from_i64(&zctx, 7).into();
        let value: Dynamic = Int::from_i64(&zctx, 99).into();
        let dict = dict_set(&zctx, &empty, &key, &value).unwrap();

        let step = dict_iter_next(&facade, &mut space, &dict).unwrap().expect("one entry to yield");
        // The witnessed key/value are fresh solver constants, only provably
        // (not syntactically) equal to the one entry the dict holds.
        assert_eq!(facade.check_sat_assuming(&step.key._eq(&key).not()), z3::SatResult::Unsat);
        assert_eq!(facade.check_sat_assuming(&step.value._eq(&value).not()), z3::SatResult::Unsat);
        assert_eq!(step.remaining.length.to_string(), Int::from_i64(&zctx, 0).to_string());
        assert!(dict_iter_next(&facade, &mut space, &step.remaining).unwrap().is_none());
    }

    #[test]
    fn set_iter_next_yields_the_one_member_then_stops() {
        let cfg = Facade::default_config();
        let zctx = Context::new(&cfg);
        let facade = Facade::new(&zctx, Duration::from_secs(5));
        let mut tree = SearchTree::new();
        let mut space = Tracking::new(&facade, &mut tree, Duration::from_secs(5), 1);

        let key_sort = facade.int_sort();
        let array = Array::const_array(&zctx, &key_sort, &Bool::from_bool(&zctx, false).into());
        let empty = ContainerRepr { array, key_sort, value_sort: facade.bool_sort(), length: Int::from_i64(&zctx, 0), dict_shape: None };
        let elem: Dynamic = Int::from_i64(&zctx, 3).into();
        let set = set_add(&zctx, &empty, &elem).unwrap();

        let (got, remaining) = set_iter_next(&facade, &mut space, &set).unwrap().expect("one member to yield");
        assert_eq!(facade.check_sat_assuming(&got._eq(&elem).not()), z3::SatResult::Unsat);
        assert_eq!(remaining.length.to_string(), Int::from_i64(&zctx, 0).to_string());
        assert!(set_iter_next(&facade, &mut space, &remaining).unwrap().is_none());
    }
}
