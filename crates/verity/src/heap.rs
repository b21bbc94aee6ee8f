//! Snapshot-indexed `(HeapRef, Snapshot) -> object` mapping.
//!
//! A snapshot is minted whenever the engine shallow-copies a symbolic value
//! (deep-copying `original_args` in the Call Attempt protocol, for example).
//! Looking a reference up at an older snapshot than the one most recently
//! written re-materializes whatever was live *then*, giving the mutation
//! audit an old/new pair to compare without threading copies through every
//! call.
//!
//! Uses a `BTreeMap` per reference for deterministic iteration where
//! ordering is observable — here, a reference's write history — extended
//! from a single-generation slot table to a multi-snapshot one.

use std::collections::BTreeMap;

use ahash::AHashMap;

/// Opaque reference to a heap-resident object. Two values that should be
/// treated as the same object (because the target aliases them) share a
/// `HeapRef`; [`Heap::find_val_in_heap`] is keyed by the caller-supplied
/// [`ObjectIdentity`] to guarantee that.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct HeapRef(u64);

/// A heap generation. Snapshots order monotonically; a larger value is
/// always later than a smaller one.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Default)]
pub struct Snapshot(u64);

/// Host-supplied identity for deduplicating allocations of the same
/// underlying object (e.g. a pointer address, or an interpreter's `id()`).
/// Opaque to this module.
pub type ObjectIdentity = u64;

/// The history of one heap reference: the value it held as of each snapshot
/// it was written at, oldest first.
struct History<V> {
    writes: BTreeMap<Snapshot, V>,
}

impl<V> History<V> {
    fn as_of(&self, snapshot: Snapshot) -> Option<&V> {
        self.writes.range(..=snapshot).next_back().map(|(_, v)| v)
    }
}

/// Process-wide heap for one analyzer run. Rebuilt fresh per run.
pub struct Heap<V> {
    slots: AHashMap<HeapRef, History<V>>,
    identities: AHashMap<ObjectIdentity, HeapRef>,
    current_snapshot: Snapshot,
    next_ref: u64,
}

impl<V: Clone> Heap<V> {
    #[must_use]
    pub fn new() -> Self {
        Self {
            slots: AHashMap::new(),
            identities: AHashMap::new(),
            current_snapshot: Snapshot(0),
            next_ref: 0,
        }
    }

    #[must_use]
    pub fn current_snapshot(&self) -> Snapshot {
        self.current_snapshot
    }

    /// Mints a new, strictly later snapshot. Existing `(ref, snapshot)`
    /// entries are untouched; future writes land at the new generation.
    pub fn advance_snapshot(&mut self) -> Snapshot {
        self.current_snapshot = Snapshot(self.current_snapshot.0 + 1);
        self.current_snapshot
    }

    /// `find_val_in_heap`: returns the existing reference for `identity` if
    /// the object was seen before, else allocates a fresh one and records
    /// `value` as of `snapshot`.
    pub fn find_val_in_heap(&mut self, identity: ObjectIdentity, value: V, snapshot: Snapshot) -> HeapRef {
        if let Some(existing) = self.identities.get(&identity) {
            return *existing;
        }
        let r = HeapRef(self.next_ref);
        self.next_ref += 1;
        self.identities.insert(identity, r);
        let mut writes = BTreeMap::new();
        writes.insert(snapshot, value);
        self.slots.insert(r, History { writes });
        r
    }

    /// `find_key_in_heap`: materializes the object at `r` as of `snapshot`
    /// via `make_proxy` if nothing was ever written there at or before that
    /// snapshot. Writing the materialized value back pins it: a second call
    /// at the same `(r, snapshot)` returns the same object, per the "once
    /// set, immutable for that snapshot" invariant.
    pub fn find_key_in_heap(&mut self, r: HeapRef, snapshot: Snapshot, make_proxy: impl FnOnce() -> V) -> V {
        if let Some(existing) = self.slots.get(&r).and_then(|h| h.as_of(snapshot)) {
            return existing.clone();
        }
        let value = make_proxy();
        self.slots
            .entry(r)
            .or_insert_with(|| History { writes: BTreeMap::new() })
            .writes
            .entry(snapshot)
            .or_insert_with(|| value.clone());
        value
    }

    /// Records a mutation: `value` becomes what `r` holds as of `snapshot`
    /// onward. Used when the engine observes the target write through an
    /// aliased reference.
    pub fn set(&mut self, r: HeapRef, snapshot: Snapshot, value: V) {
        self.slots.entry(r).or_insert_with(|| History { writes: BTreeMap::new() }).writes.insert(snapshot, value);
    }

    #[must_use]
    pub fn live_objects(&self) -> usize {
        self.slots.len()
    }
}

impl<V: Clone> Default for Heap<V> {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn same_identity_returns_same_ref() {
        let mut heap: Heap<i64> = Heap::new();
        let s = heap.current_snapshot();
        let a = heap.find_val_in_heap(1, 10, s);
        let b = heap.find_val_in_heap(1, 999, s);
        assert_eq!(a, b);
    }

    #[test]
    fn lookup_at_older_snapshot_sees_old_value() {
        let mut heap: Heap<i64> = Heap::new();
        let s0 = heap.current_snapshot();
        let r = heap.find_val_in_heap(1, 10, s0);
        let s1 = heap.advance_snapshot();
        heap.set(r, s1, 20);

        assert_eq!(heap.find_key_in_heap(r, s0, || panic!("should not synthesize")), 10);
        assert_eq!(heap.find_key_in_heap(r, s1, || panic!("should not synthesize")), 20);
    }

    #[test]
    fn missing_key_materializes_via_proxy_once() {
        let mut heap: Heap<i64> = Heap::new();
        let r = HeapRef(42);
        let s = heap.current_snapshot();
        let first = heap.find_key_in_heap(r, s, || 7);
        let second = heap.find_key_in_heap(r, s, || panic!("proxy called twice"));
        assert_eq!(first, second);
    }
}
