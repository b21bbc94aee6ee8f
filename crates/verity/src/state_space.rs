//! The search tree and the two state-space flavors (`Tracking`, `Replay`)
//! that drive it.
//!
//! The tree is arena-indexed (`NodeId` into a flat `Vec`) rather than built
//! from `Box`-linked nodes, the same way an object heap is often
//! arena-indexed (an id into a flat table) instead of reference-counting a
//! linked object graph — mutating a node found by walking down from the
//! root is far less friction against the borrow checker as a flat table than
//! as recursive owned boxes.

use std::cell::Cell;
use std::time::{Duration, Instant};

use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha8Rng;
use z3::ast::{Ast, Bool, Dynamic};

use crate::signal::{ExecResult, Signal};
use crate::solver::Facade;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Status {
    Unknown,
    Confirmed,
    Refuted,
}

impl Status {
    /// The bubbling rule: two Confirmed children confirm; any
    /// Refuted dominates; otherwise Unknown.
    #[must_use]
    fn combine(a: Status, b: Status) -> Status {
        match (a, b) {
            (Status::Refuted, _) | (_, Status::Refuted) => Status::Refuted,
            (Status::Confirmed, Status::Confirmed) => Status::Confirmed,
            _ => Status::Unknown,
        }
    }

    #[must_use]
    fn is_terminal(self) -> bool {
        matches!(self, Status::Confirmed | Status::Refuted)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct NodeId(usize);

/// A model witnessing a Confirmed leaf, cached so the analyzer's final
/// report can show the concrete arguments without re-querying the solver.
#[derive(Debug, Clone)]
pub struct RecordedModel {
    pub assignment: Vec<(String, String)>,
}

enum NodeKind {
    Leaf(Status),
    Decision { false_child: NodeId, true_child: NodeId },
    /// A Confirmed leaf upgraded with its witnessing model.
    ModelPath(RecordedModel),
    /// A leaf produced by a `Replay` run, carrying the bit sequence it
    /// consumed, kept for post-hoc inspection.
    Replay(Vec<bool>),
}

/// The persistent tree, shared across every path attempt within one
/// analyzer run.
pub struct SearchTree {
    nodes: Vec<NodeKind>,
}

impl SearchTree {
    pub const ROOT: NodeId = NodeId(0);

    #[must_use]
    pub fn new() -> Self {
        Self { nodes: vec![NodeKind::Leaf(Status::Unknown)] }
    }

    fn alloc(&mut self, kind: NodeKind) -> NodeId {
        self.nodes.push(kind);
        NodeId(self.nodes.len() - 1)
    }

    #[must_use]
    pub fn status(&self, id: NodeId) -> Status {
        match &self.nodes[id.0] {
            NodeKind::Leaf(s) => *s,
            NodeKind::ModelPath(_) => Status::Confirmed,
            NodeKind::Replay(_) => Status::Unknown,
            NodeKind::Decision { false_child, true_child } => {
                Status::combine(self.status(*false_child), self.status(*true_child))
            }
        }
    }

    /// Whether every leaf under `id` has a terminal status — the tree will
    /// never need to visit this subtree again.
    #[must_use]
    pub fn exhausted(&self, id: NodeId) -> bool {
        match &self.nodes[id.0] {
            NodeKind::Leaf(s) => s.is_terminal(),
            NodeKind::ModelPath(_) => true,
            NodeKind::Replay(_) => true,
            NodeKind::Decision { false_child, true_child } => {
                self.exhausted(*false_child) && self.exhausted(*true_child)
            }
        }
    }

    /// Sets `id`'s status (must currently be an unresolved `Leaf`) and walks
    /// `ancestors` (root-to-parent order) re-combining each one's status.
    /// Returns `(root_status, root_exhausted)`.
    pub fn bubble_status(&mut self, ancestors: &[NodeId], id: NodeId, status: Status, model: Option<RecordedModel>) -> (Status, bool) {
        self.nodes[id.0] = match model {
            Some(m) if status == Status::Confirmed => NodeKind::ModelPath(m),
            _ => NodeKind::Leaf(status),
        };
        for &ancestor in ancestors.iter().rev() {
            // Decision nodes recompute lazily via `status()`; nothing to
            // write back, but walking confirms each ancestor remains a
            // `Decision` (a debug invariant worth the cheap check).
            debug_assert!(matches!(self.nodes[ancestor.0], NodeKind::Decision { .. }));
        }
        let root = ancestors.first().copied().unwrap_or(id);
        (self.status(root), self.exhausted(root))
    }
}

impl Default for SearchTree {
    fn default() -> Self {
        Self::new()
    }
}

/// RAII scope marker for "the engine is running its own code"
/// (`framework()`): contracts and the short-circuit interceptor must not fire
/// while any guard is alive. Dropping re-enables them.
pub struct FrameworkGuard<'a> {
    depth: &'a Cell<u32>,
}

impl Drop for FrameworkGuard<'_> {
    fn drop(&mut self) {
        self.depth.set(self.depth.get() - 1);
    }
}

/// A solver checkpoint, opaque outside this module. Restoring anything but
/// the most recently taken checkpoint is a logic error in the caller.
pub struct Checkpoint(usize);

/// Shared behavior between `Tracking` and `Replay` — everything
/// except how a fork's direction is decided.
pub trait StateSpace<'ctx> {
    /// Asserts `expr`, checks whether both branches remain feasible, forks
    /// if so (consulting/installing a tree `Decision`), else commits to the
    /// only feasible branch.
    fn choose_possible(&mut self, expr: &Bool<'ctx>, favor_true: bool) -> ExecResult<bool>;

    /// The unguided fork: `None` means "decide freely" (used for internal
    /// engine coin flips that have no corresponding solver expression, e.g.
    /// choosing which dict key to decompose next).
    fn smt_fork(&mut self, expr: Option<&Bool<'ctx>>) -> ExecResult<bool>;

    /// A probability-weighted decision with no feasibility check, used by
    /// the Short-Circuit Context with `p = 0.95`.
    fn fork_with_confirm_or_else(&mut self, p: f64) -> ExecResult<bool>;

    /// Materializes `expr` under the current model and asserts equality so
    /// later queries stay consistent with the value returned here.
    fn find_model_value(&mut self, expr: &Dynamic<'ctx>) -> ExecResult<Dynamic<'ctx>>;

    fn checkpoint(&mut self) -> Checkpoint;
    fn restore(&mut self, checkpoint: Checkpoint);

    fn framework(&self) -> FrameworkGuard<'_>;
    fn in_framework(&self) -> bool;

    fn deadline_elapsed(&self) -> bool;

    /// The scripted bit sequence this run has consumed so far, if this
    /// state space records one. `Tracking` records the bits it decided so a
    /// [`crate::calltree_analyzer`] message can carry them for later
    /// [`crate::replay`]; `Replay` has no need to record what it was handed.
    fn execution_log(&self) -> Option<Vec<bool>> {
        None
    }
}

/// Common bookkeeping shared by `Tracking` and `Replay`: the facade, the
/// framework-scope depth counter, and the per-path deadline.
struct Common<'ctx, 'f> {
    facade: &'f Facade<'ctx>,
    framework_depth: Cell<u32>,
    deadline: Instant,
    push_depth: usize,
}

impl<'ctx, 'f> Common<'ctx, 'f> {
    fn new(facade: &'f Facade<'ctx>, per_path_timeout: Duration) -> Self {
        Self { facade, framework_depth: Cell::new(0), deadline: Instant::now() + per_path_timeout, push_depth: 0 }
    }

    fn checkpoint(&mut self) -> Checkpoint {
        self.facade.push();
        self.push_depth += 1;
        Checkpoint(self.push_depth)
    }

    fn restore(&mut self, checkpoint: Checkpoint) {
        let levels = self.push_depth.saturating_sub(checkpoint.0);
        self.facade.pop(u32::try_from(levels).unwrap_or(u32::MAX));
        self.push_depth = checkpoint.0;
    }

    fn framework(&self) -> FrameworkGuard<'_> {
        self.framework_depth.set(self.framework_depth.get() + 1);
        FrameworkGuard { depth: &self.framework_depth }
    }

    fn find_model_value(&self, expr: &Dynamic<'ctx>) -> ExecResult<Dynamic<'ctx>> {
        let model = self.facade.get_model().ok_or(Signal::Internal("no model after Sat".into()))?;
        let value =
            self.facade.eval_in_model(&model, expr).ok_or(Signal::Internal("model did not cover expr".into()))?;
        self.facade.assert_bool(&expr._eq(&value));
        Ok(value)
    }
}

/// Exploring new paths. Forks consult and extend the shared search tree.
pub struct Tracking<'t, 'ctx, 'f> {
    common: Common<'ctx, 'f>,
    tree: &'t mut SearchTree,
    ancestors: Vec<NodeId>,
    current: NodeId,
    rng: ChaCha8Rng,
    log: Vec<bool>,
}

impl<'t, 'ctx, 'f> Tracking<'t, 'ctx, 'f> {
    #[must_use]
    pub fn new(facade: &'f Facade<'ctx>, tree: &'t mut SearchTree, per_path_timeout: Duration, rng_seed: u64) -> Self {
        Self {
            common: Common::new(facade, per_path_timeout),
            tree,
            ancestors: Vec::new(),
            current: SearchTree::ROOT,
            rng: ChaCha8Rng::seed_from_u64(rng_seed),
            log: Vec::new(),
        }
    }

    /// Finalizes the current path: see [`SearchTree::bubble_status`].
    pub fn bubble_status(&mut self, status: Status, model: Option<RecordedModel>) -> (Status, bool) {
        self.tree.bubble_status(&self.ancestors, self.current, status, model)
    }

    fn descend(&mut self, choice: bool, false_child: NodeId, true_child: NodeId) {
        self.ancestors.push(self.current);
        self.current = if choice { true_child } else { false_child };
    }
}

impl<'t, 'ctx, 'f> StateSpace<'ctx> for Tracking<'t, 'ctx, 'f> {
    fn choose_possible(&mut self, expr: &Bool<'ctx>, favor_true: bool) -> ExecResult<bool> {
        if self.deadline_elapsed() {
            return Err(Signal::UnexploredPath);
        }
        let true_feasible = self.common.facade.check_sat_assuming(expr) == z3::SatResult::Sat;
        let false_feasible = self.common.facade.check_sat_assuming(&expr.not()) == z3::SatResult::Sat;
        let choice = match (false_feasible, true_feasible) {
            (false, false) => return Err(Signal::IgnoreAttempt),
            (false, true) => true,
            (true, false) => false,
            (true, true) => {
                // Both branches remain open: consult the tree, or install a
                // fresh `Decision` if this is the first attempt to reach it.
                let (false_child, true_child) = match &self.tree_node() {
                    NodeKind::Decision { false_child, true_child } => (*false_child, *true_child),
                    NodeKind::Leaf(Status::Unknown) => {
                        let false_child = self.tree.alloc(NodeKind::Leaf(Status::Unknown));
                        let true_child = self.tree.alloc(NodeKind::Leaf(Status::Unknown));
                        self.tree.nodes[self.current.0] = NodeKind::Decision { false_child, true_child };
                        (false_child, true_child)
                    }
                    _ => return Err(Signal::Internal("fork at an already-terminal node".into())),
                };
                let prefer_unexhausted = if self.tree.exhausted(true_child) {
                    false
                } else if self.tree.exhausted(false_child) {
                    true
                } else {
                    favor_true
                };
                self.descend(prefer_unexhausted, false_child, true_child);
                prefer_unexhausted
            }
        };
        if choice { self.common.facade.assert_bool(expr) } else { self.common.facade.assert_bool(&expr.not()) };
        self.log.push(choice);
        Ok(choice)
    }

    fn smt_fork(&mut self, expr: Option<&Bool<'ctx>>) -> ExecResult<bool> {
        match expr {
            Some(e) => self.choose_possible(e, false),
            None => {
                let choice = self.rng.gen_bool(0.5);
                self.log.push(choice);
                Ok(choice)
            }
        }
    }

    fn fork_with_confirm_or_else(&mut self, p: f64) -> ExecResult<bool> {
        if self.deadline_elapsed() {
            return Err(Signal::UnexploredPath);
        }
        let choice = self.rng.gen_bool(p.clamp(0.0, 1.0));
        self.log.push(choice);
        Ok(choice)
    }

    fn find_model_value(&mut self, expr: &Dynamic<'ctx>) -> ExecResult<Dynamic<'ctx>> {
        self.common.find_model_value(expr)
    }

    fn checkpoint(&mut self) -> Checkpoint {
        self.common.checkpoint()
    }

    fn restore(&mut self, checkpoint: Checkpoint) {
        self.common.restore(checkpoint);
    }

    fn framework(&self) -> FrameworkGuard<'_> {
        self.common.framework()
    }

    fn in_framework(&self) -> bool {
        self.common.framework_depth.get() > 0
    }

    fn deadline_elapsed(&self) -> bool {
        Instant::now() >= self.common.deadline
    }

    fn execution_log(&self) -> Option<Vec<bool>> {
        Some(self.log.clone())
    }
}

impl<'t, 'ctx, 'f> Tracking<'t, 'ctx, 'f> {
    fn tree_node(&self) -> &NodeKind {
        &self.tree.nodes[self.current.0]
    }
}

/// Deterministic replay of a previously recorded bit sequence. Used to
/// reproduce a counterexample outside the analyzer loop (e.g. when printing
/// a failing call's concrete arguments a second time without re-exploring).
pub struct Replay<'ctx, 'f> {
    common: Common<'ctx, 'f>,
    script: std::collections::VecDeque<bool>,
}

impl<'ctx, 'f> Replay<'ctx, 'f> {
    #[must_use]
    pub fn new(facade: &'f Facade<'ctx>, per_path_timeout: Duration, script: Vec<bool>) -> Self {
        Self { common: Common::new(facade, per_path_timeout), script: script.into() }
    }

    fn next_bit(&mut self) -> ExecResult<bool> {
        self.script.pop_front().ok_or(Signal::UnexploredPath)
    }
}

impl<'ctx, 'f> StateSpace<'ctx> for Replay<'ctx, 'f> {
    fn choose_possible(&mut self, expr: &Bool<'ctx>, _favor_true: bool) -> ExecResult<bool> {
        let choice = self.next_bit()?;
        if choice { self.common.facade.assert_bool(expr) } else { self.common.facade.assert_bool(&expr.not()) };
        Ok(choice)
    }

    fn smt_fork(&mut self, expr: Option<&Bool<'ctx>>) -> ExecResult<bool> {
        match expr {
            Some(e) => self.choose_possible(e, false),
            None => self.next_bit(),
        }
    }

    fn fork_with_confirm_or_else(&mut self, _p: f64) -> ExecResult<bool> {
        self.next_bit()
    }

    fn find_model_value(&mut self, expr: &Dynamic<'ctx>) -> ExecResult<Dynamic<'ctx>> {
        self.common.find_model_value(expr)
    }

    fn checkpoint(&mut self) -> Checkpoint {
        self.common.checkpoint()
    }

    fn restore(&mut self, checkpoint: Checkpoint) {
        self.common.restore(checkpoint);
    }

    fn framework(&self) -> FrameworkGuard<'_> {
        self.common.framework()
    }

    fn in_framework(&self) -> bool {
        self.common.framework_depth.get() > 0
    }

    fn deadline_elapsed(&self) -> bool {
        Instant::now() >= self.common.deadline
    }
}

/// `process_slice_vs_symbolic_len`: normalizes an index or slice
/// against a symbolic length by *forking*, not a solver `If`, so the rest of
/// the path only ever deals with one concrete shape of the access. Lives
/// here rather than in `value.rs` because it needs a `StateSpace` to fork
/// with.
pub fn normalize_index<'ctx>(
    space: &mut dyn StateSpace<'ctx>,
    ctx: &'ctx z3::Context,
    index: &z3::ast::Int<'ctx>,
    len: &z3::ast::Int<'ctx>,
) -> ExecResult<z3::ast::Int<'ctx>> {
    let zero = z3::ast::Int::from_i64(ctx, 0);
    let neg_len = z3::ast::Int::from_i64(ctx, 0) - len;
    let out_of_range = Bool::or(ctx, &[&index.ge(len), &index.lt(&neg_len)]);
    if space.choose_possible(&out_of_range, false)? {
        return Err(Signal::Raised(crate::signal::Raised {
            exc_type: "IndexError".to_string(),
            message: "index out of range".to_string(),
            traceback: vec![],
        }));
    }
    let is_negative = space.choose_possible(&index.lt(&zero), false)?;
    Ok(if is_negative { index + len } else { index.clone() })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn combine_prefers_refuted_over_confirmed() {
        assert_eq!(Status::combine(Status::Refuted, Status::Confirmed), Status::Refuted);
        assert_eq!(Status::combine(Status::Confirmed, Status::Confirmed), Status::Confirmed);
        assert_eq!(Status::combine(Status::Unknown, Status::Confirmed), Status::Unknown);
    }

    #[test]
    fn fresh_tree_root_is_unknown_and_not_exhausted() {
        let tree = SearchTree::new();
        assert_eq!(tree.status(SearchTree::ROOT), Status::Unknown);
        assert!(!tree.exhausted(SearchTree::ROOT));
    }
}
