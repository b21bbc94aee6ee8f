//! Classifies an exception raised while evaluating target code.
//!
//! A plain `match` over [`Signal`] returning a [`Verdict`] stands in for the
//! pattern-matching-on-exception-hierarchy idiom a host runtime with its own
//! exception classes would use — there is no exception hierarchy to walk in
//! Rust, so the dispatch collapses to a flat enum match.

use crate::messages::{AnalysisMessage, MessageKind};
use crate::signal::{ExecResult, Raised, Signal};

/// Symbolic-value type names that, if they appear in a `TypeError`'s
/// message, mean the target tripped over the engine's own proxy machinery
/// rather than raising a genuine user-level `TypeError`.
const SYMBOLIC_TYPE_MARKERS: &[&str] = &["SymbolicInt", "SymbolicStr", "SymbolicBool", "SymbolicFloat", "ProxyStruct"];

/// The always-allowed exception, regardless of the target's
/// declared `raises` set (a target that cannot yet implement a branch is
/// never penalized for admitting it via `NotImplementedError`).
const ALWAYS_ALLOWED: &str = "NotImplementedError";

/// What came out of classifying one `Signal::Raised` (or the special-cased
/// `Signal::NestedPostconditionFailed`). Everything else in [`Signal`]
/// propagates unchanged — see the module doc.
#[derive(Debug)]
pub enum Verdict {
    /// The exception is declared (or always-allowed); this path confirms.
    Confirmed,
    /// An undeclared exception escaped the target; this path is refuted.
    Refuted(AnalysisMessage),
    /// A nested call's own postcondition failed; drop this path silently —
    /// the nested call's own analysis will surface it.
    Ignore,
}

/// Enough context to classify one exception: the target's declared
/// `raises` set, and where to file a `Refuted` message if produced.
pub struct FilterContext<'a> {
    pub declared_raises: &'a std::collections::HashSet<String>,
    pub target_filename: &'a str,
    pub target_line: u32,
}

/// Classifies `signal`:
/// - `NestedPostconditionFailed` -> `Ok(Verdict::Ignore)`;
/// - `Raised` -> `Ok(Verdict::Confirmed)` or `Ok(Verdict::Refuted(..))`, or
///   reclassified to `Err(Signal::Unsupported(..))` for the symbolic-marker
///   `TypeError` case;
/// - everything else (`UnexploredPath`, `IgnoreAttempt`, `Unsupported`,
///   `Internal`) propagates unchanged via `Err`, since those are
///   engine-internal signals the filter never swallows.
pub fn filter(signal: Signal, ctx: &FilterContext<'_>) -> ExecResult<Verdict> {
    match signal {
        Signal::NestedPostconditionFailed => Ok(Verdict::Ignore),
        Signal::Raised(raised) => classify_raised(raised, ctx),
        other => Err(other),
    }
}

fn classify_raised(raised: Raised, ctx: &FilterContext<'_>) -> ExecResult<Verdict> {
    if raised.exc_type == "TypeError" && SYMBOLIC_TYPE_MARKERS.iter().any(|m| raised.message.contains(m)) {
        return Err(Signal::Unsupported(format!("symbolic type leaked into a TypeError: {}", raised.message)));
    }
    if raised.exc_type == ALWAYS_ALLOWED || ctx.declared_raises.contains(&raised.exc_type) {
        return Ok(Verdict::Confirmed);
    }
    Ok(Verdict::Refuted(AnalysisMessage {
        kind: MessageKind::ExecErr,
        text: format!("{}: {}", raised.exc_type, raised.message),
        filename: ctx.target_filename.to_string(),
        line: ctx.target_line,
        column: 0,
        traceback: raised.traceback,
        test_fn: None,
        condition_src: None,
        execution_log: None,
    }))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;

    fn ctx(declared: &HashSet<String>) -> FilterContext<'_> {
        FilterContext { declared_raises: declared, target_filename: "t.py", target_line: 1 }
    }

    #[test]
    fn declared_raise_confirms() {
        let mut declared = HashSet::new();
        declared.insert("ZeroDivisionError".to_string());
        let signal = Signal::Raised(Raised { exc_type: "ZeroDivisionError".into(), message: "div".into(), traceback: vec![] });
        assert!(matches!(filter(signal, &ctx(&declared)), Ok(Verdict::Confirmed)));
    }

    #[test]
    fn undeclared_raise_refutes() {
        let declared = HashSet::new();
        let signal = Signal::Raised(Raised { exc_type: "ValueError".into(), message: "bad".into(), traceback: vec![] });
        assert!(matches!(filter(signal, &ctx(&declared)), Ok(Verdict::Refuted(_))));
    }

    #[test]
    fn not_implemented_error_always_confirms() {
        let declared = HashSet::new();
        let signal = Signal::Raised(Raised { exc_type: "NotImplementedError".into(), message: String::new(), traceback: vec![] });
        assert!(matches!(filter(signal, &ctx(&declared)), Ok(Verdict::Confirmed)));
    }

    #[test]
    fn nested_postcondition_failure_is_ignored() {
        let declared = HashSet::new();
        assert!(matches!(filter(Signal::NestedPostconditionFailed, &ctx(&declared)), Ok(Verdict::Ignore)));
    }

    #[test]
    fn symbolic_marker_type_error_is_reclassified_unsupported() {
        let declared = HashSet::new();
        let signal = Signal::Raised(Raised {
            exc_type: "TypeError".into(),
            message: "unsupported operand for SymbolicInt".into(),
            traceback: vec![],
        });
        assert!(matches!(filter(signal, &ctx(&declared)), Err(Signal::Unsupported(_))));
    }

    #[test]
    fn internal_signal_propagates() {
        let declared = HashSet::new();
        assert!(matches!(filter(Signal::Internal("bug".into()), &ctx(&declared)), Err(Signal::Internal(_))));
    }
}
