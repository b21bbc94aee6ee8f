//! Every way evaluating a piece of target code can fail to produce a value.
//!
//! A host runtime with its own exception hierarchy would give each of these
//! its own exception class and pattern-match on them with `isinstance`; here
//! that collapses into one enum that every fallible evaluation step returns
//! instead of raising.

use std::fmt;

/// One frame of a captured stack trace, as reported by the target's own runtime.
#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub struct Frame {
    pub filename: String,
    pub line: u32,
}

/// An exception raised while evaluating target code: a precondition, the
/// function body, or a postcondition.
#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub struct Raised {
    /// The exception's type name, e.g. `"ZeroDivisionError"`.
    pub exc_type: String,
    pub message: String,
    pub traceback: Vec<Frame>,
}

impl fmt::Display for Raised {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.exc_type, self.message)
    }
}

/// Everything that can interrupt evaluation of target code.
///
/// Every precondition, the function body, and the postcondition are each
/// evaluated inside an [`crate::exception_filter`] scope that turns a
/// `Signal` into a piece of [`crate::messages::AnalysisMessage`] or into a
/// verdict: most variants are "local action, maybe surfaced";
/// [`Signal::Internal`] is the one variant that scope never swallows.
#[derive(Debug, Clone)]
pub enum Signal {
    /// The target raised an exception (user-level, or synthesized by the
    /// engine itself, e.g. an out-of-range index).
    Raised(Raised),
    /// A postcondition failed while evaluating a *nested* call. The nested
    /// call's own analysis will surface this independently, so the current
    /// path is dropped without recording any status.
    NestedPostconditionFailed,
    /// The per-path deadline elapsed, or a replay ran out of recorded
    /// decisions. Caught by the analyzer loop and recorded as `Unknown` for
    /// the affected subtree.
    UnexploredPath,
    /// The current symbolic state became self-contradictory (e.g. two
    /// decompositions of the same dict disagree). Drop the path silently.
    IgnoreAttempt,
    /// A construct this engine does not model (e.g. a proxy-intolerant
    /// builtin). Abandon the current path as Unknown.
    Unsupported(String),
    /// An invariant of the engine itself was violated. Not a finding about
    /// the target: something is wrong with the engine and the analyzer run
    /// should abort.
    Internal(String),
}

impl fmt::Display for Signal {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Raised(r) => write!(f, "{r}"),
            Self::NestedPostconditionFailed => write!(f, "postcondition failed in a nested call"),
            Self::UnexploredPath => write!(f, "path not fully explored"),
            Self::IgnoreAttempt => write!(f, "symbolic state became inconsistent"),
            Self::Unsupported(detail) => write!(f, "unsupported construct: {detail}"),
            Self::Internal(detail) => write!(f, "internal engine error: {detail}"),
        }
    }
}

impl std::error::Error for Signal {}

/// The result of evaluating one piece of target code.
pub type ExecResult<T> = Result<T, Signal>;
