//! `AnalysisMessage` and the `MessageCollector` / `locate_message` /
//! `describe_call` helpers that dedup, sort, and format an analyzer run's
//! findings.
//!
//! Modeled as plain structs/functions rather than dataclasses and
//! module-level globals, with state passed explicitly through function
//! arguments instead of living ambiently.

use serde::{Deserialize, Serialize};
use strum::Display;

use crate::signal::Frame;

/// The six ways a path attempt can produce a user-visible finding.
/// Declaration order doubles as the `Ord` tie-break used by
/// [`MessageCollector`]'s sort key — arbitrary but stable. `Display` (via
/// `strum`, rather than a hand-written `impl fmt::Display`) gives a driver
/// a ready-made label for each kind without re-deriving the obvious
/// `Syntax -> "Syntax"` mapping by hand.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize, Display)]
pub enum MessageKind {
    Syntax,
    PreUnsat,
    CannotConfirm,
    ExecErr,
    PostErr,
    PostFail,
}

/// One reportable finding from the analyzer.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AnalysisMessage {
    pub kind: MessageKind,
    pub text: String,
    pub filename: String,
    pub line: u32,
    pub column: u32,
    pub traceback: Vec<Frame>,
    pub test_fn: Option<String>,
    pub condition_src: Option<String>,
    /// The scripted bit sequence a `Tracking` run consumed to reach this
    /// finding, if one was recorded (`state_space::StateSpace::execution_log`).
    /// Feeds [`crate::replay`] so the counterexample can be reproduced
    /// without re-exploring the tree.
    pub execution_log: Option<Vec<bool>>,
}

impl AnalysisMessage {
    fn sort_key(&self) -> (String, u32, u32, MessageKind) {
        (self.filename.clone(), self.line, self.column, self.kind)
    }
}

/// Accumulates messages across every path attempt in one analyzer run,
/// deduping exact repeats and sorting by `(filename, line, column, kind)`
/// before handing them back, so that re-running the same target produces
/// the same readable ordering even though paths may be explored in a
/// different order from run to run.
#[derive(Debug, Default)]
pub struct MessageCollector {
    messages: Vec<AnalysisMessage>,
}

impl MessageCollector {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, message: AnalysisMessage) {
        if !self.messages.contains(&message) {
            self.messages.push(message);
        }
    }

    pub fn extend(&mut self, messages: impl IntoIterator<Item = AnalysisMessage>) {
        for message in messages {
            self.push(message);
        }
    }

    /// Consumes the collector, returning the deduped messages sorted for
    /// stable display.
    #[must_use]
    pub fn finish(mut self) -> Vec<AnalysisMessage> {
        self.messages.sort_by_key(AnalysisMessage::sort_key);
        self.messages
    }
}

/// Encodes a `Tracking` run's scripted fork bits into the compact binary
/// form a driver persists alongside a counterexample so a later process can
/// [`crate::replay`] it without re-exploring the tree, matching the
/// teacher's own use of `postcard` for its session-snapshot transport.
///
/// # Errors
/// Returns `postcard`'s error if the buffer cannot be allocated; encoding a
/// `Vec<bool>` itself cannot otherwise fail.
pub fn encode_execution_log(log: &[bool]) -> Result<Vec<u8>, postcard::Error> {
    postcard::to_allocvec(log)
}

/// Inverse of [`encode_execution_log`].
///
/// # Errors
/// Returns `postcard`'s error if `bytes` is not a valid encoding of a
/// `Vec<bool>`.
pub fn decode_execution_log(bytes: &[u8]) -> Result<Vec<bool>, postcard::Error> {
    postcard::from_bytes(bytes)
}

/// Renders a run's findings as indented JSON, for a driver that wants a
/// human-readable dump rather than the default text summary (the teacher
/// reaches for `serde_json` the same way for its REPL and test fixtures).
///
/// # Errors
/// Returns `serde_json`'s error if any message's field somehow fails to
/// serialize (cannot happen for this struct's fields, but the fallible
/// signature matches `serde_json::to_string_pretty`'s own).
pub fn messages_to_json(messages: &[AnalysisMessage]) -> serde_json::Result<String> {
    serde_json::to_string_pretty(messages)
}

/// Counterexample rendering: `"when calling f(x = 3) (which returns 4)"`.
/// `args` is rendered in declaration order;
/// `returned` is omitted for a void/unchecked return.
#[must_use]
pub fn describe_call(fn_name: &str, args: &[(String, String)], returned: Option<&str>) -> String {
    let args = args.iter().map(|(name, value)| format!("{name} = {value}")).collect::<Vec<_>>().join(", ");
    match returned {
        Some(ret) => format!("when calling {fn_name}({args}) (which returns {ret})"),
        None => format!("when calling {fn_name}({args})"),
    }
}

/// Remaps a failure's site to the target function's own definition when the
/// frame that actually raised isn't inside the target's file: a failure is
/// located at (a) the failing expression's own site if that site is inside
/// the target function, else (b) remapped to the target's definition site
/// with the original expression quoted.
pub fn locate_message(
    kind: MessageKind,
    base_text: &str,
    target_filename: &str,
    target_line: u32,
    raised_at: Option<&Frame>,
    traceback: Vec<Frame>,
    source: &dyn crate::conditions::SourceLines,
) -> AnalysisMessage {
    match raised_at {
        Some(frame) if frame.filename == target_filename => AnalysisMessage {
            kind,
            text: base_text.to_string(),
            filename: frame.filename.clone(),
            line: frame.line,
            column: 0,
            traceback,
            test_fn: None,
            condition_src: None,
            execution_log: None,
        },
        Some(frame) => {
            let quoted = source.line_text(&frame.filename, frame.line).unwrap_or_default();
            AnalysisMessage {
                kind,
                text: format!("{base_text} (raised at {}:{}: `{quoted}`)", frame.filename, frame.line),
                filename: target_filename.to_string(),
                line: target_line,
                column: 0,
                traceback,
                test_fn: None,
                condition_src: None,
                execution_log: None,
            }
        }
        None => AnalysisMessage {
            kind,
            text: base_text.to_string(),
            filename: target_filename.to_string(),
            line: target_line,
            column: 0,
            traceback,
            test_fn: None,
            condition_src: None,
            execution_log: None,
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn msg(line: u32, kind: MessageKind) -> AnalysisMessage {
        AnalysisMessage {
            kind,
            text: "x".into(),
            filename: "a.py".into(),
            line,
            column: 0,
            traceback: vec![],
            test_fn: None,
            condition_src: None,
            execution_log: None,
        }
    }

    #[test]
    fn collector_dedups_exact_repeats() {
        let mut c = MessageCollector::new();
        c.push(msg(3, MessageKind::PostFail));
        c.push(msg(3, MessageKind::PostFail));
        assert_eq!(c.finish().len(), 1);
    }

    #[test]
    fn collector_sorts_by_line_then_kind() {
        let mut c = MessageCollector::new();
        c.push(msg(5, MessageKind::PostFail));
        c.push(msg(2, MessageKind::ExecErr));
        let sorted = c.finish();
        assert_eq!(sorted[0].line, 2);
        assert_eq!(sorted[1].line, 5);
    }

    #[test]
    fn describe_call_formats_args_and_return() {
        let s = describe_call("f", &[("x".to_string(), "3".to_string())], Some("4"));
        assert_eq!(s, "when calling f(x = 3) (which returns 4)");
    }

    #[test]
    fn execution_log_round_trips_through_postcard() {
        let log = vec![true, false, false, true, true];
        let bytes = encode_execution_log(&log).unwrap();
        assert_eq!(decode_execution_log(&bytes).unwrap(), log);
    }

    #[test]
    fn messages_render_as_json() {
        let json = messages_to_json(&[msg(3, MessageKind::PostFail)]).unwrap();
        assert!(json.contains("\"kind\": \"PostFail\""));
        assert!(json.contains("\"line\": 3"));
    }
}
