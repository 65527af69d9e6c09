//! Answer composition.
//!
//! Turns free-form model output into the fixed three-section answer:
//! **Decision**, **Why** and **Next 3 Actions**. The scanner is pure and
//! deterministic:
//!
//! - Each field's body is the text after its marker, up to the next
//!   recognized *later* marker or the end of the text, trimmed.
//! - Markers are case-sensitive and must carry their trailing colon.
//! - The first occurrence of a marker wins; text before it is ignored.
//! - A marker that shows up out of order (`Decision:` after `Why:`) is
//!   not a boundary for the earlier field, so it stays in that body.
//! - A missing marker yields an empty field, never an error.

use serde::{Deserialize, Serialize};

pub const DECISION_MARKER: &str = "Decision:";
pub const WHY_MARKER: &str = "Why:";
pub const NEXT_ACTIONS_MARKER: &str = "Next 3 Actions:";

/// Markers in their fixed field order.
const MARKERS: [&str; 3] = [DECISION_MARKER, WHY_MARKER, NEXT_ACTIONS_MARKER];

/// The structured form of one assistant answer.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ComposedAnswer {
    #[serde(rename = "Decision")]
    pub decision: String,
    #[serde(rename = "Why")]
    pub why: String,
    #[serde(rename = "Next 3 Actions")]
    pub next_actions: String,
}

impl ComposedAnswer {
    /// True when no marker produced any text.
    pub fn is_empty(&self) -> bool {
        self.decision.is_empty() && self.why.is_empty() && self.next_actions.is_empty()
    }
}

/// Split raw model output into its three sections.
pub fn compose(raw: &str) -> ComposedAnswer {
    ComposedAnswer {
        decision: field_body(raw, 0),
        why: field_body(raw, 1),
        next_actions: field_body(raw, 2),
    }
}

/// Body of the field at `index` in [`MARKERS`].
fn field_body(raw: &str, index: usize) -> String {
    let marker = MARKERS[index];
    let Some(start) = raw.find(marker) else {
        return String::new();
    };
    let rest = &raw[start + marker.len()..];

    // Only markers of later fields terminate a body.
    let end = MARKERS[index + 1..]
        .iter()
        .filter_map(|later| rest.find(later))
        .min()
        .unwrap_or(rest.len());

    rest[..end].trim().to_string()
}

/// Collects streamed tokens for composition once the stream has ended.
///
/// Tokens pass through untouched; nothing is parsed until [`compose`] is
/// called on the complete text.
///
/// [`compose`]: TokenCollector::compose
#[derive(Debug, Default)]
pub struct TokenCollector {
    buffer: String,
}

impl TokenCollector {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record `token` and hand it back unchanged.
    pub fn pass<'a>(&mut self, token: &'a str) -> &'a str {
        self.buffer.push_str(token);
        token
    }

    pub fn text(&self) -> &str {
        &self.buffer
    }

    pub fn compose(&self) -> ComposedAnswer {
        compose(&self.buffer)
    }

    pub fn into_text(self) -> String {
        self.buffer
    }
}
