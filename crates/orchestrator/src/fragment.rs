//! Turn output fragments.
//!
//! A turn never forwards raw model tokens. Callers receive at most one
//! warning followed by the composed sections, each as a [`TurnFragment`]
//! that the gateway forwards over SSE and the chat service persists in its
//! rendered markdown form.

use serde::{Deserialize, Serialize};

use crate::composer::ComposedAnswer;

/// Explanation emitted when research mode finds nothing to ground the turn on.
pub const NO_CONTEXT_WARNING: &str =
    "No relevant information found for research mode. Proceeding without RAG context.";

/// One piece of a turn's output, in emission order:
/// - `warning`: research mode had no usable context
/// - `decision`: the composed Decision section
/// - `why`: the composed Why section
/// - `next_actions`: the composed Next 3 Actions section
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum TurnFragment {
    Warning { content: String },
    Decision { content: String },
    Why { content: String },
    NextActions { content: String },
}

impl TurnFragment {
    pub fn no_context_warning() -> Self {
        Self::Warning {
            content: NO_CONTEXT_WARNING.into(),
        }
    }

    /// The non-empty sections of `answer`, in fixed order.
    pub fn from_answer(answer: ComposedAnswer) -> Vec<Self> {
        [
            Self::Decision {
                content: answer.decision,
            },
            Self::Why { content: answer.why },
            Self::NextActions {
                content: answer.next_actions,
            },
        ]
        .into_iter()
        .filter(|fragment| !fragment.content().is_empty())
        .collect()
    }

    /// SSE event name for this fragment.
    pub fn event_type(&self) -> &'static str {
        match self {
            Self::Warning { .. } => "warning",
            Self::Decision { .. } => "decision",
            Self::Why { .. } => "why",
            Self::NextActions { .. } => "next_actions",
        }
    }

    pub fn content(&self) -> &str {
        match self {
            Self::Warning { content }
            | Self::Decision { content }
            | Self::Why { content }
            | Self::NextActions { content } => content,
        }
    }

    /// Markdown form, as shown to the user and stored in the transcript.
    pub fn render(&self) -> String {
        match self {
            Self::Warning { content } => format!("**Warning**: {content}\n\n"),
            Self::Decision { content } => format!("**Decision**\n{content}\n\n"),
            Self::Why { content } => format!("**Why**\n{content}\n\n"),
            Self::NextActions { content } => format!("**Next 3 Actions**\n{content}\n\n"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::composer::compose;

    #[test]
    fn rendering() {
        assert_eq!(
            TurnFragment::no_context_warning().render(),
            "**Warning**: No relevant information found for research mode. Proceeding without RAG context.\n\n"
        );
        assert_eq!(
            TurnFragment::Decision { content: "Ship v1.".into() }.render(),
            "**Decision**\nShip v1.\n\n"
        );
        assert_eq!(
            TurnFragment::NextActions { content: "Test".into() }.render(),
            "**Next 3 Actions**\nTest\n\n"
        );
    }

    #[test]
    fn empty_sections_are_omitted() {
        let fragments = TurnFragment::from_answer(compose("Decision: go Next 3 Actions: a"));
        let kinds: Vec<&str> = fragments.iter().map(TurnFragment::event_type).collect();
        assert_eq!(kinds, vec!["decision", "next_actions"]);

        assert!(TurnFragment::from_answer(compose("no markers")).is_empty());
    }

    #[test]
    fn serialization() {
        let json = serde_json::to_string(&TurnFragment::Why { content: "because".into() }).unwrap();
        assert!(json.contains(r#""type":"why""#));
        assert!(json.contains(r#""content":"because""#));
    }
}
