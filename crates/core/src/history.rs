//! Ordered log of conversation turns used as generation context.

use serde::Serialize;
use std::fmt;

/// Number of most recent turns handed to the generation service per reply.
pub const CONTEXT_WINDOW: usize = 10;

/// Who spoke a turn.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum TurnRole {
    User,
    Assistant,
}

impl fmt::Display for TurnRole {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TurnRole::User => write!(f, "user"),
            TurnRole::Assistant => write!(f, "assistant"),
        }
    }
}

/// A single utterance tagged with the round it belongs to.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ConversationTurn {
    pub role: TurnRole,
    pub round: u32,
    pub text: String,
}

impl ConversationTurn {
    /// The turn as it is presented to the generation service.
    pub fn render(&self) -> String {
        match self.role {
            TurnRole::User => format!("第{}轮学员回答: {}", self.round, self.text),
            TurnRole::Assistant => format!("第{}轮讲师回复: {}", self.round, self.text),
        }
    }
}

/// Chronological turn log. Everything is kept; only the context window
/// handed to the generation service is bounded.
#[derive(Debug, Clone, Default)]
pub struct ConversationHistory {
    turns: Vec<ConversationTurn>,
}

impl ConversationHistory {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push_user(&mut self, round: u32, text: impl Into<String>) {
        self.turns.push(ConversationTurn {
            role: TurnRole::User,
            round,
            text: text.into(),
        });
    }

    pub fn push_assistant(&mut self, round: u32, text: impl Into<String>) {
        self.turns.push(ConversationTurn {
            role: TurnRole::Assistant,
            round,
            text: text.into(),
        });
    }

    /// The most recent [`CONTEXT_WINDOW`] turns, oldest first.
    pub fn recent(&self) -> &[ConversationTurn] {
        let start = self.turns.len().saturating_sub(CONTEXT_WINDOW);
        &self.turns[start..]
    }

    pub fn turns(&self) -> &[ConversationTurn] {
        &self.turns
    }

    pub fn len(&self) -> usize {
        self.turns.len()
    }

    pub fn is_empty(&self) -> bool {
        self.turns.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_recent_is_sliding_window() {
        let mut history = ConversationHistory::new();
        for round in 1..=7 {
            history.push_user(round, format!("answer {round}"));
            history.push_assistant(round, format!("reply {round}"));
        }
        assert_eq!(history.len(), 14);

        let recent = history.recent();
        assert_eq!(recent.len(), CONTEXT_WINDOW);
        // Oldest four turns (rounds 1 and 2) fall out of the window.
        assert_eq!(recent[0].round, 3);
        assert_eq!(recent[0].role, TurnRole::User);
        assert_eq!(recent[9].text, "reply 7");
    }

    #[test]
    fn test_recent_with_short_history() {
        let mut history = ConversationHistory::new();
        assert!(history.recent().is_empty());
        history.push_user(1, "hello");
        assert_eq!(history.recent().len(), 1);
    }

    #[test]
    fn test_render_labels_round_and_role() {
        let mut history = ConversationHistory::new();
        history.push_user(2, "先做调研");
        history.push_assistant(2, "很好");
        assert_eq!(history.turns()[0].render(), "第2轮学员回答: 先做调研");
        assert_eq!(history.turns()[1].render(), "第2轮讲师回复: 很好");
        assert_eq!(history.turns()[1].role.to_string(), "assistant");
    }
}
