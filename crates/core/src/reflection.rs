//! Rolling interviewer notes: the full turn transcript plus periodic
//! LLM-written reflections that the follow-up prompt can lean on.

use crate::llm::{self, LlmGateway};

/// New transcript characters accumulated before another reflection is due.
const REFLECT_EVERY_CHARS: usize = 200;

#[derive(Debug, Clone)]
pub struct Turn {
    pub speaker: String,
    pub text: String,
}

#[derive(Debug, Default)]
pub struct ReflectionKeeper {
    transcript: Vec<Turn>,
    reflections: Vec<String>,
    chars_since_last: usize,
}

impl ReflectionKeeper {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_turn(&mut self, speaker: &str, text: &str) {
        let text = text.trim();
        self.chars_since_last += text.len();
        self.transcript.push(Turn {
            speaker: speaker.to_string(),
            text: text.to_string(),
        });
    }

    /// True once enough new material has accumulated since the last
    /// summary.
    pub fn should_reflect(&self) -> bool {
        self.chars_since_last >= REFLECT_EVERY_CHARS
    }

    /// Summarises the recent transcript through the gateway. A failed call
    /// leaves the notes unchanged; the counter is kept so the next turn
    /// retries.
    pub async fn reflect(&mut self, gateway: &dyn LlmGateway) {
        if self.transcript.is_empty() {
            return;
        }

        let recent: String = self
            .transcript
            .iter()
            .rev()
            .take(10)
            .rev()
            .map(|t| format!("[{}] {}", t.speaker, t.text))
            .collect::<Vec<_>>()
            .join("\n");

        match llm::reflect_summary(gateway, &recent).await {
            Ok(summary) => {
                self.reflections
                    .push(format!("Reflection {}: {}", self.reflections.len() + 1, summary));
                self.chars_since_last = 0;
            }
            Err(e) => {
                tracing::warn!("reflection summary failed: {e}");
            }
        }
    }

    /// A compact view for prompts: the last reflections followed by the
    /// last few turns.
    pub fn notes(&self) -> String {
        let reflections: Vec<&str> = self
            .reflections
            .iter()
            .rev()
            .take(3)
            .rev()
            .map(|s| s.as_str())
            .collect();
        let turns: Vec<String> = self
            .transcript
            .iter()
            .rev()
            .take(6)
            .rev()
            .map(|t| format!("[{}] {}", t.speaker, t.text))
            .collect();

        let mut out = reflections.join("\n");
        if !out.is_empty() && !turns.is_empty() {
            out.push('\n');
        }
        out.push_str(&turns.join("\n"));
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::llm::MockLlmGateway;

    #[test]
    fn reflect_is_due_after_enough_material() {
        let mut keeper = ReflectionKeeper::new();
        keeper.add_turn("user", "short");
        assert!(!keeper.should_reflect());
        keeper.add_turn("user", &"a".repeat(250));
        assert!(keeper.should_reflect());
    }

    #[tokio::test]
    async fn reflect_appends_a_summary_and_resets_the_counter() {
        let mut gateway = MockLlmGateway::new();
        gateway
            .expect_chat_text()
            .returning(|_, _, _| Box::pin(async { Ok("- talked about the team".into()) }));

        let mut keeper = ReflectionKeeper::new();
        keeper.add_turn("user", &"a".repeat(250));
        keeper.reflect(&gateway).await;

        assert!(!keeper.should_reflect());
        assert!(keeper.notes().contains("Reflection 1"));
    }

    #[tokio::test]
    async fn failed_reflection_keeps_the_counter() {
        let mut gateway = MockLlmGateway::new();
        gateway
            .expect_chat_text()
            .returning(|_, _, _| Box::pin(async { Err(crate::llm::GatewayError::NoChoices) }));

        let mut keeper = ReflectionKeeper::new();
        keeper.add_turn("user", &"a".repeat(250));
        keeper.reflect(&gateway).await;

        assert!(keeper.should_reflect());
    }

    #[test]
    fn notes_combine_reflections_and_recent_turns() {
        let mut keeper = ReflectionKeeper::new();
        keeper.add_turn("assistant", "Tell me about your family.");
        keeper.add_turn("user", "We are four, two kids.");
        let notes = keeper.notes();
        assert!(notes.contains("[assistant] Tell me about your family."));
        assert!(notes.contains("[user] We are four, two kids."));
    }
}
