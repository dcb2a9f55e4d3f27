//! The per-session interview controller: cursor into the script, answer
//! bookkeeping, and the follow-up / advance decision loop.
//!
//! The controller holds a handle to the shared question store but reads the
//! enrichment fields live at every turn, so a question whose metadata lands
//! mid-interview is picked up immediately. The "missing subtopics" view is
//! session-local: a follow-up turn is evaluated against the subset that was
//! still missing, and the store is never written through a session.

use crate::coverage::CoverageDetector;
use crate::llm::{self, LlmGateway, LlmSettings};
use crate::reflection::ReflectionKeeper;
use crate::store::QuestionStore;
use crate::topic::{self, Topic};
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::collections::HashMap;
use std::sync::Arc;

/// Consecutive follow-ups allowed on one question; the next answer after
/// the cap always advances, whatever its coverage.
const MAX_CONSECUTIVE_FOLLOW_UPS: u32 = 2;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum QuestionKind {
    Main,
    FollowUp,
    Completion,
}

/// What the candidate should hear next.
#[derive(Debug, Clone, Serialize)]
pub struct CurrentQuestion {
    pub id: String,
    pub text: String,
    #[serde(rename = "type")]
    pub kind: QuestionKind,
}

/// The controller's verdict on one submitted answer.
#[derive(Debug, Clone, Serialize)]
pub struct AnswerOutcome {
    pub needs_follow_up: bool,
    pub coverage_percent: f32,
    pub missing: Vec<String>,
}

pub struct InterviewSession {
    pub user_id: String,
    pub session_id: String,
    store: Arc<QuestionStore>,
    idx: usize,
    questions_asked: Vec<String>,
    answers: HashMap<String, Vec<String>>,
    current_topic: Option<String>,
    current_subtopics: Vec<String>,
    current_keywords: Vec<Vec<String>>,
    /// Session-local view of the current question's topics. `Some` while a
    /// follow-up is pending, holding only the still-missing subset.
    active_topics: Option<Vec<Topic>>,
    follow_up_text: Option<String>,
    follow_up_for_subtopic: Option<String>,
    consecutive_follow_ups: u32,
    coverage_history: Vec<f32>,
    reflection: ReflectionKeeper,
    completed: bool,
    score: Option<f32>,
    pub started_at: DateTime<Utc>,
}

impl InterviewSession {
    pub fn new(user_id: String, store: Arc<QuestionStore>) -> Self {
        let session_id = uuid::Uuid::new_v4().to_string();
        tracing::info!("new interview session {session_id} for user {user_id}");
        Self {
            user_id,
            session_id,
            store,
            idx: 0,
            questions_asked: Vec::new(),
            answers: HashMap::new(),
            current_topic: None,
            current_subtopics: Vec::new(),
            current_keywords: Vec::new(),
            active_topics: None,
            follow_up_text: None,
            follow_up_for_subtopic: None,
            consecutive_follow_ups: 0,
            coverage_history: Vec::new(),
            reflection: ReflectionKeeper::new(),
            completed: false,
            score: None,
            started_at: Utc::now(),
        }
    }

    pub fn is_completed(&self) -> bool {
        self.completed
    }

    pub fn score(&self) -> Option<f32> {
        self.score
    }

    pub fn questions_asked(&self) -> &[String] {
        &self.questions_asked
    }

    pub fn answers_for(&self, question_id: &str) -> &[String] {
        self.answers
            .get(question_id)
            .map(|a| a.as_slice())
            .unwrap_or_default()
    }

    /// The primary topic of the question snapshotted at the last answer.
    pub fn current_topic(&self) -> Option<&str> {
        self.current_topic.as_deref()
    }

    pub fn current_subtopics(&self) -> &[String] {
        &self.current_subtopics
    }

    pub fn current_keywords(&self) -> &[Vec<String>] {
        &self.current_keywords
    }

    /// The text to deliver next. Serving a main question records its id in
    /// `questions_asked` exactly once.
    pub async fn next_question(&mut self) -> CurrentQuestion {
        if self.completed {
            return completion_turn();
        }

        let Some(question) = self.store.get(self.idx).await else {
            self.completed = true;
            return completion_turn();
        };

        if let (Some(text), Some(subtopic)) =
            (self.follow_up_text.clone(), self.follow_up_for_subtopic.clone())
        {
            tracing::debug!("serving follow-up for subtopic '{subtopic}'");
            return CurrentQuestion {
                id: format!("{}_followup", question.id),
                text,
                kind: QuestionKind::FollowUp,
            };
        }

        if !self.questions_asked.contains(&question.id) {
            self.questions_asked.push(question.id.clone());
        }
        self.reflection.add_turn("assistant", &question.prompt);

        CurrentQuestion {
            id: question.id,
            text: question.prompt,
            kind: QuestionKind::Main,
        }
    }

    /// Ingests one answer and decides between follow-up and advance.
    ///
    /// A follow-up turn's answer is evaluated against the same question's
    /// still-missing subtopics; the cursor only moves on an advance
    /// decision.
    pub async fn submit_answer(
        &mut self,
        text: &str,
        detector: &dyn CoverageDetector,
        gateway: &dyn LlmGateway,
        coverage_threshold_percent: f32,
        settings: &LlmSettings,
    ) -> AnswerOutcome {
        if self.completed {
            return AnswerOutcome {
                needs_follow_up: false,
                coverage_percent: 0.0,
                missing: Vec::new(),
            };
        }

        let Some(question) = self.store.get(self.idx).await else {
            self.completed = true;
            return AnswerOutcome {
                needs_follow_up: false,
                coverage_percent: 0.0,
                missing: Vec::new(),
            };
        };

        // 1. Record the answer and feed the reflection keeper.
        self.answers
            .entry(question.id.clone())
            .or_default()
            .push(text.to_string());
        self.reflection.add_turn("user", text);
        if self.reflection.should_reflect() {
            self.reflection.reflect(gateway).await;
        }

        // 2. Snapshot the question's enriched fields as they are right now.
        self.current_topic = question.meta.primary_topic.clone();
        self.current_subtopics = question.meta.subtopics.clone();
        self.current_keywords = question.meta.keywords.clone();

        let topics = match &self.active_topics {
            Some(view) => view.clone(),
            None => topic::topics_from_meta(&question.meta),
        };

        // Metadata not ready (or the question has no subtopics): nothing to
        // probe, treat the answer as complete and move on.
        if topics.is_empty() {
            self.advance().await;
            return AnswerOutcome {
                needs_follow_up: false,
                coverage_percent: 100.0,
                missing: Vec::new(),
            };
        }

        // 3. Run the coverage engine.
        let focus = self
            .follow_up_for_subtopic
            .clone()
            .unwrap_or_else(|| topics[0].name.clone());
        let detection = detector.detect(text, &topics, Some(&focus)).await;

        let missing: Vec<String> = topics
            .iter()
            .filter(|t| !detection.covered.contains(&t.name))
            .map(|t| t.name.clone())
            .collect();
        let coverage_percent = (detection.coverage * 1000.0).round() / 10.0;
        self.coverage_history.push(coverage_percent);

        tracing::debug!(
            "answer covered {}/{} subtopics ({coverage_percent:.1}%), missing: {missing:?}",
            detection.covered.len(),
            topics.len()
        );

        // 4. Decide.
        let mut needs_follow_up =
            coverage_percent < coverage_threshold_percent && !missing.is_empty();

        if needs_follow_up && self.consecutive_follow_ups >= MAX_CONSECUTIVE_FOLLOW_UPS {
            tracing::info!(
                "follow-up cap reached on question {}, forcing advance",
                question.id
            );
            needs_follow_up = false;
        }

        if needs_follow_up {
            let follow_up = llm::generate_follow_up(
                gateway,
                &question.prompt,
                text,
                &self.reflection.notes(),
                &missing,
                settings,
            )
            .await;

            self.follow_up_for_subtopic = missing.first().cloned();
            self.follow_up_text = Some(follow_up.clone());
            self.reflection.add_turn("assistant", &follow_up);
            // The next turn is probed only against what is still missing.
            self.active_topics = Some(
                topics
                    .into_iter()
                    .filter(|t| missing.contains(&t.name))
                    .collect(),
            );
            self.consecutive_follow_ups += 1;
        } else {
            self.advance().await;
        }

        AnswerOutcome {
            needs_follow_up,
            coverage_percent,
            missing,
        }
    }

    /// Moves the cursor forward and clears the follow-up state. Advancing
    /// past the last question completes the session.
    async fn advance(&mut self) {
        self.follow_up_text = None;
        self.follow_up_for_subtopic = None;
        self.active_topics = None;
        self.consecutive_follow_ups = 0;

        let len = self.store.len().await;
        if self.idx + 1 >= len {
            self.completed = true;
            tracing::info!("script exhausted, session {} completed", self.session_id);
        }
        self.idx = (self.idx + 1).min(len.saturating_sub(1));
    }

    /// Ends the interview and fixes the score: the mean of the recorded
    /// coverage percentages, or a coarse bucket when nothing was evaluated.
    pub fn end(&mut self) -> f32 {
        self.completed = true;
        let score = if self.coverage_history.is_empty() {
            50.0
        } else {
            self.coverage_history.iter().sum::<f32>() / self.coverage_history.len() as f32
        };
        self.score = Some(score);
        tracing::info!("session {} ended with score {score:.1}", self.session_id);
        score
    }
}

fn completion_turn() -> CurrentQuestion {
    CurrentQuestion {
        id: "end".into(),
        text: "The interview is complete. Thank you for your time.".into(),
        kind: QuestionKind::Completion,
    }
}
