//! The enriched question model shared by the store, the controller and the
//! orchestration surface.

use serde::{Deserialize, Serialize};

/// Derived metadata for one scripted question. All vectors are parallel to
/// `subtopics`; every list is empty until background enrichment has run.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct QuestionMeta {
    pub primary_topic: Option<String>,
    pub subtopics: Vec<String>,
    pub keywords: Vec<Vec<String>>,
    pub lemma_sets: Vec<Vec<String>>,
    pub fuzzy_norms: Vec<String>,
    pub vectors: Vec<Vec<f32>>,
}

impl QuestionMeta {
    /// True once the enrichment pipeline has produced usable metadata.
    pub fn is_ready(&self) -> bool {
        self.primary_topic.is_some() && !self.subtopics.is_empty()
    }

    /// The parallel-lists invariant: every derived list matches `subtopics`
    /// in length. Holds trivially for the empty (pending) meta.
    pub fn is_consistent(&self) -> bool {
        let n = self.subtopics.len();
        self.keywords.len() == n
            && self.lemma_sets.len() == n
            && self.fuzzy_norms.len() == n
            && self.vectors.len() == n
    }
}

/// One scripted interview question: stable id, prompt text and whatever
/// metadata has been produced for it so far.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Question {
    pub id: String,
    pub prompt: String,
    #[serde(default)]
    pub meta: QuestionMeta,
}

impl Question {
    pub fn new(id: String, prompt: String) -> Self {
        Self {
            id,
            prompt,
            meta: QuestionMeta::default(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn pending_meta_is_consistent_but_not_ready() {
        let q = Question::new("q1".into(), "Tell me about your family.".into());
        assert!(q.meta.is_consistent());
        assert!(!q.meta.is_ready());
    }

    #[test]
    fn meta_with_parallel_lists_is_ready() {
        let meta = QuestionMeta {
            primary_topic: Some("family".into()),
            subtopics: vec!["parents".into(), "siblings".into()],
            keywords: vec![vec!["mother".into()], vec!["brother".into()]],
            lemma_sets: vec![vec!["mother".into()], vec!["brother".into()]],
            fuzzy_norms: vec!["mother".into(), "brother".into()],
            vectors: vec![vec![0.0; 4], vec![0.0; 4]],
        };
        assert!(meta.is_ready());
        assert!(meta.is_consistent());
    }
}
