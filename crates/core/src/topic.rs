//! Runtime topic objects consumed by the coverage detectors.

use crate::question::QuestionMeta;
use std::collections::HashSet;

/// One expected subtopic with its matching material: seed keywords, lemma
/// set for the exact level, fuzzy-norm string for the ratio level and a unit
/// vector for the cosine level.
#[derive(Debug, Clone)]
pub struct Topic {
    pub name: String,
    pub keywords: Vec<String>,
    pub lemma_set: HashSet<String>,
    pub fuzzy_norm: String,
    pub vector: Vec<f32>,
}

/// Builds the runtime topic list from a question's parallel metadata arrays.
///
/// Missing tail entries (metadata still being produced) degrade to empty
/// lemma sets, empty fuzzy norms and zero vectors so a partially enriched
/// question is still usable.
pub fn topics_from_meta(meta: &QuestionMeta) -> Vec<Topic> {
    meta.subtopics
        .iter()
        .enumerate()
        .map(|(i, name)| Topic {
            name: name.clone(),
            keywords: meta.keywords.get(i).cloned().unwrap_or_default(),
            lemma_set: meta
                .lemma_sets
                .get(i)
                .map(|l| l.iter().cloned().collect())
                .unwrap_or_default(),
            fuzzy_norm: meta.fuzzy_norms.get(i).cloned().unwrap_or_default(),
            vector: meta.vectors.get(i).cloned().unwrap_or_default(),
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn topics_from_meta_zips_parallel_lists() {
        let meta = QuestionMeta {
            primary_topic: Some("work".into()),
            subtopics: vec!["role".into(), "stack".into()],
            keywords: vec![vec!["manager".into()], vec!["rust".into()]],
            lemma_sets: vec![vec!["manager".into()], vec!["rust".into()]],
            fuzzy_norms: vec!["manager".into(), "rust".into()],
            vectors: vec![vec![1.0, 0.0], vec![0.0, 1.0]],
        };

        let topics = topics_from_meta(&meta);
        assert_eq!(topics.len(), 2);
        assert_eq!(topics[0].name, "role");
        assert!(topics[0].lemma_set.contains("manager"));
        assert_eq!(topics[1].vector, vec![0.0, 1.0]);
    }

    #[test]
    fn topics_from_meta_tolerates_short_parallel_lists() {
        let meta = QuestionMeta {
            primary_topic: Some("work".into()),
            subtopics: vec!["role".into(), "stack".into()],
            keywords: vec![vec!["manager".into()]],
            lemma_sets: vec![],
            fuzzy_norms: vec![],
            vectors: vec![],
        };

        let topics = topics_from_meta(&meta);
        assert_eq!(topics.len(), 2);
        assert!(topics[1].keywords.is_empty());
        assert!(topics[1].lemma_set.is_empty());
        assert!(topics[1].vector.is_empty());
    }
}
