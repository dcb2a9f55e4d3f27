//! Builds the derived fields of one subtopic: lemma set, fuzzy-norm string
//! and unit vector.

use crate::embedding::{self, Embedder};
use crate::nlp;

/// Derived fields for one subtopic's keyword list.
#[derive(Debug, Clone, PartialEq)]
pub struct SubtopicMeta {
    pub lemma_set: Vec<String>,
    pub fuzzy_norm: String,
    pub vector: Vec<f32>,
}

/// Produces `(lemma_set, fuzzy_norm, unit_vector)` for a keyword list.
///
/// The fuzzy norm is the keywords joined by single spaces after the standard
/// normalisation. The vector is the L2-normalised embedding of that string;
/// if the embedder fails or the keyword list is empty the vector degrades to
/// all zeros and the lemma set to empty, which downstream detectors treat as
/// "no signal" rather than an error.
pub async fn build(keywords: &[String], embedder: &dyn Embedder) -> SubtopicMeta {
    let joined = keywords.join(" ");
    let fuzzy_norm = nlp::normalize(&joined);

    if fuzzy_norm.is_empty() {
        return SubtopicMeta {
            lemma_set: Vec::new(),
            fuzzy_norm,
            vector: embedding::zero_vector(embedder.dimension()),
        };
    }

    let lemma_set = nlp::lemma_set(&joined);

    let vector = match embedder.embed(&fuzzy_norm).await {
        Ok(mut v) => {
            embedding::l2_normalize(&mut v);
            v
        }
        Err(e) => {
            tracing::warn!("embedding unavailable for '{fuzzy_norm}': {e}");
            embedding::zero_vector(embedder.dimension())
        }
    };

    SubtopicMeta {
        lemma_set,
        fuzzy_norm,
        vector,
    }
}
