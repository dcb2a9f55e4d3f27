//! Text primitives shared by the metadata builder and the coverage engine:
//! normalisation, tokenisation, lemmatisation and a light entity heuristic.
//!
//! Everything here is pure and synchronous. Sentence embeddings live in the
//! [`crate::embedding`] module because they go over the network.

use serde::Serialize;
use unicode_normalization::UnicodeNormalization;
use unicode_normalization::char::is_combining_mark;
use unicode_segmentation::UnicodeSegmentation;

/// A single token of an analysed text.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Token {
    pub surface: String,
    pub lemma: String,
}

/// Result of [`parse`]: tokens with lemmas plus `(surface, label)` entities.
#[derive(Debug, Clone, Default)]
pub struct ParsedText {
    pub tokens: Vec<Token>,
    pub entities: Vec<(String, String)>,
}

/// Lowercases, strips diacritics (NFKD, combining marks removed) and
/// collapses all whitespace runs to a single space.
///
/// The transform is idempotent: `normalize(normalize(x)) == normalize(x)`.
pub fn normalize(text: &str) -> String {
    let folded: String = text
        .to_lowercase()
        .nfkd()
        .filter(|c| !is_combining_mark(*c))
        .collect();
    folded.split_whitespace().collect::<Vec<_>>().join(" ")
}

/// Splits a text into unicode words (punctuation dropped).
pub fn tokenize(text: &str) -> Vec<&str> {
    text.unicode_words().collect()
}

// Ordered suffix rewrites applied by `lemma`: the first matching rule wins,
// so longer suffixes come first. The replacements keep Italian noun/verb
// families and English inflections on a shared stem. A deliberately small
// rule set behind a stable seam; swapping in a full lemmatiser only touches
// this function.
const SUFFIX_RULES: &[(&str, &str)] = &[
    ("azioni", "azione"),
    ("sioni", "sione"),
    ("amenti", "amento"),
    ("imenti", "imento"),
    ("mente", ""),
    ("ando", "are"),
    ("endo", "ere"),
    ("ato", "are"),
    ("ata", "are"),
    ("ati", "are"),
    ("ate", "are"),
    ("uto", "ere"),
    ("uta", "ere"),
    ("ing", ""),
    ("ies", "y"),
    ("ed", ""),
    ("es", ""),
    ("s", ""),
];

/// Reduces a single word to a lemma-like stem.
///
/// The word is normalised first, then the first matching suffix rule is
/// applied once. Words of three characters or fewer pass through unchanged
/// so short function words are not mangled.
pub fn lemma(word: &str) -> String {
    let norm = normalize(word);
    if norm.chars().count() <= 3 {
        return norm;
    }
    for (suffix, replacement) in SUFFIX_RULES {
        if let Some(stem) = norm.strip_suffix(suffix) {
            // Never reduce to a stump shorter than two characters.
            if stem.chars().count() < 2 {
                continue;
            }
            let mut result = format!("{stem}{replacement}");
            // "shipped"/"shipping" leave a doubled final consonant behind;
            // collapse it so the stem lines up with the bare verb.
            if matches!(*suffix, "ing" | "ed") {
                let chars: Vec<char> = result.chars().collect();
                if chars.len() >= 3
                    && chars[chars.len() - 1] == chars[chars.len() - 2]
                    && !"aeiou".contains(chars[chars.len() - 1])
                {
                    result.pop();
                }
            }
            return result;
        }
    }
    norm
}

/// Lemmatises every word of `text` into a deduplicated, sorted list.
pub fn lemma_set(text: &str) -> Vec<String> {
    let mut lemmas: Vec<String> = tokenize(&normalize(text)).iter().map(|w| lemma(w)).collect();
    lemmas.sort();
    lemmas.dedup();
    lemmas
}

/// Full analysis of a text: tokens with lemmas and capitalised-span entities.
///
/// Empty input yields an empty result; callers treat that as "no signal".
pub fn parse(text: &str) -> ParsedText {
    if text.trim().is_empty() {
        return ParsedText::default();
    }

    let tokens = text
        .unicode_words()
        .map(|w| Token {
            surface: w.to_string(),
            lemma: lemma(w),
        })
        .collect();

    // Entity heuristic: runs of capitalised words that are not sentence
    // initial. Good enough for the diagnostics that consume it; nothing in
    // the coverage cascade depends on entities.
    let mut entities = Vec::new();
    let mut span: Vec<&str> = Vec::new();
    let mut first_word = true;
    for word in text.unicode_words() {
        let capitalised = word.chars().next().is_some_and(|c| c.is_uppercase());
        if capitalised && !first_word {
            span.push(word);
        } else {
            if !span.is_empty() {
                entities.push((span.join(" "), "MISC".to_string()));
                span.clear();
            }
        }
        first_word = false;
    }
    if !span.is_empty() {
        entities.push((span.join(" "), "MISC".to_string()));
    }

    ParsedText { tokens, entities }
}
