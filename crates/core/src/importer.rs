//! Reads question files (docx, csv, xls/xlsx, json) into raw prompts and
//! turns each prompt into fully enriched question metadata.
//!
//! All readers work from in-memory bytes so the HTTP layer can hand over an
//! uploaded file without touching the filesystem.

use crate::embedding::Embedder;
use crate::llm::{self, LlmGateway, LlmSettings};
use crate::metadata;
use crate::question::QuestionMeta;
use calamine::Reader;
use std::io::Cursor;
use std::path::Path;

#[derive(Debug, thiserror::Error)]
pub enum ImportError {
    #[error("unsupported file format: {0}")]
    Unsupported(String),
    #[error("could not read {format} content: {message}")]
    Malformed { format: &'static str, message: String },
    #[error("the file contains no questions")]
    Empty,
}

/// Extracts the raw prompts from an uploaded question file, dispatching on
/// the file extension. Blank entries are dropped; a file that yields no
/// prompts at all is an error the caller can show to the user.
pub fn read_prompts(filename: &str, bytes: &[u8]) -> Result<Vec<String>, ImportError> {
    let extension = Path::new(filename)
        .extension()
        .and_then(|e| e.to_str())
        .map(|e| e.to_lowercase())
        .unwrap_or_default();

    let prompts = match extension.as_str() {
        "docx" => from_docx(bytes)?,
        "csv" => from_csv(bytes)?,
        "xls" | "xlsx" => from_excel(bytes)?,
        "json" => from_json(bytes)?,
        other => return Err(ImportError::Unsupported(other.to_string())),
    };

    let prompts: Vec<String> = prompts
        .into_iter()
        .map(|p| p.trim().to_string())
        .filter(|p| !p.is_empty())
        .collect();

    if prompts.is_empty() {
        return Err(ImportError::Empty);
    }
    Ok(prompts)
}

/// Word document: one prompt per non-empty paragraph.
fn from_docx(bytes: &[u8]) -> Result<Vec<String>, ImportError> {
    let docx = docx_rs::read_docx(bytes).map_err(|e| ImportError::Malformed {
        format: "docx",
        message: e.to_string(),
    })?;

    Ok(docx
        .document
        .children
        .iter()
        .filter_map(|child| match child {
            docx_rs::DocumentChild::Paragraph(p) => Some(p.raw_text()),
            _ => None,
        })
        .collect())
}

/// CSV: first column of every data row (the first row is a header).
fn from_csv(bytes: &[u8]) -> Result<Vec<String>, ImportError> {
    let mut reader = csv::ReaderBuilder::new()
        .has_headers(true)
        .flexible(true)
        .from_reader(bytes);

    let mut prompts = Vec::new();
    for record in reader.records() {
        let record = record.map_err(|e| ImportError::Malformed {
            format: "csv",
            message: e.to_string(),
        })?;
        if let Some(cell) = record.get(0) {
            prompts.push(cell.to_string());
        }
    }
    Ok(prompts)
}

/// Excel: first column of the first sheet (the first row is a header).
fn from_excel(bytes: &[u8]) -> Result<Vec<String>, ImportError> {
    let cursor = Cursor::new(bytes.to_vec());
    let mut workbook =
        calamine::open_workbook_auto_from_rs(cursor).map_err(|e| ImportError::Malformed {
            format: "excel",
            message: e.to_string(),
        })?;

    let range = workbook
        .worksheet_range_at(0)
        .ok_or_else(|| ImportError::Malformed {
            format: "excel",
            message: "workbook has no sheets".into(),
        })?
        .map_err(|e| ImportError::Malformed {
            format: "excel",
            message: e.to_string(),
        })?;

    Ok(range
        .rows()
        .skip(1)
        .filter_map(|row| row.first())
        .filter(|cell| !matches!(cell, calamine::Data::Empty))
        .map(|cell| cell.to_string())
        .collect())
}

/// JSON: an array of strings or an object whose values are the prompts.
fn from_json(bytes: &[u8]) -> Result<Vec<String>, ImportError> {
    let value: serde_json::Value =
        serde_json::from_slice(bytes).map_err(|e| ImportError::Malformed {
            format: "json",
            message: e.to_string(),
        })?;

    let as_prompt = |v: &serde_json::Value| -> String {
        v.as_str().map(|s| s.to_string()).unwrap_or_else(|| v.to_string())
    };

    match value {
        serde_json::Value::Array(items) => Ok(items.iter().map(as_prompt).collect()),
        serde_json::Value::Object(map) => Ok(map.values().map(as_prompt).collect()),
        _ => Err(ImportError::Malformed {
            format: "json",
            message: "expected an array or object of strings".into(),
        }),
    }
}

/// Produces the full metadata for one prompt: LLM enrichment first, then the
/// derived fields for each subtopic's keyword list.
///
/// A gateway failure leaves the metadata empty — the question stays usable
/// as plain text and the background worker moves on.
pub async fn enrich_question(
    prompt: &str,
    gateway: &dyn LlmGateway,
    embedder: &dyn Embedder,
    settings: &LlmSettings,
) -> QuestionMeta {
    let enrichment = match llm::request_enrichment(gateway, prompt, settings).await {
        Ok(e) => e,
        Err(e) => {
            tracing::error!("enrichment failed for '{}': {e}", truncate(prompt, 40));
            return QuestionMeta::default();
        }
    };

    let mut meta = QuestionMeta {
        primary_topic: Some(enrichment.primary_topic),
        subtopics: enrichment.subtopics,
        keywords: enrichment.keywords,
        ..QuestionMeta::default()
    };

    for keywords in &meta.keywords {
        let built = metadata::build(keywords, embedder).await;
        meta.lemma_sets.push(built.lemma_set);
        meta.fuzzy_norms.push(built.fuzzy_norm);
        meta.vectors.push(built.vector);
    }

    meta
}

/// Shortens a text for log lines.
pub fn truncate(text: &str, max_chars: usize) -> String {
    if text.chars().count() <= max_chars {
        text.to_string()
    } else {
        let cut: String = text.chars().take(max_chars).collect();
        format!("{cut}...")
    }
}
