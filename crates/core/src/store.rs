//! The in-memory question store and its background enrichment worker.
//!
//! The store is populated immediately with plain-text questions so an
//! interview can start at once; a single spawned worker then fills each
//! question's metadata one question at a time, in index order, swapping the
//! whole metadata block in under the write lock so readers always observe a
//! per-question atomic snapshot.

use crate::embedding::Embedder;
use crate::importer::{self, truncate};
use crate::llm::{LlmGateway, LlmSettings};
use crate::question::{Question, QuestionMeta};
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::path::PathBuf;
use std::sync::Arc;
use tokio::sync::RwLock;
use tokio::task::JoinHandle;

/// Progress of the metadata enrichment batch, observable while it runs.
#[derive(Debug, Clone, Default, Serialize)]
pub struct ProcessingStatus {
    pub total_questions: usize,
    pub processed_questions: usize,
    pub in_progress: bool,
    pub start_time: Option<DateTime<Utc>>,
    pub end_time: Option<DateTime<Utc>>,
    pub error: Option<String>,
}

/// The status payload served to pollers: the raw record plus the derived
/// completion percentage, elapsed seconds and per-question readiness.
#[derive(Debug, Clone, Serialize)]
pub struct StatusReport {
    #[serde(flatten)]
    pub status: ProcessingStatus,
    pub completion_percentage: f32,
    pub elapsed_seconds: f64,
    pub questions_ready: Vec<QuestionReady>,
}

#[derive(Debug, Clone, Serialize)]
pub struct QuestionReady {
    pub id: String,
    pub ready: bool,
}

pub struct QuestionStore {
    questions: RwLock<Vec<Question>>,
    status: RwLock<ProcessingStatus>,
}

impl Default for QuestionStore {
    fn default() -> Self {
        Self::new()
    }
}

impl QuestionStore {
    pub fn new() -> Self {
        Self {
            questions: RwLock::new(Vec::new()),
            status: RwLock::new(ProcessingStatus::default()),
        }
    }

    /// Replaces the script with the given prompts. Blank prompts are
    /// dropped; every admitted question gets a fresh stable id. Returns the
    /// number of admitted questions.
    pub async fn load_script(&self, prompts: Vec<String>) -> usize {
        let questions: Vec<Question> = prompts
            .into_iter()
            .map(|p| p.trim().to_string())
            .filter(|p| !p.is_empty())
            .map(|p| Question::new(uuid::Uuid::new_v4().to_string(), p))
            .collect();
        let count = questions.len();

        {
            let mut guard = self.questions.write().await;
            *guard = questions;
        }
        {
            let mut status = self.status.write().await;
            *status = ProcessingStatus {
                total_questions: count,
                ..ProcessingStatus::default()
            };
        }

        tracing::info!("loaded a new script with {count} questions");
        count
    }

    pub async fn len(&self) -> usize {
        self.questions.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.questions.read().await.is_empty()
    }

    /// A consistent clone of the question at `index`, metadata included.
    pub async fn get(&self, index: usize) -> Option<Question> {
        self.questions.read().await.get(index).cloned()
    }

    pub async fn get_by_id(&self, id: &str) -> Option<Question> {
        self.questions
            .read()
            .await
            .iter()
            .find(|q| q.id == id)
            .cloned()
    }

    pub async fn first_question(&self) -> Option<Question> {
        self.get(0).await
    }

    /// Swaps in the complete metadata block for one question. The write
    /// lock makes the swap atomic with respect to readers.
    pub async fn set_meta(&self, index: usize, meta: QuestionMeta) {
        let mut guard = self.questions.write().await;
        if let Some(question) = guard.get_mut(index) {
            question.meta = meta;
        }
    }

    pub async fn status(&self) -> ProcessingStatus {
        self.status.read().await.clone()
    }

    /// Builds the poller-facing report from the live status and questions.
    pub async fn status_report(&self) -> StatusReport {
        let status = self.status.read().await.clone();
        let questions = self.questions.read().await;

        let completion_percentage = if status.total_questions > 0 {
            status.processed_questions as f32 / status.total_questions as f32 * 100.0
        } else {
            0.0
        };

        let elapsed_seconds = match (status.start_time, status.end_time) {
            (Some(start), Some(end)) => (end - start).num_milliseconds() as f64 / 1000.0,
            (Some(start), None) if status.in_progress => {
                (Utc::now() - start).num_milliseconds() as f64 / 1000.0
            }
            _ => 0.0,
        };

        let questions_ready = questions
            .iter()
            .map(|q| QuestionReady {
                id: q.id.clone(),
                ready: q.meta.is_ready(),
            })
            .collect();

        StatusReport {
            status,
            completion_percentage,
            elapsed_seconds,
            questions_ready,
        }
    }
}

// --- Background enrichment ---

#[derive(Serialize)]
struct MetadataDump {
    timestamp: DateTime<Utc>,
    total_questions: usize,
    questions: Vec<DumpedQuestion>,
}

#[derive(Serialize)]
struct DumpedQuestion {
    id: String,
    prompt: String,
    #[serde(flatten)]
    meta: QuestionMeta,
}

/// Spawns the single enrichment worker for the current script.
///
/// Questions are processed strictly in index order; question `k+1` does not
/// start before `k` has completed. A question whose enrichment fails keeps
/// its empty metadata and the worker moves on. When the batch finishes a
/// JSON dump of the produced metadata is written next to the process (or to
/// `dump_path` when given) and `in_progress` flips to false.
pub fn spawn_enrichment(
    store: Arc<QuestionStore>,
    gateway: Arc<dyn LlmGateway>,
    embedder: Arc<dyn Embedder>,
    settings: LlmSettings,
    dump_path: Option<PathBuf>,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let total = store.len().await;
        {
            let mut status = store.status.write().await;
            status.total_questions = total;
            status.processed_questions = 0;
            status.in_progress = true;
            status.start_time = Some(Utc::now());
            status.end_time = None;
            status.error = None;
        }

        tracing::info!("starting metadata enrichment for {total} questions");

        for index in 0..total {
            let Some(question) = store.get(index).await else {
                break; // the script was replaced under us
            };

            let meta =
                importer::enrich_question(&question.prompt, gateway.as_ref(), embedder.as_ref(), &settings)
                    .await;

            if !meta.is_ready() {
                let mut status = store.status.write().await;
                status.error = Some(format!(
                    "enrichment produced no metadata for '{}'",
                    truncate(&question.prompt, 40)
                ));
            } else {
                tracing::info!(
                    "metadata ready for question {}/{}: {}",
                    index + 1,
                    total,
                    truncate(&question.prompt, 50)
                );
            }

            store.set_meta(index, meta).await;
            store.status.write().await.processed_questions += 1;
        }

        {
            let mut status = store.status.write().await;
            status.in_progress = false;
            status.end_time = Some(Utc::now());
        }

        if let Err(e) = write_dump(&store, dump_path).await {
            tracing::error!("failed to write the metadata dump: {e}");
        }

        tracing::info!("metadata enrichment completed for {total} questions");
    })
}

async fn write_dump(store: &QuestionStore, dump_path: Option<PathBuf>) -> std::io::Result<()> {
    let questions = store.questions.read().await;
    let dump = MetadataDump {
        timestamp: Utc::now(),
        total_questions: questions.len(),
        questions: questions
            .iter()
            .map(|q| DumpedQuestion {
                id: q.id.clone(),
                prompt: truncate(&q.prompt, 100),
                meta: q.meta.clone(),
            })
            .collect(),
    };
    drop(questions);

    let path = dump_path.unwrap_or_else(|| PathBuf::from("generated_metadata.json"));
    let payload = serde_json::to_vec_pretty(&dump).unwrap_or_default();
    tokio::fs::write(&path, payload).await?;
    tracing::info!("metadata dump written to {}", path.display());
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::embedding::MockEmbedder;
    use crate::llm::MockLlmGateway;

    fn mock_gateway() -> MockLlmGateway {
        let mut gateway = MockLlmGateway::new();
        gateway.expect_chat_json().returning(|_, _, _, _, _| {
            Box::pin(async {
                Ok(serde_json::json!({
                    "primary_topic": "work",
                    "subtopics": ["role", "stack"],
                    "keywords": [["manager"], ["rust"]],
                }))
            })
        });
        gateway
    }

    fn mock_embedder() -> MockEmbedder {
        let mut embedder = MockEmbedder::new();
        embedder
            .expect_embed()
            .returning(|_| Box::pin(async { Ok(vec![1.0, 0.0]) }));
        embedder.expect_dimension().return_const(2usize);
        embedder
    }

    #[tokio::test]
    async fn load_script_drops_blank_prompts_and_assigns_ids() {
        let store = QuestionStore::new();
        let count = store
            .load_script(vec![
                "Tell me about your family.".into(),
                "   ".into(),
                "Describe a workplace challenge.".into(),
            ])
            .await;

        assert_eq!(count, 2);
        let first = store.first_question().await.unwrap();
        assert!(!first.id.is_empty());
        assert!(!first.meta.is_ready());
    }

    #[tokio::test]
    async fn enrichment_fills_questions_in_order_and_flips_progress() {
        let store = Arc::new(QuestionStore::new());
        store
            .load_script(vec![
                "Tell me about your family.".into(),
                "Describe a workplace challenge.".into(),
            ])
            .await;

        let dir = tempfile::tempdir().unwrap();
        let dump_path = dir.path().join("dump.json");

        let handle = spawn_enrichment(
            store.clone(),
            Arc::new(mock_gateway()),
            Arc::new(mock_embedder()),
            LlmSettings::default(),
            Some(dump_path.clone()),
        );
        handle.await.unwrap();

        let status = store.status().await;
        assert!(!status.in_progress);
        assert_eq!(status.processed_questions, 2);
        assert!(status.end_time.is_some());

        for index in 0..2 {
            let q = store.get(index).await.unwrap();
            assert!(q.meta.is_ready());
            assert!(q.meta.is_consistent());
        }

        // The dump is written at the end of the batch.
        let dump: serde_json::Value =
            serde_json::from_slice(&std::fs::read(&dump_path).unwrap()).unwrap();
        assert_eq!(dump["total_questions"], 2);
        assert_eq!(dump["questions"].as_array().unwrap().len(), 2);
    }

    #[tokio::test]
    async fn status_report_exposes_completion_percentage_and_readiness() {
        let store = Arc::new(QuestionStore::new());
        store.load_script(vec!["Only question.".into()]).await;

        let report = store.status_report().await;
        assert_eq!(report.completion_percentage, 0.0);
        assert_eq!(report.questions_ready.len(), 1);
        assert!(!report.questions_ready[0].ready);

        let dir = tempfile::tempdir().unwrap();
        let handle = spawn_enrichment(
            store.clone(),
            Arc::new(mock_gateway()),
            Arc::new(mock_embedder()),
            LlmSettings::default(),
            Some(dir.path().join("dump.json")),
        );
        handle.await.unwrap();

        let report = store.status_report().await;
        assert_eq!(report.completion_percentage, 100.0);
        assert!(report.questions_ready[0].ready);
    }
}
