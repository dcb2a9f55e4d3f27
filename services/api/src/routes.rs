//! HTTP handlers for the orchestration surface: question loading and
//! enrichment progress, the interview loop, session diagnostics and the TTS
//! side channel.

use crate::speech::{self, TtsClient};
use axum::{
    Json,
    extract::{Multipart, Query, State},
    http::{StatusCode, header},
    response::{IntoResponse, Response},
};
use interview_core::coverage::CoverageDetector;
use interview_core::embedding::Embedder;
use interview_core::importer::{self, ImportError};
use interview_core::llm::{LlmGateway, LlmSettings};
use interview_core::registry::SessionRegistry;
use interview_core::session::QuestionKind;
use interview_core::store::{self, QuestionStore};
use serde::{Deserialize, Serialize};
use std::sync::Arc;

/// Shared application state, created once at startup.
pub struct AppState {
    pub store: Arc<QuestionStore>,
    pub registry: SessionRegistry,
    pub gateway: Arc<dyn LlmGateway>,
    pub embedder: Arc<dyn Embedder>,
    pub detector: Arc<dyn CoverageDetector>,
    pub llm_settings: LlmSettings,
    pub coverage_threshold_percent: f32,
    pub tts: TtsClient,
    pub tts_voice: String,
}

// --- Error mapping ---

#[derive(Debug, thiserror::Error)]
pub enum ApiError {
    #[error("unknown session: {0}")]
    UnknownSession(String),
    #[error(transparent)]
    Import(#[from] ImportError),
    #[error("{0}")]
    BadRequest(String),
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = match &self {
            ApiError::UnknownSession(_) => StatusCode::NOT_FOUND,
            ApiError::Import(_) | ApiError::BadRequest(_) => StatusCode::BAD_REQUEST,
        };
        let body = Json(serde_json::json!({ "error": self.to_string() }));
        (status, body).into_response()
    }
}

// --- Questions ---

#[derive(Serialize)]
pub struct LoadResponse {
    pub count: usize,
    pub first_question: Option<String>,
}

/// `POST /questions/load` — multipart upload of a question file. The store
/// is populated immediately with plain text and background enrichment is
/// kicked off; the interview can start before any metadata exists.
pub async fn load_questions(
    State(state): State<Arc<AppState>>,
    mut multipart: Multipart,
) -> Result<Json<LoadResponse>, ApiError> {
    let field = multipart
        .next_field()
        .await
        .map_err(|e| ApiError::BadRequest(e.to_string()))?
        .ok_or_else(|| ApiError::BadRequest("missing file field".to_string()))?;

    let filename = field.file_name().unwrap_or("questions.json").to_string();
    let bytes = field
        .bytes()
        .await
        .map_err(|e| ApiError::BadRequest(e.to_string()))?;

    let prompts = importer::read_prompts(&filename, &bytes)?;
    let count = state.store.load_script(prompts).await;

    store::spawn_enrichment(
        state.store.clone(),
        state.gateway.clone(),
        state.embedder.clone(),
        state.llm_settings.clone(),
        None,
    );

    let first_question = state.store.first_question().await.map(|q| q.prompt);
    tracing::info!("loaded {count} questions from '{filename}', enrichment started");
    Ok(Json(LoadResponse {
        count,
        first_question,
    }))
}

/// `GET /questions/status` — live enrichment progress.
pub async fn questions_status(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    Json(state.store.status_report().await)
}

// --- Interview loop ---

#[derive(Deserialize)]
pub struct StartParams {
    pub user: Option<String>,
}

#[derive(Serialize)]
pub struct StartResponse {
    pub interview_id: String,
}

/// `POST /interview/start` — discards any previous session for the user and
/// returns a fresh opaque interview id.
pub async fn start_interview(
    State(state): State<Arc<AppState>>,
    Query(params): Query<StartParams>,
) -> Json<StartResponse> {
    let user = params.user.unwrap_or_else(|| "default".to_string());
    let session = state.registry.start(&user).await;
    let interview_id = session.lock().await.session_id.clone();
    Json(StartResponse { interview_id })
}

#[derive(Deserialize)]
pub struct SessionParams {
    pub sid: String,
}

#[derive(Serialize)]
pub struct NextResponse {
    pub id: String,
    pub text: String,
    #[serde(rename = "type")]
    pub kind: QuestionKind,
    pub audio_url: String,
}

/// `GET /interview/next?sid=...` — the next utterance for the candidate,
/// with its companion TTS URL. `type` is `completion` once the script is
/// exhausted.
pub async fn next_question(
    State(state): State<Arc<AppState>>,
    Query(params): Query<SessionParams>,
) -> Result<Json<NextResponse>, ApiError> {
    let session = state
        .registry
        .find_by_session_id(&params.sid)
        .await
        .ok_or_else(|| ApiError::UnknownSession(params.sid.clone()))?;

    let question = session.lock().await.next_question().await;
    let audio_url = speech::speak_url(&state.tts_voice, &question.text);
    Ok(Json(NextResponse {
        id: question.id,
        text: question.text,
        kind: question.kind,
        audio_url,
    }))
}

#[derive(Deserialize)]
pub struct AnswerParams {
    pub sid: String,
    pub qid: Option<String>,
}

#[derive(Deserialize)]
pub struct AnswerBody {
    pub text: String,
}

/// `POST /interview/answer?sid=...&qid=...` — ingests one transcribed
/// answer and runs the follow-up / advance decision. The next utterance
/// surfaces through `next_question`.
pub async fn submit_answer(
    State(state): State<Arc<AppState>>,
    Query(params): Query<AnswerParams>,
    Json(body): Json<AnswerBody>,
) -> Result<Json<interview_core::AnswerOutcome>, ApiError> {
    let session = state
        .registry
        .find_by_session_id(&params.sid)
        .await
        .ok_or_else(|| ApiError::UnknownSession(params.sid.clone()))?;

    let mut session = session.lock().await;
    if let (Some(qid), Some(current)) = (&params.qid, session.questions_asked().last())
        && qid != current
    {
        tracing::warn!("answer for question {qid} while {current} is current");
    }

    let outcome = session
        .submit_answer(
            &body.text,
            state.detector.as_ref(),
            state.gateway.as_ref(),
            state.coverage_threshold_percent,
            &state.llm_settings,
        )
        .await;
    Ok(Json(outcome))
}

#[derive(Serialize)]
pub struct EndResponse {
    pub score: f32,
}

/// `POST /interview/end?sid=...` — terminates the session and returns the
/// final score.
pub async fn end_interview(
    State(state): State<Arc<AppState>>,
    Query(params): Query<SessionParams>,
) -> Result<Json<EndResponse>, ApiError> {
    let session = state
        .registry
        .find_by_session_id(&params.sid)
        .await
        .ok_or_else(|| ApiError::UnknownSession(params.sid.clone()))?;

    let score = session.lock().await.end();
    Ok(Json(EndResponse { score }))
}

/// `GET /sessions/info` — registry diagnostics.
pub async fn sessions_info(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    Json(state.registry.info().await)
}

// --- TTS side channel ---

#[derive(Deserialize)]
pub struct SpeakParams {
    pub voice: Option<String>,
    pub text: String,
}

/// `GET /tts/speak?voice=...&text=...` — synthesised audio for a question
/// text. A provider failure degrades to a short silent WAV instead of an
/// error, so the interview keeps flowing.
pub async fn tts_speak(
    State(state): State<Arc<AppState>>,
    Query(params): Query<SpeakParams>,
) -> Response {
    let voice = params.voice.unwrap_or_else(|| state.tts_voice.clone());
    match state.tts.synthesize(&voice, &params.text).await {
        Ok(audio) => ([(header::CONTENT_TYPE, "audio/mpeg")], audio).into_response(),
        Err(e) => {
            tracing::warn!("tts unavailable, serving the silent fallback: {e}");
            (
                [(header::CONTENT_TYPE, "audio/wav")],
                speech::silent_beep_wav(),
            )
                .into_response()
        }
    }
}
