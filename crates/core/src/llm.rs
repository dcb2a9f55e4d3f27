//! The LLM gateway: schema-constrained JSON chat, free-text chat, and the
//! domain calls built on top of them (question enrichment, follow-up
//! generation, topic arbitration, reflection summaries).
//!
//! The `LlmGateway` trait is the only thing the rest of the crate depends
//! on. This keeps the controller and the importer testable with `mockall`'s
//! generated `MockLlmGateway` and leaves the door open for other providers.

use async_trait::async_trait;
#[cfg(test)]
use mockall::automock;
use reqwest::Client;
use serde::Deserialize;
use serde_json::Value;
use std::time::Duration;

/// Fixed pause between enrichment retries.
const RETRY_BACKOFF: Duration = Duration::from_millis(500);

#[derive(Debug, thiserror::Error)]
pub enum GatewayError {
    #[error("llm request failed: {0}")]
    Http(#[from] reqwest::Error),
    #[error("llm returned no choices")]
    NoChoices,
    #[error("llm output invalid: {0}")]
    InvalidOutput(String),
    #[error("llm call timed out")]
    Timeout,
}

/// One chat turn in OpenAI wire format.
#[derive(Debug, Clone, serde::Serialize)]
pub struct ChatMessage {
    pub role: String,
    pub content: String,
}

impl ChatMessage {
    pub fn system(content: impl Into<String>) -> Self {
        Self {
            role: "system".into(),
            content: content.into(),
        }
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: "user".into(),
            content: content.into(),
        }
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self {
            role: "assistant".into(),
            content: content.into(),
        }
    }
}

/// Tuning knobs shared by the domain calls, loaded from configuration.
#[derive(Debug, Clone)]
pub struct LlmSettings {
    pub temperature: f32,
    pub max_tokens: u32,
    pub max_retries: u32,
    pub follow_up_timeout: Duration,
}

impl Default for LlmSettings {
    fn default() -> Self {
        Self {
            temperature: 0.4,
            max_tokens: 450,
            max_retries: 3,
            follow_up_timeout: Duration::from_secs(15),
        }
    }
}

#[async_trait]
#[cfg_attr(test, automock)]
pub trait LlmGateway: Send + Sync {
    /// A chat completion constrained to a strict JSON schema. Returns the
    /// parsed JSON value; schema conformance is enforced server-side, the
    /// business rules on top are the caller's job.
    async fn chat_json(
        &self,
        messages: Vec<ChatMessage>,
        schema_name: String,
        schema: Value,
        temperature: f32,
        max_tokens: u32,
    ) -> Result<Value, GatewayError>;

    /// A plain text chat completion.
    async fn chat_text(
        &self,
        messages: Vec<ChatMessage>,
        temperature: f32,
        max_tokens: u32,
    ) -> Result<String, GatewayError>;
}

// --- OpenAI implementation ---

#[derive(Debug, Deserialize)]
struct ChatResponse {
    choices: Vec<Choice>,
}

#[derive(Debug, Deserialize)]
struct Choice {
    message: ResponseMessage,
}

#[derive(Debug, Deserialize)]
struct ResponseMessage {
    content: String,
}

pub struct OpenAiGateway {
    client: Client,
    api_key: String,
    model: String,
}

impl OpenAiGateway {
    pub fn new(api_key: String, model: String) -> Self {
        Self {
            client: Client::builder()
                .timeout(Duration::from_secs(60))
                .build()
                .unwrap_or_default(),
            api_key,
            model,
        }
    }

    async fn complete(&self, body: Value) -> Result<String, GatewayError> {
        let resp = self
            .client
            .post("https://api.openai.com/v1/chat/completions")
            .bearer_auth(&self.api_key)
            .json(&body)
            .send()
            .await?
            .error_for_status()?
            .json::<ChatResponse>()
            .await?;

        resp.choices
            .into_iter()
            .next()
            .map(|c| c.message.content.trim().to_string())
            .ok_or(GatewayError::NoChoices)
    }
}

#[async_trait]
impl LlmGateway for OpenAiGateway {
    async fn chat_json(
        &self,
        messages: Vec<ChatMessage>,
        schema_name: String,
        schema: Value,
        temperature: f32,
        max_tokens: u32,
    ) -> Result<Value, GatewayError> {
        let body = serde_json::json!({
            "model": self.model,
            "messages": messages,
            "temperature": temperature,
            "max_tokens": max_tokens,
            "response_format": {
                "type": "json_schema",
                "json_schema": { "name": schema_name, "schema": schema, "strict": true },
            },
        });

        let raw = self.complete(body).await?;
        parse_json_payload(&raw)
    }

    async fn chat_text(
        &self,
        messages: Vec<ChatMessage>,
        temperature: f32,
        max_tokens: u32,
    ) -> Result<String, GatewayError> {
        let body = serde_json::json!({
            "model": self.model,
            "messages": messages,
            "temperature": temperature,
            "max_tokens": max_tokens,
        });

        self.complete(body).await
    }
}

/// Parses a JSON object out of a model reply, tolerating stray prose around
/// the braces.
fn parse_json_payload(raw: &str) -> Result<Value, GatewayError> {
    if let Ok(value) = serde_json::from_str(raw) {
        return Ok(value);
    }
    let start = raw.find('{');
    let end = raw.rfind('}');
    if let (Some(start), Some(end)) = (start, end)
        && start < end
    {
        if let Ok(value) = serde_json::from_str(&raw[start..=end]) {
            return Ok(value);
        }
    }
    Err(GatewayError::InvalidOutput(format!(
        "not a JSON object: {}",
        raw.chars().take(120).collect::<String>()
    )))
}

// --- Question enrichment ---

/// The accepted shape of an enrichment reply.
#[derive(Debug, Clone, Deserialize)]
pub struct Enrichment {
    pub primary_topic: String,
    pub subtopics: Vec<String>,
    pub keywords: Vec<Vec<String>>,
}

/// The strict schema sent with every enrichment request.
pub fn enrichment_schema() -> Value {
    serde_json::json!({
        "type": "object",
        "properties": {
            "primary_topic": { "type": "string" },
            "subtopics": { "type": "array", "items": { "type": "string" } },
            "keywords": {
                "type": "array",
                "items": { "type": "array", "items": { "type": "string" } },
            },
        },
        "required": ["primary_topic", "subtopics", "keywords"],
        "additionalProperties": false,
    })
}

const ENRICHMENT_SYSTEM: &str =
    "You are an assistant that returns only valid JSON conforming to the schema, no extra text.";

/// Checks the business rules the schema cannot express. Returns a
/// description of the first violation.
pub fn check_business_rules(data: &Enrichment) -> Result<(), String> {
    let subs = &data.subtopics;
    if !(2..=8).contains(&subs.len()) {
        return Err(format!("expected 2..=8 subtopics, got {}", subs.len()));
    }
    let unique: std::collections::HashSet<&String> = subs.iter().collect();
    if unique.len() != subs.len() {
        return Err("subtopics must be unique".into());
    }
    if data.keywords.len() != subs.len() {
        return Err(format!(
            "expected one keyword list per subtopic ({}), got {}",
            subs.len(),
            data.keywords.len()
        ));
    }
    let mut seen: std::collections::HashSet<&String> = std::collections::HashSet::new();
    for kws in &data.keywords {
        if kws.len() >= 7 {
            return Err(format!("keyword list has {} entries, maximum is 6", kws.len()));
        }
        for kw in kws {
            if !seen.insert(kw) {
                return Err(format!("keyword '{kw}' appears under two subtopics"));
            }
        }
    }
    Ok(())
}

/// Asks the model for `{primary_topic, subtopics, keywords}` metadata for
/// one scripted question.
///
/// Business-rule violations trigger up to `max_retries` attempts, each one
/// appending an assistant turn that names the violation so the model can
/// correct itself. Exhaustion surfaces as `GatewayError::InvalidOutput`.
pub async fn request_enrichment(
    gateway: &dyn LlmGateway,
    prompt: &str,
    settings: &LlmSettings,
) -> Result<Enrichment, GatewayError> {
    let mut messages = vec![
        ChatMessage::system(ENRICHMENT_SYSTEM),
        ChatMessage::user(format!(
            "Analyze this interview question: \"{prompt}\". Identify 1) primary_topic; \
             2) 2-8 subtopics; 3) more than 2 unique keywords per subtopic. \
             Keywords of one subtopic must not overlap with those of another."
        )),
    ];

    let mut last_error = GatewayError::InvalidOutput("no attempts made".into());
    for attempt in 1..=settings.max_retries.max(1) {
        let result = gateway
            .chat_json(
                messages.clone(),
                "metadata".into(),
                enrichment_schema(),
                settings.temperature,
                settings.max_tokens,
            )
            .await;

        let violation = match result {
            Ok(value) => match serde_json::from_value::<Enrichment>(value) {
                Ok(data) => match check_business_rules(&data) {
                    Ok(()) => return Ok(data),
                    Err(v) => v,
                },
                Err(e) => format!("reply does not match the schema: {e}"),
            },
            Err(e) => {
                tracing::warn!("enrichment attempt {attempt}/{} failed: {e}", settings.max_retries);
                last_error = e;
                tokio::time::sleep(RETRY_BACKOFF).await;
                continue;
            }
        };

        tracing::warn!(
            "enrichment attempt {attempt}/{} rejected: {violation}",
            settings.max_retries
        );
        last_error = GatewayError::InvalidOutput(violation.clone());
        messages.push(ChatMessage::assistant(format!(
            "Invalid output: {violation}. Reformat following EXACTLY the schema."
        )));
        tokio::time::sleep(RETRY_BACKOFF).await;
    }

    Err(last_error)
}

// --- Follow-up generation ---

fn is_valid_follow_up(candidate: &str) -> bool {
    let len = candidate.trim().chars().count();
    (5..=120).contains(&len)
}

/// Generates ONE follow-up question that probes the first missing subtopic.
///
/// The candidate must be 5..=120 characters; one corrective retry is
/// attempted, then the deterministic fallback is used. Each attempt runs
/// under the configured timeout, so a stalled provider cannot hold the
/// interview turn.
pub async fn generate_follow_up(
    gateway: &dyn LlmGateway,
    question: &str,
    answer: &str,
    notes: &str,
    missing: &[String],
    settings: &LlmSettings,
) -> String {
    let target = missing
        .first()
        .cloned()
        .unwrap_or_else(|| "an aspect not yet covered".to_string());
    let missing_list = if missing.is_empty() {
        "no specific aspect".to_string()
    } else {
        missing.join(", ")
    };

    let mut messages = vec![
        ChatMessage::system("You are a courteous, curious HR interviewer."),
        ChatMessage::system(
            "Example 1 - QUESTION: What does your typical day look like?\n\
             ANSWER: I usually wake up at 7, take the kids to school and then work at the office.\n\
             FOLLOW-UP: What is the most demanding moment of your day?",
        ),
        ChatMessage::system(
            "Example 2 - QUESTION: What sports do you practice?\n\
             ANSWER: I like going for a run twice a week.\n\
             FOLLOW-UP: What keeps you motivated to maintain that routine?",
        ),
        ChatMessage::assistant(question),
        ChatMessage::user(answer),
    ];
    if !notes.is_empty() {
        messages.push(ChatMessage::assistant(format!("NOTES: {notes}")));
    }
    messages.push(ChatMessage::system(format!(
        "The candidate has just answered the main question. These key aspects were not \
         covered or not covered enough: {missing_list}.\n\
         Formulate ONE follow-up question, at most 25 words, in a conversational tone.\n\
         The question must:\n\
         1. End with '?'\n\
         2. Connect naturally to the candidate's previous answer.\n\
         3. Invite the candidate to expand specifically on the subtopic '{target}'.\n\
         Avoid generic \"can you tell me more?\" phrasings; refer to one of the untouched aspects."
    )));

    for _attempt in 0..2 {
        let call = gateway.chat_text(messages.clone(), 0.6, 60);
        match tokio::time::timeout(settings.follow_up_timeout, call).await {
            Ok(Ok(candidate)) => {
                if is_valid_follow_up(&candidate) {
                    return candidate.trim().to_string();
                }
                tracing::debug!("follow-up candidate rejected: {candidate:?}");
                messages.push(ChatMessage::system(
                    "The previous reply did not meet the requirements. Try again with ONE short \
                     question ending in '?'",
                ));
            }
            Ok(Err(e)) => {
                tracing::warn!("follow-up generation failed: {e}");
            }
            Err(_) => {
                tracing::warn!("follow-up generation timed out");
            }
        }
    }

    format!("Could you tell me more about '{target}'?")
}

// --- Topic arbitration ---

/// Asks the model whether `utterance` touches each of `names`, in order.
/// The reply is expected as comma-separated `T`/`F` flags; short replies pad
/// with `false`.
pub async fn arbitrate_topics(
    gateway: &dyn LlmGateway,
    utterance: &str,
    names: &[String],
) -> Result<Vec<bool>, GatewayError> {
    let prompt = format!(
        "Given the following text:\n\n\"{utterance}\"\n\n\
         Tell me whether this text is about each of the following topics: {}. \
         Answer only with \"T\" or \"F\" separated by commas, in the same order as the topics. \
         Do not add anything else to the reply.",
        names.join(", ")
    );

    let reply = gateway
        .chat_text(vec![ChatMessage::user(prompt)], 0.0, 60)
        .await?;

    let mut flags: Vec<bool> = reply
        .split(',')
        .map(|flag| flag.trim().eq_ignore_ascii_case("t"))
        .collect();
    flags.resize(names.len(), false);
    Ok(flags)
}

// --- Reflection summaries ---

/// Condenses recent transcript turns into at most six bullet points.
pub async fn reflect_summary(
    gateway: &dyn LlmGateway,
    transcript: &str,
) -> Result<String, GatewayError> {
    let messages = vec![
        ChatMessage::system(
            "You are an assistant that reads an interview transcript and produces concise \
             reflections (max 6 bullet points).",
        ),
        ChatMessage::user(format!(
            "{transcript}\n\n### TASK\nSummarize the new or important elements as bullet points."
        )),
    ];
    gateway.chat_text(messages, 0.3, 120).await
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::env;

    fn enrichment(subtopics: &[&str], keywords: &[&[&str]]) -> Enrichment {
        Enrichment {
            primary_topic: "work".into(),
            subtopics: subtopics.iter().map(|s| s.to_string()).collect(),
            keywords: keywords
                .iter()
                .map(|l| l.iter().map(|k| k.to_string()).collect())
                .collect(),
        }
    }

    #[test]
    fn business_rules_accept_a_valid_reply() {
        let data = enrichment(
            &["role", "stack"],
            &[&["manager", "lead"], &["rust", "tokio"]],
        );
        assert!(check_business_rules(&data).is_ok());
    }

    #[test]
    fn business_rules_reject_too_few_subtopics() {
        let data = enrichment(&["role"], &[&["manager"]]);
        assert!(check_business_rules(&data).is_err());
    }

    #[test]
    fn business_rules_reject_duplicate_subtopics() {
        let data = enrichment(&["role", "role"], &[&["manager"], &["lead"]]);
        assert!(check_business_rules(&data).is_err());
    }

    #[test]
    fn business_rules_reject_oversized_keyword_lists() {
        let data = enrichment(
            &["role", "stack"],
            &[&["a", "b", "c", "d", "e", "f", "g"], &["rust"]],
        );
        assert!(check_business_rules(&data).is_err());
    }

    #[test]
    fn business_rules_reject_shared_keywords() {
        let data = enrichment(&["role", "stack"], &[&["manager"], &["manager"]]);
        let err = check_business_rules(&data).unwrap_err();
        assert!(err.contains("manager"));
    }

    #[test]
    fn json_payload_tolerates_surrounding_prose() {
        let raw = "Sure! Here you go: {\"a\": 1} hope that helps";
        let value = parse_json_payload(raw).unwrap();
        assert_eq!(value["a"], 1);
    }

    #[tokio::test]
    async fn enrichment_retries_after_a_business_rule_violation() {
        let mut gateway = MockLlmGateway::new();
        let mut calls = 0u32;
        gateway
            .expect_chat_json()
            .times(2)
            .returning(move |messages, _, _, _, _| {
                calls += 1;
                let value = if calls == 1 {
                    // First reply: only one subtopic, violates the rules.
                    serde_json::json!({
                        "primary_topic": "work",
                        "subtopics": ["role"],
                        "keywords": [["manager"]],
                    })
                } else {
                    // The retry must carry the corrective assistant turn.
                    assert!(messages.iter().any(|m| m.role == "assistant"
                        && m.content.contains("Invalid output")));
                    serde_json::json!({
                        "primary_topic": "work",
                        "subtopics": ["role", "stack"],
                        "keywords": [["manager"], ["rust"]],
                    })
                };
                Box::pin(async move { Ok(value) })
            });

        let settings = LlmSettings::default();
        let result = request_enrichment(&gateway, "Tell me about your job.", &settings)
            .await
            .unwrap();
        assert_eq!(result.subtopics, vec!["role", "stack"]);
    }

    #[tokio::test]
    async fn enrichment_gives_up_after_max_retries() {
        let mut gateway = MockLlmGateway::new();
        gateway.expect_chat_json().times(3).returning(|_, _, _, _, _| {
            Box::pin(async {
                Ok(serde_json::json!({
                    "primary_topic": "work",
                    "subtopics": ["role"],
                    "keywords": [["manager"]],
                }))
            })
        });

        let settings = LlmSettings::default();
        let result = request_enrichment(&gateway, "Tell me about your job.", &settings).await;
        assert!(matches!(result, Err(GatewayError::InvalidOutput(_))));
    }

    #[tokio::test]
    async fn follow_up_falls_back_after_failures() {
        let mut gateway = MockLlmGateway::new();
        gateway
            .expect_chat_text()
            .times(2)
            .returning(|_, _, _| Box::pin(async { Err(GatewayError::NoChoices) }));

        let settings = LlmSettings::default();
        let missing = vec!["stack".to_string(), "outcome".to_string()];
        let question = generate_follow_up(
            &gateway,
            "Describe a workplace challenge.",
            "I led the team.",
            "",
            &missing,
            &settings,
        )
        .await;
        assert_eq!(question, "Could you tell me more about 'stack'?");
    }

    #[tokio::test]
    async fn follow_up_retries_once_on_invalid_candidate() {
        let mut gateway = MockLlmGateway::new();
        let mut calls = 0u32;
        gateway.expect_chat_text().times(2).returning(move |_, _, _| {
            calls += 1;
            let candidate: String = if calls == 1 {
                "ok?".into() // too short
            } else {
                "Which technologies did your team rely on for the backend?".into()
            };
            Box::pin(async move { Ok(candidate) })
        });

        let settings = LlmSettings::default();
        let missing = vec!["stack".to_string()];
        let question =
            generate_follow_up(&gateway, "q", "a", "", &missing, &settings).await;
        assert!(question.ends_with('?'));
        assert!(question.len() > 5);
    }

    #[tokio::test]
    async fn arbitration_parses_and_pads_flags() {
        let mut gateway = MockLlmGateway::new();
        gateway
            .expect_chat_text()
            .returning(|_, _, _| Box::pin(async { Ok("T, f".into()) }));

        let names = vec!["role".to_string(), "stack".to_string(), "outcome".to_string()];
        let flags = arbitrate_topics(&gateway, "I led the team", &names)
            .await
            .unwrap();
        assert_eq!(flags, vec![true, false, false]);
    }

    // Live API smoke test; run with `cargo test -- --ignored` and a real
    // OPENAI_API_KEY in the environment.
    #[tokio::test]
    #[ignore]
    async fn live_enrichment_smoke() {
        dotenvy::dotenv().ok();
        let api_key = env::var("OPENAI_API_KEY").expect("OPENAI_API_KEY not set");
        let gateway = OpenAiGateway::new(api_key, "gpt-4o".into());
        let settings = LlmSettings::default();
        let result = request_enrichment(&gateway, "Tell me about your family.", &settings)
            .await
            .expect("enrichment should succeed");
        assert!((2..=8).contains(&result.subtopics.len()));
    }
}
