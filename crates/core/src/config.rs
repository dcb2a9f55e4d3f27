//! Engine configuration, loaded from environment variables with sensible
//! defaults for everything but the API key.

use crate::coverage::Thresholds;
use crate::llm::LlmSettings;
use std::env;
use std::time::Duration;

/// Which coverage detector the controller runs.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DetectorKind {
    Cascade,
    LlmArbiter,
}

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Missing environment variable: {0}")]
    MissingVar(String),
    #[error("Invalid value for {var}: {value}")]
    InvalidValue { var: String, value: String },
}

/// Everything the engine reads from the environment.
///
/// *   `OPENAI_API_KEY`: required.
/// *   `OPENAI_MODEL`: chat model for enrichment, follow-ups and
///     arbitration. Defaults to "gpt-4o".
/// *   `OPENAI_TEMP`, `MAX_TOKENS`, `MAX_RETRIES`: gateway tuning.
/// *   `EMBEDDING_MODEL`, `EMBEDDING_DIM`: the embeddings backend.
/// *   `TH_FUZZY` (0-100), `TH_COS` (0-1): static cascade thresholds.
/// *   `ADAPTIVE_THRESHOLDS`: length-adaptive thresholds, on by default.
/// *   `COVERAGE_THRESHOLD_PERCENT` (0-100): follow-up decision line.
/// *   `DETECTOR`: "cascade" (default) or "llm-arbiter".
/// *   `FOLLOW_UP_TIMEOUT_SECS`: per-call budget for follow-up generation.
#[derive(Debug, Clone)]
pub struct EngineConfig {
    pub openai_api_key: String,
    pub openai_model: String,
    pub temperature: f32,
    pub max_tokens: u32,
    pub max_retries: u32,
    pub follow_up_timeout_secs: u64,
    pub embedding_model: String,
    pub embedding_dim: usize,
    pub thresholds: Thresholds,
    pub adaptive_thresholds: bool,
    pub coverage_threshold_percent: f32,
    pub detector: DetectorKind,
}

fn parse_var<T: std::str::FromStr>(var: &str, default: T) -> Result<T, ConfigError> {
    match env::var(var) {
        Ok(raw) => raw.parse().map_err(|_| ConfigError::InvalidValue {
            var: var.to_string(),
            value: raw,
        }),
        Err(_) => Ok(default),
    }
}

impl EngineConfig {
    pub fn from_env() -> Result<Self, ConfigError> {
        // Load .env for local development; ignored when not present.
        dotenvy::dotenv().ok();

        let openai_api_key = env::var("OPENAI_API_KEY")
            .map_err(|_| ConfigError::MissingVar("OPENAI_API_KEY".to_string()))?;

        let th_fuzzy: u8 = parse_var("TH_FUZZY", 90)?;
        if th_fuzzy > 100 {
            return Err(ConfigError::InvalidValue {
                var: "TH_FUZZY".into(),
                value: th_fuzzy.to_string(),
            });
        }
        let th_cos: f32 = parse_var("TH_COS", 0.75)?;
        if !(0.0..=1.0).contains(&th_cos) {
            return Err(ConfigError::InvalidValue {
                var: "TH_COS".into(),
                value: th_cos.to_string(),
            });
        }
        let coverage_threshold_percent: f32 = parse_var("COVERAGE_THRESHOLD_PERCENT", 80.0)?;
        if !(0.0..=100.0).contains(&coverage_threshold_percent) {
            return Err(ConfigError::InvalidValue {
                var: "COVERAGE_THRESHOLD_PERCENT".into(),
                value: coverage_threshold_percent.to_string(),
            });
        }

        let detector = match env::var("DETECTOR")
            .unwrap_or_else(|_| "cascade".to_string())
            .to_lowercase()
            .as_str()
        {
            "llm-arbiter" | "llm_arbiter" | "arbiter" => DetectorKind::LlmArbiter,
            _ => DetectorKind::Cascade,
        };

        Ok(Self {
            openai_api_key,
            openai_model: env::var("OPENAI_MODEL").unwrap_or_else(|_| "gpt-4o".to_string()),
            temperature: parse_var("OPENAI_TEMP", 0.4)?,
            max_tokens: parse_var("MAX_TOKENS", 450)?,
            max_retries: parse_var("MAX_RETRIES", 3)?,
            follow_up_timeout_secs: parse_var("FOLLOW_UP_TIMEOUT_SECS", 15)?,
            embedding_model: env::var("EMBEDDING_MODEL")
                .unwrap_or_else(|_| "text-embedding-3-small".to_string()),
            embedding_dim: parse_var("EMBEDDING_DIM", 1536)?,
            thresholds: Thresholds {
                fuzzy: th_fuzzy,
                cosine: th_cos,
            },
            adaptive_thresholds: parse_var("ADAPTIVE_THRESHOLDS", true)?,
            coverage_threshold_percent,
            detector,
        })
    }

    /// The gateway tuning derived from this configuration.
    pub fn llm_settings(&self) -> LlmSettings {
        LlmSettings {
            temperature: self.temperature,
            max_tokens: self.max_tokens,
            max_retries: self.max_retries,
            follow_up_timeout: Duration::from_secs(self.follow_up_timeout_secs),
        }
    }
}
