use std::net::SocketAddr;
use tracing::Level;

/// A custom error type for configuration loading failures.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Invalid value for environment variable {0}: {1}")]
    InvalidValue(String, String),
    #[error(transparent)]
    Engine(#[from] interview_core::config::ConfigError),
}

/// Service-level configuration loaded from the environment at startup.
/// Engine tuning (thresholds, models, retries) lives in
/// [`interview_core::EngineConfig`].
#[derive(Clone)]
pub struct Config {
    pub bind_address: SocketAddr,
    pub tts_voice: String,
    pub log_level: Level,
    pub engine: interview_core::EngineConfig,
}

impl Config {
    /// Loads configuration from environment variables.
    ///
    /// This function will look for a `.env` file in the current directory
    /// and load the following variables:
    ///
    /// *   `BIND_ADDRESS`: The address and port to bind the server to. Defaults to "127.0.0.1:8000".
    /// *   `TTS_VOICE`: (Optional) The default voice for the speech side channel. Defaults to "nova".
    /// *   `RUST_LOG` / `LOG_LEVEL`: (Optional) The logging level. Defaults to "INFO".
    ///
    /// plus everything `EngineConfig::from_env` reads (`OPENAI_API_KEY`,
    /// thresholds, detector choice, ...).
    pub fn from_env() -> Result<Self, ConfigError> {
        dotenvy::dotenv().ok();

        let bind_address_str =
            std::env::var("BIND_ADDRESS").unwrap_or_else(|_| "127.0.0.1:8000".to_string());
        let bind_address = bind_address_str
            .parse::<SocketAddr>()
            .map_err(|e| ConfigError::InvalidValue("BIND_ADDRESS".to_string(), e.to_string()))?;

        let tts_voice = std::env::var("TTS_VOICE").unwrap_or_else(|_| "nova".to_string());

        let log_level_str = std::env::var("RUST_LOG")
            .or_else(|_| std::env::var("LOG_LEVEL"))
            .unwrap_or_else(|_| "INFO".to_string());
        let log_level = log_level_str.parse::<Level>().map_err(|_| {
            ConfigError::InvalidValue(
                "RUST_LOG".to_string(),
                format!("'{}' is not a valid log level", log_level_str),
            )
        })?;

        let engine = interview_core::EngineConfig::from_env()?;

        Ok(Self {
            bind_address,
            tts_voice,
            log_level,
            engine,
        })
    }
}
