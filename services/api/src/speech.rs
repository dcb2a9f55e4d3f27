//! The audio side channel: every question text the API returns carries a
//! companion URL pointing at `/tts/speak`, and this module implements that
//! endpoint's backend — an OpenAI text-to-speech proxy with a silent-beep
//! fallback so a dead provider never breaks an interview turn.

use reqwest::Client;
use std::time::Duration;

/// Builds the query-string URL a client can fetch to hear `text`.
pub fn speak_url(voice: &str, text: &str) -> String {
    let query: String = url::form_urlencoded::Serializer::new(String::new())
        .append_pair("voice", voice)
        .append_pair("text", text)
        .finish();
    format!("/tts/speak?{query}")
}

pub struct TtsClient {
    client: Client,
    api_key: String,
    model: String,
}

impl TtsClient {
    pub fn new(api_key: String) -> Self {
        Self {
            client: Client::builder()
                .timeout(Duration::from_secs(30))
                .build()
                .unwrap_or_default(),
            api_key,
            model: "tts-1".to_string(),
        }
    }

    /// Synthesises `text` with the given voice, returning MP3 bytes.
    pub async fn synthesize(&self, voice: &str, text: &str) -> Result<Vec<u8>, reqwest::Error> {
        let body = serde_json::json!({
            "model": self.model,
            "voice": voice,
            "input": text,
        });

        let bytes = self
            .client
            .post("https://api.openai.com/v1/audio/speech")
            .bearer_auth(&self.api_key)
            .json(&body)
            .send()
            .await?
            .error_for_status()?
            .bytes()
            .await?;

        Ok(bytes.to_vec())
    }
}

/// A quarter second of silence as a 16-bit mono WAV, served when the TTS
/// provider is unavailable.
pub fn silent_beep_wav() -> Vec<u8> {
    const SAMPLE_RATE: u32 = 16_000;
    const SAMPLES: u32 = SAMPLE_RATE / 4;
    let data_len = SAMPLES * 2;

    let mut wav = Vec::with_capacity(44 + data_len as usize);
    wav.extend_from_slice(b"RIFF");
    wav.extend_from_slice(&(36 + data_len).to_le_bytes());
    wav.extend_from_slice(b"WAVE");
    wav.extend_from_slice(b"fmt ");
    wav.extend_from_slice(&16u32.to_le_bytes()); // fmt chunk size
    wav.extend_from_slice(&1u16.to_le_bytes()); // PCM
    wav.extend_from_slice(&1u16.to_le_bytes()); // mono
    wav.extend_from_slice(&SAMPLE_RATE.to_le_bytes());
    wav.extend_from_slice(&(SAMPLE_RATE * 2).to_le_bytes()); // byte rate
    wav.extend_from_slice(&2u16.to_le_bytes()); // block align
    wav.extend_from_slice(&16u16.to_le_bytes()); // bits per sample
    wav.extend_from_slice(b"data");
    wav.extend_from_slice(&data_len.to_le_bytes());
    wav.resize(44 + data_len as usize, 0);
    wav
}
