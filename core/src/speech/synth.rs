//! Speech synthesis clients.
//!
//! [`GeminiSynthesizer`] talks to the Gemini `generateContent` endpoint with
//! audio response modality. The voice model is opaque: we send text and a
//! prebuilt voice name and get inline base64 audio back.
//!
//! Env overrides:
//! - GEMINI_BASE_URL, GEMINI_TTS_MODEL, GEMINI_API_KEY
//! - GEMINI_REQUEST_TIMEOUT_MS

use super::clip::{AudioClip, DEFAULT_PCM_RATE, MAX_SAMPLE_RATE};
use crate::settings::Voice;
use crate::{LiveError, Result};
use async_trait::async_trait;
use base64::{engine::general_purpose, Engine};
use reqwest::Client;
use serde::Serialize;
use serde_json::{json, Value};
use std::time::Duration;
use thiserror::Error;
use tracing::{debug, warn};

/// One utterance to synthesize
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SynthesisRequest {
    pub text: String,
    pub voice: Voice,
    pub speed: f32,
}

#[derive(Error, Debug, Clone, PartialEq)]
pub enum SynthesisError {
    #[error("synthesis transport error: {0}")]
    Transport(String),

    #[error("synthesis service returned status {status}: {body}")]
    Status { status: u16, body: String },

    #[error("synthesis response carried no audio")]
    NoAudio,

    #[error("synthesis audio could not be decoded: {0}")]
    Decode(String),

    #[error("synthesis timed out after {0} ms")]
    Timeout(u64),
}

/// Remote text-to-speech service
#[async_trait]
pub trait Synthesizer: Send + Sync {
    async fn synthesize(&self, request: &SynthesisRequest) -> std::result::Result<AudioClip, SynthesisError>;
}

#[derive(Debug, Clone)]
pub struct GeminiConfig {
    pub base_url: String,
    pub model: String,
    pub api_key: Option<String>,
    pub request_timeout_ms: u64,
}

impl Default for GeminiConfig {
    fn default() -> Self {
        Self {
            base_url: std::env::var("GEMINI_BASE_URL")
                .ok()
                .filter(|s| !s.is_empty())
                .unwrap_or_else(|| "https://generativelanguage.googleapis.com/v1beta".to_string()),
            model: std::env::var("GEMINI_TTS_MODEL")
                .ok()
                .filter(|s| !s.is_empty())
                .unwrap_or_else(|| "gemini-2.5-flash-preview-tts".to_string()),
            api_key: std::env::var("GEMINI_API_KEY").ok().filter(|s| !s.is_empty()),
            request_timeout_ms: std::env::var("GEMINI_REQUEST_TIMEOUT_MS")
                .ok()
                .and_then(|v| v.parse::<u64>().ok())
                .unwrap_or(30_000),
        }
    }
}

#[derive(Clone)]
pub struct GeminiSynthesizer {
    http: Client,
    cfg: GeminiConfig,
}

impl GeminiSynthesizer {
    pub fn new(cfg: GeminiConfig) -> Result<Self> {
        let http = Client::builder()
            .timeout(Duration::from_millis(cfg.request_timeout_ms))
            .build()
            .map_err(|e| LiveError::Config(format!("Failed to build HTTP client: {e}")))?;
        if cfg.api_key.is_none() {
            warn!(target = "synth", "GEMINI_API_KEY is not set; requests will likely be rejected");
        }
        Ok(Self { http, cfg })
    }

    pub fn from_env() -> Result<Self> {
        Self::new(GeminiConfig::default())
    }

    fn endpoint(&self) -> String {
        format!(
            "{}/models/{}:generateContent",
            self.cfg.base_url.trim_end_matches('/'),
            self.cfg.model
        )
    }
}

#[async_trait]
impl Synthesizer for GeminiSynthesizer {
    async fn synthesize(&self, request: &SynthesisRequest) -> std::result::Result<AudioClip, SynthesisError> {
        let url = self.endpoint();
        debug!(target = "synth", voice = request.voice.as_str(), chars = request.text.len(), "POST {}", url);

        let mut req = self
            .http
            .post(&url)
            .header("content-type", "application/json");
        if let Some(key) = &self.cfg.api_key {
            req = req.header("x-goog-api-key", key);
        }

        let body = generate_body(request, &self.cfg.model);
        let resp = req
            .json(&body)
            .send()
            .await
            .map_err(|e| SynthesisError::Transport(e.to_string()))?;

        if !resp.status().is_success() {
            let status = resp.status().as_u16();
            let body = resp.text().await.unwrap_or_default();
            return Err(SynthesisError::Status { status, body });
        }

        let val: Value = resp
            .json()
            .await
            .map_err(|e| SynthesisError::Decode(format!("invalid JSON: {e}")))?;
        parse_generate_response(&val)
    }
}

// Speed is not part of the wire request; it is applied at playback time
fn generate_body(request: &SynthesisRequest, model: &str) -> Value {
    json!({
        "contents": [{
            "parts": [{ "text": request.text }]
        }],
        "generationConfig": {
            "responseModalities": ["AUDIO"],
            "speechConfig": {
                "voiceConfig": {
                    "prebuiltVoiceConfig": { "voiceName": request.voice.as_str() }
                }
            }
        },
        "model": model,
    })
}

/// Extract the first inline audio part from a `generateContent` response
pub(crate) fn parse_generate_response(val: &Value) -> std::result::Result<AudioClip, SynthesisError> {
    let inline = val
        .pointer("/candidates/0/content/parts")
        .and_then(|p| p.as_array())
        .and_then(|parts| parts.iter().find_map(|p| p.get("inlineData")))
        .ok_or(SynthesisError::NoAudio)?;

    let data = inline
        .get("data")
        .and_then(|d| d.as_str())
        .filter(|d| !d.is_empty())
        .ok_or(SynthesisError::NoAudio)?;
    let bytes = general_purpose::STANDARD
        .decode(data)
        .map_err(|e| SynthesisError::Decode(format!("base64: {e}")))?;

    let mime = inline
        .get("mimeType")
        .and_then(|m| m.as_str())
        .unwrap_or("audio/L16;codec=pcm;rate=24000");
    clip_for_mime(mime, bytes)
}

fn clip_for_mime(mime: &str, bytes: Vec<u8>) -> std::result::Result<AudioClip, SynthesisError> {
    let lower = mime.to_ascii_lowercase();
    let mut parts = lower.split(';').map(str::trim);
    let essence = parts.next().unwrap_or_default();

    match essence {
        "audio/wav" | "audio/x-wav" | "audio/wave" => Ok(AudioClip::wav(bytes)),
        "audio/l16" | "audio/pcm" => {
            let rate = parts
                .find_map(|p| p.strip_prefix("rate="))
                .and_then(|r| r.parse::<u32>().ok())
                .unwrap_or(DEFAULT_PCM_RATE);
            if rate == 0 || rate > MAX_SAMPLE_RATE {
                return Err(SynthesisError::Decode(format!("unsupported sample rate {rate} Hz")));
            }
            Ok(AudioClip::pcm16(rate, 1, bytes))
        }
        other => Err(SynthesisError::Decode(format!("unsupported audio type '{other}'"))),
    }
}
