use anyhow::{bail, Context, Result};
use serde::{Deserialize, Deserializer};
use std::time::Duration;
use tracing::{debug, info};

use crate::audio::{encode_pcm16, pcm16_duration_ms, SilenceGate};
use crate::config::TranscriptionConfig;
use crate::pipeline::{SpeechSegment, Transcriber, Transcription};
use crate::session::Language;

/// Vocabulary hint for Japanese clinical dictation
const JA_MEDICAL_PROMPT: &str =
    "医療記録、バイタルサイン、看護評価、血圧、脈拍、体温、患者";

/// Client for the whisper transcription API
pub struct WhisperTranscriber {
    client: reqwest::Client,
    base_url: String,
    sample_rate: u32,
    channels: u16,
    initial_prompt: Option<String>,
    silence_gate: Option<SilenceGate>,
    decoding: DecodingParams,
}

/// Decoder settings sent with every upload
#[derive(Debug, Clone, Copy)]
struct DecodingParams {
    temperature: f32,
    no_speech_threshold: f32,
    compression_ratio_threshold: f32,
    logprob_threshold: f32,
}

impl WhisperTranscriber {
    pub fn new(config: &TranscriptionConfig) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_millis(config.timeout_ms))
            .build()
            .context("Failed to build whisper HTTP client")?;

        info!(
            "Whisper transcriber at {} ({} Hz, {} channel(s))",
            config.base_url, config.sample_rate, config.channels
        );

        Ok(Self {
            client,
            base_url: config.base_url.trim_end_matches('/').to_string(),
            sample_rate: config.sample_rate,
            channels: config.channels,
            initial_prompt: config.initial_prompt.clone(),
            silence_gate: config.vad.gate(),
            decoding: DecodingParams {
                temperature: config.temperature,
                no_speech_threshold: config.no_speech_threshold,
                compression_ratio_threshold: config.compression_ratio_threshold,
                logprob_threshold: config.logprob_threshold,
            },
        })
    }

    /// True when the gate is on and the audio carries too little energy to transcribe
    fn is_silent(&self, audio: &[u8]) -> bool {
        let Some(gate) = &self.silence_gate else {
            return false;
        };
        let energy = gate.measure(audio);
        debug!(
            "Audio energy: rms={:.0} peak={} speech_ratio={:.2}%",
            energy.rms,
            energy.peak,
            energy.speech_ratio * 100.0
        );
        !gate.has_speech(&energy)
    }

    fn prompt_for(&self, language: Language) -> Option<String> {
        match (&self.initial_prompt, language) {
            (Some(prompt), _) => Some(prompt.clone()),
            (None, Language::Ja) => Some(JA_MEDICAL_PROMPT.to_string()),
            (None, _) => None,
        }
    }

    /// GET /health on the transcription service
    pub async fn health(&self) -> Result<()> {
        let response = self
            .client
            .get(format!("{}/health", self.base_url))
            .send()
            .await
            .context("Whisper health check failed")?;

        if !response.status().is_success() {
            bail!("Whisper health check returned status {}", response.status());
        }
        Ok(())
    }
}

#[async_trait::async_trait]
impl Transcriber for WhisperTranscriber {
    async fn transcribe(&self, audio: &[u8], language: Language) -> Result<Transcription> {
        if self.is_silent(audio) {
            debug!(
                "Skipping transcription of {} ms of silence",
                pcm16_duration_ms(audio.len(), self.sample_rate, self.channels)
            );
            return Ok(Transcription {
                text: String::new(),
                confidence: 1.0,
                segments: Vec::new(),
            });
        }

        let wav = encode_pcm16(audio, self.sample_rate, self.channels)?;
        debug!(
            "Uploading {} ms of audio ({} bytes) for transcription",
            pcm16_duration_ms(audio.len(), self.sample_rate, self.channels),
            wav.len()
        );

        let file = reqwest::multipart::Part::bytes(wav)
            .file_name("chunk.wav")
            .mime_str("audio/wav")?;
        let mut form = reqwest::multipart::Form::new()
            .part("file", file)
            .text("language", language.code().to_string())
            .text("temperature", self.decoding.temperature.to_string())
            .text("no_speech_threshold", self.decoding.no_speech_threshold.to_string())
            .text(
                "compression_ratio_threshold",
                self.decoding.compression_ratio_threshold.to_string(),
            )
            .text("logprob_threshold", self.decoding.logprob_threshold.to_string());
        if let Some(prompt) = self.prompt_for(language) {
            form = form.text("initial_prompt", prompt);
        }

        let response = self
            .client
            .post(format!("{}/transcribe", self.base_url))
            .multipart(form)
            .send()
            .await
            .context("Failed to reach whisper service")?;

        if !response.status().is_success() {
            bail!("Whisper service returned status {}", response.status());
        }

        let body: WhisperResponse = response
            .json()
            .await
            .context("Failed to parse whisper response")?;
        body.into_transcription()
    }

    fn name(&self) -> &str {
        "whisper"
    }
}

#[derive(Debug, Deserialize)]
struct WhisperResponse {
    status: String,
    #[serde(default)]
    error: Option<String>,
    #[serde(default, deserialize_with = "lenient_f32")]
    language_probability: Option<f32>,
    #[serde(default)]
    full_text: String,
    #[serde(default)]
    segments: Vec<WhisperSegment>,
    /// Set when the service judged the upload to be silence
    #[serde(default)]
    vad_filtered: bool,
}

#[derive(Debug, Deserialize)]
struct WhisperSegment {
    #[serde(default, deserialize_with = "lenient_f32")]
    start: Option<f32>,
    #[serde(default, deserialize_with = "lenient_f32")]
    end: Option<f32>,
    text: String,
    #[serde(default, deserialize_with = "lenient_f32")]
    confidence: Option<f32>,
}

impl WhisperResponse {
    fn into_transcription(self) -> Result<Transcription> {
        if self.status != "success" {
            bail!(
                "Whisper transcription failed: {}",
                self.error.unwrap_or_else(|| self.status.clone())
            );
        }

        if self.vad_filtered {
            debug!("Whisper service filtered the upload as silence");
        }

        let fallback = self.language_probability.unwrap_or(1.0).clamp(0.0, 1.0);
        let segments: Vec<SpeechSegment> = self
            .segments
            .into_iter()
            .filter(|s| !s.text.trim().is_empty())
            .map(|s| SpeechSegment {
                text: s.text.trim().to_string(),
                confidence: s.confidence.unwrap_or(fallback).clamp(0.0, 1.0),
                start_ms: s.start.map(seconds_to_ms),
                end_ms: s.end.map(seconds_to_ms),
            })
            .collect();

        let confidence = if segments.is_empty() {
            fallback
        } else {
            segments.iter().map(|s| s.confidence).sum::<f32>() / segments.len() as f32
        };

        Ok(Transcription {
            text: self.full_text.trim().to_string(),
            confidence,
            segments,
        })
    }
}

fn seconds_to_ms(seconds: f32) -> u64 {
    (seconds.max(0.0) * 1000.0).round() as u64
}

/// Whisper services encode numbers either as JSON numbers or as strings
fn lenient_f32<'de, D>(deserializer: D) -> std::result::Result<Option<f32>, D::Error>
where
    D: Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum NumberOrString {
        Number(f32),
        Text(String),
    }

    match Option::<NumberOrString>::deserialize(deserializer)? {
        None => Ok(None),
        Some(NumberOrString::Number(n)) => Ok(Some(n)),
        Some(NumberOrString::Text(s)) => s
            .trim()
            .parse::<f32>()
            .map(Some)
            .map_err(serde::de::Error::custom),
    }
}
