use anyhow::Result;
use serde::Deserialize;
use std::time::Duration;

use crate::audio::SilenceGate;
use crate::pipeline::RetryPolicy;

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct Config {
    pub service: ServiceConfig,
    pub streaming: StreamingConfig,
    pub transcription: TranscriptionConfig,
    pub categorization: CategorizationConfig,
    pub review: ReviewConfig,
    pub nats: NatsConfig,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ServiceConfig {
    pub name: String,
    pub http: HttpConfig,
}

impl Default for ServiceConfig {
    fn default() -> Self {
        Self {
            name: "dictation-stream".to_string(),
            http: HttpConfig::default(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct HttpConfig {
    pub bind: String,
    pub port: u16,
}

impl Default for HttpConfig {
    fn default() -> Self {
        Self {
            bind: "0.0.0.0".to_string(),
            port: 8090,
        }
    }
}

/// Session, admission and buffering limits
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct StreamingConfig {
    /// Maximum concurrently admitted sessions
    pub max_sessions: usize,

    /// Estimated service time per queue slot, used for wait estimates
    pub per_slot_wait_ms: u64,

    /// Maximum waiting requests before new ones are refused (0 = unbounded)
    pub max_queue_length: usize,

    /// Sessions without activity for this long are marked idle
    pub idle_timeout_ms: u64,

    /// How long idle or finished sessions stay recoverable before cleanup
    pub recovery_window_ms: u64,

    /// Reaper sweep interval
    pub reaper_interval_ms: u64,

    /// How long a sequence gap may block readiness before it is skipped (0 = never)
    pub gap_skip_timeout_ms: u64,

    /// Maximum distance a chunk may run ahead of the next expected sequence number
    pub max_reorder_window: u64,

    /// Maximum chunks per transcription call
    pub ready_batch_size: usize,

    /// Ceiling on buffered audio across all sessions
    pub max_buffered_bytes: u64,

    /// Ceiling on unprocessed audio buffered by a single session
    pub max_session_buffer_bytes: u64,

    /// Keep processed chunk payloads for export / re-transcription
    pub retain_processed_audio: bool,

    /// Segments below this confidence are flagged uncertain
    pub uncertainty_threshold: f32,

    /// Per-session event channel capacity
    pub event_capacity: usize,
}

impl Default for StreamingConfig {
    fn default() -> Self {
        Self {
            max_sessions: 10,
            per_slot_wait_ms: 30_000,
            max_queue_length: 50,
            idle_timeout_ms: 60_000,
            recovery_window_ms: 300_000,
            reaper_interval_ms: 10_000,
            gap_skip_timeout_ms: 5_000,
            max_reorder_window: 4096,
            ready_batch_size: 32,
            max_buffered_bytes: 256 * 1024 * 1024,
            max_session_buffer_bytes: 32 * 1024 * 1024,
            retain_processed_audio: true,
            uncertainty_threshold: 0.7,
            event_capacity: 256,
        }
    }
}

impl StreamingConfig {
    pub fn idle_timeout(&self) -> Duration {
        Duration::from_millis(self.idle_timeout_ms)
    }

    pub fn recovery_window(&self) -> Duration {
        Duration::from_millis(self.recovery_window_ms)
    }

    pub fn reaper_interval(&self) -> Duration {
        Duration::from_millis(self.reaper_interval_ms.max(1))
    }

    pub fn gap_skip_timeout(&self) -> Option<Duration> {
        (self.gap_skip_timeout_ms > 0).then(|| Duration::from_millis(self.gap_skip_timeout_ms))
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct TranscriptionConfig {
    /// Base URL of the whisper transcription API
    pub base_url: String,
    pub sample_rate: u32,
    pub channels: u16,
    pub timeout_ms: u64,
    /// Overrides the built-in vocabulary prompt
    pub initial_prompt: Option<String>,
    /// Backoff for failed transcription calls
    pub retry: RetryPolicy,
    /// Local silence detection before upload
    pub vad: VadConfig,
    /// Decoding parameters forwarded to the transcription service
    pub temperature: f32,
    pub no_speech_threshold: f32,
    pub compression_ratio_threshold: f32,
    pub logprob_threshold: f32,
}

impl Default for TranscriptionConfig {
    fn default() -> Self {
        Self {
            base_url: "http://localhost:8080".to_string(),
            sample_rate: 16000, // Whisper expects 16kHz
            channels: 1,
            timeout_ms: 120_000,
            initial_prompt: None,
            retry: RetryPolicy::default(),
            vad: VadConfig::default(),
            temperature: 0.0,
            no_speech_threshold: 0.6,
            compression_ratio_threshold: 2.4,
            logprob_threshold: -1.0,
        }
    }
}

/// Energy gate that skips transcription of silent audio
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct VadConfig {
    pub enabled: bool,
    pub min_rms: f64,
    /// Fraction of samples that must exceed `min_rms`
    pub min_speech_ratio: f64,
}

impl VadConfig {
    pub fn gate(&self) -> Option<SilenceGate> {
        self.enabled.then_some(SilenceGate {
            min_rms: self.min_rms,
            min_speech_ratio: self.min_speech_ratio,
        })
    }
}

impl Default for VadConfig {
    fn default() -> Self {
        let gate = SilenceGate::default();
        Self {
            enabled: true,
            min_rms: gate.min_rms,
            min_speech_ratio: gate.min_speech_ratio,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct CategorizationConfig {
    pub base_url: String,
    pub timeout_ms: u64,
}

impl Default for CategorizationConfig {
    fn default() -> Self {
        Self {
            base_url: "http://localhost:3000/api".to_string(),
            timeout_ms: 60_000,
        }
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct ReviewConfig {
    /// Backend API base URL; review items stay in memory when unset
    pub base_url: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct NatsConfig {
    pub enabled: bool,
    pub url: String,
}

impl Default for NatsConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            url: "nats://localhost:4222".to_string(),
        }
    }
}

impl Config {
    /// Load from an optional config file, overridden by `DICTATION__SECTION__KEY` env vars
    pub fn load(path: &str) -> Result<Self> {
        let settings = config::Config::builder()
            .add_source(config::File::with_name(path).required(false))
            .add_source(config::Environment::with_prefix("DICTATION").separator("__"))
            .build()?;

        Ok(settings.try_deserialize()?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_defaults_match_observed_limits() {
        let cfg = Config::default();
        assert_eq!(cfg.streaming.max_sessions, 10);
        assert_eq!(cfg.streaming.per_slot_wait_ms, 30_000);
        assert_eq!(cfg.streaming.idle_timeout(), Duration::from_secs(60));
        assert_eq!(cfg.transcription.sample_rate, 16000);
        assert_eq!(cfg.transcription.no_speech_threshold, 0.6);
        assert_eq!(cfg.transcription.vad.gate(), Some(SilenceGate::default()));
        assert!(!cfg.nats.enabled);
    }

    #[test]
    fn test_load_partial_file_keeps_defaults() -> Result<()> {
        let dir = tempfile::tempdir()?;
        let path = dir.path().join("dictation.toml");
        let mut file = std::fs::File::create(&path)?;
        writeln!(file, "[streaming]\nmax_sessions = 3\ngap_skip_timeout_ms = 0")?;
        writeln!(file, "[service.http]\nport = 9000")?;
        writeln!(file, "[transcription.vad]\nenabled = false")?;

        let cfg = Config::load(path.with_extension("").to_str().unwrap_or_default())?;

        assert_eq!(cfg.streaming.max_sessions, 3);
        assert_eq!(cfg.streaming.gap_skip_timeout(), None);
        assert_eq!(cfg.streaming.per_slot_wait_ms, 30_000);
        assert_eq!(cfg.service.http.port, 9000);
        assert_eq!(cfg.service.http.bind, "0.0.0.0");
        assert_eq!(cfg.transcription.vad.gate(), None);
        assert_eq!(cfg.transcription.vad.min_rms, 200.0);
        Ok(())
    }

    #[test]
    fn test_missing_file_uses_defaults() -> Result<()> {
        let cfg = Config::load("/nonexistent/dictation-stream")?;
        assert_eq!(cfg.service.name, "dictation-stream");
        Ok(())
    }
}
