// Scripted in-memory collaborators shared by the integration tests
#![allow(dead_code)]

use anyhow::{bail, Result};
use dictation_stream::config::Config;
use dictation_stream::pipeline::{
    Categorization, Categorizer, ReviewItem, ReviewStore, Transcriber, Transcription,
};
use dictation_stream::session::{Language, SessionId, SessionSnapshot};
use dictation_stream::StreamService;
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

/// Transcribes audio by reading the payload bytes back as UTF-8 text
#[derive(Default)]
pub struct ScriptedTranscriber {
    /// Number of upcoming calls that fail
    pub failures: AtomicUsize,
    pub calls: AtomicUsize,
    pub confidence: Mutex<Option<f32>>,
    pub delay: Mutex<Option<Duration>>,
}

impl ScriptedTranscriber {
    pub fn fail_next(&self, calls: usize) {
        self.failures.store(calls, Ordering::SeqCst);
    }

    pub fn set_confidence(&self, confidence: f32) {
        *self.confidence.lock().unwrap() = Some(confidence);
    }

    pub fn set_delay(&self, delay: Duration) {
        *self.delay.lock().unwrap() = Some(delay);
    }
}

#[async_trait::async_trait]
impl Transcriber for ScriptedTranscriber {
    async fn transcribe(&self, audio: &[u8], _language: Language) -> Result<Transcription> {
        self.calls.fetch_add(1, Ordering::SeqCst);

        let delay = *self.delay.lock().unwrap();
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }

        let remaining = self.failures.load(Ordering::SeqCst);
        if remaining > 0 {
            self.failures.store(remaining - 1, Ordering::SeqCst);
            bail!("speech engine unavailable");
        }

        let text = String::from_utf8_lossy(audio).split_whitespace().collect::<Vec<_>>().join(" ");
        let confidence = self.confidence.lock().unwrap().unwrap_or(0.9);
        Ok(Transcription::single(text, confidence))
    }

    fn name(&self) -> &str {
        "scripted"
    }
}

#[derive(Default)]
pub struct ScriptedCategorizer {
    pub failures: AtomicUsize,
    pub calls: AtomicUsize,
}

impl ScriptedCategorizer {
    pub fn fail_next(&self, calls: usize) {
        self.failures.store(calls, Ordering::SeqCst);
    }
}

#[async_trait::async_trait]
impl Categorizer for ScriptedCategorizer {
    async fn categorize(&self, text: &str, _language: Language) -> Result<Categorization> {
        self.calls.fetch_add(1, Ordering::SeqCst);

        let remaining = self.failures.load(Ordering::SeqCst);
        if remaining > 0 {
            self.failures.store(remaining - 1, Ordering::SeqCst);
            bail!("categorization engine unavailable");
        }

        let mut extracted_fields = BTreeMap::new();
        extracted_fields.insert("word_count".to_string(), serde_json::json!(text.split_whitespace().count()));
        Ok(Categorization {
            categories: vec!["vital_signs".to_string()],
            extracted_fields,
            confidence: 0.85,
        })
    }
}

#[derive(Default)]
pub struct ScriptedStore {
    pub failures: AtomicUsize,
    pub items: Mutex<Vec<ReviewItem>>,
}

impl ScriptedStore {
    pub fn fail_next(&self, calls: usize) {
        self.failures.store(calls, Ordering::SeqCst);
    }

    pub fn items(&self) -> Vec<ReviewItem> {
        self.items.lock().unwrap().clone()
    }
}

#[async_trait::async_trait]
impl ReviewStore for ScriptedStore {
    async fn create_review_item(&self, item: &ReviewItem) -> Result<String> {
        let remaining = self.failures.load(Ordering::SeqCst);
        if remaining > 0 {
            self.failures.store(remaining - 1, Ordering::SeqCst);
            bail!("review queue write failed");
        }

        let mut items = self.items.lock().unwrap();
        items.push(item.clone());
        Ok(format!("review-{}", items.len()))
    }
}

pub struct Harness {
    pub service: Arc<StreamService>,
    pub transcriber: Arc<ScriptedTranscriber>,
    pub categorizer: Arc<ScriptedCategorizer>,
    pub store: Arc<ScriptedStore>,
}

/// Defaults with retry delays and timeouts short enough for tests
pub fn test_config() -> Config {
    let mut config = Config::default();
    config.streaming.gap_skip_timeout_ms = 0;
    config.transcription.timeout_ms = 2_000;
    config.categorization.timeout_ms = 2_000;
    config.transcription.retry.initial_delay_ms = 10;
    config.transcription.retry.max_delay_ms = 20;
    config
}

pub fn harness() -> Harness {
    harness_with(test_config())
}

pub fn harness_with(config: Config) -> Harness {
    let transcriber = Arc::new(ScriptedTranscriber::default());
    let categorizer = Arc::new(ScriptedCategorizer::default());
    let store = Arc::new(ScriptedStore::default());

    let service = Arc::new(StreamService::new(
        &config,
        transcriber.clone(),
        categorizer.clone(),
        store.clone(),
    ));

    Harness {
        service,
        transcriber,
        categorizer,
        store,
    }
}

/// Payload that the scripted transcriber reads back as `word`
pub fn word(word: &str) -> Vec<u8> {
    let mut bytes = format!("{} ", word).into_bytes();
    // Chunks must hold whole 16-bit samples
    if bytes.len() % 2 != 0 {
        bytes.push(b' ');
    }
    bytes
}

/// Poll a session until `ready` holds, failing after two seconds
pub async fn wait_for<F>(service: &StreamService, id: &SessionId, ready: F) -> SessionSnapshot
where
    F: Fn(&SessionSnapshot) -> bool,
{
    let deadline = tokio::time::Instant::now() + Duration::from_secs(2);
    loop {
        let snapshot = service.snapshot(id).await.unwrap();
        if ready(&snapshot) {
            return snapshot;
        }
        assert!(
            tokio::time::Instant::now() < deadline,
            "timed out waiting on session {}: {:?}",
            id,
            snapshot
        );
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
}
