// External collaborators consumed by the pipeline
//
// The speech-to-text engine, the categorization engine and the review-queue
// record store are black boxes behind these traits. Every call may fail;
// failures never touch transcript state that was already captured.

use anyhow::Result;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use crate::session::{ContextType, Language, SessionId};

/// One independently scored piece of a transcription
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SpeechSegment {
    pub text: String,
    pub confidence: f32,
    pub start_ms: Option<u64>,
    pub end_ms: Option<u64>,
}

/// Result of transcribing a batch of audio
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Transcription {
    pub text: String,
    pub confidence: f32,
    #[serde(default)]
    pub segments: Vec<SpeechSegment>,
}

impl Transcription {
    /// A transcription made of a single segment
    pub fn single(text: impl Into<String>, confidence: f32) -> Self {
        Self {
            text: text.into(),
            confidence,
            segments: Vec::new(),
        }
    }
}

/// Structured data extracted from a finalized transcript
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Categorization {
    pub categories: Vec<String>,
    #[serde(default)]
    pub extracted_fields: BTreeMap<String, serde_json::Value>,
    pub confidence: f32,
}

/// Finalized transcript plus extracted data, handed to the review queue
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReviewItem {
    pub session_id: SessionId,
    pub user_id: String,
    pub context_type: ContextType,
    pub patient_id: Option<String>,
    pub language: Language,
    pub transcript: String,
    pub categories: Vec<String>,
    pub extracted_fields: BTreeMap<String, serde_json::Value>,
    pub confidence: f32,
    pub created_at: DateTime<Utc>,
}

/// Speech-to-text engine
#[async_trait::async_trait]
pub trait Transcriber: Send + Sync {
    async fn transcribe(&self, audio: &[u8], language: Language) -> Result<Transcription>;

    /// Engine name for logging
    fn name(&self) -> &str;
}

/// Categorization / extraction engine
#[async_trait::async_trait]
pub trait Categorizer: Send + Sync {
    async fn categorize(&self, text: &str, language: Language) -> Result<Categorization>;
}

/// Persistent review queue
#[async_trait::async_trait]
pub trait ReviewStore: Send + Sync {
    /// Store a review item, returning its id
    async fn create_review_item(&self, item: &ReviewItem) -> Result<String>;
}
