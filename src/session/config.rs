use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::error::{StreamError, StreamResult};

/// Opaque session identifier (e.g., "stream-0f6c...")
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SessionId(String);

impl SessionId {
    /// A fresh random id; uniqueness against live ids is enforced by the admission controller
    pub fn generate() -> Self {
        Self(format!("stream-{}", uuid::Uuid::new_v4()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for SessionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for SessionId {
    fn from(value: &str) -> Self {
        Self(value.to_string())
    }
}

impl From<String> for SessionId {
    fn from(value: String) -> Self {
        Self(value)
    }
}

/// What a dictation is about
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ContextType {
    /// Dictation about a specific patient
    Patient,
    /// Ward-level / general dictation
    Global,
}

/// Wire shape of a context change (`stream:context`)
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ContextUpdate {
    pub context_type: ContextType,
    #[serde(default)]
    pub patient_id: Option<String>,
}

/// The `(context_type, patient_id)` pair, validated at construction
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "ContextUpdate")]
pub struct SessionContext {
    context_type: ContextType,
    patient_id: Option<String>,
}

impl SessionContext {
    /// `patient` requires a patient id, `global` forbids one
    pub fn new(context_type: ContextType, patient_id: Option<String>) -> StreamResult<Self> {
        let patient_id = patient_id
            .map(|id| id.trim().to_string())
            .filter(|id| !id.is_empty());

        match (context_type, patient_id) {
            (ContextType::Patient, Some(id)) => Ok(Self {
                context_type,
                patient_id: Some(id),
            }),
            (ContextType::Patient, None) => Err(StreamError::InvalidContext(
                "patient context requires a patient_id".to_string(),
            )),
            (ContextType::Global, None) => Ok(Self {
                context_type,
                patient_id: None,
            }),
            (ContextType::Global, Some(_)) => Err(StreamError::InvalidContext(
                "global context must not carry a patient_id".to_string(),
            )),
        }
    }

    pub fn patient(patient_id: impl Into<String>) -> StreamResult<Self> {
        Self::new(ContextType::Patient, Some(patient_id.into()))
    }

    pub fn global() -> Self {
        Self {
            context_type: ContextType::Global,
            patient_id: None,
        }
    }

    pub fn context_type(&self) -> ContextType {
        self.context_type
    }

    pub fn patient_id(&self) -> Option<&str> {
        self.patient_id.as_deref()
    }
}

impl TryFrom<ContextUpdate> for SessionContext {
    type Error = StreamError;

    fn try_from(update: ContextUpdate) -> Result<Self, Self::Error> {
        Self::new(update.context_type, update.patient_id)
    }
}

/// Supported transcription languages
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Language {
    #[default]
    Ja,
    En,
    Zh,
    Ko,
}

impl Language {
    pub fn code(&self) -> &'static str {
        match self {
            Language::Ja => "ja",
            Language::En => "en",
            Language::Zh => "zh",
            Language::Ko => "ko",
        }
    }
}

impl fmt::Display for Language {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.code())
    }
}

impl FromStr for Language {
    type Err = StreamError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "ja" => Ok(Language::Ja),
            "en" => Ok(Language::En),
            "zh" => Ok(Language::Zh),
            "ko" => Ok(Language::Ko),
            other => Err(StreamError::InvalidConfig(format!(
                "unsupported language '{}'",
                other
            ))),
        }
    }
}

/// Configuration sent with `stream:start`
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionConfig {
    /// Clinician starting the dictation
    pub user_id: String,

    /// "patient" or "global"
    pub context_type: ContextType,

    /// Required for patient context, absent for global context
    #[serde(default)]
    pub patient_id: Option<String>,

    /// Transcription language (default: ja)
    #[serde(default)]
    pub language: Language,
}

impl SessionConfig {
    pub fn global(user_id: impl Into<String>) -> Self {
        Self {
            user_id: user_id.into(),
            context_type: ContextType::Global,
            patient_id: None,
            language: Language::default(),
        }
    }

    pub fn for_patient(user_id: impl Into<String>, patient_id: impl Into<String>) -> Self {
        Self {
            user_id: user_id.into(),
            context_type: ContextType::Patient,
            patient_id: Some(patient_id.into()),
            language: Language::default(),
        }
    }

    pub fn with_language(mut self, language: Language) -> Self {
        self.language = language;
        self
    }

    /// Validate into an immutable request; nothing is created on failure
    pub fn validate(&self) -> StreamResult<SessionRequest> {
        let user_id = self.user_id.trim();
        if user_id.is_empty() {
            return Err(StreamError::InvalidConfig("user_id is required".to_string()));
        }

        Ok(SessionRequest {
            user_id: user_id.to_string(),
            context: SessionContext::new(self.context_type, self.patient_id.clone())?,
            language: self.language,
        })
    }
}

/// A validated session request, ready for admission
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionRequest {
    pub user_id: String,
    pub context: SessionContext,
    pub language: Language,
}
