use anyhow::{bail, Context, Result};
use serde::Serialize;
use std::time::Duration;
use tracing::debug;

use crate::config::CategorizationConfig;
use crate::pipeline::{Categorization, Categorizer};
use crate::session::Language;

/// Client for the categorization endpoint of the backend API
pub struct HttpCategorizer {
    client: reqwest::Client,
    base_url: String,
}

#[derive(Serialize)]
struct CategorizeRequest<'a> {
    text: &'a str,
    language: &'a str,
}

impl HttpCategorizer {
    pub fn new(config: &CategorizationConfig) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_millis(config.timeout_ms))
            .build()
            .context("Failed to build categorizer HTTP client")?;

        Ok(Self {
            client,
            base_url: config.base_url.trim_end_matches('/').to_string(),
        })
    }
}

#[async_trait::async_trait]
impl Categorizer for HttpCategorizer {
    async fn categorize(&self, text: &str, language: Language) -> Result<Categorization> {
        debug!("Categorizing {} bytes of transcript", text.len());

        let response = self
            .client
            .post(format!("{}/categorize", self.base_url))
            .json(&CategorizeRequest {
                text,
                language: language.code(),
            })
            .send()
            .await
            .context("Failed to reach categorization service")?;

        if !response.status().is_success() {
            bail!("Categorization service returned status {}", response.status());
        }

        response
            .json::<Categorization>()
            .await
            .context("Failed to parse categorization response")
    }
}
