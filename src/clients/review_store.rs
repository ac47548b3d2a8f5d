use anyhow::{bail, Context, Result};
use serde::Deserialize;
use std::collections::HashMap;
use tokio::sync::RwLock;
use tracing::info;

use crate::pipeline::{ReviewItem, ReviewStore};

/// Review queue backed by the backend API
pub struct HttpReviewStore {
    client: reqwest::Client,
    base_url: String,
}

#[derive(Deserialize)]
struct CreatedReviewItem {
    id: String,
}

impl HttpReviewStore {
    pub fn new(base_url: &str) -> Self {
        Self {
            client: reqwest::Client::new(),
            base_url: base_url.trim_end_matches('/').to_string(),
        }
    }
}

#[async_trait::async_trait]
impl ReviewStore for HttpReviewStore {
    async fn create_review_item(&self, item: &ReviewItem) -> Result<String> {
        let response = self
            .client
            .post(format!("{}/review-items", self.base_url))
            .json(item)
            .send()
            .await
            .context("Failed to reach review queue")?;

        if !response.status().is_success() {
            bail!("Review queue returned status {}", response.status());
        }

        let created: CreatedReviewItem = response
            .json()
            .await
            .context("Failed to parse review queue response")?;
        Ok(created.id)
    }
}

/// In-process review queue, used when no backend is configured
#[derive(Default)]
pub struct MemoryReviewStore {
    items: RwLock<HashMap<String, ReviewItem>>,
}

impl MemoryReviewStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn get(&self, review_id: &str) -> Option<ReviewItem> {
        self.items.read().await.get(review_id).cloned()
    }

    pub async fn len(&self) -> usize {
        self.items.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.items.read().await.is_empty()
    }
}

#[async_trait::async_trait]
impl ReviewStore for MemoryReviewStore {
    async fn create_review_item(&self, item: &ReviewItem) -> Result<String> {
        let review_id = format!("review-{}", uuid::Uuid::new_v4());
        self.items
            .write()
            .await
            .insert(review_id.clone(), item.clone());
        info!(session_id = %item.session_id, "Review item {} queued in memory", review_id);
        Ok(review_id)
    }
}
