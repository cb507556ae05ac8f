use std::time::Duration;

use anyhow::{Context, Result, bail};
use async_trait::async_trait;
use uuid::Uuid;

use agora_types::api::MessagePage;

/// Where the window actor gets messages from. `offset`/`limit` address the
/// caller's visible, oldest-first message list.
#[async_trait]
pub trait MessageSource: Send + Sync {
    async fn fetch(&self, room_id: Uuid, offset: usize, limit: usize) -> Result<MessagePage>;
}

/// Fetches pages from `GET /rooms/{room_id}/messages`.
pub struct HttpMessageSource {
    base_url: String,
    token: String,
    http: reqwest::Client,
}

impl HttpMessageSource {
    pub fn new(base_url: &str, token: impl Into<String>) -> Result<Self> {
        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(10))
            .build()
            .context("failed to build HTTP client")?;
        Ok(Self {
            base_url: base_url.trim_end_matches('/').to_string(),
            token: token.into(),
            http,
        })
    }
}

#[async_trait]
impl MessageSource for HttpMessageSource {
    async fn fetch(&self, room_id: Uuid, offset: usize, limit: usize) -> Result<MessagePage> {
        let resp = self
            .http
            .get(format!("{}/rooms/{}/messages", self.base_url, room_id))
            .query(&[("offset", offset), ("limit", limit)])
            .bearer_auth(&self.token)
            .send()
            .await
            .context("message fetch request failed")?;

        if !resp.status().is_success() {
            let status = resp.status();
            let body = resp.text().await.unwrap_or_default();
            bail!("message fetch failed ({}): {}", status, body);
        }

        resp.json::<MessagePage>()
            .await
            .context("invalid message page")
    }
}
