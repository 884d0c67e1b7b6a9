use std::time::Duration;

use anyhow::{Context, Result, bail};
use async_trait::async_trait;
use serde::Deserialize;
use serde_json::Value;
use tracing::{debug, trace, warn};

use crate::backends::DocumentStore;
use crate::common::RowRecord;

// 📡 ElasticsearchDocumentStoreConfig: "It's just Elasticsearch", she said, before the cluster went red.
//
// 🔧 auth is tri-modal: api_key, username+password, or "I hope anonymous works".
#[derive(Debug, Deserialize, Clone)]
pub struct ElasticsearchDocumentStoreConfig {
    /// 📡 Cluster URL, scheme and port included.
    pub url: String,
    /// 📦 Every row lands in this index.
    #[serde(default = "default_index")]
    pub index: String,
    /// 🔒 Basic auth username.
    #[serde(default)]
    pub username: Option<String>,
    /// 🔒 Basic auth password. "password123" is not a password. It is a confession.
    #[serde(default)]
    pub password: Option<String>,
    /// 🔒 API key. Wins over basic auth when both are set.
    #[serde(default)]
    pub api_key: Option<String>,
    /// ⏱️ Whole-request timeout for `_bulk`, in seconds.
    #[serde(default = "default_request_timeout_secs")]
    pub request_timeout_secs: u64,
}

fn default_index() -> String {
    "documents".to_string()
}

fn default_request_timeout_secs() -> u64 {
    30
}

/// 🗄️ A document store backed by an Elasticsearch index.
///
/// One `batch_create` is one `_bulk` POST. Every row becomes a `create` action, so
/// Elasticsearch assigns the ids. A non-2xx status fails the batch, and so does a 2xx
/// whose body says `"errors": true`.
///
/// ⚠️ `_bulk` is not transactional. When some items fail, the ones that succeeded stay
/// indexed, and the redelivered job will create them again. At-least-once, with feeling.
#[derive(Debug)]
pub struct ElasticsearchDocumentStore {
    client: reqwest::Client,
    config: ElasticsearchDocumentStoreConfig,
}

impl ElasticsearchDocumentStore {
    /// 🚀 Build the client and ping the cluster root, so a bad URL fails at startup and
    /// not one job deep.
    pub async fn new(config: ElasticsearchDocumentStoreConfig) -> Result<Self> {
        let client = reqwest::Client::builder()
            .connect_timeout(Duration::from_secs(10))
            .timeout(Duration::from_secs(config.request_timeout_secs.max(1)))
            .build()
            .context("💀 The HTTP client refused to be born. Probably a TLS problem. Either way: tragic.")?;

        let store = Self { client, config };
        let response = store
            .authorize(store.client.get(&store.config.url))
            .send()
            .await
            .with_context(|| {
                format!(
                    "💀 Knocked on '{}' to say hello. Nobody answered. Check the URL, the network, and your horoscope.",
                    store.config.url
                )
            })?;
        if !response.status().is_success() {
            bail!(
                "💀 Elasticsearch at '{}' answered the hello with {}. That's not a hello back.",
                store.config.url,
                response.status()
            );
        }
        debug!(url = %store.config.url, index = %store.config.index, "✅ Elasticsearch is home");
        Ok(store)
    }

    // -- 🔒 api key beats basic auth in this club
    fn authorize(&self, request: reqwest::RequestBuilder) -> reqwest::RequestBuilder {
        if let Some(ref api_key) = self.config.api_key {
            request.header("Authorization", format!("ApiKey {api_key}"))
        } else if let Some(ref username) = self.config.username {
            request.basic_auth(username, self.config.password.as_ref())
        } else {
            request
        }
    }

    fn render_bulk(&self, records: &[RowRecord]) -> Result<String> {
        let action = serde_json::to_string(&serde_json::json!({
            "create": { "_index": self.config.index }
        }))?;
        let mut body = String::with_capacity(records.len() * (action.len() + 64));
        for record in records {
            body.push_str(&action);
            body.push('\n');
            body.push_str(&serde_json::to_string(record)?);
            body.push('\n');
        }
        Ok(body)
    }
}

#[async_trait]
impl DocumentStore for ElasticsearchDocumentStore {
    async fn batch_create(&self, records: &[RowRecord]) -> Result<()> {
        if records.is_empty() {
            return Ok(());
        }
        let body = self.render_bulk(records)?;
        let bulk_url = format!("{}/_bulk", self.config.url.trim_end_matches('/'));
        trace!(records = records.len(), bytes = body.len(), "📡 sending batch to /_bulk");

        let response = self
            .authorize(self.client.post(&bulk_url))
            .header("Content-Type", "application/x-ndjson")
            .body(body)
            .send()
            .await
            .context("💀 The bulk request never made it to Elasticsearch. The network was not vibing with it.")?;

        let status = response.status();
        let text = response.text().await.unwrap_or_default();
        if !status.is_success() {
            bail!("💀 Elasticsearch looked at our batch and said '{status}'. The response read: '{text}'");
        }

        // -- 🕵️ a 200 can still be carrying bad news, one item at a time
        let parsed: Value = serde_json::from_str(&text)
            .context("💀 Elasticsearch answered /_bulk with something that is not JSON")?;
        if parsed.get("errors").and_then(Value::as_bool).unwrap_or(false) {
            let first_error = parsed
                .get("items")
                .and_then(Value::as_array)
                .and_then(|items| {
                    items
                        .iter()
                        .filter_map(|item| item.get("create"))
                        .find_map(|create| create.get("error"))
                })
                .map(Value::to_string)
                .unwrap_or_else(|| "no details".to_string());
            warn!(index = %self.config.index, error = %first_error, "💀 bulk request had item failures");
            bail!("💀 Elasticsearch rejected part of the batch. First complaint: {first_error}");
        }
        trace!(records = records.len(), "🚀 batch landed");
        Ok(())
    }
}
