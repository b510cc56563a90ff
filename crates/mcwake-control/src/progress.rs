use std::{sync::Arc, time::Duration};

use async_trait::async_trait;
use mcwake_lifecycle::{ProgressPhase, ProgressUpdate};
use serde::Serialize;

/// Receives incremental lifecycle updates. Delivery failures stay inside the sink.
#[async_trait]
pub trait ProgressSink: Send + Sync {
    async fn emit(&self, update: ProgressUpdate);
}

#[derive(Debug, Default, Clone, Copy)]
pub struct TracingSink;

#[async_trait]
impl ProgressSink for TracingSink {
    async fn emit(&self, update: ProgressUpdate) {
        match update.phase {
            ProgressPhase::Failed => {
                tracing::warn!(op_id = %update.operation, phase = "failed", text = %update.text, "progress")
            }
            phase => {
                tracing::info!(op_id = %update.operation, ?phase, text = %update.text, "progress")
            }
        }
    }
}

#[derive(Debug, Serialize)]
struct WebhookMessage<'a> {
    content: &'a str,
}

/// Posts each update as a chat webhook message (`{"content": ...}`).
#[derive(Debug, Clone)]
pub struct WebhookSink {
    http: reqwest::Client,
    url: String,
}

impl WebhookSink {
    pub fn new(url: impl Into<String>) -> anyhow::Result<Self> {
        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(10))
            .build()?;
        Ok(Self {
            http,
            url: url.into(),
        })
    }
}

#[async_trait]
impl ProgressSink for WebhookSink {
    async fn emit(&self, update: ProgressUpdate) {
        let res = self
            .http
            .post(&self.url)
            .json(&WebhookMessage {
                content: &update.text,
            })
            .send()
            .await
            .and_then(|r| r.error_for_status());
        if let Err(e) = res {
            tracing::warn!(op_id = %update.operation, error = %e, "webhook delivery failed");
        }
    }
}

#[derive(Clone, Default)]
pub struct FanoutSink {
    sinks: Vec<Arc<dyn ProgressSink>>,
}

impl FanoutSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, sink: Arc<dyn ProgressSink>) -> Self {
        self.sinks.push(sink);
        self
    }
}

#[async_trait]
impl ProgressSink for FanoutSink {
    async fn emit(&self, update: ProgressUpdate) {
        for sink in &self.sinks {
            sink.emit(update.clone()).await;
        }
    }
}
