//! Analysis service boundary: chart-zone and reinforcement analyzers.
//!
//! Both services are slow (seconds) and opaque; they take a JSON request
//! and answer a JSON payload the analysis cache interprets. Calls run on
//! the generous timeout.

use async_trait::async_trait;
use reqwest::Client;
use serde_json::{json, Value};
use tokio::time::Duration;

use crate::cards::Card;
use crate::error::{CoreError, CoreResult};

#[async_trait]
pub trait Analyzer: Send + Sync {
    async fn analyze_zone(&self, series: &[f64], card: Option<&Card>) -> CoreResult<Value>;
    async fn analyze_reinforcement(&self, card_id: &str, recent_scores: &[f64])
        -> CoreResult<Value>;
}

pub struct HttpAnalyzer {
    client: Client,
    base: String,
    timeout: Duration,
}

impl HttpAnalyzer {
    pub fn new(base: String, timeout_secs: u64) -> Self {
        Self {
            client: Client::builder().build().unwrap_or_else(|_| Client::new()),
            base: base.trim_end_matches('/').to_string(),
            timeout: Duration::from_secs(timeout_secs),
        }
    }

    async fn post(&self, operation: &str, path: &str, body: Value) -> CoreResult<Value> {
        let resp = self
            .client
            .post(format!("{}{path}", self.base))
            .timeout(self.timeout)
            .json(&body)
            .send()
            .await
            .map_err(|err| {
                if err.is_timeout() {
                    CoreError::RemoteTimeout {
                        operation: operation.to_string(),
                        timeout_secs: self.timeout.as_secs(),
                    }
                } else {
                    CoreError::RemoteUnavailable {
                        operation: operation.to_string(),
                        message: err.to_string(),
                    }
                }
            })?;
        if !resp.status().is_success() {
            return Err(CoreError::RemoteUnavailable {
                operation: operation.to_string(),
                message: format!("http status {}", resp.status()),
            });
        }
        resp.json().await.map_err(|err| CoreError::RemoteUnavailable {
            operation: operation.to_string(),
            message: format!("undecodable analysis response: {err}"),
        })
    }
}

#[async_trait]
impl Analyzer for HttpAnalyzer {
    async fn analyze_zone(&self, series: &[f64], card: Option<&Card>) -> CoreResult<Value> {
        self.post(
            "analysis.zone",
            "/analysis/zone",
            json!({ "series": series, "card": card }),
        )
        .await
    }

    async fn analyze_reinforcement(
        &self,
        card_id: &str,
        recent_scores: &[f64],
    ) -> CoreResult<Value> {
        self.post(
            "analysis.reinforcement",
            "/analysis/reinforcement",
            json!({ "cardId": card_id, "recentScores": recent_scores }),
        )
        .await
    }
}

/// Stub analyzer for offline runs: no zone opinion, always-HOLD decisions.
pub struct NullAnalyzer;

#[async_trait]
impl Analyzer for NullAnalyzer {
    async fn analyze_zone(&self, _series: &[f64], _card: Option<&Card>) -> CoreResult<Value> {
        Ok(json!({}))
    }

    async fn analyze_reinforcement(
        &self,
        _card_id: &str,
        _recent_scores: &[f64],
    ) -> CoreResult<Value> {
        Ok(json!({ "action": "HOLD", "score": 0.0 }))
    }
}
