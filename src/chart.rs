//! Chart Source boundary: supplies price/volume series to the pipeline.

use async_trait::async_trait;
use rand::Rng;
use reqwest::Client;
use serde::Deserialize;
use tokio::time::Duration;

use crate::error::{CoreError, CoreResult};

/// The only shape the Chart Source guarantees.
#[derive(Debug, Clone)]
pub struct SeriesBundle {
    pub prices: Vec<f64>,
    pub volumes: Option<Vec<f64>>,
    pub trade_values: Option<Vec<f64>>,
    pub current_price: f64,
    pub timeframe: String,
}

#[async_trait]
pub trait ChartSource: Send + Sync {
    async fn get_series(&self, timeframe: &str, count: usize) -> CoreResult<SeriesBundle>;
}

#[derive(Debug, Deserialize)]
struct ChartResponse {
    prices: Vec<f64>,
    #[serde(default)]
    volumes: Option<Vec<f64>>,
    #[serde(default, alias = "tradeValues")]
    trade_values: Option<Vec<f64>>,
    #[serde(default, alias = "currentPrice")]
    current_price: Option<f64>,
    #[serde(default)]
    timeframe: Option<String>,
}

pub struct HttpChartSource {
    client: Client,
    base: String,
    timeout: Duration,
}

impl HttpChartSource {
    pub fn new(base: String, timeout_secs: u64) -> Self {
        Self {
            client: Client::builder().build().unwrap_or_else(|_| Client::new()),
            base: base.trim_end_matches('/').to_string(),
            timeout: Duration::from_secs(timeout_secs),
        }
    }
}

#[async_trait]
impl ChartSource for HttpChartSource {
    async fn get_series(&self, timeframe: &str, count: usize) -> CoreResult<SeriesBundle> {
        let op = "chart.get_series";
        let resp = self
            .client
            .get(format!(
                "{}/series?timeframe={timeframe}&count={count}",
                self.base
            ))
            .timeout(self.timeout)
            .send()
            .await
            .map_err(|err| {
                if err.is_timeout() {
                    CoreError::RemoteTimeout {
                        operation: op.to_string(),
                        timeout_secs: self.timeout.as_secs(),
                    }
                } else {
                    CoreError::RemoteUnavailable {
                        operation: op.to_string(),
                        message: err.to_string(),
                    }
                }
            })?;
        if !resp.status().is_success() {
            return Err(CoreError::RemoteUnavailable {
                operation: op.to_string(),
                message: format!("http status {}", resp.status()),
            });
        }
        let body: ChartResponse = resp.json().await.map_err(|err| CoreError::RemoteUnavailable {
            operation: op.to_string(),
            message: format!("undecodable series response: {err}"),
        })?;
        let current_price = body
            .current_price
            .or_else(|| body.prices.last().copied())
            .unwrap_or(0.0);
        Ok(SeriesBundle {
            prices: body.prices,
            volumes: body.volumes,
            trade_values: body.trade_values,
            current_price,
            timeframe: body.timeframe.unwrap_or_else(|| timeframe.to_string()),
        })
    }
}

/// Random-walk series for offline runs. Not meant to be realistic, just
/// well-formed.
pub struct SyntheticChartSource {
    start_price: f64,
}

impl SyntheticChartSource {
    pub fn new(start_price: f64) -> Self {
        Self { start_price }
    }
}

#[async_trait]
impl ChartSource for SyntheticChartSource {
    async fn get_series(&self, timeframe: &str, count: usize) -> CoreResult<SeriesBundle> {
        let mut rng = rand::thread_rng();
        let mut price = self.start_price;
        let mut prices = Vec::with_capacity(count);
        let mut volumes = Vec::with_capacity(count);
        for _ in 0..count {
            price *= 1.0 + rng.gen_range(-0.003..0.003);
            prices.push(price);
            volumes.push(rng.gen_range(10.0..1_000.0));
        }
        let current_price = prices.last().copied().unwrap_or(self.start_price);
        Ok(SeriesBundle {
            prices,
            volumes: Some(volumes),
            trade_values: None,
            current_price,
            timeframe: timeframe.to_string(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn synthetic_source_honors_count_and_timeframe() {
        let source = SyntheticChartSource::new(30_000.0);
        let bundle = source.get_series("1h", 200).await.unwrap();
        assert_eq!(bundle.prices.len(), 200);
        assert_eq!(bundle.timeframe, "1h");
        assert!(bundle.prices.iter().all(|p| p.is_finite() && *p > 0.0));
        assert_eq!(bundle.current_price, *bundle.prices.last().unwrap());
    }
}
