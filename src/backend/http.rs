//! HTTP implementation of the Backend Store.
//!
//! Light reads run on a short timeout; card production runs on the heavy
//! one. Timeouts surface as `RemoteTimeout`, connection-level failures as
//! `RemoteUnavailable`, and HTTP 404 as the distinct not-found signal.

use async_trait::async_trait;
use reqwest::{Client, StatusCode};
use serde_json::Value;
use tokio::time::Duration;

use super::decode::{decode_list, unwrap_data};
use super::BackendStore;
use crate::cards::{Card, CardPatch, CardQuery};
use crate::error::{CoreError, CoreResult};
use crate::ledger::NbRecord;

pub struct HttpBackend {
    client: Client,
    base: String,
    light_timeout: Duration,
    heavy_timeout: Duration,
}

impl HttpBackend {
    pub fn new(base: String, light_timeout_secs: u64, heavy_timeout_secs: u64) -> Self {
        Self {
            client: Client::builder()
                .build()
                .unwrap_or_else(|_| Client::new()),
            base: base.trim_end_matches('/').to_string(),
            light_timeout: Duration::from_secs(light_timeout_secs),
            heavy_timeout: Duration::from_secs(heavy_timeout_secs),
        }
    }

    fn map_err(&self, operation: &str, timeout: Duration, err: reqwest::Error) -> CoreError {
        if err.is_timeout() {
            CoreError::RemoteTimeout {
                operation: operation.to_string(),
                timeout_secs: timeout.as_secs(),
            }
        } else {
            CoreError::RemoteUnavailable {
                operation: operation.to_string(),
                message: err.to_string(),
            }
        }
    }

    fn check_status(operation: &str, status: StatusCode) -> CoreResult<()> {
        if status.is_success() {
            Ok(())
        } else {
            Err(CoreError::RemoteUnavailable {
                operation: operation.to_string(),
                message: format!("http status {status}"),
            })
        }
    }

    fn decode_object<T: serde::de::DeserializeOwned>(operation: &str, raw: Value) -> CoreResult<T> {
        serde_json::from_value(unwrap_data(raw)).map_err(|err| CoreError::RemoteUnavailable {
            operation: operation.to_string(),
            message: format!("undecodable response: {err}"),
        })
    }
}

#[async_trait]
impl BackendStore for HttpBackend {
    async fn save_record(&self, record: &NbRecord) -> CoreResult<()> {
        let op = "backend.save_record";
        let resp = self
            .client
            .post(format!("{}/records", self.base))
            .timeout(self.light_timeout)
            .json(record)
            .send()
            .await
            .map_err(|e| self.map_err(op, self.light_timeout, e))?;
        Self::check_status(op, resp.status())
    }

    async fn find_record(&self, value: f64, tolerance: f64) -> CoreResult<Option<NbRecord>> {
        let op = "backend.find_record";
        let resp = self
            .client
            .get(format!(
                "{}/records/search?value={value}&tolerance={tolerance}",
                self.base
            ))
            .timeout(self.light_timeout)
            .send()
            .await
            .map_err(|e| self.map_err(op, self.light_timeout, e))?;
        if resp.status() == StatusCode::NOT_FOUND {
            return Ok(None);
        }
        Self::check_status(op, resp.status())?;
        let raw: Value = resp
            .json()
            .await
            .map_err(|e| self.map_err(op, self.light_timeout, e))?;
        if raw.is_null() {
            return Ok(None);
        }
        Ok(Some(Self::decode_object(op, raw)?))
    }

    async fn create_card(&self, card: &Card) -> CoreResult<()> {
        let op = "backend.create_card";
        let resp = self
            .client
            .post(format!("{}/cards", self.base))
            .timeout(self.heavy_timeout)
            .json(card)
            .send()
            .await
            .map_err(|e| self.map_err(op, self.heavy_timeout, e))?;
        Self::check_status(op, resp.status())
    }

    async fn list_cards(&self, query: CardQuery) -> CoreResult<Vec<Card>> {
        let op = "backend.list_cards";
        let resp = self
            .client
            .get(format!("{}/cards?state={}", self.base, query.as_str()))
            .timeout(self.light_timeout)
            .send()
            .await
            .map_err(|e| self.map_err(op, self.light_timeout, e))?;
        Self::check_status(op, resp.status())?;
        let raw: Value = resp
            .json()
            .await
            .map_err(|e| self.map_err(op, self.light_timeout, e))?;
        decode_list(op, raw)
    }

    async fn fetch_card(&self, id: &str) -> CoreResult<Option<Card>> {
        let op = "backend.fetch_card";
        let resp = self
            .client
            .get(format!("{}/cards/{id}", self.base))
            .timeout(self.light_timeout)
            .send()
            .await
            .map_err(|e| self.map_err(op, self.light_timeout, e))?;
        if resp.status() == StatusCode::NOT_FOUND {
            return Ok(None);
        }
        Self::check_status(op, resp.status())?;
        let raw: Value = resp
            .json()
            .await
            .map_err(|e| self.map_err(op, self.light_timeout, e))?;
        Ok(Some(Self::decode_object(op, raw)?))
    }

    async fn update_card(&self, id: &str, patch: &CardPatch) -> CoreResult<()> {
        let op = "backend.update_card";
        let resp = self
            .client
            .patch(format!("{}/cards/{id}", self.base))
            .timeout(self.light_timeout)
            .json(patch)
            .send()
            .await
            .map_err(|e| self.map_err(op, self.light_timeout, e))?;
        if resp.status() == StatusCode::NOT_FOUND {
            return Err(CoreError::NotFound { id: id.to_string() });
        }
        Self::check_status(op, resp.status())
    }

    async fn delete_card(&self, id: &str) -> CoreResult<()> {
        let op = "backend.delete_card";
        let resp = self
            .client
            .delete(format!("{}/cards/{id}", self.base))
            .timeout(self.light_timeout)
            .send()
            .await
            .map_err(|e| self.map_err(op, self.light_timeout, e))?;
        if resp.status() == StatusCode::NOT_FOUND {
            return Err(CoreError::NotFound { id: id.to_string() });
        }
        Self::check_status(op, resp.status())
    }
}
