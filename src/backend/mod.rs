//! Backend Store boundary: CRUD for N/B records and cards over a black-box
//! HTTP API, with an in-process stub for offline runs.

use async_trait::async_trait;

use crate::cards::{Card, CardPatch, CardQuery};
use crate::error::CoreResult;
use crate::ledger::NbRecord;

pub mod decode;
mod http;
mod stub;

pub use http::HttpBackend;
pub use stub::StubBackend;

/// The persistence boundary. A not-found condition is reported as
/// `Ok(None)` (or `CoreError::NotFound` where no value slot exists), never
/// as a generic failure.
#[async_trait]
pub trait BackendStore: Send + Sync {
    async fn save_record(&self, record: &NbRecord) -> CoreResult<()>;
    async fn find_record(&self, value: f64, tolerance: f64) -> CoreResult<Option<NbRecord>>;
    async fn create_card(&self, card: &Card) -> CoreResult<()>;
    async fn list_cards(&self, query: CardQuery) -> CoreResult<Vec<Card>>;
    async fn fetch_card(&self, id: &str) -> CoreResult<Option<Card>>;
    async fn update_card(&self, id: &str, patch: &CardPatch) -> CoreResult<()>;
    async fn delete_card(&self, id: &str) -> CoreResult<()>;
}
