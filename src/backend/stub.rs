//! In-process Backend Store stub for offline runs and drills.

use std::collections::HashMap;
use std::sync::Mutex;

use async_trait::async_trait;

use super::BackendStore;
use crate::cards::{Card, CardPatch, CardQuery, CardState};
use crate::error::{CoreError, CoreResult};
use crate::ledger::NbRecord;

#[derive(Default)]
struct StubState {
    records: Vec<NbRecord>,
    cards: HashMap<String, Card>,
}

#[derive(Default)]
pub struct StubBackend {
    inner: Mutex<StubState>,
}

impl StubBackend {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self, operation: &str) -> CoreResult<std::sync::MutexGuard<'_, StubState>> {
        self.inner.lock().map_err(|_| CoreError::RemoteUnavailable {
            operation: operation.to_string(),
            message: "stub state poisoned".to_string(),
        })
    }

    pub fn record_count(&self) -> usize {
        self.inner.lock().map(|s| s.records.len()).unwrap_or(0)
    }

    pub fn card_count(&self) -> usize {
        self.inner.lock().map(|s| s.cards.len()).unwrap_or(0)
    }
}

#[async_trait]
impl BackendStore for StubBackend {
    async fn save_record(&self, record: &NbRecord) -> CoreResult<()> {
        self.lock("stub.save_record")?.records.push(record.clone());
        Ok(())
    }

    async fn find_record(&self, value: f64, tolerance: f64) -> CoreResult<Option<NbRecord>> {
        Ok(self
            .lock("stub.find_record")?
            .records
            .iter()
            .find(|r| (r.value - value).abs() <= tolerance)
            .cloned())
    }

    async fn create_card(&self, card: &Card) -> CoreResult<()> {
        self.lock("stub.create_card")?
            .cards
            .insert(card.id.clone(), card.clone());
        Ok(())
    }

    async fn list_cards(&self, query: CardQuery) -> CoreResult<Vec<Card>> {
        let state = self.lock("stub.list_cards")?;
        let mut cards: Vec<Card> = state
            .cards
            .values()
            .filter(|card| match query {
                CardQuery::Production => true,
                CardQuery::Active => card.state == CardState::Active,
                CardQuery::Verification => card.state == CardState::Verification,
                CardQuery::Discarded => card.state == CardState::Discarded,
            })
            .cloned()
            .collect();
        cards.sort_by_key(|c| c.produced_at);
        Ok(cards)
    }

    async fn fetch_card(&self, id: &str) -> CoreResult<Option<Card>> {
        Ok(self.lock("stub.fetch_card")?.cards.get(id).cloned())
    }

    async fn update_card(&self, id: &str, patch: &CardPatch) -> CoreResult<()> {
        let mut state = self.lock("stub.update_card")?;
        let card = state
            .cards
            .get_mut(id)
            .ok_or_else(|| CoreError::NotFound { id: id.to_string() })?;
        card.apply_patch(patch);
        Ok(())
    }

    async fn delete_card(&self, id: &str) -> CoreResult<()> {
        self.lock("stub.delete_card")?.cards.remove(id);
        Ok(())
    }
}
