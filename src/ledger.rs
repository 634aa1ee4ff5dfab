//! N/B record ledger: computes, deduplicates, and caches scalar-pair
//! records, writing through to the Backend Store.

use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::backend::BackendStore;
use crate::error::CoreResult;
use crate::logging::{json_log, obj, v_num, v_str, Domain};
use crate::series;
use crate::transform::{compute_lower_extreme, compute_upper_extreme, FallbackCell};

/// Fixed decimal precision applied to every persisted value and bound.
const DECIMAL_PLACES: f64 = 1e10;

/// True iff `value` is a finite number in [0, 1] inclusive.
pub fn is_valid(value: f64) -> bool {
    value.is_finite() && (0.0..=1.0).contains(&value)
}

pub fn round_dp(value: f64) -> f64 {
    (value * DECIMAL_PLACES).round() / DECIMAL_PLACES
}

/// Normalized position of the extreme pair. A crossed pair (lower above
/// upper, the inactive/low-weight regime) lands below 0.5.
fn normalize(upper: f64, lower: f64) -> f64 {
    (0.5 + (upper - lower) / 200.0).clamp(0.0, 1.0)
}

/// Immutable computed record. A recomputation produces a new record, never
/// mutates one in place. `upper_bound`/`lower_bound` are not confined to
/// [0, 1] and may cross.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NbRecord {
    pub value: f64,
    pub upper_bound: f64,
    pub lower_bound: f64,
    pub created_at: i64,
    #[serde(rename = "sourceSeriesDigest", default)]
    pub source_digest: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl NbRecord {
    /// Defined degenerate record for a series too short to transform.
    pub fn degenerate(baseline: f64) -> Self {
        Self {
            value: 0.5,
            upper_bound: baseline,
            lower_bound: baseline,
            created_at: crate::logging::ts_epoch_ms(),
            source_digest: String::new(),
            error: Some("insufficient data".to_string()),
        }
    }

    /// Fixed defaults substituted for cards that arrive without NB fields.
    pub fn placeholder(baseline: f64) -> Self {
        Self {
            value: 0.5,
            upper_bound: baseline,
            lower_bound: baseline,
            created_at: crate::logging::ts_epoch_ms(),
            source_digest: String::new(),
            error: None,
        }
    }
}

pub struct NbLedger {
    backend: Arc<dyn BackendStore>,
    fallback: FallbackCell,
    baseline: f64,
    tolerance: f64,
    records: Vec<NbRecord>,
}

impl NbLedger {
    pub fn new(backend: Arc<dyn BackendStore>, baseline: f64, tolerance: f64) -> Self {
        Self::with_fallback(backend, baseline, tolerance, FallbackCell::new())
    }

    pub fn with_fallback(
        backend: Arc<dyn BackendStore>,
        baseline: f64,
        tolerance: f64,
        fallback: FallbackCell,
    ) -> Self {
        Self {
            backend,
            fallback,
            baseline,
            tolerance,
            records: Vec::new(),
        }
    }

    pub fn baseline(&self) -> f64 {
        self.baseline
    }

    pub fn fallback(&self) -> &FallbackCell {
        &self.fallback
    }

    /// Compute a record for `series` and persist it. A series shorter than
    /// two points yields the degenerate record instead of an error; the
    /// degenerate record is returned as-is, not persisted.
    pub async fn calculate(&mut self, series: &[f64], context: &str) -> CoreResult<NbRecord> {
        if series.len() < 2 {
            json_log(
                Domain::Ledger,
                "degenerate_series",
                obj(&[
                    ("context", v_str(context)),
                    ("len", v_num(series.len() as f64)),
                ]),
            );
            return Ok(NbRecord::degenerate(self.baseline));
        }

        let upper = compute_upper_extreme(series, self.baseline, &self.fallback);
        let lower = compute_lower_extreme(series, self.baseline, &self.fallback);
        let record = NbRecord {
            value: round_dp(normalize(upper, lower)),
            upper_bound: round_dp(upper),
            lower_bound: round_dp(lower),
            created_at: crate::logging::ts_epoch_ms(),
            source_digest: series::digest(series),
            error: None,
        };

        // Advisory only: duplicates are logged, never rejected.
        if self.is_duplicate(record.value) {
            json_log(
                Domain::Ledger,
                "duplicate_value",
                obj(&[
                    ("context", v_str(context)),
                    ("value", v_num(record.value)),
                    ("tolerance", v_num(self.tolerance)),
                ]),
            );
        }

        self.backend.save_record(&record).await?;
        self.records.push(record.clone());
        Ok(record)
    }

    /// First in-memory record whose value is within the default tolerance;
    /// a cache miss falls through to the Backend Store.
    pub async fn lookup(&self, value: f64) -> CoreResult<Option<NbRecord>> {
        self.lookup_with_tolerance(value, self.tolerance).await
    }

    pub async fn lookup_with_tolerance(
        &self,
        value: f64,
        tolerance: f64,
    ) -> CoreResult<Option<NbRecord>> {
        if let Some(record) = self
            .records
            .iter()
            .find(|r| (r.value - value).abs() <= tolerance)
        {
            return Ok(Some(record.clone()));
        }
        self.backend.find_record(value, tolerance).await
    }

    pub fn is_duplicate(&self, value: f64) -> bool {
        self.records
            .iter()
            .any(|r| (r.value - value).abs() <= self.tolerance)
    }

    /// Empties the in-memory ledger; the Backend Store is untouched.
    pub fn clear(&mut self) {
        self.records.clear();
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cards::{Card, CardPatch, CardQuery};
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Mutex;

    #[derive(Default)]
    struct MockBackend {
        saved: Mutex<Vec<NbRecord>>,
        find_calls: AtomicUsize,
    }

    #[async_trait]
    impl BackendStore for MockBackend {
        async fn save_record(&self, record: &NbRecord) -> CoreResult<()> {
            self.saved.lock().unwrap().push(record.clone());
            Ok(())
        }

        async fn find_record(&self, value: f64, tolerance: f64) -> CoreResult<Option<NbRecord>> {
            self.find_calls.fetch_add(1, Ordering::SeqCst);
            Ok(self
                .saved
                .lock()
                .unwrap()
                .iter()
                .find(|r| (r.value - value).abs() <= tolerance)
                .cloned())
        }

        async fn create_card(&self, _card: &Card) -> CoreResult<()> {
            Ok(())
        }

        async fn list_cards(&self, _query: CardQuery) -> CoreResult<Vec<Card>> {
            Ok(Vec::new())
        }

        async fn fetch_card(&self, _id: &str) -> CoreResult<Option<Card>> {
            Ok(None)
        }

        async fn update_card(&self, _id: &str, _patch: &CardPatch) -> CoreResult<()> {
            Ok(())
        }

        async fn delete_card(&self, _id: &str) -> CoreResult<()> {
            Ok(())
        }
    }

    fn ledger() -> (Arc<MockBackend>, NbLedger) {
        let backend = Arc::new(MockBackend::default());
        let ledger = NbLedger::new(backend.clone(), 5.5, 1e-4);
        (backend, ledger)
    }

    #[test]
    fn is_valid_boundary_values() {
        assert!(!is_valid(-0.0001));
        assert!(is_valid(0.0));
        assert!(is_valid(0.5));
        assert!(is_valid(1.0));
        assert!(!is_valid(1.0001));
        assert!(!is_valid(f64::NAN));
        assert!(!is_valid(f64::INFINITY));
    }

    #[tokio::test]
    async fn short_series_yields_degenerate_record() {
        let (backend, mut ledger) = ledger();
        let record = ledger.calculate(&[100.0], "test").await.unwrap();
        assert_eq!(record.value, 0.5);
        assert_eq!(record.upper_bound, 5.5);
        assert_eq!(record.lower_bound, 5.5);
        assert_eq!(record.error.as_deref(), Some("insufficient data"));
        // degenerate records are not persisted
        assert!(backend.saved.lock().unwrap().is_empty());
        assert!(ledger.is_empty());
    }

    #[tokio::test]
    async fn calculate_produces_bounded_value_and_persists() {
        let (backend, mut ledger) = ledger();
        let record = ledger
            .calculate(&[100.0, 101.0, 99.0, 102.0], "test")
            .await
            .unwrap();
        assert!(is_valid(record.value));
        assert!(record.upper_bound.is_finite());
        assert!(record.lower_bound.is_finite());
        assert!(!record.source_digest.is_empty());
        assert!(record.error.is_none());
        assert_eq!(backend.saved.lock().unwrap().len(), 1);
        assert_eq!(ledger.len(), 1);
        // 10-dp precision is exact under re-rounding
        assert_eq!(record.value, round_dp(record.value));
        assert_eq!(record.upper_bound, round_dp(record.upper_bound));
    }

    #[tokio::test]
    async fn second_calculate_is_flagged_duplicate() {
        let (_backend, mut ledger) = ledger();
        let series = [100.0, 101.0, 99.0, 102.0];
        let first = ledger.calculate(&series, "test").await.unwrap();
        assert!(ledger.is_duplicate(first.value));
        // duplicates are advisory: the second call still succeeds
        let second = ledger.calculate(&series, "test").await.unwrap();
        assert_eq!(second.value, first.value);
        assert_eq!(ledger.len(), 2);
    }

    #[tokio::test]
    async fn lookup_prefers_memory_then_falls_through() {
        let (backend, mut ledger) = ledger();
        let record = ledger
            .calculate(&[100.0, 101.0, 99.0, 102.0], "test")
            .await
            .unwrap();

        let hit = ledger.lookup(record.value).await.unwrap();
        assert!(hit.is_some());
        assert_eq!(backend.find_calls.load(Ordering::SeqCst), 0);

        ledger.clear();
        assert!(ledger.is_empty());
        let through = ledger.lookup(record.value).await.unwrap();
        assert!(through.is_some());
        assert_eq!(backend.find_calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn lookup_miss_returns_none() {
        let (_backend, ledger) = ledger();
        assert!(ledger.lookup(0.9999).await.unwrap().is_none());
    }
}
