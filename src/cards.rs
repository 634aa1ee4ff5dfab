//! Card lifecycle: production, listing, cached reads, updates, removal.
//!
//! The manager exclusively owns the live working set. The set is bounded
//! (`max_live_cards`) with oldest-first eviction by production time; access
//! recency never protects a card. The Backend Store stays authoritative for
//! anything beyond process lifetime.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use uuid::Uuid;

use crate::backend::BackendStore;
use crate::chart::ChartSource;
use crate::config::Config;
use crate::error::{CoreError, CoreResult};
use crate::ledger::{is_valid, NbLedger, NbRecord};
use crate::logging::{json_log, log, obj, ts_epoch_ms, v_num, v_str, Domain, Level};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum CardState {
    #[default]
    Active,
    Verification,
    Discarded,
}

/// Listing filters understood by the Backend Store.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CardQuery {
    Active,
    Production,
    Verification,
    Discarded,
}

impl CardQuery {
    pub fn as_str(&self) -> &'static str {
        match self {
            CardQuery::Active => "ACTIVE",
            CardQuery::Production => "PRODUCTION",
            CardQuery::Verification => "VERIFICATION",
            CardQuery::Discarded => "DISCARDED",
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CardEvent {
    pub event: String,
    pub ts: i64,
}

/// Snapshot combining a series, its NB record, and lifecycle metadata.
/// Unknown backend fields land in `extra`; legacy zone markers in there are
/// consumed by the analysis cache.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Card {
    pub id: String,
    #[serde(default)]
    pub key: String,
    #[serde(default)]
    pub timeframe: String,
    #[serde(default)]
    pub nb_value: Option<f64>,
    #[serde(default)]
    pub nb_upper_bound: Option<f64>,
    #[serde(default)]
    pub nb_lower_bound: Option<f64>,
    #[serde(default)]
    pub series_snapshot: Vec<f64>,
    #[serde(default)]
    pub produced_at: i64,
    #[serde(default)]
    pub state: CardState,
    #[serde(default)]
    pub history: Vec<CardEvent>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl Card {
    /// A card must carry at least one of value/upper/lower; a present value
    /// must additionally be a valid n/b scalar.
    pub fn validate(&self) -> bool {
        let any = self.nb_value.is_some()
            || self.nb_upper_bound.is_some()
            || self.nb_lower_bound.is_some();
        match self.nb_value {
            Some(value) => any && is_valid(value),
            None => any,
        }
    }

    pub fn apply_patch(&mut self, patch: &CardPatch) {
        if let Some(state) = patch.state {
            self.state = state;
        }
        if let Some(value) = patch.nb_value {
            self.nb_value = Some(value);
        }
        if let Some(timeframe) = &patch.timeframe {
            self.timeframe = timeframe.clone();
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CardPatch {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub state: Option<CardState>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub nb_value: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timeframe: Option<String>,
}

struct CachedCard {
    card: Card,
    fetched_at: Instant,
    seq: u64,
}

impl CachedCard {
    fn is_fresh(&self, window: Duration) -> bool {
        self.fetched_at.elapsed() < window
    }
}

pub struct CardManager {
    backend: Arc<dyn BackendStore>,
    chart: Arc<dyn ChartSource>,
    ledger: NbLedger,
    timeframe: String,
    series_points: usize,
    max_live_cards: usize,
    stale_window: Duration,
    cache: HashMap<String, CachedCard>,
    insert_seq: u64,
}

impl CardManager {
    pub fn new(
        backend: Arc<dyn BackendStore>,
        chart: Arc<dyn ChartSource>,
        ledger: NbLedger,
        cfg: &Config,
    ) -> Self {
        Self {
            backend,
            chart,
            ledger,
            timeframe: cfg.timeframe.clone(),
            series_points: cfg.series_points,
            max_live_cards: cfg.max_live_cards,
            stale_window: Duration::from_secs(cfg.card_stale_secs),
            cache: HashMap::new(),
            insert_seq: 0,
        }
    }

    pub fn ledger(&self) -> &NbLedger {
        &self.ledger
    }

    pub fn ledger_mut(&mut self) -> &mut NbLedger {
        &mut self.ledger
    }

    pub fn working_set_len(&self) -> usize {
        self.cache.len()
    }

    pub fn cached_ids(&self) -> Vec<String> {
        self.cache.keys().cloned().collect()
    }

    /// Produce a card from `series`, or from a fresh Chart Source pull when
    /// none is supplied. Persists before inserting into the working set;
    /// over-capacity insertion evicts the single oldest card.
    pub async fn produce(&mut self, series: Option<Vec<f64>>) -> CoreResult<Card> {
        let series = match series {
            Some(s) => s,
            None => {
                self.chart
                    .get_series(&self.timeframe, self.series_points)
                    .await?
                    .prices
            }
        };
        if series.len() < 2 {
            return Err(CoreError::InsufficientData {
                len: series.len(),
                min: 2,
            });
        }

        let record = self.ledger.calculate(&series, "produce").await?;
        if record.error.is_some() || !is_valid(record.value) {
            return Err(CoreError::NbComputation {
                context: "produce".to_string(),
            });
        }

        let now = ts_epoch_ms();
        let card = Card {
            id: Uuid::new_v4().to_string(),
            key: Uuid::new_v4().simple().to_string(),
            timeframe: self.timeframe.clone(),
            nb_value: Some(record.value),
            nb_upper_bound: Some(record.upper_bound),
            nb_lower_bound: Some(record.lower_bound),
            series_snapshot: series,
            produced_at: now,
            state: CardState::Active,
            history: vec![CardEvent {
                event: "NEW".to_string(),
                ts: now,
            }],
            extra: Map::new(),
        };

        self.backend.create_card(&card).await?;
        self.upsert(card.clone());
        if self.cache.len() > self.max_live_cards {
            self.evict_oldest();
        }
        json_log(
            Domain::Card,
            "produced",
            obj(&[
                ("id", v_str(&card.id)),
                ("nb_value", v_num(record.value)),
                ("working_set", v_num(self.cache.len() as f64)),
            ]),
        );
        Ok(card)
    }

    /// List cards of one kind from the Backend Store. Cards missing every
    /// NB field get fixed defaults and a data-quality warning instead of a
    /// rejection; every listed card is upserted into the working set.
    pub async fn list(&mut self, query: CardQuery) -> CoreResult<Vec<Card>> {
        let listed = self.backend.list_cards(query).await?;
        let mut out = Vec::with_capacity(listed.len());
        for mut card in listed {
            if card.nb_value.is_none()
                && card.nb_upper_bound.is_none()
                && card.nb_lower_bound.is_none()
            {
                let fill = NbRecord::placeholder(self.ledger.baseline());
                log(
                    Level::Warn,
                    Domain::Card,
                    "missing_nb_fields",
                    obj(&[("id", v_str(&card.id)), ("kind", v_str(query.as_str()))]),
                );
                card.nb_value = Some(fill.value);
                card.nb_upper_bound = Some(fill.upper_bound);
                card.nb_lower_bound = Some(fill.lower_bound);
            }
            self.upsert(card.clone());
            out.push(card);
        }
        while self.cache.len() > self.max_live_cards {
            self.evict_oldest();
        }
        Ok(out)
    }

    /// Serve from the working set while fresh; refetch otherwise. Backend
    /// not-found is a benign removal. Any other backend failure falls back
    /// to the stale cached copy when one exists.
    pub async fn get_by_id(&mut self, id: &str) -> CoreResult<Option<Card>> {
        if let Some(entry) = self.cache.get(id) {
            if entry.is_fresh(self.stale_window) {
                return Ok(Some(entry.card.clone()));
            }
        }
        match self.backend.fetch_card(id).await {
            Ok(Some(card)) => {
                self.upsert(card.clone());
                Ok(Some(card))
            }
            Ok(None) => {
                self.evict(id);
                Ok(None)
            }
            Err(err) if err.is_not_found() => {
                self.evict(id);
                Ok(None)
            }
            Err(err) => {
                if let Some(entry) = self.cache.get(id) {
                    log(
                        Level::Warn,
                        Domain::Card,
                        "stale_copy_served",
                        obj(&[("id", v_str(id)), ("error", v_str(&err.to_string()))]),
                    );
                    return Ok(Some(entry.card.clone()));
                }
                Err(err)
            }
        }
    }

    /// Remote update, then shallow merge into the cached copy. An NB value
    /// in the patch must be a valid scalar.
    pub async fn update(&mut self, id: &str, patch: CardPatch) -> CoreResult<Card> {
        if let Some(value) = patch.nb_value {
            if !is_valid(value) {
                return Err(CoreError::Validation { value });
            }
        }
        self.backend.update_card(id, &patch).await?;
        if let Some(entry) = self.cache.get_mut(id) {
            entry.card.apply_patch(&patch);
            entry.fetched_at = Instant::now();
            return Ok(entry.card.clone());
        }
        // nothing local to merge into; one fetch refreshes the set
        match self.backend.fetch_card(id).await? {
            Some(card) => {
                self.upsert(card.clone());
                Ok(card)
            }
            None => Err(CoreError::NotFound { id: id.to_string() }),
        }
    }

    /// Best-effort remote delete. The local entry goes away regardless;
    /// only a remote failure reports `false`.
    pub async fn remove(&mut self, id: &str) -> CoreResult<bool> {
        let result = self.backend.delete_card(id).await;
        self.evict(id);
        match result {
            Ok(()) => Ok(true),
            Err(err) if err.is_not_found() => Ok(true),
            Err(err) => {
                log(
                    Level::Warn,
                    Domain::Card,
                    "remove_failed",
                    obj(&[("id", v_str(id)), ("error", v_str(&err.to_string()))]),
                );
                Ok(false)
            }
        }
    }

    fn upsert(&mut self, card: Card) {
        let id = card.id.clone();
        match self.cache.get_mut(&id) {
            Some(entry) => {
                entry.card = card;
                entry.fetched_at = Instant::now();
            }
            None => {
                self.insert_seq += 1;
                self.cache.insert(
                    id,
                    CachedCard {
                        card,
                        fetched_at: Instant::now(),
                        seq: self.insert_seq,
                    },
                );
            }
        }
    }

    fn evict(&mut self, id: &str) {
        self.cache.remove(id);
    }

    fn evict_oldest(&mut self) {
        let oldest = self
            .cache
            .values()
            .min_by_key(|entry| (entry.card.produced_at, entry.seq))
            .map(|entry| entry.card.id.clone());
        if let Some(id) = oldest {
            self.cache.remove(&id);
            json_log(Domain::Card, "evicted", obj(&[("id", v_str(&id))]));
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::chart::SeriesBundle;
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Mutex;

    const SERIES: [f64; 4] = [100.0, 101.0, 99.0, 102.0];

    #[derive(Default)]
    struct MockBackend {
        cards: Mutex<HashMap<String, Card>>,
        fetch_calls: AtomicUsize,
        fail_fetch: bool,
        vanish: bool,
        fail_delete: bool,
        listed: Mutex<Vec<Card>>,
    }

    #[async_trait]
    impl BackendStore for MockBackend {
        async fn save_record(&self, _record: &NbRecord) -> CoreResult<()> {
            Ok(())
        }

        async fn find_record(&self, _value: f64, _tolerance: f64) -> CoreResult<Option<NbRecord>> {
            Ok(None)
        }

        async fn create_card(&self, card: &Card) -> CoreResult<()> {
            self.cards.lock().unwrap().insert(card.id.clone(), card.clone());
            Ok(())
        }

        async fn list_cards(&self, _query: CardQuery) -> CoreResult<Vec<Card>> {
            Ok(self.listed.lock().unwrap().clone())
        }

        async fn fetch_card(&self, id: &str) -> CoreResult<Option<Card>> {
            self.fetch_calls.fetch_add(1, Ordering::SeqCst);
            if self.fail_fetch {
                return Err(CoreError::RemoteUnavailable {
                    operation: "mock.fetch_card".into(),
                    message: "down".into(),
                });
            }
            if self.vanish {
                return Ok(None);
            }
            Ok(self.cards.lock().unwrap().get(id).cloned())
        }

        async fn update_card(&self, id: &str, patch: &CardPatch) -> CoreResult<()> {
            let mut cards = self.cards.lock().unwrap();
            match cards.get_mut(id) {
                Some(card) => {
                    card.apply_patch(patch);
                    Ok(())
                }
                None => Err(CoreError::NotFound { id: id.to_string() }),
            }
        }

        async fn delete_card(&self, id: &str) -> CoreResult<()> {
            if self.fail_delete {
                return Err(CoreError::RemoteUnavailable {
                    operation: "mock.delete_card".into(),
                    message: "down".into(),
                });
            }
            self.cards.lock().unwrap().remove(id);
            Ok(())
        }
    }

    struct MockChart;

    #[async_trait]
    impl ChartSource for MockChart {
        async fn get_series(&self, timeframe: &str, _count: usize) -> CoreResult<SeriesBundle> {
            Ok(SeriesBundle {
                prices: SERIES.to_vec(),
                volumes: None,
                trade_values: None,
                current_price: SERIES[3],
                timeframe: timeframe.to_string(),
            })
        }
    }

    fn manager_with(backend: Arc<MockBackend>, cfg: &Config) -> CardManager {
        let ledger = NbLedger::new(backend.clone(), cfg.baseline, cfg.nb_tolerance);
        CardManager::new(backend, Arc::new(MockChart), ledger, cfg)
    }

    fn manager() -> (Arc<MockBackend>, CardManager) {
        let backend = Arc::new(MockBackend::default());
        let cfg = Config::default();
        (backend.clone(), manager_with(backend, &cfg))
    }

    fn series_shifted(offset: f64) -> Vec<f64> {
        SERIES.iter().map(|v| v + offset).collect()
    }

    #[tokio::test]
    async fn produce_builds_card_with_nb_fields() {
        let (backend, mut mgr) = manager();
        let card = mgr.produce(Some(SERIES.to_vec())).await.unwrap();
        assert!(!card.id.is_empty());
        assert!(!card.key.is_empty());
        assert_ne!(card.id, card.key);
        assert!(card.nb_value.is_some());
        assert!(card.nb_upper_bound.is_some());
        assert!(card.nb_lower_bound.is_some());
        assert_eq!(card.history.len(), 1);
        assert_eq!(card.history[0].event, "NEW");
        assert!(card.validate());
        assert_eq!(backend.cards.lock().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn produce_without_series_pulls_from_chart() {
        let (_backend, mut mgr) = manager();
        let card = mgr.produce(None).await.unwrap();
        assert_eq!(card.series_snapshot, SERIES.to_vec());
    }

    #[tokio::test]
    async fn produce_rejects_short_series() {
        let (_backend, mut mgr) = manager();
        let err = mgr.produce(Some(vec![100.0])).await.unwrap_err();
        assert!(matches!(err, CoreError::InsufficientData { len: 1, min: 2 }));
    }

    #[tokio::test]
    async fn working_set_is_bounded_fifo() {
        let (_backend, mut mgr) = manager();
        let mut ids = Vec::new();
        for i in 0..7 {
            let card = mgr.produce(Some(series_shifted(i as f64))).await.unwrap();
            ids.push(card.id);
        }
        // max_live_cards = 4: the three oldest productions are gone
        assert_eq!(mgr.working_set_len(), 4);
        let cached = mgr.cached_ids();
        for old in &ids[..3] {
            assert!(!cached.contains(old), "oldest card {old} survived eviction");
        }
        for recent in &ids[3..] {
            assert!(cached.contains(recent), "recent card {recent} was evicted");
        }
    }

    #[tokio::test]
    async fn fresh_cache_suppresses_backend_fetch() {
        let (backend, mut mgr) = manager();
        let card = mgr.produce(Some(SERIES.to_vec())).await.unwrap();
        let first = mgr.get_by_id(&card.id).await.unwrap();
        let second = mgr.get_by_id(&card.id).await.unwrap();
        assert!(first.is_some());
        assert!(second.is_some());
        assert_eq!(backend.fetch_calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn stale_entry_refetches_and_refreshes() {
        let backend = Arc::new(MockBackend::default());
        let cfg = Config {
            card_stale_secs: 0, // everything is immediately stale
            ..Config::default()
        };
        let mut mgr = manager_with(backend.clone(), &cfg);
        let card = mgr.produce(Some(SERIES.to_vec())).await.unwrap();
        mgr.get_by_id(&card.id).await.unwrap();
        assert_eq!(backend.fetch_calls.load(Ordering::SeqCst), 1);
        mgr.get_by_id(&card.id).await.unwrap();
        assert_eq!(backend.fetch_calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn not_found_is_benign_removal() {
        let backend = Arc::new(MockBackend {
            vanish: true,
            ..Default::default()
        });
        let cfg = Config {
            card_stale_secs: 0,
            ..Config::default()
        };
        let mut mgr = manager_with(backend, &cfg);
        let card = mgr.produce(Some(SERIES.to_vec())).await.unwrap();
        let fetched = mgr.get_by_id(&card.id).await.unwrap();
        assert!(fetched.is_none());
        assert_eq!(mgr.working_set_len(), 0);
    }

    #[tokio::test]
    async fn backend_failure_serves_stale_copy() {
        let backend = Arc::new(MockBackend {
            fail_fetch: true,
            ..Default::default()
        });
        let cfg = Config {
            card_stale_secs: 0,
            ..Config::default()
        };
        let mut mgr = manager_with(backend, &cfg);
        let card = mgr.produce(Some(SERIES.to_vec())).await.unwrap();
        let fetched = mgr.get_by_id(&card.id).await.unwrap();
        assert_eq!(fetched.unwrap().id, card.id);
        assert_eq!(mgr.working_set_len(), 1);
    }

    #[tokio::test]
    async fn update_validates_nb_value() {
        let (_backend, mut mgr) = manager();
        let card = mgr.produce(Some(SERIES.to_vec())).await.unwrap();
        let err = mgr
            .update(
                &card.id,
                CardPatch {
                    nb_value: Some(1.5),
                    ..Default::default()
                },
            )
            .await
            .unwrap_err();
        assert!(matches!(err, CoreError::Validation { .. }));

        let updated = mgr
            .update(
                &card.id,
                CardPatch {
                    nb_value: Some(0.42),
                    state: Some(CardState::Verification),
                    ..Default::default()
                },
            )
            .await
            .unwrap();
        assert_eq!(updated.nb_value, Some(0.42));
        assert_eq!(updated.state, CardState::Verification);
        // merge happened in the cached copy too
        let cached = mgr.get_by_id(&card.id).await.unwrap().unwrap();
        assert_eq!(cached.nb_value, Some(0.42));
    }

    #[tokio::test]
    async fn remove_always_evicts_locally() {
        let backend = Arc::new(MockBackend {
            fail_delete: true,
            ..Default::default()
        });
        let cfg = Config::default();
        let mut mgr = manager_with(backend, &cfg);
        let card = mgr.produce(Some(SERIES.to_vec())).await.unwrap();
        let removed = mgr.remove(&card.id).await.unwrap();
        assert!(!removed);
        assert_eq!(mgr.working_set_len(), 0);
    }

    #[tokio::test]
    async fn list_substitutes_missing_nb_fields() {
        let (backend, mut mgr) = manager();
        backend.listed.lock().unwrap().push(Card {
            id: "legacy-1".to_string(),
            key: String::new(),
            timeframe: "1h".to_string(),
            nb_value: None,
            nb_upper_bound: None,
            nb_lower_bound: None,
            series_snapshot: Vec::new(),
            produced_at: 1,
            state: CardState::Active,
            history: Vec::new(),
            extra: Map::new(),
        });
        let listed = mgr.list(CardQuery::Active).await.unwrap();
        assert_eq!(listed.len(), 1);
        assert_eq!(listed[0].nb_value, Some(0.5));
        assert_eq!(listed[0].nb_upper_bound, Some(5.5));
        assert!(mgr.cached_ids().contains(&"legacy-1".to_string()));
    }

    #[test]
    fn validate_requires_some_nb_field() {
        let mut card = Card {
            id: "c".to_string(),
            key: String::new(),
            timeframe: String::new(),
            nb_value: None,
            nb_upper_bound: None,
            nb_lower_bound: None,
            series_snapshot: Vec::new(),
            produced_at: 0,
            state: CardState::Active,
            history: Vec::new(),
            extra: Map::new(),
        };
        assert!(!card.validate());
        card.nb_lower_bound = Some(3.0);
        assert!(card.validate());
        card.nb_value = Some(f64::NAN);
        assert!(!card.validate());
        card.nb_value = Some(0.7);
        assert!(card.validate());
    }

    #[test]
    fn card_decodes_from_sparse_backend_json() {
        let card: Card = serde_json::from_str(
            r#"{"id":"x1","nbValue":0.4,"zone":"BUY ZONE","producedAt":123}"#,
        )
        .unwrap();
        assert_eq!(card.id, "x1");
        assert_eq!(card.nb_value, Some(0.4));
        assert_eq!(card.produced_at, 123);
        assert_eq!(card.state, CardState::Active);
        assert_eq!(card.extra["zone"], "BUY ZONE");
    }
}
