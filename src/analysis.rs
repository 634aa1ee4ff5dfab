//! Memoized analysis results: chart-zone and reinforcement decisions.
//!
//! One canonical result per subject — zone results keyed by a digest of the
//! trailing window, reinforcement results keyed by card id with a short
//! TTL. Remote failures never propagate from here; they come back as
//! placeholder/error-shaped results the Presentation Layer can render.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use serde_json::{json, Value};

use crate::cards::Card;
use crate::logging::{json_log, log, obj, ts_epoch_ms, v_bool, v_str, Domain, Level};
use crate::remote::Analyzer;
use crate::series;

/// Legacy field names under which older backends stashed a card's zone.
const LEGACY_ZONE_FIELDS: [&str; 5] = ["zone", "nbZone", "zoneState", "analysisZone", "zoneSignal"];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Zone {
    Buy,
    Sell,
    Wait,
}

impl Zone {
    pub fn as_str(&self) -> &'static str {
        match self {
            Zone::Buy => "BUY",
            Zone::Sell => "SELL",
            Zone::Wait => "WAIT",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Signal {
    Ok,
    Wait,
    Error,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Action {
    Buy,
    Sell,
    Hold,
}

impl Action {
    pub fn as_str(&self) -> &'static str {
        match self {
            Action::Buy => "BUY",
            Action::Sell => "SELL",
            Action::Hold => "HOLD",
        }
    }

    /// Threshold rule over an n/b scalar.
    pub fn from_nb_value(value: f64) -> Self {
        if !value.is_finite() {
            return Action::Hold;
        }
        if value > 0.7 {
            Action::Buy
        } else if value < 0.3 {
            Action::Sell
        } else {
            Action::Hold
        }
    }
}

#[derive(Debug, Clone)]
pub struct ZoneResult {
    pub subject: String,
    pub zone: Option<Zone>,
    pub signal: Signal,
    pub cached: bool,
    pub payload: Value,
    pub computed_at: i64,
}

#[derive(Debug, Clone)]
pub struct RlResult {
    pub card_id: String,
    pub error: bool,
    pub message: Option<String>,
    pub detail: Option<String>,
    pub action: Option<Action>,
    pub score: Option<f64>,
    pub cached: bool,
    pub computed_at: i64,
}

struct CachedRl {
    result: RlResult,
    fetched_at: Instant,
}

fn parse_zone(raw: &str) -> Option<Zone> {
    let lowered = raw.to_lowercase();
    if lowered.contains("buy") || lowered.contains("long") || lowered.contains("demand") {
        Some(Zone::Buy)
    } else if lowered.contains("sell") || lowered.contains("short") || lowered.contains("supply") {
        Some(Zone::Sell)
    } else if lowered.contains("wait") || lowered.contains("hold") || lowered.contains("neutral") {
        Some(Zone::Wait)
    } else {
        None
    }
}

fn parse_action(raw: &Value) -> Option<Action> {
    let lowered = raw.as_str()?.to_lowercase();
    if lowered.contains("buy") || lowered.contains("long") {
        Some(Action::Buy)
    } else if lowered.contains("sell") || lowered.contains("short") {
        Some(Action::Sell)
    } else if lowered.contains("hold") || lowered.contains("wait") {
        Some(Action::Hold)
    } else {
        None
    }
}

fn num_field(payload: &Value, names: &[&str]) -> Option<f64> {
    names.iter().find_map(|name| payload.get(*name)?.as_f64())
}

/// Zone heuristic carried over from the source system: explicit zone field,
/// then trend keyword, then bound comparison. Keyword and bounds can
/// disagree; the keyword wins. Flagged for product-owner confirmation
/// before hardening.
fn determine_zone(payload: &Value) -> Option<Zone> {
    if let Some(zone) = payload.get("zone").and_then(Value::as_str).and_then(parse_zone) {
        return Some(zone);
    }
    if let Some(trend) = payload.get("trend").and_then(Value::as_str) {
        let t = trend.to_lowercase();
        if t.contains("up") || t.contains("bull") || t.contains("long") {
            return Some(Zone::Buy);
        }
        if t.contains("down") || t.contains("bear") || t.contains("short") {
            return Some(Zone::Sell);
        }
    }
    let upper = num_field(payload, &["upperBound", "bitMax", "upper"]);
    let lower = num_field(payload, &["lowerBound", "bitMin", "lower"]);
    if let (Some(upper), Some(lower)) = (upper, lower) {
        return Some(if upper >= lower { Zone::Buy } else { Zone::Sell });
    }
    None
}

fn card_zone(card: &Card) -> Option<(&'static str, Zone)> {
    for field in LEGACY_ZONE_FIELDS {
        if let Some(raw) = card.extra.get(field).and_then(Value::as_str) {
            if let Some(zone) = parse_zone(raw) {
                return Some((field, zone));
            }
        }
    }
    None
}

pub struct AnalysisCache {
    analyzer: Arc<dyn Analyzer>,
    zone_tail: usize,
    rl_ttl: Duration,
    zones: HashMap<String, ZoneResult>,
    rl: HashMap<String, CachedRl>,
}

impl AnalysisCache {
    pub fn new(analyzer: Arc<dyn Analyzer>, zone_tail: usize, rl_ttl: Duration) -> Self {
        Self {
            analyzer,
            zone_tail,
            rl_ttl,
            zones: HashMap::new(),
            rl: HashMap::new(),
        }
    }

    /// Zone analysis with read-through caching. Card-borne legacy zone
    /// fields short-circuit everything else. A remote result without a zone
    /// yields a WAIT placeholder; a remote failure an ERROR placeholder.
    pub async fn analyze_zone(&mut self, series: &[f64], card: Option<&Card>) -> ZoneResult {
        if let Some(card) = card {
            if let Some((field, zone)) = card_zone(card) {
                json_log(
                    Domain::Analysis,
                    "zone_from_card",
                    obj(&[("id", v_str(&card.id)), ("field", v_str(field))]),
                );
                return ZoneResult {
                    subject: card.id.clone(),
                    zone: Some(zone),
                    signal: Signal::Ok,
                    cached: true,
                    payload: json!({ field: zone.as_str() }),
                    computed_at: ts_epoch_ms(),
                };
            }
        }

        let subject = series::digest_tail(series, self.zone_tail);
        if let Some(hit) = self.zones.get(&subject) {
            let mut result = hit.clone();
            result.cached = true;
            return result;
        }

        match self.analyzer.analyze_zone(series, card).await {
            Ok(payload) => match determine_zone(&payload) {
                Some(zone) => {
                    let result = ZoneResult {
                        subject: subject.clone(),
                        zone: Some(zone),
                        signal: Signal::Ok,
                        cached: false,
                        payload,
                        computed_at: ts_epoch_ms(),
                    };
                    self.zones.insert(subject, result.clone());
                    result
                }
                None => ZoneResult {
                    subject,
                    zone: None,
                    signal: Signal::Wait,
                    cached: false,
                    payload,
                    computed_at: ts_epoch_ms(),
                },
            },
            Err(err) => {
                log(
                    Level::Warn,
                    Domain::Analysis,
                    "zone_remote_failed",
                    obj(&[("error", v_str(&err.to_string()))]),
                );
                ZoneResult {
                    subject,
                    zone: None,
                    signal: Signal::Error,
                    cached: false,
                    payload: json!({ "error": err.to_string() }),
                    computed_at: ts_epoch_ms(),
                }
            }
        }
    }

    /// Reinforcement analysis keyed by card id. A hit younger than the TTL
    /// skips the remote call. Remote errors come back as error-shaped
    /// results, never as raised failures; a missing card id short-circuits
    /// to `None`.
    pub async fn analyze_reinforcement(
        &mut self,
        card_id: Option<&str>,
        recent_scores: &[f64],
    ) -> Option<RlResult> {
        let id = match card_id {
            Some(raw) if !raw.trim().is_empty() => raw.to_string(),
            _ => return None,
        };

        if let Some(hit) = self.rl.get(&id) {
            if hit.fetched_at.elapsed() < self.rl_ttl {
                let mut result = hit.result.clone();
                result.cached = true;
                return Some(result);
            }
        }

        match self.analyzer.analyze_reinforcement(&id, recent_scores).await {
            Ok(payload) => {
                let errored = payload
                    .get("error")
                    .map(|e| e.as_bool().unwrap_or(!e.is_null()))
                    .unwrap_or(false);
                if errored {
                    return Some(RlResult {
                        card_id: id,
                        error: true,
                        message: payload.get("message").and_then(Value::as_str).map(String::from),
                        detail: payload.get("detail").and_then(Value::as_str).map(String::from),
                        action: None,
                        score: None,
                        cached: false,
                        computed_at: ts_epoch_ms(),
                    });
                }
                let result = RlResult {
                    card_id: id.clone(),
                    error: false,
                    message: None,
                    detail: None,
                    action: payload
                        .get("action")
                        .or_else(|| payload.get("decision"))
                        .and_then(parse_action),
                    score: payload.get("score").and_then(Value::as_f64),
                    cached: false,
                    computed_at: ts_epoch_ms(),
                };
                self.rl.insert(
                    id,
                    CachedRl {
                        result: result.clone(),
                        fetched_at: Instant::now(),
                    },
                );
                Some(result)
            }
            Err(err) => Some(RlResult {
                card_id: id,
                error: true,
                message: Some(err.to_string()),
                detail: None,
                action: None,
                score: None,
                cached: false,
                computed_at: ts_epoch_ms(),
            }),
        }
    }

    /// Remote reinforcement decision when present, threshold rule over the
    /// card's n/b value otherwise; anything unusable decides HOLD.
    pub fn decide_action(&self, state: Option<&RlResult>, card: &Card) -> Action {
        if let Some(result) = state {
            if !result.error {
                if let Some(action) = result.action {
                    json_log(
                        Domain::Analysis,
                        "action_from_remote",
                        obj(&[
                            ("card", v_str(&card.id)),
                            ("action", v_str(action.as_str())),
                            ("cached", v_bool(result.cached)),
                        ]),
                    );
                    return action;
                }
            }
        }
        card.nb_value.map(Action::from_nb_value).unwrap_or(Action::Hold)
    }

    /// Empties both result caches.
    pub fn clear(&mut self) {
        self.zones.clear();
        self.rl.clear();
    }

    pub fn zone_cache_len(&self) -> usize {
        self.zones.len()
    }

    pub fn rl_cache_len(&self) -> usize {
        self.rl.len()
    }
}
