//! Runtime configuration, env-driven with per-field defaults.

#[derive(Clone, Debug)]
pub struct Config {
    /// Backend Store base URL; stub store when unset.
    pub backend_base: Option<String>,
    /// Chart Source base URL; synthetic series when unset.
    pub chart_base: Option<String>,
    /// Analysis service base URL; null analyzer when unset.
    pub analysis_base: Option<String>,
    pub timeframe: String,
    /// Points requested from the Chart Source per production.
    pub series_points: usize,
    pub baseline: f64,
    pub nb_tolerance: f64,
    pub max_live_cards: usize,
    /// Working-set freshness window for `get_by_id`.
    pub card_stale_secs: u64,
    pub rl_ttl_secs: u64,
    /// Trailing window feeding the zone-analysis digest.
    pub zone_tail_points: usize,
    /// Timeout for light reads (lookups, fetches).
    pub light_timeout_secs: u64,
    /// Timeout for card production and reinforcement analysis.
    pub heavy_timeout_secs: u64,
    pub run_every_secs: u64,
    pub sqlite_path: String,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            backend_base: None,
            chart_base: None,
            analysis_base: None,
            timeframe: "1h".to_string(),
            series_points: 200,
            baseline: crate::transform::DEFAULT_BASELINE,
            nb_tolerance: 1e-4,
            max_live_cards: 4,
            card_stale_secs: 300,
            rl_ttl_secs: 60,
            zone_tail_points: 50,
            light_timeout_secs: 5,
            heavy_timeout_secs: 45,
            run_every_secs: 60,
            sqlite_path: "./nbdesk.sqlite".to_string(),
        }
    }
}

impl Config {
    pub fn from_env() -> Self {
        let d = Self::default();
        Self {
            backend_base: std::env::var("BACKEND_BASE").ok(),
            chart_base: std::env::var("CHART_BASE").ok(),
            analysis_base: std::env::var("ANALYSIS_BASE").ok(),
            timeframe: std::env::var("TIMEFRAME").unwrap_or(d.timeframe),
            series_points: std::env::var("SERIES_POINTS").ok().and_then(|v| v.parse().ok()).unwrap_or(d.series_points),
            baseline: std::env::var("NB_BASELINE").ok().and_then(|v| v.parse().ok()).unwrap_or(d.baseline),
            nb_tolerance: std::env::var("NB_TOLERANCE").ok().and_then(|v| v.parse().ok()).unwrap_or(d.nb_tolerance),
            max_live_cards: std::env::var("MAX_LIVE_CARDS").ok().and_then(|v| v.parse().ok()).unwrap_or(d.max_live_cards),
            card_stale_secs: std::env::var("CARD_STALE_SECS").ok().and_then(|v| v.parse().ok()).unwrap_or(d.card_stale_secs),
            rl_ttl_secs: std::env::var("RL_TTL_SECS").ok().and_then(|v| v.parse().ok()).unwrap_or(d.rl_ttl_secs),
            zone_tail_points: std::env::var("ZONE_TAIL_POINTS").ok().and_then(|v| v.parse().ok()).unwrap_or(d.zone_tail_points),
            light_timeout_secs: std::env::var("LIGHT_TIMEOUT_SECS").ok().and_then(|v| v.parse().ok()).unwrap_or(d.light_timeout_secs),
            heavy_timeout_secs: std::env::var("HEAVY_TIMEOUT_SECS").ok().and_then(|v| v.parse().ok()).unwrap_or(d.heavy_timeout_secs),
            run_every_secs: std::env::var("RUN_EVERY_SECS").ok().and_then(|v| v.parse().ok()).unwrap_or(d.run_every_secs),
            sqlite_path: std::env::var("SQLITE_PATH").unwrap_or(d.sqlite_path),
        }
    }
}
