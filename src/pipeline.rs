//! One pipeline cycle: load → compute → train → predict → create → verify.
//!
//! Every boundary reports into the stage tracker. The runner is the
//! single-flight point: a run in progress is visible through `is_busy`,
//! and callers must not start another cycle for the same logical run. The
//! data structures below it assume no atomicity across an await.

use std::sync::Arc;
use std::time::Duration;

use crate::analysis::{Action, AnalysisCache, RlResult, Zone};
use crate::cards::CardManager;
use crate::chart::ChartSource;
use crate::config::Config;
use crate::error::{CoreError, CoreResult};
use crate::logging::{json_log, obj, ts_epoch_ms, v_num, v_str, Domain};
use crate::retry::{retry_async, RetryConfig};
use crate::stages::{StageStatus, StageTracker};

/// How many trailing card scores feed the reinforcement call.
const RECENT_SCORE_WINDOW: usize = 20;

#[derive(Debug, Clone)]
pub struct RunReport {
    pub ts: i64,
    pub card_id: String,
    pub nb_value: f64,
    pub upper_bound: f64,
    pub lower_bound: f64,
    pub action: Action,
    pub zone: Option<Zone>,
    pub progress: f64,
    pub stages: Vec<(String, StageStatus, Option<Duration>)>,
}

pub struct PipelineRunner {
    cards: CardManager,
    analysis: AnalysisCache,
    chart: Arc<dyn ChartSource>,
    tracker: StageTracker,
    retry: RetryConfig,
    timeframe: String,
    series_points: usize,
    busy: bool,
    last_card_id: Option<String>,
    recent_scores: Vec<f64>,
}

impl PipelineRunner {
    pub fn new(
        cards: CardManager,
        analysis: AnalysisCache,
        chart: Arc<dyn ChartSource>,
        cfg: &Config,
    ) -> Self {
        Self {
            cards,
            analysis,
            chart,
            tracker: StageTracker::pipeline(),
            retry: RetryConfig::default(),
            timeframe: cfg.timeframe.clone(),
            series_points: cfg.series_points,
            busy: false,
            last_card_id: None,
            recent_scores: Vec::new(),
        }
    }

    pub fn is_busy(&self) -> bool {
        self.busy
    }

    pub fn set_retry(&mut self, retry: RetryConfig) {
        self.retry = retry;
    }

    pub fn tracker(&self) -> &StageTracker {
        &self.tracker
    }

    pub fn tracker_mut(&mut self) -> &mut StageTracker {
        &mut self.tracker
    }

    pub fn cards(&self) -> &CardManager {
        &self.cards
    }

    pub fn cards_mut(&mut self) -> &mut CardManager {
        &mut self.cards
    }

    pub fn analysis_mut(&mut self) -> &mut AnalysisCache {
        &mut self.analysis
    }

    pub fn last_card_id(&self) -> Option<&str> {
        self.last_card_id.as_deref()
    }

    /// Run one full cycle. The busy flag is raised for the whole cycle and
    /// dropped on every exit path.
    pub async fn run_once(&mut self) -> CoreResult<RunReport> {
        self.busy = true;
        let result = self.run_inner().await;
        self.busy = false;
        result
    }

    async fn run_inner(&mut self) -> CoreResult<RunReport> {
        self.tracker.reset();

        // load: acquire the series, retrying transient chart failures
        self.tracker.activate("load");
        let chart = self.chart.clone();
        let timeframe = self.timeframe.clone();
        let points = self.series_points;
        let fetched = retry_async(&self.retry, "chart.get_series", || {
            let chart = chart.clone();
            let timeframe = timeframe.clone();
            async move { chart.get_series(&timeframe, points).await }
        })
        .await;
        let bundle = match fetched {
            Ok(bundle) => {
                self.tracker.complete("load");
                bundle
            }
            Err(err) => return self.abort("load", err),
        };

        // compute: n/b record for the fresh series
        self.tracker.activate("compute");
        let record = match self
            .cards
            .ledger_mut()
            .calculate(&bundle.prices, "pipeline")
            .await
        {
            Ok(record) if record.error.is_none() => {
                self.tracker.complete("compute");
                record
            }
            Ok(_) => {
                return self.abort(
                    "compute",
                    CoreError::NbComputation {
                        context: "pipeline".to_string(),
                    },
                )
            }
            Err(err) => return self.abort("compute", err),
        };

        // train: warm the reinforcement model on the previous card
        let rl: Option<RlResult> = match self.last_card_id.clone() {
            Some(prev) => {
                self.tracker.activate("train");
                let result = self
                    .analysis
                    .analyze_reinforcement(Some(&prev), &self.recent_scores)
                    .await;
                self.tracker.complete("train");
                result
            }
            None => {
                self.tracker.skip("train");
                None
            }
        };

        // predict: decision for this cycle
        self.tracker.activate("predict");
        let action = rl
            .as_ref()
            .filter(|r| !r.error)
            .and_then(|r| r.action)
            .unwrap_or_else(|| Action::from_nb_value(record.value));
        self.tracker.complete("predict");

        // create: produce and persist the card
        self.tracker.activate("create");
        let card = match self.cards.produce(Some(bundle.prices.clone())).await {
            Ok(card) => {
                self.tracker.complete("create");
                card
            }
            Err(err) => return self.abort("create", err),
        };
        self.last_card_id = Some(card.id.clone());
        self.recent_scores.push(record.value);
        if self.recent_scores.len() > RECENT_SCORE_WINDOW {
            self.recent_scores.remove(0);
        }

        // verify: zone analysis + card validation
        self.tracker.activate("verify");
        let zone = self.analysis.analyze_zone(&bundle.prices, Some(&card)).await;
        if !card.validate() {
            return self.abort(
                "verify",
                CoreError::Validation {
                    value: card.nb_value.unwrap_or(f64::NAN),
                },
            );
        }
        self.tracker.complete("verify");
        self.tracker.mark_done();

        let report = RunReport {
            ts: ts_epoch_ms(),
            card_id: card.id,
            nb_value: record.value,
            upper_bound: record.upper_bound,
            lower_bound: record.lower_bound,
            action,
            zone: zone.zone,
            progress: self.tracker.progress(),
            stages: self.tracker.snapshot(),
        };
        json_log(
            Domain::Stage,
            "run_complete",
            obj(&[
                ("card", v_str(&report.card_id)),
                ("nb_value", v_num(report.nb_value)),
                ("action", v_str(report.action.as_str())),
                ("progress", v_num(report.progress)),
            ]),
        );
        Ok(report)
    }

    fn abort<T>(&mut self, stage: &str, err: CoreError) -> CoreResult<T> {
        self.tracker.fail(stage);
        self.tracker.skip_pending();
        json_log(
            Domain::Stage,
            "run_aborted",
            obj(&[("stage", v_str(stage)), ("error", v_str(&err.to_string()))]),
        );
        Err(err)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::StubBackend;
    use crate::chart::SeriesBundle;
    use crate::ledger::NbLedger;
    use crate::remote::NullAnalyzer;
    use async_trait::async_trait;

    struct FixedChart;

    #[async_trait]
    impl ChartSource for FixedChart {
        async fn get_series(&self, timeframe: &str, _count: usize) -> CoreResult<SeriesBundle> {
            let prices = vec![100.0, 101.0, 99.0, 102.0, 101.5, 103.0];
            Ok(SeriesBundle {
                current_price: *prices.last().unwrap(),
                prices,
                volumes: None,
                trade_values: None,
                timeframe: timeframe.to_string(),
            })
        }
    }

    struct BrokenChart;

    #[async_trait]
    impl ChartSource for BrokenChart {
        async fn get_series(&self, _timeframe: &str, _count: usize) -> CoreResult<SeriesBundle> {
            Err(CoreError::RemoteUnavailable {
                operation: "chart.get_series".into(),
                message: "offline".into(),
            })
        }
    }

    fn runner(chart: Arc<dyn ChartSource>) -> PipelineRunner {
        let cfg = Config::default();
        let backend = Arc::new(StubBackend::new());
        let ledger = NbLedger::new(backend.clone(), cfg.baseline, cfg.nb_tolerance);
        let cards = CardManager::new(backend, chart.clone(), ledger, &cfg);
        let analysis = AnalysisCache::new(
            Arc::new(NullAnalyzer),
            cfg.zone_tail_points,
            Duration::from_secs(cfg.rl_ttl_secs),
        );
        PipelineRunner::new(cards, analysis, chart, &cfg)
    }

    #[tokio::test]
    async fn first_run_completes_and_skips_train() {
        let mut runner = runner(Arc::new(FixedChart));
        let report = runner.run_once().await.unwrap();
        assert!(!report.card_id.is_empty());
        assert_eq!(report.progress, 1.0);
        assert_eq!(runner.tracker().status("train"), Some(StageStatus::Skipped));
        assert_eq!(runner.tracker().status("verify"), Some(StageStatus::Completed));
        assert!(!runner.is_busy());
    }

    #[tokio::test]
    async fn second_run_trains_on_previous_card() {
        let mut runner = runner(Arc::new(FixedChart));
        runner.run_once().await.unwrap();
        let first_card = runner.last_card_id().unwrap().to_string();
        runner.run_once().await.unwrap();
        assert_eq!(runner.tracker().status("train"), Some(StageStatus::Completed));
        assert_ne!(runner.last_card_id().unwrap(), first_card);
    }

    #[tokio::test]
    async fn load_failure_aborts_and_skips_the_rest() {
        let mut runner = runner(Arc::new(BrokenChart));
        runner.set_retry(RetryConfig {
            max_retries: 1,
            base_delay_ms: 1,
            ..Default::default()
        });
        let err = runner.run_once().await.unwrap_err();
        assert!(matches!(err, CoreError::RemoteUnavailable { .. }));
        assert_eq!(runner.tracker().status("load"), Some(StageStatus::Error));
        for stage in ["compute", "train", "predict", "create", "verify"] {
            assert_eq!(runner.tracker().status(stage), Some(StageStatus::Skipped));
        }
        assert!(!runner.is_busy());
        assert!(runner.tracker().progress() <= 0.99);
    }
}
