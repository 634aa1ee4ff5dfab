use std::sync::Arc;

use anyhow::Result;
use tokio::time::{sleep, Duration};

use nbdesk::analysis::AnalysisCache;
use nbdesk::backend::{BackendStore, HttpBackend, StubBackend};
use nbdesk::cards::CardManager;
use nbdesk::chart::{ChartSource, HttpChartSource, SyntheticChartSource};
use nbdesk::config::Config;
use nbdesk::ledger::NbLedger;
use nbdesk::logging::{json_log, obj, v_num, v_str, Domain};
use nbdesk::pipeline::PipelineRunner;
use nbdesk::remote::{Analyzer, HttpAnalyzer, NullAnalyzer};
use nbdesk::storage::RunStore;

#[tokio::main]
async fn main() -> Result<()> {
    let cfg = Config::from_env();

    // Real collaborators when base URLs are configured, stubs otherwise.
    let backend: Arc<dyn BackendStore> = match &cfg.backend_base {
        Some(base) => {
            json_log(Domain::System, "backend", obj(&[("mode", v_str("http")), ("base", v_str(base))]));
            Arc::new(HttpBackend::new(
                base.clone(),
                cfg.light_timeout_secs,
                cfg.heavy_timeout_secs,
            ))
        }
        None => {
            json_log(Domain::System, "backend", obj(&[("mode", v_str("stub"))]));
            Arc::new(StubBackend::new())
        }
    };
    let chart: Arc<dyn ChartSource> = match &cfg.chart_base {
        Some(base) => Arc::new(HttpChartSource::new(base.clone(), cfg.light_timeout_secs)),
        None => Arc::new(SyntheticChartSource::new(30_000.0)),
    };
    let analyzer: Arc<dyn Analyzer> = match &cfg.analysis_base {
        Some(base) => Arc::new(HttpAnalyzer::new(base.clone(), cfg.heavy_timeout_secs)),
        None => Arc::new(NullAnalyzer),
    };

    let ledger = NbLedger::new(backend.clone(), cfg.baseline, cfg.nb_tolerance);
    let cards = CardManager::new(backend, chart.clone(), ledger, &cfg);
    let analysis = AnalysisCache::new(
        analyzer,
        cfg.zone_tail_points,
        Duration::from_secs(cfg.rl_ttl_secs),
    );
    let mut runner = PipelineRunner::new(cards, analysis, chart, &cfg);
    runner.tracker_mut().set_observer(|stage, status, timing| {
        json_log(
            Domain::Stage,
            "observed",
            obj(&[
                ("stage", v_str(stage)),
                ("status", v_str(status.as_str())),
                (
                    "duration_ms",
                    v_num(timing.map(|d| d.as_millis() as f64).unwrap_or(-1.0)),
                ),
            ]),
        );
    });

    let mut store = RunStore::new(&cfg.sqlite_path)?;
    store.init()?;

    json_log(
        Domain::System,
        "started",
        obj(&[
            ("timeframe", v_str(&cfg.timeframe)),
            ("series_points", v_num(cfg.series_points as f64)),
            ("run_every_secs", v_num(cfg.run_every_secs as f64)),
        ]),
    );

    loop {
        match runner.run_once().await {
            Ok(report) => {
                store.persist_run(&report)?;
                json_log(
                    Domain::System,
                    "run_persisted",
                    obj(&[
                        ("card", v_str(&report.card_id)),
                        ("action", v_str(report.action.as_str())),
                        ("progress", v_num(report.progress)),
                    ]),
                );
            }
            Err(err) => {
                json_log(
                    Domain::System,
                    "run_failed",
                    obj(&[("error", v_str(&err.to_string()))]),
                );
            }
        }
        sleep(Duration::from_secs(cfg.run_every_secs)).await;
    }
}
