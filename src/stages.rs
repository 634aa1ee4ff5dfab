//! Staged-pipeline tracker: per-stage status, timing, and aggregate
//! progress over a fixed ordered stage list.
//!
//! PENDING → ACTIVE → {COMPLETED | ERROR | SKIPPED}; the last three are
//! terminal. Entering ACTIVE stamps a start instant, leaving it stamps the
//! end and derives the duration. The Presentation Layer observes
//! transitions through a callback instead of the core writing to any
//! display surface.

use std::time::{Duration, Instant};

use crate::logging::{json_log, obj, v_num, v_str, Domain};

/// The minimal pipeline, in execution order.
pub const PIPELINE_STAGES: [&str; 6] = ["load", "compute", "train", "predict", "create", "verify"];

/// Elapsed ACTIVE time that earns the full in-stage bonus.
const BONUS_RAMP_SECS: f64 = 10.0;
/// Bonus cap: 30% of one stage's worth.
const BONUS_CAP: f64 = 0.3;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StageStatus {
    Pending,
    Active,
    Completed,
    Error,
    Skipped,
}

impl StageStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            StageStatus::Completed | StageStatus::Error | StageStatus::Skipped
        )
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            StageStatus::Pending => "PENDING",
            StageStatus::Active => "ACTIVE",
            StageStatus::Completed => "COMPLETED",
            StageStatus::Error => "ERROR",
            StageStatus::Skipped => "SKIPPED",
        }
    }
}

struct StageEntry {
    name: String,
    status: StageStatus,
    started_at: Option<Instant>,
    duration: Option<Duration>,
}

impl StageEntry {
    fn new(name: &str) -> Self {
        Self {
            name: name.to_string(),
            status: StageStatus::Pending,
            started_at: None,
            duration: None,
        }
    }
}

pub type StageObserver = Box<dyn Fn(&str, StageStatus, Option<Duration>) + Send>;

pub struct StageTracker {
    stages: Vec<StageEntry>,
    started: Instant,
    done: bool,
    observer: Option<StageObserver>,
}

impl StageTracker {
    pub fn new(names: &[&str]) -> Self {
        Self {
            stages: names.iter().map(|n| StageEntry::new(n)).collect(),
            started: Instant::now(),
            done: false,
            observer: None,
        }
    }

    pub fn pipeline() -> Self {
        Self::new(&PIPELINE_STAGES)
    }

    pub fn set_observer<F>(&mut self, observer: F)
    where
        F: Fn(&str, StageStatus, Option<Duration>) + Send + 'static,
    {
        self.observer = Some(Box::new(observer));
    }

    pub fn stage_names(&self) -> Vec<String> {
        self.stages.iter().map(|s| s.name.clone()).collect()
    }

    pub fn activate(&mut self, stage: &str) -> bool {
        self.transition(stage, StageStatus::Active)
    }

    pub fn complete(&mut self, stage: &str) -> bool {
        self.transition(stage, StageStatus::Completed)
    }

    pub fn fail(&mut self, stage: &str) -> bool {
        self.transition(stage, StageStatus::Error)
    }

    pub fn skip(&mut self, stage: &str) -> bool {
        self.transition(stage, StageStatus::Skipped)
    }

    /// Mark every still-pending stage SKIPPED (used when a run aborts).
    pub fn skip_pending(&mut self) {
        let pending: Vec<String> = self
            .stages
            .iter()
            .filter(|s| s.status == StageStatus::Pending)
            .map(|s| s.name.clone())
            .collect();
        for name in pending {
            self.skip(&name);
        }
    }

    fn transition(&mut self, stage: &str, next: StageStatus) -> bool {
        let entry = match self.stages.iter_mut().find(|s| s.name == stage) {
            Some(entry) => entry,
            None => return false,
        };
        if entry.status.is_terminal() || entry.status == next {
            return false;
        }
        if next == StageStatus::Active {
            if entry.status != StageStatus::Pending {
                return false;
            }
            entry.started_at = Some(Instant::now());
        } else if entry.status == StageStatus::Active {
            entry.duration = entry.started_at.map(|t| t.elapsed());
        }
        entry.status = next;

        let name = entry.name.clone();
        let duration = entry.duration;
        json_log(
            Domain::Stage,
            "transition",
            obj(&[
                ("stage", v_str(&name)),
                ("status", v_str(next.as_str())),
                (
                    "duration_ms",
                    v_num(duration.map(|d| d.as_millis() as f64).unwrap_or(-1.0)),
                ),
            ]),
        );
        if let Some(observer) = &self.observer {
            observer(&name, next, duration);
        }
        true
    }

    pub fn status(&self, stage: &str) -> Option<StageStatus> {
        self.stages.iter().find(|s| s.name == stage).map(|s| s.status)
    }

    pub fn timing(&self, stage: &str) -> Option<Duration> {
        self.stages
            .iter()
            .find(|s| s.name == stage)
            .and_then(|s| s.duration)
    }

    pub fn total_elapsed(&self) -> Duration {
        self.started.elapsed()
    }

    /// Completed fraction plus a bounded in-stage bonus, capped at 99%
    /// until the pipeline is fully done. All stages COMPLETED is fully
    /// done by definition and reads exactly 100%.
    pub fn progress(&self) -> f64 {
        let total = self.stages.len();
        if total == 0 {
            return 1.0;
        }
        let completed = self
            .stages
            .iter()
            .filter(|s| s.status == StageStatus::Completed)
            .count();
        if completed == total || self.done {
            return 1.0;
        }
        let mut fraction = completed as f64 / total as f64;
        if let Some(active) = self.stages.iter().find(|s| s.status == StageStatus::Active) {
            let elapsed = active
                .started_at
                .map(|t| t.elapsed().as_secs_f64())
                .unwrap_or(0.0);
            let bonus = (elapsed / BONUS_RAMP_SECS).min(1.0) * BONUS_CAP;
            fraction += bonus / total as f64;
        }
        fraction.min(0.99)
    }

    /// External "fully done" mark; lifts the 99% cap.
    pub fn mark_done(&mut self) {
        self.done = true;
    }

    /// Back to PENDING across the board and restart the global timer.
    /// Duration copies captured earlier by callers are theirs to keep.
    pub fn reset(&mut self) {
        for entry in &mut self.stages {
            entry.status = StageStatus::Pending;
            entry.started_at = None;
            entry.duration = None;
        }
        self.started = Instant::now();
        self.done = false;
    }

    /// Status and timing of every stage, in pipeline order.
    pub fn snapshot(&self) -> Vec<(String, StageStatus, Option<Duration>)> {
        self.stages
            .iter()
            .map(|s| (s.name.clone(), s.status, s.duration))
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    #[test]
    fn lifecycle_records_timing() {
        let mut tracker = StageTracker::pipeline();
        assert_eq!(tracker.status("load"), Some(StageStatus::Pending));
        assert!(tracker.activate("load"));
        assert_eq!(tracker.status("load"), Some(StageStatus::Active));
        assert!(tracker.timing("load").is_none());
        assert!(tracker.complete("load"));
        assert_eq!(tracker.status("load"), Some(StageStatus::Completed));
        assert!(tracker.timing("load").is_some());
    }

    #[test]
    fn terminal_states_are_final() {
        let mut tracker = StageTracker::pipeline();
        tracker.activate("load");
        tracker.fail("load");
        assert!(!tracker.activate("load"));
        assert!(!tracker.complete("load"));
        assert_eq!(tracker.status("load"), Some(StageStatus::Error));
    }

    #[test]
    fn unknown_stage_is_rejected() {
        let mut tracker = StageTracker::pipeline();
        assert!(!tracker.activate("deploy"));
        assert_eq!(tracker.status("deploy"), None);
    }

    #[test]
    fn all_completed_reads_exactly_one() {
        let mut tracker = StageTracker::pipeline();
        for stage in PIPELINE_STAGES {
            tracker.activate(stage);
            tracker.complete(stage);
        }
        assert_eq!(tracker.progress(), 1.0);
    }

    #[test]
    fn progress_is_capped_below_done() {
        let mut tracker = StageTracker::pipeline();
        for stage in &PIPELINE_STAGES[..5] {
            tracker.activate(stage);
            tracker.complete(stage);
        }
        // five of six complete, nothing active: 5/6
        let p = tracker.progress();
        assert!((p - 5.0 / 6.0).abs() < 1e-9);

        tracker.activate("verify");
        assert!(tracker.progress() <= 0.99);

        tracker.mark_done();
        assert_eq!(tracker.progress(), 1.0);
    }

    #[test]
    fn active_stage_earns_bounded_bonus() {
        let mut tracker = StageTracker::pipeline();
        tracker.activate("load");
        let p = tracker.progress();
        // bonus never exceeds 30% of one stage's worth
        assert!(p >= 0.0);
        assert!(p <= BONUS_CAP / PIPELINE_STAGES.len() as f64 + 1e-9);
    }

    #[test]
    fn reset_reinitializes_everything() {
        let mut tracker = StageTracker::pipeline();
        tracker.activate("load");
        tracker.complete("load");
        let captured = tracker.timing("load");
        assert!(captured.is_some());

        tracker.reset();
        assert_eq!(tracker.status("load"), Some(StageStatus::Pending));
        assert!(tracker.timing("load").is_none());
        assert_eq!(tracker.progress(), 0.0);
        // the caller's captured duration is unaffected by reset
        assert!(captured.is_some());
    }

    #[test]
    fn skip_pending_marks_the_rest() {
        let mut tracker = StageTracker::pipeline();
        tracker.activate("load");
        tracker.complete("load");
        tracker.activate("compute");
        tracker.fail("compute");
        tracker.skip_pending();
        for stage in &PIPELINE_STAGES[2..] {
            assert_eq!(tracker.status(stage), Some(StageStatus::Skipped));
        }
    }

    #[test]
    fn observer_sees_every_transition() {
        let hits = Arc::new(AtomicUsize::new(0));
        let mut tracker = StageTracker::pipeline();
        let counter = hits.clone();
        tracker.set_observer(move |_stage, _status, _timing| {
            counter.fetch_add(1, Ordering::SeqCst);
        });
        tracker.activate("load");
        tracker.complete("load");
        tracker.activate("compute");
        tracker.skip("train");
        assert_eq!(hits.load(Ordering::SeqCst), 4);
    }
}
