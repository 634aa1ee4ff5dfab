//! N/B bit transform: maps a value series onto a synthetic distribution and
//! reads off a bounded scalar.
//!
//! The series is expanded into `SUBDIVISIONS` synthetic steps per element.
//! Each step carries a pair of value-space bounds (B50/B100) walked by the
//! global increments, and a pair of baseline-scaled mass bounds (A50/A100)
//! whose weighted form `NBA100 = A100 / (N - 1)` is what actually
//! accumulates. An element contributes the weight of the first step whose
//! [B50, B100] interval contains it.
//!
//! Results outside [-100, 100] (or non-finite) are swallowed: the caller
//! gets the last known-good value from the shared fallback cell and the
//! cell keeps its prior state.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use crate::logging::{json_log, obj, v_num, v_str, Domain};
use crate::series::min_max;

/// Synthetic steps per input element.
pub const SUBDIVISIONS: usize = 150;

/// Default baseline passed by callers that have no configured override.
pub const DEFAULT_BASELINE: f64 = 5.5;

const RESULT_LIMIT: f64 = 100.0;

/// Process-wide "last good scalar", shared by the forward and reverse
/// wrappers. Injectable so tests can reset it between cases. Stored as f64
/// bits in an atomic; there is one logical thread, the atomic is just the
/// cheapest interior-mutable cell that is also `Send + Sync`.
#[derive(Debug, Clone)]
pub struct FallbackCell {
    bits: Arc<AtomicU64>,
}

impl FallbackCell {
    pub fn new() -> Self {
        Self {
            bits: Arc::new(AtomicU64::new(0.0_f64.to_bits())),
        }
    }

    pub fn get(&self) -> f64 {
        f64::from_bits(self.bits.load(Ordering::Relaxed))
    }

    pub fn set(&self, value: f64) {
        self.bits.store(value.to_bits(), Ordering::Relaxed);
    }

    pub fn reset(&self) {
        self.set(0.0);
    }
}

impl Default for FallbackCell {
    fn default() -> Self {
        Self::new()
    }
}

#[derive(Debug, Clone, Copy)]
#[allow(dead_code)]
struct SyntheticBound {
    a50: f64,
    a100: f64,
    b50: f64,
    b100: f64,
}

impl SyntheticBound {
    /// Containment over the order-normalized [B50, B100] interval; for
    /// negative elements the pair descends, so normalize before comparing.
    fn contains(&self, value: f64) -> bool {
        let lo = self.b50.min(self.b100);
        let hi = self.b50.max(self.b100);
        value >= lo && value <= hi
    }
}

/// Core transform. A series shorter than two points returns the defined
/// degenerate value `baseline / 100` without touching the fallback cell.
pub fn compute_bounds(series: &[f64], baseline: f64, reversed: bool, fallback: &FallbackCell) -> f64 {
    let n = series.len();
    if n < 2 {
        return baseline / 100.0;
    }

    let total = n * SUBDIVISIONS;
    let (min, max) = match min_max(series) {
        Some(pair) => pair,
        None => return baseline / 100.0,
    };
    let denom = (total - 1) as f64;
    let neg_increment = if min < 0.0 { min.abs() / denom } else { 0.0 };
    let pos_increment = if max > 0.0 { max / denom } else { 0.0 };
    let mass_step = baseline / total as f64;

    let mut bounds = Vec::with_capacity(total);
    let mut weights = Vec::with_capacity(total);
    for k in 0..total {
        let element = series[k / SUBDIVISIONS];
        let (increment, sign) = if element >= 0.0 {
            (pos_increment, 1.0)
        } else {
            (neg_increment, -1.0)
        };
        let b100 = sign * increment * (k + 1) as f64;
        let a100 = sign * mass_step * (k + 1) as f64;
        let step = SyntheticBound {
            a50: a100 * 0.5,
            a100,
            b50: b100 * 0.5,
            b100,
        };
        weights.push(step.a100 / (n - 1) as f64);
        bounds.push(step);
    }

    // Time-reversed reading: reorder the weighted contributions before the
    // accumulation pass, never inside it.
    if reversed {
        weights.reverse();
    }

    let mut accumulated = 0.0;
    for &value in series {
        for (bound, weight) in bounds.iter().zip(weights.iter()) {
            if bound.contains(value) {
                accumulated += weight;
                break;
            }
        }
    }

    // Two-point series read as a stability inverse of the raw sum.
    let result = if n == 2 { baseline - accumulated } else { accumulated };

    if !result.is_finite() || result.abs() > RESULT_LIMIT {
        let substitute = fallback.get();
        json_log(
            Domain::Transform,
            "fallback_substituted",
            obj(&[
                ("computed", v_str(&format!("{}", result))),
                ("substitute", v_num(substitute)),
                ("reversed", crate::logging::v_bool(reversed)),
            ]),
        );
        return substitute;
    }
    fallback.set(result);
    result
}

/// Forward reading: max-oriented extreme.
pub fn compute_upper_extreme(series: &[f64], baseline: f64, fallback: &FallbackCell) -> f64 {
    compute_bounds(series, baseline, false, fallback)
}

/// Reversed reading: min-oriented extreme.
pub fn compute_lower_extreme(series: &[f64], baseline: f64, fallback: &FallbackCell) -> f64 {
    compute_bounds(series, baseline, true, fallback)
}
