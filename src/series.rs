//! Value-series helpers: digests and extrema.
//!
//! A digest is an opaque, order-preserving key over a series (or its
//! trailing window). Two series with the same values in a different order
//! hash differently, which is what the dedup caches rely on.

use sha2::{Digest, Sha256};

/// SHA-256 over the little-endian bit patterns of the series, hex-encoded.
pub fn digest(series: &[f64]) -> String {
    let mut hasher = Sha256::new();
    for value in series {
        hasher.update(value.to_le_bytes());
    }
    hex::encode(hasher.finalize())
}

/// Digest of the trailing `window` points (the whole series when shorter).
pub fn digest_tail(series: &[f64], window: usize) -> String {
    let start = series.len().saturating_sub(window);
    digest(&series[start..])
}

/// Global minimum and maximum, `None` for an empty series.
pub fn min_max(series: &[f64]) -> Option<(f64, f64)> {
    let first = *series.first()?;
    let mut min = first;
    let mut max = first;
    for &v in &series[1..] {
        min = min.min(v);
        max = max.max(v);
    }
    Some((min, max))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn digest_is_order_preserving() {
        let a = digest(&[1.0, 2.0, 3.0]);
        let b = digest(&[3.0, 2.0, 1.0]);
        assert_ne!(a, b);
        assert_eq!(a, digest(&[1.0, 2.0, 3.0]));
    }

    #[test]
    fn digest_tail_uses_trailing_window() {
        let series: Vec<f64> = (0..100).map(|i| i as f64).collect();
        assert_eq!(digest_tail(&series, 50), digest(&series[50..]));
        // shorter than the window: whole series
        assert_eq!(digest_tail(&series[..10], 50), digest(&series[..10]));
    }

    #[test]
    fn min_max_handles_edges() {
        assert_eq!(min_max(&[]), None);
        assert_eq!(min_max(&[4.0]), Some((4.0, 4.0)));
        assert_eq!(min_max(&[2.0, -5.0, 9.0]), Some((-5.0, 9.0)));
    }
}
