//! Small numeric helpers shared by the evaluators

/// z value used by the Wilson score interval (95%)
pub const WS_Z: f64 = 1.96;

/// Euler–Mascheroni constant, used by the isolation depth estimate
pub const EULER_GAMMA: f64 = 0.5772156649;

/// Lower bound of the Wilson score interval for `count` successes out of `total`
pub fn ws_confidence(count: f64, total: f64) -> f64 {
    if total <= 0.0 {
        return 0.0;
    }
    let p = count / total;
    let z2 = WS_Z * WS_Z;
    let factor = z2 / total;
    let root = ((p * (1.0 - p) + factor / 4.0) / total).sqrt();
    ((p + factor / 2.0 - WS_Z * root) / (1.0 + factor)).clamp(0.0, 1.0)
}

/// Weighted mean of `(value, weight)` pairs; `None` when the weights sum to zero
pub fn weighted_mean(pairs: impl IntoIterator<Item = (f64, f64)>) -> Option<f64> {
    let (sum, weight) = pairs
        .into_iter()
        .fold((0.0, 0.0), |(s, w), (value, weight)| (s + value * weight, w + weight));
    if weight > 0.0 {
        Some(sum / weight)
    } else {
        None
    }
}

/// Expected path length of an unsuccessful search in a binary tree of `n` points
///
/// This is the isolation-forest normalisation constant `c(n)`. A single point
/// isolates in one step, so `n <= 1` yields 1.
pub fn expected_isolation_depth(n: f64) -> f64 {
    if n <= 1.0 {
        return 1.0;
    }
    2.0 * ((n - 1.0).ln() + EULER_GAMMA) - 2.0 * (n - 1.0) / n
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_ws_confidence_bounds() {
        assert_eq!(ws_confidence(0.0, 0.0), 0.0);
        let c = ws_confidence(50.0, 50.0);
        assert!(c > 0.9 && c < 1.0);
        let low = ws_confidence(1.0, 100.0);
        assert!(low >= 0.0 && low < 0.05);
    }

    #[test]
    fn test_weighted_mean() {
        assert_eq!(weighted_mean([(1.0, 1.0), (3.0, 1.0)]), Some(2.0));
        assert_eq!(weighted_mean([(1.0, 3.0), (5.0, 1.0)]), Some(2.0));
        assert_eq!(weighted_mean([(1.0, 0.0)]), None);
    }

    #[test]
    fn test_expected_isolation_depth() {
        let c = expected_isolation_depth(256.0);
        assert!((c - 10.2448).abs() < 1e-3);
        assert_eq!(expected_isolation_depth(1.0), 1.0);
        assert_eq!(expected_isolation_depth(0.0), 1.0);
    }
}
