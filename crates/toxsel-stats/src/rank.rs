//! Rank-based two-group comparison.
//!
//! The Mann–Whitney U test compares the rank distribution of a feature between
//! two label classes. It makes no normality assumption and is insensitive to
//! monotone transformations and outliers, which suits laboratory values and
//! ordinal scores alike.
//!
//! The p-value uses the large-sample normal approximation with a tie
//! correction on the variance and a continuity correction on the statistic.

use std::f64::consts::SQRT_2;

use statrs::function::erf::erfc;

/// Result of a two-sided Mann–Whitney U test.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct MannWhitneyResult {
    /// U statistic of the first group.
    pub u_statistic: f64,
    /// Standardized statistic after continuity correction.
    pub z_score: f64,
    /// Two-sided p-value.
    pub p_value: f64,
}

/// Assigns average ranks (1-based) to `values`, resolving ties by the mean rank.
///
/// Returns the ranks in the original order and the tie term `Σ(t³ − t)`
/// over all groups of tied values.
#[expect(clippy::cast_precision_loss)]
#[must_use]
pub fn average_ranks(values: &[f64]) -> (Vec<f64>, f64) {
    let mut order = (0..values.len()).collect::<Vec<_>>();
    order.sort_by(|&a, &b| values[a].total_cmp(&values[b]));

    let mut ranks = vec![0.0; values.len()];
    let mut tie_term = 0.0;
    let mut i = 0;
    while i < order.len() {
        let mut j = i;
        while j + 1 < order.len() && values[order[j + 1]] == values[order[i]] {
            j += 1;
        }
        let rank = (i + j + 2) as f64 / 2.0;
        for &idx in &order[i..=j] {
            ranks[idx] = rank;
        }
        let t = (j - i + 1) as f64;
        tie_term += t * t * t - t;
        i = j + 1;
    }
    (ranks, tie_term)
}

/// Two-sided Mann–Whitney U test between `first` and `second`.
///
/// # Returns
///
/// * `Some(result)` - if both groups are non-empty and the pooled sample is not constant
/// * `None` - if the statistic is undefined (an empty group or zero variance)
///
/// # Examples
///
/// ```
/// # use toxsel_stats::rank::mann_whitney_u;
/// let result = mann_whitney_u(&[1.0, 2.0, 3.0], &[1.0, 2.0, 3.0]).unwrap();
/// assert!(result.p_value > 0.9);
///
/// assert!(mann_whitney_u(&[4.0, 4.0], &[4.0]).is_none());
/// ```
#[expect(clippy::cast_precision_loss)]
#[must_use]
pub fn mann_whitney_u(first: &[f64], second: &[f64]) -> Option<MannWhitneyResult> {
    if first.is_empty() || second.is_empty() {
        return None;
    }
    let n1 = first.len() as f64;
    let n2 = second.len() as f64;
    let n = n1 + n2;

    let pooled = first.iter().chain(second).copied().collect::<Vec<_>>();
    let (ranks, tie_term) = average_ranks(&pooled);
    let rank_sum_first = ranks[..first.len()].iter().sum::<f64>();

    let u1 = rank_sum_first - n1 * (n1 + 1.0) / 2.0;
    let u_max = u1.max(n1 * n2 - u1);
    let mean_u = n1 * n2 / 2.0;
    let variance = n1 * n2 / 12.0 * ((n + 1.0) - tie_term / (n * (n - 1.0)));
    if variance <= f64::EPSILON * n * n || !variance.is_finite() {
        return None;
    }

    let z_score = (u_max - mean_u - 0.5) / variance.sqrt();
    let p_value = erfc(z_score / SQRT_2).clamp(0.0, 1.0);
    Some(MannWhitneyResult {
        u_statistic: u1,
        z_score,
        p_value,
    })
}
