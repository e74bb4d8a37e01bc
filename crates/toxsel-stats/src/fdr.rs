//! False discovery rate control.
//!
//! [`BenjaminiHochberg`] turns a vector of raw p-values into selection flags
//! with the step-up procedure. `NaN` p-values mark tests that could not be
//! computed; they are excluded from the ranking entirely, so the number of
//! hypotheses `m` counts only the valid p-values, and they are never selected.
//!
//! Because selection at level `q` is the prefix of the sorted valid p-values up
//! to the largest rank `k` with `p(k) <= k·q/m`, raising `q` can only extend that
//! prefix. Several levels can therefore be evaluated over the same p-values
//! without re-running the underlying tests.

use std::cmp::Ordering;

#[derive(Debug, derive_more::Display, derive_more::Error)]
#[display("FDR level must lie in (0, 1), got {q}")]
pub struct InvalidFdrLevel {
    pub q: f64,
}

/// Benjamini–Hochberg step-up procedure at a fixed level `q`.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct BenjaminiHochberg {
    q: f64,
}

impl BenjaminiHochberg {
    pub const DEFAULT_Q: f64 = 0.05;

    pub fn new(q: f64) -> Result<Self, InvalidFdrLevel> {
        if q > 0.0 && q < 1.0 {
            Ok(Self { q })
        } else {
            Err(InvalidFdrLevel { q })
        }
    }

    #[must_use]
    pub fn q(&self) -> f64 {
        self.q
    }

    /// Returns one flag per input p-value; `NaN` entries are always `false`.
    #[expect(clippy::cast_precision_loss)]
    #[must_use]
    pub fn select(&self, p_values: &[f64]) -> Vec<bool> {
        let order = valid_order(p_values);
        let m = order.len() as f64;

        let cutoff_rank = order
            .iter()
            .enumerate()
            .rev()
            .find(|&(rank, &idx)| p_values[idx] <= (rank + 1) as f64 * self.q / m)
            .map(|(rank, _)| rank + 1);

        let mut selected = vec![false; p_values.len()];
        if let Some(cutoff_rank) = cutoff_rank {
            for &idx in &order[..cutoff_rank] {
                selected[idx] = true;
            }
        }
        selected
    }
}

impl Default for BenjaminiHochberg {
    fn default() -> Self {
        Self { q: Self::DEFAULT_Q }
    }
}

/// Benjamini–Hochberg adjusted p-values.
///
/// The adjusted value of a hypothesis is the smallest `q` at which it would be
/// selected. `NaN` inputs stay `NaN` and do not count towards `m`.
///
/// # Examples
///
/// ```
/// # use toxsel_stats::fdr::adjusted_p_values;
/// let adjusted = adjusted_p_values(&[0.01, 0.04, f64::NAN, 0.03]);
/// assert!((adjusted[0] - 0.03).abs() < 1e-12);
/// assert!((adjusted[1] - 0.04).abs() < 1e-12);
/// assert!(adjusted[2].is_nan());
/// assert!((adjusted[3] - 0.04).abs() < 1e-12);
/// ```
#[expect(clippy::cast_precision_loss)]
#[must_use]
pub fn adjusted_p_values(p_values: &[f64]) -> Vec<f64> {
    let order = valid_order(p_values);
    let m = order.len() as f64;

    let mut adjusted = vec![f64::NAN; p_values.len()];
    let mut running_min = 1.0_f64;
    for (rank, &idx) in order.iter().enumerate().rev() {
        let value = p_values[idx] * m / (rank + 1) as f64;
        running_min = running_min.min(value);
        adjusted[idx] = running_min;
    }
    adjusted
}

/// Indices of the non-`NaN` p-values, sorted ascending by p-value then index.
fn valid_order(p_values: &[f64]) -> Vec<usize> {
    let mut order = p_values
        .iter()
        .enumerate()
        .filter(|(_, p)| !p.is_nan())
        .map(|(idx, _)| idx)
        .collect::<Vec<_>>();
    order.sort_by(|&a, &b| {
        p_values[a]
            .partial_cmp(&p_values[b])
            .unwrap_or(Ordering::Equal)
            .then(a.cmp(&b))
    });
    order
}
