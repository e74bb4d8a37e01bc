//! Category × class contingency tables and the Pearson chi-square test.
//!
//! Categorical features are compared against a binary label through a
//! `categories × 2` table of counts. Categories with no observations never
//! appear in the table, so the degrees of freedom always reflect the levels
//! actually seen in the rows being tested.

use std::collections::BTreeMap;

use statrs::function::gamma::gamma_ur;

/// Observed counts per category for the negative and positive class.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ContingencyTable {
    /// Category → `[negative_count, positive_count]`, ordered by category.
    counts: BTreeMap<String, [usize; 2]>,
}

/// Result of a chi-square test of independence.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ChiSquareResult {
    pub statistic: f64,
    pub degrees_of_freedom: usize,
    pub p_value: f64,
    /// Whether the Yates continuity correction was applied (2×2 tables only).
    pub yates_corrected: bool,
}

impl ContingencyTable {
    /// Builds a table from `(category, is_positive)` observations.
    ///
    /// # Examples
    ///
    /// ```
    /// # use toxsel_stats::contingency::ContingencyTable;
    /// let table = ContingencyTable::from_observations([("a", false), ("a", true), ("b", true)]);
    /// assert_eq!(table.num_categories(), 2);
    /// assert_eq!(table.total(), 3);
    /// ```
    #[must_use]
    pub fn from_observations<'a, I>(observations: I) -> Self
    where
        I: IntoIterator<Item = (&'a str, bool)>,
    {
        let mut table = Self::default();
        for (category, positive) in observations {
            table.add(category, positive);
        }
        table
    }

    pub fn add(&mut self, category: &str, positive: bool) {
        let entry = self.counts.entry(category.to_owned()).or_insert([0, 0]);
        entry[usize::from(positive)] += 1;
    }

    #[must_use]
    pub fn num_categories(&self) -> usize {
        self.counts.len()
    }

    #[must_use]
    pub fn total(&self) -> usize {
        self.counts.values().map(|[neg, pos]| neg + pos).sum()
    }

    /// Column totals `[negative, positive]`.
    #[must_use]
    pub fn class_totals(&self) -> [usize; 2] {
        self.counts
            .values()
            .fold([0, 0], |[n, p], [neg, pos]| [n + neg, p + pos])
    }

    /// Pearson chi-square test of independence between category and class.
    ///
    /// The Yates continuity correction is applied when the table has one degree
    /// of freedom.
    ///
    /// # Returns
    ///
    /// * `Some(result)` - if the table has at least two categories and both classes are observed
    /// * `None` - if the statistic is undefined
    #[expect(clippy::cast_precision_loss)]
    #[must_use]
    pub fn chi_square(&self) -> Option<ChiSquareResult> {
        let class_totals = self.class_totals();
        if self.counts.len() < 2 || class_totals.contains(&0) {
            return None;
        }
        let total = self.total() as f64;
        let degrees_of_freedom = self.counts.len() - 1;
        let yates_corrected = degrees_of_freedom == 1;

        let mut statistic = 0.0;
        for row in self.counts.values() {
            let row_total = (row[0] + row[1]) as f64;
            for (observed, class_total) in row.iter().zip(class_totals) {
                let expected = row_total * class_total as f64 / total;
                let mut diff = (*observed as f64 - expected).abs();
                if yates_corrected {
                    diff = (diff - 0.5).max(0.0);
                }
                statistic += diff * diff / expected;
            }
        }

        Some(ChiSquareResult {
            statistic,
            degrees_of_freedom,
            p_value: chi_square_sf(statistic, degrees_of_freedom),
            yates_corrected,
        })
    }
}

/// Upper tail `P(X > x)` of a chi-square distribution with `df` degrees of freedom.
#[expect(clippy::cast_precision_loss)]
#[must_use]
pub fn chi_square_sf(x: f64, df: usize) -> f64 {
    if x <= 0.0 || df == 0 {
        return 1.0;
    }
    gamma_ur(df as f64 / 2.0, x / 2.0).clamp(0.0, 1.0)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn table(rows: &[(&str, usize, usize)]) -> ContingencyTable {
        let mut table = ContingencyTable::default();
        for &(category, neg, pos) in rows {
            for _ in 0..neg {
                table.add(category, false);
            }
            for _ in 0..pos {
                table.add(category, true);
            }
        }
        table
    }

    #[test]
    fn test_two_by_two_with_yates() {
        let result = table(&[("a", 10, 2), ("b", 3, 9)]).chi_square().unwrap();
        assert!(result.yates_corrected);
        assert_eq!(result.degrees_of_freedom, 1);
        assert!((result.statistic - 6.041_958).abs() < 1e-5);
        assert!((result.p_value - 0.013_970).abs() < 1e-5);
    }

    #[test]
    fn test_three_levels() {
        let result = table(&[("a", 5, 1), ("b", 2, 6), ("c", 3, 3)])
            .chi_square()
            .unwrap();
        assert!(!result.yates_corrected);
        assert_eq!(result.degrees_of_freedom, 2);
        assert!((result.statistic - 4.666_667).abs() < 1e-5);
        assert!((result.p_value - 0.096_972).abs() < 1e-5);
    }

    #[test]
    fn test_single_category_is_undefined() {
        assert!(table(&[("a", 4, 3)]).chi_square().is_none());
    }

    #[test]
    fn test_single_class_is_undefined() {
        assert!(table(&[("a", 4, 0), ("b", 2, 0)]).chi_square().is_none());
    }
}
