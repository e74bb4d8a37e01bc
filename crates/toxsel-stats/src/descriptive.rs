/// Descriptive statistics summarizing a sample.
///
/// This structure contains common measures of central tendency and dispersion
/// for a sample of `f64` values. Missing values must be removed by the caller.
#[derive(Debug, Clone, PartialEq)]
pub struct DescriptiveStats {
    /// Number of values in the sample.
    pub count: usize,
    /// The minimum value in the sample.
    pub min: f64,
    /// The maximum value in the sample.
    pub max: f64,
    /// The arithmetic mean of the sample.
    pub mean: f64,
    /// The median of the sample (mean of the two middle values for even counts).
    pub median: f64,
    /// The population variance of the sample (`ddof = 0`).
    pub variance: f64,
    /// The population standard deviation of the sample.
    pub std_dev: f64,
}

impl DescriptiveStats {
    /// Computes descriptive statistics from unsorted values.
    ///
    /// This method will sort the values internally before computing statistics.
    ///
    /// # Returns
    ///
    /// * `Some(DescriptiveStats)` - if the sample contains at least one value
    /// * `None` - if the sample is empty
    ///
    /// # Examples
    ///
    /// ```
    /// # use toxsel_stats::descriptive::DescriptiveStats;
    /// let values = [5.0, 2.0, 4.0, 1.0, 3.0, 6.0];
    /// let stats = DescriptiveStats::new(values).unwrap();
    /// assert_eq!(stats.min, 1.0);
    /// assert_eq!(stats.max, 6.0);
    /// assert_eq!(stats.mean, 3.5);
    /// assert_eq!(stats.median, 3.5);
    /// ```
    #[must_use]
    pub fn new<I>(values: I) -> Option<Self>
    where
        I: IntoIterator<Item = f64>,
    {
        let mut values = values.into_iter().collect::<Vec<_>>();
        values.sort_by(f64::total_cmp);
        Self::from_sorted(&values)
    }

    /// Computes descriptive statistics from pre-sorted values.
    ///
    /// # Panics
    ///
    /// Panics if `sorted_values` is not sorted in ascending order.
    #[expect(clippy::cast_precision_loss)]
    #[must_use]
    pub fn from_sorted(sorted_values: &[f64]) -> Option<Self> {
        assert!(
            sorted_values.is_sorted_by(|a, b| a <= b),
            "values must be sorted in ascending order"
        );

        let min = *sorted_values.first()?;
        let max = *sorted_values.last()?;
        let count = sorted_values.len();
        let n = count as f64;
        let mean = sorted_values.iter().sum::<f64>() / n;
        let median = median_of_sorted(sorted_values)?;
        let variance = sorted_values
            .iter()
            .map(|v| (v - mean).powi(2))
            .sum::<f64>()
            / n;

        Some(Self {
            count,
            min,
            max,
            mean,
            median,
            variance,
            std_dev: variance.sqrt(),
        })
    }

    /// Returns `true` if every value in the sample is identical.
    #[must_use]
    pub fn is_constant(&self) -> bool {
        self.min == self.max
    }
}

/// Median of an ascending slice, or `None` if it is empty.
#[must_use]
pub fn median_of_sorted(sorted_values: &[f64]) -> Option<f64> {
    let len = sorted_values.len();
    if len == 0 {
        return None;
    }
    let mid = len / 2;
    if len % 2 == 1 {
        Some(sorted_values[mid])
    } else {
        Some(f64::midpoint(sorted_values[mid - 1], sorted_values[mid]))
    }
}
