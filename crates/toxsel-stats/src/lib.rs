//! Statistical primitives for patient-level feature screening.
//!
//! This crate holds the pure numerics used by the selection pipeline. Nothing
//! here knows about patients, folds or partitions; every function takes plain
//! slices and returns plain values, so the same routines serve both the per-fold
//! screening and the reference pass.
//!
//! - **Descriptive statistics**: min, max, mean, median, variance of a sample
//! - **Rank tests**: two-sided Mann–Whitney U with tie and continuity correction
//! - **Contingency tests**: Pearson chi-square test of independence
//! - **False discovery rate**: Benjamini–Hochberg step-up selection and adjusted p-values
//!
//! # Modules
//!
//! - [`descriptive`]: Descriptive statistics for summarizing samples
//! - [`rank`]: Rank-based two-group comparison
//! - [`contingency`]: Category × class contingency tables and the chi-square test
//! - [`fdr`]: Multiple-testing correction
//!
//! # Examples
//!
//! ## Comparing two groups
//!
//! ```
//! use toxsel_stats::rank::mann_whitney_u;
//!
//! let negatives = [1.0, 2.0, 3.0, 4.0, 5.0];
//! let positives = [6.0, 7.0, 8.0, 9.0, 10.0];
//! let result = mann_whitney_u(&negatives, &positives).unwrap();
//! assert!(result.p_value < 0.05);
//! ```
//!
//! ## Controlling the false discovery rate
//!
//! ```
//! use toxsel_stats::fdr::BenjaminiHochberg;
//!
//! let bh = BenjaminiHochberg::new(0.05).unwrap();
//! let selected = bh.select(&[0.001, 0.2, f64::NAN, 0.01]);
//! assert_eq!(selected, [true, false, false, true]);
//! ```

pub mod contingency;
pub mod descriptive;
pub mod fdr;
pub mod rank;
