//! Probability matrix helpers shared by the estimators and the set builder.
//!
//! Classifiers trained on a subset of the data may not have seen every
//! class; their outputs are realigned onto the global class ordering before
//! any score is computed, and every probability row is checked to sum to
//! one.

use ndarray::{Array1, Array2, ArrayView2, ArrayView3, Axis};

use crate::error::{ConformalError, Result};

/// Relative tolerance on the row sums of a probability matrix.
pub const PROBA_RTOL: f64 = 1e-5;

/// Simple standard scaler (per-column mean/std).
#[derive(Clone, Debug, PartialEq)]
pub struct Scaler {
    pub mean: Array1<f64>,
    pub std: Array1<f64>,
}

impl Scaler {
    /// Minimum stddev to avoid division by zero when transforming.
    const MIN_STD: f64 = 1e-6;

    /// Fit on `x` where rows are samples and columns are features.
    pub fn fit(x: ArrayView2<f64>) -> Result<Self> {
        let mean = x.mean_axis(Axis(0)).ok_or_else(|| {
            ConformalError::Shape("cannot fit a scaler on an empty matrix".to_string())
        })?;
        let std = x.std_axis(Axis(0), 0.0).mapv(|s| s.max(Self::MIN_STD));
        Ok(Scaler { mean, std })
    }

    pub fn transform(&self, x: ArrayView2<f64>) -> Array2<f64> {
        (&x - &self.mean) / &self.std
    }
}

fn check_row_sum(row: usize, sum: f64) -> Result<()> {
    if (sum - 1.0).abs() <= PROBA_RTOL {
        Ok(())
    } else {
        Err(ConformalError::UnnormalizedProbability { row, sum })
    }
}

/// Check that every row of a (n_samples, n_classes) matrix sums to one.
pub fn check_probabilities_normalized(probs: ArrayView2<f64>) -> Result<()> {
    for (row, values) in probs.axis_iter(Axis(0)).enumerate() {
        check_row_sum(row, values.sum())?;
    }
    Ok(())
}

/// Check a (n_samples, n_classes, m) tensor, summing over the class axis.
pub fn check_probabilities_normalized_3d(probs: ArrayView3<f64>) -> Result<()> {
    let sums = probs.sum_axis(Axis(1));
    for ((row, _), &sum) in sums.indexed_iter() {
        check_row_sum(row, sum)?;
    }
    Ok(())
}

/// Spread the columns of `probs` onto `target_k` classes.
///
/// `observed_classes[j]` is the global (encoded) index of column `j` of
/// `probs`. Classes the sub-model never saw get a zero probability.
///
/// # Arguments
///
/// * `target_k` - Number of classes in the global ordering.
/// * `observed_classes` - Encoded class index of each column of `probs`.
/// * `probs` - Probabilities of shape (n_samples, observed_classes.len()).
///
/// # Returns
///
/// A matrix of shape (n_samples, target_k).
pub fn align_class_count(
    target_k: usize,
    observed_classes: &[usize],
    probs: ArrayView2<f64>,
) -> Result<Array2<f64>> {
    if probs.ncols() != observed_classes.len() {
        return Err(ConformalError::Shape(format!(
            "{} probability columns for {} observed classes",
            probs.ncols(),
            observed_classes.len()
        )));
    }
    if let Some(&bad) = observed_classes.iter().find(|&&c| c >= target_k) {
        return Err(ConformalError::Shape(format!(
            "class index {} out of range for {} classes",
            bad, target_k
        )));
    }
    if observed_classes.len() == target_k
        && observed_classes.iter().enumerate().all(|(i, &c)| i == c)
    {
        return Ok(probs.to_owned());
    }

    let mut full = Array2::<f64>::zeros((probs.nrows(), target_k));
    for (j, &class) in observed_classes.iter().enumerate() {
        full.column_mut(class).assign(&probs.column(j));
    }
    Ok(full)
}
