use ndarray::{Array1, ArrayView1, ArrayView2, ArrayView3, Axis};

use crate::error::{ConformalError, Result};

/// Tolerance used by every floating point comparison in the crate.
pub const EPSILON: f64 = 1e-8;

/// Guard against `(n + 1) * (1 - alpha)` landing a hair above an integer.
const RANK_GUARD: f64 = 1e-9;

/// Validate a list of confidence levels for prediction.
///
/// Every alpha must lie in the open interval (0, 1) and the list must not
/// be empty.
pub fn check_alpha(alphas: &[f64]) -> Result<Array1<f64>> {
    if alphas.is_empty() {
        return Err(ConformalError::InvalidAlpha(
            "at least one alpha value is required".to_string(),
        ));
    }
    for &alpha in alphas {
        if !(alpha > 0.0 && alpha < 1.0) {
            return Err(ConformalError::InvalidAlpha(format!(
                "{} is not between 0 and 1 (excluded)",
                alpha
            )));
        }
    }
    Ok(Array1::from_vec(alphas.to_vec()))
}

/// Reject alphas for which `n` calibration scores cannot support a
/// meaningful quantile, i.e. `n < 1/alpha` or `n < 1/(1-alpha)`.
pub fn check_alpha_and_n_samples(alphas: &[f64], n: usize) -> Result<()> {
    let n_f = n as f64;
    for &alpha in alphas {
        if n_f < 1.0 / alpha || n_f < 1.0 / (1.0 - alpha) {
            return Err(ConformalError::InvalidAlpha(format!(
                "number of samples of the score is too low ({}) for alpha {}; \
                 1/alpha (or 1/(1 - alpha)) must be lower than the number of samples",
                n, alpha
            )));
        }
    }
    Ok(())
}

/// 1-indexed rank of the conservative quantile, clipped to [1, n].
fn corrected_rank(n: usize, alpha: f64) -> usize {
    let raw = ((n + 1) as f64 * (1.0 - alpha) - RANK_GUARD).ceil();
    (raw.max(1.0) as usize).min(n)
}

fn check_quantile_alpha(alpha: f64) -> Result<()> {
    if (0.0..=1.0).contains(&alpha) {
        Ok(())
    } else {
        Err(ConformalError::InvalidAlpha(format!(
            "{} is not between 0 and 1",
            alpha
        )))
    }
}

fn sorted_scores(scores: ArrayView1<f64>) -> Vec<f64> {
    let mut sorted = scores.to_vec();
    sorted.sort_by(|a, b| a.total_cmp(b));
    sorted
}

/// Conservative finite-sample quantiles of conformity scores.
///
/// For each alpha the returned threshold is the `r`-th smallest score with
/// `r = ceil((n + 1)(1 - alpha))`, clipped to `[1, n]`. The boundary values
/// alpha = 0 and alpha = 1 are accepted and give the maximum and minimum
/// score respectively.
///
/// # Arguments
///
/// * `scores` - Conformity scores of the calibration samples.
/// * `alphas` - Confidence levels, each in [0, 1].
///
/// # Returns
///
/// One threshold per alpha, in the order of `alphas`.
pub fn compute_quantiles(scores: ArrayView1<f64>, alphas: &[f64]) -> Result<Array1<f64>> {
    if scores.is_empty() {
        return Err(ConformalError::Shape(
            "cannot compute quantiles of an empty score array".to_string(),
        ));
    }
    let sorted = sorted_scores(scores);
    alphas
        .iter()
        .map(|&alpha| {
            check_quantile_alpha(alpha)?;
            Ok(sorted[corrected_rank(sorted.len(), alpha) - 1])
        })
        .collect()
}

/// Same as [`compute_quantiles`] but column `j` of `scores` is used for
/// `alphas[j]`. Used when the scores themselves depend on alpha.
pub fn compute_quantiles_per_column(scores: ArrayView2<f64>, alphas: &[f64]) -> Result<Array1<f64>> {
    if scores.ncols() != alphas.len() {
        return Err(ConformalError::Shape(format!(
            "{} score columns for {} alpha values",
            scores.ncols(),
            alphas.len()
        )));
    }
    alphas
        .iter()
        .zip(scores.axis_iter(Axis(1)))
        .map(|(&alpha, column)| Ok(compute_quantiles(column, &[alpha])?[0]))
        .collect()
}

/// Average number of labels per prediction set.
pub fn mean_set_size(sets: ArrayView2<bool>) -> f64 {
    if sets.nrows() == 0 {
        return 0.0;
    }
    let total: usize = sets.iter().filter(|&&included| included).count();
    total as f64 / sets.nrows() as f64
}

/// Average set size per alpha for a (n_samples, n_classes, n_alpha) tensor.
pub fn mean_set_sizes(sets: ArrayView3<bool>) -> Array1<f64> {
    sets.axis_iter(Axis(2))
        .map(mean_set_size)
        .collect()
}

/// Fraction of samples whose (encoded) true label belongs to its set.
pub fn coverage_score(y_true: &[usize], sets: ArrayView2<bool>) -> f64 {
    if y_true.is_empty() {
        return 0.0;
    }
    let covered = y_true
        .iter()
        .enumerate()
        .filter(|&(i, &label)| sets[(i, label)])
        .count();
    covered as f64 / y_true.len() as f64
}
