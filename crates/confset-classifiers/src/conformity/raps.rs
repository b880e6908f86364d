//! Regularized adaptive prediction sets.
//!
//! RAPS penalizes every label ranked beyond `k_star` by `lambda` per extra
//! rank. `k_star` comes from the quantile of the true-label positions on a
//! held-out split; `lambda` is the grid value giving the smallest average
//! set size on that same split.
use ndarray::{Array1, Array2, ArrayView1, ArrayView2, Axis};

use crate::config::IncludeLastLabel;
use crate::conformity::scores::true_label_cumsum;
use crate::conformity::sets::cumulated_sets_mean;
use crate::error::{ConformalError, Result};
use crate::stats::{compute_quantiles, compute_quantiles_per_column, mean_set_size, EPSILON};

/// Candidate penalty weights, smallest first.
pub const LAMBDA_GRID: [f64; 5] = [0.001, 0.01, 0.1, 0.2, 0.5];

/// Regularization parameters chosen for one alpha.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RapsParams {
    pub lambda: f64,
    /// Rank after which the penalty applies (1-indexed).
    pub k_star: f64,
}

impl RapsParams {
    /// Penalty added to the cumulated score of the label at `rank` (1-indexed).
    pub fn penalty(&self, rank: usize) -> f64 {
        (self.lambda * (rank as f64 - self.k_star)).max(0.0)
    }
}

/// Add `max(0, lambda * (cutoff - k_star))` to every score, one column per
/// parameter set.
pub fn regularize_scores(
    scores: ArrayView1<f64>,
    cutoff: &[usize],
    params: &[RapsParams],
) -> Result<Array2<f64>> {
    if scores.len() != cutoff.len() {
        return Err(ConformalError::Shape(format!(
            "{} scores for {} cutoffs",
            scores.len(),
            cutoff.len()
        )));
    }
    let mut out = Array2::<f64>::zeros((scores.len(), params.len()));
    for ((i, j), value) in out.indexed_iter_mut() {
        *value = scores[i] + params[j].penalty(cutoff[i]);
    }
    Ok(out)
}

/// `k_star` per alpha: quantile of the 0-indexed true-label positions, plus one.
pub fn k_star_from_positions(positions: &[usize], alphas: &[f64]) -> Result<Vec<f64>> {
    let positions: Array1<f64> = positions.iter().map(|&p| p as f64).collect();
    Ok(compute_quantiles(positions.view(), alphas)?
        .iter()
        .map(|q| q + 1.0)
        .collect())
}

/// Pick `lambda` per alpha on the held-out split.
///
/// For each grid value the held-out true-label cumulated scores (without
/// randomization) are regularized, their quantile is taken and sets are
/// built on the held-out probabilities. A value is adopted when it lowers
/// the mean set size by more than `EPSILON`. Returns 0 for an alpha where
/// no value improved on the initial bound.
///
/// # Arguments
///
/// * `probs` - Held-out probabilities (n_raps, n_classes).
/// * `y` - Encoded held-out labels.
/// * `alphas` - Confidence levels.
/// * `k_star` - One rank threshold per alpha.
/// * `include_last_label` - Policy for the crossing label; randomized is
///   treated as included, no tie-breaking happens during the search.
pub fn find_lambda_star(
    probs: ArrayView2<f64>,
    y: &[usize],
    alphas: &[f64],
    k_star: &[f64],
    include_last_label: IncludeLastLabel,
) -> Result<Vec<f64>> {
    if k_star.len() != alphas.len() {
        return Err(ConformalError::Shape(format!(
            "{} k_star values for {} alpha values",
            k_star.len(),
            alphas.len()
        )));
    }
    let (mass, cutoff) = true_label_cumsum(probs, y)?;
    let mut lambda_star = vec![0.0; alphas.len()];
    let mut best_sizes = vec![f64::MAX; alphas.len()];

    for &lambda in LAMBDA_GRID.iter() {
        let params: Vec<RapsParams> = k_star
            .iter()
            .map(|&k_star| RapsParams { lambda, k_star })
            .collect();
        let regularized = regularize_scores(mass.view(), &cutoff, &params)?;
        let quantiles = compute_quantiles_per_column(regularized.view(), alphas)?;
        let sets = cumulated_sets_mean(
            probs,
            &quantiles.to_vec(),
            include_last_label,
            Some(params.as_slice()),
            None,
        )?;

        for (a, sets_a) in sets.axis_iter(Axis(2)).enumerate() {
            let size = mean_set_size(sets_a);
            if size < best_sizes[a] - EPSILON {
                lambda_star[a] = lambda;
                best_sizes[a] = size;
            }
        }
        log::trace!("RAPS lambda {} gives mean set sizes {:?}", lambda, best_sizes);
    }
    Ok(lambda_star)
}
