use ndarray::{Array1, ArrayView1, ArrayView2, Axis};
use rand::Rng;

use crate::config::Method;
use crate::error::{ConformalError, Result};

/// Class indices of `row` by decreasing probability, ties by ascending index.
pub fn descending_order(row: ArrayView1<f64>) -> Vec<usize> {
    let mut order: Vec<usize> = (0..row.len()).collect();
    order.sort_by(|&a, &b| row[b].total_cmp(&row[a]));
    order
}

/// 0-indexed position of `label` in the descending order of `row`.
fn position_of(row: ArrayView1<f64>, label: usize) -> usize {
    descending_order(row)
        .iter()
        .position(|&c| c == label)
        .unwrap_or(row.len())
}

fn check_labels(probs: ArrayView2<f64>, y: &[usize]) -> Result<()> {
    if probs.nrows() != y.len() {
        return Err(ConformalError::Shape(format!(
            "{} probability rows for {} labels",
            probs.nrows(),
            y.len()
        )));
    }
    if let Some(&bad) = y.iter().find(|&&label| label >= probs.ncols()) {
        return Err(ConformalError::Shape(format!(
            "encoded label {} out of range for {} classes",
            bad,
            probs.ncols()
        )));
    }
    Ok(())
}

/// `1 - p(true label)` per sample.
pub fn lac_scores(probs: ArrayView2<f64>, y: &[usize]) -> Result<Array1<f64>> {
    check_labels(probs, y)?;
    Ok(y.iter().enumerate().map(|(i, &label)| 1.0 - probs[(i, label)]).collect())
}

/// Cumulated sorted probability up to and including the true label.
///
/// # Returns
///
/// `(cumulated mass, 1-indexed rank of the true label)` per sample.
pub fn true_label_cumsum(probs: ArrayView2<f64>, y: &[usize]) -> Result<(Array1<f64>, Vec<usize>)> {
    check_labels(probs, y)?;
    let mut mass = Array1::<f64>::zeros(y.len());
    let mut cutoff = Vec::with_capacity(y.len());
    for (i, (row, &label)) in probs.axis_iter(Axis(0)).zip(y).enumerate() {
        let mut cum = 0.0;
        for (rank, &class) in descending_order(row).iter().enumerate() {
            cum += row[class];
            if class == label {
                mass[i] = cum;
                cutoff.push(rank + 1);
                break;
            }
        }
    }
    Ok((mass, cutoff))
}

/// 0-indexed position of the true label in each sorted row.
pub fn true_label_positions(probs: ArrayView2<f64>, y: &[usize]) -> Result<Vec<usize>> {
    check_labels(probs, y)?;
    Ok(probs
        .axis_iter(Axis(0))
        .zip(y)
        .map(|(row, &label)| position_of(row, label))
        .collect())
}

/// Calibration conformity scores, one variant per score family.
#[derive(Debug, Clone, PartialEq)]
pub enum ConformityScores {
    /// Thresholds are `1 - alpha`; only the calibration size is kept.
    Naive { n_samples: usize },
    /// `1 - p(true label)`.
    Lac(Array1<f64>),
    /// Randomized cumulated score and 1-indexed true-label rank (APS, RAPS).
    Cumulated { scores: Array1<f64>, cutoff: Vec<usize> },
    /// 1-indexed rank of the true label.
    TopK(Array1<f64>),
}

impl ConformityScores {
    /// Compute the scores of `method` on calibration probabilities.
    ///
    /// Cumulated scores subtract `U * p(true label)` with one uniform draw
    /// per sample taken from `rng`.
    pub fn compute<R: Rng + ?Sized>(
        method: Method,
        probs: ArrayView2<f64>,
        y: &[usize],
        rng: &mut R,
    ) -> Result<Self> {
        match method {
            Method::Naive => {
                check_labels(probs, y)?;
                Ok(ConformityScores::Naive { n_samples: y.len() })
            }
            Method::Lac => Ok(ConformityScores::Lac(lac_scores(probs, y)?)),
            Method::Aps | Method::Raps { .. } => {
                let (mut scores, cutoff) = true_label_cumsum(probs, y)?;
                for (i, &label) in y.iter().enumerate() {
                    let u: f64 = rng.gen();
                    scores[i] -= u * probs[(i, label)];
                }
                Ok(ConformityScores::Cumulated { scores, cutoff })
            }
            Method::TopK => {
                let ranks = true_label_positions(probs, y)?
                    .into_iter()
                    .map(|p| (p + 1) as f64)
                    .collect();
                Ok(ConformityScores::TopK(ranks))
            }
        }
    }

    /// Number of calibration samples the scores were computed on.
    pub fn len(&self) -> usize {
        match self {
            ConformityScores::Naive { n_samples } => *n_samples,
            ConformityScores::Lac(s) | ConformityScores::TopK(s) => s.len(),
            ConformityScores::Cumulated { scores, .. } => scores.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Score values, `None` for the naive method.
    pub fn values(&self) -> Option<ArrayView1<f64>> {
        match self {
            ConformityScores::Naive { .. } => None,
            ConformityScores::Lac(s) | ConformityScores::TopK(s) => Some(s.view()),
            ConformityScores::Cumulated { scores, .. } => Some(scores.view()),
        }
    }
}
