//! Prediction-set assembly.
//!
//! Two regimes produce the (n_samples, n_classes, n_alpha) tensors:
//!
//! * mean: one threshold per alpha; a class is in the set when its
//!   probability is at least the probability of the last included label.
//! * crossval: every test probability slice is compared with the score of
//!   the training sample whose fold produced it, and a class is kept when
//!   the number of agreeing comparisons passes `(n + 1)(1 - alpha)`.
use ndarray::{s, Array1, Array2, Array3, ArrayView1, ArrayView2, ArrayView3, ArrayViewMut1, Axis};

use crate::config::IncludeLastLabel;
use crate::conformity::raps::RapsParams;
use crate::conformity::scores::descending_order;
use crate::error::{ConformalError, Result};
use crate::stats::EPSILON;

/// Position and probability of the last label kept for one row and threshold.
#[derive(Debug, Clone, PartialEq)]
pub struct LastIncluded {
    /// Cumulated (possibly regularized) sorted probabilities, in class order.
    pub cumsum: Array1<f64>,
    /// Class index of the last included label.
    pub index: usize,
    /// Its probability, floored to the smallest non-zero probability of
    /// the row when it is numerically zero.
    pub proba: f64,
}

fn cumsum_in_class_order(row: ArrayView1<f64>, params: Option<RapsParams>) -> Array1<f64> {
    let mut cumsum = Array1::<f64>::zeros(row.len());
    let mut running = 0.0;
    for (rank, &class) in descending_order(row).iter().enumerate() {
        running += row[class];
        cumsum[class] = running + params.map_or(0.0, |p| p.penalty(rank + 1));
    }
    cumsum
}

fn last_index(cumsum: &Array1<f64>, threshold: f64, include_last_label: IncludeLastLabel) -> usize {
    match include_last_label {
        IncludeLastLabel::Include | IncludeLastLabel::Randomized => {
            let mut best: Option<(usize, f64)> = None;
            for (j, &c) in cumsum.iter().enumerate() {
                let gap = c - threshold;
                if gap >= -EPSILON && best.map_or(true, |(_, b)| gap < b) {
                    best = Some((j, gap));
                }
            }
            match best {
                Some((j, _)) => j,
                // Threshold above every cumulated score: the whole row is kept.
                None => argmax_first(cumsum.iter().copied()),
            }
        }
        IncludeLastLabel::Exclude => {
            let floor = cumsum.iter().fold(f64::INFINITY, |m, &c| m.min(c));
            let max_threshold = threshold.max(floor);
            let mut best: Option<(usize, f64)> = None;
            for (j, &c) in cumsum.iter().enumerate() {
                let gap = c - max_threshold;
                if gap <= EPSILON && best.map_or(true, |(_, b)| gap > b) {
                    best = Some((j, gap));
                }
            }
            best.map_or(0, |(j, _)| j)
        }
    }
}

fn argmax_first<I: Iterator<Item = f64>>(values: I) -> usize {
    let mut best = (0, f64::NEG_INFINITY);
    for (j, v) in values.enumerate() {
        if v > best.1 {
            best = (j, v);
        }
    }
    best.0
}

/// Find the last label of the sorted row kept under `include_last_label`.
///
/// `include`/`randomized` keep the first label whose cumulated score
/// reaches the threshold; `exclude` keeps the last one still below it,
/// never less than the top-1 label.
pub fn last_included(
    row: ArrayView1<f64>,
    threshold: f64,
    include_last_label: IncludeLastLabel,
    params: Option<RapsParams>,
) -> LastIncluded {
    let cumsum = cumsum_in_class_order(row, params);
    let index = last_index(&cumsum, threshold, include_last_label);
    let mut proba = row[index];
    if proba <= EPSILON {
        let smallest = row
            .iter()
            .filter(|&&p| p >= EPSILON)
            .fold(f64::INFINITY, |m, &p| m.min(p));
        if smallest.is_finite() {
            proba = smallest;
        }
    }
    LastIncluded { cumsum, index, proba }
}

/// Randomly drop the last included label.
///
/// `V = (cumsum_last - threshold) / (p_last - lambda * max(0, L - k) + lambda * [L > k])`
/// with `L` the current set size; the label stays iff `V - u <= EPSILON`.
fn tie_break(
    mut column: ArrayViewMut1<bool>,
    last: &LastIncluded,
    threshold: f64,
    params: Option<RapsParams>,
    u: f64,
) {
    let size = column.iter().filter(|&&included| included).count() as f64;
    let adjustment = params.map_or(0.0, |p| {
        -p.lambda * (size - p.k_star).max(0.0) + if size > p.k_star { p.lambda } else { 0.0 }
    });
    let v = (last.cumsum[last.index] - threshold) / (last.proba + adjustment);
    column[last.index] = v - u <= EPSILON;
}

fn check_uniforms(uniforms: Option<&[f64]>, n_samples: usize) -> Result<()> {
    match uniforms {
        Some(u) if u.len() != n_samples => Err(ConformalError::Shape(format!(
            "{} uniform draws for {} samples",
            u.len(),
            n_samples
        ))),
        _ => Ok(()),
    }
}

/// Cumulated-score sets with one threshold per alpha.
///
/// # Arguments
///
/// * `probs` - Test probabilities (n_samples, n_classes).
/// * `thresholds` - One calibrated threshold per alpha.
/// * `include_last_label` - Policy for the label crossing the threshold.
/// * `params` - RAPS parameters per alpha, `None` for naive and APS.
/// * `uniforms` - One draw per sample; the tie-break runs only when these
///   are given and the policy is randomized.
///
/// # Returns
///
/// Boolean tensor (n_samples, n_classes, n_alpha).
pub fn cumulated_sets_mean(
    probs: ArrayView2<f64>,
    thresholds: &[f64],
    include_last_label: IncludeLastLabel,
    params: Option<&[RapsParams]>,
    uniforms: Option<&[f64]>,
) -> Result<Array3<bool>> {
    let (n_samples, n_classes) = probs.dim();
    if let Some(p) = params {
        if p.len() != thresholds.len() {
            return Err(ConformalError::Shape(format!(
                "{} RAPS parameter sets for {} thresholds",
                p.len(),
                thresholds.len()
            )));
        }
    }
    check_uniforms(uniforms, n_samples)?;
    let randomize = include_last_label == IncludeLastLabel::Randomized;

    let mut sets = Array3::from_elem((n_samples, n_classes, thresholds.len()), false);
    for (i, row) in probs.axis_iter(Axis(0)).enumerate() {
        for (a, &threshold) in thresholds.iter().enumerate() {
            let reg = params.map(|p| p[a]);
            let last = last_included(row, threshold, include_last_label, reg);
            let mut column = sets.slice_mut(s![i, .., a]);
            for (c, &p) in row.iter().enumerate() {
                column[c] = p - last.proba >= -EPSILON;
            }
            if let (true, Some(u)) = (randomize, uniforms) {
                tie_break(column, &last, threshold, reg, u[i]);
            }
        }
    }
    Ok(sets)
}

/// Cumulated-score sets by comparison with every training score.
///
/// `probs[.., .., j]` must come from the model that did not see training
/// sample `j`, whose conformity score is `train_scores[j]`.
pub fn cumulated_sets_crossval(
    probs: ArrayView3<f64>,
    train_scores: ArrayView1<f64>,
    alphas: &[f64],
    include_last_label: IncludeLastLabel,
    uniforms: Option<&[f64]>,
) -> Result<Array3<bool>> {
    let (n_samples, n_classes, n_train) = probs.dim();
    if n_train != train_scores.len() {
        return Err(ConformalError::Shape(format!(
            "{} probability slices for {} training scores",
            n_train,
            train_scores.len()
        )));
    }
    check_uniforms(uniforms, n_samples)?;
    let randomize = include_last_label == IncludeLastLabel::Randomized;

    let mut counts = Array2::<usize>::zeros((n_samples, n_classes));
    let mut column = Array1::from_elem(n_classes, false);
    for i in 0..n_samples {
        for (j, &score) in train_scores.iter().enumerate() {
            let row = probs.slice(s![i, .., j]);
            let last = last_included(row, score, include_last_label, None);
            for (c, &p) in row.iter().enumerate() {
                column[c] = p - last.proba <= EPSILON;
            }
            if let (true, Some(u)) = (randomize, uniforms) {
                tie_break(column.view_mut(), &last, score, None, u[i]);
            }
            for (c, &hit) in column.iter().enumerate() {
                counts[(i, c)] += usize::from(hit);
            }
        }
    }

    let n = n_train as f64;
    Ok(sets_from_counts(counts.view(), alphas, |count, alpha| {
        count - (n + 1.0) * (1.0 - alpha) <= EPSILON
    }))
}

fn sets_from_counts<F: Fn(f64, f64) -> bool>(counts: ArrayView2<usize>, alphas: &[f64], keep: F) -> Array3<bool> {
    let (n_samples, n_classes) = counts.dim();
    Array3::from_shape_fn((n_samples, n_classes, alphas.len()), |(i, c, a)| {
        keep(counts[(i, c)] as f64, alphas[a])
    })
}

/// LAC sets: class `c` is kept iff `p[c] >= 1 - q_alpha`.
pub fn lac_sets_mean(probs: ArrayView2<f64>, quantiles: &[f64]) -> Array3<bool> {
    let (n_samples, n_classes) = probs.dim();
    Array3::from_shape_fn((n_samples, n_classes, quantiles.len()), |(i, c, a)| {
        probs[(i, c)] - (1.0 - quantiles[a]) >= -EPSILON
    })
}

/// LAC sets by comparison with every training score: class `c` is kept
/// iff at least `alpha (n - 1)` training scores are not below its own.
pub fn lac_sets_crossval(
    probs: ArrayView3<f64>,
    train_scores: ArrayView1<f64>,
    alphas: &[f64],
) -> Result<Array3<bool>> {
    let (n_samples, n_classes, n_train) = probs.dim();
    if n_train != train_scores.len() {
        return Err(ConformalError::Shape(format!(
            "{} probability slices for {} training scores",
            n_train,
            train_scores.len()
        )));
    }
    let counts = Array2::from_shape_fn((n_samples, n_classes), |(i, c)| {
        train_scores
            .iter()
            .enumerate()
            .filter(|&(j, &s)| (1.0 - probs[(i, c, j)]) - s <= EPSILON)
            .count()
    });
    let n = n_train as f64;
    Ok(sets_from_counts(counts.view(), alphas, |count, alpha| {
        count - alpha * (n - 1.0) >= -EPSILON
    }))
}

/// Top-k sets: every class at least as probable as the `q`-th ranked one.
///
/// Each quantile is read as a 1-indexed rank and clipped to `[1, n_classes]`.
pub fn top_k_sets(probs: ArrayView2<f64>, quantiles: &[f64]) -> Array3<bool> {
    let (n_samples, n_classes) = probs.dim();
    let mut sets = Array3::from_elem((n_samples, n_classes, quantiles.len()), false);
    if n_classes == 0 {
        return sets;
    }
    for (i, row) in probs.axis_iter(Axis(0)).enumerate() {
        let order = descending_order(row);
        for (a, &q) in quantiles.iter().enumerate() {
            let rank = (q.round().max(1.0) as usize).min(n_classes);
            let p_last = row[order[rank - 1]];
            for (c, &p) in row.iter().enumerate() {
                sets[(i, c, a)] = p - p_last >= -EPSILON;
            }
        }
    }
    sets
}
