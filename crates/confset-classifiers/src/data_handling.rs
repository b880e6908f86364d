//! Label encoding and index splitting for calibration data.
//!
//! This module defines `LabelEncoder` and the shuffle / k-fold splitters
//! used to carve calibration and RAPS hold-out subsets out of the data
//! passed to `fit`.
use std::collections::{BTreeMap, BTreeSet};

use ndarray::{Array2, ArrayView2, Axis};
use rand::seq::SliceRandom;
use rand::Rng;

use crate::error::{ConformalError, Result};

/// Maps arbitrary integer labels to `0..n_classes` in sorted order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LabelEncoder {
    classes: Vec<i32>,
}

impl LabelEncoder {
    /// Build an encoder from the labels it must know about.
    pub fn fit(labels: &[i32]) -> Self {
        LabelEncoder {
            classes: unique_labels(labels),
        }
    }

    pub fn classes(&self) -> &[i32] {
        &self.classes
    }

    pub fn n_classes(&self) -> usize {
        self.classes.len()
    }

    pub fn encode(&self, label: i32) -> Option<usize> {
        self.classes.binary_search(&label).ok()
    }

    pub fn transform(&self, labels: &[i32]) -> Result<Vec<usize>> {
        labels
            .iter()
            .map(|&label| {
                self.encode(label)
                    .ok_or_else(|| ConformalError::ClassMismatch {
                        missing: vec![label],
                    })
            })
            .collect()
    }

    pub fn inverse_transform(&self, encoded: &[usize]) -> Vec<i32> {
        encoded.iter().map(|&idx| self.classes[idx]).collect()
    }
}

/// Sorted distinct labels.
pub fn unique_labels(labels: &[i32]) -> Vec<i32> {
    labels
        .iter()
        .copied()
        .collect::<BTreeSet<_>>()
        .into_iter()
        .collect()
}

/// Number of samples per label, sorted by label.
pub fn label_counts(labels: &[i32]) -> BTreeMap<i32, usize> {
    let mut counts = BTreeMap::new();
    for &label in labels {
        *counts.entry(label).or_insert(0) += 1;
    }
    counts
}

/// Rows of `x` at `indices`, in that order.
pub fn select_rows(x: ArrayView2<f64>, indices: &[usize]) -> Array2<f64> {
    x.select(Axis(0), indices)
}

/// Values of `values` at `indices`, in that order.
pub fn select_values<T: Copy>(values: &[T], indices: &[usize]) -> Vec<T> {
    indices.iter().map(|&i| values[i]).collect()
}

/// Resolve a `test_size` to a number of test samples.
///
/// Values in (0, 1) are a fraction of `n_samples`; values >= 1 are an
/// absolute count.
pub fn resolve_test_size(n_samples: usize, test_size: f64) -> Result<usize> {
    let n_test = if test_size > 0.0 && test_size < 1.0 {
        (test_size * n_samples as f64).ceil() as usize
    } else if test_size >= 1.0 && test_size.fract() == 0.0 {
        test_size as usize
    } else {
        return Err(ConformalError::Shape(format!(
            "test_size={} should be a fraction in (0, 1) or a positive integer",
            test_size
        )));
    };
    if n_test == 0 || n_test >= n_samples {
        return Err(ConformalError::Shape(format!(
            "test_size={} leaves an empty subset with {} samples",
            test_size, n_samples
        )));
    }
    Ok(n_test)
}

/// Single random permutation split into (train, test) indices.
pub fn shuffle_split<R: Rng + ?Sized>(
    n_samples: usize,
    test_size: f64,
    rng: &mut R,
) -> Result<(Vec<usize>, Vec<usize>)> {
    let n_test = resolve_test_size(n_samples, test_size)?;
    let mut indices: Vec<usize> = (0..n_samples).collect();
    indices.shuffle(rng);
    let train = indices.split_off(n_test);
    Ok((train, indices))
}

/// K-fold (train, test) index pairs.
///
/// When `groups` is given, whole groups are assigned to folds so that the
/// samples of a group never end up on both sides of a split. Every sample
/// is in exactly one test fold.
pub fn k_fold<R: Rng + ?Sized>(
    n_samples: usize,
    n_splits: usize,
    shuffle: bool,
    groups: Option<&[usize]>,
    rng: &mut R,
) -> Result<Vec<(Vec<usize>, Vec<usize>)>> {
    // Units are either single samples or whole groups.
    let units: Vec<Vec<usize>> = match groups {
        Some(groups) => {
            if groups.len() != n_samples {
                return Err(ConformalError::Shape(format!(
                    "{} group labels for {} samples",
                    groups.len(),
                    n_samples
                )));
            }
            let mut by_group: BTreeMap<usize, Vec<usize>> = BTreeMap::new();
            for (i, &g) in groups.iter().enumerate() {
                by_group.entry(g).or_default().push(i);
            }
            by_group.into_values().collect()
        }
        None => (0..n_samples).map(|i| vec![i]).collect(),
    };

    if n_splits < 2 || n_splits > units.len() {
        return Err(ConformalError::Shape(format!(
            "cannot split {} units into {} folds",
            units.len(),
            n_splits
        )));
    }

    let mut order: Vec<usize> = (0..units.len()).collect();
    if shuffle {
        order.shuffle(rng);
    }

    // First `units % n_splits` folds get one extra unit.
    let base = units.len() / n_splits;
    let extra = units.len() % n_splits;
    let mut folds = Vec::with_capacity(n_splits);
    let mut start = 0;
    for fold in 0..n_splits {
        let size = base + usize::from(fold < extra);
        let mut test: Vec<usize> = order[start..start + size]
            .iter()
            .flat_map(|&u| units[u].iter().copied())
            .collect();
        test.sort_unstable();
        start += size;

        let mut in_test = vec![false; n_samples];
        for &i in &test {
            in_test[i] = true;
        }
        let train: Vec<usize> = (0..n_samples).filter(|&i| !in_test[i]).collect();
        folds.push((train, test));
    }

    log::trace!(
        "Prepared {} folds with test sizes {:?}",
        folds.len(),
        folds.iter().map(|(_, t)| t.len()).collect::<Vec<_>>()
    );
    Ok(folds)
}

/// Drop samples whose weight is exactly zero.
///
/// Returns the kept indices; callers subset their own arrays with them.
pub fn non_null_weight_indices(sample_weight: Option<&[f64]>, n_samples: usize) -> Result<Vec<usize>> {
    match sample_weight {
        None => Ok((0..n_samples).collect()),
        Some(weights) => {
            if weights.len() != n_samples {
                return Err(ConformalError::Shape(format!(
                    "{} sample weights for {} samples",
                    weights.len(),
                    n_samples
                )));
            }
            let kept: Vec<usize> = (0..n_samples).filter(|&i| weights[i] != 0.0).collect();
            if kept.len() < n_samples {
                log::debug!("Removing {} samples with null weight", n_samples - kept.len());
            }
            Ok(kept)
        }
    }
}
