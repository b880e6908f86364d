//! Conformity scores and prediction-set assembly.
//!
//! * [`scores`] turns calibration probabilities and true labels into one
//!   scalar score per sample for each method.
//! * [`raps`] regularizes cumulated scores and searches the penalty weight
//!   on a held-out split.
//! * [`sets`] converts thresholds and test probabilities into boolean
//!   inclusion tensors of shape (n_samples, n_classes, n_alpha).
//!
//! Every "sorted" view of a probability row uses the same ordering:
//! decreasing probability, ties broken by ascending class index.
pub mod raps;
pub mod scores;
pub mod sets;

pub use raps::{find_lambda_star, k_star_from_positions, regularize_scores, RapsParams, LAMBDA_GRID};
pub use scores::{descending_order, true_label_cumsum, true_label_positions, ConformityScores};
pub use sets::{
    cumulated_sets_crossval, cumulated_sets_mean, last_included, lac_sets_crossval, lac_sets_mean,
    top_k_sets, LastIncluded,
};
