//! confset-classifiers: conformal prediction sets for probabilistic classifiers.
//!
//! A [`ConformalClassifier`] wraps any model implementing
//! [`models::ClassifierModel`], calibrates conformity scores on held-out or
//! out-of-fold probabilities, and returns for each test sample the set of
//! labels that contains the true one with probability at least `1 - alpha`.
//!
//! Supported score families are naive, LAC, APS, RAPS and top-k, with mean
//! or crossval aggregation of cross-validated estimators and optional
//! randomized inclusion of the boundary label.
pub mod classifier;
pub mod config;
pub mod conformity;
pub mod data_handling;
pub mod error;
pub mod io;
pub mod models;
pub mod predictor;
pub mod preprocessing;
pub mod stats;

pub use classifier::{ConformalClassifier, PredictionSets};
pub use config::{
    AggScores, ConformalConfig, CvStrategy, IncludeLastLabel, Method, ModelConfig, ModelType,
    PredictOptions,
};
pub use error::{ConformalError, Result};
pub use predictor::ConformalPredictor;
