use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::error::ConformalError;

/// Default fraction of the calibration data held out to tune RAPS.
pub const DEFAULT_SIZE_RAPS: f64 = 0.2;

fn default_size_raps() -> f64 {
    DEFAULT_SIZE_RAPS
}

/// Conformity score family used to build prediction sets.
///
/// Serialized as `{"name": "<method>"}`, plus `size_raps` for RAPS. Reading
/// goes through [`Method::from_name`] so deprecated names warn the same way
/// from JSON and from strings.
#[derive(Serialize, Debug, Clone, Copy, PartialEq)]
#[serde(rename_all = "snake_case", tag = "name")]
pub enum Method {
    /// Sum of the sorted probabilities until `1 - alpha` is reached.
    Naive,
    /// Least ambiguous set-valued classifier, score `1 - p(true label)`.
    Lac,
    /// Adaptive prediction sets, randomized cumulated score of the true label.
    Aps,
    /// Regularized APS. `size_raps` is the share of the calibration data
    /// held out to choose the regularization parameters.
    Raps { size_raps: f64 },
    /// Rank of the true label in the sorted probabilities.
    TopK,
}

impl Method {
    pub fn name(&self) -> &'static str {
        match self {
            Method::Naive => "naive",
            Method::Lac => "lac",
            Method::Aps => "aps",
            Method::Raps { .. } => "raps",
            Method::TopK => "top_k",
        }
    }

    /// Map a method name to its variant, accepting the deprecated aliases
    /// `score` and `cumulated_score` with a warning. `size_raps` is only
    /// read for RAPS.
    pub fn from_name(name: &str, size_raps: f64) -> Result<Self, ConformalError> {
        match name.to_lowercase().as_str() {
            "naive" => Ok(Method::Naive),
            "lac" => Ok(Method::Lac),
            "score" => {
                log::warn!(
                    "WARNING: Deprecated method. The method \"score\" is outdated. \
                     Prefer to use \"lac\" instead to keep the same behavior in the next release."
                );
                Ok(Method::Lac)
            }
            "aps" => Ok(Method::Aps),
            "cumulated_score" => {
                log::warn!(
                    "WARNING: Deprecated method. The method \"cumulated_score\" is outdated. \
                     Prefer to use \"aps\" instead to keep the same behavior in the next release."
                );
                Ok(Method::Aps)
            }
            "raps" => Ok(Method::Raps { size_raps }),
            "top_k" | "topk" => Ok(Method::TopK),
            _ => Err(ConformalError::InvalidMethod(name.to_string())),
        }
    }
}

impl Default for Method {
    fn default() -> Self {
        Method::Lac
    }
}

impl fmt::Display for Method {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for Method {
    type Err = ConformalError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Method::from_name(s, DEFAULT_SIZE_RAPS)
    }
}

impl<'de> Deserialize<'de> for Method {
    fn deserialize<D: serde::Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        #[derive(Deserialize)]
        struct Raw {
            name: String,
            #[serde(default = "default_size_raps")]
            size_raps: f64,
        }

        let raw = Raw::deserialize(deserializer)?;
        Method::from_name(&raw.name, raw.size_raps).map_err(serde::de::Error::custom)
    }
}

/// How the calibration conformity scores are obtained.
#[derive(Deserialize, Serialize, Debug, Clone, Copy, PartialEq)]
#[serde(rename_all = "snake_case", tag = "name")]
pub enum CvStrategy {
    /// The estimator is already trained; all data is used for calibration.
    Prefit,
    /// One shuffle split into training and calibration subsets.
    Split { test_size: f64 },
    /// Out-of-fold scores from `n_splits` folds.
    KFold { n_splits: usize, shuffle: bool },
    /// Jackknife: one fold per sample.
    LeaveOneOut,
}

impl CvStrategy {
    pub fn name(&self) -> &'static str {
        match self {
            CvStrategy::Prefit => "prefit",
            CvStrategy::Split { .. } => "split",
            CvStrategy::KFold { .. } => "k_fold",
            CvStrategy::LeaveOneOut => "leave_one_out",
        }
    }

    /// Whether a single estimator produces every probability used at
    /// predict time.
    pub fn is_single_estimator(&self) -> bool {
        matches!(self, CvStrategy::Prefit | CvStrategy::Split { .. })
    }
}

impl Default for CvStrategy {
    fn default() -> Self {
        CvStrategy::KFold {
            n_splits: 5,
            shuffle: false,
        }
    }
}

impl fmt::Display for CvStrategy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for CvStrategy {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "prefit" => Ok(CvStrategy::Prefit),
            "split" => Ok(CvStrategy::Split { test_size: 0.1 }),
            "k_fold" | "kfold" => Ok(CvStrategy::default()),
            "leave_one_out" | "loo" => Ok(CvStrategy::LeaveOneOut),
            _ => Err(format!(
                "Unknown cv strategy: {}. Allowed values are prefit, split, k_fold, leave_one_out",
                s
            )),
        }
    }
}

/// Policy for the label whose cumulated score first crosses the threshold.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum IncludeLastLabel {
    /// Keep the crossing label (`True`).
    #[default]
    Include,
    /// Keep only labels strictly below the threshold, at least the top-1 (`False`).
    Exclude,
    /// Keep the crossing label with a probability that gives exact coverage.
    Randomized,
}

impl FromStr for IncludeLastLabel {
    type Err = ConformalError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "true" => Ok(IncludeLastLabel::Include),
            "false" => Ok(IncludeLastLabel::Exclude),
            "randomized" => Ok(IncludeLastLabel::Randomized),
            _ => Err(ConformalError::InvalidIncludeLastLabel(s.to_string())),
        }
    }
}

impl From<bool> for IncludeLastLabel {
    fn from(value: bool) -> Self {
        if value {
            IncludeLastLabel::Include
        } else {
            IncludeLastLabel::Exclude
        }
    }
}

// Serialized as `true`, `false` or `"randomized"`.
impl Serialize for IncludeLastLabel {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        match self {
            IncludeLastLabel::Include => serializer.serialize_bool(true),
            IncludeLastLabel::Exclude => serializer.serialize_bool(false),
            IncludeLastLabel::Randomized => serializer.serialize_str("randomized"),
        }
    }
}

impl<'de> Deserialize<'de> for IncludeLastLabel {
    fn deserialize<D: serde::Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        #[derive(Deserialize)]
        #[serde(untagged)]
        enum Raw {
            Flag(bool),
            Name(String),
        }

        match Raw::deserialize(deserializer)? {
            Raw::Flag(flag) => Ok(flag.into()),
            Raw::Name(name) => name.parse().map_err(serde::de::Error::custom),
        }
    }
}

/// How the fold estimators' outputs are combined on test data.
#[derive(Deserialize, Serialize, Debug, Clone, Copy, PartialEq, Eq, Default)]
#[serde(rename_all = "snake_case")]
pub enum AggScores {
    /// Average the fold probabilities and use one threshold per alpha.
    #[default]
    Mean,
    /// Compare each test candidate against every training conformity score.
    Crossval,
}

impl FromStr for AggScores {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "mean" => Ok(AggScores::Mean),
            "crossval" => Ok(AggScores::Crossval),
            _ => Err(format!("Unknown agg_scores: {}. Allowed values are mean, crossval", s)),
        }
    }
}

/// Options of a single `predict_sets` call.
#[derive(Deserialize, Serialize, Debug, Clone, Copy, PartialEq, Default)]
#[serde(default)]
pub struct PredictOptions {
    pub include_last_label: IncludeLastLabel,
    pub agg_scores: AggScores,
}

/// Central configuration for the underlying models.
#[derive(Deserialize, Serialize, Debug, Clone, PartialEq)]
pub struct ModelConfig {
    pub learning_rate: f64,

    #[serde(flatten)]
    pub model_type: ModelType,
}

/// Supported model types and their hyper-parameters.
#[derive(Deserialize, Serialize, Debug, Clone, PartialEq)]
pub enum ModelType {
    Logistic { max_iter: usize, l2: f64 },
    GaussianNB { var_smoothing: f64 },
}

impl Default for ModelType {
    fn default() -> Self {
        ModelType::Logistic {
            max_iter: 500,
            l2: 1e-3,
        }
    }
}

impl FromStr for ModelType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "logistic" => Ok(ModelType::default()),
            "gaussian_nb" | "gaussiannb" | "nb" => Ok(ModelType::GaussianNB {
                var_smoothing: 1e-9,
            }),
            _ => Err(format!(
                "Unknown model type: {}. Allowed values are logistic, gaussian_nb",
                s
            )),
        }
    }
}

impl ModelConfig {
    pub fn new(learning_rate: f64, model_type: ModelType) -> Self {
        Self {
            learning_rate,
            model_type,
        }
    }
}

impl Default for ModelConfig {
    fn default() -> Self {
        Self {
            learning_rate: 0.5,
            model_type: ModelType::default(),
        }
    }
}

/// Everything needed to build a `ConformalClassifier` from a file.
#[derive(Deserialize, Serialize, Debug, Clone, PartialEq)]
#[serde(default)]
pub struct ConformalConfig {
    pub method: Method,
    pub cv: CvStrategy,
    /// Seed of the per-instance random generator. `None` draws from entropy.
    pub random_state: Option<u64>,
    pub model: ModelConfig,
}

impl Default for ConformalConfig {
    fn default() -> Self {
        Self {
            method: Method::default(),
            cv: CvStrategy::default(),
            random_state: None,
            model: ModelConfig::default(),
        }
    }
}
