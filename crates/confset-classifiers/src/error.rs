use thiserror::Error;

/// Errors raised while calibrating or predicting prediction sets.
///
/// Every variant is a usage error detected synchronously; nothing here is
/// transient, so callers should not retry.
#[derive(Debug, Error)]
pub enum ConformalError {
    #[error("Invalid method '{0}'. Allowed values are naive, lac, aps, raps, top_k.")]
    InvalidMethod(String),

    #[error("RAPS method can only be used with cv in [prefit, split], got {0}.")]
    IncompatibleCv(String),

    #[error("Invalid alpha: {0}")]
    InvalidAlpha(String),

    #[error("The sum of the scores is not equal to one: row {row} sums to {sum}.")]
    UnnormalizedProbability { row: usize, sum: f64 },

    #[error("Invalid method '{0}' for binary target. Allowed values for binary type are lac and score.")]
    InvalidTargetType(String),

    #[error("Invalid include_last_label argument '{0}'. Should be a boolean or 'randomized'.")]
    InvalidIncludeLastLabel(String),

    #[error("Values in y do not match the estimator classes: {missing:?} are unknown. Check that you are not adding any new label.")]
    ClassMismatch { missing: Vec<i32> },

    #[error("This classifier is not fitted yet. Call `fit` before using it.")]
    NotFitted,

    #[error("Shape mismatch: {0}")]
    Shape(String),

    #[error("Estimator failure: {0}")]
    Model(String),
}

impl From<ndarray::ShapeError> for ConformalError {
    fn from(err: ndarray::ShapeError) -> Self {
        ConformalError::Shape(err.to_string())
    }
}

pub type Result<T> = std::result::Result<T, ConformalError>;
