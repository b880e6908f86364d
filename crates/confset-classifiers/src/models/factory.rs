use std::sync::Arc;

use crate::config::{ModelConfig, ModelType};
use crate::models::classifier_trait::ClassifierModel;
use crate::models::logistic::LogisticRegression;
use crate::models::naive_bayes::GaussianNB;

/// Produces a fresh, unfitted model for every fold.
pub type ModelFactory = Arc<dyn Fn() -> Box<dyn ClassifierModel> + Send + Sync>;

/// Build a boxed classifier model from a `ModelConfig`.
pub fn build_model(params: &ModelConfig) -> Box<dyn ClassifierModel> {
    match params.model_type {
        ModelType::Logistic { max_iter, l2 } => {
            Box::new(LogisticRegression::new(params.learning_rate, max_iter, l2))
        }
        ModelType::GaussianNB { var_smoothing } => Box::new(GaussianNB::new(var_smoothing)),
    }
}

/// Wrap a `ModelConfig` into a factory usable by the ensemble.
pub fn model_factory(params: ModelConfig) -> ModelFactory {
    Arc::new(move || build_model(&params))
}
