pub mod classifier_trait;
pub mod ensemble;
pub mod factory;
pub mod logistic;
pub mod naive_bayes;

pub use classifier_trait::ClassifierModel;
pub use ensemble::{EnsembleClassifier, Estimator};
pub use factory::{build_model, model_factory, ModelFactory};
pub use logistic::LogisticRegression;
pub use naive_bayes::GaussianNB;
