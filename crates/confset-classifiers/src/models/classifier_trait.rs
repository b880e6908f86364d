use ndarray::{Array2, ArrayView2, Axis};

use crate::error::Result;

/// Contract for the probabilistic classifiers wrapped by the conformal
/// layer. Implementations must be shareable across threads because
/// cross-validation folds are fitted in parallel.
pub trait ClassifierModel: Send + Sync {
    /// Fit the model on `x` with integer labels `y`. Samples may be weighted.
    fn fit(&mut self, x: ArrayView2<f64>, y: &[i32], sample_weight: Option<&[f64]>) -> Result<()>;

    /// Class probabilities of shape (n_samples, classes().len()); column `j`
    /// belongs to `classes()[j]`.
    fn predict_proba(&self, x: ArrayView2<f64>) -> Result<Array2<f64>>;

    /// Sorted labels seen during `fit`.
    fn classes(&self) -> &[i32];

    /// Most probable label per sample. Ties go to the smallest label.
    fn predict(&self, x: ArrayView2<f64>) -> Result<Vec<i32>> {
        let probs = self.predict_proba(x)?;
        let classes = self.classes();
        Ok(probs
            .axis_iter(Axis(0))
            .map(|row| {
                let mut best = 0;
                for (j, &p) in row.iter().enumerate() {
                    if p > row[best] {
                        best = j;
                    }
                }
                classes[best]
            })
            .collect())
    }

    /// Optional human readable name for the model
    fn name(&self) -> &str {
        "classifier"
    }
}
