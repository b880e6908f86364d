use ndarray::{Array1, Array2, ArrayView2, Axis};

use crate::data_handling::unique_labels;
use crate::error::{ConformalError, Result};
use crate::models::classifier_trait::ClassifierModel;
use crate::preprocessing::Scaler;

/// Multinomial logistic regression trained by full-batch gradient descent
/// on standardized features.
#[derive(Clone, Debug)]
pub struct LogisticRegression {
    learning_rate: f64,
    max_iter: usize,
    l2: f64,
    classes: Vec<i32>,
    scaler: Option<Scaler>,
    weights: Array2<f64>,
    intercept: Array1<f64>,
}

impl LogisticRegression {
    pub fn new(learning_rate: f64, max_iter: usize, l2: f64) -> Self {
        LogisticRegression {
            learning_rate,
            max_iter,
            l2,
            classes: Vec::new(),
            scaler: None,
            weights: Array2::zeros((0, 0)),
            intercept: Array1::zeros(0),
        }
    }

    fn logits(&self, xs: &Array2<f64>) -> Array2<f64> {
        xs.dot(&self.weights) + &self.intercept
    }
}

impl Default for LogisticRegression {
    fn default() -> Self {
        LogisticRegression::new(0.5, 500, 1e-3)
    }
}

/// Row-wise softmax, shifted by the row maximum for stability.
pub(crate) fn softmax_rows(mut logits: Array2<f64>) -> Array2<f64> {
    for mut row in logits.axis_iter_mut(Axis(0)) {
        let max = row.fold(f64::NEG_INFINITY, |m, &v| m.max(v));
        row.mapv_inplace(|v| (v - max).exp());
        let sum = row.sum();
        row.mapv_inplace(|v| v / sum);
    }
    logits
}

impl ClassifierModel for LogisticRegression {
    fn fit(&mut self, x: ArrayView2<f64>, y: &[i32], sample_weight: Option<&[f64]>) -> Result<()> {
        let (n_samples, n_features) = x.dim();
        if n_samples != y.len() {
            return Err(ConformalError::Shape(format!(
                "{} rows in x for {} labels",
                n_samples,
                y.len()
            )));
        }
        self.classes = unique_labels(y);
        let n_classes = self.classes.len();
        if n_classes == 0 {
            return Err(ConformalError::Model("cannot fit on an empty dataset".to_string()));
        }

        let weights = match sample_weight {
            Some(w) => Array1::from_vec(w.to_vec()),
            None => Array1::ones(n_samples),
        };
        let total_weight = weights.sum();
        if total_weight <= 0.0 {
            return Err(ConformalError::Model("sample weights sum to zero".to_string()));
        }

        let mut targets = Array2::<f64>::zeros((n_samples, n_classes));
        for (i, label) in y.iter().enumerate() {
            // classes were built from y, so the search always succeeds
            if let Ok(j) = self.classes.binary_search(label) {
                targets[(i, j)] = 1.0;
            }
        }

        let scaler = Scaler::fit(x)?;
        let xs = scaler.transform(x);
        self.scaler = Some(scaler);
        self.weights = Array2::zeros((n_features, n_classes));
        self.intercept = Array1::zeros(n_classes);

        let w_col = weights.insert_axis(Axis(1));
        for iter in 0..self.max_iter {
            let probs = softmax_rows(self.logits(&xs));
            let residual = (probs - &targets) * &w_col / total_weight;
            let grad_w = xs.t().dot(&residual) + &self.weights * self.l2;
            let grad_b = residual.sum_axis(Axis(0));

            self.weights.scaled_add(-self.learning_rate, &grad_w);
            self.intercept.scaled_add(-self.learning_rate, &grad_b);

            if iter % 100 == 0 {
                log::trace!(
                    "logistic iteration {} gradient norm {:.3e}",
                    iter,
                    grad_w.mapv(|g| g * g).sum().sqrt()
                );
            }
        }
        Ok(())
    }

    fn predict_proba(&self, x: ArrayView2<f64>) -> Result<Array2<f64>> {
        let scaler = self.scaler.as_ref().ok_or(ConformalError::NotFitted)?;
        if x.ncols() != self.weights.nrows() {
            return Err(ConformalError::Shape(format!(
                "model fitted on {} features, got {}",
                self.weights.nrows(),
                x.ncols()
            )));
        }
        Ok(softmax_rows(self.logits(&scaler.transform(x))))
    }

    fn classes(&self) -> &[i32] {
        &self.classes
    }

    fn name(&self) -> &str {
        "logistic_regression"
    }
}
