use ndarray::{Array2, ArrayView2, Axis};
use statrs::distribution::{Continuous, Normal};

use crate::data_handling::unique_labels;
use crate::error::{ConformalError, Result};
use crate::models::classifier_trait::ClassifierModel;

/// Gaussian naive Bayes: independent normal likelihood per feature and class.
#[derive(Clone, Debug)]
pub struct GaussianNB {
    var_smoothing: f64,
    classes: Vec<i32>,
    log_priors: Vec<f64>,
    /// `likelihoods[class][feature]`
    likelihoods: Vec<Vec<Normal>>,
}

impl GaussianNB {
    pub fn new(var_smoothing: f64) -> Self {
        GaussianNB {
            var_smoothing,
            classes: Vec::new(),
            log_priors: Vec::new(),
            likelihoods: Vec::new(),
        }
    }
}

impl Default for GaussianNB {
    fn default() -> Self {
        GaussianNB::new(1e-9)
    }
}

impl ClassifierModel for GaussianNB {
    fn fit(&mut self, x: ArrayView2<f64>, y: &[i32], sample_weight: Option<&[f64]>) -> Result<()> {
        let (n_samples, n_features) = x.dim();
        if n_samples != y.len() || n_samples == 0 {
            return Err(ConformalError::Shape(format!(
                "{} rows in x for {} labels",
                n_samples,
                y.len()
            )));
        }
        let weight = |i: usize| sample_weight.map_or(1.0, |w| w[i]);

        // Smoothing is relative to the largest feature variance.
        let max_var = x
            .var_axis(Axis(0), 0.0)
            .fold(0.0_f64, |m, &v| m.max(v));
        let epsilon = (self.var_smoothing * max_var).max(f64::MIN_POSITIVE);

        self.classes = unique_labels(y);
        let total_weight: f64 = (0..n_samples).map(|i| weight(i)).sum();
        self.log_priors.clear();
        self.likelihoods.clear();

        for &class in &self.classes {
            let members: Vec<usize> = (0..n_samples).filter(|&i| y[i] == class).collect();
            let class_weight: f64 = members.iter().map(|&i| weight(i)).sum();
            if class_weight <= 0.0 {
                return Err(ConformalError::Model(format!(
                    "class {} has no positive sample weight",
                    class
                )));
            }

            let mut per_feature = Vec::with_capacity(n_features);
            for f in 0..n_features {
                let mean = members.iter().map(|&i| weight(i) * x[(i, f)]).sum::<f64>() / class_weight;
                let var = members
                    .iter()
                    .map(|&i| weight(i) * (x[(i, f)] - mean).powi(2))
                    .sum::<f64>()
                    / class_weight
                    + epsilon;
                let normal = Normal::new(mean, var.sqrt())
                    .map_err(|e| ConformalError::Model(format!("class {} feature {}: {}", class, f, e)))?;
                per_feature.push(normal);
            }
            self.log_priors.push((class_weight / total_weight).ln());
            self.likelihoods.push(per_feature);
        }
        Ok(())
    }

    fn predict_proba(&self, x: ArrayView2<f64>) -> Result<Array2<f64>> {
        if self.classes.is_empty() {
            return Err(ConformalError::NotFitted);
        }
        let n_features = self.likelihoods[0].len();
        if x.ncols() != n_features {
            return Err(ConformalError::Shape(format!(
                "model fitted on {} features, got {}",
                n_features,
                x.ncols()
            )));
        }

        let mut probs = Array2::<f64>::zeros((x.nrows(), self.classes.len()));
        for (i, sample) in x.axis_iter(Axis(0)).enumerate() {
            let joint: Vec<f64> = self
                .likelihoods
                .iter()
                .zip(&self.log_priors)
                .map(|(features, prior)| {
                    prior
                        + features
                            .iter()
                            .zip(sample.iter())
                            .map(|(normal, &v)| normal.ln_pdf(v))
                            .sum::<f64>()
                })
                .collect();
            let max = joint.iter().fold(f64::NEG_INFINITY, |m, &v| m.max(v));
            let log_norm = max + joint.iter().map(|&v| (v - max).exp()).sum::<f64>().ln();
            for (j, &v) in joint.iter().enumerate() {
                probs[(i, j)] = (v - log_norm).exp();
            }
        }
        Ok(probs)
    }

    fn classes(&self) -> &[i32] {
        &self.classes
    }

    fn name(&self) -> &str {
        "gaussian_nb"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::array;

    #[test]
    fn toy_points_follow_their_cluster() {
        let x = array![[0.0], [1.0], [2.0], [3.0], [4.0], [5.0], [6.0], [7.0], [8.0]];
        let y = [0, 0, 1, 0, 1, 2, 1, 2, 2];
        let mut model = GaussianNB::default();
        model.fit(x.view(), &y, None).unwrap();

        let probs = model.predict_proba(x.view()).unwrap();
        for row in probs.axis_iter(Axis(0)) {
            assert!((row.sum() - 1.0).abs() < 1e-9);
        }
        let pred = model.predict(x.view()).unwrap();
        assert_eq!(pred[0], 0);
        assert_eq!(pred[8], 2);
    }

    #[test]
    fn zero_weight_class_is_an_error() {
        let x = array![[0.0], [1.0], [2.0]];
        let mut model = GaussianNB::default();
        let err = model.fit(x.view(), &[0, 1, 1], Some(&[0.0, 1.0, 1.0]));
        assert!(err.is_err());
    }
}
