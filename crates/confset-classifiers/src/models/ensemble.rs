//! Out-of-fold probability estimation for conformal calibration.
//!
//! `EnsembleClassifier` hides how calibration probabilities are produced:
//! a prefit model used as is, a single shuffle split, or one model per
//! cross-validation fold. The conformal layer only sees aligned,
//! normalized probability matrices.
use std::fmt;
use std::sync::Arc;

use ndarray::{Array2, Array3, ArrayView2, Axis};
use rand::rngs::StdRng;
use rayon::prelude::*;

use crate::config::{AggScores, CvStrategy, ModelConfig};
use crate::data_handling::{k_fold, select_rows, select_values, shuffle_split, LabelEncoder};
use crate::error::{ConformalError, Result};
use crate::models::classifier_trait::ClassifierModel;
use crate::models::factory::{model_factory, ModelFactory};
use crate::preprocessing::{align_class_count, check_probabilities_normalized};

/// The model handed to the conformal layer.
#[derive(Clone)]
pub enum Estimator {
    /// Already trained; only calibration happens here.
    Prefit(Arc<dyn ClassifierModel>),
    /// Trained during `fit`, one fresh instance per fold.
    Unfitted(ModelFactory),
}

impl Estimator {
    pub fn prefit<M: ClassifierModel + 'static>(model: M) -> Self {
        Estimator::Prefit(Arc::new(model))
    }

    pub fn from_config(config: ModelConfig) -> Self {
        Estimator::Unfitted(model_factory(config))
    }
}

impl Default for Estimator {
    fn default() -> Self {
        Estimator::from_config(ModelConfig::default())
    }
}

impl fmt::Debug for Estimator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Estimator::Prefit(model) => write!(f, "Estimator::Prefit({})", model.name()),
            Estimator::Unfitted(_) => f.write_str("Estimator::Unfitted"),
        }
    }
}

/// Fitted collection of models producing calibration and test probabilities.
pub struct EnsembleClassifier {
    cv: CvStrategy,
    encoder: LabelEncoder,
    single_estimator: Arc<dyn ClassifierModel>,
    estimators: Vec<Arc<dyn ClassifierModel>>,
    /// Fold index of every calibration sample (cross-validation only).
    k: Vec<usize>,
    /// Calibration rows for `split`; empty means every row.
    calib_indices: Vec<usize>,
}

impl fmt::Debug for EnsembleClassifier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EnsembleClassifier")
            .field("cv", &self.cv)
            .field("n_classes", &self.encoder.n_classes())
            .field("single_estimator", &self.single_estimator.name())
            .field("n_estimators", &self.estimators.len())
            .finish()
    }
}

fn unfitted_factory(estimator: &Estimator, cv: CvStrategy) -> Result<&ModelFactory> {
    match estimator {
        Estimator::Unfitted(factory) => Ok(factory),
        Estimator::Prefit(_) => Err(ConformalError::Model(format!(
            "cv={} needs an unfitted estimator, got a prefit model",
            cv
        ))),
    }
}

fn fit_model(
    factory: &ModelFactory,
    x: ArrayView2<f64>,
    y: &[i32],
    sample_weight: Option<&[f64]>,
    indices: &[usize],
) -> Result<Arc<dyn ClassifierModel>> {
    let mut model = factory();
    let weights = sample_weight.map(|w| select_values(w, indices));
    model.fit(
        select_rows(x, indices).view(),
        &select_values(y, indices),
        weights.as_deref(),
    )?;
    Ok(Arc::from(model))
}

impl EnsembleClassifier {
    /// Fit the underlying model(s) according to `cv`.
    ///
    /// # Arguments
    ///
    /// * `estimator` - Prefit model or factory of unfitted models.
    /// * `encoder` - Global class ordering.
    /// * `cv` - Cross-validation strategy.
    /// * `x`, `y` - Training data with raw labels.
    /// * `sample_weight` - Optional per-sample weights.
    /// * `groups` - Optional group id per sample, kept within one fold.
    /// * `rng` - Source of randomness for shuffles.
    #[allow(clippy::too_many_arguments)]
    pub fn fit(
        estimator: &Estimator,
        encoder: LabelEncoder,
        cv: CvStrategy,
        x: ArrayView2<f64>,
        y: &[i32],
        sample_weight: Option<&[f64]>,
        groups: Option<&[usize]>,
        rng: &mut StdRng,
    ) -> Result<Self> {
        let n_samples = x.nrows();
        match cv {
            CvStrategy::Prefit => {
                let model = match estimator {
                    Estimator::Prefit(model) => Arc::clone(model),
                    Estimator::Unfitted(_) => {
                        return Err(ConformalError::Model(
                            "cv=prefit needs an already fitted estimator".to_string(),
                        ))
                    }
                };
                Ok(EnsembleClassifier {
                    cv,
                    encoder,
                    single_estimator: model,
                    estimators: Vec::new(),
                    k: Vec::new(),
                    calib_indices: Vec::new(),
                })
            }
            CvStrategy::Split { test_size } => {
                let factory = unfitted_factory(estimator, cv)?;
                let (train, calib) = shuffle_split(n_samples, test_size, rng)?;
                log::debug!(
                    "Split {} samples into {} training and {} calibration samples",
                    n_samples,
                    train.len(),
                    calib.len()
                );
                let model = fit_model(factory, x, y, sample_weight, &train)?;
                Ok(EnsembleClassifier {
                    cv,
                    encoder,
                    single_estimator: model,
                    estimators: Vec::new(),
                    k: Vec::new(),
                    calib_indices: calib,
                })
            }
            CvStrategy::KFold { .. } | CvStrategy::LeaveOneOut => {
                let factory = unfitted_factory(estimator, cv)?;
                let folds = match cv {
                    CvStrategy::KFold { n_splits, shuffle } => {
                        k_fold(n_samples, n_splits, shuffle, groups, rng)?
                    }
                    _ => k_fold(n_samples, n_samples, false, None, rng)?,
                };

                let mut k = vec![0; n_samples];
                for (fold, (_, test)) in folds.iter().enumerate() {
                    for &i in test {
                        k[i] = fold;
                    }
                }

                log::info!("Fitting {} fold estimators", folds.len());
                let estimators = folds
                    .par_iter()
                    .map(|(train, _)| fit_model(factory, x, y, sample_weight, train))
                    .collect::<Result<Vec<_>>>()?;

                let all: Vec<usize> = (0..n_samples).collect();
                let single_estimator = fit_model(factory, x, y, sample_weight, &all)?;

                Ok(EnsembleClassifier {
                    cv,
                    encoder,
                    single_estimator,
                    estimators,
                    k,
                    calib_indices: Vec::new(),
                })
            }
        }
    }

    pub fn n_classes(&self) -> usize {
        self.encoder.n_classes()
    }

    /// Number of out-of-fold estimators (zero for prefit and split).
    pub fn n_estimators(&self) -> usize {
        self.estimators.len()
    }

    /// Probabilities of `model` spread over the global classes and checked.
    fn model_proba(&self, model: &dyn ClassifierModel, x: ArrayView2<f64>) -> Result<Array2<f64>> {
        let raw = model.predict_proba(x)?;
        let observed: Vec<usize> = model
            .classes()
            .iter()
            .map(|&c| {
                self.encoder
                    .encode(c)
                    .ok_or_else(|| ConformalError::ClassMismatch { missing: vec![c] })
            })
            .collect::<Result<_>>()?;
        let probs = align_class_count(self.n_classes(), &observed, raw.view())?;
        check_probabilities_normalized(probs.view())?;
        Ok(probs)
    }

    /// Calibration probabilities with the labels they belong to.
    ///
    /// For `split` only the held-out rows are returned; for cross-validation
    /// every row is predicted by the model that did not see it.
    ///
    /// # Returns
    ///
    /// `(probabilities (n_calib, n_classes), y, y_encoded)`
    pub fn predict_proba_calib(
        &self,
        x: ArrayView2<f64>,
        y: &[i32],
        y_enc: &[usize],
    ) -> Result<(Array2<f64>, Vec<i32>, Vec<usize>)> {
        match self.cv {
            CvStrategy::Prefit => Ok((
                self.model_proba(self.single_estimator.as_ref(), x)?,
                y.to_vec(),
                y_enc.to_vec(),
            )),
            CvStrategy::Split { .. } => {
                let idx = &self.calib_indices;
                let x_calib = select_rows(x, idx);
                Ok((
                    self.model_proba(self.single_estimator.as_ref(), x_calib.view())?,
                    select_values(y, idx),
                    select_values(y_enc, idx),
                ))
            }
            CvStrategy::KFold { .. } | CvStrategy::LeaveOneOut => {
                let mut probs = Array2::<f64>::zeros((x.nrows(), self.n_classes()));
                for (fold, model) in self.estimators.iter().enumerate() {
                    let rows: Vec<usize> = (0..self.k.len()).filter(|&i| self.k[i] == fold).collect();
                    if rows.is_empty() {
                        continue;
                    }
                    let fold_probs = self.model_proba(model.as_ref(), select_rows(x, &rows).view())?;
                    for (r, &i) in rows.iter().enumerate() {
                        probs.row_mut(i).assign(&fold_probs.row(r));
                    }
                }
                Ok((probs, y.to_vec(), y_enc.to_vec()))
            }
        }
    }

    /// Test probabilities.
    ///
    /// Shape is (n_samples, n_classes, 1) for single-estimator strategies and
    /// for `AggScores::Mean`; with `AggScores::Crossval` the last axis has
    /// one slice per calibration sample, predicted by that sample's fold
    /// model.
    pub fn predict(&self, x: ArrayView2<f64>, agg_scores: AggScores) -> Result<Array3<f64>> {
        if self.cv.is_single_estimator() {
            let probs = self.model_proba(self.single_estimator.as_ref(), x)?;
            return Ok(probs.insert_axis(Axis(2)));
        }

        let fold_probs = self
            .estimators
            .par_iter()
            .map(|model| self.model_proba(model.as_ref(), x))
            .collect::<Result<Vec<_>>>()?;

        match agg_scores {
            AggScores::Mean => {
                let mut mean = Array2::<f64>::zeros((x.nrows(), self.n_classes()));
                for probs in &fold_probs {
                    mean += probs;
                }
                mean /= fold_probs.len() as f64;
                Ok(mean.insert_axis(Axis(2)))
            }
            AggScores::Crossval => {
                let mut out = Array3::<f64>::zeros((x.nrows(), self.n_classes(), self.k.len()));
                for (j, &fold) in self.k.iter().enumerate() {
                    out.index_axis_mut(Axis(2), j).assign(&fold_probs[fold]);
                }
                Ok(out)
            }
        }
    }

    /// Point predictions of the estimator fitted on all training data.
    pub fn single_predict(&self, x: ArrayView2<f64>) -> Result<Vec<i32>> {
        self.single_estimator.predict(x)
    }

    /// Probabilities of the estimator fitted on all training data.
    pub fn single_predict_proba(&self, x: ArrayView2<f64>) -> Result<Array2<f64>> {
        self.model_proba(self.single_estimator.as_ref(), x)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ModelType;
    use ndarray::array;
    use rand::SeedableRng;

    fn toy() -> (Array2<f64>, Vec<i32>) {
        let x = array![
            [0.0, 0.1], [0.1, 0.0], [0.2, 0.1], [0.0, 0.2],
            [2.0, 2.1], [2.1, 2.0], [2.2, 1.9], [1.9, 2.2],
            [4.0, 0.1], [4.1, 0.0], [4.2, 0.2], [3.9, 0.1]
        ];
        let y = vec![0, 0, 0, 0, 1, 1, 1, 1, 2, 2, 2, 2];
        (x, y)
    }

    fn nb() -> Estimator {
        Estimator::from_config(ModelConfig::new(
            0.1,
            ModelType::GaussianNB { var_smoothing: 1e-9 },
        ))
    }

    #[test]
    fn kfold_returns_out_of_fold_probabilities() {
        let (x, y) = toy();
        let encoder = LabelEncoder::fit(&y);
        let y_enc = encoder.transform(&y).unwrap();
        let mut rng = StdRng::seed_from_u64(0);
        let cv = CvStrategy::KFold { n_splits: 4, shuffle: true };
        let ens = EnsembleClassifier::fit(&nb(), encoder, cv, x.view(), &y, None, None, &mut rng).unwrap();
        assert_eq!(ens.n_estimators(), 4);

        let (probs, y_cal, _) = ens.predict_proba_calib(x.view(), &y, &y_enc).unwrap();
        assert_eq!(probs.dim(), (12, 3));
        assert_eq!(y_cal, y);

        let mean = ens.predict(x.view(), AggScores::Mean).unwrap();
        assert_eq!(mean.dim(), (12, 3, 1));
        let cross = ens.predict(x.view(), AggScores::Crossval).unwrap();
        assert_eq!(cross.dim(), (12, 3, 12));
    }

    #[test]
    fn split_keeps_only_calibration_rows() {
        let (x, y) = toy();
        let encoder = LabelEncoder::fit(&y);
        let y_enc = encoder.transform(&y).unwrap();
        let mut rng = StdRng::seed_from_u64(3);
        let cv = CvStrategy::Split { test_size: 0.25 };
        let ens = EnsembleClassifier::fit(&nb(), encoder, cv, x.view(), &y, None, None, &mut rng).unwrap();
        let (probs, y_cal, y_cal_enc) = ens.predict_proba_calib(x.view(), &y, &y_enc).unwrap();
        assert_eq!(probs.nrows(), 3);
        assert_eq!(y_cal.len(), 3);
        assert_eq!(y_cal_enc.len(), 3);
    }

    #[test]
    fn prefit_requires_a_fitted_model() {
        let (x, y) = toy();
        let encoder = LabelEncoder::fit(&y);
        let mut rng = StdRng::seed_from_u64(0);
        let err = EnsembleClassifier::fit(&nb(), encoder, CvStrategy::Prefit, x.view(), &y, None, None, &mut rng);
        assert!(err.is_err());
    }
}
