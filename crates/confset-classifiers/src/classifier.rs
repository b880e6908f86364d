use ndarray::{Array1, Array2, Array3, ArrayView2, Axis};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

use crate::config::{AggScores, ConformalConfig, CvStrategy, IncludeLastLabel, Method, PredictOptions};
use crate::conformity::{
    cumulated_sets_crossval, cumulated_sets_mean, find_lambda_star, k_star_from_positions,
    lac_sets_crossval, lac_sets_mean, regularize_scores, top_k_sets, true_label_positions,
    ConformityScores, RapsParams,
};
use crate::data_handling::{
    label_counts, non_null_weight_indices, select_rows, select_values, shuffle_split, unique_labels,
    LabelEncoder,
};
use crate::error::{ConformalError, Result};
use crate::models::{EnsembleClassifier, Estimator};
use crate::preprocessing::check_probabilities_normalized_3d;
use crate::stats::{check_alpha, check_alpha_and_n_samples, compute_quantiles, compute_quantiles_per_column};

/// Held-out split used to tune RAPS.
#[derive(Debug, Clone)]
struct RapsCalibration {
    probs: Array2<f64>,
    y_enc: Vec<usize>,
    positions: Vec<usize>,
}

#[derive(Debug)]
struct FittedState {
    encoder: LabelEncoder,
    ensemble: EnsembleClassifier,
    scores: ConformityScores,
    raps: Option<RapsCalibration>,
    /// Seeds the tie-break draws of `predict_sets`. Drawn after calibration
    /// so prediction never replays the calibration stream.
    predict_seed: u64,
}

/// One uniform per test sample for the randomized last-label rule.
fn tie_break_uniforms(state: &FittedState, n_samples: usize) -> Vec<f64> {
    let mut rng = StdRng::seed_from_u64(state.predict_seed);
    (0..n_samples).map(|_| rng.gen::<f64>()).collect()
}

/// Output of [`ConformalClassifier::predict_sets`].
#[derive(Debug, Clone, PartialEq)]
pub struct PredictionSets {
    /// Point prediction of the single estimator.
    pub y_pred: Vec<i32>,
    /// `sets[(i, c, a)]`: class `c` belongs to the set of sample `i` at `alphas[a]`.
    pub sets: Array3<bool>,
    /// Threshold used per alpha. With crossval aggregation this is the
    /// count bound `(n + 1)(1 - alpha)`.
    pub quantiles: Array1<f64>,
    /// RAPS parameters chosen per alpha.
    pub raps: Option<Vec<RapsParams>>,
}

impl PredictionSets {
    pub fn n_alphas(&self) -> usize {
        self.sets.len_of(Axis(2))
    }

    /// Sets at one confidence level, shape (n_samples, n_classes).
    pub fn at_alpha(&self, alpha_index: usize) -> ArrayView2<'_, bool> {
        self.sets.index_axis(Axis(2), alpha_index)
    }

    /// Labels in the set of `sample` at `alphas[alpha_index]`.
    pub fn labels(&self, classes: &[i32], sample: usize, alpha_index: usize) -> Vec<i32> {
        classes
            .iter()
            .enumerate()
            .filter(|&(c, _)| self.sets[(sample, c, alpha_index)])
            .map(|(_, &label)| label)
            .collect()
    }
}

/// Conformal prediction sets on top of any [`ClassifierModel`](crate::models::ClassifierModel).
///
/// `fit` calibrates conformity scores; `predict_sets` turns new samples into
/// sets that contain the true label with probability at least `1 - alpha`
/// under exchangeability.
pub struct ConformalClassifier {
    estimator: Estimator,
    config: ConformalConfig,
    fitted: Option<FittedState>,
}

impl ConformalClassifier {
    pub fn new(estimator: Estimator, config: ConformalConfig) -> Self {
        ConformalClassifier {
            estimator,
            config,
            fitted: None,
        }
    }

    /// Classifier with the model described by `config.model`.
    pub fn from_config(config: ConformalConfig) -> Self {
        let estimator = Estimator::from_config(config.model.clone());
        ConformalClassifier::new(estimator, config)
    }

    pub fn config(&self) -> &ConformalConfig {
        &self.config
    }

    pub fn method(&self) -> Method {
        self.config.method
    }

    pub fn is_fitted(&self) -> bool {
        self.fitted.is_some()
    }

    /// Labels in encoded order; column `c` of every set belongs to `classes()[c]`.
    pub fn classes(&self) -> Result<&[i32]> {
        Ok(self.state()?.encoder.classes())
    }

    pub fn label_encoder(&self) -> Result<&LabelEncoder> {
        Ok(&self.state()?.encoder)
    }

    /// Calibration conformity scores computed by the last `fit`.
    pub fn conformity_scores(&self) -> Result<&ConformityScores> {
        Ok(&self.state()?.scores)
    }

    fn state(&self) -> Result<&FittedState> {
        self.fitted.as_ref().ok_or(ConformalError::NotFitted)
    }

    fn rng(&self) -> StdRng {
        match self.config.random_state {
            Some(seed) => StdRng::seed_from_u64(seed),
            None => StdRng::from_entropy(),
        }
    }

    fn check_parameters(&self) -> Result<()> {
        if let Method::Raps { .. } = self.config.method {
            if !self.config.cv.is_single_estimator() {
                return Err(ConformalError::IncompatibleCv(self.config.cv.to_string()));
            }
        }
        Ok(())
    }

    /// Resolve the global class ordering.
    ///
    /// A prefit estimator fixes the classes; calibration labels it never
    /// saw are rejected.
    fn resolve_classes(&self, y: &[i32]) -> Result<LabelEncoder> {
        let seen = unique_labels(y);
        match (&self.estimator, self.config.cv) {
            (Estimator::Prefit(model), CvStrategy::Prefit) => {
                let encoder = LabelEncoder::fit(model.classes());
                let missing: Vec<i32> = seen
                    .iter()
                    .copied()
                    .filter(|&label| encoder.encode(label).is_none())
                    .collect();
                if !missing.is_empty() {
                    return Err(ConformalError::ClassMismatch { missing });
                }
                if encoder.n_classes() > seen.len() {
                    log::warn!(
                        "WARNING: your calibration dataset has less labels than your training dataset \
                         (training has {} unique labels while calibration have {} unique labels)",
                        encoder.n_classes(),
                        seen.len()
                    );
                }
                Ok(encoder)
            }
            _ => Ok(LabelEncoder::fit(&seen)),
        }
    }

    fn check_target(&self, y: &[i32]) -> Result<()> {
        let is_binary = unique_labels(y).len() == 2;
        if is_binary && self.config.method != Method::Lac {
            return Err(ConformalError::InvalidTargetType(self.config.method.to_string()));
        }
        Ok(())
    }

    /// Fit the estimator(s) and compute the calibration conformity scores.
    ///
    /// Samples with a null weight are removed first. With RAPS a share
    /// `size_raps` of the data is held out to tune the regularization at
    /// predict time. On error the classifier is left unfitted.
    ///
    /// # Arguments
    ///
    /// * `x` - Features (n_samples, n_features).
    /// * `y` - Labels.
    /// * `sample_weight` - Optional weights passed to the underlying model.
    /// * `groups` - Optional group ids kept together by k-fold splits.
    pub fn fit(
        &mut self,
        x: ArrayView2<f64>,
        y: &[i32],
        sample_weight: Option<&[f64]>,
        groups: Option<&[usize]>,
    ) -> Result<()> {
        self.fitted = None;
        self.check_parameters()?;
        if x.nrows() != y.len() {
            return Err(ConformalError::Shape(format!(
                "{} rows in x for {} labels",
                x.nrows(),
                y.len()
            )));
        }
        if let Some(g) = groups {
            if g.len() != y.len() {
                return Err(ConformalError::Shape(format!(
                    "{} group labels for {} samples",
                    g.len(),
                    y.len()
                )));
            }
        }

        let kept = non_null_weight_indices(sample_weight, y.len())?;
        let x = select_rows(x, &kept);
        let y = select_values(y, &kept);
        let sample_weight = sample_weight.map(|w| select_values(w, &kept));
        let groups = groups.map(|g| select_values(g, &kept));

        let encoder = self.resolve_classes(&y)?;
        let y_enc = encoder.transform(&y)?;
        self.check_target(&y)?;

        let mut rng = self.rng();

        let (x_cal, y_cal, y_cal_enc, w_cal, g_cal, raps_split) = match self.config.method {
            Method::Raps { size_raps } => {
                let (train, held_out) = shuffle_split(y.len(), size_raps, &mut rng)?;
                log::debug!(
                    "Holding out {} of {} samples to tune RAPS",
                    held_out.len(),
                    y.len()
                );
                (
                    select_rows(x.view(), &train),
                    select_values(&y, &train),
                    select_values(&y_enc, &train),
                    sample_weight.as_ref().map(|w| select_values(w, &train)),
                    groups.as_ref().map(|g| select_values(g, &train)),
                    Some((select_rows(x.view(), &held_out), select_values(&y_enc, &held_out))),
                )
            }
            _ => (x, y, y_enc, sample_weight, groups, None),
        };

        let ensemble = EnsembleClassifier::fit(
            &self.estimator,
            encoder.clone(),
            self.config.cv,
            x_cal.view(),
            &y_cal,
            w_cal.as_deref(),
            g_cal.as_deref(),
            &mut rng,
        )?;
        let (probs, y_scored, y_scored_enc) = ensemble.predict_proba_calib(x_cal.view(), &y_cal, &y_cal_enc)?;

        let raps = match raps_split {
            Some((x_raps, y_raps_enc)) => {
                let probs = ensemble.single_predict_proba(x_raps.view())?;
                let positions = true_label_positions(probs.view(), &y_raps_enc)?;
                Some(RapsCalibration {
                    probs,
                    y_enc: y_raps_enc,
                    positions,
                })
            }
            None => None,
        };

        let scores = ConformityScores::compute(self.config.method, probs.view(), &y_scored_enc, &mut rng)?;
        let predict_seed = rng.gen::<u64>();

        log::info!(
            "Calibrated {} method on {} samples ({} classes, cv={}); samples per class: {:?}",
            self.config.method,
            scores.len(),
            encoder.n_classes(),
            self.config.cv,
            label_counts(&y_scored)
        );

        self.fitted = Some(FittedState {
            encoder,
            ensemble,
            scores,
            raps,
            predict_seed,
        });
        Ok(())
    }

    /// Point predictions of the single estimator.
    pub fn predict(&self, x: ArrayView2<f64>) -> Result<Vec<i32>> {
        self.state()?.ensemble.single_predict(x)
    }

    /// Probabilities of the single estimator, columns in [`classes`](Self::classes) order.
    pub fn predict_proba(&self, x: ArrayView2<f64>) -> Result<Array2<f64>> {
        self.state()?.ensemble.single_predict_proba(x)
    }

    /// Prediction sets for every alpha.
    ///
    /// Takes `&self`: RAPS parameters and thresholds are local to the call.
    /// Tie-break draws come from a seed fixed at fit time, so repeated calls
    /// return the same sets and never reuse the calibration draws.
    pub fn predict_sets(
        &self,
        x: ArrayView2<f64>,
        alphas: &[f64],
        options: PredictOptions,
    ) -> Result<PredictionSets> {
        let state = self.state()?;
        let alpha = check_alpha(alphas)?;
        let y_pred = state.ensemble.single_predict(x)?;

        let n = state.scores.len();
        check_alpha_and_n_samples(alphas, n)?;

        let method = self.config.method;
        let mean_regime = self.config.cv.is_single_estimator()
            || options.agg_scores == AggScores::Mean
            || matches!(method, Method::Naive | Method::TopK);
        let agg = if mean_regime { AggScores::Mean } else { AggScores::Crossval };

        let probs = state.ensemble.predict(x, agg)?;
        check_probabilities_normalized_3d(probs.view())?;

        let include_last_label = options.include_last_label;
        let uniforms: Option<Vec<f64>> = match include_last_label {
            IncludeLastLabel::Randomized => Some(tie_break_uniforms(state, x.nrows())),
            _ => None,
        };
        let uniforms = uniforms.as_deref();
        let probs_mean = probs.index_axis(Axis(2), 0);
        let crossval_bound = || alpha.mapv(|a| (n as f64 + 1.0) * (1.0 - a));

        let (sets, quantiles, raps) = match (&state.scores, method) {
            (ConformityScores::Naive { .. }, _) => {
                let quantiles = alpha.mapv(|a| 1.0 - a);
                let sets = cumulated_sets_mean(
                    probs_mean,
                    &quantiles.to_vec(),
                    include_last_label,
                    None,
                    uniforms,
                )?;
                (sets, quantiles, None)
            }
            (ConformityScores::Lac(scores), _) => {
                if mean_regime {
                    let quantiles = compute_quantiles(scores.view(), alphas)?;
                    (lac_sets_mean(probs_mean, &quantiles.to_vec()), quantiles, None)
                } else {
                    let sets = lac_sets_crossval(probs.view(), scores.view(), alphas)?;
                    (sets, crossval_bound(), None)
                }
            }
            (ConformityScores::Cumulated { scores, cutoff }, Method::Raps { .. }) => {
                let held_out = state.raps.as_ref().ok_or(ConformalError::NotFitted)?;
                check_alpha_and_n_samples(alphas, held_out.positions.len())?;
                let k_star = k_star_from_positions(&held_out.positions, alphas)?;
                let lambda_star = find_lambda_star(
                    held_out.probs.view(),
                    &held_out.y_enc,
                    alphas,
                    &k_star,
                    include_last_label,
                )?;
                let params: Vec<RapsParams> = lambda_star
                    .iter()
                    .zip(&k_star)
                    .map(|(&lambda, &k_star)| RapsParams { lambda, k_star })
                    .collect();
                log::debug!("RAPS parameters per alpha: {:?}", params);

                let regularized = regularize_scores(scores.view(), cutoff, &params)?;
                let quantiles = compute_quantiles_per_column(regularized.view(), alphas)?;
                let sets = cumulated_sets_mean(
                    probs_mean,
                    &quantiles.to_vec(),
                    include_last_label,
                    Some(params.as_slice()),
                    uniforms,
                )?;
                (sets, quantiles, Some(params))
            }
            (ConformityScores::Cumulated { scores, .. }, _) => {
                if mean_regime {
                    let quantiles = compute_quantiles(scores.view(), alphas)?;
                    let sets = cumulated_sets_mean(
                        probs_mean,
                        &quantiles.to_vec(),
                        include_last_label,
                        None,
                        uniforms,
                    )?;
                    (sets, quantiles, None)
                } else {
                    let sets = cumulated_sets_crossval(
                        probs.view(),
                        scores.view(),
                        alphas,
                        include_last_label,
                        uniforms,
                    )?;
                    (sets, crossval_bound(), None)
                }
            }
            (ConformityScores::TopK(scores), _) => {
                let quantiles = compute_quantiles(scores.view(), alphas)?;
                (top_k_sets(probs_mean, &quantiles.to_vec()), quantiles, None)
            }
        };

        Ok(PredictionSets {
            y_pred,
            sets,
            quantiles,
            raps,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ModelConfig;
    use crate::conformity::true_label_cumsum;
    use crate::models::{ClassifierModel, LogisticRegression};
    use ndarray::array;

    fn blobs() -> (Array2<f64>, Vec<i32>) {
        let mut rows = Vec::new();
        let mut y = Vec::new();
        for i in 0..60 {
            let class = (i % 3) as i32;
            let offset = (i / 3) as f64 * 0.01;
            let (cx, cy) = match class {
                0 => (0.0, 0.0),
                1 => (3.0, 0.0),
                _ => (0.0, 3.0),
            };
            rows.push([cx + offset, cy - offset]);
            y.push(class);
        }
        let x = Array2::from_shape_fn((rows.len(), 2), |(i, j)| rows[i][j]);
        (x, y)
    }

    fn config(method: Method, cv: CvStrategy) -> ConformalConfig {
        ConformalConfig {
            method,
            cv,
            random_state: Some(42),
            model: ModelConfig::default(),
        }
    }

    #[test]
    fn raps_rejects_cross_validation() {
        let (x, y) = blobs();
        let mut clf = ConformalClassifier::from_config(config(
            Method::Raps { size_raps: 0.2 },
            CvStrategy::KFold { n_splits: 3, shuffle: false },
        ));
        let err = clf.fit(x.view(), &y, None, None).unwrap_err();
        assert!(matches!(err, ConformalError::IncompatibleCv(ref cv) if cv == "k_fold"));
        assert!(!clf.is_fitted());
    }

    #[test]
    fn binary_target_requires_lac() {
        let (x, y) = blobs();
        let y: Vec<i32> = y.iter().map(|&c| i32::from(c > 0)).collect();
        let mut clf = ConformalClassifier::from_config(config(Method::Aps, CvStrategy::Split { test_size: 0.3 }));
        assert!(matches!(
            clf.fit(x.view(), &y, None, None),
            Err(ConformalError::InvalidTargetType(_))
        ));
    }

    #[test]
    fn prefit_rejects_unknown_calibration_labels() {
        let (x, y) = blobs();
        let mut model = LogisticRegression::default();
        model.fit(x.view(), &y, None).unwrap();
        let mut y_cal = y.clone();
        y_cal[0] = 7;
        let mut clf = ConformalClassifier::new(Estimator::prefit(model), config(Method::Lac, CvStrategy::Prefit));
        match clf.fit(x.view(), &y_cal, None, None) {
            Err(ConformalError::ClassMismatch { missing }) => assert_eq!(missing, vec![7]),
            other => panic!("unexpected result {:?}", other.map(|_| ())),
        }
    }

    #[test]
    fn predict_before_fit_is_an_error() {
        let clf = ConformalClassifier::from_config(ConformalConfig::default());
        let x = array![[0.0, 0.0]];
        assert!(matches!(clf.predict(x.view()), Err(ConformalError::NotFitted)));
    }

    #[test]
    fn null_weights_drop_calibration_samples() {
        let (x, y) = blobs();
        let mut model = LogisticRegression::default();
        model.fit(x.view(), &y, None).unwrap();
        let mut weights = vec![1.0; y.len()];
        weights[0] = 0.0;
        weights[1] = 0.0;
        let mut clf = ConformalClassifier::new(Estimator::prefit(model), config(Method::Lac, CvStrategy::Prefit));
        clf.fit(x.view(), &y, Some(&weights), None).unwrap();
        assert_eq!(clf.conformity_scores().unwrap().len(), y.len() - 2);
    }

    #[test]
    fn raps_reports_parameters_per_alpha() {
        let (x, y) = blobs();
        let mut clf = ConformalClassifier::from_config(config(
            Method::Raps { size_raps: 0.25 },
            CvStrategy::Split { test_size: 0.4 },
        ));
        clf.fit(x.view(), &y, None, None).unwrap();
        let out = clf.predict_sets(x.view(), &[0.2, 0.5], PredictOptions::default()).unwrap();
        let raps = out.raps.unwrap();
        assert_eq!(raps.len(), 2);
        assert_eq!(out.sets.dim(), (60, 3, 2));
    }

    // ---------------------------------------------------------------------------
    // Randomized tie-break
    // ---------------------------------------------------------------------------

    #[test]
    fn tie_break_draws_differ_from_calibration_draws() {
        let (x, y) = blobs();
        let mut model = LogisticRegression::default();
        model.fit(x.view(), &y, None).unwrap();
        let mut clf = ConformalClassifier::new(Estimator::prefit(model), config(Method::Aps, CvStrategy::Prefit));
        clf.fit(x.view(), &y, None, None).unwrap();

        // Recover the calibration uniforms from score = mass - u * p(true label).
        let probs = clf.predict_proba(x.view()).unwrap();
        let y_enc = clf.label_encoder().unwrap().transform(&y).unwrap();
        let (mass, _) = true_label_cumsum(probs.view(), &y_enc).unwrap();
        let scores = match clf.conformity_scores().unwrap() {
            ConformityScores::Cumulated { scores, .. } => scores.clone(),
            other => panic!("unexpected scores {:?}", other),
        };
        let calibration: Vec<f64> = (0..y.len())
            .map(|i| (mass[i] - scores[i]) / probs[(i, y_enc[i])])
            .collect();

        let state = clf.state().unwrap();
        let prediction = tie_break_uniforms(state, y.len());
        let shared = calibration
            .iter()
            .zip(&prediction)
            .filter(|(a, b)| (*a - *b).abs() < 1e-6)
            .count();
        assert_eq!(shared, 0);
    }

    #[test]
    fn randomized_sets_are_stable_across_calls() {
        let (x, y) = blobs();
        let mut clf = ConformalClassifier::from_config(config(Method::Aps, CvStrategy::Split { test_size: 0.4 }));
        clf.fit(x.view(), &y, None, None).unwrap();
        let options = PredictOptions {
            include_last_label: IncludeLastLabel::Randomized,
            ..PredictOptions::default()
        };
        let first = clf.predict_sets(x.view(), &[0.1, 0.3], options).unwrap();
        let second = clf.predict_sets(x.view(), &[0.1, 0.3], options).unwrap();
        assert_eq!(first, second);
    }
}
