//! End-to-end calibration on synthetic Gaussian blobs.

use std::sync::OnceLock;

use confset_classifiers::config::{
    AggScores, ConformalConfig, CvStrategy, IncludeLastLabel, Method, ModelConfig, ModelType,
    PredictOptions,
};
use confset_classifiers::stats::{coverage_score, mean_set_size};
use confset_classifiers::{ConformalClassifier, ConformalError};
use ndarray::Array2;
use proptest::prelude::*;
use rand::distributions::Distribution;
use rand::rngs::StdRng;
use rand::SeedableRng;
use statrs::distribution::Normal;

const CENTERS: [(f64, f64); 3] = [(0.0, 0.0), (2.5, 0.0), (0.0, 2.5)];

fn blobs(n: usize, seed: u64) -> (Array2<f64>, Vec<i32>) {
    let mut rng = StdRng::seed_from_u64(seed);
    let noise = Normal::new(0.0, 1.0).unwrap();
    let mut x = Array2::<f64>::zeros((n, 2));
    let mut y = Vec::with_capacity(n);
    for i in 0..n {
        let class = i % CENTERS.len();
        let (cx, cy) = CENTERS[class];
        x[(i, 0)] = cx + noise.sample(&mut rng);
        x[(i, 1)] = cy + noise.sample(&mut rng);
        y.push(class as i32);
    }
    (x, y)
}

fn fitted(method: Method, cv: CvStrategy, n: usize) -> ConformalClassifier {
    let _ = env_logger::builder().is_test(true).try_init();
    let config = ConformalConfig {
        method,
        cv,
        random_state: Some(7),
        model: ModelConfig::default(),
    };
    let mut clf = ConformalClassifier::from_config(config);
    let (x, y) = blobs(n, 1);
    clf.fit(x.view(), &y, None, None).unwrap();
    clf
}

fn coverage(clf: &ConformalClassifier, alpha: f64, options: PredictOptions) -> (f64, f64) {
    let (x_test, y_test) = blobs(900, 2);
    let out = clf.predict_sets(x_test.view(), &[alpha], options).unwrap();
    let y_enc = clf.label_encoder().unwrap().transform(&y_test).unwrap();
    let sets = out.at_alpha(0);
    (coverage_score(&y_enc, sets), mean_set_size(sets))
}

fn include() -> PredictOptions {
    PredictOptions::default()
}

// ---------------------------------------------------------------------------
// Coverage
// ---------------------------------------------------------------------------

#[test]
fn lac_split_reaches_target_coverage() {
    let clf = fitted(Method::Lac, CvStrategy::Split { test_size: 0.5 }, 1000);
    let (cov, size) = coverage(&clf, 0.1, include());
    assert!(cov >= 0.85, "coverage {}", cov);
    assert!(size < 3.0, "mean set size {}", size);
}

#[test]
fn aps_randomized_reaches_target_coverage() {
    let clf = fitted(Method::Aps, CvStrategy::Split { test_size: 0.5 }, 1000);
    let options = PredictOptions {
        include_last_label: IncludeLastLabel::Randomized,
        ..PredictOptions::default()
    };
    let (cov, _) = coverage(&clf, 0.1, options);
    assert!(cov >= 0.85, "coverage {}", cov);
}

#[test]
fn raps_split_reaches_target_coverage() {
    let clf = fitted(Method::Raps { size_raps: 0.2 }, CvStrategy::Split { test_size: 0.5 }, 1000);
    let (cov, _) = coverage(&clf, 0.1, include());
    assert!(cov >= 0.85, "coverage {}", cov);
}

#[test]
fn kfold_mean_and_crossval_both_cover() {
    let clf = fitted(Method::Lac, CvStrategy::KFold { n_splits: 5, shuffle: true }, 300);
    let (cov_mean, _) = coverage(&clf, 0.1, include());
    let crossval = PredictOptions {
        agg_scores: AggScores::Crossval,
        ..PredictOptions::default()
    };
    let (cov_cross, _) = coverage(&clf, 0.1, crossval);
    assert!(cov_mean >= 0.85, "mean coverage {}", cov_mean);
    assert!(cov_cross >= 0.85, "crossval coverage {}", cov_cross);
}

#[test]
fn aps_crossval_reports_count_bound() {
    let clf = fitted(Method::Aps, CvStrategy::KFold { n_splits: 3, shuffle: false }, 120);
    let (x_test, _) = blobs(20, 3);
    let options = PredictOptions {
        agg_scores: AggScores::Crossval,
        ..PredictOptions::default()
    };
    let out = clf.predict_sets(x_test.view(), &[0.2], options).unwrap();
    assert_eq!(out.sets.dim(), (20, 3, 1));
    assert!((out.quantiles[0] - 121.0 * 0.8).abs() < 1e-9);
}

#[test]
fn naive_bayes_estimator_works_with_leave_one_out() {
    let config = ConformalConfig {
        method: Method::Lac,
        cv: CvStrategy::LeaveOneOut,
        random_state: Some(0),
        model: ModelConfig::new(0.0, ModelType::GaussianNB { var_smoothing: 1e-9 }),
    };
    let mut clf = ConformalClassifier::from_config(config);
    let (x, y) = blobs(45, 5);
    clf.fit(x.view(), &y, None, None).unwrap();
    assert_eq!(clf.conformity_scores().unwrap().len(), 45);
    let out = clf.predict_sets(x.view(), &[0.2], include()).unwrap();
    assert_eq!(out.y_pred.len(), 45);
}

// ---------------------------------------------------------------------------
// Determinism and errors
// ---------------------------------------------------------------------------

#[test]
fn same_seed_gives_identical_randomized_sets() {
    let options = PredictOptions {
        include_last_label: IncludeLastLabel::Randomized,
        ..PredictOptions::default()
    };
    let (x_test, _) = blobs(50, 9);
    let a = fitted(Method::Aps, CvStrategy::Split { test_size: 0.3 }, 200);
    let b = fitted(Method::Aps, CvStrategy::Split { test_size: 0.3 }, 200);
    let out_a = a.predict_sets(x_test.view(), &[0.1, 0.3], options).unwrap();
    let out_b = b.predict_sets(x_test.view(), &[0.1, 0.3], options).unwrap();
    assert_eq!(out_a, out_b);
    assert_eq!(out_a, a.predict_sets(x_test.view(), &[0.1, 0.3], options).unwrap());
}

#[test]
fn refit_failure_leaves_classifier_unfitted() {
    let mut clf = fitted(Method::Aps, CvStrategy::Split { test_size: 0.3 }, 90);
    assert!(clf.is_fitted());
    let (x, _) = blobs(4, 0);
    let y = [0, 1, 0, 1];
    assert!(matches!(
        clf.fit(x.view(), &y, None, None),
        Err(ConformalError::InvalidTargetType(_))
    ));
    assert!(!clf.is_fitted());
}

#[test]
fn alpha_outside_open_interval_is_rejected() {
    let clf = fitted(Method::Lac, CvStrategy::Split { test_size: 0.5 }, 90);
    let (x, _) = blobs(3, 0);
    for alpha in [0.0, 1.0, -0.2, 1.5] {
        assert!(matches!(
            clf.predict_sets(x.view(), &[alpha], include()),
            Err(ConformalError::InvalidAlpha(_))
        ));
    }
}

// ---------------------------------------------------------------------------
// Monotonicity in alpha
// ---------------------------------------------------------------------------

fn shared(method: Method) -> &'static ConformalClassifier {
    static LAC: OnceLock<ConformalClassifier> = OnceLock::new();
    static APS: OnceLock<ConformalClassifier> = OnceLock::new();
    let cell = if method == Method::Lac { &LAC } else { &APS };
    cell.get_or_init(|| fitted(method, CvStrategy::Split { test_size: 0.5 }, 300))
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(24))]

    #[test]
    fn lower_alpha_never_shrinks_sets(
        a in 0.05f64..0.6,
        b in 0.05f64..0.6,
        use_aps in any::<bool>(),
        exclude in any::<bool>(),
    ) {
        let (low, high) = if a <= b { (a, b) } else { (b, a) };
        let clf = shared(if use_aps { Method::Aps } else { Method::Lac });
        let options = PredictOptions {
            include_last_label: IncludeLastLabel::from(!exclude),
            ..PredictOptions::default()
        };
        let (x, _) = blobs(60, 11);
        let out = clf.predict_sets(x.view(), &[low, high], options).unwrap();
        for i in 0..60 {
            let size_low = (0..3).filter(|&c| out.sets[(i, c, 0)]).count();
            let size_high = (0..3).filter(|&c| out.sets[(i, c, 1)]).count();
            prop_assert!(size_low >= size_high, "sample {}: {} < {}", i, size_low, size_high);
        }
    }
}
