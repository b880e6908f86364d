//! Calibrate on one file, predict sets on another, write one row per sample.
use std::path::Path;

use anyhow::{bail, Context, Result};

use confset_classifiers::io::read_labeled_csv;
use confset_classifiers::stats::{coverage_score, mean_set_size};
use confset_classifiers::{ConformalClassifier, PredictionSets};

use super::input::PredictSetsConfig;
use crate::util::output_delimiter;

/// Per-alpha summary logged when the test file carries labels.
#[derive(Debug, Clone, PartialEq)]
pub struct AlphaSummary {
    pub alpha: f64,
    pub coverage: f64,
    pub mean_set_size: f64,
}

#[derive(Debug)]
pub struct PredictionOutput {
    pub classes: Vec<i32>,
    pub alphas: Vec<f64>,
    pub sets: PredictionSets,
    pub summary: Option<Vec<AlphaSummary>>,
}

pub fn run_prediction(config: &PredictSetsConfig) -> Result<PredictionOutput> {
    let calibration = read_labeled_csv(&config.calibration_data, &config.label_column)?;
    let y_cal = match calibration.y.as_ref() {
        Some(y) => y,
        None => bail!(
            "Calibration data {} has no '{}' column",
            config.calibration_data,
            config.label_column
        ),
    };
    log::info!(
        "Loaded {} calibration samples with {} features from {}",
        calibration.n_samples(),
        calibration.feature_names.len(),
        config.calibration_data
    );

    let mut classifier = ConformalClassifier::from_config(config.classifier.clone());
    classifier
        .fit(calibration.x.view(), y_cal, None, None)
        .context("Calibration failed")?;

    let test = read_labeled_csv(&config.test_data, &config.label_column)?;
    if test.feature_names != calibration.feature_names {
        bail!(
            "Test features {:?} do not match calibration features {:?}",
            test.feature_names,
            calibration.feature_names
        );
    }

    let sets = classifier
        .predict_sets(test.x.view(), &config.alpha, config.predict)
        .context("Prediction failed")?;
    let classes = classifier.classes()?.to_vec();

    let summary = match test.y.as_ref() {
        Some(y_test) => match classifier.label_encoder()?.transform(y_test) {
            Ok(y_enc) => Some(
                config
                    .alpha
                    .iter()
                    .enumerate()
                    .map(|(a, &alpha)| {
                        let view = sets.at_alpha(a);
                        AlphaSummary {
                            alpha,
                            coverage: coverage_score(&y_enc, view),
                            mean_set_size: mean_set_size(view),
                        }
                    })
                    .collect::<Vec<_>>(),
            ),
            Err(e) => {
                log::warn!("Skipping coverage report: {}", e);
                None
            }
        },
        None => None,
    };
    if let Some(rows) = summary.as_ref() {
        for row in rows {
            log::info!(
                "alpha={:.3}: coverage {:.4} (target {:.4}), mean set size {:.3}",
                row.alpha,
                row.coverage,
                1.0 - row.alpha,
                row.mean_set_size
            );
        }
    }

    Ok(PredictionOutput {
        classes,
        alphas: config.alpha.clone(),
        sets,
        summary,
    })
}

fn join_labels(labels: &[i32]) -> String {
    labels
        .iter()
        .map(|label| label.to_string())
        .collect::<Vec<_>>()
        .join(";")
}

/// Columns: `row`, `y_pred`, then one `set_alpha_<a>` column per alpha with
/// the set's labels joined by `;`.
pub fn write_output<P: AsRef<Path>>(path: P, output: &PredictionOutput) -> Result<()> {
    let path = path.as_ref();
    let mut writer = csv::WriterBuilder::new()
        .delimiter(output_delimiter(path))
        .from_path(path)
        .with_context(|| format!("Failed to create output file: {}", path.display()))?;

    let mut header = vec![String::from("row"), String::from("y_pred")];
    header.extend(output.alphas.iter().map(|a| format!("set_alpha_{}", a)));
    writer.write_record(&header)?;

    for (i, y_pred) in output.sets.y_pred.iter().enumerate() {
        let mut record = vec![i.to_string(), y_pred.to_string()];
        for a in 0..output.alphas.len() {
            record.push(join_labels(&output.sets.labels(&output.classes, i, a)));
        }
        writer.write_record(&record)?;
    }
    writer.flush()?;
    log::info!(
        "Wrote prediction sets for {} samples to {}",
        output.sets.y_pred.len(),
        path.display()
    );
    Ok(())
}
