//! Integration tests for config parsing, util helpers and output writing.

use std::path::Path;

use confset_classifiers::config::{AggScores, IncludeLastLabel, Method};
use confset_cli::predict::input::PredictSetsConfig;
use confset_cli::util::{output_delimiter, validate_tsv_or_csv_file};

// ---------------------------------------------------------------------------
// validate_tsv_or_csv_file
// ---------------------------------------------------------------------------

#[test]
fn validate_tsv_file_exists() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("data.tsv");
    std::fs::File::create(&path).unwrap();
    assert!(validate_tsv_or_csv_file(path.to_str().unwrap()).is_ok());
}

#[test]
fn validate_wrong_extension_errors() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("data.txt");
    std::fs::File::create(&path).unwrap();
    assert!(validate_tsv_or_csv_file(path.to_str().unwrap()).is_err());
}

#[test]
fn validate_nonexistent_file_errors() {
    assert!(validate_tsv_or_csv_file("/nonexistent/path/data.csv").is_err());
}

#[test]
fn delimiter_follows_extension() {
    assert_eq!(output_delimiter(Path::new("out.tsv")), b'\t');
    assert_eq!(output_delimiter(Path::new("out.TSV")), b'\t');
    assert_eq!(output_delimiter(Path::new("out.csv")), b',');
}

// ---------------------------------------------------------------------------
// PredictSetsConfig
// ---------------------------------------------------------------------------

#[test]
fn default_config_values() {
    let cfg = PredictSetsConfig::default();
    assert_eq!(cfg.alpha, vec![0.1]);
    assert_eq!(cfg.label_column, "label");
    assert_eq!(cfg.classifier.method, Method::Lac);
    assert_eq!(cfg.predict.include_last_label, IncludeLastLabel::Include);
}

#[test]
fn partial_json_keeps_defaults_for_missing_fields() {
    let cfg = PredictSetsConfig::from_json(
        r#"{"classifier": {"method": {"name": "raps", "size_raps": 0.3}}, "predict": {"include_last_label": "randomized", "agg_scores": "crossval"}}"#,
    )
    .unwrap();
    assert_eq!(cfg.classifier.method, Method::Raps { size_raps: 0.3 });
    assert_eq!(cfg.predict.include_last_label, IncludeLastLabel::Randomized);
    assert_eq!(cfg.predict.agg_scores, AggScores::Crossval);
    assert_eq!(cfg.alpha, vec![0.1]);
    assert_eq!(cfg.output_file, "confset_predictions.tsv");
}

#[test]
fn invalid_field_falls_back_to_default() {
    let cfg = PredictSetsConfig::from_json(r#"{"alpha": "lots", "label_column": "y"}"#).unwrap();
    assert_eq!(cfg.alpha, vec![0.1]);
    assert_eq!(cfg.label_column, "y");
}

#[test]
fn malformed_json_is_an_error() {
    assert!(PredictSetsConfig::from_json("{not json").is_err());
}

#[test]
fn config_round_trips_through_json() {
    let cfg = PredictSetsConfig {
        alpha: vec![0.05, 0.2],
        ..PredictSetsConfig::default()
    };
    let json = serde_json::to_string_pretty(&cfg).unwrap();
    assert!(json.contains("\"calibration_data\""));
    let back = PredictSetsConfig::from_json(&json).unwrap();
    assert_eq!(back, cfg);
}
