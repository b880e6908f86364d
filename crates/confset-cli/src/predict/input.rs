use anyhow::{Context, Result};
use clap::ArgMatches;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;
use std::str::FromStr;

use confset_classifiers::config::{
    AggScores, ConformalConfig, CvStrategy, IncludeLastLabel, Method, PredictOptions,
};

use crate::util::validate_tsv_or_csv_file;

/// Everything `confset predict` needs: the classifier, the alphas and the data files.
#[derive(Debug, Deserialize, Serialize, Clone, PartialEq)]
pub struct PredictSetsConfig {
    pub version: String,
    pub classifier: ConformalConfig,
    pub alpha: Vec<f64>,
    pub predict: PredictOptions,
    pub label_column: String,
    pub calibration_data: String,
    pub test_data: String,
    pub output_file: String,
}

impl Default for PredictSetsConfig {
    fn default() -> Self {
        PredictSetsConfig {
            version: clap::crate_version!().to_string(),
            classifier: ConformalConfig::default(),
            alpha: vec![0.1],
            predict: PredictOptions::default(),
            label_column: String::from("label"),
            calibration_data: String::new(),
            test_data: String::new(),
            output_file: String::from("confset_predictions.tsv"),
        }
    }
}

impl PredictSetsConfig {
    /// Parse a JSON config, falling back to defaults field by field.
    pub fn from_json(config_json: &str) -> Result<Self> {
        let partial: serde_json::Value =
            serde_json::from_str(config_json).context("Config is not valid JSON")?;
        let mut config = PredictSetsConfig::default();

        macro_rules! load_or_default {
            ($field:ident) => {
                if let Some(val) = partial.get(stringify!($field)) {
                    match serde_json::from_value(val.clone()) {
                        Ok(parsed) => config.$field = parsed,
                        Err(e) => log::warn!(
                            "Config Invalid value for '{}' ({}), using default: {:?}",
                            stringify!($field),
                            e,
                            config.$field
                        ),
                    }
                } else {
                    log::warn!(
                        "Config Missing field '{}', using default: {:?}",
                        stringify!($field),
                        config.$field
                    );
                }
            };
        }

        load_or_default!(classifier);
        load_or_default!(alpha);
        load_or_default!(predict);
        load_or_default!(label_column);
        load_or_default!(calibration_data);
        load_or_default!(test_data);
        load_or_default!(output_file);

        Ok(config)
    }

    pub fn from_arguments(config_path: &Path, matches: &ArgMatches) -> Result<Self> {
        let config_json = fs::read_to_string(config_path)
            .with_context(|| format!("Failed to read config file: {:?}", config_path))?;
        let mut config = Self::from_json(&config_json)?;
        config.apply_overrides(matches)?;

        validate_tsv_or_csv_file(&config.calibration_data)?;
        validate_tsv_or_csv_file(&config.test_data)?;
        Ok(config)
    }

    /// Apply command line overrides on top of the file values.
    pub fn apply_overrides(&mut self, matches: &ArgMatches) -> Result<()> {
        if let Some(path) = matches.get_one::<String>("calibration_data") {
            self.calibration_data = path.clone();
        }
        if let Some(path) = matches.get_one::<String>("test_data") {
            self.test_data = path.clone();
        }
        if let Some(path) = matches.get_one::<String>("output_file") {
            self.output_file = path.clone();
        }
        if let Some(method) = matches.get_one::<String>("method") {
            self.classifier.method = Method::from_str(method)?;
        }
        if let Some(cv) = matches.get_one::<String>("cv") {
            self.classifier.cv = CvStrategy::from_str(cv).map_err(anyhow::Error::msg)?;
        }
        if let Some(alphas) = matches.get_many::<f64>("alpha") {
            self.alpha = alphas.copied().collect();
        }
        if let Some(policy) = matches.get_one::<String>("include_last_label") {
            self.predict.include_last_label = IncludeLastLabel::from_str(policy)?;
        }
        if let Some(agg) = matches.get_one::<String>("agg_scores") {
            self.predict.agg_scores = AggScores::from_str(agg).map_err(anyhow::Error::msg)?;
        }
        if let Some(seed) = matches.get_one::<u64>("random_state") {
            self.classifier.random_state = Some(*seed);
        }
        Ok(())
    }
}
