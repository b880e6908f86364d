//! Delimited text reader for feature matrices with an integer label column.
use std::path::Path;

use anyhow::{anyhow, Context, Result};
use csv::StringRecord;
use ndarray::Array2;

/// Features and (optional) labels read from one file.
#[derive(Debug, Clone)]
pub struct LabeledData {
    pub x: Array2<f64>,
    /// `None` when the file has no label column.
    pub y: Option<Vec<i32>>,
    pub feature_names: Vec<String>,
}

impl LabeledData {
    pub fn n_samples(&self) -> usize {
        self.x.nrows()
    }
}

fn delimiter_for(path: &Path) -> u8 {
    match path.extension().and_then(|e| e.to_str()) {
        Some(ext) if ext.eq_ignore_ascii_case("tsv") || ext.eq_ignore_ascii_case("pin") => b'\t',
        _ => b',',
    }
}

fn find_column(headers: &StringRecord, name: &str) -> Option<usize> {
    headers
        .iter()
        .position(|header| header.trim().eq_ignore_ascii_case(name))
}

/// Read a CSV (or `.tsv`) file with a header row.
///
/// Every column other than `label_column` is parsed as an `f64` feature.
/// A missing label column is not an error; the returned `y` is `None`.
pub fn read_labeled_csv<P: AsRef<Path>>(path: P, label_column: &str) -> Result<LabeledData> {
    let path = path.as_ref();
    let mut reader = csv::ReaderBuilder::new()
        .delimiter(delimiter_for(path))
        .has_headers(true)
        .trim(csv::Trim::All)
        .from_path(path)
        .with_context(|| format!("Failed to open data file: {}", path.display()))?;

    let headers = reader
        .headers()
        .context("Failed to read header row")?
        .clone();
    let label_idx = find_column(&headers, label_column);
    let feature_indices: Vec<usize> = (0..headers.len()).filter(|&i| Some(i) != label_idx).collect();
    if feature_indices.is_empty() {
        return Err(anyhow!("No feature columns in {}", path.display()));
    }

    let mut features = Vec::new();
    let mut labels = Vec::new();
    for (row_idx, result) in reader.records().enumerate() {
        let record = result.with_context(|| format!("Failed to read row {}", row_idx + 1))?;

        if let Some(idx) = label_idx {
            let label = record
                .get(idx)
                .ok_or_else(|| anyhow!("Missing label value at row {}", row_idx + 1))?
                .parse::<i32>()
                .with_context(|| format!("Invalid label at row {}", row_idx + 1))?;
            labels.push(label);
        }

        for &idx in &feature_indices {
            let value = record
                .get(idx)
                .ok_or_else(|| anyhow!("Missing feature value at row {}", row_idx + 1))?;
            let parsed = value.parse::<f64>().with_context(|| {
                format!(
                    "Invalid feature '{}' at row {}",
                    headers.get(idx).unwrap_or(""),
                    row_idx + 1
                )
            })?;
            features.push(parsed);
        }
    }

    let n_features = feature_indices.len();
    let n_samples = features.len() / n_features;
    let x = Array2::from_shape_vec((n_samples, n_features), features)
        .context("Failed to build feature matrix")?;
    let feature_names = feature_indices
        .iter()
        .map(|&idx| headers.get(idx).unwrap_or("").to_string())
        .collect();

    log::debug!(
        "Read {} samples with {} features from {}",
        n_samples,
        n_features,
        path.display()
    );

    Ok(LabeledData {
        x,
        y: label_idx.map(|_| labels),
        feature_names,
    })
}
