use ndarray::{Array2, Array3, ArrayView2, Axis};

use crate::classifier::ConformalClassifier;
use crate::config::PredictOptions;
use crate::error::Result;

/// Split a conformal prediction into its three steps: raw model scores,
/// uncertainty bounds built from those scores and the best point
/// prediction.
pub trait ConformalPredictor {
    /// Raw model output used by the calibration (probabilities for classifiers).
    type Score;
    /// Prediction intervals or prediction sets.
    type Bounds;
    /// Point prediction.
    type Best;

    fn predict_score(&self, x: ArrayView2<f64>) -> Result<Self::Score>;

    fn predict_bounds(
        &self,
        x: ArrayView2<f64>,
        y_pred: &Self::Score,
        alphas: &[f64],
        options: PredictOptions,
    ) -> Result<Self::Bounds>;

    fn predict_best(&self, y_pred: &Self::Score) -> Result<Self::Best>;

    /// Point prediction alone when `alphas` is `None`, otherwise together
    /// with the bounds.
    fn predict(
        &self,
        x: ArrayView2<f64>,
        alphas: Option<&[f64]>,
        options: PredictOptions,
    ) -> Result<(Self::Best, Option<Self::Bounds>)> {
        let y_pred = self.predict_score(x)?;
        let bounds = match alphas {
            Some(alphas) => Some(self.predict_bounds(x, &y_pred, alphas, options)?),
            None => None,
        };
        Ok((self.predict_best(&y_pred)?, bounds))
    }
}

impl ConformalPredictor for ConformalClassifier {
    type Score = Array2<f64>;
    type Bounds = Array3<bool>;
    type Best = Vec<i32>;

    fn predict_score(&self, x: ArrayView2<f64>) -> Result<Array2<f64>> {
        self.predict_proba(x)
    }

    fn predict_bounds(
        &self,
        x: ArrayView2<f64>,
        _y_pred: &Array2<f64>,
        alphas: &[f64],
        options: PredictOptions,
    ) -> Result<Array3<bool>> {
        Ok(self.predict_sets(x, alphas, options)?.sets)
    }

    /// Most probable class, ties to the smallest label.
    fn predict_best(&self, y_pred: &Array2<f64>) -> Result<Vec<i32>> {
        let classes = self.classes()?;
        Ok(y_pred
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
}
