//! Outlier detection by distance to a fitted centroid.
//!
//! Follows the usual outlier-detector label convention: `1` for inliers and
//! `-1` for anomalies.
use ndarray::{Array1, ArrayView2, Axis};

use super::{check_columns, Scorer};
use crate::PredictionError;

/// Label of rows within the threshold.
pub const INLIER: f64 = 1.0;
/// Label of anomalous rows.
pub const OUTLIER: f64 = -1.0;

/// Flags rows farther than `threshold` from `centroid`.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct CentroidAnomalyDetector {
    centroid: Array1<f64>,
    threshold: f64,
}

impl CentroidAnomalyDetector {
    /// Build a detector, rejecting an empty centroid or a negative threshold.
    pub fn new(centroid: Array1<f64>, threshold: f64) -> Result<Self, String> {
        let detector = CentroidAnomalyDetector {
            centroid,
            threshold,
        };
        detector.validate()?;

        Ok(detector)
    }

    pub(crate) fn validate(&self) -> Result<(), String> {
        if self.centroid.is_empty() {
            return Err("centroid is empty".to_owned());
        }

        if !(self.threshold.is_finite() && self.threshold >= 0.0) {
            return Err(format!("invalid threshold {}", self.threshold));
        }

        Ok(())
    }

    /// Euclidean distance of every row from the centroid.
    pub fn distances(&self, x: ArrayView2<f64>) -> Result<Array1<f64>, PredictionError> {
        check_columns(&x, self.centroid.len())?;

        Ok(x
            .axis_iter(Axis(0))
            .map(|row| {
                (&row - &self.centroid)
                    .iter()
                    .map(|d| d * d)
                    .sum::<f64>()
                    .sqrt()
            })
            .collect())
    }
}

impl Scorer for CentroidAnomalyDetector {
    fn predict(&self, x: ArrayView2<f64>) -> Result<Array1<f64>, PredictionError> {
        self.distances(x)?
            .iter()
            .map(|&distance| {
                if distance.is_nan() {
                    Err(PredictionError::InvalidPredictionValue)
                } else if distance > self.threshold {
                    Ok(OUTLIER)
                } else {
                    Ok(INLIER)
                }
            })
            .collect()
    }
}
