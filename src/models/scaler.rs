//! Fitted feature scalers.
use ndarray::{Array1, Array2, ArrayView2};

use super::{check_columns, Transformer};
use crate::PredictionError;

/// Standardisation with stored statistics.
///
/// Either statistic may be absent, mirroring scalers fitted without centering
/// or without scaling.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct StandardScaler {
    #[serde(default)]
    mean: Option<Array1<f64>>,
    #[serde(default)]
    scale: Option<Array1<f64>>,
}

impl StandardScaler {
    /// Build a scaler, rejecting zero or non-finite scales.
    pub fn new(mean: Option<Array1<f64>>, scale: Option<Array1<f64>>) -> Result<Self, String> {
        let scaler = StandardScaler { mean, scale };
        scaler.validate()?;

        Ok(scaler)
    }

    /// Number of features the scaler was fitted on, if it stores any statistic.
    pub fn num_features(&self) -> Option<usize> {
        self.mean
            .as_ref()
            .or_else(|| self.scale.as_ref())
            .map(|x| x.len())
    }

    pub(crate) fn validate(&self) -> Result<(), String> {
        if let (Some(mean), Some(scale)) = (&self.mean, &self.scale) {
            if mean.len() != scale.len() {
                return Err(format!(
                    "mean has {} entries but scale has {}",
                    mean.len(),
                    scale.len()
                ));
            }
        }

        if let Some(scale) = &self.scale {
            if scale.iter().any(|&s| s == 0.0 || !s.is_finite()) {
                return Err("scale entries must be finite and non-zero".to_owned());
            }
        }

        Ok(())
    }
}

impl Transformer for StandardScaler {
    fn transform(&self, x: ArrayView2<f64>) -> Result<Array2<f64>, PredictionError> {
        if let Some(num_features) = self.num_features() {
            check_columns(&x, num_features)?;
        }

        let mut out = x.to_owned();

        if let Some(mean) = &self.mean {
            out -= mean;
        }

        if let Some(scale) = &self.scale {
            out /= scale;
        }

        Ok(out)
    }
}

/// Rescaling to a fitted range, stored as `x * scale + min`.
/// Range scaler with fitted per-feature `min` offsets and `scale` factors.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct MinMaxScaler {
    min: Array1<f64>,
    scale: Array1<f64>,
}

impl MinMaxScaler {
    /// Build a scaler, checking that `min` and `scale` have equal length.
    pub fn new(min: Array1<f64>, scale: Array1<f64>) -> Result<Self, String> {
        let scaler = MinMaxScaler { min, scale };
        scaler.validate()?;

        Ok(scaler)
    }

    pub(crate) fn validate(&self) -> Result<(), String> {
        if self.min.len() != self.scale.len() {
            return Err(format!(
                "min has {} entries but scale has {}",
                self.min.len(),
                self.scale.len()
            ));
        }

        Ok(())
    }
}

impl Transformer for MinMaxScaler {
    fn transform(&self, x: ArrayView2<f64>) -> Result<Array2<f64>, PredictionError> {
        check_columns(&x, self.min.len())?;

        let mut out = x.to_owned();
        out *= &self.scale;
        out += &self.min;

        Ok(out)
    }
}
