//! Models module.
//!
//! Estimators turn a feature matrix into one label per row; transformers
//! (scalers) rewrite a feature matrix with their fitted parameters. Concrete
//! families are chosen by the `kind` tag of the artifact they are loaded from.
use ndarray::{Array1, Array2, ArrayView2};

use crate::PredictionError;

pub mod anomaly;
pub mod factorization;
pub mod linear;
pub mod scaler;
pub mod tree;

use self::anomaly::CentroidAnomalyDetector;
use self::linear::LogisticRegression;
use self::scaler::{MinMaxScaler, StandardScaler};
use self::tree::DecisionTree;

/// Anything that produces one prediction per input row.
pub trait Scorer {
    /// Predict a label for every row of `x`.
    fn predict(&self, x: ArrayView2<f64>) -> Result<Array1<f64>, PredictionError>;
}

/// A fitted preprocessing step.
pub trait Transformer {
    /// Transform `x` using only the stored, fitted parameters.
    fn transform(&self, x: ArrayView2<f64>) -> Result<Array2<f64>, PredictionError>;
}

/// Estimator families that can be loaded from an artifact.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Estimator {
    /// Linear classifier.
    LogisticRegression(LogisticRegression),
    /// Array-encoded decision tree classifier.
    DecisionTree(DecisionTree),
    /// Distance-to-centroid outlier detector.
    CentroidAnomaly(CentroidAnomalyDetector),
}

impl Estimator {
    /// Check internal consistency of the fitted parameters.
    pub fn validate(&self) -> Result<(), String> {
        match self {
            Estimator::LogisticRegression(model) => model.validate(),
            Estimator::DecisionTree(model) => model.validate(),
            Estimator::CentroidAnomaly(model) => model.validate(),
        }
    }

    /// The `kind` tag this estimator is stored under.
    pub fn kind(&self) -> &'static str {
        match self {
            Estimator::LogisticRegression(_) => "logistic_regression",
            Estimator::DecisionTree(_) => "decision_tree",
            Estimator::CentroidAnomaly(_) => "centroid_anomaly",
        }
    }
}

impl Scorer for Estimator {
    fn predict(&self, x: ArrayView2<f64>) -> Result<Array1<f64>, PredictionError> {
        match self {
            Estimator::LogisticRegression(model) => model.predict(x),
            Estimator::DecisionTree(model) => model.predict(x),
            Estimator::CentroidAnomaly(model) => model.predict(x),
        }
    }
}

/// Scaler families that can be loaded from an artifact.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Scaler {
    /// Standardisation: `(x - mean) / scale`.
    Standard(StandardScaler),
    /// Range scaling: `x * scale + min`.
    MinMax(MinMaxScaler),
}

impl Scaler {
    /// Check internal consistency of the fitted statistics.
    pub fn validate(&self) -> Result<(), String> {
        match self {
            Scaler::Standard(scaler) => scaler.validate(),
            Scaler::MinMax(scaler) => scaler.validate(),
        }
    }

    /// The `kind` tag this scaler is stored under.
    pub fn kind(&self) -> &'static str {
        match self {
            Scaler::Standard(_) => "standard",
            Scaler::MinMax(_) => "min_max",
        }
    }
}

impl Transformer for Scaler {
    fn transform(&self, x: ArrayView2<f64>) -> Result<Array2<f64>, PredictionError> {
        match self {
            Scaler::Standard(scaler) => scaler.transform(x),
            Scaler::MinMax(scaler) => scaler.transform(x),
        }
    }
}

/// Return an error unless `x` has `expected` columns.
pub(crate) fn check_columns(x: &ArrayView2<f64>, expected: usize) -> Result<(), PredictionError> {
    if x.ncols() == expected {
        Ok(())
    } else {
        Err(PredictionError::DimensionMismatch {
            expected,
            actual: x.ncols(),
        })
    }
}
