//! Logistic regression classifier.
//!
//! The decision function is `x . coef^T + intercept`. With a single row of
//! coefficients the model is binary and predicts `classes[1]` whenever the
//! decision is positive; otherwise each row scores one class and the highest
//! score wins (the first class on ties).
use ndarray::{Array1, Array2, ArrayView2, Axis};

use super::{check_columns, Scorer};
use crate::PredictionError;

/// Fitted logistic regression parameters.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct LogisticRegression {
    coef: Array2<f64>,
    intercept: Array1<f64>,
    classes: Vec<i64>,
}

impl LogisticRegression {
    /// Build a model, checking that coefficients, intercepts and classes agree.
    pub fn new(coef: Array2<f64>, intercept: Array1<f64>, classes: Vec<i64>) -> Result<Self, String> {
        let model = LogisticRegression {
            coef,
            intercept,
            classes,
        };
        model.validate()?;

        Ok(model)
    }

    /// Number of input features.
    pub fn num_features(&self) -> usize {
        self.coef.ncols()
    }

    /// Class labels, in decision column order.
    pub fn classes(&self) -> &[i64] {
        &self.classes
    }

    pub(crate) fn validate(&self) -> Result<(), String> {
        let rows = self.coef.nrows();

        if rows == 0 {
            return Err("logistic regression has no coefficients".to_owned());
        }

        if self.intercept.len() != rows {
            return Err(format!(
                "{} intercepts for {} coefficient rows",
                self.intercept.len(),
                rows
            ));
        }

        let expected_classes = if rows == 1 { 2 } else { rows };

        if self.classes.len() != expected_classes {
            return Err(format!(
                "expected {} classes, got {}",
                expected_classes,
                self.classes.len()
            ));
        }

        Ok(())
    }

    /// Raw decision values, one row per sample and one column per coefficient row.
    pub fn decision_function(&self, x: ArrayView2<f64>) -> Result<Array2<f64>, PredictionError> {
        check_columns(&x, self.num_features())?;

        Ok(x.dot(&self.coef.t()) + &self.intercept)
    }
}

impl Scorer for LogisticRegression {
    fn predict(&self, x: ArrayView2<f64>) -> Result<Array1<f64>, PredictionError> {
        let decision = self.decision_function(x)?;

        decision
            .axis_iter(Axis(0))
            .map(|row| {
                if row.iter().any(|value| !value.is_finite()) {
                    return Err(PredictionError::InvalidPredictionValue);
                }

                let class_idx = if row.len() == 1 {
                    if row[0] > 0.0 {
                        1
                    } else {
                        0
                    }
                } else {
                    argmax(row.iter().cloned())
                };

                Ok(self.classes[class_idx] as f64)
            })
            .collect()
    }
}

/// Index of the largest value; the first one wins ties.
pub(crate) fn argmax<I: Iterator<Item = f64>>(values: I) -> usize {
    let mut best_idx = 0;
    let mut best_value = std::f64::NEG_INFINITY;

    for (idx, value) in values.enumerate() {
        if value > best_value {
            best_idx = idx;
            best_value = value;
        }
    }

    best_idx
}
