//! Named estimators, each with an optional feature scaler.
//!
//! The registry is built once at startup by walking the artifact store and is
//! never mutated afterwards; request handlers share it read-only.
use std::collections::HashMap;
use std::fmt;
use std::fs;
use std::path::{Path, PathBuf};

use failure::Fail;
use ndarray::{Array1, Axis};
use tracing::{info, warn};
use walkdir::WalkDir;

use crate::artifacts::{self, ArtifactError};
use crate::models::{Estimator, Scaler, Scorer, Transformer};
use crate::PredictionError;

/// Registry error types.
#[derive(Debug, Fail)]
pub enum RegistryError {
    /// No model is registered under the requested name.
    #[fail(display = "Model \"{}\" not found", _0)]
    ModelNotFound(String),
    /// The model failed on the given input.
    #[fail(display = "Prediction failed: {}", _0)]
    Prediction(#[cause] PredictionError),
}

impl From<PredictionError> for RegistryError {
    fn from(err: PredictionError) -> Self {
        RegistryError::Prediction(err)
    }
}

/// An estimator and the scaler applied to its inputs.
pub struct ModelEntry {
    estimator: Box<dyn Scorer + Send + Sync>,
    scaler: Option<Box<dyn Transformer + Send + Sync>>,
}

impl ModelEntry {
    /// An entry that feeds features to `estimator` unscaled.
    pub fn new<S: Scorer + Send + Sync + 'static>(estimator: S) -> Self {
        ModelEntry {
            estimator: Box::new(estimator),
            scaler: None,
        }
    }

    /// Scale features with `scaler` before estimating.
    pub fn with_scaler<T: Transformer + Send + Sync + 'static>(mut self, scaler: T) -> Self {
        self.scaler = Some(Box::new(scaler));
        self
    }

    /// Whether a scaler is attached.
    pub fn has_scaler(&self) -> bool {
        self.scaler.is_some()
    }

    /// Scale (if a scaler is present) and classify a single feature vector.
    pub fn predict(&self, features: &[f64]) -> Result<i64, PredictionError> {
        let row = Array1::from(features.to_vec()).insert_axis(Axis(0));

        let predictions = match self.scaler {
            Some(ref scaler) => {
                let scaled = scaler.transform(row.view())?;
                self.estimator.predict(scaled.view())?
            }
            None => self.estimator.predict(row.view())?,
        };

        let prediction = *predictions.get(0).ok_or(PredictionError::EmptyOutput)?;

        if prediction.is_finite() {
            Ok(prediction.trunc() as i64)
        } else {
            Err(PredictionError::InvalidPredictionValue)
        }
    }
}

impl fmt::Debug for ModelEntry {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.debug_struct("ModelEntry")
            .field("has_scaler", &self.has_scaler())
            .finish()
    }
}

/// Immutable mapping from model name to [`ModelEntry`].
#[derive(Debug, Default)]
pub struct ModelRegistry {
    models: HashMap<String, ModelEntry>,
}

impl ModelRegistry {
    /// An empty registry.
    pub fn new() -> Self {
        ModelRegistry::default()
    }

    /// Walk `root` for `<name>_model.json` files, loading each estimator and
    /// its sibling `<name>_scaler.json` when present. Directories under any
    /// of `exclude` are skipped; paths are compared after canonicalization,
    /// and excludes that do not exist are ignored.
    ///
    /// Any unreadable or invalid estimator fails the whole load.
    pub fn load(root: &Path, exclude: &[PathBuf]) -> Result<Self, failure::Error> {
        let mut registry = ModelRegistry::new();

        if !root.is_dir() {
            warn!(root = %root.display(), "Models directory does not exist; registry is empty");
            return Ok(registry);
        }

        let root = fs::canonicalize(root)?;
        let exclude: Vec<PathBuf> = exclude
            .iter()
            .filter_map(|path| fs::canonicalize(path).ok())
            .collect();

        let walker = WalkDir::new(&root)
            .sort_by_file_name()
            .into_iter()
            .filter_entry(|entry| !exclude.iter().any(|excluded| entry.path() == excluded.as_path()));

        for entry in walker {
            let entry = entry?;

            if !entry.file_type().is_file() {
                continue;
            }

            let path = entry.path();
            let name = match artifacts::model_name(path) {
                Some(name) => name,
                None => continue,
            };

            let model = load_entry(path, &name)?;

            info!(
                model = %name,
                path = %path.display(),
                scaler = model.has_scaler(),
                "Loaded model"
            );

            if registry.models.insert(name.clone(), model).is_some() {
                warn!(model = %name, path = %path.display(), "Duplicate model name; keeping the later file");
            }
        }

        Ok(registry)
    }

    /// Register `entry` under `name`, replacing any previous entry.
    pub fn with_model<S: Into<String>>(mut self, name: S, entry: ModelEntry) -> Self {
        self.models.insert(name.into(), entry);
        self
    }

    /// The entry registered as `name`.
    pub fn get(&self, name: &str) -> Option<&ModelEntry> {
        self.models.get(name)
    }

    /// Registered names in sorted order.
    pub fn names(&self) -> Vec<&str> {
        let mut names: Vec<&str> = self.models.keys().map(|x| x.as_str()).collect();
        names.sort();
        names
    }

    /// Number of registered models.
    pub fn len(&self) -> usize {
        self.models.len()
    }

    /// Whether no model is registered.
    pub fn is_empty(&self) -> bool {
        self.models.is_empty()
    }

    /// Classify `features` with the model registered as `name`.
    pub fn predict(&self, name: &str, features: &[f64]) -> Result<i64, RegistryError> {
        let entry = self
            .get(name)
            .ok_or_else(|| RegistryError::ModelNotFound(name.to_owned()))?;

        Ok(entry.predict(features)?)
    }
}

fn load_entry(model_path: &Path, name: &str) -> Result<ModelEntry, failure::Error> {
    let estimator: Estimator = artifacts::load(model_path)?;
    estimator
        .validate()
        .map_err(|reason| ArtifactError::malformed(model_path, reason))?;

    let mut entry = ModelEntry::new(estimator);

    let scaler_path = artifacts::scaler_path(model_path, name);
    if scaler_path.exists() {
        let scaler: Scaler = artifacts::load(&scaler_path)?;
        scaler
            .validate()
            .map_err(|reason| ArtifactError::malformed(&scaler_path, reason))?;

        entry = entry.with_scaler(scaler);
    }

    Ok(entry)
}

#[cfg(test)]
mod tests {
    use ndarray::{arr1, arr2, Array2, ArrayView2};
    use tempfile::tempdir;

    use super::*;
    use crate::models::anomaly::CentroidAnomalyDetector;
    use crate::models::linear::LogisticRegression;
    use crate::models::scaler::StandardScaler;

    /// Class 1 when the feature sum exceeds 5.
    struct SumAboveFive;

    impl Scorer for SumAboveFive {
        fn predict(&self, x: ArrayView2<f64>) -> Result<Array1<f64>, PredictionError> {
            Ok(x.sum_axis(Axis(1)).mapv(|sum| if sum > 5.0 { 1.0 } else { 0.0 }))
        }
    }

    /// Halves every feature.
    struct Halve;

    impl Transformer for Halve {
        fn transform(&self, x: ArrayView2<f64>) -> Result<Array2<f64>, PredictionError> {
            Ok(x.mapv(|v| v / 2.0))
        }
    }

    #[test]
    fn fraud_scenario() {
        let registry =
            ModelRegistry::new().with_model("fraud", ModelEntry::new(SumAboveFive).with_scaler(Halve));

        // [12, 4] scales to [6, 2]; 8 > 5.
        assert_eq!(registry.predict("fraud", &[12.0, 4.0]).unwrap(), 1);
        // [6, 2] scales to [3, 1]; 4 <= 5.
        assert_eq!(registry.predict("fraud", &[6.0, 2.0]).unwrap(), 0);
    }

    #[test]
    fn unscaled_model_sees_raw_features() {
        let registry = ModelRegistry::new().with_model("raw", ModelEntry::new(SumAboveFive));

        assert_eq!(registry.predict("raw", &[6.0, 2.0]).unwrap(), 1);
    }

    #[test]
    fn unknown_model_is_not_found() {
        let registry = ModelRegistry::new().with_model("fraud", ModelEntry::new(SumAboveFive));

        for name in &["", "Fraud", "fraud_model", "anomaly"] {
            match registry.predict(name, &[1.0]) {
                Err(RegistryError::ModelNotFound(missing)) => assert_eq!(missing, *name),
                other => panic!("unexpected result {:?}", other),
            }
        }
    }

    #[test]
    fn dimension_errors_propagate() {
        let model = LogisticRegression::new(arr2(&[[1.0, 1.0]]), arr1(&[-5.0]), vec![0, 1]).unwrap();
        let registry = ModelRegistry::new().with_model("fraud", ModelEntry::new(model));

        match registry.predict("fraud", &[1.0, 2.0, 3.0]) {
            Err(RegistryError::Prediction(PredictionError::DimensionMismatch { expected, actual })) => {
                assert_eq!((expected, actual), (2, 3))
            }
            other => panic!("unexpected result {:?}", other),
        }
    }

    #[test]
    fn labels_are_truncated_integers() {
        let detector = CentroidAnomalyDetector::new(arr1(&[0.0]), 1.0).unwrap();
        let registry = ModelRegistry::new().with_model("anomaly", ModelEntry::new(detector));

        assert_eq!(registry.predict("anomaly", &[0.5]).unwrap(), 1);
        assert_eq!(registry.predict("anomaly", &[10.0]).unwrap(), -1);
    }

    #[test]
    fn loads_models_from_directory() {
        let dir = tempdir().unwrap();
        let fraud_dir = dir.path().join("fraud");
        let recommender_dir = dir.path().join("recommendation-system");

        let model = Estimator::LogisticRegression(
            LogisticRegression::new(arr2(&[[1.0, 1.0]]), arr1(&[-5.0]), vec![0, 1]).unwrap(),
        );
        let scaler = Scaler::Standard(StandardScaler::new(None, Some(arr1(&[2.0, 2.0]))).unwrap());
        let anomaly = Estimator::CentroidAnomaly(CentroidAnomalyDetector::new(arr1(&[0.0]), 1.0).unwrap());

        artifacts::store(&fraud_dir.join("fraud_model.json"), &model).unwrap();
        artifacts::store(&fraud_dir.join("fraud_scaler.json"), &scaler).unwrap();
        artifacts::store(&dir.path().join("anomaly_model.json"), &anomaly).unwrap();
        fs::create_dir_all(&recommender_dir).unwrap();
        fs::write(recommender_dir.join("recommendation_model.json"), "{}").unwrap();
        fs::write(dir.path().join("notes.txt"), "not a model").unwrap();

        let registry = ModelRegistry::load(dir.path(), &[recommender_dir]).unwrap();

        assert_eq!(registry.names(), vec!["anomaly", "fraud"]);
        assert!(registry.get("fraud").unwrap().has_scaler());
        assert!(!registry.get("anomaly").unwrap().has_scaler());
        assert_eq!(registry.predict("fraud", &[12.0, 4.0]).unwrap(), 1);
        assert_eq!(registry.predict("fraud", &[6.0, 2.0]).unwrap(), 0);
    }

    #[test]
    fn exclude_matches_differently_spelled_path() {
        let dir = tempdir().unwrap();
        let models_dir = dir.path().join("ml-models");
        let recommender_dir = models_dir.join("recommendation-system");

        let anomaly = Estimator::CentroidAnomaly(CentroidAnomalyDetector::new(arr1(&[0.0]), 1.0).unwrap());
        artifacts::store(&models_dir.join("anomaly_model.json"), &anomaly).unwrap();
        fs::create_dir_all(&recommender_dir).unwrap();
        fs::write(recommender_dir.join("recommendation_model.json"), "{}").unwrap();
        fs::create_dir_all(dir.path().join("other")).unwrap();

        let spelled = dir
            .path()
            .join("other")
            .join("..")
            .join("ml-models")
            .join("recommendation-system");
        let registry = ModelRegistry::load(&models_dir, &[spelled, dir.path().join("absent")]).unwrap();

        assert_eq!(registry.names(), vec!["anomaly"]);
    }

    #[test]
    fn malformed_model_fails_load() {
        let dir = tempdir().unwrap();
        fs::write(dir.path().join("broken_model.json"), r#"{"kind": "logistic_regression"}"#).unwrap();

        assert!(ModelRegistry::load(dir.path(), &[]).is_err());
    }

    #[test]
    fn inconsistent_model_fails_load() {
        let dir = tempdir().unwrap();
        let json = r#"{
            "kind": "logistic_regression",
            "coef": {"v": 1, "dim": [1, 2], "data": [1.0, 1.0]},
            "intercept": {"v": 1, "dim": [2], "data": [0.0, 0.0]},
            "classes": [0, 1]
        }"#;
        fs::write(dir.path().join("broken_model.json"), json).unwrap();

        let err = ModelRegistry::load(dir.path(), &[]).unwrap_err();
        assert!(err.downcast_ref::<ArtifactError>().is_some());
    }

    #[test]
    fn missing_directory_gives_empty_registry() {
        let dir = tempdir().unwrap();
        let registry = ModelRegistry::load(&dir.path().join("nope"), &[]).unwrap();

        assert!(registry.is_empty());
    }
}
