//! Reading and writing serialized artifacts.
//!
//! Every artifact is a JSON document. Estimators and scalers are tagged with
//! their `kind`; matrices use ndarray's serde layout
//! (`{"v": 1, "dim": [rows, cols], "data": [...]}`, row-major).
use std::fs::{self, File};
use std::io::{BufReader, BufWriter, Write};
use std::path::{Path, PathBuf};

use failure::Fail;
use serde::de::DeserializeOwned;
use serde::Serialize;

/// File extension of every artifact.
pub const EXTENSION: &str = "json";
/// Suffix of estimator artifact stems: `<name>_model.json`.
pub const MODEL_SUFFIX: &str = "_model";
/// Suffix of scaler artifact stems: `<name>_scaler.json`.
pub const SCALER_SUFFIX: &str = "_scaler";

/// Artifact error types.
#[derive(Debug, Fail)]
pub enum ArtifactError {
    /// The artifact file does not exist.
    #[fail(display = "Artifact not found: {}.", path)]
    Missing {
        /// Path that was looked up.
        path: String,
    },
    /// The file exists but does not hold a valid artifact.
    #[fail(display = "Malformed artifact {}: {}.", path, reason)]
    Malformed {
        /// Offending file.
        path: String,
        /// Parser or validation message.
        reason: String,
    },
}

impl ArtifactError {
    /// A [`ArtifactError::Malformed`] for `path`.
    pub fn malformed<R: ToString>(path: &Path, reason: R) -> Self {
        ArtifactError::Malformed {
            path: path.display().to_string(),
            reason: reason.to_string(),
        }
    }
}

/// Deserialize the artifact at `path`.
pub fn load<T: DeserializeOwned>(path: &Path) -> Result<T, failure::Error> {
    if !path.exists() {
        return Err(ArtifactError::Missing {
            path: path.display().to_string(),
        }
        .into());
    }

    let reader = BufReader::new(File::open(path)?);
    let value = serde_json::from_reader(reader).map_err(|e| ArtifactError::malformed(path, e))?;

    Ok(value)
}

/// Serialize `value` to `path`, replacing any existing file atomically.
///
/// The artifact is written to a hidden sibling file first and then renamed
/// into place, so readers never observe a half-written file.
pub fn store<T: Serialize>(path: &Path, value: &T) -> Result<(), failure::Error> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)?;
    }

    let file_name = path
        .file_name()
        .ok_or_else(|| ArtifactError::malformed(path, "not a file path"))?;
    let temp_path = path.with_file_name(format!(".{}.tmp", file_name.to_string_lossy()));

    {
        let mut writer = BufWriter::new(File::create(&temp_path)?);
        serde_json::to_writer(&mut writer, value)?;
        writer.flush()?;
    }

    fs::rename(&temp_path, path)?;

    Ok(())
}

/// Model name of an estimator artifact path, if it follows the
/// `<name>_model.json` convention.
pub fn model_name(path: &Path) -> Option<String> {
    if path.extension()?.to_str()? != EXTENSION {
        return None;
    }

    let stem = path.file_stem()?.to_str()?;
    let name = stem.strip_suffix(MODEL_SUFFIX)?;

    if name.is_empty() {
        None
    } else {
        Some(name.to_owned())
    }
}

/// Path of the scaler that accompanies the estimator at `model_path`.
pub fn scaler_path(model_path: &Path, name: &str) -> PathBuf {
    model_path.with_file_name(format!("{}{}.{}", name, SCALER_SUFFIX, EXTENSION))
}

/// Fixed artifact locations of the recommender.
#[derive(Clone, Debug, PartialEq)]
pub struct RecommenderPaths {
    /// Directory holding the artifacts.
    pub dir: PathBuf,
    /// Hybrid factorization model.
    pub model: PathBuf,
    /// Feature scaler.
    pub scaler: PathBuf,
    /// User and item identifier mappings.
    pub dataset: PathBuf,
    /// User side-feature matrix.
    pub user_features: PathBuf,
    /// Item side-feature matrix.
    pub item_features: PathBuf,
}

impl RecommenderPaths {
    /// File name prefix shared by every recommender artifact.
    pub const PREFIX: &'static str = "recommendation";

    /// Artifact paths inside `dir`.
    pub fn new<P: AsRef<Path>>(dir: P) -> Self {
        let dir = dir.as_ref().to_path_buf();
        let artifact = |name: &str| dir.join(format!("{}_{}.{}", Self::PREFIX, name, EXTENSION));

        RecommenderPaths {
            model: artifact("model"),
            scaler: artifact("scaler"),
            dataset: artifact("dataset"),
            user_features: artifact("user_features"),
            item_features: artifact("item_features"),
            dir,
        }
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use tempfile::tempdir;

    use super::*;

    #[test]
    fn model_names() {
        assert_eq!(
            model_name(Path::new("models/fraud_model.json")),
            Some("fraud".to_owned())
        );
        assert_eq!(
            model_name(Path::new("card_fraud_model.json")),
            Some("card_fraud".to_owned())
        );
        assert_eq!(model_name(Path::new("fraud_scaler.json")), None);
        assert_eq!(model_name(Path::new("fraud_model.pkl")), None);
        assert_eq!(model_name(Path::new("_model.json")), None);
    }

    #[test]
    fn scaler_next_to_model() {
        assert_eq!(
            scaler_path(Path::new("a/b/fraud_model.json"), "fraud"),
            PathBuf::from("a/b/fraud_scaler.json")
        );
    }

    #[test]
    fn recommender_paths() {
        let paths = RecommenderPaths::new("rec");

        assert_eq!(paths.model, PathBuf::from("rec/recommendation_model.json"));
        assert_eq!(
            paths.item_features,
            PathBuf::from("rec/recommendation_item_features.json")
        );
    }

    #[test]
    fn store_then_load() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("nested").join("weights.json");

        let mut weights = HashMap::new();
        weights.insert("a".to_owned(), 1.5);

        store(&path, &weights).unwrap();
        let restored: HashMap<String, f64> = load(&path).unwrap();

        assert_eq!(restored, weights);
        assert!(!path.with_file_name(".weights.json.tmp").exists());
    }

    #[test]
    fn missing_and_malformed() {
        let dir = tempdir().unwrap();
        let missing = dir.path().join("missing.json");

        let err = load::<Vec<f64>>(&missing).unwrap_err();
        match err.downcast_ref::<ArtifactError>() {
            Some(ArtifactError::Missing { .. }) => {}
            other => panic!("unexpected error {:?}", other),
        }

        let malformed = dir.path().join("malformed.json");
        fs::write(&malformed, "{not json").unwrap();

        let err = load::<Vec<f64>>(&malformed).unwrap_err();
        match err.downcast_ref::<ArtifactError>() {
            Some(ArtifactError::Malformed { .. }) => {}
            other => panic!("unexpected error {:?}", other),
        }
    }
}
