//! Writes a small artifact tree so the server can run without the training
//! pipeline.
use std::collections::HashMap;
use std::path::PathBuf;

use clap::Parser;
use ndarray::{arr1, arr2, Array2};
use tracing::info;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use eventrec::artifacts::{self, RecommenderPaths};
use eventrec::config::RECOMMENDER_SUBDIR;
use eventrec::data::{Dataset, IdMapping};
use eventrec::models::anomaly::CentroidAnomalyDetector;
use eventrec::models::factorization::HybridFactorizationModel;
use eventrec::models::linear::LogisticRegression;
use eventrec::models::scaler::StandardScaler;
use eventrec::models::{Estimator, Scaler};

/// Write demo model artifacts
#[derive(Parser, Debug)]
#[command(name = "demo_artifacts", about, long_about = None)]
struct Args {
    /// Root of the artifact tree to write
    #[arg(long, default_value = "ml-models")]
    models_dir: PathBuf,
}

fn mapping(ids: &[&str]) -> Result<IdMapping, failure::Error> {
    let forward: HashMap<String, usize> = ids
        .iter()
        .enumerate()
        .map(|(idx, id)| (id.to_string(), idx))
        .collect();

    Ok(IdMapping::new(forward)?)
}

fn main() -> Result<(), failure::Error> {
    tracing_subscriber::registry()
        .with(fmt::layer())
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let args = Args::parse();
    let root = &args.models_dir;

    // Fraud when the halved amount and count sum above 5.
    let fraud = Estimator::LogisticRegression(
        LogisticRegression::new(arr2(&[[1.0, 1.0]]), arr1(&[-5.0]), vec![0, 1])
            .map_err(failure::err_msg)?,
    );
    let fraud_scaler = Scaler::Standard(
        StandardScaler::new(None, Some(arr1(&[2.0, 2.0]))).map_err(failure::err_msg)?,
    );
    artifacts::store(&root.join("fraud").join("fraud_model.json"), &fraud)?;
    artifacts::store(&root.join("fraud").join("fraud_scaler.json"), &fraud_scaler)?;

    let anomaly = Estimator::CentroidAnomaly(
        CentroidAnomalyDetector::new(arr1(&[0.0, 0.0]), 3.0).map_err(failure::err_msg)?,
    );
    artifacts::store(&root.join("anomaly").join("anomaly_model.json"), &anomaly)?;

    let paths = RecommenderPaths::new(root.join(RECOMMENDER_SUBDIR));

    let model = HybridFactorizationModel::new(
        arr2(&[[1.0, 0.0], [0.5, 0.5], [0.0, 1.0]]),
        arr2(&[[0.1, 0.0], [0.9, 0.2], [0.4, 0.4], [0.0, 0.9]]),
        arr1(&[0.0, 0.0, 0.0]),
        arr1(&[0.0, 0.1, 0.0, 0.0]),
    )
    .map_err(failure::err_msg)?;
    let scaler = Scaler::Standard(StandardScaler::new(None, None).map_err(failure::err_msg)?);
    let dataset = Dataset::new(mapping(&["a", "b", "c"])?, mapping(&["w", "x", "y", "z"])?);

    artifacts::store(&paths.model, &model)?;
    artifacts::store(&paths.scaler, &scaler)?;
    artifacts::store(&paths.dataset, &dataset)?;
    artifacts::store(&paths.user_features, &Array2::<f32>::eye(3))?;
    artifacts::store(&paths.item_features, &Array2::<f32>::eye(4))?;

    info!(root = %root.display(), "Demo artifacts written");

    Ok(())
}
