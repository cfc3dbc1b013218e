//! Top-N event recommendations for known users.
use std::fmt;

use failure::Fail;
use tracing::{debug, info, warn};

use crate::artifacts::{self, ArtifactError, RecommenderPaths};
use crate::data::{Dataset, Features};
use crate::models::factorization::HybridFactorizationModel;
use crate::models::Scaler;
use crate::{ItemId, PredictionError, RankingModel};

/// Number of recommendations returned when the caller does not ask for a count.
pub const DEFAULT_COUNT: usize = 5;

/// Recommendation error types.
#[derive(Debug, Fail)]
pub enum RecommendError {
    /// The recommender artifacts were not loaded.
    #[fail(display = "Model components are missing.")]
    AssetsUnavailable,
    /// The user was not part of the training data.
    #[fail(display = "User ID '{}' not found in training data.", _0)]
    UserNotFound(String),
    /// The ranking model failed to score the items.
    #[fail(display = "Model prediction failed: {}", _0)]
    Scoring(#[cause] PredictionError),
}

/// The loaded recommender: model, identifier mappings and side features.
pub struct RecommenderAssets {
    model: Box<dyn RankingModel + Send + Sync>,
    scaler: Option<Scaler>,
    dataset: Dataset,
    user_features: Features,
    item_features: Features,
}

impl RecommenderAssets {
    /// Assemble the assets, checking that every user and item of `dataset`
    /// has exactly one row in its feature matrix.
    pub fn new<M: RankingModel + Send + Sync + 'static>(
        model: M,
        dataset: Dataset,
        user_features: Features,
        item_features: Features,
    ) -> Result<Self, String> {
        if dataset.num_users() != user_features.nrows() {
            return Err(format!(
                "{} users in the dataset but {} user feature rows",
                dataset.num_users(),
                user_features.nrows()
            ));
        }

        if dataset.num_items() != item_features.nrows() {
            return Err(format!(
                "{} items in the dataset but {} item feature rows",
                dataset.num_items(),
                item_features.nrows()
            ));
        }

        Ok(RecommenderAssets {
            model: Box::new(model),
            scaler: None,
            dataset,
            user_features,
            item_features,
        })
    }

    /// Attach the scaler loaded with the artifacts.
    pub fn with_scaler(mut self, scaler: Scaler) -> Self {
        self.scaler = Some(scaler);
        self
    }

    /// Load all five recommender artifacts. Fails if any one is missing or
    /// inconsistent with the others.
    pub fn load(paths: &RecommenderPaths) -> Result<Self, failure::Error> {
        let model: HybridFactorizationModel = artifacts::load(&paths.model)?;
        model
            .validate()
            .map_err(|reason| ArtifactError::malformed(&paths.model, reason))?;

        let scaler: Scaler = artifacts::load(&paths.scaler)?;
        scaler
            .validate()
            .map_err(|reason| ArtifactError::malformed(&paths.scaler, reason))?;

        let dataset: Dataset = artifacts::load(&paths.dataset)?;
        let user_features: Features = artifacts::load(&paths.user_features)?;
        let item_features: Features = artifacts::load(&paths.item_features)?;

        if user_features.ncols() != model.num_user_features() {
            return Err(ArtifactError::malformed(
                &paths.user_features,
                format!(
                    "{} columns but the model expects {} user features",
                    user_features.ncols(),
                    model.num_user_features()
                ),
            )
            .into());
        }

        if item_features.ncols() != model.num_item_features() {
            return Err(ArtifactError::malformed(
                &paths.item_features,
                format!(
                    "{} columns but the model expects {} item features",
                    item_features.ncols(),
                    model.num_item_features()
                ),
            )
            .into());
        }

        let assets = RecommenderAssets::new(model, dataset, user_features, item_features)
            .map_err(|reason| ArtifactError::malformed(&paths.dir, reason))?;

        Ok(assets.with_scaler(scaler))
    }

    /// Identifier mappings.
    pub fn dataset(&self) -> &Dataset {
        &self.dataset
    }

    /// The scaler shipped with the recommender artifacts. Side features are
    /// stored already scaled, so it is not applied at scoring time.
    pub fn scaler(&self) -> Option<&Scaler> {
        self.scaler.as_ref()
    }

    /// Number of known users.
    pub fn num_users(&self) -> usize {
        self.user_features.nrows()
    }

    /// Number of rankable items.
    pub fn num_items(&self) -> usize {
        self.item_features.nrows()
    }

    /// Return up to `n` external item identifiers for `user_id`, best first.
    pub fn recommend(&self, user_id: &str, n: usize) -> Result<Vec<String>, RecommendError> {
        let user_idx = match self.dataset.users().index(user_id) {
            Some(idx) => idx,
            None => {
                warn!(user_id = %user_id, "User ID not in user mapping");
                return Err(RecommendError::UserNotFound(user_id.to_owned()));
            }
        };

        let item_ids: Vec<ItemId> = (0..self.num_items()).collect();

        let scores = self
            .model
            .predict(user_idx, &item_ids, &self.user_features, &self.item_features)
            .map_err(|err| {
                warn!(user_id = %user_id, error = %err, "Model prediction failed");
                RecommendError::Scoring(err)
            })?;

        let recommended = top_n(&scores, n)
            .into_iter()
            .map(|item_idx| {
                self.dataset
                    .items()
                    .external(item_idx)
                    .map(|x| x.to_owned())
                    .ok_or(RecommendError::Scoring(PredictionError::IndexOutOfBounds {
                        index: item_idx,
                        rows: self.dataset.num_items(),
                    }))
            })
            .collect::<Result<Vec<_>, _>>()?;

        debug!(user_id = %user_id, n, recommended = ?recommended, "Recommended IDs");

        Ok(recommended)
    }
}

impl fmt::Debug for RecommenderAssets {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.debug_struct("RecommenderAssets")
            .field("num_users", &self.num_users())
            .field("num_items", &self.num_items())
            .field("scaler", &self.scaler.as_ref().map(|x| x.kind()))
            .finish()
    }
}

/// Holder for the recommender assets, which may have failed to load.
#[derive(Debug, Default)]
pub struct Recommender {
    assets: Option<RecommenderAssets>,
}

impl Recommender {
    /// Load the assets, leaving the holder empty (and logging why) on any
    /// failure. Recommendations then fail with
    /// [`RecommendError::AssetsUnavailable`] until restart.
    pub fn load(paths: &RecommenderPaths) -> Self {
        match RecommenderAssets::load(paths) {
            Ok(assets) => {
                info!(
                    dir = %paths.dir.display(),
                    users = assets.num_users(),
                    items = assets.num_items(),
                    "Recommender model, scaler, dataset, user_features, and item_features loaded"
                );
                Recommender::from(assets)
            }
            Err(err) => {
                warn!(dir = %paths.dir.display(), error = %err, "Error loading recommender assets");
                Recommender::empty()
            }
        }
    }

    /// A holder with no assets.
    pub fn empty() -> Self {
        Recommender { assets: None }
    }

    /// The loaded assets, if any.
    pub fn assets(&self) -> Option<&RecommenderAssets> {
        self.assets.as_ref()
    }

    /// Whether the assets loaded.
    pub fn is_loaded(&self) -> bool {
        self.assets.is_some()
    }

    /// Recommend from the loaded assets; fails when none are loaded.
    pub fn recommend(&self, user_id: &str, n: usize) -> Result<Vec<String>, RecommendError> {
        let assets = self.assets.as_ref().ok_or_else(|| {
            warn!("Recommender components are missing");
            RecommendError::AssetsUnavailable
        })?;

        assets.recommend(user_id, n)
    }
}

impl From<RecommenderAssets> for Recommender {
    fn from(assets: RecommenderAssets) -> Self {
        Recommender {
            assets: Some(assets),
        }
    }
}

/// Indices of the `n` highest scores, best first. Equal scores keep
/// ascending index order.
pub fn top_n(scores: &[f32], n: usize) -> Vec<ItemId> {
    let mut ranked: Vec<ItemId> = (0..scores.len()).collect();

    // Stable: ties stay in index order.
    ranked.sort_by(|&a, &b| scores[b].total_cmp(&scores[a]));
    ranked.truncate(n);

    ranked
}
