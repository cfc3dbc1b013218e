//! Hybrid matrix factorization model.
//!
//! Users and items are described by rows of side-feature matrices. Each
//! feature has a latent embedding and a bias; the representation of a user
//! (or item) is the feature-weighted sum of its features' embeddings:
//!
//! ```text
//! score(u, i) = (f_u . U) . (f_i . V) + f_u . b_U + f_i . b_V
//! ```
//!
//! where `f_u`, `f_i` are the feature rows, `U`, `V` the feature embedding
//! matrices and `b_U`, `b_V` the feature biases. With identity feature
//! matrices this reduces to plain per-user and per-item embeddings.
use ndarray::{Array1, Array2, ArrayView1};
use rayon::prelude::*;

use crate::data::Features;
use crate::{ItemId, PredictionError, RankingModel, UserId};

/// Per-feature embeddings and biases for users and items.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct HybridFactorizationModel {
    user_embeddings: Array2<f32>,
    item_embeddings: Array2<f32>,
    user_biases: Array1<f32>,
    item_biases: Array1<f32>,
}

impl HybridFactorizationModel {
    /// Build a model, checking that the parameter shapes agree.
    pub fn new(
        user_embeddings: Array2<f32>,
        item_embeddings: Array2<f32>,
        user_biases: Array1<f32>,
        item_biases: Array1<f32>,
    ) -> Result<Self, String> {
        let model = HybridFactorizationModel {
            user_embeddings,
            item_embeddings,
            user_biases,
            item_biases,
        };
        model.validate()?;

        Ok(model)
    }

    /// Width of the user feature matrix the model expects.
    pub fn num_user_features(&self) -> usize {
        self.user_embeddings.nrows()
    }

    /// Width of the item feature matrix the model expects.
    pub fn num_item_features(&self) -> usize {
        self.item_embeddings.nrows()
    }

    /// Embedding dimensionality.
    pub fn latent_dim(&self) -> usize {
        self.user_embeddings.ncols()
    }

    pub(crate) fn validate(&self) -> Result<(), String> {
        if self.user_embeddings.ncols() != self.item_embeddings.ncols() {
            return Err(format!(
                "user latent dimension {} differs from item latent dimension {}",
                self.user_embeddings.ncols(),
                self.item_embeddings.ncols()
            ));
        }

        if self.user_biases.len() != self.num_user_features() {
            return Err(format!(
                "{} user biases for {} user features",
                self.user_biases.len(),
                self.num_user_features()
            ));
        }

        if self.item_biases.len() != self.num_item_features() {
            return Err(format!(
                "{} item biases for {} item features",
                self.item_biases.len(),
                self.num_item_features()
            ));
        }

        Ok(())
    }

    /// Latent representation and bias of a single feature row.
    fn represent(
        features: ArrayView1<f32>,
        embeddings: &Array2<f32>,
        biases: &Array1<f32>,
    ) -> (Array1<f32>, f32) {
        (features.dot(embeddings), features.dot(biases))
    }

    fn check_features(features: &Features, expected: usize) -> Result<(), PredictionError> {
        if features.ncols() == expected {
            Ok(())
        } else {
            Err(PredictionError::DimensionMismatch {
                expected,
                actual: features.ncols(),
            })
        }
    }
}

impl RankingModel for HybridFactorizationModel {
    fn predict(
        &self,
        user_id: UserId,
        item_ids: &[ItemId],
        user_features: &Features,
        item_features: &Features,
    ) -> Result<Vec<f32>, PredictionError> {
        Self::check_features(user_features, self.num_user_features())?;
        Self::check_features(item_features, self.num_item_features())?;

        if user_id >= user_features.nrows() {
            return Err(PredictionError::IndexOutOfBounds {
                index: user_id,
                rows: user_features.nrows(),
            });
        }

        let (user_embedding, user_bias) = Self::represent(
            user_features.row(user_id),
            &self.user_embeddings,
            &self.user_biases,
        );

        item_ids
            .par_iter()
            .map(|&item_id| {
                if item_id >= item_features.nrows() {
                    return Err(PredictionError::IndexOutOfBounds {
                        index: item_id,
                        rows: item_features.nrows(),
                    });
                }

                let (item_embedding, item_bias) = Self::represent(
                    item_features.row(item_id),
                    &self.item_embeddings,
                    &self.item_biases,
                );

                let prediction = user_embedding.dot(&item_embedding) + user_bias + item_bias;

                if prediction.is_finite() {
                    Ok(prediction)
                } else {
                    Err(PredictionError::InvalidPredictionValue)
                }
            })
            .collect()
    }
}
