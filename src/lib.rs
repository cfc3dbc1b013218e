//! # eventrec
//!
//! `eventrec` serves pre-trained models over HTTP: a registry of
//! classification and anomaly estimators (each with an optional feature
//! scaler), and a hybrid matrix factorization recommender which, given a user,
//! ranks every event the user might attend next.
//!
//! Artifacts are loaded once at startup and shared read-only between request
//! handlers. A background task periodically runs the external notebook that
//! regenerates the recommender artifacts.
//!
//! ## Example
//! Scoring a user against every item with a factorization model:
//!
//! ```rust
//! # extern crate eventrec;
//! # extern crate ndarray;
//! use eventrec::models::factorization::HybridFactorizationModel;
//! use eventrec::RankingModel;
//! use ndarray::{arr1, arr2, Array2};
//!
//! let model = HybridFactorizationModel::new(
//!     arr2(&[[1.0, 0.0], [0.0, 1.0]]),
//!     arr2(&[[1.0, 0.0], [0.0, 1.0]]),
//!     arr1(&[0.0, 0.0]),
//!     arr1(&[0.0, 0.5]),
//! ).unwrap();
//!
//! let user_features: Array2<f32> = Array2::eye(2);
//! let item_features: Array2<f32> = Array2::eye(2);
//!
//! let scores = model
//!     .predict(0, &[0, 1], &user_features, &item_features)
//!     .unwrap();
//!
//! assert_eq!(scores, vec![1.0, 0.5]);
//! ```
#![deny(missing_docs)]

#[macro_use]
extern crate serde_derive;

use failure::Fail;

pub mod artifacts;
pub mod config;
pub mod data;
pub mod models;
pub mod recommender;
pub mod refresh;
pub mod registry;
pub mod server;

pub use data::Features;

/// Alias for internal user indices.
pub type UserId = usize;
/// Alias for internal item indices.
pub type ItemId = usize;

/// Prediction error types.
#[derive(Debug, Fail, PartialEq)]
pub enum PredictionError {
    /// Failed prediction due to numerical issues.
    #[fail(display = "Invalid prediction value: non-finite or not a number.")]
    InvalidPredictionValue,
    /// The input does not have the dimensionality the model was fitted on.
    #[fail(display = "Expected {} features, got {}.", expected, actual)]
    DimensionMismatch {
        /// Fitted dimensionality.
        expected: usize,
        /// Dimensionality of the input.
        actual: usize,
    },
    /// A user or item index has no row in the corresponding feature matrix.
    #[fail(display = "Index {} out of bounds for {} rows.", index, rows)]
    IndexOutOfBounds {
        /// Requested index.
        index: usize,
        /// Number of available rows.
        rows: usize,
    },
    /// The model returned no output for the input row.
    #[fail(display = "Model produced no output.")]
    EmptyOutput,
}

/// Trait describing models that score items for a user, given user and
/// item side features.
pub trait RankingModel {
    /// Score `item_ids` for the user at index `user_id`. Scores are returned
    /// in the order of `item_ids`; higher means more likely to interact.
    fn predict(
        &self,
        user_id: UserId,
        item_ids: &[ItemId],
        user_features: &Features,
        item_features: &Features,
    ) -> Result<Vec<f32>, PredictionError>;
}
