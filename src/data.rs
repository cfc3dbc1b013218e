//! Identifier mappings and side-feature matrices for the recommender.
//!
//! External identifiers are arbitrary strings; the factorization model works
//! on dense internal indices. A [`Dataset`] holds the two bijections.
use std::collections::HashMap;

use failure::Fail;
use ndarray::Array2;

use super::{ItemId, UserId};

/// Dense side-feature matrix, one row per internal index.
pub type Features = Array2<f32>;

/// Dataset error types.
#[derive(Debug, Fail, PartialEq)]
pub enum DataError {
    /// Two external identifiers map to the same internal index.
    #[fail(display = "Internal index {} is assigned more than once.", index)]
    DuplicateIndex {
        /// The repeated index.
        index: usize,
    },
    /// Indices must cover `0..len` exactly.
    #[fail(display = "Internal index {} out of range for {} identifiers.", index, len)]
    IndexOutOfRange {
        /// The offending index.
        index: usize,
        /// Number of identifiers in the mapping.
        len: usize,
    },
}

/// Bijection between external string identifiers and dense internal indices.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct IdMapping {
    forward: HashMap<String, usize>,
    reverse: Vec<String>,
}

impl IdMapping {
    /// Build a mapping, checking that the indices are exactly `0..len`.
    pub fn new(forward: HashMap<String, usize>) -> Result<Self, DataError> {
        let len = forward.len();
        let mut reverse: Vec<Option<String>> = vec![None; len];

        for (external, &index) in &forward {
            let slot = reverse
                .get_mut(index)
                .ok_or(DataError::IndexOutOfRange { index, len })?;

            if slot.is_some() {
                return Err(DataError::DuplicateIndex { index });
            }

            *slot = Some(external.clone());
        }

        // Every slot is filled: `len` distinct in-range indices.
        let reverse = reverse.into_iter().flatten().collect();

        Ok(IdMapping { forward, reverse })
    }

    /// Internal index of an external identifier.
    pub fn index(&self, external: &str) -> Option<usize> {
        self.forward.get(external).cloned()
    }

    /// External identifier of an internal index.
    pub fn external(&self, index: usize) -> Option<&str> {
        self.reverse.get(index).map(|x| x.as_str())
    }

    /// Whether `external` is mapped.
    pub fn contains(&self, external: &str) -> bool {
        self.forward.contains_key(external)
    }

    /// Number of identifiers.
    pub fn len(&self) -> usize {
        self.reverse.len()
    }

    /// Whether the mapping holds no identifiers.
    pub fn is_empty(&self) -> bool {
        self.reverse.is_empty()
    }
}

/// On-disk layout of the dataset artifact.
#[derive(Clone, Debug, Serialize, Deserialize)]
struct RawDataset {
    user_id_map: HashMap<String, UserId>,
    item_id_map: HashMap<String, ItemId>,
    #[serde(default)]
    user_feature_map: HashMap<String, usize>,
    #[serde(default)]
    item_feature_map: HashMap<String, usize>,
}

/// Identifier mappings produced by the training pipeline.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
#[serde(try_from = "RawDataset", into = "RawDataset")]
pub struct Dataset {
    users: IdMapping,
    items: IdMapping,
    user_feature_map: HashMap<String, usize>,
    item_feature_map: HashMap<String, usize>,
}

impl Dataset {
    /// Build a dataset with no feature-name maps.
    pub fn new(users: IdMapping, items: IdMapping) -> Self {
        Dataset {
            users,
            items,
            user_feature_map: HashMap::new(),
            item_feature_map: HashMap::new(),
        }
    }

    /// User identifier mapping.
    pub fn users(&self) -> &IdMapping {
        &self.users
    }

    /// Item identifier mapping.
    pub fn items(&self) -> &IdMapping {
        &self.items
    }

    /// Names of the user feature columns, keyed to their column index.
    pub fn user_feature_map(&self) -> &HashMap<String, usize> {
        &self.user_feature_map
    }

    /// Names of the item feature columns, keyed to their column index.
    pub fn item_feature_map(&self) -> &HashMap<String, usize> {
        &self.item_feature_map
    }

    /// Number of users.
    pub fn num_users(&self) -> usize {
        self.users.len()
    }

    /// Number of items.
    pub fn num_items(&self) -> usize {
        self.items.len()
    }

    /// Return (num_users, num_items).
    pub fn shape(&self) -> (usize, usize) {
        (self.num_users(), self.num_items())
    }
}

impl TryFrom<RawDataset> for Dataset {
    type Error = DataError;

    fn try_from(raw: RawDataset) -> Result<Self, Self::Error> {
        Ok(Dataset {
            users: IdMapping::new(raw.user_id_map)?,
            items: IdMapping::new(raw.item_id_map)?,
            user_feature_map: raw.user_feature_map,
            item_feature_map: raw.item_feature_map,
        })
    }
}

impl From<Dataset> for RawDataset {
    fn from(dataset: Dataset) -> Self {
        RawDataset {
            user_id_map: dataset.users.forward,
            item_id_map: dataset.items.forward,
            user_feature_map: dataset.user_feature_map,
            item_feature_map: dataset.item_feature_map,
        }
    }
}
