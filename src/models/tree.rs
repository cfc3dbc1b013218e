//! Decision tree classifier stored as parallel node arrays.
//!
//! Node `i` is a leaf when `children_left[i] == -1`. Internal nodes send a
//! sample left when `x[feature[i]] <= threshold[i]`. Leaves predict the class
//! with the largest entry of `value[i]`.
use ndarray::{Array1, ArrayView1, ArrayView2, Axis};

use super::linear::argmax;
use super::{check_columns, Scorer};
use crate::PredictionError;

const LEAF: i64 = -1;

/// Fitted decision tree classifier.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct DecisionTree {
    n_features: usize,
    children_left: Vec<i64>,
    children_right: Vec<i64>,
    feature: Vec<i64>,
    threshold: Vec<f64>,
    value: Vec<Vec<f64>>,
    classes: Vec<i64>,
}

impl DecisionTree {
    /// Number of nodes, leaves included.
    pub fn num_nodes(&self) -> usize {
        self.children_left.len()
    }

    /// Number of input features.
    pub fn num_features(&self) -> usize {
        self.n_features
    }

    pub(crate) fn validate(&self) -> Result<(), String> {
        let num_nodes = self.num_nodes();

        if num_nodes == 0 {
            return Err("decision tree has no nodes".to_owned());
        }

        if self.classes.is_empty() {
            return Err("decision tree has no classes".to_owned());
        }

        if self.children_right.len() != num_nodes
            || self.feature.len() != num_nodes
            || self.threshold.len() != num_nodes
            || self.value.len() != num_nodes
        {
            return Err("decision tree node arrays differ in length".to_owned());
        }

        for node in 0..num_nodes {
            let (left, right) = (self.children_left[node], self.children_right[node]);

            if left == LEAF {
                if self.value[node].len() != self.classes.len() {
                    return Err(format!(
                        "leaf {} has {} values for {} classes",
                        node,
                        self.value[node].len(),
                        self.classes.len()
                    ));
                }
                continue;
            }

            // Children strictly after their parent: traversal always terminates.
            for &child in &[left, right] {
                if child <= node as i64 || child >= num_nodes as i64 {
                    return Err(format!("node {} has invalid child {}", node, child));
                }
            }

            let feature = self.feature[node];
            if feature < 0 || feature as usize >= self.n_features {
                return Err(format!("node {} splits on invalid feature {}", node, feature));
            }
        }

        Ok(())
    }

    fn leaf_for(&self, sample: ArrayView1<f64>) -> usize {
        let mut node = 0;

        while self.children_left[node] != LEAF {
            let value = sample[self.feature[node] as usize];

            node = if value <= self.threshold[node] {
                self.children_left[node] as usize
            } else {
                self.children_right[node] as usize
            };
        }

        node
    }
}

impl Scorer for DecisionTree {
    fn predict(&self, x: ArrayView2<f64>) -> Result<Array1<f64>, PredictionError> {
        check_columns(&x, self.n_features)?;

        x.axis_iter(Axis(0))
            .map(|sample| {
                if sample.iter().any(|value| value.is_nan()) {
                    return Err(PredictionError::InvalidPredictionValue);
                }

                let leaf = self.leaf_for(sample);
                let class_idx = argmax(self.value[leaf].iter().cloned());

                self.classes
                    .get(class_idx)
                    .map(|&class| class as f64)
                    .ok_or(PredictionError::EmptyOutput)
            })
            .collect()
    }
}
