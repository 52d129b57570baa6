/// Linear Ranker
///
/// In-process stand-in for the supervised model: a dot product of configured
/// weights with the `CandidateFeatures` vector.
use super::{CandidateFeatures, Ranker};
use crate::error::{PipelineError, Result};
use crate::models::{ItemId, UserId};
use ndarray::{Array1, ArrayView1};
use tracing::debug;

pub struct LinearRanker {
    weights: Array1<f64>,
}

impl LinearRanker {
    pub fn new(weights: Vec<f64>) -> Result<Self> {
        if weights.len() != CandidateFeatures::LEN {
            return Err(PipelineError::Validation(format!(
                "Expected {} weights, got {}",
                CandidateFeatures::LEN,
                weights.len()
            )));
        }

        debug!(weights = ?weights, "Using linear ranker");
        Ok(Self {
            weights: Array1::from(weights),
        })
    }
}

impl Ranker for LinearRanker {
    fn score(&self, _user_id: UserId, _item_id: ItemId, features: &[f64]) -> Result<f64> {
        if features.len() != self.weights.len() {
            return Err(PipelineError::Validation(format!(
                "Expected {} features, got {}",
                self.weights.len(),
                features.len()
            )));
        }

        Ok(self.weights.dot(&ArrayView1::from(features)))
    }
}
