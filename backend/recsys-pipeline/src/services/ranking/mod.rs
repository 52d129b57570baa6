/// Ranking Module
///
/// Signal B for score fusion. The supervised model itself lives outside this
/// crate; here it is an opaque scorer over a per-candidate feature vector.
///
/// # Sources of signal B
/// - **In-process**: any `Ranker` (e.g. `LinearRanker`), called once per candidate pair
/// - **Artifact**: `scores_{stage}.jsonl` written by the external ranker (`ScoreTable`)
/// - **None**: fusion runs in degraded mode
pub mod linear;
pub mod score_table;

pub use linear::LinearRanker;
pub use score_table::ScoreTable;

use crate::error::{PipelineError, Result};
use crate::models::{CandidateScore, CandidateSource, ExternalScore, ItemId, UserId};
use rayon::prelude::*;
use std::collections::HashMap;
use tracing::info;

/// Opaque (user, item) scorer.
#[cfg_attr(test, mockall::automock)]
pub trait Ranker: Send + Sync {
    fn score(&self, user_id: UserId, item_id: ItemId, features: &[f64]) -> Result<f64>;
}

/// Features produced by candidate generation, in model input order.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct CandidateFeatures {
    pub cand_score: f64,
    pub from_covis: f64,
    pub item_popularity: f64,
}

impl CandidateFeatures {
    pub const LEN: usize = 3;

    pub fn from_candidate(
        candidate: &CandidateScore,
        item_popularity: &HashMap<ItemId, u64>,
    ) -> Self {
        Self {
            cand_score: candidate.score,
            from_covis: match candidate.source {
                CandidateSource::Covis => 1.0,
                CandidateSource::Pop => 0.0,
            },
            item_popularity: item_popularity
                .get(&candidate.item_id)
                .copied()
                .unwrap_or(0) as f64,
        }
    }

    pub fn to_array(&self) -> [f64; Self::LEN] {
        [self.cand_score, self.from_covis, self.item_popularity]
    }
}

/// Score every candidate pair with `ranker`, exactly once each.
pub fn score_candidates(
    ranker: &dyn Ranker,
    candidates: &[CandidateScore],
    item_popularity: &HashMap<ItemId, u64>,
) -> Result<Vec<ExternalScore>> {
    let scores: Vec<ExternalScore> = candidates
        .par_iter()
        .map(|candidate| {
            let features = CandidateFeatures::from_candidate(candidate, item_popularity).to_array();
            let score = ranker.score(candidate.user_id, candidate.item_id, &features)?;
            if !score.is_finite() {
                return Err(PipelineError::Validation(format!(
                    "ranker returned non-finite score {} for user {} item {}",
                    score, candidate.user_id, candidate.item_id
                )));
            }
            Ok(ExternalScore {
                user_id: candidate.user_id,
                item_id: candidate.item_id,
                score,
            })
        })
        .collect::<Result<Vec<_>>>()?;

    info!(pairs = scores.len(), "Ranker scored candidates");

    Ok(scores)
}
