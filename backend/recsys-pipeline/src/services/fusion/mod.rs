use crate::error::{PipelineError, Result};
use crate::models::{
    CandidateScore, ExternalScore, FusedScore, FusionMode, FusionStats, ItemId, UserId,
};
use crate::utils::by_score_desc_then_id;
use std::collections::{BTreeMap, HashMap, HashSet};
use tracing::{info, warn};

/// Reciprocal rank fusion contribution of a 1-based rank.
pub fn rrf(rank: u32, k: u32) -> f64 {
    1.0 / (f64::from(k) + f64::from(rank))
}

/// Per-user dense rank over `(user, item, score)` rows, highest score = 1.
///
/// Equal scores share a rank and the next distinct score gets the next
/// integer. Duplicate pairs and non-finite scores are rejected.
pub fn dense_rank(
    rows: impl IntoIterator<Item = (UserId, ItemId, f64)>,
) -> Result<HashMap<(UserId, ItemId), u32>> {
    let mut by_user: BTreeMap<UserId, Vec<(ItemId, f64)>> = BTreeMap::new();
    let mut seen: HashSet<(UserId, ItemId)> = HashSet::new();

    for (user_id, item_id, score) in rows {
        if !score.is_finite() {
            return Err(PipelineError::Validation(format!(
                "non-finite score for user {} item {}",
                user_id, item_id
            )));
        }
        if !seen.insert((user_id, item_id)) {
            return Err(PipelineError::Validation(format!(
                "duplicate pair user {} item {}",
                user_id, item_id
            )));
        }
        by_user.entry(user_id).or_default().push((item_id, score));
    }

    let mut ranks = HashMap::with_capacity(seen.len());
    for (user_id, mut items) in by_user {
        items.sort_by(|a, b| by_score_desc_then_id(a.1, a.0, b.1, b.0));

        let mut rank = 0u32;
        let mut previous: Option<f64> = None;
        for (item_id, score) in items {
            if previous != Some(score) {
                rank += 1;
                previous = Some(score);
            }
            ranks.insert((user_id, item_id), rank);
        }
    }

    Ok(ranks)
}

/// Score Fusion - RRF 融合
///
/// Signal A (candidate scores) defines the universe; signal B (ranker) only
/// adds to pairs A already contains.
pub struct ScoreFusion {
    rrf_k: u32,
}

impl ScoreFusion {
    pub fn new(rrf_k: u32) -> Self {
        Self { rrf_k }
    }

    pub fn fuse(
        &self,
        candidates: &[CandidateScore],
        ranker: Option<&[ExternalScore]>,
    ) -> Result<(Vec<FusedScore>, FusionStats)> {
        let ranks_a = dense_rank(candidates.iter().map(|c| (c.user_id, c.item_id, c.score)))?;
        let ranks_b = match ranker {
            Some(scores) => Some(dense_rank(
                scores.iter().map(|s| (s.user_id, s.item_id, s.score)),
            )?),
            None => None,
        };

        let mode = if ranks_b.is_some() {
            FusionMode::Full
        } else {
            warn!(
                pairs = candidates.len(),
                "Ranker signal unavailable, fusing candidate ranks only"
            );
            FusionMode::Degraded
        };

        let mut fused: Vec<FusedScore> = ranks_a
            .iter()
            .map(|(&(user_id, item_id), &candidate_rank)| {
                let ranker_rank = ranks_b
                    .as_ref()
                    .and_then(|ranks| ranks.get(&(user_id, item_id)).copied());
                let blend_score = rrf(candidate_rank, self.rrf_k)
                    + ranker_rank.map_or(0.0, |rank| rrf(rank, self.rrf_k));
                FusedScore {
                    user_id,
                    item_id,
                    blend_score,
                    candidate_rank,
                    ranker_rank,
                }
            })
            .collect();
        fused.sort_by(|a, b| {
            a.user_id.cmp(&b.user_id).then_with(|| {
                by_score_desc_then_id(a.blend_score, a.item_id, b.blend_score, b.item_id)
            })
        });

        let pairs_with_ranker = fused.iter().filter(|f| f.ranker_rank.is_some()).count();
        let ranker_only_dropped = ranks_b
            .as_ref()
            .map_or(0, |ranks| ranks.keys().filter(|key| !ranks_a.contains_key(*key)).count());

        let stats = FusionStats {
            mode,
            users: fused
                .iter()
                .map(|f| f.user_id)
                .collect::<HashSet<UserId>>()
                .len(),
            fused_pairs: fused.len(),
            pairs_with_ranker,
            ranker_only_dropped,
        };

        info!(
            mode = mode.as_str(),
            users = stats.users,
            fused = stats.fused_pairs,
            with_ranker = stats.pairs_with_ranker,
            dropped = stats.ranker_only_dropped,
            "Score fusion completed"
        );

        Ok((fused, stats))
    }
}
