mod covisitation;
mod popularity;

use crate::config::PipelineConfig;
use crate::error::Result;
use crate::models::{CandidateScore, CandidateStats, ItemId, UserId};
use crate::store::EventStore;
use crate::utils::by_score_desc_then_id;
use std::collections::{HashMap, HashSet};
use tracing::info;

pub use covisitation::{CoVisitationBuilder, CoVisitationGraph, CoVisitationOutput};
pub use popularity::{PopularityBuilder, PopularityOutput, TOP_CATEGORIES_PER_USER};

/// Merged candidate set for one stage, plus what downstream feature building needs.
#[derive(Debug, Default)]
pub struct RecallOutput {
    pub candidates: Vec<CandidateScore>,
    pub item_popularity: HashMap<ItemId, u64>,
    pub stats: CandidateStats,
}

/// Recall 層：co-visitation + popularity, merged per (user, item)
pub struct RecallLayer {
    covis: CoVisitationBuilder,
    popularity: PopularityBuilder,
}

impl RecallLayer {
    pub fn new(covis: CoVisitationBuilder, popularity: PopularityBuilder) -> Self {
        Self { covis, popularity }
    }

    pub fn from_config(config: &PipelineConfig) -> Self {
        Self::new(
            CoVisitationBuilder::from_config(config),
            PopularityBuilder::from_config(config),
        )
    }

    /// Build and merge candidates for the window ending at `cutoff`.
    pub fn recall_candidates(&self, store: &dyn EventStore, cutoff: i64) -> Result<RecallOutput> {
        let covis = self.covis.build(store, cutoff)?;
        let popularity = self.popularity.build(store, cutoff)?;

        let mut stats = CandidateStats {
            covis_candidates: covis.candidates.len(),
            pop_candidates: popularity.candidates.len(),
            anchors_with_edges: covis.anchors_with_edges,
            edges_retained: covis.edges_retained,
            users_capped: covis.users_capped,
            ..Default::default()
        };

        let candidates = CandidateMerger::merge(covis.candidates, popularity.candidates);

        stats.merged_candidates = candidates.len();
        stats.users = candidates
            .iter()
            .map(|c| c.user_id)
            .collect::<HashSet<UserId>>()
            .len();

        info!(
            cutoff = cutoff,
            users = stats.users,
            covis = stats.covis_candidates,
            pop = stats.pop_candidates,
            merged = stats.merged_candidates,
            "Recall completed"
        );

        Ok(RecallOutput {
            candidates,
            item_popularity: popularity.item_popularity,
            stats,
        })
    }
}

/// Union of the two candidate streams.
pub struct CandidateMerger;

impl CandidateMerger {
    /// 去重並合併：one row per (user, item) with the max score.
    ///
    /// The surviving source label follows `CandidateSource::merge_priority`
    /// (covis over pop), independent of which score was larger.
    /// Output: user ascending, score descending, item ascending.
    pub fn merge(
        covis: Vec<CandidateScore>,
        pop: Vec<CandidateScore>,
    ) -> Vec<CandidateScore> {
        let mut merged: HashMap<(UserId, ItemId), CandidateScore> = HashMap::new();

        for candidate in covis.into_iter().chain(pop) {
            let key = (candidate.user_id, candidate.item_id);
            match merged.get_mut(&key) {
                Some(existing) => {
                    if candidate.score > existing.score {
                        existing.score = candidate.score;
                    }
                    if candidate.source.merge_priority() < existing.source.merge_priority() {
                        existing.source = candidate.source;
                    }
                }
                None => {
                    merged.insert(key, candidate);
                }
            }
        }

        let mut unique: Vec<CandidateScore> = merged.into_values().collect();
        unique.sort_by(|a, b| {
            a.user_id
                .cmp(&b.user_id)
                .then_with(|| by_score_desc_then_id(a.score, a.item_id, b.score, b.item_id))
        });
        unique
    }
}
