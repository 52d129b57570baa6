use crate::config::PipelineConfig;
use crate::models::{CategoryId, FusedScore, ItemId, ItemRecord, RankedList, RerankStats, UserId};
use crate::utils::by_score_desc_then_id;
use rayon::prelude::*;
use std::collections::{BTreeMap, HashMap};
use tracing::info;

/// A fused candidate annotated with its catalog attributes.
#[derive(Debug, Clone, PartialEq)]
pub struct DiversityCandidate {
    pub item_id: ItemId,
    pub blend_score: f64,
    pub brand: Option<String>,
    pub category: Option<CategoryId>,
}

/// Diversity Reranker - 多樣性重排
///
/// Greedy MMR selection: each pick maximizes
/// `lambda * blend_score - (1 - lambda) * penalty`, where the penalty adds 1.0
/// for a brand already at `max_per_brand` and 1.0 for a category already at
/// `max_per_category`. Counts grow as items are picked, so the penalty tracks
/// the list being built. Caps are soft: a pool with only one brand still fills
/// the list.
pub struct DiversityReranker {
    lambda: f64, // 1.0: relevance only
    max_per_brand: usize,
    max_per_category: usize,
    top_k: usize,
}

impl DiversityReranker {
    pub fn new(lambda: f64, max_per_brand: usize, max_per_category: usize, top_k: usize) -> Self {
        Self {
            lambda,
            max_per_brand,
            max_per_category,
            top_k,
        }
    }

    pub fn from_config(config: &PipelineConfig) -> Self {
        Self::new(
            config.diversity.mmr_lambda,
            config.diversity.max_per_brand,
            config.diversity.max_per_category,
            config.submission.final_topk,
        )
    }

    /// Select up to `top_k` items for one user.
    pub fn rerank(&self, mut pool: Vec<DiversityCandidate>) -> Vec<ItemId> {
        pool.sort_by(|a, b| {
            by_score_desc_then_id(a.blend_score, a.item_id, b.blend_score, b.item_id)
        });

        let mut selected: Vec<ItemId> = Vec::with_capacity(self.top_k.min(pool.len()));
        let mut brand_counts: HashMap<String, usize> = HashMap::new();
        let mut category_counts: HashMap<CategoryId, usize> = HashMap::new();

        while selected.len() < self.top_k && !pool.is_empty() {
            let mut best_idx = 0;
            let mut best_mmr = f64::NEG_INFINITY;

            // Strict `>`: equal MMR keeps the earlier candidate in pool order
            for (i, candidate) in pool.iter().enumerate() {
                let penalty = self.penalty(candidate, &brand_counts, &category_counts);
                let mmr = self.lambda * candidate.blend_score - (1.0 - self.lambda) * penalty;
                if mmr > best_mmr {
                    best_mmr = mmr;
                    best_idx = i;
                }
            }

            let chosen = pool.remove(best_idx);
            if let Some(brand) = chosen.brand {
                *brand_counts.entry(brand).or_insert(0) += 1;
            }
            if let Some(category) = chosen.category {
                *category_counts.entry(category).or_insert(0) += 1;
            }
            selected.push(chosen.item_id);
        }

        selected
    }

    fn penalty(
        &self,
        candidate: &DiversityCandidate,
        brand_counts: &HashMap<String, usize>,
        category_counts: &HashMap<CategoryId, usize>,
    ) -> f64 {
        let mut penalty = 0.0;
        if let Some(brand) = &candidate.brand {
            if brand_counts.get(brand).copied().unwrap_or(0) >= self.max_per_brand {
                penalty += 1.0;
            }
        }
        if let Some(category) = &candidate.category {
            if category_counts.get(category).copied().unwrap_or(0) >= self.max_per_category {
                penalty += 1.0;
            }
        }
        penalty
    }

    /// Rerank every user in `fused`, joining brand and category from the catalog.
    ///
    /// Items missing from the catalog have neither brand nor category.
    pub fn rerank_all(
        &self,
        fused: &[FusedScore],
        catalog: &HashMap<ItemId, ItemRecord>,
    ) -> (Vec<RankedList>, RerankStats) {
        let mut pools: BTreeMap<UserId, Vec<DiversityCandidate>> = BTreeMap::new();
        for row in fused {
            let record = catalog.get(&row.item_id);
            pools.entry(row.user_id).or_default().push(DiversityCandidate {
                item_id: row.item_id,
                blend_score: row.blend_score,
                brand: record.and_then(|r| r.brand.clone()),
                category: record.and_then(|r| r.category_id),
            });
        }

        let pools: Vec<(UserId, Vec<DiversityCandidate>)> = pools.into_iter().collect();
        let lists: Vec<RankedList> = pools
            .into_par_iter()
            .map(|(user_id, pool)| RankedList {
                user_id,
                items: self.rerank(pool),
            })
            .collect();

        let stats = RerankStats {
            users: lists.len(),
            items_emitted: lists.iter().map(|l| l.items.len()).sum(),
            short_lists: lists.iter().filter(|l| l.items.len() < self.top_k).count(),
        };

        info!(
            users = stats.users,
            items = stats.items_emitted,
            short_lists = stats.short_lists,
            lambda = self.lambda,
            "Diversity rerank completed"
        );

        (lists, stats)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;

    fn candidate(
        item_id: ItemId,
        blend_score: f64,
        brand: Option<&str>,
        category: Option<CategoryId>,
    ) -> DiversityCandidate {
        DiversityCandidate {
            item_id,
            blend_score,
            brand: brand.map(str::to_string),
            category,
        }
    }

    #[test]
    fn test_lambda_one_keeps_blend_order() {
        let reranker = DiversityReranker::new(1.0, 1, 1, 10);
        let pool = vec![
            candidate(3, 0.010, Some("a"), Some(1)),
            candidate(1, 0.030, Some("a"), Some(1)),
            candidate(2, 0.020, Some("a"), Some(1)),
            candidate(4, 0.020, Some("a"), Some(1)),
        ];

        assert_eq!(reranker.rerank(pool), vec![1, 2, 4, 3]);
    }

    #[test]
    fn test_brand_cap_diversifies() {
        let reranker = DiversityReranker::new(0.8, 1, 10, 3);
        let pool = vec![
            candidate(1, 1.0 / 61.0, Some("acme"), None),
            candidate(2, 1.0 / 62.0, Some("acme"), None),
            candidate(3, 1.0 / 63.0, Some("globex"), None),
            candidate(4, 1.0 / 64.0, Some("initech"), None),
        ];

        let result = reranker.rerank(pool);

        assert_eq!(result, vec![1, 3, 4]);
    }

    #[test]
    fn test_caps_are_soft() {
        let reranker = DiversityReranker::new(0.5, 1, 1, 3);
        let pool = vec![
            candidate(1, 0.03, Some("acme"), Some(7)),
            candidate(2, 0.02, Some("acme"), Some(7)),
            candidate(3, 0.01, Some("acme"), Some(7)),
        ];

        assert_eq!(reranker.rerank(pool), vec![1, 2, 3]);
    }

    #[test]
    fn test_category_penalty_stacks_with_brand() {
        let reranker = DiversityReranker::new(0.5, 1, 1, 2);
        let pool = vec![
            candidate(1, 0.05, Some("acme"), Some(7)),
            // brand and category both capped after item 1
            candidate(2, 0.04, Some("acme"), Some(7)),
            // category only
            candidate(3, 0.03, Some("globex"), Some(7)),
        ];

        assert_eq!(reranker.rerank(pool), vec![1, 3]);
    }

    #[test]
    fn test_unknown_attributes_never_penalized() {
        let reranker = DiversityReranker::new(0.5, 1, 1, 3);
        let pool = vec![
            candidate(1, 0.03, None, None),
            candidate(2, 0.02, None, None),
            candidate(3, 0.01, Some("acme"), None),
        ];

        assert_eq!(reranker.rerank(pool), vec![1, 2, 3]);
    }

    #[test]
    fn test_short_pool() {
        let reranker = DiversityReranker::new(0.8, 3, 5, 10);

        let result = reranker.rerank(vec![candidate(1, 0.1, None, None)]);

        assert_eq!(result, vec![1]);
        assert!(reranker.rerank(Vec::new()).is_empty());
    }

    #[test]
    fn test_rerank_all_joins_catalog() {
        let reranker = DiversityReranker::new(0.8, 1, 10, 2);
        let fused_score = |user_id, item_id, blend_score, candidate_rank| FusedScore {
            user_id,
            item_id,
            blend_score,
            candidate_rank,
            ranker_rank: None,
        };
        let fused = vec![
            fused_score(2, 10, 0.03, 1),
            fused_score(2, 11, 0.02, 2),
            fused_score(2, 12, 0.01, 3),
            fused_score(1, 10, 0.01, 1),
        ];
        let mut catalog = HashMap::new();
        for (item_id, brand) in [(10, "acme"), (11, "acme"), (12, "globex")] {
            catalog.insert(
                item_id,
                ItemRecord {
                    item_id,
                    category_id: Some(1),
                    brand: Some(brand.to_string()),
                    price: None,
                },
            );
        }

        let (lists, stats) = reranker.rerank_all(&fused, &catalog);

        assert_eq!(lists[0], RankedList { user_id: 1, items: vec![10] });
        assert_eq!(lists[1], RankedList { user_id: 2, items: vec![10, 12] });
        assert_eq!(stats.users, 2);
        assert_eq!(stats.items_emitted, 3);
        assert_eq!(stats.short_lists, 1);

        let unique: HashSet<ItemId> = lists[1].items.iter().copied().collect();
        assert_eq!(unique.len(), lists[1].items.len());
    }
}
