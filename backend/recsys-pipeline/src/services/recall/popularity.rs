use crate::config::PipelineConfig;
use crate::error::Result;
use crate::models::{
    CandidateScore, CandidateSource, CategoryId, InteractionEvent, ItemId, ItemRecord, UserId,
};
use crate::store::{validate_event, EventStore, TimeRange};
use crate::utils::days_to_ms;
use rayon::prelude::*;
use std::collections::HashMap;
use tracing::info;

/// Category Popularity Recall
///
/// For each user: the 3 categories they interacted with most in the window,
/// then the globally most interacted items of those categories.
///
/// Users with no interactions in the window get nothing here; a global
/// top-N fallback is a caller policy.
pub struct PopularityBuilder {
    history_window_ms: i64,
    per_user_cap: usize,
}

/// Categories considered per user
pub const TOP_CATEGORIES_PER_USER: usize = 3;

#[derive(Debug, Default)]
pub struct PopularityOutput {
    pub candidates: Vec<CandidateScore>,
    /// Interaction count per item inside the window
    pub item_popularity: HashMap<ItemId, u64>,
}

impl PopularityBuilder {
    pub fn new(history_window_days: u32, per_user_cap: usize) -> Self {
        Self {
            history_window_ms: days_to_ms(history_window_days),
            per_user_cap,
        }
    }

    pub fn from_config(config: &PipelineConfig) -> Self {
        Self::new(
            config.candidates.history_window_days,
            config.candidates.per_user_from_pop,
        )
    }

    pub fn window(&self, cutoff: i64) -> TimeRange {
        TimeRange::trailing(cutoff, self.history_window_ms)
    }

    pub fn build(&self, store: &dyn EventStore, cutoff: i64) -> Result<PopularityOutput> {
        let events = store.query(self.window(cutoff))?;
        let items = store.items()?;
        self.build_from(&events, &items, cutoff)
    }

    pub fn build_from(
        &self,
        events: &[InteractionEvent],
        items: &[ItemRecord],
        cutoff: i64,
    ) -> Result<PopularityOutput> {
        let window = self.window(cutoff);
        for event in events {
            validate_event(event)?;
        }

        let category_of: HashMap<ItemId, CategoryId> = items
            .iter()
            .filter_map(|item| item.category_id.map(|c| (item.item_id, c)))
            .collect();

        let mut item_popularity: HashMap<ItemId, u64> = HashMap::new();
        let mut user_category_counts: HashMap<UserId, HashMap<CategoryId, u64>> = HashMap::new();

        for event in events.iter().filter(|e| window.contains(e.timestamp)) {
            *item_popularity.entry(event.item_id).or_insert(0) += 1;
            if let Some(&category) = category_of.get(&event.item_id) {
                *user_category_counts
                    .entry(event.user_id)
                    .or_default()
                    .entry(category)
                    .or_insert(0) += 1;
            }
        }

        let ranked_by_category = rank_items_by_category(&category_of, &item_popularity);

        let mut users: Vec<(UserId, HashMap<CategoryId, u64>)> =
            user_category_counts.into_iter().collect();
        users.sort_by_key(|(user_id, _)| *user_id);

        let per_user: Vec<Vec<CandidateScore>> = users
            .par_iter()
            .map(|(user_id, counts)| {
                let categories = top_categories(counts, TOP_CATEGORIES_PER_USER);
                self.candidates_for_user(*user_id, &categories, &ranked_by_category)
            })
            .collect();
        let candidates: Vec<CandidateScore> = per_user.into_iter().flatten().collect();

        info!(
            users = users.len(),
            popular_items = item_popularity.len(),
            candidates = candidates.len(),
            "Popularity candidates ready"
        );

        Ok(PopularityOutput {
            candidates,
            item_popularity,
        })
    }

    fn candidates_for_user(
        &self,
        user_id: UserId,
        categories: &[CategoryId],
        ranked_by_category: &HashMap<CategoryId, Vec<(ItemId, u64)>>,
    ) -> Vec<CandidateScore> {
        let mut pool: Vec<(ItemId, u64)> = categories
            .iter()
            .filter_map(|c| ranked_by_category.get(c))
            .flat_map(|items| items.iter().copied())
            .collect();
        pool.sort_by(|a, b| b.1.cmp(&a.1).then_with(|| a.0.cmp(&b.0)));
        pool.truncate(self.per_user_cap);

        pool.into_iter()
            .map(|(item_id, pop)| CandidateScore {
                user_id,
                item_id,
                score: pop as f64,
                source: CandidateSource::Pop,
            })
            .collect()
    }
}

/// Top-n categories by count desc, category id asc.
fn top_categories(counts: &HashMap<CategoryId, u64>, n: usize) -> Vec<CategoryId> {
    let mut ranked: Vec<(CategoryId, u64)> = counts.iter().map(|(c, n)| (*c, *n)).collect();
    ranked.sort_by(|a, b| b.1.cmp(&a.1).then_with(|| a.0.cmp(&b.0)));
    ranked.into_iter().take(n).map(|(c, _)| c).collect()
}

/// Catalog items with at least one interaction in the window, grouped by category.
fn rank_items_by_category(
    category_of: &HashMap<ItemId, CategoryId>,
    item_popularity: &HashMap<ItemId, u64>,
) -> HashMap<CategoryId, Vec<(ItemId, u64)>> {
    let mut grouped: HashMap<CategoryId, Vec<(ItemId, u64)>> = HashMap::new();
    for (item_id, category) in category_of {
        if let Some(&pop) = item_popularity.get(item_id) {
            grouped.entry(*category).or_default().push((*item_id, pop));
        }
    }
    grouped
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::EventType;
    use crate::utils::MS_PER_DAY;

    const CUTOFF: i64 = 50 * MS_PER_DAY;

    fn event(user_id: UserId, item_id: ItemId) -> InteractionEvent {
        InteractionEvent {
            user_id,
            item_id,
            event_type: EventType::View,
            timestamp: CUTOFF - 1_000,
        }
    }

    fn item(item_id: ItemId, category_id: Option<CategoryId>) -> ItemRecord {
        ItemRecord {
            item_id,
            category_id,
            brand: None,
            price: None,
        }
    }

    fn catalog() -> Vec<ItemRecord> {
        vec![
            item(1, Some(10)),
            item(2, Some(10)),
            item(3, Some(20)),
            item(4, Some(30)),
            item(5, Some(40)),
            item(6, None),
            item(7, Some(10)),
        ]
    }

    #[test]
    fn test_top_categories_tie_break() {
        let mut counts = HashMap::new();
        counts.insert(30, 2);
        counts.insert(10, 2);
        counts.insert(20, 5);
        counts.insert(40, 1);

        assert_eq!(top_categories(&counts, 3), vec![20, 10, 30]);
    }

    #[test]
    fn test_candidates_ranked_by_global_popularity() {
        // Global popularity: item 2 x3, item 1 x2, item 3 x1
        let events = vec![
            event(1, 1),
            event(1, 3),
            event(2, 2),
            event(2, 2),
            event(3, 2),
            event(3, 1),
        ];

        let builder = PopularityBuilder::new(30, 10);
        let output = builder.build_from(&events, &catalog(), CUTOFF).unwrap();
        let user1: Vec<(ItemId, f64)> = output
            .candidates
            .iter()
            .filter(|c| c.user_id == 1)
            .map(|c| (c.item_id, c.score))
            .collect();

        // Item 7 shares category 10 but has no interactions in the window
        assert_eq!(user1, vec![(2, 3.0), (1, 2.0), (3, 1.0)]);
        assert_eq!(output.item_popularity[&2], 3);
    }

    #[test]
    fn test_only_top_three_categories_are_used() {
        let events = vec![
            event(1, 1),
            event(1, 1),
            event(1, 3),
            event(1, 3),
            event(1, 4),
            event(1, 4),
            event(1, 5),
            event(2, 5),
            event(2, 5),
            event(2, 5),
        ];

        let builder = PopularityBuilder::new(30, 10);
        let output = builder.build_from(&events, &catalog(), CUTOFF).unwrap();
        let user1: Vec<ItemId> = output
            .candidates
            .iter()
            .filter(|c| c.user_id == 1)
            .map(|c| c.item_id)
            .collect();

        assert!(!user1.contains(&5));
        assert_eq!(user1.len(), 3);
        assert!(output.candidates.iter().all(|c| c.source == CandidateSource::Pop));
    }

    #[test]
    fn test_per_user_cap() {
        let events = vec![event(1, 1), event(1, 2), event(1, 7), event(2, 7)];

        let builder = PopularityBuilder::new(30, 2);
        let output = builder.build_from(&events, &catalog(), CUTOFF).unwrap();
        let user1: Vec<ItemId> = output
            .candidates
            .iter()
            .filter(|c| c.user_id == 1)
            .map(|c| c.item_id)
            .collect();

        assert_eq!(user1, vec![7, 1]);
    }

    #[test]
    fn test_inactive_user_gets_nothing() {
        let mut old = event(9, 1);
        old.timestamp = CUTOFF - 40 * MS_PER_DAY;
        let events = vec![old, event(1, 1)];

        let builder = PopularityBuilder::new(30, 10);
        let output = builder.build_from(&events, &catalog(), CUTOFF).unwrap();

        assert!(output.candidates.iter().all(|c| c.user_id != 9));
    }

    #[test]
    fn test_uncategorized_items_are_ignored() {
        let events = vec![event(1, 6), event(1, 6)];

        let builder = PopularityBuilder::new(30, 10);
        let output = builder.build_from(&events, &catalog(), CUTOFF).unwrap();

        assert!(output.candidates.is_empty());
        assert_eq!(output.item_popularity[&6], 2);
    }
}
