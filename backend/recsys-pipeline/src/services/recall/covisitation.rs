use crate::config::PipelineConfig;
use crate::error::Result;
use crate::models::{
    CandidateScore, CandidateSource, CoOccurrenceEdge, EventType, InteractionEvent, ItemId,
    UserId,
};
use crate::store::{validate_event, EventStore, TimeRange};
use crate::utils::{by_score_desc_then_id, days_to_ms, decay_weight, midpoint};
use rayon::prelude::*;
use std::collections::{HashMap, HashSet};
use tracing::{debug, info};

/// Co-visitation Recall Builder
///
/// Algorithm:
/// 1. Restrict interactions to `[cutoff - history_window, cutoff)`
/// 2. Per user, pair every event with every other event on a different item
///    (capped to the user's most recent `max_events_per_user` events)
/// 3. Pair weight = w(type_left) * w(type_right) * 0.5^((cutoff - midpoint) / half_life)
/// 4. Sum pair weights across users into directed edges (barrier)
/// 5. Keep the top-K neighbors per anchor (weight desc, candidate id asc)
/// 6. Expand each user's recent distinct items through the pruned graph
pub struct CoVisitationBuilder {
    event_weights: HashMap<EventType, f64>,
    half_life_ms: i64,
    history_window_ms: i64,
    topk_per_anchor: usize,
    recent_anchors: usize,
    per_user_cap: usize,
    max_events_per_user: usize,
}

/// Default number of anchors per user
const DEFAULT_RECENT_ANCHORS: usize = 20;
/// Default pairing cap per user; pairing cost is quadratic in this
const DEFAULT_MAX_EVENTS_PER_USER: usize = 200;

/// Pruned item graph: anchor -> neighbors sorted by weight desc, id asc.
#[derive(Debug, Default)]
pub struct CoVisitationGraph {
    neighbors: HashMap<ItemId, Vec<CoOccurrenceEdge>>,
}

impl CoVisitationGraph {
    pub fn neighbors(&self, anchor: ItemId) -> &[CoOccurrenceEdge] {
        self.neighbors
            .get(&anchor)
            .map(Vec::as_slice)
            .unwrap_or(&[])
    }

    pub fn anchor_count(&self) -> usize {
        self.neighbors.len()
    }

    pub fn edge_count(&self) -> usize {
        self.neighbors.values().map(Vec::len).sum()
    }
}

#[derive(Debug, Default)]
pub struct CoVisitationOutput {
    pub candidates: Vec<CandidateScore>,
    pub anchors_with_edges: usize,
    pub edges_retained: usize,
    pub users_capped: usize,
}

/// One user's window events, oldest first.
struct UserHistory<'a> {
    user_id: UserId,
    events: Vec<&'a InteractionEvent>,
}

impl CoVisitationBuilder {
    pub fn new(
        half_life_days: u32,
        history_window_days: u32,
        topk_per_anchor: usize,
        per_user_cap: usize,
    ) -> Self {
        Self {
            event_weights: HashMap::new(),
            half_life_ms: days_to_ms(half_life_days),
            history_window_ms: days_to_ms(history_window_days),
            topk_per_anchor,
            recent_anchors: DEFAULT_RECENT_ANCHORS,
            per_user_cap,
            max_events_per_user: DEFAULT_MAX_EVENTS_PER_USER,
        }
    }

    pub fn from_config(config: &PipelineConfig) -> Self {
        Self::new(
            config.time.decay_half_life_days,
            config.candidates.history_window_days,
            config.candidates.topk_per_anchor,
            config.candidates.per_user_from_covis,
        )
        .with_event_weights(config.event_type_weight.clone())
        .with_recent_anchors(config.candidates.recent_anchors)
        .with_max_events_per_user(config.candidates.max_events_per_user)
    }

    /// Event types missing from the table weigh 1.0
    pub fn with_event_weights(mut self, weights: HashMap<EventType, f64>) -> Self {
        self.event_weights = weights;
        self
    }

    pub fn with_recent_anchors(mut self, n: usize) -> Self {
        self.recent_anchors = n;
        self
    }

    pub fn with_max_events_per_user(mut self, n: usize) -> Self {
        self.max_events_per_user = n;
        self
    }

    pub fn window(&self, cutoff: i64) -> TimeRange {
        TimeRange::trailing(cutoff, self.history_window_ms)
    }

    fn weight_of(&self, event_type: &EventType) -> f64 {
        self.event_weights.get(event_type).copied().unwrap_or(1.0)
    }

    /// Build co-visitation candidates for every user active in the window.
    pub fn build(&self, store: &dyn EventStore, cutoff: i64) -> Result<CoVisitationOutput> {
        let window = self.window(cutoff);
        let events = store.query(window)?;
        self.build_from_events(&events, cutoff)
    }

    pub fn build_from_events(
        &self,
        events: &[InteractionEvent],
        cutoff: i64,
    ) -> Result<CoVisitationOutput> {
        let window = self.window(cutoff);
        for event in events {
            validate_event(event)?;
        }
        let in_window: Vec<&InteractionEvent> =
            events.iter().filter(|e| window.contains(e.timestamp)).collect();

        if in_window.is_empty() {
            info!(cutoff = cutoff, "Co-visitation: empty window, no candidates");
            return Ok(CoVisitationOutput::default());
        }

        let histories = group_by_user(in_window);
        let users_capped = histories
            .iter()
            .filter(|h| h.events.len() > self.max_events_per_user)
            .count();

        let graph = self.graph_from_histories(&histories, cutoff);

        let per_user: Vec<Vec<CandidateScore>> = histories
            .par_iter()
            .map(|history| self.candidates_for_user(history, &graph))
            .collect();
        let candidates: Vec<CandidateScore> = per_user.into_iter().flatten().collect();

        info!(
            users = histories.len(),
            users_capped = users_capped,
            anchors = graph.anchor_count(),
            edges = graph.edge_count(),
            candidates = candidates.len(),
            "Co-visitation candidates ready"
        );

        Ok(CoVisitationOutput {
            candidates,
            anchors_with_edges: graph.anchor_count(),
            edges_retained: graph.edge_count(),
            users_capped,
        })
    }

    /// Build the pruned co-visitation graph from the events in the window ending at `cutoff`.
    pub fn build_graph(&self, events: &[InteractionEvent], cutoff: i64) -> CoVisitationGraph {
        let window = self.window(cutoff);
        let in_window: Vec<&InteractionEvent> =
            events.iter().filter(|e| window.contains(e.timestamp)).collect();
        let histories = group_by_user(in_window);
        self.graph_from_histories(&histories, cutoff)
    }

    fn graph_from_histories(
        &self,
        histories: &[UserHistory<'_>],
        cutoff: i64,
    ) -> CoVisitationGraph {
        // Phase 1: per-user pair accumulation, fully parallel
        let partials: Vec<HashMap<(ItemId, ItemId), f64>> = histories
            .par_iter()
            .map(|history| self.accumulate_user_pairs(history, cutoff))
            .collect();

        // Phase 2: global reduction in user order, so float sums are reproducible
        let mut totals: HashMap<(ItemId, ItemId), f64> = HashMap::new();
        for partial in partials {
            for (pair, weight) in partial {
                *totals.entry(pair).or_insert(0.0) += weight;
            }
        }

        let mut by_anchor: HashMap<ItemId, Vec<CoOccurrenceEdge>> = HashMap::new();
        for ((anchor_item, candidate_item), weight) in totals {
            if weight > 0.0 {
                by_anchor.entry(anchor_item).or_default().push(CoOccurrenceEdge {
                    anchor_item,
                    candidate_item,
                    weight,
                });
            }
        }

        // Top-K per anchor only after the reduction is complete
        let topk = self.topk_per_anchor;
        let neighbors: HashMap<ItemId, Vec<CoOccurrenceEdge>> = by_anchor
            .into_par_iter()
            .map(|(anchor, mut edges)| {
                edges.sort_by(|a, b| {
                    by_score_desc_then_id(a.weight, a.candidate_item, b.weight, b.candidate_item)
                });
                edges.truncate(topk);
                (anchor, edges)
            })
            .collect();

        CoVisitationGraph { neighbors }
    }

    fn accumulate_user_pairs(
        &self,
        history: &UserHistory<'_>,
        cutoff: i64,
    ) -> HashMap<(ItemId, ItemId), f64> {
        let start = history.events.len().saturating_sub(self.max_events_per_user);
        let events = &history.events[start..];
        let weights: Vec<f64> = events.iter().map(|e| self.weight_of(&e.event_type)).collect();

        let mut pairs: HashMap<(ItemId, ItemId), f64> = HashMap::new();
        for (i, left) in events.iter().enumerate() {
            for (j, right) in events.iter().enumerate() {
                if left.item_id == right.item_id {
                    continue;
                }
                let delta = cutoff - midpoint(left.timestamp, right.timestamp);
                let w = weights[i] * weights[j] * decay_weight(delta, self.half_life_ms);
                *pairs.entry((left.item_id, right.item_id)).or_insert(0.0) += w;
            }
        }

        debug!(
            user_id = history.user_id,
            events = events.len(),
            pairs = pairs.len(),
            "User co-visitation pairs accumulated"
        );

        pairs
    }

    /// Most recent distinct items, newest first (ties: item id ascending).
    fn anchors_for(&self, history: &UserHistory<'_>) -> Vec<ItemId> {
        let mut ordered: Vec<&InteractionEvent> = history.events.clone();
        ordered.sort_by(|a, b| {
            b.timestamp
                .cmp(&a.timestamp)
                .then_with(|| a.item_id.cmp(&b.item_id))
        });

        let mut seen: HashSet<ItemId> = HashSet::new();
        let mut anchors = Vec::new();
        for event in ordered {
            if anchors.len() >= self.recent_anchors {
                break;
            }
            if seen.insert(event.item_id) {
                anchors.push(event.item_id);
            }
        }
        anchors
    }

    fn candidates_for_user(
        &self,
        history: &UserHistory<'_>,
        graph: &CoVisitationGraph,
    ) -> Vec<CandidateScore> {
        let mut scores: HashMap<ItemId, f64> = HashMap::new();
        for anchor in self.anchors_for(history) {
            for edge in graph.neighbors(anchor) {
                *scores.entry(edge.candidate_item).or_insert(0.0) += edge.weight;
            }
        }

        let mut ranked: Vec<(ItemId, f64)> = scores.into_iter().collect();
        ranked.sort_by(|a, b| by_score_desc_then_id(a.1, a.0, b.1, b.0));
        ranked.truncate(self.per_user_cap);

        ranked
            .into_iter()
            .map(|(item_id, score)| CandidateScore {
                user_id: history.user_id,
                item_id,
                score,
                source: CandidateSource::Covis,
            })
            .collect()
    }
}

/// Groups events by user (ascending), each user's events in (timestamp, item, type) order.
fn group_by_user(events: Vec<&InteractionEvent>) -> Vec<UserHistory<'_>> {
    let mut by_user: HashMap<UserId, Vec<&InteractionEvent>> = HashMap::new();
    for event in events {
        by_user.entry(event.user_id).or_default().push(event);
    }

    let mut histories: Vec<UserHistory<'_>> = by_user
        .into_iter()
        .map(|(user_id, mut events)| {
            events.sort_by(|a, b| {
                a.timestamp
                    .cmp(&b.timestamp)
                    .then_with(|| a.item_id.cmp(&b.item_id))
                    .then_with(|| a.event_type.cmp(&b.event_type))
            });
            UserHistory { user_id, events }
        })
        .collect();
    histories.sort_by_key(|h| h.user_id);
    histories
}
