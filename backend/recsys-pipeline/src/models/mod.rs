use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

pub type UserId = u64;
pub type ItemId = u64;
pub type CategoryId = u64;

/// Interaction kind. Known kinds get their own variant, anything else is kept lowercased.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum EventType {
    View,
    Click,
    Cart,
    Favorite,
    Purchase,
    Other(String),
}

impl EventType {
    pub fn as_str(&self) -> &str {
        match self {
            EventType::View => "view",
            EventType::Click => "click",
            EventType::Cart => "cart",
            EventType::Favorite => "favorite",
            EventType::Purchase => "purchase",
            EventType::Other(name) => name.as_str(),
        }
    }
}

impl From<String> for EventType {
    fn from(name: String) -> Self {
        match name.to_ascii_lowercase().as_str() {
            "view" => EventType::View,
            "click" => EventType::Click,
            "cart" => EventType::Cart,
            "favorite" => EventType::Favorite,
            "purchase" => EventType::Purchase,
            _ => EventType::Other(name.to_ascii_lowercase()),
        }
    }
}

impl From<&str> for EventType {
    fn from(name: &str) -> Self {
        EventType::from(name.to_string())
    }
}

impl From<EventType> for String {
    fn from(event_type: EventType) -> Self {
        event_type.as_str().to_string()
    }
}

/// One implicit-feedback event. Timestamps are epoch milliseconds and never negative.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InteractionEvent {
    pub user_id: UserId,
    pub item_id: ItemId,
    pub event_type: EventType,
    pub timestamp: i64,
}

/// Catalog row. Category and brand may be unknown.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ItemRecord {
    pub item_id: ItemId,
    #[serde(default)]
    pub category_id: Option<CategoryId>,
    #[serde(default)]
    pub brand: Option<String>,
    #[serde(default)]
    pub price: Option<f64>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CandidateSource {
    Covis, // co-visitation graph
    Pop,   // category-scoped popularity
}

impl CandidateSource {
    pub fn as_str(&self) -> &'static str {
        match self {
            CandidateSource::Covis => "covis",
            CandidateSource::Pop => "pop",
        }
    }

    /// Lower wins when both builders emit the same (user, item).
    pub fn merge_priority(&self) -> u8 {
        match self {
            CandidateSource::Covis => 0,
            CandidateSource::Pop => 1,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CandidateScore {
    pub user_id: UserId,
    pub item_id: ItemId,
    pub score: f64,
    pub source: CandidateSource,
}

/// Directed co-visitation edge after per-anchor top-K pruning.
#[derive(Debug, Clone, PartialEq)]
pub struct CoOccurrenceEdge {
    pub anchor_item: ItemId,
    pub candidate_item: ItemId,
    pub weight: f64,
}

/// Score emitted by the external ranker (signal B).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExternalScore {
    pub user_id: UserId,
    pub item_id: ItemId,
    pub score: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FusedScore {
    pub user_id: UserId,
    pub item_id: ItemId,
    pub blend_score: f64,
    pub candidate_rank: u32,
    #[serde(default)]
    pub ranker_rank: Option<u32>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RankedList {
    pub user_id: UserId,
    pub items: Vec<ItemId>,
}

/// Evaluation stage; each stage has its own cutoff and artifacts.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Stage {
    Val,
    Test,
}

impl Stage {
    pub fn as_str(&self) -> &'static str {
        match self {
            Stage::Val => "val",
            Stage::Test => "test",
        }
    }
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Stage {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "val" | "validation" => Ok(Stage::Val),
            "test" => Ok(Stage::Test),
            other => Err(format!("unknown stage: {} (expected val or test)", other)),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct CandidateStats {
    pub users: usize,
    pub covis_candidates: usize,
    pub pop_candidates: usize,
    pub merged_candidates: usize,
    pub anchors_with_edges: usize,
    pub edges_retained: usize,
    pub users_capped: usize,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FusionMode {
    /// Candidate rank and ranker rank are both available.
    Full,
    /// No ranker output for this run; blend_score is the candidate RRF alone.
    Degraded,
}

impl FusionMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            FusionMode::Full => "full",
            FusionMode::Degraded => "degraded",
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct FusionStats {
    pub mode: FusionMode,
    pub users: usize,
    pub fused_pairs: usize,
    pub pairs_with_ranker: usize,
    pub ranker_only_dropped: usize,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct RerankStats {
    pub users: usize,
    pub items_emitted: usize,
    pub short_lists: usize,
}
