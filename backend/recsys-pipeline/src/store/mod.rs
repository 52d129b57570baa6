// ============================================
// Event Store (interaction log + item catalog)
// ============================================
//
// Read-only access to the interaction log and the item catalog.
// Every builder queries it once per stage with a half-open window.
//
// Backends:
// - InMemoryEventStore: events already materialized (tests, embedding)
// - FileEventStore: JSON-lines files, one record per line

use crate::error::{PipelineError, Result};
use crate::models::{EventType, InteractionEvent, ItemId, ItemRecord, UserId};
use serde::Deserialize;
use std::fs::File;
use std::io::{BufRead, BufReader};
use std::path::Path;
use tracing::info;

/// Half-open time range `[start, end)` in epoch milliseconds.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TimeRange {
    pub start: i64,
    pub end: i64,
}

impl TimeRange {
    pub fn new(start: i64, end: i64) -> Self {
        Self { start, end }
    }

    /// Trailing window ending (exclusive) at `cutoff`.
    pub fn trailing(cutoff: i64, window_ms: i64) -> Self {
        Self {
            start: cutoff.saturating_sub(window_ms),
            end: cutoff,
        }
    }

    pub fn contains(&self, ts: i64) -> bool {
        ts >= self.start && ts < self.end
    }

    pub fn is_empty(&self) -> bool {
        self.start >= self.end
    }
}

pub trait EventStore: Send + Sync {
    /// Events with `range.start <= timestamp < range.end`, ordered by (timestamp, user, item).
    fn query(&self, range: TimeRange) -> Result<Vec<InteractionEvent>>;

    fn items(&self) -> Result<Vec<ItemRecord>>;
}

/// Checks the invariants every downstream stage relies on.
pub fn validate_event(event: &InteractionEvent) -> Result<()> {
    if event.timestamp < 0 {
        return Err(PipelineError::Validation(format!(
            "negative timestamp {} for user {} item {}",
            event.timestamp, event.user_id, event.item_id
        )));
    }
    Ok(())
}

fn sort_events(events: &mut [InteractionEvent]) {
    events.sort_by(|a, b| {
        a.timestamp
            .cmp(&b.timestamp)
            .then_with(|| a.user_id.cmp(&b.user_id))
            .then_with(|| a.item_id.cmp(&b.item_id))
            .then_with(|| a.event_type.cmp(&b.event_type))
    });
}

fn select_range(events: &[InteractionEvent], range: TimeRange) -> Vec<InteractionEvent> {
    if range.is_empty() {
        return Vec::new();
    }
    // Sorted by timestamp, so the window is a contiguous slice
    let lo = events.partition_point(|e| e.timestamp < range.start);
    let hi = events.partition_point(|e| e.timestamp < range.end);
    events[lo..hi].to_vec()
}

pub struct InMemoryEventStore {
    events: Vec<InteractionEvent>,
    items: Vec<ItemRecord>,
}

impl InMemoryEventStore {
    pub fn new(mut events: Vec<InteractionEvent>, items: Vec<ItemRecord>) -> Result<Self> {
        for event in &events {
            validate_event(event)?;
        }
        sort_events(&mut events);
        Ok(Self { events, items })
    }
}

impl EventStore for InMemoryEventStore {
    fn query(&self, range: TimeRange) -> Result<Vec<InteractionEvent>> {
        Ok(select_range(&self.events, range))
    }

    fn items(&self) -> Result<Vec<ItemRecord>> {
        Ok(self.items.clone())
    }
}

/// Raw interaction line; `ts` may be null or absent in malformed exports.
#[derive(Debug, Deserialize)]
struct RawEvent {
    user_id: UserId,
    item_id: ItemId,
    event_type: EventType,
    #[serde(default)]
    ts: Option<i64>,
}

/// JSON-lines backed store. Both files are read and validated on open.
pub struct FileEventStore {
    inner: InMemoryEventStore,
}

impl FileEventStore {
    pub fn open(interactions: &Path, items: &Path) -> Result<Self> {
        let events = read_jsonl::<RawEvent>(interactions)?
            .into_iter()
            .map(|(line_no, raw)| {
                let timestamp = raw.ts.ok_or_else(|| {
                    PipelineError::Validation(format!(
                        "{}:{}: missing timestamp",
                        interactions.display(),
                        line_no
                    ))
                })?;
                let event = InteractionEvent {
                    user_id: raw.user_id,
                    item_id: raw.item_id,
                    event_type: raw.event_type,
                    timestamp,
                };
                validate_event(&event).map_err(|e| {
                    PipelineError::Validation(format!(
                        "{}:{}: {}",
                        interactions.display(),
                        line_no,
                        e
                    ))
                })?;
                Ok(event)
            })
            .collect::<Result<Vec<_>>>()?;

        let catalog: Vec<ItemRecord> = read_jsonl(items)?
            .into_iter()
            .map(|(_, record)| record)
            .collect();

        info!(
            events = events.len(),
            items = catalog.len(),
            path = %interactions.display(),
            "Event store loaded"
        );

        Ok(Self {
            inner: InMemoryEventStore::new(events, catalog)?,
        })
    }
}

impl EventStore for FileEventStore {
    fn query(&self, range: TimeRange) -> Result<Vec<InteractionEvent>> {
        self.inner.query(range)
    }

    fn items(&self) -> Result<Vec<ItemRecord>> {
        self.inner.items()
    }
}

/// Reads a JSON-lines file, returning each record with its 1-based line number.
/// Blank lines are skipped.
pub fn read_jsonl<T: serde::de::DeserializeOwned>(path: &Path) -> Result<Vec<(usize, T)>> {
    if !path.exists() {
        return Err(PipelineError::MissingUpstreamArtifact(
            path.display().to_string(),
        ));
    }

    let reader = BufReader::new(File::open(path)?);
    let mut records = Vec::new();

    for (idx, line) in reader.lines().enumerate() {
        let line = line?;
        if line.trim().is_empty() {
            continue;
        }
        let record = serde_json::from_str(&line).map_err(|e| {
            PipelineError::Validation(format!("{}:{}: {}", path.display(), idx + 1, e))
        })?;
        records.push((idx + 1, record));
    }

    Ok(records)
}
