use crate::error::{PipelineError, Result};
use crate::models::{ExternalScore, ItemId, UserId};
use crate::store::read_jsonl;
use std::collections::HashSet;
use std::path::Path;
use tracing::{info, warn};

/// Score artifact written by the external ranker (`scores_{stage}.jsonl`).
pub struct ScoreTable;

impl ScoreTable {
    /// `Ok(None)` when the ranker has not produced output for this stage.
    pub fn load(path: &Path) -> Result<Option<Vec<ExternalScore>>> {
        let rows = match read_jsonl::<ExternalScore>(path) {
            Ok(rows) => rows,
            Err(e) if e.is_missing_artifact() => {
                warn!(path = %path.display(), "No ranker scores found");
                return Ok(None);
            }
            Err(e) => return Err(e),
        };

        let mut seen: HashSet<(UserId, ItemId)> = HashSet::with_capacity(rows.len());
        let mut scores = Vec::with_capacity(rows.len());

        for (line_no, row) in rows {
            if !row.score.is_finite() {
                return Err(PipelineError::Validation(format!(
                    "{}:{}: non-finite ranker score",
                    path.display(),
                    line_no
                )));
            }
            if !seen.insert((row.user_id, row.item_id)) {
                return Err(PipelineError::Validation(format!(
                    "{}:{}: duplicate pair user {} item {}",
                    path.display(),
                    line_no,
                    row.user_id,
                    row.item_id
                )));
            }
            scores.push(row);
        }

        info!(path = %path.display(), pairs = scores.len(), "Ranker scores loaded");
        Ok(Some(scores))
    }
}
