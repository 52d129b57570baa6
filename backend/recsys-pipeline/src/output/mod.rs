// ============================================
// Artifact Output (產出寫入)
// ============================================
//
// Every artifact goes to a temp file in its destination directory and is
// renamed into place once fully written. A failed stage leaves the previous
// artifact (or nothing) behind, never a truncated file.

use crate::error::Result;
use crate::models::RankedList;
use serde::Serialize;
use std::fs;
use std::io::{BufWriter, Write};
use std::path::Path;
use tempfile::NamedTempFile;
use tracing::info;

fn write_atomic<F>(path: &Path, write: F) -> Result<()>
where
    F: FnOnce(&mut dyn Write) -> Result<()>,
{
    let dir = match path.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => parent,
        _ => Path::new("."),
    };
    fs::create_dir_all(dir)?;

    let mut tmp = NamedTempFile::new_in(dir)?;
    {
        let mut writer = BufWriter::new(&mut tmp);
        write(&mut writer)?;
        writer.flush()?;
    }
    tmp.as_file().sync_all()?;
    tmp.persist(path)?;

    Ok(())
}

/// Publish `records` as JSON lines at `path`.
pub fn write_jsonl_atomic<T: Serialize>(path: &Path, records: &[T]) -> Result<()> {
    write_atomic(path, |writer| {
        for record in records {
            serde_json::to_writer(&mut *writer, record)?;
            writer.write_all(b"\n")?;
        }
        Ok(())
    })?;

    info!(path = %path.display(), records = records.len(), "Artifact published");
    Ok(())
}

/// Submission CSV: `user_id,item_ids`, items space-joined in rank order.
pub struct SubmissionWriter {
    top_k: usize,
}

impl SubmissionWriter {
    pub const HEADER: &'static str = "user_id,item_ids";

    pub fn new(top_k: usize) -> Self {
        Self { top_k }
    }

    pub fn format_row(&self, list: &RankedList) -> String {
        let items: Vec<String> = list
            .items
            .iter()
            .take(self.top_k)
            .map(|item| item.to_string())
            .collect();
        format!("{},{}", list.user_id, items.join(" "))
    }

    /// Writes one row per user, users ascending. Returns the row count.
    pub fn write(&self, path: &Path, lists: &[RankedList]) -> Result<usize> {
        let mut ordered: Vec<&RankedList> = lists.iter().collect();
        ordered.sort_by_key(|list| list.user_id);

        write_atomic(path, |writer| {
            writeln!(writer, "{}", Self::HEADER)?;
            for list in &ordered {
                writeln!(writer, "{}", self.format_row(list))?;
            }
            Ok(())
        })?;

        info!(path = %path.display(), users = ordered.len(), "Submission written");
        Ok(ordered.len())
    }
}
