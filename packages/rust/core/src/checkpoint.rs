//! Durable snapshots of enrichment output, and resume planning.
//!
//! The enrichment output file is also the checkpoint. Every snapshot is the
//! full accumulated list, written to a sibling temp file and renamed into
//! place so a reader never sees a half-written array.

use std::path::{Path, PathBuf};

use tracing::debug;

use docqa_shared::{ContentBlock, DocQaError, EnrichedRecord, Result};

/// Destination for enrichment snapshots.
pub trait CheckpointSink: Send {
    /// Replace the stored snapshot with `records`.
    fn write(&mut self, records: &[EnrichedRecord]) -> Result<()>;
}

/// Snapshot sink backed by a pretty-printed JSON file.
#[derive(Debug, Clone)]
pub struct JsonFileSink {
    path: PathBuf,
}

impl JsonFileSink {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Previous snapshot, or an empty list when there is none.
    pub fn load(&self) -> Result<Vec<EnrichedRecord>> {
        Ok(load_records(&self.path)?.unwrap_or_default())
    }
}

impl CheckpointSink for JsonFileSink {
    fn write(&mut self, records: &[EnrichedRecord]) -> Result<()> {
        write_records_atomic(&self.path, records)?;
        debug!(path = %self.path.display(), records = records.len(), "snapshot written");
        Ok(())
    }
}

/// Read a record list, `None` if the file does not exist.
pub fn load_records(path: &Path) -> Result<Option<Vec<EnrichedRecord>>> {
    if !path.exists() {
        return Ok(None);
    }
    let json = std::fs::read_to_string(path).map_err(|e| DocQaError::io(path, e))?;
    serde_json::from_str(&json)
        .map(Some)
        .map_err(|e| DocQaError::parse(format!("{}: {e}", path.display())))
}

/// Write `records` to a temp file beside `path`, then rename it over `path`.
pub fn write_records_atomic(path: &Path, records: &[EnrichedRecord]) -> Result<()> {
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        std::fs::create_dir_all(parent).map_err(|e| DocQaError::io(parent, e))?;
    }

    let json = serde_json::to_string_pretty(records)
        .map_err(|e| DocQaError::parse(format!("failed to serialize records: {e}")))?;

    let mut tmp_name = path.file_name().unwrap_or_default().to_os_string();
    tmp_name.push(".tmp");
    let tmp = path.with_file_name(tmp_name);

    std::fs::write(&tmp, json).map_err(|e| DocQaError::io(&tmp, e))?;
    std::fs::rename(&tmp, path).map_err(|e| DocQaError::io(path, e))
}

/// What to keep from a previous snapshot.
#[derive(Debug, Default, Clone, PartialEq)]
pub struct ResumePlan {
    /// Records matching `blocks[..reused.len()]`. Degraded ones among them
    /// are enriched again by the caller.
    pub reused: Vec<EnrichedRecord>,
    /// Records with no extracted origin; kept at the tail of every snapshot.
    pub curated: Vec<EnrichedRecord>,
}

/// Match a snapshot against the current input.
///
/// The longest prefix of extracted records whose fingerprint equals the
/// input block at the same position is reused. Everything from the first
/// mismatch on is reprocessed.
pub fn plan_resume(blocks: &[ContentBlock], snapshot: Vec<EnrichedRecord>) -> ResumePlan {
    let (curated, extracted): (Vec<_>, Vec<_>) =
        snapshot.into_iter().partition(EnrichedRecord::is_curated);

    let matching = extracted
        .iter()
        .zip(blocks)
        .take_while(|(record, block)| {
            record.block_hash.as_deref() == Some(block.fingerprint().as_str())
        })
        .count();

    let mut reused = extracted;
    reused.truncate(matching);
    ResumePlan { reused, curated }
}
