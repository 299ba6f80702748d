//! Hand-written knowledge entries merged into the enrichment output.

use std::path::Path;

use serde::Deserialize;
use tracing::{info, instrument};

use docqa_shared::{ContentBlock, DocQaError, EnrichedRecord, Generation, Result};

use crate::checkpoint::{load_records, write_records_atomic};

/// One curated entry as authored.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct CuratedEntry {
    pub file_name: String,
    pub section_title: String,
    pub content: String,
    #[serde(default)]
    pub image_descriptions: Vec<String>,
    #[serde(default)]
    pub generated_questions: Vec<String>,
}

impl CuratedEntry {
    /// Text record carrying the section title; image descriptions are folded
    /// into the content so they are searchable.
    pub fn to_record(&self) -> EnrichedRecord {
        let mut content = self.content.clone();
        if !self.image_descriptions.is_empty() {
            content.push_str("\n\nImage Descriptions:");
            for description in &self.image_descriptions {
                content.push_str("\n- ");
                content.push_str(description);
            }
        }

        EnrichedRecord {
            block: ContentBlock::text(self.file_name.clone(), content),
            section: Some(self.section_title.clone()),
            image_description: None,
            generated_questions: (!self.generated_questions.is_empty())
                .then(|| Generation::generated(self.generated_questions.join("\n"))),
            block_hash: None,
        }
    }
}

/// Result of an append.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AppendReport {
    pub before: usize,
    pub added: usize,
    pub skipped: usize,
}

/// Parse a JSON array of curated entries.
pub fn load_curated(path: &Path) -> Result<Vec<CuratedEntry>> {
    if !path.exists() {
        return Err(DocQaError::SourceMissing {
            path: path.to_path_buf(),
        });
    }
    let json = std::fs::read_to_string(path).map_err(|e| DocQaError::io(path, e))?;
    serde_json::from_str(&json).map_err(|e| DocQaError::parse(format!("{}: {e}", path.display())))
}

/// Append entries not already present, keyed on (source, section, content).
/// Returns how many were added.
pub fn merge_curated(records: &mut Vec<EnrichedRecord>, entries: &[CuratedEntry]) -> usize {
    let mut added = 0;
    for entry in entries {
        let record = entry.to_record();
        let duplicate = records.iter().any(|existing| {
            existing.block.source() == record.block.source()
                && existing.section == record.section
                && existing.block.content() == record.block.content()
        });
        if !duplicate {
            records.push(record);
            added += 1;
        }
    }
    added
}

/// Merge `curated_path` into the enrichment output at `enriched_path`.
/// A missing output file starts from an empty list.
#[instrument(skip_all, fields(curated = %curated_path.display()))]
pub fn append_curated(enriched_path: &Path, curated_path: &Path) -> Result<AppendReport> {
    let entries = load_curated(curated_path)?;
    let mut records = load_records(enriched_path)?.unwrap_or_default();
    let before = records.len();

    let added = merge_curated(&mut records, &entries);
    write_records_atomic(enriched_path, &records)?;

    info!(before, added, after = records.len(), "curated records appended");
    Ok(AppendReport {
        before,
        added,
        skipped: entries.len() - added,
    })
}

#[cfg(test)]
mod tests {
    use std::path::PathBuf;

    use super::*;

    fn fixture() -> PathBuf {
        PathBuf::from(env!("CARGO_MANIFEST_DIR"))
            .join("../../../fixtures/json/curated.fixture.json")
    }

    #[test]
    fn fixture_parses() {
        let entries = load_curated(&fixture()).expect("load fixture");
        assert_eq!(entries.len(), 2);
        assert_eq!(entries[0].file_name, "Time Tracking.docx");
        assert_eq!(entries[0].generated_questions.len(), 3);
        assert!(entries[1].image_descriptions.is_empty());
    }

    #[test]
    fn record_folds_descriptions_and_questions() {
        let entry = CuratedEntry {
            file_name: "Time Tracking.docx".into(),
            section_title: "Offline Mode".into(),
            content: "Enable offline punches.".into(),
            image_descriptions: vec!["A toggle labeled Offline.".into()],
            generated_questions: vec!["How do I enable offline mode?".into(), "Is it safe?".into()],
        };
        let record = entry.to_record();
        assert!(record.is_curated());
        assert_eq!(record.section.as_deref(), Some("Offline Mode"));
        assert_eq!(
            record.block.content(),
            "Enable offline punches.\n\nImage Descriptions:\n- A toggle labeled Offline."
        );
        assert_eq!(
            record.generated_questions.as_ref().and_then(Generation::text),
            Some("How do I enable offline mode?\nIs it safe?")
        );
    }

    #[test]
    fn append_is_idempotent() {
        let dir = std::env::temp_dir().join(format!("docqa-curated-{}", uuid::Uuid::now_v7()));
        let enriched = dir.join("enriched_content.json");
        write_records_atomic(
            &enriched,
            &[EnrichedRecord::passthrough(&ContentBlock::text("Guide", "existing"))],
        )
        .unwrap();

        let first = append_curated(&enriched, &fixture()).unwrap();
        assert_eq!(first, AppendReport { before: 1, added: 2, skipped: 0 });

        let second = append_curated(&enriched, &fixture()).unwrap();
        assert_eq!(second, AppendReport { before: 3, added: 0, skipped: 2 });

        let records = load_records(&enriched).unwrap().unwrap();
        assert_eq!(records.len(), 3);
        std::fs::remove_dir_all(&dir).ok();
    }

    #[test]
    fn missing_curated_file_is_source_missing() {
        let err = load_curated(Path::new("/nonexistent/curated.json")).unwrap_err();
        assert!(err.is_source_missing());
    }
}
