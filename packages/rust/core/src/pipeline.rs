//! Offline stages: extract → enrich → index, run one after another.

use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};

use tracing::{info, instrument, warn};

use docqa_extractor::{extract_batch, read_blocks, write_blocks};
use docqa_models::{EmbeddingModel, GenerativeModel};
use docqa_shared::{AppConfig, DocQaError, EnrichedRecord, Result};
use docqa_storage::{CollectionInfo, Storage};

use crate::checkpoint::{JsonFileSink, load_records};
use crate::curated::{AppendReport, append_curated};
use crate::enrichment::{EnrichOptions, Enricher};
use crate::indexer::build_index;

/// Progress callback for reporting stage status.
pub trait ProgressReporter: Send + Sync {
    /// Called when entering a new phase.
    fn phase(&self, name: &str);
    /// Called before each item of a long-running phase.
    fn item_progress(&self, current: usize, total: usize, detail: &str);
    /// Called when a stage completes.
    fn done(&self, summary: &str);
}

/// No-op progress reporter for headless/test usage.
pub struct SilentProgress;

impl ProgressReporter for SilentProgress {
    fn phase(&self, _name: &str) {}
    fn item_progress(&self, _current: usize, _total: usize, _detail: &str) {}
    fn done(&self, _summary: &str) {}
}

// ---------------------------------------------------------------------------
// Stage results
// ---------------------------------------------------------------------------

#[derive(Debug)]
pub struct ExtractSummary {
    pub output: PathBuf,
    pub blocks: usize,
    pub processed: Vec<String>,
    pub skipped: Vec<(PathBuf, String)>,
    pub elapsed: Duration,
}

#[derive(Debug)]
pub struct EnrichSummary {
    pub output: PathBuf,
    pub records: usize,
    pub reused: usize,
    pub processed: usize,
    pub degraded: usize,
    pub elapsed: Duration,
}

#[derive(Debug)]
pub struct IndexSummary {
    pub database: PathBuf,
    pub collection: CollectionInfo,
    pub elapsed: Duration,
}

#[derive(Debug)]
pub struct BuildSummary {
    pub extract: ExtractSummary,
    pub enrich: EnrichSummary,
    pub index: IndexSummary,
}

/// Documents to extract: explicit arguments win over the configured list.
pub fn resolve_documents(config: &AppConfig, explicit: &[PathBuf]) -> Result<Vec<PathBuf>> {
    let documents: Vec<PathBuf> = if explicit.is_empty() {
        config.extraction.documents.iter().map(PathBuf::from).collect()
    } else {
        explicit.to_vec()
    };
    if documents.is_empty() {
        return Err(DocQaError::config(
            "no documents given; pass paths or set [extraction].documents",
        ));
    }
    Ok(documents)
}

// ---------------------------------------------------------------------------
// Stages
// ---------------------------------------------------------------------------

/// Extract `documents` and overwrite the extraction output.
#[instrument(skip_all, fields(documents = documents.len()))]
pub fn run_extract(
    config: &AppConfig,
    documents: &[PathBuf],
    progress: &dyn ProgressReporter,
) -> Result<ExtractSummary> {
    let start = Instant::now();
    progress.phase(&format!("Extracting {} document(s)", documents.len()));

    let batch = extract_batch(documents, &config.paths.images_dir())?;
    for (path, reason) in &batch.skipped {
        warn!(path = %path.display(), %reason, "document skipped");
    }

    let output = config.paths.extracted_file();
    write_blocks(&output, &batch.blocks)?;

    let summary = ExtractSummary {
        output,
        blocks: batch.blocks.len(),
        processed: batch.processed,
        skipped: batch.skipped,
        elapsed: start.elapsed(),
    };
    progress.done(&format!(
        "Extracted {} blocks from {} document(s) into {}",
        summary.blocks,
        summary.processed.len(),
        summary.output.display()
    ));
    info!(
        blocks = summary.blocks,
        skipped = summary.skipped.len(),
        elapsed_ms = summary.elapsed.as_millis(),
        "extraction complete"
    );
    Ok(summary)
}

/// Enrich the extraction output, resuming from the previous output.
///
/// With `restart` every extracted block is enriched again; curated records
/// from the previous output are kept.
#[instrument(skip_all, fields(model = model.model(), restart = restart))]
pub async fn run_enrich(
    config: &AppConfig,
    model: &dyn GenerativeModel,
    restart: bool,
    progress: &dyn ProgressReporter,
) -> Result<EnrichSummary> {
    let start = Instant::now();
    let blocks = read_blocks(&config.paths.extracted_file())?;

    let mut sink = JsonFileSink::new(config.paths.enriched_file());
    let mut previous = sink.load()?;
    if restart {
        previous.retain(EnrichedRecord::is_curated);
        info!(kept = previous.len(), "restart requested, keeping curated records only");
    }

    progress.phase(&format!("Enriching {} blocks", blocks.len()));
    let enricher = Enricher::new(model, EnrichOptions::from_config(&config.enrichment));
    let report = enricher.run(&blocks, previous, &mut sink, progress).await?;

    let summary = EnrichSummary {
        output: sink.path().to_path_buf(),
        records: report.records.len(),
        reused: report.reused,
        processed: report.processed,
        degraded: report.degraded,
        elapsed: start.elapsed(),
    };
    progress.done(&format!(
        "Enriched {} records ({} new, {} reused, {} degraded)",
        summary.records, summary.processed, summary.reused, summary.degraded
    ));
    Ok(summary)
}

/// Rebuild the vector collection from the enrichment output.
#[instrument(skip_all, fields(collection = %config.paths.collection))]
pub async fn run_index(
    config: &AppConfig,
    embedder: &dyn EmbeddingModel,
    progress: &dyn ProgressReporter,
) -> Result<IndexSummary> {
    let start = Instant::now();
    let enriched = config.paths.enriched_file();
    let records = load_records(&enriched)?.ok_or(DocQaError::SourceMissing {
        path: enriched.clone(),
    })?;

    progress.phase("Opening index");
    let database = config.paths.index_db();
    let storage = Storage::open(&database).await?;

    let collection = build_index(
        &records,
        embedder,
        &storage,
        &config.paths.collection,
        progress,
    )
    .await?;

    let summary = IndexSummary {
        database,
        collection,
        elapsed: start.elapsed(),
    };
    progress.done(&format!(
        "Indexed {} records into '{}'",
        summary.collection.record_count, summary.collection.name
    ));
    Ok(summary)
}

/// All three offline stages in order. A failed stage stops the build.
pub async fn run_build(
    config: &AppConfig,
    documents: &[PathBuf],
    model: &dyn GenerativeModel,
    embedder: &dyn EmbeddingModel,
    progress: &dyn ProgressReporter,
) -> Result<BuildSummary> {
    let extract = run_extract(config, documents, progress)?;
    let enrich = run_enrich(config, model, false, progress).await?;
    let index = run_index(config, embedder, progress).await?;
    Ok(BuildSummary {
        extract,
        enrich,
        index,
    })
}

/// Merge a curated entry file into the enrichment output.
pub fn run_append(config: &AppConfig, curated: &Path) -> Result<AppendReport> {
    append_curated(&config.paths.enriched_file(), curated)
}

#[cfg(test)]
mod tests {
    use std::io::Write;

    use async_trait::async_trait;
    use docqa_models::{EmbedTask, GenerationRequest};
    use docqa_shared::{BlockKind, SENTINEL_DESCRIPTION};
    use zip::write::SimpleFileOptions;

    use super::*;
    use crate::engine::{ChatSession, EngineCell, Reply};

    struct FixedModel;

    #[async_trait]
    impl GenerativeModel for FixedModel {
        async fn generate(&self, request: &GenerationRequest) -> Result<String> {
            if request.image.is_some() {
                Ok("A login screen with a blue Sign In button.".into())
            } else if request.system.is_some() {
                Ok("Press Sign In.".into())
            } else {
                Ok("1. How do I sign in?\n2. Where is the button?\n3. What is shown?".into())
            }
        }

        fn model(&self) -> &str {
            "fixed"
        }
    }

    struct FailingModel;

    #[async_trait]
    impl GenerativeModel for FailingModel {
        async fn generate(&self, _request: &GenerationRequest) -> Result<String> {
            Err(DocQaError::external("gemini", "HTTP 503"))
        }

        fn model(&self) -> &str {
            "failing"
        }
    }

    struct LengthEmbedder;

    #[async_trait]
    impl EmbeddingModel for LengthEmbedder {
        async fn embed(&self, text: &str, _task: EmbedTask) -> Result<Vec<f32>> {
            Ok(vec![1.0, text.len() as f32 / 1000.0])
        }

        fn model(&self) -> &str {
            "length"
        }
    }

    fn scratch_config(label: &str) -> AppConfig {
        let root = std::env::temp_dir()
            .join(format!("docqa-pipeline-{label}-{}", uuid::Uuid::now_v7()));
        let mut config = AppConfig::default();
        config.paths.output_dir = root.join("out").to_string_lossy().into_owned();
        config.paths.vector_store_dir = root.join("store").to_string_lossy().into_owned();
        config.enrichment.item_delay_ms = 0;
        config.enrichment.caption_retry_delay_ms = 0;
        config
    }

    fn root_of(config: &AppConfig) -> PathBuf {
        PathBuf::from(&config.paths.output_dir)
            .parent()
            .map(Path::to_path_buf)
            .unwrap_or_default()
    }

    fn curated_fixture() -> PathBuf {
        PathBuf::from(env!("CARGO_MANIFEST_DIR"))
            .join("../../../fixtures/json/curated.fixture.json")
    }

    fn write_docx(path: &Path) {
        std::fs::create_dir_all(path.parent().unwrap()).unwrap();
        let file = std::fs::File::create(path).unwrap();
        let mut zip = zip::ZipWriter::new(file);
        let options = SimpleFileOptions::default();

        let long = "Open the portal and press the Sign In button \
                    in the top right corner to start your shift.";
        zip.start_file("word/document.xml", options).unwrap();
        write!(
            zip,
            concat!(
                r#"<?xml version="1.0"?><w:document xmlns:w="w"><w:body>"#,
                "<w:p><w:r><w:t>{long} {long}</w:t></w:r></w:p></w:body></w:document>",
            ),
            long = long
        )
        .unwrap();
        zip.start_file("word/_rels/document.xml.rels", options).unwrap();
        zip.write_all(
            concat!(
                r#"<?xml version="1.0"?><Relationships><Relationship Id="rId1" "#,
                r#"Type="http://schemas.openxmlformats.org/officeDocument/2006/"#,
                r#"relationships/image" "#,
                r#"Target="media/image1.png"/></Relationships>"#,
            )
            .as_bytes(),
        )
        .unwrap();
        zip.start_file("word/media/image1.png", options).unwrap();
        zip.write_all(b"\x89PNG\r\n").unwrap();
        zip.finish().unwrap();
    }

    #[test]
    fn explicit_documents_override_config() {
        let mut config = AppConfig::default();
        config.extraction.documents = vec!["a.docx".into()];
        assert_eq!(
            resolve_documents(&config, &[]).unwrap(),
            vec![PathBuf::from("a.docx")]
        );
        assert_eq!(
            resolve_documents(&config, &[PathBuf::from("b.docx")]).unwrap(),
            vec![PathBuf::from("b.docx")]
        );

        config.extraction.documents.clear();
        assert!(resolve_documents(&config, &[]).is_err());
    }

    #[tokio::test]
    async fn enrich_without_extraction_output_is_source_missing() {
        let config = scratch_config("no-input");
        let err = run_enrich(&config, &FixedModel, false, &SilentProgress)
            .await
            .unwrap_err();
        assert!(err.is_source_missing());
    }

    #[tokio::test]
    async fn build_then_answer_end_to_end() {
        let config = scratch_config("e2e");
        let docx = root_of(&config).join("docs").join("Sign In.docx");
        write_docx(&docx);

        let summary = run_build(
            &config,
            &[docx.clone()],
            &FixedModel,
            &LengthEmbedder,
            &SilentProgress,
        )
        .await
        .unwrap();
        assert_eq!(summary.extract.blocks, 2);
        assert_eq!(summary.enrich.processed, 2);
        assert_eq!(summary.index.collection.record_count, 2);

        let records = load_records(&config.paths.enriched_file()).unwrap().unwrap();
        assert_eq!(records[1].block.kind(), BlockKind::Image);
        assert!(records[1].block.content().starts_with("[IMAGE DESCRIPTION] A login screen"));

        let again = run_enrich(&config, &FixedModel, false, &SilentProgress)
            .await
            .unwrap();
        assert_eq!(again.reused, 2);
        assert_eq!(again.processed, 0);

        let engine = EngineCell::new(
            config.clone(),
            std::sync::Arc::new(LengthEmbedder),
            std::sync::Arc::new(FixedModel),
        );
        let mut session = ChatSession::new();
        let Reply::Answered(answer) = session.submit(&engine, "How do I sign in?").await else {
            panic!("expected an answer");
        };
        assert_eq!(answer.text, "Press Sign In.");
        assert_eq!(answer.sources.len(), 2);

        std::fs::remove_dir_all(root_of(&config)).ok();
    }

    #[tokio::test]
    async fn restart_reenriches_extracted_records_and_keeps_curated() {
        let config = scratch_config("restart");
        let docx = root_of(&config).join("docs").join("Guide.docx");
        write_docx(&docx);
        run_extract(&config, &[docx], &SilentProgress).unwrap();

        run_enrich(&config, &FixedModel, false, &SilentProgress)
            .await
            .unwrap();
        let appended = run_append(&config, &curated_fixture()).unwrap();
        assert_eq!(appended.before, 2);
        assert_eq!(appended.added, 2);

        let restarted = run_enrich(&config, &FixedModel, true, &SilentProgress)
            .await
            .unwrap();
        assert_eq!(restarted.reused, 0);
        assert_eq!(restarted.processed, 2);
        assert_eq!(restarted.records, 4);

        let records = load_records(&config.paths.enriched_file()).unwrap().unwrap();
        assert!(!records[0].is_curated());
        assert!(!records[1].is_curated());
        assert!(records[2..].iter().all(EnrichedRecord::is_curated));
        assert_eq!(records[2].block.source(), "Time Tracking.docx");

        std::fs::remove_dir_all(root_of(&config)).ok();
    }

    #[tokio::test]
    async fn rerun_after_failed_enrichment_recovers_caption() {
        let config = scratch_config("recover");
        let docx = root_of(&config).join("docs").join("Guide.docx");
        write_docx(&docx);
        run_extract(&config, &[docx], &SilentProgress).unwrap();

        let failed = run_enrich(&config, &FailingModel, false, &SilentProgress)
            .await
            .unwrap();
        assert_eq!(failed.degraded, 2);
        let records = load_records(&config.paths.enriched_file()).unwrap().unwrap();
        assert!(records[1].block.content().contains(SENTINEL_DESCRIPTION));

        let rerun = run_enrich(&config, &FixedModel, false, &SilentProgress)
            .await
            .unwrap();
        assert_eq!(rerun.reused, 0);
        assert_eq!(rerun.processed, 2);
        assert_eq!(rerun.degraded, 0);

        let records = load_records(&config.paths.enriched_file()).unwrap().unwrap();
        assert!(
            records[1]
                .block
                .content()
                .starts_with("[IMAGE DESCRIPTION] A login screen")
        );

        let settled = run_enrich(&config, &FixedModel, false, &SilentProgress)
            .await
            .unwrap();
        assert_eq!(settled.reused, 2);
        assert_eq!(settled.processed, 0);

        std::fs::remove_dir_all(root_of(&config)).ok();
    }

    #[test]
    fn append_merges_into_enrichment_output() {
        let config = scratch_config("append");
        let report = run_append(&config, &curated_fixture()).unwrap();
        assert_eq!(report.before, 0);
        assert_eq!(report.added, 2);
        assert!(config.paths.enriched_file().exists());

        std::fs::remove_dir_all(root_of(&config)).ok();
    }
}
