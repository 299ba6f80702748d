//! Content enrichment: image captions and synthetic questions.
//!
//! Blocks are processed one at a time. Every model call goes through a
//! [`RetryPolicy`]; a call that still fails degrades the record instead of
//! aborting the run. The accumulated output is checkpointed every
//! `checkpoint_every` items and once more at the end.

use std::time::Duration;

use tracing::{debug, info, instrument, warn};

use docqa_models::{GenerationRequest, GenerativeModel, InlineImage};
use docqa_shared::{
    BlockKind, ContentBlock, EnrichedRecord, EnrichmentConfig, FailureKind, Generation,
    MISSING_IMAGE_CONTENT, Result, SENTINEL_DESCRIPTION,
};

use crate::checkpoint::{CheckpointSink, plan_resume};
use crate::pipeline::ProgressReporter;
use crate::retry::{RetryExhausted, RetryPolicy};

/// Instruction sent with every image.
pub const CAPTION_PROMPT: &str = "Describe this image in detail. \
If it is a chart, extract the data points. \
If it is text, transcribe it. \
If it is a diagram, explain the flow.";

/// Prompt asking for three questions the text answers.
pub fn question_prompt(text: &str) -> String {
    format!(
        "Read the following text and generate 3 potential questions a user might ask \
that can be answered by this text.\n\
Format the output as a simple list of questions.\n\n\
Text:\n{text}"
    )
}

/// Display content of a captioned image record.
pub fn captioned_content(description: &str, original: &str) -> String {
    format!("[IMAGE DESCRIPTION] {description}\n[ORIGINAL FILE] {original}")
}

/// First `max_chars` characters of `text`.
pub(crate) fn truncate_chars(text: &str, max_chars: usize) -> &str {
    match text.char_indices().nth(max_chars) {
        Some((idx, _)) => &text[..idx],
        None => text,
    }
}

// ---------------------------------------------------------------------------
// Options
// ---------------------------------------------------------------------------

/// Tuning for an enrichment run.
#[derive(Debug, Clone)]
pub struct EnrichOptions {
    pub caption_policy: RetryPolicy,
    pub question_policy: RetryPolicy,
    /// Text blocks need strictly more characters than this to get questions.
    pub question_min_chars: usize,
    pub question_max_input_chars: usize,
    pub checkpoint_every: usize,
    /// Pause after every processed item.
    pub item_delay: Duration,
}

impl EnrichOptions {
    pub fn from_config(config: &EnrichmentConfig) -> Self {
        Self {
            caption_policy: RetryPolicy::fixed(
                config.caption_attempts,
                config.caption_retry_delay(),
            ),
            question_policy: RetryPolicy::fixed(
                config.question_attempts,
                config.question_retry_delay(),
            ),
            question_min_chars: config.question_min_chars,
            question_max_input_chars: config.question_max_input_chars,
            checkpoint_every: config.checkpoint_every,
            item_delay: config.item_delay(),
        }
    }

    /// Defaults with every delay set to zero.
    pub fn without_delays() -> Self {
        let mut options = Self::from_config(&EnrichmentConfig::default());
        options.caption_policy =
            RetryPolicy::fixed(options.caption_policy.max_attempts, Duration::ZERO);
        options.question_policy =
            RetryPolicy::fixed(options.question_policy.max_attempts, Duration::ZERO);
        options.item_delay = Duration::ZERO;
        options
    }
}

impl Default for EnrichOptions {
    fn default() -> Self {
        Self::from_config(&EnrichmentConfig::default())
    }
}

/// Outcome of an enrichment run.
#[derive(Debug, Default)]
pub struct EnrichmentReport {
    /// Final output, curated records last.
    pub records: Vec<EnrichedRecord>,
    /// Records taken unchanged from the previous snapshot.
    pub reused: usize,
    /// Records processed in this run.
    pub processed: usize,
    /// Processed records with at least one degraded field.
    pub degraded: usize,
    /// Snapshot writes attempted, including the final one.
    pub checkpoints: usize,
}

// ---------------------------------------------------------------------------
// Enricher
// ---------------------------------------------------------------------------

/// Runs enrichment against a generative model.
pub struct Enricher<'a> {
    model: &'a dyn GenerativeModel,
    options: EnrichOptions,
}

impl<'a> Enricher<'a> {
    pub fn new(model: &'a dyn GenerativeModel, options: EnrichOptions) -> Self {
        Self { model, options }
    }

    /// Caption an image block. Returns the new display content and the
    /// caption outcome.
    pub async fn caption(&self, block: &ContentBlock) -> (String, Generation) {
        let Some(path) = block.image_path() else {
            return (
                MISSING_IMAGE_CONTENT.to_string(),
                Generation::degraded(FailureKind::MissingAsset, "block has no image path"),
            );
        };

        let image = match InlineImage::from_file(path) {
            Ok(image) => image,
            Err(e) => {
                warn!(path = %path.display(), error = %e, "image asset missing, skipping caption");
                return (
                    MISSING_IMAGE_CONTENT.to_string(),
                    Generation::degraded(
                        FailureKind::MissingAsset,
                        format!("{}: {e}", path.display()),
                    ),
                );
            }
        };

        let request = GenerationRequest::prompt(CAPTION_PROMPT).with_image(image);
        let label = format!("caption {}", path.display());
        let outcome = self
            .options
            .caption_policy
            .run(&label, |_| self.model.generate(&request))
            .await;

        let generation = to_generation(outcome);
        let description = generation.text().unwrap_or(SENTINEL_DESCRIPTION);
        (captioned_content(description, block.content()), generation)
    }

    /// Generate candidate questions for a text block.
    pub async fn questions(&self, text: &str) -> Generation {
        let prompt = question_prompt(truncate_chars(text, self.options.question_max_input_chars));
        let request = GenerationRequest::prompt(prompt);
        let outcome = self
            .options
            .question_policy
            .run("questions", |_| self.model.generate(&request))
            .await;
        to_generation(outcome)
    }

    /// Whether a block gets question synthesis.
    pub fn wants_questions(&self, block: &ContentBlock) -> bool {
        block.kind() == BlockKind::Text
            && block.content().chars().count() > self.options.question_min_chars
    }

    /// Enrich one block. Never fails; model problems degrade the record.
    pub async fn enrich_block(&self, block: &ContentBlock) -> EnrichedRecord {
        let mut record = EnrichedRecord::passthrough(block);

        match block.kind() {
            BlockKind::Image => {
                let (content, description) = self.caption(block).await;
                record.block = block.with_content(content);
                record.image_description = Some(description);
            }
            BlockKind::Text if self.wants_questions(block) => {
                record.generated_questions = Some(self.questions(block.content()).await);
            }
            BlockKind::Text | BlockKind::Table => {}
        }

        record
    }

    /// Enrich `blocks`, resuming from `previous` where its records still
    /// match the input.
    ///
    /// Reused records with a degraded field are enriched again in place, so
    /// a plain rerun repairs earlier model failures. Intermediate snapshot
    /// failures are logged and the run continues; a failed final write is
    /// returned as an error.
    #[instrument(skip_all, fields(blocks = blocks.len(), model = self.model.model()))]
    pub async fn run(
        &self,
        blocks: &[ContentBlock],
        previous: Vec<EnrichedRecord>,
        sink: &mut dyn CheckpointSink,
        progress: &dyn ProgressReporter,
    ) -> Result<EnrichmentReport> {
        let plan = plan_resume(blocks, previous);
        let curated = plan.curated;
        let retrying = plan.reused.iter().filter(|r| is_degraded(r)).count();
        if !plan.reused.is_empty() {
            info!(matched = plan.reused.len(), retrying, "resuming from snapshot");
        }

        let mut reusable = plan.reused.into_iter();
        let mut records = Vec::with_capacity(blocks.len());
        let mut report = EnrichmentReport::default();

        let total = blocks.len();
        let every = self.options.checkpoint_every;

        for (index, block) in blocks.iter().enumerate() {
            let position = index + 1;
            let retry = match reusable.next() {
                Some(previous) if !is_degraded(&previous) => {
                    records.push(previous);
                    report.reused += 1;
                    continue;
                }
                Some(_) => true,
                None => false,
            };

            let label = format!("{} {}", block.kind(), block.source());
            progress.item_progress(position, total, &label);

            let record = self.enrich_block(block).await;
            if is_degraded(&record) {
                report.degraded += 1;
            }
            debug!(position, kind = %block.kind(), retry, "item enriched");
            records.push(record);
            report.processed += 1;

            if every > 0 && position % every == 0 {
                report.checkpoints += 1;
                if let Err(e) = sink.write(&snapshot(&records, reusable.as_slice(), &curated)) {
                    warn!(position, error = %e, "checkpoint write failed, continuing");
                } else {
                    info!(position, "checkpoint saved");
                }
            }

            if !self.options.item_delay.is_zero() {
                tokio::time::sleep(self.options.item_delay).await;
            }
        }

        records.extend(curated);
        report.checkpoints += 1;
        sink.write(&records)?;

        info!(
            processed = report.processed,
            reused = report.reused,
            degraded = report.degraded,
            "enrichment complete"
        );

        report.records = records;
        Ok(report)
    }
}

/// Processed records, then reused records not yet reached, then curated ones.
fn snapshot(
    records: &[EnrichedRecord],
    pending: &[EnrichedRecord],
    curated: &[EnrichedRecord],
) -> Vec<EnrichedRecord> {
    records.iter().chain(pending).chain(curated).cloned().collect()
}

fn is_degraded(record: &EnrichedRecord) -> bool {
    [&record.image_description, &record.generated_questions]
        .into_iter()
        .flatten()
        .any(Generation::is_degraded)
}

fn to_generation(outcome: std::result::Result<String, RetryExhausted>) -> Generation {
    match outcome {
        Ok(text) if text.trim().is_empty() => {
            Generation::degraded(FailureKind::EmptyResponse, "model returned no text")
        }
        Ok(text) => Generation::generated(text),
        Err(e) => Generation::degraded(FailureKind::RetriesExhausted, e.to_string()),
    }
}

#[cfg(test)]
mod tests {
    use std::collections::VecDeque;
    use std::path::PathBuf;
    use std::sync::Mutex;
    use std::sync::atomic::{AtomicUsize, Ordering};

    use async_trait::async_trait;
    use docqa_shared::DocQaError;

    use super::*;
    use crate::checkpoint::JsonFileSink;
    use crate::pipeline::SilentProgress;

    /// Replies from a script, then repeats the fallback.
    struct ScriptedModel {
        script: Mutex<VecDeque<Result<String>>>,
        fallback: String,
        calls: AtomicUsize,
        prompts: Mutex<Vec<String>>,
    }

    impl ScriptedModel {
        fn answering(text: &str) -> Self {
            Self::scripted(Vec::new(), text)
        }

        fn scripted(script: Vec<Result<String>>, fallback: &str) -> Self {
            Self {
                script: Mutex::new(script.into()),
                fallback: fallback.into(),
                calls: AtomicUsize::new(0),
                prompts: Mutex::new(Vec::new()),
            }
        }

        fn calls(&self) -> usize {
            self.calls.load(Ordering::SeqCst)
        }
    }

    #[async_trait]
    impl GenerativeModel for ScriptedModel {
        async fn generate(&self, request: &GenerationRequest) -> Result<String> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            if let Some(turn) = request.turns.last() {
                self.prompts.lock().unwrap().push(turn.text.clone());
            }
            match self.script.lock().unwrap().pop_front() {
                Some(reply) => reply,
                None => Ok(self.fallback.clone()),
            }
        }

        fn model(&self) -> &str {
            "scripted"
        }
    }

    #[derive(Default)]
    struct RecordingSink {
        writes: Vec<usize>,
        fail_first: bool,
    }

    impl CheckpointSink for RecordingSink {
        fn write(&mut self, records: &[EnrichedRecord]) -> Result<()> {
            if self.fail_first && self.writes.is_empty() {
                self.fail_first = false;
                return Err(DocQaError::Storage("disk full".into()));
            }
            self.writes.push(records.len());
            Ok(())
        }
    }

    fn scratch_dir(label: &str) -> PathBuf {
        let dir =
            std::env::temp_dir().join(format!("docqa-enrich-{label}-{}", uuid::Uuid::now_v7()));
        std::fs::create_dir_all(&dir).unwrap();
        dir
    }

    fn image_block(dir: &std::path::Path, name: &str) -> ContentBlock {
        let path = dir.join(name);
        std::fs::write(&path, b"\x89PNG").unwrap();
        ContentBlock::image("Guide", format!("Image File: {name}"), path)
    }

    #[tokio::test]
    async fn question_threshold_is_strictly_greater_than_100() {
        let model = ScriptedModel::answering("1. What?\n2. Why?\n3. How?");
        let enricher = Enricher::new(&model, EnrichOptions::without_delays());

        let exact = enricher.enrich_block(&ContentBlock::text("Doc", "a".repeat(100))).await;
        assert!(exact.generated_questions.is_none());
        assert_eq!(model.calls(), 0);

        let longer = enricher.enrich_block(&ContentBlock::text("Doc", "a".repeat(101))).await;
        assert_eq!(
            longer.generated_questions.as_ref().and_then(Generation::text),
            Some("1. What?\n2. Why?\n3. How?")
        );
        assert_eq!(model.calls(), 1);
    }

    #[tokio::test]
    async fn threshold_counts_characters_not_bytes() {
        let model = ScriptedModel::answering("Q?");
        let enricher = Enricher::new(&model, EnrichOptions::without_delays());
        let record = enricher.enrich_block(&ContentBlock::text("Doc", "é".repeat(100))).await;
        assert!(record.generated_questions.is_none());
    }

    #[tokio::test]
    async fn tables_get_no_questions() {
        let model = ScriptedModel::answering("Q?");
        let enricher = Enricher::new(&model, EnrichOptions::without_delays());
        let table = enricher.enrich_block(&ContentBlock::table("Doc", "x | ".repeat(100))).await;
        assert!(table.generated_questions.is_none());
        assert_eq!(table.block.content(), "x | ".repeat(100));
        assert_eq!(model.calls(), 0);
    }

    #[tokio::test]
    async fn question_input_is_truncated() {
        let model = ScriptedModel::answering("Q?");
        let enricher = Enricher::new(&model, EnrichOptions::without_delays());
        let text = format!("{}{}", "a".repeat(4_000), "TAIL");
        enricher.enrich_block(&ContentBlock::text("Doc", text)).await;
        let prompts = model.prompts.lock().unwrap();
        assert!(prompts[0].ends_with(&"a".repeat(4_000)));
        assert!(!prompts[0].contains("TAIL"));
    }

    #[tokio::test]
    async fn caption_replaces_content_and_keeps_file_reference() {
        let dir = scratch_dir("caption");
        let block = image_block(&dir, "Guide_img_4.png");
        let model = ScriptedModel::answering("A settings screen.");
        let enricher = Enricher::new(&model, EnrichOptions::without_delays());

        let record = enricher.enrich_block(&block).await;
        assert_eq!(
            record.block.content(),
            "[IMAGE DESCRIPTION] A settings screen.\n[ORIGINAL FILE] Image File: Guide_img_4.png"
        );
        assert_eq!(record.block.image_path(), block.image_path());
        assert_eq!(record.block_hash, Some(block.fingerprint()));
        std::fs::remove_dir_all(&dir).ok();
    }

    #[tokio::test]
    async fn caption_exhaustion_yields_sentinel_and_run_continues() {
        let dir = scratch_dir("exhaust");
        let blocks = vec![
            image_block(&dir, "Guide_img_1.png"),
            image_block(&dir, "Guide_img_2.png"),
        ];
        let failures = (0..3)
            .map(|_| Err(DocQaError::external("gemini", "HTTP 503")))
            .collect();
        let model = ScriptedModel::scripted(failures, "Second image.");
        let enricher = Enricher::new(&model, EnrichOptions::without_delays());
        let mut sink = RecordingSink::default();

        let report = enricher
            .run(&blocks, Vec::new(), &mut sink, &SilentProgress)
            .await
            .unwrap();

        assert_eq!(model.calls(), 4);
        let first = &report.records[0];
        assert!(first.block.content().contains(SENTINEL_DESCRIPTION));
        assert!(matches!(
            first.image_description,
            Some(Generation::Degraded {
                kind: FailureKind::RetriesExhausted,
                ..
            })
        ));
        assert!(report.records[1].block.content().contains("Second image."));
        assert_eq!(report.degraded, 1);
        std::fs::remove_dir_all(&dir).ok();
    }

    #[tokio::test]
    async fn missing_image_degrades_without_calling_model() {
        let model = ScriptedModel::answering("unused");
        let enricher = Enricher::new(&model, EnrichOptions::without_delays());
        let block = ContentBlock::image("Guide", "Image File: gone.png", "/nonexistent/gone.png");

        let record = enricher.enrich_block(&block).await;
        assert_eq!(record.block.content(), MISSING_IMAGE_CONTENT);
        assert!(matches!(
            record.image_description,
            Some(Generation::Degraded {
                kind: FailureKind::MissingAsset,
                ..
            })
        ));
        assert_eq!(model.calls(), 0);
    }

    #[tokio::test]
    async fn failed_question_call_degrades() {
        let model = ScriptedModel::scripted(
            vec![Err(DocQaError::Network("reset".into()))],
            "unused",
        );
        let enricher = Enricher::new(&model, EnrichOptions::without_delays());
        let record = enricher.enrich_block(&ContentBlock::text("Doc", "b".repeat(150))).await;
        assert!(record.generated_questions.as_ref().is_some_and(Generation::is_degraded));
        assert_eq!(model.calls(), 1);
    }

    #[tokio::test]
    async fn checkpoint_cadence_for_120_items() {
        let model = ScriptedModel::answering("unused");
        let enricher = Enricher::new(&model, EnrichOptions::without_delays());
        let blocks: Vec<ContentBlock> = (0..120)
            .map(|i| ContentBlock::text("Doc", format!("short {i}")))
            .collect();
        let mut sink = RecordingSink::default();

        let report = enricher
            .run(&blocks, Vec::new(), &mut sink, &SilentProgress)
            .await
            .unwrap();

        assert_eq!(sink.writes, vec![50, 100, 120]);
        assert_eq!(report.checkpoints, 3);
        assert_eq!(report.records.len(), 120);
    }

    #[tokio::test]
    async fn snapshots_are_independently_loadable() {
        struct LoadingSink {
            inner: JsonFileSink,
            loaded: Vec<usize>,
        }
        impl CheckpointSink for LoadingSink {
            fn write(&mut self, records: &[EnrichedRecord]) -> Result<()> {
                self.inner.write(records)?;
                self.loaded.push(self.inner.load()?.len());
                Ok(())
            }
        }

        let dir = scratch_dir("loadable");
        let model = ScriptedModel::answering("unused");
        let enricher = Enricher::new(&model, EnrichOptions::without_delays());
        let blocks: Vec<ContentBlock> = (0..120)
            .map(|i| ContentBlock::text("Doc", format!("item {i}")))
            .collect();
        let mut sink = LoadingSink {
            inner: JsonFileSink::new(dir.join("enriched_content.json")),
            loaded: Vec::new(),
        };

        enricher
            .run(&blocks, Vec::new(), &mut sink, &SilentProgress)
            .await
            .unwrap();
        assert_eq!(sink.loaded, vec![50, 100, 120]);
        std::fs::remove_dir_all(&dir).ok();
    }

    #[tokio::test]
    async fn intermediate_checkpoint_failure_is_not_fatal() {
        let model = ScriptedModel::answering("unused");
        let enricher = Enricher::new(&model, EnrichOptions::without_delays());
        let blocks: Vec<ContentBlock> = (0..60)
            .map(|i| ContentBlock::text("Doc", format!("t{i}")))
            .collect();
        let mut sink = RecordingSink {
            fail_first: true,
            ..Default::default()
        };

        let report = enricher
            .run(&blocks, Vec::new(), &mut sink, &SilentProgress)
            .await
            .unwrap();
        assert_eq!(sink.writes, vec![60]);
        assert_eq!(report.records.len(), 60);
    }

    #[tokio::test]
    async fn rerun_resumes_without_duplicates_and_keeps_curated_tail() {
        let model = ScriptedModel::answering("Q1\nQ2\nQ3");
        let enricher = Enricher::new(&model, EnrichOptions::without_delays());
        let blocks: Vec<ContentBlock> = (0..5)
            .map(|i| ContentBlock::text("Doc", format!("{i} {}", "x".repeat(120))))
            .collect();

        let mut sink = RecordingSink::default();
        let first = enricher
            .run(&blocks[..3], Vec::new(), &mut sink, &SilentProgress)
            .await
            .unwrap();
        assert_eq!(model.calls(), 3);

        let mut previous = first.records;
        previous.push(EnrichedRecord {
            block: ContentBlock::text("Manual.docx", "curated"),
            section: Some("Kiosk".into()),
            image_description: None,
            generated_questions: None,
            block_hash: None,
        });

        let second = enricher
            .run(&blocks, previous, &mut sink, &SilentProgress)
            .await
            .unwrap();
        assert_eq!(second.reused, 3);
        assert_eq!(second.processed, 2);
        assert_eq!(model.calls(), 5);
        assert_eq!(second.records.len(), 6);
        assert!(second.records[5].is_curated());

        let third = enricher
            .run(&blocks, second.records, &mut sink, &SilentProgress)
            .await
            .unwrap();
        assert_eq!(third.processed, 0);
        assert_eq!(third.records.len(), 6);
        assert_eq!(model.calls(), 5);
    }

    #[tokio::test]
    async fn rerun_retries_degraded_records_in_place() {
        let dir = scratch_dir("retry-degraded");
        let blocks = vec![
            ContentBlock::text("Guide", "z".repeat(150)),
            image_block(&dir, "Guide_img_1.png"),
            image_block(&dir, "Guide_img_2.png"),
        ];
        let mut script = vec![Ok("1. Where?".to_string())];
        script.extend((0..3).map(|_| Err(DocQaError::external("gemini", "HTTP 503"))));
        let first_model = ScriptedModel::scripted(script, "Report screen.");
        let mut sink = RecordingSink::default();
        let first = Enricher::new(&first_model, EnrichOptions::without_delays())
            .run(&blocks, Vec::new(), &mut sink, &SilentProgress)
            .await
            .unwrap();
        assert_eq!(first.degraded, 1);
        assert!(first.records[1].block.content().contains(SENTINEL_DESCRIPTION));

        let healthy = ScriptedModel::answering("A login screen.");
        let second = Enricher::new(&healthy, EnrichOptions::without_delays())
            .run(&blocks, first.records, &mut sink, &SilentProgress)
            .await
            .unwrap();

        assert_eq!(second.reused, 2);
        assert_eq!(second.processed, 1);
        assert_eq!(second.degraded, 0);
        assert_eq!(healthy.calls(), 1);
        assert_eq!(second.records.len(), 3);
        let recovered = second.records[1].block.content();
        assert!(recovered.starts_with("[IMAGE DESCRIPTION] A login screen."));
        assert!(second.records[2].block.content().contains("Report screen."));
        std::fs::remove_dir_all(&dir).ok();
    }

    #[tokio::test(start_paused = true)]
    async fn throttle_applies_after_every_item() {
        let model = ScriptedModel::scripted(vec![Err(DocQaError::Network("x".into()))], "ok");
        let mut options = EnrichOptions::without_delays();
        options.item_delay = Duration::from_millis(500);
        options.question_policy = RetryPolicy::once();
        let enricher = Enricher::new(&model, options);
        let blocks = vec![
            ContentBlock::text("Doc", "y".repeat(200)),
            ContentBlock::text("Doc", "short"),
        ];

        let start = tokio::time::Instant::now();
        enricher
            .run(&blocks, Vec::new(), &mut RecordingSink::default(), &SilentProgress)
            .await
            .unwrap();
        assert_eq!(start.elapsed(), Duration::from_millis(1_000));
    }

    #[test]
    fn truncation_is_char_safe() {
        assert_eq!(truncate_chars("héllo", 2), "hé");
        assert_eq!(truncate_chars("hi", 10), "hi");
    }
}
