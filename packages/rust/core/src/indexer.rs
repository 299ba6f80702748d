//! Turns enriched records into embedded, searchable documents.

use std::sync::LazyLock;

use regex::Regex;
use tracing::{info, instrument};

use docqa_models::{EmbedTask, EmbeddingModel};
use docqa_shared::{
    DocQaError, DocumentMetadata, EnrichedRecord, Generation, IndexedDocument, Result,
};
use docqa_storage::{CollectionInfo, Storage, StoredDocument};

use crate::pipeline::ProgressReporter;

/// Label placed between the content and the question list.
pub const QUESTIONS_HEADING: &str = "\n\nRelated Questions:\n";

static LIST_MARKER: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^(?:[-*•]|\d+[.)])\s*").expect("list marker regex is valid")
});

/// Strip list markers from raw model output, one question per line.
pub fn normalize_questions(raw: &str) -> String {
    raw.lines()
        .map(|line| LIST_MARKER.replace(line.trim(), "").trim().to_string())
        .filter(|line| !line.is_empty())
        .collect::<Vec<_>>()
        .join("\n")
}

/// Embedding payload for the record at `position`.
///
/// Only successfully generated questions are appended; degraded ones are
/// left out of the searchable text.
pub fn build_payload(position: usize, record: &EnrichedRecord) -> IndexedDocument {
    let mut text = record.block.content().to_string();

    let questions = record
        .generated_questions
        .as_ref()
        .and_then(Generation::text)
        .map(normalize_questions)
        .filter(|q| !q.is_empty());
    if let Some(questions) = questions {
        text.push_str(QUESTIONS_HEADING);
        text.push_str(&questions);
    }

    IndexedDocument {
        id: format!("rec-{position:06}"),
        text,
        metadata: DocumentMetadata {
            source: record.block.source().to_string(),
            kind: record.block.kind(),
            image_path: record.block.image_path().map(Into::into),
            section: record.section.clone(),
        },
    }
}

/// Embed every record and replace `collection` with the result.
///
/// Nothing is written unless every embedding succeeds.
#[instrument(skip_all, fields(records = records.len(), collection = %collection))]
pub async fn build_index(
    records: &[EnrichedRecord],
    embedder: &dyn EmbeddingModel,
    storage: &Storage,
    collection: &str,
    progress: &dyn ProgressReporter,
) -> Result<CollectionInfo> {
    if records.is_empty() {
        return Err(DocQaError::validation("no enriched records to index"));
    }

    let payloads: Vec<IndexedDocument> = records
        .iter()
        .enumerate()
        .map(|(i, record)| build_payload(i, record))
        .collect();

    progress.phase(&format!("Embedding {} records", payloads.len()));
    let texts: Vec<String> = payloads.iter().map(|p| p.text.clone()).collect();
    let embeddings = embedder.embed_batch(&texts, EmbedTask::RetrievalDocument).await?;

    if embeddings.len() != payloads.len() {
        return Err(DocQaError::external(
            "embedding",
            format!("expected {} vectors, got {}", payloads.len(), embeddings.len()),
        ));
    }

    let documents: Vec<StoredDocument> = payloads
        .into_iter()
        .zip(embeddings)
        .map(|(payload, embedding)| StoredDocument {
            id: payload.id,
            text: payload.text,
            metadata: payload.metadata,
            embedding,
        })
        .collect();

    progress.phase(&format!("Writing collection '{collection}'"));
    let info = storage
        .replace_collection(collection, embedder.model(), &documents)
        .await?;

    info!(
        collection,
        records = info.record_count,
        dimensions = info.dimensions,
        "index built"
    );
    Ok(info)
}
