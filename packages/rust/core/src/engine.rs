//! Query serving: retrieval, grounded answer generation, chat sessions.
//!
//! The expensive handles (index connection, model clients) live in a
//! [`ServingContext`]. An [`EngineCell`] builds it at most once per process
//! and shares it read-only; every [`ChatSession`] owns its own history.

use std::path::PathBuf;
use std::sync::Arc;

use tokio::sync::OnceCell;
use tracing::{debug, info, instrument, warn};

use docqa_models::{EmbedTask, EmbeddingModel, GenerationRequest, GenerativeModel};
use docqa_shared::{AppConfig, DocQaError, DocumentMetadata, RetrievalConfig, Result, Turn};
use docqa_storage::{CollectionInfo, SearchHit, Storage};

use crate::enrichment::truncate_chars;

/// Heading placed between the system instruction and retrieved context.
const CONTEXT_HEADER: &str = "Context information is below.";
const CONTEXT_RULE: &str = "---------------------";

/// One retrieved source, as shown next to an answer.
#[derive(Debug, Clone, PartialEq)]
pub struct SourceRef {
    /// Cosine similarity; higher is more relevant.
    pub score: f32,
    pub excerpt: String,
    /// Image asset, present only if the file still exists.
    pub image_path: Option<PathBuf>,
    pub metadata: DocumentMetadata,
}

/// A generated answer with its ranked sources.
#[derive(Debug, Clone, PartialEq)]
pub struct Answer {
    pub text: String,
    pub sources: Vec<SourceRef>,
}

/// Result of initializing the serving context.
pub enum Readiness {
    Ready(ServingContext),
    NotReady { reason: String },
}

/// Open index plus model handles.
pub struct ServingContext {
    storage: Storage,
    collection: CollectionInfo,
    retrieval: RetrievalConfig,
    embedder: Arc<dyn EmbeddingModel>,
    generator: Arc<dyn GenerativeModel>,
}

impl ServingContext {
    /// Open the index read-only. A missing database, collection, or an empty
    /// collection yields [`Readiness::NotReady`]; nothing is created.
    #[instrument(skip_all, fields(collection = %config.paths.collection))]
    pub async fn initialize(
        config: &AppConfig,
        embedder: Arc<dyn EmbeddingModel>,
        generator: Arc<dyn GenerativeModel>,
    ) -> Result<Readiness> {
        let db_path = config.paths.index_db();
        let Some(storage) = Storage::open_existing(&db_path).await? else {
            return Ok(Readiness::NotReady {
                reason: format!("no index database at {}", db_path.display()),
            });
        };

        let name = &config.paths.collection;
        let collection = match storage.collection_info(name).await? {
            Some(info) if info.record_count > 0 => info,
            Some(_) => {
                return Ok(Readiness::NotReady {
                    reason: format!("collection '{name}' is empty"),
                });
            }
            None => {
                return Ok(Readiness::NotReady {
                    reason: format!("collection '{name}' does not exist"),
                });
            }
        };

        if collection.embedding_model != embedder.model() {
            warn!(
                indexed_with = %collection.embedding_model,
                querying_with = embedder.model(),
                "embedding model differs from the one used to build the index"
            );
        }

        info!(
            records = collection.record_count,
            dimensions = collection.dimensions,
            "serving context ready"
        );
        Ok(Readiness::Ready(Self {
            storage,
            collection,
            retrieval: config.retrieval.clone(),
            embedder,
            generator,
        }))
    }

    pub fn collection(&self) -> &CollectionInfo {
        &self.collection
    }

    /// Nearest records for `query`, best first.
    pub async fn retrieve(&self, query: &str) -> Result<Vec<SearchHit>> {
        let vector = self.embedder.embed(query, EmbedTask::RetrievalQuery).await?;
        self.storage
            .search(&self.collection.name, &vector, self.retrieval.top_k)
            .await
    }

    /// Answer `query` grounded in retrieved context, continuing `history`.
    #[instrument(skip_all, fields(history = history.len()))]
    pub async fn answer(&self, query: &str, history: &[Turn]) -> Result<Answer> {
        let query = query.trim();
        if query.is_empty() {
            return Err(DocQaError::validation("query is empty"));
        }

        let hits = self.retrieve(query).await?;
        debug!(hits = hits.len(), "context retrieved");

        let mut turns = history.to_vec();
        turns.push(Turn::user(query));
        let request = GenerationRequest {
            system: Some(self.system_instruction(&hits)),
            turns,
            image: None,
        };

        let text = self.generator.generate(&request).await?;
        let sources = hits.into_iter().map(|hit| self.source_ref(hit)).collect();

        Ok(Answer { text, sources })
    }

    fn system_instruction(&self, hits: &[SearchHit]) -> String {
        let context = hits
            .iter()
            .map(|hit| hit.text.as_str())
            .collect::<Vec<_>>()
            .join("\n\n");
        format!(
            "{}\n\n{CONTEXT_HEADER}\n{CONTEXT_RULE}\n{context}\n{CONTEXT_RULE}",
            self.retrieval.system_prompt
        )
    }

    fn source_ref(&self, hit: SearchHit) -> SourceRef {
        let image_path = hit
            .metadata
            .image_path
            .clone()
            .filter(|path| path.is_file());
        SourceRef {
            score: hit.score,
            excerpt: truncate_chars(&hit.text, self.retrieval.excerpt_chars).to_string(),
            image_path,
            metadata: hit.metadata,
        }
    }
}

// ---------------------------------------------------------------------------
// EngineCell
// ---------------------------------------------------------------------------

/// Borrowed view of the engine state.
pub enum EngineState<'a> {
    Ready(&'a ServingContext),
    NotReady { reason: String },
}

enum InitFailure {
    NotReady(String),
    Failed(DocQaError),
}

/// Lazily initialized, process-wide serving context.
///
/// Only a ready context is cached; while the index is missing every call
/// checks again.
pub struct EngineCell {
    config: AppConfig,
    embedder: Arc<dyn EmbeddingModel>,
    generator: Arc<dyn GenerativeModel>,
    context: OnceCell<ServingContext>,
}

impl EngineCell {
    pub fn new(
        config: AppConfig,
        embedder: Arc<dyn EmbeddingModel>,
        generator: Arc<dyn GenerativeModel>,
    ) -> Self {
        Self {
            config,
            embedder,
            generator,
            context: OnceCell::new(),
        }
    }

    pub async fn get_or_init(&self) -> Result<EngineState<'_>> {
        let outcome = self
            .context
            .get_or_try_init(|| async {
                let readiness = ServingContext::initialize(
                    &self.config,
                    Arc::clone(&self.embedder),
                    Arc::clone(&self.generator),
                )
                .await
                .map_err(InitFailure::Failed)?;
                match readiness {
                    Readiness::Ready(context) => Ok(context),
                    Readiness::NotReady { reason } => Err(InitFailure::NotReady(reason)),
                }
            })
            .await;

        match outcome {
            Ok(context) => Ok(EngineState::Ready(context)),
            Err(InitFailure::NotReady(reason)) => Ok(EngineState::NotReady { reason }),
            Err(InitFailure::Failed(e)) => Err(e),
        }
    }
}

// ---------------------------------------------------------------------------
// ChatSession
// ---------------------------------------------------------------------------

/// Outcome of one submitted query.
#[derive(Debug, Clone, PartialEq)]
pub enum Reply {
    Answered(Answer),
    NotReady { reason: String },
    Failed { message: String },
}

/// One conversation. History grows only on successful answers.
#[derive(Debug, Default, Clone)]
pub struct ChatSession {
    history: Vec<Turn>,
}

impl ChatSession {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn history(&self) -> &[Turn] {
        &self.history
    }

    pub fn clear(&mut self) {
        self.history.clear();
    }

    pub async fn submit(&mut self, engine: &EngineCell, query: &str) -> Reply {
        let context = match engine.get_or_init().await {
            Ok(EngineState::Ready(context)) => context,
            Ok(EngineState::NotReady { reason }) => return Reply::NotReady { reason },
            Err(e) => {
                warn!(error = %e, "engine initialization failed");
                return Reply::Failed {
                    message: e.to_string(),
                };
            }
        };

        match context.answer(query, &self.history).await {
            Ok(answer) => {
                self.history.push(Turn::user(query.trim()));
                self.history.push(Turn::assistant(answer.text.clone()));
                Reply::Answered(answer)
            }
            Err(e) => {
                warn!(error = %e, "query failed, history kept");
                Reply::Failed {
                    message: e.to_string(),
                }
            }
        }
    }
}
