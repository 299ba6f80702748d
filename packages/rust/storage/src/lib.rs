//! libSQL-backed vector store (local file, offline mode).
//!
//! The [`Storage`] struct wraps a libSQL database holding named collections
//! of embedded documents. Search is exact: every stored vector in the
//! collection is scored by cosine similarity.
//!
//! **Access rules:**
//! - Index builder: read-write via [`Storage::open`]
//! - Query engine: read-only via [`Storage::open_existing`]

mod migrations;

use std::cmp::Ordering;
use std::path::Path;

use chrono::Utc;
use docqa_shared::{DocQaError, DocumentMetadata, Result};
use libsql::{Connection, Database, Value, params};

/// A document ready to be written: payload, metadata, and its embedding.
#[derive(Debug, Clone, PartialEq)]
pub struct StoredDocument {
    pub id: String,
    pub text: String,
    pub metadata: DocumentMetadata,
    pub embedding: Vec<f32>,
}

/// Summary row of a collection.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CollectionInfo {
    pub name: String,
    pub embedding_model: String,
    pub dimensions: usize,
    pub record_count: usize,
    pub built_at: String,
}

/// One search result.
#[derive(Debug, Clone, PartialEq)]
pub struct SearchHit {
    pub id: String,
    pub text: String,
    pub metadata: DocumentMetadata,
    /// Cosine similarity in [-1, 1]; higher is more relevant.
    pub score: f32,
    /// Insertion position within the collection.
    pub position: usize,
}

/// Primary storage handle wrapping a libSQL database.
pub struct Storage {
    #[allow(dead_code)]
    db: Database,
    conn: Connection,
    readonly: bool,
}

impl Storage {
    /// Open or create a database at `path` in read-write mode.
    pub async fn open(path: &Path) -> Result<Self> {
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent).map_err(|e| DocQaError::io(parent, e))?;
        }

        let db = libsql::Builder::new_local(path)
            .build()
            .await
            .map_err(|e| DocQaError::Storage(e.to_string()))?;

        let conn = db.connect().map_err(|e| DocQaError::Storage(e.to_string()))?;

        let storage = Self {
            db,
            conn,
            readonly: false,
        };
        storage.run_migrations().await?;
        Ok(storage)
    }

    /// Open a database at `path` as a read-only handle.
    ///
    /// The libsql connection itself is an ordinary local one; writes are
    /// refused by `check_writable` before they reach it.
    pub async fn open_readonly(path: &Path) -> Result<Self> {
        let db = libsql::Builder::new_local(path)
            .build()
            .await
            .map_err(|e| DocQaError::Storage(e.to_string()))?;

        let conn = db.connect().map_err(|e| DocQaError::Storage(e.to_string()))?;

        Ok(Self {
            db,
            conn,
            readonly: true,
        })
    }

    /// Open an existing database read-only. Returns `None` when the file is
    /// absent; never creates one.
    pub async fn open_existing(path: &Path) -> Result<Option<Self>> {
        if !path.is_file() {
            return Ok(None);
        }
        Self::open_readonly(path).await.map(Some)
    }

    /// Run pending schema migrations.
    async fn run_migrations(&self) -> Result<()> {
        let current_version = self.get_schema_version().await;

        for migration in migrations::all_migrations() {
            if migration.version > current_version {
                tracing::info!(
                    version = migration.version,
                    description = migration.description,
                    "applying migration"
                );
                self.conn.execute_batch(migration.sql).await.map_err(|e| {
                    DocQaError::Storage(format!("migration v{} failed: {e}", migration.version))
                })?;
            }
        }
        Ok(())
    }

    /// Get the current schema version, or 0 if no migrations have been applied.
    async fn get_schema_version(&self) -> u32 {
        let result = self
            .conn
            .query("SELECT MAX(version) FROM schema_migrations", params![])
            .await;

        match result {
            Ok(mut rows) => {
                if let Ok(Some(row)) = rows.next().await {
                    row.get::<u32>(0).unwrap_or(0)
                } else {
                    0
                }
            }
            Err(_) => 0, // Table doesn't exist yet
        }
    }

    /// Ensure we're in read-write mode before writing.
    fn check_writable(&self) -> Result<()> {
        if self.readonly {
            return Err(DocQaError::Storage(
                "database is opened in read-only mode".into(),
            ));
        }
        Ok(())
    }

    // -----------------------------------------------------------------------
    // Collection operations
    // -----------------------------------------------------------------------

    /// Replace the whole contents of a collection in one transaction.
    ///
    /// Rejects empty input and inconsistent embedding dimensions before
    /// touching the database. On any failure the previous contents remain.
    pub async fn replace_collection(
        &self,
        name: &str,
        embedding_model: &str,
        documents: &[StoredDocument],
    ) -> Result<CollectionInfo> {
        self.check_writable()?;

        let dimensions = match documents.first() {
            Some(doc) => doc.embedding.len(),
            None => {
                return Err(DocQaError::validation(format!(
                    "refusing to build collection '{name}' from zero documents"
                )));
            }
        };
        if dimensions == 0 {
            return Err(DocQaError::validation("embeddings must not be empty"));
        }
        if let Some(bad) = documents.iter().find(|d| d.embedding.len() != dimensions) {
            return Err(DocQaError::validation(format!(
                "document {} has {} dimensions, expected {dimensions}",
                bad.id,
                bad.embedding.len()
            )));
        }

        let built_at = Utc::now().to_rfc3339();
        let tx = self
            .conn
            .transaction()
            .await
            .map_err(|e| DocQaError::Storage(e.to_string()))?;

        tx.execute("DELETE FROM documents WHERE collection = ?1", params![name])
            .await
            .map_err(|e| DocQaError::Storage(e.to_string()))?;

        for (position, doc) in documents.iter().enumerate() {
            let metadata_json = serde_json::to_string(&doc.metadata)
                .map_err(|e| DocQaError::Storage(format!("metadata for {}: {e}", doc.id)))?;
            tx.execute(
                "INSERT INTO documents (collection, id, position, text, metadata_json, embedding)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
                params![
                    name,
                    doc.id.as_str(),
                    position as i64,
                    doc.text.as_str(),
                    metadata_json.as_str(),
                    Value::Blob(serialize_embedding(&doc.embedding))
                ],
            )
            .await
            .map_err(|e| DocQaError::Storage(format!("insert {}: {e}", doc.id)))?;
        }

        tx.execute(
            "INSERT INTO collections (name, embedding_model, dimensions, record_count, built_at)
             VALUES (?1, ?2, ?3, ?4, ?5)
             ON CONFLICT(name) DO UPDATE SET
                embedding_model = excluded.embedding_model,
                dimensions = excluded.dimensions,
                record_count = excluded.record_count,
                built_at = excluded.built_at",
            params![
                name,
                embedding_model,
                dimensions as i64,
                documents.len() as i64,
                built_at.as_str()
            ],
        )
        .await
        .map_err(|e| DocQaError::Storage(e.to_string()))?;

        tx.commit()
            .await
            .map_err(|e| DocQaError::Storage(format!("commit failed: {e}")))?;

        tracing::info!(
            collection = name,
            records = documents.len(),
            dimensions,
            "collection replaced"
        );

        Ok(CollectionInfo {
            name: name.to_string(),
            embedding_model: embedding_model.to_string(),
            dimensions,
            record_count: documents.len(),
            built_at,
        })
    }

    /// Collection summary, or `None` if the collection (or the schema) does
    /// not exist.
    pub async fn collection_info(&self, name: &str) -> Result<Option<CollectionInfo>> {
        if self.get_schema_version().await == 0 {
            return Ok(None);
        }

        let mut rows = self
            .conn
            .query(
                "SELECT name, embedding_model, dimensions, record_count, built_at
                 FROM collections WHERE name = ?1",
                params![name],
            )
            .await
            .map_err(|e| DocQaError::Storage(e.to_string()))?;

        match rows.next().await {
            Ok(Some(row)) => Ok(Some(CollectionInfo {
                name: row
                    .get::<String>(0)
                    .map_err(|e| DocQaError::Storage(e.to_string()))?,
                embedding_model: row
                    .get::<String>(1)
                    .map_err(|e| DocQaError::Storage(e.to_string()))?,
                dimensions: row
                    .get::<i64>(2)
                    .map_err(|e| DocQaError::Storage(e.to_string()))? as usize,
                record_count: row
                    .get::<i64>(3)
                    .map_err(|e| DocQaError::Storage(e.to_string()))? as usize,
                built_at: row
                    .get::<String>(4)
                    .map_err(|e| DocQaError::Storage(e.to_string()))?,
            })),
            Ok(None) => Ok(None),
            Err(e) => Err(DocQaError::Storage(e.to_string())),
        }
    }

    /// Number of stored documents in a collection.
    pub async fn count(&self, name: &str) -> Result<usize> {
        let mut rows = self
            .conn
            .query(
                "SELECT COUNT(*) FROM documents WHERE collection = ?1",
                params![name],
            )
            .await
            .map_err(|e| DocQaError::Storage(e.to_string()))?;

        match rows.next().await {
            Ok(Some(row)) => Ok(row
                .get::<i64>(0)
                .map_err(|e| DocQaError::Storage(e.to_string()))? as usize),
            Ok(None) => Ok(0),
            Err(e) => Err(DocQaError::Storage(e.to_string())),
        }
    }

    /// The `k` most similar documents to `query`, by cosine similarity.
    ///
    /// Ordered by score descending, then insertion position ascending, so
    /// identical inputs always give identical results.
    pub async fn search(&self, name: &str, query: &[f32], k: usize) -> Result<Vec<SearchHit>> {
        if k == 0 {
            return Ok(Vec::new());
        }

        let mut rows = self
            .conn
            .query(
                "SELECT id, position, text, metadata_json, embedding
                 FROM documents WHERE collection = ?1 ORDER BY position",
                params![name],
            )
            .await
            .map_err(|e| DocQaError::Storage(e.to_string()))?;

        let mut hits = Vec::new();
        while let Some(row) = rows
            .next()
            .await
            .map_err(|e| DocQaError::Storage(e.to_string()))?
        {
            let id = row
                .get::<String>(0)
                .map_err(|e| DocQaError::Storage(e.to_string()))?;
            let position = row
                .get::<i64>(1)
                .map_err(|e| DocQaError::Storage(e.to_string()))? as usize;
            let text = row
                .get::<String>(2)
                .map_err(|e| DocQaError::Storage(e.to_string()))?;
            let metadata_json = row
                .get::<String>(3)
                .map_err(|e| DocQaError::Storage(e.to_string()))?;
            let blob = row
                .get::<Vec<u8>>(4)
                .map_err(|e| DocQaError::Storage(e.to_string()))?;

            let embedding = deserialize_embedding(&blob);
            if embedding.len() != query.len() {
                return Err(DocQaError::validation(format!(
                    "query has {} dimensions but collection '{name}' stores {}",
                    query.len(),
                    embedding.len()
                )));
            }
            let metadata: DocumentMetadata = serde_json::from_str(&metadata_json)
                .map_err(|e| DocQaError::Storage(format!("metadata for {id}: {e}")))?;

            hits.push(SearchHit {
                score: cosine_similarity(query, &embedding),
                id,
                text,
                metadata,
                position,
            });
        }

        rank_hits(&mut hits);
        hits.truncate(k);
        Ok(hits)
    }
}

/// Sort by score descending, ties by position ascending.
fn rank_hits(hits: &mut [SearchHit]) {
    hits.sort_by(|a, b| {
        b.score
            .partial_cmp(&a.score)
            .unwrap_or(Ordering::Equal)
            .then(a.position.cmp(&b.position))
    });
}

fn serialize_embedding(embedding: &[f32]) -> Vec<u8> {
    embedding.iter().flat_map(|f| f.to_le_bytes()).collect()
}

fn deserialize_embedding(bytes: &[u8]) -> Vec<f32> {
    bytes
        .chunks_exact(4)
        .map(|chunk| f32::from_le_bytes([chunk[0], chunk[1], chunk[2], chunk[3]]))
        .collect()
}

/// Cosine similarity; 0.0 for mismatched or zero-length vectors.
pub fn cosine_similarity(a: &[f32], b: &[f32]) -> f32 {
    if a.len() != b.len() || a.is_empty() {
        return 0.0;
    }

    let dot: f32 = a.iter().zip(b.iter()).map(|(x, y)| x * y).sum();
    let norm_a: f32 = a.iter().map(|x| x * x).sum::<f32>().sqrt();
    let norm_b: f32 = b.iter().map(|x| x * x).sum::<f32>().sqrt();
    let denom = norm_a * norm_b;

    if denom <= f32::EPSILON {
        0.0
    } else {
        dot / denom
    }
}
