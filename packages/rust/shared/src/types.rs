//! Core domain types shared by every pipeline stage.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

/// Placeholder description stored when captioning exhausts its retries.
pub const SENTINEL_DESCRIPTION: &str = "Error generating description.";

/// Display content for an image block whose asset is gone.
pub const MISSING_IMAGE_CONTENT: &str = "[MISSING IMAGE]";

// ---------------------------------------------------------------------------
// BlockKind
// ---------------------------------------------------------------------------

/// Type tag of a content block.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BlockKind {
    Text,
    Table,
    Image,
}

impl BlockKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Text => "text",
            Self::Table => "table",
            Self::Image => "image",
        }
    }
}

impl std::fmt::Display for BlockKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

// ---------------------------------------------------------------------------
// ContentBlock
// ---------------------------------------------------------------------------

/// One paragraph, table, or image extracted from a document.
///
/// Serialized as `{ "type": "text" | "table" | "image", "source", "content", "image_path"? }`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum ContentBlock {
    Text {
        source: String,
        content: String,
    },
    Table {
        source: String,
        content: String,
    },
    Image {
        source: String,
        content: String,
        image_path: PathBuf,
    },
}

impl ContentBlock {
    pub fn text(source: impl Into<String>, content: impl Into<String>) -> Self {
        Self::Text {
            source: source.into(),
            content: content.into(),
        }
    }

    pub fn table(source: impl Into<String>, content: impl Into<String>) -> Self {
        Self::Table {
            source: source.into(),
            content: content.into(),
        }
    }

    pub fn image(
        source: impl Into<String>,
        content: impl Into<String>,
        image_path: impl Into<PathBuf>,
    ) -> Self {
        Self::Image {
            source: source.into(),
            content: content.into(),
            image_path: image_path.into(),
        }
    }

    pub fn kind(&self) -> BlockKind {
        match self {
            Self::Text { .. } => BlockKind::Text,
            Self::Table { .. } => BlockKind::Table,
            Self::Image { .. } => BlockKind::Image,
        }
    }

    /// Owning document identifier.
    pub fn source(&self) -> &str {
        match self {
            Self::Text { source, .. } | Self::Table { source, .. } | Self::Image { source, .. } => {
                source
            }
        }
    }

    pub fn content(&self) -> &str {
        match self {
            Self::Text { content, .. }
            | Self::Table { content, .. }
            | Self::Image { content, .. } => content,
        }
    }

    pub fn image_path(&self) -> Option<&Path> {
        match self {
            Self::Image { image_path, .. } => Some(image_path),
            _ => None,
        }
    }

    /// Same block with its display content replaced.
    pub fn with_content(&self, content: impl Into<String>) -> Self {
        let content = content.into();
        match self {
            Self::Text { source, .. } => Self::text(source.clone(), content),
            Self::Table { source, .. } => Self::table(source.clone(), content),
            Self::Image {
                source, image_path, ..
            } => Self::image(source.clone(), content, image_path.clone()),
        }
    }

    /// SHA-256 provenance fingerprint over type, source, content, and image path.
    pub fn fingerprint(&self) -> String {
        let mut hasher = Sha256::new();
        hasher.update(self.kind().as_str().as_bytes());
        hasher.update([0]);
        hasher.update(self.source().as_bytes());
        hasher.update([0]);
        hasher.update(self.content().as_bytes());
        if let Some(path) = self.image_path() {
            hasher.update([0]);
            hasher.update(path.to_string_lossy().as_bytes());
        }
        format!("{:x}", hasher.finalize())
    }
}

// ---------------------------------------------------------------------------
// Generation outcome
// ---------------------------------------------------------------------------

/// Why a generated field holds degraded content.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureKind {
    /// Every attempt allowed by the retry policy failed.
    RetriesExhausted,
    /// The image asset to caption was not on disk.
    MissingAsset,
    /// The model answered with no usable text.
    EmptyResponse,
}

/// Outcome of one model-generated field.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum Generation {
    Generated { text: String },
    Degraded { kind: FailureKind, detail: String },
}

impl Generation {
    pub fn generated(text: impl Into<String>) -> Self {
        Self::Generated { text: text.into() }
    }

    pub fn degraded(kind: FailureKind, detail: impl Into<String>) -> Self {
        Self::Degraded {
            kind,
            detail: detail.into(),
        }
    }

    /// Generated text, or `None` when degraded.
    pub fn text(&self) -> Option<&str> {
        match self {
            Self::Generated { text } => Some(text),
            Self::Degraded { .. } => None,
        }
    }

    pub fn is_degraded(&self) -> bool {
        matches!(self, Self::Degraded { .. })
    }
}

// ---------------------------------------------------------------------------
// EnrichedRecord
// ---------------------------------------------------------------------------

/// A content block plus generation metadata, as written by the enricher.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EnrichedRecord {
    /// The block; image blocks carry the composite description as content.
    #[serde(flatten)]
    pub block: ContentBlock,

    /// Section title for curated records.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub section: Option<String>,

    /// Caption outcome (image blocks only).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub image_description: Option<Generation>,

    /// Raw question-synthesis output (long text blocks only).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub generated_questions: Option<Generation>,

    /// Fingerprint of the extracted block this record came from.
    /// `None` for curated records, which have no extracted origin.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub block_hash: Option<String>,
}

impl EnrichedRecord {
    /// Pass-through record for a block that needs no enrichment.
    pub fn passthrough(block: &ContentBlock) -> Self {
        Self {
            block: block.clone(),
            section: None,
            image_description: None,
            generated_questions: None,
            block_hash: Some(block.fingerprint()),
        }
    }

    pub fn is_curated(&self) -> bool {
        self.block_hash.is_none()
    }
}

// ---------------------------------------------------------------------------
// IndexedDocument
// ---------------------------------------------------------------------------

/// Metadata stored alongside each embedded payload.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DocumentMetadata {
    pub source: String,
    #[serde(rename = "type")]
    pub kind: BlockKind,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub image_path: Option<PathBuf>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub section: Option<String>,
}

impl DocumentMetadata {
    /// Flat string map view, as handed to presentation code.
    pub fn to_map(&self) -> BTreeMap<String, String> {
        let mut map = BTreeMap::new();
        map.insert("source".to_string(), self.source.clone());
        map.insert("type".to_string(), self.kind.as_str().to_string());
        if let Some(path) = &self.image_path {
            map.insert("image_path".to_string(), path.to_string_lossy().into_owned());
        }
        if let Some(section) = &self.section {
            map.insert("section".to_string(), section.clone());
        }
        map
    }
}

/// The embedding-ready unit: payload text plus metadata.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IndexedDocument {
    /// Stable identifier within a collection.
    pub id: String,
    /// Enriched content plus the normalized question list.
    pub text: String,
    pub metadata: DocumentMetadata,
}

// ---------------------------------------------------------------------------
// Conversation turns
// ---------------------------------------------------------------------------

/// Speaker of a conversation turn.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    User,
    Assistant,
}

/// One message in a conversation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Turn {
    pub role: Role,
    pub text: String,
}

impl Turn {
    pub fn user(text: impl Into<String>) -> Self {
        Self {
            role: Role::User,
            text: text.into(),
        }
    }

    pub fn assistant(text: impl Into<String>) -> Self {
        Self {
            role: Role::Assistant,
            text: text.into(),
        }
    }
}
