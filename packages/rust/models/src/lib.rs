//! Model seams for docqa.
//!
//! Pipeline stages talk to the model service only through the
//! [`EmbeddingModel`] and [`GenerativeModel`] traits, so tests can swap in
//! deterministic fakes. [`GeminiClient`] is the production implementation.

pub mod gemini;

use std::path::Path;

use async_trait::async_trait;

use docqa_shared::{Result, Turn};

pub use gemini::{GeminiClient, ModelInfo};

/// What an embedding will be used for. Documents and queries are embedded
/// with different task hints.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EmbedTask {
    RetrievalDocument,
    RetrievalQuery,
}

impl EmbedTask {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::RetrievalDocument => "RETRIEVAL_DOCUMENT",
            Self::RetrievalQuery => "RETRIEVAL_QUERY",
        }
    }
}

/// Raw image bytes sent alongside a prompt.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InlineImage {
    pub mime_type: String,
    pub bytes: Vec<u8>,
}

impl InlineImage {
    /// Load an image from disk, guessing the MIME type from its extension.
    pub fn from_file(path: &Path) -> std::io::Result<Self> {
        let bytes = std::fs::read(path)?;
        Ok(Self {
            mime_type: mime_type_for(path).to_string(),
            bytes,
        })
    }
}

/// MIME type for an image file, by extension. Unknown extensions fall back
/// to PNG, which is what document images overwhelmingly are.
pub fn mime_type_for(path: &Path) -> &'static str {
    let ext = path
        .extension()
        .map(|e| e.to_string_lossy().to_ascii_lowercase())
        .unwrap_or_default();
    match ext.as_str() {
        "jpg" | "jpeg" => "image/jpeg",
        "gif" => "image/gif",
        "webp" => "image/webp",
        "bmp" => "image/bmp",
        "tif" | "tiff" => "image/tiff",
        _ => "image/png",
    }
}

/// One generation call: optional system instruction, the conversation so
/// far (last turn is the prompt), and an optional image attached to the
/// last turn.
#[derive(Debug, Clone, Default)]
pub struct GenerationRequest {
    pub system: Option<String>,
    pub turns: Vec<Turn>,
    pub image: Option<InlineImage>,
}

impl GenerationRequest {
    /// Single-turn prompt.
    pub fn prompt(text: impl Into<String>) -> Self {
        Self {
            turns: vec![Turn::user(text)],
            ..Default::default()
        }
    }

    pub fn with_system(mut self, system: impl Into<String>) -> Self {
        self.system = Some(system.into());
        self
    }

    pub fn with_image(mut self, image: InlineImage) -> Self {
        self.image = Some(image);
        self
    }
}

/// Text (and optionally image) to text generation.
#[async_trait]
pub trait GenerativeModel: Send + Sync {
    async fn generate(&self, request: &GenerationRequest) -> Result<String>;

    /// Model identifier, for logs and index metadata.
    fn model(&self) -> &str;
}

/// Text to vector embedding.
#[async_trait]
pub trait EmbeddingModel: Send + Sync {
    async fn embed(&self, text: &str, task: EmbedTask) -> Result<Vec<f32>>;

    /// Embed many texts, preserving order.
    async fn embed_batch(&self, texts: &[String], task: EmbedTask) -> Result<Vec<Vec<f32>>> {
        let mut vectors = Vec::with_capacity(texts.len());
        for text in texts {
            vectors.push(self.embed(text, task).await?);
        }
        Ok(vectors)
    }

    fn model(&self) -> &str;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn mime_types_by_extension() {
        assert_eq!(mime_type_for(Path::new("a/Doc_img_1.PNG")), "image/png");
        assert_eq!(mime_type_for(Path::new("Doc_img_2.jpeg")), "image/jpeg");
        assert_eq!(mime_type_for(Path::new("Doc_img_3.jpg")), "image/jpeg");
        assert_eq!(mime_type_for(Path::new("Doc_img_4.emf")), "image/png");
        assert_eq!(mime_type_for(Path::new("noext")), "image/png");
    }

    struct LengthEmbedder;

    #[async_trait]
    impl EmbeddingModel for LengthEmbedder {
        async fn embed(&self, text: &str, _task: EmbedTask) -> Result<Vec<f32>> {
            Ok(vec![text.len() as f32, 1.0])
        }

        fn model(&self) -> &str {
            "length"
        }
    }

    #[tokio::test]
    async fn default_batch_embedding_preserves_order() {
        let texts = vec!["a".to_string(), "abc".to_string(), "ab".to_string()];
        let vectors = LengthEmbedder
            .embed_batch(&texts, EmbedTask::RetrievalDocument)
            .await
            .unwrap();
        let lengths: Vec<f32> = vectors.iter().map(|v| v[0]).collect();
        assert_eq!(lengths, vec![1.0, 3.0, 2.0]);
    }

    #[test]
    fn prompt_builder() {
        let request = GenerationRequest::prompt("hi").with_system("be brief");
        assert_eq!(request.turns, vec![Turn::user("hi")]);
        assert_eq!(request.system.as_deref(), Some("be brief"));
        assert!(request.image.is_none());
    }
}
