//! Gemini client over the Generative Language REST API.

use std::time::Duration;

use async_trait::async_trait;
use base64::Engine as _;
use base64::engine::general_purpose::STANDARD as BASE64;
use reqwest::Client;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use tracing::{debug, instrument};

use docqa_shared::{DocQaError, GeminiConfig, Result, Role};

use crate::{EmbedTask, EmbeddingModel, GenerationRequest, GenerativeModel};

/// Service label used in error messages.
const SERVICE: &str = "gemini";

/// Maximum requests per `batchEmbedContents` call.
pub const EMBED_BATCH_LIMIT: usize = 100;

const API_VERSION: &str = "v1beta";
const API_KEY_HEADER: &str = "x-goog-api-key";

/// A model listed by the service.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ModelInfo {
    /// Resource name, e.g. `models/gemini-2.0-flash-001`.
    pub name: String,
    #[serde(default)]
    pub display_name: String,
    #[serde(default)]
    pub supported_generation_methods: Vec<String>,
}

impl ModelInfo {
    pub fn supports_generation(&self) -> bool {
        self.supported_generation_methods
            .iter()
            .any(|m| m == "generateContent")
    }
}

/// Gemini generation + embedding client.
#[derive(Debug, Clone)]
pub struct GeminiClient {
    http: Client,
    base_url: String,
    api_key: String,
    generative_model: String,
    embedding_model: String,
}

impl GeminiClient {
    pub fn new(config: &GeminiConfig, api_key: impl Into<String>) -> Result<Self> {
        let http = Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()
            .map_err(|e| DocQaError::Network(format!("failed to build HTTP client: {e}")))?;

        Ok(Self {
            http,
            base_url: config.base_url.trim_end_matches('/').to_string(),
            api_key: api_key.into(),
            generative_model: config.generative_model.clone(),
            embedding_model: config.embedding_model.clone(),
        })
    }

    fn model_url(&self, model: &str, method: &str) -> String {
        format!("{}/{API_VERSION}/models/{model}:{method}", self.base_url)
    }

    async fn post<B: Serialize, R: DeserializeOwned>(&self, url: &str, body: &B) -> Result<R> {
        let response = self
            .http
            .post(url)
            .header(API_KEY_HEADER, &self.api_key)
            .json(body)
            .send()
            .await
            .map_err(|e| DocQaError::Network(format!("request to {url} failed: {e}")))?;
        read_json(response).await
    }

    /// Every model that supports `generateContent`, following pagination.
    #[instrument(skip_all)]
    pub async fn list_models(&self) -> Result<Vec<ModelInfo>> {
        let url = format!("{}/{API_VERSION}/models", self.base_url);
        let mut models = Vec::new();
        let mut page_token: Option<String> = None;

        loop {
            let mut request = self.http.get(&url).header(API_KEY_HEADER, &self.api_key);
            if let Some(token) = &page_token {
                request = request.query(&[("pageToken", token)]);
            }
            let response = request
                .send()
                .await
                .map_err(|e| DocQaError::Network(format!("request to {url} failed: {e}")))?;
            let page: ListModelsResponse = read_json(response).await?;

            models.extend(page.models.into_iter().filter(ModelInfo::supports_generation));
            match page.next_page_token.filter(|t| !t.is_empty()) {
                Some(token) => page_token = Some(token),
                None => break,
            }
        }

        debug!(count = models.len(), "listed generative models");
        Ok(models)
    }
}

async fn read_json<R: DeserializeOwned>(response: reqwest::Response) -> Result<R> {
    let status = response.status();
    if !status.is_success() {
        let body = response.text().await.unwrap_or_default();
        let snippet: String = body.chars().take(300).collect();
        return Err(DocQaError::external(SERVICE, format!("HTTP {status}: {snippet}")));
    }
    response
        .json()
        .await
        .map_err(|e| DocQaError::external(SERVICE, format!("invalid response body: {e}")))
}

#[async_trait]
impl GenerativeModel for GeminiClient {
    #[instrument(skip_all, fields(model = %self.generative_model, turns = request.turns.len()))]
    async fn generate(&self, request: &GenerationRequest) -> Result<String> {
        let body = GenerateContentRequest::from_request(request);
        let url = self.model_url(&self.generative_model, "generateContent");
        let response: GenerateContentResponse = self.post(&url, &body).await?;

        let text = response.text();
        if text.trim().is_empty() {
            return Err(DocQaError::external(SERVICE, "response contained no text"));
        }
        Ok(text)
    }

    fn model(&self) -> &str {
        &self.generative_model
    }
}

#[async_trait]
impl EmbeddingModel for GeminiClient {
    async fn embed(&self, text: &str, task: EmbedTask) -> Result<Vec<f32>> {
        let body = EmbedContentRequest::new(&self.embedding_model, text, task);
        let url = self.model_url(&self.embedding_model, "embedContent");
        let response: EmbedContentResponse = self.post(&url, &body).await?;
        if response.embedding.values.is_empty() {
            return Err(DocQaError::external(SERVICE, "empty embedding returned"));
        }
        Ok(response.embedding.values)
    }

    #[instrument(skip_all, fields(model = %self.embedding_model, texts = texts.len()))]
    async fn embed_batch(&self, texts: &[String], task: EmbedTask) -> Result<Vec<Vec<f32>>> {
        let url = self.model_url(&self.embedding_model, "batchEmbedContents");
        let mut vectors = Vec::with_capacity(texts.len());

        for chunk in texts.chunks(EMBED_BATCH_LIMIT) {
            let body = BatchEmbedRequest {
                requests: chunk
                    .iter()
                    .map(|text| EmbedContentRequest::new(&self.embedding_model, text, task))
                    .collect(),
            };
            let response: BatchEmbedResponse = self.post(&url, &body).await?;
            if response.embeddings.len() != chunk.len() {
                return Err(DocQaError::external(
                    SERVICE,
                    format!(
                        "expected {} embeddings, got {}",
                        chunk.len(),
                        response.embeddings.len()
                    ),
                ));
            }
            vectors.extend(response.embeddings.into_iter().map(|e| e.values));
            debug!(done = vectors.len(), "embedded chunk");
        }

        Ok(vectors)
    }

    fn model(&self) -> &str {
        &self.embedding_model
    }
}

// ---------------------------------------------------------------------------
// Wire types
// ---------------------------------------------------------------------------

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct GenerateContentRequest {
    #[serde(skip_serializing_if = "Option::is_none")]
    system_instruction: Option<SystemInstruction>,
    contents: Vec<Content>,
}

impl GenerateContentRequest {
    fn from_request(request: &GenerationRequest) -> Self {
        let last = request.turns.len().saturating_sub(1);
        let contents = request
            .turns
            .iter()
            .enumerate()
            .map(|(i, turn)| {
                let mut parts = vec![Part::Text {
                    text: turn.text.clone(),
                }];
                if i == last {
                    if let Some(image) = &request.image {
                        parts.push(Part::InlineData {
                            inline_data: Blob {
                                mime_type: image.mime_type.clone(),
                                data: BASE64.encode(&image.bytes),
                            },
                        });
                    }
                }
                Content {
                    role: match turn.role {
                        Role::User => "user",
                        Role::Assistant => "model",
                    },
                    parts,
                }
            })
            .collect();

        Self {
            system_instruction: request.system.as_ref().map(|text| SystemInstruction {
                parts: vec![Part::Text { text: text.clone() }],
            }),
            contents,
        }
    }
}

#[derive(Debug, Serialize)]
struct SystemInstruction {
    parts: Vec<Part>,
}

#[derive(Debug, Serialize)]
struct Content {
    role: &'static str,
    parts: Vec<Part>,
}

#[derive(Debug, Serialize)]
#[serde(untagged)]
enum Part {
    Text {
        text: String,
    },
    InlineData {
        #[serde(rename = "inlineData")]
        inline_data: Blob,
    },
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct Blob {
    mime_type: String,
    data: String,
}

#[derive(Debug, Deserialize)]
struct GenerateContentResponse {
    #[serde(default)]
    candidates: Vec<Candidate>,
}

impl GenerateContentResponse {
    /// Concatenated text parts of the first candidate.
    fn text(&self) -> String {
        self.candidates
            .first()
            .and_then(|c| c.content.as_ref())
            .map(|content| {
                content
                    .parts
                    .iter()
                    .filter_map(|p| p.text.as_deref())
                    .collect::<String>()
            })
            .unwrap_or_default()
    }
}

#[derive(Debug, Deserialize)]
struct Candidate {
    content: Option<CandidateContent>,
}

#[derive(Debug, Deserialize)]
struct CandidateContent {
    #[serde(default)]
    parts: Vec<CandidatePart>,
}

#[derive(Debug, Deserialize)]
struct CandidatePart {
    text: Option<String>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct EmbedContentRequest {
    model: String,
    content: TextContent,
    task_type: &'static str,
}

impl EmbedContentRequest {
    fn new(model: &str, text: &str, task: EmbedTask) -> Self {
        Self {
            model: format!("models/{model}"),
            content: TextContent {
                parts: vec![Part::Text {
                    text: text.to_string(),
                }],
            },
            task_type: task.as_str(),
        }
    }
}

#[derive(Debug, Serialize)]
struct TextContent {
    parts: Vec<Part>,
}

#[derive(Debug, Serialize)]
struct BatchEmbedRequest {
    requests: Vec<EmbedContentRequest>,
}

#[derive(Debug, Deserialize)]
struct EmbedContentResponse {
    embedding: Embedding,
}

#[derive(Debug, Deserialize)]
struct BatchEmbedResponse {
    #[serde(default)]
    embeddings: Vec<Embedding>,
}

#[derive(Debug, Deserialize)]
struct Embedding {
    #[serde(default)]
    values: Vec<f32>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ListModelsResponse {
    #[serde(default)]
    models: Vec<ModelInfo>,
    next_page_token: Option<String>,
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
