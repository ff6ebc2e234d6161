use anyhow::{anyhow, Context, Result};
use serde::{Deserialize, Serialize};
use reqwest::blocking::Client;
use std::env;

use crate::config::EmbedderKind;

// --- Provider traits ---

pub trait AIProvider {
    fn complete(&self, prompt: &str, max_tokens: u32, temperature: f32) -> Result<String>;
    fn model_name(&self) -> &str;
}

/// Turns texts into vectors for similarity search.
pub trait Embedder {
    fn embed(&self, texts: &[String]) -> Result<Vec<Vec<f32>>>;
}

#[derive(Debug, Clone)]
pub enum ProviderKind {
    Anthropic,
    OpenAI,
}

#[derive(Debug, Clone)]
pub struct ModelSpec {
    pub provider: ProviderKind,
    pub model_id: String,
    pub short_name: String,
}

pub fn resolve_model(name: &str) -> Result<ModelSpec> {
    match name {
        // OpenAI (requires OPENAI_API_KEY)
        "gpt-4o-mini" | "mini" => Ok(ModelSpec {
            provider: ProviderKind::OpenAI,
            model_id: "gpt-4o-mini".to_string(),
            short_name: "gpt-4o-mini".to_string(),
        }),
        "gpt-4o" => Ok(ModelSpec {
            provider: ProviderKind::OpenAI,
            model_id: "gpt-4o".to_string(),
            short_name: "gpt-4o".to_string(),
        }),
        "gpt-4.1" => Ok(ModelSpec {
            provider: ProviderKind::OpenAI,
            model_id: "gpt-4.1".to_string(),
            short_name: "gpt-4.1".to_string(),
        }),
        // Anthropic API (requires ANTHROPIC_API_KEY)
        "api-sonnet" | "sonnet" => Ok(ModelSpec {
            provider: ProviderKind::Anthropic,
            model_id: "claude-sonnet-4-5-20250929".to_string(),
            short_name: "api-sonnet".to_string(),
        }),
        "api-haiku" | "haiku" => Ok(ModelSpec {
            provider: ProviderKind::Anthropic,
            model_id: "claude-haiku-4-5-20251001".to_string(),
            short_name: "api-haiku".to_string(),
        }),
        _ => Err(anyhow!(
            "Unknown model '{}'. Available: gpt-4o-mini (default), gpt-4o, gpt-4.1, api-sonnet, api-haiku",
            name
        )),
    }
}

pub fn create_provider(spec: &ModelSpec, client: Client) -> Result<Box<dyn AIProvider>> {
    match spec.provider {
        ProviderKind::Anthropic => {
            let provider = AnthropicProvider::new(spec.model_id.clone(), client)?;
            Ok(Box::new(provider))
        }
        ProviderKind::OpenAI => {
            let provider = OpenAIProvider::new(spec.model_id.clone(), client)?;
            Ok(Box::new(provider))
        }
    }
}

pub fn create_embedder(kind: EmbedderKind, client: Client) -> Result<Box<dyn Embedder>> {
    match kind {
        EmbedderKind::OpenAI => Ok(Box::new(OpenAIEmbedder::new(
            OPENAI_EMBEDDING_MODEL.to_string(),
            client,
        )?)),
        EmbedderKind::Local => Ok(Box::new(HashingEmbedder::default())),
    }
}

// --- Anthropic provider ---

const ANTHROPIC_API_URL: &str = "https://api.anthropic.com/v1/messages";

#[derive(Debug, Serialize)]
struct ChatMessage {
    role: String,
    content: String,
}

#[derive(Debug, Serialize)]
struct AnthropicRequest {
    model: String,
    max_tokens: u32,
    temperature: f32,
    messages: Vec<ChatMessage>,
}

#[derive(Debug, Deserialize)]
struct AnthropicContentBlock {
    text: String,
}

#[derive(Debug, Deserialize)]
struct AnthropicResponse {
    content: Vec<AnthropicContentBlock>,
}

#[derive(Debug)]
pub struct AnthropicProvider {
    api_key: String,
    model_id: String,
    client: Client,
}

impl AnthropicProvider {
    pub fn new(model_id: String, client: Client) -> Result<Self> {
        let api_key = env::var("ANTHROPIC_API_KEY")
            .context("ANTHROPIC_API_KEY environment variable not set. Set it with: export ANTHROPIC_API_KEY=your-key-here")?;
        Ok(Self { api_key, model_id, client })
    }
}

impl AIProvider for AnthropicProvider {
    fn complete(&self, prompt: &str, max_tokens: u32, temperature: f32) -> Result<String> {
        let request = AnthropicRequest {
            model: self.model_id.clone(),
            max_tokens,
            temperature,
            messages: vec![ChatMessage {
                role: "user".to_string(),
                content: prompt.to_string(),
            }],
        };

        let response = self
            .client
            .post(ANTHROPIC_API_URL)
            .header("x-api-key", &self.api_key)
            .header("anthropic-version", "2023-06-01")
            .header("content-type", "application/json")
            .json(&request)
            .send()
            .context("Failed to send request to Anthropic API")?;

        if !response.status().is_success() {
            let status = response.status();
            let error_text = response.text().unwrap_or_default();
            return Err(anyhow!(
                "Anthropic API request failed with status {}: {}",
                status,
                error_text
            ));
        }

        let api_response: AnthropicResponse = response
            .json()
            .context("Failed to parse Anthropic API response")?;

        api_response
            .content
            .first()
            .map(|block| block.text.clone())
            .ok_or_else(|| anyhow!("No content in Anthropic API response"))
    }

    fn model_name(&self) -> &str {
        &self.model_id
    }
}

// --- OpenAI provider ---

const OPENAI_API_URL: &str = "https://api.openai.com/v1/chat/completions";
const OPENAI_EMBEDDINGS_URL: &str = "https://api.openai.com/v1/embeddings";
pub const OPENAI_EMBEDDING_MODEL: &str = "text-embedding-3-small";

#[derive(Debug, Serialize)]
struct OpenAIRequest {
    model: String,
    max_tokens: u32,
    temperature: f32,
    messages: Vec<ChatMessage>,
}

#[derive(Debug, Deserialize)]
struct OpenAIResponseMessage {
    content: String,
}

#[derive(Debug, Deserialize)]
struct OpenAIChoice {
    message: OpenAIResponseMessage,
}

#[derive(Debug, Deserialize)]
struct OpenAIResponse {
    choices: Vec<OpenAIChoice>,
}

fn openai_api_key() -> Result<String> {
    env::var("OPENAI_API_KEY")
        .context("OPENAI_API_KEY environment variable not set. Set it with: export OPENAI_API_KEY=your-key-here")
}

#[derive(Debug)]
pub struct OpenAIProvider {
    api_key: String,
    model_id: String,
    api_url: String,
    client: Client,
}

impl OpenAIProvider {
    pub fn new(model_id: String, client: Client) -> Result<Self> {
        let api_key = openai_api_key()?;
        Ok(Self {
            api_key,
            model_id,
            api_url: OPENAI_API_URL.to_string(),
            client,
        })
    }
}

impl AIProvider for OpenAIProvider {
    fn complete(&self, prompt: &str, max_tokens: u32, temperature: f32) -> Result<String> {
        let request = OpenAIRequest {
            model: self.model_id.clone(),
            max_tokens,
            temperature,
            messages: vec![ChatMessage {
                role: "user".to_string(),
                content: prompt.to_string(),
            }],
        };

        let response = self
            .client
            .post(&self.api_url)
            .header("Authorization", format!("Bearer {}", self.api_key))
            .header("Content-Type", "application/json")
            .json(&request)
            .send()
            .context("Failed to send request to OpenAI API")?;

        if !response.status().is_success() {
            let status = response.status();
            let error_text = response.text().unwrap_or_default();
            return Err(anyhow!(
                "OpenAI API request failed with status {}: {}",
                status,
                error_text
            ));
        }

        let api_response: OpenAIResponse = response
            .json()
            .context("Failed to parse OpenAI API response")?;

        api_response
            .choices
            .first()
            .map(|choice| choice.message.content.clone())
            .ok_or_else(|| anyhow!("No choices in OpenAI API response"))
    }

    fn model_name(&self) -> &str {
        &self.model_id
    }
}

// --- OpenAI embeddings ---

#[derive(Debug, Serialize)]
struct EmbeddingRequest<'a> {
    model: &'a str,
    input: &'a [String],
}

#[derive(Debug, Deserialize)]
struct EmbeddingData {
    index: usize,
    embedding: Vec<f32>,
}

#[derive(Debug, Deserialize)]
struct EmbeddingResponse {
    data: Vec<EmbeddingData>,
}

#[derive(Debug)]
pub struct OpenAIEmbedder {
    api_key: String,
    model_id: String,
    client: Client,
}

impl OpenAIEmbedder {
    pub fn new(model_id: String, client: Client) -> Result<Self> {
        let api_key = openai_api_key()?;
        Ok(Self { api_key, model_id, client })
    }
}

impl Embedder for OpenAIEmbedder {
    fn embed(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        if texts.is_empty() {
            return Ok(vec![]);
        }

        let response = self
            .client
            .post(OPENAI_EMBEDDINGS_URL)
            .header("Authorization", format!("Bearer {}", self.api_key))
            .json(&EmbeddingRequest {
                model: &self.model_id,
                input: texts,
            })
            .send()
            .context("Failed to send request to OpenAI embeddings API")?;

        if !response.status().is_success() {
            let status = response.status();
            let error_text = response.text().unwrap_or_default();
            return Err(anyhow!(
                "OpenAI embeddings request failed with status {}: {}",
                status,
                error_text
            ));
        }

        let mut api_response: EmbeddingResponse = response
            .json()
            .context("Failed to parse OpenAI embeddings response")?;

        if api_response.data.len() != texts.len() {
            return Err(anyhow!(
                "Expected {} embeddings, got {}",
                texts.len(),
                api_response.data.len()
            ));
        }

        api_response.data.sort_by_key(|d| d.index);
        Ok(api_response.data.into_iter().map(|d| d.embedding).collect())
    }
}

// --- Unavailable backend ---

/// Stand-in when a provider can't be constructed (usually a missing API key).
/// Every call fails with the underlying reason, which scoring and letter
/// generation already treat as "no data".
#[derive(Debug)]
pub struct Unavailable {
    reason: String,
}

impl Unavailable {
    pub fn new(err: &anyhow::Error) -> Self {
        Self {
            reason: format!("{:#}", err),
        }
    }
}

impl AIProvider for Unavailable {
    fn complete(&self, _prompt: &str, _max_tokens: u32, _temperature: f32) -> Result<String> {
        Err(anyhow!("Model unavailable: {}", self.reason))
    }

    fn model_name(&self) -> &str {
        "unavailable"
    }
}

impl Embedder for Unavailable {
    fn embed(&self, _texts: &[String]) -> Result<Vec<Vec<f32>>> {
        Err(anyhow!("Embeddings unavailable: {}", self.reason))
    }
}

// --- Local hashing embedder (no network) ---

/// Bag-of-words feature hashing into a fixed number of buckets,
/// L2-normalized. Deterministic across runs.
#[derive(Debug, Clone)]
pub struct HashingEmbedder {
    dimensions: usize,
}

impl Default for HashingEmbedder {
    fn default() -> Self {
        Self { dimensions: 256 }
    }
}

impl HashingEmbedder {
    fn embed_one(&self, text: &str) -> Vec<f32> {
        let mut vector = vec![0.0f32; self.dimensions];
        for token in text
            .split(|c: char| !c.is_alphanumeric())
            .filter(|t| !t.is_empty())
        {
            let bucket = (fnv1a(&token.to_lowercase()) % self.dimensions as u64) as usize;
            vector[bucket] += 1.0;
        }

        let norm = vector.iter().map(|v| v * v).sum::<f32>().sqrt();
        if norm > 0.0 {
            for v in &mut vector {
                *v /= norm;
            }
        }
        vector
    }
}

impl Embedder for HashingEmbedder {
    fn embed(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        Ok(texts.iter().map(|t| self.embed_one(t)).collect())
    }
}

fn fnv1a(s: &str) -> u64 {
    let mut hash: u64 = 0xcbf29ce484222325;
    for byte in s.bytes() {
        hash ^= byte as u64;
        hash = hash.wrapping_mul(0x100000001b3);
    }
    hash
}
