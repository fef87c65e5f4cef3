use crate::error::{ChatError, ChatResult};
use crate::memory::Message;
use anyhow::{Context, Result};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::env;
use std::time::Duration;

const EMBEDDING_MODEL: &str = "models/embedding-004";
const DEFAULT_TIMEOUT_SECS: u64 = 30;

// Sampling defaults for answer generation.
const TOP_P: f32 = 0.8;
const TOP_K: i32 = 40;
const MAX_OUTPUT_TOKENS: i32 = 1024;

/// Configuration for the Gemini API.
#[derive(Clone)]
pub struct GeminiConfig {
    pub api_key: String,
    pub embeddings_url: String,
    pub generate_url: String,
    pub timeout: Duration,
}

impl GeminiConfig {
    /// Create a new configuration from environment variables.
    pub fn from_env() -> Result<Self> {
        let api_key = env::var("GEMINI_API_KEY").context("GEMINI_API_KEY not set")?;
        let embeddings_url =
            env::var("GEMINI_EMBEDDINGS_URL").context("GEMINI_EMBEDDINGS_URL not set")?;
        let generate_url =
            env::var("GEMINI_GENERATE_URL").context("GEMINI_GENERATE_URL not set")?;
        let timeout_secs = env::var("GEMINI_TIMEOUT_SECS")
            .ok()
            .and_then(|v| v.parse().ok())
            .unwrap_or(DEFAULT_TIMEOUT_SECS);

        Ok(GeminiConfig {
            api_key,
            embeddings_url,
            generate_url,
            timeout: Duration::from_secs(timeout_secs),
        })
    }
}

/// Generation seam used by the chat engine and the router, so both can be
/// exercised in tests with a scripted model instead of a live API.
#[async_trait]
pub trait CompletionModel: Send + Sync {
    /// One hosted-model call: system instruction, prior turns, the current
    /// user text, and a sampling temperature. Returns the reply text.
    async fn complete(
        &self,
        system_instruction: &str,
        history: &[Message],
        user_text: &str,
        temperature: f32,
    ) -> ChatResult<String>;
}

/// Client for the Gemini API.
#[derive(Clone)]
pub struct GeminiClient {
    config: GeminiConfig,
    client: reqwest::Client,
}

impl GeminiClient {
    /// Create a new Gemini client. Every request carries the configured
    /// timeout; a hung call fails the turn instead of wedging the session.
    pub fn new(config: GeminiConfig) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(config.timeout)
            .build()
            .context("Failed to build HTTP client")?;
        Ok(GeminiClient { config, client })
    }

    /// Generate an embedding vector for a text.
    pub async fn embed(&self, text: &str) -> ChatResult<Embedding> {
        let request = EmbeddingRequest {
            model: EMBEDDING_MODEL,
            content: ContentParts {
                parts: vec![Part { text: text.into() }],
            },
        };

        let url = format!("{}?key={}", self.config.embeddings_url, self.config.api_key);
        let response = self
            .client
            .post(&url)
            .json(&request)
            .send()
            .await
            .map_err(|e| ChatError::Generation(format!("embedding request failed: {e}")))?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response
                .text()
                .await
                .unwrap_or_else(|_| "unknown error".to_string());
            return Err(ChatError::Generation(format!(
                "embedding request returned {status}: {body}"
            )));
        }

        let data: EmbeddingResponse = response
            .json()
            .await
            .map_err(|e| ChatError::Generation(format!("malformed embedding response: {e}")))?;

        Ok(Embedding {
            values: data.embedding.values,
        })
    }
}

#[async_trait]
impl CompletionModel for GeminiClient {
    async fn complete(
        &self,
        system_instruction: &str,
        history: &[Message],
        user_text: &str,
        temperature: f32,
    ) -> ChatResult<String> {
        let mut contents: Vec<Content> = history
            .iter()
            .map(|message| Content {
                role: message.role.as_wire(),
                parts: vec![Part {
                    text: message.content.clone(),
                }],
            })
            .collect();
        contents.push(Content {
            role: "user",
            parts: vec![Part {
                text: user_text.into(),
            }],
        });

        let request = GenerateRequest {
            system_instruction: ContentParts {
                parts: vec![Part {
                    text: system_instruction.into(),
                }],
            },
            contents,
            generation_config: GenerationConfig {
                temperature,
                top_p: TOP_P,
                top_k: TOP_K,
                max_output_tokens: MAX_OUTPUT_TOKENS,
            },
        };

        let url = format!("{}?key={}", self.config.generate_url, self.config.api_key);
        let response = self
            .client
            .post(&url)
            .json(&request)
            .send()
            .await
            .map_err(|e| ChatError::Generation(format!("generation request failed: {e}")))?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response
                .text()
                .await
                .unwrap_or_else(|_| "unknown error".to_string());
            return Err(ChatError::Generation(format!(
                "generation request returned {status}: {body}"
            )));
        }

        let data: GenerateResponse = response
            .json()
            .await
            .map_err(|e| ChatError::Generation(format!("malformed generation response: {e}")))?;

        data.candidates
            .into_iter()
            .next()
            .and_then(|c| c.content.parts.into_iter().next())
            .map(|p| p.text)
            .ok_or_else(|| ChatError::Generation("no candidates in response".into()))
    }
}

/// A vector embedding.
#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct Embedding {
    pub values: Vec<f32>,
}

// Wire structures for the Gemini REST API.

#[derive(Serialize)]
struct EmbeddingRequest {
    model: &'static str,
    content: ContentParts,
}

#[derive(Serialize)]
struct ContentParts {
    parts: Vec<Part>,
}

#[derive(Deserialize)]
struct EmbeddingResponse {
    embedding: EmbeddingData,
}

#[derive(Deserialize)]
struct EmbeddingData {
    values: Vec<f32>,
}

#[derive(Serialize)]
struct GenerateRequest {
    system_instruction: ContentParts,
    contents: Vec<Content>,
    generation_config: GenerationConfig,
}

#[derive(Serialize)]
struct Content {
    role: &'static str,
    parts: Vec<Part>,
}

#[derive(Serialize)]
struct Part {
    text: String,
}

#[derive(Serialize)]
struct GenerationConfig {
    temperature: f32,
    top_p: f32,
    top_k: i32,
    max_output_tokens: i32,
}

#[derive(Deserialize)]
struct GenerateResponse {
    candidates: Vec<Candidate>,
}

#[derive(Deserialize)]
struct Candidate {
    content: ResponseContent,
}

#[derive(Deserialize)]
struct ResponseContent {
    parts: Vec<ResponsePart>,
}

#[derive(Deserialize)]
struct ResponsePart {
    text: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn generate_request_serializes_expected_shape() {
        let request = GenerateRequest {
            system_instruction: ContentParts {
                parts: vec![Part {
                    text: "persona".into(),
                }],
            },
            contents: vec![Content {
                role: "user",
                parts: vec![Part {
                    text: "question".into(),
                }],
            }],
            generation_config: GenerationConfig {
                temperature: 1.0,
                top_p: TOP_P,
                top_k: TOP_K,
                max_output_tokens: MAX_OUTPUT_TOKENS,
            },
        };

        let json = serde_json::to_value(&request).unwrap();
        assert_eq!(json["system_instruction"]["parts"][0]["text"], "persona");
        assert_eq!(json["contents"][0]["role"], "user");
        assert_eq!(json["generation_config"]["top_k"], 40);
    }
}
