use crate::chunking::TextChunk;
use crate::gemini::Embedding;
use crate::retriever::Snippet;
use anyhow::{Context, Result};
use qdrant_client::qdrant::UpsertPointsBuilder;
use qdrant_client::qdrant::{CreateCollectionBuilder, Distance, PointStruct, Value, VectorParams};
use qdrant_client::Qdrant;
use std::collections::HashMap;
use std::env;

/// Dimension of the embedding model's output vectors.
const COLLECTION_VECTOR_SIZE: u64 = 768;

/// Configuration for Qdrant.
pub struct QdrantConfig {
    pub url: String,
    pub api_key: Option<String>,
}

impl QdrantConfig {
    /// Create a new configuration from environment variables.
    pub fn from_env() -> Result<Self> {
        let url = env::var("QDRANT_URL").context("QDRANT_URL not set")?;
        let api_key = env::var("QDRANT_API_KEY").ok();

        Ok(QdrantConfig { url, api_key })
    }
}

/// Vector index store: one Qdrant collection per corpus. Persistence is
/// owned by the Qdrant server; this core only checks existence, writes
/// points at index time and searches at query time.
pub struct QdrantStore {
    client: Qdrant,
}

impl QdrantStore {
    /// Connect to the Qdrant server.
    pub async fn new(config: QdrantConfig) -> Result<Self> {
        let builder = Qdrant::from_url(&config.url);
        let builder = if let Some(api_key) = config.api_key {
            builder.api_key(api_key)
        } else {
            builder
        };

        let client = builder.build().context("Failed to build Qdrant client")?;
        Ok(QdrantStore { client })
    }

    /// Check whether the collection backing `corpus` exists.
    pub async fn collection_exists(&self, corpus: &str) -> Result<bool> {
        let collection_name = collection_name(corpus);

        match self.client.collection_info(&collection_name).await {
            Ok(_) => Ok(true),
            Err(qdrant_client::QdrantError::ResponseError { status })
                if status.code() == tonic::Code::NotFound =>
            {
                Ok(false)
            }
            Err(e) => Err(anyhow::anyhow!(
                "Failed to check collection {}: {}",
                collection_name,
                e
            )),
        }
    }

    /// Create the collection backing `corpus`.
    pub async fn create_collection(&self, corpus: &str) -> Result<()> {
        let collection_name = collection_name(corpus);

        let create = CreateCollectionBuilder::new(collection_name.clone()).vectors_config(
            VectorParams {
                size: COLLECTION_VECTOR_SIZE,
                distance: Distance::Cosine.into(),
                ..Default::default()
            },
        );

        self.client
            .create_collection(create)
            .await
            .with_context(|| format!("Failed to create collection {}", collection_name))?;

        Ok(())
    }

    /// Delete the collection backing `corpus`.
    pub async fn delete_collection(&self, corpus: &str) -> Result<()> {
        let collection_name = collection_name(corpus);

        self.client
            .delete_collection(collection_name.clone())
            .await
            .with_context(|| format!("Failed to delete collection {}", collection_name))?;

        Ok(())
    }

    /// Upsert embedded chunks into the corpus collection.
    pub async fn store_chunks(
        &self,
        corpus: &str,
        chunks: Vec<TextChunk>,
        embeddings: Vec<Embedding>,
    ) -> Result<()> {
        let collection_name = collection_name(corpus);

        let points: Vec<PointStruct> = chunks
            .into_iter()
            .zip(embeddings.into_iter())
            .enumerate()
            .map(|(idx, (chunk, embedding))| {
                let mut payload: HashMap<String, Value> = HashMap::new();
                payload.insert("text".into(), chunk.text.into());
                payload.insert("origin".into(), chunk.document_id.into());
                payload.insert(
                    "start_position".into(),
                    (chunk.start_position as i64).into(),
                );
                PointStruct::new(idx as u64, embedding.values, payload)
            })
            .collect();

        let upsert = UpsertPointsBuilder::new(collection_name.clone(), points).build();

        self.client
            .upsert_points(upsert)
            .await
            .with_context(|| format!("Failed to upsert points into {}", collection_name))?;

        Ok(())
    }

    /// Nearest-neighbor search over the corpus collection. Snippets come
    /// back in Qdrant's descending-score order.
    pub async fn search(
        &self,
        corpus: &str,
        query_embedding: Embedding,
        limit: u64,
    ) -> Result<Vec<Snippet>> {
        use qdrant_client::qdrant::{with_payload_selector, SearchPoints, WithPayloadSelector};

        let collection_name = collection_name(corpus);

        let request = SearchPoints {
            collection_name: collection_name.clone(),
            vector: query_embedding.values,
            limit,
            with_payload: Some(WithPayloadSelector {
                selector_options: Some(with_payload_selector::SelectorOptions::Enable(true)),
            }),
            ..Default::default()
        };

        let response = self
            .client
            .search_points(request)
            .await
            .with_context(|| format!("Failed to search collection {}", collection_name))?;

        let snippets = response
            .result
            .into_iter()
            .filter_map(|scored| {
                let text = scored.payload.get("text")?.as_str()?.to_string();
                let origin = scored
                    .payload
                    .get("origin")
                    .and_then(|v| v.as_str())
                    .map(|s| s.as_str())
                    .unwrap_or(corpus)
                    .to_string();
                Some(Snippet {
                    text,
                    score: scored.score,
                    origin,
                })
            })
            .collect();

        Ok(snippets)
    }
}

/// Deterministic collection name for a corpus.
fn collection_name(corpus: &str) -> String {
    let name = corpus
        .chars()
        .map(|c| if c.is_alphanumeric() { c } else { '_' })
        .collect::<String>()
        .to_lowercase();

    format!("atelier_{}", name)
}
