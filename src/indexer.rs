use crate::chunking::split_into_chunks;
use crate::config::CorpusConfig;
use crate::database::QdrantStore;
use crate::document::Document;
use crate::gemini::GeminiClient;
use anyhow::{Context, Result};
use log::info;
use std::sync::Arc;

/// Builds and persists one vector collection per corpus: chunk every
/// document, embed every chunk, upsert the points. Build failures are
/// fatal to the caller; the application cannot serve without its indexes.
pub struct Indexer {
    gemini: Arc<GeminiClient>,
    store: Arc<QdrantStore>,
}

impl Indexer {
    pub fn new(gemini: Arc<GeminiClient>, store: Arc<QdrantStore>) -> Self {
        Indexer { gemini, store }
    }

    /// Index a corpus. An existing collection is reused untouched unless
    /// `rebuild` is set. Returns the number of chunks written (0 when the
    /// existing collection was kept).
    pub async fn build_corpus(
        &self,
        corpus: &CorpusConfig,
        documents: &[Document],
        rebuild: bool,
    ) -> Result<usize> {
        if self.store.collection_exists(&corpus.name).await? {
            if !rebuild {
                info!("Corpus {} already indexed, keeping it", corpus.name);
                return Ok(0);
            }
            info!("Rebuilding corpus {}", corpus.name);
            self.store.delete_collection(&corpus.name).await?;
        }

        self.store.create_collection(&corpus.name).await?;

        let mut chunks = Vec::new();
        for document in documents {
            chunks.extend(split_into_chunks(&document.content, &document.document_id));
        }
        info!(
            "Corpus {}: {} documents split into {} chunks",
            corpus.name,
            documents.len(),
            chunks.len()
        );

        let mut embeddings = Vec::new();
        for chunk in &chunks {
            let embedding = self
                .gemini
                .embed(&chunk.text)
                .await
                .with_context(|| format!("Failed to embed a chunk of {}", chunk.document_id))?;
            embeddings.push(embedding);
        }

        let count = chunks.len();
        self.store
            .store_chunks(&corpus.name, chunks, embeddings)
            .await?;

        info!("Corpus {}: stored {} chunks", corpus.name, count);
        Ok(count)
    }
}
