use crate::database::QdrantStore;
use crate::error::{ChatError, ChatResult};
use crate::gemini::GeminiClient;
use async_trait::async_trait;
use log::debug;
use std::sync::Arc;

/// A retrieved excerpt of source text with its relevance score.
#[derive(Debug, Clone)]
pub struct Snippet {
    pub text: String,
    pub score: f32,
    /// Reference back to the source document.
    pub origin: String,
}

/// Source of snippets for a query. The production implementation embeds
/// the query and searches a vector collection; tests substitute scripted
/// sources.
#[async_trait]
pub trait SnippetSource: Send + Sync {
    /// Fetch up to `k` snippets for `query`, best match first.
    async fn retrieve(&self, query: &str, k: u64) -> ChatResult<Vec<Snippet>>;
}

/// Snippet source backed by one Qdrant corpus collection.
pub struct VectorRetriever {
    gemini: Arc<GeminiClient>,
    store: Arc<QdrantStore>,
    corpus: String,
}

impl VectorRetriever {
    pub fn new(gemini: Arc<GeminiClient>, store: Arc<QdrantStore>, corpus: impl Into<String>) -> Self {
        VectorRetriever {
            gemini,
            store,
            corpus: corpus.into(),
        }
    }
}

#[async_trait]
impl SnippetSource for VectorRetriever {
    async fn retrieve(&self, query: &str, k: u64) -> ChatResult<Vec<Snippet>> {
        let embedding = self
            .gemini
            .embed(query)
            .await
            .map_err(|e| ChatError::Retrieval(format!("query embedding failed: {e}")))?;

        let mut snippets = self
            .store
            .search(&self.corpus, embedding, k)
            .await
            .map_err(|e| ChatError::Retrieval(format!("corpus {}: {e:#}", self.corpus)))?;

        // Callers rely on non-increasing score order.
        snippets.sort_by(|a, b| b.score.total_cmp(&a.score));
        snippets.truncate(k as usize);

        debug!(
            "Retrieved {} snippets from corpus {}",
            snippets.len(),
            self.corpus
        );
        Ok(snippets)
    }
}

/// A named, described binding from the query interface to one snippet
/// source, with its own top-k reflecting the corpus' size and precision
/// tradeoff. Stateless beyond the bound source; created at startup and
/// shared for the process lifetime.
#[derive(Clone)]
pub struct RetrieverTool {
    pub name: String,
    pub description: String,
    pub top_k: u64,
    source: Arc<dyn SnippetSource>,
}

impl RetrieverTool {
    pub fn new(
        name: impl Into<String>,
        description: impl Into<String>,
        top_k: u64,
        source: Arc<dyn SnippetSource>,
    ) -> Self {
        RetrieverTool {
            name: name.into(),
            description: description.into(),
            top_k,
            source,
        }
    }

    /// Fetch this tool's top-k snippets for a query.
    pub async fn retrieve(&self, query: &str) -> ChatResult<Vec<Snippet>> {
        self.source.retrieve(query, self.top_k).await
    }
}


#[cfg(test)]
mod tests {
    use super::test_support::*;
    use super::*;

    #[tokio::test]
    async fn tool_applies_its_own_top_k() {
        let source = StubSource::with_snippets(vec![
            snippet("first", 0.9),
            snippet("second", 0.8),
            snippet("third", 0.7),
        ]);
        let tool = RetrieverTool::new("faq", "general info", 2, source);

        let snippets = tool.retrieve("anything").await.unwrap();
        assert_eq!(snippets.len(), 2);
    }

    #[tokio::test]
    async fn snippets_come_back_in_descending_score_order() {
        let source = StubSource::with_snippets(vec![
            snippet("low", 0.1),
            snippet("high", 0.9),
            snippet("mid", 0.5),
        ]);
        let tool = RetrieverTool::new("supplier", "supplier recommendations", 5, source);

        let snippets = tool.retrieve("anything").await.unwrap();
        let scores: Vec<f32> = snippets.iter().map(|s| s.score).collect();
        assert!(scores.windows(2).all(|w| w[0] >= w[1]));
    }

    #[tokio::test]
    async fn empty_index_yields_empty_result() {
        let source = StubSource::with_snippets(Vec::new());
        let tool = RetrieverTool::new("faq", "general info", 2, source);
        assert!(tool.retrieve("anything").await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn unavailable_index_is_a_retrieval_error() {
        let tool = RetrieverTool::new("faq", "general info", 2, StubSource::failing());
        let err = tool.retrieve("anything").await.unwrap_err();
        assert!(matches!(err, ChatError::Retrieval(_)));
    }
}
