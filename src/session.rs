use crate::config::AppConfig;
use crate::database::{QdrantConfig, QdrantStore};
use crate::gemini::{GeminiClient, GeminiConfig};
use crate::memory::Message;
use crate::retriever::{RetrieverTool, VectorRetriever};
use anyhow::{Context, Result};
use log::info;
use std::sync::Arc;
use tokio::sync::OnceCell;

/// Mutable state of one chat session: the append-only transcript, seeded
/// with the assistant greeting. Constructed when a session starts and
/// discarded when it ends; passing it by `&mut` into the engine is what
/// keeps turns strictly one at a time.
pub struct SessionState {
    transcript: Vec<Message>,
}

impl SessionState {
    pub fn new(greeting: impl Into<String>) -> Self {
        SessionState {
            transcript: vec![Message::assistant(greeting)],
        }
    }

    /// Full conversation so far, greeting included, oldest first.
    pub fn transcript(&self) -> &[Message] {
        &self.transcript
    }

    pub(crate) fn push(&mut self, message: Message) {
        self.transcript.push(message);
    }
}

/// Clients and tools loaded once per process and shared read-only across
/// sessions. Construction is expensive (network clients, corpus checks),
/// so it hides behind a process-wide cell with a single-initialization
/// guarantee; later callers get the already-built instance.
pub struct AppResources {
    pub gemini: Arc<GeminiClient>,
    pub store: Arc<QdrantStore>,
    pub tools: Vec<RetrieverTool>,
}

static RESOURCES: OnceCell<AppResources> = OnceCell::const_new();

impl AppResources {
    /// Get the process-wide resources, building them on first call.
    pub async fn get_or_init(config: &AppConfig) -> Result<&'static AppResources> {
        RESOURCES
            .get_or_try_init(|| async { AppResources::build(config).await })
            .await
    }

    async fn build(config: &AppConfig) -> Result<AppResources> {
        let gemini = Arc::new(
            GeminiClient::new(GeminiConfig::from_env()?)
                .context("Failed to initialize Gemini client")?,
        );
        let store = Arc::new(
            QdrantStore::new(QdrantConfig::from_env()?)
                .await
                .context("Failed to initialize Qdrant client")?,
        );

        let mut tools = Vec::new();
        for corpus in &config.corpora {
            let source = Arc::new(VectorRetriever::new(
                gemini.clone(),
                store.clone(),
                corpus.name.clone(),
            ));
            tools.push(RetrieverTool::new(
                corpus.name.clone(),
                corpus.description.clone(),
                corpus.top_k,
                source,
            ));
        }

        info!("Loaded {} retriever tools", tools.len());
        Ok(AppResources {
            gemini,
            store,
            tools,
        })
    }
}
