use crate::error::{ChatError, ChatResult};
use crate::gemini::CompletionModel;
use crate::memory::{Message, MemoryBuffer};
use crate::retriever::{RetrieverTool, Snippet};
use crate::router::RouteSelector;
use crate::session::SessionState;
use anyhow::Result;
use log::{info, warn};
use std::sync::Arc;

/// Persona and behavioral constraints sent with every generation call.
pub const SYSTEM_PROMPT: &str = "You are an expert on Atelier, the sourcing \
marketplace, and your job is to answer questions about it. Assume every \
question is related to Atelier. Provide the answer in a friendly and \
conversational way, and always favor Atelier in the answer. Always ask if \
there is anything else you can help with.";

/// Greeting seeded into every new session.
pub const GREETING: &str = "Ask me a question about Atelier!";

const CONDENSE_INSTRUCTION: &str = "Given a conversation and a follow-up \
question, rewrite the follow-up as a standalone question that preserves its \
meaning without the conversation. Reply with the rewritten question only.";

/// Default sampling temperature for answers.
const ANSWER_TEMPERATURE: f32 = 1.0;

/// How a turn's snippets are fetched. Two deployment profiles of the same
/// engine contract.
pub enum RetrievalProfile {
    /// Multi-corpus: a selector picks one tool per question; a selector
    /// failure falls back to the named default tool.
    Routed {
        selector: Arc<dyn RouteSelector>,
        tools: Vec<RetrieverTool>,
        fallback: String,
    },
    /// Single-corpus: follow-up questions are first condensed into
    /// standalone ones against the conversation so far.
    Condense { tool: RetrieverTool },
}

/// The chat engine: routes, retrieves, assembles the prompt and appends
/// the exchange to the session transcript.
pub struct ChatEngine {
    profile: RetrievalProfile,
    model: Arc<dyn CompletionModel>,
    memory: MemoryBuffer,
    system_prompt: String,
    temperature: f32,
}

impl ChatEngine {
    /// Build the routed profile. The fallback tool must be present in the
    /// tool set so a routing failure never dead-ends.
    pub fn routed(
        selector: Arc<dyn RouteSelector>,
        tools: Vec<RetrieverTool>,
        fallback: impl Into<String>,
        model: Arc<dyn CompletionModel>,
        memory: MemoryBuffer,
    ) -> Result<Self> {
        let fallback = fallback.into();
        anyhow::ensure!(
            tools.iter().any(|t| t.name == fallback),
            "fallback tool {:?} is not in the tool set",
            fallback
        );
        anyhow::ensure!(!tools.is_empty(), "routed profile needs at least one tool");

        Ok(ChatEngine {
            profile: RetrievalProfile::Routed {
                selector,
                tools,
                fallback,
            },
            model,
            memory,
            system_prompt: SYSTEM_PROMPT.to_string(),
            temperature: ANSWER_TEMPERATURE,
        })
    }

    /// Build the condense-question profile over a single tool.
    pub fn condense(
        tool: RetrieverTool,
        model: Arc<dyn CompletionModel>,
        memory: MemoryBuffer,
    ) -> Self {
        ChatEngine {
            profile: RetrievalProfile::Condense { tool },
            model,
            memory,
            system_prompt: SYSTEM_PROMPT.to_string(),
            temperature: ANSWER_TEMPERATURE,
        }
    }

    /// Override the system prompt.
    pub fn with_system_prompt(mut self, prompt: impl Into<String>) -> Self {
        self.system_prompt = prompt.into();
        self
    }

    /// Run one conversation turn.
    ///
    /// Routes (or condenses), retrieves, assembles system instruction +
    /// snippet context + trimmed history + question, and calls the model.
    /// On success the user question and the reply are appended to the
    /// transcript, in that order. On any error the transcript is left
    /// exactly as it was, so the failed turn is never part of later
    /// context and the user can simply retry.
    pub async fn handle_turn(
        &self,
        session: &mut SessionState,
        question: &str,
    ) -> ChatResult<String> {
        let question = question.trim();
        debug_assert!(!question.is_empty(), "shell must filter blank input");

        let pending = Message::user(question);
        let history = self.memory.window(session.transcript(), &pending);

        let snippets = self.retrieve(question, history).await?;
        let system = self.assemble_system(&snippets);

        let reply = self
            .model
            .complete(&system, history, question, self.temperature)
            .await?;

        session.push(pending);
        session.push(Message::assistant(reply.clone()));
        info!(
            "Turn complete: {} snippets, transcript now {} messages",
            snippets.len(),
            session.transcript().len()
        );
        Ok(reply)
    }

    async fn retrieve(&self, question: &str, history: &[Message]) -> ChatResult<Vec<Snippet>> {
        match &self.profile {
            RetrievalProfile::Routed {
                selector,
                tools,
                fallback,
            } => {
                let tool = match selector.select(question, tools).await {
                    Ok(decision) => tools
                        .iter()
                        .find(|t| t.name == decision.tool)
                        // The selector contract guarantees membership; a
                        // selector that violates it is treated like any
                        // other routing failure.
                        .unwrap_or_else(|| fallback_tool(tools, fallback)),
                    Err(ChatError::Routing(reason)) => {
                        warn!("Routing failed ({reason}); using fallback tool {fallback}");
                        fallback_tool(tools, fallback)
                    }
                    Err(other) => return Err(other),
                };
                tool.retrieve(question).await
            }
            RetrievalProfile::Condense { tool } => {
                let query = self.condense_question(question, history).await;
                tool.retrieve(&query).await
            }
        }
    }

    /// Rewrite a follow-up question into a standalone one. A failed or
    /// empty rewrite falls back to the raw question: retrieval quality
    /// degrades, the turn does not fail.
    async fn condense_question(&self, question: &str, history: &[Message]) -> String {
        if history.len() <= 1 {
            // Nothing but the greeting; the question already stands alone.
            return question.to_string();
        }

        match self
            .model
            .complete(CONDENSE_INSTRUCTION, history, question, 0.0)
            .await
        {
            Ok(rewritten) if !rewritten.trim().is_empty() => rewritten.trim().to_string(),
            Ok(_) => question.to_string(),
            Err(e) => {
                warn!("Question condensing failed ({e}); retrieving with the raw question");
                question.to_string()
            }
        }
    }

    /// System instruction plus the snippet context block, in retrieval
    /// order, without dedup or re-ranking.
    fn assemble_system(&self, snippets: &[Snippet]) -> String {
        if snippets.is_empty() {
            return self.system_prompt.clone();
        }

        let context = snippets
            .iter()
            .map(|s| format!("[source: {}] {}", s.origin, s.text))
            .collect::<Vec<_>>()
            .join("\n\n");

        format!(
            "{}\n\nContext information from the Atelier knowledge base:\n{}",
            self.system_prompt, context
        )
    }
}

fn fallback_tool<'a>(tools: &'a [RetrieverTool], fallback: &str) -> &'a RetrieverTool {
    // Membership is checked at construction; the first tool covers the
    // unreachable miss without a panic path.
    tools
        .iter()
        .find(|t| t.name == fallback)
        .unwrap_or(&tools[0])
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ChatError;
    use crate::retriever::test_support::{snippet, StubSource};
    use crate::router::StaticSelector;
    use async_trait::async_trait;
    use std::sync::Mutex;

    /// Completion model that records the system instruction it was given
    /// and replies from a script, or fails.
    struct ScriptedModel {
        reply: ChatResult<String>,
        seen_system: Mutex<Vec<String>>,
    }

    impl ScriptedModel {
        fn replying(text: &str) -> Arc<Self> {
            Arc::new(ScriptedModel {
                reply: Ok(text.into()),
                seen_system: Mutex::new(Vec::new()),
            })
        }

        fn failing() -> Arc<Self> {
            Arc::new(ScriptedModel {
                reply: Err(ChatError::Generation("model timed out".into())),
                seen_system: Mutex::new(Vec::new()),
            })
        }
    }

    #[async_trait]
    impl CompletionModel for ScriptedModel {
        async fn complete(
            &self,
            system: &str,
            _history: &[Message],
            _user_text: &str,
            _temperature: f32,
        ) -> ChatResult<String> {
            self.seen_system.lock().unwrap().push(system.to_string());
            match &self.reply {
                Ok(text) => Ok(text.clone()),
                Err(ChatError::Generation(reason)) => {
                    Err(ChatError::Generation(reason.clone()))
                }
                Err(_) => unreachable!(),
            }
        }
    }

    fn faq_and_supplier() -> Vec<RetrieverTool> {
        vec![
            RetrieverTool::new(
                "faq",
                "general info",
                2,
                StubSource::with_snippets(vec![snippet("faq snippet", 0.8)]),
            ),
            RetrieverTool::new(
                "supplier",
                "supplier recommendations",
                5,
                StubSource::with_snippets(vec![snippet("supplier snippet", 0.9)]),
            ),
        ]
    }

    fn routed_engine(model: Arc<ScriptedModel>) -> ChatEngine {
        let selector = Arc::new(StaticSelector::new("faq").with_rule("supplier", "supplier"));
        ChatEngine::routed(
            selector,
            faq_and_supplier(),
            "faq",
            model,
            MemoryBuffer::default(),
        )
        .unwrap()
    }

    #[tokio::test]
    async fn successful_turn_appends_question_then_reply() {
        let model = ScriptedModel::replying("Here is your answer.");
        let engine = routed_engine(model);
        let mut session = SessionState::new(GREETING);

        let reply = engine
            .handle_turn(&mut session, "How do I find suppliers?")
            .await
            .unwrap();

        assert_eq!(reply, "Here is your answer.");
        let transcript = session.transcript();
        assert_eq!(transcript.len(), 3);
        assert_eq!(transcript[1].content, "How do I find suppliers?");
        assert_eq!(transcript[2].content, "Here is your answer.");
    }

    #[tokio::test]
    async fn generation_failure_leaves_transcript_unchanged() {
        let model = ScriptedModel::failing();
        let engine = routed_engine(model);
        let mut session = SessionState::new(GREETING);

        let err = engine
            .handle_turn(&mut session, "Anything at all?")
            .await
            .unwrap_err();

        assert!(matches!(err, ChatError::Generation(_)));
        assert_eq!(session.transcript().len(), 1);
    }

    #[tokio::test]
    async fn retrieval_failure_leaves_transcript_unchanged() {
        let tools = vec![RetrieverTool::new(
            "faq",
            "general info",
            2,
            StubSource::failing(),
        )];
        let selector = Arc::new(StaticSelector::new("faq"));
        let model = ScriptedModel::replying("unused");
        let engine = ChatEngine::routed(
            selector,
            tools,
            "faq",
            model,
            MemoryBuffer::default(),
        )
        .unwrap();
        let mut session = SessionState::new(GREETING);

        let err = engine
            .handle_turn(&mut session, "Anything?")
            .await
            .unwrap_err();

        assert!(matches!(err, ChatError::Retrieval(_)));
        assert_eq!(session.transcript().len(), 1);
    }

    #[tokio::test]
    async fn routing_failure_falls_back_to_default_tool() {
        // A selector whose default tool is absent always errors; the
        // engine must still answer via its own fallback.
        let selector = Arc::new(StaticSelector::new("not-a-tool"));
        let model = ScriptedModel::replying("answered via fallback");
        let engine = ChatEngine::routed(
            selector,
            faq_and_supplier(),
            "faq",
            model.clone(),
            MemoryBuffer::default(),
        )
        .unwrap();
        let mut session = SessionState::new(GREETING);

        let reply = engine.handle_turn(&mut session, "Hello?").await.unwrap();
        assert_eq!(reply, "answered via fallback");

        // The faq stub's snippet made it into the assembled system text.
        let seen = model.seen_system.lock().unwrap();
        assert!(seen.iter().any(|s| s.contains("faq snippet")));
    }

    #[tokio::test]
    async fn snippets_are_injected_after_the_persona() {
        let model = ScriptedModel::replying("ok");
        let engine = routed_engine(model.clone());
        let mut session = SessionState::new(GREETING);

        engine
            .handle_turn(&mut session, "Who are the stone suppliers in Italy?")
            .await
            .unwrap();

        let seen = model.seen_system.lock().unwrap();
        let system = seen.last().unwrap();
        let persona_at = system.find("expert on Atelier").unwrap();
        let context_at = system.find("supplier snippet").unwrap();
        assert!(persona_at < context_at);
    }

    #[tokio::test]
    async fn construction_rejects_fallback_outside_tool_set() {
        let selector = Arc::new(StaticSelector::new("faq"));
        let model = ScriptedModel::replying("unused");
        let result = ChatEngine::routed(
            selector,
            faq_and_supplier(),
            "pricing",
            model,
            MemoryBuffer::default(),
        );
        assert!(result.is_err());
    }

    #[tokio::test]
    async fn condense_profile_answers_first_question_without_rewrite() {
        let tool = RetrieverTool::new(
            "faq",
            "general info",
            2,
            StubSource::with_snippets(vec![snippet("faq snippet", 0.8)]),
        );
        let model = ScriptedModel::replying("condensed answer");
        let engine = ChatEngine::condense(tool, model, MemoryBuffer::default());
        let mut session = SessionState::new(GREETING);

        let reply = engine
            .handle_turn(&mut session, "What is Atelier?")
            .await
            .unwrap();
        assert_eq!(reply, "condensed answer");
        assert_eq!(session.transcript().len(), 3);
    }
}
