use crate::error::{ChatError, ChatResult};
use crate::gemini::CompletionModel;
use crate::retriever::RetrieverTool;
use async_trait::async_trait;
use log::debug;
use serde::Deserialize;
use std::sync::Arc;

/// Outcome of routing one question: which tool to consult and, when the
/// selector offers one, why.
#[derive(Debug, Clone)]
pub struct RouterDecision {
    pub tool: String,
    pub rationale: Option<String>,
}

/// Strategy for mapping a question to exactly one retriever tool.
///
/// Contract: the returned tool name is one of the given tools' names; any
/// output that cannot be mapped to one is a [`ChatError::Routing`]. The
/// caller decides the fallback policy.
#[async_trait]
pub trait RouteSelector: Send + Sync {
    async fn select(&self, question: &str, tools: &[RetrieverTool]) -> ChatResult<RouterDecision>;
}

const SELECTOR_INSTRUCTION: &str = "You route user questions to retrieval tools. \
Given a question and a numbered list of tools with descriptions, pick the single \
tool best suited to answer it. Reply with one JSON object and nothing else, \
shaped exactly like {\"choice\": \"<tool name>\", \"reason\": \"<one short sentence>\"}.";

/// Selector that delegates the choice to the hosted model. Semantic
/// classification, not a deterministic rule: the same question may route
/// differently between runs.
pub struct LlmSelector {
    model: Arc<dyn CompletionModel>,
}

impl LlmSelector {
    pub fn new(model: Arc<dyn CompletionModel>) -> Self {
        LlmSelector { model }
    }
}

#[async_trait]
impl RouteSelector for LlmSelector {
    async fn select(&self, question: &str, tools: &[RetrieverTool]) -> ChatResult<RouterDecision> {
        let mut prompt = String::from("Tools:\n");
        for (i, tool) in tools.iter().enumerate() {
            prompt.push_str(&format!("{}. {}: {}\n", i + 1, tool.name, tool.description));
        }
        prompt.push_str(&format!("\nQuestion: {}", question));

        let reply = self
            .model
            .complete(SELECTOR_INSTRUCTION, &[], &prompt, 0.0)
            .await?;

        let decision = parse_choice(&reply, tools)?;
        debug!(
            "Routed question to tool {} ({})",
            decision.tool,
            decision.rationale.as_deref().unwrap_or("no rationale")
        );
        Ok(decision)
    }
}

#[derive(Deserialize)]
struct SelectorReply {
    choice: String,
    #[serde(default)]
    reason: Option<String>,
}

/// Parse the selector's reply into a decision. Tolerates a fenced code
/// block or stray text around the JSON object; everything else is a
/// routing error.
fn parse_choice(reply: &str, tools: &[RetrieverTool]) -> ChatResult<RouterDecision> {
    let body = match (reply.find('{'), reply.rfind('}')) {
        (Some(start), Some(end)) if end > start => &reply[start..=end],
        _ => {
            return Err(ChatError::Routing(format!(
                "selector reply contained no JSON object: {reply:?}"
            )))
        }
    };

    let parsed: SelectorReply = serde_json::from_str(body)
        .map_err(|e| ChatError::Routing(format!("selector reply was not valid JSON: {e}")))?;

    let name = parsed.choice.trim();
    let tool = tools
        .iter()
        .find(|t| t.name.eq_ignore_ascii_case(name))
        .ok_or_else(|| ChatError::Routing(format!("selector chose unknown tool {name:?}")))?;

    Ok(RouterDecision {
        tool: tool.name.clone(),
        rationale: parsed.reason,
    })
}

/// Deterministic selector driven by a keyword lookup table. Stands in for
/// the model-backed selector in tests and offline runs.
pub struct StaticSelector {
    rules: Vec<(String, String)>,
    default_tool: String,
}

impl StaticSelector {
    pub fn new(default_tool: impl Into<String>) -> Self {
        StaticSelector {
            rules: Vec::new(),
            default_tool: default_tool.into(),
        }
    }

    /// Route any question containing `keyword` (case-insensitive) to `tool`.
    pub fn with_rule(mut self, keyword: impl Into<String>, tool: impl Into<String>) -> Self {
        let keyword: String = keyword.into();
        self.rules.push((keyword.to_lowercase(), tool.into()));
        self
    }
}

#[async_trait]
impl RouteSelector for StaticSelector {
    async fn select(&self, question: &str, tools: &[RetrieverTool]) -> ChatResult<RouterDecision> {
        let lowered = question.to_lowercase();
        for (keyword, tool) in &self.rules {
            if lowered.contains(keyword) && tools.iter().any(|t| &t.name == tool) {
                return Ok(RouterDecision {
                    tool: tool.clone(),
                    rationale: Some(format!("matched keyword {keyword:?}")),
                });
            }
        }

        tools
            .iter()
            .find(|t| t.name == self.default_tool)
            .map(|t| RouterDecision {
                tool: t.name.clone(),
                rationale: Some("default".into()),
            })
            .ok_or_else(|| {
                ChatError::Routing(format!(
                    "default tool {:?} is not in the tool set",
                    self.default_tool
                ))
            })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::Message;
    use crate::retriever::test_support::StubSource;

    fn tool(name: &str, description: &str) -> RetrieverTool {
        RetrieverTool::new(name, description, 2, StubSource::with_snippets(Vec::new()))
    }

    fn faq_and_supplier() -> Vec<RetrieverTool> {
        vec![
            tool("faq", "general info"),
            tool("supplier", "supplier recommendations"),
        ]
    }

    /// Completion model that always replies with a fixed string.
    struct ScriptedModel(String);

    #[async_trait]
    impl CompletionModel for ScriptedModel {
        async fn complete(
            &self,
            _system: &str,
            _history: &[Message],
            _user_text: &str,
            _temperature: f32,
        ) -> ChatResult<String> {
            Ok(self.0.clone())
        }
    }

    #[test]
    fn parse_accepts_plain_json() {
        let tools = faq_and_supplier();
        let decision =
            parse_choice(r#"{"choice": "supplier", "reason": "asks about suppliers"}"#, &tools)
                .unwrap();
        assert_eq!(decision.tool, "supplier");
        assert_eq!(decision.rationale.as_deref(), Some("asks about suppliers"));
    }

    #[test]
    fn parse_accepts_fenced_json() {
        let tools = faq_and_supplier();
        let reply = "```json\n{\"choice\": \"faq\"}\n```";
        let decision = parse_choice(reply, &tools).unwrap();
        assert_eq!(decision.tool, "faq");
        assert!(decision.rationale.is_none());
    }

    #[test]
    fn parse_rejects_prose_without_json() {
        let tools = faq_and_supplier();
        let err = parse_choice("I would pick the supplier tool.", &tools).unwrap_err();
        assert!(matches!(err, ChatError::Routing(_)));
    }

    #[test]
    fn parse_rejects_unknown_tool_name() {
        let tools = faq_and_supplier();
        let err = parse_choice(r#"{"choice": "pricing"}"#, &tools).unwrap_err();
        assert!(matches!(err, ChatError::Routing(_)));
    }

    #[test]
    fn parse_normalizes_case_to_the_registered_name() {
        let tools = faq_and_supplier();
        let decision = parse_choice(r#"{"choice": "FAQ"}"#, &tools).unwrap();
        assert_eq!(decision.tool, "faq");
    }

    #[tokio::test]
    async fn llm_selector_routes_stone_suppliers_to_supplier_tool() {
        let model = Arc::new(ScriptedModel(
            r#"{"choice": "supplier", "reason": "supplier lookup"}"#.into(),
        ));
        let selector = LlmSelector::new(model);
        let tools = faq_and_supplier();

        let decision = selector
            .select("Who are the stone suppliers in Italy?", &tools)
            .await
            .unwrap();
        assert_eq!(decision.tool, "supplier");
    }

    #[tokio::test]
    async fn llm_selector_propagates_routing_error() {
        let model = Arc::new(ScriptedModel("no tools appeal to me".into()));
        let selector = LlmSelector::new(model);

        let err = selector
            .select("anything", &faq_and_supplier())
            .await
            .unwrap_err();
        assert!(matches!(err, ChatError::Routing(_)));
    }

    #[tokio::test]
    async fn static_selector_matches_keywords_then_falls_back() {
        let selector = StaticSelector::new("faq").with_rule("supplier", "supplier");
        let tools = faq_and_supplier();

        let decision = selector
            .select("Who are the stone suppliers in Italy?", &tools)
            .await
            .unwrap();
        assert_eq!(decision.tool, "supplier");

        let decision = selector.select("How do I reset my password?", &tools).await.unwrap();
        assert_eq!(decision.tool, "faq");
    }

    #[tokio::test]
    async fn static_selector_with_absent_default_is_a_routing_error() {
        let selector = StaticSelector::new("pricing");
        let err = selector
            .select("anything", &faq_and_supplier())
            .await
            .unwrap_err();
        assert!(matches!(err, ChatError::Routing(_)));
    }
}
