//! Deep intent strategy (precise recall)
//!
//! Consumes the caller's conversation context and asks for a precise,
//! high-confidence read of the query. Slightly warmer temperature than
//! the lightweight path but still inside the cacheable band.

use async_trait::async_trait;
use std::sync::Arc;

use crate::models::semantic::{ContextInfo, SemanticAnalysisResult, TokenUsage};
use crate::services::llm::models::TaskType;
use crate::services::llm::LLMFacade;
use crate::services::prompt::{PromptContext, PromptManager, TPL_DEEP_INTENT};

use super::envelope::{envelope_to_result, parse_envelope};
use super::{AnalysisStrategy, SemanticError};

const DEEP_TEMPERATURE: f32 = 0.2;

pub struct DeepIntentStrategy {
    facade: Arc<LLMFacade>,
    prompts: Arc<PromptManager>,
}

impl DeepIntentStrategy {
    pub fn new(facade: Arc<LLMFacade>, prompts: Arc<PromptManager>) -> Self {
        Self { facade, prompts }
    }

    /// Render the context record into the prompt's context block.
    /// Empty sections are dropped rather than sent as blank headers.
    fn render_context(context: &ContextInfo) -> String {
        let mut sections = Vec::new();
        if !context.session_topic.is_empty() {
            sections.push(format!("Session topic: {}", context.session_topic));
        }
        if !context.project.is_empty() {
            sections.push(format!("Project: {}", context.project));
        }
        if !context.workspace.is_empty() {
            sections.push(format!("Workspace: {}", context.workspace));
        }
        if !context.task.is_empty() {
            sections.push(format!("Current task: {}", context.task));
        }
        if !context.recent_conversation.is_empty() {
            sections.push(format!(
                "Recent conversation:\n{}",
                context.recent_conversation.join("\n")
            ));
        }
        if !context.history.is_empty() {
            sections.push(format!("Earlier history:\n{}", context.history.join("\n")));
        }
        if sections.is_empty() {
            "(no context available)".to_string()
        } else {
            sections.join("\n\n")
        }
    }
}

#[async_trait]
impl AnalysisStrategy for DeepIntentStrategy {
    fn name(&self) -> &'static str {
        "deep_intent"
    }

    async fn analyze_query(
        &self,
        query: &str,
        context: &ContextInfo,
    ) -> Result<SemanticAnalysisResult, SemanticError> {
        let prompt = self.prompts.build_prompt(
            TPL_DEEP_INTENT,
            &PromptContext::new()
                .with_var("query", query)
                .with_var("context", Self::render_context(context)),
        )?;

        let request = prompt.to_request().with_temperature(DEEP_TEMPERATURE);
        let response = self
            .facade
            .complete_task(TaskType::ThreeElementsAnalysis, request)
            .await?;

        let envelope = parse_envelope(&response.content)?;
        let usage = TokenUsage {
            prompt_tokens: 0,
            completion_tokens: 0,
            total_tokens: response.tokens_used,
        };
        Ok(envelope_to_result(envelope, usage))
    }
}
