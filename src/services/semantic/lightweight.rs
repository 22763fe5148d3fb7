//! Lightweight analysis strategy (wide recall)
//!
//! One fast, cheap LLM call per query. Optimized for coverage over
//! precision: near-zero temperature, no conversation context.

use async_trait::async_trait;
use std::sync::Arc;

use crate::models::semantic::{ContextInfo, SemanticAnalysisResult, TokenUsage};
use crate::services::llm::models::TaskType;
use crate::services::llm::LLMFacade;
use crate::services::prompt::{PromptContext, PromptManager, TPL_LIGHTWEIGHT_RECALL};

use super::envelope::{envelope_to_result, parse_envelope};
use super::{AnalysisStrategy, SemanticError};

const LIGHTWEIGHT_TEMPERATURE: f32 = 0.1;

pub struct LightweightStrategy {
    facade: Arc<LLMFacade>,
    prompts: Arc<PromptManager>,
}

impl LightweightStrategy {
    pub fn new(facade: Arc<LLMFacade>, prompts: Arc<PromptManager>) -> Self {
        Self { facade, prompts }
    }
}

#[async_trait]
impl AnalysisStrategy for LightweightStrategy {
    fn name(&self) -> &'static str {
        "lightweight"
    }

    async fn analyze_query(
        &self,
        query: &str,
        _context: &ContextInfo,
    ) -> Result<SemanticAnalysisResult, SemanticError> {
        let prompt = self.prompts.build_prompt(
            TPL_LIGHTWEIGHT_RECALL,
            &PromptContext::new().with_var("query", query),
        )?;

        let request = prompt
            .to_request()
            .with_temperature(LIGHTWEIGHT_TEMPERATURE);
        let response = self
            .facade
            .complete_task(TaskType::QueryRewrite, request)
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
