//! Semantic analysis engine
//!
//! Strategy-based query analysis: a lightweight wide-recall strategy
//! and a context-aware deep-intent strategy, both emitting the same
//! JSON envelope. The engine optionally runs the two side by side in
//! comparison mode and logs the deltas.

pub mod deep;
pub mod envelope;
pub mod lightweight;

#[cfg(test)]
mod tests;

pub use deep::DeepIntentStrategy;
pub use envelope::{parse_envelope, strip_code_fences, AnalysisEnvelope};
pub use lightweight::LightweightStrategy;

use async_trait::async_trait;
use std::sync::Arc;
use std::time::Duration;

use crate::models::semantic::{ContextInfo, SemanticAnalysisResult};
use crate::services::llm::models::LLMError;
use crate::services::prompt::PromptError;

/// Pause between the two strategies in comparison mode, so back-to-back
/// LLM calls stay inside provider rate limits.
const COMPARISON_SPACING: Duration = Duration::from_secs(3);

#[derive(Debug, thiserror::Error)]
pub enum SemanticError {
    #[error(transparent)]
    Llm(#[from] LLMError),

    #[error(transparent)]
    Prompt(#[from] PromptError),

    #[error("envelope parse error: {message}")]
    Parse { message: String },
}

/// One analysis strategy. Implementations own their prompt template and
/// temperature discipline.
#[async_trait]
pub trait AnalysisStrategy: Send + Sync {
    fn name(&self) -> &'static str;

    async fn analyze_query(
        &self,
        query: &str,
        context: &ContextInfo,
    ) -> Result<SemanticAnalysisResult, SemanticError>;
}

pub struct SemanticAnalysisEngine {
    primary: Arc<dyn AnalysisStrategy>,
    secondary: Option<Arc<dyn AnalysisStrategy>>,
}

impl SemanticAnalysisEngine {
    pub fn new(primary: Arc<dyn AnalysisStrategy>) -> Self {
        Self { primary, secondary: None }
    }

    /// Comparison mode: both strategies run serially on every query;
    /// the primary's result is always the one returned.
    pub fn with_comparison(
        primary: Arc<dyn AnalysisStrategy>,
        secondary: Arc<dyn AnalysisStrategy>,
    ) -> Self {
        Self { primary, secondary: Some(secondary) }
    }

    pub fn comparison_enabled(&self) -> bool {
        self.secondary.is_some()
    }

    pub async fn analyze(
        &self,
        query: &str,
        context: &ContextInfo,
    ) -> Result<SemanticAnalysisResult, SemanticError> {
        let result = self.primary.analyze_query(query, context).await?;

        if let Some(secondary) = &self.secondary {
            tokio::time::sleep(COMPARISON_SPACING).await;
            match secondary.analyze_query(query, context).await {
                Ok(other) => self.log_comparison(&result, &other, secondary.name()),
                Err(e) => tracing::warn!(
                    "comparison strategy '{}' failed: {}",
                    secondary.name(),
                    e
                ),
            }
        }

        Ok(result)
    }

    fn log_comparison(
        &self,
        primary: &SemanticAnalysisResult,
        secondary: &SemanticAnalysisResult,
        secondary_name: &str,
    ) {
        let intent_agreement = primary.intent == secondary.intent;
        let confidence_delta = primary.confidence - secondary.confidence;
        let token_delta = i64::from(primary.token_usage.total_tokens)
            - i64::from(secondary.token_usage.total_tokens);

        tracing::info!(
            primary = self.primary.name(),
            secondary = secondary_name,
            intent_agreement,
            confidence_delta,
            token_delta,
            "strategy comparison"
        );
    }
}
