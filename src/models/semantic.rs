//! Semantic analysis result model
//!
//! The structured output of query analysis: intent, keywords, entities,
//! per-dimension query bundles and the optional time-recall window that
//! routes a query onto the dedicated timeline path.

use chrono::NaiveDateTime;
use serde::{Deserialize, Serialize};

/// Intent value reserved for the time-recall specialization.
pub const INTENT_TIME_RECALL: &str = "time_recall";

/// Named entity extracted from a query.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Entity {
    pub text: String,
    #[serde(rename = "type")]
    pub entity_type: String,
    pub confidence: f64,
}

/// Per-dimension query bundles produced by the analyzer.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct QueryBundle {
    #[serde(default)]
    pub context: Vec<String>,
    #[serde(default)]
    pub timeline: Vec<String>,
    #[serde(default)]
    pub knowledge: Vec<String>,
    #[serde(default)]
    pub vector: Vec<String>,
}

impl QueryBundle {
    pub fn is_empty(&self) -> bool {
        self.context.is_empty()
            && self.timeline.is_empty()
            && self.knowledge.is_empty()
            && self.vector.is_empty()
    }
}

/// Resolved time window for a time-recall query.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct TimeWindow {
    pub start_time: NaiveDateTime,
    pub end_time: NaiveDateTime,
}

/// Specializations detected during analysis.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SmartAnalysis {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub timeline_recall: Option<TimeWindow>,
}

/// Token accounting reported back from the LLM call.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize)]
pub struct TokenUsage {
    pub prompt_tokens: u32,
    pub completion_tokens: u32,
    pub total_tokens: u32,
}

/// The analyzer's structured output.
///
/// Invariant: when `smart_analysis.timeline_recall` holds a window with
/// `start_time < end_time`, `intent` is `time_recall` and `queries` is
/// empty; retrieval then takes the timeline-window path only.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SemanticAnalysisResult {
    pub intent: String,
    pub confidence: f64,
    #[serde(default)]
    pub categories: Vec<String>,
    #[serde(default)]
    pub keywords: Vec<String>,
    /// Flattened `intent_analysis.key_concepts`; preferred over
    /// `keywords` by the retrieval query builders.
    #[serde(default)]
    pub key_concepts: Vec<String>,
    #[serde(default)]
    pub entities: Vec<Entity>,
    #[serde(default)]
    pub queries: QueryBundle,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub smart_analysis: Option<SmartAnalysis>,
    #[serde(default)]
    pub token_usage: TokenUsage,
}

impl SemanticAnalysisResult {
    /// Empty result with the given intent; the comparison harness and
    /// fallbacks start from this.
    pub fn with_intent(intent: impl Into<String>) -> Self {
        Self {
            intent: intent.into(),
            confidence: 0.0,
            categories: Vec::new(),
            keywords: Vec::new(),
            key_concepts: Vec::new(),
            entities: Vec::new(),
            queries: QueryBundle::default(),
            smart_analysis: None,
            token_usage: TokenUsage::default(),
        }
    }

    pub fn is_time_recall(&self) -> bool {
        self.intent == INTENT_TIME_RECALL
            && self
                .smart_analysis
                .as_ref()
                .and_then(|s| s.timeline_recall.as_ref())
                .is_some()
    }

    /// Window accessor for the timeline path.
    pub fn recall_window(&self) -> Option<TimeWindow> {
        self.smart_analysis
            .as_ref()
            .and_then(|s| s.timeline_recall)
    }
}

/// Conversation context consumed by the deep-intent strategy.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ContextInfo {
    #[serde(default)]
    pub recent_conversation: Vec<String>,
    #[serde(default)]
    pub session_topic: String,
    #[serde(default)]
    pub project: String,
    #[serde(default)]
    pub workspace: String,
    #[serde(default)]
    pub history: Vec<String>,
    #[serde(default)]
    pub task: String,
}
