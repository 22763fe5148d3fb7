//! LLM analysis envelope
//!
//! The fixed JSON shape both strategies ask the model for, and the
//! flattening of that envelope into a `SemanticAnalysisResult`. The
//! time-recall gate lives here: a well-formed `timeline_recall` short
//! circuits the free-form path entirely.

use chrono::NaiveDateTime;
use serde::{Deserialize, Serialize};

use crate::models::semantic::{
    QueryBundle, SemanticAnalysisResult, SmartAnalysis, TimeWindow, TokenUsage,
    INTENT_TIME_RECALL,
};

use super::SemanticError;

/// Timestamp format the envelope carries: `YYYY-MM-DD HH:mm:ss`.
pub const TIME_FORMAT: &str = "%Y-%m-%d %H:%M:%S";

// ============================================================================
// Envelope shape
// ============================================================================

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AnalysisEnvelope {
    #[serde(default)]
    pub timeline_recall: Option<TimelineRecall>,
    #[serde(default)]
    pub intent_analysis: Option<IntentAnalysis>,
    #[serde(default)]
    pub key_extraction: Option<KeyExtraction>,
    #[serde(default)]
    pub retrieval_strategy: Option<RetrievalStrategy>,
    #[serde(default)]
    pub confidence_level: f64,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TimelineRecall {
    #[serde(default)]
    pub start_time: String,
    #[serde(default)]
    pub end_time: String,
}

impl TimelineRecall {
    /// The gate: both timestamps present, parseable, and ordered.
    pub fn window(&self) -> Option<TimeWindow> {
        if self.start_time.is_empty() || self.end_time.is_empty() {
            return None;
        }
        let start = NaiveDateTime::parse_from_str(&self.start_time, TIME_FORMAT).ok()?;
        let end = NaiveDateTime::parse_from_str(&self.end_time, TIME_FORMAT).ok()?;
        (start < end).then_some(TimeWindow { start_time: start, end_time: end })
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct IntentAnalysis {
    #[serde(default)]
    pub core_intent: String,
    #[serde(default)]
    pub intent_type: String,
    #[serde(default)]
    pub intent_category: String,
    #[serde(default)]
    pub key_concepts: Vec<String>,
    #[serde(default)]
    pub time_scope: String,
    #[serde(default)]
    pub urgency_level: String,
    #[serde(default)]
    pub expected_outcome: String,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct KeyExtraction {
    #[serde(default)]
    pub project_keywords: Vec<String>,
    #[serde(default)]
    pub technical_keywords: Vec<String>,
    #[serde(default)]
    pub business_keywords: Vec<String>,
    #[serde(default)]
    pub time_keywords: Vec<String>,
    #[serde(default)]
    pub action_keywords: Vec<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RetrievalStrategy {
    #[serde(default)]
    pub timeline_queries: Vec<StrategyQuery>,
    #[serde(default)]
    pub knowledge_queries: Vec<StrategyQuery>,
    #[serde(default)]
    pub vector_queries: Vec<StrategyQuery>,
}

/// One candidate query with priority 1..5. Models occasionally emit
/// bare strings; those land at the default priority.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(from = "StrategyQueryRepr")]
pub struct StrategyQuery {
    pub query: String,
    pub priority: u8,
}

#[derive(Deserialize)]
#[serde(untagged)]
enum StrategyQueryRepr {
    Text(String),
    Full {
        query: String,
        #[serde(default = "default_priority")]
        priority: u8,
    },
}

fn default_priority() -> u8 {
    3
}

impl From<StrategyQueryRepr> for StrategyQuery {
    fn from(repr: StrategyQueryRepr) -> Self {
        match repr {
            StrategyQueryRepr::Text(query) => Self { query, priority: default_priority() },
            StrategyQueryRepr::Full { query, priority } => {
                Self { query, priority: priority.clamp(1, 5) }
            },
        }
    }
}

// ============================================================================
// Parsing
// ============================================================================

/// Strip leading/trailing markdown code fences (``` or ```json).
pub fn strip_code_fences(content: &str) -> &str {
    let trimmed = content.trim();
    let Some(rest) = trimmed.strip_prefix("```") else {
        return trimmed;
    };
    // Drop the fence line (with its optional language tag)
    let body = match rest.find('\n') {
        Some(idx) => &rest[idx + 1..],
        None => rest,
    };
    body.strip_suffix("```").unwrap_or(body).trim()
}

pub fn parse_envelope(content: &str) -> Result<AnalysisEnvelope, SemanticError> {
    let body = strip_code_fences(content);
    serde_json::from_str(body).map_err(|e| SemanticError::Parse {
        message: format!("invalid analysis envelope: {e}"),
    })
}

// ============================================================================
// Flattening
// ============================================================================

/// Order-preserving union; later duplicates are dropped.
pub fn union_keywords(first: &[String], second: &[String]) -> Vec<String> {
    let mut seen = std::collections::HashSet::new();
    first
        .iter()
        .chain(second.iter())
        .filter(|k| !k.trim().is_empty() && seen.insert(k.trim().to_string()))
        .map(|k| k.trim().to_string())
        .collect()
}

fn flatten_queries(mut queries: Vec<StrategyQuery>) -> Vec<String> {
    queries.sort_by(|a, b| b.priority.cmp(&a.priority));
    queries
        .into_iter()
        .map(|q| q.query)
        .filter(|q| !q.trim().is_empty())
        .collect()
}

/// Turn a parsed envelope into the analyzer result. The time-recall
/// gate wins over everything else: a well-formed window yields
/// `intent = "time_recall"` with empty query bundles.
pub fn envelope_to_result(envelope: AnalysisEnvelope, token_usage: TokenUsage) -> SemanticAnalysisResult {
    if let Some(window) = envelope.timeline_recall.as_ref().and_then(TimelineRecall::window) {
        let mut result = SemanticAnalysisResult::with_intent(INTENT_TIME_RECALL);
        result.confidence = normalized_confidence(envelope.confidence_level);
        result.smart_analysis = Some(SmartAnalysis { timeline_recall: Some(window) });
        result.token_usage = token_usage;
        return result;
    }

    let intent_analysis = envelope.intent_analysis.unwrap_or_default();
    let key_extraction = envelope.key_extraction.unwrap_or_default();
    let strategy = envelope.retrieval_strategy.unwrap_or_default();

    let intent = if !intent_analysis.intent_type.is_empty() {
        intent_analysis.intent_type.clone()
    } else if !intent_analysis.core_intent.is_empty() {
        intent_analysis.core_intent.clone()
    } else {
        "general".to_string()
    };

    let mut result = SemanticAnalysisResult::with_intent(intent);
    result.confidence = normalized_confidence(envelope.confidence_level);
    if !intent_analysis.intent_category.is_empty() {
        result.categories.push(intent_analysis.intent_category.clone());
    }
    result.key_concepts = intent_analysis.key_concepts;
    result.keywords = union_keywords(
        &key_extraction.technical_keywords,
        &key_extraction.project_keywords,
    );
    result.queries = QueryBundle {
        context: Vec::new(),
        timeline: flatten_queries(strategy.timeline_queries),
        knowledge: flatten_queries(strategy.knowledge_queries),
        vector: flatten_queries(strategy.vector_queries),
    };
    result.token_usage = token_usage;
    result
}

fn normalized_confidence(raw: f64) -> f64 {
    raw.clamp(0.0, 1.0)
}
