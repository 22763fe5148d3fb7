//! Storage input model
//!
//! LLM-produced projections of one memory event into the three backend
//! dimensions, plus the priority recommendation that gates each write.
//! Bounds from the quality gates are enforced with validator derives;
//! collection-level checks that the derive cannot express live in
//! `validate_all` wrappers.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::time::Duration;
use validator::Validate;

/// Priority below or at which a dimension is skipped without error.
pub const PRIORITY_GATE: f64 = 0.3;

// ============================================================================
// Timeline projection
// ============================================================================

#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
pub struct TimelineData {
    #[validate(length(min = 1, max = 200))]
    pub title: String,
    #[validate(length(min = 1, max = 10000))]
    pub content: String,
    #[serde(default)]
    pub event_type: String,
    #[validate(length(min = 1))]
    pub keywords: Vec<String>,
    #[validate(range(min = 1, max = 10))]
    pub importance_score: i32,
    #[serde(default)]
    pub tech_stack: Vec<String>,
    #[serde(default)]
    pub project_context: String,
}

// ============================================================================
// Knowledge graph projection
// ============================================================================

#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
pub struct ConceptData {
    #[validate(length(min = 1))]
    pub name: String,
    #[serde(rename = "type", default)]
    pub concept_type: String,
    #[serde(default)]
    pub properties: HashMap<String, serde_json::Value>,
    #[validate(range(min = 0.0, max = 1.0))]
    pub importance: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
pub struct RelationshipData {
    pub source: String,
    pub target: String,
    #[serde(rename = "type", default)]
    pub relation_type: String,
    #[validate(range(min = 0.0, max = 1.0))]
    pub strength: f64,
    #[serde(default)]
    pub description: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
pub struct KnowledgeGraphData {
    #[validate(length(min = 1), nested)]
    pub concepts: Vec<ConceptData>,
    #[serde(default)]
    #[validate(nested)]
    pub relationships: Vec<RelationshipData>,
}

// ============================================================================
// Vector projection
// ============================================================================

#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
pub struct VectorData {
    #[validate(length(min = 10, max = 50000))]
    pub content: String,
    #[validate(length(min = 1))]
    pub semantic_tags: Vec<String>,
    #[serde(default)]
    pub context_summary: String,
    #[validate(range(min = 0.0, max = 1.0))]
    pub relevance_score: f64,
}

// ============================================================================
// Storage recommendation & analysis bundle
// ============================================================================

/// LLM-assigned per-dimension priorities. A dimension is written iff its
/// priority exceeds [`PRIORITY_GATE`], its enable flag is set and its
/// data validates.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StorageRecommendation {
    pub timeline_priority: f64,
    pub knowledge_priority: f64,
    pub vector_priority: f64,
    #[serde(default)]
    pub reasoning: String,
}

impl Default for StorageRecommendation {
    fn default() -> Self {
        // Neutral recommendation: store everywhere
        Self {
            timeline_priority: 1.0,
            knowledge_priority: 1.0,
            vector_priority: 1.0,
            reasoning: String::new(),
        }
    }
}

/// The one-shot structuring payload: every projection plus the
/// recommendation, produced by a single LLM call.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct StorageAnalysis {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timeline_data: Option<TimelineData>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub knowledge_graph_data: Option<KnowledgeGraphData>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub vector_data: Option<VectorData>,
    #[serde(default)]
    pub storage_recommendation: StorageRecommendation,
}

// ============================================================================
// Request / result
// ============================================================================

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StorageRequest {
    pub user_id: String,
    #[serde(default)]
    pub session_id: String,
    #[serde(default)]
    pub workspace_id: String,
    pub content: String,
    #[serde(default)]
    pub metadata: HashMap<String, serde_json::Value>,
}

/// One failed dimension, attached to the aggregate result rather than
/// raised.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DimensionError {
    pub dimension: String,
    pub code: String,
    pub message: String,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct StorageResult {
    pub success: bool,
    pub timeline_stored: bool,
    pub knowledge_stored: bool,
    pub vector_stored: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub timeline_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub knowledge_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub vector_id: Option<String>,
    #[serde(default)]
    pub errors: Vec<DimensionError>,
    #[serde(with = "duration_millis")]
    pub processing_time: Duration,
    #[serde(with = "duration_millis")]
    pub llm_analysis_time: Duration,
    #[serde(with = "duration_millis")]
    pub storage_time: Duration,
}

/// Durations serialize as whole milliseconds.
mod duration_millis {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S: Serializer>(d: &Duration, s: S) -> Result<S::Ok, S::Error> {
        s.serialize_u64(d.as_millis() as u64)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Duration, D::Error> {
        let ms = u64::deserialize(d)?;
        Ok(Duration::from_millis(ms))
    }
}
