//! Retrieval entity model
//!
//! Canonical entities returned by the three backends and the unified
//! result shape produced by fusion. `RetrievalResult::id` is the dedup
//! key across dimensions.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Canonical timeline event as produced by the timeline backend.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TimelineEvent {
    pub id: String,
    pub user_id: String,
    #[serde(default)]
    pub session_id: String,
    #[serde(default)]
    pub workspace_id: String,
    pub timestamp: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub duration_ms: Option<i64>,
    #[serde(default)]
    pub event_type: String,
    pub title: String,
    pub content: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub summary: Option<String>,
    #[serde(default)]
    pub related_files: Vec<String>,
    #[serde(default)]
    pub related_concepts: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub parent_event_id: Option<String>,
    #[serde(default)]
    pub intent: String,
    #[serde(default)]
    pub keywords: Vec<String>,
    /// Entity payload kept as raw JSON; backends index it inverted.
    #[serde(default)]
    pub entities: serde_json::Value,
    #[serde(default)]
    pub categories: Vec<String>,
    pub importance_score: i32,
    pub relevance_score: f64,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

// ============================================================================
// Knowledge graph entities
// ============================================================================

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct KnowledgeNode {
    pub id: String,
    pub name: String,
    #[serde(rename = "type", default)]
    pub node_type: String,
    #[serde(default)]
    pub properties: HashMap<String, serde_json::Value>,
    pub importance: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct KnowledgeRelationship {
    pub id: String,
    pub source: String,
    pub target: String,
    #[serde(rename = "type", default)]
    pub relation_type: String,
    pub strength: f64,
    #[serde(default)]
    pub description: String,
}

/// One path discovered during graph expansion, node ids in walk order.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct KnowledgePath {
    pub node_ids: Vec<String>,
    pub relationship_ids: Vec<String>,
    pub weight: f64,
}

// ============================================================================
// Vector entities
// ============================================================================

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VectorDocument {
    pub id: String,
    pub content: String,
    #[serde(default)]
    pub vector: Vec<f64>,
    #[serde(default)]
    pub score: f64,
    #[serde(default)]
    pub metadata: HashMap<String, serde_json::Value>,
}

// ============================================================================
// Unified result
// ============================================================================

/// Which backend a fused result came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ResultSource {
    Timeline,
    Knowledge,
    Vector,
}

impl ResultSource {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Timeline => "timeline",
            Self::Knowledge => "knowledge",
            Self::Vector => "vector",
        }
    }
}

/// Unified retrieval result. `id` is the dedup key; fusion keeps the
/// higher-scored entry on collision and orders by `relevance`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetrievalResult {
    pub id: String,
    pub source: ResultSource,
    pub content: String,
    #[serde(default)]
    pub title: String,
    pub score: f64,
    pub relevance: f64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timestamp: Option<DateTime<Utc>>,
    #[serde(default)]
    pub metadata: HashMap<String, serde_json::Value>,
}

impl RetrievalResult {
    pub fn from_timeline(event: &TimelineEvent) -> Self {
        Self {
            id: event.id.clone(),
            source: ResultSource::Timeline,
            content: event.content.clone(),
            title: event.title.clone(),
            score: event.relevance_score,
            relevance: event.relevance_score,
            timestamp: Some(event.timestamp),
            metadata: HashMap::from([
                ("event_type".to_string(), serde_json::json!(event.event_type)),
                ("importance_score".to_string(), serde_json::json!(event.importance_score)),
            ]),
        }
    }

    pub fn from_knowledge(node: &KnowledgeNode) -> Self {
        Self {
            id: node.id.clone(),
            source: ResultSource::Knowledge,
            content: node.name.clone(),
            title: node.name.clone(),
            score: node.importance,
            relevance: node.importance,
            timestamp: None,
            metadata: HashMap::from([(
                "node_type".to_string(),
                serde_json::json!(node.node_type),
            )]),
        }
    }

    pub fn from_vector(doc: &VectorDocument) -> Self {
        Self {
            id: doc.id.clone(),
            source: ResultSource::Vector,
            content: doc.content.clone(),
            title: String::new(),
            score: doc.score,
            relevance: doc.score,
            timestamp: None,
            metadata: doc.metadata.clone(),
        }
    }
}
