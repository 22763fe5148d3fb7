//! Backend adapter contracts
//!
//! The three narrow write/read interfaces the engines fan out to.
//! Concrete drivers live outside this crate; `memory` holds in-memory
//! reference implementations used by the engine test suites.
//!
//! Driver notes for the timeline backend: the reference schema is a
//! hypertable `timeline_events` partitioned on `timestamp` with
//! composite primary key `(id, timestamp)`, descending-timestamp
//! indexes per user/workspace/session, a trigger-maintained tokenized
//! column over title+content+keywords, inverted indexes on `keywords`
//! and `entities`, and B-tree indexes on `event_type` and `intent`.

pub mod memory;

pub use memory::{InMemoryKnowledgeStore, InMemoryTimelineStore, InMemoryVectorStore};

use async_trait::async_trait;
use chrono::{DateTime, Duration as ChronoDuration, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::time::Duration;

use crate::models::retrieval::{
    KnowledgeNode, KnowledgePath, KnowledgeRelationship, TimelineEvent, VectorDocument,
};
use crate::models::storage::KnowledgeGraphData;

/// Keyword matching in full-text queries is capped at this many terms.
pub const KEYWORD_MATCH_CAP: usize = 5;

/// Graph expansion never walks deeper than this.
pub const MAX_EXPANSION_DEPTH: u32 = 5;

#[derive(Debug, thiserror::Error)]
pub enum AdapterError {
    #[error("backend unavailable: {0}")]
    Unavailable(String),

    #[error("backend timeout: {0}")]
    Timeout(String),

    #[error("schema error: {0}")]
    Schema(String),

    #[error("transport error: {0}")]
    Transport(String),
}

impl AdapterError {
    /// Only transport-level failures are worth retrying.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Transport(_))
    }
}

// ============================================================================
// Timeline contract
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct TimeRange {
    pub start: DateTime<Utc>,
    pub end: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TimelineOrder {
    #[default]
    Timestamp,
    RelevanceScore,
    ImportanceScore,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TimelineQuery {
    pub user_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub session_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub workspace_id: Option<String>,
    #[serde(default)]
    pub keywords: Vec<String>,
    #[serde(default)]
    pub time_ranges: Vec<TimeRange>,
    /// Direct window; used exclusively when both ends are set.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub start_time: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub end_time: Option<DateTime<Utc>>,
    /// Relative window like "1 hour" or "30 minutes", anchored at now.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub time_window: Option<String>,
    #[serde(default)]
    pub event_types: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub intent: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub search_text: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub min_importance: Option<i32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub min_relevance: Option<f64>,
    #[serde(default)]
    pub order_by: TimelineOrder,
    pub limit: usize,
    #[serde(default)]
    pub offset: usize,
}

impl TimelineQuery {
    /// Precedence: direct start/end pair, then explicit ranges, then the
    /// relative window.
    pub fn effective_ranges(&self) -> Vec<TimeRange> {
        if let (Some(start), Some(end)) = (self.start_time, self.end_time) {
            return vec![TimeRange { start, end }];
        }
        if !self.time_ranges.is_empty() {
            return self.time_ranges.clone();
        }
        if let Some(window) = self.time_window.as_deref().and_then(parse_time_window) {
            let end = Utc::now();
            return vec![TimeRange { start: end - window, end }];
        }
        Vec::new()
    }
}

/// Parse "1 hour" / "30 minutes" / "2 days" style windows.
pub fn parse_time_window(input: &str) -> Option<ChronoDuration> {
    let mut parts = input.split_whitespace();
    let amount: i64 = parts.next()?.parse().ok()?;
    let unit = parts.next()?.trim_end_matches('s');
    match unit {
        "second" | "sec" => Some(ChronoDuration::seconds(amount)),
        "minute" | "min" => Some(ChronoDuration::minutes(amount)),
        "hour" | "hr" => Some(ChronoDuration::hours(amount)),
        "day" => Some(ChronoDuration::days(amount)),
        "week" => Some(ChronoDuration::weeks(amount)),
        _ => None,
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TimelinePage {
    pub events: Vec<TimelineEvent>,
    /// Matches before pagination.
    pub total: usize,
}

#[async_trait]
pub trait TimelineStore: Send + Sync {
    async fn store_event(&self, event: TimelineEvent) -> Result<String, AdapterError>;

    async fn retrieve_events(&self, query: &TimelineQuery) -> Result<TimelinePage, AdapterError>;

    async fn health_check(&self) -> Result<(), AdapterError>;

    async fn close(&self) {}
}

// ============================================================================
// Knowledge contract
// ============================================================================

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct GraphExpansion {
    pub start_nodes: Vec<String>,
    /// Clamped to [`MAX_EXPANSION_DEPTH`].
    pub max_depth: u32,
    pub max_nodes: usize,
    pub min_weight: f64,
    #[serde(default)]
    pub relation_types: Vec<String>,
    #[serde(default)]
    pub node_types: Vec<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct GraphPage {
    pub nodes: Vec<KnowledgeNode>,
    pub relationships: Vec<KnowledgeRelationship>,
    pub paths: Vec<KnowledgePath>,
    pub total: usize,
}

#[async_trait]
pub trait KnowledgeStore: Send + Sync {
    /// Write path used by the storage engine: persist the concepts and
    /// relationships of one structured memory.
    async fn store_concepts(&self, data: &KnowledgeGraphData) -> Result<String, AdapterError>;

    async fn expand_graph(&self, expansion: &GraphExpansion) -> Result<GraphPage, AdapterError>;

    async fn related_concepts(&self, concepts: &[String]) -> Result<Vec<String>, AdapterError>;

    async fn health_check(&self) -> Result<(), AdapterError>;

    async fn close(&self) {}
}

// ============================================================================
// Vector contract
// ============================================================================

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct VectorQuery {
    pub query_text: String,
    /// When absent the adapter derives a deterministic vector from
    /// `query_text`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub query_vector: Option<Vec<f64>>,
    pub top_k: usize,
    pub min_score: f64,
    #[serde(default)]
    pub filters: HashMap<String, serde_json::Value>,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct VectorPage {
    pub documents: Vec<VectorDocument>,
    pub query_time: Duration,
}

#[async_trait]
pub trait VectorStore: Send + Sync {
    async fn search(&self, query: &VectorQuery) -> Result<VectorPage, AdapterError>;

    async fn store_document(&self, document: VectorDocument) -> Result<String, AdapterError>;

    async fn health_check(&self) -> Result<(), AdapterError>;

    async fn close(&self) {}
}

#[cfg(test)]
mod contract_tests {
    use super::*;

    #[test]
    fn direct_window_takes_precedence() {
        let start = Utc::now() - ChronoDuration::hours(2);
        let end = Utc::now();
        let query = TimelineQuery {
            start_time: Some(start),
            end_time: Some(end),
            time_ranges: vec![TimeRange {
                start: start - ChronoDuration::days(30),
                end: start - ChronoDuration::days(29),
            }],
            time_window: Some("1 hour".to_string()),
            ..TimelineQuery::default()
        };

        let ranges = query.effective_ranges();
        assert_eq!(ranges.len(), 1);
        assert_eq!(ranges[0].start, start);
        assert_eq!(ranges[0].end, end);
    }

    #[test]
    fn time_window_used_last() {
        let query = TimelineQuery {
            time_window: Some("1 hour".to_string()),
            ..TimelineQuery::default()
        };
        let ranges = query.effective_ranges();
        assert_eq!(ranges.len(), 1);
        let span = ranges[0].end - ranges[0].start;
        assert_eq!(span, ChronoDuration::hours(1));
    }

    #[test]
    fn window_parsing_units() {
        assert_eq!(parse_time_window("1 hour"), Some(ChronoDuration::hours(1)));
        assert_eq!(parse_time_window("30 minutes"), Some(ChronoDuration::minutes(30)));
        assert_eq!(parse_time_window("2 days"), Some(ChronoDuration::days(2)));
        assert_eq!(parse_time_window("soon"), None);
    }

    #[test]
    fn partial_direct_window_ignored() {
        let query = TimelineQuery {
            start_time: Some(Utc::now()),
            ..TimelineQuery::default()
        };
        assert!(query.effective_ranges().is_empty());
    }
}
