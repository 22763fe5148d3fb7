// Common test utilities and helpers

use std::sync::Arc;

use crate::models::storage::{
    ConceptData, KnowledgeGraphData, StorageAnalysis, StorageRecommendation, StorageRequest,
    TimelineData, VectorData,
};
use crate::services::{InMemoryKnowledgeStore, InMemoryTimelineStore, InMemoryVectorStore};
use crate::{Config, MemoryFabric};

/// A fabric wired against fresh in-memory adapters. Rate limits are
/// opened wide so tests never sit in the token bucket.
pub fn create_test_fabric() -> MemoryFabric {
    let mut config = Config::default();
    config.performance.rate_limit = 100_000;
    MemoryFabric::new(
        config,
        Some(Arc::new(InMemoryTimelineStore::new())),
        Some(Arc::new(InMemoryKnowledgeStore::new())),
        Some(Arc::new(InMemoryVectorStore::new())),
    )
}

pub fn storage_request(user_id: &str, content: &str) -> StorageRequest {
    StorageRequest {
        user_id: user_id.to_string(),
        session_id: "s1".to_string(),
        workspace_id: "w1".to_string(),
        content: content.to_string(),
        metadata: Default::default(),
    }
}

/// A fully-populated structuring payload for one memory event.
pub fn full_analysis(title: &str, concept: &str, prose: &str) -> StorageAnalysis {
    StorageAnalysis {
        timeline_data: Some(TimelineData {
            title: title.to_string(),
            content: prose.to_string(),
            event_type: "note".to_string(),
            keywords: title
                .split_whitespace()
                .map(|w| w.to_lowercase())
                .collect(),
            importance_score: 7,
            tech_stack: vec![],
            project_context: String::new(),
        }),
        knowledge_graph_data: Some(KnowledgeGraphData {
            concepts: vec![ConceptData {
                name: concept.to_string(),
                concept_type: "tech".to_string(),
                properties: Default::default(),
                importance: 0.8,
            }],
            relationships: vec![],
        }),
        vector_data: Some(VectorData {
            content: prose.to_string(),
            semantic_tags: vec![concept.to_lowercase()],
            context_summary: String::new(),
            relevance_score: 0.9,
        }),
        storage_recommendation: StorageRecommendation {
            timeline_priority: 0.9,
            knowledge_priority: 0.8,
            vector_priority: 0.9,
            reasoning: String::new(),
        },
    }
}
