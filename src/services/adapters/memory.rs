//! In-memory reference adapters
//!
//! Small, dependency-free implementations of the three backend
//! contracts. They double as the reference semantics for full-text
//! matching and vector similarity, and back the engine test suites.

use async_trait::async_trait;
use dashmap::DashMap;
use sha2::{Digest, Sha256};
use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::RwLock;
use std::time::Instant;
use uuid::Uuid;

use crate::models::retrieval::{
    KnowledgeNode, KnowledgePath, KnowledgeRelationship, TimelineEvent, VectorDocument,
};
use crate::models::storage::KnowledgeGraphData;

use super::{
    AdapterError, GraphExpansion, GraphPage, KnowledgeStore, TimelineOrder, TimelinePage,
    TimelineQuery, TimelineStore, VectorPage, VectorQuery, VectorStore, KEYWORD_MATCH_CAP,
    MAX_EXPANSION_DEPTH,
};

// ============================================================================
// Timeline
// ============================================================================

#[derive(Default)]
pub struct InMemoryTimelineStore {
    events: RwLock<Vec<TimelineEvent>>,
}

impl InMemoryTimelineStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn matches(query: &TimelineQuery, event: &TimelineEvent) -> bool {
        if event.user_id != query.user_id {
            return false;
        }
        if let Some(session) = &query.session_id
            && &event.session_id != session
        {
            return false;
        }
        if let Some(workspace) = &query.workspace_id
            && &event.workspace_id != workspace
        {
            return false;
        }
        if !query.event_types.is_empty() && !query.event_types.contains(&event.event_type) {
            return false;
        }
        if let Some(intent) = &query.intent
            && &event.intent != intent
        {
            return false;
        }
        if let Some(min) = query.min_importance
            && event.importance_score < min
        {
            return false;
        }
        if let Some(min) = query.min_relevance
            && event.relevance_score < min
        {
            return false;
        }

        let ranges = query.effective_ranges();
        if !ranges.is_empty()
            && !ranges
                .iter()
                .any(|r| event.timestamp >= r.start && event.timestamp <= r.end)
        {
            return false;
        }

        Self::text_matches(query, event)
    }

    /// Full-text semantics: tokenized OR match of `search_text` over
    /// title+content+keywords, combined with LIKE-ANY keyword matching
    /// over keywords and (title OR content), keywords capped at 5.
    fn text_matches(query: &TimelineQuery, event: &TimelineEvent) -> bool {
        let has_search = query
            .search_text
            .as_deref()
            .map(|s| !s.trim().is_empty())
            .unwrap_or(false);
        let has_keywords = !query.keywords.is_empty();
        if !has_search && !has_keywords {
            return true;
        }

        let haystack = format!(
            "{} {} {}",
            event.title,
            event.content,
            event.keywords.join(" ")
        )
        .to_lowercase();

        if has_search {
            let tokens = query
                .search_text
                .as_deref()
                .unwrap_or_default()
                .to_lowercase();
            if tokens
                .split_whitespace()
                .any(|token| haystack.contains(token))
            {
                return true;
            }
        }

        if has_keywords {
            let title_content =
                format!("{} {}", event.title, event.content).to_lowercase();
            let event_keywords: Vec<String> =
                event.keywords.iter().map(|k| k.to_lowercase()).collect();
            for keyword in query.keywords.iter().take(KEYWORD_MATCH_CAP) {
                let keyword = keyword.to_lowercase();
                if event_keywords.iter().any(|k| k.contains(&keyword))
                    || title_content.contains(&keyword)
                {
                    return true;
                }
            }
        }

        false
    }
}

#[async_trait]
impl TimelineStore for InMemoryTimelineStore {
    async fn store_event(&self, mut event: TimelineEvent) -> Result<String, AdapterError> {
        if event.id.is_empty() {
            event.id = Uuid::new_v4().to_string();
        }
        let id = event.id.clone();
        self.events
            .write()
            .expect("timeline store lock poisoned")
            .push(event);
        Ok(id)
    }

    async fn retrieve_events(&self, query: &TimelineQuery) -> Result<TimelinePage, AdapterError> {
        let events = self.events.read().expect("timeline store lock poisoned");
        let mut matched: Vec<TimelineEvent> = events
            .iter()
            .filter(|e| Self::matches(query, e))
            .cloned()
            .collect();

        match query.order_by {
            TimelineOrder::Timestamp => matched.sort_by(|a, b| b.timestamp.cmp(&a.timestamp)),
            TimelineOrder::RelevanceScore => matched.sort_by(|a, b| {
                b.relevance_score
                    .partial_cmp(&a.relevance_score)
                    .unwrap_or(std::cmp::Ordering::Equal)
            }),
            TimelineOrder::ImportanceScore => {
                matched.sort_by(|a, b| b.importance_score.cmp(&a.importance_score))
            },
        }

        let total = matched.len();
        let limit = if query.limit == 0 { total } else { query.limit };
        let events = matched
            .into_iter()
            .skip(query.offset)
            .take(limit)
            .collect();
        Ok(TimelinePage { events, total })
    }

    async fn health_check(&self) -> Result<(), AdapterError> {
        Ok(())
    }
}

// ============================================================================
// Knowledge graph
// ============================================================================

#[derive(Default)]
pub struct InMemoryKnowledgeStore {
    nodes: DashMap<String, KnowledgeNode>,
    /// Concept name (lowercased) -> node id.
    name_index: DashMap<String, String>,
    edges: RwLock<Vec<KnowledgeRelationship>>,
}

impl InMemoryKnowledgeStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn node_id_for(&self, name: &str) -> Option<String> {
        self.name_index
            .get(&name.to_lowercase())
            .map(|id| id.clone())
    }

    fn upsert_node(&self, name: &str, node_type: &str, importance: f64) -> String {
        if let Some(id) = self.node_id_for(name) {
            return id;
        }
        let id = Uuid::new_v4().to_string();
        self.nodes.insert(
            id.clone(),
            KnowledgeNode {
                id: id.clone(),
                name: name.to_string(),
                node_type: node_type.to_string(),
                properties: HashMap::new(),
                importance,
            },
        );
        self.name_index.insert(name.to_lowercase(), id.clone());
        id
    }

    fn neighbors(&self, node_id: &str, expansion: &GraphExpansion) -> Vec<KnowledgeRelationship> {
        let edges = self.edges.read().expect("knowledge store lock poisoned");
        edges
            .iter()
            .filter(|e| (e.source == node_id || e.target == node_id) && e.strength >= expansion.min_weight)
            .filter(|e| {
                expansion.relation_types.is_empty()
                    || expansion.relation_types.contains(&e.relation_type)
            })
            .cloned()
            .collect()
    }
}

#[async_trait]
impl KnowledgeStore for InMemoryKnowledgeStore {
    async fn store_concepts(&self, data: &KnowledgeGraphData) -> Result<String, AdapterError> {
        let mut first_id = String::new();
        for concept in &data.concepts {
            let id = self.upsert_node(&concept.name, &concept.concept_type, concept.importance);
            if let Some(mut node) = self.nodes.get_mut(&id) {
                node.properties.extend(concept.properties.clone());
                // Importance only ratchets upward on re-observation
                node.importance = node.importance.max(concept.importance);
            }
            if first_id.is_empty() {
                first_id = id;
            }
        }

        let mut edges = self.edges.write().expect("knowledge store lock poisoned");
        for relationship in &data.relationships {
            let source = self
                .node_id_for(&relationship.source)
                .unwrap_or_else(|| self.upsert_node(&relationship.source, "", 0.0));
            let target = self
                .node_id_for(&relationship.target)
                .unwrap_or_else(|| self.upsert_node(&relationship.target, "", 0.0));
            edges.push(KnowledgeRelationship {
                id: Uuid::new_v4().to_string(),
                source,
                target,
                relation_type: relationship.relation_type.clone(),
                strength: relationship.strength,
                description: relationship.description.clone(),
            });
        }

        Ok(first_id)
    }

    async fn expand_graph(&self, expansion: &GraphExpansion) -> Result<GraphPage, AdapterError> {
        let max_depth = expansion.max_depth.min(MAX_EXPANSION_DEPTH);
        let max_nodes = if expansion.max_nodes == 0 { usize::MAX } else { expansion.max_nodes };

        let mut visited: HashSet<String> = HashSet::new();
        let mut nodes = Vec::new();
        let mut relationships: Vec<KnowledgeRelationship> = Vec::new();
        let mut paths = Vec::new();
        let mut queue: VecDeque<(String, u32, Vec<String>, Vec<String>, f64)> = VecDeque::new();

        for start in &expansion.start_nodes {
            // Start nodes may be ids or concept names
            let id = if self.nodes.contains_key(start) {
                Some(start.clone())
            } else {
                self.node_id_for(start)
            };
            if let Some(id) = id
                && visited.insert(id.clone())
            {
                queue.push_back((id, 0, Vec::new(), Vec::new(), 1.0));
            }
        }

        while let Some((node_id, depth, path_nodes, path_edges, path_weight)) = queue.pop_front() {
            if nodes.len() >= max_nodes {
                break;
            }

            let Some(node) = self.nodes.get(&node_id).map(|n| n.clone()) else {
                continue;
            };
            if !expansion.node_types.is_empty()
                && !expansion.node_types.contains(&node.node_type)
                && depth > 0
            {
                continue;
            }

            let mut walked_nodes = path_nodes.clone();
            walked_nodes.push(node_id.clone());
            nodes.push(node);

            if walked_nodes.len() > 1 {
                paths.push(KnowledgePath {
                    node_ids: walked_nodes.clone(),
                    relationship_ids: path_edges.clone(),
                    weight: path_weight,
                });
            }

            if depth >= max_depth {
                continue;
            }

            for edge in self.neighbors(&node_id, expansion) {
                let next = if edge.source == node_id { &edge.target } else { &edge.source };
                if visited.insert(next.clone()) {
                    let mut next_edges = path_edges.clone();
                    next_edges.push(edge.id.clone());
                    queue.push_back((
                        next.clone(),
                        depth + 1,
                        walked_nodes.clone(),
                        next_edges,
                        path_weight * edge.strength,
                    ));
                }
                if !relationships.iter().any(|r| r.id == edge.id) {
                    relationships.push(edge);
                }
            }
        }

        let total = nodes.len();
        Ok(GraphPage { nodes, relationships, paths, total })
    }

    async fn related_concepts(&self, concepts: &[String]) -> Result<Vec<String>, AdapterError> {
        let mut related = Vec::new();
        let mut seen: HashSet<String> = concepts.iter().map(|c| c.to_lowercase()).collect();

        let edges = self.edges.read().expect("knowledge store lock poisoned");
        for concept in concepts {
            let Some(id) = self.node_id_for(concept) else { continue };
            for edge in edges.iter() {
                let neighbor_id = if edge.source == id {
                    &edge.target
                } else if edge.target == id {
                    &edge.source
                } else {
                    continue;
                };
                if let Some(node) = self.nodes.get(neighbor_id)
                    && seen.insert(node.name.to_lowercase())
                {
                    related.push(node.name.clone());
                }
            }
        }
        Ok(related)
    }

    async fn health_check(&self) -> Result<(), AdapterError> {
        Ok(())
    }
}

// ============================================================================
// Vector index
// ============================================================================

/// Dimension of derived vectors.
const VECTOR_DIM: usize = 64;

#[derive(Default)]
pub struct InMemoryVectorStore {
    documents: RwLock<Vec<VectorDocument>>,
}

impl InMemoryVectorStore {
    pub fn new() -> Self {
        Self::default()
    }
}

/// Deterministic content-derived vector: each lowercased token hashes
/// into a signed bucket, the accumulated vector is L2-normalized. The
/// same text always produces the same unit vector.
pub fn derive_vector(content: &str) -> Vec<f64> {
    let mut vector = vec![0.0_f64; VECTOR_DIM];
    for token in content.to_lowercase().split_whitespace() {
        let digest = Sha256::digest(token.as_bytes());
        let bucket = usize::from(digest[0]) % VECTOR_DIM;
        let sign = if digest[1] & 1 == 0 { 1.0 } else { -1.0 };
        vector[bucket] += sign;
    }
    l2_normalize(&mut vector);
    vector
}

pub fn l2_normalize(vector: &mut [f64]) {
    let norm = vector.iter().map(|v| v * v).sum::<f64>().sqrt();
    if norm > 0.0 {
        for v in vector.iter_mut() {
            *v /= norm;
        }
    }
}

/// Cosine similarity; inputs are expected to be L2-normalized, so this
/// is a plain dot product with a length guard.
pub fn cosine_similarity(a: &[f64], b: &[f64]) -> f64 {
    if a.len() != b.len() || a.is_empty() {
        return 0.0;
    }
    a.iter().zip(b.iter()).map(|(x, y)| x * y).sum()
}

#[async_trait]
impl VectorStore for InMemoryVectorStore {
    async fn search(&self, query: &VectorQuery) -> Result<VectorPage, AdapterError> {
        let started = Instant::now();

        let query_vector = match &query.query_vector {
            Some(vector) => {
                let mut v = vector.clone();
                l2_normalize(&mut v);
                v
            },
            None => derive_vector(&query.query_text),
        };

        let documents = self.documents.read().expect("vector store lock poisoned");
        let mut scored: Vec<VectorDocument> = documents
            .iter()
            .filter(|d| {
                query.filters.iter().all(|(key, expected)| {
                    d.metadata.get(key).map(|v| v == expected).unwrap_or(false)
                })
            })
            .map(|d| {
                let mut doc = d.clone();
                doc.score = cosine_similarity(&query_vector, &d.vector);
                doc
            })
            .filter(|d| d.score >= query.min_score)
            .collect();

        scored.sort_by(|a, b| b.score.partial_cmp(&a.score).unwrap_or(std::cmp::Ordering::Equal));
        if query.top_k > 0 {
            scored.truncate(query.top_k);
        }

        Ok(VectorPage { documents: scored, query_time: started.elapsed() })
    }

    async fn store_document(&self, mut document: VectorDocument) -> Result<String, AdapterError> {
        if document.id.is_empty() {
            document.id = Uuid::new_v4().to_string();
        }
        if document.vector.is_empty() {
            document.vector = derive_vector(&document.content);
        } else {
            l2_normalize(&mut document.vector);
        }
        let id = document.id.clone();
        self.documents
            .write()
            .expect("vector store lock poisoned")
            .push(document);
        Ok(id)
    }

    async fn health_check(&self) -> Result<(), AdapterError> {
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;

    fn event(id: &str, user: &str, title: &str, content: &str, keywords: &[&str]) -> TimelineEvent {
        TimelineEvent {
            id: id.to_string(),
            user_id: user.to_string(),
            session_id: "s1".to_string(),
            workspace_id: "w1".to_string(),
            timestamp: Utc::now(),
            duration_ms: None,
            event_type: "note".to_string(),
            title: title.to_string(),
            content: content.to_string(),
            summary: None,
            related_files: vec![],
            related_concepts: vec![],
            parent_event_id: None,
            intent: String::new(),
            keywords: keywords.iter().map(|k| k.to_string()).collect(),
            entities: serde_json::Value::Null,
            categories: vec![],
            importance_score: 5,
            relevance_score: 0.5,
            created_at: Utc::now(),
            updated_at: Utc::now(),
        }
    }

    #[tokio::test]
    async fn timeline_full_text_or_semantics() {
        let store = InMemoryTimelineStore::new();
        store
            .store_event(event("a", "u1", "Redis eviction", "cache pressure spiked", &["redis"]))
            .await
            .unwrap();
        store
            .store_event(event("b", "u1", "standup notes", "talked about deploys", &["deploy"]))
            .await
            .unwrap();

        let query = TimelineQuery {
            user_id: "u1".to_string(),
            search_text: Some("eviction nonsense".to_string()),
            limit: 10,
            ..TimelineQuery::default()
        };
        let page = store.retrieve_events(&query).await.unwrap();
        // "eviction" token matches event a even though "nonsense" matches nothing
        assert_eq!(page.total, 1);
        assert_eq!(page.events[0].id, "a");
    }

    #[tokio::test]
    async fn timeline_keyword_like_any() {
        let store = InMemoryTimelineStore::new();
        store
            .store_event(event("a", "u1", "Redis eviction", "cache pressure", &["redis"]))
            .await
            .unwrap();

        let query = TimelineQuery {
            user_id: "u1".to_string(),
            keywords: vec!["pressure".to_string()],
            limit: 10,
            ..TimelineQuery::default()
        };
        // keyword hits content even though it is not in the keyword list
        assert_eq!(store.retrieve_events(&query).await.unwrap().total, 1);
    }

    #[tokio::test]
    async fn timeline_filters_user_and_window() {
        let store = InMemoryTimelineStore::new();
        let mut old = event("old", "u1", "old event", "stale", &[]);
        old.timestamp = Utc::now() - chrono::Duration::days(10);
        store.store_event(old).await.unwrap();
        store
            .store_event(event("fresh", "u1", "fresh event", "recent", &[]))
            .await
            .unwrap();
        store
            .store_event(event("other", "u2", "someone else", "hidden", &[]))
            .await
            .unwrap();

        let query = TimelineQuery {
            user_id: "u1".to_string(),
            start_time: Some(Utc::now() - chrono::Duration::days(1)),
            end_time: Some(Utc::now() + chrono::Duration::minutes(1)),
            limit: 10,
            ..TimelineQuery::default()
        };
        let page = store.retrieve_events(&query).await.unwrap();
        assert_eq!(page.total, 1);
        assert_eq!(page.events[0].id, "fresh");
    }

    #[tokio::test]
    async fn knowledge_expansion_walks_edges() {
        use crate::models::storage::{ConceptData, RelationshipData};

        let store = InMemoryKnowledgeStore::new();
        let data = KnowledgeGraphData {
            concepts: vec![
                ConceptData {
                    name: "Redis".to_string(),
                    concept_type: "DB".to_string(),
                    properties: HashMap::new(),
                    importance: 0.9,
                },
                ConceptData {
                    name: "Cache".to_string(),
                    concept_type: "Pattern".to_string(),
                    properties: HashMap::new(),
                    importance: 0.7,
                },
            ],
            relationships: vec![RelationshipData {
                source: "Redis".to_string(),
                target: "Cache".to_string(),
                relation_type: "implements".to_string(),
                strength: 0.8,
                description: String::new(),
            }],
        };
        store.store_concepts(&data).await.unwrap();

        let page = store
            .expand_graph(&GraphExpansion {
                start_nodes: vec!["Redis".to_string()],
                max_depth: 2,
                max_nodes: 10,
                min_weight: 0.1,
                ..GraphExpansion::default()
            })
            .await
            .unwrap();

        assert_eq!(page.nodes.len(), 2);
        assert_eq!(page.relationships.len(), 1);
        assert_eq!(page.paths.len(), 1);

        let related = store
            .related_concepts(&["Redis".to_string()])
            .await
            .unwrap();
        assert_eq!(related, vec!["Cache".to_string()]);
    }

    #[tokio::test]
    async fn knowledge_min_weight_prunes() {
        use crate::models::storage::{ConceptData, RelationshipData};

        let store = InMemoryKnowledgeStore::new();
        let concept = |name: &str| ConceptData {
            name: name.to_string(),
            concept_type: String::new(),
            properties: HashMap::new(),
            importance: 0.5,
        };
        store
            .store_concepts(&KnowledgeGraphData {
                concepts: vec![concept("A"), concept("B")],
                relationships: vec![RelationshipData {
                    source: "A".to_string(),
                    target: "B".to_string(),
                    relation_type: "weak".to_string(),
                    strength: 0.1,
                    description: String::new(),
                }],
            })
            .await
            .unwrap();

        let page = store
            .expand_graph(&GraphExpansion {
                start_nodes: vec!["A".to_string()],
                max_depth: 3,
                max_nodes: 10,
                min_weight: 0.5,
                ..GraphExpansion::default()
            })
            .await
            .unwrap();
        assert_eq!(page.nodes.len(), 1);
        assert!(page.relationships.is_empty());
    }

    #[test]
    fn derived_vectors_deterministic_and_normalized() {
        let a = derive_vector("hello vector world");
        let b = derive_vector("hello vector world");
        assert_eq!(a, b);

        let norm: f64 = a.iter().map(|v| v * v).sum::<f64>().sqrt();
        assert!((norm - 1.0).abs() < 1e-9);

        // Identical text has cosine 1 with itself
        assert!((cosine_similarity(&a, &b) - 1.0).abs() < 1e-9);
    }

    #[tokio::test]
    async fn vector_search_ranks_by_cosine() {
        let store = InMemoryVectorStore::new();
        let doc = |id: &str, content: &str| VectorDocument {
            id: id.to_string(),
            content: content.to_string(),
            vector: vec![],
            score: 0.0,
            metadata: HashMap::new(),
        };
        store
            .store_document(doc("exact", "redis cache eviction policy"))
            .await
            .unwrap();
        store
            .store_document(doc("far", "holiday photo album from trip"))
            .await
            .unwrap();

        let page = store
            .search(&VectorQuery {
                query_text: "redis cache eviction policy".to_string(),
                top_k: 2,
                min_score: 0.0,
                ..VectorQuery::default()
            })
            .await
            .unwrap();

        assert_eq!(page.documents[0].id, "exact");
        assert!((page.documents[0].score - 1.0).abs() < 1e-9);
        assert!(page.documents[0].score > page.documents[1].score);
    }

    #[tokio::test]
    async fn vector_filters_and_min_score() {
        let store = InMemoryVectorStore::new();
        let mut doc = VectorDocument {
            id: "tagged".to_string(),
            content: "some tagged content here".to_string(),
            vector: vec![],
            score: 0.0,
            metadata: HashMap::new(),
        };
        doc.metadata
            .insert("workspace".to_string(), serde_json::json!("w1"));
        store.store_document(doc).await.unwrap();

        let mut query = VectorQuery {
            query_text: "some tagged content here".to_string(),
            top_k: 5,
            min_score: 0.0,
            ..VectorQuery::default()
        };
        query
            .filters
            .insert("workspace".to_string(), serde_json::json!("w2"));
        assert!(store.search(&query).await.unwrap().documents.is_empty());

        query
            .filters
            .insert("workspace".to_string(), serde_json::json!("w1"));
        assert_eq!(store.search(&query).await.unwrap().documents.len(), 1);
    }
}
