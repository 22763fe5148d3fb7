//! Retrieval fan-out engine tests
//!
//! Fusion semantics (dedup, order, truncation), the legacy fallback,
//! cache behavior, the time-recall path and per-backend degradation,
//! all against scripted adapter doubles.

use async_trait::async_trait;
use chrono::Utc;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use crate::config::{DimensionFlags, FusionMethod};
use crate::models::retrieval::{ResultSource, RetrievalResult, TimelineEvent, VectorDocument};
use crate::models::semantic::{
    SemanticAnalysisResult, SmartAnalysis, TimeWindow, INTENT_TIME_RECALL,
};
use crate::models::storage::KnowledgeGraphData;
use crate::services::adapters::{
    AdapterError, GraphExpansion, GraphPage, KnowledgeStore, TimelinePage, TimelineQuery,
    TimelineStore, VectorPage, VectorQuery, VectorStore,
};

use super::{fuse, MultiDimRetrievalEngine, RetrievalOptions, RetrievalQuery};

// ============================================================================
// Adapter doubles
// ============================================================================

fn event(id: &str, relevance: f64) -> TimelineEvent {
    TimelineEvent {
        id: id.to_string(),
        user_id: "u1".to_string(),
        session_id: String::new(),
        workspace_id: String::new(),
        timestamp: Utc::now(),
        duration_ms: None,
        event_type: "note".to_string(),
        title: format!("event {id}"),
        content: "content".to_string(),
        summary: None,
        related_files: vec![],
        related_concepts: vec![],
        parent_event_id: None,
        intent: String::new(),
        keywords: vec![],
        entities: serde_json::Value::Null,
        categories: vec![],
        importance_score: 5,
        relevance_score: relevance,
        created_at: Utc::now(),
        updated_at: Utc::now(),
    }
}

fn document(id: &str, score: f64) -> VectorDocument {
    VectorDocument {
        id: id.to_string(),
        content: format!("doc {id}"),
        vector: vec![],
        score,
        metadata: HashMap::new(),
    }
}

/// Timeline store that returns a scripted page and records the query.
struct ScriptedTimeline {
    events: Vec<TimelineEvent>,
    seen: Mutex<Option<TimelineQuery>>,
    called: AtomicBool,
}

impl ScriptedTimeline {
    fn new(events: Vec<TimelineEvent>) -> Arc<Self> {
        Arc::new(Self { events, seen: Mutex::new(None), called: AtomicBool::new(false) })
    }
}

#[async_trait]
impl TimelineStore for ScriptedTimeline {
    async fn store_event(&self, _event: TimelineEvent) -> Result<String, AdapterError> {
        unreachable!("read-only double")
    }

    async fn retrieve_events(&self, query: &TimelineQuery) -> Result<TimelinePage, AdapterError> {
        self.called.store(true, Ordering::SeqCst);
        *self.seen.lock().unwrap() = Some(query.clone());
        Ok(TimelinePage { events: self.events.clone(), total: self.events.len() })
    }

    async fn health_check(&self) -> Result<(), AdapterError> {
        Ok(())
    }
}

struct ScriptedVector {
    documents: Vec<VectorDocument>,
    called: AtomicBool,
}

impl ScriptedVector {
    fn new(documents: Vec<VectorDocument>) -> Arc<Self> {
        Arc::new(Self { documents, called: AtomicBool::new(false) })
    }
}

#[async_trait]
impl VectorStore for ScriptedVector {
    async fn search(&self, _query: &VectorQuery) -> Result<VectorPage, AdapterError> {
        self.called.store(true, Ordering::SeqCst);
        Ok(VectorPage { documents: self.documents.clone(), query_time: Duration::ZERO })
    }

    async fn store_document(&self, _document: VectorDocument) -> Result<String, AdapterError> {
        unreachable!("read-only double")
    }

    async fn health_check(&self) -> Result<(), AdapterError> {
        Ok(())
    }
}

struct FailingKnowledge;

#[async_trait]
impl KnowledgeStore for FailingKnowledge {
    async fn store_concepts(&self, _data: &KnowledgeGraphData) -> Result<String, AdapterError> {
        Err(AdapterError::Unavailable("graph down".to_string()))
    }

    async fn expand_graph(&self, _expansion: &GraphExpansion) -> Result<GraphPage, AdapterError> {
        Err(AdapterError::Unavailable("graph down".to_string()))
    }

    async fn related_concepts(&self, _concepts: &[String]) -> Result<Vec<String>, AdapterError> {
        Err(AdapterError::Unavailable("graph down".to_string()))
    }

    async fn health_check(&self) -> Result<(), AdapterError> {
        Err(AdapterError::Unavailable("graph down".to_string()))
    }
}

// ============================================================================
// Fixtures
// ============================================================================

fn analysis() -> SemanticAnalysisResult {
    let mut analysis = SemanticAnalysisResult::with_intent("search");
    analysis.keywords = vec!["redis".to_string(), "cache".to_string()];
    analysis
}

fn query(analysis: SemanticAnalysisResult) -> RetrievalQuery {
    RetrievalQuery {
        user_id: "u1".to_string(),
        session_id: String::new(),
        workspace_id: String::new(),
        analysis,
        max_results: 0,
        min_relevance: 0.0,
        request_id: String::new(),
    }
}

fn fast_options() -> RetrievalOptions {
    RetrievalOptions {
        rate_limit: 100_000,
        ..RetrievalOptions::default()
    }
}

// ============================================================================
// Fusion
// ============================================================================

fn make(id: &str, source: ResultSource, score: f64) -> RetrievalResult {
    RetrievalResult {
        id: id.to_string(),
        source,
        content: String::new(),
        title: String::new(),
        score,
        relevance: score,
        timestamp: None,
        metadata: HashMap::new(),
    }
}

#[test]
fn fuse_dedups_and_ranks() {
    let results = vec![
        make("A", ResultSource::Timeline, 0.9),
        make("B", ResultSource::Timeline, 0.5),
        make("A", ResultSource::Vector, 0.7),
        make("C", ResultSource::Vector, 0.8),
    ];
    let fused = fuse(results, 10, FusionMethod::Weighted);

    let ids: Vec<&str> = fused.iter().map(|r| r.id.as_str()).collect();
    assert_eq!(ids, vec!["A", "C", "B"]);
    // Collision kept the higher-scored timeline entry
    assert_eq!(fused[0].source, ResultSource::Timeline);
    assert!((fused[0].score - 0.9).abs() < 1e-9);
}

#[test]
fn fuse_collision_keeps_higher_score_regardless_of_order() {
    let results = vec![
        make("A", ResultSource::Vector, 0.7),
        make("A", ResultSource::Timeline, 0.9),
    ];
    let fused = fuse(results, 10, FusionMethod::Weighted);
    assert_eq!(fused.len(), 1);
    assert_eq!(fused[0].source, ResultSource::Timeline);
}

#[test]
fn fuse_is_stable_for_equal_relevance() {
    let results = vec![
        make("first", ResultSource::Timeline, 0.5),
        make("second", ResultSource::Knowledge, 0.5),
        make("third", ResultSource::Vector, 0.5),
    ];
    let fused = fuse(results, 10, FusionMethod::Weighted);
    let ids: Vec<&str> = fused.iter().map(|r| r.id.as_str()).collect();
    assert_eq!(ids, vec!["first", "second", "third"]);
}

#[test]
fn fuse_truncates_to_budget() {
    let results = (0..10)
        .map(|i| make(&format!("r{i}"), ResultSource::Vector, 1.0 - i as f64 * 0.05))
        .collect();
    let fused = fuse(results, 3, FusionMethod::Weighted);
    assert_eq!(fused.len(), 3);

    // Ids are pairwise unique
    let mut ids: Vec<&str> = fused.iter().map(|r| r.id.as_str()).collect();
    ids.dedup();
    assert_eq!(ids.len(), 3);
}

// ============================================================================
// Engine behavior
// ============================================================================

#[tokio::test]
async fn cross_backend_dedup_scenario() {
    let timeline = ScriptedTimeline::new(vec![event("A", 0.9), event("B", 0.5)]);
    let vector = ScriptedVector::new(vec![document("A", 0.7), document("C", 0.8)]);

    let mut options = fast_options();
    options.dimensions.knowledge_enabled = false;
    let engine = MultiDimRetrievalEngine::new(options, Some(timeline), None, Some(vector));

    let outcome = engine.retrieve(query(analysis())).await;

    let ids: Vec<&str> = outcome.results.iter().map(|r| r.id.as_str()).collect();
    assert_eq!(ids, vec!["A", "C", "B"]);
    assert!(!outcome.cache_hit);

    // Arrival order of parallel workers is unspecified
    let mut engines = outcome.engines_used.clone();
    engines.sort_unstable();
    assert_eq!(engines, vec!["timeline", "vector"]);
}

#[tokio::test]
async fn disabled_engine_reports_legacy() {
    let options = RetrievalOptions { enabled: false, ..fast_options() };
    let engine = MultiDimRetrievalEngine::new(options, None, None, None);

    let outcome = engine.retrieve(query(analysis())).await;
    assert!(outcome.results.is_empty());
    assert_eq!(outcome.engines_used, vec!["legacy"]);
}

#[tokio::test]
async fn all_dimensions_disabled_reports_legacy() {
    let options = RetrievalOptions {
        dimensions: DimensionFlags {
            timeline_enabled: false,
            knowledge_enabled: false,
            vector_enabled: false,
        },
        ..fast_options()
    };
    let engine = MultiDimRetrievalEngine::new(options, None, None, None);

    let outcome = engine.retrieve(query(analysis())).await;
    assert_eq!(outcome.engines_used, vec!["legacy"]);
}

#[tokio::test]
async fn repeated_request_id_hits_cache() {
    let timeline = ScriptedTimeline::new(vec![event("A", 0.9)]);
    let mut options = fast_options();
    options.dimensions.knowledge_enabled = false;
    options.dimensions.vector_enabled = false;
    let engine = MultiDimRetrievalEngine::new(options, Some(timeline), None, None);

    let mut q = query(analysis());
    q.request_id = "req-1".to_string();

    let first = engine.retrieve(q.clone()).await;
    assert!(!first.cache_hit);

    let second = engine.retrieve(q).await;
    assert!(second.cache_hit);
    assert_eq!(second.results.len(), first.results.len());

    let stats = engine.metrics().query_stats();
    assert_eq!(stats.total, 2);
    assert!((stats.cache_hit_rate - 0.5).abs() < 1e-9);
}

#[tokio::test]
async fn backend_failure_degrades_to_survivors() {
    let timeline = ScriptedTimeline::new(vec![event("A", 0.9)]);
    let engine = MultiDimRetrievalEngine::new(
        fast_options(),
        Some(timeline),
        Some(Arc::new(FailingKnowledge)),
        Some(ScriptedVector::new(vec![document("C", 0.8)])),
    );

    let outcome = engine.retrieve(query(analysis())).await;

    let mut engines = outcome.engines_used.clone();
    engines.sort_unstable();
    assert_eq!(engines, vec!["timeline", "vector"]);
    assert_eq!(outcome.results.len(), 2);
}

#[tokio::test]
async fn time_recall_bypasses_keyword_and_vector_paths() {
    let timeline = ScriptedTimeline::new(vec![event("A", 0.9)]);
    let vector = ScriptedVector::new(vec![document("C", 0.8)]);

    let engine = MultiDimRetrievalEngine::new(
        fast_options(),
        Some(timeline.clone()),
        None,
        Some(vector.clone()),
    );

    let window = TimeWindow {
        start_time: chrono::NaiveDateTime::parse_from_str(
            "2025-01-14 00:00:00",
            "%Y-%m-%d %H:%M:%S",
        )
        .unwrap(),
        end_time: chrono::NaiveDateTime::parse_from_str(
            "2025-01-14 23:59:59",
            "%Y-%m-%d %H:%M:%S",
        )
        .unwrap(),
    };
    let mut recall = SemanticAnalysisResult::with_intent(INTENT_TIME_RECALL);
    recall.smart_analysis = Some(SmartAnalysis { timeline_recall: Some(window) });

    let outcome = engine.retrieve(query(recall)).await;

    assert_eq!(outcome.engines_used, vec!["timeline"]);
    assert!(timeline.called.load(Ordering::SeqCst));
    assert!(!vector.called.load(Ordering::SeqCst));

    // The backend saw the direct window, not a keyword query
    let seen = timeline.seen.lock().unwrap().clone().unwrap();
    assert!(seen.start_time.is_some() && seen.end_time.is_some());
    assert!(seen.search_text.is_none());
    assert!(seen.keywords.is_empty());
}

#[tokio::test]
async fn default_window_applied_without_explicit_times() {
    let timeline = ScriptedTimeline::new(vec![]);
    let mut options = fast_options();
    options.dimensions.knowledge_enabled = false;
    options.dimensions.vector_enabled = false;
    let engine = MultiDimRetrievalEngine::new(options, Some(timeline.clone()), None, None);

    engine.retrieve(query(analysis())).await;

    let seen = timeline.seen.lock().unwrap().clone().unwrap();
    assert_eq!(seen.time_window.as_deref(), Some("24 hours"));
    assert!(seen.start_time.is_none());
}

#[tokio::test]
async fn key_concepts_preferred_over_keywords() {
    let timeline = ScriptedTimeline::new(vec![]);
    let mut options = fast_options();
    options.dimensions.knowledge_enabled = false;
    options.dimensions.vector_enabled = false;
    let engine = MultiDimRetrievalEngine::new(options, Some(timeline.clone()), None, None);

    let mut a = analysis();
    a.key_concepts = vec!["eviction policy".to_string()];
    engine.retrieve(query(a)).await;

    let seen = timeline.seen.lock().unwrap().clone().unwrap();
    assert_eq!(seen.keywords, vec!["eviction policy"]);
}

#[tokio::test]
async fn sequential_dispatch_matches_parallel_results() {
    let timeline = ScriptedTimeline::new(vec![event("A", 0.9), event("B", 0.5)]);
    let vector = ScriptedVector::new(vec![document("C", 0.8)]);

    let mut options = fast_options();
    options.enable_parallel = false;
    options.dimensions.knowledge_enabled = false;
    let engine = MultiDimRetrievalEngine::new(options, Some(timeline), None, Some(vector));

    let outcome = engine.retrieve(query(analysis())).await;
    let ids: Vec<&str> = outcome.results.iter().map(|r| r.id.as_str()).collect();
    assert_eq!(ids, vec!["A", "C", "B"]);
}

#[tokio::test]
async fn max_results_budget_enforced() {
    let timeline = ScriptedTimeline::new(
        (0..30).map(|i| event(&format!("e{i}"), 0.9)).collect(),
    );
    let mut options = fast_options();
    options.dimensions.knowledge_enabled = false;
    options.dimensions.vector_enabled = false;
    let engine = MultiDimRetrievalEngine::new(options, Some(timeline), None, None);

    let mut q = query(analysis());
    q.max_results = 5;
    let outcome = engine.retrieve(q).await;
    assert_eq!(outcome.results.len(), 5);
}

#[tokio::test]
async fn min_relevance_filters_low_scores() {
    let timeline = ScriptedTimeline::new(vec![event("hi", 0.9), event("lo", 0.1)]);
    let mut options = fast_options();
    options.dimensions.knowledge_enabled = false;
    options.dimensions.vector_enabled = false;
    let engine = MultiDimRetrievalEngine::new(options, Some(timeline), None, None);

    let mut q = query(analysis());
    q.min_relevance = 0.5;
    let outcome = engine.retrieve(q).await;
    assert_eq!(outcome.results.len(), 1);
    assert_eq!(outcome.results[0].id, "hi");
}
