//! Multi-dimensional retrieval engine
//!
//! Fans one analyzed query out to the enabled backends, collects under
//! a shared deadline, then fuses: dedup by id (higher score wins),
//! stable relevance-descending order, truncation to the result budget.
//! A time-recall query takes the dedicated timeline path and never
//! touches the keyword/vector backends.

#[cfg(test)]
mod tests;

use chrono::{TimeZone, Utc};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::mpsc;

use crate::config::{Config, DimensionFlags, FusionMethod};
use crate::models::retrieval::RetrievalResult;
use crate::models::semantic::SemanticAnalysisResult;
use crate::services::adapters::{
    GraphExpansion, KnowledgeStore, TimelineOrder, TimelineQuery, TimelineStore, VectorQuery,
    VectorStore,
};
use crate::utils::{Cache, QueryRecord, RateLimiter, RetrievalMetrics};

const DIM_TIMELINE: &str = "timeline";
const DIM_KNOWLEDGE: &str = "knowledge";
const DIM_VECTOR: &str = "vector";

/// Engine tag reported when multi-dimensional retrieval is disabled and
/// the caller has to fall back to whatever came before it.
const ENGINE_LEGACY: &str = "legacy";

/// Graph expansion starts from at most this many keywords.
const GRAPH_START_KEYWORDS: usize = 3;

/// Default lookback when the analysis carries no explicit times.
const DEFAULT_TIMELINE_WINDOW: &str = "24 hours";

// ============================================================================
// Query / outcome shapes
// ============================================================================

#[derive(Debug, Clone)]
pub struct RetrievalQuery {
    pub user_id: String,
    pub session_id: String,
    pub workspace_id: String,
    pub analysis: SemanticAnalysisResult,
    /// 0 means "use the engine default".
    pub max_results: usize,
    /// 0.0 means "use the engine default".
    pub min_relevance: f64,
    pub request_id: String,
}

#[derive(Debug, Clone, Default)]
pub struct RetrievalOutcome {
    pub results: Vec<RetrievalResult>,
    pub engines_used: Vec<String>,
    pub duration: Duration,
    pub cache_hit: bool,
}

#[derive(Debug, Clone)]
pub struct RetrievalOptions {
    pub enabled: bool,
    pub dimensions: DimensionFlags,
    pub enable_parallel: bool,
    pub timeout: Duration,
    pub fusion_method: FusionMethod,
    pub max_results: usize,
    pub min_relevance: f64,
    pub enable_cache: bool,
    pub cache_ttl: Duration,
    pub cache_size: usize,
    pub rate_limit: u32,
}

impl RetrievalOptions {
    pub fn from_config(config: &Config) -> Self {
        Self {
            enabled: config.enabled && config.features.multi_dimensional,
            dimensions: config.dimensions.clone(),
            enable_parallel: config.strategy.enable_parallel,
            timeout: Duration::from_secs(config.performance.query_timeout_secs),
            fusion_method: config.strategy.fusion_method,
            max_results: config.strategy.max_results,
            min_relevance: config.strategy.min_relevance,
            enable_cache: config.performance.enable_cache,
            cache_ttl: Duration::from_secs(config.performance.cache_ttl_secs),
            cache_size: config.performance.cache_size,
            rate_limit: config.performance.rate_limit,
        }
    }
}

impl Default for RetrievalOptions {
    fn default() -> Self {
        Self {
            enabled: true,
            dimensions: DimensionFlags::default(),
            enable_parallel: true,
            timeout: Duration::from_secs(30),
            fusion_method: FusionMethod::Weighted,
            max_results: 20,
            min_relevance: 0.0,
            enable_cache: true,
            cache_ttl: Duration::from_secs(300),
            cache_size: 1000,
            rate_limit: 120,
        }
    }
}

#[derive(Clone)]
struct CachedRetrieval {
    results: Vec<RetrievalResult>,
    engines_used: Vec<String>,
}

struct WorkerReport {
    dimension: &'static str,
    results: Result<Vec<RetrievalResult>, String>,
    latency: Duration,
}

// ============================================================================
// Engine
// ============================================================================

pub struct MultiDimRetrievalEngine {
    options: RetrievalOptions,
    timeline: Option<Arc<dyn TimelineStore>>,
    knowledge: Option<Arc<dyn KnowledgeStore>>,
    vector: Option<Arc<dyn VectorStore>>,
    cache: Arc<Cache<CachedRetrieval>>,
    limiter: RateLimiter,
    metrics: Arc<RetrievalMetrics>,
}

impl MultiDimRetrievalEngine {
    pub fn new(
        options: RetrievalOptions,
        timeline: Option<Arc<dyn TimelineStore>>,
        knowledge: Option<Arc<dyn KnowledgeStore>>,
        vector: Option<Arc<dyn VectorStore>>,
    ) -> Self {
        let cache = Arc::new(Cache::new(options.cache_size, options.cache_ttl));
        let limiter = RateLimiter::per_minute(options.rate_limit);
        Self {
            options,
            timeline,
            knowledge,
            vector,
            cache,
            limiter,
            metrics: Arc::new(RetrievalMetrics::new()),
        }
    }

    pub fn metrics(&self) -> Arc<RetrievalMetrics> {
        Arc::clone(&self.metrics)
    }

    pub async fn retrieve(&self, query: RetrievalQuery) -> RetrievalOutcome {
        let started = Instant::now();

        if !self.options.enabled || !self.options.dimensions.any_enabled() {
            return RetrievalOutcome {
                engines_used: vec![ENGINE_LEGACY.to_string()],
                duration: started.elapsed(),
                ..RetrievalOutcome::default()
            };
        }

        if self.options.enable_cache
            && !query.request_id.is_empty()
            && let Some(cached) = self.cache.get(&query.request_id)
        {
            let outcome = RetrievalOutcome {
                results: cached.results,
                engines_used: cached.engines_used,
                duration: started.elapsed(),
                cache_hit: true,
            };
            self.record_query(&outcome);
            return outcome;
        }

        self.limiter.wait().await;

        let max_results = if query.max_results > 0 {
            query.max_results
        } else {
            self.options.max_results
        };
        let min_relevance = if query.min_relevance > 0.0 {
            query.min_relevance
        } else {
            self.options.min_relevance
        };

        let reports = if self.options.enable_parallel {
            self.dispatch_parallel(&query, max_results, min_relevance).await
        } else {
            self.dispatch_sequential(&query, max_results, min_relevance).await
        };

        let mut engines_used = Vec::new();
        let mut collected = Vec::new();
        for report in reports {
            self.metrics.record_engine(
                report.dimension,
                report.latency,
                report.results.is_ok(),
            );
            match report.results {
                Ok(results) => {
                    engines_used.push(report.dimension.to_string());
                    collected.extend(results);
                },
                Err(message) => {
                    tracing::warn!("{} retrieval failed: {}", report.dimension, message);
                },
            }
        }

        let results = fuse(collected, max_results, self.options.fusion_method);
        let outcome = RetrievalOutcome {
            results,
            engines_used,
            duration: started.elapsed(),
            cache_hit: false,
        };

        self.record_query(&outcome);
        if self.options.enable_cache && !query.request_id.is_empty() {
            self.cache.insert(
                query.request_id.clone(),
                CachedRetrieval {
                    results: outcome.results.clone(),
                    engines_used: outcome.engines_used.clone(),
                },
            );
        }
        outcome
    }

    fn record_query(&self, outcome: &RetrievalOutcome) {
        self.metrics.record_query(QueryRecord {
            timestamp: Utc::now(),
            duration: outcome.duration,
            result_count: outcome.results.len(),
            engines: outcome.engines_used.clone(),
            success: !outcome.engines_used.is_empty(),
            cache_hit: outcome.cache_hit,
        });
    }

    /// Which backends this query touches. Time-recall bypasses the
    /// keyword/vector paths entirely.
    fn plan(&self, query: &RetrievalQuery) -> Vec<&'static str> {
        let mut plan = Vec::new();
        if self.options.dimensions.timeline_enabled && self.timeline.is_some() {
            plan.push(DIM_TIMELINE);
        }
        if query.analysis.is_time_recall() {
            return plan;
        }
        if self.options.dimensions.knowledge_enabled && self.knowledge.is_some() {
            plan.push(DIM_KNOWLEDGE);
        }
        if self.options.dimensions.vector_enabled && self.vector.is_some() {
            plan.push(DIM_VECTOR);
        }
        plan
    }

    async fn dispatch_parallel(
        &self,
        query: &RetrievalQuery,
        max_results: usize,
        min_relevance: f64,
    ) -> Vec<WorkerReport> {
        let plan = self.plan(query);
        let (tx, mut rx) = mpsc::channel(3);

        for dimension in &plan {
            let tx = tx.clone();
            match *dimension {
                DIM_TIMELINE => {
                    let adapter = Arc::clone(self.timeline.as_ref().expect("planned without adapter"));
                    let backend_query = build_timeline_query(query, max_results, min_relevance);
                    tokio::spawn(async move {
                        let started = Instant::now();
                        let results = adapter
                            .retrieve_events(&backend_query)
                            .await
                            .map(|page| {
                                page.events
                                    .iter()
                                    .map(RetrievalResult::from_timeline)
                                    .filter(|r| r.relevance >= min_relevance)
                                    .collect()
                            })
                            .map_err(|e| e.to_string());
                        let _ = tx
                            .send(WorkerReport {
                                dimension: DIM_TIMELINE,
                                results,
                                latency: started.elapsed(),
                            })
                            .await;
                    });
                },
                DIM_KNOWLEDGE => {
                    let adapter = Arc::clone(self.knowledge.as_ref().expect("planned without adapter"));
                    let expansion = build_graph_expansion(query, max_results);
                    tokio::spawn(async move {
                        let started = Instant::now();
                        let results = adapter
                            .expand_graph(&expansion)
                            .await
                            .map(|page| {
                                page.nodes
                                    .iter()
                                    .map(RetrievalResult::from_knowledge)
                                    .filter(|r| r.relevance >= min_relevance)
                                    .collect()
                            })
                            .map_err(|e| e.to_string());
                        let _ = tx
                            .send(WorkerReport {
                                dimension: DIM_KNOWLEDGE,
                                results,
                                latency: started.elapsed(),
                            })
                            .await;
                    });
                },
                _ => {
                    let adapter = Arc::clone(self.vector.as_ref().expect("planned without adapter"));
                    let backend_query = build_vector_query(query, max_results, min_relevance);
                    tokio::spawn(async move {
                        let started = Instant::now();
                        let results = adapter
                            .search(&backend_query)
                            .await
                            .map(|page| {
                                page.documents
                                    .iter()
                                    .map(RetrievalResult::from_vector)
                                    .filter(|r| r.relevance >= min_relevance)
                                    .collect()
                            })
                            .map_err(|e| e.to_string());
                        let _ = tx
                            .send(WorkerReport {
                                dimension: DIM_VECTOR,
                                results,
                                latency: started.elapsed(),
                            })
                            .await;
                    });
                },
            }
        }
        drop(tx);

        // Collector: one report per spawned worker, or early return at
        // the deadline with whatever already arrived.
        let mut reports = Vec::with_capacity(plan.len());
        let deadline = tokio::time::sleep(self.options.timeout);
        tokio::pin!(deadline);

        while reports.len() < plan.len() {
            tokio::select! {
                report = rx.recv() => match report {
                    Some(report) => reports.push(report),
                    None => break,
                },
                _ = &mut deadline => {
                    tracing::warn!(
                        "retrieval deadline hit; {} of {} backends reported",
                        reports.len(),
                        plan.len()
                    );
                    break;
                },
            }
        }
        reports
    }

    async fn dispatch_sequential(
        &self,
        query: &RetrievalQuery,
        max_results: usize,
        min_relevance: f64,
    ) -> Vec<WorkerReport> {
        let plan = self.plan(query);
        let deadline = Instant::now() + self.options.timeout;
        let mut reports = Vec::with_capacity(plan.len());

        for dimension in plan {
            let remaining = deadline.saturating_duration_since(Instant::now());
            if remaining.is_zero() {
                tracing::warn!("sequential retrieval out of budget before {}", dimension);
                break;
            }

            let started = Instant::now();
            let results = match dimension {
                DIM_TIMELINE => {
                    let adapter = self.timeline.as_ref().expect("planned without adapter");
                    let backend_query = build_timeline_query(query, max_results, min_relevance);
                    tokio::time::timeout(remaining, adapter.retrieve_events(&backend_query))
                        .await
                        .map_err(|_| "deadline exceeded".to_string())
                        .and_then(|r| r.map_err(|e| e.to_string()))
                        .map(|page| {
                            page.events
                                .iter()
                                .map(RetrievalResult::from_timeline)
                                .filter(|r| r.relevance >= min_relevance)
                                .collect()
                        })
                },
                DIM_KNOWLEDGE => {
                    let adapter = self.knowledge.as_ref().expect("planned without adapter");
                    let expansion = build_graph_expansion(query, max_results);
                    tokio::time::timeout(remaining, adapter.expand_graph(&expansion))
                        .await
                        .map_err(|_| "deadline exceeded".to_string())
                        .and_then(|r| r.map_err(|e| e.to_string()))
                        .map(|page| {
                            page.nodes
                                .iter()
                                .map(RetrievalResult::from_knowledge)
                                .filter(|r| r.relevance >= min_relevance)
                                .collect()
                        })
                },
                _ => {
                    let adapter = self.vector.as_ref().expect("planned without adapter");
                    let backend_query = build_vector_query(query, max_results, min_relevance);
                    tokio::time::timeout(remaining, adapter.search(&backend_query))
                        .await
                        .map_err(|_| "deadline exceeded".to_string())
                        .and_then(|r| r.map_err(|e| e.to_string()))
                        .map(|page| {
                            page.documents
                                .iter()
                                .map(RetrievalResult::from_vector)
                                .filter(|r| r.relevance >= min_relevance)
                                .collect()
                        })
                },
            };
            reports.push(WorkerReport { dimension, results, latency: started.elapsed() });
        }
        reports
    }
}

// ============================================================================
// Backend query builders
// ============================================================================

/// Keywords for the backend queries: flattened key concepts when the
/// analyzer produced them, plain keywords otherwise.
fn effective_keywords(analysis: &SemanticAnalysisResult) -> Vec<String> {
    if !analysis.key_concepts.is_empty() {
        analysis.key_concepts.clone()
    } else {
        analysis.keywords.clone()
    }
}

fn build_timeline_query(
    query: &RetrievalQuery,
    max_results: usize,
    min_relevance: f64,
) -> TimelineQuery {
    let analysis = &query.analysis;
    let mut backend_query = TimelineQuery {
        user_id: query.user_id.clone(),
        session_id: (!query.session_id.is_empty()).then(|| query.session_id.clone()),
        workspace_id: (!query.workspace_id.is_empty()).then(|| query.workspace_id.clone()),
        limit: max_results,
        ..TimelineQuery::default()
    };

    if let Some(window) = analysis.recall_window() {
        // Dedicated time-recall path: the window is the whole query
        backend_query.start_time = Some(Utc.from_utc_datetime(&window.start_time));
        backend_query.end_time = Some(Utc.from_utc_datetime(&window.end_time));
        backend_query.order_by = TimelineOrder::Timestamp;
        return backend_query;
    }

    backend_query.keywords = effective_keywords(analysis);
    backend_query.search_text = analysis.queries.timeline.first().cloned();
    backend_query.min_relevance = (min_relevance > 0.0).then_some(min_relevance);
    backend_query.order_by = TimelineOrder::RelevanceScore;
    // Bounded lookback when the analysis carries no explicit times
    backend_query.time_window = Some(DEFAULT_TIMELINE_WINDOW.to_string());
    backend_query
}

fn build_graph_expansion(query: &RetrievalQuery, max_results: usize) -> GraphExpansion {
    let mut start_nodes = effective_keywords(&query.analysis);
    start_nodes.truncate(GRAPH_START_KEYWORDS);

    GraphExpansion {
        start_nodes,
        max_depth: 2,
        max_nodes: max_results,
        min_weight: 0.1,
        relation_types: vec![],
        node_types: vec![],
    }
}

fn build_vector_query(
    query: &RetrievalQuery,
    max_results: usize,
    min_relevance: f64,
) -> VectorQuery {
    let analysis = &query.analysis;
    let query_text = if !analysis.queries.vector.is_empty() {
        analysis.queries.vector.join(" ")
    } else {
        effective_keywords(analysis).join(" ")
    };

    let mut filters = HashMap::new();
    if !query.workspace_id.is_empty() {
        filters.insert("workspace_id".to_string(), serde_json::json!(query.workspace_id));
    }

    VectorQuery {
        query_text,
        query_vector: None,
        top_k: max_results,
        min_score: min_relevance,
        filters,
    }
}

// ============================================================================
// Fusion
// ============================================================================

/// Dedup by id keeping the higher score, stable sort by relevance
/// descending, truncate. The named fusion variants all take this path
/// today; the parameter keeps the hook in place.
pub fn fuse(
    results: Vec<RetrievalResult>,
    max_results: usize,
    _method: FusionMethod,
) -> Vec<RetrievalResult> {
    let mut by_id: HashMap<String, RetrievalResult> = HashMap::new();
    let mut order: Vec<String> = Vec::new();

    for result in results {
        match by_id.get_mut(&result.id) {
            Some(existing) => {
                if result.score > existing.score {
                    *existing = result;
                }
            },
            None => {
                order.push(result.id.clone());
                by_id.insert(result.id.clone(), result);
            },
        }
    }

    // Rebuild in first-seen order so the relevance sort stays stable
    let mut fused: Vec<RetrievalResult> = order
        .into_iter()
        .filter_map(|id| by_id.remove(&id))
        .collect();
    fused.sort_by(|a, b| {
        b.relevance
            .partial_cmp(&a.relevance)
            .unwrap_or(std::cmp::Ordering::Equal)
    });
    fused.truncate(max_results);
    fused
}
