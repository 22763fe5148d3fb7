//! Multi-dimensional storage engine
//!
//! Fans one structured memory out to the enabled backends in parallel.
//! Each dimension runs its quality gate and adapter call in its own
//! worker; outcomes come back over a buffered channel and are collected
//! under a shared deadline. One dimension failing never touches its
//! siblings.

pub mod validate;


use chrono::Utc;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};
use tokio::sync::mpsc;
use uuid::Uuid;

use crate::config::{Config, DimensionFlags};
use crate::models::retrieval::{TimelineEvent, VectorDocument};
use crate::models::storage::{
    DimensionError, StorageAnalysis, StorageRequest, StorageResult, TimelineData, VectorData,
    PRIORITY_GATE,
};
use crate::services::adapters::{AdapterError, KnowledgeStore, TimelineStore, VectorStore};
use crate::services::llm::models::{LLMError, TaskType};
use crate::services::llm::LLMFacade;
use crate::services::prompt::{PromptContext, PromptError, PromptManager, TPL_STORAGE_STRUCTURING};
use crate::services::semantic::strip_code_fences;

use validate::{validate_knowledge, validate_timeline, validate_vector};

const DIM_TIMELINE: &str = "timeline";
const DIM_KNOWLEDGE: &str = "knowledge";
const DIM_VECTOR: &str = "vector";

#[derive(Debug, thiserror::Error)]
pub enum StorageError {
    #[error(transparent)]
    Llm(#[from] LLMError),

    #[error(transparent)]
    Prompt(#[from] PromptError),

    #[error("structuring parse error: {message}")]
    Parse { message: String },
}

#[derive(Debug, Clone)]
pub struct StorageOptions {
    pub dimensions: DimensionFlags,
    /// Shared fan-out deadline.
    pub timeout: Duration,
    /// On structuring failure return a degraded result instead of an
    /// error, letting the caller fall back to its previous pipeline.
    pub fallback_to_legacy: bool,
}

impl StorageOptions {
    pub fn from_config(config: &Config) -> Self {
        Self {
            dimensions: config.dimensions.clone(),
            timeout: Duration::from_secs(config.strategy.timeout_secs),
            fallback_to_legacy: true,
        }
    }
}

impl Default for StorageOptions {
    fn default() -> Self {
        Self {
            dimensions: DimensionFlags::default(),
            timeout: Duration::from_secs(60),
            fallback_to_legacy: true,
        }
    }
}

/// Aggregate counters kept by the engine. Reads return a copy.
#[derive(Debug, Clone, Default)]
pub struct StorageStats {
    pub total_requests: u64,
    pub timeline_stored: u64,
    pub knowledge_stored: u64,
    pub vector_stored: u64,
    pub errors: u64,
    pub avg_processing_ms: f64,
}

#[derive(Default)]
struct StorageMetrics {
    inner: Mutex<StorageStats>,
}

impl StorageMetrics {
    fn record(&self, result: &StorageResult) {
        let mut stats = self.inner.lock().expect("storage metrics lock poisoned");
        stats.total_requests += 1;
        if result.timeline_stored {
            stats.timeline_stored += 1;
        }
        if result.knowledge_stored {
            stats.knowledge_stored += 1;
        }
        if result.vector_stored {
            stats.vector_stored += 1;
        }
        stats.errors += result.errors.len() as u64;

        let elapsed_ms = result.processing_time.as_secs_f64() * 1000.0;
        let n = stats.total_requests as f64;
        stats.avg_processing_ms = stats.avg_processing_ms * ((n - 1.0) / n) + elapsed_ms / n;
    }

    fn snapshot(&self) -> StorageStats {
        self.inner
            .lock()
            .expect("storage metrics lock poisoned")
            .clone()
    }
}

/// One worker's report, sent over the collection channel.
struct WorkerOutcome {
    dimension: &'static str,
    result: Result<String, (String, String)>,
}

pub struct MultiDimStorageEngine {
    options: StorageOptions,
    llm: Option<Arc<LLMFacade>>,
    prompts: Arc<PromptManager>,
    timeline: Option<Arc<dyn TimelineStore>>,
    knowledge: Option<Arc<dyn KnowledgeStore>>,
    vector: Option<Arc<dyn VectorStore>>,
    metrics: StorageMetrics,
}

impl MultiDimStorageEngine {
    pub fn new(
        options: StorageOptions,
        llm: Option<Arc<LLMFacade>>,
        prompts: Arc<PromptManager>,
        timeline: Option<Arc<dyn TimelineStore>>,
        knowledge: Option<Arc<dyn KnowledgeStore>>,
        vector: Option<Arc<dyn VectorStore>>,
    ) -> Self {
        Self {
            options,
            llm,
            prompts,
            timeline,
            knowledge,
            vector,
            metrics: StorageMetrics::default(),
        }
    }

    pub fn stats(&self) -> StorageStats {
        self.metrics.snapshot()
    }

    /// Store one memory across the enabled dimensions. A dimension is
    /// written iff it is enabled, its projection is present, its
    /// priority clears the gate and its data validates.
    pub async fn store(
        &self,
        request: StorageRequest,
        analysis: Option<StorageAnalysis>,
    ) -> Result<StorageResult, StorageError> {
        let started = Instant::now();

        let (analysis, llm_analysis_time) = match analysis {
            Some(analysis) => (analysis, Duration::ZERO),
            None => {
                let llm_started = Instant::now();
                match self.run_structuring(&request).await {
                    Ok(analysis) => (analysis, llm_started.elapsed()),
                    Err(e) if self.options.fallback_to_legacy => {
                        tracing::warn!("structuring analysis failed, degrading: {}", e);
                        let result = StorageResult {
                            success: false,
                            errors: vec![DimensionError {
                                dimension: "analysis".to_string(),
                                code: "LLM_ANALYSIS_FAILED".to_string(),
                                message: e.to_string(),
                            }],
                            processing_time: started.elapsed(),
                            llm_analysis_time: llm_started.elapsed(),
                            ..StorageResult::default()
                        };
                        self.metrics.record(&result);
                        return Ok(result);
                    },
                    Err(e) => return Err(e),
                }
            },
        };

        let storage_started = Instant::now();
        let (spawned, mut rx) = self.spawn_workers(&request, &analysis);

        let mut result = StorageResult {
            success: true,
            llm_analysis_time,
            ..StorageResult::default()
        };

        // Collect exactly one outcome per spawned worker or bail at the
        // deadline; late workers keep running but their sends land in a
        // closed channel.
        let deadline = tokio::time::sleep(self.options.timeout);
        tokio::pin!(deadline);
        let mut reported: Vec<&'static str> = Vec::with_capacity(spawned.len());

        while reported.len() < spawned.len() {
            tokio::select! {
                outcome = rx.recv() => match outcome {
                    Some(outcome) => {
                        reported.push(outcome.dimension);
                        self.apply_outcome(&mut result, outcome);
                    },
                    None => break,
                },
                _ = &mut deadline => {
                    tracing::warn!(
                        "storage fan-out deadline hit after {:?}; {} of {} workers reported",
                        self.options.timeout,
                        reported.len(),
                        spawned.len()
                    );
                    break;
                },
            }
        }

        for dimension in &spawned {
            if !reported.contains(dimension) {
                result.success = false;
                result.errors.push(DimensionError {
                    dimension: (*dimension).to_string(),
                    code: format!("{}_TIMEOUT", dimension.to_uppercase()),
                    message: format!("worker missed the {:?} deadline", self.options.timeout),
                });
            }
        }

        result.storage_time = storage_started.elapsed();
        result.processing_time = started.elapsed();
        self.metrics.record(&result);

        tracing::debug!(
            success = result.success,
            timeline = result.timeline_stored,
            knowledge = result.knowledge_stored,
            vector = result.vector_stored,
            errors = result.errors.len(),
            "storage fan-out finished"
        );
        Ok(result)
    }

    fn apply_outcome(&self, result: &mut StorageResult, outcome: WorkerOutcome) {
        match outcome.result {
            Ok(id) => match outcome.dimension {
                DIM_TIMELINE => {
                    result.timeline_stored = true;
                    result.timeline_id = Some(id);
                },
                DIM_KNOWLEDGE => {
                    result.knowledge_stored = true;
                    result.knowledge_id = Some(id);
                },
                _ => {
                    result.vector_stored = true;
                    result.vector_id = Some(id);
                },
            },
            Err((code, message)) => {
                result.success = false;
                result.errors.push(DimensionError {
                    dimension: outcome.dimension.to_string(),
                    code,
                    message,
                });
            },
        }
    }

    /// Spawn one worker per dimension that clears the gate. Returns the
    /// spawned dimension names and the outcome channel.
    fn spawn_workers(
        &self,
        request: &StorageRequest,
        analysis: &StorageAnalysis,
    ) -> (Vec<&'static str>, mpsc::Receiver<WorkerOutcome>) {
        let (tx, rx) = mpsc::channel(3);
        let mut spawned = Vec::new();
        let recommendation = &analysis.storage_recommendation;

        if self.options.dimensions.timeline_enabled
            && recommendation.timeline_priority > PRIORITY_GATE
            && let (Some(data), Some(adapter)) = (&analysis.timeline_data, &self.timeline)
        {
            spawned.push(DIM_TIMELINE);
            let tx = tx.clone();
            let adapter = Arc::clone(adapter);
            let data = data.clone();
            let event = build_timeline_event(request, &data);
            tokio::spawn(async move {
                let result = match validate_timeline(&data) {
                    Ok(()) => adapter
                        .store_event(event)
                        .await
                        .map_err(|e| (adapter_code(&e), e.to_string())),
                    Err(message) => Err(("VALIDATION_FAILED".to_string(), message)),
                };
                let _ = tx.send(WorkerOutcome { dimension: DIM_TIMELINE, result }).await;
            });
        }

        if self.options.dimensions.knowledge_enabled
            && recommendation.knowledge_priority > PRIORITY_GATE
            && let (Some(data), Some(adapter)) = (&analysis.knowledge_graph_data, &self.knowledge)
        {
            spawned.push(DIM_KNOWLEDGE);
            let tx = tx.clone();
            let adapter = Arc::clone(adapter);
            let data = data.clone();
            tokio::spawn(async move {
                let result = match validate_knowledge(&data) {
                    Ok(()) => adapter
                        .store_concepts(&data)
                        .await
                        .map_err(|e| (adapter_code(&e), e.to_string())),
                    Err(message) => Err(("VALIDATION_FAILED".to_string(), message)),
                };
                let _ = tx
                    .send(WorkerOutcome { dimension: DIM_KNOWLEDGE, result })
                    .await;
            });
        }

        if self.options.dimensions.vector_enabled
            && recommendation.vector_priority > PRIORITY_GATE
            && let (Some(data), Some(adapter)) = (&analysis.vector_data, &self.vector)
        {
            spawned.push(DIM_VECTOR);
            let tx = tx.clone();
            let adapter = Arc::clone(adapter);
            let data = data.clone();
            let document = build_vector_document(request, &data);
            tokio::spawn(async move {
                let result = match validate_vector(&data) {
                    Ok(()) => adapter
                        .store_document(document)
                        .await
                        .map_err(|e| (adapter_code(&e), e.to_string())),
                    Err(message) => Err(("VALIDATION_FAILED".to_string(), message)),
                };
                let _ = tx.send(WorkerOutcome { dimension: DIM_VECTOR, result }).await;
            });
        }

        (spawned, rx)
    }

    /// One-shot structuring task: a single prompt that produces every
    /// projection plus the recommendation.
    async fn run_structuring(&self, request: &StorageRequest) -> Result<StorageAnalysis, StorageError> {
        let facade = self
            .llm
            .as_ref()
            .ok_or(StorageError::Llm(LLMError::Disabled))?;

        let prompt = self.prompts.build_prompt(
            TPL_STORAGE_STRUCTURING,
            &PromptContext::new().with_var("content", request.content.clone()),
        )?;

        let llm_request = prompt.to_request().with_temperature(0.1);
        let response = facade
            .complete_task(TaskType::StorageStructuring, llm_request)
            .await?;

        let body = strip_code_fences(&response.content);
        serde_json::from_str(body).map_err(|e| StorageError::Parse {
            message: format!("structuring payload did not parse: {e}"),
        })
    }
}

fn adapter_code(error: &AdapterError) -> String {
    match error {
        AdapterError::Unavailable(_) => "BACKEND_UNAVAILABLE",
        AdapterError::Timeout(_) => "BACKEND_TIMEOUT",
        AdapterError::Schema(_) => "SCHEMA_ERROR",
        AdapterError::Transport(_) => "TRANSPORT_ERROR",
    }
    .to_string()
}

fn build_timeline_event(request: &StorageRequest, data: &TimelineData) -> TimelineEvent {
    let now = Utc::now();
    TimelineEvent {
        id: Uuid::new_v4().to_string(),
        user_id: request.user_id.clone(),
        session_id: request.session_id.clone(),
        workspace_id: request.workspace_id.clone(),
        timestamp: now,
        duration_ms: None,
        event_type: data.event_type.clone(),
        title: data.title.clone(),
        content: data.content.clone(),
        summary: None,
        related_files: vec![],
        related_concepts: data.tech_stack.clone(),
        parent_event_id: None,
        intent: request
            .metadata
            .get("intent")
            .and_then(|v| v.as_str())
            .unwrap_or_default()
            .to_string(),
        keywords: data.keywords.clone(),
        entities: serde_json::Value::Null,
        categories: vec![],
        importance_score: data.importance_score,
        relevance_score: f64::from(data.importance_score) / 10.0,
        created_at: now,
        updated_at: now,
    }
}

fn build_vector_document(request: &StorageRequest, data: &VectorData) -> VectorDocument {
    let mut metadata = std::collections::HashMap::new();
    metadata.insert("user_id".to_string(), serde_json::json!(request.user_id));
    if !request.workspace_id.is_empty() {
        metadata.insert("workspace_id".to_string(), serde_json::json!(request.workspace_id));
    }
    metadata.insert("semantic_tags".to_string(), serde_json::json!(data.semantic_tags));
    if !data.context_summary.is_empty() {
        metadata.insert("context_summary".to_string(), serde_json::json!(data.context_summary));
    }

    VectorDocument {
        id: Uuid::new_v4().to_string(),
        content: data.content.clone(),
        vector: vec![],
        score: data.relevance_score,
        metadata,
    }
}
