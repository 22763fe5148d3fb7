//! Semantic analysis tests
//!
//! Envelope parsing, the time-recall gate, keyword union semantics and
//! the comparison harness.

use async_trait::async_trait;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;

use crate::models::semantic::{ContextInfo, SemanticAnalysisResult, TokenUsage};

use super::envelope::{
    envelope_to_result, parse_envelope, strip_code_fences, union_keywords,
};
use super::{AnalysisStrategy, SemanticAnalysisEngine, SemanticError};

// ============================================================================
// Fence stripping & parsing
// ============================================================================

#[test]
fn strips_json_fences() {
    let fenced = "```json\n{\"confidence_level\": 0.5}\n```";
    assert_eq!(strip_code_fences(fenced), "{\"confidence_level\": 0.5}");

    let bare_fence = "```\n{\"a\": 1}\n```";
    assert_eq!(strip_code_fences(bare_fence), "{\"a\": 1}");

    let unfenced = "  {\"a\": 1}  ";
    assert_eq!(strip_code_fences(unfenced), "{\"a\": 1}");
}

#[test]
fn parses_partial_envelope() {
    let envelope = parse_envelope(r#"{"confidence_level": 0.8}"#).unwrap();
    assert!(envelope.timeline_recall.is_none());
    assert!(envelope.intent_analysis.is_none());
    assert!((envelope.confidence_level - 0.8).abs() < 1e-9);
}

#[test]
fn malformed_envelope_is_parse_error() {
    let err = parse_envelope("not json at all").unwrap_err();
    assert!(matches!(err, SemanticError::Parse { .. }));
}

#[test]
fn strategy_queries_accept_bare_strings() {
    let envelope = parse_envelope(
        r#"{
            "retrieval_strategy": {
                "timeline_queries": ["plain text query"],
                "knowledge_queries": [{"query": "structured", "priority": 5}],
                "vector_queries": []
            },
            "confidence_level": 0.5
        }"#,
    )
    .unwrap();

    let strategy = envelope.retrieval_strategy.unwrap();
    assert_eq!(strategy.timeline_queries[0].query, "plain text query");
    assert_eq!(strategy.timeline_queries[0].priority, 3);
    assert_eq!(strategy.knowledge_queries[0].priority, 5);
}

// ============================================================================
// Time-recall gate
// ============================================================================

/// The scenario shape: "回顾昨天的工作总结" analyzed with today =
/// 2025-01-15 resolves to yesterday's full-day window.
#[test]
fn well_formed_timeline_recall_takes_the_gate() {
    let envelope = parse_envelope(
        r#"{
            "timeline_recall": {
                "start_time": "2025-01-14 00:00:00",
                "end_time": "2025-01-14 23:59:59"
            },
            "intent_analysis": {"intent_type": "search", "key_concepts": ["work summary"]},
            "key_extraction": {"technical_keywords": ["summary"]},
            "retrieval_strategy": {
                "timeline_queries": [{"query": "work summary", "priority": 4}]
            },
            "confidence_level": 0.9
        }"#,
    )
    .unwrap();

    let result = envelope_to_result(envelope, TokenUsage::default());

    assert_eq!(result.intent, "time_recall");
    assert!(result.is_time_recall());
    assert!(result.queries.is_empty());
    assert!(result.keywords.is_empty());

    let window = result.recall_window().unwrap();
    assert_eq!(window.start_time.format("%Y-%m-%d %H:%M:%S").to_string(), "2025-01-14 00:00:00");
    assert_eq!(window.end_time.format("%Y-%m-%d %H:%M:%S").to_string(), "2025-01-14 23:59:59");
}

#[test]
fn inverted_window_falls_through_to_free_form() {
    let envelope = parse_envelope(
        r#"{
            "timeline_recall": {
                "start_time": "2025-01-14 23:59:59",
                "end_time": "2025-01-14 00:00:00"
            },
            "intent_analysis": {"intent_type": "search"},
            "confidence_level": 0.7
        }"#,
    )
    .unwrap();

    let result = envelope_to_result(envelope, TokenUsage::default());
    assert_eq!(result.intent, "search");
    assert!(result.smart_analysis.is_none());
}

#[test]
fn empty_or_garbled_timestamps_fall_through() {
    for (start, end) in [
        ("", "2025-01-14 23:59:59"),
        ("2025-01-14 00:00:00", ""),
        ("yesterday", "2025-01-14 23:59:59"),
    ] {
        let raw = format!(
            r#"{{"timeline_recall": {{"start_time": "{start}", "end_time": "{end}"}},
                "intent_analysis": {{"intent_type": "search"}}, "confidence_level": 0.5}}"#
        );
        let result = envelope_to_result(parse_envelope(&raw).unwrap(), TokenUsage::default());
        assert_eq!(result.intent, "search", "start={start:?} end={end:?}");
    }
}

// ============================================================================
// Free-form flattening
// ============================================================================

#[test]
fn flattens_intent_and_keywords() {
    let envelope = parse_envelope(
        r#"{
            "intent_analysis": {
                "core_intent": "find the eviction discussion",
                "intent_type": "search",
                "intent_category": "technical",
                "key_concepts": ["eviction", "redis"]
            },
            "key_extraction": {
                "project_keywords": ["engram", "redis"],
                "technical_keywords": ["redis", "lru"]
            },
            "retrieval_strategy": {
                "timeline_queries": [
                    {"query": "low", "priority": 1},
                    {"query": "high", "priority": 5}
                ],
                "vector_queries": [{"query": "eviction policy", "priority": 3}]
            },
            "confidence_level": 0.85
        }"#,
    )
    .unwrap();

    let result = envelope_to_result(envelope, TokenUsage::default());

    assert_eq!(result.intent, "search");
    assert_eq!(result.categories, vec!["technical"]);
    assert_eq!(result.key_concepts, vec!["eviction", "redis"]);
    // technical ∪ project, order preserved, dups dropped
    assert_eq!(result.keywords, vec!["redis", "lru", "engram"]);
    // Higher priority queries come first
    assert_eq!(result.queries.timeline, vec!["high", "low"]);
    assert_eq!(result.queries.vector, vec!["eviction policy"]);
    assert!((result.confidence - 0.85).abs() < 1e-9);
}

#[test]
fn union_preserves_first_occurrence_order() {
    let union = union_keywords(
        &["a".to_string(), "b".to_string()],
        &["b".to_string(), "c".to_string(), " a ".to_string()],
    );
    assert_eq!(union, vec!["a", "b", "c"]);
}

#[test]
fn confidence_clamped_to_unit_interval() {
    let envelope = parse_envelope(r#"{"confidence_level": 1.7}"#).unwrap();
    let result = envelope_to_result(envelope, TokenUsage::default());
    assert!((result.confidence - 1.0).abs() < 1e-9);
}

// ============================================================================
// Comparison harness
// ============================================================================

struct FixedStrategy {
    name: &'static str,
    intent: &'static str,
    calls: AtomicU32,
}

impl FixedStrategy {
    fn new(name: &'static str, intent: &'static str) -> Arc<Self> {
        Arc::new(Self { name, intent, calls: AtomicU32::new(0) })
    }
}

#[async_trait]
impl AnalysisStrategy for FixedStrategy {
    fn name(&self) -> &'static str {
        self.name
    }

    async fn analyze_query(
        &self,
        _query: &str,
        _context: &ContextInfo,
    ) -> Result<SemanticAnalysisResult, SemanticError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        Ok(SemanticAnalysisResult::with_intent(self.intent))
    }
}

#[tokio::test(start_paused = true)]
async fn comparison_runs_both_and_returns_primary() {
    let primary = FixedStrategy::new("primary", "search");
    let secondary = FixedStrategy::new("secondary", "browse");
    let engine = SemanticAnalysisEngine::with_comparison(primary.clone(), secondary.clone());
    assert!(engine.comparison_enabled());

    let result = engine
        .analyze("query", &ContextInfo::default())
        .await
        .unwrap();

    assert_eq!(result.intent, "search");
    assert_eq!(primary.calls.load(Ordering::SeqCst), 1);
    assert_eq!(secondary.calls.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn single_strategy_skips_comparison() {
    let primary = FixedStrategy::new("primary", "search");
    let engine = SemanticAnalysisEngine::new(primary.clone());
    assert!(!engine.comparison_enabled());

    let result = engine
        .analyze("query", &ContextInfo::default())
        .await
        .unwrap();
    assert_eq!(result.intent, "search");
    assert_eq!(primary.calls.load(Ordering::SeqCst), 1);
}

struct FailingStrategy;

#[async_trait]
impl AnalysisStrategy for FailingStrategy {
    fn name(&self) -> &'static str {
        "failing"
    }

    async fn analyze_query(
        &self,
        _query: &str,
        _context: &ContextInfo,
    ) -> Result<SemanticAnalysisResult, SemanticError> {
        Err(SemanticError::Parse { message: "boom".to_string() })
    }
}

#[tokio::test(start_paused = true)]
async fn secondary_failure_does_not_affect_primary_result() {
    let primary = FixedStrategy::new("primary", "search");
    let engine = SemanticAnalysisEngine::with_comparison(primary, Arc::new(FailingStrategy));

    let result = engine
        .analyze("query", &ContextInfo::default())
        .await
        .unwrap();
    assert_eq!(result.intent, "search");
}

// ============================================================================
// Strategies end to end (mock provider behind the façade)
// ============================================================================

mod strategy_e2e {
    use super::*;
    use crate::config::LLMConfig;
    use crate::services::llm::models::{
        Capabilities, LLMError, LLMRequest, LLMResponse, OutputFormat, ProviderKind,
    };
    use crate::services::llm::provider::{ClientFactory, LLMProviderClient};
    use crate::services::llm::LLMFacade;
    use crate::services::prompt::PromptManager;
    use crate::services::semantic::{DeepIntentStrategy, LightweightStrategy};
    use std::sync::Mutex;
    use std::time::Duration;

    /// Provider double that returns a canned envelope and records the
    /// last request it saw.
    struct EnvelopeProvider {
        body: &'static str,
        last_request: Mutex<Option<LLMRequest>>,
    }

    impl EnvelopeProvider {
        fn new(body: &'static str) -> Arc<Self> {
            Arc::new(Self { body, last_request: Mutex::new(None) })
        }
    }

    #[async_trait]
    impl LLMProviderClient for EnvelopeProvider {
        fn provider(&self) -> ProviderKind {
            ProviderKind::OpenAi
        }

        fn model(&self) -> &str {
            "mock"
        }

        fn capabilities(&self) -> Capabilities {
            Capabilities {
                max_tokens: 4096,
                supported_formats: vec![OutputFormat::Json],
                streaming: false,
                batch: false,
                cost_per_token: 0.0,
                latency_ms: 1,
                models: vec!["mock".to_string()],
            }
        }

        async fn complete(&self, request: &LLMRequest) -> Result<LLMResponse, LLMError> {
            *self.last_request.lock().unwrap() = Some(request.clone());
            Ok(LLMResponse {
                content: self.body.to_string(),
                tokens_used: 42,
                model: "mock".to_string(),
                provider: ProviderKind::OpenAi,
                duration: Duration::from_millis(1),
                metadata: Default::default(),
            })
        }

        async fn health_check(&self) -> Result<(), LLMError> {
            Ok(())
        }
    }

    const ENVELOPE: &str = r#"```json
{
  "intent_analysis": {"intent_type": "search", "key_concepts": ["redis"]},
  "key_extraction": {"technical_keywords": ["redis", "eviction"]},
  "retrieval_strategy": {"vector_queries": [{"query": "redis eviction", "priority": 4}]},
  "confidence_level": 0.8
}
```"#;

    fn facade(provider: Arc<EnvelopeProvider>) -> Arc<LLMFacade> {
        let factory = Arc::new(ClientFactory::new());
        factory.register(provider);
        let config = LLMConfig {
            primary_provider: ProviderKind::OpenAi,
            fallback_provider: ProviderKind::OpenAi,
            enable_routing: false,
            ..LLMConfig::default()
        };
        Arc::new(LLMFacade::new(config, factory))
    }

    #[tokio::test]
    async fn lightweight_strategy_round_trip() {
        let provider = EnvelopeProvider::new(ENVELOPE);
        let strategy = LightweightStrategy::new(
            facade(provider.clone()),
            Arc::new(PromptManager::new()),
        );

        let result = strategy
            .analyze_query("find the redis eviction discussion", &ContextInfo::default())
            .await
            .unwrap();

        assert_eq!(result.intent, "search");
        assert_eq!(result.key_concepts, vec!["redis"]);
        assert_eq!(result.queries.vector, vec!["redis eviction"]);
        assert_eq!(result.token_usage.total_tokens, 42);

        // Wide-recall discipline: near-zero temperature, query in the
        // prompt body, today anchor in the system prompt
        let request = provider.last_request.lock().unwrap().clone().unwrap();
        assert!(request.temperature <= 0.1);
        assert!(request.prompt.contains("redis eviction discussion"));
        assert!(request.system_prompt.unwrap_or_default().contains("current"));
    }

    #[tokio::test]
    async fn deep_strategy_carries_context() {
        let provider = EnvelopeProvider::new(ENVELOPE);
        let strategy = DeepIntentStrategy::new(
            facade(provider.clone()),
            Arc::new(PromptManager::new()),
        );

        let context = ContextInfo {
            session_topic: "cache tuning".to_string(),
            project: "engram".to_string(),
            ..ContextInfo::default()
        };
        let result = strategy
            .analyze_query("what did we decide", &context)
            .await
            .unwrap();
        assert_eq!(result.intent, "search");

        let request = provider.last_request.lock().unwrap().clone().unwrap();
        assert!(request.temperature <= 0.2);
        assert!(request.prompt.contains("cache tuning"));
        assert!(request.prompt.contains("engram"));
    }
}
