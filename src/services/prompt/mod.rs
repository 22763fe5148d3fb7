//! Prompt manager
//!
//! Named templates with declared variables, examples and an output
//! format hint. `build_prompt` substitutes `{{var}}` placeholders from
//! a `PromptContext` and always injects the runtime-computed `today`
//! anchor so relative time phrases resolve against the real clock.

use chrono::Utc;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::collections::HashMap;

use crate::services::llm::models::{LLMRequest, OutputFormat};

#[derive(Debug, thiserror::Error)]
pub enum PromptError {
    #[error("PROMPT_VAR_MISSING: template '{template}' requires variable '{variable}'")]
    VarMissing { template: String, variable: String },

    #[error("unknown prompt template: {0}")]
    UnknownTemplate(String),
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PromptExample {
    pub input: String,
    pub output: String,
}

#[derive(Debug, Clone)]
pub struct PromptTemplate {
    pub name: &'static str,
    pub system_prompt: String,
    pub user_template: String,
    /// Declared variables; all of them must resolve at build time.
    pub variables: Vec<&'static str>,
    pub output_format: OutputFormat,
    pub examples: Vec<PromptExample>,
    pub version: u32,
}

/// Variable source for one build. Free-form metadata wins over the
/// structured fields so callers can override anything.
#[derive(Debug, Clone, Default)]
pub struct PromptContext {
    pub session_history: Vec<String>,
    pub workspace: String,
    pub three_elements: Option<String>,
    pub retrieval_context: Vec<String>,
    pub metadata: HashMap<String, String>,
}

impl PromptContext {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_var(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.metadata.insert(name.into(), value.into());
        self
    }

    pub fn with_workspace(mut self, workspace: impl Into<String>) -> Self {
        self.workspace = workspace.into();
        self
    }

    pub fn with_session_history(mut self, history: Vec<String>) -> Self {
        self.session_history = history;
        self
    }

    pub fn with_three_elements(mut self, elements: impl Into<String>) -> Self {
        self.three_elements = Some(elements.into());
        self
    }

    pub fn with_retrieval_context(mut self, context: Vec<String>) -> Self {
        self.retrieval_context = context;
        self
    }

    fn resolve(&self, name: &str) -> Option<String> {
        if let Some(value) = self.metadata.get(name) {
            return Some(value.clone());
        }
        match name {
            "today" => Some(Utc::now().format("%Y-%m-%d %H:%M:%S").to_string()),
            "workspace" => (!self.workspace.is_empty()).then(|| self.workspace.clone()),
            "session_history" => {
                (!self.session_history.is_empty()).then(|| self.session_history.join("\n"))
            },
            "three_elements" => self.three_elements.clone(),
            "retrieval_context" => {
                (!self.retrieval_context.is_empty()).then(|| self.retrieval_context.join("\n"))
            },
            _ => None,
        }
    }
}

/// A built prompt, ready for the façade.
#[derive(Debug, Clone)]
pub struct Prompt {
    pub system: String,
    pub content: String,
    pub format: OutputFormat,
    pub examples: Vec<PromptExample>,
}

impl Prompt {
    /// Identity hash over the normalized prompt body.
    pub fn hash(&self) -> String {
        let mut hasher = Sha256::new();
        hasher.update(self.system.trim().as_bytes());
        hasher.update([0x1f]);
        hasher.update(self.content.trim().as_bytes());
        hasher.update([0x1f]);
        hasher.update(self.format.as_str().as_bytes());
        format!("{:x}", hasher.finalize())
    }

    pub fn to_request(&self) -> LLMRequest {
        LLMRequest::new(self.content.clone())
            .with_system(self.system.clone())
            .with_format(self.format)
    }
}

// ============================================================================
// Manager
// ============================================================================

pub struct PromptManager {
    templates: HashMap<&'static str, PromptTemplate>,
}

impl PromptManager {
    /// Manager preloaded with the default template set.
    pub fn new() -> Self {
        let mut manager = Self { templates: HashMap::new() };
        for template in default_templates() {
            manager.register(template);
        }
        manager
    }

    pub fn register(&mut self, template: PromptTemplate) {
        self.templates.insert(template.name, template);
    }

    pub fn get(&self, name: &str) -> Option<&PromptTemplate> {
        self.templates.get(name)
    }

    pub fn template_names(&self) -> Vec<&'static str> {
        let mut names: Vec<_> = self.templates.keys().copied().collect();
        names.sort_unstable();
        names
    }

    pub fn build_prompt(&self, name: &str, context: &PromptContext) -> Result<Prompt, PromptError> {
        let template = self
            .templates
            .get(name)
            .ok_or_else(|| PromptError::UnknownTemplate(name.to_string()))?;

        let mut system = template.system_prompt.clone();
        let mut content = template.user_template.clone();

        // Declared variables are mandatory
        for variable in &template.variables {
            let value = context.resolve(variable).ok_or_else(|| PromptError::VarMissing {
                template: name.to_string(),
                variable: (*variable).to_string(),
            })?;
            let placeholder = format!("{{{{{variable}}}}}");
            system = system.replace(&placeholder, &value);
            content = content.replace(&placeholder, &value);
        }

        // The time anchor is always available even when undeclared
        if let Some(today) = context.resolve("today") {
            system = system.replace("{{today}}", &today);
            content = content.replace("{{today}}", &today);
        }

        Ok(Prompt {
            system,
            content,
            format: template.output_format,
            examples: template.examples.clone(),
        })
    }
}

impl Default for PromptManager {
    fn default() -> Self {
        Self::new()
    }
}

// ============================================================================
// Default templates
// ============================================================================

pub const TPL_THREE_ELEMENTS: &str = "three_elements_analysis";
pub const TPL_QUERY_REWRITE: &str = "query_rewrite";
pub const TPL_STORAGE_STRUCTURING: &str = "storage_structuring";
pub const TPL_LIGHTWEIGHT_RECALL: &str = "lightweight_recall";
pub const TPL_DEEP_INTENT: &str = "deep_intent";

/// Envelope schema block shared by the two recall templates.
const ENVELOPE_FORMAT: &str = r#"
Respond with a single JSON object in exactly this shape:

```json
{
  "timeline_recall": {"start_time": "YYYY-MM-DD HH:mm:ss", "end_time": "YYYY-MM-DD HH:mm:ss"},
  "intent_analysis": {
    "core_intent": "...", "intent_type": "...", "intent_category": "...",
    "key_concepts": ["..."], "time_scope": "...", "urgency_level": "...",
    "expected_outcome": "..."
  },
  "key_extraction": {
    "project_keywords": ["..."], "technical_keywords": ["..."],
    "business_keywords": ["..."], "time_keywords": ["..."], "action_keywords": ["..."]
  },
  "retrieval_strategy": {
    "timeline_queries": [{"query": "...", "priority": 3}],
    "knowledge_queries": [{"query": "...", "priority": 3}],
    "vector_queries": [{"query": "...", "priority": 3}]
  },
  "confidence_level": 0.0
}
```

Rules:
- "timeline_recall" is null unless the user is asking to reconstruct a
  specific past time interval. When it is set, both timestamps must be
  concrete and start_time must precede end_time.
- Resolve every relative time phrase ("yesterday", "last week") against
  the current time given above; never invent dates.
- Priorities are integers from 1 (low) to 5 (high).
- Omit nothing; use null or empty arrays for fields with no content."#;

/// Output schema block for the storage structuring task.
const STRUCTURING_FORMAT: &str = r#"
Respond with a single JSON object:

```json
{
  "timeline_data": {
    "title": "...", "content": "...", "event_type": "...",
    "keywords": ["..."], "importance_score": 5,
    "tech_stack": [], "project_context": ""
  },
  "knowledge_graph_data": {
    "concepts": [{"name": "...", "type": "...", "properties": {}, "importance": 0.5}],
    "relationships": [{"source": "...", "target": "...", "type": "...", "strength": 0.5, "description": ""}]
  },
  "vector_data": {
    "content": "...", "semantic_tags": ["..."],
    "context_summary": "...", "relevance_score": 0.5
  },
  "storage_recommendation": {
    "timeline_priority": 0.5, "knowledge_priority": 0.5,
    "vector_priority": 0.5, "reasoning": "..."
  }
}
```

Constraints: title 1-200 chars; timeline content 1-10000 chars; vector
content 10-50000 chars; importance_score 1-10; every priority, importance
and strength in [0,1]; at least one keyword, one semantic tag and one
concept. Set a projection to null when the content has no useful shape
for it."#;

/// Output schema block for three-elements analysis.
const THREE_ELEMENTS_FORMAT: &str = r#"
Respond with a single JSON object:

```json
{
  "task": "...",
  "entities": [{"text": "...", "type": "...", "confidence": 0.9}],
  "outcome": "..."
}
```"#;

fn default_templates() -> Vec<PromptTemplate> {
    vec![
        PromptTemplate {
            name: TPL_LIGHTWEIGHT_RECALL,
            system_prompt: format!(
                "You are the query analyzer of a personal memory system. The current \
                 time is {{{{today}}}} (UTC). Extract intent and keywords from the user \
                 query quickly and with wide recall: prefer more keywords and more \
                 candidate queries over precision.\n{ENVELOPE_FORMAT}"
            ),
            user_template: "User query:\n{{query}}".to_string(),
            variables: vec!["query"],
            output_format: OutputFormat::Json,
            examples: vec![],
            version: 1,
        },
        PromptTemplate {
            name: TPL_DEEP_INTENT,
            system_prompt: format!(
                "You are the query analyzer of a personal memory system. The current \
                 time is {{{{today}}}} (UTC). You are given conversation context; use it \
                 to infer the user's precise intent and emit tightly-scoped retrieval \
                 queries with high confidence.\n{ENVELOPE_FORMAT}"
            ),
            user_template: "Conversation context:\n{{context}}\n\nUser query:\n{{query}}"
                .to_string(),
            variables: vec!["query", "context"],
            output_format: OutputFormat::Json,
            examples: vec![],
            version: 1,
        },
        PromptTemplate {
            name: TPL_STORAGE_STRUCTURING,
            system_prompt: format!(
                "You are the storage planner of a personal memory system. The current \
                 time is {{{{today}}}} (UTC). Project the given memory content into three \
                 backend representations and score how strongly it belongs in each.\
                 \n{STRUCTURING_FORMAT}"
            ),
            user_template: "Memory content:\n{{content}}".to_string(),
            variables: vec!["content"],
            output_format: OutputFormat::Json,
            examples: vec![],
            version: 1,
        },
        PromptTemplate {
            name: TPL_QUERY_REWRITE,
            system_prompt: "You rewrite search queries for a personal memory system. \
                            Produce a sharper query preserving the original meaning: \
                            expand abbreviations, add the likely technical terms, drop \
                            filler words. Reply with the rewritten query text only."
                .to_string(),
            user_template: "Original query:\n{{query}}".to_string(),
            variables: vec!["query"],
            output_format: OutputFormat::Text,
            examples: vec![PromptExample {
                input: "that redis thing from standup".to_string(),
                output: "Redis cache eviction issue discussed in standup".to_string(),
            }],
            version: 1,
        },
        PromptTemplate {
            name: TPL_THREE_ELEMENTS,
            system_prompt: format!(
                "You analyze a development activity into its three elements: the task \
                 being worked on, the entities involved, and the outcome. The current \
                 time is {{{{today}}}} (UTC).\n{THREE_ELEMENTS_FORMAT}"
            ),
            user_template: "Activity:\n{{query}}".to_string(),
            variables: vec!["query"],
            output_format: OutputFormat::Json,
            examples: vec![],
            version: 1,
        },
    ]
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_templates_registered() {
        let manager = PromptManager::new();
        assert_eq!(
            manager.template_names(),
            vec![
                TPL_DEEP_INTENT,
                TPL_LIGHTWEIGHT_RECALL,
                TPL_QUERY_REWRITE,
                TPL_STORAGE_STRUCTURING,
                TPL_THREE_ELEMENTS,
            ]
        );
    }

    #[test]
    fn substitutes_declared_variables() {
        let manager = PromptManager::new();
        let context = PromptContext::new().with_var("query", "what broke yesterday");

        let prompt = manager
            .build_prompt(TPL_LIGHTWEIGHT_RECALL, &context)
            .unwrap();
        assert!(prompt.content.contains("what broke yesterday"));
        assert_eq!(prompt.format, OutputFormat::Json);
        // No leftover placeholders
        assert!(!prompt.system.contains("{{today}}"));
        assert!(!prompt.content.contains("{{query}}"));
    }

    #[test]
    fn missing_variable_fails() {
        let manager = PromptManager::new();
        let err = manager
            .build_prompt(TPL_DEEP_INTENT, &PromptContext::new().with_var("query", "q"))
            .unwrap_err();
        match err {
            PromptError::VarMissing { variable, .. } => assert_eq!(variable, "context"),
            other => panic!("expected VarMissing, got {other}"),
        }
    }

    #[test]
    fn unknown_template_fails() {
        let manager = PromptManager::new();
        assert!(matches!(
            manager.build_prompt("nope", &PromptContext::new()),
            Err(PromptError::UnknownTemplate(_))
        ));
    }

    #[test]
    fn today_anchor_is_dynamic() {
        let manager = PromptManager::new();
        let context = PromptContext::new().with_var("query", "q");
        let prompt = manager
            .build_prompt(TPL_LIGHTWEIGHT_RECALL, &context)
            .unwrap();

        let year = Utc::now().format("%Y-").to_string();
        assert!(prompt.system.contains(&year));
    }

    #[test]
    fn hash_stable_for_same_body_and_differs_on_change() {
        let manager = PromptManager::new();
        let context = PromptContext::new()
            .with_var("query", "q")
            .with_var("today", "2025-01-15 00:00:00");

        let a = manager.build_prompt(TPL_LIGHTWEIGHT_RECALL, &context).unwrap();
        let b = manager.build_prompt(TPL_LIGHTWEIGHT_RECALL, &context).unwrap();
        assert_eq!(a.hash(), b.hash());

        let other = manager
            .build_prompt(
                TPL_LIGHTWEIGHT_RECALL,
                &PromptContext::new()
                    .with_var("query", "different")
                    .with_var("today", "2025-01-15 00:00:00"),
            )
            .unwrap();
        assert_ne!(a.hash(), other.hash());
    }

    #[test]
    fn metadata_overrides_builtin() {
        let context = PromptContext::new().with_var("today", "frozen");
        assert_eq!(context.resolve("today").as_deref(), Some("frozen"));
    }
}
