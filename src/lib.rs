//! Engram
//!
//! A multi-dimensional retrieval and storage fabric: one memory event
//! is projected into a timeline log, a knowledge graph and a vector
//! index, and one query fans out to all three and comes back as a
//! single fused ranking. An LLM façade extracts the structure on both
//! paths.

use std::sync::Arc;

pub mod config;
pub mod models;
pub mod services;
pub mod utils;

// Re-export commonly used types
pub use config::Config;
pub use models::{RetrievalResult, SemanticAnalysisResult, StorageRequest, StorageResult};
pub use services::llm::{LLMError, LLMFacade, ProviderKind, TaskType};
pub use services::{
    KnowledgeStore, MultiDimRetrievalEngine, MultiDimStorageEngine, PromptManager,
    RetrievalOptions, RetrievalQuery, SemanticAnalysisEngine, StorageOptions, TimelineStore,
    VectorStore,
};

/// The assembled fabric.
///
/// Rust's type system is the DI container: every engine sits behind an
/// `Arc` and the struct clones cheaply into any task that needs it.
#[derive(Clone)]
pub struct MemoryFabric {
    pub config: Config,
    pub llm: Arc<LLMFacade>,
    pub prompts: Arc<PromptManager>,
    pub semantic: Arc<SemanticAnalysisEngine>,
    pub storage: Arc<MultiDimStorageEngine>,
    pub retrieval: Arc<MultiDimRetrievalEngine>,
}

impl MemoryFabric {
    /// Wire the fabric from configuration and a set of adapters. The
    /// provider client factory is built once and installed as the
    /// process-wide singleton; a pre-existing global (tests, embedders)
    /// is left in place.
    pub fn new(
        config: Config,
        timeline: Option<Arc<dyn TimelineStore>>,
        knowledge: Option<Arc<dyn KnowledgeStore>>,
        vector: Option<Arc<dyn VectorStore>>,
    ) -> Self {
        let factory = Arc::new(services::build_factory(&config.llm));
        services::ClientFactory::install_global(Arc::clone(&factory));

        let llm = Arc::new(LLMFacade::new(config.llm.clone(), factory));
        let prompts = Arc::new(PromptManager::new());

        let semantic = Arc::new(SemanticAnalysisEngine::new(Arc::new(
            services::LightweightStrategy::new(Arc::clone(&llm), Arc::clone(&prompts)),
        )));

        let storage = Arc::new(MultiDimStorageEngine::new(
            StorageOptions::from_config(&config),
            Some(Arc::clone(&llm)),
            Arc::clone(&prompts),
            timeline.clone(),
            knowledge.clone(),
            vector.clone(),
        ));

        let retrieval = Arc::new(MultiDimRetrievalEngine::new(
            RetrievalOptions::from_config(&config),
            timeline,
            knowledge,
            vector,
        ));

        Self { config, llm, prompts, semantic, storage, retrieval }
    }
}

#[cfg(test)]
mod tests;
