pub mod adapters;
pub mod llm;
pub mod prompt;
pub mod retrieval;
pub mod semantic;
pub mod storage;

pub use adapters::{
    AdapterError, GraphExpansion, GraphPage, InMemoryKnowledgeStore, InMemoryTimelineStore,
    InMemoryVectorStore, KnowledgeStore, TimelinePage, TimelineQuery, TimelineStore, VectorPage,
    VectorQuery, VectorStore,
};
pub use llm::{
    build_factory, Capabilities, ClientFactory, LLMError, LLMFacade, LLMProviderClient,
    LLMRequest, LLMResponse, OutputFormat, ProviderKind, TaskType,
};
pub use prompt::{Prompt, PromptContext, PromptError, PromptManager, PromptTemplate};
pub use retrieval::{
    MultiDimRetrievalEngine, RetrievalOptions, RetrievalOutcome, RetrievalQuery,
};
pub use semantic::{
    AnalysisStrategy, DeepIntentStrategy, LightweightStrategy, SemanticAnalysisEngine,
    SemanticError,
};
pub use storage::{MultiDimStorageEngine, StorageError, StorageOptions, StorageStats};
