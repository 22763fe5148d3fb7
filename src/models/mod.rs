pub mod retrieval;
pub mod semantic;
pub mod storage;

pub use retrieval::{
    KnowledgeNode, KnowledgePath, KnowledgeRelationship, ResultSource, RetrievalResult,
    TimelineEvent, VectorDocument,
};
pub use semantic::{
    ContextInfo, Entity, QueryBundle, SemanticAnalysisResult, SmartAnalysis, TimeWindow,
    TokenUsage, INTENT_TIME_RECALL,
};
pub use storage::{
    ConceptData, DimensionError, KnowledgeGraphData, RelationshipData, StorageAnalysis,
    StorageRecommendation, StorageRequest, StorageResult, TimelineData, VectorData, PRIORITY_GATE,
};
