//! Summarization pipeline: chunking, hierarchical compression, and the quality-gated service.

pub mod chunking;
pub mod hierarchical;
pub mod pricing;
pub mod prompts;
pub mod retry;
mod service;
pub mod types;

pub use hierarchical::HierarchicalSummarizer;
pub use pricing::{ModelPricing, TokenPrice};
pub use retry::{Escalation, EscalationPolicy, MAX_RETRIES, StrategyParams, escalate};
pub use service::{DEFAULT_QUALITY_THRESHOLD, ServiceSettings, SummarizationService};
pub use types::{
    Chunk, ChunkSummary, ChunkingConfig, ChunkingError, CompressionLevel, HierarchicalError,
    HierarchicalRunResult, HierarchicalStats, ProcessingMethod, QualityMetadata,
    ServiceInitError, SummarizationError, SummarizationJob, SummarizationOutcome,
    SummarizationStrategy,
};
