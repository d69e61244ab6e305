//! Core data types and error definitions for the summarization pipeline.

use crate::embedding::EmbeddingClientError;
use crate::llm::LlmClientError;
use crate::quality::QualityError;
use anyhow::Error as TokenizerError;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use thiserror::Error;

/// Default token budget a hierarchical run compresses towards.
pub const DEFAULT_TARGET_TOKENS: usize = 200_000;
/// Default cap on compression passes per run.
pub const DEFAULT_MAX_ITERATIONS: usize = 5;
/// Default chunk size, in estimated tokens.
pub const DEFAULT_CHUNK_SIZE_TOKENS: usize = 115_000;
/// Default overlap between neighbouring chunks, in percent.
pub const DEFAULT_OVERLAP_PERCENT: f64 = 5.0;
/// Default bypass threshold below which documents are returned verbatim.
pub const DEFAULT_NO_SUMMARY_THRESHOLD_TOKENS: usize = 3_000;

/// Errors produced while splitting text into chunks.
#[derive(Debug, Error)]
pub enum ChunkingError {
    /// Chunking configured an impossible token budget.
    #[error("chunk size must be greater than zero")]
    InvalidChunkSize,
    /// Overlap percent outside `0..=100`.
    #[error("chunk overlap must be between 0 and 100 percent, got {0}")]
    InvalidOverlap(f64),
    /// Tokenizer resources were unavailable for the configured model.
    #[error("failed to initialize tokenizer for model '{model}': {source}")]
    Tokenizer {
        /// Model we attempted to load an encoding for.
        model: String,
        /// Underlying error raised by the tokenizer library.
        #[source]
        source: TokenizerError,
    },
}

/// Errors that abort a hierarchical run.
#[derive(Debug, Error)]
pub enum HierarchicalError {
    /// Working text could not be chunked.
    #[error("Failed to chunk document: {0}")]
    Chunking(#[from] ChunkingError),
    /// A single chunk summarization call failed; the whole run is abandoned.
    #[error("Failed to summarize chunk {index} of {total}: {source}")]
    ChunkSummarization {
        /// 1-based index of the failing chunk.
        index: usize,
        /// Number of chunks in the failing iteration.
        total: usize,
        /// Error returned by the completion client.
        #[source]
        source: LlmClientError,
    },
    /// The caller's deadline expired while chunk calls were in flight.
    #[error("Deadline exceeded during compression pass {iteration}")]
    DeadlineExceeded {
        /// 1-based compression pass that was interrupted.
        iteration: usize,
    },
}

/// Errors raised by [`crate::processing::SummarizationService::generate_summary`].
#[derive(Debug, Error)]
pub enum SummarizationError {
    /// The job requested a strategy this service does not implement.
    #[error("Unsupported summarization strategy '{0}'")]
    UnsupportedStrategy(String),
    /// The job specification is malformed.
    #[error("Invalid summarization job: {0}")]
    InvalidJob(String),
    /// The hierarchical run failed before producing a summary.
    #[error(transparent)]
    Hierarchical(#[from] HierarchicalError),
    /// The quality validator failed to score the summary.
    #[error("Quality validation failed: {0}")]
    Quality(#[from] QualityError),
    /// The job deadline expired while waiting for the quality validator.
    #[error("Deadline exceeded during quality validation")]
    DeadlineExceeded,
    /// Every attempt produced a summary below the quality threshold.
    #[error(
        "FAILED_QUALITY_CRITICAL: quality score {score:.2} below threshold {threshold:.2} after {attempts} attempts"
    )]
    QualityCritical {
        /// Score of the final attempt.
        score: f64,
        /// Threshold the job required.
        threshold: f64,
        /// Total attempts, original plus retries.
        attempts: u32,
    },
}

impl SummarizationError {
    /// Stable error code surfaced to the job system.
    pub fn code(&self) -> &'static str {
        match self {
            Self::UnsupportedStrategy(_) => "UNSUPPORTED_STRATEGY",
            Self::InvalidJob(_) => "INVALID_JOB",
            Self::Hierarchical(HierarchicalError::ChunkSummarization { .. }) => {
                "CHUNK_SUMMARIZATION_FAILED"
            }
            Self::Hierarchical(HierarchicalError::DeadlineExceeded { .. })
            | Self::DeadlineExceeded => "DEADLINE_EXCEEDED",
            Self::Hierarchical(HierarchicalError::Chunking(_)) => "CHUNKING_FAILED",
            Self::Quality(_) => "QUALITY_VALIDATION_FAILED",
            Self::QualityCritical { .. } => "FAILED_QUALITY_CRITICAL",
        }
    }
}

/// Errors raised while wiring the service from configuration.
#[derive(Debug, Error)]
pub enum ServiceInitError {
    /// Completion client could not be constructed.
    #[error("Failed to initialize completion client: {0}")]
    Llm(#[from] LlmClientError),
    /// Token estimator could not be constructed.
    #[error("Failed to initialize token estimator: {0}")]
    Tokenizer(#[from] ChunkingError),
    /// Embedding client for the quality validator could not be constructed.
    #[error("Failed to initialize embedding client: {0}")]
    Embedding(#[from] EmbeddingClientError),
}

/// Prompt aggressiveness used for one compression pass, ordered from least to most aggressive.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum CompressionLevel {
    /// Keep most detail; used for the first pass.
    Detailed,
    /// Keep key points and supporting detail; passes two and three.
    Balanced,
    /// Keep only essentials; pass four onwards.
    Aggressive,
}

impl CompressionLevel {
    /// Level for a 1-based compression pass.
    pub fn for_iteration(iteration: usize) -> Self {
        match iteration {
            0 | 1 => Self::Detailed,
            2 | 3 => Self::Balanced,
            _ => Self::Aggressive,
        }
    }

    /// Stable upper-case label.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Detailed => "DETAILED",
            Self::Balanced => "BALANCED",
            Self::Aggressive => "AGGRESSIVE",
        }
    }
}

impl fmt::Display for CompressionLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Parameters for one hierarchical run.
#[derive(Debug, Clone, PartialEq)]
pub struct ChunkingConfig {
    /// Token budget the run compresses towards.
    pub target_tokens: usize,
    /// Upper bound on compression passes.
    pub max_iterations: usize,
    /// Chunk size in estimated tokens.
    pub chunk_size_tokens: usize,
    /// Overlap between neighbouring chunks, in percent of the chunk size.
    pub overlap_percent: f64,
    /// Completion model used for chunk summaries.
    pub model: String,
    /// Sampling temperature for chunk summaries.
    pub temperature: f32,
    /// Output budget for each chunk summary.
    pub max_output_tokens_per_chunk: usize,
}

impl Default for ChunkingConfig {
    fn default() -> Self {
        Self {
            target_tokens: DEFAULT_TARGET_TOKENS,
            max_iterations: DEFAULT_MAX_ITERATIONS,
            chunk_size_tokens: DEFAULT_CHUNK_SIZE_TOKENS,
            overlap_percent: DEFAULT_OVERLAP_PERCENT,
            model: "llama3.1:8b".into(),
            temperature: 0.3,
            max_output_tokens_per_chunk: 10_000,
        }
    }
}

impl ChunkingConfig {
    /// Reject configurations the chunker cannot honour.
    pub fn validate(&self) -> Result<(), ChunkingError> {
        if self.chunk_size_tokens == 0 {
            return Err(ChunkingError::InvalidChunkSize);
        }
        if !(0.0..=100.0).contains(&self.overlap_percent) {
            return Err(ChunkingError::InvalidOverlap(self.overlap_percent));
        }
        Ok(())
    }
}

/// Contiguous char range of the working text handed to one summarization call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Chunk {
    /// 0-based position among the emitted chunks.
    pub index: usize,
    /// Chunk contents.
    pub text: String,
    /// First char offset (inclusive) in the working text.
    pub start_char: usize,
    /// Last char offset (exclusive) in the working text.
    pub end_char: usize,
}

/// Summary and usage for a single chunk.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChunkSummary {
    /// Summarized chunk text.
    pub summary_text: String,
    /// Prompt tokens consumed by the call.
    pub input_tokens: u64,
    /// Completion tokens produced by the call.
    pub output_tokens: u64,
}

/// Output of one complete hierarchical run.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct HierarchicalRunResult {
    /// Final working text.
    pub summary_text: String,
    /// Completed compression passes.
    pub iterations_performed: usize,
    /// Prompt tokens consumed across all passes.
    pub total_input_tokens: u64,
    /// Completion tokens produced across all passes.
    pub total_output_tokens: u64,
    /// Level used by each completed pass, in order.
    pub compression_levels_used: Vec<CompressionLevel>,
    /// Chunk calls issued across all passes.
    pub total_chunks_processed: usize,
    /// Estimated tokens of `summary_text`.
    pub final_token_count: usize,
    /// Whether `final_token_count` fits the target budget.
    pub target_reached: bool,
}

/// Strategies a job may request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SummarizationStrategy {
    /// Recursive chunk, summarize, recombine.
    Hierarchical,
}

impl FromStr for SummarizationStrategy {
    type Err = SummarizationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "" | "hierarchical" => Ok(Self::Hierarchical),
            other => Err(SummarizationError::UnsupportedStrategy(other.to_string())),
        }
    }
}

/// Job specification consumed from the surrounding job system.
///
/// Identifier fields are opaque and only echoed back in logs and metadata. Optional tuning
/// fields fall back to the service settings when absent.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct SummarizationJob {
    /// Course the file belongs to.
    pub course_id: Option<String>,
    /// Owning organization.
    pub organization_id: Option<String>,
    /// Uploaded file identifier.
    pub file_id: Option<String>,
    /// Correlation id used for tracing.
    pub correlation_id: Option<String>,
    /// Name of the uploaded file.
    pub original_filename: Option<String>,
    /// Text extracted from the uploaded document.
    pub extracted_text: String,
    /// ISO 639-1 language code of the text.
    pub language: String,
    /// Topic used to give chunk summaries context.
    pub topic: String,
    /// Requested strategy name; only `hierarchical` is implemented.
    pub strategy: String,
    /// Completion model override.
    pub model: Option<String>,
    /// Minimum acceptable quality score override.
    pub quality_threshold: Option<f64>,
    /// Token budget override for the summary.
    pub max_output_tokens: Option<usize>,
    /// Bypass threshold override.
    pub no_summary_threshold_tokens: Option<usize>,
    /// Wall-clock limit override, in seconds.
    pub timeout_secs: Option<u64>,
}

impl Default for SummarizationJob {
    fn default() -> Self {
        Self {
            course_id: None,
            organization_id: None,
            file_id: None,
            correlation_id: None,
            original_filename: None,
            extracted_text: String::new(),
            language: "en".into(),
            topic: String::new(),
            strategy: "hierarchical".into(),
            model: None,
            quality_threshold: None,
            max_output_tokens: None,
            no_summary_threshold_tokens: None,
            timeout_secs: None,
        }
    }
}

impl SummarizationJob {
    /// Build a job for `text` with every tuning knob left at the service defaults.
    pub fn new(
        extracted_text: impl Into<String>,
        language: impl Into<String>,
        topic: impl Into<String>,
    ) -> Self {
        Self {
            extracted_text: extracted_text.into(),
            language: language.into(),
            topic: topic.into(),
            ..Self::default()
        }
    }
}

/// How the processed content was produced.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ProcessingMethod {
    /// The document fit the bypass threshold and is returned verbatim.
    FullText,
    /// The document was compressed by the hierarchical summarizer.
    Hierarchical,
}

/// Statistics from the hierarchical run that produced the accepted summary.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct HierarchicalStats {
    /// Estimated tokens of the original document.
    pub original_token_count: usize,
    /// Estimated tokens of the accepted summary.
    pub final_token_count: usize,
    /// Completed compression passes.
    pub iterations_performed: usize,
    /// Chunk calls issued by the accepted run.
    pub total_chunks_processed: usize,
    /// Level used by each pass of the accepted run.
    pub compression_levels_used: Vec<CompressionLevel>,
    /// Whether the accepted run fit its token budget.
    pub target_reached: bool,
}

/// Metadata describing how the outcome was produced.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct QualityMetadata {
    /// Score of the accepted content, 1.0 for full text.
    pub quality_score: f64,
    /// Whether the accepted content cleared the threshold.
    pub quality_check_passed: bool,
    /// Threshold applied to the job.
    pub quality_threshold: f64,
    /// Retries that preceded the accepted attempt.
    pub retry_attempts: u32,
    /// Human-readable strategy changes applied by retries; absent when no retry ran.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub retry_strategy_changes: Option<Vec<String>>,
    /// Prompt tokens consumed across every attempt.
    pub input_tokens: u64,
    /// Completion tokens produced across every attempt.
    pub output_tokens: u64,
    /// Estimated spend across every attempt, in USD.
    pub estimated_cost_usd: f64,
    /// Model that produced the accepted summary.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub model_used: Option<String>,
    /// Summary length divided by original length, in chars.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub compression_ratio: Option<f64>,
    /// Statistics from the accepted hierarchical run.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub hierarchical: Option<HierarchicalStats>,
    /// Correlation id echoed from the job.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub correlation_id: Option<String>,
    /// Wall-clock time spent on the job.
    pub processing_time_ms: u64,
    /// RFC 3339 completion timestamp.
    pub completed_at: String,
}

/// Final result handed back to the job system.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SummarizationOutcome {
    /// Full text or accepted summary.
    pub processed_content: String,
    /// How `processed_content` was produced.
    pub processing_method: ProcessingMethod,
    /// Quality, retry, and usage metadata.
    pub quality_metadata: QualityMetadata,
    /// Always true for a returned outcome; failures surface as errors.
    pub success: bool,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn compression_level_schedule_never_regresses() {
        let levels: Vec<_> = (1..=8).map(CompressionLevel::for_iteration).collect();
        assert_eq!(levels[0], CompressionLevel::Detailed);
        assert_eq!(levels[1], CompressionLevel::Balanced);
        assert_eq!(levels[2], CompressionLevel::Balanced);
        assert_eq!(levels[3], CompressionLevel::Aggressive);
        assert!(levels.windows(2).all(|pair| pair[0] <= pair[1]));
    }

    #[test]
    fn chunking_config_validation() {
        assert!(ChunkingConfig::default().validate().is_ok());
        let zero = ChunkingConfig {
            chunk_size_tokens: 0,
            ..ChunkingConfig::default()
        };
        assert!(matches!(zero.validate(), Err(ChunkingError::InvalidChunkSize)));
        let overlap = ChunkingConfig {
            overlap_percent: 101.0,
            ..ChunkingConfig::default()
        };
        assert!(matches!(
            overlap.validate(),
            Err(ChunkingError::InvalidOverlap(_))
        ));
    }

    #[test]
    fn strategy_parsing_accepts_only_hierarchical() {
        assert_eq!(
            "Hierarchical".parse::<SummarizationStrategy>().unwrap(),
            SummarizationStrategy::Hierarchical
        );
        let error = "map_reduce".parse::<SummarizationStrategy>().unwrap_err();
        assert_eq!(error.code(), "UNSUPPORTED_STRATEGY");
    }

    #[test]
    fn job_deserializes_from_camel_case_with_defaults() {
        let job: SummarizationJob = serde_json::from_str(
            r#"{"extractedText":"hello","language":"ru","qualityThreshold":0.8,"correlationId":"c-1"}"#,
        )
        .expect("job");
        assert_eq!(job.extracted_text, "hello");
        assert_eq!(job.language, "ru");
        assert_eq!(job.strategy, "hierarchical");
        assert_eq!(job.quality_threshold, Some(0.8));
        assert_eq!(job.correlation_id.as_deref(), Some("c-1"));
        assert!(job.model.is_none());
    }

    #[test]
    fn critical_error_message_carries_numbers() {
        let error = SummarizationError::QualityCritical {
            score: 0.42,
            threshold: 0.75,
            attempts: 4,
        };
        let message = error.to_string();
        assert!(message.contains("FAILED_QUALITY_CRITICAL"));
        assert!(message.contains("0.42"));
        assert!(message.contains("0.75"));
        assert!(message.contains("4 attempts"));
    }
}
