//! Recursive chunk → summarize → recombine loop.
//!
//! Each loop turn first evaluates a [`Checkpoint`]: if the working text already fits the target
//! budget the run stops, otherwise the turn becomes a compression pass at the level its position
//! dictates. Only completed passes count towards `iterations_performed`, so the final budget
//! check is never mistaken for work.

use crate::llm::{CompletionRequest, LlmClient};
use crate::tokens::TokenEstimator;
use futures_util::future::try_join_all;
use std::sync::Arc;
use tokio::time::Instant;

use super::chunking::split_into_chunks;
use super::prompts::{CHUNK_SEPARATOR, chunk_prompt, system_prompt};
use super::types::{
    Chunk, ChunkSummary, ChunkingConfig, CompressionLevel, HierarchicalError,
    HierarchicalRunResult,
};

/// Outcome of the budget check that opens every loop turn.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Checkpoint {
    /// Working text fits the budget; stop without another pass.
    TargetReached,
    /// Working text is over budget; run a pass at this level.
    Compress(CompressionLevel),
}

fn checkpoint(current_tokens: usize, target_tokens: usize, completed_passes: usize) -> Checkpoint {
    if current_tokens <= target_tokens {
        Checkpoint::TargetReached
    } else {
        Checkpoint::Compress(CompressionLevel::for_iteration(completed_passes + 1))
    }
}

/// Compresses text towards a token budget with parallel chunk summaries.
pub struct HierarchicalSummarizer {
    llm: Arc<dyn LlmClient>,
    estimator: Arc<dyn TokenEstimator>,
}

impl HierarchicalSummarizer {
    /// Build a summarizer around a completion client and token estimator.
    pub fn new(llm: Arc<dyn LlmClient>, estimator: Arc<dyn TokenEstimator>) -> Self {
        Self { llm, estimator }
    }

    /// Run the hierarchical loop without a deadline.
    pub async fn run(
        &self,
        text: &str,
        language: &str,
        topic: &str,
        config: &ChunkingConfig,
    ) -> Result<HierarchicalRunResult, HierarchicalError> {
        self.run_until(text, language, topic, config, None).await
    }

    /// Run the hierarchical loop, abandoning in-flight chunk calls once `deadline` passes.
    pub async fn run_until(
        &self,
        text: &str,
        language: &str,
        topic: &str,
        config: &ChunkingConfig,
        deadline: Option<Instant>,
    ) -> Result<HierarchicalRunResult, HierarchicalError> {
        config.validate()?;

        let chars_per_token = self.estimator.language_ratio(language);
        let mut current_text = text.to_string();
        let mut completed_passes = 0usize;
        let mut total_input_tokens = 0u64;
        let mut total_output_tokens = 0u64;
        let mut total_chunks_processed = 0usize;
        let mut compression_levels_used = Vec::new();

        while completed_passes < config.max_iterations {
            let current_tokens = self.estimator.estimate_tokens(&current_text, language);
            let level = match checkpoint(current_tokens, config.target_tokens, completed_passes) {
                Checkpoint::TargetReached => {
                    tracing::info!(
                        iterations = completed_passes,
                        tokens = current_tokens,
                        target = config.target_tokens,
                        "Target token budget reached"
                    );
                    return Ok(HierarchicalRunResult {
                        summary_text: current_text,
                        iterations_performed: completed_passes,
                        total_input_tokens,
                        total_output_tokens,
                        compression_levels_used,
                        total_chunks_processed,
                        final_token_count: current_tokens,
                        target_reached: true,
                    });
                }
                Checkpoint::Compress(level) => level,
            };

            let iteration = completed_passes + 1;
            let chunks = split_into_chunks(
                &current_text,
                config.chunk_size_tokens,
                config.overlap_percent,
                chars_per_token,
            )?;
            tracing::info!(
                iteration,
                level = %level,
                tokens = current_tokens,
                target = config.target_tokens,
                chunks = chunks.len(),
                "Starting compression pass"
            );

            let summaries = self
                .summarize_chunks(&chunks, level, topic, config, iteration, deadline)
                .await?;

            compression_levels_used.push(level);
            total_chunks_processed += chunks.len();
            let mut combined = Vec::with_capacity(summaries.len());
            for summary in summaries {
                total_input_tokens += summary.input_tokens;
                total_output_tokens += summary.output_tokens;
                combined.push(summary.summary_text);
            }
            current_text = combined.join(CHUNK_SEPARATOR);
            completed_passes = iteration;
        }

        // The budget is only checked at the top of a turn, so an exhausted run never reports
        // the target as reached even if the last pass happened to land under it.
        let final_token_count = self.estimator.estimate_tokens(&current_text, language);
        tracing::warn!(
            iterations = completed_passes,
            tokens = final_token_count,
            target = config.target_tokens,
            "Iteration cap exhausted before reaching the target"
        );

        Ok(HierarchicalRunResult {
            summary_text: current_text,
            iterations_performed: completed_passes,
            total_input_tokens,
            total_output_tokens,
            compression_levels_used,
            total_chunks_processed,
            final_token_count,
            target_reached: false,
        })
    }

    /// Summarize every chunk concurrently, returning summaries in chunk order.
    ///
    /// The first failing call fails the whole fan-out and drops the calls still in flight.
    async fn summarize_chunks(
        &self,
        chunks: &[Chunk],
        level: CompressionLevel,
        topic: &str,
        config: &ChunkingConfig,
        iteration: usize,
        deadline: Option<Instant>,
    ) -> Result<Vec<ChunkSummary>, HierarchicalError> {
        let total = chunks.len();
        let system_prompt = system_prompt(level);

        let calls = chunks.iter().map(|chunk| {
            let position = chunk.index + 1;
            let request = CompletionRequest {
                prompt: chunk_prompt(&chunk.text, position, total, topic),
                system_prompt: system_prompt.to_string(),
                model: config.model.clone(),
                temperature: config.temperature,
                max_tokens: config.max_output_tokens_per_chunk,
            };
            async move {
                let completion = self
                    .llm
                    .generate_completion(request)
                    .await
                    .map_err(|source| HierarchicalError::ChunkSummarization {
                        index: position,
                        total,
                        source,
                    })?;
                tracing::debug!(
                    iteration,
                    chunk = position,
                    total,
                    input_tokens = completion.input_tokens,
                    output_tokens = completion.output_tokens,
                    "Chunk summarized"
                );
                Ok::<_, HierarchicalError>(ChunkSummary {
                    summary_text: completion.content,
                    input_tokens: completion.input_tokens,
                    output_tokens: completion.output_tokens,
                })
            }
        });

        let fan_out = try_join_all(calls);
        match deadline {
            Some(deadline) => tokio::time::timeout_at(deadline, fan_out)
                .await
                .map_err(|_| HierarchicalError::DeadlineExceeded { iteration })?,
            None => fan_out.await,
        }
    }
}
