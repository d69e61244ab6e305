//! Quality-gated summarization service.
//!
//! A job moves through a small state machine: documents under the bypass threshold are
//! returned verbatim; everything else is summarized hierarchically, scored by the quality
//! validator, and retried with escalating parameters until it passes or the retry budget runs
//! out. Transport failures from the completion client or the validator abort the job at once
//! and never consume a quality retry.

use crate::{
    config::Config,
    embedding::build_embedding_client,
    llm::{LlmClient, OllamaLlmClient},
    metrics::{MetricsSnapshot, SummaryMetrics},
    processing::{
        hierarchical::HierarchicalSummarizer,
        pricing::{ModelPricing, TokenPrice},
        retry::{EscalationPolicy, MAX_RETRIES, StrategyParams, escalate},
        types::{
            ChunkingConfig, DEFAULT_NO_SUMMARY_THRESHOLD_TOKENS, HierarchicalRunResult,
            HierarchicalStats, ProcessingMethod, QualityMetadata, ServiceInitError,
            SummarizationError, SummarizationJob, SummarizationOutcome, SummarizationStrategy,
        },
    },
    quality::{QualityAssessment, QualityValidator, SemanticQualityValidator},
    tokens::{TokenEstimator, build_token_estimator},
};
use std::sync::Arc;
use std::time::Duration;
use time::{OffsetDateTime, format_description::well_known::Rfc3339};
use tokio::time::Instant;
use tracing::Instrument;

/// Default minimum quality score.
pub const DEFAULT_QUALITY_THRESHOLD: f64 = 0.75;

/// Service-wide defaults a job may override.
#[derive(Debug, Clone, PartialEq)]
pub struct ServiceSettings {
    /// Base chunking parameters; model and target are replaced per attempt.
    pub chunking: ChunkingConfig,
    /// Minimum acceptable quality score.
    pub quality_threshold: f64,
    /// Documents at or below this many tokens are returned verbatim.
    pub no_summary_threshold_tokens: usize,
    /// Retry ladder settings.
    pub escalation: EscalationPolicy,
    /// Price table used for cost estimates.
    pub pricing: ModelPricing,
    /// Wall-clock limit applied when the job sets none.
    pub job_timeout: Option<Duration>,
}

impl Default for ServiceSettings {
    fn default() -> Self {
        Self {
            chunking: ChunkingConfig::default(),
            quality_threshold: DEFAULT_QUALITY_THRESHOLD,
            no_summary_threshold_tokens: DEFAULT_NO_SUMMARY_THRESHOLD_TOKENS,
            escalation: EscalationPolicy::default(),
            pricing: ModelPricing::default(),
            job_timeout: None,
        }
    }
}

impl ServiceSettings {
    /// Settings derived from the loaded configuration.
    pub fn from_config(config: &Config) -> Self {
        Self {
            chunking: config.chunking_config(),
            quality_threshold: config.quality_threshold,
            no_summary_threshold_tokens: config.no_summary_threshold_tokens,
            escalation: EscalationPolicy {
                upgrade_model: config.summarization_upgrade_model.clone(),
                token_budget_growth: config.token_budget_growth,
            },
            pricing: ModelPricing::uniform(TokenPrice {
                input_per_million: config.input_cost_per_million,
                output_per_million: config.output_cost_per_million,
            }),
            job_timeout: config.job_timeout,
        }
    }
}

/// Job parameters after defaults and overrides are resolved.
struct ResolvedJob<'a> {
    text: &'a str,
    language: &'a str,
    topic: &'a str,
    threshold: f64,
    no_summary_threshold_tokens: usize,
    initial: StrategyParams,
    deadline: Option<Instant>,
}

/// Usage summed over every attempt of a job.
#[derive(Debug, Default)]
struct Usage {
    input_tokens: u64,
    output_tokens: u64,
    cost_usd: f64,
}

/// Turns extracted document text into content fit for course generation.
///
/// Construct once near process start and share through an `Arc`; jobs never share mutable
/// state apart from the metrics counters.
pub struct SummarizationService {
    summarizer: HierarchicalSummarizer,
    estimator: Arc<dyn TokenEstimator>,
    validator: Arc<dyn QualityValidator>,
    settings: ServiceSettings,
    metrics: Arc<SummaryMetrics>,
}

impl SummarizationService {
    /// Build a service from explicit collaborators.
    pub fn new(
        llm: Arc<dyn LlmClient>,
        estimator: Arc<dyn TokenEstimator>,
        validator: Arc<dyn QualityValidator>,
        settings: ServiceSettings,
    ) -> Self {
        Self {
            summarizer: HierarchicalSummarizer::new(llm, estimator.clone()),
            estimator,
            validator,
            settings,
            metrics: Arc::new(SummaryMetrics::new()),
        }
    }

    /// Wire the Ollama-backed service described by `config`.
    pub fn from_config(config: &Config) -> Result<Self, ServiceInitError> {
        tracing::info!(url = %config.ollama_url, "Initializing completion client");
        let llm: Arc<dyn LlmClient> = Arc::new(OllamaLlmClient::new(config.ollama_url.clone())?);
        let estimator = build_token_estimator(config.token_estimator, &config.summarization_model)?;
        let embeddings = build_embedding_client(config)?;
        tracing::info!(
            provider = ?config.quality_embedding_provider,
            "Quality validator initialized"
        );
        let validator: Arc<dyn QualityValidator> =
            Arc::new(SemanticQualityValidator::new(embeddings));

        Ok(Self::new(
            llm,
            estimator,
            validator,
            ServiceSettings::from_config(config),
        ))
    }

    /// Return the current activity counters.
    pub fn metrics_snapshot(&self) -> MetricsSnapshot {
        self.metrics.snapshot()
    }

    /// Produce the processed content for a job.
    ///
    /// Fails with [`SummarizationError::QualityCritical`] only after every retry is exhausted;
    /// other errors abort the job as soon as they occur.
    pub async fn generate_summary(
        &self,
        job: &SummarizationJob,
    ) -> Result<SummarizationOutcome, SummarizationError> {
        let span = tracing::info_span!(
            "summarization_job",
            correlation_id = job.correlation_id.as_deref().unwrap_or(""),
            file_id = job.file_id.as_deref().unwrap_or(""),
            course_id = job.course_id.as_deref().unwrap_or(""),
        );
        let result = self.process(job).instrument(span).await;
        match &result {
            Ok(_) | Err(SummarizationError::QualityCritical { .. }) => {}
            Err(_) => self.metrics.record_failure(),
        }
        result
    }

    async fn process(
        &self,
        job: &SummarizationJob,
    ) -> Result<SummarizationOutcome, SummarizationError> {
        let started = std::time::Instant::now();
        self.metrics.record_job_started();

        let resolved = self.resolve(job)?;
        let original_tokens = self
            .estimator
            .estimate_tokens(resolved.text, resolved.language);
        tracing::info!(
            filename = job.original_filename.as_deref().unwrap_or(""),
            language = resolved.language,
            tokens = original_tokens,
            bypass_threshold = resolved.no_summary_threshold_tokens,
            "Summarization job started"
        );

        if original_tokens <= resolved.no_summary_threshold_tokens {
            self.metrics.record_bypass();
            tracing::info!(tokens = original_tokens, "Document fits; returning full text");
            return Ok(SummarizationOutcome {
                processed_content: resolved.text.to_string(),
                processing_method: ProcessingMethod::FullText,
                quality_metadata: QualityMetadata {
                    quality_score: 1.0,
                    quality_check_passed: true,
                    quality_threshold: resolved.threshold,
                    retry_attempts: 0,
                    retry_strategy_changes: None,
                    input_tokens: 0,
                    output_tokens: 0,
                    estimated_cost_usd: 0.0,
                    model_used: None,
                    compression_ratio: None,
                    hierarchical: None,
                    correlation_id: job.correlation_id.clone(),
                    processing_time_ms: elapsed_ms(started),
                    completed_at: now_rfc3339(),
                },
                success: true,
            });
        }

        let mut params = resolved.initial.clone();
        let mut changes = Vec::new();
        let mut usage = Usage::default();
        let mut last_score = 0.0;

        for attempt in 0..=MAX_RETRIES {
            if attempt > 0 {
                let escalation = escalate(&params, attempt, &self.settings.escalation);
                params = escalation.params;
                self.metrics.record_retry();
                tracing::info!(
                    retry = attempt,
                    model = %params.model,
                    token_budget = params.token_budget,
                    change = escalation.change.as_deref().unwrap_or("none"),
                    "Retrying summarization"
                );
                changes.extend(escalation.change);
            }

            let run = self
                .summarizer
                .run_until(
                    resolved.text,
                    resolved.language,
                    resolved.topic,
                    &params.apply(&self.settings.chunking),
                    resolved.deadline,
                )
                .await?;
            usage.input_tokens += run.total_input_tokens;
            usage.output_tokens += run.total_output_tokens;
            usage.cost_usd += self.settings.pricing.cost_usd(
                &params.model,
                run.total_input_tokens,
                run.total_output_tokens,
            );
            self.metrics.record_attempt(
                run.total_chunks_processed as u64,
                run.total_input_tokens,
                run.total_output_tokens,
            );

            let assessment = self.validate(&resolved, &run.summary_text).await?;
            if assessment.passed {
                self.metrics.record_summarized();
                tracing::info!(
                    attempt = attempt + 1,
                    score = assessment.quality_score,
                    threshold = resolved.threshold,
                    iterations = run.iterations_performed,
                    final_tokens = run.final_token_count,
                    "Summary passed quality gate"
                );
                let metadata = QualityMetadata {
                    quality_score: assessment.quality_score,
                    quality_check_passed: true,
                    quality_threshold: resolved.threshold,
                    retry_attempts: attempt,
                    retry_strategy_changes: (attempt > 0).then_some(changes),
                    input_tokens: usage.input_tokens,
                    output_tokens: usage.output_tokens,
                    estimated_cost_usd: usage.cost_usd,
                    model_used: Some(params.model),
                    compression_ratio: Some(assessment.compression_ratio),
                    hierarchical: Some(hierarchical_stats(original_tokens, &run)),
                    correlation_id: job.correlation_id.clone(),
                    processing_time_ms: elapsed_ms(started),
                    completed_at: now_rfc3339(),
                };
                return Ok(SummarizationOutcome {
                    processed_content: run.summary_text,
                    processing_method: ProcessingMethod::Hierarchical,
                    quality_metadata: metadata,
                    success: true,
                });
            }

            tracing::warn!(
                attempt = attempt + 1,
                score = assessment.quality_score,
                threshold = resolved.threshold,
                "Summary below quality threshold"
            );
            last_score = assessment.quality_score;
        }

        self.metrics.record_quality_failure();
        let error = SummarizationError::QualityCritical {
            score: last_score,
            threshold: resolved.threshold,
            attempts: MAX_RETRIES + 1,
        };
        tracing::error!(error = %error, "Summarization failed quality gate");
        Err(error)
    }

    fn resolve<'a>(&self, job: &'a SummarizationJob) -> Result<ResolvedJob<'a>, SummarizationError> {
        let SummarizationStrategy::Hierarchical = job.strategy.parse::<SummarizationStrategy>()?;

        let threshold = job
            .quality_threshold
            .unwrap_or(self.settings.quality_threshold);
        if !(0.0..=1.0).contains(&threshold) {
            return Err(SummarizationError::InvalidJob(format!(
                "quality threshold must be within [0, 1], got {threshold}"
            )));
        }
        if job.max_output_tokens == Some(0) {
            return Err(SummarizationError::InvalidJob(
                "max output tokens must be greater than zero".into(),
            ));
        }
        if job.timeout_secs == Some(0) {
            return Err(SummarizationError::InvalidJob(
                "timeout must be greater than zero".into(),
            ));
        }

        let language = match job.language.trim() {
            "" => "en",
            language => language,
        };
        let timeout = job
            .timeout_secs
            .map(Duration::from_secs)
            .or(self.settings.job_timeout);

        Ok(ResolvedJob {
            text: &job.extracted_text,
            language,
            topic: &job.topic,
            threshold,
            no_summary_threshold_tokens: job
                .no_summary_threshold_tokens
                .unwrap_or(self.settings.no_summary_threshold_tokens),
            initial: StrategyParams {
                model: job
                    .model
                    .clone()
                    .unwrap_or_else(|| self.settings.chunking.model.clone()),
                token_budget: job
                    .max_output_tokens
                    .unwrap_or(self.settings.chunking.target_tokens),
            },
            // A timeout too large to represent as an instant means no deadline.
            deadline: timeout.and_then(|timeout| Instant::now().checked_add(timeout)),
        })
    }

    async fn validate(
        &self,
        job: &ResolvedJob<'_>,
        summary: &str,
    ) -> Result<QualityAssessment, SummarizationError> {
        let check =
            self.validator
                .validate_summary_quality(job.text, summary, job.threshold, job.language);
        let assessment = match job.deadline {
            Some(deadline) => tokio::time::timeout_at(deadline, check)
                .await
                .map_err(|_| SummarizationError::DeadlineExceeded)??,
            None => check.await?,
        };
        Ok(assessment)
    }
}

fn hierarchical_stats(original_tokens: usize, run: &HierarchicalRunResult) -> HierarchicalStats {
    HierarchicalStats {
        original_token_count: original_tokens,
        final_token_count: run.final_token_count,
        iterations_performed: run.iterations_performed,
        total_chunks_processed: run.total_chunks_processed,
        compression_levels_used: run.compression_levels_used.clone(),
        target_reached: run.target_reached,
    }
}

fn elapsed_ms(started: std::time::Instant) -> u64 {
    u64::try_from(started.elapsed().as_millis()).unwrap_or(u64::MAX)
}

fn now_rfc3339() -> String {
    OffsetDateTime::now_utc()
        .format(&Rfc3339)
        .unwrap_or_default()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::llm::{Completion, CompletionRequest, LlmClientError};
    use crate::quality::QualityError;
    use crate::tokens::RatioTokenEstimator;
    use async_trait::async_trait;
    use std::collections::VecDeque;
    use std::sync::Mutex;

    struct FixedLlm {
        models: Mutex<Vec<String>>,
        fail: bool,
    }

    impl FixedLlm {
        fn new(fail: bool) -> Arc<Self> {
            Arc::new(Self {
                models: Mutex::new(Vec::new()),
                fail,
            })
        }

        fn models(&self) -> Vec<String> {
            self.models.lock().unwrap().clone()
        }
    }

    #[async_trait]
    impl LlmClient for FixedLlm {
        async fn generate_completion(
            &self,
            request: CompletionRequest,
        ) -> Result<Completion, LlmClientError> {
            self.models.lock().unwrap().push(request.model.clone());
            if self.fail {
                return Err(LlmClientError::ProviderUnavailable("connection refused".into()));
            }
            Ok(Completion {
                content: "short summary".into(),
                input_tokens: 1_000,
                output_tokens: 100,
            })
        }
    }

    enum Verdict {
        Score(f64),
        Fail,
        Hang,
    }

    struct ScriptedValidator {
        verdicts: Mutex<VecDeque<Verdict>>,
    }

    impl ScriptedValidator {
        fn new(verdicts: Vec<Verdict>) -> Arc<Self> {
            Arc::new(Self {
                verdicts: Mutex::new(verdicts.into()),
            })
        }
    }

    #[async_trait]
    impl QualityValidator for ScriptedValidator {
        async fn validate_summary_quality(
            &self,
            original: &str,
            summary: &str,
            threshold: f64,
            _language: &str,
        ) -> Result<QualityAssessment, QualityError> {
            let verdict = self
                .verdicts
                .lock()
                .unwrap()
                .pop_front()
                .unwrap_or(Verdict::Score(0.0));
            match verdict {
                Verdict::Score(score) => {
                    Ok(QualityAssessment::new(score, threshold, original, summary))
                }
                Verdict::Fail => Err(QualityError::EmptyInput("summary")),
                Verdict::Hang => {
                    tokio::time::sleep(Duration::from_secs(60)).await;
                    Ok(QualityAssessment::new(1.0, threshold, original, summary))
                }
            }
        }
    }

    fn settings() -> ServiceSettings {
        ServiceSettings {
            chunking: ChunkingConfig {
                target_tokens: 50,
                chunk_size_tokens: 250,
                overlap_percent: 0.0,
                model: "small".into(),
                ..ChunkingConfig::default()
            },
            no_summary_threshold_tokens: 100,
            escalation: EscalationPolicy {
                upgrade_model: "large".into(),
                token_budget_growth: 1.25,
            },
            pricing: ModelPricing::uniform(TokenPrice {
                input_per_million: 1.0,
                output_per_million: 2.0,
            })
            .with_model(
                "large",
                TokenPrice {
                    input_per_million: 10.0,
                    output_per_million: 20.0,
                },
            ),
            ..ServiceSettings::default()
        }
    }

    fn service(llm: Arc<FixedLlm>, validator: Arc<ScriptedValidator>) -> SummarizationService {
        SummarizationService::new(
            llm,
            Arc::new(RatioTokenEstimator::new()),
            validator,
            settings(),
        )
    }

    fn long_job() -> SummarizationJob {
        // 4000 chars = 1000 tokens, four chunks per pass.
        SummarizationJob::new("word ".repeat(800), "en", "Botany")
    }

    #[tokio::test]
    async fn unsupported_strategy_is_rejected_before_any_call() {
        let llm = FixedLlm::new(false);
        let job = SummarizationJob {
            strategy: "map_reduce".into(),
            ..long_job()
        };
        let error = service(llm.clone(), ScriptedValidator::new(vec![]))
            .generate_summary(&job)
            .await
            .expect_err("strategy");
        assert!(matches!(error, SummarizationError::UnsupportedStrategy(ref s) if s == "map_reduce"));
        assert!(llm.models().is_empty());
    }

    #[tokio::test]
    async fn out_of_range_threshold_is_invalid() {
        let job = SummarizationJob {
            quality_threshold: Some(1.5),
            ..long_job()
        };
        let error = service(FixedLlm::new(false), ScriptedValidator::new(vec![]))
            .generate_summary(&job)
            .await
            .expect_err("threshold");
        assert_eq!(error.code(), "INVALID_JOB");
    }

    #[tokio::test]
    async fn cost_and_tokens_cover_every_attempt_at_its_own_price() {
        let llm = FixedLlm::new(false);
        let service = service(
            llm.clone(),
            ScriptedValidator::new(vec![
                Verdict::Score(0.1),
                Verdict::Score(0.2),
                Verdict::Score(0.9),
            ]),
        );
        let outcome = service.generate_summary(&long_job()).await.expect("outcome");
        let metadata = &outcome.quality_metadata;

        // Three attempts of four chunk calls each; the third runs on the upgraded model.
        assert_eq!(metadata.input_tokens, 12_000);
        assert_eq!(metadata.output_tokens, 1_200);
        let expected = 2.0 * (4_000.0 * 1.0 + 400.0 * 2.0) / 1e6
            + (4_000.0 * 10.0 + 400.0 * 20.0) / 1e6;
        assert!((metadata.estimated_cost_usd - expected).abs() < 1e-12);
        assert_eq!(metadata.model_used.as_deref(), Some("large"));

        let models = llm.models();
        assert_eq!(models.iter().filter(|m| *m == "small").count(), 8);
        assert_eq!(models.iter().filter(|m| *m == "large").count(), 4);

        let stats = metadata.hierarchical.as_ref().expect("stats");
        assert_eq!(stats.original_token_count, 1_000);
        assert_eq!(stats.iterations_performed, 1);
        assert!(stats.target_reached);

        let snapshot = service.metrics_snapshot();
        assert_eq!(snapshot.quality_retries, 2);
        assert_eq!(snapshot.chunks_summarized, 12);
        assert_eq!(snapshot.jobs_summarized, 1);
    }

    #[tokio::test]
    async fn third_retry_grows_the_token_budget() {
        let service = service(
            FixedLlm::new(false),
            ScriptedValidator::new(vec![
                Verdict::Score(0.1),
                Verdict::Score(0.1),
                Verdict::Score(0.1),
                Verdict::Score(0.8),
            ]),
        );
        let outcome = service.generate_summary(&long_job()).await.expect("outcome");
        assert_eq!(outcome.quality_metadata.retry_attempts, 3);
        assert_eq!(
            outcome.quality_metadata.retry_strategy_changes,
            Some(vec![
                "model: small → large".to_string(),
                "max_tokens: 50 → 63".to_string(),
            ])
        );
    }

    #[tokio::test]
    async fn llm_failure_aborts_without_consuming_retries() {
        let llm = FixedLlm::new(true);
        let service = service(llm.clone(), ScriptedValidator::new(vec![]));
        let error = service
            .generate_summary(&long_job())
            .await
            .expect_err("transport failure");

        assert_eq!(error.code(), "CHUNK_SUMMARIZATION_FAILED");
        assert!(llm.models().iter().all(|model| model == "small"));
        assert_eq!(service.metrics_snapshot().quality_retries, 0);
    }

    #[tokio::test]
    async fn validator_failure_aborts_the_job() {
        let service = service(
            FixedLlm::new(false),
            ScriptedValidator::new(vec![Verdict::Fail]),
        );
        let error = service
            .generate_summary(&long_job())
            .await
            .expect_err("validator failure");
        assert!(matches!(error, SummarizationError::Quality(_)));
        assert_eq!(service.metrics_snapshot().quality_retries, 0);
    }

    #[tokio::test]
    async fn deadline_bounds_the_quality_check() {
        let job = SummarizationJob {
            timeout_secs: Some(1),
            ..long_job()
        };
        let error = service(
            FixedLlm::new(false),
            ScriptedValidator::new(vec![Verdict::Hang]),
        )
        .generate_summary(&job)
        .await
        .expect_err("deadline");
        assert!(matches!(error, SummarizationError::DeadlineExceeded));
        assert_eq!(error.code(), "DEADLINE_EXCEEDED");
    }

    #[tokio::test]
    async fn unrepresentable_timeout_runs_without_deadline() {
        let job: SummarizationJob = serde_json::from_str(
            r#"{"extractedText":"hello","timeoutSecs":18446744073709551615}"#,
        )
        .expect("job");
        assert_eq!(job.timeout_secs, Some(u64::MAX));

        let bypassing = service(FixedLlm::new(false), ScriptedValidator::new(vec![]));
        let outcome = bypassing.generate_summary(&job).await.expect("outcome");
        assert_eq!(outcome.processing_method, ProcessingMethod::FullText);

        let job = SummarizationJob {
            timeout_secs: Some(u64::MAX),
            ..long_job()
        };
        let summarizing = service(
            FixedLlm::new(false),
            ScriptedValidator::new(vec![Verdict::Score(0.9)]),
        );
        let outcome = summarizing.generate_summary(&job).await.expect("outcome");
        assert_eq!(outcome.processing_method, ProcessingMethod::Hierarchical);
    }

    #[tokio::test]
    async fn every_started_job_lands_in_one_terminal_counter() {
        let service = service(
            FixedLlm::new(false),
            ScriptedValidator::new(vec![Verdict::Score(0.9), Verdict::Fail]),
        );
        service
            .generate_summary(&SummarizationJob::new("tiny", "en", ""))
            .await
            .expect("bypass");
        service.generate_summary(&long_job()).await.expect("summary");
        service
            .generate_summary(&long_job())
            .await
            .expect_err("validator failure");
        service
            .generate_summary(&SummarizationJob {
                quality_threshold: Some(-0.1),
                ..long_job()
            })
            .await
            .expect_err("invalid job");

        let snapshot = service.metrics_snapshot();
        assert_eq!(snapshot.jobs_started, 4);
        assert_eq!(snapshot.jobs_bypassed, 1);
        assert_eq!(snapshot.jobs_summarized, 1);
        assert_eq!(snapshot.jobs_failed_quality, 0);
        assert_eq!(snapshot.jobs_failed, 2);
    }

    #[tokio::test]
    async fn job_overrides_take_precedence() {
        let llm = FixedLlm::new(false);
        let job = SummarizationJob {
            model: Some("custom".into()),
            no_summary_threshold_tokens: Some(2_000),
            ..long_job()
        };
        let outcome = service(llm.clone(), ScriptedValidator::new(vec![]))
            .generate_summary(&job)
            .await
            .expect("outcome");
        assert_eq!(outcome.processing_method, ProcessingMethod::FullText);
        assert!(llm.models().is_empty());

        let job = SummarizationJob {
            model: Some("custom".into()),
            ..long_job()
        };
        let outcome = service(
            llm.clone(),
            ScriptedValidator::new(vec![Verdict::Score(0.9)]),
        )
        .generate_summary(&job)
        .await
        .expect("outcome");
        assert_eq!(outcome.quality_metadata.model_used.as_deref(), Some("custom"));
        assert!(llm.models().iter().all(|model| model == "custom"));
    }
}
