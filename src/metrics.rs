use std::sync::atomic::{AtomicU64, Ordering};

/// Thread-safe counters describing summarization activity.
#[derive(Default)]
pub struct SummaryMetrics {
    jobs_started: AtomicU64,
    jobs_bypassed: AtomicU64,
    jobs_summarized: AtomicU64,
    jobs_failed_quality: AtomicU64,
    jobs_failed: AtomicU64,
    quality_retries: AtomicU64,
    chunks_summarized: AtomicU64,
    input_tokens: AtomicU64,
    output_tokens: AtomicU64,
}

impl SummaryMetrics {
    /// Create an empty metrics accumulator.
    pub fn new() -> Self {
        Self::default()
    }

    /// Record that a job entered the pipeline.
    pub fn record_job_started(&self) {
        self.jobs_started.fetch_add(1, Ordering::Relaxed);
    }

    /// Record a job that skipped summarization because it already fits the budget.
    pub fn record_bypass(&self) {
        self.jobs_bypassed.fetch_add(1, Ordering::Relaxed);
    }

    /// Record one completed hierarchical attempt and the LLM usage it generated.
    pub fn record_attempt(&self, chunks: u64, input_tokens: u64, output_tokens: u64) {
        self.chunks_summarized.fetch_add(chunks, Ordering::Relaxed);
        self.input_tokens.fetch_add(input_tokens, Ordering::Relaxed);
        self.output_tokens
            .fetch_add(output_tokens, Ordering::Relaxed);
    }

    /// Record a quality retry about to run.
    pub fn record_retry(&self) {
        self.quality_retries.fetch_add(1, Ordering::Relaxed);
    }

    /// Record a job that produced a summary passing the quality gate.
    pub fn record_summarized(&self) {
        self.jobs_summarized.fetch_add(1, Ordering::Relaxed);
    }

    /// Record a job that exhausted every retry without clearing the quality gate.
    pub fn record_quality_failure(&self) {
        self.jobs_failed_quality.fetch_add(1, Ordering::Relaxed);
    }

    /// Record a job aborted before a quality verdict was reached.
    pub fn record_failure(&self) {
        self.jobs_failed.fetch_add(1, Ordering::Relaxed);
    }

    /// Return a snapshot of the current counters.
    pub fn snapshot(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            jobs_started: self.jobs_started.load(Ordering::Relaxed),
            jobs_bypassed: self.jobs_bypassed.load(Ordering::Relaxed),
            jobs_summarized: self.jobs_summarized.load(Ordering::Relaxed),
            jobs_failed_quality: self.jobs_failed_quality.load(Ordering::Relaxed),
            jobs_failed: self.jobs_failed.load(Ordering::Relaxed),
            quality_retries: self.quality_retries.load(Ordering::Relaxed),
            chunks_summarized: self.chunks_summarized.load(Ordering::Relaxed),
            input_tokens: self.input_tokens.load(Ordering::Relaxed),
            output_tokens: self.output_tokens.load(Ordering::Relaxed),
        }
    }
}

/// Immutable view of summarization counters used for reporting.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize)]
#[serde(rename_all = "camelCase")]
pub struct MetricsSnapshot {
    /// Jobs accepted since startup.
    pub jobs_started: u64,
    /// Jobs returned as full text without summarization.
    pub jobs_bypassed: u64,
    /// Jobs that produced a hierarchical summary passing the quality gate.
    pub jobs_summarized: u64,
    /// Jobs that failed the quality gate on every attempt.
    pub jobs_failed_quality: u64,
    /// Jobs aborted before reaching a quality verdict.
    pub jobs_failed: u64,
    /// Quality retries executed across all jobs.
    pub quality_retries: u64,
    /// Chunk summarization calls completed across all attempts.
    pub chunks_summarized: u64,
    /// Prompt tokens reported by the completion model.
    pub input_tokens: u64,
    /// Completion tokens reported by the completion model.
    pub output_tokens: u64,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn records_attempts_and_outcomes() {
        let metrics = SummaryMetrics::new();
        metrics.record_job_started();
        metrics.record_attempt(3, 1_200, 300);
        metrics.record_retry();
        metrics.record_attempt(2, 800, 200);
        metrics.record_summarized();

        let snapshot = metrics.snapshot();
        assert_eq!(snapshot.jobs_started, 1);
        assert_eq!(snapshot.chunks_summarized, 5);
        assert_eq!(snapshot.input_tokens, 2_000);
        assert_eq!(snapshot.output_tokens, 500);
        assert_eq!(snapshot.quality_retries, 1);
        assert_eq!(snapshot.jobs_summarized, 1);
    }

    #[test]
    fn terminal_counters_balance_started_jobs() {
        let metrics = SummaryMetrics::new();
        for _ in 0..4 {
            metrics.record_job_started();
        }
        metrics.record_bypass();
        metrics.record_summarized();
        metrics.record_quality_failure();
        metrics.record_failure();

        let snapshot = metrics.snapshot();
        assert_eq!(
            snapshot.jobs_started,
            snapshot.jobs_bypassed
                + snapshot.jobs_summarized
                + snapshot.jobs_failed_quality
                + snapshot.jobs_failed
        );
    }

    #[test]
    fn snapshot_is_consistent() {
        let metrics = SummaryMetrics::new();
        assert_eq!(metrics.snapshot().jobs_started, 0);
        assert_eq!(metrics.snapshot().jobs_bypassed, 0);
        assert_eq!(metrics.snapshot().jobs_failed, 0);
    }
}
