//! Post-hoc quality gate for generated summaries.
//!
//! [`SemanticQualityValidator`] embeds an evenly sampled excerpt of the original alongside the
//! summary and scores their cosine similarity. Long originals are sampled in several windows so
//! a summary of the whole document is not compared against its first page only.

use crate::embedding::{EmbeddingClient, EmbeddingClientError};
use async_trait::async_trait;
use serde::Serialize;
use std::sync::Arc;
use thiserror::Error;

/// Chars of the original fed to the embedding model.
pub const DEFAULT_SAMPLE_CHARS: usize = 24_000;
/// Evenly spaced windows the sample is drawn from.
pub const DEFAULT_SAMPLE_WINDOWS: usize = 8;

/// Errors raised while scoring a summary.
#[derive(Debug, Error)]
pub enum QualityError {
    /// The embedding provider failed.
    #[error("Embedding provider failed: {0}")]
    Embedding(#[from] EmbeddingClientError),
    /// Summary or original was empty, so no score can be computed.
    #[error("Cannot score an empty {0}")]
    EmptyInput(&'static str),
    /// The provider returned vectors that cannot be compared.
    #[error("Embedding vectors have mismatched dimensions ({original} vs {summary})")]
    DimensionMismatch {
        /// Dimension of the original's vector.
        original: usize,
        /// Dimension of the summary's vector.
        summary: usize,
    },
}

/// Score and verdict for one summary.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct QualityAssessment {
    /// Fidelity score in `[0, 1]`.
    pub quality_score: f64,
    /// Whether `quality_score >= threshold`.
    pub passed: bool,
    /// Threshold the score was compared against.
    pub threshold: f64,
    /// Original length in chars.
    pub original_length: usize,
    /// Summary length in chars.
    pub summary_length: usize,
    /// `summary_length / original_length`.
    pub compression_ratio: f64,
}

impl QualityAssessment {
    /// Build an assessment, deriving the verdict and ratio from the raw numbers.
    pub fn new(quality_score: f64, threshold: f64, original: &str, summary: &str) -> Self {
        let original_length = original.chars().count();
        let summary_length = summary.chars().count();
        let compression_ratio = if original_length == 0 {
            0.0
        } else {
            summary_length as f64 / original_length as f64
        };
        Self {
            quality_score,
            passed: quality_score >= threshold,
            threshold,
            original_length,
            summary_length,
            compression_ratio,
        }
    }
}

/// Scores how faithfully a summary represents its original.
#[async_trait]
pub trait QualityValidator: Send + Sync {
    /// Score `summary` against `original` and compare the score with `threshold`.
    async fn validate_summary_quality(
        &self,
        original: &str,
        summary: &str,
        threshold: f64,
        language: &str,
    ) -> Result<QualityAssessment, QualityError>;
}

/// Embedding-similarity validator.
pub struct SemanticQualityValidator {
    embeddings: Arc<dyn EmbeddingClient>,
    sample_chars: usize,
    sample_windows: usize,
}

impl SemanticQualityValidator {
    /// Validator with the default sampling geometry.
    pub fn new(embeddings: Arc<dyn EmbeddingClient>) -> Self {
        Self {
            embeddings,
            sample_chars: DEFAULT_SAMPLE_CHARS,
            sample_windows: DEFAULT_SAMPLE_WINDOWS,
        }
    }
}

/// Take `windows` evenly spaced slices totalling about `budget` chars from `text`.
pub(crate) fn sample_text(text: &str, budget: usize, windows: usize) -> String {
    let chars: Vec<char> = text.chars().collect();
    if chars.len() <= budget {
        return text.to_string();
    }

    let windows = windows.clamp(1, budget);
    let window_len = budget / windows;
    let stride = chars.len() / windows;
    (0..windows)
        .map(|window| {
            let start = window * stride;
            chars[start..(start + window_len).min(chars.len())]
                .iter()
                .collect::<String>()
        })
        .collect::<Vec<_>>()
        .join("\n")
}

fn cosine_similarity(a: &[f32], b: &[f32]) -> f64 {
    let mut dot = 0.0_f64;
    let mut norm_a = 0.0_f64;
    let mut norm_b = 0.0_f64;
    for (x, y) in a.iter().zip(b) {
        let (x, y) = (f64::from(*x), f64::from(*y));
        dot += x * y;
        norm_a += x * x;
        norm_b += y * y;
    }
    if norm_a == 0.0 || norm_b == 0.0 {
        return 0.0;
    }
    (dot / (norm_a.sqrt() * norm_b.sqrt())).clamp(0.0, 1.0)
}

#[async_trait]
impl QualityValidator for SemanticQualityValidator {
    async fn validate_summary_quality(
        &self,
        original: &str,
        summary: &str,
        threshold: f64,
        language: &str,
    ) -> Result<QualityAssessment, QualityError> {
        if original.trim().is_empty() {
            return Err(QualityError::EmptyInput("original"));
        }
        if summary.trim().is_empty() {
            return Err(QualityError::EmptyInput("summary"));
        }

        let sample = sample_text(original, self.sample_chars, self.sample_windows);
        let vectors = self
            .embeddings
            .generate_embeddings(vec![sample, summary.to_string()])
            .await?;
        let [original_vector, summary_vector] = vectors.as_slice() else {
            return Err(EmbeddingClientError::InvalidResponse(format!(
                "expected 2 embeddings, got {}",
                vectors.len()
            ))
            .into());
        };
        if original_vector.len() != summary_vector.len() {
            return Err(QualityError::DimensionMismatch {
                original: original_vector.len(),
                summary: summary_vector.len(),
            });
        }

        let score = cosine_similarity(original_vector, summary_vector);
        let assessment = QualityAssessment::new(score, threshold, original, summary);
        tracing::debug!(
            language,
            score,
            threshold,
            passed = assessment.passed,
            compression_ratio = assessment.compression_ratio,
            "Scored summary quality"
        );
        Ok(assessment)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::embedding::HashedEmbeddingClient;

    fn validator() -> SemanticQualityValidator {
        SemanticQualityValidator::new(Arc::new(HashedEmbeddingClient::default()))
    }

    #[test]
    fn sampling_keeps_short_text_and_spreads_long_text() {
        assert_eq!(sample_text("short", 100, 4), "short");

        let text: String = ['a', 'b', 'c', 'd']
            .iter()
            .map(|letter| letter.to_string().repeat(100))
            .collect();
        let sample = sample_text(&text, 40, 4);
        assert_eq!(sample, "aaaaaaaaaa\nbbbbbbbbbb\ncccccccccc\ndddddddddd");
    }

    #[test]
    fn cosine_similarity_is_bounded() {
        assert_eq!(cosine_similarity(&[1.0, 0.0], &[1.0, 0.0]), 1.0);
        assert_eq!(cosine_similarity(&[1.0, 0.0], &[-1.0, 0.0]), 0.0);
        assert_eq!(cosine_similarity(&[0.0, 0.0], &[1.0, 0.0]), 0.0);
    }

    #[tokio::test]
    async fn faithful_summary_passes_and_unrelated_one_fails() {
        let original = "Photosynthesis converts light energy into chemical energy. \
                        Chlorophyll absorbs light in the chloroplast. Glucose and oxygen are produced.";
        let faithful = "Photosynthesis: chlorophyll in the chloroplast absorbs light energy, \
                        producing glucose and oxygen as chemical energy.";
        let unrelated = "Medieval trade routes linked Venice with Constantinople.";

        let good = validator()
            .validate_summary_quality(original, faithful, 0.5, "en")
            .await
            .expect("assessment");
        let bad = validator()
            .validate_summary_quality(original, unrelated, 0.5, "en")
            .await
            .expect("assessment");

        assert!(good.passed, "score {}", good.quality_score);
        assert!(!bad.passed, "score {}", bad.quality_score);
        assert!(good.quality_score > bad.quality_score);
        assert!(good.compression_ratio > 0.0 && good.compression_ratio < 1.0);
    }

    #[tokio::test]
    async fn score_equal_to_threshold_passes() {
        let assessment = validator()
            .validate_summary_quality("same words here", "same words here", 1.0, "en")
            .await
            .expect("assessment");
        assert!((assessment.quality_score - 1.0).abs() < 1e-6);

        let exact = QualityAssessment::new(0.75, 0.75, "abcd", "ab");
        assert!(exact.passed);
        assert_eq!(exact.compression_ratio, 0.5);
    }

    #[tokio::test]
    async fn empty_summary_is_rejected() {
        let error = validator()
            .validate_summary_quality("original", "   ", 0.5, "en")
            .await
            .expect_err("empty summary");
        assert!(matches!(error, QualityError::EmptyInput("summary")));
    }
}
