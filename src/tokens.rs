//! Token estimation used for budget checks and chunk sizing.
//!
//! Two estimators are available:
//!
//! - [`RatioTokenEstimator`] divides the character count by a per-language characters-per-token
//!   ratio. It is the default.
//! - [`TiktokenEstimator`] counts BPE tokens with `tiktoken-rs`. It still reports the same
//!   per-language ratio so that token-denominated chunk sizes can be turned into char offsets.

use crate::config::TokenEstimatorKind;
use anyhow::Error as TokenizerError;
use std::sync::Arc;
use tiktoken_rs::{
    CoreBPE, cl100k_base, get_bpe_from_model, o200k_base, p50k_base, p50k_edit, r50k_base,
};

use crate::processing::ChunkingError;

/// Characters-per-token ratio used when the language is unknown.
pub const DEFAULT_CHARS_PER_TOKEN: f64 = 4.0;

const CYRILLIC_LANGUAGES: &[&str] = &[
    "ru", "uk", "be", "bg", "sr", "mk", "kk", "ky", "tg", "mn",
];
const CJK_LANGUAGES: &[&str] = &["zh", "ja", "ko"];
const LATIN_LANGUAGES: &[&str] = &[
    "de", "fr", "es", "it", "pt", "nl", "pl", "cs", "sk", "sv", "da", "no", "fi", "ro", "hu",
    "tr", "hr", "sl", "lt", "lv", "et", "id", "vi",
];
const OTHER_SCRIPT_LANGUAGES: &[&str] = &["el", "ar", "he", "fa", "hi", "th", "ka", "hy"];

/// Deterministic token estimation contract.
pub trait TokenEstimator: Send + Sync {
    /// Estimate how many tokens `text` occupies for the given language code.
    fn estimate_tokens(&self, text: &str, language: &str) -> usize;

    /// Characters per token for the given language code.
    fn language_ratio(&self, language: &str) -> f64;
}

/// Look up the characters-per-token ratio for an ISO 639-1 code such as `ru` or `en-US`.
pub fn chars_per_token(language: &str) -> f64 {
    let normalized = language.trim().to_lowercase();
    let primary = normalized
        .split(['-', '_'])
        .next()
        .unwrap_or_default();

    match primary {
        "en" => 4.0,
        code if CYRILLIC_LANGUAGES.contains(&code) => 3.2,
        code if CJK_LANGUAGES.contains(&code) => 1.5,
        code if LATIN_LANGUAGES.contains(&code) => 3.5,
        code if OTHER_SCRIPT_LANGUAGES.contains(&code) => 2.5,
        _ => {
            tracing::trace!(language, "Using default characters-per-token ratio");
            DEFAULT_CHARS_PER_TOKEN
        }
    }
}

/// Estimator that divides the character count by the language ratio.
#[derive(Debug, Default, Clone, Copy)]
pub struct RatioTokenEstimator;

impl RatioTokenEstimator {
    /// Construct a ratio-based estimator.
    pub const fn new() -> Self {
        Self
    }
}

impl TokenEstimator for RatioTokenEstimator {
    fn estimate_tokens(&self, text: &str, language: &str) -> usize {
        let chars = text.chars().count();
        if chars == 0 {
            return 0;
        }
        (chars as f64 / chars_per_token(language)).ceil() as usize
    }

    fn language_ratio(&self, language: &str) -> f64 {
        chars_per_token(language)
    }
}

/// Estimator backed by a `tiktoken` BPE encoding.
#[derive(Clone)]
pub struct TiktokenEstimator {
    encoding: Arc<CoreBPE>,
}

impl TiktokenEstimator {
    /// Load the encoding matching `model`, falling back to `cl100k_base` for unknown names.
    pub fn new(model: &str) -> Result<Self, ChunkingError> {
        let normalized = model.trim();
        let target = if normalized.is_empty() {
            "cl100k_base"
        } else {
            normalized
        };
        let encoding = resolve_encoding(target).map_err(|source| ChunkingError::Tokenizer {
            model: target.to_string(),
            source,
        })?;
        Ok(Self {
            encoding: Arc::new(encoding),
        })
    }
}

impl TokenEstimator for TiktokenEstimator {
    fn estimate_tokens(&self, text: &str, _language: &str) -> usize {
        self.encoding.encode_ordinary(text).len()
    }

    fn language_ratio(&self, language: &str) -> f64 {
        chars_per_token(language)
    }
}

/// Build the estimator selected in configuration.
pub fn build_token_estimator(
    kind: TokenEstimatorKind,
    model: &str,
) -> Result<Arc<dyn TokenEstimator>, ChunkingError> {
    match kind {
        TokenEstimatorKind::Ratio => Ok(Arc::new(RatioTokenEstimator::new())),
        TokenEstimatorKind::Tiktoken => Ok(Arc::new(TiktokenEstimator::new(model)?)),
    }
}

fn resolve_encoding(model: &str) -> Result<CoreBPE, TokenizerError> {
    match get_bpe_from_model(model) {
        Ok(encoding) => Ok(encoding),
        Err(model_err) => {
            tracing::debug!(
                model,
                error = %model_err,
                "Tokenizer model lookup failed; trying encoding name"
            );
            if let Some(candidate) = encoding_from_name(model) {
                candidate
            } else {
                tracing::warn!(
                    model,
                    "Falling back to 'cl100k_base' encoding for token counting"
                );
                cl100k_base()
            }
        }
    }
}

fn encoding_from_name(name: &str) -> Option<Result<CoreBPE, TokenizerError>> {
    match name {
        "cl100k_base" => Some(cl100k_base()),
        "o200k_base" => Some(o200k_base()),
        "p50k_base" => Some(p50k_base()),
        "p50k_edit" => Some(p50k_edit()),
        "r50k_base" | "gpt2" => Some(r50k_base()),
        _ => None,
    }
}
