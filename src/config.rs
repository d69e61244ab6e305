use std::env;
use std::sync::OnceLock;
use std::time::Duration;
use thiserror::Error;

use crate::processing::ChunkingConfig;

const DEFAULT_OLLAMA_URL: &str = "http://127.0.0.1:11434";
const DEFAULT_SUMMARIZATION_MODEL: &str = "llama3.1:8b";
const DEFAULT_UPGRADE_MODEL: &str = "llama3.1:70b";
const DEFAULT_QUALITY_EMBEDDING_MODEL: &str = "nomic-embed-text";

/// Errors encountered while loading configuration from environment variables.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// Environment variable contained a value that could not be parsed.
    #[error("Invalid value for environment variable: {0}")]
    InvalidValue(String),
}

/// Runtime configuration for the summarization pipeline.
#[derive(Debug, Clone)]
pub struct Config {
    /// Base URL of the Ollama runtime serving completions and embeddings.
    pub ollama_url: String,
    /// Default model used for chunk summarization.
    pub summarization_model: String,
    /// Stronger model swapped in by the second quality retry.
    pub summarization_upgrade_model: String,
    /// Token budget the hierarchical run compresses towards.
    pub target_tokens: usize,
    /// Upper bound on compression passes per run.
    pub max_iterations: usize,
    /// Chunk size expressed in estimated tokens.
    pub chunk_size_tokens: usize,
    /// Overlap between neighbouring chunks, in percent of the chunk size.
    pub chunk_overlap_percent: f64,
    /// Sampling temperature passed to the completion model.
    pub temperature: f32,
    /// Output budget requested for each chunk summary.
    pub max_output_tokens_per_chunk: usize,
    /// Minimum quality score a summary must reach.
    pub quality_threshold: f64,
    /// Documents at or below this estimate skip summarization.
    pub no_summary_threshold_tokens: usize,
    /// Multiplier applied to the token budget by the third quality retry.
    pub token_budget_growth: f64,
    /// Token estimator backing budget checks and chunk sizing.
    pub token_estimator: TokenEstimatorKind,
    /// Embedding backend used by the quality validator.
    pub quality_embedding_provider: QualityEmbeddingProvider,
    /// Embedding model used when the provider is Ollama.
    pub quality_embedding_model: String,
    /// Price in USD per million prompt tokens.
    pub input_cost_per_million: f64,
    /// Price in USD per million completion tokens.
    pub output_cost_per_million: f64,
    /// Optional wall-clock limit for a single job.
    pub job_timeout: Option<Duration>,
}

/// Supported token estimation strategies.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum TokenEstimatorKind {
    /// Characters divided by a per-language ratio.
    Ratio,
    /// BPE token counts from `tiktoken`.
    Tiktoken,
}

/// Supported embedding backends for quality scoring.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum QualityEmbeddingProvider {
    /// Deterministic offline embeddings derived from hashed word counts.
    Hashed,
    /// Local Ollama runtime.
    Ollama,
}

impl Config {
    /// Load configuration from environment variables, performing validation along the way.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| env::var(key).ok())
    }

    /// Load configuration from an arbitrary key lookup.
    ///
    /// Every variable is optional; blank values are treated as unset so that `.env` templates
    /// with empty placeholders keep the defaults.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |key: &str| lookup(key).filter(|value| !value.trim().is_empty());

        let chunk_overlap_percent = parse_or(&get, "SUMMARY_CHUNK_OVERLAP_PERCENT", 5.0)?;
        if !(0.0..=100.0).contains(&chunk_overlap_percent) {
            return Err(ConfigError::InvalidValue(
                "SUMMARY_CHUNK_OVERLAP_PERCENT".into(),
            ));
        }
        let quality_threshold = parse_or(&get, "SUMMARY_QUALITY_THRESHOLD", 0.75)?;
        if !(0.0..=1.0).contains(&quality_threshold) {
            return Err(ConfigError::InvalidValue("SUMMARY_QUALITY_THRESHOLD".into()));
        }
        let chunk_size_tokens = parse_or(&get, "SUMMARY_CHUNK_SIZE_TOKENS", 115_000usize)?;
        if chunk_size_tokens == 0 {
            return Err(ConfigError::InvalidValue("SUMMARY_CHUNK_SIZE_TOKENS".into()));
        }
        let token_budget_growth = parse_or(&get, "SUMMARY_TOKEN_BUDGET_GROWTH", 1.25)?;
        if token_budget_growth < 1.0 {
            return Err(ConfigError::InvalidValue(
                "SUMMARY_TOKEN_BUDGET_GROWTH".into(),
            ));
        }

        Ok(Self {
            ollama_url: get("OLLAMA_URL").unwrap_or_else(|| DEFAULT_OLLAMA_URL.to_string()),
            summarization_model: get("SUMMARIZATION_MODEL")
                .unwrap_or_else(|| DEFAULT_SUMMARIZATION_MODEL.to_string()),
            summarization_upgrade_model: get("SUMMARIZATION_UPGRADE_MODEL")
                .unwrap_or_else(|| DEFAULT_UPGRADE_MODEL.to_string()),
            target_tokens: parse_or(&get, "SUMMARY_TARGET_TOKENS", 200_000)?,
            max_iterations: parse_or(&get, "SUMMARY_MAX_ITERATIONS", 5)?,
            chunk_size_tokens,
            chunk_overlap_percent,
            temperature: parse_or(&get, "SUMMARY_TEMPERATURE", 0.3)?,
            max_output_tokens_per_chunk: parse_or(
                &get,
                "SUMMARY_MAX_OUTPUT_TOKENS_PER_CHUNK",
                10_000,
            )?,
            quality_threshold,
            no_summary_threshold_tokens: parse_or(
                &get,
                "SUMMARY_NO_SUMMARY_THRESHOLD_TOKENS",
                3_000,
            )?,
            token_budget_growth,
            token_estimator: get("TOKEN_ESTIMATOR")
                .map(|value| {
                    value
                        .parse()
                        .map_err(|()| ConfigError::InvalidValue("TOKEN_ESTIMATOR".into()))
                })
                .transpose()?
                .unwrap_or(TokenEstimatorKind::Ratio),
            quality_embedding_provider: get("QUALITY_EMBEDDING_PROVIDER")
                .map(|value| {
                    value.parse().map_err(|()| {
                        ConfigError::InvalidValue("QUALITY_EMBEDDING_PROVIDER".into())
                    })
                })
                .transpose()?
                .unwrap_or(QualityEmbeddingProvider::Hashed),
            quality_embedding_model: get("QUALITY_EMBEDDING_MODEL")
                .unwrap_or_else(|| DEFAULT_QUALITY_EMBEDDING_MODEL.to_string()),
            input_cost_per_million: parse_or(&get, "LLM_INPUT_COST_PER_MILLION", 0.0)?,
            output_cost_per_million: parse_or(&get, "LLM_OUTPUT_COST_PER_MILLION", 0.0)?,
            job_timeout: get("SUMMARY_JOB_TIMEOUT_SECS")
                .map(|value| {
                    value
                        .parse::<u64>()
                        .map(Duration::from_secs)
                        .map_err(|_| ConfigError::InvalidValue("SUMMARY_JOB_TIMEOUT_SECS".into()))
                })
                .transpose()?,
        })
    }

    /// Chunking parameters for a run that starts from the configured defaults.
    pub fn chunking_config(&self) -> ChunkingConfig {
        ChunkingConfig {
            target_tokens: self.target_tokens,
            max_iterations: self.max_iterations,
            chunk_size_tokens: self.chunk_size_tokens,
            overlap_percent: self.chunk_overlap_percent,
            model: self.summarization_model.clone(),
            temperature: self.temperature,
            max_output_tokens_per_chunk: self.max_output_tokens_per_chunk,
        }
    }
}

fn parse_or<T, G>(get: &G, key: &str, default: T) -> Result<T, ConfigError>
where
    T: std::str::FromStr,
    G: Fn(&str) -> Option<String>,
{
    match get(key) {
        Some(value) => value
            .trim()
            .parse()
            .map_err(|_| ConfigError::InvalidValue(key.to_string())),
        None => Ok(default),
    }
}

impl std::str::FromStr for TokenEstimatorKind {
    type Err = ();

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "ratio" => Ok(Self::Ratio),
            "tiktoken" => Ok(Self::Tiktoken),
            _ => Err(()),
        }
    }
}

impl std::str::FromStr for QualityEmbeddingProvider {
    type Err = ();

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "hashed" => Ok(Self::Hashed),
            "ollama" => Ok(Self::Ollama),
            _ => Err(()),
        }
    }
}

/// Global configuration cache populated during process start.
static CONFIG: OnceLock<Config> = OnceLock::new();

/// Load configuration from the environment and install it in the global cache.
pub fn init_config() -> Result<&'static Config, ConfigError> {
    dotenvy::dotenv().ok();
    let config = Config::from_env()?;
    tracing::debug!(
        ollama_url = %config.ollama_url,
        model = %config.summarization_model,
        upgrade_model = %config.summarization_upgrade_model,
        target_tokens = config.target_tokens,
        chunk_size_tokens = config.chunk_size_tokens,
        token_estimator = ?config.token_estimator,
        "Loaded configuration"
    );
    Ok(CONFIG.get_or_init(|| config))
}
