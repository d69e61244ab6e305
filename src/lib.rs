#![deny(missing_docs)]

//! Core library for Condense, a quality-gated hierarchical summarizer for oversized documents.

/// Environment-driven configuration management.
pub mod config;
/// Embedding client abstraction and adapters.
pub mod embedding;
/// Completion client abstraction and the Ollama adapter.
pub mod llm;
/// Structured logging and tracing setup.
pub mod logging;
/// Summarization activity counters.
pub mod metrics;
/// Chunking, hierarchical summarization, and the retry orchestrator.
pub mod processing;
/// Summary quality scoring.
pub mod quality;
/// Language-aware token estimation.
pub mod tokens;
