//! Prompt templates for chunk summarization.

use super::types::CompressionLevel;

/// Marker placed between chunk summaries when they are recombined.
pub const CHUNK_SEPARATOR: &str = "\n\n---\n\n";

const DETAILED_PROMPT: &str = "\
You are an expert editor condensing source material for course authors. \
Summarize the provided section while keeping its structure: definitions, key concepts, \
examples, formulas, procedures, names, dates, and figures must survive. \
Remove only repetition, filler, and boilerplate. Target roughly half of the original length. \
Write in the same language as the source text. Output only the summary.";

const BALANCED_PROMPT: &str = "\
You are an expert editor condensing source material for course authors. \
Summarize the provided section into its main ideas and the supporting details needed to \
understand them. Keep definitions, key terms, and essential examples; drop secondary \
examples, anecdotes, and digressions. Target roughly a third of the original length. \
Write in the same language as the source text. Output only the summary.";

const AGGRESSIVE_PROMPT: &str = "\
You are an expert editor condensing source material for course authors. \
Reduce the provided section to its essential facts and concepts as dense, compact prose \
or short bullet points. Keep key terms and definitions; drop examples unless they are the \
only way to convey a concept. Target at most a fifth of the original length. \
Write in the same language as the source text. Output only the summary.";

/// System prompt for a compression level.
pub fn system_prompt(level: CompressionLevel) -> &'static str {
    match level {
        CompressionLevel::Detailed => DETAILED_PROMPT,
        CompressionLevel::Balanced => BALANCED_PROMPT,
        CompressionLevel::Aggressive => AGGRESSIVE_PROMPT,
    }
}

/// User prompt for one chunk; `position` is 1-based. The chunk text always comes last.
pub fn chunk_prompt(chunk_text: &str, position: usize, total: usize, topic: &str) -> String {
    let topic = topic.trim();
    let topic_line = if topic.is_empty() {
        "Document topic: (not specified)".to_string()
    } else {
        format!("Document topic: {topic}")
    };

    format!(
        "{topic_line}\nThis is part {position} of {total} of the document. \
         Summarize this part on its own; other parts are summarized separately and \
         concatenated in order afterwards.\n\n{chunk_text}"
    )
}
