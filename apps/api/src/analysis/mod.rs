// Resume analysis: prompts, result shapes, and the LLM-backed analyzer.
// All LLM calls go through llm_client; nothing here talks HTTP directly.

pub mod analyzer;
pub mod prompts;
pub mod results;
