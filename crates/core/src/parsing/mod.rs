//! Fallback metadata sources consulted when embedded tags are missing or
//! incomplete: an ordered filename/path heuristic, and an optional LLM.

mod heuristic;
mod llm;

pub use heuristic::{HeuristicCandidate, HeuristicParser};
pub use llm::{LlmCandidate, LlmContext, LlmError, LlmParser};
