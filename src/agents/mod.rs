//! Query-time agents.
//!
//! A pluggable LLM provider plus the agents around retrieval: planner,
//! rewriter, generator, judge, and summarizer, composed into the
//! [`AnswerPipeline`].

mod openai;
mod pipeline;
mod prompt;
mod provider;

pub use openai::OpenAiChatProvider;
pub use pipeline::{
    AnswerPipeline, AnswerResponse, Citation, PipelineConfig, Planner, QueryPlan, Verdict,
};
pub use prompt::{ANSWER_SYSTEM_PROMPT, build_answer_prompt, build_judge_prompt};
pub use provider::{
    ChatMessage, CompletionRequest, CompletionResponse, LlmProvider, Role, system_message,
    user_message,
};

/// Extracts JSON payload from a model response that may wrap it in
/// markdown code fences.
#[must_use]
pub fn strip_code_fences(content: &str) -> &str {
    if let Some(after) = content.split_once("```json").map(|(_, rest)| rest) {
        return after
            .split_once("```")
            .map_or(after, |(inner, _)| inner)
            .trim();
    }
    if let Some(after) = content.split_once("```").map(|(_, rest)| rest) {
        return after
            .split_once("```")
            .map_or(after, |(inner, _)| inner)
            .trim();
    }
    content.trim()
}
