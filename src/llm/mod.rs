// LLM boundary
//
// The consolidation core treats the model as a function from prompts to
// text. ChatModel is that contract; CachedModel adds idempotent retries via
// an on-disk response cache, and ClaudeModel is the production transport.

use anyhow::Result;
use async_trait::async_trait;

pub mod cache;
pub mod client;
pub mod retry;
pub mod types;

pub use cache::CachedModel;
pub use client::ClaudeModel;
pub use types::ChatRequest;

/// A chat-completion model.
#[async_trait]
pub trait ChatModel: Send + Sync {
    /// Send one system/user prompt pair and return the raw response text.
    async fn complete(&self, request: &ChatRequest) -> Result<String>;

    /// Model name for logging and cache entries.
    fn name(&self) -> &str;
}

/// Split a raw response into trimmed, non-empty lines for the parsers.
pub fn response_lines(text: &str) -> Vec<String> {
    text.lines()
        .map(str::trim)
        .filter(|line| !line.is_empty())
        .map(str::to_string)
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_response_lines_trims_and_drops_blanks() {
        let lines = response_lines("1. Label: a\n\n   Criteria: b  \n");
        assert_eq!(lines, vec!["1. Label: a", "Criteria: b"]);
    }
}
