// Consolidator stage contract

use anyhow::Result;
use async_trait::async_trait;
use thiserror::Error;

use crate::codebook::{Code, Codebook};

/// How many codes a chunked stage loses from its chunk per failed attempt.
const RETRY_SHRINK: usize = 8;

/// Typed parse failures. All variants are retryable: the driver shrinks the
/// chunk and tries again rather than aborting the run.
#[derive(Debug, Error)]
pub enum ParseError {
    /// The response item count does not match the input count.
    #[error("{actual} results for {expected} codes")]
    CountMismatch { expected: usize, actual: usize },

    /// A parsed label matches an input code at a different list position.
    /// Usually a truncated or silently reordered response.
    #[error("label {label:?} returned at position {returned}, expected position {expected}")]
    Reordered {
        label: String,
        returned: usize,
        expected: usize,
    },

    /// A required line was absent from the response.
    #[error("missing {0} line in response")]
    MissingSection(&'static str),
}

/// What `preprocess` produced.
#[derive(Debug)]
pub enum Preprocessed {
    /// Candidates for the prompting step. An empty list means the stage has
    /// nothing left to do this iteration.
    Candidates(Vec<Code>),

    /// The stage already replaced the relevant codebook entries itself; skip
    /// prompting entirely this iteration.
    Replaced,
}

/// Default chunk shrink policy for retries.
pub fn shrink_chunk(recommended: usize, tries: u32) -> usize {
    recommended
        .saturating_sub(tries as usize * RETRY_SHRINK)
        .max(1)
}

/// One pipeline stage.
///
/// State machine per iteration: filter -> preprocess -> prompting -> parsing,
/// with `stopping` reporting whether the last invocation made progress.
/// `preprocess` must set `stopping` when it detects no change occurred, so a
/// looping stage terminates.
#[async_trait]
pub trait ConsolidatorStage: Send + Sync {
    fn name(&self) -> &str;

    /// Should the driver re-invoke this same stage until it stops?
    fn looping(&self) -> bool {
        false
    }

    /// Did the last invocation detect that no further progress is possible?
    fn stopping(&self) -> bool;

    /// Token-bounded stages take bounded chunks; others take all remaining
    /// codes in one call.
    fn chunked(&self) -> bool {
        false
    }

    /// Which codes are eligible this iteration. Must be safe to call
    /// repeatedly.
    fn subunit_filter(&self, _code: &Code) -> bool {
        true
    }

    /// Non-LLM transformation, typically clustering-and-merging. May replace
    /// codebook entries directly (returning `Replaced`) or hand back the
    /// candidate list for prompting.
    async fn preprocess(
        &mut self,
        codebook: &mut Codebook,
        candidates: Vec<Code>,
    ) -> Result<Preprocessed>;

    /// Produce the (system, user) prompt pair for a chunk. Two empty strings
    /// signal that no LLM call is needed.
    fn build_prompts(&self, codebook: &Codebook, codes: &[Code]) -> (String, String);

    /// Parse the model's reply, updating `codebook` and `codes` in place.
    /// Returns the cursor delta: 0 normally, negative when the model returned
    /// fewer items than expected so the driver can re-align.
    fn parse_response(
        &mut self,
        codebook: &mut Codebook,
        codes: &mut [Code],
        lines: &[String],
    ) -> Result<i64, ParseError>;

    /// How many codes to include in the next LLM call.
    fn chunk_size(&self, recommended: usize, remaining: usize, tries: u32) -> usize {
        if self.chunked() {
            shrink_chunk(recommended, tries).min(remaining)
        } else {
            remaining
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_shrink_chunk_policy() {
        assert_eq!(shrink_chunk(24, 0), 24);
        assert_eq!(shrink_chunk(24, 1), 16);
        assert_eq!(shrink_chunk(24, 2), 8);
        assert_eq!(shrink_chunk(24, 3), 1);
        assert_eq!(shrink_chunk(24, 10), 1);
    }
}
