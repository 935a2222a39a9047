// RefineMerger: cluster-merge plus LLM synthesis
//
// After clustering absorbs related codes, the model is asked to reason about
// how the merged concepts relate (inclusion, parallel, or intersection)
// before writing one combined label and criteria. The reasoning line is
// required; skipping it invites naive concatenation.

use anyhow::Result;
use async_trait::async_trait;

use crate::codebook::{Code, Codebook};

use super::cluster_merge::{replace_candidates, ClusterMerge};
use super::definition::{check_alignment, parse_definitions, update_codes};
use super::stage::{ConsolidatorStage, ParseError, Preprocessed};

const REFINE_SYSTEM_PROMPT: &str = "\
You are consolidating a qualitative codebook built from an online community's chat archive. \
Each numbered item below is the result of merging several related codes; the previous labels \
and all of their definitions are listed.

For every item, first decide how the merged concepts relate: does one include the others, \
are they parallel aspects of the same idea, or do they merely intersect? Then synthesize a \
single code. Respond with exactly:
<number>. Relationship: <inclusion, parallel, or intersection - one short justification>
Label: <the best single label for the combined concept>
Criteria: <one sentence of combined coding criteria>

Keep the items in the given order and do not add or drop items. \
If you cannot finish the whole list, output a line containing only \"...\" and stop.";

pub struct RefineMerger {
    merge: ClusterMerge,
    stopping: bool,
}

impl RefineMerger {
    pub fn new(merge: ClusterMerge) -> Self {
        Self {
            merge,
            stopping: false,
        }
    }

    /// A code still carrying merge residue needs a synthesis round.
    fn needs_synthesis(code: &Code) -> bool {
        !code.old_labels.is_empty() || code.definitions.len() > 1
    }
}

#[async_trait]
impl ConsolidatorStage for RefineMerger {
    fn name(&self) -> &str {
        "refine-merger"
    }

    fn looping(&self) -> bool {
        true
    }

    fn stopping(&self) -> bool {
        self.stopping
    }

    fn chunked(&self) -> bool {
        true
    }

    fn subunit_filter(&self, code: &Code) -> bool {
        !self.merge.use_definition() || !code.definitions.is_empty()
    }

    async fn preprocess(
        &mut self,
        codebook: &mut Codebook,
        candidates: Vec<Code>,
    ) -> Result<Preprocessed> {
        if candidates.len() < 2 {
            self.stopping = true;
            let leftovers: Vec<Code> = candidates
                .into_iter()
                .filter(Self::needs_synthesis)
                .collect();
            return Ok(Preprocessed::Candidates(leftovers));
        }

        let (merged, absorbed) = self.merge.merge_codes(&candidates).await?;
        self.stopping = absorbed == 0;

        let to_refine: Vec<Code> = merged
            .codes()
            .filter(|code| Self::needs_synthesis(code))
            .cloned()
            .collect();
        replace_candidates(codebook, &candidates, merged);
        Ok(Preprocessed::Candidates(to_refine))
    }

    fn build_prompts(&self, _codebook: &Codebook, codes: &[Code]) -> (String, String) {
        let mut user = String::new();
        for (index, code) in codes.iter().enumerate() {
            user.push_str(&format!("{}. {}\n", index + 1, code.label));
            let mut merged_labels: Vec<&str> =
                code.old_labels.iter().map(String::as_str).collect();
            if merged_labels.is_empty() {
                merged_labels = code.alternatives.iter().map(String::as_str).collect();
            }
            if !merged_labels.is_empty() {
                user.push_str(&format!("Merged labels: {}\n", merged_labels.join("; ")));
            }
            for definition in &code.definitions {
                user.push_str(&format!("- {}\n", definition));
            }
        }
        (REFINE_SYSTEM_PROMPT.to_string(), user)
    }

    fn parse_response(
        &mut self,
        codebook: &mut Codebook,
        codes: &mut [Code],
        lines: &[String],
    ) -> Result<i64, ParseError> {
        let (parsed, truncated) = parse_definitions(lines)?;
        if !truncated && parsed.len() != codes.len() {
            return Err(ParseError::CountMismatch {
                expected: codes.len(),
                actual: parsed.len(),
            });
        }
        if parsed.len() > codes.len() {
            return Err(ParseError::CountMismatch {
                expected: codes.len(),
                actual: parsed.len(),
            });
        }
        // The reasoning line is the quality gate; a reply without it is as
        // suspect as a miscounted one.
        for item in &parsed {
            if item.relationship.is_none() {
                return Err(ParseError::MissingSection("Relationship"));
            }
        }
        check_alignment(codes, &parsed)?;
        update_codes(codebook, codes, &parsed);
        Ok(parsed.len() as i64 - codes.len() as i64)
    }
}
