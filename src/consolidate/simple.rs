// SimpleMerger: cluster-and-merge with no LLM round-trip
//
// The shortest label wins outright, which is lossy. Only safe at low
// thresholds where clusters are near-duplicates rather than distinct
// concepts.

use anyhow::Result;
use async_trait::async_trait;

use crate::codebook::{Code, Codebook};

use super::cluster_merge::{replace_candidates, ClusterMerge};
use super::stage::{ConsolidatorStage, ParseError, Preprocessed};

pub struct SimpleMerger {
    merge: ClusterMerge,
    stopping: bool,
}

impl SimpleMerger {
    pub fn new(merge: ClusterMerge) -> Self {
        Self {
            merge,
            stopping: false,
        }
    }
}

#[async_trait]
impl ConsolidatorStage for SimpleMerger {
    fn name(&self) -> &str {
        "simple-merger"
    }

    fn looping(&self) -> bool {
        true
    }

    fn stopping(&self) -> bool {
        self.stopping
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
            return Ok(Preprocessed::Candidates(Vec::new()));
        }

        let (merged, absorbed) = self.merge.merge_codes(&candidates).await?;
        self.stopping = absorbed == 0;
        replace_candidates(codebook, &candidates, merged);
        Ok(Preprocessed::Replaced)
    }

    fn build_prompts(&self, _codebook: &Codebook, _codes: &[Code]) -> (String, String) {
        (String::new(), String::new())
    }

    fn parse_response(
        &mut self,
        _codebook: &mut Codebook,
        _codes: &mut [Code],
        _lines: &[String],
    ) -> Result<i64, ParseError> {
        Ok(0)
    }
}
