// Pipeline consolidator
//
// Chains an ordered stage list behind the single-stage contract. The driver
// never learns which stage is active; it just keeps invoking the pipeline
// until it reports zero candidates.

use anyhow::Result;
use async_trait::async_trait;
use tracing::info;

use crate::codebook::{Code, Codebook};

use super::stage::{ConsolidatorStage, ParseError, Preprocessed};

pub struct PipelineConsolidator {
    stages: Vec<Box<dyn ConsolidatorStage>>,
    /// None until the first preprocess call.
    current: Option<usize>,
    /// How many codes the active stage was handed last time, so a looping
    /// stage that ran dry advances.
    last_handed: usize,
    exhausted: bool,
}

impl PipelineConsolidator {
    pub fn new(stages: Vec<Box<dyn ConsolidatorStage>>) -> Self {
        Self {
            stages,
            current: None,
            last_handed: 0,
            exhausted: false,
        }
    }

    /// The stage the next preprocess call will run: the current one, or its
    /// successor when the current stage is done. `None` once past the end.
    fn predicted_index(&self) -> Option<usize> {
        let next = match self.current {
            None => 0,
            Some(index) => {
                if index >= self.stages.len() {
                    return None;
                }
                let stage = &self.stages[index];
                let done = !stage.looping() || stage.stopping() || self.last_handed == 0;
                if done {
                    index + 1
                } else {
                    index
                }
            }
        };
        (next < self.stages.len()).then_some(next)
    }

    fn active(&self) -> Option<&dyn ConsolidatorStage> {
        self.current
            .filter(|index| *index < self.stages.len())
            .map(|index| self.stages[index].as_ref())
    }
}

#[async_trait]
impl ConsolidatorStage for PipelineConsolidator {
    fn name(&self) -> &str {
        self.active().map(|stage| stage.name()).unwrap_or("pipeline")
    }

    fn looping(&self) -> bool {
        true
    }

    fn stopping(&self) -> bool {
        self.exhausted
    }

    fn chunked(&self) -> bool {
        self.active().map(|stage| stage.chunked()).unwrap_or(false)
    }

    /// Eligibility is judged by the stage that will actually run next, so a
    /// stage transition never inherits its predecessor's filter.
    fn subunit_filter(&self, code: &Code) -> bool {
        match self.predicted_index() {
            Some(index) => self.stages[index].subunit_filter(code),
            None => false,
        }
    }

    async fn preprocess(
        &mut self,
        codebook: &mut Codebook,
        candidates: Vec<Code>,
    ) -> Result<Preprocessed> {
        let next = self.predicted_index();
        if next != self.current {
            match next {
                Some(index) => info!(stage = self.stages[index].name(), "pipeline stage"),
                None => info!("pipeline exhausted"),
            }
        }
        self.current = Some(next.unwrap_or(self.stages.len()));

        let Some(index) = next else {
            self.exhausted = true;
            self.last_handed = 0;
            return Ok(Preprocessed::Candidates(Vec::new()));
        };

        let stage = &mut self.stages[index];
        let filtered: Vec<Code> = candidates
            .into_iter()
            .filter(|code| stage.subunit_filter(code))
            .collect();
        self.last_handed = filtered.len();
        stage.preprocess(codebook, filtered).await
    }

    fn build_prompts(&self, codebook: &Codebook, codes: &[Code]) -> (String, String) {
        match self.active() {
            Some(stage) => stage.build_prompts(codebook, codes),
            None => (String::new(), String::new()),
        }
    }

    fn parse_response(
        &mut self,
        codebook: &mut Codebook,
        codes: &mut [Code],
        lines: &[String],
    ) -> Result<i64, ParseError> {
        match self.current.filter(|index| *index < self.stages.len()) {
            Some(index) => self.stages[index].parse_response(codebook, codes, lines),
            None => Ok(0),
        }
    }

    fn chunk_size(&self, recommended: usize, remaining: usize, tries: u32) -> usize {
        match self.active() {
            Some(stage) => stage.chunk_size(recommended, remaining, tries),
            None => 0,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Minimal scripted stage for pipeline-order tests.
    struct ScriptedStage {
        name: &'static str,
        looping: bool,
        stopping: bool,
        /// Iterations before the stage reports stopping.
        runs_until_stop: usize,
        invocations: usize,
    }

    impl ScriptedStage {
        fn new(name: &'static str, looping: bool, runs_until_stop: usize) -> Self {
            Self {
                name,
                looping,
                stopping: false,
                runs_until_stop,
                invocations: 0,
            }
        }
    }

    #[async_trait]
    impl ConsolidatorStage for ScriptedStage {
        fn name(&self) -> &str {
            self.name
        }

        fn looping(&self) -> bool {
            self.looping
        }

        fn stopping(&self) -> bool {
            self.stopping
        }

        async fn preprocess(
            &mut self,
            _codebook: &mut Codebook,
            candidates: Vec<Code>,
        ) -> Result<Preprocessed> {
            self.invocations += 1;
            self.stopping = self.invocations >= self.runs_until_stop;
            Ok(Preprocessed::Candidates(candidates))
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

    fn candidates() -> Vec<Code> {
        vec![Code::new("a"), Code::new("b")]
    }

    #[tokio::test]
    async fn test_non_looping_stage_runs_once() {
        let mut pipeline = PipelineConsolidator::new(vec![
            Box::new(ScriptedStage::new("first", false, 99)),
            Box::new(ScriptedStage::new("second", false, 99)),
        ]);
        let mut book = Codebook::new();

        pipeline.preprocess(&mut book, candidates()).await.unwrap();
        assert_eq!(pipeline.name(), "first");
        pipeline.preprocess(&mut book, candidates()).await.unwrap();
        assert_eq!(pipeline.name(), "second");
        pipeline.preprocess(&mut book, candidates()).await.unwrap();
        assert!(pipeline.stopping());
    }

    #[tokio::test]
    async fn test_looping_stage_runs_until_stopping() {
        let mut pipeline = PipelineConsolidator::new(vec![
            Box::new(ScriptedStage::new("looper", true, 3)),
            Box::new(ScriptedStage::new("after", false, 99)),
        ]);
        let mut book = Codebook::new();

        for _ in 0..3 {
            pipeline.preprocess(&mut book, candidates()).await.unwrap();
            assert_eq!(pipeline.name(), "looper");
        }
        pipeline.preprocess(&mut book, candidates()).await.unwrap();
        assert_eq!(pipeline.name(), "after");
    }

    #[tokio::test]
    async fn test_looping_stage_advances_on_empty_input() {
        let mut pipeline = PipelineConsolidator::new(vec![
            Box::new(ScriptedStage::new("looper", true, 99)),
            Box::new(ScriptedStage::new("after", false, 99)),
        ]);
        let mut book = Codebook::new();

        pipeline.preprocess(&mut book, Vec::new()).await.unwrap();
        assert_eq!(pipeline.name(), "looper");
        pipeline.preprocess(&mut book, candidates()).await.unwrap();
        assert_eq!(pipeline.name(), "after");
    }

    #[tokio::test]
    async fn test_exhausted_pipeline_reports_zero_candidates() {
        let mut pipeline =
            PipelineConsolidator::new(vec![Box::new(ScriptedStage::new("only", false, 99))]);
        let mut book = Codebook::new();

        pipeline.preprocess(&mut book, candidates()).await.unwrap();
        let outcome = pipeline.preprocess(&mut book, candidates()).await.unwrap();
        match outcome {
            Preprocessed::Candidates(list) => assert!(list.is_empty()),
            Preprocessed::Replaced => panic!("expected empty candidates"),
        }
        assert!(pipeline.stopping());
        assert!(!pipeline.subunit_filter(&Code::new("anything")));
    }
}
