// Chunking iteration driver
//
// Runs a stage (or a whole pipeline) to convergence: filter eligible codes,
// preprocess, then walk the candidate list in stage-sized chunks through the
// model, shrinking the chunk and retrying on parse failures. Progress is
// persisted after every iteration so an interrupted run resumes cheaply from
// the response cache.

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use tracing::{debug, info, warn};

use crate::codebook::{io, Code, Codebook};
use crate::llm::{response_lines, ChatModel, ChatRequest};

use super::stage::{ConsolidatorStage, Preprocessed};

#[derive(Debug, Clone)]
pub struct DriverConfig {
    /// Chunk size handed to `chunk_size` before retry shrinking.
    pub recommended_chunk: usize,
    /// Parse failures tolerated per chunk before the run aborts.
    pub max_parse_retries: u32,
    pub temperature: f32,
    /// Dry-run: serve LLM responses from cache only.
    pub fake: bool,
    /// Where to persist the codebook after each iteration.
    pub progress_path: Option<PathBuf>,
    /// Hard cap on iterations, against stages that never report stopping.
    pub max_iterations: usize,
}

impl Default for DriverConfig {
    fn default() -> Self {
        Self {
            recommended_chunk: 24,
            max_parse_retries: 3,
            temperature: 0.0,
            fake: false,
            progress_path: None,
            max_iterations: 100,
        }
    }
}

#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct DriverReport {
    pub iterations: usize,
    pub llm_calls: usize,
    pub parse_failures: usize,
}

pub struct ChunkingDriver {
    model: Arc<dyn ChatModel>,
    config: DriverConfig,
}

impl ChunkingDriver {
    pub fn new(model: Arc<dyn ChatModel>, config: DriverConfig) -> Self {
        Self { model, config }
    }

    /// Run `stage` over `codebook` until it reports zero candidates for two
    /// consecutive iterations while signalling `stopping`.
    pub async fn run(
        &self,
        stage: &mut dyn ConsolidatorStage,
        codebook: &mut Codebook,
    ) -> Result<DriverReport> {
        let mut report = DriverReport::default();
        let mut idle = 0;

        while idle < 2 {
            if report.iterations >= self.config.max_iterations {
                warn!(iterations = report.iterations, "iteration cap reached");
                break;
            }
            report.iterations += 1;

            let candidates: Vec<Code> = codebook
                .codes()
                .filter(|code| stage.subunit_filter(code))
                .cloned()
                .collect();
            debug!(
                iteration = report.iterations,
                candidates = candidates.len(),
                codes = codebook.len(),
                "driver iteration"
            );

            let ran_dry = match stage.preprocess(codebook, candidates).await? {
                Preprocessed::Replaced => false,
                Preprocessed::Candidates(mut list) => {
                    if list.is_empty() {
                        true
                    } else {
                        self.run_chunks(stage, codebook, &mut list, &mut report)
                            .await?;
                        false
                    }
                }
            };

            if ran_dry && stage.stopping() {
                idle += 1;
            } else {
                idle = 0;
            }

            if let Some(path) = &self.config.progress_path {
                io::save_codebook(codebook, path)?;
            }
        }

        info!(
            iterations = report.iterations,
            llm_calls = report.llm_calls,
            codes = codebook.len(),
            "driver converged"
        );
        Ok(report)
    }

    /// Walk one candidate list through the model chunk by chunk.
    async fn run_chunks(
        &self,
        stage: &mut dyn ConsolidatorStage,
        codebook: &mut Codebook,
        list: &mut [Code],
        report: &mut DriverReport,
    ) -> Result<()> {
        let mut cursor: usize = 0;
        let mut tries: u32 = 0;

        while cursor < list.len() {
            let remaining = list.len() - cursor;
            let size = stage
                .chunk_size(self.config.recommended_chunk, remaining, tries)
                .clamp(1, remaining);
            let chunk = &mut list[cursor..cursor + size];

            let (system, user) = stage.build_prompts(codebook, chunk);
            if system.is_empty() && user.is_empty() {
                debug!(stage = stage.name(), "no LLM call requested");
                break;
            }

            let request = ChatRequest {
                system,
                user,
                temperature: self.config.temperature,
                cache_key: stage.name().to_string(),
                fake: self.config.fake,
            };
            report.llm_calls += 1;
            let response = self.model.complete(&request).await?;
            let lines = response_lines(&response);

            match stage.parse_response(codebook, chunk, &lines) {
                Ok(delta) => {
                    cursor = (cursor as i64 + size as i64 + delta).max(0) as usize;
                    tries = 0;
                }
                Err(err) => {
                    report.parse_failures += 1;
                    tries += 1;
                    if tries > self.config.max_parse_retries {
                        return Err(err).with_context(|| {
                            format!(
                                "giving up on chunk at {} after {} attempts",
                                cursor, tries
                            )
                        });
                    }
                    warn!(%err, tries, "parse failed, retrying with a smaller chunk");
                }
            }
        }
        Ok(())
    }
}
