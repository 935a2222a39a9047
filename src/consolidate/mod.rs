// Codebook consolidation pipeline
//
// A consolidator stage filters eligible codes, optionally pre-merges them
// through clustering, turns them into an LLM prompt pair, parses the reply
// back into codebook updates, and reports convergence. The pipeline chains
// stages behind the same contract; the driver runs whichever it is given.

pub mod category;
pub mod cluster_merge;
pub mod definition;
pub mod driver;
pub mod pipeline;
pub mod refine;
pub mod simple;
pub mod stage;

pub use category::{CategoryMerger, CategoryNameMerger};
pub use cluster_merge::ClusterMerge;
pub use definition::{parse_definitions, update_codes, DefinitionGenerator, ParsedCode};
pub use driver::{ChunkingDriver, DriverConfig, DriverReport};
pub use pipeline::PipelineConsolidator;
pub use refine::RefineMerger;
pub use simple::SimpleMerger;
pub use stage::{ConsolidatorStage, ParseError, Preprocessed};
