// Command handlers: wire config, services, and the pipeline together

use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{Context, Result};
use tracing::info;

use crate::cluster::{ClusterService, LinkageClusterService};
use crate::codebook::{io, merge_codebooks, Representative};
use crate::config::Config;
use crate::consolidate::{
    CategoryMerger, CategoryNameMerger, ChunkingDriver, ClusterMerge, ConsolidatorStage,
    DefinitionGenerator, DriverConfig, PipelineConsolidator, RefineMerger, SimpleMerger,
};
use crate::evaluate::{EvaluationConfig, NetworkEvaluator};
use crate::llm::{CachedModel, ChatModel, ClaudeModel};

fn cluster_service(config: &Config) -> Arc<dyn ClusterService> {
    Arc::new(LinkageClusterService::new(
        config.cluster.python.clone(),
        config.cluster.cluster_script.clone(),
        config.cluster.distance_script.clone(),
        config.cluster.work_dir.clone(),
    ))
}

fn chat_model(config: &Config) -> Result<Arc<dyn ChatModel>> {
    let mut claude = ClaudeModel::new(config.llm.api_key.clone())?;
    if let Some(model) = &config.llm.model {
        claude = claude.with_model(model.clone());
    }
    if let Some(max_tokens) = config.llm.max_tokens {
        claude = claude.with_max_tokens(max_tokens);
    }
    Ok(Arc::new(CachedModel::new(
        Box::new(claude),
        config.cache_dir.clone(),
    )))
}

/// The default stage order: dedupe near-identical labels cheaply, fill in
/// missing definitions, then cluster on definitions with LLM synthesis, and
/// finally tidy the category names.
pub fn build_pipeline(
    config: &Config,
    service: Arc<dyn ClusterService>,
    rename_categories: bool,
) -> PipelineConsolidator {
    let metric = config.cluster.metric.clone();
    let linkage = config.cluster.linkage.clone();
    let tuning = &config.consolidate;

    let simple = ClusterMerge::new(service.clone(), "simple")
        .with_metric(metric.clone(), linkage.clone())
        .with_thresholds(tuning.simple.max, tuning.simple.min);
    let refine = ClusterMerge::new(service.clone(), "refine")
        .with_metric(metric.clone(), linkage.clone())
        .with_thresholds(tuning.refine.max, tuning.refine.min)
        .with_definitions()
        .with_representative(Representative::HighestProbability);
    let categories = ClusterMerge::new(service, "categories")
        .with_metric(metric, linkage)
        .with_thresholds(tuning.category.max, tuning.category.min);

    let category_stage: Box<dyn ConsolidatorStage> = if rename_categories {
        Box::new(CategoryMerger::new(categories))
    } else {
        Box::new(CategoryNameMerger::new(categories))
    };

    PipelineConsolidator::new(vec![
        Box::new(SimpleMerger::new(simple)),
        Box::new(DefinitionGenerator::new()),
        Box::new(RefineMerger::new(refine)),
        category_stage,
    ])
}

pub async fn consolidate(
    config: &Config,
    codebook_path: &Path,
    output: &Path,
    fake: bool,
    rename_categories: bool,
) -> Result<()> {
    let mut book = io::load_codebook(codebook_path)?;
    let before = book.len();

    let service = cluster_service(config);
    let model = chat_model(config)?;
    let mut pipeline = build_pipeline(config, service, rename_categories);

    let driver = ChunkingDriver::new(
        model,
        DriverConfig {
            recommended_chunk: config.consolidate.chunk_size,
            temperature: config.llm.temperature,
            fake,
            progress_path: Some(output.to_path_buf()),
            ..Default::default()
        },
    );
    let report = driver.run(&mut pipeline, &mut book).await?;

    io::save_codebook(&book, output)?;
    info!(
        before,
        after = book.len(),
        iterations = report.iterations,
        llm_calls = report.llm_calls,
        "consolidation finished"
    );
    Ok(())
}

pub fn merge(inputs: &[PathBuf], output: &Path) -> Result<()> {
    anyhow::ensure!(!inputs.is_empty(), "no input codebooks given");
    let books = inputs
        .iter()
        .map(|path| io::load_codebook(path))
        .collect::<Result<Vec<_>>>()?;
    let sizes: Vec<usize> = books.iter().map(|book| book.len()).collect();

    let combined = merge_codebooks(books);
    io::save_codebook(&combined, output)?;
    info!(?sizes, combined = combined.len(), "merged codebooks");
    Ok(())
}

pub async fn evaluate(
    config: &Config,
    reference: &Path,
    codebooks: &[PathBuf],
    output: &Path,
) -> Result<()> {
    anyhow::ensure!(!codebooks.is_empty(), "no codebooks to evaluate");

    let mut books = vec![(
        reference
            .file_stem()
            .map(|stem| stem.to_string_lossy().into_owned())
            .unwrap_or_else(|| "reference".to_string()),
        io::load_codebook(reference)?,
    )];
    for path in codebooks {
        let name = path
            .file_stem()
            .map(|stem| stem.to_string_lossy().into_owned())
            .unwrap_or_else(|| path.display().to_string());
        books.push((name, io::load_codebook(path)?));
    }

    let evaluator = NetworkEvaluator::new(cluster_service(config), EvaluationConfig::default());
    let package = evaluator.evaluate(&books).await?;

    let json = serde_json::to_string_pretty(&package).context("Failed to serialize evaluation")?;
    std::fs::write(output, json)
        .with_context(|| format!("Failed to write evaluation: {}", output.display()))?;
    info!(path = %output.display(), "evaluation written");
    Ok(())
}

pub fn export(codebook: &Path, output: &Path) -> Result<()> {
    let book = io::load_codebook(codebook)?;
    io::export_csv(&book, output)
}

pub fn import(spreadsheet: &Path, output: &Path) -> Result<()> {
    let book = io::import_csv(spreadsheet)?;
    io::save_codebook(&book, output)
}
