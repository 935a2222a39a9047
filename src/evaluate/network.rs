// Network evaluator
//
// Merges codebooks (reference first) into a superset that remembers which
// input books own each surviving code, asks the clustering service for
// pairwise distances and 2-D positions, and derives coverage / novelty /
// divergence per codebook. The assembled package feeds the external
// network visualizer.

use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use serde::Serialize;
use tracing::info;

use crate::cluster::ClusterService;
use crate::codebook::{merge_into, Code, Codebook};

#[derive(Debug, Clone)]
pub struct EvaluationConfig {
    /// Distance under which a code counts as covering a reference code.
    pub neighbor_distance: f64,
    /// Distance under which the visualizer draws a link.
    pub link_distance: f64,
}

impl Default for EvaluationConfig {
    fn default() -> Self {
        Self {
            neighbor_distance: 0.5,
            link_distance: 0.6,
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct CodebookMetrics {
    pub name: String,
    /// Consolidated code count.
    pub codes: usize,
    pub weight: f64,
    /// Fraction of reference codes with a near neighbor in this codebook.
    pub coverage: f64,
    /// Fraction of this codebook's codes with no near reference neighbor.
    pub novelty: f64,
    /// Mean distance from this codebook's codes to the nearest reference code.
    pub divergence: f64,
}

#[derive(Debug, Clone, Serialize)]
pub struct NetworkNode {
    pub label: String,
    /// Indices into `owner_labels` for every codebook holding this code.
    pub owners: Vec<usize>,
    pub position: [f64; 2],
}

#[derive(Debug, Clone, Serialize)]
pub struct NetworkLink {
    pub source: usize,
    pub target: usize,
    pub distance: f64,
}

#[derive(Debug, Clone, Serialize)]
pub struct ComparisonPackage {
    pub created: DateTime<Utc>,
    /// Codebook names, reference first.
    pub owner_labels: Vec<String>,
    pub weights: Vec<f64>,
    pub metrics: Vec<CodebookMetrics>,
    pub nodes: Vec<NetworkNode>,
    pub links: Vec<NetworkLink>,
    pub distances: Vec<Vec<f64>>,
}

/// Merge codebooks into one superset, tracking which inputs own each code.
/// Input order fixes the owner indices.
pub fn merge_with_owners(books: &[(String, Codebook)]) -> Vec<(Code, BTreeSet<usize>)> {
    let mut merged: BTreeMap<String, (Code, BTreeSet<usize>)> = BTreeMap::new();
    for (owner, (_, book)) in books.iter().enumerate() {
        for code in book.codes() {
            let key = Codebook::key(&code.label);
            match merged.get_mut(&key) {
                Some((existing, owners)) => {
                    merge_into(existing, code);
                    owners.insert(owner);
                }
                None => {
                    let mut owners = BTreeSet::new();
                    owners.insert(owner);
                    merged.insert(key, (code.clone(), owners));
                }
            }
        }
    }
    merged.into_values().collect()
}

/// Weight per codebook: inverse log of its size relative to the median, so
/// one oversized codebook cannot dominate aggregate views. At or below the
/// median the weight stays 1.0.
pub fn codebook_weights(sizes: &[usize]) -> Vec<f64> {
    if sizes.is_empty() {
        return Vec::new();
    }
    let mut sorted: Vec<usize> = sizes.to_vec();
    sorted.sort_unstable();
    let median = sorted[sorted.len() / 2].max(1) as f64;

    sizes
        .iter()
        .map(|&size| {
            let ratio = size as f64 / median;
            if ratio <= 1.0 {
                1.0
            } else {
                1.0 / (1.0 + ratio.ln())
            }
        })
        .collect()
}

pub struct NetworkEvaluator {
    service: Arc<dyn ClusterService>,
    config: EvaluationConfig,
}

impl NetworkEvaluator {
    pub fn new(service: Arc<dyn ClusterService>, config: EvaluationConfig) -> Self {
        Self { service, config }
    }

    /// Evaluate codebooks against the first entry, the reference.
    pub async fn evaluate(&self, books: &[(String, Codebook)]) -> Result<ComparisonPackage> {
        anyhow::ensure!(books.len() >= 2, "need a reference and at least one codebook");

        let merged = merge_with_owners(books);
        let texts: Vec<String> = merged
            .iter()
            .map(|(code, _)| code.embedding_text(true))
            .collect();
        let labels: Vec<String> = merged.iter().map(|(code, _)| code.label.clone()).collect();

        let report = self
            .service
            .distances(&texts, &labels, "evaluation")
            .await
            .context("distance computation failed")?;

        let sizes: Vec<usize> = books.iter().map(|(_, book)| book.len()).collect();
        let weights = codebook_weights(&sizes);

        let reference_nodes: Vec<usize> = merged
            .iter()
            .enumerate()
            .filter(|(_, (_, owners))| owners.contains(&0))
            .map(|(index, _)| index)
            .collect();

        let mut metrics = Vec::new();
        for (owner, (name, book)) in books.iter().enumerate() {
            let owned: Vec<usize> = merged
                .iter()
                .enumerate()
                .filter(|(_, (_, owners))| owners.contains(&owner))
                .map(|(index, _)| index)
                .collect();

            let covered = reference_nodes
                .iter()
                .filter(|&&reference| {
                    owned.iter().any(|&node| {
                        report.distances[reference][node] <= self.config.neighbor_distance
                    })
                })
                .count();
            let coverage = covered as f64 / reference_nodes.len().max(1) as f64;

            let nearest: Vec<f64> = owned
                .iter()
                .map(|&node| {
                    reference_nodes
                        .iter()
                        .map(|&reference| report.distances[node][reference])
                        .fold(f64::INFINITY, f64::min)
                })
                .collect();
            let novel = nearest
                .iter()
                .filter(|&&distance| distance > self.config.neighbor_distance)
                .count();
            let novelty = novel as f64 / owned.len().max(1) as f64;
            let divergence = if nearest.is_empty() {
                0.0
            } else {
                nearest.iter().sum::<f64>() / nearest.len() as f64
            };

            metrics.push(CodebookMetrics {
                name: name.clone(),
                codes: book.len(),
                weight: weights[owner],
                coverage,
                novelty,
                divergence,
            });
        }

        let nodes: Vec<NetworkNode> = merged
            .iter()
            .enumerate()
            .map(|(index, (code, owners))| NetworkNode {
                label: code.label.clone(),
                owners: owners.iter().copied().collect(),
                position: report
                    .positions
                    .get(index)
                    .copied()
                    .unwrap_or([0.0, 0.0]),
            })
            .collect();

        let mut links = Vec::new();
        for source in 0..merged.len() {
            for target in (source + 1)..merged.len() {
                let distance = report.distances[source][target];
                if distance <= self.config.link_distance {
                    links.push(NetworkLink {
                        source,
                        target,
                        distance,
                    });
                }
            }
        }

        info!(
            codebooks = books.len(),
            nodes = nodes.len(),
            links = links.len(),
            "evaluation assembled"
        );
        Ok(ComparisonPackage {
            created: Utc::now(),
            owner_labels: books.iter().map(|(name, _)| name.clone()).collect(),
            weights,
            metrics,
            nodes,
            links,
            distances: report.distances,
        })
    }
}
