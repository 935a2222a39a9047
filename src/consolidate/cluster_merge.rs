// Shared clustering preprocessor
//
// Every clustering-based stage delegates here: serialize candidates for
// embedding, call the external service with the stage's thresholds, and run
// the cluster merge. Stages hold one of these by composition rather than
// inheriting from a common merger base.

use std::sync::Arc;

use anyhow::Result;
use tracing::{debug, info};

use crate::cluster::{ClusterRequest, ClusterService};
use crate::codebook::{
    merge_categories_by_cluster, merge_codes_by_cluster, CategoryRename, Code, Codebook,
    Representative,
};

#[derive(Clone)]
pub struct ClusterMerge {
    service: Arc<dyn ClusterService>,
    purpose: String,
    metric: String,
    linkage: String,
    max_threshold: f64,
    min_threshold: f64,
    use_definition: bool,
    pick: Representative,
    interactive_title: Option<String>,
}

impl ClusterMerge {
    pub fn new(service: Arc<dyn ClusterService>, purpose: impl Into<String>) -> Self {
        Self {
            service,
            purpose: purpose.into(),
            metric: "euclidean".to_string(),
            linkage: "ward".to_string(),
            max_threshold: 0.65,
            min_threshold: 0.4,
            use_definition: false,
            pick: Representative::ShortestLabel,
            interactive_title: None,
        }
    }

    pub fn with_thresholds(mut self, max_threshold: f64, min_threshold: f64) -> Self {
        self.max_threshold = max_threshold;
        self.min_threshold = min_threshold;
        self
    }

    pub fn with_metric(mut self, metric: impl Into<String>, linkage: impl Into<String>) -> Self {
        self.metric = metric.into();
        self.linkage = linkage.into();
        self
    }

    /// Embed the first definition and absorbed labels along with the label.
    pub fn with_definitions(mut self) -> Self {
        self.use_definition = true;
        self
    }

    pub fn with_representative(mut self, pick: Representative) -> Self {
        self.pick = pick;
        self
    }

    pub fn interactive(mut self, title: impl Into<String>) -> Self {
        self.interactive_title = Some(title.into());
        self
    }

    pub fn use_definition(&self) -> bool {
        self.use_definition
    }

    fn request(&self, texts: Vec<String>, labels: Vec<String>) -> ClusterRequest {
        let mut request = ClusterRequest::new(texts, self.purpose.clone())
            .with_labels(labels)
            .with_metric(self.metric.clone(), self.linkage.clone())
            .with_thresholds(self.max_threshold, self.min_threshold);
        if let Some(title) = &self.interactive_title {
            request = request.interactive(title.clone());
        }
        request
    }

    /// Cluster and merge a candidate list. Returns the replacement codebook
    /// for the candidates and the number of codes absorbed.
    pub async fn merge_codes(&self, candidates: &[Code]) -> Result<(Codebook, usize)> {
        if candidates.len() < 2 {
            return Ok((candidates.iter().cloned().collect(), 0));
        }

        let texts: Vec<String> = candidates
            .iter()
            .map(|code| code.embedding_text(self.use_definition))
            .collect();
        let labels: Vec<String> = candidates.iter().map(|code| code.label.clone()).collect();

        let outcome = self.service.cluster(&self.request(texts, labels)).await?;
        if let Some((max, min)) = outcome.chosen {
            debug!(max, min, "interactive thresholds applied");
        }

        let merged = merge_codes_by_cluster(&outcome.clusters, candidates, self.pick)?;
        let absorbed = candidates.len() - merged.len();
        info!(
            purpose = %self.purpose,
            before = candidates.len(),
            after = merged.len(),
            "cluster merge"
        );
        Ok((merged, absorbed))
    }

    /// Cluster category-name strings and compute the rename map.
    pub async fn merge_categories(&self, names: &[String]) -> Result<CategoryRename> {
        if names.len() < 2 {
            return Ok(CategoryRename::default());
        }

        let outcome = self
            .service
            .cluster(&self.request(names.to_vec(), names.to_vec()))
            .await?;
        let rename = merge_categories_by_cluster(&outcome.clusters, names, self.pick)?;
        info!(
            purpose = %self.purpose,
            names = names.len(),
            merged = rename.merges(),
            "category cluster merge"
        );
        Ok(rename)
    }
}

/// Swap the candidate subset of `codebook` for the merge result. Codes the
/// stage filter excluded stay untouched.
pub fn replace_candidates(codebook: &mut Codebook, candidates: &[Code], merged: Codebook) {
    for code in candidates {
        codebook.remove(&code.label);
    }
    for code in merged.into_codes() {
        codebook.insert(code);
    }
}
