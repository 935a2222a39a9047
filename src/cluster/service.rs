// Clustering service contract

use async_trait::async_trait;
use thiserror::Error;

use super::ClusterAssignment;

/// One clustering call: the strings to embed, display labels for the
/// interactive dendrogram, and the two similarity thresholds.
///
/// `max_threshold` is the linkage cutoff; pairs tighter than it merge.
/// `min_threshold` is the floor the backend uses as a size penalty range —
/// the exact statistics live in the external script, calibrated empirically.
#[derive(Debug, Clone)]
pub struct ClusterRequest {
    pub texts: Vec<String>,
    pub labels: Vec<String>,
    pub purpose: String,
    pub metric: String,
    pub linkage: String,
    pub max_threshold: f64,
    pub min_threshold: f64,
    /// When set, the backend shows its dendrogram under this title and lets
    /// the operator pick thresholds by hand.
    pub interactive_title: Option<String>,
}

impl ClusterRequest {
    pub fn new(texts: Vec<String>, purpose: impl Into<String>) -> Self {
        let labels = texts.clone();
        Self {
            texts,
            labels,
            purpose: purpose.into(),
            metric: "euclidean".to_string(),
            linkage: "ward".to_string(),
            max_threshold: 0.65,
            min_threshold: 0.4,
            interactive_title: None,
        }
    }

    pub fn with_labels(mut self, labels: Vec<String>) -> Self {
        self.labels = labels;
        self
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

    pub fn interactive(mut self, title: impl Into<String>) -> Self {
        self.interactive_title = Some(title.into());
        self
    }
}

/// Result of a clustering call.
#[derive(Debug, Clone)]
pub struct ClusterOutcome {
    pub clusters: ClusterAssignment,
    /// The `(max, min)` threshold pair actually applied; populated only when
    /// the interactive picker overrode the requested values.
    pub chosen: Option<(f64, f64)>,
}

/// Pairwise distances plus 2-D layout positions for the network evaluator.
#[derive(Debug, Clone)]
pub struct DistanceReport {
    pub distances: Vec<Vec<f64>>,
    pub positions: Vec<[f64; 2]>,
}

#[derive(Debug, Error)]
pub enum ClusterError {
    #[error("clustering backend exited with {status}: {stderr}")]
    Backend { status: String, stderr: String },

    #[error("clustering backend produced no output")]
    EmptyOutput,

    #[error("unreadable clustering output: {0}")]
    BadOutput(#[from] serde_json::Error),

    #[error("{returned} assignments for {expected} items")]
    LengthMismatch { expected: usize, returned: usize },

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

/// Boundary to the external embedding + hierarchical clustering runtime.
#[async_trait]
pub trait ClusterService: Send + Sync {
    /// Group semantically similar strings.
    async fn cluster(&self, request: &ClusterRequest) -> Result<ClusterOutcome, ClusterError>;

    /// Pairwise semantic distances and layout positions for a set of strings.
    async fn distances(
        &self,
        texts: &[String],
        labels: &[String],
        purpose: &str,
    ) -> Result<DistanceReport, ClusterError>;
}
