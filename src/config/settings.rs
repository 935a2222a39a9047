// Configuration structs

use std::path::PathBuf;

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LlmConfig {
    pub api_key: String,

    /// Model override; the client default applies when unset.
    #[serde(default)]
    pub model: Option<String>,

    #[serde(default)]
    pub max_tokens: Option<u32>,

    #[serde(default)]
    pub temperature: f32,
}

/// Where the external clustering runtime lives.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClusterConfig {
    #[serde(default = "default_python")]
    pub python: PathBuf,

    pub cluster_script: PathBuf,
    pub distance_script: PathBuf,

    /// Scratch directory for the JSON handoff files.
    #[serde(default = "default_work_dir")]
    pub work_dir: PathBuf,

    #[serde(default = "default_metric")]
    pub metric: String,

    #[serde(default = "default_linkage")]
    pub linkage: String,
}

fn default_python() -> PathBuf {
    PathBuf::from("python3")
}

fn default_work_dir() -> PathBuf {
    PathBuf::from(".magpie/cluster")
}

fn default_metric() -> String {
    "euclidean".to_string()
}

fn default_linkage() -> String {
    "ward".to_string()
}

/// A `(max, min)` similarity threshold pair for one stage. Higher maximum
/// means tighter, fewer merges; the minimum bounds the backend's size
/// penalty. Calibrated empirically, not derived.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct Thresholds {
    pub max: f64,
    pub min: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConsolidateConfig {
    /// Lossy no-LLM merge; keep these low.
    #[serde(default = "default_simple")]
    pub simple: Thresholds,

    #[serde(default = "default_refine")]
    pub refine: Thresholds,

    #[serde(default = "default_category")]
    pub category: Thresholds,

    /// Codes per LLM call before retry shrinking.
    #[serde(default = "default_chunk_size")]
    pub chunk_size: usize,
}

fn default_simple() -> Thresholds {
    Thresholds { max: 0.45, min: 0.3 }
}

fn default_refine() -> Thresholds {
    Thresholds { max: 0.65, min: 0.4 }
}

fn default_category() -> Thresholds {
    Thresholds { max: 0.65, min: 0.4 }
}

fn default_chunk_size() -> usize {
    24
}

impl Default for ConsolidateConfig {
    fn default() -> Self {
        Self {
            simple: default_simple(),
            refine: default_refine(),
            category: default_category(),
            chunk_size: default_chunk_size(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    pub llm: LlmConfig,

    pub cluster: ClusterConfig,

    #[serde(default)]
    pub consolidate: ConsolidateConfig,

    /// LLM response cache location.
    #[serde(default = "default_cache_dir")]
    pub cache_dir: PathBuf,
}

fn default_cache_dir() -> PathBuf {
    PathBuf::from(".magpie/responses")
}

impl Config {
    /// Minimal config from an API key alone; clustering scripts still need
    /// to be configured before the mergers can run.
    pub fn with_api_key(api_key: String) -> Self {
        Self {
            llm: LlmConfig {
                api_key,
                model: None,
                max_tokens: None,
                temperature: 0.0,
            },
            cluster: ClusterConfig {
                python: default_python(),
                cluster_script: PathBuf::from("scripts/clustering-linkage.py"),
                distance_script: PathBuf::from("scripts/distances.py"),
                work_dir: default_work_dir(),
                metric: default_metric(),
                linkage: default_linkage(),
            },
            consolidate: ConsolidateConfig::default(),
            cache_dir: default_cache_dir(),
        }
    }
}
