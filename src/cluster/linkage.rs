// Subprocess-backed clustering service
//
// Spawns the configured Python linkage script. The script reads its items
// from a JSON file whose path arrives as the first argument, takes metric /
// linkage / thresholds as plain argv strings, and prints its result as the
// final stdout line: `[cluster_ids, probabilities]` (optionally followed by
// the `[max, min]` pair an interactive picker settled on), or
// `{"Distances": ..., "Positions": ...}` in distance mode.

use std::path::PathBuf;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use tokio::process::Command;
use tracing::debug;

use super::service::{
    ClusterError, ClusterOutcome, ClusterRequest, ClusterService, DistanceReport,
};
use super::ClusterAssignment;

#[derive(Debug, Clone)]
pub struct LinkageClusterService {
    python: PathBuf,
    cluster_script: PathBuf,
    distance_script: PathBuf,
    work_dir: PathBuf,
}

#[derive(Serialize)]
struct ScriptInput<'a> {
    texts: &'a [String],
    labels: &'a [String],
}

#[derive(Deserialize)]
struct RawDistances {
    #[serde(rename = "Distances")]
    distances: Vec<Vec<f64>>,
    #[serde(rename = "Positions")]
    positions: Vec<[f64; 2]>,
}

impl LinkageClusterService {
    pub fn new(
        python: PathBuf,
        cluster_script: PathBuf,
        distance_script: PathBuf,
        work_dir: PathBuf,
    ) -> Self {
        Self {
            python,
            cluster_script,
            distance_script,
            work_dir,
        }
    }

    /// Write the item list where the script can read it. The file name hashes
    /// the content so concurrent runs with different inputs never collide.
    async fn write_input(
        &self,
        texts: &[String],
        labels: &[String],
        purpose: &str,
    ) -> Result<PathBuf, ClusterError> {
        tokio::fs::create_dir_all(&self.work_dir).await?;
        let payload = serde_json::to_string(&ScriptInput { texts, labels })?;
        let mut hasher = Sha256::new();
        hasher.update(payload.as_bytes());
        let digest = format!("{:x}", hasher.finalize());
        let path = self
            .work_dir
            .join(format!("{}-{}.json", purpose, &digest[..12]));
        tokio::fs::write(&path, payload).await?;
        Ok(path)
    }

    /// Run the script and return the last non-empty stdout line.
    async fn run(&self, script: &PathBuf, args: Vec<String>) -> Result<String, ClusterError> {
        debug!(script = %script.display(), ?args, "spawning clustering backend");
        let output = Command::new(&self.python)
            .arg(script)
            .args(&args)
            .output()
            .await?;

        if !output.status.success() {
            return Err(ClusterError::Backend {
                status: output.status.to_string(),
                stderr: String::from_utf8_lossy(&output.stderr).into_owned(),
            });
        }

        let stdout = String::from_utf8_lossy(&output.stdout);
        stdout
            .lines()
            .rev()
            .map(str::trim)
            .find(|line| !line.is_empty())
            .map(str::to_string)
            .ok_or(ClusterError::EmptyOutput)
    }
}

/// Parse `[clusters, probs]` or `[clusters, probs, [max, min]]`.
fn parse_cluster_line(line: &str, expected: usize) -> Result<ClusterOutcome, ClusterError> {
    let value: serde_json::Value = serde_json::from_str(line)?;
    let parts = value
        .as_array()
        .cloned()
        .ok_or_else(|| ClusterError::LengthMismatch {
            expected,
            returned: 0,
        })?;

    let clusters: Vec<i64> = serde_json::from_value(parts.first().cloned().unwrap_or_default())?;
    let probabilities: Vec<f64> =
        serde_json::from_value(parts.get(1).cloned().unwrap_or_default())?;
    if clusters.len() != expected {
        return Err(ClusterError::LengthMismatch {
            expected,
            returned: clusters.len(),
        });
    }

    let chosen = parts
        .get(2)
        .and_then(|pair| serde_json::from_value::<(f64, f64)>(pair.clone()).ok());

    Ok(ClusterOutcome {
        clusters: ClusterAssignment::from_arrays(&clusters, &probabilities),
        chosen,
    })
}

#[async_trait]
impl ClusterService for LinkageClusterService {
    async fn cluster(&self, request: &ClusterRequest) -> Result<ClusterOutcome, ClusterError> {
        let input = self
            .write_input(&request.texts, &request.labels, &request.purpose)
            .await?;

        let mut args = vec![
            input.display().to_string(),
            request.purpose.clone(),
            request.metric.clone(),
            request.linkage.clone(),
            request.max_threshold.to_string(),
            request.min_threshold.to_string(),
        ];
        if let Some(title) = &request.interactive_title {
            args.push(title.clone());
        }

        let line = self.run(&self.cluster_script, args).await?;
        parse_cluster_line(&line, request.texts.len())
    }

    async fn distances(
        &self,
        texts: &[String],
        labels: &[String],
        purpose: &str,
    ) -> Result<DistanceReport, ClusterError> {
        let input = self.write_input(texts, labels, purpose).await?;
        let args = vec![input.display().to_string(), purpose.to_string()];
        let line = self.run(&self.distance_script, args).await?;

        let raw: RawDistances = serde_json::from_str(&line)?;
        if raw.distances.len() != texts.len() {
            return Err(ClusterError::LengthMismatch {
                expected: texts.len(),
                returned: raw.distances.len(),
            });
        }
        Ok(DistanceReport {
            distances: raw.distances,
            positions: raw.positions,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_cluster_line() {
        let outcome = parse_cluster_line("[[0, 0, -1], [0.97, 0.97, 1.0]]", 3).unwrap();
        assert_eq!(outcome.clusters.cluster_count(), 1);
        assert!(outcome.chosen.is_none());
    }

    #[test]
    fn test_parse_cluster_line_with_picked_thresholds() {
        let outcome = parse_cluster_line("[[0, 0], [0.99, 0.99], [0.7, 0.45]]", 2).unwrap();
        assert_eq!(outcome.chosen, Some((0.7, 0.45)));
    }

    #[test]
    fn test_parse_cluster_line_length_mismatch() {
        let err = parse_cluster_line("[[0, 0], [0.99, 0.99]]", 3).unwrap_err();
        assert!(matches!(
            err,
            ClusterError::LengthMismatch {
                expected: 3,
                returned: 2
            }
        ));
    }
}
