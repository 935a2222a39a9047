// Cluster assignment produced by the external clustering service

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

pub type ClusterId = i64;

/// Cluster id for items the service left as singletons.
pub const UNCLUSTERED: ClusterId = -1;

/// One item's membership in a cluster.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ClusterMember {
    /// Index into the item list handed to the service.
    pub index: usize,
    /// Membership confidence in `[0, 1]`; 1.0 for unclustered items.
    pub probability: f64,
}

/// Grouping returned by the clustering service, keyed by cluster id.
/// Used immediately after a service call and discarded.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ClusterAssignment {
    groups: BTreeMap<ClusterId, Vec<ClusterMember>>,
}

impl ClusterAssignment {
    pub fn new() -> Self {
        Self::default()
    }

    /// Build from the two parallel arrays the clustering script prints:
    /// a cluster id and a membership probability per item.
    pub fn from_arrays(clusters: &[ClusterId], probabilities: &[f64]) -> Self {
        let mut groups: BTreeMap<ClusterId, Vec<ClusterMember>> = BTreeMap::new();
        for (index, &cluster) in clusters.iter().enumerate() {
            let probability = probabilities.get(index).copied().unwrap_or(1.0);
            groups
                .entry(cluster)
                .or_default()
                .push(ClusterMember { index, probability });
        }
        Self { groups }
    }

    pub fn push(&mut self, cluster: ClusterId, member: ClusterMember) {
        self.groups.entry(cluster).or_default().push(member);
    }

    pub fn groups(&self) -> impl Iterator<Item = (ClusterId, &[ClusterMember])> + '_ {
        self.groups.iter().map(|(id, members)| (*id, members.as_slice()))
    }

    pub fn group(&self, cluster: ClusterId) -> Option<&[ClusterMember]> {
        self.groups.get(&cluster).map(|members| members.as_slice())
    }

    /// Number of proper clusters (excluding the unclustered bucket).
    pub fn cluster_count(&self) -> usize {
        self.groups.keys().filter(|id| **id != UNCLUSTERED).count()
    }

    pub fn is_empty(&self) -> bool {
        self.groups.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_from_arrays_groups_by_cluster() {
        let assignment = ClusterAssignment::from_arrays(&[0, -1, 0, 1], &[0.97, 1.0, 0.96, 0.99]);
        assert_eq!(assignment.cluster_count(), 2);
        let zero = assignment.group(0).unwrap();
        assert_eq!(zero.len(), 2);
        assert_eq!(zero[0].index, 0);
        assert_eq!(zero[1].index, 2);
        let unclustered = assignment.group(UNCLUSTERED).unwrap();
        assert_eq!(unclustered[0].probability, 1.0);
    }

    #[test]
    fn test_missing_probability_defaults_to_one() {
        let assignment = ClusterAssignment::from_arrays(&[0, 0], &[0.9]);
        let zero = assignment.group(0).unwrap();
        assert_eq!(zero[1].probability, 1.0);
    }
}
