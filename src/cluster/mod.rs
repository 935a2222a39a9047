// External clustering service boundary
//
// The numeric work (embedding, hierarchical clustering, distance matrices)
// is delegated to an external runtime; this module owns the contract and the
// subprocess-backed production implementation.

pub mod assignment;
pub mod linkage;
pub mod service;

pub use assignment::{ClusterAssignment, ClusterId, ClusterMember, UNCLUSTERED};
pub use linkage::LinkageClusterService;
pub use service::{ClusterError, ClusterOutcome, ClusterRequest, ClusterService, DistanceReport};
