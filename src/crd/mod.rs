//! Custom Resource Definitions for the GitOpsCluster operator.
//!
//! - `GitOpsCluster`: register placement-selected clusters with Argo CD

mod gitops_cluster;

pub use gitops_cluster::*;
