//! Detection of where the process is running.
//!
//! Leader election needs the Lease store that is only reachable from inside
//! the cluster, so the result of this check decides whether election is on.

use tracing::{debug, info};

/// Where the operator process is running relative to the cluster it manages.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Environment {
    /// In-cluster service-account configuration was found.
    InCluster,
    /// No in-cluster configuration; e.g. a developer running against a kubeconfig.
    External,
}

impl Environment {
    /// Probe the local service-account mount and environment.
    ///
    /// A failure to load the in-cluster configuration is not an error: it
    /// classifies the process as external. This cannot tell a process that is
    /// genuinely outside the cluster from one inside a pod with a broken
    /// service-account mount.
    pub fn detect() -> Self {
        let env = Self::from_incluster_result(kube::Config::incluster());
        match env {
            Environment::InCluster => info!("LeaderElection enabled as running in a cluster"),
            Environment::External => info!("LeaderElection disabled as not running in a cluster"),
        }
        env
    }

    /// Classify the outcome of an in-cluster configuration load.
    pub fn from_incluster_result<T, E: std::fmt::Display>(result: Result<T, E>) -> Self {
        match result {
            Ok(_) => Environment::InCluster,
            Err(e) => {
                debug!(error = %e, "In-cluster configuration unavailable");
                Environment::External
            }
        }
    }

    /// Whether leader election should run in this environment.
    pub fn leader_election_enabled(self) -> bool {
        matches!(self, Environment::InCluster)
    }
}

impl std::fmt::Display for Environment {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Environment::InCluster => write!(f, "in-cluster"),
            Environment::External => write!(f, "external"),
        }
    }
}
