//! Shared context for the GitOpsCluster controller.

use std::sync::Arc;

use crate::client::ObjectClient;
use crate::cluster_registry::ClusterRegistryStatus;
use crate::health::HealthState;

/// Shared context for the controller
#[derive(Clone)]
pub struct Context {
    /// Uncached client; reads observe this controller's own writes
    pub client: Arc<dyn ObjectClient>,
    /// Set once the ManagedCluster API has been detected
    pub cluster_registry: ClusterRegistryStatus,
    /// Optional health state for metrics
    pub health_state: Option<Arc<HealthState>>,
}

impl Context {
    /// Create a new context
    pub fn new(
        client: Arc<dyn ObjectClient>,
        cluster_registry: ClusterRegistryStatus,
        health_state: Option<Arc<HealthState>>,
    ) -> Self {
        Self {
            client,
            cluster_registry,
            health_state,
        }
    }
}
