//! Detection of the ManagedCluster (cluster registry) API.
//!
//! The prober runs in the background next to the run loop and never blocks
//! startup. It lists ManagedClusters through the uncached reader until one
//! list succeeds or shutdown is requested. Its only side effect is setting
//! [`ClusterRegistryStatus`], which is safe to repeat if the task is
//! interrupted and restarted.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use crate::client::ObjectClient;
use crate::health::HealthState;
use crate::scheme::managed_cluster_gvk;

/// Delay between detection attempts
pub const PROBE_INTERVAL: Duration = Duration::from_secs(10);

/// Shared flag recording whether the cluster registry API was found.
#[derive(Debug, Clone, Default)]
pub struct ClusterRegistryStatus(Arc<AtomicBool>);

impl ClusterRegistryStatus {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_available(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }

    /// Returns true if this call flipped the flag.
    fn mark_available(&self) -> bool {
        !self.0.swap(true, Ordering::SeqCst)
    }
}

/// Background detection loop for the cluster registry API.
pub struct ClusterRegistryProber {
    reader: Arc<dyn ObjectClient>,
    status: ClusterRegistryStatus,
    interval: Duration,
    health_state: Option<Arc<HealthState>>,
}

impl ClusterRegistryProber {
    pub fn new(reader: Arc<dyn ObjectClient>, status: ClusterRegistryStatus) -> Self {
        Self {
            reader,
            status,
            interval: PROBE_INTERVAL,
            health_state: None,
        }
    }

    pub fn with_interval(mut self, interval: Duration) -> Self {
        self.interval = interval;
        self
    }

    pub fn with_health_state(mut self, health_state: Arc<HealthState>) -> Self {
        self.health_state = Some(health_state);
        self
    }

    /// One detection attempt.
    pub async fn probe_once(&self) -> bool {
        match self.reader.list(&managed_cluster_gvk(), None).await {
            Ok(clusters) => {
                if self.status.mark_available() {
                    info!(
                        managed_clusters = clusters.len(),
                        "Cluster registry API detected"
                    );
                }
                if let Some(ref state) = self.health_state {
                    state.metrics.set_cluster_registry_available(true);
                }
                true
            }
            Err(e) => {
                debug!(error = %e, "Cluster registry API not available yet");
                false
            }
        }
    }

    /// Retry until detection succeeds or `shutdown` fires.
    pub async fn run(self, shutdown: CancellationToken) {
        loop {
            if shutdown.is_cancelled() {
                debug!("Cluster registry detection cancelled");
                return;
            }
            if self.probe_once().await {
                return;
            }
            tokio::select! {
                _ = shutdown.cancelled() => {
                    debug!("Cluster registry detection cancelled");
                    return;
                }
                _ = tokio::time::sleep(self.interval) => {}
            }
        }
    }

    /// Launch [`Self::run`] as a detached task.
    pub fn spawn(self, shutdown: CancellationToken) -> JoinHandle<()> {
        tokio::spawn(self.run(shutdown))
    }
}

/// Start detection in the background and return immediately.
pub fn detect_cluster_registry(
    shutdown: CancellationToken,
    prober: ClusterRegistryProber,
) -> JoinHandle<()> {
    info!("Detecting ACM cluster API service...");
    prober.spawn(shutdown)
}
