//! Lease-based leader election for the run loop.
//!
//! Timing follows the usual controller semantics: attempts happen every
//! retry period, a single attempt may take at most the renew deadline, and
//! leadership is lost once no renewal has succeeded within the renew deadline.

use std::time::{Duration, Instant};

use kube::Client;
use kube_leader_election::{LeaseLock, LeaseLockParams};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// Leader election errors
#[derive(Debug, thiserror::Error)]
pub enum LeaderElectionError {
    /// Another holder took the lease
    #[error("leader election lost: lease {lease} is held by another instance")]
    Taken { lease: String },

    /// No successful renewal within the renew deadline
    #[error("leader election lost: lease {lease} not renewed within {deadline:?}")]
    RenewDeadlineExceeded { lease: String, deadline: Duration },
}

/// Lease timing and identity.
#[derive(Debug, Clone)]
pub struct LeaderElectionConfig {
    pub lease_name: String,
    pub namespace: String,
    pub identity: String,
    pub lease_duration: Duration,
    pub renew_deadline: Duration,
    pub retry_period: Duration,
}

/// Outcome of one acquire/renew attempt.
enum Attempt {
    Held,
    HeldByOther,
    Failed,
}

/// Leader elector backed by a coordination.k8s.io Lease.
pub struct LeaderElector {
    lock: LeaseLock,
    config: LeaderElectionConfig,
}

impl LeaderElector {
    pub fn new(client: Client, config: LeaderElectionConfig) -> Self {
        let lock = LeaseLock::new(
            client,
            &config.namespace,
            LeaseLockParams {
                holder_id: config.identity.clone(),
                lease_name: config.lease_name.clone(),
                lease_ttl: config.lease_duration,
            },
        );
        Self { lock, config }
    }

    async fn attempt(&self) -> Attempt {
        match tokio::time::timeout(self.config.renew_deadline, self.lock.try_acquire_or_renew())
            .await
        {
            Ok(Ok(result)) if result.acquired_lease => Attempt::Held,
            Ok(Ok(_)) => Attempt::HeldByOther,
            Ok(Err(e)) => {
                warn!(lease = %self.config.lease_name, error = %e, "Lease request failed");
                Attempt::Failed
            }
            Err(_) => {
                warn!(
                    lease = %self.config.lease_name,
                    deadline = ?self.config.renew_deadline,
                    "Lease request timed out"
                );
                Attempt::Failed
            }
        }
    }

    /// Block until this instance holds the lease.
    pub async fn acquire(&self) {
        info!(
            holder_id = %self.config.identity,
            namespace = %self.config.namespace,
            lease_name = %self.config.lease_name,
            "Waiting to acquire leadership..."
        );
        loop {
            match self.attempt().await {
                Attempt::Held => {
                    info!(holder_id = %self.config.identity, "Acquired leadership");
                    return;
                }
                Attempt::HeldByOther => info!("Another instance is leader, waiting..."),
                Attempt::Failed => {}
            }
            tokio::time::sleep(self.config.retry_period).await;
        }
    }

    /// Keep renewing the lease until `shutdown` fires or leadership is lost.
    pub async fn hold(&self, shutdown: &CancellationToken) -> Result<(), LeaderElectionError> {
        let mut last_renewal = Instant::now();
        loop {
            tokio::select! {
                _ = shutdown.cancelled() => return Ok(()),
                _ = tokio::time::sleep(self.config.retry_period) => {}
            }

            match self.attempt().await {
                Attempt::Held => {
                    debug!(lease = %self.config.lease_name, "Renewed lease");
                    last_renewal = Instant::now();
                }
                Attempt::HeldByOther => {
                    return Err(LeaderElectionError::Taken {
                        lease: self.config.lease_name.clone(),
                    });
                }
                Attempt::Failed => {
                    if last_renewal.elapsed() >= self.config.renew_deadline {
                        return Err(LeaderElectionError::RenewDeadlineExceeded {
                            lease: self.config.lease_name.clone(),
                            deadline: self.config.renew_deadline,
                        });
                    }
                }
            }
        }
    }

    /// Give up the lease so another replica can take over immediately.
    pub async fn release(&self) {
        match self.lock.step_down().await {
            Ok(()) => info!(lease = %self.config.lease_name, "Released leadership"),
            Err(e) => warn!(lease = %self.config.lease_name, error = %e, "Failed to release lease"),
        }
    }
}

/// Holder identity: `POD_NAME`, falling back to the host name.
pub fn holder_identity() -> String {
    std::env::var("POD_NAME").unwrap_or_else(|_| {
        warn!("POD_NAME not set, using hostname");
        hostname::get()
            .map(|h| h.to_string_lossy().to_string())
            .unwrap_or_else(|_| "unknown".to_string())
    })
}
