//! Immutable manager configuration.

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use tracing::info;

use crate::cache::FilteredCacheBuilder;
use crate::client::{ClientFactory, NonCachingClientFactory};
use crate::environment::Environment;
use crate::selectors::{DuplicateSelector, managed_cluster_secret_selectors};

/// Lease name used for leader election
pub const LEADER_ELECTION_ID: &str =
    "multicloud-operators-gitopscluster-leader.open-cluster-management.io";

/// Namespace holding the leader election lease
pub const LEADER_ELECTION_NAMESPACE: &str = "kube-system";

pub const DEFAULT_METRICS_HOST: &str = "0.0.0.0";
pub const DEFAULT_METRICS_PORT: u16 = 8388;
pub const DEFAULT_OPERATOR_METRICS_PORT: u16 = 8688;

pub const DEFAULT_LEASE_DURATION: Duration = Duration::from_secs(137);
pub const DEFAULT_RENEW_DEADLINE: Duration = Duration::from_secs(107);
pub const DEFAULT_RETRY_PERIOD: Duration = Duration::from_secs(26);

/// Values resolved outside the manager (command line, environment).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Settings {
    pub metrics_host: String,
    pub metrics_port: u16,
    pub operator_metrics_port: u16,
    pub lease_duration: Duration,
    pub renew_deadline: Duration,
    pub retry_period: Duration,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            metrics_host: DEFAULT_METRICS_HOST.to_string(),
            metrics_port: DEFAULT_METRICS_PORT,
            operator_metrics_port: DEFAULT_OPERATOR_METRICS_PORT,
            lease_duration: DEFAULT_LEASE_DURATION,
            renew_deadline: DEFAULT_RENEW_DEADLINE,
            retry_period: DEFAULT_RETRY_PERIOD,
        }
    }
}

/// Everything needed to build a [`super::Manager`].
///
/// Built once at startup and never changed afterwards.
#[derive(Clone)]
pub struct ManagerConfig {
    /// `host:port` serving `/metrics`
    pub metrics_bind_address: String,
    /// `host:port` serving `/healthz` and `/readyz`
    pub health_bind_address: String,
    pub leader_election: bool,
    pub leader_election_id: String,
    pub leader_election_namespace: String,
    pub lease_duration: Duration,
    pub renew_deadline: Duration,
    pub retry_period: Duration,
    /// Builds the watch cache, narrowed by its selector mapping
    pub new_cache: FilteredCacheBuilder,
    /// Builds the client handed to controllers
    pub new_client: Arc<dyn ClientFactory>,
}

impl ManagerConfig {
    /// Assemble the operator's configuration.
    ///
    /// Leader election follows the environment and the lease identity is
    /// fixed. The cache only filters cluster secrets and the client bypasses
    /// it. Fails if the selector mapping names a kind twice.
    pub fn assemble(
        environment: Environment,
        settings: &Settings,
    ) -> Result<Self, DuplicateSelector> {
        info!(
            lease_duration = ?settings.lease_duration,
            renew_deadline = ?settings.renew_deadline,
            retry_period = ?settings.retry_period,
            "Leader election settings"
        );

        Ok(Self {
            metrics_bind_address: format!("{}:{}", settings.metrics_host, settings.metrics_port),
            health_bind_address: format!(
                "{}:{}",
                settings.metrics_host, settings.operator_metrics_port
            ),
            leader_election: environment.leader_election_enabled(),
            leader_election_id: LEADER_ELECTION_ID.to_string(),
            leader_election_namespace: LEADER_ELECTION_NAMESPACE.to_string(),
            lease_duration: settings.lease_duration,
            renew_deadline: settings.renew_deadline,
            retry_period: settings.retry_period,
            new_cache: FilteredCacheBuilder::new(managed_cluster_secret_selectors()?),
            new_client: Arc::new(NonCachingClientFactory),
        })
    }
}

impl fmt::Debug for ManagerConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ManagerConfig")
            .field("metrics_bind_address", &self.metrics_bind_address)
            .field("health_bind_address", &self.health_bind_address)
            .field("leader_election", &self.leader_election)
            .field("leader_election_id", &self.leader_election_id)
            .field("leader_election_namespace", &self.leader_election_namespace)
            .field("lease_duration", &self.lease_duration)
            .field("renew_deadline", &self.renew_deadline)
            .field("retry_period", &self.retry_period)
            .field("new_cache", &self.new_cache)
            .field("new_client", &self.new_client.name())
            .finish()
    }
}
