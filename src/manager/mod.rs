//! The process-wide controller manager.
//!
//! [`Manager::new`] turns a [`ManagerConfig`] into live handles: the API
//! client, the scheme, the filtered watch cache, the client handed to
//! controllers and an uncached reader. [`Manager::start`] is the run loop: it
//! serves probes and metrics, waits for leadership when election is on, runs
//! every registered [`Runnable`] and returns once shutdown is requested.

pub mod config;
pub mod leader;
pub mod runnable;

pub use config::{LEADER_ELECTION_ID, LEADER_ELECTION_NAMESPACE, ManagerConfig, Settings};
pub use leader::{LeaderElectionConfig, LeaderElectionError, LeaderElector};
pub use runnable::{Runnable, RunnableError};

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use kube::Client;
use tokio::net::{TcpListener, lookup_host};
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::cache::WatchCache;
use crate::client::{ClientError, ClientOptions, DirectClient, ObjectClient};
use crate::cluster_registry::ClusterRegistryStatus;
use crate::health::{self, HealthState};
use crate::scheme::Scheme;
use crate::selectors::DuplicateSelector;

/// Grace period for runnables to stop after shutdown is requested
const SHUTDOWN_GRACE_PERIOD_SECS: u64 = 5;

/// Errors from building or running the manager
#[derive(Debug, thiserror::Error)]
pub enum ManagerError {
    /// The API client could not be built from the configuration
    #[error("failed to create Kubernetes client: {0}")]
    Client(#[from] kube::Error),

    /// The client factory failed
    #[error("failed to create manager client: {0}")]
    ClientFactory(#[from] ClientError),

    /// A bind address is malformed or does not resolve
    #[error("invalid bind address {address}: {source}")]
    InvalidBindAddress {
        address: String,
        #[source]
        source: std::io::Error,
    },

    /// The cache selector mapping is inconsistent
    #[error("invalid cache selectors: {0}")]
    Selectors(#[from] DuplicateSelector),

    /// Lease timings are inconsistent
    #[error("invalid leader election settings: {0}")]
    InvalidLeaderElection(String),

    /// A listener could not be bound
    #[error("failed to bind {address}: {source}")]
    Bind {
        address: SocketAddr,
        #[source]
        source: std::io::Error,
    },

    /// Leadership lost while running
    #[error(transparent)]
    LeaderElection(#[from] LeaderElectionError),

    /// A runnable returned an error
    #[error("runnable {name} failed: {message}")]
    Runnable { name: String, message: String },

    /// A runnable panicked
    #[error("runnable task failed: {0}")]
    RunnableJoin(String),
}

/// Control-plane handle shared by controllers.
pub struct Manager {
    config: ManagerConfig,
    kube_client: Client,
    scheme: Arc<Scheme>,
    cache: Arc<WatchCache>,
    client: Arc<dyn ObjectClient>,
    api_reader: Arc<dyn ObjectClient>,
    health_state: Arc<HealthState>,
    cluster_registry: ClusterRegistryStatus,
    metrics_addr: SocketAddr,
    health_addr: SocketAddr,
    identity: String,
    runnables: Vec<Box<dyn Runnable>>,
}

/// Resolve a `host:port` bind address. Host names are looked up once, here.
async fn resolve_bind_address(address: &str) -> Result<SocketAddr, ManagerError> {
    let invalid = |source| ManagerError::InvalidBindAddress {
        address: address.to_string(),
        source,
    };
    let mut resolved = lookup_host(address).await.map_err(invalid)?;
    resolved.next().ok_or_else(|| {
        invalid(std::io::Error::new(
            std::io::ErrorKind::AddrNotAvailable,
            "host resolved to no addresses",
        ))
    })
}

fn validate_leader_election(config: &ManagerConfig) -> Result<(), ManagerError> {
    if !config.leader_election {
        return Ok(());
    }
    if config.retry_period.is_zero() {
        return Err(ManagerError::InvalidLeaderElection(
            "retry period must be greater than zero".to_string(),
        ));
    }
    if config.renew_deadline >= config.lease_duration {
        return Err(ManagerError::InvalidLeaderElection(format!(
            "renew deadline {:?} must be shorter than lease duration {:?}",
            config.renew_deadline, config.lease_duration
        )));
    }
    if config.retry_period >= config.renew_deadline {
        return Err(ManagerError::InvalidLeaderElection(format!(
            "retry period {:?} must be shorter than renew deadline {:?}",
            config.retry_period, config.renew_deadline
        )));
    }
    Ok(())
}

impl Manager {
    /// Build a manager. Fails on invalid configuration; nothing is retried.
    pub async fn new(
        kube_config: kube::Config,
        config: ManagerConfig,
    ) -> Result<Self, ManagerError> {
        let metrics_addr = resolve_bind_address(&config.metrics_bind_address).await?;
        let health_addr = resolve_bind_address(&config.health_bind_address).await?;
        validate_leader_election(&config)?;

        let kube_client = Client::try_from(kube_config.clone())?;
        let scheme = Arc::new(Scheme::new());
        let cache = Arc::new(config.new_cache.build(kube_client.clone(), scheme.clone()));
        let client = config.new_client.new_client(
            &cache,
            &kube_config,
            ClientOptions {
                scheme: scheme.clone(),
            },
            &[],
        )?;
        let api_reader: Arc<dyn ObjectClient> =
            Arc::new(DirectClient::new(kube_client.clone(), scheme.clone()));

        debug!(config = ?config, "Manager configured");

        Ok(Self {
            config,
            kube_client,
            scheme,
            cache,
            client,
            api_reader,
            health_state: Arc::new(HealthState::new()),
            cluster_registry: ClusterRegistryStatus::new(),
            metrics_addr,
            health_addr,
            identity: leader::holder_identity(),
            runnables: Vec::new(),
        })
    }

    /// Shared type registry
    pub fn scheme(&self) -> &Arc<Scheme> {
        &self.scheme
    }

    /// Client for controllers (uncached for this operator)
    pub fn client(&self) -> Arc<dyn ObjectClient> {
        self.client.clone()
    }

    /// Reader that always goes to the API server
    pub fn api_reader(&self) -> Arc<dyn ObjectClient> {
        self.api_reader.clone()
    }

    pub fn cache(&self) -> &Arc<WatchCache> {
        &self.cache
    }

    /// Raw Kubernetes client, for kube-runtime controllers
    pub fn kube_client(&self) -> Client {
        self.kube_client.clone()
    }

    pub fn health_state(&self) -> Arc<HealthState> {
        self.health_state.clone()
    }

    /// Availability of the cluster registry API, set by the prober
    pub fn cluster_registry(&self) -> ClusterRegistryStatus {
        self.cluster_registry.clone()
    }

    /// Override the leader election holder identity.
    pub fn set_identity(&mut self, identity: impl Into<String>) {
        self.identity = identity.into();
    }

    /// Register a runnable to start once the manager leads.
    pub fn add(&mut self, runnable: Box<dyn Runnable>) {
        info!(runnable = %runnable.name(), "Registered runnable");
        self.runnables.push(runnable);
    }

    pub fn runnable_names(&self) -> Vec<String> {
        self.runnables.iter().map(|r| r.name().to_string()).collect()
    }

    /// Run until `shutdown` fires.
    ///
    /// Returns `Ok` only for a shutdown-triggered exit. Lost leadership, a
    /// failing runnable or an unbindable address is an error.
    pub async fn start(self, shutdown: CancellationToken) -> Result<(), ManagerError> {
        let Manager {
            config,
            kube_client,
            cache,
            health_state,
            metrics_addr,
            health_addr,
            identity,
            runnables,
            ..
        } = self;

        let metrics_listener = bind(metrics_addr).await?;
        let health_listener = bind(health_addr).await?;
        let servers = CancellationToken::new();
        spawn_server(
            "metrics",
            metrics_listener,
            health::metrics_router(health_state.clone()),
            servers.clone(),
        );
        spawn_server(
            "health",
            health_listener,
            health::probe_router(health_state.clone()),
            servers.clone(),
        );

        let elector = config.leader_election.then(|| {
            LeaderElector::new(
                kube_client,
                LeaderElectionConfig {
                    lease_name: config.leader_election_id.clone(),
                    namespace: config.leader_election_namespace.clone(),
                    identity,
                    lease_duration: config.lease_duration,
                    renew_deadline: config.renew_deadline,
                    retry_period: config.retry_period,
                },
            )
        });

        let result = run_as_leader(elector.as_ref(), runnables, &health_state, &shutdown).await;

        health_state.set_ready(false).await;
        health_state.metrics.set_leader(false);
        if let (Some(elector), Ok(())) = (elector.as_ref(), result.as_ref()) {
            elector.release().await;
        }
        cache.stop();
        servers.cancel();

        match &result {
            Ok(()) => info!("Manager stopped"),
            Err(e) => error!(error = %e, "Manager exited non-zero"),
        }
        result
    }
}

async fn bind(address: SocketAddr) -> Result<TcpListener, ManagerError> {
    let listener = TcpListener::bind(address)
        .await
        .map_err(|source| ManagerError::Bind { address, source })?;
    if let Ok(local) = listener.local_addr() {
        info!(address = %local, "Listening");
    }
    Ok(listener)
}

fn spawn_server(
    name: &'static str,
    listener: TcpListener,
    router: axum::Router,
    shutdown: CancellationToken,
) {
    tokio::spawn(async move {
        if let Err(e) = health::serve(listener, router, shutdown).await {
            error!(server = name, "Server error: {}", e);
        }
    });
}

async fn hold_leadership(
    elector: Option<&LeaderElector>,
    shutdown: &CancellationToken,
) -> Result<(), ManagerError> {
    match elector {
        Some(elector) => Ok(elector.hold(shutdown).await?),
        None => std::future::pending().await,
    }
}

async fn run_as_leader(
    elector: Option<&LeaderElector>,
    runnables: Vec<Box<dyn Runnable>>,
    health_state: &Arc<HealthState>,
    shutdown: &CancellationToken,
) -> Result<(), ManagerError> {
    if let Some(elector) = elector {
        tokio::select! {
            _ = elector.acquire() => {}
            _ = shutdown.cancelled() => {
                info!("Shutdown requested before leadership was acquired");
                return Ok(());
            }
        }
    }
    health_state.metrics.set_leader(true);

    let stop_runnables = shutdown.child_token();
    let mut tasks = JoinSet::new();
    for runnable in runnables {
        let name = runnable.name().to_string();
        let token = stop_runnables.clone();
        info!(runnable = %name, "Starting runnable");
        tasks.spawn(async move { (name, runnable.start(token).await) });
    }
    health_state.set_ready(true).await;

    let leadership = hold_leadership(elector, shutdown);
    tokio::pin!(leadership);

    let result = loop {
        tokio::select! {
            _ = shutdown.cancelled() => break Ok(()),
            lost = &mut leadership => break lost,
            Some(joined) = tasks.join_next() => match joined {
                Ok((name, Ok(()))) => debug!(runnable = %name, "Runnable finished"),
                Ok((name, Err(e))) => {
                    break Err(ManagerError::Runnable {
                        name,
                        message: e.to_string(),
                    })
                }
                Err(e) => break Err(ManagerError::RunnableJoin(e.to_string())),
            },
        }
    };

    health_state.set_ready(false).await;
    stop_runnables.cancel();
    let grace = Duration::from_secs(SHUTDOWN_GRACE_PERIOD_SECS);
    info!("Waiting {}s for runnables to stop...", SHUTDOWN_GRACE_PERIOD_SECS);
    let drain = async { while tasks.join_next().await.is_some() {} };
    if tokio::time::timeout(grace, drain).await.is_err() {
        warn!("Runnables did not stop within the grace period, aborting");
        tasks.abort_all();
    }

    result
}
