//! Ordered startup sequence.
//!
//! Assemble the manager, register every API group, attach the controller,
//! bind cancellation to termination signals, launch the cluster-registry
//! prober and finally block in the run loop. Any failure before the run loop
//! aborts startup; nothing is retried here.

use std::future::Future;

use futures::FutureExt;
use futures::future::BoxFuture;
use tokio_util::sync::CancellationToken;
use tracing::info;

use crate::cluster_registry::{ClusterRegistryProber, detect_cluster_registry};
use crate::controller::{self, ControllerRegistrar, GitOpsClusterRegistrar};
use crate::environment::Environment;
use crate::manager::{Manager, ManagerConfig, ManagerError, Settings};
use crate::scheme::{SchemeError, SchemeGroup, default_groups, register_all};
use crate::signals::{self, shutdown_signal};

/// Fatal errors ending the process
#[derive(Debug, thiserror::Error)]
pub enum StartupError {
    #[error("unable to load Kubernetes configuration: {0}")]
    Config(#[from] kube::config::InferConfigError),

    #[error("unable to create manager: {0}")]
    Manager(#[source] ManagerError),

    #[error("unable to register API schemes: {0}")]
    SchemeRegistration(#[from] SchemeError),

    #[error("unable to register controllers: {0}")]
    ControllerRegistration(#[from] controller::error::Error),

    #[error("manager exited non-zero: {0}")]
    RunLoop(#[source] ManagerError),
}

impl StartupError {
    /// Process exit status for this failure.
    pub fn exit_code(&self) -> u8 {
        1
    }
}

/// The startup sequence with its collaborators.
///
/// [`Startup::new`] wires the production collaborators; the `with_*` methods
/// replace them.
pub struct Startup {
    kube_config: kube::Config,
    environment: Environment,
    settings: Settings,
    scheme_groups: Vec<Box<dyn SchemeGroup>>,
    registrar: Box<dyn ControllerRegistrar>,
    signal: BoxFuture<'static, ()>,
    identity: Option<String>,
}

impl Startup {
    pub fn new(kube_config: kube::Config, environment: Environment, settings: Settings) -> Self {
        Self {
            kube_config,
            environment,
            settings,
            scheme_groups: default_groups(),
            registrar: Box::new(GitOpsClusterRegistrar),
            signal: shutdown_signal().boxed(),
            identity: None,
        }
    }

    pub fn with_scheme_groups(mut self, groups: Vec<Box<dyn SchemeGroup>>) -> Self {
        self.scheme_groups = groups;
        self
    }

    pub fn with_registrar(mut self, registrar: Box<dyn ControllerRegistrar>) -> Self {
        self.registrar = registrar;
        self
    }

    /// Future whose completion requests shutdown, in place of SIGINT/SIGTERM.
    pub fn with_shutdown_signal<F>(mut self, signal: F) -> Self
    where
        F: Future<Output = ()> + Send + 'static,
    {
        self.signal = signal.boxed();
        self
    }

    /// Leader election holder identity, in place of `POD_NAME`.
    pub fn with_identity(mut self, identity: impl Into<String>) -> Self {
        self.identity = Some(identity.into());
        self
    }

    /// Run startup to completion, then block until shutdown.
    pub async fn run(self) -> Result<(), StartupError> {
        let Startup {
            kube_config,
            environment,
            settings,
            scheme_groups,
            registrar,
            signal,
            identity,
        } = self;

        let config = ManagerConfig::assemble(environment, &settings)
            .map_err(|e| StartupError::Manager(e.into()))?;
        let mut manager = Manager::new(kube_config, config)
            .await
            .map_err(StartupError::Manager)?;
        if let Some(identity) = identity {
            manager.set_identity(identity);
        }

        let groups = register_all(manager.scheme(), &scheme_groups)?;
        info!(
            groups,
            kinds = manager.scheme().known_kinds().len(),
            "API schemes registered"
        );

        registrar.add_to_manager(&mut manager)?;
        info!(runnables = ?manager.runnable_names(), "Controllers registered");

        let shutdown = CancellationToken::new();
        signals::cancel_on(shutdown.clone(), signal);

        let prober = ClusterRegistryProber::new(manager.api_reader(), manager.cluster_registry())
            .with_health_state(manager.health_state());
        detect_cluster_registry(shutdown.clone(), prober);

        info!(environment = %environment, "Starting manager");
        manager.start(shutdown).await.map_err(StartupError::RunLoop)
    }
}

/// Production entry: detect the environment, load credentials and run.
pub async fn run_manager(settings: Settings) -> Result<(), StartupError> {
    let environment = Environment::detect();
    let kube_config = kube::Config::infer().await?;
    Startup::new(kube_config, environment, settings).run().await
}
