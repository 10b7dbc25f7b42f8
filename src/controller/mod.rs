//! Controller registration for GitOpsCluster.
//!
//! The registrar attaches the GitOpsCluster controller to a [`Manager`]. The
//! controller watches GitOpsCluster objects and the Argo CD cluster secrets,
//! with the secret watch narrowed by the manager's cache selectors.

pub mod context;
pub mod error;
pub mod reconciler;

use std::sync::Arc;

use async_trait::async_trait;
use futures::StreamExt;
use k8s_openapi::api::core::v1::Secret;
use kube::core::{GroupVersionKind, Selector, SelectorExt};
use kube::runtime::reflector::{ObjectRef, Store};
use kube::runtime::watcher::Config as WatcherConfig;
use kube::runtime::Controller;
use kube::{Api, Client, Resource, ResourceExt};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info};

#[cfg(test)]
use mockall::automock;

use crate::crd::GitOpsCluster;
use crate::manager::{Manager, Runnable, RunnableError};
use crate::selectors::secret_gvk;
use context::Context;
use error::Error;

/// GroupVersionKind of GitOpsCluster.
pub fn gitops_cluster_gvk() -> GroupVersionKind {
    GroupVersionKind::gvk(
        &GitOpsCluster::group(&()),
        &GitOpsCluster::version(&()),
        &GitOpsCluster::kind(&()),
    )
}

/// Attaches controllers to the manager.
#[cfg_attr(test, automock)]
pub trait ControllerRegistrar: Send + Sync {
    fn add_to_manager(&self, manager: &mut Manager) -> Result<(), Error>;
}

/// Registers the GitOpsCluster controller.
#[derive(Debug, Clone, Copy, Default)]
pub struct GitOpsClusterRegistrar;

impl ControllerRegistrar for GitOpsClusterRegistrar {
    fn add_to_manager(&self, manager: &mut Manager) -> Result<(), Error> {
        add_gitops_cluster_to_manager(manager)
    }
}

/// Attach the GitOpsCluster controller to `manager`.
///
/// The GitOpsCluster and Secret kinds must already be in the manager's scheme.
pub fn add_gitops_cluster_to_manager(manager: &mut Manager) -> Result<(), Error> {
    for gvk in [gitops_cluster_gvk(), secret_gvk()] {
        if !manager.scheme().recognizes(&gvk) {
            return Err(Error::Registration(format!(
                "{}/{} {} is not registered in the scheme",
                gvk.group, gvk.version, gvk.kind
            )));
        }
    }

    let ctx = Arc::new(Context::new(
        manager.client(),
        manager.cluster_registry(),
        Some(manager.health_state()),
    ));
    let controller = GitOpsClusterController {
        client: manager.kube_client(),
        secrets_config: manager.cache().watcher_config_for::<Secret>(),
        secret_selector: manager.cache().selectors().get(&secret_gvk()).cloned(),
        ctx,
    };
    manager.add(Box::new(controller));
    info!("Registered GitOpsCluster controller");
    Ok(())
}

/// GitOpsCluster controller runnable
struct GitOpsClusterController {
    client: Client,
    secrets_config: WatcherConfig,
    secret_selector: Option<Selector>,
    ctx: Arc<Context>,
}

#[async_trait]
impl Runnable for GitOpsClusterController {
    fn name(&self) -> &str {
        "gitopscluster-controller"
    }

    async fn start(self: Box<Self>, shutdown: CancellationToken) -> Result<(), RunnableError> {
        let GitOpsClusterController {
            client,
            secrets_config,
            secret_selector,
            ctx,
        } = *self;

        info!("Starting controller for GitOpsCluster resources");

        let clusters: Api<GitOpsCluster> = Api::all(client.clone());
        let secrets: Api<Secret> = Api::all(client);

        let controller = Controller::new(clusters, WatcherConfig::default().any_semantic());
        let store = controller.store();

        controller
            .watches(secrets, secrets_config, move |secret: Secret| {
                clusters_for_secret(&store, secret_selector.as_ref(), &secret)
            })
            .graceful_shutdown_on(shutdown.cancelled_owned())
            .run(reconciler::reconcile, reconciler::error_policy, ctx)
            .for_each(|result| async move {
                match result {
                    Ok((obj, _action)) => {
                        debug!("Reconciled: {}", obj.name);
                    }
                    Err(e) => {
                        let is_not_found = match &e {
                            kube::runtime::controller::Error::ObjectNotFound(_) => true,
                            kube::runtime::controller::Error::ReconcilerFailed(err, _) => {
                                err.is_not_found()
                            }
                            _ => false,
                        };
                        if is_not_found {
                            debug!("Object no longer exists (likely deleted): {:?}", e);
                        } else {
                            error!("Reconciliation error: {:?}", e);
                        }
                    }
                }
            })
            .await;

        info!("GitOpsCluster controller stopped");
        Ok(())
    }
}

/// GitOpsClusters to reconcile when a cluster secret changes.
///
/// A secret concerns every GitOpsCluster whose Argo CD namespace holds it.
fn clusters_for_secret(
    store: &Store<GitOpsCluster>,
    selector: Option<&Selector>,
    secret: &Secret,
) -> Vec<ObjectRef<GitOpsCluster>> {
    let clusters = store.state();
    match_clusters(&clusters, selector, secret)
}

fn match_clusters(
    clusters: &[Arc<GitOpsCluster>],
    selector: Option<&Selector>,
    secret: &Secret,
) -> Vec<ObjectRef<GitOpsCluster>> {
    if let Some(selector) = selector
        && !selector.matches(secret.labels())
    {
        return Vec::new();
    }
    let Some(namespace) = secret.namespace() else {
        return Vec::new();
    };
    clusters
        .iter()
        .filter(|cluster| cluster.argo_namespace() == namespace)
        .map(|cluster| ObjectRef::from_obj(cluster.as_ref()))
        .collect()
}
