//! Reconciliation entry points for GitOpsCluster.
//!
//! The Argo CD synchronisation itself lives outside this crate. The reconciler
//! here re-reads the object through the uncached client, checks that the spec
//! is usable and that the cluster registry is reachable, and schedules the next
//! pass.

use std::sync::Arc;
use std::sync::atomic::Ordering;
use std::time::{Duration, Instant};

use kube::ResourceExt;
use kube::runtime::controller::Action;
use tracing::{debug, error, warn};

use crate::client::ObjectKey;
use crate::controller::{context::Context, error::Error, gitops_cluster_gvk};
use crate::crd::GitOpsCluster;

/// Periodic resync for healthy objects
pub const RESYNC_PERIOD: Duration = Duration::from_secs(180);

/// Retry delay while the ManagedCluster API is missing
pub const REGISTRY_WAIT: Duration = Duration::from_secs(30);

/// Reconcile a GitOpsCluster
pub async fn reconcile(obj: Arc<GitOpsCluster>, ctx: Arc<Context>) -> Result<Action, Error> {
    let start_time = Instant::now();
    let name = obj.name_any();
    let namespace = obj.namespace().unwrap_or_else(|| "default".to_string());

    debug!(name = %name, namespace = %namespace, "Reconciling GitOpsCluster");

    // The watch event can be older than our last status write.
    let key = ObjectKey::namespaced(gitops_cluster_gvk(), &namespace, &name);
    let current: GitOpsCluster = match ctx.client.get(&key).await {
        Ok(current) => serde_json::from_value(serde_json::to_value(current)?)?,
        Err(e) if e.is_not_found() => {
            debug!(name = %name, "GitOpsCluster no longer exists");
            return Ok(Action::await_change());
        }
        Err(e) => return Err(e.into()),
    };

    if current.metadata.deletion_timestamp.is_some() {
        debug!(name = %name, "GitOpsCluster is being deleted");
        return Ok(Action::await_change());
    }

    validate_spec(&current)?;

    if !ctx.cluster_registry.is_available() {
        debug!(name = %name, "Cluster registry API not detected yet, requeueing");
        return Ok(Action::requeue(REGISTRY_WAIT));
    }

    if let Some(ref health_state) = ctx.health_state {
        health_state.metrics.record_reconcile(
            &namespace,
            &name,
            start_time.elapsed().as_secs_f64(),
        );
        health_state.last_reconcile.store(
            jiff::Timestamp::now().as_second().max(0) as u64,
            Ordering::Relaxed,
        );
    }

    Ok(Action::requeue(RESYNC_PERIOD))
}

/// Error policy for the controller
pub fn error_policy(obj: Arc<GitOpsCluster>, error: &Error, ctx: Arc<Context>) -> Action {
    let name = obj.name_any();
    let namespace = obj.namespace().unwrap_or_else(|| "default".to_string());

    if let Some(ref health_state) = ctx.health_state {
        health_state.metrics.record_error(&namespace, &name);
    }

    if error.is_not_found() {
        debug!(name = %name, "Resource not found (likely deleted)");
        return Action::await_change();
    }

    if error.is_retryable() {
        warn!(name = %name, error = %error, "Retryable error, will retry");
    } else {
        error!(name = %name, error = %error, "Non-retryable error");
    }
    Action::requeue(error.requeue_after())
}

/// Validate the resource spec
fn validate_spec(obj: &GitOpsCluster) -> Result<(), Error> {
    if obj.argo_namespace().trim().is_empty() {
        return Err(Error::Validation(
            "spec.argoServer.argoNamespace is required".to_string(),
        ));
    }
    match &obj.spec.placement_ref {
        Some(placement) if !placement.name.trim().is_empty() => Ok(()),
        _ => Err(Error::Validation(
            "spec.placementRef.name is required".to_string(),
        )),
    }
}
