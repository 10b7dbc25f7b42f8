//! GitOpsCluster Custom Resource Definition.
//!
//! A GitOpsCluster binds the managed clusters selected by a Placement to an
//! Argo CD server, which consumes them as cluster secrets.

use kube::CustomResource;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

/// GitOpsCluster registers placement-selected managed clusters with Argo CD.
///
/// Example:
/// ```yaml
/// apiVersion: apps.open-cluster-management.io/v1beta1
/// kind: GitOpsCluster
/// metadata:
///   name: argo-clusters
///   namespace: openshift-gitops
/// spec:
///   argoServer:
///     cluster: local-cluster
///     argoNamespace: openshift-gitops
///   placementRef:
///     kind: Placement
///     apiVersion: cluster.open-cluster-management.io/v1beta1
///     name: all-openshift-clusters
/// ```
#[derive(CustomResource, Clone, Debug, Deserialize, Serialize, JsonSchema)]
#[kube(
    group = "apps.open-cluster-management.io",
    version = "v1beta1",
    kind = "GitOpsCluster",
    plural = "gitopsclusters",
    shortname = "gitopscluster",
    status = "GitOpsClusterStatus",
    namespaced,
    printcolumn = r#"{"name":"Phase", "type":"string", "jsonPath":".status.phase"}"#,
    printcolumn = r#"{"name":"Age", "type":"date", "jsonPath":".metadata.creationTimestamp"}"#
)]
#[serde(rename_all = "camelCase")]
pub struct GitOpsClusterSpec {
    /// Argo CD server receiving the cluster secrets.
    pub argo_server: ArgoServerSpec,

    /// Placement selecting the managed clusters to register.
    pub placement_ref: Option<PlacementRef>,

    /// Name of the ManagedServiceAccount whose token replaces the cluster
    /// import secret. Unset means the import secret is used.
    #[serde(default)]
    pub managed_service_account_ref: Option<String>,
}

/// Location of the Argo CD server.
#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct ArgoServerSpec {
    /// Cluster hosting Argo CD (normally `local-cluster`).
    #[serde(default)]
    pub cluster: String,

    /// Namespace Argo CD watches for cluster secrets.
    pub argo_namespace: String,
}

/// Reference to a Placement.
#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct PlacementRef {
    #[serde(default)]
    pub api_version: String,
    #[serde(default)]
    pub kind: String,
    pub name: String,
}

/// Observed state of a GitOpsCluster.
#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct GitOpsClusterStatus {
    /// Last time the status was written.
    #[serde(default)]
    pub last_update_time: Option<String>,

    /// `successful` or `failed`.
    #[serde(default)]
    pub phase: String,

    /// Human-readable detail for the phase.
    #[serde(default)]
    pub message: String,
}

impl GitOpsCluster {
    /// Namespace holding the Argo CD cluster secrets for this object.
    pub fn argo_namespace(&self) -> &str {
        &self.spec.argo_server.argo_namespace
    }
}
