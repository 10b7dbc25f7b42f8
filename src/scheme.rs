//! Shared type registry for every API kind the operator (de)serializes.
//!
//! The registry maps a GroupVersionKind to the descriptor needed to address it
//! on the API server (plural, scope). The manager owns one [`Scheme`]; each API
//! group contributes its kinds through a [`SchemeGroup`]. All groups must
//! register before the manager runs.

use std::collections::HashMap;

use k8s_openapi::api::core::v1::{ConfigMap, Namespace, Secret, Service, ServiceAccount};
use kube::core::{ApiResource, GroupVersion, GroupVersionKind};
use parking_lot::RwLock;
use tracing::{debug, info};

#[cfg(test)]
use mockall::automock;

use crate::crd::GitOpsCluster;

/// Errors raised while populating the scheme.
#[derive(Debug, thiserror::Error)]
pub enum SchemeError {
    /// Same kind registered twice with different descriptors
    #[error("kind {kind} in {api_version} is already registered with a different descriptor")]
    Conflict { api_version: String, kind: String },

    /// A group failed to add its kinds
    #[error("failed to register {api_version}: {reason}")]
    Registration { api_version: String, reason: String },
}

/// Whether objects of a kind live in a namespace.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Scope {
    Namespaced,
    Cluster,
}

/// How to address a registered kind.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TypeDescriptor {
    pub resource: ApiResource,
    pub scope: Scope,
}

impl TypeDescriptor {
    pub fn is_namespaced(&self) -> bool {
        self.scope == Scope::Namespaced
    }
}

/// Process-wide registry of known kinds.
#[derive(Debug, Default)]
pub struct Scheme {
    types: RwLock<HashMap<GroupVersionKind, TypeDescriptor>>,
    groups: RwLock<Vec<GroupVersion>>,
}

impl Scheme {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a kind.
    ///
    /// Registering an identical descriptor again is a no-op.
    pub fn add_known_type(&self, descriptor: TypeDescriptor) -> Result<(), SchemeError> {
        let gvk = GroupVersionKind::gvk(
            &descriptor.resource.group,
            &descriptor.resource.version,
            &descriptor.resource.kind,
        );
        let mut types = self.types.write();
        match types.get(&gvk) {
            Some(existing) if *existing == descriptor => Ok(()),
            Some(_) => Err(SchemeError::Conflict {
                api_version: descriptor.resource.api_version.clone(),
                kind: gvk.kind,
            }),
            None => {
                debug!(
                    api_version = %descriptor.resource.api_version,
                    kind = %gvk.kind,
                    "Registered kind"
                );
                types.insert(gvk, descriptor);
                Ok(())
            }
        }
    }

    fn record_group(&self, gv: GroupVersion) {
        let mut groups = self.groups.write();
        if !groups.contains(&gv) {
            groups.push(gv);
        }
    }

    /// Whether the kind has been registered.
    pub fn recognizes(&self, gvk: &GroupVersionKind) -> bool {
        self.types.read().contains_key(gvk)
    }

    /// Descriptor for a registered kind.
    pub fn descriptor(&self, gvk: &GroupVersionKind) -> Option<TypeDescriptor> {
        self.types.read().get(gvk).cloned()
    }

    /// Registered kinds in a stable order.
    pub fn known_kinds(&self) -> Vec<GroupVersionKind> {
        let mut kinds: Vec<_> = self.types.read().keys().cloned().collect();
        kinds.sort_by(|a, b| {
            (&a.group, &a.version, &a.kind).cmp(&(&b.group, &b.version, &b.kind))
        });
        kinds
    }

    /// Group versions in the order they were registered.
    pub fn group_versions(&self) -> Vec<GroupVersion> {
        self.groups.read().clone()
    }
}

/// One API group version contributing kinds to the scheme.
#[cfg_attr(test, automock)]
pub trait SchemeGroup: Send + Sync {
    /// The group version this registration covers.
    fn group_version(&self) -> GroupVersion;

    /// Add every kind of the group to the scheme.
    fn add_to_scheme(&self, scheme: &Scheme) -> Result<(), SchemeError>;
}

/// Declarative list of kinds for one group version.
#[derive(Debug, Clone)]
pub struct SchemeBuilder {
    group_version: GroupVersion,
    descriptors: Vec<TypeDescriptor>,
}

impl SchemeBuilder {
    pub fn new(group: &str, version: &str) -> Self {
        Self {
            group_version: GroupVersion::gv(group, version),
            descriptors: Vec::new(),
        }
    }

    /// Add a statically typed kind.
    pub fn with_type<K>(mut self, scope: Scope) -> Self
    where
        K: kube::Resource<DynamicType = ()>,
    {
        self.descriptors.push(TypeDescriptor {
            resource: ApiResource::erase::<K>(&()),
            scope,
        });
        self
    }

    /// Add a kind known only by name, for APIs the operator has no Rust type for.
    pub fn with_kind(mut self, kind: &str, plural: &str, scope: Scope) -> Self {
        let gvk = GroupVersionKind::gvk(
            &self.group_version.group,
            &self.group_version.version,
            kind,
        );
        self.descriptors.push(TypeDescriptor {
            resource: ApiResource::from_gvk_with_plural(&gvk, plural),
            scope,
        });
        self
    }
}

impl SchemeGroup for SchemeBuilder {
    fn group_version(&self) -> GroupVersion {
        self.group_version.clone()
    }

    fn add_to_scheme(&self, scheme: &Scheme) -> Result<(), SchemeError> {
        for descriptor in &self.descriptors {
            if descriptor.resource.group != self.group_version.group
                || descriptor.resource.version != self.group_version.version
            {
                return Err(SchemeError::Registration {
                    api_version: self.group_version.api_version(),
                    reason: format!(
                        "kind {} belongs to {}",
                        descriptor.resource.kind, descriptor.resource.api_version
                    ),
                });
            }
            scheme.add_known_type(descriptor.clone())?;
        }
        scheme.record_group(self.group_version.clone());
        Ok(())
    }
}

/// `apps.open-cluster-management.io/v1beta1`: the GitOpsCluster API.
pub fn gitops_v1beta1() -> SchemeBuilder {
    SchemeBuilder::new("apps.open-cluster-management.io", "v1beta1")
        .with_type::<GitOpsCluster>(Scope::Namespaced)
}

/// Core `v1` kinds read or written by the controller.
pub fn core_v1() -> SchemeBuilder {
    SchemeBuilder::new("", "v1")
        .with_type::<Secret>(Scope::Namespaced)
        .with_type::<ConfigMap>(Scope::Namespaced)
        .with_type::<Service>(Scope::Namespaced)
        .with_type::<ServiceAccount>(Scope::Namespaced)
        .with_type::<Namespace>(Scope::Cluster)
}

/// `cluster.open-cluster-management.io/v1beta1`: placement APIs.
pub fn cluster_v1beta1() -> SchemeBuilder {
    SchemeBuilder::new("cluster.open-cluster-management.io", "v1beta1")
        .with_kind("Placement", "placements", Scope::Namespaced)
        .with_kind("PlacementDecision", "placementdecisions", Scope::Namespaced)
        .with_kind("ManagedClusterSet", "managedclustersets", Scope::Cluster)
        .with_kind(
            "ManagedClusterSetBinding",
            "managedclustersetbindings",
            Scope::Namespaced,
        )
}

/// `cluster.open-cluster-management.io/v1`: the cluster registry.
pub fn cluster_v1() -> SchemeBuilder {
    SchemeBuilder::new("cluster.open-cluster-management.io", "v1").with_kind(
        "ManagedCluster",
        "managedclusters",
        Scope::Cluster,
    )
}

/// GroupVersionKind of ManagedCluster.
pub fn managed_cluster_gvk() -> GroupVersionKind {
    GroupVersionKind::gvk("cluster.open-cluster-management.io", "v1", "ManagedCluster")
}

/// Every group the operator needs, in registration order.
pub fn default_groups() -> Vec<Box<dyn SchemeGroup>> {
    vec![
        Box::new(gitops_v1beta1()),
        Box::new(core_v1()),
        Box::new(cluster_v1beta1()),
        Box::new(cluster_v1()),
    ]
}

/// Register groups in order, stopping at the first failure.
///
/// Returns the number of groups registered.
pub fn register_all(scheme: &Scheme, groups: &[Box<dyn SchemeGroup>]) -> Result<usize, SchemeError> {
    for group in groups {
        let gv = group.group_version();
        group.add_to_scheme(scheme).map_err(|e| SchemeError::Registration {
            api_version: gv.api_version(),
            reason: e.to_string(),
        })?;
        info!(api_version = %gv.api_version(), "Registered API group");
    }
    Ok(groups.len())
}
