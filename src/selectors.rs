//! Label selectors that narrow the watch cache.
//!
//! Without a selector the cache mirrors every object of a watched kind in the
//! cluster. Secrets are the expensive case: the operator only needs the Argo CD
//! cluster secrets it manages, so that kind alone is filtered. This module is
//! the single place the label convention lives.

use std::collections::HashMap;

use k8s_openapi::Resource as _;
use k8s_openapi::api::core::v1::Secret;
use kube::core::{Expression, GroupVersionKind, Selector};

/// Label carrying the managed cluster name on a cluster secret.
pub const CLUSTER_NAME_LABEL: &str = "apps.open-cluster-management.io/cluster-name";

/// Label Argo CD uses to classify secrets.
pub const ARGOCD_SECRET_TYPE_LABEL: &str = "argocd.argoproj.io/secret-type";

/// Value of [`ARGOCD_SECRET_TYPE_LABEL`] for cluster secrets.
pub const ARGOCD_SECRET_TYPE_CLUSTER: &str = "cluster";

/// Mapping from watched kind to the selector restricting it.
///
/// Kinds absent from the mapping are cached without a filter.
#[derive(Debug, Clone, Default)]
pub struct SelectorMap {
    entries: HashMap<GroupVersionKind, Selector>,
}

impl SelectorMap {
    /// Build a mapping, rejecting duplicate kinds.
    pub fn from_entries(
        entries: impl IntoIterator<Item = (GroupVersionKind, Selector)>,
    ) -> Result<Self, DuplicateSelector> {
        let mut map = HashMap::new();
        for (gvk, selector) in entries {
            if map.contains_key(&gvk) {
                return Err(DuplicateSelector(gvk));
            }
            map.insert(gvk, selector);
        }
        Ok(Self { entries: map })
    }

    /// Selector for a kind, if it is filtered.
    pub fn get(&self, gvk: &GroupVersionKind) -> Option<&Selector> {
        self.entries.get(gvk)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&GroupVersionKind, &Selector)> {
        self.entries.iter()
    }
}

/// The same kind appeared twice while building a [`SelectorMap`].
#[derive(Debug, thiserror::Error)]
#[error("duplicate selector for {}/{} {}", .0.group, .0.version, .0.kind)]
pub struct DuplicateSelector(pub GroupVersionKind);

/// Selector matching the Argo CD cluster secrets of managed clusters.
pub fn cluster_secret_selector() -> Selector {
    Selector::from_iter([
        Expression::Exists(CLUSTER_NAME_LABEL.to_string()),
        Expression::Equal(
            ARGOCD_SECRET_TYPE_LABEL.to_string(),
            ARGOCD_SECRET_TYPE_CLUSTER.to_string(),
        ),
    ])
}

/// GroupVersionKind of core/v1 Secret.
pub fn secret_gvk() -> GroupVersionKind {
    GroupVersionKind::gvk(Secret::GROUP, Secret::VERSION, Secret::KIND)
}

/// The cache filters used by the operator: only managed cluster secrets.
pub fn managed_cluster_secret_selectors() -> Result<SelectorMap, DuplicateSelector> {
    SelectorMap::from_entries([(secret_gvk(), cluster_secret_selector())])
}
