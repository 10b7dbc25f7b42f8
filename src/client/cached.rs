//! Client serving reads from the watch cache.

use std::sync::Arc;

use async_trait::async_trait;
use kube::api::DynamicObject;
use kube::core::GroupVersionKind;

use super::{ClientError, DirectClient, ObjectClient, ObjectKey};
use crate::cache::WatchCache;

/// [`ObjectClient`] whose reads come from the watch cache.
///
/// Writes and reads of kinds listed as uncached go to the API server. Reads
/// can lag behind writes until the watch delivers them.
pub struct CachedClient {
    cache: Arc<WatchCache>,
    direct: DirectClient,
    uncached: Vec<GroupVersionKind>,
}

impl CachedClient {
    pub fn new(cache: Arc<WatchCache>, direct: DirectClient, uncached: Vec<GroupVersionKind>) -> Self {
        Self {
            cache,
            direct,
            uncached,
        }
    }

    fn bypasses_cache(&self, gvk: &GroupVersionKind) -> bool {
        self.uncached.contains(gvk)
    }
}

#[async_trait]
impl ObjectClient for CachedClient {
    async fn get(&self, key: &ObjectKey) -> Result<DynamicObject, ClientError> {
        if self.bypasses_cache(&key.gvk) {
            return self.direct.get(key).await;
        }
        self.cache
            .get(&key.gvk, key.namespace.as_deref(), &key.name)
            .await?
            .map(|obj| obj.as_ref().clone())
            .ok_or_else(|| ClientError::NotFound(key.to_string()))
    }

    async fn list(
        &self,
        gvk: &GroupVersionKind,
        namespace: Option<String>,
    ) -> Result<Vec<DynamicObject>, ClientError> {
        if self.bypasses_cache(gvk) {
            return self.direct.list(gvk, namespace).await;
        }
        Ok(self
            .cache
            .list(gvk, namespace.as_deref())
            .await?
            .into_iter()
            .map(|obj| obj.as_ref().clone())
            .collect())
    }

    async fn create(&self, obj: &DynamicObject) -> Result<DynamicObject, ClientError> {
        self.direct.create(obj).await
    }

    async fn update(&self, obj: &DynamicObject) -> Result<DynamicObject, ClientError> {
        self.direct.update(obj).await
    }

    async fn delete(&self, key: &ObjectKey) -> Result<(), ClientError> {
        self.direct.delete(key).await
    }
}
