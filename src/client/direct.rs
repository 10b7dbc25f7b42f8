//! Client that talks to the API server on every call.

use std::sync::Arc;

use async_trait::async_trait;
use kube::Client;
use kube::api::{Api, DeleteParams, DynamicObject, ListParams, PostParams, TypeMeta};
use kube::core::GroupVersionKind;
use tracing::debug;

use super::{ClientError, ObjectClient, ObjectKey, describe_gvk, key_of};
use crate::scheme::{Scheme, Scope, TypeDescriptor};

/// Uncached [`ObjectClient`].
///
/// Reads always observe the latest state on the API server, including writes
/// this process made a moment ago.
#[derive(Clone)]
pub struct DirectClient {
    client: Client,
    scheme: Arc<Scheme>,
}

impl DirectClient {
    pub fn new(client: Client, scheme: Arc<Scheme>) -> Self {
        Self { client, scheme }
    }

    fn descriptor(&self, gvk: &GroupVersionKind) -> Result<TypeDescriptor, ClientError> {
        self.scheme
            .descriptor(gvk)
            .ok_or_else(|| ClientError::UnknownKind(describe_gvk(gvk)))
    }

    /// Api handle for a single named object.
    fn object_api(&self, key: &ObjectKey) -> Result<(Api<DynamicObject>, TypeDescriptor), ClientError> {
        let descriptor = self.descriptor(&key.gvk)?;
        let api = match (descriptor.scope, key.namespace.as_deref()) {
            (Scope::Namespaced, Some(ns)) => {
                Api::namespaced_with(self.client.clone(), ns, &descriptor.resource)
            }
            (Scope::Namespaced, None) => {
                return Err(ClientError::MissingNamespace {
                    kind: key.gvk.kind.clone(),
                    name: key.name.clone(),
                });
            }
            (Scope::Cluster, _) => Api::all_with(self.client.clone(), &descriptor.resource),
        };
        Ok((api, descriptor))
    }

    /// Objects from the API server may omit type metadata (list items do).
    fn with_types(mut obj: DynamicObject, descriptor: &TypeDescriptor) -> DynamicObject {
        if obj.types.is_none() {
            obj.types = Some(TypeMeta {
                api_version: descriptor.resource.api_version.clone(),
                kind: descriptor.resource.kind.clone(),
            });
        }
        obj
    }
}

#[async_trait]
impl ObjectClient for DirectClient {
    async fn get(&self, key: &ObjectKey) -> Result<DynamicObject, ClientError> {
        let (api, descriptor) = self.object_api(key)?;
        debug!(object = %key, "Direct get");
        let obj = api.get(&key.name).await?;
        Ok(Self::with_types(obj, &descriptor))
    }

    async fn list(
        &self,
        gvk: &GroupVersionKind,
        namespace: Option<String>,
    ) -> Result<Vec<DynamicObject>, ClientError> {
        let descriptor = self.descriptor(gvk)?;
        let api: Api<DynamicObject> = match (descriptor.scope, namespace.as_deref()) {
            (Scope::Namespaced, Some(ns)) => {
                Api::namespaced_with(self.client.clone(), ns, &descriptor.resource)
            }
            _ => Api::all_with(self.client.clone(), &descriptor.resource),
        };
        debug!(kind = %describe_gvk(gvk), namespace = ?namespace, "Direct list");
        let list = api.list(&ListParams::default()).await?;
        Ok(list
            .items
            .into_iter()
            .map(|obj| Self::with_types(obj, &descriptor))
            .collect())
    }

    async fn create(&self, obj: &DynamicObject) -> Result<DynamicObject, ClientError> {
        let key = key_of(obj)?;
        let (api, descriptor) = self.object_api(&key)?;
        debug!(object = %key, "Direct create");
        let created = api.create(&PostParams::default(), obj).await?;
        Ok(Self::with_types(created, &descriptor))
    }

    async fn update(&self, obj: &DynamicObject) -> Result<DynamicObject, ClientError> {
        let key = key_of(obj)?;
        let (api, descriptor) = self.object_api(&key)?;
        debug!(object = %key, "Direct update");
        let updated = api.replace(&key.name, &PostParams::default(), obj).await?;
        Ok(Self::with_types(updated, &descriptor))
    }

    async fn delete(&self, key: &ObjectKey) -> Result<(), ClientError> {
        let (api, _) = self.object_api(key)?;
        debug!(object = %key, "Direct delete");
        api.delete(&key.name, &DeleteParams::default()).await?;
        Ok(())
    }
}
