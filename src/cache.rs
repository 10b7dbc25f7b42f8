//! Filtered watch cache.
//!
//! One reflector per kind, started the first time that kind is read. Kinds in
//! the [`SelectorMap`] are listed and watched with their label selector, so
//! objects outside the selector never reach memory. Every other kind is
//! mirrored in full.

use std::collections::HashMap;
use std::sync::Arc;

use futures::StreamExt;
use kube::api::{Api, DynamicObject};
use kube::core::GroupVersionKind;
use kube::runtime::reflector::{ObjectRef, Store};
use kube::runtime::{WatchStreamExt, reflector, watcher};
use kube::{Client, Resource};
use tokio::sync::Mutex;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::client::describe_gvk;
use crate::scheme::Scheme;
use crate::selectors::SelectorMap;

/// Errors from the watch cache.
#[derive(Debug, thiserror::Error)]
pub enum CacheError {
    /// Kind not registered in the scheme
    #[error("kind {0} is not registered in the scheme")]
    UnknownKind(String),

    /// Informer stopped before its first sync
    #[error("informer for {0} stopped before syncing")]
    NotSynced(String),
}

/// Builds a [`WatchCache`] restricted by a selector mapping.
#[derive(Debug, Clone)]
pub struct FilteredCacheBuilder {
    selectors: SelectorMap,
}

impl FilteredCacheBuilder {
    pub fn new(selectors: SelectorMap) -> Self {
        Self { selectors }
    }

    /// The mapping passed to every cache this builder creates.
    pub fn selectors(&self) -> &SelectorMap {
        &self.selectors
    }

    pub fn build(&self, client: Client, scheme: Arc<Scheme>) -> WatchCache {
        WatchCache {
            client,
            scheme,
            selectors: self.selectors.clone(),
            informers: Mutex::new(HashMap::new()),
            shutdown: CancellationToken::new(),
        }
    }
}

/// Lazily populated in-memory mirror of watched kinds.
pub struct WatchCache {
    client: Client,
    scheme: Arc<Scheme>,
    selectors: SelectorMap,
    informers: Mutex<HashMap<GroupVersionKind, Store<DynamicObject>>>,
    shutdown: CancellationToken,
}

impl WatchCache {
    /// Watcher configuration for a kind, narrowed by its selector if it has one.
    pub fn watcher_config(&self, gvk: &GroupVersionKind) -> watcher::Config {
        let config = watcher::Config::default().any_semantic();
        match self.selectors.get(gvk) {
            Some(selector) => config.labels_from(selector),
            None => config,
        }
    }

    /// [`Self::watcher_config`] for a statically typed kind.
    pub fn watcher_config_for<K>(&self) -> watcher::Config
    where
        K: Resource<DynamicType = ()>,
    {
        let gvk = GroupVersionKind::gvk(&K::group(&()), &K::version(&()), &K::kind(&()));
        self.watcher_config(&gvk)
    }

    pub fn selectors(&self) -> &SelectorMap {
        &self.selectors
    }

    /// Store for a kind, starting its reflector on first use.
    pub async fn informer(&self, gvk: &GroupVersionKind) -> Result<Store<DynamicObject>, CacheError> {
        let mut informers = self.informers.lock().await;
        if let Some(store) = informers.get(gvk) {
            return Ok(store.clone());
        }

        let descriptor = self
            .scheme
            .descriptor(gvk)
            .ok_or_else(|| CacheError::UnknownKind(describe_gvk(gvk)))?;
        let config = self.watcher_config(gvk);
        info!(
            kind = %describe_gvk(gvk),
            label_selector = ?config.label_selector,
            "Starting informer"
        );

        let api: Api<DynamicObject> = Api::all_with(self.client.clone(), &descriptor.resource);
        let writer = reflector::store::Writer::new(descriptor.resource.clone());
        let reader = writer.as_reader();
        let stream = reflector(writer, watcher(api, config))
            .default_backoff()
            .touched_objects();

        let shutdown = self.shutdown.clone();
        let kind = describe_gvk(gvk);
        tokio::spawn(async move {
            let mut stream = std::pin::pin!(stream);
            loop {
                tokio::select! {
                    _ = shutdown.cancelled() => break,
                    event = stream.next() => match event {
                        Some(Ok(_)) => {}
                        Some(Err(e)) => warn!(kind = %kind, error = %e, "Watch error"),
                        None => break,
                    },
                }
            }
            debug!(kind = %kind, "Informer stopped");
        });

        informers.insert(gvk.clone(), reader.clone());
        Ok(reader)
    }

    /// Cached copy of one object, waiting for the first sync of its kind.
    pub async fn get(
        &self,
        gvk: &GroupVersionKind,
        namespace: Option<&str>,
        name: &str,
    ) -> Result<Option<Arc<DynamicObject>>, CacheError> {
        let store = self.synced_store(gvk).await?;
        let descriptor = self
            .scheme
            .descriptor(gvk)
            .ok_or_else(|| CacheError::UnknownKind(describe_gvk(gvk)))?;
        let mut obj_ref = ObjectRef::<DynamicObject>::new_with(name, descriptor.resource);
        if let Some(ns) = namespace {
            obj_ref = obj_ref.within(ns);
        }
        Ok(store.get(&obj_ref))
    }

    /// Cached objects of a kind, optionally within one namespace.
    pub async fn list(
        &self,
        gvk: &GroupVersionKind,
        namespace: Option<&str>,
    ) -> Result<Vec<Arc<DynamicObject>>, CacheError> {
        let store = self.synced_store(gvk).await?;
        Ok(store
            .state()
            .into_iter()
            .filter(|obj| namespace.is_none() || obj.metadata.namespace.as_deref() == namespace)
            .collect())
    }

    async fn synced_store(&self, gvk: &GroupVersionKind) -> Result<Store<DynamicObject>, CacheError> {
        let store = self.informer(gvk).await?;
        store
            .wait_until_ready()
            .await
            .map_err(|_| CacheError::NotSynced(describe_gvk(gvk)))?;
        Ok(store)
    }

    /// Kinds with a running informer.
    pub async fn started_kinds(&self) -> Vec<GroupVersionKind> {
        self.informers.lock().await.keys().cloned().collect()
    }

    /// Stop every informer.
    pub fn stop(&self) {
        self.shutdown.cancel();
    }
}
