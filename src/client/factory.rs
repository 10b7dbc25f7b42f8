//! Strategies for constructing the manager's client.
//!
//! A factory receives everything the default cached client would be built
//! from. [`NonCachingClientFactory`] ignores the cache and the uncached-kinds
//! list and returns a client that always reads from the API server; it is the
//! one the manager is assembled with.

use std::sync::Arc;

use kube::Client;
use kube::core::GroupVersionKind;
use tracing::debug;

use super::{CachedClient, ClientError, DirectClient, ObjectClient};
use crate::cache::WatchCache;
use crate::scheme::Scheme;

/// Options shared by every client strategy.
#[derive(Clone)]
pub struct ClientOptions {
    pub scheme: Arc<Scheme>,
}

/// Builds the manager's [`ObjectClient`].
pub trait ClientFactory: Send + Sync {
    /// Short name used in logs.
    fn name(&self) -> &'static str;

    fn new_client(
        &self,
        cache: &Arc<WatchCache>,
        config: &kube::Config,
        options: ClientOptions,
        uncached: &[GroupVersionKind],
    ) -> Result<Arc<dyn ObjectClient>, ClientError>;
}

/// Framework default: reads through the watch cache.
#[derive(Debug, Clone, Copy, Default)]
pub struct CachedClientFactory;

impl ClientFactory for CachedClientFactory {
    fn name(&self) -> &'static str {
        "cached"
    }

    fn new_client(
        &self,
        cache: &Arc<WatchCache>,
        config: &kube::Config,
        options: ClientOptions,
        uncached: &[GroupVersionKind],
    ) -> Result<Arc<dyn ObjectClient>, ClientError> {
        let client = Client::try_from(config.clone())?;
        let direct = DirectClient::new(client, options.scheme);
        Ok(Arc::new(CachedClient::new(
            Arc::clone(cache),
            direct,
            uncached.to_vec(),
        )))
    }
}

/// Full bypass of the watch cache.
#[derive(Debug, Clone, Copy, Default)]
pub struct NonCachingClientFactory;

impl ClientFactory for NonCachingClientFactory {
    fn name(&self) -> &'static str {
        "non-caching"
    }

    fn new_client(
        &self,
        _cache: &Arc<WatchCache>,
        config: &kube::Config,
        options: ClientOptions,
        uncached: &[GroupVersionKind],
    ) -> Result<Arc<dyn ObjectClient>, ClientError> {
        debug!(
            ignored_uncached_kinds = uncached.len(),
            "Building non-caching client"
        );
        let client = Client::try_from(config.clone())?;
        Ok(Arc::new(DirectClient::new(client, options.scheme)))
    }
}
