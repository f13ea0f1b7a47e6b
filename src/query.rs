//! Cached reads with stale-result protection.

use std::sync::Arc;

use serde::de::DeserializeOwned;
use serde_json::Value;

use crate::{
    remote::{RemoteClient, RemoteError, RemoteRequest},
    runtime::handle::{CacheHandle, RuntimeError},
    types::QueryKey,
};

/// Failure of a cached read.
#[derive(Debug, thiserror::Error)]
pub enum QueryError {
    /// The backend call failed.
    #[error(transparent)]
    Remote(#[from] RemoteError),
    /// The cache runtime failed.
    #[error("cache runtime: {0}")]
    Runtime(#[from] RuntimeError),
    /// The value does not decode as the requested type.
    #[error("value under {key} has an unexpected shape: {source}")]
    Decode {
        /// Offending key.
        key: QueryKey,
        /// Decoder error.
        source: serde_json::Error,
    },
}

/// Reads through the cache, refetching absent or invalidated keys.
pub struct QueryClient<C> {
    client: Arc<C>,
    cache: CacheHandle,
}

impl<C> Clone for QueryClient<C> {
    fn clone(&self) -> Self {
        Self {
            client: Arc::clone(&self.client),
            cache: self.cache.clone(),
        }
    }
}

impl<C: RemoteClient> QueryClient<C> {
    /// Client that reads through `cache` and fetches with `client`.
    pub fn new(client: Arc<C>, cache: CacheHandle) -> Self {
        Self { client, cache }
    }

    /// Current value under `key`, without touching the network.
    pub async fn peek<T: DeserializeOwned>(&self, key: &QueryKey) -> Result<Option<T>, QueryError> {
        self.cache
            .read(key.clone())
            .await?
            .map(|entry| decode(key, entry.value))
            .transpose()
    }

    /// Returns the cached value when fresh, otherwise fetches it.
    pub async fn get_or_fetch<T: DeserializeOwned>(
        &self,
        key: QueryKey,
        request: RemoteRequest,
    ) -> Result<T, QueryError> {
        match self.cache.read(key.clone()).await? {
            Some(entry) if !entry.stale => decode(&key, entry.value),
            _ => self.fetch(key, request).await,
        }
    }

    /// Fetches `key` and stores the result.
    ///
    /// If a mutation started on `key` while the request was in flight the
    /// result is discarded and the value now visible in the cache is returned.
    pub async fn fetch<T: DeserializeOwned>(
        &self,
        key: QueryKey,
        request: RemoteRequest,
    ) -> Result<T, QueryError> {
        let ticket = self.cache.begin_fetch(key.clone()).await?;
        let value = self.client.call(request).await?;

        if self.cache.complete_fetch(ticket, value.clone()).await? {
            return decode(&key, value);
        }
        match self.cache.read(key.clone()).await? {
            Some(entry) => decode(&key, entry.value),
            None => decode(&key, value),
        }
    }
}

fn decode<T: DeserializeOwned>(key: &QueryKey, value: Value) -> Result<T, QueryError> {
    serde_json::from_value(value).map_err(|source| QueryError::Decode {
        key: key.clone(),
        source,
    })
}
