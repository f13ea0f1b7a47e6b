use std::sync::{
    Arc, Mutex,
    atomic::{AtomicU64, Ordering},
};

use hashbrown::HashMap;
use serde::{Serialize, de::DeserializeOwned};
use serde_json::Value;
use tokio::sync::{Mutex as AsyncMutex, OwnedMutexGuard};

use crate::{
    core::store::CacheEntry,
    remote::{Method, RemoteClient, RemoteError, RemoteRequest},
    runtime::handle::{CacheHandle, OptimisticFn},
    types::{MutationId, QueryKey},
    validate::{Validate, ValidationResult},
};

use super::{
    error::{ControllerFault, MutationError},
    state::{MutationOutcome, MutationState, MutationTracker},
};

/// Typed payload plus the endpoint it is sent to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MutationRequest<R> {
    /// HTTP verb.
    pub method: Method,
    /// Endpoint path relative to the API base.
    pub endpoint: String,
    /// Request body; immutable once submitted.
    pub body: R,
}

impl<R: Serialize> MutationRequest<R> {
    /// Request with `body` for `method endpoint`.
    pub fn new(method: Method, endpoint: impl Into<String>, body: R) -> Self {
        Self {
            method,
            endpoint: endpoint.into(),
            body,
        }
    }

    /// Encodes the body into a transport request.
    pub fn to_remote(&self) -> Result<RemoteRequest, serde_json::Error> {
        Ok(RemoteRequest::new(self.method, self.endpoint.clone())
            .with_payload(serde_json::to_value(&self.body)?))
    }
}

impl<R: Validate> Validate for MutationRequest<R> {
    fn validate(&self) -> ValidationResult {
        self.body.validate()
    }
}

/// A reusable mutation whose cached value is derived from the response.
///
/// Use this when the key holds something other than the raw response, e.g.
/// a list key that receives one created record.
pub trait Mutation: Send + Sync + 'static {
    /// Type stored under [`Mutation::key`].
    type Value: Serialize + DeserializeOwned + Clone + Send + 'static;
    /// Decoded server response.
    type Response: DeserializeOwned + Send + 'static;

    /// Cache key the mutation reconciles.
    fn key(&self) -> QueryKey;

    /// Wire request sent to the server.
    fn request(&self) -> Result<RemoteRequest, serde_json::Error>;

    /// Client-side rules; a failure means nothing is sent or cached.
    fn validate(&self) -> ValidationResult {
        ValidationResult::Valid
    }

    /// Speculative next value. Must be pure; `None` clears the key.
    fn optimistic(&self, previous: Option<Self::Value>) -> Option<Self::Value>;

    /// Confirmed next value, given the pre-mutation value and the response.
    fn confirm(&self, previous: Option<Self::Value>, response: Self::Response) -> Option<Self::Value>;
}

/// Runs mutations against a shared cache with optimistic feedback.
///
/// Mutations on the same key are serialized in FIFO order: the second waits
/// until the first has settled, so it never snapshots an unconfirmed value.
pub struct MutationController<C> {
    client: Arc<C>,
    cache: CacheHandle,
    locks: Arc<KeyLocks>,
    next_id: Arc<AtomicU64>,
}

impl<C> Clone for MutationController<C> {
    fn clone(&self) -> Self {
        Self {
            client: Arc::clone(&self.client),
            cache: self.cache.clone(),
            locks: Arc::clone(&self.locks),
            next_id: Arc::clone(&self.next_id),
        }
    }
}

impl<C: RemoteClient> MutationController<C> {
    /// Controller over `client`, reconciling through `cache`.
    pub fn new(client: Arc<C>, cache: CacheHandle) -> Self {
        Self {
            client,
            cache,
            locks: Arc::new(KeyLocks::default()),
            next_id: Arc::new(AtomicU64::new(1)),
        }
    }

    /// Cache this controller reconciles.
    pub fn cache(&self) -> &CacheHandle {
        &self.cache
    }

    /// Remote client mutations are sent through.
    pub fn client(&self) -> &Arc<C> {
        &self.client
    }

    /// Executes `request` with `transform` as the optimistic value of `key`.
    ///
    /// The server response is the confirmed value and replaces the
    /// optimistic one on success. On failure the pre-mutation value is
    /// restored. Either way `key` is invalidated exactly once before this
    /// returns. Validation failures return before the cache is touched.
    pub async fn execute<T, R, F>(
        &self,
        key: QueryKey,
        request: MutationRequest<R>,
        transform: F,
    ) -> Result<MutationOutcome<T>, ControllerFault>
    where
        T: Serialize + DeserializeOwned + Clone + Send + 'static,
        R: Serialize + Validate + Send + Sync + 'static,
        F: FnOnce(Option<T>, &R) -> Option<T> + Send + 'static,
    {
        let validation = request.validate();
        let remote = request.to_remote();
        let body = Arc::new(request.body);

        self.drive(
            key,
            validation,
            remote,
            move |previous| transform(previous, &body),
            |_, value| {
                let confirmed: T = serde_json::from_value(value)?;
                Ok((Some(confirmed.clone()), confirmed))
            },
        )
        .await
    }

    /// Executes a [`Mutation`]; the outcome carries the confirmed cache value.
    pub async fn run<M: Mutation>(
        &self,
        mutation: M,
    ) -> Result<MutationOutcome<Option<M::Value>>, ControllerFault> {
        let key = mutation.key();
        let validation = mutation.validate();
        let request = mutation.request();
        let mutation = Arc::new(mutation);
        let speculative = Arc::clone(&mutation);

        self.drive(
            key,
            validation,
            request,
            move |previous| speculative.optimistic(previous),
            move |previous, value| {
                let response: M::Response = serde_json::from_value(value)?;
                let confirmed = mutation.confirm(previous, response);
                Ok((confirmed.clone(), confirmed))
            },
        )
        .await
    }

    async fn drive<T, O>(
        &self,
        key: QueryKey,
        validation: ValidationResult,
        request: Result<RemoteRequest, serde_json::Error>,
        optimistic: impl FnOnce(Option<T>) -> Option<T> + Send + 'static,
        confirm: impl FnOnce(Option<T>, Value) -> Result<(Option<T>, O), serde_json::Error> + Send,
    ) -> Result<MutationOutcome<O>, ControllerFault>
    where
        T: Serialize + DeserializeOwned + Send + 'static,
        O: Send,
    {
        let id: MutationId = self.next_id.fetch_add(1, Ordering::Relaxed);
        let mut tracker = MutationTracker::new(id, key.clone());
        tracker.advance(MutationState::Pending)?;

        if let ValidationResult::Invalid(errors) = validation {
            tracker.advance(MutationState::Failed)?;
            tracing::debug!(mutation = id, key = %key, errors = errors.len(), "mutation rejected by validation");
            return Ok(MutationOutcome::Failed(MutationError::ValidationFailed(errors)));
        }
        let request = request.map_err(ControllerFault::Encode)?;

        let _slot = self.locks.acquire(&key).await;

        let apply: OptimisticFn = Box::new(move |previous: Option<&Value>| {
            let previous = previous
                .map(|value| serde_json::from_value::<T>(value.clone()))
                .transpose()
                .map_err(|e| e.to_string())?;
            optimistic(previous)
                .map(serde_json::to_value)
                .transpose()
                .map_err(|e| e.to_string())
        });
        let snapshot = self.cache.begin_mutation(key.clone(), apply).await?;

        tracing::debug!(mutation = id, key = %key, method = %request.method, endpoint = %request.endpoint, "mutation dispatched");
        let remote = self.client.call(request).await;

        let reconciled = self.reconcile(&key, snapshot, remote, confirm).await;
        let settled = self.cache.invalidate(key.clone()).await;
        let outcome = reconciled?;
        settled?;

        tracker.advance(outcome.state())?;
        match &outcome {
            MutationOutcome::Succeeded(_) => {
                tracing::info!(mutation = id, key = %key, "mutation committed");
            }
            MutationOutcome::Failed(err) => {
                tracing::warn!(mutation = id, key = %key, error = %err, "mutation rolled back");
            }
        }
        Ok(outcome)
    }

    async fn reconcile<T, O>(
        &self,
        key: &QueryKey,
        snapshot: Option<CacheEntry>,
        remote: Result<Value, RemoteError>,
        confirm: impl FnOnce(Option<T>, Value) -> Result<(Option<T>, O), serde_json::Error>,
    ) -> Result<MutationOutcome<O>, ControllerFault>
    where
        T: Serialize + DeserializeOwned,
    {
        let failure = match remote {
            Ok(value) => {
                let previous = match snapshot
                    .as_ref()
                    .map(|entry| serde_json::from_value::<T>(entry.value.clone()))
                    .transpose()
                {
                    Ok(previous) => previous,
                    Err(source) => {
                        self.restore(key, snapshot).await?;
                        return Err(ControllerFault::Decode {
                            key: key.clone(),
                            source,
                        });
                    }
                };

                match confirm(previous, value) {
                    Ok((cached, out)) => match cached.map(serde_json::to_value).transpose() {
                        Ok(encoded) => {
                            self.cache.commit(key.clone(), encoded).await?;
                            return Ok(MutationOutcome::Succeeded(out));
                        }
                        Err(err) => {
                            self.restore(key, snapshot).await?;
                            return Err(ControllerFault::Encode(err));
                        }
                    },
                    Err(err) => MutationError::ServerRejected(format!("unexpected response: {err}")),
                }
            }
            Err(err) => MutationError::from(err),
        };

        self.restore(key, snapshot).await?;
        Ok(MutationOutcome::Failed(failure))
    }

    async fn restore(&self, key: &QueryKey, snapshot: Option<CacheEntry>) -> Result<(), ControllerFault> {
        Ok(self.cache.rollback(key.clone(), snapshot).await?)
    }
}

/// FIFO slot per key; idle slots are dropped once nobody waits on them.
#[derive(Default)]
struct KeyLocks {
    slots: Mutex<HashMap<QueryKey, Arc<AsyncMutex<()>>>>,
}

struct KeySlot<'a> {
    locks: &'a KeyLocks,
    key: QueryKey,
    _held: OwnedMutexGuard<()>,
}

impl KeyLocks {
    async fn acquire(&self, key: &QueryKey) -> KeySlot<'_> {
        let slot = {
            let mut slots = self.slots.lock().unwrap_or_else(|e| e.into_inner());
            Arc::clone(slots.entry(key.clone()).or_default())
        };
        let held = slot.lock_owned().await;
        KeySlot {
            locks: self,
            key: key.clone(),
            _held: held,
        }
    }
}

impl Drop for KeySlot<'_> {
    fn drop(&mut self) {
        let mut slots = self.locks.slots.lock().unwrap_or_else(|e| e.into_inner());
        // Map entry plus the guard we still hold.
        let idle = slots
            .get(&self.key)
            .is_some_and(|slot| Arc::strong_count(slot) <= 2);
        if idle {
            slots.remove(&self.key);
        }
    }
}
