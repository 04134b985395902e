//! Single-flight key cache.
//!
//! Each key id maps to one shared computation. The first caller for an id
//! starts it (store lookups in priority order, then generation on the
//! blocking pool, then write-back); everyone else awaits the same
//! computation. The map lock is only held to look up or insert an entry.
//!
//! Entries that resolved successfully stay in the map for the lifetime of
//! the cache, so a cache is also an in-process memo of every key it loaded.
//! Failed entries are dropped so a later call can retry.

use std::any::Any;
use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use tracing::{debug, info, warn};

use super::store::KeyStore;
use super::{Dirty, KeyId};
use crate::backend::ProverIndex;
use crate::curves::CycleCurve;
use crate::serializable::Serializable;
use crate::utils::deferred::Deferred;
use crate::utils::errors::PicklesError;

/// A key whose identity is a digest of its own content.
pub trait ContentAddressed: Serializable + Send + Sync + 'static {
    /// Recomputed from the content, never read back from a stored field.
    fn content_digest(&self) -> [u8; 32];

    /// Checks that the parts of the key derived from its content agree
    /// with it.
    fn validate(&self) -> Result<(), PicklesError> {
        Ok(())
    }
}

impl<P: CycleCurve> ContentAddressed for ProverIndex<P> {
    fn content_digest(&self) -> [u8; 32] {
        self.cs().digest()
    }

    fn validate(&self) -> Result<(), PicklesError> {
        let index = &self.verifier_index;
        index.check_consistency()?;
        if index.circuit_commitment != P::srs().commit(&index.cs.row_scalars())? {
            return Err(PicklesError::Serialization(
                "circuit commitment does not match the constraint system".to_string(),
            ));
        }
        Ok(())
    }
}

impl<P: CycleCurve> Serializable for ProverIndex<P> {}

type Loaded = (Arc<dyn Any + Send + Sync>, Dirty);

struct Inner {
    stores: Vec<Arc<dyn KeyStore>>,
    /// Loading or loaded keys. Never evicted once loaded.
    in_flight: Mutex<HashMap<KeyId, Deferred<Loaded>>>,
}

/// Cheap to clone; clones share stores and in-flight computations.
#[derive(Clone)]
pub struct KeyCache {
    inner: Arc<Inner>,
}

impl Default for KeyCache {
    fn default() -> Self {
        Self::new(vec![])
    }
}

impl KeyCache {
    /// `stores` are consulted in order.
    pub fn new(stores: Vec<Arc<dyn KeyStore>>) -> Self {
        Self {
            inner: Arc::new(Inner {
                stores,
                in_flight: Mutex::new(HashMap::new()),
            }),
        }
    }

    pub fn stores(&self) -> &[Arc<dyn KeyStore>] {
        &self.inner.stores
    }

    /// Loads the key for `id`, running `generate` on the blocking pool only
    /// if no store has a valid copy and no other caller is already loading
    /// it.
    pub async fn load<K, G>(&self, id: KeyId, generate: G) -> Result<(Arc<K>, Dirty), PicklesError>
    where
        K: ContentAddressed,
        G: FnOnce() -> Result<K, PicklesError> + Send + 'static,
    {
        let deferred = {
            let mut in_flight = self
                .inner
                .in_flight
                .lock()
                .map_err(|e| PicklesError::cache_io("in-flight map", e))?;
            in_flight
                .entry(id.clone())
                .or_insert_with(|| {
                    let stores = self.inner.stores.clone();
                    Deferred::spawn(fetch_or_generate(stores, id.clone(), generate))
                })
                .clone()
        };

        match deferred.clone().await {
            Ok((key, dirty)) => {
                let key = key.downcast::<K>().map_err(|_| {
                    PicklesError::configuration(format!("key {id} was loaded with another type"))
                })?;
                Ok((key, dirty))
            }
            Err(e) => {
                // Let a later call retry from scratch
                if let Ok(mut in_flight) = self.inner.in_flight.lock() {
                    if in_flight.get(&id).is_some_and(|d| d.ptr_eq(&deferred)) {
                        in_flight.remove(&id);
                    }
                }
                Err(e)
            }
        }
    }
}

#[tracing::instrument(skip_all, name = "KeyCache::fetch_or_generate", fields(key = %id))]
async fn fetch_or_generate<K, G>(
    stores: Vec<Arc<dyn KeyStore>>,
    id: KeyId,
    generate: G,
) -> Result<Loaded, PicklesError>
where
    K: ContentAddressed,
    G: FnOnce() -> Result<K, PicklesError> + Send + 'static,
{
    for store in stores.iter() {
        match store.get(&id).await {
            Ok(Some(bytes)) => match K::from_bytes(&bytes).and_then(|key| key.validate().map(|_| key)) {
                Ok(key) if key.content_digest() == *id.digest() => {
                    info!(store = store.name(), "key cache hit");
                    return Ok((Arc::new(key) as Arc<dyn Any + Send + Sync>, Dirty::CacheHit));
                }
                Ok(_) => warn!(store = store.name(), "cached key does not match its id"),
                Err(e) => warn!(store = store.name(), error = %e, "cached key is invalid"),
            },
            Ok(None) => debug!(store = store.name(), "key cache miss"),
            Err(e) => warn!(store = store.name(), error = %e, "key cache read failed"),
        }
    }

    let key = tokio::task::spawn_blocking(generate).await??;
    key.validate()?;
    if key.content_digest() != *id.digest() {
        return Err(PicklesError::configuration(format!(
            "generated key does not match its id {id}"
        )));
    }
    info!("key generated locally");

    let bytes = key.to_bytes()?;
    for store in stores.iter().filter(|s| s.writable()) {
        if let Err(e) = store.put(&id, &bytes).await {
            warn!(store = store.name(), error = %e, "key cache write failed");
        }
    }
    Ok((Arc::new(key) as Arc<dyn Any + Send + Sync>, Dirty::LocallyGenerated))
}
