//! Process-wide "script loaded" registry
//!
//! Each vendor script is injected at most once per process. Concurrent
//! initializers await the same shared future; a failed load is evicted so a
//! later mount can try again, a successful one is kept forever.

use crate::{lock, provider::sdk::SdkResult, provider::ProviderKind, LoadFailure};
use fxhash::FxHashMap;
use futures::future::{BoxFuture, FutureExt, Shared};
use once_cell::sync::Lazy;
use std::sync::{
    atomic::{AtomicU64, Ordering},
    Arc, Mutex,
};

pub type SharedLoad = Shared<BoxFuture<'static, Result<(), LoadFailure>>>;

static GLOBAL: Lazy<Arc<ScriptRegistry>> = Lazy::new(ScriptRegistry::new);

struct Entry {
    generation: u64,
    load: SharedLoad,
}

pub struct ScriptRegistry {
    entries: Mutex<FxHashMap<ProviderKind, Entry>>,
    next_generation: AtomicU64,
}

impl ScriptRegistry {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            entries: Mutex::new(FxHashMap::default()),
            next_generation: AtomicU64::new(1),
        })
    }

    /// The registry shared by every adapter in the process
    pub fn global() -> Arc<Self> {
        GLOBAL.clone()
    }

    /// Returns the cached load for `provider`, starting it with `start` if
    /// none is cached
    pub fn load<F>(self: &Arc<Self>, provider: ProviderKind, start: F) -> SharedLoad
    where
        F: FnOnce() -> BoxFuture<'static, SdkResult<()>>,
    {
        let mut entries = lock(&self.entries);
        if let Some(entry) = entries.get(&provider) {
            log::debug!("reusing {} script load", provider);
            return entry.load.clone();
        }

        let generation = self.next_generation.fetch_add(1, Ordering::Relaxed);
        let registry = Arc::downgrade(self);
        let pending = start();
        log::debug!("loading {} script", provider);

        let load = async move {
            let result = pending
                .await
                .map_err(|fault| LoadFailure::Script(fault.to_string()));
            if let Err(failure) = &result {
                log::warn!("{} script failed to load: {}", provider, failure);
                if let Some(registry) = registry.upgrade() {
                    registry.evict(provider, generation);
                }
            }
            result
        }
        .boxed()
        .shared();

        entries.insert(
            provider,
            Entry {
                generation,
                load: load.clone(),
            },
        );
        load
    }

    /// True once the script for `provider` has loaded successfully
    pub fn is_loaded(&self, provider: ProviderKind) -> bool {
        lock(&self.entries)
            .get(&provider)
            .and_then(|entry| entry.load.peek())
            .map_or(false, |result| result.is_ok())
    }

    /// True while a load is cached, pending or finished
    pub fn is_cached(&self, provider: ProviderKind) -> bool {
        lock(&self.entries).contains_key(&provider)
    }

    fn evict(&self, provider: ProviderKind, generation: u64) {
        let mut entries = lock(&self.entries);
        if entries
            .get(&provider)
            .map_or(false, |entry| entry.generation == generation)
        {
            entries.remove(&provider);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::provider::sdk::SdkFault;
    use futures::future;
    use std::sync::atomic::AtomicUsize;

    #[tokio::test]
    async fn test_concurrent_loads_share_one_future() {
        let registry = ScriptRegistry::new();
        let starts = Arc::new(AtomicUsize::new(0));

        let start = |starts: Arc<AtomicUsize>| {
            move || {
                starts.fetch_add(1, Ordering::SeqCst);
                future::ready(Ok(())).boxed()
            }
        };
        let a = registry.load(ProviderKind::Google, start(starts.clone()));
        let b = registry.load(ProviderKind::Google, start(starts.clone()));
        let (ra, rb) = futures::join!(a, b);

        assert!(ra.is_ok() && rb.is_ok());
        assert_eq!(starts.load(Ordering::SeqCst), 1);
        assert!(registry.is_loaded(ProviderKind::Google));
        assert!(!registry.is_loaded(ProviderKind::Baidu));
    }

    #[tokio::test]
    async fn test_failed_load_is_evicted() {
        let registry = ScriptRegistry::new();
        let failed = registry
            .load(ProviderKind::Amap, || {
                future::ready(Err(SdkFault::ScriptUnavailable("404".into()))).boxed()
            })
            .await;
        assert!(matches!(failed, Err(LoadFailure::Script(_))));
        assert!(!registry.is_cached(ProviderKind::Amap));

        let retried = registry
            .load(ProviderKind::Amap, || future::ready(Ok(())).boxed())
            .await;
        assert!(retried.is_ok());
        assert!(registry.is_loaded(ProviderKind::Amap));
    }
}
