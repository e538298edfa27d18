//! Provides a named cache namespace which implements the read-through lookup protocol.
//!
//! A [Group] bundles a size constrained [LRUCache](crate::lru::LRUCache), a [Loader] which knows
//! how to fetch a value from the authoritative source and an optional
//! [PeerRouter](crate::peers::PeerRouter) which knows which node of the cluster owns a key.
//!
//! A lookup via [Group::get] works as follows:
//! 1. The local cache is consulted. A hit is returned immediately.
//! 2. On a miss, all concurrent callers for the same key are coalesced using a
//!    [Flight](crate::singleflight::Flight), so that only a single one performs the steps below.
//! 3. If the key is owned by a remote peer, the value is fetched from there and returned
//!    **without** storing it locally (the owner caches it). If the peer cannot be reached, a
//!    warning is logged and we continue with a local load.
//! 4. Otherwise the loader is invoked. Its result is stored in the local cache and returned. An
//!    error of the loader is passed on unchanged and nothing is cached.
//!
//! Groups are created via [Registry::new_group](crate::registry::Registry::new_group) or, when a
//! whole node is set up, via [Node::new_group](crate::node::Node::new_group).
//!
//! # Examples
//! ```
//! # use peercache::group::LoaderFn;
//! # use peercache::registry::Registry;
//! # #[tokio::main]
//! # async fn main() {
//! let registry = Registry::new();
//! let group = registry.new_group(
//!     "greetings",
//!     1024,
//!     LoaderFn(|key: String| async move { Ok(format!("Hello {}", key).into_bytes()) }),
//! );
//!
//! assert_eq!(group.get("World").await.unwrap().to_string(), "Hello World");
//!
//! // The second lookup is served from the cache...
//! assert_eq!(group.get("World").await.unwrap().to_string(), "Hello World");
//! assert_eq!(group.stats().local_loads(), 1);
//! # }
//! ```
use std::future::Future;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, OnceLock};

use crate::byteview::ByteView;
use crate::error::{CacheError, CacheResult};
use crate::lru::LRUCache;
use crate::peers::PeerRouter;
use crate::singleflight::Flight;

/// Loads values from the authoritative data source (a database, a remote API, a computation).
///
/// The returned buffer is moved into the cache, therefore a loader has to hand out a buffer it
/// doesn't keep using.
#[async_trait::async_trait]
pub trait Loader: Send + Sync {
    /// Loads the value for the given key.
    async fn load(&self, key: &str) -> anyhow::Result<Vec<u8>>;
}

/// Adapts an async closure so that it can be used as [Loader].
pub struct LoaderFn<F>(pub F);

#[async_trait::async_trait]
impl<F, Fut> Loader for LoaderFn<F>
where
    F: Fn(String) -> Fut + Send + Sync,
    Fut: Future<Output = anyhow::Result<Vec<u8>>> + Send + 'static,
{
    async fn load(&self, key: &str) -> anyhow::Result<Vec<u8>> {
        (self.0)(key.to_owned()).await
    }
}

/// Records some statistics of a group.
///
/// All counters only ever grow and are updated without any locking.
#[derive(Default)]
pub struct GroupStats {
    gets: AtomicUsize,
    cache_hits: AtomicUsize,
    loads: AtomicUsize,
    loads_deduped: AtomicUsize,
    peer_loads: AtomicUsize,
    peer_errors: AtomicUsize,
    local_loads: AtomicUsize,
    local_load_errs: AtomicUsize,
    server_requests: AtomicUsize,
}

impl GroupStats {
    fn increment(counter: &AtomicUsize) {
        let _ = counter.fetch_add(1, Ordering::Relaxed);
    }

    /// Returns the number of lookups (including invalid ones).
    pub fn gets(&self) -> usize {
        self.gets.load(Ordering::Relaxed)
    }

    /// Returns the number of lookups which were served from the local cache.
    pub fn cache_hits(&self) -> usize {
        self.cache_hits.load(Ordering::Relaxed)
    }

    /// Returns the number of cache misses (which either loaded a value or waited for another
    /// caller to load it).
    pub fn loads(&self) -> usize {
        self.loads.load(Ordering::Relaxed)
    }

    /// Returns the number of cache misses which were satisfied by a concurrent load of another
    /// caller.
    pub fn loads_deduped(&self) -> usize {
        self.loads_deduped.load(Ordering::Relaxed)
    }

    /// Returns the number of values which were successfully fetched from a remote peer.
    pub fn peer_loads(&self) -> usize {
        self.peer_loads.load(Ordering::Relaxed)
    }

    /// Returns the number of failed attempts to fetch a value from a remote peer.
    pub fn peer_errors(&self) -> usize {
        self.peer_errors.load(Ordering::Relaxed)
    }

    /// Returns the number of values which were successfully provided by the loader.
    pub fn local_loads(&self) -> usize {
        self.local_loads.load(Ordering::Relaxed)
    }

    /// Returns the number of failed invocations of the loader.
    pub fn local_load_errs(&self) -> usize {
        self.local_load_errs.load(Ordering::Relaxed)
    }

    /// Returns the number of requests which were received from other peers.
    pub fn server_requests(&self) -> usize {
        self.server_requests.load(Ordering::Relaxed)
    }

    pub(crate) fn record_server_request(&self) {
        GroupStats::increment(&self.server_requests);
    }
}

/// Represents a named cache namespace.
///
/// See the [module docs](crate::group) for a description of the lookup protocol.
pub struct Group {
    name: String,
    loader: Box<dyn Loader>,
    cache: Mutex<LRUCache<ByteView>>,
    router: OnceLock<Arc<dyn PeerRouter>>,
    flight: Flight<CacheResult<ByteView>>,
    stats: GroupStats,
}

impl Group {
    pub(crate) fn new(name: &str, max_memory: usize, loader: impl Loader + 'static) -> Self {
        Group {
            name: name.to_owned(),
            loader: Box::new(loader),
            cache: Mutex::new(LRUCache::new(max_memory)),
            router: OnceLock::new(),
            flight: Flight::new(),
            stats: GroupStats::default(),
        }
    }

    /// Returns the name of this group.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Returns the statistics of this group.
    pub fn stats(&self) -> &GroupStats {
        &self.stats
    }

    /// Attaches the router which is used to determine the owner of a key.
    ///
    /// # Panics
    /// Panics if a router has already been registered for this group.
    pub fn register_router(&self, router: Arc<dyn PeerRouter>) {
        if self.router.set(router).is_err() {
            panic!(
                "A peer router has already been registered for group '{}'!",
                self.name
            );
        }
    }

    /// Returns the value for the given key.
    ///
    /// Fails with [CacheError::InvalidArgument] if the key is empty. Errors of the loader are
    /// reported as [CacheError::Upstream].
    pub async fn get(&self, key: &str) -> CacheResult<ByteView> {
        GroupStats::increment(&self.stats.gets);

        if key.is_empty() {
            return Err(CacheError::InvalidArgument(
                "An empty key cannot be looked up".to_owned(),
            ));
        }

        if let Some(view) = self.lookup_cache(key) {
            GroupStats::increment(&self.stats.cache_hits);
            return Ok(view);
        }

        self.load(key).await
    }

    async fn load(&self, key: &str) -> CacheResult<ByteView> {
        GroupStats::increment(&self.stats.loads);

        let group = self;
        let leader = AtomicBool::new(false);
        let is_leader = &leader;

        let result = self
            .flight
            .work(key, move || async move {
                is_leader.store(true, Ordering::Relaxed);

                // Another caller might have populated the cache right before we joined...
                if let Some(view) = group.lookup_cache(key) {
                    GroupStats::increment(&group.stats.cache_hits);
                    return Ok(view);
                }

                if let Some(peer) = group.router.get().and_then(|router| router.route(key)) {
                    match peer.fetch(&group.name, key).await {
                        Ok(view) => {
                            GroupStats::increment(&group.stats.peer_loads);
                            return Ok(view);
                        }
                        Err(error) => {
                            GroupStats::increment(&group.stats.peer_errors);
                            log::warn!(
                                "Failed to fetch '{}' of group '{}' from its owner: {}. Loading locally...",
                                key,
                                group.name,
                                error
                            );
                        }
                    }
                }

                group.get_locally(key).await
            })
            .await;

        if !leader.load(Ordering::Relaxed) {
            GroupStats::increment(&self.stats.loads_deduped);
        }

        result
    }

    async fn get_locally(&self, key: &str) -> CacheResult<ByteView> {
        match self.loader.load(key).await {
            Ok(data) => {
                GroupStats::increment(&self.stats.local_loads);
                let view = ByteView::from(data);
                self.populate_cache(key, view.clone());
                Ok(view)
            }
            Err(error) => {
                GroupStats::increment(&self.stats.local_load_errs);
                Err(CacheError::upstream(error))
            }
        }
    }

    fn lookup_cache(&self, key: &str) -> Option<ByteView> {
        self.cache.lock().unwrap().get(key).cloned()
    }

    fn populate_cache(&self, key: &str, view: ByteView) {
        self.cache.lock().unwrap().add(key.to_owned(), view);
    }

    /// Determines if a value for the given key is currently present in the local cache.
    ///
    /// In contrast to [get](Group::get) this neither loads the value nor affects its
    /// eviction order.
    pub fn is_cached(&self, key: &str) -> bool {
        self.cache.lock().unwrap().contains(key)
    }

    /// Removes the given key from the local cache.
    ///
    /// Returns **true** if an entry was present.
    pub fn evict(&self, key: &str) -> bool {
        self.cache.lock().unwrap().remove(key).is_some()
    }

    /// Returns the number of locally cached entries.
    pub fn cached_entries(&self) -> usize {
        self.cache.lock().unwrap().len()
    }

    /// Returns the number of bytes occupied by the local cache.
    pub fn allocated_memory(&self) -> usize {
        self.cache.lock().unwrap().allocated_memory()
    }

    /// Returns the maximal number of bytes the local cache may occupy (0 means unlimited).
    pub fn max_memory(&self) -> usize {
        self.cache.lock().unwrap().max_memory()
    }

    /// Changes the memory limit of the local cache.
    ///
    /// If the limit shrinks, the least recently used entries are evicted immediately.
    pub fn set_max_memory(&self, max_memory: usize) {
        let mut cache = self.cache.lock().unwrap();
        if cache.max_memory() == max_memory {
            return;
        }

        let entries = cache.len();
        cache.set_max_memory(max_memory);

        let evicted = entries - cache.len();
        if evicted > 0 {
            log::info!(
                "Evicted {} entries of group '{}' to fit into its new memory limit.",
                evicted,
                self.name
            );
        }
    }
}

#[cfg(test)]
mod tests {
    use crate::byteview::ByteView;
    use crate::error::{CacheError, CacheResult};
    use crate::group::{Group, LoaderFn};
    use crate::peers::{ClientFn, PeerClient, RouterFn};
    use crate::testing::test_async;
    use hyper::StatusCode;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;
    use std::time::Duration;

    /// Creates a group whose loader echoes the key and counts its invocations.
    fn counting_group(calls: Arc<AtomicUsize>) -> Arc<Group> {
        Arc::new(Group::new(
            "test",
            1024,
            LoaderFn(move |key: String| {
                let _ = calls.fetch_add(1, Ordering::SeqCst);
                async move { Ok(format!("value-of-{}", key).into_bytes()) }
            }),
        ))
    }

    async fn fetch_remotely(group: String, key: String) -> CacheResult<ByteView> {
        Ok(ByteView::from(format!("remote-{}-{}", group, key)))
    }

    async fn fail_remotely(group: String, key: String) -> CacheResult<ByteView> {
        Err(CacheError::PeerStatus {
            url: format!("http://broken/api/{}/{}", group, key),
            status: StatusCode::SERVICE_UNAVAILABLE,
        })
    }

    /// Routes every key to ourselves.
    fn route_locally(_key: &str) -> Option<Arc<dyn PeerClient>> {
        None
    }

    #[test]
    fn cached_values_do_not_hit_the_loader_again() {
        test_async(async {
            let calls = Arc::new(AtomicUsize::new(0));
            let group = counting_group(calls.clone());

            assert_eq!(group.get("a").await.unwrap().to_string(), "value-of-a");
            assert_eq!(group.is_cached("a"), true);
            assert_eq!(group.get("a").await.unwrap().to_string(), "value-of-a");

            assert_eq!(calls.load(Ordering::SeqCst), 1);
            assert_eq!(group.stats().gets(), 2);
            assert_eq!(group.stats().cache_hits(), 1);
            assert_eq!(group.stats().local_loads(), 1);
        });
    }

    #[test]
    fn loader_errors_are_passed_on_and_not_cached() {
        test_async(async {
            let calls = Arc::new(AtomicUsize::new(0));
            let calls_clone = calls.clone();
            let group = Group::new(
                "test",
                1024,
                LoaderFn(move |_key: String| {
                    let _ = calls_clone.fetch_add(1, Ordering::SeqCst);
                    async move { Err(anyhow::anyhow!("database is down")) }
                }),
            );

            for _ in 0..2 {
                let error = group.get("a").await.unwrap_err();
                assert!(matches!(error, CacheError::Upstream(_)));
                assert_eq!(error.to_string(), "database is down");
            }

            // As nothing was cached, each lookup invoked the loader...
            assert_eq!(calls.load(Ordering::SeqCst), 2);
            assert_eq!(group.is_cached("a"), false);
            assert_eq!(group.stats().local_load_errs(), 2);
        });
    }

    #[test]
    fn empty_keys_are_rejected() {
        test_async(async {
            let calls = Arc::new(AtomicUsize::new(0));
            let group = counting_group(calls.clone());

            assert!(matches!(
                group.get("").await,
                Err(CacheError::InvalidArgument(_))
            ));
            assert_eq!(calls.load(Ordering::SeqCst), 0);
        });
    }

    #[test]
    fn concurrent_misses_load_only_once() {
        test_async(async {
            let calls = Arc::new(AtomicUsize::new(0));
            let calls_clone = calls.clone();
            let group = Arc::new(Group::new(
                "test",
                1024,
                LoaderFn(move |key: String| {
                    let _ = calls_clone.fetch_add(1, Ordering::SeqCst);
                    async move {
                        tokio::time::sleep(Duration::from_millis(100)).await;
                        Ok(key.into_bytes())
                    }
                }),
            ));

            let mut tasks = Vec::new();
            for _ in 0..8 {
                let group = group.clone();
                tasks.push(tokio::spawn(async move { group.get("slow").await }));
            }

            for result in futures::future::join_all(tasks).await {
                assert_eq!(result.unwrap().unwrap().to_string(), "slow");
            }

            assert_eq!(calls.load(Ordering::SeqCst), 1);
            assert_eq!(group.stats().loads(), 8);
            assert_eq!(group.stats().loads_deduped(), 7);
        });
    }

    #[test]
    fn values_of_remote_owners_are_not_cached_locally() {
        test_async(async {
            let calls = Arc::new(AtomicUsize::new(0));
            let group = counting_group(calls.clone());

            let remote: Arc<dyn PeerClient> = Arc::new(ClientFn(fetch_remotely));
            group.register_router(Arc::new(RouterFn(move |_key: &str| Some(remote.clone()))));

            for _ in 0..2 {
                assert_eq!(group.get("a").await.unwrap().to_string(), "remote-test-a");
            }

            assert_eq!(group.is_cached("a"), false);
            assert_eq!(calls.load(Ordering::SeqCst), 0);
            assert_eq!(group.stats().peer_loads(), 2);
        });
    }

    #[test]
    fn failing_peers_fall_back_to_the_loader() {
        test_async(async {
            let calls = Arc::new(AtomicUsize::new(0));
            let group = counting_group(calls.clone());

            let broken: Arc<dyn PeerClient> = Arc::new(ClientFn(fail_remotely));
            group.register_router(Arc::new(RouterFn(move |_key: &str| Some(broken.clone()))));

            assert_eq!(group.get("a").await.unwrap().to_string(), "value-of-a");
            assert_eq!(group.is_cached("a"), true);
            assert_eq!(calls.load(Ordering::SeqCst), 1);
            assert_eq!(group.stats().peer_errors(), 1);
        });
    }

    #[test]
    fn keys_owned_by_ourselves_are_loaded_locally() {
        test_async(async {
            let calls = Arc::new(AtomicUsize::new(0));
            let group = counting_group(calls.clone());
            group.register_router(Arc::new(RouterFn(route_locally)));

            assert_eq!(group.get("a").await.unwrap().to_string(), "value-of-a");
            assert_eq!(group.is_cached("a"), true);
            assert_eq!(group.stats().peer_loads(), 0);
        });
    }

    #[test]
    #[should_panic]
    fn registering_a_second_router_panics() {
        let group = counting_group(Arc::new(AtomicUsize::new(0)));
        group.register_router(Arc::new(RouterFn(route_locally)));
        group.register_router(Arc::new(RouterFn(route_locally)));
    }

    #[test]
    fn shrinking_the_memory_limit_evicts_entries() {
        test_async(async {
            let group = counting_group(Arc::new(AtomicUsize::new(0)));

            // Each entry occupies 1 + 10 bytes...
            for key in ["a", "b", "c"] {
                let _ = group.get(key).await.unwrap();
            }
            assert_eq!(group.cached_entries(), 3);
            assert_eq!(group.allocated_memory(), 33);

            group.set_max_memory(22);
            assert_eq!(group.max_memory(), 22);
            assert_eq!(group.cached_entries(), 2);
            assert_eq!(group.is_cached("a"), false);

            assert_eq!(group.evict("b"), true);
            assert_eq!(group.evict("b"), false);
            assert_eq!(group.cached_entries(), 1);
        });
    }
}
