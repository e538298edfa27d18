//! Bundles all components which make up a cache node.
//!
//! A [Node] is usually created by the [Builder](crate::builder::Builder). It consists of the
//! [Registry] of groups, the optional [Config], the [PeerPool] which routes keys to their owners
//! and the optional HTTP [Server] which answers requests of other peers.
//!
//! Groups created via [Node::new_group] pick up their memory limit from the config and use the
//! pool of the node as router. If a config is present, the node also listens for changes of it:
//! a changed list of **cluster.peers** is applied to the pool and a changed **max_memory** is
//! applied to the respective group, without restarting the node.
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::broadcast::error::RecvError;

use crate::config::{format_size, Config, Settings};
use crate::group::{Group, Loader};
use crate::http::PeerPool;
use crate::registry::Registry;
use crate::server::Server;

/// Represents a cache node.
pub struct Node {
    registry: Arc<Registry>,
    config: Option<Arc<Config>>,
    pool: Arc<PeerPool>,
    server: Option<Arc<Server>>,
}

impl Node {
    /// Assembles a node from the given registry and config.
    ///
    /// The pool is set up using the **cluster** settings. If **enable_server** is true, a
    /// [Server] is created as well (but not started).
    ///
    /// Note that this is called by the [Builder](crate::builder::Builder). As it spawns a task
    /// which listens for config changes, it has to be invoked within a tokio runtime.
    pub fn install(
        registry: Arc<Registry>,
        config: Option<Arc<Config>>,
        enable_server: bool,
    ) -> Arc<Self> {
        let settings = match &config {
            Some(config) => (*config.current()).clone(),
            None => Settings::default(),
        };

        let pool = PeerPool::new(
            registry.clone(),
            &settings.self_url,
            &settings.base_path,
            settings.replicas,
        );
        if !settings.peers.is_empty() {
            pool.configure(&settings.peers);
        }

        let server = if enable_server {
            Some(Server::new(registry.clone(), config.clone(), pool.clone()))
        } else {
            None
        };

        if let Some(config) = &config {
            run_config_applier(registry.clone(), pool.clone(), config.clone(), settings.peers);
        }

        Arc::new(Node {
            registry,
            config,
            pool,
            server,
        })
    }

    /// Creates a new group which is routed via the pool of this node.
    ///
    /// The memory limit is taken from **groups.NAME.max_memory** (64 MiB if absent).
    pub fn new_group(&self, name: &str, loader: impl Loader + 'static) -> Arc<Group> {
        let max_memory = match &self.config {
            Some(config) => config.current().max_memory(name),
            None => Settings::default().max_memory(name),
        };

        let group = self.registry.new_group(name, max_memory, loader);
        group.register_router(self.pool.clone());
        log::info!(
            "Created group '{}' (max memory: {}).",
            name,
            if max_memory == 0 {
                "unlimited".to_owned()
            } else {
                format_size(max_memory)
            }
        );

        group
    }

    /// Provides the registry which contains all groups of this node.
    pub fn registry(&self) -> &Arc<Registry> {
        &self.registry
    }

    /// Provides the config if it has been enabled.
    pub fn config(&self) -> Option<&Arc<Config>> {
        self.config.as_ref()
    }

    /// Provides the pool which knows all peers of the cluster.
    pub fn pool(&self) -> &Arc<PeerPool> {
        &self.pool
    }

    /// Provides the HTTP server if it has been enabled.
    pub fn server(&self) -> Option<&Arc<Server>> {
        self.server.as_ref()
    }

    /// Terminates the node by terminating its registry.
    pub fn terminate(&self) {
        self.registry.terminate();
    }
}

/// Applies changed peers and memory limits once the config changes.
fn run_config_applier(
    registry: Arc<Registry>,
    pool: Arc<PeerPool>,
    config: Arc<Config>,
    mut peers: Vec<String>,
) {
    let mut notifier = config.notifier();
    crate::spawn!(async move {
        while registry.is_running() {
            // We use a timeout here so that the while condition is checked every once in a
            // while...
            match tokio::time::timeout(Duration::from_millis(500), notifier.recv()).await {
                Ok(Err(RecvError::Closed)) => return,
                Ok(_) => {
                    let settings = config.current();
                    if settings.peers != peers {
                        pool.configure(&settings.peers);
                        peers = settings.peers.clone();
                    }

                    for name in registry.group_names() {
                        if let Some(group) = registry.group(&name) {
                            group.set_max_memory(settings.max_memory(&name));
                        }
                    }
                }
                Err(_) => (),
            }
        }
    });
}

#[cfg(test)]
mod tests {
    use crate::config::Config;
    use crate::group::LoaderFn;
    use crate::node::Node;
    use crate::registry::Registry;
    use crate::server::Server;
    use crate::testing::{test_async, SHARED_TEST_RESOURCES};
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;
    use std::time::Duration;

    /// Starts a node on the given port which knows the given peers and provides a group "scores".
    ///
    /// The values of the group are prefixed with the given name so that we can tell which node
    /// actually loaded them. Node "a" fails to load any key starting with "broken".
    async fn start_node(
        name: &'static str,
        port: u16,
        peers: &[u16],
    ) -> (Arc<Node>, Arc<AtomicUsize>) {
        let mut settings = format!(
            "server:\n    host: 127.0.0.1\n    port: {}\ncluster:\n    self: http://127.0.0.1:{}\n    peers:\n",
            port, port
        );
        for peer in peers {
            settings.push_str(&format!("        - http://127.0.0.1:{}\n", peer));
        }

        let config = Arc::new(Config::new("unused.yml"));
        config.load_from_string(&settings, None).unwrap();

        let node = Node::install(Registry::new(), Some(config), true);
        let loads = Arc::new(AtomicUsize::new(0));
        let loads_clone = loads.clone();
        let _ = node.new_group(
            "scores",
            LoaderFn(move |key: String| {
                let _ = loads_clone.fetch_add(1, Ordering::SeqCst);
                async move {
                    if name == "a" && key.starts_with("broken") {
                        Err(anyhow::anyhow!("Cannot load {}", key))
                    } else {
                        Ok(format!("{}:{}", name, key).into_bytes())
                    }
                }
            }),
        );

        Server::fork_and_await(node.server().unwrap()).await;

        (node, loads)
    }

    /// Finds a key with the given prefix which is owned by the given peer.
    fn key_owned_by(node: &Node, owner: &str, prefix: &str) -> String {
        (0..)
            .map(|i| format!("{}-{}", prefix, i))
            .find(|key| node.pool().owner(key).as_deref() == Some(owner))
            .unwrap()
    }

    #[test]
    fn values_are_loaded_by_their_owner_only() {
        // We want exclusive access to the test ports...
        let _guard = SHARED_TEST_RESOURCES.lock().unwrap();

        test_async(async {
            let (node_a, loads_a) = start_node("a", 1503, &[1503, 1504]).await;
            let (node_b, loads_b) = start_node("b", 1504, &[1503, 1504]).await;

            let key = key_owned_by(&node_b, "http://127.0.0.1:1503", "player");
            let scores_a = node_a.registry().group("scores").unwrap();
            let scores_b = node_b.registry().group("scores").unwrap();

            // B isn't the owner and therefore asks A, which loads and caches the value...
            for _ in 0..2 {
                let value = scores_b.get(&key).await.unwrap();
                assert_eq!(value.to_string(), format!("a:{}", key));
            }
            assert_eq!(scores_b.is_cached(&key), false);
            assert_eq!(scores_b.stats().peer_loads(), 2);
            assert_eq!(loads_b.load(Ordering::SeqCst), 0);

            assert_eq!(scores_a.is_cached(&key), true);
            assert_eq!(scores_a.stats().server_requests(), 2);
            assert_eq!(loads_a.load(Ordering::SeqCst), 1);

            // A serves the value from its own cache...
            assert_eq!(
                scores_a.get(&key).await.unwrap().to_string(),
                format!("a:{}", key)
            );
            assert_eq!(loads_a.load(Ordering::SeqCst), 1);

            node_a.terminate();
            node_b.terminate();
        });
    }

    #[test]
    fn unreachable_owners_are_bypassed() {
        // We want exclusive access to the test ports...
        let _guard = SHARED_TEST_RESOURCES.lock().unwrap();

        test_async(async {
            // 1505 is part of the cluster but no node is running there...
            let (node, loads) = start_node("b", 1504, &[1504, 1505]).await;
            let key = key_owned_by(&node, "http://127.0.0.1:1505", "player");
            let scores = node.registry().group("scores").unwrap();

            assert_eq!(
                scores.get(&key).await.unwrap().to_string(),
                format!("b:{}", key)
            );
            assert_eq!(scores.is_cached(&key), true);
            assert_eq!(scores.stats().peer_errors(), 1);
            assert_eq!(loads.load(Ordering::SeqCst), 1);

            node.terminate();
        });
    }

    #[test]
    fn failing_owners_are_bypassed() {
        // We want exclusive access to the test ports...
        let _guard = SHARED_TEST_RESOURCES.lock().unwrap();

        test_async(async {
            let (node_a, loads_a) = start_node("a", 1503, &[1503, 1504]).await;
            let (node_b, loads_b) = start_node("b", 1504, &[1503, 1504]).await;

            let key = key_owned_by(&node_b, "http://127.0.0.1:1503", "broken");
            let scores_a = node_a.registry().group("scores").unwrap();
            let scores_b = node_b.registry().group("scores").unwrap();

            // A responds with a 500 so that B loads the value itself...
            assert_eq!(
                scores_b.get(&key).await.unwrap().to_string(),
                format!("b:{}", key)
            );
            assert_eq!(scores_b.stats().peer_errors(), 1);
            assert_eq!(scores_b.stats().peer_loads(), 0);
            assert_eq!(scores_b.is_cached(&key), true);
            assert_eq!(loads_b.load(Ordering::SeqCst), 1);

            assert_eq!(scores_a.is_cached(&key), false);
            assert_eq!(scores_a.stats().local_load_errs(), 1);
            assert_eq!(loads_a.load(Ordering::SeqCst), 1);

            node_a.terminate();
            node_b.terminate();
        });
    }

    #[test]
    fn escaped_groups_and_keys_are_fetched_from_their_owner() {
        // We want exclusive access to the test ports...
        let _guard = SHARED_TEST_RESOURCES.lock().unwrap();

        test_async(async {
            let (node_a, _) = start_node("a", 1503, &[1503, 1504]).await;
            let (node_b, _) = start_node("b", 1504, &[1503, 1504]).await;
            for node in [&node_a, &node_b] {
                let _ = node.new_group(
                    "top scores",
                    LoaderFn(|key: String| async move { Ok(format!("top:{}", key).into_bytes()) }),
                );
            }

            let key = key_owned_by(&node_b, "http://127.0.0.1:1503", "a b/c+d%");
            let top_a = node_a.registry().group("top scores").unwrap();
            let top_b = node_b.registry().group("top scores").unwrap();

            assert_eq!(
                top_b.get(&key).await.unwrap().to_string(),
                format!("top:{}", key)
            );
            assert_eq!(top_b.stats().peer_loads(), 1);
            assert_eq!(top_b.stats().peer_errors(), 0);
            assert_eq!(top_b.is_cached(&key), false);

            // A received the very same key and cached it...
            assert_eq!(top_a.stats().server_requests(), 1);
            assert_eq!(top_a.is_cached(&key), true);

            node_a.terminate();
            node_b.terminate();
        });
    }

    #[test]
    fn config_changes_are_applied() {
        test_async(async {
            let config = Arc::new(Config::new("unused.yml"));
            config
                .load_from_string("groups:\n    scores:\n        max_memory: 1k", None)
                .unwrap();

            let node = Node::install(Registry::new(), Some(config.clone()), false);
            assert_eq!(node.server().is_none(), true);
            assert_eq!(node.pool().peers().is_empty(), true);

            let scores = node.new_group(
                "scores",
                LoaderFn(|key: String| async move { Ok(key.into_bytes()) }),
            );
            assert_eq!(scores.max_memory(), 1024);

            config
                .load_from_string(
                    "cluster:\n    peers:\n        - http://10.0.0.1:8001\ngroups:\n    scores:\n        max_memory: 2k",
                    None,
                )
                .unwrap();

            // The change is applied asynchronously...
            while scores.max_memory() != 2048 {
                tokio::time::sleep(Duration::from_millis(10)).await;
            }
            assert_eq!(node.pool().peers(), vec!["http://10.0.0.1:8001"]);

            node.terminate();
        });
    }
}
