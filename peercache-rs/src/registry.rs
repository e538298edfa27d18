//! Provides the table of all groups known to a node.
//!
//! The registry maps the name of a group to the [Group] itself and is used by the
//! [PeerPool](crate::http::PeerPool) to resolve incoming peer requests. It is read on every
//! request but only written when a group is created, therefore it is guarded by a **RwLock**.
//!
//! Also this keeps the central **is_running** flag which is toggled to *false* once
//! [Registry::terminate](Registry::terminate) is invoked. All background tasks (config monitor,
//! HTTP server) check this flag and stop once the registry is terminated.
//!
//! # Examples
//!
//! ```
//! # use peercache::group::LoaderFn;
//! # use peercache::registry::Registry;
//! let registry = Registry::new();
//!
//! // Creates and registers a new group...
//! let _ = registry.new_group("scores", 0, LoaderFn(|key: String| async move { Ok(key.into_bytes()) }));
//!
//! // A known group can be looked up...
//! assert_eq!(registry.group("scores").unwrap().name(), "scores");
//!
//! // ...whereas an unknown one yields None.
//! assert_eq!(registry.group("unknown").is_none(), true);
//!
//! // By default the registry is running...
//! assert_eq!(registry.is_running(), true);
//!
//! // Once terminated...
//! registry.terminate();
//! // all groups are immediately released...
//! assert_eq!(registry.group("scores").is_none(), true);
//!
//! // and the registry is no longer considered active...
//! assert_eq!(registry.is_running(), false);
//! ```
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, RwLock};

use crate::group::{Group, Loader};

/// Keeps all groups of a node in a single place.
pub struct Registry {
    groups: RwLock<HashMap<String, Arc<Group>>>,
    is_running: AtomicBool,
}

impl Registry {
    /// Creates a new and empty registry.
    pub fn new() -> Arc<Self> {
        Arc::new(Registry {
            groups: RwLock::new(HashMap::new()),
            is_running: AtomicBool::new(true),
        })
    }

    /// Creates a new group and registers it under the given name.
    ///
    /// The local cache of the group may occupy up to **max_memory** bytes (0 means unlimited).
    /// If a group with the same name already exists, it is replaced by the new one. Note that
    /// callers which still hold a reference to the old group can continue to use it, but it is
    /// no longer reachable for peers.
    pub fn new_group(
        &self,
        name: &str,
        max_memory: usize,
        loader: impl Loader + 'static,
    ) -> Arc<Group> {
        let group = Arc::new(Group::new(name, max_memory, loader));
        let previous = self
            .groups
            .write()
            .unwrap()
            .insert(name.to_owned(), group.clone());

        if previous.is_some() {
            log::warn!("Group '{}' has been replaced by a new instance.", name);
        } else {
            log::debug!("Registered group '{}'.", name);
        }

        group
    }

    /// Tries to resolve the group with the given name.
    pub fn group(&self, name: &str) -> Option<Arc<Group>> {
        self.groups.read().unwrap().get(name).cloned()
    }

    /// Returns the names of all known groups in alphabetical order.
    pub fn group_names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.groups.read().unwrap().keys().cloned().collect();
        names.sort();
        names
    }

    /// Determines if the registry is still running or if [Registry::terminate](Registry::terminate)
    /// has already been called.
    pub fn is_running(&self) -> bool {
        self.is_running.load(Ordering::Acquire)
    }

    /// Terminates the registry.
    ///
    /// This will immediately release all groups and toggle the
    /// [is_running()](Registry::is_running) flag to **false**.
    pub fn terminate(&self) {
        self.groups.write().unwrap().clear();
        self.is_running.store(false, Ordering::Release);
    }
}

#[cfg(test)]
mod tests {
    use crate::group::LoaderFn;
    use crate::registry::Registry;
    use crate::testing::test_async;

    #[test]
    fn the_last_registration_wins() {
        test_async(async {
            let registry = Registry::new();
            let _ = registry.new_group(
                "scores",
                0,
                LoaderFn(|_key: String| async move { Ok(b"first".to_vec()) }),
            );
            let _ = registry.new_group(
                "scores",
                0,
                LoaderFn(|_key: String| async move { Ok(b"second".to_vec()) }),
            );
            let _ = registry.new_group(
                "names",
                0,
                LoaderFn(|key: String| async move { Ok(key.into_bytes()) }),
            );

            let group = registry.group("scores").unwrap();
            assert_eq!(group.get("x").await.unwrap().to_string(), "second");
            assert_eq!(registry.group_names(), vec!["names", "scores"]);
        });
    }
}
