//! Provides a builder which can be used to setup and initialize a cache node.
//!
//! As some parts of a node are optional, a builder permits to selectively enable or disable them.
//!
//! # Example
//! Setting up a node with all features enabled:
//! ```no_run
//! # use peercache::builder::Builder;
//! # use peercache::group::LoaderFn;
//! #[tokio::main]
//! async fn main() {
//!     // Enable all features and build the node...
//!     let node = Builder::new().enable_all().build().await;
//!
//!     // Register custom groups here...
//!     let _ = node.new_group("greetings", LoaderFn(|key: String| async move {
//!         Ok(format!("Hello {}", key).into_bytes())
//!     }));
//!
//!     // Start the main event loop of the server...
//!     node.server().unwrap().event_loop().await;
//! }
//! ```
use std::sync::Arc;

use crate::node::Node;
use crate::registry::Registry;
use crate::{init_logging, PEERCACHE_REVISION, PEERCACHE_VERSION};

/// Initializes a node by creating and initializing all of its components.
#[derive(Default)]
pub struct Builder {
    setup_logging: bool,
    enable_signals: bool,
    setup_config: bool,
    setup_server: bool,
}

impl Builder {
    /// Creates a new builder.
    pub fn new() -> Self {
        Builder {
            setup_logging: false,
            enable_signals: false,
            setup_config: false,
            setup_server: false,
        }
    }

    /// Enables all features.
    ///
    /// Note that using this method (and then maybe disabling selected components) is quite
    /// convenient, but be aware that new components which might be added in a library update
    /// will then also be enabled by default. This might or might not be the expected behaviour.
    pub fn enable_all(mut self) -> Self {
        self.setup_logging = true;
        self.enable_signals = true;
        self.setup_config = true;
        self.setup_server = true;

        self
    }

    /// Enables the automatic setup of the logging system.
    ///
    /// Using this, we properly initialize **simplelog** to log to stdout.
    pub fn enable_logging(mut self) -> Self {
        self.setup_logging = true;
        self
    }

    /// Disables the automatic setup of the logging system after [enable_all()](Builder::enable_all)
    /// has been used.
    pub fn disable_logging(mut self) -> Self {
        self.setup_logging = false;
        self
    }

    /// Installs a signal listener which terminates the node once **CTRL-C** or **SIGHUP**
    /// is received.
    ///
    /// For more details see: [signals](crate::signals)
    pub fn enable_signals(mut self) -> Self {
        self.enable_signals = true;
        self
    }

    /// Disables installing the signal listener after [enable_all()](Builder::enable_all)
    /// has been used.
    pub fn disable_signals(mut self) -> Self {
        self.enable_signals = false;
        self
    }

    /// Installs [config::Config](crate::config::Config) and loads the **settings.yml**.
    ///
    /// For more details see: [config](crate::config)
    pub fn enable_config(mut self) -> Self {
        self.setup_config = true;
        self
    }

    /// Disables setting up a **Config** instance after [enable_all()](Builder::enable_all)
    /// has been used.
    pub fn disable_config(mut self) -> Self {
        self.setup_config = false;
        self
    }

    /// Creates a [Server](crate::server::Server) instance.
    ///
    /// Note that still, the main event loop has to be invoked manually via:
    /// `node.server().unwrap().event_loop().await`.
    pub fn enable_server(mut self) -> Self {
        self.setup_server = true;
        self
    }

    /// Disables setting up a **Server** instance after [enable_all()](Builder::enable_all)
    /// has been used.
    pub fn disable_server(mut self) -> Self {
        self.setup_server = false;
        self
    }

    /// Builds the [Node](crate::node::Node) with all the enabled components.
    pub async fn build(self) -> Arc<Node> {
        let registry = Registry::new();

        if self.setup_logging {
            init_logging();
        }

        log::info!(
            "||. PEERCACHE (v {} - rev {}) running on {} core(s) in {} CPU(s)",
            PEERCACHE_VERSION,
            PEERCACHE_REVISION,
            num_cpus::get(),
            num_cpus::get_physical()
        );

        if self.enable_signals {
            crate::signals::install(registry.clone());
        }

        let config = if self.setup_config {
            Some(crate::config::install(registry.clone()).await)
        } else {
            None
        };

        Node::install(registry, config, self.setup_server)
    }
}

#[cfg(test)]
mod tests {
    use crate::builder::Builder;
    use crate::group::LoaderFn;
    use crate::testing::test_async;

    #[test]
    fn a_minimal_node_can_be_built() {
        test_async(async {
            let node = Builder::new()
                .enable_all()
                .disable_config()
                .disable_signals()
                .disable_server()
                .build()
                .await;
            assert_eq!(node.config().is_none(), true);
            assert_eq!(node.server().is_none(), true);
            assert_eq!(node.pool().self_url(), "http://localhost:8001");

            let group = node.new_group(
                "greetings",
                LoaderFn(|key: String| async move { Ok(format!("Hello {}", key).into_bytes()) }),
            );
            assert_eq!(group.max_memory(), 64 * 1024 * 1024);
            assert_eq!(group.get("World").await.unwrap().to_string(), "Hello World");
            assert_eq!(node.registry().group_names(), vec!["greetings"]);
        });
    }
}
