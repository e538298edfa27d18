//! peercache is an embeddable, distributed read-through cache.
//!
//! # Introduction
//! Applications which front an expensive backend (a database, a remote API or a costly
//! computation) with many concurrent readers on many machines usually suffer from two problems:
//! each machine keeps its own copy of the hot data (**memory bloat**) and a popular key which
//! expires or is missing makes all readers hit the backend at once (**cache stampede**).
//!
//! **peercache** tackles both. Each process holds a size constrained local cache. On a miss it
//! determines which process of the cluster *owns* the key (using consistent hashing) and asks
//! this peer for the value. Only the owner invokes the backend and caches the result, therefore
//! each value is loaded and kept once per cluster. Within a process, concurrent misses for the
//! same key are coalesced into a single load.
//!
//! # Features
//! * **Bounded memory** - each [Group](group::Group) keeps its values in an
//!   [LRU cache](lru::LRUCache) with a fixed byte budget.
//! * **Consistent hashing** - the [HashRing](consistenthash::HashRing) places each peer several
//!   times on a ring, so that keys are evenly spread and adding a peer only moves a small share
//!   of them.
//! * **Single flight** - concurrent misses are coalesced by a [Flight](singleflight::Flight).
//! * **100% Async/Await** - the whole library builds upon [tokio](https://tokio.rs/) and
//!   [hyper](https://hyper.rs/).
//! * **Reload-aware config** - changed peers or memory limits are picked up without a restart,
//!   as a restart would drop all cached values.
//!
//! # Modules
//! * **Core**: [byteview], [lru], [consistenthash], [singleflight], [peers] and [group] contain
//!   the lookup engine, which doesn't depend on any transport.
//! * **Transport**: [http] provides the [PeerPool](http::PeerPool) which routes keys to their
//!   owners and answers peer requests, [server] runs the HTTP server.
//! * **Bootstrapping**: [builder], [node], [config] and [signals] set up a ready to run node.
//!
//! # Examples
//! A short example on how to set up a node can be found here [Builder](builder::Builder). A
//! complete node is provided by **peercache-io**.
#![deny(
    warnings,
    missing_docs,
    trivial_casts,
    trivial_numeric_casts,
    unused_extern_crates,
    unused_import_braces,
    unused_results
)]
use simplelog::{format_description, ConfigBuilder, LevelFilter, SimpleLogger};
use std::sync::Once;

pub mod builder;
pub mod byteview;
pub mod config;
pub mod consistenthash;
pub mod error;
pub mod group;
pub mod http;
pub mod lru;
pub mod node;
pub mod peers;
pub mod registry;
pub mod server;
pub mod signals;
pub mod singleflight;

/// Contains the version of the peercache library.
pub const PEERCACHE_VERSION: &str = "DEVELOPMENT-SNAPSHOT";

/// Contains the git commit hash of the peercache build being used.
pub const PEERCACHE_REVISION: &str = "NO-REVISION";

/// Initializes the logging system.
///
/// Note that most probably the simplest way is to use a [Builder](builder::Builder) to set up the
/// node, which will also set up logging if enabled.
pub fn init_logging() {
    static INIT_LOGGING: Once = Once::new();

    // We need to do this as otherwise the integration tests might crash as the logging system
    // is initialized several times...
    INIT_LOGGING.call_once(|| {
        if let Err(error) = SimpleLogger::init(
            LevelFilter::Debug,
            ConfigBuilder::new()
                .set_time_format_custom(format_description!(
                    "[year]-[month]-[day]T[hour]:[minute]:[second].[subsecond digits:3]"
                ))
                .set_thread_level(LevelFilter::Trace)
                .set_target_level(LevelFilter::Error)
                .set_location_level(LevelFilter::Trace)
                .build(),
        ) {
            panic!("Failed to initialize logging system: {}", error);
        }
    });
}

/// Provides a simple macro to execute an async lambda within `tokio::spawn`.
///
/// Note that this also applies std::mem::drop on the returned handle to make
/// clippy happy.
///
/// # Example
/// ```rust
/// # #[macro_use] extern crate peercache;
/// # #[tokio::main]
/// # async fn main() {
/// spawn!(async move {
///     // perform some async stuff here...
/// });
/// # }
/// ```
#[macro_export]
macro_rules! spawn {
    ($e:expr) => {{
        std::mem::drop(tokio::spawn($e));
    }};
}
