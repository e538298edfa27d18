//! Defines the capabilities a [Group](crate::group::Group) uses to talk to other nodes.
//!
//! A [PeerRouter] decides which node owns a key. If this is a remote node, it hands out a
//! [PeerClient] which can fetch the value from there. The HTTP based implementation of both is
//! the [PeerPool](crate::http::PeerPool). For tests or custom transports, both capabilities can
//! also be provided as plain closures via [RouterFn] and [ClientFn].
//!
//! # Examples
//! ```
//! # use peercache::peers::{ClientFn, PeerClient, PeerRouter, RouterFn};
//! # use peercache::byteview::ByteView;
//! # use peercache::error::CacheResult;
//! # use std::sync::Arc;
//! async fn fetch(group: String, key: String) -> CacheResult<ByteView> {
//!     Ok(ByteView::from(format!("{}/{}", group, key)))
//! }
//!
//! # #[tokio::main]
//! # async fn main() {
//! let remote: Arc<dyn PeerClient> = Arc::new(ClientFn(fetch));
//!
//! // Routes all keys starting with "r" to the remote peer and everything else to ourselves...
//! let router = RouterFn(move |key: &str| {
//!     if key.starts_with('r') {
//!         Some(remote.clone())
//!     } else {
//!         None
//!     }
//! });
//!
//! assert_eq!(router.route("local").is_none(), true);
//! let peer = router.route("remote").unwrap();
//! assert_eq!(peer.fetch("scores", "remote").await.unwrap().to_string(), "scores/remote");
//! # }
//! ```
use std::future::Future;
use std::sync::Arc;

use crate::byteview::ByteView;
use crate::error::CacheResult;

/// Fetches values from a remote peer.
#[async_trait::async_trait]
pub trait PeerClient: Send + Sync {
    /// Fetches the value of **key** within the group **group** from the remote peer.
    async fn fetch(&self, group: &str, key: &str) -> CacheResult<ByteView>;
}

/// Determines the owner of a key.
pub trait PeerRouter: Send + Sync {
    /// Returns the client of the remote peer which owns the given key.
    ///
    /// Returns **None** if the key is owned by the local node or if no peers are known at all.
    fn route(&self, key: &str) -> Option<Arc<dyn PeerClient>>;
}

/// Adapts a closure so that it can be used as [PeerRouter].
pub struct RouterFn<F>(pub F);

impl<F> PeerRouter for RouterFn<F>
where
    F: Fn(&str) -> Option<Arc<dyn PeerClient>> + Send + Sync,
{
    fn route(&self, key: &str) -> Option<Arc<dyn PeerClient>> {
        (self.0)(key)
    }
}

/// Adapts an async closure which receives the group and key so that it can be used as
/// [PeerClient].
pub struct ClientFn<F>(pub F);

#[async_trait::async_trait]
impl<F, Fut> PeerClient for ClientFn<F>
where
    F: Fn(String, String) -> Fut + Send + Sync,
    Fut: Future<Output = CacheResult<ByteView>> + Send + 'static,
{
    async fn fetch(&self, group: &str, key: &str) -> CacheResult<ByteView> {
        (self.0)(group.to_owned(), key.to_owned()).await
    }
}
