//! Provides the HTTP transport which connects the nodes of a cluster.
//!
//! The [PeerPool] knows all peers of the cluster (including the local node itself). It uses a
//! [HashRing](crate::consistenthash::HashRing) to determine which peer owns a key and therefore
//! acts as [PeerRouter](crate::peers::PeerRouter) for the groups of a node. For each remote peer,
//! an [HttpPeer] is kept, which fetches values via plain HTTP requests.
//!
//! The wire protocol is as simple as it gets: a value is requested via
//! `GET <base_path><group>/<key>` where both, the group name and the key are URL encoded. The
//! owner responds with **200 OK** and the raw bytes of the value as body (using
//! `application/octet-stream` as content type). Errors are reported as plain text along with
//! **400** (malformed path), **404** (unknown group) or **500** (the value couldn't be loaded).
//!
//! The set of peers can be changed at any time using [PeerPool::configure]. This always replaces
//! the whole ring, so that concurrent lookups either see the old or the new set of peers.
use std::collections::HashMap;
use std::sync::Arc;

use arc_swap::ArcSwap;
use hyper::client::HttpConnector;
use hyper::header::{HeaderValue, CONTENT_TYPE};
use hyper::{Body, Client, Request, Response, StatusCode, Uri};
use hyper_tls::HttpsConnector;

use crate::byteview::ByteView;
use crate::consistenthash::HashRing;
use crate::error::{CacheError, CacheResult};
use crate::group::Group;
use crate::peers::{PeerClient, PeerRouter};
use crate::registry::Registry;

/// Specifies the path prefix under which the peer protocol is served by default.
pub const DEFAULT_BASE_PATH: &str = "/api/";

/// Fetches values from a remote peer via HTTP.
pub struct HttpPeer {
    base_url: String,
    client: Client<HttpsConnector<HttpConnector>, Body>,
}

impl HttpPeer {
    /// Creates a client which sends its requests to the given base url.
    ///
    /// The url is expected to already contain the base path of the peer protocol (e.g.
    /// `http://10.0.0.1:8001/api/`).
    pub fn new(base_url: String) -> Self {
        HttpPeer {
            base_url,
            client: Client::builder().build::<_, Body>(HttpsConnector::new()),
        }
    }

    /// Returns the url which is used as prefix for all requests.
    pub fn base_url(&self) -> &str {
        &self.base_url
    }
}

#[async_trait::async_trait]
impl PeerClient for HttpPeer {
    async fn fetch(&self, group: &str, key: &str) -> CacheResult<ByteView> {
        let url = format!(
            "{}{}/{}",
            self.base_url,
            urlencoding::encode(group),
            urlencoding::encode(key)
        );
        let uri = url.parse::<Uri>().map_err(|error| CacheError::PeerUrl {
            url: url.clone(),
            source: Arc::new(error),
        })?;

        let response = self
            .client
            .get(uri)
            .await
            .map_err(|error| CacheError::PeerRequest {
                url: url.clone(),
                source: Arc::new(error),
            })?;

        if response.status() != StatusCode::OK {
            return Err(CacheError::PeerStatus {
                url,
                status: response.status(),
            });
        }

        let body = hyper::body::to_bytes(response.into_body())
            .await
            .map_err(|error| CacheError::PeerBody {
                url,
                source: Arc::new(error),
            })?;

        Ok(ByteView::from(body))
    }
}

/// Contains the routing information which is swapped as a whole by [PeerPool::configure].
struct PoolState {
    ring: HashRing,
    clients: HashMap<String, Arc<HttpPeer>>,
}

/// Knows all peers of a cluster and serves the requests of other peers.
///
/// # Examples
/// ```
/// # use peercache::http::{PeerPool, DEFAULT_BASE_PATH};
/// # use peercache::registry::Registry;
/// let pool = PeerPool::new(Registry::new(), "http://10.0.0.1:8001", DEFAULT_BASE_PATH, 50);
/// pool.configure(&["http://10.0.0.1:8001", "http://10.0.0.2:8001"]);
///
/// // Each key is owned by exactly one of the configured peers...
/// let owner = pool.owner("some-key").unwrap();
/// assert_eq!(pool.peers().contains(&owner), true);
/// ```
pub struct PeerPool {
    self_url: String,
    base_path: String,
    replicas: usize,
    registry: Arc<Registry>,
    state: ArcSwap<PoolState>,
}

impl PeerPool {
    /// Creates a new pool for the node reachable via **self_url**.
    ///
    /// A trailing slash of **self_url** (or of any configured peer) is ignored, so that the local
    /// node is always recognized on the ring.
    ///
    /// Incoming requests are resolved using the groups of the given **registry**. The
    /// **base_path** is normalized so that it starts and ends with a slash. Each peer is placed
    /// **replicas** times on the hash ring.
    pub fn new(
        registry: Arc<Registry>,
        self_url: &str,
        base_path: &str,
        replicas: usize,
    ) -> Arc<Self> {
        Arc::new(PeerPool {
            self_url: self_url.trim_end_matches('/').to_owned(),
            base_path: normalize_base_path(base_path),
            replicas,
            registry,
            state: ArcSwap::from_pointee(PoolState {
                ring: HashRing::new(replicas, None),
                clients: HashMap::new(),
            }),
        })
    }

    /// Returns the url under which the local node is known to its peers.
    pub fn self_url(&self) -> &str {
        &self.self_url
    }

    /// Returns the path prefix of the peer protocol.
    pub fn base_path(&self) -> &str {
        &self.base_path
    }

    /// Replaces the set of peers.
    ///
    /// Each peer is identified by its url (e.g. `http://10.0.0.2:8001`). The list should
    /// contain the url of the local node itself so that it owns a share of the keys. Passing an
    /// empty list removes all peers, so that every key is loaded locally.
    pub fn configure<S: AsRef<str>>(&self, peers: &[S]) {
        // Peers are identified without a trailing slash, just like the local node...
        let peers: Vec<&str> = peers
            .iter()
            .map(|peer| peer.as_ref().trim_end_matches('/'))
            .collect();

        let mut ring = HashRing::new(self.replicas, None);
        ring.add(peers.as_slice());

        let mut clients = HashMap::new();
        for peer in peers {
            let base_url = format!("{}{}", peer, self.base_path);
            let _ = clients.insert(peer.to_owned(), Arc::new(HttpPeer::new(base_url)));
        }

        self.state.store(Arc::new(PoolState { ring, clients }));
        log::info!("Peers have been updated: {}", self.peers().join(", "));
    }

    /// Returns the url of the peer which owns the given key.
    ///
    /// Returns **None** if no peers are configured.
    pub fn owner(&self, key: &str) -> Option<String> {
        self.state.load().ring.route(key).map(|peer| peer.to_owned())
    }

    /// Lists the urls of all configured peers in alphabetical order.
    pub fn peers(&self) -> Vec<String> {
        let mut peers: Vec<String> = self.state.load().clients.keys().cloned().collect();
        peers.sort();
        peers
    }

    /// Handles a request sent by another peer.
    ///
    /// # Panics
    /// Panics if the path of the request doesn't start with the base path of this pool, as the
    /// server is expected to only delegate matching requests.
    pub async fn serve(&self, request: Request<Body>) -> Response<Body> {
        let (group, key) = match self.resolve(request.uri().path()) {
            Ok(target) => target,
            Err(response) => return response,
        };

        group.stats().record_server_request();
        match group.get(&key).await {
            Ok(view) => {
                let mut response = Response::new(Body::from(view.bytes()));
                let _ = response.headers_mut().insert(
                    CONTENT_TYPE,
                    HeaderValue::from_static("application/octet-stream"),
                );
                response
            }
            Err(error) => {
                log::debug!(
                    "Failed to serve '{}' of group '{}' to a peer: {}",
                    key,
                    group.name(),
                    error
                );
                text_response(error.status_code(), error.to_string())
            }
        }
    }

    /// Splits the given path into the group and the key being requested.
    fn resolve(&self, path: &str) -> Result<(Arc<Group>, String), Response<Body>> {
        let remainder = match path.strip_prefix(self.base_path.as_str()) {
            Some(remainder) => remainder,
            None => panic!(
                "PeerPool has been asked to serve '{}' which is outside of its base path '{}'!",
                path, self.base_path
            ),
        };

        let mut parts = remainder.splitn(2, '/');
        let (group_name, key) = match (parts.next(), parts.next()) {
            (Some(group_name), Some(key)) => (group_name, key),
            _ => return Err(text_response(StatusCode::BAD_REQUEST, "bad request")),
        };

        let (group_name, key) = match (urlencoding::decode(group_name), urlencoding::decode(key)) {
            (Ok(group_name), Ok(key)) => (group_name.into_owned(), key.into_owned()),
            _ => return Err(text_response(StatusCode::BAD_REQUEST, "bad request")),
        };

        match self.registry.group(&group_name) {
            Some(group) => Ok((group, key)),
            None => {
                let error = CacheError::GroupNotFound(group_name);
                Err(text_response(error.status_code(), error.to_string()))
            }
        }
    }
}

impl PeerRouter for PeerPool {
    fn route(&self, key: &str) -> Option<Arc<dyn PeerClient>> {
        let state = self.state.load();
        let owner = state.ring.route(key)?;
        if owner == self.self_url {
            return None;
        }

        let client: Arc<dyn PeerClient> = state.clients.get(owner)?.clone();
        log::debug!("Picked peer {} for key '{}'.", owner, key);

        Some(client)
    }
}

fn normalize_base_path(base_path: &str) -> String {
    let trimmed = base_path.trim_matches('/');
    if trimmed.is_empty() {
        "/".to_owned()
    } else {
        format!("/{}/", trimmed)
    }
}

fn text_response(status: StatusCode, message: impl Into<String>) -> Response<Body> {
    let mut response = Response::new(Body::from(message.into()));
    *response.status_mut() = status;
    let _ = response
        .headers_mut()
        .insert(CONTENT_TYPE, HeaderValue::from_static("text/plain; charset=utf-8"));

    response
}
