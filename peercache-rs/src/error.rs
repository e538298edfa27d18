//! Contains the errors which are reported by a [Group](crate::group::Group) and the HTTP
//! transport.
//!
//! Errors are **Clone** as a single outcome of a coalesced load is handed to every caller which
//! waited for it. Therefore non-cloneable sources are kept in an **Arc**.
use std::sync::Arc;

use hyper::StatusCode;
use thiserror::Error;

/// Enumerates the errors of the cache.
#[derive(Error, Debug, Clone)]
pub enum CacheError {
    /// The caller provided an invalid argument, e.g. an empty key.
    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    /// A peer requested a group which isn't known to this node.
    #[error("No such group: {0}")]
    GroupNotFound(String),

    /// The loader of a group failed. The error of the loader is passed on unchanged.
    #[error("{0:#}")]
    Upstream(Arc<anyhow::Error>),

    /// The URL of a peer request couldn't be built.
    #[error("Invalid peer url {url}")]
    PeerUrl {
        /// Contains the url which was rejected.
        url: String,
        /// Contains the reason why it was rejected.
        #[source]
        source: Arc<hyper::http::uri::InvalidUri>,
    },

    /// A peer couldn't be reached.
    #[error("Request to peer {url} failed")]
    PeerRequest {
        /// Contains the url which was requested.
        url: String,
        /// Contains the underlying transport error.
        #[source]
        source: Arc<hyper::Error>,
    },

    /// A peer responded with anything but 200 OK.
    #[error("Peer {url} responded with status {status}")]
    PeerStatus {
        /// Contains the url which was requested.
        url: String,
        /// Contains the status code sent by the peer.
        status: StatusCode,
    },

    /// The response body of a peer couldn't be read.
    #[error("Failed to read the response of peer {url}")]
    PeerBody {
        /// Contains the url which was requested.
        url: String,
        /// Contains the underlying I/O error.
        #[source]
        source: Arc<hyper::Error>,
    },
}

impl CacheError {
    /// Wraps the given loader error.
    pub fn upstream(error: anyhow::Error) -> Self {
        CacheError::Upstream(Arc::new(error))
    }

    /// Determines if this error was caused by talking to a remote peer.
    pub fn is_transport_error(&self) -> bool {
        matches!(
            self,
            CacheError::PeerUrl { .. }
                | CacheError::PeerRequest { .. }
                | CacheError::PeerStatus { .. }
                | CacheError::PeerBody { .. }
        )
    }

    /// Returns the HTTP status which is used to report this error to a peer.
    pub fn status_code(&self) -> StatusCode {
        match self {
            CacheError::GroupNotFound(_) => StatusCode::NOT_FOUND,
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

/// Represents the result of all cache operations.
pub type CacheResult<T> = Result<T, CacheError>;
