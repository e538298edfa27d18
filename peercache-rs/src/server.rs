//! Contains the HTTP server which answers the requests of other peers.
//!
//! Opens a server-socket on the specified port (**server.port** in the config or 8001 as
//! fallback) and binds it to the selected IP (**server.host** in the config or 0.0.0.0 as
//! fallback). Each request whose path starts with the base path of the
//! [PeerPool](crate::http::PeerPool) is handed to [PeerPool::serve](crate::http::PeerPool::serve),
//! everything else is answered with **404 Not Found**.
//!
//! Note that the server periodically tries to bind the socket to the selected port, therefore a
//! "new" instance can be started and the "old" one can bleed out and the port will be "handed
//! through" with minimal downtime. Also, this will listen to change events of the config and will
//! relocate to another port or host if changed.
//!
//! # Example
//!
//! ```no_run
//! use peercache::builder::Builder;
//! use peercache::server::Server;
//!
//! #[tokio::main]
//! async fn main() {
//!     // Setup and create a node...
//!     let node = Builder::new().enable_all().build().await;
//!
//!     // Specify a minimal config so that we run on a different port than a
//!     // production instance.
//!     node.config().unwrap().load_from_string("
//!         server:
//!             port: 1503
//!     ", None).unwrap();
//!
//!     // Run the server...
//!     node.server().unwrap().event_loop().await;
//! }
//! ```
use std::convert::Infallible;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use hyper::server::conn::AddrIncoming;
use hyper::service::{make_service_fn, service_fn};
use hyper::{Body, Request, Response, StatusCode};
use tokio::net::TcpListener;

use crate::config::{Config, Settings};
use crate::http::PeerPool;
use crate::registry::Registry;
use crate::spawn;

/// Specifies how often a running server checks if the registry has been terminated.
const SHUTDOWN_CHECK_INTERVAL: Duration = Duration::from_millis(500);

/// Represents the HTTP server of a node.
pub struct Server {
    running: AtomicBool,
    current_address: Mutex<Option<String>>,
    registry: Arc<Registry>,
    config: Option<Arc<Config>>,
    pool: Arc<PeerPool>,
}

impl Server {
    /// Creates a new server which delegates peer requests to the given pool.
    ///
    /// Note that this is called by the [Builder](crate::builder::Builder) unless disabled.
    ///
    /// Also note, that this will not technically start the server. This has to be done manually
    /// via [event_loop](Server::event_loop) as it is most probably done in the main thread.
    pub fn new(
        registry: Arc<Registry>,
        config: Option<Arc<Config>>,
        pool: Arc<PeerPool>,
    ) -> Arc<Self> {
        Arc::new(Server {
            running: AtomicBool::new(false),
            current_address: Mutex::new(None),
            registry,
            config,
            pool,
        })
    }

    /// Returns the address the server socket is currently bound to.
    ///
    /// Returns **None** if the server isn't listening (yet).
    pub fn current_address(&self) -> Option<String> {
        self.current_address.lock().unwrap().clone()
    }

    /// Determines if the server socket should keep listening for incoming connections.
    ///
    /// In contrast to **Registry::is_running** this is not used to control the shutdown of the
    /// server. Rather we toggle this flag to false if a config and therefore address change was
    /// detected. This way **server_loop** will exit and a new server socket for the appropriate
    /// address will be setup by the **event_loop**.
    fn is_running(&self) -> bool {
        self.running.load(Ordering::Acquire)
    }

    /// Determines the server address based on the current configuration.
    fn address(&self) -> String {
        match &self.config {
            Some(config) => config.current().address(),
            None => Settings::default().address(),
        }
    }

    /// Starts the event loop in a separate task.
    ///
    /// This is most probably used by test scenarios where the tests itself run in the main thread.
    pub fn fork(server: &Arc<Server>) {
        let cloned_server = server.clone();
        spawn!(async move {
            cloned_server.event_loop().await;
        });
    }

    /// Starts the event loop in a separate task and waits until the server socket is open.
    ///
    /// Just like **fork** this is intended to be used in test environments.
    pub async fn fork_and_await(server: &Arc<Server>) {
        Server::fork(server);

        while server.current_address().is_none() {
            tokio::time::sleep(Duration::from_millis(50)).await;
        }
    }

    /// Tries to open a server socket on the specified address to serve incoming requests.
    ///
    /// The task of this loop is to bind the server socket to the specified address. Once this was
    /// successful, we enter the [server_loop](Server::server_loop) to actually handle incoming
    /// requests. Once this loop returns, either the registry is no longer running and we should
    /// exit, or the config has changed and we should try to bind the server to the new address.
    pub async fn event_loop(&self) {
        let mut address = String::new();
        let mut last_bind_error_reported = Instant::now();

        while self.registry.is_running() {
            // If the sever is started for the first time or if it has been restarted due to a
            // config change, we need to reload the address...
            if !self.is_running() {
                address = self.address();
                self.running.store(true, Ordering::Release);
            }

            match bind(&address).await {
                Ok(builder) => {
                    log::info!("Opened server socket on {}...", &address);
                    *self.current_address.lock().unwrap() = Some(address.clone());
                    if let Err(error) = self.server_loop(builder).await {
                        log::error!("The server on {} failed: {}", &address, error);
                    }
                    *self.current_address.lock().unwrap() = None;
                    log::info!("Closing server socket on {}.", &address);
                }
                Err(error) => {
                    // If we were unable to bind to the server, we log this every once in a while
                    // (every 5s). Otherwise we would jam the log as re retry every 500ms.
                    if Instant::now()
                        .duration_since(last_bind_error_reported)
                        .as_secs()
                        > 5
                    {
                        log::error!(
                            "Cannot open server address: {} ({:#}). Retrying every 500ms...",
                            &address,
                            error
                        );
                        last_bind_error_reported = Instant::now();
                    }
                    tokio::time::sleep(Duration::from_millis(500)).await;
                }
            }
        }
    }

    /// Serves incoming requests until either the registry is terminated or the configured
    /// address changes. Requests which are being processed at this point are still completed.
    async fn server_loop(&self, builder: hyper::server::Builder<AddrIncoming>) -> hyper::Result<()> {
        let pool = self.pool.clone();
        let make_service = make_service_fn(move |_connection| {
            let pool = pool.clone();
            async move {
                Ok::<_, Infallible>(service_fn(move |request| dispatch(pool.clone(), request)))
            }
        });

        builder
            .serve(make_service)
            .with_graceful_shutdown(self.await_shutdown())
            .await
    }

    /// Completes once the server socket should be closed.
    async fn await_shutdown(&self) {
        let mut config_changed_flag = self.config.as_ref().map(|config| config.notifier());

        while self.registry.is_running() {
            match config_changed_flag.as_mut() {
                Some(notifier) => {
                    tokio::select! {
                        // We use a timeout here so that the while condition (registry.is_running())
                        // is checked every once in a while...
                        _ = tokio::time::sleep(SHUTDOWN_CHECK_INTERVAL) => {}
                        _ = notifier.recv() => {
                            // If the config was changed, we need to check if the address itself
                            // changed...
                            if self.current_address() != Some(self.address()) {
                                log::info!("Server address has changed. Restarting server socket...");

                                // Force the event_loop to re-evaluate the expected server address...
                                self.running.store(false, Ordering::Release);
                                return;
                            }
                        }
                    }
                }
                None => tokio::time::sleep(SHUTDOWN_CHECK_INTERVAL).await,
            }
        }
    }
}

async fn bind(address: &str) -> anyhow::Result<hyper::server::Builder<AddrIncoming>> {
    let listener = TcpListener::bind(address).await?.into_std()?;
    Ok(hyper::Server::from_tcp(listener)?)
}

/// Hands a request either to the pool or rejects it if it doesn't belong to the peer protocol.
async fn dispatch(pool: Arc<PeerPool>, request: Request<Body>) -> Result<Response<Body>, Infallible> {
    if !request.uri().path().starts_with(pool.base_path()) {
        log::debug!("Rejecting request for unknown path: {}", request.uri().path());
        let mut response = Response::new(Body::from("not found"));
        *response.status_mut() = StatusCode::NOT_FOUND;
        return Ok(response);
    }

    Ok(pool.serve(request).await)
}
