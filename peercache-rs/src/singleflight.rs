//! Provides a duplicate call suppression mechanism (also known as *single flight*).
//!
//! If many callers request the same missing key at the same time, only the first one (the
//! *leader*) actually performs the expensive work. All others wait for the outcome of the leader
//! and receive a clone of its result. Once the leader is done, the in-flight record is removed.
//! Therefore this only suppresses concurrent duplicates and never caches a result: a call which
//! arrives after the leader completed will perform the work again.
//!
//! The registry of in-flight calls is guarded by a single mutex which is only held to look up or
//! insert a record, never while the work itself runs. Waiters block on a **watch** channel which
//! is owned by the leader. If the leader is cancelled (its future is dropped) before it publishes
//! a result, the record is removed and the waiters retry, so that one of them becomes the new
//! leader.
//!
//! # Examples
//! ```
//! # use peercache::singleflight::Flight;
//! # use std::sync::atomic::{AtomicUsize, Ordering};
//! # #[tokio::main]
//! # async fn main() {
//! let flight = Flight::new();
//! let counter = AtomicUsize::new(0);
//! let calls = &counter;
//!
//! let work = move || async move {
//!     let _ = calls.fetch_add(1, Ordering::SeqCst);
//!     tokio::time::sleep(std::time::Duration::from_millis(50)).await;
//!     42
//! };
//!
//! // Both calls run concurrently, but the work is only performed once...
//! let (a, b) = tokio::join!(flight.work("key", work), flight.work("key", work));
//! assert_eq!((a, b), (42, 42));
//! assert_eq!(calls.load(Ordering::SeqCst), 1);
//! # }
//! ```
use std::collections::HashMap;
use std::future::Future;
use std::sync::Mutex;

use tokio::sync::watch;

/// Keeps track of all calls which are currently in flight.
pub struct Flight<T> {
    calls: Mutex<HashMap<String, watch::Receiver<Option<T>>>>,
}

/// Determines the role of a caller for a single attempt.
enum Role<T> {
    Leader(watch::Sender<Option<T>>),
    Waiter(watch::Receiver<Option<T>>),
}

/// Removes the in-flight record of a leader once it completes or is dropped.
struct CallGuard<'a, T> {
    flight: &'a Flight<T>,
    key: &'a str,
}

impl<T> Drop for CallGuard<'_, T> {
    fn drop(&mut self) {
        if let Ok(mut calls) = self.flight.calls.lock() {
            let _ = calls.remove(self.key);
        }
    }
}

impl<T: Clone> Flight<T> {
    /// Creates a new and empty registry.
    pub fn new() -> Self {
        Flight {
            calls: Mutex::new(HashMap::new()),
        }
    }

    /// Executes and awaits the future produced by **func** unless another call for the same key
    /// is already in flight. In this case the result of the other call is awaited and returned
    /// instead.
    pub async fn work<F, Fut>(&self, key: &str, func: F) -> T
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = T>,
    {
        loop {
            match self.join(key) {
                Role::Leader(sender) => {
                    let guard = CallGuard { flight: self, key };
                    let result = func().await;
                    let _ = sender.send_replace(Some(result.clone()));
                    std::mem::drop(guard);

                    return result;
                }
                Role::Waiter(mut receiver) => {
                    let outcome = receiver
                        .wait_for(|value| value.is_some())
                        .await
                        .ok()
                        .and_then(|value| value.clone());
                    if let Some(result) = outcome {
                        return result;
                    }

                    // The leader has been cancelled without publishing a result - retry...
                    log::debug!("In-flight call for {} was abandoned. Retrying...", key);
                }
            }
        }
    }

    /// Registers the caller either as leader or as waiter for the given key.
    fn join(&self, key: &str) -> Role<T> {
        let mut calls = self.calls.lock().unwrap();
        if let Some(receiver) = calls.get(key) {
            return Role::Waiter(receiver.clone());
        }

        let (sender, receiver) = watch::channel(None);
        let _ = calls.insert(key.to_owned(), receiver);
        Role::Leader(sender)
    }

    /// Returns the number of calls which are currently in flight.
    pub fn in_flight(&self) -> usize {
        self.calls.lock().unwrap().len()
    }
}

impl<T: Clone> Default for Flight<T> {
    fn default() -> Self {
        Flight::new()
    }
}
