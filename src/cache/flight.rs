//! Single-flight request coalescing
//!
//! Concurrent misses on the same key make one fetch; the leader broadcasts
//! its outcome (success or failure) to every caller that joined while the
//! fetch was in flight.

use std::collections::HashMap;
use std::future::Future;
use std::sync::{Mutex, MutexGuard, PoisonError};

use tokio::sync::broadcast;
use tokio_util::sync::CancellationToken;
use tracing::debug;

use crate::error::{RepoError, Result};

type Outcome<V> = broadcast::Sender<Result<V>>;

enum Role<V> {
    Leader(Outcome<V>),
    Waiter(broadcast::Receiver<Result<V>>),
}

// == Single Flight ==
/// Per-key registry of in-flight fetches.
#[derive(Debug)]
pub struct SingleFlight<V> {
    in_flight: Mutex<HashMap<String, Outcome<V>>>,
}

impl<V: Clone> SingleFlight<V> {
    pub fn new() -> Self {
        Self {
            in_flight: Mutex::new(HashMap::new()),
        }
    }

    /// Runs `fetch` unless a fetch for `key` is already running, in which
    /// case waits for that one and returns its outcome.
    ///
    /// A waiter whose own token fires stops waiting with `Cancelled`. If the
    /// leader is cancelled or dropped, its waiters see `Cancelled` too.
    pub async fn run<F, Fut>(&self, key: &str, cancel: &CancellationToken, fetch: F) -> Result<V>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<V>>,
    {
        let role = {
            let mut in_flight = self.lock();
            match in_flight.get(key) {
                Some(outcome) => Role::Waiter(outcome.subscribe()),
                None => {
                    let (outcome, _) = broadcast::channel(1);
                    in_flight.insert(key.to_string(), outcome.clone());
                    Role::Leader(outcome)
                }
            }
        };

        match role {
            Role::Waiter(mut rx) => {
                debug!(key, "joining in-flight fetch");
                tokio::select! {
                    biased;
                    _ = cancel.cancelled() => Err(RepoError::Cancelled(
                        "cancelled while waiting for in-flight fetch".to_string(),
                    )),
                    received = rx.recv() => match received {
                        Ok(result) => result,
                        Err(_) => Err(RepoError::Cancelled(
                            "in-flight fetch was abandoned".to_string(),
                        )),
                    },
                }
            }
            Role::Leader(outcome) => {
                let mut guard = FlightGuard {
                    flights: self,
                    key,
                    completed: false,
                };

                let result = tokio::select! {
                    biased;
                    _ = cancel.cancelled() => Err(RepoError::Cancelled(
                        "in-flight fetch cancelled by its caller".to_string(),
                    )),
                    result = fetch() => result,
                };

                guard.complete(&outcome, result.clone());
                result
            }
        }
    }

    /// Number of keys with a fetch in flight.
    pub fn in_flight(&self) -> usize {
        self.lock().len()
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<String, Outcome<V>>> {
        self.in_flight.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl<V: Clone> Default for SingleFlight<V> {
    fn default() -> Self {
        Self::new()
    }
}

/// Unregisters the leader's key on every exit path.
struct FlightGuard<'a, V: Clone> {
    flights: &'a SingleFlight<V>,
    key: &'a str,
    completed: bool,
}

impl<V: Clone> FlightGuard<'_, V> {
    /// Unregisters the key and publishes the outcome in one step, so no
    /// caller can subscribe after the send and wait forever.
    fn complete(&mut self, outcome: &Outcome<V>, result: Result<V>) {
        let mut in_flight = self.flights.lock();
        in_flight.remove(self.key);
        // No receivers just means nobody joined
        let _ = outcome.send(result);
        self.completed = true;
    }
}

impl<V: Clone> Drop for FlightGuard<'_, V> {
    fn drop(&mut self) {
        if !self.completed {
            self.flights.lock().remove(self.key);
        }
    }
}
