//! Deduplication of concurrent plugin loads.
//!
//! When several threads ask for the same digest at once, only the first
//! (the leader) runs the fetch/verify/compile sequence. The others block
//! until it finishes and receive a clone of its result, value or error.
//!
//! A waiter still honours its own [`CancelToken`]: it stops waiting once
//! the token is cancelled, while the leader carries on for everyone else.
//!
//! Nothing is remembered once the leader is done: the key is removed from
//! the table before waiters are woken, so the next non-overlapping request
//! runs the loader again. Reuse across calls comes from the disk cache.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use parking_lot::{Condvar, Mutex};

use crate::cancel::CancelToken;
use crate::error::{HostError, Result};

/// How often a waiter wakes to check its cancel token.
const WAIT_POLL: Duration = Duration::from_millis(10);

/// A load in progress, shared by its leader and all waiters.
struct Flight<T> {
    result: Mutex<Option<Result<T>>>,
    ready: Condvar,
}

impl<T: Clone> Flight<T> {
    fn new() -> Self {
        Self {
            result: Mutex::new(None),
            ready: Condvar::new(),
        }
    }

    fn publish(&self, result: Result<T>) {
        *self.result.lock() = Some(result);
        self.ready.notify_all();
    }

    fn wait(&self, cancel: &CancelToken) -> Result<T> {
        let mut slot = self.result.lock();
        loop {
            if let Some(result) = slot.as_ref() {
                return result.clone();
            }
            cancel.check()?;
            self.ready.wait_for(&mut slot, WAIT_POLL);
        }
    }
}

/// Keyed table of in-flight loads.
pub struct CompileCoordinator<T> {
    in_flight: Mutex<HashMap<String, Arc<Flight<T>>>>,
}

impl<T: Clone> CompileCoordinator<T> {
    /// Create an empty coordinator.
    pub fn new() -> Self {
        Self {
            in_flight: Mutex::new(HashMap::new()),
        }
    }

    /// Run `loader` for `key`, or join a load for `key` already in progress.
    ///
    /// A joining caller returns [`HostError::Cancelled`] as soon as `cancel`
    /// fires. The leader's own cancellation is up to `loader`.
    pub fn load<F>(&self, key: &str, cancel: &CancelToken, loader: F) -> Result<T>
    where
        F: FnOnce() -> Result<T>,
    {
        let flight = {
            let mut table = self.in_flight.lock();
            if let Some(flight) = table.get(key) {
                let flight = Arc::clone(flight);
                drop(table);
                tracing::debug!(key, "joining in-flight plugin load");
                return flight.wait(cancel);
            }
            let flight = Arc::new(Flight::new());
            table.insert(key.to_string(), Arc::clone(&flight));
            flight
        };

        let mut leader = Leader {
            coordinator: self,
            key,
            flight: &flight,
            finished: false,
        };
        let result = loader();
        leader.finish(result.clone());
        result
    }

    /// Number of keys with a load currently in progress.
    pub fn in_flight(&self) -> usize {
        self.in_flight.lock().len()
    }

    fn forget(&self, key: &str) {
        self.in_flight.lock().remove(key);
    }
}

impl<T: Clone> Default for CompileCoordinator<T> {
    fn default() -> Self {
        Self::new()
    }
}

/// Publishes the leader's result, even if the loader unwinds.
struct Leader<'a, T: Clone> {
    coordinator: &'a CompileCoordinator<T>,
    key: &'a str,
    flight: &'a Flight<T>,
    finished: bool,
}

impl<T: Clone> Leader<'_, T> {
    fn finish(&mut self, result: Result<T>) {
        self.coordinator.forget(self.key);
        self.flight.publish(result);
        self.finished = true;
    }
}

impl<T: Clone> Drop for Leader<'_, T> {
    fn drop(&mut self) {
        if !self.finished {
            self.finish(Err(HostError::Coordinator(format!(
                "loader for {} panicked",
                self.key
            ))));
        }
    }
}
