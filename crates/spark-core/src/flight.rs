//! Keyed single-flight guard.
//!
//! Concurrent callers that ask for the same key while an operation is in
//! flight await the same shared future instead of starting a second one. The
//! entry is dropped as soon as the shared future settles, so the next call
//! after completion starts a fresh operation.

use std::collections::HashMap;
use std::future::Future;
use std::hash::Hash;
use std::sync::{Mutex, PoisonError};

use futures::future::{BoxFuture, FutureExt, Shared};

type Flight<T, E> = Shared<BoxFuture<'static, Result<T, E>>>;

pub struct SingleFlight<K, T, E> {
    flights: Mutex<HashMap<K, Flight<T, E>>>,
}

impl<K, T, E> Default for SingleFlight<K, T, E> {
    fn default() -> Self {
        Self {
            flights: Mutex::new(HashMap::new()),
        }
    }
}

impl<K, T, E> SingleFlight<K, T, E>
where
    K: Eq + Hash + Clone,
    T: Clone + Send + Sync + 'static,
    E: Clone + Send + Sync + 'static,
{
    pub fn new() -> Self {
        Self::default()
    }

    /// Run `operation` for `key` unless a flight for `key` already exists, in
    /// which case its outcome is shared.
    pub async fn run<F, Fut>(&self, key: K, operation: F) -> Result<T, E>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T, E>> + Send + 'static,
    {
        let flight = {
            let mut flights = self.flights.lock().unwrap_or_else(PoisonError::into_inner);
            match flights.get(&key) {
                Some(existing) => existing.clone(),
                None => {
                    let flight = operation().boxed().shared();
                    flights.insert(key.clone(), flight.clone());
                    flight
                }
            }
        };

        let outcome = flight.clone().await;

        let mut flights = self.flights.lock().unwrap_or_else(PoisonError::into_inner);
        if flights
            .get(&key)
            .is_some_and(|current| Shared::ptr_eq(current, &flight))
        {
            flights.remove(&key);
        }

        outcome
    }

    pub fn in_flight(&self, key: &K) -> bool {
        self.flights
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .contains_key(key)
    }
}
