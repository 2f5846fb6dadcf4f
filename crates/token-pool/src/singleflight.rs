//! Singleflight: one in-flight operation per key
//!
//! The first caller for a key becomes the leader and gets a `Flight`; later
//! callers get a receiver on the same `watch` channel and see exactly the
//! value the leader publishes. The key is released when the `Flight` drops,
//! whether or not a value was published.

use std::collections::HashMap;
use std::hash::Hash;
use std::sync::{Arc, Mutex, PoisonError};

use tokio::sync::watch;

type Flights<K, T> = Arc<Mutex<HashMap<K, watch::Receiver<Option<T>>>>>;

pub struct Group<K, T> {
    flights: Flights<K, T>,
}

pub enum Role<K: Eq + Hash, T> {
    Leader(Flight<K, T>),
    Follower(Waiter<T>),
}

/// Leader's handle on an in-flight key.
pub struct Flight<K: Eq + Hash, T> {
    key: Option<K>,
    tx: watch::Sender<Option<T>>,
    flights: Flights<K, T>,
}

/// Follower's handle on someone else's flight.
pub struct Waiter<T> {
    rx: watch::Receiver<Option<T>>,
}

impl<K, T> Default for Group<K, T> {
    fn default() -> Self {
        Self {
            flights: Arc::new(Mutex::new(HashMap::new())),
        }
    }
}

impl<K, T> Group<K, T>
where
    K: Eq + Hash + Clone,
    T: Clone,
{
    pub fn new() -> Self {
        Self::default()
    }

    /// Lead the flight for `key`, or follow the one already running.
    pub fn join_or_lead(&self, key: K) -> Role<K, T> {
        let mut flights = self.flights.lock().unwrap_or_else(PoisonError::into_inner);
        if let Some(rx) = flights.get(&key) {
            return Role::Follower(Waiter { rx: rx.clone() });
        }
        let (tx, rx) = watch::channel(None);
        flights.insert(key.clone(), rx);
        Role::Leader(Flight {
            key: Some(key),
            tx,
            flights: self.flights.clone(),
        })
    }

    /// Keys with a flight running that satisfy `filter`.
    pub fn in_flight(&self, filter: impl Fn(&K) -> bool) -> Vec<K> {
        let flights = self.flights.lock().unwrap_or_else(PoisonError::into_inner);
        flights.keys().filter(|k| filter(k)).cloned().collect()
    }

    #[cfg(test)]
    fn len(&self) -> usize {
        self.flights
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    #[cfg(test)]
    fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl<K: Eq + Hash, T> Flight<K, T> {
    /// A waiter that observes this flight's outcome.
    pub fn subscribe(&self) -> Waiter<T> {
        Waiter {
            rx: self.tx.subscribe(),
        }
    }

    /// Publish the outcome and release the key.
    pub fn complete(mut self, value: T) {
        self.release();
        self.tx.send_replace(Some(value));
    }

    fn release(&mut self) {
        if let Some(key) = self.key.take() {
            self.flights
                .lock()
                .unwrap_or_else(PoisonError::into_inner)
                .remove(&key);
        }
    }
}

impl<K: Eq + Hash, T> Drop for Flight<K, T> {
    fn drop(&mut self) {
        self.release();
    }
}

impl<T: Clone> Waiter<T> {
    /// Wait for the leader's value; `None` if the leader went away without
    /// publishing one.
    pub async fn wait(mut self) -> Option<T> {
        match self.rx.wait_for(Option::is_some).await {
            Ok(value) => (*value).clone(),
            Err(_) => None,
        }
    }
}
