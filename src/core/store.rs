//! Observable snapshot store
//! Every shared collection in the core (devices, sensor readings, scanner and
//! advertiser state, subscribers) lives in one of these. A mutation builds a new
//! value and swaps it in under the store lock, so observers only ever see whole
//! snapshots, and every committed snapshot reaches every observer in order.

use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use futures_util::stream::{self, Stream};
use tokio::sync::mpsc;

struct Shared<T> {
    current: Arc<T>,
    observers: Vec<mpsc::UnboundedSender<Arc<T>>>,
}

/// An observable value. Observers get the snapshot current at subscription
/// time, then each later change.
pub struct Store<T> {
    shared: Mutex<Shared<T>>,
}

impl<T> Store<T>
where
    T: Clone + PartialEq + Send + Sync + 'static,
{
    /// Creates a store holding `initial`.
    pub fn new(initial: T) -> Self {
        Self {
            shared: Mutex::new(Shared {
                current: Arc::new(initial),
                observers: Vec::new(),
            }),
        }
    }

    fn lock(&self) -> MutexGuard<'_, Shared<T>> {
        self.shared.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Returns the current immutable snapshot.
    pub fn snapshot(&self) -> Arc<T> {
        self.lock().current.clone()
    }

    /// Subscribes to the store. The current snapshot is replayed first.
    pub fn observe(&self) -> Observer<T> {
        let (tx, rx) = mpsc::unbounded_channel();
        let mut shared = self.lock();
        shared.observers.push(tx);
        Observer {
            replay: Some(shared.current.clone()),
            rx,
        }
    }

    /// Applies `f` to a copy of the current value and publishes the result.
    ///
    /// The read-modify-write span runs under the store lock, so two concurrent
    /// updates can never interleave. Observers are only sent a snapshot when
    /// the value actually changed. `f` must not block or call into the radio.
    pub fn update<R>(&self, f: impl FnOnce(&mut T) -> R) -> R {
        let mut shared = self.lock();
        let mut next = T::clone(&shared.current);
        let result = f(&mut next);
        if next != *shared.current {
            let snapshot = Arc::new(next);
            shared.current = snapshot.clone();
            // Closed observers are dropped here.
            shared
                .observers
                .retain(|observer| observer.send(snapshot.clone()).is_ok());
        }
        result
    }

    /// Replaces the whole value.
    pub fn replace(&self, value: T) {
        self.update(|current| *current = value);
    }
}

/// Receiving side of a [`Store`].
pub struct Observer<T> {
    replay: Option<Arc<T>>,
    rx: mpsc::UnboundedReceiver<Arc<T>>,
}

impl<T> Observer<T>
where
    T: Send + Sync + 'static,
{
    /// Waits for the next snapshot. The first call returns immediately with the
    /// snapshot that was current when the observer was created. Returns `None`
    /// once the store has been dropped and every queued snapshot was taken.
    pub async fn next(&mut self) -> Option<Arc<T>> {
        if let Some(snapshot) = self.replay.take() {
            return Some(snapshot);
        }
        self.rx.recv().await
    }

    /// Converts the observer into a stream of snapshots.
    pub fn into_stream(self) -> impl Stream<Item = Arc<T>> + Send + Unpin {
        Box::pin(stream::unfold(self, |mut observer| async move {
            observer.next().await.map(|snapshot| (snapshot, observer))
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures_util::StreamExt;
    use std::collections::BTreeMap;

    #[tokio::test]
    async fn new_observer_replays_latest_snapshot() {
        let store = Store::new(1u32);
        store.replace(7);

        let mut observer = store.observe();
        assert_eq!(*observer.next().await.unwrap(), 7);
    }

    #[tokio::test]
    async fn every_change_is_delivered_in_order() {
        let store = Store::new(0u32);
        let mut observer = store.observe();

        store.replace(1);
        store.replace(2);
        store.replace(3);

        let mut seen = Vec::new();
        for _ in 0..4 {
            seen.push(*observer.next().await.unwrap());
        }
        assert_eq!(seen, vec![0, 1, 2, 3]);
    }

    #[tokio::test]
    async fn unchanged_update_does_not_wake_observers() {
        let store = Store::new(BTreeMap::<u8, u8>::new());
        let mut observer = store.observe();
        observer.next().await;

        store.update(|map| {
            map.remove(&1);
        });
        store.update(|map| {
            map.insert(1, 2);
        });

        let snapshot = observer.next().await.unwrap();
        assert_eq!(snapshot.get(&1), Some(&2));
        assert!(observer.rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn update_returns_closure_result() {
        let store = Store::new(vec![1, 2, 3]);
        let removed = store.update(|values| values.pop());
        assert_eq!(removed, Some(3));
        assert_eq!(*store.snapshot(), vec![1, 2]);
    }

    #[tokio::test]
    async fn stream_ends_when_store_is_dropped() {
        let store = Store::new(0u8);
        let mut stream = store.observe().into_stream();
        assert_eq!(*stream.next().await.unwrap(), 0);

        store.replace(1);
        assert_eq!(*stream.next().await.unwrap(), 1);

        drop(store);
        assert!(stream.next().await.is_none());
    }

    #[tokio::test]
    async fn dropped_observers_are_released() {
        let store = Store::new(0u8);
        let observer = store.observe();
        drop(observer);

        store.replace(1);
        assert!(store.lock().observers.is_empty());
    }

    #[tokio::test]
    async fn concurrent_updates_are_not_lost() {
        let store = Arc::new(Store::new(0u32));
        let mut handles = Vec::new();
        for _ in 0..16 {
            let store = store.clone();
            handles.push(tokio::spawn(async move {
                for _ in 0..100 {
                    store.update(|value| *value += 1);
                }
            }));
        }
        for handle in handles {
            handle.await.unwrap();
        }
        assert_eq!(*store.snapshot(), 1600);
    }
}
