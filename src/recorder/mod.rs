//! Event Recorder
//!
//! Publishes keyed records and lets callers wait for the record carrying a
//! given key, even when that record is produced by a different request.
//!
//! A single coordinating task owns both the ring of recently published
//! records and the set of live listeners. Handles talk to it over one
//! channel, so matching, expiry and eviction are linearized in the order
//! the requests were sent.
//!
//! Listener timeouts are logical: they count publications, not wall-clock
//! time. A quiet node with no writes never expires a wait.

use std::collections::VecDeque;
use std::sync::Arc;

use tokio::sync::{mpsc, oneshot};

use crate::error::{Error, Result};

/// Buffered requests between handles and the coordinating task
const EVENT_BUFFER: usize = 64;

/// A record that can be matched by key
pub trait Keyed: Send + Sync + 'static {
    /// Correlation key of this record
    fn key(&self) -> &str;
}

/// Registration waiting for a record with a given key
struct Listener<T> {
    key: String,
    /// Publications this listener still tolerates before expiring
    remaining: usize,
    tx: oneshot::Sender<Arc<T>>,
}

enum Event<T> {
    Push(Arc<T>),
    Listen(Listener<T>),
}

/// Handle to a node's event recorder
pub struct Recorder<T> {
    events: mpsc::Sender<Event<T>>,
}

impl<T> Clone for Recorder<T> {
    fn clone(&self) -> Self {
        Self {
            events: self.events.clone(),
        }
    }
}

impl<T: Keyed> Recorder<T> {
    /// Create a recorder remembering the last `capacity` records.
    ///
    /// Spawns the coordinating task, so this must run inside a Tokio
    /// runtime. The task stops once every handle has been dropped.
    pub fn new(capacity: usize) -> Self {
        let (tx, rx) = mpsc::channel(EVENT_BUFFER);
        tokio::spawn(Coordinator::new(capacity).run(rx));
        Self { events: tx }
    }

    /// Publish a record to the recorder
    pub async fn push(&self, record: T) -> Result<()> {
        tracing::debug!("Recorder: pushing {}", record.key());
        self.events
            .send(Event::Push(Arc::new(record)))
            .await
            .map_err(|_| Error::ShuttingDown)
    }

    /// Wait for the record with `key`.
    ///
    /// Returns at once if the record is still in recent history. Otherwise
    /// waits until it is published, or fails with
    /// [`Error::RecordNotFound`] once `timeout` other records have been
    /// published in the meantime.
    pub async fn listen(&self, key: &str, timeout: usize) -> Result<Arc<T>> {
        tracing::debug!("Recorder: listening for {}", key);
        let (tx, rx) = oneshot::channel();
        let listener = Listener {
            key: key.to_string(),
            remaining: timeout.max(1),
            tx,
        };
        self.events
            .send(Event::Listen(listener))
            .await
            .map_err(|_| Error::ShuttingDown)?;

        match rx.await {
            Ok(record) => {
                tracing::debug!("Recorder: got result for {}", key);
                Ok(record)
            }
            Err(_) => Err(Error::RecordNotFound(timeout)),
        }
    }
}

/// State owned by the coordinating task
struct Coordinator<T> {
    capacity: usize,
    recent: VecDeque<Arc<T>>,
    listeners: Vec<Listener<T>>,
}

impl<T: Keyed> Coordinator<T> {
    fn new(capacity: usize) -> Self {
        Self {
            capacity,
            recent: VecDeque::with_capacity(capacity),
            listeners: Vec::new(),
        }
    }

    async fn run(mut self, mut events: mpsc::Receiver<Event<T>>) {
        while let Some(event) = events.recv().await {
            match event {
                Event::Push(record) => self.publish(record),
                Event::Listen(listener) => self.register(listener),
            }
        }
        tracing::debug!("Recorder: all handles dropped, stopping");
    }

    fn register(&mut self, listener: Listener<T>) {
        let found = self
            .recent
            .iter()
            .find(|record| record.key() == listener.key)
            .cloned();

        match found {
            Some(record) => {
                let _ = listener.tx.send(record);
            }
            None => self.listeners.push(listener),
        }
    }

    fn publish(&mut self, record: Arc<T>) {
        if self.capacity > 0 {
            if self.recent.len() == self.capacity {
                self.recent.pop_front();
            }
            self.recent.push_back(Arc::clone(&record));
        }

        let listeners = std::mem::take(&mut self.listeners);
        for mut listener in listeners {
            // The waiting caller went away (request cancelled)
            if listener.tx.is_closed() {
                continue;
            }

            if listener.key == record.key() {
                let _ = listener.tx.send(Arc::clone(&record));
                continue;
            }

            listener.remaining -= 1;
            if listener.remaining == 0 {
                tracing::debug!("Recorder: listener for {} expired", listener.key);
                // Dropping the sender reports "not found" to the waiter
                continue;
            }
            self.listeners.push(listener);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[derive(Debug, PartialEq)]
    struct TestRecord(String);

    impl Keyed for TestRecord {
        fn key(&self) -> &str {
            &self.0
        }
    }

    fn record(key: &str) -> TestRecord {
        TestRecord(key.to_string())
    }

    /// Give spawned listeners a chance to register
    async fn settle() {
        tokio::time::sleep(Duration::from_millis(10)).await;
    }

    #[tokio::test]
    async fn test_basic() {
        let recorder = Recorder::new(0);
        let listener = recorder.clone();
        let handle = tokio::spawn(async move { listener.listen("hello", 0).await });
        settle().await;

        recorder.push(record("hello")).await.unwrap();

        let got = tokio::time::timeout(Duration::from_millis(100), handle)
            .await
            .expect("listener should resolve")
            .unwrap()
            .unwrap();
        assert_eq!(got.0, "hello");
    }

    #[tokio::test]
    async fn test_recent() {
        let recorder = Recorder::new(1);
        recorder.push(record("world")).await.unwrap();

        let got = tokio::time::timeout(Duration::from_millis(100), recorder.listen("world", 0))
            .await
            .expect("recent record should be found immediately")
            .unwrap();
        assert_eq!(got.0, "world");
    }

    #[tokio::test]
    async fn test_timeout() {
        let recorder = Recorder::new(1);
        let listener = recorder.clone();
        let handle = tokio::spawn(async move { listener.listen("world", 2).await });
        settle().await;

        recorder.push(record("akf")).await.unwrap();
        recorder.push(record("fka")).await.unwrap();
        recorder.push(record("ghi")).await.unwrap();

        let result = tokio::time::timeout(Duration::from_millis(100), handle)
            .await
            .expect("listener should expire")
            .unwrap();
        assert!(matches!(result, Err(Error::RecordNotFound(2))));
    }

    #[tokio::test]
    async fn test_timeout_counts_publishes_not_time() {
        let recorder = Recorder::new(0);
        let listener = recorder.clone();
        let mut handle = tokio::spawn(async move { listener.listen("target", 2).await });
        settle().await;

        // One unrelated publish is not enough to expire the wait
        recorder.push(record("other-1")).await.unwrap();
        assert!(
            tokio::time::timeout(Duration::from_millis(50), &mut handle)
                .await
                .is_err(),
            "wait expired after a single publication"
        );

        recorder.push(record("target")).await.unwrap();
        let got = tokio::time::timeout(Duration::from_millis(100), handle)
            .await
            .unwrap()
            .unwrap()
            .unwrap();
        assert_eq!(got.0, "target");
    }

    #[tokio::test]
    async fn test_second_unrelated_publish_expires_wait() {
        let recorder = Recorder::new(0);
        let listener = recorder.clone();
        let handle = tokio::spawn(async move { listener.listen("target", 2).await });
        settle().await;

        recorder.push(record("a")).await.unwrap();
        recorder.push(record("b")).await.unwrap();

        let result = tokio::time::timeout(Duration::from_millis(100), handle)
            .await
            .expect("two publications should expire the wait")
            .unwrap();
        assert!(result.is_err());
    }

    #[tokio::test]
    async fn test_evicted_record_is_not_found() {
        let capacity = 3;
        let recorder = Recorder::new(capacity);
        for i in 0..=capacity {
            recorder.push(record(&format!("key-{}", i))).await.unwrap();
        }

        // key-0 fell out of the ring, so the wait has to register and expire
        let listener = recorder.clone();
        let handle = tokio::spawn(async move { listener.listen("key-0", 1).await });
        settle().await;
        recorder.push(record("unrelated")).await.unwrap();

        let result = tokio::time::timeout(Duration::from_millis(100), handle)
            .await
            .unwrap()
            .unwrap();
        assert!(matches!(result, Err(Error::RecordNotFound(1))));

        // The newest records are still served from history
        let got = recorder.listen("key-3", 1).await.unwrap();
        assert_eq!(got.0, "key-3");
    }

    #[tokio::test]
    async fn test_concurrent_listeners_get_their_own_records() {
        let recorder = Recorder::new(0);
        let mut handles = Vec::new();
        for i in 0..5 {
            let listener = recorder.clone();
            handles.push(tokio::spawn(async move {
                listener.listen(&format!("req-{}", i), 10).await
            }));
        }
        settle().await;

        for i in (0..5).rev() {
            recorder.push(record(&format!("req-{}", i))).await.unwrap();
        }

        for (i, handle) in handles.into_iter().enumerate() {
            let got = handle.await.unwrap().unwrap();
            assert_eq!(got.0, format!("req-{}", i));
        }
    }

    #[tokio::test]
    async fn test_dropped_waiter_is_pruned() {
        let recorder = Recorder::new(0);
        let waiting =
            tokio::time::timeout(Duration::from_millis(10), recorder.listen("gone", 100)).await;
        assert!(waiting.is_err());

        // Publishing after the waiter gave up must not fail or block
        recorder.push(record("gone")).await.unwrap();
        recorder.push(record("next")).await.unwrap();
    }
}
