use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Mutex;

use metrics::counter;
use thiserror::Error;
use tokio::sync::mpsc;
use tokio::sync::Notify;

#[derive(Error, Debug, PartialEq, Eq)]
pub enum QueueError {
    /// The queue is at capacity. Surfaced to producers as backpressure,
    /// never absorbed by buffering.
    #[error("queue full")]
    Full,
    #[error("queue closed")]
    Closed,
}

/// Bounded handoff between the ingestion gateway and its worker pool.
///
/// `try_send` is the producer edge: a full queue is an immediate error the
/// caller maps to a retryable response. `send` awaits capacity and is used
/// only by deferred retry resubmission, which must never drop admitted work.
pub fn event_queue<T>(capacity: usize) -> (QueueTx<T>, QueueRx<T>) {
    let (tx, rx) = mpsc::channel(capacity);
    (
        QueueTx { inner: tx },
        QueueRx { inner: rx },
    )
}

#[derive(Clone)]
pub struct QueueTx<T> {
    inner: mpsc::Sender<T>,
}

impl<T> QueueTx<T> {
    pub fn try_send(&self, item: T) -> Result<(), QueueError> {
        self.inner.try_send(item).map_err(|err| match err {
            mpsc::error::TrySendError::Full(_) => QueueError::Full,
            mpsc::error::TrySendError::Closed(_) => QueueError::Closed,
        })
    }

    pub async fn send(&self, item: T) -> Result<(), QueueError> {
        self.inner.send(item).await.map_err(|_| QueueError::Closed)
    }

    pub fn depth(&self) -> usize {
        self.inner.max_capacity() - self.inner.capacity()
    }

    pub fn max_capacity(&self) -> usize {
        self.inner.max_capacity()
    }

    pub fn occupancy(&self) -> f64 {
        self.depth() as f64 / self.inner.max_capacity() as f64
    }
}

pub struct QueueRx<T> {
    inner: mpsc::Receiver<T>,
}

impl<T> QueueRx<T> {
    pub async fn recv(&mut self) -> Option<T> {
        self.inner.recv().await
    }

    pub fn close(&mut self) {
        self.inner.close()
    }
}

/// Bounded buffer between a stream consumer and its worker pool.
///
/// When full, `push` evicts the oldest item that no worker has claimed yet
/// and counts the drop; claimed work is never dropped. `requeue` re-admits a
/// retry even past capacity, so deferred resubmission cannot silently lose
/// an item either.
pub struct StreamBuffer<T> {
    name: String,
    items: Mutex<VecDeque<T>>,
    capacity: usize,
    notify: Notify,
    closed: AtomicBool,
    dropped: AtomicU64,
}

#[derive(Debug, PartialEq, Eq)]
pub enum PushOutcome {
    Admitted,
    /// Admitted, at the cost of the oldest unclaimed item.
    AdmittedDroppedOldest,
}

impl<T> StreamBuffer<T> {
    pub fn new(name: &str, capacity: usize) -> StreamBuffer<T> {
        StreamBuffer {
            name: name.to_string(),
            items: Mutex::new(VecDeque::new()),
            capacity: capacity.max(1),
            notify: Notify::new(),
            closed: AtomicBool::new(false),
            dropped: AtomicU64::new(0),
        }
    }

    pub fn push(&self, item: T) -> PushOutcome {
        let outcome = {
            let mut items = self.items.lock().expect("stream buffer poisoned");
            if items.len() >= self.capacity {
                items.pop_front();
                self.dropped.fetch_add(1, Ordering::Relaxed);
                counter!("stream_buffer_dropped_total", "buffer" => self.name.clone())
                    .increment(1);
                items.push_back(item);
                PushOutcome::AdmittedDroppedOldest
            } else {
                items.push_back(item);
                PushOutcome::Admitted
            }
        };
        self.notify.notify_one();
        outcome
    }

    /// Re-admit a retried item at the front, bypassing the capacity check.
    pub fn requeue(&self, item: T) {
        self.items
            .lock()
            .expect("stream buffer poisoned")
            .push_front(item);
        self.notify.notify_one();
    }

    /// Claim the next item. Returns `None` once the buffer is closed and
    /// drained.
    pub async fn recv(&self) -> Option<T> {
        loop {
            let notified = self.notify.notified();
            if let Some(item) = self.items.lock().expect("stream buffer poisoned").pop_front() {
                return Some(item);
            }
            if self.closed.load(Ordering::Acquire) {
                return None;
            }
            notified.await;
        }
    }

    pub fn close(&self) {
        self.closed.store(true, Ordering::Release);
        self.notify.notify_waiters();
    }

    pub fn len(&self) -> usize {
        self.items.lock().expect("stream buffer poisoned").len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn occupancy(&self) -> f64 {
        self.len() as f64 / self.capacity as f64
    }

    pub fn dropped(&self) -> u64 {
        self.dropped.load(Ordering::Relaxed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::time::Duration;

    #[tokio::test]
    async fn try_send_rejects_when_full_without_blocking() {
        let (tx, mut rx) = event_queue::<u32>(2);
        tx.try_send(1).unwrap();
        tx.try_send(2).unwrap();
        assert_eq!(tx.try_send(3), Err(QueueError::Full));
        assert_eq!(tx.depth(), 2);

        assert_eq!(rx.recv().await, Some(1));
        tx.try_send(3).unwrap();
    }

    #[tokio::test]
    async fn send_waits_for_capacity() {
        let (tx, mut rx) = event_queue::<u32>(1);
        tx.try_send(1).unwrap();

        let blocked = {
            let tx = tx.clone();
            tokio::spawn(async move { tx.send(2).await })
        };
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert!(!blocked.is_finished());

        assert_eq!(rx.recv().await, Some(1));
        blocked.await.unwrap().unwrap();
        assert_eq!(rx.recv().await, Some(2));
    }

    #[tokio::test]
    async fn buffer_drops_oldest_unclaimed_when_full() {
        let buffer = StreamBuffer::new("test", 2);
        assert_eq!(buffer.push(1), PushOutcome::Admitted);
        assert_eq!(buffer.push(2), PushOutcome::Admitted);
        assert_eq!(buffer.push(3), PushOutcome::AdmittedDroppedOldest);
        assert_eq!(buffer.dropped(), 1);

        assert_eq!(buffer.recv().await, Some(2));
        assert_eq!(buffer.recv().await, Some(3));
    }

    #[tokio::test]
    async fn requeue_bypasses_capacity_and_goes_first() {
        let buffer = StreamBuffer::new("test", 2);
        buffer.push(1);
        buffer.push(2);
        buffer.requeue(0);
        assert_eq!(buffer.len(), 3);
        assert_eq!(buffer.recv().await, Some(0));
    }

    #[tokio::test]
    async fn recv_returns_none_after_close_and_drain() {
        let buffer = Arc::new(StreamBuffer::new("test", 4));
        buffer.push(1);
        buffer.close();
        assert_eq!(buffer.recv().await, Some(1));
        assert_eq!(buffer.recv().await, None);
    }

    #[tokio::test]
    async fn recv_wakes_on_push() {
        let buffer = Arc::new(StreamBuffer::<u32>::new("test", 4));
        let waiter = {
            let buffer = buffer.clone();
            tokio::spawn(async move { buffer.recv().await })
        };
        tokio::time::sleep(Duration::from_millis(10)).await;
        buffer.push(7);
        assert_eq!(waiter.await.unwrap(), Some(7));
    }
}
