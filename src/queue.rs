//! Bounded output queues connecting source readers to sink writers.
//!
//! Each queue is identified by a [`StreamId`] and backed by a bounded tokio
//! mpsc channel. Producers are cheap to clone so any number of readers can
//! feed the same stream; exactly one [`QueueConsumer`] drains it.
//!
//! A queue never signals completion on its own: the orchestrator holds a
//! producer for every stream and ends it with an explicit
//! [`QueueEntry::EndOfStream`] once all readers have stopped.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::num::NonZeroU32;
use tokio::sync::mpsc;

use crate::emit;
use crate::error::QueueError;
use crate::metrics::events::QueueDepth;
use crate::source::Record;

/// Identifier of one logical queue.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct StreamId(NonZeroU32);

impl StreamId {
    /// Returns `None` for zero, which is not a valid stream.
    pub fn new(id: u32) -> Option<Self> {
        NonZeroU32::new(id).map(Self)
    }

    pub fn get(self) -> u32 {
        self.0.get()
    }
}

impl fmt::Display for StreamId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// An entry travelling through a queue.
#[derive(Debug, Clone, PartialEq)]
pub enum QueueEntry {
    /// A tagged record produced by a source reader.
    Record(Record),
    /// No further records will arrive on this stream.
    EndOfStream,
}

/// Create a bounded queue for `stream` holding at most `capacity` entries.
///
/// # Panics
///
/// Panics if `capacity` is zero or larger than the channel's permit limit.
/// Configuration validation bounds it to 1 through
/// [`MAX_QUEUE_CAPACITY`](crate::config::MAX_QUEUE_CAPACITY) before any
/// queue is built.
pub fn output_queue(stream: StreamId, capacity: usize) -> (QueueProducer, QueueConsumer) {
    let (tx, rx) = mpsc::channel(capacity);
    (
        QueueProducer { stream, tx },
        QueueConsumer { stream, rx },
    )
}

/// Sending half of an output queue. Clone one per reader.
#[derive(Debug, Clone)]
pub struct QueueProducer {
    stream: StreamId,
    tx: mpsc::Sender<QueueEntry>,
}

impl QueueProducer {
    pub fn stream(&self) -> StreamId {
        self.stream
    }

    /// Enqueue a record, suspending while the queue is full.
    pub async fn put(&self, record: Record) -> Result<(), QueueError> {
        self.send(QueueEntry::Record(record)).await
    }

    /// Enqueue the end-of-stream marker.
    pub async fn put_end_of_stream(&self) -> Result<(), QueueError> {
        self.send(QueueEntry::EndOfStream).await
    }

    async fn send(&self, entry: QueueEntry) -> Result<(), QueueError> {
        self.tx
            .send(entry)
            .await
            .map_err(|_| QueueError::Closed {
                stream: self.stream,
            })?;
        emit!(QueueDepth {
            stream: self.stream,
            depth: self.len(),
        });
        Ok(())
    }

    /// Number of entries waiting to be consumed.
    pub fn len(&self) -> usize {
        self.tx.max_capacity() - self.tx.capacity()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Maximum number of unconsumed entries.
    pub fn capacity(&self) -> usize {
        self.tx.max_capacity()
    }
}

/// Receiving half of an output queue, owned by exactly one sink writer.
#[derive(Debug)]
pub struct QueueConsumer {
    stream: StreamId,
    rx: mpsc::Receiver<QueueEntry>,
}

impl QueueConsumer {
    pub fn stream(&self) -> StreamId {
        self.stream
    }

    /// Dequeue the next entry, suspending while the queue is empty.
    ///
    /// Returns `None` only if every producer has been dropped without sending
    /// the end-of-stream marker.
    pub async fn get(&mut self) -> Option<QueueEntry> {
        self.rx.recv().await
    }

    pub fn len(&self) -> usize {
        self.rx.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rx.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::time::Duration;

    fn stream(id: u32) -> StreamId {
        StreamId::new(id).unwrap()
    }

    fn record(n: u64) -> Record {
        let mut record = Record::new();
        record.insert("n".to_string(), json!(n));
        record
    }

    #[test]
    fn test_stream_id_rejects_zero() {
        assert!(StreamId::new(0).is_none());
        assert_eq!(stream(2).get(), 2);
        assert_eq!(stream(2).to_string(), "2");
    }

    #[test]
    fn test_stream_id_deserializes_from_integer() {
        let id: StreamId = serde_yaml::from_str("4").unwrap();
        assert_eq!(id.get(), 4);
        assert!(serde_yaml::from_str::<StreamId>("0").is_err());
    }

    #[tokio::test]
    async fn test_fifo_order() {
        let (tx, mut rx) = output_queue(stream(1), 8);
        for n in 0..5 {
            tx.put(record(n)).await.unwrap();
        }
        tx.put_end_of_stream().await.unwrap();

        for n in 0..5 {
            assert_eq!(rx.get().await, Some(QueueEntry::Record(record(n))));
        }
        assert_eq!(rx.get().await, Some(QueueEntry::EndOfStream));
    }

    #[tokio::test(start_paused = true)]
    async fn test_put_blocks_when_full() {
        let (tx, mut rx) = output_queue(stream(1), 3);
        for n in 0..3 {
            tx.put(record(n)).await.unwrap();
        }
        assert_eq!(tx.len(), 3);
        assert_eq!(tx.capacity(), 3);

        // A fourth put must not complete while nothing is consumed.
        let blocked = tokio::time::timeout(Duration::from_secs(1), tx.put(record(3))).await;
        assert!(blocked.is_err(), "put should suspend on a full queue");
        assert_eq!(tx.len(), 3);

        // One get frees exactly one slot.
        let pending = tokio::spawn({
            let tx = tx.clone();
            async move { tx.put(record(3)).await }
        });
        assert_eq!(rx.get().await, Some(QueueEntry::Record(record(0))));
        pending.await.unwrap().unwrap();
        assert_eq!(rx.len(), 3);
    }

    #[tokio::test]
    async fn test_put_fails_when_consumer_dropped() {
        let (tx, rx) = output_queue(stream(7), 1);
        drop(rx);
        let err = tx.put(record(1)).await.unwrap_err();
        assert!(matches!(err, QueueError::Closed { stream } if stream.get() == 7));
    }

    #[tokio::test]
    async fn test_concurrent_producers_lose_nothing() {
        let (tx, mut rx) = output_queue(stream(1), 4);
        let mut producers = Vec::new();
        for p in 0..4u64 {
            let tx = tx.clone();
            producers.push(tokio::spawn(async move {
                for i in 0..50u64 {
                    let mut r = Record::new();
                    r.insert("producer".to_string(), json!(p));
                    r.insert("seq".to_string(), json!(i));
                    tx.put(r).await.unwrap();
                }
            }));
        }

        let consumer = tokio::spawn(async move {
            let mut seen = Vec::new();
            while let Some(QueueEntry::Record(r)) = rx.get().await {
                seen.push((r["producer"].as_u64().unwrap(), r["seq"].as_u64().unwrap()));
            }
            seen
        });

        for p in producers {
            p.await.unwrap();
        }
        tx.put_end_of_stream().await.unwrap();
        let seen = consumer.await.unwrap();

        assert_eq!(seen.len(), 200);
        // Each producer's own output keeps its order.
        for p in 0..4u64 {
            let seqs: Vec<u64> = seen.iter().filter(|(q, _)| *q == p).map(|(_, s)| *s).collect();
            assert_eq!(seqs, (0..50).collect::<Vec<_>>());
        }
    }
}
