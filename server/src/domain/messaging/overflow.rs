//! In-process bounded overflow queue absorbing stream-append failures (§4.4)
//!
//! When the primary store write succeeds but the stream append itself fails
//! (the fabric is unreachable), the publish call must not fail outright —
//! the entry is buffered here and drained opportunistically. Once the queue
//! is at capacity, overflow is fatal for the call per §4.4.

use std::collections::VecDeque;

use tokio::sync::Mutex;

use crate::data::streams::{StreamFabric, StreamFields};

struct Pending {
    stream: &'static str,
    fields: StreamFields,
}

pub struct OverflowQueue {
    capacity: usize,
    queue: Mutex<VecDeque<Pending>>,
}

impl OverflowQueue {
    pub fn new(capacity: usize) -> Self {
        Self { capacity, queue: Mutex::new(VecDeque::new()) }
    }

    pub async fn len(&self) -> usize {
        self.queue.lock().await.len()
    }

    /// Buffers `fields` for `stream`. Returns `false` if the queue is already
    /// at capacity (the caller must then fail the publish call).
    pub async fn push(&self, stream: &'static str, fields: StreamFields) -> bool {
        let mut queue = self.queue.lock().await;
        if queue.len() >= self.capacity {
            return false;
        }
        queue.push_back(Pending { stream, fields });
        true
    }

    /// Attempts to re-append every buffered entry to the fabric, in FIFO
    /// order, stopping at the first failure so ordering is preserved.
    pub async fn drain(&self, fabric: &StreamFabric) -> usize {
        let mut queue = self.queue.lock().await;
        let mut flushed = 0;
        while let Some(pending) = queue.front() {
            match fabric.manager().append(pending.stream, pending.fields.clone()).await {
                Ok(_) => {
                    queue.pop_front();
                    flushed += 1;
                }
                Err(e) => {
                    tracing::debug!(error = %e, "overflow queue drain stopped on append failure");
                    break;
                }
            }
        }
        flushed
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_push_rejects_once_at_capacity() {
        let queue = OverflowQueue::new(1);
        assert!(queue.push("messages:private", StreamFields::new()).await);
        assert!(!queue.push("messages:private", StreamFields::new()).await);
        assert_eq!(queue.len().await, 1);
    }

    #[tokio::test]
    async fn test_drain_flushes_into_in_memory_fabric() {
        let fabric = StreamFabric::in_memory();
        let queue = OverflowQueue::new(10);
        queue.push("messages:private", StreamFields::new()).await;
        queue.push("messages:private", StreamFields::new()).await;

        let flushed = queue.drain(&fabric).await;
        assert_eq!(flushed, 2);
        assert_eq!(queue.len().await, 0);
    }
}
