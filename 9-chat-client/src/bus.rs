//! Bounded message queues between the I/O tasks.
//!
//! Each queue is multi-producer multi-consumer so a pool of writer tasks can
//! drain it concurrently. Ordering holds per producer; messages taken by
//! different consumers may be delivered in any relative order.

use async_channel::{Receiver, Sender};
use thiserror::Error;

use crate::message::Message;

#[derive(Debug, Error, PartialEq, Eq)]
#[error("message queue is closed")]
pub struct QueueClosed;

/// A bounded FIFO of messages. Cloning yields another handle to the same
/// queue.
#[derive(Debug, Clone)]
pub struct MessageQueue {
    tx: Sender<Message>,
    rx: Receiver<Message>,
}

impl MessageQueue {
    /// Creates a queue holding up to `capacity` messages; zero is raised to
    /// one so the queue always buffers.
    pub fn new(capacity: usize) -> Self {
        let (tx, rx) = async_channel::bounded(capacity.max(1));
        Self { tx, rx }
    }

    /// Enqueues a message, waiting while the queue is full.
    pub async fn push(&self, message: Message) -> Result<(), QueueClosed> {
        self.tx.send(message).await.map_err(|_| QueueClosed)
    }

    /// Dequeues the oldest message, or `None` once the queue is closed and
    /// empty.
    pub async fn pop(&self) -> Option<Message> {
        self.rx.recv().await.ok()
    }

    /// Closes the queue. Returns `true` only for the call that closed it.
    ///
    /// Pending messages stay poppable; pushes fail from here on.
    pub fn close(&self) -> bool {
        self.tx.close()
    }

    /// Dequeues the oldest message without waiting. Used once the pump has
    /// stopped to flush what is left.
    pub(crate) fn try_pop(&self) -> Option<Message> {
        self.rx.try_recv().ok()
    }

    pub fn is_closed(&self) -> bool {
        self.tx.is_closed()
    }

    #[cfg(test)]
    pub(crate) fn len(&self) -> usize {
        self.tx.len()
    }

    #[cfg(test)]
    pub(crate) fn capacity(&self) -> usize {
        self.tx.capacity().unwrap_or(usize::MAX)
    }
}

/// The inbound and outbound queues of one session.
#[derive(Debug, Clone)]
pub struct MessageBus {
    /// Remote to local display.
    pub inbound: MessageQueue,
    /// Local input to remote.
    pub outbound: MessageQueue,
}

impl MessageBus {
    pub fn new(inbound_capacity: usize, outbound_capacity: usize) -> Self {
        Self {
            inbound: MessageQueue::new(inbound_capacity),
            outbound: MessageQueue::new(outbound_capacity),
        }
    }

    /// Closes both queues, returning how many this call closed.
    pub fn close(&self) -> usize {
        usize::from(self.inbound.close()) + usize::from(self.outbound.close())
    }
}
