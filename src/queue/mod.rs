pub mod memory;

pub use memory::MemoryQueue;

use std::time::Duration;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use crate::errors::ScanlineError;

/// Delivery settings shared by the scan and inspect queues.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct QueuePolicy {
    /// A received message reappears if it is not acked within this window.
    pub visibility_timeout: Duration,
    /// Deliveries allowed before a message is dead-lettered.
    pub max_receive_count: u32,
}

impl Default for QueuePolicy {
    fn default() -> Self {
        Self {
            visibility_timeout: Duration::from_secs(300),
            max_receive_count: 3,
        }
    }
}

/// One receipt of a message. `receive_count` includes this delivery.
#[derive(Debug, Clone)]
pub struct Delivery<T> {
    pub message_id: String,
    pub receipt: String,
    pub receive_count: u32,
    pub body: T,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct QueueDepth {
    /// Waiting to be received, delayed messages included.
    pub ready: usize,
    /// Received and not yet acked.
    pub in_flight: usize,
}

/// At-least-once message transport between stages.
#[async_trait]
pub trait MessageQueue<T>: Send + Sync
where
    T: Clone + Send + Sync + 'static,
{
    /// Enqueue a message and return its id.
    async fn send(&self, body: T) -> Result<String, ScanlineError>;

    /// Wait for the next visible message. The message stays invisible for the
    /// visibility timeout and is redelivered unless acked.
    async fn receive(&self) -> Result<Delivery<T>, ScanlineError>;

    /// Delete a received message.
    async fn ack(&self, receipt: &str) -> Result<(), ScanlineError>;

    /// Return a received message to the queue, visible again after `delay`.
    async fn release(&self, receipt: &str, delay: Duration) -> Result<(), ScanlineError>;

    async fn depth(&self) -> QueueDepth;
}
