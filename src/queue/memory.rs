use std::collections::VecDeque;
use std::sync::Mutex;
use std::time::Duration;
use async_trait::async_trait;
use dashmap::DashMap;
use tokio::sync::Notify;
use tokio::time::Instant;
use tracing::debug;
use crate::errors::ScanlineError;
use super::{Delivery, MessageQueue, QueueDepth};

#[derive(Debug, Clone)]
struct Message<T> {
    id: String,
    body: T,
    receive_count: u32,
    visible_at: Instant,
}

#[derive(Debug)]
struct Lease<T> {
    message: Message<T>,
    deadline: Instant,
}

/// In-process queue with SQS-style visibility timeouts.
pub struct MemoryQueue<T> {
    name: String,
    visibility_timeout: Duration,
    ready: Mutex<VecDeque<Message<T>>>,
    in_flight: DashMap<String, Lease<T>>,
    notify: Notify,
}

impl<T: Clone + Send + Sync + 'static> MemoryQueue<T> {
    pub fn new(name: impl Into<String>, visibility_timeout: Duration) -> Self {
        Self {
            name: name.into(),
            visibility_timeout,
            ready: Mutex::new(VecDeque::new()),
            in_flight: DashMap::new(),
            notify: Notify::new(),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    fn lock_ready(&self) -> Result<std::sync::MutexGuard<'_, VecDeque<Message<T>>>, ScanlineError> {
        self.ready.lock()
            .map_err(|_| ScanlineError::Queue(format!("{} queue lock poisoned", self.name)))
    }

    /// Move leases past their deadline back to the ready list.
    fn reclaim_expired(&self, ready: &mut VecDeque<Message<T>>, now: Instant) {
        let expired: Vec<String> = self.in_flight
            .iter()
            .filter(|entry| entry.value().deadline <= now)
            .map(|entry| entry.key().clone())
            .collect();

        for receipt in expired {
            if let Some((_, lease)) = self.in_flight.remove(&receipt) {
                debug!(queue = %self.name, message_id = %lease.message.id, "Visibility timeout elapsed, redelivering");
                let mut message = lease.message;
                message.visible_at = now;
                ready.push_back(message);
            }
        }
    }

    /// Take the first visible message, or report when the next one becomes visible.
    fn try_take(&self, now: Instant) -> Result<Result<Delivery<T>, Option<Instant>>, ScanlineError> {
        let mut ready = self.lock_ready()?;
        self.reclaim_expired(&mut ready, now);

        if let Some(pos) = ready.iter().position(|m| m.visible_at <= now) {
            if let Some(mut message) = ready.remove(pos) {
                message.receive_count += 1;
                let receipt = uuid::Uuid::new_v4().to_string();
                let delivery = Delivery {
                    message_id: message.id.clone(),
                    receipt: receipt.clone(),
                    receive_count: message.receive_count,
                    body: message.body.clone(),
                };
                self.in_flight.insert(receipt, Lease { message, deadline: now + self.visibility_timeout });
                return Ok(Ok(delivery));
            }
        }

        let next_visible = ready.iter().map(|m| m.visible_at).min();
        let next_deadline = self.in_flight.iter().map(|entry| entry.value().deadline).min();
        let wake = match (next_visible, next_deadline) {
            (Some(a), Some(b)) => Some(a.min(b)),
            (a, b) => a.or(b),
        };
        Ok(Err(wake))
    }
}

#[async_trait]
impl<T: Clone + Send + Sync + 'static> MessageQueue<T> for MemoryQueue<T> {
    async fn send(&self, body: T) -> Result<String, ScanlineError> {
        let id = uuid::Uuid::new_v4().to_string();
        {
            let mut ready = self.lock_ready()?;
            ready.push_back(Message { id: id.clone(), body, receive_count: 0, visible_at: Instant::now() });
        }
        self.notify.notify_one();
        Ok(id)
    }

    async fn receive(&self) -> Result<Delivery<T>, ScanlineError> {
        loop {
            // register interest before checking so a concurrent send is not missed
            let notified = self.notify.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();

            match self.try_take(Instant::now())? {
                Ok(delivery) => return Ok(delivery),
                Err(Some(wake)) => {
                    tokio::select! {
                        _ = &mut notified => {}
                        _ = tokio::time::sleep_until(wake) => {}
                    }
                }
                Err(None) => notified.await,
            }
        }
    }

    async fn ack(&self, receipt: &str) -> Result<(), ScanlineError> {
        match self.in_flight.remove(receipt) {
            Some(_) => Ok(()),
            None => Err(ScanlineError::Queue(format!(
                "{}: receipt {} is no longer in flight", self.name, receipt
            ))),
        }
    }

    async fn release(&self, receipt: &str, delay: Duration) -> Result<(), ScanlineError> {
        let (_, lease) = self.in_flight.remove(receipt).ok_or_else(|| {
            ScanlineError::Queue(format!("{}: receipt {} is no longer in flight", self.name, receipt))
        })?;
        {
            let mut ready = self.lock_ready()?;
            let mut message = lease.message;
            message.visible_at = Instant::now() + delay;
            ready.push_back(message);
        }
        self.notify.notify_one();
        Ok(())
    }

    async fn depth(&self) -> QueueDepth {
        let ready = self.ready.lock().map(|r| r.len()).unwrap_or(0);
        QueueDepth { ready, in_flight: self.in_flight.len() }
    }
}
