//! In-process broker.
//!
//! Models a single direct exchange: each routing key fans out to every queue
//! bound to it. Deliveries stay unacknowledged until acked or nacked, and
//! [`MemoryBroker::disconnect`] simulates a dropped connection by requeueing
//! every unacknowledged message with the `redelivered` flag set.

use crate::broker::{Acker, Broker, Delivery, Properties, Subscription};
use crate::error::{QueueError, QueueResult};
use async_trait::async_trait;
use bytes::Bytes;
use ferry_core::QueueBinding;
use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use tokio::sync::Notify;

#[derive(Clone, Debug)]
struct Envelope {
    routing_key: String,
    properties: Properties,
    payload: Bytes,
    redelivered: bool,
}

#[derive(Default)]
struct QueueState {
    ready: VecDeque<Envelope>,
    unacked: HashMap<u64, Envelope>,
    acked: u64,
    nacked: u64,
}

#[derive(Default)]
struct State {
    /// routing key -> bound queues, in declaration order.
    bindings: HashMap<String, Vec<String>>,
    queues: HashMap<String, QueueState>,
    next_tag: u64,
    /// Bumped on every simulated disconnect.
    generation: u64,
    closed: bool,
}

struct Inner {
    state: Mutex<State>,
    notify: Notify,
}

impl Inner {
    fn state(&self) -> MutexGuard<'_, State> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

/// Counters for one queue.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct QueueStats {
    pub ready: usize,
    pub unacked: usize,
    pub acked: u64,
    pub nacked: u64,
}

/// A message waiting in a queue, for inspection.
#[derive(Clone, Debug)]
pub struct QueuedMessage {
    pub properties: Properties,
    pub payload: Bytes,
    pub redelivered: bool,
}

/// In-process [`Broker`].
#[derive(Clone)]
pub struct MemoryBroker {
    inner: Arc<Inner>,
}

impl Default for MemoryBroker {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryBroker {
    pub fn new() -> Self {
        Self {
            inner: Arc::new(Inner {
                state: Mutex::new(State::default()),
                notify: Notify::new(),
            }),
        }
    }

    /// Drop every live subscription and requeue unacknowledged deliveries.
    pub fn disconnect(&self) {
        {
            let mut state = self.inner.state();
            state.generation += 1;
            for queue in state.queues.values_mut() {
                let mut pending: Vec<(u64, Envelope)> = queue.unacked.drain().collect();
                // Oldest delivery ends up at the head again.
                pending.sort_by_key(|(tag, _)| std::cmp::Reverse(*tag));
                for (_, mut envelope) in pending {
                    envelope.redelivered = true;
                    queue.ready.push_front(envelope);
                }
            }
        }
        tracing::debug!("memory broker connection dropped");
        self.inner.notify.notify_waiters();
    }

    /// Close the broker. Subscriptions end and publishes fail.
    pub fn close(&self) {
        self.inner.state().closed = true;
        self.inner.notify.notify_waiters();
    }

    pub fn stats(&self, queue: &str) -> Option<QueueStats> {
        let state = self.inner.state();
        state.queues.get(queue).map(|q| QueueStats {
            ready: q.ready.len(),
            unacked: q.unacked.len(),
            acked: q.acked,
            nacked: q.nacked,
        })
    }

    /// Snapshot of the messages waiting in `queue`, head first.
    pub fn ready_messages(&self, queue: &str) -> Vec<QueuedMessage> {
        let state = self.inner.state();
        state
            .queues
            .get(queue)
            .map(|q| {
                q.ready
                    .iter()
                    .map(|e| QueuedMessage {
                        properties: e.properties.clone(),
                        payload: e.payload.clone(),
                        redelivered: e.redelivered,
                    })
                    .collect()
            })
            .unwrap_or_default()
    }
}

#[async_trait]
impl Broker for MemoryBroker {
    async fn declare(&self, binding: QueueBinding) -> QueueResult<()> {
        let mut state = self.inner.state();
        if state.closed {
            return Err(QueueError::Closed);
        }
        state.queues.entry(binding.queue.to_string()).or_default();
        let bound = state
            .bindings
            .entry(binding.routing_key.to_string())
            .or_default();
        if !bound.iter().any(|q| q == binding.queue) {
            bound.push(binding.queue.to_string());
        }
        Ok(())
    }

    async fn publish(
        &self,
        routing_key: &str,
        properties: Properties,
        payload: Bytes,
    ) -> QueueResult<()> {
        {
            let mut state = self.inner.state();
            if state.closed {
                return Err(QueueError::Closed);
            }
            let targets = state
                .bindings
                .get(routing_key)
                .filter(|queues| !queues.is_empty())
                .cloned()
                .ok_or_else(|| QueueError::Unroutable(routing_key.to_string()))?;
            for queue in targets {
                state
                    .queues
                    .entry(queue)
                    .or_default()
                    .ready
                    .push_back(Envelope {
                        routing_key: routing_key.to_string(),
                        properties: properties.clone(),
                        payload: payload.clone(),
                        redelivered: false,
                    });
            }
        }
        self.inner.notify.notify_waiters();
        Ok(())
    }

    async fn subscribe(&self, queue: &str) -> QueueResult<Box<dyn Subscription>> {
        let state = self.inner.state();
        if state.closed {
            return Err(QueueError::Closed);
        }
        if !state.queues.contains_key(queue) {
            return Err(QueueError::UnknownQueue(queue.to_string()));
        }
        let generation = state.generation;
        let acker = Arc::new(MemoryAcker {
            inner: self.inner.clone(),
            queue: queue.to_string(),
            generation,
        });
        Ok(Box::new(MemorySubscription {
            inner: self.inner.clone(),
            queue: queue.to_string(),
            generation,
            acker,
        }))
    }

    async fn health_check(&self) -> QueueResult<()> {
        if self.inner.state().closed {
            return Err(QueueError::Closed);
        }
        Ok(())
    }

    async fn shutdown(&self) {
        self.close();
    }

    fn backend_name(&self) -> &'static str {
        "memory"
    }
}

struct MemorySubscription {
    inner: Arc<Inner>,
    queue: String,
    generation: u64,
    acker: Arc<MemoryAcker>,
}

#[async_trait]
impl Subscription for MemorySubscription {
    async fn next_delivery(&mut self) -> QueueResult<Option<Delivery>> {
        loop {
            let notified = self.inner.notify.notified();
            tokio::pin!(notified);
            // Register before inspecting state so a publish in between is
            // not missed.
            notified.as_mut().enable();

            {
                let mut state = self.inner.state();
                if state.closed {
                    return Ok(None);
                }
                if state.generation != self.generation {
                    return Err(QueueError::ConnectionLost);
                }
                state.next_tag += 1;
                let tag = state.next_tag;
                let queue = state
                    .queues
                    .get_mut(&self.queue)
                    .ok_or_else(|| QueueError::UnknownQueue(self.queue.clone()))?;
                if let Some(envelope) = queue.ready.pop_front() {
                    queue.unacked.insert(tag, envelope.clone());
                    return Ok(Some(Delivery::new(
                        tag,
                        envelope.routing_key,
                        envelope.redelivered,
                        envelope.properties,
                        envelope.payload,
                        self.acker.clone(),
                    )));
                }
            }

            notified.await;
        }
    }
}

struct MemoryAcker {
    inner: Arc<Inner>,
    queue: String,
    generation: u64,
}

impl MemoryAcker {
    fn settle(&self, delivery_tag: u64, requeue: Option<bool>) -> QueueResult<bool> {
        let mut state = self.inner.state();
        if state.generation != self.generation {
            // Already requeued by the disconnect.
            return Err(QueueError::ConnectionLost);
        }
        let queue = state
            .queues
            .get_mut(&self.queue)
            .ok_or_else(|| QueueError::UnknownQueue(self.queue.clone()))?;
        let mut envelope = queue
            .unacked
            .remove(&delivery_tag)
            .ok_or(QueueError::UnknownDeliveryTag(delivery_tag))?;
        match requeue {
            None => {
                queue.acked += 1;
                Ok(false)
            }
            Some(requeue) => {
                queue.nacked += 1;
                if requeue {
                    envelope.redelivered = true;
                    queue.ready.push_back(envelope);
                }
                Ok(requeue)
            }
        }
    }
}

#[async_trait]
impl Acker for MemoryAcker {
    async fn ack(&self, delivery_tag: u64) -> QueueResult<()> {
        self.settle(delivery_tag, None).map(|_| ())
    }

    async fn nack(&self, delivery_tag: u64, requeue: bool) -> QueueResult<()> {
        if self.settle(delivery_tag, Some(requeue))? {
            self.inner.notify.notify_waiters();
        }
        Ok(())
    }
}
