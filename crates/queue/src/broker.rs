//! Broker abstraction.

use crate::error::QueueResult;
use async_trait::async_trait;
use bytes::Bytes;
use ferry_core::QueueBinding;
use std::sync::Arc;

/// Message properties carried alongside the payload.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct Properties {
    /// Unique per publish. Used as the upload ledger key.
    pub message_id: Option<String>,
    pub app_id: Option<String>,
}

/// Acknowledgement channel for deliveries of one subscription.
#[async_trait]
pub trait Acker: Send + Sync {
    async fn ack(&self, delivery_tag: u64) -> QueueResult<()>;

    async fn nack(&self, delivery_tag: u64, requeue: bool) -> QueueResult<()>;
}

/// A message handed to a consumer. It stays unacknowledged until
/// [`Delivery::ack`] or [`Delivery::nack`] is called.
pub struct Delivery {
    pub delivery_tag: u64,
    pub routing_key: String,
    /// Set when the broker delivered this message before.
    pub redelivered: bool,
    pub properties: Properties,
    pub payload: Bytes,
    acker: Arc<dyn Acker>,
}

impl Delivery {
    pub fn new(
        delivery_tag: u64,
        routing_key: String,
        redelivered: bool,
        properties: Properties,
        payload: Bytes,
        acker: Arc<dyn Acker>,
    ) -> Self {
        Self {
            delivery_tag,
            routing_key,
            redelivered,
            properties,
            payload,
            acker,
        }
    }

    pub async fn ack(self) -> QueueResult<()> {
        self.acker.ack(self.delivery_tag).await
    }

    pub async fn nack(self, requeue: bool) -> QueueResult<()> {
        self.acker.nack(self.delivery_tag, requeue).await
    }
}

impl std::fmt::Debug for Delivery {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Delivery")
            .field("delivery_tag", &self.delivery_tag)
            .field("routing_key", &self.routing_key)
            .field("redelivered", &self.redelivered)
            .field("properties", &self.properties)
            .field("payload_len", &self.payload.len())
            .finish()
    }
}

/// Stream of deliveries from one queue.
#[async_trait]
pub trait Subscription: Send {
    /// Wait for the next delivery.
    ///
    /// Returns `Ok(None)` once the broker is closed and
    /// `Err(QueueError::ConnectionLost)` if the connection dropped; the caller
    /// should subscribe again.
    async fn next_delivery(&mut self) -> QueueResult<Option<Delivery>>;
}

/// Topic/queue transport.
#[async_trait]
pub trait Broker: Send + Sync + 'static {
    /// Declare a durable queue and bind it to its routing key. Idempotent.
    async fn declare(&self, binding: QueueBinding) -> QueueResult<()>;

    /// Publish to every queue bound to `routing_key`.
    async fn publish(
        &self,
        routing_key: &str,
        properties: Properties,
        payload: Bytes,
    ) -> QueueResult<()>;

    /// Start consuming a declared queue with manual acknowledgement.
    async fn subscribe(&self, queue: &str) -> QueueResult<Box<dyn Subscription>>;

    /// Check the broker is reachable.
    async fn health_check(&self) -> QueueResult<()>;

    /// Close the connection. Live subscriptions end and later calls fail.
    async fn shutdown(&self) {}

    fn backend_name(&self) -> &'static str;
}
