//! Typed publishing.

use crate::broker::{Broker, Properties};
use crate::error::QueueResult;
use bytes::Bytes;
use ferry_core::Message;
use std::sync::Arc;
use uuid::Uuid;

/// Publishes typed messages on their fixed routes.
#[derive(Clone)]
pub struct Publisher {
    broker: Arc<dyn Broker>,
    app_id: Option<String>,
}

impl Publisher {
    pub fn new(broker: Arc<dyn Broker>) -> Self {
        Self {
            broker,
            app_id: None,
        }
    }

    pub fn with_app_id(mut self, app_id: impl Into<String>) -> Self {
        self.app_id = Some(app_id.into());
        self
    }

    /// Publish `message` and return the message id assigned to it.
    pub async fn publish<M: Message>(&self, message: &M) -> QueueResult<String> {
        let payload = message.encode()?;
        let message_id = Uuid::new_v4().to_string();
        let properties = Properties {
            message_id: Some(message_id.clone()),
            app_id: self.app_id.clone(),
        };
        self.broker
            .publish(M::ROUTE.routing_key(), properties, Bytes::from(payload))
            .await?;
        tracing::trace!(route = %M::ROUTE, message_id = %message_id, "published");
        Ok(message_id)
    }

    pub fn broker(&self) -> &Arc<dyn Broker> {
        &self.broker
    }
}
