//! Message transport for the ferry pipeline.
//!
//! Workers talk through a single direct exchange. This crate provides the
//! [`Broker`] abstraction with AMQP and in-process implementations, a typed
//! [`Publisher`] and the [`Consumer`] loop that settles deliveries according
//! to a [`Handler`]'s outcome.

pub mod amqp;
pub mod broker;
pub mod consumer;
pub mod error;
pub mod memory;
pub mod publisher;

pub use amqp::AmqpBroker;
pub use broker::{Acker, Broker, Delivery, Properties, Subscription};
pub use consumer::{
    Consumer, ConsumerObserver, ConsumerOptions, Disposition, Handler, HandlerOutcome, MessageMeta,
};
pub use error::{QueueError, QueueResult};
pub use memory::{MemoryBroker, QueueStats, QueuedMessage};
pub use publisher::Publisher;

use ferry_core::QueueBinding;
use ferry_core::config::{BrokerBackend, BrokerConfig};
use ferry_core::topology;
use std::sync::Arc;

/// Create a broker from configuration.
pub async fn from_config(config: &BrokerConfig) -> QueueResult<Arc<dyn Broker>> {
    config.validate().map_err(QueueError::Backend)?;

    match config.backend {
        BrokerBackend::Memory => Ok(Arc::new(MemoryBroker::new())),
        BrokerBackend::Amqp => {
            let url = config
                .url
                .as_deref()
                .ok_or_else(|| QueueError::Backend("amqp broker requires a url".to_string()))?;
            let broker = AmqpBroker::connect(url, config.prefetch).await?;
            Ok(Arc::new(broker))
        }
    }
}

/// Bindings a process declares for `backend`.
pub fn bindings_for(backend: BrokerBackend) -> Vec<QueueBinding> {
    match backend {
        BrokerBackend::Memory => topology::in_process_bindings(),
        BrokerBackend::Amqp => topology::bindings(),
    }
}

/// Declare `bindings`. Idempotent.
pub async fn declare_topology(broker: &dyn Broker, bindings: &[QueueBinding]) -> QueueResult<()> {
    for binding in bindings {
        broker.declare(*binding).await?;
    }
    tracing::debug!(
        backend = broker.backend_name(),
        queues = bindings.len(),
        "topology declared"
    );
    Ok(())
}
