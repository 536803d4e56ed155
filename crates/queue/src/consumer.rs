//! Consumer loop.
//!
//! A [`Consumer`] subscribes one queue, decodes each delivery into the
//! handler's message type and settles it according to the returned
//! [`HandlerOutcome`]:
//!
//! | outcome / failure        | action                               |
//! |--------------------------|--------------------------------------|
//! | undecodable or invalid   | ack, dropped                         |
//! | `Done`                   | ack                                  |
//! | `Fatal`                  | ack, logged                          |
//! | `Retryable`              | wait `backoff`, then nack + requeue  |
//!
//! Lost connections are retried with capped exponential backoff.

use crate::broker::{Broker, Delivery};
use crate::error::{QueueError, QueueResult};
use async_trait::async_trait;
use ferry_core::{Message, QueueBinding};
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// Broker metadata handed to handlers next to the decoded message.
#[derive(Clone, Debug, Default)]
pub struct MessageMeta {
    pub message_id: Option<String>,
    pub redelivered: bool,
    pub routing_key: String,
}

/// What to do with a delivery once the handler returns.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum HandlerOutcome {
    Done,
    /// Requeue after `backoff`.
    Retryable { reason: String, backoff: Duration },
    /// Drop the message.
    Fatal { reason: String },
}

impl HandlerOutcome {
    pub fn retry(reason: impl Into<String>, backoff: Duration) -> Self {
        Self::Retryable {
            reason: reason.into(),
            backoff,
        }
    }

    pub fn fatal(reason: impl Into<String>) -> Self {
        Self::Fatal {
            reason: reason.into(),
        }
    }
}

/// Processes one message type.
#[async_trait]
pub trait Handler: Send + Sync + 'static {
    type Message: Message;

    /// Stable name for logs and metrics.
    fn name(&self) -> &'static str;

    async fn handle(&self, message: Self::Message, meta: &MessageMeta) -> HandlerOutcome;
}

/// How a delivery was settled.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Disposition {
    Acked,
    /// Acked without running the handler, or acked after a fatal outcome.
    Dropped,
    Requeued,
}

impl Disposition {
    pub fn as_str(&self) -> &'static str {
        match self {
            Disposition::Acked => "acked",
            Disposition::Dropped => "dropped",
            Disposition::Requeued => "requeued",
        }
    }
}

/// Hooks for metrics.
pub trait ConsumerObserver: Send + Sync {
    fn settled(&self, _handler: &'static str, _disposition: Disposition, _elapsed: Duration) {}

    fn reconnected(&self, _handler: &'static str) {}
}

struct NoopObserver;

impl ConsumerObserver for NoopObserver {}

#[derive(Clone, Copy, Debug)]
pub struct ConsumerOptions {
    pub reconnect_initial: Duration,
    pub reconnect_max: Duration,
}

impl Default for ConsumerOptions {
    fn default() -> Self {
        Self {
            reconnect_initial: Duration::from_millis(500),
            reconnect_max: Duration::from_secs(30),
        }
    }
}

/// Drives a [`Handler`] from one queue.
pub struct Consumer<H: Handler> {
    broker: Arc<dyn Broker>,
    binding: QueueBinding,
    handler: Arc<H>,
    options: ConsumerOptions,
    observer: Arc<dyn ConsumerObserver>,
}

impl<H: Handler> Consumer<H> {
    /// Consume the queue of the handler's message route.
    pub fn new(broker: Arc<dyn Broker>, handler: Arc<H>) -> Self {
        Self {
            broker,
            binding: H::Message::ROUTE.binding(),
            handler,
            options: ConsumerOptions::default(),
            observer: Arc::new(NoopObserver),
        }
    }

    /// Consume a different queue carrying the same message type.
    pub fn with_binding(mut self, binding: QueueBinding) -> Self {
        self.binding = binding;
        self
    }

    pub fn with_options(mut self, options: ConsumerOptions) -> Self {
        self.options = options;
        self
    }

    pub fn with_observer(mut self, observer: Arc<dyn ConsumerObserver>) -> Self {
        self.observer = observer;
        self
    }

    /// Run until `shutdown` fires or the broker closes.
    ///
    /// The delivery in flight when `shutdown` fires is settled before
    /// returning.
    pub async fn run(self, shutdown: CancellationToken) -> QueueResult<()> {
        let name = self.handler.name();
        let mut delay = self.options.reconnect_initial;

        info!(handler = name, queue = self.binding.queue, "consumer started");

        'connect: loop {
            if shutdown.is_cancelled() {
                break;
            }

            let mut subscription = match self.broker.subscribe(self.binding.queue).await {
                Ok(sub) => sub,
                Err(e) if e.is_transient() => {
                    warn!(handler = name, error = %e, delay_ms = delay.as_millis() as u64, "subscribe failed, retrying");
                    if !sleep_or_cancel(delay, &shutdown).await {
                        break;
                    }
                    delay = (delay * 2).min(self.options.reconnect_max);
                    continue;
                }
                Err(QueueError::Closed) => break,
                Err(e) => return Err(e),
            };

            loop {
                let next = tokio::select! {
                    _ = shutdown.cancelled() => break 'connect,
                    next = subscription.next_delivery() => next,
                };

                match next {
                    Ok(Some(delivery)) => {
                        delay = self.options.reconnect_initial;
                        if let Err(e) = self.process(delivery, &shutdown).await {
                            if e.is_transient() {
                                warn!(handler = name, error = %e, "settle failed, reconnecting");
                                self.observer.reconnected(name);
                                continue 'connect;
                            }
                            return Err(e);
                        }
                    }
                    Ok(None) => break 'connect,
                    Err(e) if e.is_transient() => {
                        warn!(handler = name, error = %e, delay_ms = delay.as_millis() as u64, "connection lost, reconnecting");
                        self.observer.reconnected(name);
                        if !sleep_or_cancel(delay, &shutdown).await {
                            break 'connect;
                        }
                        delay = (delay * 2).min(self.options.reconnect_max);
                        continue 'connect;
                    }
                    Err(e) => return Err(e),
                }
            }
        }

        info!(handler = name, queue = self.binding.queue, "consumer stopped");
        Ok(())
    }

    async fn process(&self, delivery: Delivery, shutdown: &CancellationToken) -> QueueResult<()> {
        let name = self.handler.name();
        let started = std::time::Instant::now();

        let message = match H::Message::decode(&delivery.payload) {
            Ok(message) => message,
            Err(e) => {
                warn!(handler = name, error = %e, "dropping undecodable message");
                delivery.ack().await?;
                self.observer
                    .settled(name, Disposition::Dropped, started.elapsed());
                return Ok(());
            }
        };

        let meta = MessageMeta {
            message_id: delivery.properties.message_id.clone(),
            redelivered: delivery.redelivered,
            routing_key: delivery.routing_key.clone(),
        };

        let disposition = match self.handler.handle(message, &meta).await {
            HandlerOutcome::Done => {
                delivery.ack().await?;
                Disposition::Acked
            }
            HandlerOutcome::Fatal { reason } => {
                warn!(handler = name, message_id = ?meta.message_id, %reason, "dropping message");
                delivery.ack().await?;
                Disposition::Dropped
            }
            HandlerOutcome::Retryable { reason, backoff } => {
                debug!(handler = name, message_id = ?meta.message_id, %reason, backoff_ms = backoff.as_millis() as u64, "requeueing message");
                // On shutdown requeue immediately so the message is not held.
                sleep_or_cancel(backoff, shutdown).await;
                delivery.nack(true).await?;
                Disposition::Requeued
            }
        };

        self.observer
            .settled(name, disposition, started.elapsed());
        Ok(())
    }
}

/// Sleep for `duration`. Returns false if cancelled first.
async fn sleep_or_cancel(duration: Duration, shutdown: &CancellationToken) -> bool {
    tokio::select! {
        _ = shutdown.cancelled() => false,
        _ = tokio::time::sleep(duration) => true,
    }
}
