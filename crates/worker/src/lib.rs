//! Queue workers for the ferry pipeline.
//!
//! Each worker is a [`ferry_queue::Handler`] driven by its own consumer task:
//! - [`resolver::SourceResolver`] on `source`
//! - [`extractor::TreeExtractor`] on `export_drive`
//! - [`upload_ledger::UploadLedger`] on `upload_logs`
//! - [`invalidator::CredentialInvalidator`] on `cookie`
//! - [`recheck::RecheckWorker`] on `recheck`

pub mod context;
pub mod error;
pub mod extractor;
pub mod invalidator;
pub mod metrics;
pub mod recheck;
pub mod resolver;
pub mod routes;
pub mod upload_ledger;

pub use context::WorkerContext;
pub use error::{WorkerError, WorkerResult};

use ferry_core::config::WorkerKind;
use ferry_core::topology::UPLOAD_LOGS;
use ferry_queue::{Consumer, ConsumerOptions, Handler, QueueResult};
use std::collections::HashSet;
use std::sync::Arc;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;

/// Running consumer tasks, each yielding its kind and exit status.
pub type WorkerSet = JoinSet<(WorkerKind, QueueResult<()>)>;

fn spawn_consumer<H: Handler>(
    set: &mut WorkerSet,
    kind: WorkerKind,
    consumer: Consumer<H>,
    shutdown: CancellationToken,
) {
    set.spawn(async move { (kind, consumer.run(shutdown).await) });
}

/// Start one consumer per requested worker kind. Duplicates are ignored.
pub fn spawn_workers(
    ctx: &WorkerContext,
    kinds: &[WorkerKind],
    shutdown: &CancellationToken,
) -> WorkerSet {
    let options = ConsumerOptions {
        reconnect_initial: ctx.config.broker.reconnect_initial(),
        reconnect_max: ctx.config.broker.reconnect_max(),
    };
    let observer: Arc<dyn ferry_queue::ConsumerObserver> = Arc::new(metrics::PrometheusObserver);
    let mut set = WorkerSet::new();
    let mut started = HashSet::new();

    for &kind in kinds {
        if !started.insert(kind) {
            continue;
        }
        let broker = ctx.broker.clone();
        let token = shutdown.clone();
        match kind {
            WorkerKind::Resolver => {
                let consumer =
                    Consumer::new(broker, Arc::new(resolver::SourceResolver::new(ctx.clone())));
                spawn_consumer(
                    &mut set,
                    kind,
                    consumer.with_options(options).with_observer(observer.clone()),
                    token,
                );
            }
            WorkerKind::Extractor => {
                let consumer =
                    Consumer::new(broker, Arc::new(extractor::TreeExtractor::new(ctx.clone())));
                spawn_consumer(
                    &mut set,
                    kind,
                    consumer.with_options(options).with_observer(observer.clone()),
                    token,
                );
            }
            WorkerKind::UploadLedger => {
                let consumer = Consumer::new(
                    broker,
                    Arc::new(upload_ledger::UploadLedger::new(ctx.clone())),
                )
                .with_binding(UPLOAD_LOGS);
                spawn_consumer(
                    &mut set,
                    kind,
                    consumer.with_options(options).with_observer(observer.clone()),
                    token,
                );
            }
            WorkerKind::Invalidator => {
                let consumer = Consumer::new(
                    broker,
                    Arc::new(invalidator::CredentialInvalidator::new(ctx.clone())),
                );
                spawn_consumer(
                    &mut set,
                    kind,
                    consumer.with_options(options).with_observer(observer.clone()),
                    token,
                );
            }
            WorkerKind::Recheck => {
                let consumer =
                    Consumer::new(broker, Arc::new(recheck::RecheckWorker::new(ctx.clone())));
                spawn_consumer(
                    &mut set,
                    kind,
                    consumer.with_options(options).with_observer(observer.clone()),
                    token,
                );
            }
        }
        tracing::info!(worker = kind.as_str(), "worker started");
    }
    set
}
