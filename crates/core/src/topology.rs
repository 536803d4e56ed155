//! Queue topology: one direct exchange, one routing key per message kind.

use std::fmt;

/// Exchange every queue is bound to.
pub const EXCHANGE: &str = "default";

/// Message routes. Each route has a routing key and a primary queue.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Route {
    Source,
    Upload,
    Cookie,
    Recheck,
    ExportDrive,
}

impl Route {
    pub const ALL: [Route; 5] = [
        Route::Source,
        Route::Upload,
        Route::Cookie,
        Route::Recheck,
        Route::ExportDrive,
    ];

    pub fn routing_key(&self) -> &'static str {
        match self {
            Self::Source => "default.source",
            Self::Upload => "default.upload",
            Self::Cookie => "default.cookie",
            Self::Recheck => "default.recheck",
            Self::ExportDrive => "default.export_drive",
        }
    }

    /// Queue consumed by the worker that owns this route.
    pub fn queue(&self) -> &'static str {
        match self {
            Self::Source => "source",
            Self::Upload => "upload",
            Self::Cookie => "cookie",
            Self::Recheck => "recheck",
            Self::ExportDrive => "export_drive",
        }
    }

    /// Look up a route by its primary queue name.
    pub fn from_queue(queue: &str) -> Option<Route> {
        Self::ALL.into_iter().find(|route| route.queue() == queue)
    }

    pub fn binding(&self) -> QueueBinding {
        QueueBinding {
            queue: self.queue(),
            routing_key: self.routing_key(),
        }
    }
}

impl fmt::Display for Route {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.routing_key())
    }
}

/// A durable queue bound to [`EXCHANGE`] by a routing key.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct QueueBinding {
    pub queue: &'static str,
    pub routing_key: &'static str,
}

/// Copy of every upload request, consumed by the upload ledger.
pub const UPLOAD_LOGS: QueueBinding = QueueBinding {
    queue: "upload_logs",
    routing_key: "default.upload",
};

/// Every binding the pipeline declares at startup.
pub fn bindings() -> Vec<QueueBinding> {
    let mut all: Vec<QueueBinding> = Route::ALL.iter().map(Route::binding).collect();
    all.push(UPLOAD_LOGS);
    all
}

/// Bindings for a process that is its own broker. Nothing in-process drains
/// the `upload` queue, so uploads only land on the ledger copy.
pub fn in_process_bindings() -> Vec<QueueBinding> {
    bindings()
        .into_iter()
        .filter(|b| *b != Route::Upload.binding())
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_upload_key_fans_out_to_two_queues() {
        let upload: Vec<_> = bindings()
            .into_iter()
            .filter(|b| b.routing_key == Route::Upload.routing_key())
            .map(|b| b.queue)
            .collect();
        assert_eq!(upload, vec!["upload", "upload_logs"]);
    }

    #[test]
    fn test_in_process_bindings_keep_ledger_copy_only() {
        let local = in_process_bindings();
        assert_eq!(local.len(), bindings().len() - 1);
        assert!(local.contains(&UPLOAD_LOGS));
        assert!(!local.iter().any(|b| b.queue == "upload"));
    }

    #[test]
    fn test_from_queue() {
        assert_eq!(Route::from_queue("export_drive"), Some(Route::ExportDrive));
        assert_eq!(Route::from_queue("upload_logs"), None);
    }

    #[test]
    fn test_routing_keys_are_exchange_prefixed() {
        for route in Route::ALL {
            assert!(route.routing_key().starts_with("default."));
        }
    }
}
