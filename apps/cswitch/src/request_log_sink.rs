use tokio::sync::mpsc;
use tokio::sync::mpsc::error::TrySendError;

use cswitch_provider_core::{RequestLogEntry, RequestLogSink};
use cswitch_storage::StorageBus;

/// Hands request-log rows to the storage bus without waiting.
#[derive(Clone)]
pub struct StorageRequestLogSink {
    tx: mpsc::Sender<RequestLogEntry>,
}

impl StorageRequestLogSink {
    pub fn new(bus: &StorageBus) -> Self {
        Self {
            tx: bus.request_log_tx.clone(),
        }
    }
}

impl RequestLogSink for StorageRequestLogSink {
    fn record(&self, entry: RequestLogEntry) {
        match self.tx.try_send(entry) {
            Ok(()) => {}
            Err(TrySendError::Full(entry)) => {
                tracing::warn!(
                    event = "request_log.dropped",
                    reason = "queue_full",
                    platform = %entry.platform,
                    provider = %entry.provider,
                );
            }
            Err(TrySendError::Closed(_)) => {
                tracing::warn!(event = "request_log.dropped", reason = "bus_closed");
            }
        }
    }
}
