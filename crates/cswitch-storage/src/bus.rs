use std::time::Duration;

use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::{self as tokio_time, MissedTickBehavior};

use cswitch_provider_core::RequestLogEntry;

use crate::storage::RelayStorage;

#[derive(Debug, Clone)]
pub struct StorageBusConfig {
    pub request_log_capacity: usize,
    pub request_log_batch_size: usize,
    pub flush_interval: Duration,
    pub retry_delay: Duration,
    /// Attempts per batch before it is dropped.
    pub max_attempts: u32,
}

impl Default for StorageBusConfig {
    fn default() -> Self {
        Self {
            request_log_capacity: 65_536,
            request_log_batch_size: 200,
            flush_interval: Duration::from_millis(200),
            retry_delay: Duration::from_millis(200),
            max_attempts: 5,
        }
    }
}

/// Background writer for append-only rows. Senders never wait on the database.
pub struct StorageBus {
    pub request_log_tx: mpsc::Sender<RequestLogEntry>,
    handles: Vec<JoinHandle<()>>,
}

impl StorageBus {
    pub fn spawn(storage: RelayStorage, config: StorageBusConfig) -> Self {
        let (request_log_tx, request_log_rx) = mpsc::channel(config.request_log_capacity.max(1));

        let handles = vec![tokio::spawn(request_log_writer(
            storage,
            request_log_rx,
            config,
        ))];

        Self {
            request_log_tx,
            handles,
        }
    }

    /// Closes the channel and waits until buffered rows are flushed.
    pub async fn shutdown(self) {
        let Self {
            request_log_tx,
            handles,
        } = self;
        drop(request_log_tx);
        for handle in handles {
            if let Err(err) = handle.await {
                tracing::warn!(event = "storage.bus.join_failed", error = %err);
            }
        }
    }
}

async fn request_log_writer(
    storage: RelayStorage,
    mut rx: mpsc::Receiver<RequestLogEntry>,
    config: StorageBusConfig,
) {
    let batch_size = config.request_log_batch_size.max(1);
    let mut buffer = Vec::with_capacity(batch_size);
    let mut ticker = tokio_time::interval(config.flush_interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            received = rx.recv() => match received {
                Some(entry) => {
                    buffer.push(entry);
                    if buffer.len() >= batch_size {
                        flush_request_logs(&storage, &mut buffer, &config).await;
                    }
                }
                None => {
                    if !buffer.is_empty() {
                        flush_request_logs(&storage, &mut buffer, &config).await;
                    }
                    break;
                }
            },
            _ = ticker.tick() => {
                if !buffer.is_empty() {
                    flush_request_logs(&storage, &mut buffer, &config).await;
                }
            }
        }
    }
}

async fn flush_request_logs(
    storage: &RelayStorage,
    buffer: &mut Vec<RequestLogEntry>,
    config: &StorageBusConfig,
) {
    let mut batch = Vec::new();
    std::mem::swap(buffer, &mut batch);
    let rows = batch.len();

    let mut attempt = 0;
    loop {
        attempt += 1;
        match storage.insert_request_logs(batch.clone()).await {
            Ok(()) => break,
            Err(err) if attempt < config.max_attempts.max(1) => {
                tracing::warn!(event = "request_log.write_failed", attempt, rows, error = %err);
                tokio_time::sleep(config.retry_delay).await;
            }
            Err(err) => {
                tracing::warn!(event = "request_log.dropped", attempt, rows, error = %err);
                break;
            }
        }
    }
}
