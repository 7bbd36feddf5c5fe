use std::sync::{Arc, Mutex};

use serde::Serialize;
use time::OffsetDateTime;

use crate::usage::TokenUsage;

/// One forwarded relay request, written once after the response completes or fails.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RequestLogEntry {
    pub platform: String,
    pub model: String,
    pub provider: String,
    /// Upstream status, or 0 when no response was received.
    pub http_code: i32,
    pub usage: TokenUsage,
    pub is_stream: bool,
    pub duration_sec: f64,
    #[serde(with = "time::serde::rfc3339")]
    pub created_at: OffsetDateTime,
}

/// Destination for request-log rows. Implementations must not block the data path.
pub trait RequestLogSink: Send + Sync {
    fn record(&self, entry: RequestLogEntry);
}

#[derive(Debug, Default, Clone, Copy)]
pub struct NoopRequestLogSink;

impl RequestLogSink for NoopRequestLogSink {
    fn record(&self, _entry: RequestLogEntry) {}
}

/// Keeps rows in memory; handy for tests and diagnostics.
#[derive(Debug, Default, Clone)]
pub struct MemoryRequestLogSink {
    entries: Arc<Mutex<Vec<RequestLogEntry>>>,
}

impl MemoryRequestLogSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn entries(&self) -> Vec<RequestLogEntry> {
        match self.entries.lock() {
            Ok(guard) => guard.clone(),
            Err(poisoned) => poisoned.into_inner().clone(),
        }
    }
}

impl RequestLogSink for MemoryRequestLogSink {
    fn record(&self, entry: RequestLogEntry) {
        if let Ok(mut guard) = self.entries.lock() {
            guard.push(entry);
        }
    }
}
