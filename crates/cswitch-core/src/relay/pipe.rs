use std::sync::Arc;
use std::time::Instant;

use bytes::Bytes;
use futures_util::StreamExt;
use tokio::sync::mpsc;

use cswitch_common::Clock;
use cswitch_provider_core::{ByteStream, RequestLogEntry, RequestLogSink, TokenUsage, UsageShape, UsageTap};

use crate::blacklist::BlacklistTracker;

const PIPE_CAPACITY: usize = 32;

/// Everything the copy task needs to account for one forwarded response.
pub(crate) struct PipeJob {
    pub platform: &'static str,
    pub provider: String,
    pub model: String,
    pub status: u16,
    pub is_stream: bool,
    pub shape: UsageShape,
    pub event_stream: bool,
    pub started: Instant,
    /// Gemini traffic is logged but never feeds the blacklist.
    pub tracker: Option<Arc<BlacklistTracker>>,
    pub request_log: Arc<dyn RequestLogSink>,
    pub clock: Arc<dyn Clock>,
}

impl PipeJob {
    fn log_entry(&self, usage: TokenUsage) -> RequestLogEntry {
        RequestLogEntry {
            platform: self.platform.to_string(),
            model: self.model.clone(),
            provider: self.provider.clone(),
            http_code: i32::from(self.status),
            usage,
            is_stream: self.is_stream,
            duration_sec: self.started.elapsed().as_secs_f64(),
            created_at: self.clock.now(),
        }
    }
}

/// Copies `upstream` into the returned receiver while tapping usage. The
/// outcome is recorded and the log row written once the copy ends, whether
/// it completed, the upstream broke, or the client went away.
pub(crate) fn spawn_pipe(job: PipeJob, mut upstream: ByteStream) -> mpsc::Receiver<Bytes> {
    let (tx, rx) = mpsc::channel::<Bytes>(PIPE_CAPACITY);

    tokio::spawn(async move {
        let mut tap = UsageTap::new(job.shape, job.event_stream);
        let mut copy_error: Option<String> = None;

        loop {
            let next = tokio::select! {
                next = upstream.next() => next,
                _ = tx.closed() => {
                    copy_error = Some("client disconnected".to_string());
                    break;
                }
            };
            match next {
                Some(Ok(chunk)) => {
                    tap.push(&chunk);
                    if tx.send(chunk).await.is_err() {
                        copy_error = Some("client disconnected".to_string());
                        break;
                    }
                }
                Some(Err(failure)) => {
                    copy_error = Some(failure.to_string());
                    break;
                }
                None => break,
            }
        }
        drop(upstream);
        drop(tx);

        let usage = tap.finish();
        match &copy_error {
            None => {
                tracing::info!(
                    event = "relay.completed",
                    platform = job.platform,
                    provider = %job.provider,
                    status = job.status,
                    input_tokens = usage.input_tokens,
                    output_tokens = usage.output_tokens,
                    elapsed_secs = job.started.elapsed().as_secs_f64(),
                );
                if let Some(tracker) = &job.tracker {
                    record_success(tracker, job.platform, &job.provider).await;
                }
            }
            Some(error) => {
                tracing::warn!(
                    event = "relay.copy_failed",
                    platform = job.platform,
                    provider = %job.provider,
                    error = %error,
                    elapsed_secs = job.started.elapsed().as_secs_f64(),
                );
                if let Some(tracker) = &job.tracker {
                    record_failure(tracker, job.platform, &job.provider).await;
                }
            }
        }
        job.request_log.record(job.log_entry(usage));
    });

    rx
}

/// Log row for a request that never produced a successful body.
pub(crate) fn failed_log_entry(job: &PipeJob) -> RequestLogEntry {
    job.log_entry(TokenUsage::default())
}

pub(crate) async fn record_success(tracker: &BlacklistTracker, platform: &str, provider: &str) {
    if let Err(err) = tracker.record_success(platform, provider).await {
        tracing::warn!(event = "blacklist.success_write_failed", platform, provider, error = %err);
    }
}

pub(crate) async fn record_failure(tracker: &BlacklistTracker, platform: &str, provider: &str) {
    if let Err(err) = tracker.record_failure(platform, provider).await {
        tracing::warn!(event = "blacklist.failure_write_failed", platform, provider, error = %err);
    }
}
