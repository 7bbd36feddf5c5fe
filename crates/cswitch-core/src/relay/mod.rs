//! Request relay: candidate selection, model rewrite, forwarding, usage tap
//! and outcome recording.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Instant;

use bytes::Bytes;
use futures_util::StreamExt;
use tokio::sync::mpsc;

use cswitch_common::{ClientKind, Clock};
use cswitch_provider_core::{
    ByteStream, Headers, ProviderStore, RequestLogSink, UpstreamBody,
    UpstreamHttpRequest, UsageShape, has_sse_content_type, header_get,
};

use crate::blacklist::BlacklistTracker;
use crate::error::ProxyError;
use crate::upstream_client::UpstreamClient;

mod gemini;
mod pipe;
pub mod request;
pub mod select;

pub use request::{BodyPatchError, RequestMeta, patch_model};
pub use select::{Selection, SelectionError, select_provider};

use pipe::{PipeJob, failed_log_entry, record_failure, spawn_pipe};
use request::{last_wins_query, target_url, upstream_headers, with_bearer};

/// Inbound request as the HTTP layer hands it over.
#[derive(Debug, Clone, Default)]
pub struct RelayRequest {
    pub headers: Headers,
    pub query: Option<String>,
    pub body: Bytes,
}

#[derive(Debug)]
pub enum RelayBody {
    Bytes(Bytes),
    Stream(mpsc::Receiver<Bytes>),
}

#[derive(Debug)]
pub struct RelayResponse {
    pub status: u16,
    pub headers: Headers,
    pub body: RelayBody,
}

/// Upstream path each completion family is forwarded to.
pub fn endpoint_for(kind: ClientKind) -> Option<&'static str> {
    match kind {
        ClientKind::Claude => Some("/v1/messages"),
        ClientKind::Codex => Some("/responses"),
        ClientKind::Gemini => None,
    }
}

#[derive(Clone)]
pub struct RelayEngine {
    registry: Arc<ProviderStore>,
    tracker: Arc<BlacklistTracker>,
    client: Arc<dyn UpstreamClient>,
    request_log: Arc<dyn RequestLogSink>,
    clock: Arc<dyn Clock>,
}

impl RelayEngine {
    pub fn new(
        registry: Arc<ProviderStore>,
        tracker: Arc<BlacklistTracker>,
        client: Arc<dyn UpstreamClient>,
        request_log: Arc<dyn RequestLogSink>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            registry,
            tracker,
            client,
            request_log,
            clock,
        }
    }

    pub fn registry(&self) -> &Arc<ProviderStore> {
        &self.registry
    }

    pub fn tracker(&self) -> &Arc<BlacklistTracker> {
        &self.tracker
    }

    /// Relays one completion request of the Claude or Codex family.
    pub async fn relay(
        &self,
        kind: ClientKind,
        req: RelayRequest,
    ) -> Result<RelayResponse, ProxyError> {
        let Some(endpoint) = endpoint_for(kind) else {
            return Err(ProxyError::not_found(format!(
                "{kind} requests are not relayed through this endpoint"
            )));
        };
        let platform = kind.as_str();
        let meta = RequestMeta::parse(&req.body);
        if meta.model.is_none() {
            tracing::warn!(
                event = "relay.model_missing",
                platform,
                "request has no model; model filtering and mapping are skipped"
            );
        }

        let providers = self.registry.load(kind).await.map_err(|err| {
            tracing::warn!(event = "relay.providers_load_failed", platform, error = %err);
            ProxyError::internal("failed to load providers")
        })?;

        let blacklisted = match self.tracker.blacklisted_providers(platform).await {
            Ok(blacklisted) => blacklisted,
            Err(err) => {
                tracing::warn!(event = "relay.blacklist_read_failed", platform, error = %err);
                HashMap::new()
            }
        };

        let selection =
            select_provider(&providers, meta.model.as_deref(), &blacklisted).map_err(|err| {
                tracing::warn!(event = "relay.no_provider", platform, error = %err);
                ProxyError::not_found(err.to_string())
            })?;
        let provider = selection.provider;
        tracing::info!(
            event = "relay.selected",
            platform,
            provider = %provider.name,
            provider_level = selection.level,
            candidates = selection.candidates,
            levels = selection.levels,
        );

        let mut body = req.body.clone();
        let model = match meta.model.as_deref() {
            Some(requested) => {
                let effective = provider.effective_model(requested);
                if effective != requested {
                    body = patch_model(&req.body, &effective).map_err(|err| {
                        tracing::warn!(
                            event = "relay.model_rewrite_failed",
                            platform,
                            provider = %provider.name,
                            error = %err,
                        );
                        ProxyError::internal(format!("model mapping failed: {err}"))
                    })?;
                    tracing::info!(
                        event = "relay.model_mapped",
                        platform,
                        provider = %provider.name,
                        from = requested,
                        to = %effective,
                    );
                }
                effective
            }
            None => String::new(),
        };

        let query = last_wins_query(req.query.as_deref(), &[]);
        let upstream_req = UpstreamHttpRequest {
            url: target_url(&provider.api_url, endpoint, query.as_deref()),
            headers: with_bearer(upstream_headers(&req.headers), provider.api_key.trim()),
            body: Some(body),
        };

        let mut job = PipeJob {
            platform,
            provider: provider.name.clone(),
            model,
            status: 0,
            is_stream: meta.stream,
            shape: UsageShape::from(kind),
            event_stream: meta.stream,
            started: Instant::now(),
            tracker: Some(self.tracker.clone()),
            request_log: self.request_log.clone(),
            clock: self.clock.clone(),
        };

        let resp = match self.client.send(upstream_req).await {
            Ok(resp) => resp,
            Err(failure) => {
                return Err(self.fail(&job, failure.to_string()).await);
            }
        };

        job.status = resp.status;
        if !resp.is_success() {
            return Err(self.fail(&job, format!("upstream status {}", resp.status)).await);
        }
        if resp.status == 0 {
            tracing::warn!(
                event = "relay.status_zero",
                platform,
                provider = %job.provider,
                "upstream answered without a status; treating as success"
            );
        }

        job.event_stream = is_event_stream(&resp.headers, meta.stream);
        let status = if resp.status == 0 { 200 } else { resp.status };
        let rx = spawn_pipe(job, into_byte_stream(resp.body));
        Ok(RelayResponse {
            status,
            headers: resp.headers,
            body: RelayBody::Stream(rx),
        })
    }

    async fn fail(&self, job: &PipeJob, message: String) -> ProxyError {
        let elapsed = job.started.elapsed().as_secs_f64();
        tracing::warn!(
            event = "relay.failed",
            platform = job.platform,
            provider = %job.provider,
            status = job.status,
            error = %message,
            elapsed_secs = elapsed,
        );
        record_failure(&self.tracker, job.platform, &job.provider).await;
        self.request_log.record(failed_log_entry(job));
        ProxyError::bad_gateway(&job.provider, message, elapsed)
    }
}

fn is_event_stream(headers: &Headers, requested_stream: bool) -> bool {
    has_sse_content_type(headers) || (requested_stream && header_get(headers, "content-type").is_none())
}

fn into_byte_stream(body: UpstreamBody) -> ByteStream {
    match body {
        UpstreamBody::Stream(stream) => stream,
        UpstreamBody::Bytes(bytes) => futures_util::stream::once(async move { Ok(bytes) }).boxed(),
    }
}
