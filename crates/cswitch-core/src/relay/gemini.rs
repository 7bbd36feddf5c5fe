use std::time::Instant;

use http::StatusCode;

use cswitch_common::ClientKind;
use cswitch_provider_core::{
    UpstreamBody, UpstreamHttpRequest, UsageShape, active_gemini_provider,
    header_get, header_remove, header_set,
};

use super::pipe::{PipeJob, failed_log_entry, spawn_pipe};
use super::request::{last_wins_query, target_url, upstream_headers};
use super::{RelayBody, RelayEngine, RelayRequest, RelayResponse, into_byte_stream, is_event_stream};
use crate::error::ProxyError;

const GEMINI_KEY_HEADER: &str = "x-goog-api-key";
const STREAM_MARKER: &str = ":streamGenerateContent";

impl RelayEngine {
    /// Relays a Gemini request to the first active Gemini provider. The path
    /// after the version segment is forwarded verbatim. There is no level
    /// selection and the blacklist is never consulted or updated.
    pub async fn relay_gemini(
        &self,
        version: &str,
        rest: &str,
        req: RelayRequest,
    ) -> Result<RelayResponse, ProxyError> {
        let platform = ClientKind::Gemini.as_str();
        let endpoint = format!(
            "/{}/{}",
            version.trim_matches('/'),
            rest.trim_start_matches('/')
        );
        let is_stream = endpoint.contains(STREAM_MARKER);

        let providers = self.registry.load_gemini().await.map_err(|err| {
            tracing::warn!(event = "relay.providers_load_failed", platform, error = %err);
            ProxyError::internal("failed to load providers")
        })?;
        if providers.is_empty() {
            return Err(ProxyError::not_found("no gemini providers configured"));
        }
        let Some(provider) = active_gemini_provider(&providers) else {
            return Err(ProxyError::not_found("no active gemini provider"));
        };
        tracing::info!(
            event = "relay.selected",
            platform,
            provider = %provider.name,
            endpoint = %endpoint,
        );

        let mut headers = upstream_headers(&req.headers);
        header_remove(&mut headers, GEMINI_KEY_HEADER);
        let api_key = provider.api_key.trim();
        if !api_key.is_empty() {
            header_set(&mut headers, GEMINI_KEY_HEADER, api_key);
        }
        let query = last_wins_query(req.query.as_deref(), &["key"]);
        let upstream_req = UpstreamHttpRequest {
            url: target_url(&provider.base_url, &endpoint, query.as_deref()),
            headers,
            body: Some(req.body),
        };

        let mut job = PipeJob {
            platform,
            provider: provider.name.clone(),
            model: model_from_path(&endpoint).unwrap_or_else(|| provider.model.clone()),
            status: 0,
            is_stream,
            shape: UsageShape::Gemini,
            event_stream: is_stream,
            started: Instant::now(),
            tracker: None,
            request_log: self.request_log.clone(),
            clock: self.clock.clone(),
        };

        let resp = match self.client.send(upstream_req).await {
            Ok(resp) => resp,
            Err(failure) => {
                let elapsed = job.started.elapsed().as_secs_f64();
                tracing::warn!(
                    event = "relay.failed",
                    platform,
                    provider = %job.provider,
                    error = %failure,
                    elapsed_secs = elapsed,
                );
                self.request_log.record(failed_log_entry(&job));
                return Err(ProxyError::bad_gateway(&job.provider, failure.to_string(), elapsed));
            }
        };
        job.status = resp.status;

        if !resp.is_success() {
            tracing::warn!(
                event = "relay.upstream_error",
                platform,
                provider = %job.provider,
                status = resp.status,
            );
            self.request_log.record(failed_log_entry(&job));
            let status = StatusCode::from_u16(resp.status).unwrap_or(StatusCode::BAD_GATEWAY);
            let mut headers = Vec::new();
            if let Some(content_type) = header_get(&resp.headers, "content-type") {
                headers.push(("content-type".to_string(), content_type.to_string()));
            }
            let body = match resp.body {
                UpstreamBody::Bytes(bytes) => bytes,
                UpstreamBody::Stream(_) => Default::default(),
            };
            return Ok(RelayResponse {
                status: status.as_u16(),
                headers,
                body: RelayBody::Bytes(body),
            });
        }

        job.event_stream = is_event_stream(&resp.headers, is_stream);
        let status = if resp.status == 0 { 200 } else { resp.status };
        let rx = spawn_pipe(job, into_byte_stream(resp.body));
        Ok(RelayResponse {
            status,
            headers: resp.headers,
            body: RelayBody::Stream(rx),
        })
    }
}

/// `models/{model}:{method}` anywhere in the path.
fn model_from_path(endpoint: &str) -> Option<String> {
    let start = endpoint.find("models/")? + "models/".len();
    let rest = &endpoint[start..];
    let end = rest.find([':', '/', '?']).unwrap_or(rest.len());
    let model = &rest[..end];
    (!model.is_empty()).then(|| model.to_string())
}
