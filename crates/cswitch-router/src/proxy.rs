use std::convert::Infallible;
use std::sync::Arc;
use std::time::Instant;

use axum::Router;
use axum::body::Body;
use axum::extract::{DefaultBodyLimit, Extension, Path, RawQuery, State};
use axum::http::{HeaderMap, HeaderName, HeaderValue, StatusCode, header};
use axum::middleware::{self, Next};
use axum::response::{IntoResponse, Response};
use axum::routing::post;
use bytes::Bytes;
use futures_util::StreamExt;
use tokio_stream::wrappers::ReceiverStream;
use tracing::Instrument;

use cswitch_common::ClientKind;
use cswitch_core::{ProxyError, RelayBody, RelayEngine, RelayRequest, RelayResponse};
use cswitch_provider_core::{Headers, has_sse_content_type, is_hop_by_hop_or_framing_header};

#[derive(Clone)]
pub struct RelayState {
    pub engine: Arc<RelayEngine>,
}

#[derive(Clone)]
struct RequestTraceId(String);

/// Relay endpoints for the three client families.
pub fn relay_router(engine: Arc<RelayEngine>) -> Router {
    let state = RelayState { engine };

    Router::new()
        .route("/v1/messages", post(claude_messages))
        .route("/responses", post(codex_responses))
        .route("/gemini/v1beta/{*rest}", post(gemini_v1beta))
        .route("/gemini/v1/{*rest}", post(gemini_v1))
        // Long-context completions routinely exceed the default body cap.
        .layer(DefaultBodyLimit::disable())
        .layer(middleware::from_fn(trace_request))
        .with_state(state)
}

async fn trace_request(mut req: axum::http::Request<Body>, next: Next) -> Response {
    let trace_id = uuid::Uuid::now_v7().to_string();
    let method = req.method().clone();
    let path = req.uri().path().to_string();
    req.extensions_mut().insert(RequestTraceId(trace_id.clone()));

    let started = Instant::now();
    let resp = next.run(req).await;
    tracing::info!(
        event = "http.request",
        trace_id = %trace_id,
        method = %method,
        path = %path,
        status = resp.status().as_u16(),
        header_latency_ms = started.elapsed().as_millis() as u64,
    );
    resp
}

async fn claude_messages(
    State(state): State<RelayState>,
    Extension(trace_id): Extension<RequestTraceId>,
    headers: HeaderMap,
    RawQuery(query): RawQuery,
    body: Bytes,
) -> Response {
    relay_completion(state, ClientKind::Claude, trace_id, headers, query, body).await
}

async fn codex_responses(
    State(state): State<RelayState>,
    Extension(trace_id): Extension<RequestTraceId>,
    headers: HeaderMap,
    RawQuery(query): RawQuery,
    body: Bytes,
) -> Response {
    relay_completion(state, ClientKind::Codex, trace_id, headers, query, body).await
}

async fn gemini_v1beta(
    State(state): State<RelayState>,
    Extension(trace_id): Extension<RequestTraceId>,
    Path(rest): Path<String>,
    headers: HeaderMap,
    RawQuery(query): RawQuery,
    body: Bytes,
) -> Response {
    relay_gemini(state, "v1beta", rest, trace_id, headers, query, body).await
}

async fn gemini_v1(
    State(state): State<RelayState>,
    Extension(trace_id): Extension<RequestTraceId>,
    Path(rest): Path<String>,
    headers: HeaderMap,
    RawQuery(query): RawQuery,
    body: Bytes,
) -> Response {
    relay_gemini(state, "v1", rest, trace_id, headers, query, body).await
}

async fn relay_completion(
    state: RelayState,
    kind: ClientKind,
    trace_id: RequestTraceId,
    headers: HeaderMap,
    query: Option<String>,
    body: Bytes,
) -> Response {
    let span = tracing::info_span!("relay", trace_id = %trace_id.0, platform = kind.as_str());
    let req = RelayRequest {
        headers: headers_to_vec(&headers),
        query,
        body,
    };
    match state.engine.relay(kind, req).instrument(span).await {
        Ok(resp) => to_axum_response(resp),
        Err(err) => error_response(err),
    }
}

async fn relay_gemini(
    state: RelayState,
    version: &str,
    rest: String,
    trace_id: RequestTraceId,
    headers: HeaderMap,
    query: Option<String>,
    body: Bytes,
) -> Response {
    let span = tracing::info_span!("relay", trace_id = %trace_id.0, platform = "gemini");
    let req = RelayRequest {
        headers: headers_to_vec(&headers),
        query,
        body,
    };
    match state
        .engine
        .relay_gemini(version, &rest, req)
        .instrument(span)
        .await
    {
        Ok(resp) => to_axum_response(resp),
        Err(err) => error_response(err),
    }
}

fn error_response(err: ProxyError) -> Response {
    let mut resp = Response::new(Body::from(err.body));
    *resp.status_mut() = err.status;
    resp.headers_mut().insert(
        header::CONTENT_TYPE,
        HeaderValue::from_static("application/json"),
    );
    resp
}

/// Converts a relay response into an axum response, dropping framing headers
/// and hinting intermediaries not to buffer event streams.
pub fn to_axum_response(resp: RelayResponse) -> Response {
    let sse_stream =
        has_sse_content_type(&resp.headers) && matches!(&resp.body, RelayBody::Stream(_));
    let mut builder = Response::builder().status(resp.status);
    if let Some(h) = builder.headers_mut() {
        for (k, v) in resp.headers {
            if is_hop_by_hop_or_framing_header(&k) {
                continue;
            }
            if let (Ok(name), Ok(value)) = (
                HeaderName::from_bytes(k.as_bytes()),
                HeaderValue::from_str(&v),
            ) {
                h.append(name, value);
            }
        }
        if sse_stream {
            h.entry(header::CACHE_CONTROL)
                .or_insert(HeaderValue::from_static("no-cache"));
            h.entry(HeaderName::from_static("x-accel-buffering"))
                .or_insert(HeaderValue::from_static("no"));
        }
    }

    let body = match resp.body {
        RelayBody::Bytes(bytes) => Body::from(bytes),
        RelayBody::Stream(rx) => {
            let stream = ReceiverStream::new(rx).map(Ok::<_, Infallible>);
            Body::from_stream(stream)
        }
    };

    builder.body(body).unwrap_or_else(|_| {
        (StatusCode::INTERNAL_SERVER_ERROR, "response_build_failed").into_response()
    })
}

fn headers_to_vec(headers: &HeaderMap) -> Headers {
    let mut out: Headers = Vec::new();
    for (name, value) in headers {
        if let Ok(v) = value.to_str() {
            out.push((name.as_str().to_string(), v.to_string()));
        }
    }
    out
}
