use std::fmt;

use bytes::Bytes;
use futures_util::stream::BoxStream;

use crate::headers::Headers;

pub type ByteStream = BoxStream<'static, Result<Bytes, UpstreamFailure>>;

/// Every relayed call is a POST.
#[derive(Debug, Clone)]
pub struct UpstreamHttpRequest {
    pub url: String,
    pub headers: Headers,
    pub body: Option<Bytes>,
}

pub enum UpstreamBody {
    Bytes(Bytes),
    Stream(ByteStream),
}

impl fmt::Debug for UpstreamBody {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            UpstreamBody::Bytes(bytes) => f.debug_tuple("Bytes").field(&bytes.len()).finish(),
            UpstreamBody::Stream(_) => f.write_str("Stream"),
        }
    }
}

#[derive(Debug)]
pub struct UpstreamHttpResponse {
    pub status: u16,
    pub headers: Headers,
    pub body: UpstreamBody,
}

impl UpstreamHttpResponse {
    /// 2xx, plus the bare status 0 some upstreams produce on otherwise
    /// successful non-streaming replies.
    pub fn is_success(&self) -> bool {
        is_success_status(self.status)
    }
}

pub fn is_success_status(status: u16) -> bool {
    status == 0 || (200..300).contains(&status)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UpstreamTransportErrorKind {
    Timeout,
    ReadTimeout,
    Connect,
    Dns,
    Tls,
    Other,
}

impl UpstreamTransportErrorKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            UpstreamTransportErrorKind::Timeout => "timeout",
            UpstreamTransportErrorKind::ReadTimeout => "read_timeout",
            UpstreamTransportErrorKind::Connect => "connect",
            UpstreamTransportErrorKind::Dns => "dns",
            UpstreamTransportErrorKind::Tls => "tls",
            UpstreamTransportErrorKind::Other => "other",
        }
    }
}

/// Transport-level failure (no HTTP response, or the body broke mid-read).
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("{} error: {message}", .kind.as_str())]
pub struct UpstreamFailure {
    pub kind: UpstreamTransportErrorKind,
    pub message: String,
}

impl UpstreamFailure {
    pub fn new(kind: UpstreamTransportErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
        }
    }
}
