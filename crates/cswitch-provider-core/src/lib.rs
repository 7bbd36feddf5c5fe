//! Provider-side building blocks of the relay.
//!
//! This crate does not depend on axum, a database, or a concrete HTTP client.
//! It holds the provider model and registry, model compatibility rules, the
//! blacklist state machine, and usage extraction; higher layers do the IO.

pub mod errors;
pub mod headers;
pub mod model;
pub mod provider;
pub mod registry;
pub mod reliability;
pub mod request_log;
pub mod sse;
pub mod upstream;
pub mod usage;

pub use errors::{ProviderFindings, RegistryError, RegistryResult, ValidationReport};
pub use headers::{
    Headers, collapse_last_wins, has_sse_content_type, header_get, header_remove, header_set,
    is_hop_by_hop_or_framing_header,
};
pub use model::{
    FindingKind, Severity, ValidationFinding, apply_wildcard_mapping, match_wildcard,
};
pub use provider::{
    GeminiProvider, ModelMapping, Provider, ProviderId, active_gemini_provider,
    default_gemini_providers, default_providers,
};
pub use registry::{ProviderStore, validate_all};
pub use reliability::{
    BlacklistLevelConfig, BlacklistPolicy, BlacklistRecord, BlacklistStatus, FailureOutcome,
    FallbackMode, IgnoreReason, MAX_BLACKLIST_LEVEL, SuccessOutcome, apply_failure,
    apply_level_reset, apply_manual_reset, apply_success,
};
pub use request_log::{
    MemoryRequestLogSink, NoopRequestLogSink, RequestLogEntry, RequestLogSink,
};
pub use sse::{SseEvent, SseParser};
pub use upstream::{
    ByteStream, UpstreamBody, UpstreamFailure, UpstreamHttpRequest,
    UpstreamHttpResponse, UpstreamTransportErrorKind, is_success_status,
};
pub use usage::{TokenUsage, UsageShape, UsageTap};
