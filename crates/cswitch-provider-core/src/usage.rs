//! Token-usage extraction from upstream responses.
//!
//! Parsing is best-effort: anything that is not the expected JSON shape is
//! skipped without error.

use bytes::Bytes;
use serde::Serialize;
use serde_json::Value;

use cswitch_common::ClientKind;

use crate::sse::SseParser;

const MAX_BUFFERED_BODY_BYTES: usize = 8 * 1024 * 1024;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct TokenUsage {
    pub input_tokens: i64,
    pub output_tokens: i64,
    pub cache_create_tokens: i64,
    pub cache_read_tokens: i64,
    pub reasoning_tokens: i64,
}

impl TokenUsage {
    pub fn is_empty(&self) -> bool {
        *self == TokenUsage::default()
    }
}

/// Which response dialect a payload is read as.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UsageShape {
    /// `usage` / `message.usage`, summed across events.
    Anthropic,
    /// `response.usage` (or top-level `usage` for buffered bodies), summed.
    Responses,
    /// `usageMetadata`; chunks carry running totals, so the latest wins.
    Gemini,
}

impl From<ClientKind> for UsageShape {
    fn from(kind: ClientKind) -> Self {
        match kind {
            ClientKind::Claude => UsageShape::Anthropic,
            ClientKind::Codex => UsageShape::Responses,
            ClientKind::Gemini => UsageShape::Gemini,
        }
    }
}

/// Folds one decoded event payload into `usage`.
pub fn accumulate(shape: UsageShape, payload: &str, usage: &mut TokenUsage) {
    let payload = payload.trim();
    if payload.is_empty() || payload == "[DONE]" {
        return;
    }
    let Ok(value) = serde_json::from_str::<Value>(payload) else {
        return;
    };
    accumulate_value(shape, &value, usage);
}

pub fn accumulate_value(shape: UsageShape, value: &Value, usage: &mut TokenUsage) {
    match shape {
        UsageShape::Anthropic => accumulate_anthropic(value, usage),
        UsageShape::Responses => accumulate_responses(value, usage),
        UsageShape::Gemini => accumulate_gemini(value, usage),
    }
}

fn accumulate_anthropic(value: &Value, usage: &mut TokenUsage) {
    if let Some(inner) = value.pointer("/message/usage") {
        usage.input_tokens += int(inner, "input_tokens");
        usage.output_tokens += int(inner, "output_tokens");
        usage.cache_create_tokens += int(inner, "cache_creation_input_tokens");
        usage.cache_read_tokens += int(inner, "cache_read_input_tokens");
    }
    // message_delta repeats the cache counts of message_start.
    if let Some(inner) = value.get("usage") {
        usage.input_tokens += int(inner, "input_tokens");
        usage.output_tokens += int(inner, "output_tokens");
    }
}

fn accumulate_responses(value: &Value, usage: &mut TokenUsage) {
    let inner = match value.get("response") {
        Some(response) => response.get("usage"),
        None => value.get("usage"),
    };
    let Some(inner) = inner.filter(|v| v.is_object()) else {
        return;
    };
    usage.input_tokens += int(inner, "input_tokens");
    usage.output_tokens += int(inner, "output_tokens");
    usage.cache_read_tokens += inner
        .pointer("/input_tokens_details/cached_tokens")
        .and_then(Value::as_i64)
        .unwrap_or(0);
    usage.reasoning_tokens += inner
        .pointer("/output_tokens_details/reasoning_tokens")
        .and_then(Value::as_i64)
        .unwrap_or(0);
}

fn accumulate_gemini(value: &Value, usage: &mut TokenUsage) {
    if let Some(items) = value.as_array() {
        for item in items {
            accumulate_gemini(item, usage);
        }
        return;
    }
    let Some(meta) = value.get("usageMetadata").filter(|v| v.is_object()) else {
        return;
    };
    usage.input_tokens = int(meta, "promptTokenCount");
    usage.output_tokens = int(meta, "candidatesTokenCount");
    usage.cache_read_tokens = int(meta, "cachedContentTokenCount");
    usage.reasoning_tokens = int(meta, "thoughtsTokenCount");
}

fn int(value: &Value, key: &str) -> i64 {
    value.get(key).and_then(Value::as_i64).unwrap_or(0)
}

enum TapMode {
    Sse(SseParser),
    Buffered { body: Vec<u8>, overflowed: bool },
}

/// Observes response bytes on their way to the client and keeps running
/// usage totals. Never fails and never alters the bytes.
pub struct UsageTap {
    shape: UsageShape,
    mode: TapMode,
    usage: TokenUsage,
}

impl UsageTap {
    /// `event_stream` selects SSE framing; otherwise the body is buffered
    /// (bounded) and parsed once at the end.
    pub fn new(shape: UsageShape, event_stream: bool) -> Self {
        let mode = if event_stream {
            TapMode::Sse(SseParser::new())
        } else {
            TapMode::Buffered {
                body: Vec::new(),
                overflowed: false,
            }
        };
        Self {
            shape,
            mode,
            usage: TokenUsage::default(),
        }
    }

    pub fn push(&mut self, chunk: &Bytes) {
        match &mut self.mode {
            TapMode::Sse(parser) => {
                for event in parser.push_bytes(chunk) {
                    fold_event_lines(self.shape, &event.data_lines, &mut self.usage);
                }
            }
            TapMode::Buffered { body, overflowed } => {
                if *overflowed {
                    return;
                }
                if body.len() + chunk.len() > MAX_BUFFERED_BODY_BYTES {
                    *overflowed = true;
                    body.clear();
                    return;
                }
                body.extend_from_slice(chunk);
            }
        }
    }

    /// Totals observed so far, without consuming the tap.
    pub fn usage(&self) -> TokenUsage {
        self.usage
    }

    pub fn finish(mut self) -> TokenUsage {
        match &mut self.mode {
            TapMode::Sse(parser) => {
                for event in parser.finish() {
                    fold_event_lines(self.shape, &event.data_lines, &mut self.usage);
                }
            }
            TapMode::Buffered { body, overflowed } => {
                if !*overflowed
                    && let Ok(value) = serde_json::from_slice::<Value>(body)
                {
                    accumulate_value(self.shape, &value, &mut self.usage);
                }
            }
        }
        self.usage
    }
}

/// An event whose joined data is not JSON is retried line by line, which
/// covers upstreams that pack several JSON payloads into one event.
fn fold_event_lines(shape: UsageShape, lines: &[String], usage: &mut TokenUsage) {
    if lines.len() > 1 {
        let joined = lines.join("\n");
        if let Ok(value) = serde_json::from_str::<Value>(&joined) {
            accumulate_value(shape, &value, usage);
            return;
        }
    }
    for line in lines {
        accumulate(shape, line, usage);
    }
}
