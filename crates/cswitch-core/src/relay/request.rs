use bytes::Bytes;
use serde_json::Value;

use cswitch_provider_core::{
    Headers, collapse_last_wins, header_get, header_remove, header_set,
    is_hop_by_hop_or_framing_header,
};

/// Fields the relay reads from an otherwise opaque JSON body.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RequestMeta {
    pub model: Option<String>,
    pub stream: bool,
}

impl RequestMeta {
    /// Never fails: a body that is not a JSON object yields no model and no stream flag.
    pub fn parse(body: &[u8]) -> Self {
        let Ok(Value::Object(map)) = serde_json::from_slice::<Value>(body) else {
            return Self::default();
        };
        let model = map
            .get("model")
            .and_then(Value::as_str)
            .map(str::trim)
            .filter(|model| !model.is_empty())
            .map(str::to_string);
        let stream = map.get("stream").and_then(Value::as_bool).unwrap_or(false);
        Self { model, stream }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum BodyPatchError {
    #[error("request body is not valid json: {0}")]
    InvalidJson(#[from] serde_json::Error),
    #[error("request body is not a json object")]
    NotAnObject,
    #[error("request body has no model field")]
    MissingModel,
}

/// Replaces the top-level `model` string, keeping every other field as sent.
pub fn patch_model(body: &[u8], model: &str) -> Result<Bytes, BodyPatchError> {
    let mut value: Value = serde_json::from_slice(body)?;
    let map = value.as_object_mut().ok_or(BodyPatchError::NotAnObject)?;
    let slot = map.get_mut("model").ok_or(BodyPatchError::MissingModel)?;
    *slot = Value::String(model.to_string());
    Ok(Bytes::from(serde_json::to_vec(&value)?))
}

/// Client headers as sent upstream. Repeated names keep their last value;
/// transport-owned headers and client credentials are dropped.
pub fn upstream_headers(client: &Headers) -> Headers {
    let mut headers: Headers = collapse_last_wins(client.clone())
        .into_iter()
        .filter(|(name, _)| {
            !is_hop_by_hop_or_framing_header(name)
                && name != "host"
                && name != "accept-encoding"
        })
        .collect();
    header_remove(&mut headers, "authorization");
    if header_get(&headers, "accept").is_none() {
        header_set(&mut headers, "accept", "application/json");
    }
    headers
}

pub fn with_bearer(mut headers: Headers, api_key: &str) -> Headers {
    header_set(&mut headers, "authorization", format!("Bearer {api_key}"));
    headers
}

/// Re-encodes a query string with one value per key, the last one winning.
/// Keys listed in `drop` are removed.
pub fn last_wins_query(raw: Option<&str>, drop: &[&str]) -> Option<String> {
    let raw = raw?.trim_start_matches('?');
    if raw.is_empty() {
        return None;
    }
    let pairs: Vec<(String, String)> = serde_urlencoded::from_str(raw).ok()?;
    let mut out: Vec<(String, String)> = Vec::with_capacity(pairs.len());
    for (key, value) in pairs {
        if drop.contains(&key.as_str()) {
            continue;
        }
        match out.iter_mut().find(|(k, _)| *k == key) {
            Some(slot) => slot.1 = value,
            None => out.push((key, value)),
        }
    }
    if out.is_empty() {
        return None;
    }
    serde_urlencoded::to_string(&out).ok()
}

pub fn target_url(base: &str, path: &str, query: Option<&str>) -> String {
    let mut url = format!("{}{}", base.trim().trim_end_matches('/'), path);
    if let Some(query) = query {
        url.push('?');
        url.push_str(query);
    }
    url
}
