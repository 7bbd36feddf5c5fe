pub type Headers = Vec<(String, String)>;

pub fn header_set(headers: &mut Headers, name: impl Into<String>, value: impl Into<String>) {
    let name = name.into();
    let value = value.into();
    if let Some((_, v)) = headers
        .iter_mut()
        .find(|(k, _)| k.eq_ignore_ascii_case(&name))
    {
        *v = value;
        return;
    }
    headers.push((name, value));
}

pub fn header_get<'a>(headers: &'a Headers, name: &str) -> Option<&'a str> {
    headers
        .iter()
        .find(|(k, _)| k.eq_ignore_ascii_case(name))
        .map(|(_, v)| v.as_str())
}

/// Removes every occurrence of `name`, returning the last removed value.
pub fn header_remove(headers: &mut Headers, name: &str) -> Option<String> {
    let mut removed = None;
    headers.retain(|(k, v)| {
        if k.eq_ignore_ascii_case(name) {
            removed = Some(v.clone());
            false
        } else {
            true
        }
    });
    removed
}

/// Collapses repeated names to a single entry holding the last value, kept at
/// the position of the first occurrence. Names are lowercased.
pub fn collapse_last_wins(headers: Headers) -> Headers {
    let mut out: Headers = Vec::with_capacity(headers.len());
    for (name, value) in headers {
        let name = name.to_ascii_lowercase();
        header_set(&mut out, name, value);
    }
    out
}

/// Hop-by-hop and framing headers. The HTTP stack on each side sets these itself.
pub fn is_hop_by_hop_or_framing_header(name: &str) -> bool {
    [
        "content-length",
        "transfer-encoding",
        "connection",
        "keep-alive",
        "proxy-authenticate",
        "proxy-authorization",
        "proxy-connection",
        "te",
        "trailer",
        "upgrade",
    ]
    .iter()
    .any(|h| name.eq_ignore_ascii_case(h))
}

pub fn has_sse_content_type(headers: &Headers) -> bool {
    header_get(headers, "content-type")
        .map(|value| value.to_ascii_lowercase().contains("text/event-stream"))
        .unwrap_or(false)
}
