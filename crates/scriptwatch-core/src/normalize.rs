//! Target URL canonicalisation
//!
//! A target is identified by its normalized URL: surrounding whitespace is
//! dropped and every trailing slash after the scheme separator is removed, so
//! `http://a.b/`, `http://a.b`, `http://a.b/x/` and `http://a.b/x` collapse to
//! two identities rather than four.

/// Normalize a target URL. Idempotent.
pub fn normalize_url(raw: &str) -> String {
    let s = raw.trim();
    let body_start = s.find("://").map(|i| i + 3).unwrap_or(0);
    let (scheme, rest) = s.split_at(body_start);
    format!("{}{}", scheme, rest.trim_end_matches('/'))
}

/// Parse a normalized URL, accepting only http and https targets with a host.
pub(crate) fn validate(normalized: &str) -> Result<url::Url, String> {
    let parsed = url::Url::parse(normalized).map_err(|e| format!("{}: {}", normalized, e))?;
    match parsed.scheme() {
        "http" | "https" => {}
        other => return Err(format!("{}: unsupported scheme '{}'", normalized, other)),
    }
    if parsed.host_str().map_or(true, str::is_empty) {
        return Err(format!("{}: missing host", normalized));
    }
    Ok(parsed)
}
