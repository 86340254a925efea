//! Request/response rewriting: the heart of the proxy.
//!
//! Every proxied exchange goes through two passes. On the way out,
//! [`rewrite_request`] re-addresses the request to the upstream, strips the
//! public path prefix, and injects the trust-and-origin headers the upstream
//! needs to emit links scoped to the caller's domain. On the way back,
//! [`rewrite_response`] re-issues cookies and [`rewrite_body`] scrubs every
//! embedded occurrence of the upstream origin from the body.
//!
//! The single piece of cross-phase state is the original base URL computed
//! at request time; it is threaded explicitly into the response-side calls
//! so the "request pass ran first" invariant is visible in the signatures.

use crate::cookie::SetCookie;
use crate::resolver::HostConfig;
use http::header;
use pingora_core::prelude::*;
use pingora_http::{RequestHeader, ResponseHeader};
use tracing::debug;

/// Tells the upstream not to redirect to its own canonical domain: the
/// proxy owns the public-facing domain.
pub const ORY_NO_CUSTOM_DOMAIN_REDIRECT: &str = "Ory-No-Custom-Domain-Redirect";

/// Carries the caller-visible base URL so the upstream emits links and
/// tokens scoped to it.
pub const ORY_BASE_URL_REWRITE: &str = "Ory-Base-URL-Rewrite";

/// Project API key authorizing the base URL rewrite, needed by social
/// sign-in flows.
pub const ORY_BASE_URL_REWRITE_TOKEN: &str = "Ory-Base-URL-Rewrite-Token";

/// Edge-supplied caller host, normalized on the way out.
pub const X_FORWARDED_HOST: &str = "X-Forwarded-Host";

/// Edge-supplied caller scheme, normalized on the way out.
pub const X_FORWARDED_PROTO: &str = "X-Forwarded-Proto";

/// Reads a header as a string, if present and valid UTF-8.
fn header_str<'a>(req: &'a RequestHeader, name: &str) -> Option<&'a str> {
    req.headers.get(name).and_then(|v| v.to_str().ok())
}

/// The host the caller's browser believes it is talking to.
fn caller_host(req: &RequestHeader, host_config: &HostConfig) -> String {
    if host_config.trust_forwarded_headers {
        if let Some(host) = header_str(req, X_FORWARDED_HOST) {
            if !host.is_empty() {
                return host.to_string();
            }
        }
    }
    header_str(req, "host")
        .map(|h| h.to_string())
        .or_else(|| req.uri.authority().map(|a| a.as_str().to_string()))
        .unwrap_or_default()
}

/// The scheme the caller's browser believes it is using. Defaults to
/// `http` when neither a trusted forwarded header nor a URL scheme is
/// present.
fn caller_scheme(req: &RequestHeader, host_config: &HostConfig) -> String {
    if host_config.trust_forwarded_headers {
        if let Some(proto) = header_str(req, X_FORWARDED_PROTO) {
            if !proto.is_empty() {
                return proto.to_string();
            }
        }
    }
    req.uri
        .scheme_str()
        .unwrap_or("http")
        .to_string()
}

/// Strips one leading `prefix` from the path, preserving the query string.
/// Returns `None` when the path does not start with the prefix.
fn strip_path_prefix(req: &RequestHeader, prefix: &str) -> Option<String> {
    let path = req.uri.path();
    let stripped = path.strip_prefix(prefix)?;
    let path = if stripped.is_empty() { "/" } else { stripped };
    Some(match req.uri.query() {
        Some(query) => format!("{}?{}", path, query),
        None => path.to_string(),
    })
}

/// Rewrites the outbound request in place and returns the computed
/// original base URL (`{scheme}://{host}{prefix}`), the one piece of
/// request-time state the response pass depends on.
///
/// `upstream_request` starts out as a copy of the inbound request, so the
/// caller-visible host and scheme are read from it before it is mutated.
pub fn rewrite_request(
    upstream_request: &mut RequestHeader,
    host_config: &HostConfig,
    api_key: Option<&str>,
) -> Result<String> {
    let host = caller_host(upstream_request, host_config);
    let scheme = caller_scheme(upstream_request, host_config);
    let original_base = format!("{}://{}{}", scheme, host, host_config.path_prefix);

    match strip_path_prefix(upstream_request, &host_config.path_prefix) {
        Some(path_and_query) => {
            let uri = path_and_query.parse::<http::Uri>().map_err(|e| {
                Error::because(ErrorType::InternalError, "rebuilding outbound path", e)
            })?;
            upstream_request.set_uri(uri);
        }
        None => {
            // Deliberate no-op: the request is forwarded unchanged, but a
            // prefix mismatch usually means a misconfigured mount.
            debug!(
                path = %upstream_request.uri.path(),
                prefix = %host_config.path_prefix,
                "Outbound path does not start with the configured prefix"
            );
        }
    }

    upstream_request.insert_header(header::HOST, host_config.upstream_host.as_str())?;
    upstream_request.insert_header(ORY_NO_CUSTOM_DOMAIN_REDIRECT, "true")?;
    upstream_request.insert_header(ORY_BASE_URL_REWRITE, original_base.as_str())?;
    if let Some(api_key) = api_key {
        upstream_request.insert_header(ORY_BASE_URL_REWRITE_TOKEN, api_key)?;
    }
    upstream_request.insert_header(X_FORWARDED_HOST, host.as_str())?;
    upstream_request.insert_header(X_FORWARDED_PROTO, scheme.as_str())?;

    Ok(original_base)
}

/// Re-issues response cookies under the proxy's control.
///
/// Every `Set-Cookie` is parsed and re-serialized with its attribute set
/// preserved exactly, replacing the originals wholesale. Skipped entirely
/// when the `Location` header starts with `https`: an upstream issuing an
/// absolute `https` redirect (a cross-domain OAuth hop, typically) is
/// deliberately bypassing cookie re-scoping.
pub fn rewrite_response(resp: &mut ResponseHeader, _host_config: &HostConfig) -> Result<()> {
    let location = resp
        .headers
        .get(header::LOCATION)
        .and_then(|v| v.to_str().ok())
        .unwrap_or("");
    if location.starts_with("https") {
        return Ok(());
    }

    let cookies: Vec<SetCookie> = resp
        .headers
        .get_all(header::SET_COOKIE)
        .iter()
        .filter_map(|v| v.to_str().ok())
        .filter_map(SetCookie::parse)
        .collect();

    if resp.headers.contains_key(header::SET_COOKIE) {
        resp.remove_header(&header::SET_COOKIE);
        for cookie in &cookies {
            resp.append_header(header::SET_COOKIE, cookie.to_header_value())?;
        }
    }

    Ok(())
}

/// Engine-level response touches that go beyond the cookie pass: rewrite a
/// `Location` header pointing at the upstream origin back to the caller's
/// base URL, and re-scope cookie domains equal to the upstream hostname to
/// the configured cookie domain.
///
/// Must run after [`rewrite_response`] so the cookie gate sees the
/// verbatim upstream `Location` value.
pub fn scope_response(
    resp: &mut ResponseHeader,
    host_config: &HostConfig,
    original_base: &str,
) -> Result<()> {
    let upstream_origin = host_config.upstream_origin();

    let location = resp
        .headers
        .get(header::LOCATION)
        .and_then(|v| v.to_str().ok())
        .map(|l| l.to_string());

    // Same gate as the cookie pass: an absolute https redirect keeps its
    // cookies as the upstream issued them.
    let bypassing = location
        .as_deref()
        .map(|l| l.starts_with("https"))
        .unwrap_or(false);

    if !bypassing && resp.headers.contains_key(header::SET_COOKIE) {
        let mut cookies: Vec<SetCookie> = resp
            .headers
            .get_all(header::SET_COOKIE)
            .iter()
            .filter_map(|v| v.to_str().ok())
            .filter_map(SetCookie::parse)
            .collect();

        let upstream_hostname = host_config.upstream_hostname();
        let mut changed = false;
        for cookie in &mut cookies {
            if cookie.domain.as_deref() == Some(upstream_hostname.as_str()) {
                cookie.domain = Some(host_config.cookie_domain.clone());
                changed = true;
            }
        }

        if changed {
            resp.remove_header(&header::SET_COOKIE);
            for cookie in &cookies {
                resp.append_header(header::SET_COOKIE, cookie.to_header_value())?;
            }
        }
    }

    if let Some(location) = location {
        if let Some(rest) = location.strip_prefix(upstream_origin.as_str()) {
            let rewritten = format!("{}{}", original_base, rest);
            resp.insert_header(header::LOCATION, rewritten.as_str())?;
        }
    }

    Ok(())
}

/// Replaces every literal occurrence of the upstream origin in the body
/// with the original base URL. Byte-level and verbatim: no URL parsing, no
/// UTF-8 assumption, a no-op when the origin does not occur.
pub fn rewrite_body(body: &[u8], host_config: &HostConfig, original_base: &str) -> Vec<u8> {
    replace_all(
        body,
        host_config.upstream_origin().as_bytes(),
        original_base.as_bytes(),
    )
}

/// Byte-wise replace-all.
fn replace_all(haystack: &[u8], needle: &[u8], replacement: &[u8]) -> Vec<u8> {
    if needle.is_empty() || haystack.len() < needle.len() {
        return haystack.to_vec();
    }

    let mut out = Vec::with_capacity(haystack.len());
    let mut i = 0;
    while i + needle.len() <= haystack.len() {
        if &haystack[i..i + needle.len()] == needle {
            out.extend_from_slice(replacement);
            i += needle.len();
        } else {
            out.push(haystack[i]);
            i += 1;
        }
    }
    out.extend_from_slice(&haystack[i..]);
    out
}
