//! Per-exchange routing resolution.
//!
//! This module turns the process-wide upstream configuration into the
//! [`HostConfig`] that drives one proxied exchange: which host to dial,
//! which origin string to scrub from responses, and which public path
//! prefix to strip from inbound requests.

use crate::config::{CorsConfig, UpstreamConfig};
use crate::error::{ProxyError, Result};
use http::Uri;

/// Resolved routing/target parameters for a single exchange.
///
/// Built once per exchange by [`resolve`] and never mutated afterward.
#[derive(Debug, Clone, PartialEq)]
pub struct HostConfig {
    /// Domain written onto re-scoped response cookies.
    pub cookie_domain: String,

    /// Authority (host, or host:port) of the real backend. This is the
    /// value scrubbed from response bodies and set as the outbound `Host`.
    pub upstream_host: String,

    /// Scheme the upstream uses in URLs it embeds: its public contract.
    pub upstream_scheme: String,

    /// Authority the engine actually dials.
    pub target_host: String,

    /// Scheme the engine dials with. Intentionally allowed to diverge from
    /// `upstream_scheme`: the upstream is logically `https` while this
    /// process reaches it over plain `http` behind an internal boundary.
    pub target_scheme: String,

    /// Public path prefix the proxy is mounted under.
    pub path_prefix: String,

    /// Whether inbound `X-Forwarded-*` headers are trusted.
    pub trust_forwarded_headers: bool,

    /// Whether the engine applies CORS headers.
    pub cors_enabled: bool,

    /// CORS policy for the engine.
    pub cors: CorsConfig,
}

impl HostConfig {
    /// The literal origin string the upstream embeds in its own links,
    /// e.g. `https://slug.projects.oryapis.com`.
    pub fn upstream_origin(&self) -> String {
        format!("{}://{}", self.upstream_scheme, self.upstream_host)
    }

    /// Splits the target authority into a dialable `(host, port)` pair,
    /// defaulting the port from the target scheme.
    pub fn target_addr(&self) -> (String, u16) {
        let default_port = if self.target_scheme == "https" { 443 } else { 80 };
        split_authority(&self.target_host, default_port)
    }

    /// Hostname portion of the upstream authority, without any port.
    pub fn upstream_hostname(&self) -> String {
        split_authority(&self.upstream_host, 0).0
    }
}

/// Resolves the configured project URL into a [`HostConfig`].
///
/// Called once per exchange before any hook runs; a parse failure aborts
/// the exchange before any network call is made.
pub fn resolve(upstream: &UpstreamConfig) -> Result<HostConfig> {
    let uri: Uri = upstream
        .project_url
        .parse()
        .map_err(|e: http::uri::InvalidUri| {
            ProxyError::upstream_url(&upstream.project_url, e.to_string())
        })?;

    let authority = uri
        .authority()
        .ok_or_else(|| ProxyError::upstream_url(&upstream.project_url, "URL has no host"))?
        .as_str()
        .to_string();

    Ok(HostConfig {
        cookie_domain: upstream.cookie_domain.clone(),
        upstream_host: authority.clone(),
        upstream_scheme: "https".to_string(),
        target_host: authority,
        target_scheme: "http".to_string(),
        path_prefix: upstream.path_prefix.clone(),
        trust_forwarded_headers: upstream.trust_forwarded_headers,
        cors_enabled: upstream.cors_enabled,
        cors: upstream.cors.clone(),
    })
}

/// Splits an authority string into host and port, handling IPv6 brackets.
fn split_authority(authority: &str, default_port: u16) -> (String, u16) {
    if let Some(bracket_end) = authority.find(']') {
        // IPv6: [::1] or [::1]:8080
        let host = authority[..=bracket_end].to_string();
        let port = authority[bracket_end + 1..]
            .strip_prefix(':')
            .and_then(|p| p.parse().ok())
            .unwrap_or(default_port);
        return (host, port);
    }

    match authority.rsplit_once(':') {
        Some((host, port)) => match port.parse() {
            Ok(port) => (host.to_string(), port),
            Err(_) => (authority.to_string(), default_port),
        },
        None => (authority.to_string(), default_port),
    }
}
