//! Pingora-based proxy engine.
//!
//! This module wires the rewrite core into Pingora's `ProxyHttp` hooks:
//! - per-exchange host resolution before anything else runs
//! - CORS preflight short-circuiting
//! - request rewriting on the way to the upstream
//! - full-body buffering and origin scrubbing on the way back
//!
//! The engine owns the per-exchange [`ExchangeCtx`], created fresh for
//! every request and never shared across exchanges.

use crate::config::AppConfig;
use crate::error::ProxyError;
use crate::resolver::{self, HostConfig};
use crate::rewrite;
use async_trait::async_trait;
use bytes::{Bytes, BytesMut};
use http::{header, Method};
use pingora_core::prelude::*;
use pingora_core::upstreams::peer::HttpPeer;
use pingora_http::{RequestHeader, ResponseHeader};
use pingora_proxy::{FailToProxy, ProxyHttp, Session};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, error, trace};

/// Telemetry callback invoked once per request with the inbound headers
/// and the buffered request body. Must be safe for concurrent invocation
/// across exchanges; its outcome never affects forwarding.
pub type RequestObserver = Box<dyn Fn(&RequestHeader, &[u8]) + Send + Sync>;

/// Telemetry callback invoked once per response with the upstream headers
/// and the body as received, before any rewriting.
pub type ResponseObserver = Box<dyn Fn(&ResponseHeader, &[u8]) + Send + Sync>;

/// Context maintained across one request/response exchange.
pub struct ExchangeCtx {
    /// Routing configuration resolved for this exchange.
    pub host_config: Option<HostConfig>,

    /// The caller-visible base URL stashed by the request rewrite and
    /// consumed by the response rewrite of the same exchange.
    pub original_base: Option<String>,

    /// Request body buffer, filled only when a request observer is set.
    request_body: BytesMut,

    /// Guards single invocation of the request observer.
    request_observed: bool,

    /// Response body buffer; the body is rewritten in one piece.
    response_body: BytesMut,
}

impl Default for ExchangeCtx {
    fn default() -> Self {
        Self {
            host_config: None,
            original_base: None,
            request_body: BytesMut::new(),
            request_observed: false,
            response_body: BytesMut::new(),
        }
    }
}

/// The proxy service: process-wide configuration plus optional observers.
pub struct OryProxyService {
    config: Arc<AppConfig>,
    request_observer: Option<RequestObserver>,
    response_observer: Option<ResponseObserver>,
}

impl OryProxyService {
    /// Creates a new proxy service over immutable configuration.
    pub fn new(config: Arc<AppConfig>) -> Self {
        Self {
            config,
            request_observer: None,
            response_observer: None,
        }
    }

    /// Attaches a request observation callback.
    pub fn with_request_observer(mut self, observer: RequestObserver) -> Self {
        self.request_observer = Some(observer);
        self
    }

    /// Attaches a response observation callback.
    pub fn with_response_observer(mut self, observer: ResponseObserver) -> Self {
        self.response_observer = Some(observer);
        self
    }

    fn resolve(&self) -> Result<HostConfig> {
        resolver::resolve(&self.config.upstream).map_err(|e| {
            Error::because(
                ErrorType::InternalError,
                "resolving upstream host configuration",
                e,
            )
        })
    }
}

/// Builds the 204 answer for a CORS preflight request, or `None` when the
/// origin is not allowed.
fn preflight_response(host_config: &HostConfig, origin: &str) -> Option<ResponseHeader> {
    let allow_origin = host_config.cors.allow_origin(origin)?;

    let mut resp = ResponseHeader::build(204, Some(6)).ok()?;
    resp.insert_header("Access-Control-Allow-Origin", allow_origin.as_str())
        .ok()?;
    resp.insert_header(
        "Access-Control-Allow-Methods",
        host_config.cors.allowed_methods.join(", "),
    )
    .ok()?;
    resp.insert_header(
        "Access-Control-Allow-Headers",
        host_config.cors.allowed_headers.join(", "),
    )
    .ok()?;
    resp.insert_header("Access-Control-Max-Age", host_config.cors.max_age.to_string())
        .ok()?;
    if host_config.cors.allow_credentials {
        resp.insert_header("Access-Control-Allow-Credentials", "true").ok()?;
    }
    resp.insert_header(header::VARY, "Origin").ok()?;
    resp.insert_header(header::CONTENT_LENGTH, "0").ok()?;
    Some(resp)
}

/// Applies CORS headers to an actual (non-preflight) response.
fn apply_cors_headers(
    resp: &mut ResponseHeader,
    host_config: &HostConfig,
    origin: &str,
) -> Result<()> {
    if let Some(allow_origin) = host_config.cors.allow_origin(origin) {
        resp.insert_header("Access-Control-Allow-Origin", allow_origin.as_str())?;
        if host_config.cors.allow_credentials {
            resp.insert_header("Access-Control-Allow-Credentials", "true")?;
        }
        resp.insert_header(header::VARY, "Origin")?;
    }
    Ok(())
}

/// Whether the inbound request carries a body worth buffering.
fn request_has_body(req: &RequestHeader) -> bool {
    if req.headers.get(header::TRANSFER_ENCODING).is_some() {
        return true;
    }
    req.headers
        .get(header::CONTENT_LENGTH)
        .and_then(|v| v.to_str().ok())
        .and_then(|s| s.parse::<u64>().ok())
        .map(|len| len > 0)
        .unwrap_or(false)
}

#[async_trait]
impl ProxyHttp for OryProxyService {
    type CTX = ExchangeCtx;

    fn new_ctx(&self) -> Self::CTX {
        ExchangeCtx::default()
    }

    /// Resolves the per-exchange host configuration before any other hook.
    async fn early_request_filter(&self, _session: &mut Session, ctx: &mut Self::CTX) -> Result<()> {
        let host_config = self.resolve()?;

        trace!(
            upstream = %host_config.upstream_host,
            prefix = %host_config.path_prefix,
            "Exchange resolved"
        );

        ctx.host_config = Some(host_config);
        Ok(())
    }

    /// Short-circuits CORS preflight requests without contacting the upstream.
    async fn request_filter(&self, session: &mut Session, ctx: &mut Self::CTX) -> Result<bool>
    where
        Self::CTX: Send + Sync,
    {
        let host_config = ctx
            .host_config
            .as_ref()
            .ok_or_else(|| Error::new(ErrorType::Custom("exchange missing host config")))?;

        if !host_config.cors_enabled || session.req_header().method != Method::OPTIONS {
            return Ok(false);
        }

        let origin = match session
            .req_header()
            .headers
            .get(header::ORIGIN)
            .and_then(|v| v.to_str().ok())
        {
            Some(origin) => origin.to_string(),
            None => return Ok(false),
        };

        let resp = match preflight_response(host_config, &origin) {
            Some(resp) => resp,
            None => {
                debug!(origin = %origin, "Preflight from disallowed origin");
                return Ok(false);
            }
        };

        debug!(origin = %origin, "Answering CORS preflight");
        session.write_response_header(Box::new(resp), true).await?;
        Ok(true)
    }

    /// Dials the target over plain HTTP; the logical upstream scheme stays
    /// `https` for rewriting purposes.
    async fn upstream_peer(
        &self,
        _session: &mut Session,
        ctx: &mut Self::CTX,
    ) -> Result<Box<HttpPeer>> {
        let host_config = ctx
            .host_config
            .as_ref()
            .ok_or_else(|| Error::new(ErrorType::Custom("exchange missing host config")))?;

        let (host, port) = host_config.target_addr();
        let tls = host_config.target_scheme == "https";

        debug!(
            host = %host,
            port = port,
            tls = tls,
            "Connecting to upstream target"
        );

        let mut peer = HttpPeer::new((host, port), tls, host_config.upstream_hostname());
        peer.options.connection_timeout =
            Some(Duration::from_secs(self.config.server.connect_timeout));
        peer.options.read_timeout = Some(Duration::from_secs(self.config.server.read_timeout));
        peer.options.write_timeout = Some(Duration::from_secs(self.config.server.write_timeout));

        Ok(Box::new(peer))
    }

    /// Rewrites the outbound request and stashes the original base URL.
    async fn upstream_request_filter(
        &self,
        session: &mut Session,
        upstream_request: &mut RequestHeader,
        ctx: &mut Self::CTX,
    ) -> Result<()> {
        let host_config = ctx
            .host_config
            .as_ref()
            .ok_or_else(|| Error::new(ErrorType::Custom("exchange missing host config")))?;

        let original_base = rewrite::rewrite_request(
            upstream_request,
            host_config,
            self.config.upstream.api_key.as_deref(),
        )?;

        trace!(
            uri = %upstream_request.uri,
            base = %original_base,
            "Forwarding rewritten request"
        );

        ctx.original_base = Some(original_base);

        // Bodyless requests never reach the body filter, so observe them here.
        if let Some(observer) = &self.request_observer {
            if !ctx.request_observed && !request_has_body(session.req_header()) {
                observer(session.req_header(), &[]);
                ctx.request_observed = true;
            }
        }

        Ok(())
    }

    /// Buffers the request body for the observer; the body itself is
    /// forwarded unaltered.
    async fn request_body_filter(
        &self,
        session: &mut Session,
        body: &mut Option<Bytes>,
        end_of_stream: bool,
        ctx: &mut Self::CTX,
    ) -> Result<()>
    where
        Self::CTX: Send + Sync,
    {
        let Some(observer) = &self.request_observer else {
            return Ok(());
        };
        if ctx.request_observed {
            return Ok(());
        }

        if let Some(chunk) = body {
            ctx.request_body.extend_from_slice(chunk);
        }
        if end_of_stream {
            observer(session.req_header(), &ctx.request_body);
            ctx.request_observed = true;
        }

        Ok(())
    }

    /// Rewrites the response headers: cookie re-issue, engine scoping,
    /// CORS, and dropping `Content-Length` since the body may change size.
    async fn response_filter(
        &self,
        session: &mut Session,
        upstream_response: &mut ResponseHeader,
        ctx: &mut Self::CTX,
    ) -> Result<()> {
        let host_config = ctx
            .host_config
            .as_ref()
            .ok_or_else(|| Error::new(ErrorType::Custom("exchange missing host config")))?;

        // The request rewrite must have stashed the base URL for this
        // exchange; anything else is broken wiring and aborts the response.
        let original_base = ctx.original_base.clone().ok_or_else(|| {
            Error::because(
                ErrorType::InternalError,
                "response rewrite without request rewrite",
                ProxyError::MissingOriginalBase,
            )
        })?;

        rewrite::rewrite_response(upstream_response, host_config)?;
        rewrite::scope_response(upstream_response, host_config, &original_base)?;

        if host_config.cors_enabled {
            if let Some(origin) = session
                .req_header()
                .headers
                .get(header::ORIGIN)
                .and_then(|v| v.to_str().ok())
                .map(|s| s.to_string())
            {
                apply_cors_headers(upstream_response, host_config, &origin)?;
            }
        }

        // The body is rewritten in one piece downstream of here.
        upstream_response.remove_header(&header::CONTENT_LENGTH);

        trace!(status = %upstream_response.status, "Rewrote upstream response");

        Ok(())
    }

    /// Buffers the full response body, then emits it with every upstream
    /// origin occurrence replaced by the caller's base URL.
    fn response_body_filter(
        &self,
        session: &mut Session,
        body: &mut Option<Bytes>,
        end_of_stream: bool,
        ctx: &mut Self::CTX,
    ) -> Result<Option<Duration>>
    where
        Self::CTX: Send + Sync,
    {
        if let Some(chunk) = body.take() {
            ctx.response_body.extend_from_slice(&chunk);
        }

        if !end_of_stream {
            return Ok(None);
        }

        if let Some(observer) = &self.response_observer {
            if let Some(resp) = session.response_written() {
                observer(resp, &ctx.response_body);
            }
        }

        let rewritten = match (&ctx.host_config, &ctx.original_base) {
            (Some(host_config), Some(original_base)) => {
                rewrite::rewrite_body(&ctx.response_body, host_config, original_base)
            }
            _ => ctx.response_body.to_vec(),
        };

        *body = Some(Bytes::from(rewritten));
        Ok(None)
    }

    /// Handles errors during proxying.
    async fn fail_to_proxy(&self, _session: &mut Session, e: &Error, ctx: &mut Self::CTX) -> FailToProxy
    where
        Self::CTX: Send + Sync,
    {
        error!(
            error = %e,
            upstream = ctx
                .host_config
                .as_ref()
                .map(|c| c.upstream_host.as_str())
                .unwrap_or("-"),
            "Proxy error"
        );

        let error_code = match e.etype() {
            ErrorType::ConnectTimedout => 504,
            _ => 502,
        };

        FailToProxy {
            error_code,
            can_reuse_downstream: false,
        }
    }

    /// Access logging after request completion.
    async fn logging(&self, session: &mut Session, e: Option<&Error>, ctx: &mut Self::CTX) {
        let status = session
            .response_written()
            .map(|r| r.status.as_u16())
            .unwrap_or(0);
        let method = session.req_header().method.as_str();
        let path = session.req_header().uri.path();

        if let Some(err) = e {
            error!(
                method = method,
                path = path,
                status = status,
                error = %err,
                "Request failed"
            );
        } else {
            debug!(
                method = method,
                path = path,
                status = status,
                base = ctx.original_base.as_deref().unwrap_or("-"),
                "Request completed"
            );
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{CorsConfig, UpstreamConfig};

    fn test_config() -> Arc<AppConfig> {
        Arc::new(AppConfig {
            upstream: UpstreamConfig {
                project_url: "https://slug.projects.oryapis.com".to_string(),
                cookie_domain: "example.com".to_string(),
                ..Default::default()
            },
            ..Default::default()
        })
    }

    fn test_host_config() -> HostConfig {
        resolver::resolve(&test_config().upstream).unwrap()
    }

    #[test]
    fn test_new_ctx_defaults() {
        let service = OryProxyService::new(test_config());
        let ctx = service.new_ctx();
        assert!(ctx.host_config.is_none());
        assert!(ctx.original_base.is_none());
        assert!(!ctx.request_observed);
    }

    #[test]
    fn test_resolve_failure_surfaces() {
        let config = Arc::new(AppConfig {
            upstream: UpstreamConfig {
                project_url: "::broken::".to_string(),
                ..Default::default()
            },
            ..Default::default()
        });
        let service = OryProxyService::new(config);
        assert!(service.resolve().is_err());
    }

    #[test]
    fn test_preflight_response_headers() {
        let mut host_config = test_host_config();
        host_config.cors_enabled = true;

        let resp = preflight_response(&host_config, "https://app.example.com").unwrap();
        assert_eq!(resp.status.as_u16(), 204);
        assert_eq!(
            resp.headers.get("Access-Control-Allow-Origin").unwrap(),
            "https://app.example.com"
        );
        assert_eq!(
            resp.headers.get("Access-Control-Allow-Credentials").unwrap(),
            "true"
        );
        assert!(resp
            .headers
            .get("Access-Control-Allow-Methods")
            .unwrap()
            .to_str()
            .unwrap()
            .contains("POST"));
    }

    #[test]
    fn test_preflight_disallowed_origin() {
        let mut host_config = test_host_config();
        host_config.cors = CorsConfig {
            allowed_origins: vec!["https://app.example.com".to_string()],
            ..Default::default()
        };
        assert!(preflight_response(&host_config, "https://evil.example").is_none());
    }

    #[test]
    fn test_apply_cors_headers() {
        let host_config = test_host_config();
        let mut resp = ResponseHeader::build(200, None).unwrap();
        apply_cors_headers(&mut resp, &host_config, "https://app.example.com").unwrap();
        assert_eq!(
            resp.headers.get("Access-Control-Allow-Origin").unwrap(),
            "https://app.example.com"
        );
        assert_eq!(resp.headers.get(header::VARY).unwrap(), "Origin");
    }

    #[test]
    fn test_request_has_body() {
        let mut req = RequestHeader::build("POST", b"/.ory/x", None).unwrap();
        assert!(!request_has_body(&req));

        req.insert_header(header::CONTENT_LENGTH, "0").unwrap();
        assert!(!request_has_body(&req));

        req.insert_header(header::CONTENT_LENGTH, "12").unwrap();
        assert!(request_has_body(&req));

        let mut req = RequestHeader::build("POST", b"/.ory/x", None).unwrap();
        req.insert_header(header::TRANSFER_ENCODING, "chunked").unwrap();
        assert!(request_has_body(&req));
    }

    #[test]
    fn test_observer_slot_distinct_from_absent() {
        use std::sync::atomic::{AtomicUsize, Ordering};

        static CALLS: AtomicUsize = AtomicUsize::new(0);

        let service = OryProxyService::new(test_config());
        assert!(service.request_observer.is_none());

        let service = service.with_request_observer(Box::new(|_req, _body| {
            CALLS.fetch_add(1, Ordering::SeqCst);
        }));
        let observer = service.request_observer.as_ref().unwrap();
        let req = RequestHeader::build("GET", b"/.ory/health", None).unwrap();
        observer(&req, b"");
        assert_eq!(CALLS.load(Ordering::SeqCst), 1);
    }
}
