//! # Ory Proxy Library
//!
//! This crate provides a reverse proxy that serves an Ory Network project
//! API from your own domain under the `/.ory` path prefix. It's built on
//! the Pingora framework for high performance.
//!
//! ## Modules
//!
//! - [`config`]: Configuration loading and validation
//! - [`cookie`]: Set-Cookie parsing and serialization
//! - [`error`]: Error types and handling
//! - [`logging`]: Logging setup and configuration
//! - [`proxy`]: The main Pingora-based proxy implementation
//! - [`resolver`]: Per-exchange host resolution
//! - [`rewrite`]: Request and response rewriting
//!
//! ## Example
//!
//! ```ignore
//! use ory_proxy::config::AppConfig;
//! use ory_proxy::proxy::OryProxyService;
//! use std::sync::Arc;
//!
//! // Load configuration
//! let config = Arc::new(AppConfig::load("config.yaml")?);
//!
//! // Create proxy service
//! let service = OryProxyService::new(config);
//! ```
//!
//! ## Request Flow
//!
//! Every exchange goes through the same pipeline:
//!
//! 1. **Resolution**: the configured project URL is turned into the routing
//!    parameters for this exchange
//! 2. **Request rewrite**: the `/.ory` prefix is stripped, the `Host` header
//!    is replaced, and the caller's base URL is recorded
//! 3. **Response rewrite**: cookies are re-issued and every occurrence of
//!    the upstream origin in the body is replaced with the caller's base URL

pub mod config;
pub mod cookie;
pub mod error;
pub mod logging;
pub mod proxy;
pub mod resolver;
pub mod rewrite;

pub use config::{AppConfig, CorsConfig, UpstreamConfig};
pub use cookie::SetCookie;
pub use error::{ProxyError, Result};
pub use proxy::OryProxyService;
pub use resolver::HostConfig;
