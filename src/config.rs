//! Configuration management for the ory-proxy application.
//!
//! This module handles loading, parsing, and validating the YAML
//! configuration file. Configuration is immutable after startup: the
//! loaded [`AppConfig`] is shared behind a plain `Arc` and never written
//! to again.

use crate::error::{ProxyError, Result};
use http::Uri;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;

/// Server configuration section.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct ServerConfig {
    /// Address and port to listen on.
    pub listen: String,

    /// Connection timeout towards the upstream, in seconds.
    pub connect_timeout: u64,

    /// Read timeout towards the upstream, in seconds.
    pub read_timeout: u64,

    /// Write timeout towards the upstream, in seconds.
    pub write_timeout: u64,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            listen: "0.0.0.0:4000".to_string(),
            connect_timeout: 10,
            read_timeout: 30,
            write_timeout: 30,
        }
    }
}

/// Log output format.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    /// Human-readable pretty format.
    #[default]
    Pretty,
    /// Compact single-line format.
    Compact,
    /// JSON format for structured logging.
    Json,
}

/// Logging configuration section.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct LoggingConfig {
    /// Log level: trace, debug, info, warn, error.
    pub level: String,

    /// Output destination: stdout, stderr, or file path.
    pub output: String,

    /// Log format.
    pub format: LogFormat,

    /// Include target (module path) in logs.
    pub include_target: bool,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            output: "stdout".to_string(),
            format: LogFormat::Pretty,
            include_target: true,
        }
    }
}

/// CORS policy applied by the engine when `cors_enabled` is set.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct CorsConfig {
    /// Origins allowed to call the proxy. Empty means "mirror the request
    /// Origin", which is what browser apps on the same registrable domain
    /// usually want.
    pub allowed_origins: Vec<String>,

    /// Methods advertised in preflight responses.
    pub allowed_methods: Vec<String>,

    /// Headers advertised in preflight responses.
    pub allowed_headers: Vec<String>,

    /// Whether credentialed requests (cookies) are allowed.
    pub allow_credentials: bool,

    /// Preflight cache lifetime in seconds.
    pub max_age: u64,
}

impl Default for CorsConfig {
    fn default() -> Self {
        Self {
            allowed_origins: Vec::new(),
            allowed_methods: ["GET", "POST", "PUT", "PATCH", "DELETE", "OPTIONS"]
                .iter()
                .map(|s| s.to_string())
                .collect(),
            allowed_headers: ["Content-Type", "Authorization", "Cookie"]
                .iter()
                .map(|s| s.to_string())
                .collect(),
            allow_credentials: true,
            max_age: 86400,
        }
    }
}

impl CorsConfig {
    /// Picks the `Access-Control-Allow-Origin` value for a request origin,
    /// or `None` if the origin is not allowed.
    pub fn allow_origin(&self, request_origin: &str) -> Option<String> {
        if self.allowed_origins.is_empty() {
            return Some(request_origin.to_string());
        }
        for allowed in &self.allowed_origins {
            if allowed == "*" {
                // Credentialed requests may not use the wildcard form.
                if self.allow_credentials {
                    return Some(request_origin.to_string());
                }
                return Some("*".to_string());
            }
            if allowed.eq_ignore_ascii_case(request_origin) {
                return Some(allowed.clone());
            }
        }
        None
    }
}

/// Upstream project configuration section.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct UpstreamConfig {
    /// URL of the project API the proxy forwards to, usually
    /// `https://<slug>.projects.oryapis.com`.
    pub project_url: String,

    /// Optional project API key, forwarded as `Ory-Base-URL-Rewrite-Token`
    /// so social sign-in flows can validate the rewrite.
    pub api_key: Option<String>,

    /// Domain written onto re-scoped response cookies.
    pub cookie_domain: String,

    /// Public path prefix the proxy is mounted under.
    pub path_prefix: String,

    /// Whether inbound `X-Forwarded-*` headers from an edge load balancer
    /// are trusted when computing the public base URL.
    pub trust_forwarded_headers: bool,

    /// Whether the engine applies CORS headers.
    pub cors_enabled: bool,

    /// CORS policy, used only when `cors_enabled` is set.
    pub cors: CorsConfig,
}

impl Default for UpstreamConfig {
    fn default() -> Self {
        Self {
            project_url: String::new(),
            api_key: None,
            cookie_domain: "localhost".to_string(),
            path_prefix: "/.ory".to_string(),
            trust_forwarded_headers: false,
            cors_enabled: false,
            cors: CorsConfig::default(),
        }
    }
}

impl UpstreamConfig {
    /// Validates the upstream section.
    pub fn validate(&self) -> Result<()> {
        if self.project_url.is_empty() {
            return Err(ProxyError::config_validation(
                "upstream.project_url is required",
            ));
        }

        let uri: Uri = self.project_url.parse().map_err(|e| {
            ProxyError::config_validation(format!(
                "upstream.project_url is not a valid URL: {}",
                e
            ))
        })?;
        if uri.host().is_none() {
            return Err(ProxyError::config_validation(
                "upstream.project_url must include a host",
            ));
        }

        if !self.path_prefix.starts_with('/') {
            return Err(ProxyError::config_validation(format!(
                "upstream.path_prefix must start with '/': {}",
                self.path_prefix
            )));
        }

        if self.cookie_domain.is_empty() {
            return Err(ProxyError::config_validation(
                "upstream.cookie_domain cannot be empty",
            ));
        }

        Ok(())
    }
}

/// Root configuration structure.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
#[serde(default)]
pub struct AppConfig {
    /// Server configuration.
    pub server: ServerConfig,

    /// Logging configuration.
    pub logging: LoggingConfig,

    /// Upstream project configuration.
    pub upstream: UpstreamConfig,
}

impl AppConfig {
    /// Loads configuration from a YAML file.
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();

        if !path.exists() {
            return Err(ProxyError::ConfigNotFound {
                path: path.display().to_string(),
            });
        }

        let contents = fs::read_to_string(path)?;
        let config: AppConfig =
            serde_yaml::from_str(&contents).map_err(|e| ProxyError::config_parse(e.to_string()))?;

        config.validate()?;

        Ok(config)
    }

    /// Validates the configuration.
    pub fn validate(&self) -> Result<()> {
        if self.server.listen.is_empty() {
            return Err(ProxyError::config_validation(
                "Server listen address cannot be empty",
            ));
        }

        let valid_levels = ["trace", "debug", "info", "warn", "error"];
        if !valid_levels.contains(&self.logging.level.to_lowercase().as_str()) {
            return Err(ProxyError::config_validation(format!(
                "Invalid log level: {}. Must be one of: {:?}",
                self.logging.level, valid_levels
            )));
        }

        self.upstream.validate()?;

        Ok(())
    }
}
