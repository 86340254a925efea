//! # Ory Proxy
//!
//! A reverse proxy that serves an Ory Network project API from your own
//! domain under the `/.ory` path prefix.
//!
//! ## Features
//!
//! - **Path mounting**: the project API appears under `/.ory` on your domain
//! - **Origin scrubbing**: upstream URLs in response bodies are rewritten to
//!   your domain, so the project origin never leaks to browsers
//! - **Cookie re-issue**: session cookies are re-issued for your domain
//! - **CORS**: optional preflight handling for single-page apps
//!
//! ## Usage
//!
//! ```bash
//! # Run against a config file
//! ory-proxy -c /path/to/ory-proxy.yaml
//!
//! # Run from flags alone
//! ory-proxy --project-url https://slug.projects.oryapis.com --cookie-domain example.com
//!
//! # Increase verbosity
//! ory-proxy -vvv  # trace level
//! ```
//!
//! ## Configuration
//!
//! See `config.yaml` for all available options.

mod config;
mod cookie;
mod error;
mod logging;
mod proxy;
mod resolver;
mod rewrite;

use crate::config::AppConfig;
use crate::proxy::OryProxyService;
use clap::Parser;
use pingora_core::server::Server;
use pingora_proxy::http_proxy_service;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{error, info};

/// A reverse proxy that mounts an Ory Network project API on your own domain.
#[derive(Parser, Debug)]
#[command(name = "ory-proxy")]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Path to the configuration file
    #[arg(short, long, env = "CONFIG_PATH")]
    config: Option<PathBuf>,

    /// Listen address (overrides config)
    #[arg(short, long, env = "LISTEN_ADDR")]
    listen: Option<String>,

    /// Project API URL (overrides config)
    #[arg(long, env = "ORY_PROJECT_URL")]
    project_url: Option<String>,

    /// Project API key (overrides config)
    #[arg(long, env = "ORY_PROJECT_API_KEY")]
    api_key: Option<String>,

    /// Domain for re-issued session cookies (overrides config)
    #[arg(long, env = "COOKIE_DOMAIN")]
    cookie_domain: Option<String>,

    /// Increase verbosity (-v info, -vv debug, -vvv trace, -vvvv trace+deps)
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,

    /// Quiet mode (only errors)
    #[arg(short, long)]
    quiet: bool,
}

impl Args {
    /// Converts verbosity count to log level string
    fn log_level(&self) -> Option<String> {
        if self.quiet {
            return Some("error".to_string());
        }
        match self.verbose {
            0 => None, // Use config default
            1 => Some("info".to_string()),
            2 => Some("debug".to_string()),
            _ => Some("trace".to_string()),
        }
    }

    /// Whether to include verbose dependency logging
    fn trace_deps(&self) -> bool {
        self.verbose >= 4
    }
}

/// Application entry point.
fn main() {
    let args = Args::parse();

    let config = load_config(&args);

    let log_level = args.log_level();
    let _log_guard =
        match logging::init_logging(&config.logging, log_level, args.trace_deps()) {
            Ok(guard) => guard,
            Err(e) => {
                eprintln!("Failed to initialize logging: {}", e);
                std::process::exit(1);
            }
        };

    info!(
        version = env!("CARGO_PKG_VERSION"),
        project_url = %config.upstream.project_url,
        listen = %config.server.listen,
        "Starting ory-proxy"
    );

    // Resolve once up front so a bad project URL fails at startup, not on
    // the first request.
    if let Err(e) = resolver::resolve(&config.upstream) {
        error!(error = %e, "Invalid upstream configuration");
        std::process::exit(1);
    }

    let config = Arc::new(config);
    let listen = config.server.listen.clone();

    let mut server = match Server::new(None) {
        Ok(server) => server,
        Err(e) => {
            error!(error = %e, "Failed to create server");
            std::process::exit(1);
        }
    };
    server.bootstrap();

    let mut service =
        http_proxy_service(&server.configuration, OryProxyService::new(config.clone()));
    service.add_tcp(&listen);
    server.add_service(service);

    info!(listen = %listen, prefix = %config.upstream.path_prefix, "Proxy listening");
    server.run_forever();
}

/// Builds the effective configuration from file and CLI overrides.
fn load_config(args: &Args) -> AppConfig {
    let config_path = args.config.clone().or_else(|| {
        let defaults = [
            "./ory-proxy.yaml",
            "./config.yaml",
            "/etc/ory-proxy/config.yaml",
        ];
        defaults.iter().map(PathBuf::from).find(|p| p.exists())
    });

    let mut config = match config_path {
        Some(path) => match AppConfig::load(&path) {
            Ok(config) => config,
            Err(e) => {
                eprintln!("Failed to load config from {:?}: {}", path, e);
                std::process::exit(1);
            }
        },
        None => AppConfig::default(),
    };

    if let Some(ref listen) = args.listen {
        config.server.listen = listen.clone();
    }
    if let Some(ref project_url) = args.project_url {
        config.upstream.project_url = project_url.clone();
    }
    if let Some(ref api_key) = args.api_key {
        config.upstream.api_key = Some(api_key.clone());
    }
    if let Some(ref cookie_domain) = args.cookie_domain {
        config.upstream.cookie_domain = cookie_domain.clone();
    }

    // Overrides may have supplied fields a config file would normally carry,
    // so validation runs on the merged result.
    if let Err(e) = config.validate() {
        eprintln!("Invalid configuration: {}", e);
        std::process::exit(1);
    }

    config
}
