//! spindle: HTTP/1.x server binary.
//!
//! # Architecture Overview
//!
//! ```text
//!                 ┌──────────────────────────────────────────────────────────┐
//!                 │                         SPINDLE                          │
//!                 │                                                          │
//!   Client ───────┼─▶ transport::listener ──round-robin──▶ transport::worker │
//!                 │      (accept, permits)                  (EventLoop each) │
//!                 │                                              │           │
//!                 │                                              ▼           │
//!                 │                         connection::{pipe, transport}    │
//!                 │                                              │           │
//!                 │                                              ▼           │
//!                 │           http::{parser, protocol} ─▶ HttpContext ─▶ Handler
//!                 │                                                          │
//!                 │  Cross-cutting: config, observability, lifecycle         │
//!                 └──────────────────────────────────────────────────────────┘
//! ```
//!
//! The bundled handler serves static files from `--root`.

mod static_files;

use std::path::PathBuf;
use std::sync::Arc;

use clap::Parser;

use spindle::config::resolve_config;
use spindle::http::HttpServer;
use spindle::lifecycle::signals::wait_for_signal;
use spindle::observability::logging::{init_logging, LogFormat};
use spindle::transport::endpoint::ListenEndpoint;

use crate::static_files::StaticFiles;

#[derive(Parser)]
#[command(name = "spindle")]
#[command(about = "Multi-threaded HTTP/1.x server", long_about = None)]
struct Cli {
    /// TOML configuration file.
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Directory to serve.
    #[arg(short, long, default_value = ".")]
    root: PathBuf,

    /// Override the listen endpoint (`host:port` or `unix:/path`).
    #[arg(short, long)]
    bind: Option<ListenEndpoint>,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();

    let config = resolve_config(cli.config.as_deref(), cli.bind)?;

    init_logging(
        &config.observability.log_level,
        LogFormat::parse(&config.observability.log_format),
    );

    tracing::info!(
        version = env!("CARGO_PKG_VERSION"),
        endpoint = %config.listener.endpoint,
        workers = config.workers.resolved_count(),
        max_connections = config.listener.max_connections,
        root = %cli.root.display(),
        "Configuration loaded"
    );

    let handler = Arc::new(StaticFiles::new(cli.root));
    let server = HttpServer::bind(&config, handler)?;

    server
        .run_until(async {
            if let Err(e) = wait_for_signal().await {
                tracing::error!(error = %e, "Could not install signal handlers");
                std::future::pending::<()>().await;
            }
        })
        .await?;

    Ok(())
}
