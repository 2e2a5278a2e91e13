//! HTTP server setup.
//!
//! # Responsibilities
//! - Project the configuration into a read-only [`ServiceContext`]
//! - Bind the listener and start the worker pool
//! - Run the accept loop until shutdown, then drain the workers

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use thiserror::Error;

use crate::config::ServerConfig;
use crate::connection::{ConnectionTracker, PipeOptions, PipeSettings, TimeoutControl};
use crate::frame::FrameReader;
use crate::http::context::ResponseOptions;
use crate::http::handler::Handler;
use crate::http::parser::ParserLimits;
use crate::http::response::DateCache;
use crate::lifecycle::Shutdown;
use crate::transport::endpoint::{BindOptions, ListenEndpoint};
use crate::transport::listener::{Listener, ListenerError};
use crate::transport::worker::{WorkerError, WorkerPool};

/// Value of the `Server` header when enabled.
pub const SERVER_NAME: &str = concat!("spindle/", env!("CARGO_PKG_VERSION"));

/// Everything a connection needs from the server, shared read-only by all
/// workers.
pub struct ServiceContext {
    pub handler: Arc<dyn Handler>,
    pub limits: ParserLimits,
    pub timeouts: TimeoutControl,
    pub max_body_size: Option<u64>,
    pub pipes: PipeSettings,
    pub response: Arc<ResponseOptions>,
    pub max_frame_size: u64,
}

impl ServiceContext {
    pub fn from_config(config: &ServerConfig, handler: Arc<dyn Handler>) -> Self {
        let flow = &config.flow_control;
        Self {
            handler,
            limits: ParserLimits::from_config(&config.limits),
            timeouts: TimeoutControl::from_config(&config.timeouts),
            max_body_size: config.limits.max_body_bytes,
            pipes: PipeSettings {
                input: PipeOptions::new(flow.input_pause_bytes, flow.input_resume_bytes),
                output: PipeOptions::new(flow.output_pause_bytes, flow.output_resume_bytes),
            },
            response: Arc::new(ResponseOptions {
                server_header: config.response.add_server_header.then(|| SERVER_NAME.to_string()),
                add_date_header: config.response.add_date_header,
                date: DateCache::new(),
            }),
            max_frame_size: config.limits.max_frame_size,
        }
    }

    /// Frame reader for a framed stream, capped at the configured size.
    pub fn frame_reader(&self) -> FrameReader {
        FrameReader::new(self.max_frame_size)
    }
}

#[derive(Debug, Error)]
pub enum ServerError {
    #[error(transparent)]
    Listener(#[from] ListenerError),
    #[error(transparent)]
    Worker(#[from] WorkerError),
}

/// A bound server with its workers running.
pub struct HttpServer {
    listener: Listener,
    workers: WorkerPool,
    tracker: ConnectionTracker,
    shutdown: Shutdown,
}

impl HttpServer {
    /// Bind the configured endpoint and start the workers. Must be called
    /// inside a Tokio runtime.
    pub fn bind(config: &ServerConfig, handler: Arc<dyn Handler>) -> Result<Self, ServerError> {
        let options = BindOptions {
            backlog: config.listener.backlog,
            max_connections: config.listener.max_connections,
            tls: config.listener.tls.clone(),
        };
        let listener = Listener::bind(&config.listener.endpoint, options)?;

        let service = Arc::new(ServiceContext::from_config(config, handler));
        let tracker = ConnectionTracker::new();
        let workers = WorkerPool::start(
            config.workers.resolved_count(),
            Duration::from_secs(config.workers.drain_timeout_secs),
            service,
            tracker.clone(),
        )?;

        Ok(Self {
            listener,
            workers,
            tracker,
            shutdown: Shutdown::new(),
        })
    }

    /// The bound endpoint, with an ephemeral TCP port resolved.
    pub fn local_endpoint(&self) -> ListenEndpoint {
        self.listener.local_endpoint()
    }

    /// Live connections across all workers.
    pub fn tracker(&self) -> ConnectionTracker {
        self.tracker.clone()
    }

    /// Serve until `signal` resolves, then shut down gracefully.
    pub async fn run_until<F>(self, signal: F) -> Result<(), ServerError>
    where
        F: Future<Output = ()>,
    {
        let Self {
            listener,
            workers,
            tracker,
            shutdown,
        } = self;

        tracing::info!(
            endpoint = %listener.local_endpoint(),
            workers = workers.worker_count(),
            "HTTP server starting"
        );

        let accepted = {
            let accept = listener.accept_loop(|conn| workers.dispatch(conn), shutdown.subscribe());
            tokio::pin!(accept);
            tokio::select! {
                result = &mut accept => result,
                _ = signal => {
                    shutdown.trigger();
                    accept.await
                }
            }
        };
        drop(listener);

        tracing::info!(active_connections = tracker.active_count(), "Draining connections");
        let drained = workers.shutdown().await;

        tracing::info!("HTTP server stopped");
        accepted?;
        drained?;
        Ok(())
    }
}
