//! OS signal handling.
//!
//! SIGINT and SIGTERM both request a graceful shutdown; a second signal
//! while draining is left to the default handler of the caller.

/// Wait for SIGINT or SIGTERM.
pub async fn wait_for_signal() -> std::io::Result<&'static str> {
    use tokio::signal::unix::{signal, SignalKind};

    let mut terminate = signal(SignalKind::terminate())?;
    let mut interrupt = signal(SignalKind::interrupt())?;

    let name = tokio::select! {
        _ = terminate.recv() => "SIGTERM",
        _ = interrupt.recv() => "SIGINT",
    };
    tracing::info!(signal = name, "Shutdown signal received");
    Ok(name)
}
