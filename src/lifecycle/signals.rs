//! OS signal handling.
//!
//! # Responsibilities
//! - Wait for SIGINT (Ctrl+C) or SIGTERM
//! - Translate the first one into a `StopSignal` trigger

use std::io;

use crate::lifecycle::shutdown::StopSignal;

/// Resolve on the first SIGINT or SIGTERM.
pub async fn wait_for_termination() -> io::Result<()> {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{signal, SignalKind};

        let mut terminate = signal(SignalKind::terminate())?;
        tokio::select! {
            result = tokio::signal::ctrl_c() => result?,
            _ = terminate.recv() => {}
        }
    }
    #[cfg(not(unix))]
    tokio::signal::ctrl_c().await?;

    Ok(())
}

/// Trigger `stop` when the process is asked to terminate.
pub fn stop_on_termination(stop: StopSignal) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        match wait_for_termination().await {
            Ok(()) => {
                tracing::info!("Termination signal received");
                stop.trigger();
            }
            Err(e) => {
                tracing::error!(error = %e, "Failed to install signal handlers");
            }
        }
    })
}
