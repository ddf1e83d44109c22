//! Signal handling for graceful shutdown.

use futures::Stream;
use futures::stream;
use tracing::{error, info};

/// Yield once per shutdown signal (SIGINT or SIGTERM on Unix, Ctrl-C
/// elsewhere).
///
/// The pipeline stops its readers on the first item and forces its writers
/// down on the second. If the handlers cannot be installed the stream ends
/// at once, so the pipeline still stops on completion or timeout.
#[cfg(unix)]
pub fn shutdown_signals() -> impl Stream<Item = ()> {
    use tokio::signal::unix::{SignalKind, signal};

    let handlers = match (
        signal(SignalKind::interrupt()),
        signal(SignalKind::terminate()),
    ) {
        (Ok(sigint), Ok(sigterm)) => Some((sigint, sigterm)),
        (Err(e), _) | (_, Err(e)) => {
            error!(error = %e, "Failed to install signal handlers");
            None
        }
    };

    stream::unfold(handlers, |handlers| async move {
        let (mut sigint, mut sigterm) = handlers?;
        let name = tokio::select! {
            Some(()) = sigint.recv() => "SIGINT",
            Some(()) = sigterm.recv() => "SIGTERM",
            else => return None,
        };
        info!(message = "Signal received.", signal = name);
        Some(((), Some((sigint, sigterm))))
    })
}

#[cfg(not(unix))]
pub fn shutdown_signals() -> impl Stream<Item = ()> {
    stream::unfold((), |()| async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            error!(error = %e, "Failed to install Ctrl-C handler");
            return None;
        }
        info!(message = "Signal received.", signal = "Ctrl-C");
        Some(((), ()))
    })
}
