use tokio::signal::unix::{signal, SignalKind};
use tokio_util::sync::CancellationToken;

/// Install a shutdown handler that listens for SIGTERM and SIGINT.
///
/// Returns a `CancellationToken` that is cancelled when either signal is
/// received.
///
/// Once it fires the `/worker`, `/bus` and `/db` listener stops accepting
/// connections and the dashboard stops serving. Jobs are held in memory
/// only, so nothing is flushed: submitters still waiting on a job see
/// their connection close rather than an answer, and workers see the
/// same when they next try to report.
///
/// # Errors
///
/// Returns an error if a signal handler cannot be registered.
pub fn install_shutdown_handler() -> std::io::Result<CancellationToken> {
    let token = CancellationToken::new();
    let token_clone = token.clone();

    let mut sigterm = signal(SignalKind::terminate())?;
    let mut sigint = signal(SignalKind::interrupt())?;

    tokio::spawn(async move {
        tokio::select! {
            _ = sigterm.recv() => {
                tracing::info!("Received SIGTERM, shutting down event bus");
            }
            _ = sigint.recv() => {
                tracing::info!("Received SIGINT, shutting down event bus");
            }
        }

        token_clone.cancel();
    });

    Ok(token)
}
