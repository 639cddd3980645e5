use tokio::signal::unix::{signal, SignalKind};
use tokio_util::sync::CancellationToken;

/// Token that the `node` and `simulate` commands wait on before tearing down
/// their nodes, monitor and dashboard.
///
/// Cancelled on SIGTERM or SIGINT, or straight away when the signal streams
/// cannot be registered.
pub fn install_shutdown_handler() -> CancellationToken {
    let token = CancellationToken::new();
    let token_clone = token.clone();

    tokio::spawn(async move {
        let (mut sigterm, mut sigint) = match (
            signal(SignalKind::terminate()),
            signal(SignalKind::interrupt()),
        ) {
            (Ok(sigterm), Ok(sigint)) => (sigterm, sigint),
            (Err(e), _) | (_, Err(e)) => {
                tracing::error!(error = %e, "Cannot watch for termination signals, stopping swarm");
                token_clone.cancel();
                return;
            }
        };

        tokio::select! {
            _ = sigterm.recv() => {
                tracing::info!("SIGTERM received, stopping swarm");
            }
            _ = sigint.recv() => {
                tracing::info!("SIGINT received, stopping swarm");
            }
        }

        token_clone.cancel();
    });

    token
}
