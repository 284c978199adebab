use std::sync::Arc;

use tokio::signal::unix::{signal, SignalKind};
use tokio_util::sync::CancellationToken;

use crate::scheduler::Dispatcher;

/// Listen for SIGTERM and SIGINT.
///
/// On either signal the dispatcher stops launching work and kills its running
/// workers, then the returned token is cancelled so the HTTP server can drain.
pub fn install_shutdown_handler(dispatcher: Arc<Dispatcher>) -> std::io::Result<CancellationToken> {
    let mut sigterm = signal(SignalKind::terminate())?;
    let mut sigint = signal(SignalKind::interrupt())?;

    let token = CancellationToken::new();
    let token_clone = token.clone();

    tokio::spawn(async move {
        tokio::select! {
            _ = sigterm.recv() => {
                tracing::info!("Received SIGTERM, shutting down");
            }
            _ = sigint.recv() => {
                tracing::info!("Received SIGINT, shutting down");
            }
        }

        dispatcher.shutdown();
        token_clone.cancel();
    });

    Ok(token)
}
