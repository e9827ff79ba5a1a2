//! HTTP server lifecycle

use std::future::{Future, IntoFuture};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use axum::Router;
use tokio::net::TcpListener;
use tokio::sync::Notify;
use tracing::{info, warn};

/// Why the server stopped
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ServerExit {
    Shutdown,
    Restart,
}

/// Serve until `shutdown` resolves or `restart` is notified.
///
/// Both stop the listener and let in-flight requests finish. After a restart
/// request they get at most `grace`; requests still running then are dropped.
pub async fn serve<F>(
    listener: TcpListener,
    router: Router,
    restart: Arc<Notify>,
    shutdown: F,
    grace: Duration,
) -> std::io::Result<ServerExit>
where
    F: Future<Output = ()> + Send + 'static,
{
    let restarting = Arc::new(AtomicBool::new(false));
    let restart_started = Arc::new(Notify::new());

    let signal = {
        let restarting = restarting.clone();
        let restart_started = restart_started.clone();
        async move {
            tokio::select! {
                _ = shutdown => {
                    info!("Shutdown signal received, cleaning up...");
                }
                _ = restart.notified() => {
                    warn!("Restart requested, stopping server");
                    restarting.store(true, Ordering::SeqCst);
                    restart_started.notify_one();
                }
            }
        }
    };

    let server = axum::serve(listener, router)
        .with_graceful_shutdown(signal)
        .into_future();
    tokio::pin!(server);

    tokio::select! {
        result = &mut server => {
            result?;
            return Ok(if restarting.load(Ordering::SeqCst) {
                ServerExit::Restart
            } else {
                ServerExit::Shutdown
            });
        }
        _ = restart_started.notified() => {}
    }

    match tokio::time::timeout(grace, server).await {
        Ok(result) => result?,
        Err(_) => warn!("Requests still in flight after {:?}, restarting anyway", grace),
    }
    Ok(ServerExit::Restart)
}
