//! TLS listener and connection serving.
//!
//! Accepts TCP connections, performs the TLS handshake, and hands each
//! connection to hyper with the axum router. Every connection carries a
//! [`ClientAddr`] extension so the rate limiter can key on the peer IP.
//! On shutdown the loop stops accepting and in-flight connections are
//! drained against a deadline.

use std::net::SocketAddr;
use std::time::Duration;

use axum::{Extension, Router};
use hyper_util::rt::{TokioExecutor, TokioIo};
use hyper_util::service::TowerToHyperService;
use tokio::net::TcpListener;
use tokio_rustls::TlsAcceptor;
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;

/// Peer address of the connection a request arrived on.
#[derive(Debug, Clone, Copy)]
pub struct ClientAddr(pub SocketAddr);

/// Serve the router over TLS until cancelled, then drain.
///
/// Accept errors are logged and do not stop the loop; handshake and
/// connection errors only affect their own connection.
pub async fn serve(
    listener: TcpListener,
    tls: TlsAcceptor,
    app: Router,
    shutdown: CancellationToken,
    grace: Duration,
) {
    let tracker = TaskTracker::new();

    if let Ok(addr) = listener.local_addr() {
        tracing::info!(addr = %addr, "HTTPS server listening");
    }

    loop {
        let (stream, peer) = tokio::select! {
            _ = shutdown.cancelled() => break,
            accepted = listener.accept() => match accepted {
                Ok(accepted) => accepted,
                Err(e) => {
                    tracing::warn!(error = %e, "failed to accept connection");
                    continue;
                }
            },
        };

        let tls = tls.clone();
        let app = app.clone().layer(Extension(ClientAddr(peer)));

        tracker.spawn(async move {
            let stream = match tls.accept(stream).await {
                Ok(stream) => stream,
                Err(e) => {
                    tracing::debug!(peer = %peer, error = %e, "TLS handshake failed");
                    return;
                }
            };

            let service = TowerToHyperService::new(app);
            if let Err(e) = hyper_util::server::conn::auto::Builder::new(TokioExecutor::new())
                .serve_connection(TokioIo::new(stream), service)
                .await
            {
                tracing::debug!(peer = %peer, error = %e, "connection error");
            }
        });
    }

    // Stop accepting before draining.
    drop(listener);
    tracker.close();

    tracing::info!(
        connections = tracker.len(),
        "HTTPS server draining in-flight requests"
    );
    if tokio::time::timeout(grace, tracker.wait()).await.is_err() {
        tracing::warn!("shutdown deadline reached with connections still open");
    }

    tracing::info!("HTTPS server stopped");
}
