//! TLS accept loop with temporary-error backoff.

use std::sync::Arc;
use std::time::Duration;

use tokio::net::TcpListener;
use tokio_rustls::TlsAcceptor;
use tracing::{debug, error, info, warn};

use crate::error::ServerResult;
use crate::link::{spawn_link, LinkCtx};

const ACCEPT_PAUSE_MIN: Duration = Duration::from_millis(1);
const ACCEPT_PAUSE_MAX: Duration = Duration::from_secs(1);

/// Accepts connections until `shutdown` resolves or a fatal accept
/// error occurs. Either way the doors are suspended before returning,
/// quiescing posts and deliveries.
pub async fn serve<F>(
    ctx: Arc<LinkCtx>,
    listener: TcpListener,
    acceptor: TlsAcceptor,
    shutdown: F,
) -> ServerResult<()>
where
    F: std::future::Future<Output = ()>,
{
    if let Ok(addr) = listener.local_addr() {
        info!(addr = %addr, "listening");
    }
    tokio::pin!(shutdown);

    let mut pause = ACCEPT_PAUSE_MIN;
    loop {
        let accepted = tokio::select! {
            accepted = listener.accept() => accepted,
            () = &mut shutdown => {
                info!("shutdown requested");
                ctx.doors.suspend().await;
                return Ok(());
            }
        };
        match accepted {
            Ok((stream, peer)) => {
                pause = ACCEPT_PAUSE_MIN;
                debug!(peer = %peer, "connection accepted");
                let _ = stream.set_nodelay(true);
                let ctx = ctx.clone();
                let acceptor = acceptor.clone();
                tokio::spawn(async move {
                    match acceptor.accept(stream).await {
                        Ok(tls_stream) => spawn_link(ctx, tls_stream),
                        Err(err) => debug!(peer = %peer, error = %err, "TLS handshake failed"),
                    }
                });
            }
            Err(err) if is_temporary_accept(&err) => {
                if pause >= ACCEPT_PAUSE_MAX {
                    pause = ACCEPT_PAUSE_MAX;
                    warn!(error = %err, "listener recurring error");
                }
                tokio::time::sleep(pause).await;
                pause *= 2;
            }
            Err(err) => {
                error!(error = %err, "listener failed");
                ctx.doors.suspend().await;
                return Err(err.into());
            }
        }
    }
}

// Accept errors that relate to one connection rather than the listening
// socket; the loop backs off and continues.
fn is_temporary_accept(err: &std::io::Error) -> bool {
    matches!(
        err.kind(),
        std::io::ErrorKind::ConnectionAborted
            | std::io::ErrorKind::ConnectionReset
            | std::io::ErrorKind::Interrupted
            | std::io::ErrorKind::WouldBlock
    )
}
