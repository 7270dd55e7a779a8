//! DNS-over-TLS listener (RFC 7858): TCP framing inside TLS, ALPN
//! "dot".

use crate::server::handler::Handler;
use crate::server::tcp::serve_stream;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpListener;
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tokio::time::timeout;
use tokio_rustls::TlsAcceptor;
use tracing::{debug, info};

const HANDSHAKE_TIMEOUT: Duration = Duration::from_secs(10);

pub async fn spawn_dot(
    addr: SocketAddr,
    tls: Arc<rustls::ServerConfig>,
    handler: Arc<Handler>,
    mut shutdown: broadcast::Receiver<()>,
) -> std::io::Result<JoinHandle<()>> {
    let listener = TcpListener::bind(addr).await?;
    let acceptor = TlsAcceptor::from(tls);
    info!(%addr, "DoT listening");

    Ok(tokio::spawn(async move {
        loop {
            let (stream, src) = tokio::select! {
                _ = shutdown.recv() => break,
                accept = listener.accept() => match accept {
                    Ok(pair) => pair,
                    Err(e) => {
                        debug!(error = %e, "DoT accept failed");
                        continue;
                    }
                },
            };
            let acceptor = acceptor.clone();
            let handler = handler.clone();
            tokio::spawn(async move {
                match timeout(HANDSHAKE_TIMEOUT, acceptor.accept(stream)).await {
                    Ok(Ok(tls_stream)) => serve_stream(tls_stream, src, handler).await,
                    Ok(Err(e)) => debug!(%src, error = %e, "TLS handshake failed"),
                    Err(_) => debug!(%src, "TLS handshake timed out"),
                }
            });
        }
        info!(%addr, "DoT stopped");
    }))
}
