//! DNS-over-QUIC listener (RFC 9250): ALPN "doq", one query per
//! bidirectional stream, two-byte length framing like DNS-over-TCP.

use crate::server::handler::{Handler, frame};
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tracing::{debug, info};

const MAX_MESSAGE: usize = 65535;

pub async fn spawn_doq(
    addr: SocketAddr,
    tls: Arc<rustls::ServerConfig>,
    handler: Arc<Handler>,
    mut shutdown: broadcast::Receiver<()>,
) -> std::io::Result<JoinHandle<()>> {
    let quic_tls = quinn::crypto::rustls::QuicServerConfig::try_from(tls.as_ref().clone())
        .map_err(|e| std::io::Error::other(format!("DoQ TLS config: {}", e)))?;
    let server_config = quinn::ServerConfig::with_crypto(Arc::new(quic_tls));
    let endpoint = quinn::Endpoint::server(server_config, addr)?;
    info!(%addr, "DoQ listening");

    Ok(tokio::spawn(async move {
        loop {
            let incoming = tokio::select! {
                _ = shutdown.recv() => break,
                incoming = endpoint.accept() => match incoming {
                    Some(incoming) => incoming,
                    None => break,
                },
            };
            let handler = handler.clone();
            tokio::spawn(async move {
                let conn = match incoming.await {
                    Ok(conn) => conn,
                    Err(e) => {
                        debug!(error = %e, "DoQ handshake failed");
                        return;
                    }
                };
                let src = conn.remote_address();
                // each query arrives on its own stream
                loop {
                    let (send, recv) = match conn.accept_bi().await {
                        Ok(pair) => pair,
                        Err(_) => break,
                    };
                    let handler = handler.clone();
                    tokio::spawn(async move {
                        serve_doq_stream(send, recv, src, handler).await;
                    });
                }
            });
        }
        endpoint.close(0u32.into(), b"shutdown");
        info!(%addr, "DoQ stopped");
    }))
}

async fn serve_doq_stream(
    mut send: quinn::SendStream,
    mut recv: quinn::RecvStream,
    src: SocketAddr,
    handler: Arc<Handler>,
) {
    let mut len_buf = [0u8; 2];
    if recv.read_exact(&mut len_buf).await.is_err() {
        return;
    }
    let len = u16::from_be_bytes(len_buf) as usize;
    if len == 0 || len > MAX_MESSAGE {
        return;
    }
    let mut msg_buf = vec![0u8; len];
    if recv.read_exact(&mut msg_buf).await.is_err() {
        return;
    }

    let responses = handler.handle(&msg_buf, src, true).await;
    if responses.is_empty() {
        return;
    }
    if let Ok(framed) = frame(&responses) {
        let _ = send.write_all(&framed).await;
        let _ = send.finish();
    }
}
