//! Do53 over TCP with two-byte length framing; also the transport zone
//! transfers ride on.

use crate::server::handler::{Handler, frame};
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tokio::time::timeout;
use tracing::{debug, info};

const IDLE_TIMEOUT: Duration = Duration::from_secs(30);
const MAX_MESSAGE: usize = 65535;

pub async fn serve_stream<S>(mut stream: S, src: SocketAddr, handler: Arc<Handler>)
where
    S: tokio::io::AsyncRead + tokio::io::AsyncWrite + Unpin,
{
    loop {
        let mut len_buf = [0u8; 2];
        match timeout(IDLE_TIMEOUT, stream.read_exact(&mut len_buf)).await {
            Ok(Ok(_)) => {}
            _ => break,
        }
        let len = u16::from_be_bytes(len_buf) as usize;
        if len == 0 || len > MAX_MESSAGE {
            break;
        }
        let mut msg_buf = vec![0u8; len];
        match timeout(IDLE_TIMEOUT, stream.read_exact(&mut msg_buf)).await {
            Ok(Ok(_)) => {}
            _ => break,
        }

        let responses = handler.handle(&msg_buf, src, true).await;
        if responses.is_empty() {
            continue;
        }
        let Ok(framed) = frame(&responses) else { break };
        if stream.write_all(&framed).await.is_err() {
            break;
        }
    }
    debug!(%src, "stream connection closed");
}

pub async fn spawn_tcp(
    addr: SocketAddr,
    handler: Arc<Handler>,
    mut shutdown: broadcast::Receiver<()>,
) -> std::io::Result<JoinHandle<()>> {
    let listener = TcpListener::bind(addr).await?;
    info!(%addr, "Do53/TCP listening");

    Ok(tokio::spawn(async move {
        loop {
            let (stream, src): (TcpStream, SocketAddr) = tokio::select! {
                _ = shutdown.recv() => break,
                accept = listener.accept() => match accept {
                    Ok(pair) => pair,
                    Err(e) => {
                        debug!(error = %e, "TCP accept failed");
                        continue;
                    }
                },
            };
            let handler = handler.clone();
            tokio::spawn(async move {
                serve_stream(stream, src, handler).await;
            });
        }
        info!(%addr, "Do53/TCP stopped");
    }))
}
