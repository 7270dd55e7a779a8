//! Do53 over UDP.

use crate::server::handler::{Handler, query_udp_size, udp_payload};
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::net::UdpSocket;
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tracing::{debug, error, info};

/// Receive buffer: at least the EDNS0 size we advertise.
const RECV_BUF: usize = 4096;

pub async fn spawn_udp(
    addr: SocketAddr,
    handler: Arc<Handler>,
    mut shutdown: broadcast::Receiver<()>,
) -> std::io::Result<JoinHandle<()>> {
    let socket = Arc::new(UdpSocket::bind(addr).await?);
    info!(%addr, "Do53/UDP listening");

    Ok(tokio::spawn(async move {
        let mut buf = vec![0u8; RECV_BUF];
        loop {
            let (len, src) = tokio::select! {
                _ = shutdown.recv() => break,
                recv = socket.recv_from(&mut buf) => match recv {
                    Ok(pair) => pair,
                    Err(e) => {
                        error!(error = %e, "UDP recv failed");
                        continue;
                    }
                },
            };
            let bytes = buf[..len].to_vec();
            let handler = handler.clone();
            let socket = socket.clone();
            tokio::spawn(async move {
                let responses = handler.handle(&bytes, src, false).await;
                if let Some(resp) = responses.first() {
                    let payload = udp_payload(query_udp_size(&bytes), resp);
                    if let Err(e) = socket.send_to(&payload, src).await {
                        debug!(%src, error = %e, "UDP send failed");
                    }
                }
            });
        }
        info!(%addr, "Do53/UDP stopped");
    }))
}
