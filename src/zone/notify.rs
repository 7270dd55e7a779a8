//! NOTIFY sender (RFC 1996, generalized to typed notifications).
//!
//! A single task drains the notify channel. For each request it walks
//! the target list and stops at the first RcodeSuccess reply. This is
//! the chokepoint where per-zone rate limiting belongs; the hook is
//! documented below and deliberately not implemented yet.

use crate::dns::enums::{Opcode, RRType};
use crate::dns::message::Message;
use crate::dns::name::Name;
use std::net::SocketAddr;
use std::time::Duration;
use tokio::net::UdpSocket;
use tokio::sync::{broadcast, mpsc};
use tokio::task::JoinHandle;
use tokio::time::timeout;
use tracing::{debug, info, warn};

const NOTIFY_TIMEOUT: Duration = Duration::from_secs(5);

/// One notification to fan out. The rtype selects the flavor: SOA for
/// downstream secondaries, CSYNC/CDS toward the parent, DNSKEY toward a
/// child.
#[derive(Clone, Debug)]
pub struct NotifyRequest {
    pub zone: Name,
    pub rtype: RRType,
    pub targets: Vec<SocketAddr>,
}

async fn send_one(zone: &Name, rtype: RRType, target: SocketAddr) -> std::io::Result<bool> {
    let bind: SocketAddr = if target.is_ipv4() {
        "0.0.0.0:0".parse().unwrap()
    } else {
        "[::]:0".parse().unwrap()
    };
    let socket = UdpSocket::bind(bind).await?;
    let msg = Message::with_opcode(Opcode::Notify, zone.clone(), rtype);
    let id = msg.header.id;
    socket.send_to(&msg.to_bytes(), target).await?;

    let mut buf = vec![0u8; 512];
    match timeout(NOTIFY_TIMEOUT, socket.recv_from(&mut buf)).await {
        Ok(Ok((n, _))) => {
            if let Ok(reply) = Message::from_bytes(&buf[..n]) {
                return Ok(reply.header.id == id && reply.header.rcode.is_success());
            }
            Ok(false)
        }
        _ => Ok(false),
    }
}

/// Spawn the notifier task.
pub fn spawn_notifier(
    mut rx: mpsc::Receiver<NotifyRequest>,
    mut shutdown: broadcast::Receiver<()>,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        loop {
            let req = tokio::select! {
                _ = shutdown.recv() => break,
                req = rx.recv() => match req {
                    Some(req) => req,
                    None => break,
                },
            };

            // Rate limiting hook: a per-zone token bucket goes here once
            // NOTIFY storms become a real problem; until then every
            // request is sent immediately.
            let mut delivered = false;
            for target in &req.targets {
                match send_one(&req.zone, req.rtype, *target).await {
                    Ok(true) => {
                        debug!(zone = %req.zone, rtype = %req.rtype, %target, "NOTIFY acknowledged");
                        delivered = true;
                        break;
                    }
                    Ok(false) => {
                        debug!(zone = %req.zone, %target, "NOTIFY not acknowledged, trying next");
                    }
                    Err(e) => {
                        warn!(zone = %req.zone, %target, error = %e, "NOTIFY send failed");
                    }
                }
            }
            if !delivered && !req.targets.is_empty() {
                warn!(zone = %req.zone, rtype = %req.rtype, "NOTIFY exhausted all targets");
            }
        }
        info!("notifier stopped");
    })
}
