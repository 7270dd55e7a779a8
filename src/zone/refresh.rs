//! Secondary-zone refresher.
//!
//! NOTIFY intake and the per-zone SOA refresh timer both land here: the
//! engine probes the primary's serial and pulls a transfer when it is
//! ahead. A failed refresh leaves the prior zone contents serving and
//! records the failure on the zone's error flag.

use crate::dns::enums::RRType;
use crate::dns::message::Message;
use crate::dns::name::Name;
use crate::dns::rdata::RData;
use crate::error::{Result, TdnsError};
use crate::zone::store::ZoneStore;
use crate::zone::transfer::{TransferOutcome, ingest_transfer, pull_axfr};
use crate::zone::zone::{ZoneType, serial_gt};
use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::net::UdpSocket;
use tokio::sync::{broadcast, mpsc};
use tokio::task::JoinHandle;
use tokio::time::timeout;
use tracing::{debug, info, warn};

const SOA_PROBE_TIMEOUT: Duration = Duration::from_secs(5);
const REFRESH_SCAN_INTERVAL: Duration = Duration::from_secs(60);

#[derive(Clone, Debug)]
pub struct RefreshRequest {
    pub zone: Name,
    pub force: bool,
}

/// Query the primary for the zone's SOA serial.
async fn probe_serial(zone: &Name, primary: SocketAddr) -> Result<u32> {
    let bind: SocketAddr = if primary.is_ipv4() {
        "0.0.0.0:0".parse().unwrap()
    } else {
        "[::]:0".parse().unwrap()
    };
    let socket = UdpSocket::bind(bind).await?;
    let msg = Message::query(zone.clone(), RRType::SOA);
    let id = msg.header.id;
    socket.send_to(&msg.to_bytes(), primary).await?;

    let mut buf = vec![0u8; 4096];
    let (n, _) = timeout(SOA_PROBE_TIMEOUT, socket.recv_from(&mut buf))
        .await
        .map_err(|_| TdnsError::Timeout)??;
    let reply = Message::from_bytes(&buf[..n])?;
    if reply.header.id != id || !reply.header.rcode.is_success() {
        return Err(TdnsError::RefreshError {
            zone: zone.to_string(),
            reason: format!("SOA probe answered {}", reply.header.rcode),
        });
    }
    reply
        .answers
        .iter()
        .find_map(|rr| match &rr.rdata {
            RData::Soa(soa) => Some(soa.serial),
            _ => None,
        })
        .ok_or_else(|| TdnsError::RefreshError {
            zone: zone.to_string(),
            reason: "SOA probe without SOA answer".into(),
        })
}

async fn refresh_zone(zones: &ZoneStore, req: &RefreshRequest) -> Result<()> {
    let zone = zones
        .get(&req.zone)
        .ok_or_else(|| TdnsError::ZoneNotFound(req.zone.to_string()))?;
    if zone.ztype != ZoneType::Secondary {
        debug!(zone = %req.zone, "refresh requested for non-secondary zone, ignoring");
        return Ok(());
    }
    let Some(primary) = *zone.primary.read() else {
        return Err(TdnsError::RefreshError {
            zone: req.zone.to_string(),
            reason: "secondary without configured primary".into(),
        });
    };

    let current = zone.current_serial();
    if !req.force {
        let upstream = probe_serial(&req.zone, primary).await?;
        if !serial_gt(upstream, current) {
            debug!(zone = %req.zone, current, upstream, "zone is current");
            return Ok(());
        }
        info!(zone = %req.zone, current, upstream, "serial advanced, pulling transfer");
    }

    match pull_axfr(&req.zone, primary, zone.incoming_serial(), req.force).await? {
        TransferOutcome::Unchanged(serial) => {
            debug!(zone = %req.zone, serial, "transfer declared zone unchanged");
        }
        TransferOutcome::Records { serial, records } => {
            let fresh = ingest_transfer(&zone, serial, records)?;
            zones.insert(fresh);
            info!(zone = %req.zone, serial, "zone refreshed");
        }
    }
    *zone.error.write() = None;
    Ok(())
}

/// Spawn the refresher: drains NOTIFY-driven requests and runs the
/// periodic SOA-refresh scan.
pub fn spawn_refresher(
    mut rx: mpsc::Receiver<RefreshRequest>,
    zones: Arc<ZoneStore>,
    mut shutdown: broadcast::Receiver<()>,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut last_refresh: HashMap<Name, Instant> = HashMap::new();
        let mut scan = tokio::time::interval(REFRESH_SCAN_INTERVAL);
        loop {
            let req = tokio::select! {
                _ = shutdown.recv() => break,
                req = rx.recv() => match req {
                    Some(req) => Some(req),
                    None => break,
                },
                _ = scan.tick() => None,
            };

            let due: Vec<RefreshRequest> = match req {
                Some(req) => vec![req],
                None => {
                    // zones whose SOA refresh interval has elapsed
                    let now = Instant::now();
                    zones
                        .names()
                        .into_iter()
                        .filter_map(|name| {
                            let zone = zones.get(&name)?;
                            if zone.ztype != ZoneType::Secondary {
                                return None;
                            }
                            let refresh = zone.soa().map(|s| s.refresh as u64).unwrap_or(3600);
                            let elapsed = last_refresh
                                .get(&name)
                                .map(|t| now.duration_since(*t))
                                .unwrap_or(Duration::MAX);
                            (elapsed >= Duration::from_secs(refresh))
                                .then_some(RefreshRequest { zone: name, force: false })
                        })
                        .collect()
                }
            };

            for req in due {
                last_refresh.insert(req.zone.clone(), Instant::now());
                if let Err(e) = refresh_zone(&zones, &req).await {
                    warn!(zone = %req.zone, error = %e, "refresh failed, keeping prior contents");
                    if let Some(zone) = zones.get(&req.zone) {
                        *zone.error.write() = Some(e.to_string());
                    }
                }
            }
        }
        info!("refresher stopped");
    })
}
