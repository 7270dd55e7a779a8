//! Parent-sync engine: consumes delegation-sync statuses and pushes the
//! delta toward the parent using the configured scheme — NOTIFY(CSYNC),
//! NOTIFY(CDS), or a SIG(0)-signed DSYNC-addressed UPDATE.

use crate::delegation::DelegationSyncStatus;
use crate::dns::enums::{Opcode, RRClass, RRType, Rcode};
use crate::dns::message::Message;
use crate::dns::name::Name;
use crate::dns::rdata::{DsyncData, RData};
use crate::dns::record::ResourceRecord;
use crate::keydb::KeyDb;
use crate::update::sig0;
use crate::zone::notify::NotifyRequest;
use crate::zone::store::ZoneStore;
use serde::Deserialize;
use std::net::{IpAddr, SocketAddr};
use std::sync::Arc;
use std::time::Duration;
use tokio::net::UdpSocket;
use tokio::sync::{broadcast, mpsc};
use tokio::task::JoinHandle;
use tokio::time::timeout;
use tracing::{debug, info, warn};

const UPDATE_TIMEOUT: Duration = Duration::from_secs(5);

#[derive(Copy, Clone, Debug, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum SyncScheme {
    #[default]
    NotifyCsync,
    NotifyCds,
    UpdateDsync,
}

/// Find the parent zone we serve (if any) and the DSYNC target it
/// advertises for the wanted payload type.
fn locate_dsync(
    zones: &ZoneStore,
    child: &Name,
    wanted: RRType,
) -> Option<(Name, DsyncData)> {
    let parent_name = child.parent()?;
    let parent_zone = zones.find_zone(&parent_name)?;
    let dsyncs = parent_zone.apex_rrset(RRType::DSYNC)?;
    let data = dsyncs.rrs.iter().find_map(|rr| match &rr.rdata {
        RData::Dsync(d) if d.target_type == wanted || d.target_type == RRType::ANY => {
            Some(d.clone())
        }
        _ => None,
    })?;
    Some((parent_zone.name.clone(), data))
}

/// Resolve a DSYNC target name to socket addresses using data we serve.
fn resolve_target(zones: &ZoneStore, target: &Name, port: u16) -> Vec<SocketAddr> {
    let mut addrs: Vec<IpAddr> = Vec::new();
    if let Some(zone) = zones.find_zone(target) {
        if let Some(owner) = zone.get_owner(target) {
            for rtype in [RRType::A, RRType::AAAA] {
                if let Some(set) = owner.get(rtype) {
                    for rr in &set.rrs {
                        match &rr.rdata {
                            RData::A(a) => addrs.push((*a).into()),
                            RData::Aaaa(a) => addrs.push((*a).into()),
                            _ => {}
                        }
                    }
                }
            }
        }
    }
    addrs.into_iter().map(|ip| SocketAddr::new(ip, port)).collect()
}

/// Turn the sync status into RFC 2136 actions: removes first (class
/// NONE), then adds (class IN).
fn status_actions(status: &DelegationSyncStatus) -> Vec<ResourceRecord> {
    let mut actions = Vec::new();
    for rr in status
        .ns_removes
        .iter()
        .chain(&status.a_removes)
        .chain(&status.aaaa_removes)
    {
        let mut rr = rr.clone();
        rr.class = RRClass::NONE;
        rr.ttl = 0;
        actions.push(rr);
    }
    for rr in status
        .ns_adds
        .iter()
        .chain(&status.a_adds)
        .chain(&status.aaaa_adds)
    {
        let mut rr = rr.clone();
        rr.class = RRClass::IN;
        actions.push(rr);
    }
    actions
}

async fn send_dsync_update(
    status: &DelegationSyncStatus,
    parent_zone: Name,
    targets: &[SocketAddr],
    keydb: &KeyDb,
) {
    let mut msg = Message::with_opcode(Opcode::Update, parent_zone, RRType::SOA);
    msg.authorities = status_actions(status);

    match keydb.active_sig0_key(&status.zone_name) {
        Ok(Some(key)) => {
            if let Err(e) = sig0::sign_message(&mut msg, &key) {
                warn!(zone = %status.zone_name, error = %e, "signing DSYNC update failed");
                return;
            }
        }
        Ok(None) => {
            warn!(zone = %status.zone_name, "no active SIG(0) key, sending unsigned DSYNC update");
        }
        Err(e) => {
            warn!(zone = %status.zone_name, error = %e, "key store unavailable for DSYNC update");
            return;
        }
    }

    let bytes = msg.to_bytes();
    for target in targets {
        let bind: SocketAddr = if target.is_ipv4() {
            "0.0.0.0:0".parse().unwrap()
        } else {
            "[::]:0".parse().unwrap()
        };
        let Ok(socket) = UdpSocket::bind(bind).await else {
            continue;
        };
        if socket.send_to(&bytes, target).await.is_err() {
            continue;
        }
        let mut buf = vec![0u8; 512];
        if let Ok(Ok((n, _))) = timeout(UPDATE_TIMEOUT, socket.recv_from(&mut buf)).await {
            if let Ok(reply) = Message::from_bytes(&buf[..n]) {
                if reply.header.rcode == Rcode::NoError {
                    info!(zone = %status.zone_name, %target, "parent accepted DSYNC update");
                    return;
                }
                warn!(zone = %status.zone_name, %target, rcode = %reply.header.rcode,
                    "parent rejected DSYNC update");
            }
        }
    }
}

/// Spawn the parent-sync engine.
pub fn spawn_parent_sync(
    mut rx: mpsc::Receiver<DelegationSyncStatus>,
    zones: Arc<ZoneStore>,
    keydb: Arc<KeyDb>,
    notify_tx: mpsc::Sender<NotifyRequest>,
    scheme: SyncScheme,
    mut shutdown: broadcast::Receiver<()>,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        loop {
            let status = tokio::select! {
                _ = shutdown.recv() => break,
                status = rx.recv() => match status {
                    Some(status) => status,
                    None => break,
                },
            };
            debug!(zone = %status.zone_name,
                ns_adds = status.ns_adds.len(), ns_removes = status.ns_removes.len(),
                "delegation sync status received");

            let payload = match scheme {
                SyncScheme::NotifyCds => RRType::CDS,
                _ => RRType::CSYNC,
            };
            let Some((parent_zone, dsync)) = locate_dsync(&zones, &status.zone_name, payload)
            else {
                warn!(zone = %status.zone_name,
                    "no DSYNC target found at parent, delegation drift persists");
                continue;
            };
            let targets = resolve_target(&zones, &dsync.target, dsync.port);
            // remember the discovered coordinates on the zone
            if let Some(zone) = zones.get(&status.zone_name) {
                let mut parent = zone.parent.write();
                parent.parent = Some(parent_zone.clone());
                parent.parent_servers = targets.clone();
                if let Some(pz) = zones.get(&parent_zone) {
                    parent.parent_ns = pz
                        .apex_rrset(RRType::NS)
                        .map(|set| {
                            set.rrs
                                .iter()
                                .filter_map(|rr| match &rr.rdata {
                                    RData::Ns(t) => Some(t.clone()),
                                    _ => None,
                                })
                                .collect()
                        })
                        .unwrap_or_default();
                }
            }
            if targets.is_empty() {
                warn!(zone = %status.zone_name, target = %dsync.target,
                    "DSYNC target does not resolve");
                continue;
            }

            match scheme {
                SyncScheme::NotifyCsync | SyncScheme::NotifyCds => {
                    let req = NotifyRequest {
                        zone: status.zone_name.clone(),
                        rtype: payload,
                        targets,
                    };
                    if notify_tx.send_timeout(req, Duration::from_secs(2)).await.is_err() {
                        warn!(zone = %status.zone_name, "notify queue blocked, dropping sync notify");
                    }
                }
                SyncScheme::UpdateDsync => {
                    send_dsync_update(&status, parent_zone, &targets, &keydb).await;
                }
            }
        }
        info!("parent-sync engine stopped");
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dns::rdata::SoaData;
    use crate::update::policy::UpdatePolicy;
    use crate::zone::zone::{StoreKind, Zone, ZoneType};
    use std::net::Ipv4Addr;

    fn parent_store() -> Arc<ZoneStore> {
        let zones = Arc::new(ZoneStore::new());
        let parent = Zone::new(
            Name::parse("example.com").unwrap(),
            ZoneType::Primary,
            StoreKind::Map,
            UpdatePolicy::default(),
        );
        parent
            .sort_records_in(vec![
                ResourceRecord::new(
                    Name::parse("example.com").unwrap(),
                    RRType::SOA,
                    3600,
                    RData::Soa(SoaData {
                        mname: Name::parse("ns1.example.com").unwrap(),
                        rname: Name::parse("admin.example.com").unwrap(),
                        serial: 1,
                        refresh: 3600,
                        retry: 900,
                        expire: 604800,
                        minimum: 86400,
                    }),
                ),
                ResourceRecord::new(
                    Name::parse("example.com").unwrap(),
                    RRType::DSYNC,
                    3600,
                    RData::Dsync(DsyncData {
                        target_type: RRType::CSYNC,
                        scheme: 1,
                        port: 5300,
                        target: Name::parse("dsync.example.com").unwrap(),
                    }),
                ),
                ResourceRecord::new(
                    Name::parse("dsync.example.com").unwrap(),
                    RRType::A,
                    3600,
                    RData::A(Ipv4Addr::new(192, 0, 2, 53)),
                ),
            ])
            .unwrap();
        zones.insert(Arc::new(parent));
        zones
    }

    #[test]
    fn test_locate_dsync_and_resolve() {
        let zones = parent_store();
        let child = Name::parse("child.example.com").unwrap();
        let (parent_zone, dsync) = locate_dsync(&zones, &child, RRType::CSYNC).unwrap();
        assert_eq!(parent_zone, Name::parse("example.com").unwrap());
        assert_eq!(dsync.port, 5300);

        let targets = resolve_target(&zones, &dsync.target, dsync.port);
        assert_eq!(targets, vec!["192.0.2.53:5300".parse().unwrap()]);
    }

    #[test]
    fn test_locate_dsync_wrong_type() {
        let zones = parent_store();
        let child = Name::parse("child.example.com").unwrap();
        assert!(locate_dsync(&zones, &child, RRType::CDS).is_none());
    }

    #[test]
    fn test_status_actions_order() {
        let status = DelegationSyncStatus {
            zone_name: Name::parse("child.example.com").unwrap(),
            in_sync: false,
            ns_adds: vec![ResourceRecord::new(
                Name::parse("child.example.com").unwrap(),
                RRType::NS,
                3600,
                RData::Ns(Name::parse("ns2.child.example.com").unwrap()),
            )],
            ns_removes: vec![ResourceRecord::new(
                Name::parse("child.example.com").unwrap(),
                RRType::NS,
                3600,
                RData::Ns(Name::parse("ns1.child.example.com").unwrap()),
            )],
            ..Default::default()
        };
        let actions = status_actions(&status);
        assert_eq!(actions.len(), 2);
        // removes lead, with class NONE and TTL zero
        assert_eq!(actions[0].class, RRClass::NONE);
        assert_eq!(actions[0].ttl, 0);
        assert_eq!(actions[1].class, RRClass::IN);
    }
}
