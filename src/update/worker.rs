//! The zone-updater worker: the single consumer of the process-wide
//! update queue. Because every mutation funnels through here, updates to
//! any one zone are totally ordered without per-request locking games.

use crate::delegation::{DelegationSyncStatus, detect_delegation_changes};
use crate::dns::enums::{RRClass, RRType, Rcode};
use crate::dns::name::Name;
use crate::error::TdnsError;
use crate::keydb::{KeyDb, KeyRole};
use crate::sign::signer::sign_rrset;
use crate::update::{UpdateCmd, UpdateRequest};
use crate::zone::store::ZoneStore;
use crate::zone::zone::Zone;
use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{broadcast, mpsc};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

const SYNC_SEND_TIMEOUT: Duration = Duration::from_secs(2);

pub struct UpdateWorker {
    zones: Arc<ZoneStore>,
    keydb: Arc<KeyDb>,
    sync_tx: mpsc::Sender<DelegationSyncStatus>,
    signature_validity: Duration,
}

impl UpdateWorker {
    fn ack(req: &mut UpdateRequest, rcode: Rcode) {
        if let Some(done) = req.done.take() {
            let _ = done.send(rcode);
        }
    }

    fn apply_actions(&self, zone: &Zone, req: &UpdateRequest) -> (bool, HashSet<(Name, RRType)>) {
        let mut changed = false;
        let mut touched: HashSet<(Name, RRType)> = HashSet::new();

        for action in &req.actions {
            let did = match action.class {
                RRClass::NONE => zone.delete_rr(action),
                RRClass::ANY => zone.delete_rrset(&action.name, action.rtype),
                _ => zone.add_rr(action),
            };
            if did {
                changed = true;
                touched.insert((action.name.clone(), action.rtype));
            }
        }
        (changed, touched)
    }

    /// Regenerate RRSIGs over every touched RRset that still exists.
    fn resign_touched(&self, zone: &Zone, touched: &HashSet<(Name, RRType)>) -> Result<(), TdnsError> {
        let zsks = self.keydb.active_dnssec_keys(&zone.name, KeyRole::Zsk)?;
        let ksks = self.keydb.active_dnssec_keys(&zone.name, KeyRole::Ksk)?;
        for (name, rtype) in touched {
            let Some(owner) = zone.get_owner(name) else {
                continue;
            };
            let Some(mut set) = owner.get(*rtype) else {
                continue;
            };
            let keys = if *rtype == RRType::DNSKEY && !ksks.is_empty() {
                &ksks
            } else {
                &zsks
            };
            sign_rrset(&mut set, &zone.name, keys, self.signature_validity)?;
            zone.put_rrset(set);
        }
        Ok(())
    }

    async fn process(&self, mut req: UpdateRequest) {
        match req.cmd {
            UpdateCmd::Ping => {
                Self::ack(&mut req, Rcode::NoError);
            }
            UpdateCmd::TrustStoreUpdate => {
                let mut rcode = Rcode::NoError;
                for action in &req.actions {
                    match self
                        .keydb
                        .add_sig0_trust(action, req.validated, req.trusted, "key-upload")
                    {
                        Ok(keyid) => {
                            info!(key = %action.name, keyid, "key landed in trust store (pending trust)");
                        }
                        Err(e) => {
                            error!(key = %action.name, error = %e, "trust store update failed");
                            rcode = Rcode::ServFail;
                        }
                    }
                }
                Self::ack(&mut req, rcode);
            }
            UpdateCmd::ZoneUpdate | UpdateCmd::ChildUpdate | UpdateCmd::DeferredUpdate => {
                self.process_zone_update(&mut req).await;
            }
        }
    }

    async fn process_zone_update(&self, req: &mut UpdateRequest) {
        let Some(zone) = self.zones.get(&req.zone_name) else {
            warn!(zone = %req.zone_name, "update for unknown zone reached the worker");
            Self::ack(req, Rcode::NotAuth);
            return;
        };

        // delegation delta is computed against pre-mutation data
        let sync_status = detect_delegation_changes(&zone, &req.actions);

        let (changed, touched) = {
            let _guard = zone.mu.lock();
            let (changed, touched) = self.apply_actions(&zone, req);
            if changed {
                if !req.internal {
                    zone.set_dirty(true);
                }
                zone.bump_serial();
            }
            (changed, touched)
        };

        if changed && zone.options.read().online_signing {
            if let Err(e) = self.resign_touched(&zone, &touched) {
                error!(zone = %zone.name, error = %e, "re-signing after update failed");
                Self::ack(req, Rcode::ServFail);
                return;
            }
        }

        if req.cmd == UpdateCmd::ChildUpdate {
            for action in &req.actions {
                if let Err(e) = self.keydb.store_child_delegation_rr(&zone.name, action) {
                    warn!(zone = %zone.name, error = %e, "recording child delegation data failed");
                }
            }
        }

        debug!(zone = %zone.name, changed, serial = zone.current_serial(), "update applied");

        if let Some(status) = sync_status {
            if !status.is_empty() && zone.options.read().delegation_sync_child {
                match self
                    .sync_tx
                    .send_timeout(status, SYNC_SEND_TIMEOUT)
                    .await
                {
                    Ok(()) => {}
                    Err(e) => warn!(zone = %zone.name, error = %e,
                        "dropping delegation sync status, channel blocked"),
                }
            }
        }

        Self::ack(req, Rcode::NoError);
    }
}

/// Spawn the single zone-updater worker.
pub fn spawn_update_worker(
    mut rx: mpsc::Receiver<UpdateRequest>,
    zones: Arc<ZoneStore>,
    keydb: Arc<KeyDb>,
    sync_tx: mpsc::Sender<DelegationSyncStatus>,
    signature_validity: Duration,
    mut shutdown: broadcast::Receiver<()>,
) -> JoinHandle<()> {
    let worker = UpdateWorker {
        zones,
        keydb,
        sync_tx,
        signature_validity,
    };
    tokio::spawn(async move {
        loop {
            let req = tokio::select! {
                _ = shutdown.recv() => break,
                req = rx.recv() => match req {
                    Some(req) => req,
                    None => break,
                },
            };
            worker.process(req).await;
        }
        info!("zone-updater worker stopped");
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dns::rdata::{RData, SoaData};
    use crate::dns::record::ResourceRecord;
    use crate::sign::signer::DEFAULT_SIGNATURE_VALIDITY;
    use crate::update::policy::UpdatePolicy;
    use crate::zone::zone::{StoreKind, ZoneType};
    use std::net::Ipv4Addr;
    use tokio::sync::oneshot;

    fn seed_zone(zones: &ZoneStore, allow_updates: bool) -> Arc<Zone> {
        let zone = Zone::new(
            Name::parse("example.com").unwrap(),
            ZoneType::Primary,
            StoreKind::Map,
            UpdatePolicy::default(),
        );
        zone.options.write().allow_updates = allow_updates;
        zone.sort_records_in(vec![
            ResourceRecord::new(
                Name::parse("example.com").unwrap(),
                RRType::SOA,
                3600,
                RData::Soa(SoaData {
                    mname: Name::parse("ns1.example.com").unwrap(),
                    rname: Name::parse("admin.example.com").unwrap(),
                    serial: 100,
                    refresh: 3600,
                    retry: 900,
                    expire: 604800,
                    minimum: 86400,
                }),
            ),
            ResourceRecord::new(
                Name::parse("example.com").unwrap(),
                RRType::NS,
                3600,
                RData::Ns(Name::parse("ns1.example.com").unwrap()),
            ),
            ResourceRecord::new(
                Name::parse("www.example.com").unwrap(),
                RRType::A,
                300,
                RData::A(Ipv4Addr::new(192, 0, 2, 10)),
            ),
        ])
        .unwrap();
        let zone = Arc::new(zone);
        zones.insert(zone.clone());
        zone
    }

    fn worker_with_store() -> (UpdateWorker, Arc<ZoneStore>, mpsc::Receiver<DelegationSyncStatus>) {
        let zones = Arc::new(ZoneStore::new());
        let (sync_tx, sync_rx) = mpsc::channel(8);
        let worker = UpdateWorker {
            zones: zones.clone(),
            keydb: Arc::new(KeyDb::open_in_memory().unwrap()),
            sync_tx,
            signature_validity: DEFAULT_SIGNATURE_VALIDITY,
        };
        (worker, zones, sync_rx)
    }

    #[tokio::test]
    async fn test_add_bumps_serial_once() {
        let (worker, zones, _sync_rx) = worker_with_store();
        let zone = seed_zone(&zones, true);

        let mut req = UpdateRequest::new(
            UpdateCmd::ZoneUpdate,
            zone.name.clone(),
            vec![ResourceRecord::new(
                Name::parse("new.example.com").unwrap(),
                RRType::A,
                300,
                RData::A(Ipv4Addr::new(192, 0, 2, 11)),
            )],
        );
        let (tx, rx) = oneshot::channel();
        req.done = Some(tx);
        worker.process(req).await;
        assert_eq!(rx.await.unwrap(), Rcode::NoError);

        assert_eq!(zone.current_serial(), 101);
        assert!(zone.is_dirty());
        assert!(zone.get_owner(&Name::parse("new.example.com").unwrap()).is_some());
    }

    #[tokio::test]
    async fn test_delete_exact_ignores_ttl() {
        let (worker, zones, _sync_rx) = worker_with_store();
        let zone = seed_zone(&zones, true);

        let mut del = ResourceRecord::new(
            Name::parse("www.example.com").unwrap(),
            RRType::A,
            999, // TTL must not matter for the comparison
            RData::A(Ipv4Addr::new(192, 0, 2, 10)),
        );
        del.class = RRClass::NONE;
        let req = UpdateRequest::new(UpdateCmd::ZoneUpdate, zone.name.clone(), vec![del]);
        worker.process(req).await;

        assert!(zone.get_owner(&Name::parse("www.example.com").unwrap()).is_none());
        assert_eq!(zone.current_serial(), 101);
    }

    #[tokio::test]
    async fn test_noop_update_does_not_bump() {
        let (worker, zones, _sync_rx) = worker_with_store();
        let zone = seed_zone(&zones, true);

        // duplicate of an existing record
        let req = UpdateRequest::new(
            UpdateCmd::ZoneUpdate,
            zone.name.clone(),
            vec![ResourceRecord::new(
                Name::parse("www.example.com").unwrap(),
                RRType::A,
                300,
                RData::A(Ipv4Addr::new(192, 0, 2, 10)),
            )],
        );
        worker.process(req).await;
        assert_eq!(zone.current_serial(), 100);
        assert!(!zone.is_dirty());
    }

    #[tokio::test]
    async fn test_internal_update_not_dirty() {
        let (worker, zones, _sync_rx) = worker_with_store();
        let zone = seed_zone(&zones, true);

        let mut req = UpdateRequest::new(
            UpdateCmd::ZoneUpdate,
            zone.name.clone(),
            vec![ResourceRecord::new(
                Name::parse("auto.example.com").unwrap(),
                RRType::A,
                300,
                RData::A(Ipv4Addr::new(192, 0, 2, 12)),
            )],
        );
        req.internal = true;
        worker.process(req).await;
        assert_eq!(zone.current_serial(), 101);
        assert!(!zone.is_dirty());
    }

    #[tokio::test]
    async fn test_ns_change_emits_sync_status() {
        let (worker, zones, mut sync_rx) = worker_with_store();
        let zone = seed_zone(&zones, true);
        zone.options.write().delegation_sync_child = true;

        let req = UpdateRequest::new(
            UpdateCmd::ZoneUpdate,
            zone.name.clone(),
            vec![ResourceRecord::new(
                Name::parse("example.com").unwrap(),
                RRType::NS,
                3600,
                RData::Ns(Name::parse("ns2.example.com").unwrap()),
            )],
        );
        worker.process(req).await;

        let status = sync_rx.try_recv().unwrap();
        assert_eq!(status.zone_name, zone.name);
        assert_eq!(status.ns_adds.len(), 1);
        assert!(!status.in_sync);
    }
}
