//! Deferred updates: first-class messages with an explicit trigger
//! predicate. When the predicate already holds the action runs at once;
//! otherwise it joins a pending queue re-evaluated every ten seconds.

use crate::dns::enums::RRType;
use crate::dns::name::Name;
use crate::update::UpdateRequest;
use crate::zone::store::ZoneStore;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{broadcast, mpsc};
use tokio::task::JoinHandle;
use tracing::{debug, info};

const SCAN_INTERVAL: Duration = Duration::from_secs(10);

/// Trigger predicate evaluated against the zone store.
#[derive(Clone, Debug)]
pub enum Precondition {
    Always,
    ZoneExists(Name),
    /// The given zone has published an RRset at (owner, rtype).
    ZoneHasRrset {
        zone: Name,
        owner: Name,
        rtype: RRType,
    },
}

impl Precondition {
    pub fn holds(&self, zones: &ZoneStore) -> bool {
        match self {
            Precondition::Always => true,
            Precondition::ZoneExists(name) => zones.get(name).is_some(),
            Precondition::ZoneHasRrset { zone, owner, rtype } => zones
                .get(zone)
                .and_then(|z| z.get_owner(owner))
                .and_then(|o| o.get(*rtype))
                .map(|set| !set.is_empty())
                .unwrap_or(false),
        }
    }
}

#[derive(Debug)]
pub struct DeferredUpdate {
    pub precondition: Precondition,
    pub request: UpdateRequest,
}

/// Spawn the deferred-update engine. Satisfied actions are forwarded to
/// the main update queue; everything else waits for the next scan.
pub fn spawn_deferred_engine(
    mut rx: mpsc::Receiver<DeferredUpdate>,
    zones: Arc<ZoneStore>,
    update_tx: mpsc::Sender<UpdateRequest>,
    mut shutdown: broadcast::Receiver<()>,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut pending: Vec<DeferredUpdate> = Vec::new();
        let mut scan = tokio::time::interval(SCAN_INTERVAL);
        loop {
            tokio::select! {
                _ = shutdown.recv() => break,
                incoming = rx.recv() => {
                    let Some(deferred) = incoming else { break };
                    if deferred.precondition.holds(&zones) {
                        debug!(zone = %deferred.request.zone_name, "precondition met, running now");
                        let _ = update_tx.send(deferred.request).await;
                    } else {
                        debug!(zone = %deferred.request.zone_name, "precondition not met, queued");
                        pending.push(deferred);
                    }
                }
                _ = scan.tick() => {
                    let mut still_pending = Vec::with_capacity(pending.len());
                    for deferred in pending.drain(..) {
                        if deferred.precondition.holds(&zones) {
                            debug!(zone = %deferred.request.zone_name,
                                "deferred precondition now met");
                            let _ = update_tx.send(deferred.request).await;
                        } else {
                            still_pending.push(deferred);
                        }
                    }
                    pending = still_pending;
                }
            }
        }
        info!(pending = pending.len(), "deferred-update engine stopped");
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dns::rdata::{RData, SoaData};
    use crate::dns::record::ResourceRecord;
    use crate::update::UpdateCmd;
    use crate::update::policy::UpdatePolicy;
    use crate::zone::zone::{StoreKind, Zone, ZoneType};

    fn store_with_zone() -> Arc<ZoneStore> {
        let zones = Arc::new(ZoneStore::new());
        let zone = Zone::new(
            Name::parse("example.com").unwrap(),
            ZoneType::Primary,
            StoreKind::Map,
            UpdatePolicy::default(),
        );
        zone.sort_records_in(vec![ResourceRecord::new(
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
        )])
        .unwrap();
        zones.insert(Arc::new(zone));
        zones
    }

    #[test]
    fn test_precondition_evaluation() {
        let zones = store_with_zone();
        assert!(Precondition::Always.holds(&zones));
        assert!(Precondition::ZoneExists(Name::parse("example.com").unwrap()).holds(&zones));
        assert!(!Precondition::ZoneExists(Name::parse("example.net").unwrap()).holds(&zones));
        assert!(
            Precondition::ZoneHasRrset {
                zone: Name::parse("example.com").unwrap(),
                owner: Name::parse("example.com").unwrap(),
                rtype: RRType::SOA,
            }
            .holds(&zones)
        );
        assert!(
            !Precondition::ZoneHasRrset {
                zone: Name::parse("example.com").unwrap(),
                owner: Name::parse("example.com").unwrap(),
                rtype: RRType::DNSKEY,
            }
            .holds(&zones)
        );
    }

    #[tokio::test]
    async fn test_satisfied_action_forwarded_immediately() {
        let zones = store_with_zone();
        let (def_tx, def_rx) = mpsc::channel(4);
        let (upd_tx, mut upd_rx) = mpsc::channel(4);
        let (shutdown_tx, _) = broadcast::channel(1);
        let handle = spawn_deferred_engine(def_rx, zones, upd_tx, shutdown_tx.subscribe());

        def_tx
            .send(DeferredUpdate {
                precondition: Precondition::ZoneExists(Name::parse("example.com").unwrap()),
                request: UpdateRequest::new(
                    UpdateCmd::DeferredUpdate,
                    Name::parse("example.com").unwrap(),
                    vec![],
                ),
            })
            .await
            .unwrap();

        let forwarded = tokio::time::timeout(Duration::from_secs(1), upd_rx.recv())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(forwarded.cmd, UpdateCmd::DeferredUpdate);

        drop(shutdown_tx);
        handle.abort();
    }
}
