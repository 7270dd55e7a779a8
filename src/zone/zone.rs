use crate::dns::enums::{RRClass, RRType};
use crate::dns::name::Name;
use crate::dns::rdata::{RData, SoaData};
use crate::dns::record::ResourceRecord;
use crate::error::{Result, TdnsError};
use crate::update::policy::UpdatePolicy;
use crate::zone::rrset::{OwnerData, Rrset};
use dashmap::DashMap;
use parking_lot::{Mutex, RwLock};
use serde::Deserialize;
use std::collections::HashMap;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use std::sync::atomic::{AtomicU32, Ordering};
use tracing::warn;

#[derive(Copy, Clone, Debug, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ZoneType {
    Primary,
    Secondary,
}

/// Which owner-index representation backs the zone.
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StoreKind {
    #[default]
    Map,
    Slice,
}

/// Per-zone boolean options.
#[derive(Clone, Debug, Default, Deserialize)]
#[serde(default, rename_all = "kebab-case")]
pub struct ZoneOptions {
    pub delegation_sync_parent: bool,
    pub delegation_sync_child: bool,
    pub allow_updates: bool,
    pub allow_child_updates: bool,
    pub allow_combine: bool,
    pub fold_case: bool,
    pub black_lies: bool,
    pub dont_publish_key: bool,
    pub online_signing: bool,
    pub multisigner: bool,
    pub dirty: bool,
    pub frozen: bool,
    pub automatic_zone: bool,
    pub add_transport_signal: bool,
}

/// Parent-zone coordinates, filled in lazily the first time the
/// delegation-sync engine needs them.
#[derive(Clone, Debug, Default)]
pub struct ParentInfo {
    pub parent: Option<Name>,
    pub parent_ns: Vec<Name>,
    pub parent_servers: Vec<SocketAddr>,
}

/// RFC 1982 comparison: true when `a` is later than `b` in serial space.
pub fn serial_gt(a: u32, b: u32) -> bool {
    a != b && ((a > b && a - b < 0x8000_0000) || (a < b && b - a > 0x8000_0000))
}

/// The next serial after `cur` in RFC 1982 order.
pub fn serial_next(cur: u32) -> u32 {
    cur.wrapping_add(1)
}

struct SliceStore {
    /// Owners in canonical order.
    owners: Vec<Arc<OwnerData>>,
    index: HashMap<Name, usize>,
}

impl SliceStore {
    fn rebuild_index(&mut self) {
        self.index = self
            .owners
            .iter()
            .enumerate()
            .map(|(i, o)| (o.name.clone(), i))
            .collect();
    }
}

/// Owner index. MapZone is a plain concurrent map; SliceZone keeps the
/// owners canonically sorted with a name-to-index side table, which the
/// NSEC chain walker and AXFR emitter rely on.
enum ZoneData {
    Map(DashMap<Name, Arc<OwnerData>>),
    Slice(RwLock<SliceStore>),
}

/// One authoritative zone.
///
/// All mutation paths hold `mu` across owner-data changes and the serial
/// bump; readers work on concurrent-map snapshots and never block on it.
pub struct Zone {
    pub name: Name,
    pub ztype: ZoneType,
    data: ZoneData,
    pub options: RwLock<ZoneOptions>,
    pub update_policy: UpdatePolicy,
    pub mu: Mutex<()>,
    current_serial: AtomicU32,
    incoming_serial: AtomicU32,
    pub parent: RwLock<ParentInfo>,
    /// Last refresh failure, if any; queries keep serving prior contents.
    pub error: RwLock<Option<String>>,
    pub file_path: RwLock<Option<PathBuf>>,
    /// Where a secondary pulls transfers from.
    pub primary: RwLock<Option<SocketAddr>>,
}

/// Outcome of an authoritative lookup.
#[derive(Clone, Debug)]
pub enum ZoneAnswer {
    Answer(Rrset),
    /// Name exists, type does not.
    NoData,
    NxDomain,
    Referral { ns: Rrset, glue: Vec<Rrset> },
    NotInZone,
}

impl Zone {
    pub fn new(name: Name, ztype: ZoneType, store: StoreKind, policy: UpdatePolicy) -> Self {
        let data = match store {
            StoreKind::Map => ZoneData::Map(DashMap::new()),
            StoreKind::Slice => ZoneData::Slice(RwLock::new(SliceStore {
                owners: Vec::new(),
                index: HashMap::new(),
            })),
        };
        Self {
            name,
            ztype,
            data,
            options: RwLock::new(ZoneOptions::default()),
            update_policy: policy,
            mu: Mutex::new(()),
            current_serial: AtomicU32::new(0),
            incoming_serial: AtomicU32::new(0),
            parent: RwLock::new(ParentInfo::default()),
            error: RwLock::new(None),
            file_path: RwLock::new(None),
            primary: RwLock::new(None),
        }
    }

    pub fn current_serial(&self) -> u32 {
        self.current_serial.load(Ordering::Acquire)
    }

    pub fn incoming_serial(&self) -> u32 {
        self.incoming_serial.load(Ordering::Acquire)
    }

    pub fn set_incoming_serial(&self, serial: u32) {
        self.incoming_serial.store(serial, Ordering::Release);
    }

    pub fn is_frozen(&self) -> bool {
        self.options.read().frozen
    }

    pub fn is_dirty(&self) -> bool {
        self.options.read().dirty
    }

    pub fn set_dirty(&self, dirty: bool) {
        self.options.write().dirty = dirty;
    }

    pub fn contains(&self, name: &Name) -> bool {
        name.is_subdomain_of(&self.name)
    }

    pub fn get_owner(&self, name: &Name) -> Option<Arc<OwnerData>> {
        match &self.data {
            ZoneData::Map(map) => map.get(name).map(|e| e.value().clone()),
            ZoneData::Slice(slice) => {
                let store = slice.read();
                store.index.get(name).map(|&i| store.owners[i].clone())
            }
        }
    }

    fn get_or_create_owner(&self, name: &Name) -> Arc<OwnerData> {
        match &self.data {
            ZoneData::Map(map) => map
                .entry(name.clone())
                .or_insert_with(|| Arc::new(OwnerData::new(name.clone())))
                .value()
                .clone(),
            ZoneData::Slice(slice) => {
                let mut store = slice.write();
                if let Some(&i) = store.index.get(name) {
                    return store.owners[i].clone();
                }
                let owner = Arc::new(OwnerData::new(name.clone()));
                let pos = store
                    .owners
                    .binary_search_by(|o| o.name.canonical_cmp(name))
                    .unwrap_err();
                store.owners.insert(pos, owner.clone());
                store.rebuild_index();
                owner
            }
        }
    }

    fn remove_owner(&self, name: &Name) {
        // the apex owner is permanent while the zone exists
        if name == &self.name {
            return;
        }
        match &self.data {
            ZoneData::Map(map) => {
                map.remove(name);
            }
            ZoneData::Slice(slice) => {
                let mut store = slice.write();
                if let Some(i) = store.index.remove(name) {
                    store.owners.remove(i);
                    store.rebuild_index();
                }
            }
        }
    }

    /// Snapshot of every owner, canonically sorted (apex first is not
    /// guaranteed; AXFR emission handles the apex separately).
    pub fn owners_sorted(&self) -> Vec<Arc<OwnerData>> {
        match &self.data {
            ZoneData::Map(map) => {
                let mut owners: Vec<Arc<OwnerData>> =
                    map.iter().map(|e| e.value().clone()).collect();
                owners.sort_by(|a, b| a.name.canonical_cmp(&b.name));
                owners
            }
            ZoneData::Slice(slice) => slice.read().owners.clone(),
        }
    }

    pub fn owner_count(&self) -> usize {
        match &self.data {
            ZoneData::Map(map) => map.len(),
            ZoneData::Slice(slice) => slice.read().owners.len(),
        }
    }

    pub fn apex_rrset(&self, rtype: RRType) -> Option<Rrset> {
        self.get_owner(&self.name).and_then(|o| o.get(rtype))
    }

    pub fn soa(&self) -> Option<SoaData> {
        self.apex_rrset(RRType::SOA).and_then(|set| {
            set.rrs.first().and_then(|rr| match &rr.rdata {
                RData::Soa(soa) => Some(soa.clone()),
                _ => None,
            })
        })
    }

    pub fn soa_rrset(&self) -> Option<Rrset> {
        self.apex_rrset(RRType::SOA)
    }

    /// Replace a whole RRset (used by transfer ingest and the signer).
    pub fn put_rrset(&self, rrset: Rrset) {
        if rrset.rtype == RRType::SOA {
            if let Some(rr) = rrset.rrs.first() {
                if let RData::Soa(soa) = &rr.rdata {
                    self.current_serial.store(soa.serial, Ordering::Release);
                }
            }
        }
        let owner = self.get_or_create_owner(&rrset.name);
        owner.rrtypes.insert(rrset.rtype, rrset);
    }

    /// Add one record; creates owner and RRset as needed. Returns true
    /// when the zone changed. Caller holds `mu`.
    pub fn add_rr(&self, rr: &ResourceRecord) -> bool {
        let owner = self.get_or_create_owner(&rr.name);
        let mut entry = owner
            .rrtypes
            .entry(rr.rtype)
            .or_insert_with(|| Rrset::new(rr.name.clone(), rr.rtype));
        let mut add = rr.clone();
        add.class = RRClass::IN;
        entry.insert(add)
    }

    /// Delete the exact record (TTL-insensitive). Caller holds `mu`.
    pub fn delete_rr(&self, rr: &ResourceRecord) -> bool {
        let Some(owner) = self.get_owner(&rr.name) else {
            return false;
        };
        let removed = match owner.rrtypes.get_mut(&rr.rtype) {
            Some(mut set) => {
                let removed = set.remove_exact(rr);
                if removed && set.is_empty() {
                    drop(set);
                    owner.rrtypes.remove(&rr.rtype);
                }
                removed
            }
            None => false,
        };
        if removed && owner.is_empty() {
            self.remove_owner(&rr.name);
        }
        removed
    }

    /// Delete a whole RRset. Caller holds `mu`.
    pub fn delete_rrset(&self, name: &Name, rtype: RRType) -> bool {
        let Some(owner) = self.get_owner(name) else {
            return false;
        };
        let removed = owner.rrtypes.remove(&rtype).is_some();
        if removed && owner.is_empty() {
            self.remove_owner(name);
        }
        removed
    }

    /// Bump the SOA serial to the next RFC 1982 value and rewrite the SOA
    /// RRset in place. Caller holds `mu`.
    pub fn bump_serial(&self) -> u32 {
        let next = serial_next(self.current_serial.load(Ordering::Acquire));
        self.current_serial.store(next, Ordering::Release);
        if let Some(owner) = self.get_owner(&self.name) {
            if let Some(mut set) = owner.rrtypes.get_mut(&RRType::SOA) {
                if let Some(rr) = set.rrs.first_mut() {
                    if let RData::Soa(soa) = &mut rr.rdata {
                        soa.serial = next;
                    }
                }
                set.rrsigs.clear();
            }
        } else {
            warn!(zone = %self.name, "serial bump on zone without apex");
        }
        next
    }

    /// Child delegation covering `qname`, excluding the apex. Returns the
    /// delegation owner's NS RRset.
    pub fn find_delegation(&self, qname: &Name) -> Option<Rrset> {
        let mut candidate = Some(qname.clone());
        while let Some(name) = candidate {
            if name == self.name || !name.is_subdomain_of(&self.name) {
                break;
            }
            if let Some(owner) = self.get_owner(&name) {
                if let Some(ns) = owner.get(RRType::NS) {
                    if !ns.is_empty() {
                        return Some(ns);
                    }
                }
            }
            candidate = name.parent();
        }
        None
    }

    /// In-bailiwick A/AAAA RRsets for a nameserver target.
    pub fn glue_for(&self, target: &Name) -> Vec<Rrset> {
        let mut glue = Vec::new();
        if !target.is_subdomain_of(&self.name) {
            return glue;
        }
        if let Some(owner) = self.get_owner(target) {
            for rtype in [RRType::A, RRType::AAAA] {
                if let Some(set) = owner.get(rtype) {
                    if !set.is_empty() {
                        glue.push(set);
                    }
                }
            }
        }
        glue
    }

    /// Authoritative lookup per the responder rules: referral below a
    /// delegation, apex service, wildcard expansion, NODATA vs NXDOMAIN.
    pub fn lookup(&self, qname: &Name, qtype: RRType) -> ZoneAnswer {
        if !self.contains(qname) {
            return ZoneAnswer::NotInZone;
        }

        // below a delegation: referral, except DS which the parent owns
        if let Some(ns) = self.find_delegation(qname) {
            let at_cut = ns.name == *qname;
            if !(at_cut && qtype == RRType::DS) {
                let glue: Vec<Rrset> = ns
                    .rrs
                    .iter()
                    .filter_map(|rr| match &rr.rdata {
                        RData::Ns(target) => Some(self.glue_for(target)),
                        _ => None,
                    })
                    .flatten()
                    .collect();
                return ZoneAnswer::Referral { ns, glue };
            }
        }

        if let Some(owner) = self.get_owner(qname) {
            if qtype == RRType::ANY {
                // serve the first available set; ANY is not minimized
                let mut combined: Option<Rrset> = None;
                for entry in owner.rrtypes.iter() {
                    let set = entry.value().clone();
                    match &mut combined {
                        None => combined = Some(set),
                        Some(c) => {
                            c.rrs.extend(set.rrs);
                            c.rrsigs.extend(set.rrsigs);
                        }
                    }
                }
                return match combined {
                    Some(set) => ZoneAnswer::Answer(set),
                    None => ZoneAnswer::NoData,
                };
            }
            if let Some(set) = owner.get(qtype) {
                if !set.is_empty() {
                    return ZoneAnswer::Answer(set);
                }
            }
            // CNAME at the owner answers any qtype
            if let Some(cname) = owner.get(RRType::CNAME) {
                if !cname.is_empty() {
                    return ZoneAnswer::Answer(cname);
                }
            }
            return ZoneAnswer::NoData;
        }

        // wildcard expansion: *.<parent labels of qname>
        if let Some(wildcard) = qname.to_wildcard() {
            if let Some(owner) = self.get_owner(&wildcard) {
                if let Some(set) = owner.get(qtype) {
                    if !set.is_empty() {
                        let mut synthesized = set.clone();
                        synthesized.name = qname.clone();
                        for rr in &mut synthesized.rrs {
                            rr.name = qname.clone();
                        }
                        for sig in &mut synthesized.rrsigs {
                            sig.name = qname.clone();
                        }
                        return ZoneAnswer::Answer(synthesized);
                    }
                }
                return ZoneAnswer::NoData;
            }
        }

        ZoneAnswer::NxDomain
    }

    /// Ingest a stream of records (AXFR envelope contents or parsed zone
    /// file lines), grouping them into RRsets and routing RRSIGs to the
    /// set covering their type.
    pub fn sort_records_in(&self, records: Vec<ResourceRecord>) -> Result<()> {
        let fold = self.options.read().fold_case;
        let mut sets: HashMap<(Name, RRType), Rrset> = HashMap::new();
        let mut sigs: Vec<ResourceRecord> = Vec::new();

        for mut rr in records {
            if fold {
                rr.name.fold_case();
            }
            if rr.rtype == RRType::RRSIG {
                sigs.push(rr);
                continue;
            }
            let key = (rr.name.clone(), rr.rtype);
            let set = sets
                .entry(key)
                .or_insert_with(|| Rrset::new(rr.name.clone(), rr.rtype));
            set.insert(rr);
        }

        for sig in sigs {
            let covered = match &sig.rdata {
                RData::Rrsig(data) => data.type_covered,
                _ => {
                    return Err(TdnsError::ParseError(format!(
                        "RRSIG at {} with malformed rdata",
                        sig.name
                    )));
                }
            };
            if let Some(set) = sets.get_mut(&(sig.name.clone(), covered)) {
                set.rrsigs.push(sig);
            } else {
                warn!(zone = %self.name, owner = %sig.name, covered = %covered,
                    "dropping RRSIG covering absent RRset");
            }
        }

        for (_, set) in sets {
            self.put_rrset(set);
        }
        Ok(())
    }
}

impl std::fmt::Debug for Zone {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Zone")
            .field("name", &self.name.to_string())
            .field("type", &self.ztype)
            .field("serial", &self.current_serial())
            .field("owners", &self.owner_count())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::net::Ipv4Addr;

    fn test_zone(store: StoreKind) -> Zone {
        let zone = Zone::new(
            Name::parse("example.com").unwrap(),
            ZoneType::Primary,
            store,
            UpdatePolicy::default(),
        );
        let records = vec![
            ResourceRecord::new(
                Name::parse("example.com").unwrap(),
                RRType::SOA,
                3600,
                RData::Soa(SoaData {
                    mname: Name::parse("ns1.example.com").unwrap(),
                    rname: Name::parse("admin.example.com").unwrap(),
                    serial: 2024010100,
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
                Name::parse("ns1.example.com").unwrap(),
                RRType::A,
                3600,
                RData::A(Ipv4Addr::new(192, 0, 2, 1)),
            ),
            ResourceRecord::new(
                Name::parse("www.example.com").unwrap(),
                RRType::A,
                300,
                RData::A(Ipv4Addr::new(192, 0, 2, 10)),
            ),
            ResourceRecord::new(
                Name::parse("child.example.com").unwrap(),
                RRType::NS,
                3600,
                RData::Ns(Name::parse("ns1.child.example.com").unwrap()),
            ),
            ResourceRecord::new(
                Name::parse("ns1.child.example.com").unwrap(),
                RRType::A,
                3600,
                RData::A(Ipv4Addr::new(192, 0, 2, 53)),
            ),
            ResourceRecord::new(
                Name::parse("*.wild.example.com").unwrap(),
                RRType::TXT,
                300,
                RData::Txt(vec!["wildcard".into()]),
            ),
        ];
        zone.sort_records_in(records).unwrap();
        zone
    }

    #[test]
    fn test_serial_arithmetic() {
        assert!(serial_gt(2, 1));
        assert!(serial_gt(0, 0xFFFF_FFFF));
        assert!(!serial_gt(1, 2));
        assert_eq!(serial_next(0xFFFF_FFFF), 0);
    }

    #[test]
    fn test_lookup_answer_and_nxdomain() {
        for store in [StoreKind::Map, StoreKind::Slice] {
            let zone = test_zone(store);
            match zone.lookup(&Name::parse("www.example.com").unwrap(), RRType::A) {
                ZoneAnswer::Answer(set) => assert_eq!(set.rrs.len(), 1),
                other => panic!("expected answer, got {:?}", other),
            }
            assert!(matches!(
                zone.lookup(&Name::parse("nope.example.com").unwrap(), RRType::A),
                ZoneAnswer::NxDomain
            ));
            assert!(matches!(
                zone.lookup(&Name::parse("www.example.com").unwrap(), RRType::AAAA),
                ZoneAnswer::NoData
            ));
            assert!(matches!(
                zone.lookup(&Name::parse("www.example.net").unwrap(), RRType::A),
                ZoneAnswer::NotInZone
            ));
        }
    }

    #[test]
    fn test_lookup_referral_with_glue() {
        let zone = test_zone(StoreKind::Map);
        match zone.lookup(&Name::parse("deep.child.example.com").unwrap(), RRType::A) {
            ZoneAnswer::Referral { ns, glue } => {
                assert_eq!(ns.name, Name::parse("child.example.com").unwrap());
                assert_eq!(glue.len(), 1);
                assert_eq!(glue[0].rtype, RRType::A);
            }
            other => panic!("expected referral, got {:?}", other),
        }
    }

    #[test]
    fn test_wildcard_synthesis() {
        let zone = test_zone(StoreKind::Map);
        match zone.lookup(&Name::parse("anything.wild.example.com").unwrap(), RRType::TXT) {
            ZoneAnswer::Answer(set) => {
                assert_eq!(set.name, Name::parse("anything.wild.example.com").unwrap());
                assert_eq!(set.rrs[0].name, set.name);
            }
            other => panic!("expected synthesized answer, got {:?}", other),
        }
    }

    #[test]
    fn test_serial_bump_updates_soa() {
        let zone = test_zone(StoreKind::Map);
        assert_eq!(zone.current_serial(), 2024010100);
        let _guard = zone.mu.lock();
        let next = zone.bump_serial();
        assert_eq!(next, 2024010101);
        assert_eq!(zone.soa().unwrap().serial, next);
    }

    #[test]
    fn test_rrsig_routed_to_covered_set() {
        use crate::dns::rdata::RrsigData;
        let zone = test_zone(StoreKind::Map);
        let sig = ResourceRecord::new(
            Name::parse("www.example.com").unwrap(),
            RRType::RRSIG,
            300,
            RData::Rrsig(RrsigData {
                type_covered: RRType::A,
                algorithm: 15,
                labels: 3,
                original_ttl: 300,
                expiration: 2000000000,
                inception: 1000000000,
                key_tag: 4711,
                signer: Name::parse("example.com").unwrap(),
                signature: vec![0; 64],
            }),
        );
        let a = ResourceRecord::new(
            Name::parse("www.example.com").unwrap(),
            RRType::A,
            300,
            RData::A(Ipv4Addr::new(192, 0, 2, 10)),
        );
        zone.sort_records_in(vec![a, sig]).unwrap();
        let set = zone
            .get_owner(&Name::parse("www.example.com").unwrap())
            .unwrap()
            .get(RRType::A)
            .unwrap();
        assert_eq!(set.rrsigs.len(), 1);
    }

    #[test]
    fn test_owner_removed_when_empty() {
        let zone = test_zone(StoreKind::Slice);
        let rr = ResourceRecord::new(
            Name::parse("www.example.com").unwrap(),
            RRType::A,
            300,
            RData::A(Ipv4Addr::new(192, 0, 2, 10)),
        );
        {
            let _guard = zone.mu.lock();
            assert!(zone.delete_rr(&rr));
        }
        assert!(zone.get_owner(&Name::parse("www.example.com").unwrap()).is_none());
        // apex survives even when asked to drop
        {
            let _guard = zone.mu.lock();
            zone.delete_rrset(&Name::parse("example.com").unwrap(), RRType::NS);
            zone.delete_rrset(&Name::parse("example.com").unwrap(), RRType::SOA);
        }
        assert!(zone.get_owner(&Name::parse("example.com").unwrap()).is_some());
    }
}
