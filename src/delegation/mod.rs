//! Delegation-sync detection.
//!
//! Inspects the actions of an approved update against the pre-mutation
//! delegation data (apex NS RRset plus in-bailiwick glue) and produces
//! the delta the parent needs to hear about. Runs before the mutation is
//! applied, inside the zone-updater worker.

pub mod parent;

use crate::dns::enums::{RRClass, RRType};
use crate::dns::name::Name;
use crate::dns::rdata::RData;
use crate::dns::record::ResourceRecord;
use crate::zone::zone::Zone;
use std::collections::HashSet;
use tracing::warn;

pub use parent::{SyncScheme, spawn_parent_sync};

#[derive(Clone, Debug, Default)]
pub struct DelegationSyncStatus {
    pub zone_name: Name,
    pub in_sync: bool,
    pub ns_adds: Vec<ResourceRecord>,
    pub ns_removes: Vec<ResourceRecord>,
    pub a_adds: Vec<ResourceRecord>,
    pub a_removes: Vec<ResourceRecord>,
    pub aaaa_adds: Vec<ResourceRecord>,
    pub aaaa_removes: Vec<ResourceRecord>,
}

impl DelegationSyncStatus {
    pub fn is_empty(&self) -> bool {
        self.ns_adds.is_empty()
            && self.ns_removes.is_empty()
            && self.a_adds.is_empty()
            && self.a_removes.is_empty()
            && self.aaaa_adds.is_empty()
            && self.aaaa_removes.is_empty()
    }

    fn push_glue_add(&mut self, rr: ResourceRecord) {
        match rr.rtype {
            RRType::A => self.a_adds.push(rr),
            RRType::AAAA => self.aaaa_adds.push(rr),
            _ => {}
        }
    }

    fn push_glue_remove(&mut self, rr: ResourceRecord) {
        match rr.rtype {
            RRType::A => self.a_removes.push(rr),
            RRType::AAAA => self.aaaa_removes.push(rr),
            _ => {}
        }
    }
}

fn ns_target(rr: &ResourceRecord) -> Option<&Name> {
    match &rr.rdata {
        RData::Ns(target) => Some(target),
        _ => None,
    }
}

/// Compute the delegation delta an update would cause. Returns None when
/// no action touches apex NS or bailiwick glue. NS actions are processed
/// before address actions regardless of their order in the message, so a
/// freshly added in-bailiwick NS picks up glue appearing later in the
/// same stream.
pub fn detect_delegation_changes(
    zone: &Zone,
    actions: &[ResourceRecord],
) -> Option<DelegationSyncStatus> {
    let apex = &zone.name;
    let mut status = DelegationSyncStatus {
        zone_name: apex.clone(),
        in_sync: true,
        ..Default::default()
    };

    // pre-mutation NS targets
    let current_ns: Vec<Name> = zone
        .apex_rrset(RRType::NS)
        .map(|set| set.rrs.iter().filter_map(|rr| ns_target(rr).cloned()).collect())
        .unwrap_or_default();

    let mut relevant_targets: HashSet<Name> = current_ns.iter().cloned().collect();
    // indices of address actions already consumed by an NS add
    let mut consumed: HashSet<usize> = HashSet::new();
    let mut touched = false;

    // pass 1: apex NS actions
    for action in actions {
        if action.name != *apex || action.rtype != RRType::NS {
            continue;
        }
        touched = true;
        match action.class {
            RRClass::ANY => {
                // approval rejects apex NS RRset deletion; drop strays
                warn!(zone = %apex, "dropping illegal apex NS RRset deletion");
            }
            RRClass::NONE => {
                status.in_sync = false;
                status.ns_removes.push(action.clone());
                if let Some(target) = ns_target(action) {
                    if target.is_subdomain_of(apex) {
                        for glue_set in zone.glue_for(target) {
                            for rr in &glue_set.rrs {
                                status.push_glue_remove(rr.clone());
                            }
                        }
                    }
                }
            }
            _ => {
                status.ns_adds.push(action.clone());
                if let Some(target) = ns_target(action) {
                    relevant_targets.insert(target.clone());
                    if target.is_subdomain_of(apex) {
                        // existing glue for the new NS
                        for glue_set in zone.glue_for(target) {
                            for rr in &glue_set.rrs {
                                status.push_glue_add(rr.clone());
                            }
                        }
                        // plus address adds later in this same stream
                        for (i, later) in actions.iter().enumerate() {
                            if later.name == *target
                                && matches!(later.rtype, RRType::A | RRType::AAAA)
                                && !matches!(later.class, RRClass::NONE | RRClass::ANY)
                            {
                                status.push_glue_add(later.clone());
                                consumed.insert(i);
                            }
                        }
                    }
                }
            }
        }
    }

    // pass 2: glue changes for nameservers that remain (or become) relevant
    for (i, action) in actions.iter().enumerate() {
        if consumed.contains(&i) {
            continue;
        }
        if !matches!(action.rtype, RRType::A | RRType::AAAA) {
            continue;
        }
        if !action.name.is_subdomain_of(apex) || !relevant_targets.contains(&action.name) {
            continue;
        }
        touched = true;
        match action.class {
            RRClass::NONE => status.push_glue_remove(action.clone()),
            RRClass::ANY => {
                // deleting the whole glue RRset: report each current RR
                if let Some(owner) = zone.get_owner(&action.name) {
                    if let Some(set) = owner.get(action.rtype) {
                        for rr in &set.rrs {
                            status.push_glue_remove(rr.clone());
                        }
                    }
                }
            }
            _ => status.push_glue_add(action.clone()),
        }
    }

    if !touched {
        return None;
    }
    if !status.is_empty() {
        status.in_sync = false;
    }
    Some(status)
}
