//! The combiner: per-zone data received from peer signing agents in a
//! multi-signer group, and the policy deciding which peer updates are
//! acceptable before the sets are merged into the served zone.

use crate::dns::enums::{RRClass, RRType};
use crate::dns::name::Name;
use crate::dns::record::ResourceRecord;
use crate::error::{Result, TdnsError};
use crate::zone::rrset::{OwnerData, Rrset};
use dashmap::DashMap;
use std::sync::Arc;
use tracing::debug;

pub type AgentId = String;

/// Apex RR types a peer agent may contribute. KEY is deliberately not
/// in this set: SIG(0) keys travel through the trust-store pipeline,
/// never through the combiner.
pub const COMBINABLE_TYPES: [RRType; 4] = [RRType::DNSKEY, RRType::CDS, RRType::CSYNC, RRType::NS];

/// Data one agent holds for one zone.
#[derive(Debug, Default)]
pub struct AgentRepo {
    owners: DashMap<AgentId, Arc<OwnerData>>,
}

impl AgentRepo {
    pub fn agent(&self, id: &str) -> Option<Arc<OwnerData>> {
        self.owners.get(id).map(|e| e.value().clone())
    }

    pub fn agents(&self) -> Vec<AgentId> {
        self.owners.iter().map(|e| e.key().clone()).collect()
    }
}

/// ZoneName → AgentRepo across the whole multi-signer group.
#[derive(Debug, Default)]
pub struct ZoneDataRepo {
    zones: DashMap<Name, Arc<AgentRepo>>,
}

impl ZoneDataRepo {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn repo(&self, zone: &Name) -> Arc<AgentRepo> {
        self.zones
            .entry(zone.clone())
            .or_insert_with(|| Arc::new(AgentRepo::default()))
            .value()
            .clone()
    }

    /// Check a peer-agent update against the combiner policy, then store
    /// it under the agent's id.
    pub fn evaluate_update(
        &self,
        zone: &Name,
        agent: &str,
        actions: &[ResourceRecord],
    ) -> Result<usize> {
        for action in actions {
            if action.name != *zone {
                return Err(TdnsError::AgentError(format!(
                    "agent {} sent non-apex owner {}",
                    agent, action.name
                )));
            }
            if !COMBINABLE_TYPES.contains(&action.rtype) {
                return Err(TdnsError::AgentError(format!(
                    "agent {} sent non-combinable type {}",
                    agent, action.rtype
                )));
            }
        }

        let repo = self.repo(zone);
        let owner = repo
            .owners
            .entry(agent.to_string())
            .or_insert_with(|| Arc::new(OwnerData::new(zone.clone())))
            .value()
            .clone();

        let mut applied = 0;
        for action in actions {
            match action.class {
                RRClass::ANY => {
                    owner.rrtypes.remove(&action.rtype);
                    applied += 1;
                }
                RRClass::NONE => {
                    if let Some(mut set) = owner.rrtypes.get_mut(&action.rtype) {
                        if set.remove_exact(action) {
                            applied += 1;
                        }
                    }
                }
                _ => {
                    let mut set = owner
                        .rrtypes
                        .entry(action.rtype)
                        .or_insert_with(|| Rrset::new(zone.clone(), action.rtype));
                    if set.insert(action.clone()) {
                        applied += 1;
                    }
                }
            }
        }
        debug!(zone = %zone, agent, applied, "agent update stored");
        Ok(applied)
    }

    /// Union of one apex RRset across every agent, the input to the
    /// served (combined) zone.
    pub fn combined_rrset(&self, zone: &Name, rtype: RRType) -> Option<Rrset> {
        let repo = self.zones.get(zone)?;
        let mut combined = Rrset::new(zone.clone(), rtype);
        for entry in repo.owners.iter() {
            if let Some(set) = entry.value().get(rtype) {
                for rr in set.rrs {
                    combined.insert(rr);
                }
            }
        }
        (!combined.is_empty()).then_some(combined)
    }
}
