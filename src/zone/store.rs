use crate::dns::name::Name;
use crate::zone::zone::Zone;
use dashmap::DashMap;
use std::sync::Arc;
use tracing::info;

/// All zones served by this process, keyed by apex name.
///
/// Zone creation and destruction mutate this map; record-level mutation
/// goes through the zone's own lock. Lookup finds the most specific
/// enclosing zone for a query name.
#[derive(Default)]
pub struct ZoneStore {
    zones: DashMap<Name, Arc<Zone>>,
}

impl ZoneStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&self, zone: Arc<Zone>) {
        info!(zone = %zone.name, "adding zone");
        self.zones.insert(zone.name.clone(), zone);
    }

    pub fn remove(&self, name: &Name) -> Option<Arc<Zone>> {
        self.zones.remove(name).map(|(_, z)| z)
    }

    pub fn get(&self, name: &Name) -> Option<Arc<Zone>> {
        self.zones.get(name).map(|e| e.value().clone())
    }

    /// Most specific zone whose apex is at or above `qname`.
    pub fn find_zone(&self, qname: &Name) -> Option<Arc<Zone>> {
        let mut candidate = Some(qname.clone());
        while let Some(name) = candidate {
            if let Some(zone) = self.get(&name) {
                return Some(zone);
            }
            candidate = name.parent();
        }
        None
    }

    pub fn names(&self) -> Vec<Name> {
        self.zones.iter().map(|e| e.key().clone()).collect()
    }

    pub fn len(&self) -> usize {
        self.zones.len()
    }

    pub fn is_empty(&self) -> bool {
        self.zones.is_empty()
    }
}
