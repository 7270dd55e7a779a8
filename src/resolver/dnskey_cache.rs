//! DNSKEY cache keyed by (owner, key tag).
//!
//! The trust-anchor bit marks keys matched against configured anchors
//! during priming. Routine validation overwrites entries all the time;
//! the bit from the prior entry survives the overwrite.

use crate::dns::name::Name;
use crate::dns::rdata::DnskeyData;
use crate::resolver::cache::ValidationState;
use dashmap::DashMap;
use std::time::{Duration, Instant};

#[derive(Clone, Debug)]
pub struct CachedDnskey {
    pub key: DnskeyData,
    pub state: ValidationState,
    pub trust_anchor: bool,
    pub expires: Instant,
}

#[derive(Default)]
pub struct DnskeyCache {
    map: DashMap<(Name, u16), CachedDnskey>,
}

impl DnskeyCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, name: &Name, key_tag: u16) -> Option<CachedDnskey> {
        let key = (name.clone(), key_tag);
        let entry = self.map.get(&key)?;
        if entry.expires <= Instant::now() {
            drop(entry);
            self.map.remove(&key);
            return None;
        }
        Some(entry.clone())
    }

    /// Insert, preserving the TrustAnchor bit of any prior entry.
    pub fn insert(
        &self,
        name: Name,
        key: DnskeyData,
        state: ValidationState,
        trust_anchor: bool,
        ttl: Duration,
    ) {
        let tag = key.key_tag();
        let map_key = (name, tag);
        let prior_anchor = self
            .map
            .get(&map_key)
            .map(|e| e.trust_anchor)
            .unwrap_or(false);
        self.map.insert(
            map_key,
            CachedDnskey {
                key,
                state,
                trust_anchor: trust_anchor || prior_anchor,
                expires: Instant::now() + ttl,
            },
        );
    }

    /// All live keys for an owner.
    pub fn keys_for(&self, name: &Name) -> Vec<CachedDnskey> {
        let now = Instant::now();
        self.map
            .iter()
            .filter(|e| e.key().0 == *name && e.value().expires > now)
            .map(|e| e.value().clone())
            .collect()
    }

    pub fn len(&self) -> usize {
        self.map.len()
    }

    pub fn is_empty(&self) -> bool {
        self.map.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn key(n: u8) -> DnskeyData {
        DnskeyData {
            flags: 257,
            protocol: 3,
            algorithm: 15,
            public_key: vec![n; 32],
        }
    }

    #[test]
    fn test_trust_anchor_bit_survives_overwrite() {
        let cache = DnskeyCache::new();
        let name = Name::parse(".").unwrap();
        let k = key(1);

        cache.insert(
            name.clone(),
            k.clone(),
            ValidationState::Secure,
            true,
            Duration::from_secs(3600),
        );
        // routine validation re-inserts without the anchor bit
        cache.insert(
            name.clone(),
            k.clone(),
            ValidationState::Secure,
            false,
            Duration::from_secs(3600),
        );
        let entry = cache.get(&name, k.key_tag()).unwrap();
        assert!(entry.trust_anchor);
    }

    #[test]
    fn test_keys_for_owner() {
        let cache = DnskeyCache::new();
        let name = Name::parse("example.com").unwrap();
        cache.insert(name.clone(), key(1), ValidationState::Secure, false, Duration::from_secs(60));
        cache.insert(name.clone(), key(2), ValidationState::Secure, false, Duration::from_secs(60));
        cache.insert(
            Name::parse("example.net").unwrap(),
            key(3),
            ValidationState::Secure,
            false,
            Duration::from_secs(60),
        );
        assert_eq!(cache.keys_for(&name).len(), 2);
    }
}
