use crate::dns::enums::{RRClass, RRType};
use crate::dns::name::Name;
use crate::dns::record::ResourceRecord;
use dashmap::DashMap;

/// The set of all records at one (owner, class, type).
///
/// Invariants: every entry of `rrs` shares the set's name/class/type, the
/// RRSIGs cover exactly this set, and TTLs are normalized to the first
/// record's TTL on insert. Any mutation empties `rrsigs`; the signer
/// regenerates them.
#[derive(Clone, Debug, Default)]
pub struct Rrset {
    pub name: Name,
    pub class: RRClass,
    pub rtype: RRType,
    pub rrs: Vec<ResourceRecord>,
    pub rrsigs: Vec<ResourceRecord>,
}

impl Rrset {
    pub fn new(name: Name, rtype: RRType) -> Self {
        Self {
            name,
            class: RRClass::IN,
            rtype,
            rrs: Vec::new(),
            rrsigs: Vec::new(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.rrs.is_empty()
    }

    pub fn ttl(&self) -> u32 {
        self.rrs.first().map(|rr| rr.ttl).unwrap_or(0)
    }

    /// Insert a record, deduplicating on rdata. Returns true when the
    /// set actually changed.
    pub fn insert(&mut self, mut rr: ResourceRecord) -> bool {
        if self.rrs.iter().any(|existing| existing.rdata_eq(&rr)) {
            return false;
        }
        rr.class = RRClass::IN;
        if let Some(first) = self.rrs.first() {
            rr.ttl = first.ttl;
        }
        self.rrs.push(rr);
        self.rrsigs.clear();
        true
    }

    /// Remove the record equal by canonical rdata comparison (TTL and
    /// class ignored). Returns true when something was removed.
    pub fn remove_exact(&mut self, rr: &ResourceRecord) -> bool {
        let before = self.rrs.len();
        self.rrs.retain(|existing| !existing.rdata_eq(rr));
        let removed = self.rrs.len() != before;
        if removed {
            self.rrsigs.clear();
        }
        removed
    }

    /// Force every TTL in the set to `ttl`.
    pub fn normalize_ttl(&mut self, ttl: u32) {
        for rr in &mut self.rrs {
            rr.ttl = ttl;
        }
    }

    /// All records including covering RRSIGs, for responses with DO set.
    pub fn all_records(&self) -> Vec<ResourceRecord> {
        let mut out = self.rrs.clone();
        out.extend(self.rrsigs.iter().cloned());
        out
    }
}

/// Everything stored at one owner name: a concurrent map from RR type to
/// RRset. Created on first insert, dropped when the last type goes away
/// (the apex is kept alive by the zone itself).
#[derive(Debug, Default)]
pub struct OwnerData {
    pub name: Name,
    pub rrtypes: DashMap<RRType, Rrset>,
}

impl OwnerData {
    pub fn new(name: Name) -> Self {
        Self {
            name,
            rrtypes: DashMap::new(),
        }
    }

    pub fn get(&self, rtype: RRType) -> Option<Rrset> {
        self.rrtypes.get(&rtype).map(|r| r.clone())
    }

    pub fn is_empty(&self) -> bool {
        self.rrtypes.is_empty()
    }

    /// RR types present at this owner, for NSEC bitmaps.
    pub fn types(&self) -> Vec<RRType> {
        let mut types: Vec<RRType> = self.rrtypes.iter().map(|e| *e.key()).collect();
        types.sort_by_key(|t| u16::from(*t));
        types
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dns::rdata::RData;
    use std::net::Ipv4Addr;

    fn a_rr(ttl: u32, last_octet: u8) -> ResourceRecord {
        ResourceRecord::new(
            Name::parse("www.example.com").unwrap(),
            RRType::A,
            ttl,
            RData::A(Ipv4Addr::new(192, 0, 2, last_octet)),
        )
    }

    #[test]
    fn test_insert_dedup_and_ttl_normalize() {
        let mut set = Rrset::new(Name::parse("www.example.com").unwrap(), RRType::A);
        assert!(set.insert(a_rr(300, 1)));
        assert!(!set.insert(a_rr(600, 1))); // same rdata, TTL ignored
        assert!(set.insert(a_rr(600, 2)));
        // second record took the set's TTL
        assert!(set.rrs.iter().all(|rr| rr.ttl == 300));
    }

    #[test]
    fn test_mutation_clears_rrsigs() {
        let mut set = Rrset::new(Name::parse("www.example.com").unwrap(), RRType::A);
        set.insert(a_rr(300, 1));
        set.rrsigs.push(a_rr(300, 99)); // stand-in signature
        set.insert(a_rr(300, 2));
        assert!(set.rrsigs.is_empty());

        set.rrsigs.push(a_rr(300, 99));
        assert!(set.remove_exact(&a_rr(0, 2)));
        assert!(set.rrsigs.is_empty());
    }

    #[test]
    fn test_owner_types() {
        let owner = OwnerData::new(Name::parse("example.com").unwrap());
        owner
            .rrtypes
            .insert(RRType::NS, Rrset::new(owner.name.clone(), RRType::NS));
        owner
            .rrtypes
            .insert(RRType::SOA, Rrset::new(owner.name.clone(), RRType::SOA));
        assert_eq!(owner.types(), vec![RRType::NS, RRType::SOA]);
    }
}
