//! The RRset cache.
//!
//! Entries carry the context they were learned in (a referral is not an
//! answer), a DNSSEC validation state, an optional extended error, and
//! the authority RRsets proving a negative response. Only definitive
//! contexts (Answer / NoErrNoAns / NXDOMAIN) satisfy a lookup; anything
//! else is treated as a miss so a fresh query can upgrade the entry.

use crate::dns::enums::{EdeCode, RRType, Rcode};
use crate::dns::name::Name;
use crate::dns::rdata::RData;
use crate::zone::rrset::Rrset;
use dashmap::DashMap;
use std::time::{Duration, Instant, SystemTime, UNIX_EPOCH};

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum CacheContext {
    Answer,
    Hint,
    Priming,
    Referral,
    NxDomain,
    NoErrNoAns,
    Glue,
    Failure,
}

impl CacheContext {
    /// Contexts that can be returned to a client directly.
    pub fn is_definitive(self) -> bool {
        matches!(
            self,
            CacheContext::Answer | CacheContext::NxDomain | CacheContext::NoErrNoAns
        )
    }
}

/// Validation lifecycle: None → Indeterminate → {Secure | Bogus |
/// Insecure}. Only the validator moves an entry forward.
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq)]
pub enum ValidationState {
    #[default]
    None,
    Indeterminate,
    Secure,
    Insecure,
    Bogus,
}

#[derive(Clone, Debug)]
pub struct CachedRrset {
    pub rrset: Option<Rrset>,
    pub rcode: Rcode,
    pub context: CacheContext,
    pub state: ValidationState,
    pub expires: Instant,
    pub ede: Option<(EdeCode, String)>,
    pub neg_authority: Vec<Rrset>,
}

impl CachedRrset {
    pub fn positive(rrset: Rrset, context: CacheContext, ttl: Duration) -> Self {
        Self {
            rrset: Some(rrset),
            rcode: Rcode::NoError,
            context,
            state: ValidationState::None,
            expires: Instant::now() + ttl,
            ede: None,
            neg_authority: Vec::new(),
        }
    }

    pub fn negative(rcode: Rcode, context: CacheContext, ttl: Duration, authority: Vec<Rrset>) -> Self {
        Self {
            rrset: None,
            rcode,
            context,
            state: ValidationState::None,
            expires: Instant::now() + ttl,
            ede: None,
            neg_authority: authority,
        }
    }

    /// Earliest RRSIG expiration across the set, unix seconds.
    fn min_sig_expiration(&self) -> Option<u32> {
        let set = self.rrset.as_ref()?;
        set.rrsigs
            .iter()
            .filter_map(|rr| match &rr.rdata {
                RData::Rrsig(sig) => Some(sig.expiration),
                _ => None,
            })
            .min()
    }
}

#[derive(Default)]
pub struct RrsetCache {
    map: DashMap<(Name, RRType), CachedRrset>,
}

impl RrsetCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Fetch a live entry. A Secure entry whose signatures have expired
    /// in the meantime drops back to Indeterminate so the validator gets
    /// another look.
    pub fn get(&self, name: &Name, rtype: RRType) -> Option<CachedRrset> {
        let key = (name.clone(), rtype);
        let entry = self.map.get(&key)?;
        if entry.expires <= Instant::now() {
            drop(entry);
            self.map.remove(&key);
            return None;
        }
        let mut out = entry.clone();
        if out.state == ValidationState::Secure {
            let now = SystemTime::now()
                .duration_since(UNIX_EPOCH)
                .map(|d| d.as_secs())
                .unwrap_or(0) as u32;
            if out.min_sig_expiration().map(|exp| exp <= now).unwrap_or(false) {
                out.state = ValidationState::Indeterminate;
                drop(entry);
                self.map.insert(key, out.clone());
            }
        }
        Some(out)
    }

    pub fn insert(&self, name: Name, rtype: RRType, entry: CachedRrset) {
        self.map.insert((name, rtype), entry);
    }

    pub fn set_state(&self, name: &Name, rtype: RRType, state: ValidationState) {
        if let Some(mut entry) = self.map.get_mut(&(name.clone(), rtype)) {
            entry.state = state;
        }
    }

    pub fn len(&self) -> usize {
        self.map.len()
    }

    pub fn is_empty(&self) -> bool {
        self.map.is_empty()
    }

    pub fn clear(&self) {
        self.map.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dns::record::ResourceRecord;
    use std::net::Ipv4Addr;

    fn a_set(name: &str) -> Rrset {
        let name = Name::parse(name).unwrap();
        let mut set = Rrset::new(name.clone(), RRType::A);
        set.insert(ResourceRecord::new(
            name,
            RRType::A,
            300,
            RData::A(Ipv4Addr::new(192, 0, 2, 1)),
        ));
        set
    }

    #[test]
    fn test_expired_entry_evicted() {
        let cache = RrsetCache::new();
        let name = Name::parse("www.example.com").unwrap();
        cache.insert(
            name.clone(),
            RRType::A,
            CachedRrset::positive(a_set("www.example.com"), CacheContext::Answer, Duration::ZERO),
        );
        assert!(cache.get(&name, RRType::A).is_none());
        assert!(cache.is_empty());
    }

    #[test]
    fn test_referral_not_definitive() {
        assert!(!CacheContext::Referral.is_definitive());
        assert!(!CacheContext::Glue.is_definitive());
        assert!(!CacheContext::Failure.is_definitive());
        assert!(CacheContext::Answer.is_definitive());
        assert!(CacheContext::NxDomain.is_definitive());
        assert!(CacheContext::NoErrNoAns.is_definitive());
    }

    #[test]
    fn test_negative_entry_carries_authority() {
        let cache = RrsetCache::new();
        let name = Name::parse("nonexistent.example.com").unwrap();
        let soa = a_set("example.com"); // stand-in authority set
        cache.insert(
            name.clone(),
            RRType::A,
            CachedRrset::negative(
                Rcode::NXDomain,
                CacheContext::NxDomain,
                Duration::from_secs(60),
                vec![soa],
            ),
        );
        let hit = cache.get(&name, RRType::A).unwrap();
        assert_eq!(hit.rcode, Rcode::NXDomain);
        assert_eq!(hit.neg_authority.len(), 1);
    }

    #[test]
    fn test_secure_state_rederived_on_stale_sigs() {
        use crate::dns::rdata::RrsigData;
        let cache = RrsetCache::new();
        let name = Name::parse("www.example.com").unwrap();
        let mut set = a_set("www.example.com");
        set.rrsigs.push(ResourceRecord::new(
            name.clone(),
            RRType::RRSIG,
            300,
            RData::Rrsig(RrsigData {
                type_covered: RRType::A,
                algorithm: 15,
                labels: 3,
                original_ttl: 300,
                expiration: 1000, // long past
                inception: 500,
                key_tag: 1,
                signer: Name::parse("example.com").unwrap(),
                signature: vec![0; 64],
            }),
        ));
        let mut entry = CachedRrset::positive(set, CacheContext::Answer, Duration::from_secs(300));
        entry.state = ValidationState::Secure;
        cache.insert(name.clone(), RRType::A, entry);

        let hit = cache.get(&name, RRType::A).unwrap();
        assert_eq!(hit.state, ValidationState::Indeterminate);
    }
}
