//! DNSSEC validation primitives (RFC 4034/4035).
//!
//! The validator owns the DNSKEY cache and is the only component that
//! moves a cached entry's validation state forward. Chain walking (DS in
//! the parent, up to an anchor) is driven by the resolver, which feeds
//! fetched RRsets into these primitives.

use crate::dns::enums::{EdeCode, RRType};
use crate::dns::name::Name;
use crate::dns::rdata::{DnskeyData, DsData, RData, RrsigData};
use crate::error::{Result, TdnsError};
use crate::resolver::cache::ValidationState;
use crate::resolver::dnskey_cache::DnskeyCache;
use crate::resolver::hints::TrustAnchor;
use crate::update::sig0::verify_signature;
use crate::zone::rrset::Rrset;
use ring::digest;
use std::sync::Arc;
use std::time::{Duration, SystemTime, UNIX_EPOCH};
use tracing::{debug, warn};

pub struct DnssecValidator {
    dnskey_cache: Arc<DnskeyCache>,
    anchors: Vec<TrustAnchor>,
}

fn now_unix() -> u32 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or(0) as u32
}

/// DS digest of a DNSKEY: digest(owner canonical wire | DNSKEY rdata).
pub fn dnskey_digest(owner: &Name, key: &DnskeyData, digest_type: u8) -> Result<Vec<u8>> {
    let mut data = owner.to_canonical_wire();
    data.extend_from_slice(&key.flags.to_be_bytes());
    data.push(key.protocol);
    data.push(key.algorithm);
    data.extend_from_slice(&key.public_key);

    let alg = match digest_type {
        2 => &digest::SHA256,
        4 => &digest::SHA384,
        other => {
            return Err(TdnsError::DnssecError {
                code: EdeCode::OtherError,
                reason: format!("unsupported DS digest type {}", other),
            });
        }
    };
    Ok(digest::digest(alg, &data).as_ref().to_vec())
}

impl DnssecValidator {
    pub fn new(dnskey_cache: Arc<DnskeyCache>, anchors: Vec<TrustAnchor>) -> Self {
        Self {
            dnskey_cache,
            anchors,
        }
    }

    pub fn anchors(&self) -> &[TrustAnchor] {
        &self.anchors
    }

    pub fn has_anchor_for(&self, zone: &Name) -> bool {
        self.anchors.iter().any(|a| a.name() == zone)
    }

    /// Verify one RRSIG over its RRset with a candidate key.
    fn verify_one(
        &self,
        rrset: &Rrset,
        sig: &RrsigData,
        key: &DnskeyData,
    ) -> Result<()> {
        let now = now_unix();
        if now > sig.expiration {
            return Err(TdnsError::DnssecError {
                code: EdeCode::SignatureExpired,
                reason: format!("RRSIG for {} expired", rrset.name),
            });
        }
        if now < sig.inception {
            return Err(TdnsError::DnssecError {
                code: EdeCode::SignatureNotYetValid,
                reason: format!("RRSIG for {} not yet valid", rrset.name),
            });
        }

        let mut signed = sig.to_prefix_wire();
        let mut sorted: Vec<_> = rrset.rrs.iter().collect();
        sorted.sort_by(|a, b| a.rdata.to_canonical_wire().cmp(&b.rdata.to_canonical_wire()));
        for rr in sorted {
            // wildcard expansions sign with the source owner's label count
            let mut canonical_owner = rr.clone();
            if (sig.labels as usize) < rr.name.label_count() {
                let skip = rr.name.label_count() - sig.labels as usize;
                let mut labels = vec!["*".to_string()];
                labels.extend(rr.name.labels()[skip..].iter().cloned());
                canonical_owner.name = Name::from_labels(labels);
            }
            signed.extend_from_slice(&canonical_owner.to_canonical_wire(sig.original_ttl));
        }
        verify_signature(sig.algorithm, &key.public_key, &signed, &sig.signature)
    }

    /// Verify an RRset against a set of candidate keys. Ok when any
    /// RRSIG verifies with any matching key.
    pub fn verify_rrset(&self, rrset: &Rrset, keys: &[DnskeyData]) -> Result<()> {
        if rrset.rrsigs.is_empty() {
            return Err(TdnsError::DnssecError {
                code: EdeCode::RrsigsMissing,
                reason: format!("no RRSIG over {}/{}", rrset.name, rrset.rtype),
            });
        }
        let mut last_err = None;
        for sig_rr in &rrset.rrsigs {
            let RData::Rrsig(sig) = &sig_rr.rdata else {
                continue;
            };
            for key in keys {
                if key.key_tag() != sig.key_tag || key.algorithm != sig.algorithm {
                    continue;
                }
                match self.verify_one(rrset, sig, key) {
                    Ok(()) => return Ok(()),
                    Err(e) => last_err = Some(e),
                }
            }
        }
        Err(last_err.unwrap_or(TdnsError::DnssecError {
            code: EdeCode::DnskeyMissing,
            reason: format!("no DNSKEY matches RRSIGs over {}", rrset.name),
        }))
    }

    /// Validate a zone's DNSKEY RRset against DS records (configured
    /// anchors or a validated parent DS set) and/or direct key anchors.
    ///
    /// On success every key in the set is cached Secure; keys matched
    /// directly by an anchor carry the trust-anchor bit. Returns the
    /// validated keys.
    pub fn validate_dnskey_rrset(
        &self,
        zone: &Name,
        dnskeys: &Rrset,
        parent_ds: Option<&[DsData]>,
    ) -> Result<Vec<DnskeyData>> {
        let keys: Vec<DnskeyData> = dnskeys
            .rrs
            .iter()
            .filter_map(|rr| match &rr.rdata {
                RData::Dnskey(k) => Some(k.clone()),
                _ => None,
            })
            .collect();
        if keys.is_empty() {
            return Err(TdnsError::DnssecError {
                code: EdeCode::DnskeyMissing,
                reason: format!("empty DNSKEY RRset for {}", zone),
            });
        }

        // collect DS data: configured anchors at the zone, plus whatever
        // the caller validated at the parent
        let mut ds_set: Vec<DsData> = Vec::new();
        let mut key_anchors: Vec<&DnskeyData> = Vec::new();
        for anchor in &self.anchors {
            if anchor.name() != zone {
                continue;
            }
            match anchor {
                TrustAnchor::Ds { data, .. } => ds_set.push(data.clone()),
                TrustAnchor::Key { key, .. } => key_anchors.push(key),
            }
        }
        let anchored = !ds_set.is_empty() || !key_anchors.is_empty();
        if let Some(parent) = parent_ds {
            ds_set.extend(parent.iter().cloned());
        }

        // find the entry keys: SEP keys matched by DS digest or by a
        // direct key anchor
        let mut entry_keys: Vec<DnskeyData> = Vec::new();
        for key in &keys {
            if !key.is_zone_key() {
                continue;
            }
            let tag = key.key_tag();
            let ds_match = ds_set.iter().any(|ds| {
                ds.key_tag == tag
                    && ds.algorithm == key.algorithm
                    && dnskey_digest(zone, key, ds.digest_type)
                        .map(|d| d == ds.digest)
                        .unwrap_or(false)
            });
            let anchor_match = key_anchors
                .iter()
                .any(|a| a.key_tag() == tag && a.public_key == key.public_key);
            if ds_match || anchor_match {
                entry_keys.push(key.clone());
            }
        }
        if entry_keys.is_empty() {
            return Err(TdnsError::DnssecError {
                code: EdeCode::DnssecBogus,
                reason: format!("no DNSKEY of {} matches DS or anchor", zone),
            });
        }

        // the entry keys must verify the DNSKEY RRset's own signature
        self.verify_rrset(dnskeys, &entry_keys)?;

        // success: cache everything as Secure
        let ttl = Duration::from_secs(dnskeys.ttl().max(60) as u64);
        let entry_tags: Vec<u16> = entry_keys.iter().map(|k| k.key_tag()).collect();
        for key in &keys {
            let is_anchor = anchored && entry_tags.contains(&key.key_tag());
            self.dnskey_cache.insert(
                zone.clone(),
                key.clone(),
                ValidationState::Secure,
                is_anchor,
                ttl,
            );
        }
        debug!(zone = %zone, keys = keys.len(), "DNSKEY RRset validated");
        Ok(keys)
    }

    /// Validate an answer RRset with the (already validated) keys of its
    /// signer zone, consulting the DNSKEY cache.
    pub fn validate_answer(&self, rrset: &Rrset) -> ValidationState {
        if rrset.rrsigs.is_empty() {
            return ValidationState::Insecure;
        }
        let signer = rrset.rrsigs.iter().find_map(|rr| match &rr.rdata {
            RData::Rrsig(sig) => Some(sig.signer.clone()),
            _ => None,
        });
        let Some(signer) = signer else {
            return ValidationState::Bogus;
        };
        let cached = self.dnskey_cache.keys_for(&signer);
        if cached.is_empty() {
            return ValidationState::Indeterminate;
        }
        let keys: Vec<DnskeyData> = cached
            .iter()
            .filter(|c| c.state == ValidationState::Secure)
            .map(|c| c.key.clone())
            .collect();
        if keys.is_empty() {
            return ValidationState::Indeterminate;
        }
        match self.verify_rrset(rrset, &keys) {
            Ok(()) => ValidationState::Secure,
            Err(e) => {
                warn!(owner = %rrset.name, error = %e, "answer failed validation");
                ValidationState::Bogus
            }
        }
    }
}
