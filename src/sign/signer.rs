//! Online RRSIG generation (RFC 4034).
//!
//! The signer consumes whatever the key store reports as active at the
//! moment of signing: KSKs for the DNSKEY RRset, ZSKs for everything
//! else. Rollovers are somebody else's problem; a key that stops being
//! active simply stops being used.

use crate::dns::enums::{RRClass, RRType};
use crate::dns::name::Name;
use crate::dns::rdata::{RData, RrsigData};
use crate::dns::record::ResourceRecord;
use crate::error::{Result, TdnsError};
use crate::keydb::{KeyDb, KeyRole, SigningKey};
use crate::zone::rrset::Rrset;
use crate::zone::zone::Zone;
use std::time::{Duration, SystemTime, UNIX_EPOCH};
use tracing::{debug, info};

/// Default RRSIG validity: 14 days.
pub const DEFAULT_SIGNATURE_VALIDITY: Duration = Duration::from_secs(14 * 24 * 3600);
/// Inception is backdated an hour to absorb clock skew.
const INCEPTION_SKEW: u64 = 3600;

fn now_unix() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or(0)
}

/// Sign one RRset in place, replacing any previous RRSIGs.
pub fn sign_rrset(
    rrset: &mut Rrset,
    zone_apex: &Name,
    keys: &[SigningKey],
    validity: Duration,
) -> Result<()> {
    if rrset.is_empty() {
        return Ok(());
    }
    if keys.is_empty() {
        return Err(TdnsError::NoActiveKey {
            zone: zone_apex.to_string(),
            role: "signing key",
        });
    }

    let original_ttl = rrset.ttl();
    // wildcard owners sign with the label count of the expansion source
    let labels = if rrset.name.is_wildcard() {
        rrset.name.label_count() as u8 - 1
    } else {
        rrset.name.label_count() as u8
    };
    let now = now_unix();
    let inception = (now - INCEPTION_SKEW) as u32;
    let expiration = (now + validity.as_secs()) as u32;

    // canonical RRset order: sort by canonical rdata (RFC 4034 §6.3)
    let mut sorted: Vec<&ResourceRecord> = rrset.rrs.iter().collect();
    sorted.sort_by(|a, b| a.rdata.to_canonical_wire().cmp(&b.rdata.to_canonical_wire()));

    let mut rrsigs = Vec::with_capacity(keys.len());
    for key in keys {
        let mut sig = RrsigData {
            type_covered: rrset.rtype,
            algorithm: key.algorithm,
            labels,
            original_ttl,
            expiration,
            inception,
            key_tag: key.keyid,
            signer: zone_apex.clone(),
            signature: Vec::new(),
        };

        let mut signed_data = sig.to_prefix_wire();
        for rr in &sorted {
            signed_data.extend_from_slice(&rr.to_canonical_wire(original_ttl));
        }
        sig.signature = key.sign(&signed_data)?;

        rrsigs.push(ResourceRecord {
            name: rrset.name.clone(),
            rtype: RRType::RRSIG,
            class: RRClass::IN,
            ttl: original_ttl,
            rdata: RData::Rrsig(sig),
        });
    }
    rrset.rrsigs = rrsigs;
    debug!(owner = %rrset.name, rtype = %rrset.rtype, sigs = rrset.rrsigs.len(), "RRset signed");
    Ok(())
}

/// Make sure the apex DNSKEY RRset publishes all active keys.
fn publish_dnskeys(zone: &Zone, keys: &[&SigningKey]) {
    let mut set = zone
        .apex_rrset(RRType::DNSKEY)
        .unwrap_or_else(|| Rrset::new(zone.name.clone(), RRType::DNSKEY));
    let ttl = if set.ttl() > 0 { set.ttl() } else { 3600 };
    for key in keys {
        let rr = ResourceRecord::new(
            zone.name.clone(),
            RRType::DNSKEY,
            ttl,
            RData::Dnskey(key.public.clone()),
        );
        set.insert(rr);
    }
    zone.put_rrset(set);
}

/// Sign every authoritative RRset in the zone. Delegation NS sets and
/// glue below a cut stay unsigned; DS sets at a cut are signed. Returns
/// the number of RRsets signed.
pub fn sign_zone(zone: &Zone, keydb: &KeyDb, validity: Duration) -> Result<usize> {
    let zsks = keydb.active_dnssec_keys(&zone.name, KeyRole::Zsk)?;
    let ksks = keydb.active_dnssec_keys(&zone.name, KeyRole::Ksk)?;
    if zsks.is_empty() {
        return Err(TdnsError::NoActiveKey {
            zone: zone.name.to_string(),
            role: "ZSK",
        });
    }
    // a ZSK doubles as KSK when no dedicated KSK is active
    let ksks: Vec<&SigningKey> = if ksks.is_empty() {
        zsks.iter().collect()
    } else {
        ksks.iter().collect()
    };

    if !zone.options.read().dont_publish_key {
        let mut all: Vec<&SigningKey> = ksks.clone();
        all.extend(zsks.iter());
        publish_dnskeys(zone, &all);
    }

    let zsk_refs: Vec<SigningKey> = zsks.clone();
    let ksk_refs: Vec<SigningKey> = ksks.into_iter().cloned().collect();

    let mut signed = 0usize;
    for owner in zone.owners_sorted() {
        // skip anything at or below a delegation cut, except the cut's DS
        let delegated = zone
            .find_delegation(&owner.name)
            .map(|ns| (ns.name.clone(), owner.name == ns.name));
        for rtype in owner.types() {
            if rtype == RRType::RRSIG {
                continue;
            }
            if let Some((_, at_cut)) = &delegated {
                if !(*at_cut && rtype == RRType::DS) {
                    continue;
                }
            }
            let Some(mut set) = owner.get(rtype) else {
                continue;
            };
            let keys: &[SigningKey] = if rtype == RRType::DNSKEY {
                &ksk_refs
            } else {
                &zsk_refs
            };
            sign_rrset(&mut set, &zone.name, keys, validity)?;
            zone.put_rrset(set);
            signed += 1;
        }
    }
    info!(zone = %zone.name, rrsets = signed, "zone signed");
    Ok(signed)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dns::rdata::SoaData;
    use crate::update::policy::UpdatePolicy;
    use crate::zone::zone::{StoreKind, ZoneType};
    use ring::signature::{self};
    use std::net::Ipv4Addr;

    fn test_zone() -> Zone {
        let zone = Zone::new(
            Name::parse("example.com").unwrap(),
            ZoneType::Primary,
            StoreKind::Map,
            UpdatePolicy::default(),
        );
        zone.sort_records_in(vec![
            ResourceRecord::new(
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
        zone
    }

    #[test]
    fn test_sign_rrset_verifies() {
        let db = KeyDb::open_in_memory().unwrap();
        let zone_name = Name::parse("example.com").unwrap();
        db.generate_dnssec_key(&zone_name, KeyRole::Zsk, "active").unwrap();
        let keys = db.active_dnssec_keys(&zone_name, KeyRole::Zsk).unwrap();

        let mut set = Rrset::new(Name::parse("www.example.com").unwrap(), RRType::A);
        set.insert(ResourceRecord::new(
            Name::parse("www.example.com").unwrap(),
            RRType::A,
            300,
            RData::A(Ipv4Addr::new(192, 0, 2, 10)),
        ));
        sign_rrset(&mut set, &zone_name, &keys, DEFAULT_SIGNATURE_VALIDITY).unwrap();
        assert_eq!(set.rrsigs.len(), 1);

        // reconstruct the signed data and verify against the public key
        let RData::Rrsig(sig) = &set.rrsigs[0].rdata else {
            panic!("expected RRSIG");
        };
        assert_eq!(sig.labels, 3);
        assert_eq!(sig.type_covered, RRType::A);
        let mut signed_data = sig.to_prefix_wire();
        for rr in &set.rrs {
            signed_data.extend_from_slice(&rr.to_canonical_wire(sig.original_ttl));
        }
        let pk = signature::UnparsedPublicKey::new(
            &signature::ED25519,
            keys[0].public.public_key.clone(),
        );
        pk.verify(&signed_data, &sig.signature).unwrap();
    }

    #[test]
    fn test_sign_zone_publishes_dnskeys() {
        let db = KeyDb::open_in_memory().unwrap();
        let zone = test_zone();
        db.generate_dnssec_key(&zone.name, KeyRole::Zsk, "active").unwrap();
        db.generate_dnssec_key(&zone.name, KeyRole::Ksk, "active").unwrap();

        let signed = sign_zone(&zone, &db, DEFAULT_SIGNATURE_VALIDITY).unwrap();
        assert!(signed >= 3); // SOA, NS, DNSKEY, www/A

        let dnskeys = zone.apex_rrset(RRType::DNSKEY).unwrap();
        assert_eq!(dnskeys.rrs.len(), 2);
        assert!(!dnskeys.rrsigs.is_empty());
        // DNSKEY RRset signed by the KSK
        let RData::Rrsig(sig) = &dnskeys.rrsigs[0].rdata else {
            panic!("expected RRSIG");
        };
        let ksk = &db.active_dnssec_keys(&zone.name, KeyRole::Ksk).unwrap()[0];
        assert_eq!(sig.key_tag, ksk.keyid);
    }

    #[test]
    fn test_sign_zone_without_keys_fails() {
        let db = KeyDb::open_in_memory().unwrap();
        let zone = test_zone();
        assert!(matches!(
            sign_zone(&zone, &db, DEFAULT_SIGNATURE_VALIDITY),
            Err(TdnsError::NoActiveKey { .. })
        ));
    }

    #[test]
    fn test_wildcard_label_count() {
        let db = KeyDb::open_in_memory().unwrap();
        let zone_name = Name::parse("example.com").unwrap();
        db.generate_dnssec_key(&zone_name, KeyRole::Zsk, "active").unwrap();
        let keys = db.active_dnssec_keys(&zone_name, KeyRole::Zsk).unwrap();

        let mut set = Rrset::new(Name::parse("*.wild.example.com").unwrap(), RRType::TXT);
        set.insert(ResourceRecord::new(
            Name::parse("*.wild.example.com").unwrap(),
            RRType::TXT,
            300,
            RData::Txt(vec!["w".into()]),
        ));
        sign_rrset(&mut set, &zone_name, &keys, DEFAULT_SIGNATURE_VALIDITY).unwrap();
        let RData::Rrsig(sig) = &set.rrsigs[0].rdata else {
            panic!("expected RRSIG");
        };
        // *.wild.example.com has 4 labels, the wildcard does not count
        assert_eq!(sig.labels, 3);
    }
}
