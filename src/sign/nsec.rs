//! NSEC chain generation and the black-lies on-the-fly variant.

use crate::dns::enums::{RRClass, RRType};
use crate::dns::name::Name;
use crate::dns::rdata::{NsecData, RData};
use crate::dns::record::ResourceRecord;
use crate::error::{Result, TdnsError};
use crate::zone::rrset::Rrset;
use crate::zone::zone::Zone;
use tracing::info;

/// Generate the NSEC chain over the zone's owners in canonical order,
/// wrapping the last owner back to the apex. Returns the chain; the
/// caller decides whether to install it.
pub fn generate_nsec_chain(zone: &Zone) -> Result<Vec<ResourceRecord>> {
    let soa = zone
        .soa()
        .ok_or_else(|| TdnsError::MissingSoa(zone.name.to_string()))?;
    let ttl = soa.minimum;

    let owners = zone.owners_sorted();
    if owners.is_empty() {
        return Ok(Vec::new());
    }

    let mut chain = Vec::with_capacity(owners.len());
    for (i, owner) in owners.iter().enumerate() {
        let next = &owners[(i + 1) % owners.len()];
        let mut types = owner.types();
        for t in [RRType::NSEC, RRType::RRSIG] {
            if !types.contains(&t) {
                types.push(t);
            }
        }
        chain.push(ResourceRecord {
            name: owner.name.clone(),
            rtype: RRType::NSEC,
            class: RRClass::IN,
            ttl,
            rdata: RData::Nsec(NsecData {
                next: next.name.clone(),
                types,
            }),
        });
    }
    info!(zone = %zone.name, links = chain.len(), "generated NSEC chain");
    Ok(chain)
}

/// Install a generated chain into the zone's RRsets.
pub fn install_nsec_chain(zone: &Zone, chain: Vec<ResourceRecord>) {
    for rr in chain {
        let mut set = Rrset::new(rr.name.clone(), RRType::NSEC);
        set.insert(rr);
        zone.put_rrset(set);
    }
}

/// Black lies (compact denial): synthesize a minimally-covering NSEC for
/// a NODATA answer at `qname` without walking the real chain. The next
/// name is the immediate successor `\000.qname` and the bitmap lists the
/// types that do exist at the owner plus NSEC/RRSIG.
pub fn synthesize_black_lies_nsec(
    zone: &Zone,
    qname: &Name,
    ttl: u32,
) -> ResourceRecord {
    let mut types: Vec<RRType> = zone
        .get_owner(qname)
        .map(|o| o.types())
        .unwrap_or_default();
    for t in [RRType::NSEC, RRType::RRSIG] {
        if !types.contains(&t) {
            types.push(t);
        }
    }
    ResourceRecord {
        name: qname.clone(),
        rtype: RRType::NSEC,
        class: RRClass::IN,
        ttl,
        rdata: RData::Nsec(NsecData {
            next: qname.prepend("\u{0}"),
            types,
        }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dns::rdata::SoaData;
    use crate::update::policy::UpdatePolicy;
    use crate::zone::zone::{StoreKind, ZoneType};
    use std::net::Ipv4Addr;

    fn test_zone() -> Zone {
        let zone = Zone::new(
            Name::parse("example.com").unwrap(),
            ZoneType::Primary,
            StoreKind::Slice,
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
                Name::parse("alpha.example.com").unwrap(),
                RRType::A,
                300,
                RData::A(Ipv4Addr::new(192, 0, 2, 1)),
            ),
            ResourceRecord::new(
                Name::parse("beta.example.com").unwrap(),
                RRType::A,
                300,
                RData::A(Ipv4Addr::new(192, 0, 2, 2)),
            ),
        ])
        .unwrap();
        zone
    }

    #[test]
    fn test_chain_links_and_wraps() {
        let zone = test_zone();
        let chain = generate_nsec_chain(&zone).unwrap();
        assert_eq!(chain.len(), 3);
        // canonical order: example.com, alpha.example.com, beta.example.com
        assert_eq!(chain[0].name, Name::parse("example.com").unwrap());
        let RData::Nsec(first) = &chain[0].rdata else {
            panic!("expected NSEC");
        };
        assert_eq!(first.next, Name::parse("alpha.example.com").unwrap());
        // last wraps back to the apex
        let RData::Nsec(last) = &chain[2].rdata else {
            panic!("expected NSEC");
        };
        assert_eq!(last.next, Name::parse("example.com").unwrap());
        // TTL from SOA minimum
        assert_eq!(chain[0].ttl, 86400);
    }

    #[test]
    fn test_black_lies_shape() {
        let zone = test_zone();
        let qname = Name::parse("alpha.example.com").unwrap();
        let nsec = synthesize_black_lies_nsec(&zone, &qname, 86400);
        let RData::Nsec(data) = &nsec.rdata else {
            panic!("expected NSEC");
        };
        assert_eq!(data.next.label_count(), qname.label_count() + 1);
        assert!(data.types.contains(&RRType::A));
        assert!(data.types.contains(&RRType::NSEC));
    }
}
