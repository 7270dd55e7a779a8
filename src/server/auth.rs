//! The authoritative responder.
//!
//! Serves answers, referrals with glue, wildcard expansions and
//! negatives out of the zone store. With the DO bit set it includes
//! covering RRSIGs, signing on demand when the zone has online signing
//! and the set carries no signature yet. Black-lies zones turn both
//! NODATA and NXDOMAIN into compact NSEC-backed NODATA answers.

use crate::dns::enums::{RRType, Rcode};
use crate::dns::message::Message;
use crate::dns::record::ResourceRecord;
use crate::error::{Result, TdnsError};
use crate::keydb::{KeyDb, KeyRole};
use crate::sign::nsec::synthesize_black_lies_nsec;
use crate::sign::signer::sign_rrset;
use crate::zone::rrset::Rrset;
use crate::zone::zone::{Zone, ZoneAnswer};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, error};

pub struct AuthResponder {
    keydb: Arc<KeyDb>,
    signature_validity: Duration,
}

impl AuthResponder {
    pub fn new(keydb: Arc<KeyDb>, signature_validity: Duration) -> Self {
        Self {
            keydb,
            signature_validity,
        }
    }

    /// Sign an RRset on demand and persist the signature back into the
    /// zone so the next query hits the cache. DNSKEY signs with the
    /// KSK, everything else with the ZSK.
    fn ensure_signed(&self, zone: &Zone, set: &mut Rrset) -> Result<()> {
        if !set.rrsigs.is_empty() {
            return Ok(());
        }
        let role = if set.rtype == RRType::DNSKEY {
            KeyRole::Ksk
        } else {
            KeyRole::Zsk
        };
        let mut keys = self.keydb.active_dnssec_keys(&zone.name, role)?;
        if keys.is_empty() && role == KeyRole::Ksk {
            keys = self.keydb.active_dnssec_keys(&zone.name, KeyRole::Zsk)?;
        }
        sign_rrset(set, &zone.name, &keys, self.signature_validity)?;
        // wildcard-synthesized sets must not overwrite the source owner
        if !set.name.is_wildcard() {
            zone.put_rrset(set.clone());
        }
        Ok(())
    }

    fn push_set(&self, zone: &Zone, target: &mut Vec<ResourceRecord>, mut set: Rrset, want_sigs: bool, online: bool) -> Result<()> {
        if want_sigs && online {
            self.ensure_signed(zone, &mut set)?;
        }
        target.extend(set.rrs.clone());
        if want_sigs {
            target.extend(set.rrsigs.clone());
        }
        Ok(())
    }

    /// Answer a QUERY for a name inside `zone`.
    pub fn respond(&self, msg: &Message, zone: &Arc<Zone>) -> Message {
        let mut resp = msg.response();
        resp.header.aa = true;
        let Some(question) = msg.questions.first() else {
            resp.header.rcode = Rcode::FormErr;
            return resp;
        };
        let qname = question.qname.clone();
        let qtype = question.qtype;
        let want_sigs = msg.do_bit();
        let options = zone.options.read().clone();

        match self.build(msg, zone, &qname, qtype, want_sigs, options.online_signing, options.black_lies) {
            Ok(resp) => resp,
            Err(e) => {
                // the signer never partially publishes
                error!(zone = %zone.name, qname = %qname, error = %e, "responder failed");
                let mut resp = msg.error_response(Rcode::ServFail);
                resp.header.aa = true;
                resp
            }
        }
    }

    #[allow(clippy::too_many_arguments)]
    fn build(
        &self,
        msg: &Message,
        zone: &Arc<Zone>,
        qname: &crate::dns::name::Name,
        qtype: RRType,
        want_sigs: bool,
        online: bool,
        black_lies: bool,
    ) -> Result<Message> {
        let mut resp = msg.response();
        resp.header.aa = true;

        match zone.lookup(qname, qtype) {
            ZoneAnswer::Answer(set) => {
                let mut answers = Vec::new();
                self.push_set(zone, &mut answers, set, want_sigs, online)?;
                resp.answers = answers;
            }
            ZoneAnswer::Referral { ns, glue } => {
                resp.header.aa = false;
                resp.authorities = ns.rrs.clone();
                if want_sigs {
                    // the DS set at the cut proves (or denies) the child
                    if let Some(owner) = zone.get_owner(&ns.name) {
                        if let Some(ds) = owner.get(RRType::DS) {
                            self.push_set(zone, &mut resp.authorities, ds, true, online)?;
                        }
                    }
                }
                for set in glue {
                    resp.additionals.extend(set.rrs.clone());
                }
                debug!(zone = %zone.name, child = %ns.name, "referral");
            }
            ZoneAnswer::NoData => {
                self.negative(zone, &mut resp, qname, want_sigs, online, black_lies)?;
            }
            ZoneAnswer::NxDomain => {
                if black_lies && want_sigs {
                    // compact denial: pretend the name exists, empty
                    self.negative(zone, &mut resp, qname, want_sigs, online, true)?;
                } else {
                    resp.header.rcode = Rcode::NXDomain;
                    self.negative(zone, &mut resp, qname, want_sigs, online, false)?;
                }
            }
            ZoneAnswer::NotInZone => {
                resp.header.aa = false;
                resp.header.rcode = Rcode::Refused;
            }
        }
        Ok(resp)
    }

    fn negative(
        &self,
        zone: &Arc<Zone>,
        resp: &mut Message,
        qname: &crate::dns::name::Name,
        want_sigs: bool,
        online: bool,
        black_lies: bool,
    ) -> Result<()> {
        let soa_set = zone
            .soa_rrset()
            .ok_or_else(|| TdnsError::MissingSoa(zone.name.to_string()))?;
        let minimum = zone.soa().map(|s| s.minimum).unwrap_or(60);
        let mut authority = Vec::new();
        self.push_set(zone, &mut authority, soa_set, want_sigs, online)?;

        if black_lies && want_sigs {
            let mut nsec_set = Rrset::new(qname.clone(), RRType::NSEC);
            nsec_set.insert(synthesize_black_lies_nsec(zone, qname, minimum));
            if online {
                let keys = self.keydb.active_dnssec_keys(&zone.name, KeyRole::Zsk)?;
                sign_rrset(&mut nsec_set, &zone.name, &keys, self.signature_validity)?;
            }
            authority.extend(nsec_set.rrs);
            authority.extend(nsec_set.rrsigs);
        }
        resp.authorities = authority;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dns::name::Name;
    use crate::dns::rdata::{RData, SoaData};
    use crate::sign::signer::DEFAULT_SIGNATURE_VALIDITY;
    use crate::update::policy::UpdatePolicy;
    use crate::zone::zone::{StoreKind, ZoneType};
    use std::net::Ipv4Addr;

    fn setup() -> (AuthResponder, Arc<Zone>, Arc<KeyDb>) {
        let keydb = Arc::new(KeyDb::open_in_memory().unwrap());
        let responder = AuthResponder::new(keydb.clone(), DEFAULT_SIGNATURE_VALIDITY);
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
                Name::parse("www.example.com").unwrap(),
                RRType::A,
                300,
                RData::A(Ipv4Addr::new(192, 0, 2, 10)),
            ),
            ResourceRecord::new(
                Name::parse("sub.example.com").unwrap(),
                RRType::NS,
                3600,
                RData::Ns(Name::parse("ns1.sub.example.com").unwrap()),
            ),
            ResourceRecord::new(
                Name::parse("ns1.sub.example.com").unwrap(),
                RRType::A,
                3600,
                RData::A(Ipv4Addr::new(192, 0, 2, 53)),
            ),
        ])
        .unwrap();
        (responder, Arc::new(zone), keydb)
    }

    fn query(qname: &str, qtype: RRType) -> Message {
        Message::query(Name::parse(qname).unwrap(), qtype)
    }

    #[test]
    fn test_positive_answer() {
        let (responder, zone, _) = setup();
        let resp = responder.respond(&query("www.example.com", RRType::A), &zone);
        assert!(resp.header.aa);
        assert_eq!(resp.header.rcode, Rcode::NoError);
        assert_eq!(resp.answers.len(), 1);
        assert_eq!(
            resp.answers[0].rdata,
            RData::A(Ipv4Addr::new(192, 0, 2, 10))
        );
    }

    #[test]
    fn test_referral_with_glue() {
        let (responder, zone, _) = setup();
        let resp = responder.respond(&query("deep.sub.example.com", RRType::A), &zone);
        assert!(!resp.header.aa);
        assert_eq!(resp.header.rcode, Rcode::NoError);
        assert!(resp.answers.is_empty());
        assert_eq!(resp.authorities.len(), 1);
        assert_eq!(resp.authorities[0].rtype, RRType::NS);
        assert_eq!(resp.additionals.len(), 1);
        assert_eq!(resp.additionals[0].rtype, RRType::A);
    }

    #[test]
    fn test_nxdomain_carries_soa() {
        let (responder, zone, _) = setup();
        let resp = responder.respond(&query("nope.example.com", RRType::A), &zone);
        assert_eq!(resp.header.rcode, Rcode::NXDomain);
        assert_eq!(resp.authorities.len(), 1);
        assert_eq!(resp.authorities[0].rtype, RRType::SOA);
    }

    #[test]
    fn test_nodata_carries_soa() {
        let (responder, zone, _) = setup();
        let resp = responder.respond(&query("www.example.com", RRType::AAAA), &zone);
        assert_eq!(resp.header.rcode, Rcode::NoError);
        assert!(resp.answers.is_empty());
        assert_eq!(resp.authorities[0].rtype, RRType::SOA);
    }

    #[test]
    fn test_online_signing_on_do_query() {
        let (responder, zone, keydb) = setup();
        zone.options.write().online_signing = true;
        keydb
            .generate_dnssec_key(&zone.name, KeyRole::Zsk, "active")
            .unwrap();

        let mut q = query("www.example.com", RRType::A);
        q.ensure_edns().set_do_flag(true);
        let resp = responder.respond(&q, &zone);
        assert_eq!(resp.header.rcode, Rcode::NoError);
        assert_eq!(resp.answers.len(), 2); // A + RRSIG
        assert!(resp.answers.iter().any(|rr| rr.rtype == RRType::RRSIG));

        // signature cached back into the zone
        let set = zone
            .get_owner(&Name::parse("www.example.com").unwrap())
            .unwrap()
            .get(RRType::A)
            .unwrap();
        assert_eq!(set.rrsigs.len(), 1);
    }

    #[test]
    fn test_online_signing_without_keys_is_servfail() {
        let (responder, zone, _) = setup();
        zone.options.write().online_signing = true;
        let mut q = query("www.example.com", RRType::A);
        q.ensure_edns().set_do_flag(true);
        let resp = responder.respond(&q, &zone);
        assert_eq!(resp.header.rcode, Rcode::ServFail);
        assert!(resp.answers.is_empty());
    }

    #[test]
    fn test_black_lies_nxdomain_becomes_nodata() {
        let (responder, zone, keydb) = setup();
        {
            let mut opts = zone.options.write();
            opts.online_signing = true;
            opts.black_lies = true;
        }
        keydb
            .generate_dnssec_key(&zone.name, KeyRole::Zsk, "active")
            .unwrap();

        let mut q = query("ghost.example.com", RRType::A);
        q.ensure_edns().set_do_flag(true);
        let resp = responder.respond(&q, &zone);
        assert_eq!(resp.header.rcode, Rcode::NoError);
        assert!(resp.answers.is_empty());
        assert!(resp.authorities.iter().any(|rr| rr.rtype == RRType::NSEC));
        // without DO, plain NXDOMAIN
        let resp = responder.respond(&query("ghost.example.com", RRType::A), &zone);
        assert_eq!(resp.header.rcode, Rcode::NXDomain);
    }
}
