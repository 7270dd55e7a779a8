//! The iterative-mode resolver (IMR).
//!
//! Resolution walks the delegation tree from the closest enclosing zone
//! with known servers, following referrals and CNAMEs, negative-caching
//! NXDOMAIN/NODATA, and validating answers against trust anchors seeded
//! at priming. Transport choice per server honors ALPN announcements
//! learned from SVCB glue.

pub mod authserver;
pub mod cache;
pub mod client;
pub mod dnskey_cache;
pub mod hints;
pub mod validate;

use crate::dns::edns::EDNS_UDP_SIZE;
use crate::dns::enums::{EdeCode, RRType, Rcode};
use crate::dns::message::Message;
use crate::dns::name::Name;
use crate::dns::rdata::RData;
use crate::dns::record::ResourceRecord;
use crate::error::{Result, TdnsError};
use crate::zone::rrset::Rrset;
use authserver::{AuthServer, AuthServerMap, ServerSource, Transport};
use cache::{CacheContext, CachedRrset, RrsetCache, ValidationState};
use client::TransportClients;
use dnskey_cache::DnskeyCache;
use hints::TrustAnchor;
use serde::Deserialize;
use std::future::Future;
use std::path::PathBuf;
use std::pin::Pin;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};
use validate::DnssecValidator;

/// Referral-chasing bound per lookup.
const MAX_ITERATIONS: usize = 12;
/// CNAME redirections followed per query.
const MAX_CNAME_CHASE: usize = 10;
/// How long a Failure-context entry shields a dead name.
const FAILURE_TTL: Duration = Duration::from_secs(30);
/// Nameserver names resolved per referral when glue is missing.
const MAX_NS_ADDR_LOOKUPS: usize = 2;

#[derive(Copy, Clone, Debug, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum TransportPolicy {
    /// Probe TLSA lazily, when an encrypted transport is first used.
    #[default]
    QueryForTransport,
    /// Probe TLSA on every new authoritative-server observation.
    AlwaysQueryForTransport,
}

#[derive(Clone, Debug, Deserialize)]
#[serde(default, rename_all = "kebab-case")]
pub struct ImrConfig {
    pub enabled: bool,
    pub root_hints: Option<PathBuf>,
    pub trust_anchor_file: Option<PathBuf>,
    pub transport_policy: TransportPolicy,
    pub do53_timeout_secs: u64,
    pub add_transport_signal: bool,
}

impl Default for ImrConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            root_hints: None,
            trust_anchor_file: None,
            transport_policy: TransportPolicy::default(),
            do53_timeout_secs: 3,
            add_transport_signal: false,
        }
    }
}

/// What the IMR hands back to the responder.
#[derive(Clone, Debug)]
pub struct ResolverResponse {
    pub rcode: Rcode,
    pub answers: Vec<ResourceRecord>,
    pub authority: Vec<ResourceRecord>,
    pub state: ValidationState,
    pub ede: Option<(EdeCode, String)>,
}

pub struct Imr {
    pub cache: Arc<RrsetCache>,
    pub dnskey_cache: Arc<DnskeyCache>,
    pub servers: Arc<AuthServerMap>,
    clients: TransportClients,
    validator: DnssecValidator,
    policy: TransportPolicy,
    add_transport_signal: bool,
}

enum Classified {
    Done(CachedRrset),
    Deeper,
    NextServer,
}

impl Imr {
    pub fn new(cfg: &ImrConfig) -> Result<Arc<Self>> {
        let servers = Arc::new(AuthServerMap::new());
        if let Some(hints) = &cfg.root_hints {
            hints::load_root_hints(hints, &servers)?;
        }
        let anchors: Vec<TrustAnchor> = match &cfg.trust_anchor_file {
            Some(path) => hints::load_trust_anchors(path)?,
            None => Vec::new(),
        };
        let dnskey_cache = Arc::new(DnskeyCache::new());
        Ok(Arc::new(Self {
            cache: Arc::new(RrsetCache::new()),
            dnskey_cache: dnskey_cache.clone(),
            servers,
            clients: TransportClients::new(Duration::from_secs(cfg.do53_timeout_secs))?,
            validator: DnssecValidator::new(dnskey_cache, anchors),
            policy: cfg.transport_policy,
            add_transport_signal: cfg.add_transport_signal,
        }))
    }

    /// Prime: fetch and validate the DNSKEY RRset of every anchored
    /// zone so the chain has a head.
    pub async fn prime(self: &Arc<Self>) {
        let anchored: Vec<Name> = {
            let mut names: Vec<Name> = self
                .validator
                .anchors()
                .iter()
                .map(|a| a.name().clone())
                .collect();
            names.dedup();
            names
        };
        for zone in anchored {
            match self.ensure_validated_keys(&zone, 0).await {
                Ok(true) => info!(zone = %zone, "trust anchor primed"),
                Ok(false) => warn!(zone = %zone, "anchored zone appears unsigned"),
                Err(e) => warn!(zone = %zone, error = %e, "priming failed"),
            }
        }
    }

    /// Resolve a query, chasing CNAMEs and honoring DO/CD.
    pub async fn resolve(
        self: &Arc<Self>,
        qname: &Name,
        qtype: RRType,
        do_bit: bool,
        cd: bool,
    ) -> ResolverResponse {
        let mut answers: Vec<ResourceRecord> = Vec::new();
        let mut state = ValidationState::None;
        let mut current = qname.clone();

        for step in 0..=MAX_CNAME_CHASE {
            if step == MAX_CNAME_CHASE {
                warn!(qname = %qname, "CNAME chain exceeded limit");
                return ResolverResponse {
                    rcode: Rcode::ServFail,
                    answers: Vec::new(),
                    authority: Vec::new(),
                    state: ValidationState::None,
                    ede: Some((EdeCode::OtherError, "CNAME chain too long".into())),
                };
            }

            let entry = match self.lookup_one(&current, qtype, cd).await {
                Ok(entry) => entry,
                Err(e) => {
                    return ResolverResponse {
                        rcode: Rcode::ServFail,
                        answers: Vec::new(),
                        authority: Vec::new(),
                        state: ValidationState::None,
                        ede: e.ede().map(|c| (c, e.to_string())),
                    };
                }
            };

            // a cached failure with an EDE fails closed unless CD is set
            if let Some((code, text)) = &entry.ede {
                if !cd {
                    return ResolverResponse {
                        rcode: Rcode::ServFail,
                        answers: Vec::new(),
                        authority: Vec::new(),
                        state: entry.state,
                        ede: Some((*code, text.clone())),
                    };
                }
            }
            if entry.state == ValidationState::Bogus && !cd {
                return ResolverResponse {
                    rcode: Rcode::ServFail,
                    answers: Vec::new(),
                    authority: Vec::new(),
                    state: ValidationState::Bogus,
                    ede: entry
                        .ede
                        .clone()
                        .or(Some((EdeCode::DnssecBogus, "validation failed".into()))),
                };
            }

            state = combine_state(state, entry.state);

            match &entry.rrset {
                Some(set) if set.rtype == qtype || qtype == RRType::ANY => {
                    answers.extend(set.rrs.clone());
                    if do_bit {
                        answers.extend(set.rrsigs.clone());
                    }
                    return ResolverResponse {
                        rcode: Rcode::NoError,
                        answers,
                        authority: Vec::new(),
                        state,
                        ede: None,
                    };
                }
                Some(set) if set.rtype == RRType::CNAME => {
                    answers.extend(set.rrs.clone());
                    if do_bit {
                        answers.extend(set.rrsigs.clone());
                    }
                    let Some(target) = set.rrs.iter().find_map(|rr| match &rr.rdata {
                        RData::Cname(t) => Some(t.clone()),
                        _ => None,
                    }) else {
                        break;
                    };
                    debug!(from = %current, to = %target, "chasing CNAME");
                    current = target;
                    continue;
                }
                Some(_) | None => {
                    // negative result
                    let mut authority = Vec::new();
                    for set in &entry.neg_authority {
                        authority.extend(set.rrs.clone());
                        if do_bit {
                            authority.extend(set.rrsigs.clone());
                        }
                    }
                    // an NXDOMAIN mid-chase caches for the original name too
                    if entry.rcode == Rcode::NXDomain && current != *qname {
                        self.cache.insert(qname.clone(), qtype, entry.clone());
                    }
                    return ResolverResponse {
                        rcode: entry.rcode,
                        answers,
                        authority,
                        state: combine_state(state, entry.state),
                        ede: None,
                    };
                }
            }
        }

        ResolverResponse {
            rcode: Rcode::ServFail,
            answers: Vec::new(),
            authority: Vec::new(),
            state: ValidationState::None,
            ede: None,
        }
    }

    /// One name/type lookup: cache first, then iteration.
    fn lookup_one<'a>(
        self: &'a Arc<Self>,
        name: &'a Name,
        qtype: RRType,
        cd: bool,
    ) -> Pin<Box<dyn Future<Output = Result<CachedRrset>> + Send + 'a>> {
        Box::pin(async move {
            // definitive cache entries satisfy the query; referral/glue/
            // hint entries are upgraded by a fresh query
            if let Some(entry) = self.cache.get(name, qtype) {
                if entry.context.is_definitive() {
                    return Ok(entry);
                }
                if entry.context == CacheContext::Failure {
                    return Err(TdnsError::ServersExhausted(name.to_string()));
                }
            }
            if qtype != RRType::CNAME {
                if let Some(entry) = self.cache.get(name, RRType::CNAME) {
                    if entry.context == CacheContext::Answer {
                        return Ok(entry);
                    }
                }
            }

            for _iteration in 0..MAX_ITERATIONS {
                let Some((zone, servers)) = self.servers.closest_zone(name) else {
                    return Err(TdnsError::ServersExhausted(name.to_string()));
                };
                self.fill_missing_addrs(&servers).await;

                let mut query = Message::query(name.clone(), qtype);
                query.header.rd = false;
                let edns = query.ensure_edns();
                edns.udp_payload_size = EDNS_UDP_SIZE;
                edns.set_do_flag(true);
                if self.add_transport_signal {
                    edns.set_transport_signal();
                }

                let mut classified = Classified::NextServer;
                'servers: for server in &servers {
                    let transport = *server.pref_transport.read();
                    if matches!(transport, Transport::DoT | Transport::DoQ)
                        && self.policy == TransportPolicy::QueryForTransport
                        && server.dane.read().is_empty()
                    {
                        self.spawn_tlsa_probe(server.clone());
                    }
                    for addr in server.addrs() {
                        match self
                            .clients
                            .exchange(&query, addr, &server.name.to_string(), transport)
                            .await
                        {
                            Ok(reply) => {
                                classified =
                                    self.classify(&zone, name, qtype, reply, cd).await;
                                match classified {
                                    Classified::NextServer => continue,
                                    _ => break 'servers,
                                }
                            }
                            Err(e) => {
                                debug!(server = %server.name, %addr, error = %e,
                                    "exchange failed, trying next");
                            }
                        }
                    }
                }

                match classified {
                    Classified::Done(entry) => return Ok(entry),
                    Classified::Deeper => continue,
                    Classified::NextServer => {
                        // all servers for the closest zone failed
                        self.cache.insert(
                            name.clone(),
                            qtype,
                            CachedRrset::negative(
                                Rcode::ServFail,
                                CacheContext::Failure,
                                FAILURE_TTL,
                                Vec::new(),
                            ),
                        );
                        return Err(TdnsError::ServersExhausted(name.to_string()));
                    }
                }
            }
            Err(TdnsError::IterationLimit(name.to_string()))
        })
    }

    /// Resolve missing nameserver addresses, A and AAAA in parallel.
    async fn fill_missing_addrs(self: &Arc<Self>, servers: &[Arc<AuthServer>]) {
        if servers.iter().any(|s| s.has_addrs()) {
            return;
        }
        let missing: Vec<Arc<AuthServer>> = servers
            .iter()
            .filter(|s| !s.has_addrs())
            .take(MAX_NS_ADDR_LOOKUPS)
            .cloned()
            .collect();
        for server in missing {
            let v4 = self.lookup_one(&server.name, RRType::A, true);
            let v6 = self.lookup_one(&server.name, RRType::AAAA, true);
            let (a, aaaa) = futures::join!(v4, v6);
            for entry in [a, aaaa].into_iter().flatten() {
                if let Some(set) = entry.rrset {
                    for rr in &set.rrs {
                        match &rr.rdata {
                            RData::A(ip) => server.add_addr((*ip).into()),
                            RData::Aaaa(ip) => server.add_addr((*ip).into()),
                            _ => {}
                        }
                    }
                }
            }
        }
    }

    /// Interpret a reply per the iteration rules.
    async fn classify(
        self: &Arc<Self>,
        zone: &Name,
        qname: &Name,
        qtype: RRType,
        reply: Message,
        cd: bool,
    ) -> Classified {
        // NXDOMAIN requires SOA proof in authority
        if reply.header.rcode == Rcode::NXDomain {
            let Some(soa_set) = collect_rrset_any_owner(&reply.authorities, RRType::SOA) else {
                debug!(qname = %qname, "NXDOMAIN without SOA, trying next server");
                return Classified::NextServer;
            };
            let ttl = negative_ttl(&soa_set);
            let mut entry = CachedRrset::negative(
                Rcode::NXDomain,
                CacheContext::NxDomain,
                ttl,
                vec![soa_set],
            );
            entry.state = self.validate_sets(&mut entry.neg_authority, cd).await;
            self.cache.insert(qname.clone(), qtype, entry.clone());
            return Classified::Done(entry);
        }
        if reply.header.rcode != Rcode::NoError {
            return Classified::NextServer;
        }

        // answer?
        if let Some(mut set) = collect_rrset(&reply.answers, qname, qtype) {
            let state = self.validate_one(&mut set, cd).await;
            let ttl = Duration::from_secs(set.ttl().max(1) as u64);
            let mut entry = CachedRrset::positive(set, CacheContext::Answer, ttl);
            entry.state = state;
            if state == ValidationState::Bogus {
                entry.ede = Some((EdeCode::DnssecBogus, format!("{} failed validation", qname)));
            }
            self.cache.insert(qname.clone(), qtype, entry.clone());
            return Classified::Done(entry);
        }
        if qtype != RRType::CNAME {
            if let Some(mut set) = collect_rrset(&reply.answers, qname, RRType::CNAME) {
                let state = self.validate_one(&mut set, cd).await;
                let ttl = Duration::from_secs(set.ttl().max(1) as u64);
                let mut entry = CachedRrset::positive(set, CacheContext::Answer, ttl);
                entry.state = state;
                self.cache.insert(qname.clone(), RRType::CNAME, entry.clone());
                return Classified::Done(entry);
            }
        }

        // referral?
        if let Some(ns_set) = collect_ns_below(&reply.authorities, zone) {
            self.ingest_referral(&ns_set, &reply);
            return Classified::Deeper;
        }

        // NODATA with SOA proof
        if let Some(soa_set) = collect_rrset_any_owner(&reply.authorities, RRType::SOA) {
            let ttl = negative_ttl(&soa_set);
            let mut entry = CachedRrset::negative(
                Rcode::NoError,
                CacheContext::NoErrNoAns,
                ttl,
                vec![soa_set],
            );
            entry.state = self.validate_sets(&mut entry.neg_authority, cd).await;
            self.cache.insert(qname.clone(), qtype, entry.clone());
            return Classified::Done(entry);
        }

        Classified::NextServer
    }

    /// Feed a referral into the server map and caches.
    fn ingest_referral(self: &Arc<Self>, ns_set: &Rrset, reply: &Message) {
        let child_zone = ns_set.name.clone();
        let mut ns_names = Vec::new();
        for rr in &ns_set.rrs {
            let RData::Ns(target) = &rr.rdata else {
                continue;
            };
            ns_names.push(target.clone());
            let server = self.servers.get_or_create(target, ServerSource::Referral);
            // glue addresses
            for glue in &reply.additionals {
                if glue.name != *target {
                    continue;
                }
                match &glue.rdata {
                    RData::A(ip) => server.add_addr((*ip).into()),
                    RData::Aaaa(ip) => server.add_addr((*ip).into()),
                    _ => {}
                }
            }
            // SVCB-shaped transport signaling in the additional section
            for extra in &reply.additionals {
                if extra.name != *target {
                    continue;
                }
                if let RData::Svcb(svcb) | RData::Https(svcb) | RData::Deleg(svcb) = &extra.rdata {
                    server.note_alpn(&svcb.alpn());
                    for hint in svcb.addr_hints() {
                        server.add_addr(hint);
                    }
                    if self.policy == TransportPolicy::AlwaysQueryForTransport {
                        self.spawn_tlsa_probe(server.clone());
                    }
                }
            }
            // cache the glue under its own name
            for rtype in [RRType::A, RRType::AAAA] {
                if let Some(set) = collect_rrset(&reply.additionals, target, rtype) {
                    let ttl = Duration::from_secs(set.ttl().max(1) as u64);
                    self.cache.insert(
                        target.clone(),
                        rtype,
                        CachedRrset::positive(set, CacheContext::Glue, ttl),
                    );
                }
            }
        }
        let ttl = Duration::from_secs(ns_set.ttl().max(1) as u64);
        self.servers.set_zone_servers(child_zone.clone(), ns_names, ttl);
        self.cache.insert(
            child_zone.clone(),
            RRType::NS,
            CachedRrset::positive(ns_set.clone(), CacheContext::Referral, ttl),
        );
        debug!(zone = %child_zone, "referral ingested");
    }

    /// DANE probes at `_853._tcp.<ns>` and `_853._udp.<ns>`.
    fn spawn_tlsa_probe(self: &Arc<Self>, server: Arc<AuthServer>) {
        let imr = self.clone();
        tokio::spawn(async move {
            for proto in ["_tcp", "_udp"] {
                let probe_name = server.name.prepend(proto).prepend("_853");
                if let Ok(entry) = imr.lookup_one(&probe_name, RRType::TLSA, true).await {
                    if let Some(set) = entry.rrset {
                        let mut dane = server.dane.write();
                        for rr in &set.rrs {
                            if let RData::Tlsa(t) = &rr.rdata {
                                if !dane.contains(t) {
                                    dane.push(t.clone());
                                }
                            }
                        }
                        if !dane.is_empty() {
                            debug!(server = %server.name, pins = dane.len(), "DANE pins learned");
                        }
                    }
                }
            }
        });
    }

    async fn validate_one(self: &Arc<Self>, set: &mut Rrset, cd: bool) -> ValidationState {
        if cd {
            return ValidationState::None;
        }
        if set.rrsigs.is_empty() {
            return ValidationState::Insecure;
        }
        let signer = set.rrsigs.iter().find_map(|rr| match &rr.rdata {
            RData::Rrsig(sig) => Some(sig.signer.clone()),
            _ => None,
        });
        let Some(signer) = signer else {
            return ValidationState::Bogus;
        };
        match self.ensure_validated_keys(&signer, 0).await {
            Ok(true) => self.validator.validate_answer(set),
            Ok(false) => ValidationState::Insecure,
            Err(e) => {
                warn!(signer = %signer, error = %e, "chain validation failed");
                ValidationState::Bogus
            }
        }
    }

    async fn validate_sets(self: &Arc<Self>, sets: &mut [Rrset], cd: bool) -> ValidationState {
        let mut state = ValidationState::None;
        for set in sets {
            state = combine_state(state, self.validate_one(set, cd).await);
        }
        state
    }

    /// Make sure `zone`'s DNSKEY RRset is validated, chaining DS through
    /// the parent up to a configured anchor. Returns Ok(false) for a
    /// provably unsigned (insecure) zone.
    fn ensure_validated_keys<'a>(
        self: &'a Arc<Self>,
        zone: &'a Name,
        depth: u8,
    ) -> Pin<Box<dyn Future<Output = Result<bool>> + Send + 'a>> {
        Box::pin(async move {
            if depth > 16 {
                return Err(TdnsError::DnssecError {
                    code: EdeCode::DnssecBogus,
                    reason: "validation chain too deep".into(),
                });
            }
            let cached = self.dnskey_cache.keys_for(zone);
            if cached
                .iter()
                .any(|k| k.state == ValidationState::Secure)
            {
                return Ok(true);
            }

            let dnskey_entry = self.lookup_one(zone, RRType::DNSKEY, true).await?;
            let Some(dnskeys) = dnskey_entry.rrset else {
                return Ok(false);
            };

            if self.validator.has_anchor_for(zone) {
                self.validator.validate_dnskey_rrset(zone, &dnskeys, None)?;
                self.cache
                    .set_state(zone, RRType::DNSKEY, ValidationState::Secure);
                return Ok(true);
            }

            // fetch DS from the parent side
            let ds_entry = self.lookup_one(zone, RRType::DS, true).await?;
            let Some(ds_set) = ds_entry.rrset.clone() else {
                // no DS: provably insecure delegation
                return Ok(false);
            };
            let ds_signer = ds_set
                .rrsigs
                .iter()
                .find_map(|rr| match &rr.rdata {
                    RData::Rrsig(sig) => Some(sig.signer.clone()),
                    _ => None,
                })
                .or_else(|| zone.parent());
            let Some(parent) = ds_signer else {
                return Ok(false);
            };
            if !self.ensure_validated_keys(&parent, depth + 1).await? {
                return Ok(false);
            }
            if self.validator.validate_answer(&ds_set) != ValidationState::Secure {
                return Err(TdnsError::DnssecError {
                    code: EdeCode::DnssecBogus,
                    reason: format!("DS RRset for {} failed validation", zone),
                });
            }
            let ds_list: Vec<_> = ds_set
                .rrs
                .iter()
                .filter_map(|rr| match &rr.rdata {
                    RData::Ds(d) => Some(d.clone()),
                    _ => None,
                })
                .collect();
            self.validator
                .validate_dnskey_rrset(zone, &dnskeys, Some(&ds_list))?;
            Ok(true)
        })
    }
}

fn combine_state(a: ValidationState, b: ValidationState) -> ValidationState {
    use ValidationState::*;
    match (a, b) {
        (Bogus, _) | (_, Bogus) => Bogus,
        (Insecure, _) | (_, Insecure) => Insecure,
        (Indeterminate, _) | (_, Indeterminate) => Indeterminate,
        (None, other) => other,
        (other, None) => other,
        (Secure, Secure) => Secure,
    }
}

/// Group records at (owner, rtype) into an RRset with covering RRSIGs.
fn collect_rrset(records: &[ResourceRecord], owner: &Name, rtype: RRType) -> Option<Rrset> {
    let mut set = Rrset::new(owner.clone(), rtype);
    for rr in records {
        if rr.name == *owner && rr.rtype == rtype {
            set.rrs.push(rr.clone());
        }
    }
    if set.rrs.is_empty() {
        return None;
    }
    for rr in records {
        if rr.name != *owner || rr.rtype != RRType::RRSIG {
            continue;
        }
        if let RData::Rrsig(sig) = &rr.rdata {
            if sig.type_covered == rtype {
                set.rrsigs.push(rr.clone());
            }
        }
    }
    Some(set)
}

/// First RRset of `rtype` in a section, regardless of owner.
fn collect_rrset_any_owner(records: &[ResourceRecord], rtype: RRType) -> Option<Rrset> {
    let owner = records.iter().find(|rr| rr.rtype == rtype)?.name.clone();
    collect_rrset(records, &owner, rtype)
}

/// An NS set in the authority section delegating below the zone we just
/// asked.
fn collect_ns_below(authorities: &[ResourceRecord], zone: &Name) -> Option<Rrset> {
    let owner = authorities
        .iter()
        .find(|rr| {
            rr.rtype == RRType::NS && rr.name.is_subdomain_of(zone) && rr.name != *zone
        })?
        .name
        .clone();
    collect_rrset(authorities, &owner, RRType::NS)
}

/// Negative TTL: min(SOA TTL, SOA minimum), per RFC 2308.
fn negative_ttl(soa_set: &Rrset) -> Duration {
    let minimum = soa_set
        .rrs
        .first()
        .and_then(|rr| match &rr.rdata {
            RData::Soa(soa) => Some(soa.minimum),
            _ => None,
        })
        .unwrap_or(60);
    Duration::from_secs(minimum.min(soa_set.ttl().max(1)).max(1) as u64)
}
