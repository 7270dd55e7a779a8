//! Per-nameserver descriptors and the zone → servers map.
//!
//! One shared `AuthServer` instance exists per nameserver name; address
//! additions are idempotent, and ALPN announcements learned from SVCB
//! glue upgrade the preferred transport.

use crate::dns::name::Name;
use crate::dns::rdata::TlsaData;
use dashmap::DashMap;
use parking_lot::RwLock;
use std::net::IpAddr;
use std::sync::Arc;
use std::time::{Duration, Instant};

#[derive(Copy, Clone, Debug, Default, PartialEq, Eq)]
pub enum Transport {
    #[default]
    Do53,
    DoT,
    DoH,
    DoQ,
}

impl Transport {
    pub fn from_alpn(alpn: &str) -> Option<Self> {
        match alpn {
            "dot" => Some(Transport::DoT),
            "doq" => Some(Transport::DoQ),
            "h2" | "h3" | "doh" => Some(Transport::DoH),
            _ => None,
        }
    }

    pub fn default_port(self) -> u16 {
        match self {
            Transport::Do53 => 53,
            Transport::DoT | Transport::DoQ => 853,
            Transport::DoH => 443,
        }
    }
}

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum ServerSource {
    Hint,
    Answer,
    Referral,
    Configured,
}

/// Everything we know about one authoritative nameserver.
#[derive(Debug)]
pub struct AuthServer {
    pub name: Name,
    pub addrs: RwLock<Vec<IpAddr>>,
    pub alpn: RwLock<Vec<String>>,
    pub transports: RwLock<Vec<Transport>>,
    pub pref_transport: RwLock<Transport>,
    pub src: RwLock<ServerSource>,
    pub expire: RwLock<Instant>,
    /// DANE pins learned from `_853._tcp/_udp.<ns>` TLSA probes.
    pub dane: RwLock<Vec<TlsaData>>,
}

impl AuthServer {
    fn new(name: Name, src: ServerSource) -> Self {
        Self {
            name,
            addrs: RwLock::new(Vec::new()),
            alpn: RwLock::new(Vec::new()),
            transports: RwLock::new(vec![Transport::Do53]),
            pref_transport: RwLock::new(Transport::Do53),
            src: RwLock::new(src),
            expire: RwLock::new(Instant::now() + Duration::from_secs(3600)),
            dane: RwLock::new(Vec::new()),
        }
    }

    /// Idempotent address add.
    pub fn add_addr(&self, addr: IpAddr) {
        let mut addrs = self.addrs.write();
        if !addrs.contains(&addr) {
            addrs.push(addr);
        }
    }

    pub fn addrs(&self) -> Vec<IpAddr> {
        self.addrs.read().clone()
    }

    pub fn has_addrs(&self) -> bool {
        !self.addrs.read().is_empty()
    }

    /// Record an ALPN announcement; the first announced protocol becomes
    /// the preferred transport.
    pub fn note_alpn(&self, alpn_ids: &[String]) {
        if alpn_ids.is_empty() {
            return;
        }
        let mut stored = self.alpn.write();
        for id in alpn_ids {
            if !stored.contains(id) {
                stored.push(id.clone());
            }
        }
        drop(stored);

        let mut transports = self.transports.write();
        let mut first: Option<Transport> = None;
        for id in alpn_ids {
            if let Some(t) = Transport::from_alpn(id) {
                if !transports.contains(&t) {
                    transports.push(t);
                }
                first.get_or_insert(t);
            }
        }
        drop(transports);
        if let Some(t) = first {
            *self.pref_transport.write() = t;
        }
    }
}

#[derive(Clone, Debug)]
struct ZoneServers {
    ns: Vec<Name>,
    expire: Instant,
}

/// The map the iteration loop walks: nameserver objects shared by name,
/// plus zone → nameserver-set entries.
#[derive(Default)]
pub struct AuthServerMap {
    servers: DashMap<Name, Arc<AuthServer>>,
    zones: DashMap<Name, ZoneServers>,
}

impl AuthServerMap {
    pub fn new() -> Self {
        Self::default()
    }

    /// The process-wide shared instance for a nameserver name.
    pub fn get_or_create(&self, name: &Name, src: ServerSource) -> Arc<AuthServer> {
        self.servers
            .entry(name.clone())
            .or_insert_with(|| Arc::new(AuthServer::new(name.clone(), src)))
            .value()
            .clone()
    }

    pub fn get(&self, name: &Name) -> Option<Arc<AuthServer>> {
        self.servers.get(name).map(|e| e.value().clone())
    }

    pub fn set_zone_servers(&self, zone: Name, ns: Vec<Name>, ttl: Duration) {
        self.zones.insert(
            zone,
            ZoneServers {
                ns,
                expire: Instant::now() + ttl,
            },
        );
    }

    /// Closest enclosing zone of `qname` with a known server set,
    /// walking from the name toward the root.
    pub fn closest_zone(&self, qname: &Name) -> Option<(Name, Vec<Arc<AuthServer>>)> {
        let mut candidate = Some(qname.clone());
        while let Some(name) = candidate {
            if let Some(entry) = self.zones.get(&name) {
                if entry.expire > Instant::now() {
                    let servers = entry
                        .ns
                        .iter()
                        .filter_map(|ns| self.get(ns))
                        .collect::<Vec<_>>();
                    if !servers.is_empty() {
                        return Some((name.clone(), servers));
                    }
                }
            }
            candidate = name.parent();
        }
        // the root entry has no parent to fall back to
        let root = Name::root();
        self.zones.get(&root).and_then(|entry| {
            let servers: Vec<_> = entry.ns.iter().filter_map(|ns| self.get(ns)).collect();
            (!servers.is_empty()).then(|| (root, servers))
        })
    }
}
