//! Root hints and trust-anchor files.
//!
//! Both use master-file syntax: the hints file carries the root NS set
//! and their addresses, the anchor file a list of DS and/or DNSKEY
//! records (usually for the root).

use crate::dns::name::Name;
use crate::dns::rdata::{DnskeyData, DsData, RData};
use crate::error::{Result, TdnsError};
use crate::resolver::authserver::{AuthServerMap, ServerSource};
use crate::zone::parser::ZoneFileParser;
use std::path::Path;
use tracing::{info, warn};

/// A configured trust anchor: either a DS or a bare DNSKEY.
#[derive(Clone, Debug)]
pub enum TrustAnchor {
    Ds { name: Name, data: DsData },
    Key { name: Name, key: DnskeyData },
}

impl TrustAnchor {
    pub fn name(&self) -> &Name {
        match self {
            TrustAnchor::Ds { name, .. } => name,
            TrustAnchor::Key { name, .. } => name,
        }
    }
}

/// Load root hints into the server map: root NS names with Src=Hint and
/// their A/AAAA addresses, plus the root zone entry itself.
pub fn load_root_hints(path: &Path, servers: &AuthServerMap) -> Result<usize> {
    let mut parser = ZoneFileParser::with_origin(Name::root());
    let parsed = parser.parse_file(path)?;

    let mut ns_names = Vec::new();
    for rr in &parsed.records {
        match &rr.rdata {
            RData::Ns(target) if rr.name.is_root() => {
                ns_names.push(target.clone());
                servers.get_or_create(target, ServerSource::Hint);
            }
            RData::A(addr) => {
                servers
                    .get_or_create(&rr.name, ServerSource::Hint)
                    .add_addr((*addr).into());
            }
            RData::Aaaa(addr) => {
                servers
                    .get_or_create(&rr.name, ServerSource::Hint)
                    .add_addr((*addr).into());
            }
            _ => {}
        }
    }
    if ns_names.is_empty() {
        return Err(TdnsError::Config(format!(
            "root hints file {} has no root NS records",
            path.display()
        )));
    }
    let count = ns_names.len();
    servers.set_zone_servers(Name::root(), ns_names, std::time::Duration::from_secs(6 * 3600));
    info!(file = %path.display(), servers = count, "root hints loaded");
    Ok(count)
}

/// Parse a trust-anchor file: DS and DNSKEY records in master form.
pub fn load_trust_anchors(path: &Path) -> Result<Vec<TrustAnchor>> {
    let mut parser = ZoneFileParser::with_origin(Name::root());
    let parsed = parser.parse_file(path)?;

    let mut anchors = Vec::new();
    for rr in parsed.records {
        match rr.rdata {
            RData::Ds(data) => anchors.push(TrustAnchor::Ds {
                name: rr.name,
                data,
            }),
            RData::Dnskey(key) => anchors.push(TrustAnchor::Key {
                name: rr.name,
                key,
            }),
            _ => {
                warn!(owner = %rr.name, rtype = %rr.rtype, "ignoring non-anchor record in anchor file");
            }
        }
    }
    if anchors.is_empty() {
        return Err(TdnsError::Config(format!(
            "trust anchor file {} holds no DS or DNSKEY records",
            path.display()
        )));
    }
    info!(file = %path.display(), anchors = anchors.len(), "trust anchors loaded");
    Ok(anchors)
}

/// Anchors applying to a zone name.
pub fn anchors_for<'a>(anchors: &'a [TrustAnchor], zone: &Name) -> Vec<&'a TrustAnchor> {
    anchors.iter().filter(|a| a.name() == zone).collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    const HINTS: &str = r#"
.                        3600000      NS    A.ROOT-SERVERS.NET.
A.ROOT-SERVERS.NET.      3600000      A     198.41.0.4
A.ROOT-SERVERS.NET.      3600000      AAAA  2001:503:ba3e::2:30
.                        3600000      NS    B.ROOT-SERVERS.NET.
B.ROOT-SERVERS.NET.      3600000      A     170.247.170.2
"#;

    const ANCHORS: &str = r#"
.  IN DS 20326 8 2 E06D44B80B8F1D39A95C0B0D7C65D08458E880409BBC683457104237C7F8EC8D
"#;

    #[test]
    fn test_load_hints() {
        let mut f = tempfile::NamedTempFile::new().unwrap();
        f.write_all(HINTS.as_bytes()).unwrap();
        let servers = AuthServerMap::new();
        let count = load_root_hints(f.path(), &servers).unwrap();
        assert_eq!(count, 2);

        let (zone, list) = servers.closest_zone(&Name::parse("example.com").unwrap()).unwrap();
        assert!(zone.is_root());
        assert_eq!(list.len(), 2);
        assert!(list.iter().any(|s| s.has_addrs()));
        assert_eq!(
            *list[0].src.read(),
            ServerSource::Hint
        );
    }

    #[test]
    fn test_load_anchor_file() {
        let mut f = tempfile::NamedTempFile::new().unwrap();
        f.write_all(ANCHORS.as_bytes()).unwrap();
        let anchors = load_trust_anchors(f.path()).unwrap();
        assert_eq!(anchors.len(), 1);
        match &anchors[0] {
            TrustAnchor::Ds { name, data } => {
                assert!(name.is_root());
                assert_eq!(data.key_tag, 20326);
                assert_eq!(data.digest_type, 2);
            }
            other => panic!("expected DS anchor, got {:?}", other),
        }
    }
}
