//! Server configuration: TOML file, validated at startup. Validation
//! failures are fatal.

use crate::delegation::parent::SyncScheme;
use crate::dns::name::Name;
use crate::error::{Result, TdnsError};
use crate::resolver::ImrConfig;
use crate::update::policy::UpdatePolicy;
use crate::zone::zone::{StoreKind, ZoneOptions, ZoneType};
use serde::Deserialize;
use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use tracing::info;

#[derive(Clone, Debug, Deserialize, Default)]
#[serde(default, rename_all = "kebab-case")]
pub struct Config {
    pub server: ListenConfig,
    pub resolver: ImrConfig,
    pub keystore: KeyStoreConfig,
    pub admin: AdminConfig,
    pub signing: SigningConfig,
    pub delegation_sync: DelegationSyncConfig,
    pub zones: Vec<ZoneConfig>,
}

#[derive(Clone, Debug, Deserialize)]
#[serde(default, rename_all = "kebab-case")]
pub struct ListenConfig {
    pub udp: Vec<SocketAddr>,
    pub tcp: Vec<SocketAddr>,
    pub dot: Vec<SocketAddr>,
    pub doh: Vec<SocketAddr>,
    pub doq: Vec<SocketAddr>,
    pub tls_cert: Option<PathBuf>,
    pub tls_key: Option<PathBuf>,
}

impl Default for ListenConfig {
    fn default() -> Self {
        Self {
            udp: vec!["127.0.0.1:5353".parse().unwrap()],
            tcp: vec!["127.0.0.1:5353".parse().unwrap()],
            dot: Vec::new(),
            doh: Vec::new(),
            doq: Vec::new(),
            tls_cert: None,
            tls_key: None,
        }
    }
}

#[derive(Clone, Debug, Deserialize)]
#[serde(default, rename_all = "kebab-case")]
pub struct KeyStoreConfig {
    pub path: PathBuf,
}

impl Default for KeyStoreConfig {
    fn default() -> Self {
        Self {
            path: PathBuf::from("tdns-keys.db"),
        }
    }
}

#[derive(Clone, Debug, Default, Deserialize)]
#[serde(default, rename_all = "kebab-case")]
pub struct AdminConfig {
    pub listen: Option<SocketAddr>,
}

#[derive(Clone, Debug, Deserialize)]
#[serde(default, rename_all = "kebab-case")]
pub struct SigningConfig {
    /// RRSIG validity in days.
    pub validity_days: u64,
}

impl Default for SigningConfig {
    fn default() -> Self {
        Self { validity_days: 14 }
    }
}

#[derive(Clone, Debug, Default, Deserialize)]
#[serde(default, rename_all = "kebab-case")]
pub struct DelegationSyncConfig {
    pub scheme: SyncScheme,
}

#[derive(Clone, Debug, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct ZoneConfig {
    pub name: String,
    #[serde(rename = "type")]
    pub ztype: ZoneType,
    #[serde(default)]
    pub store: StoreKind,
    pub file: Option<PathBuf>,
    pub primary: Option<SocketAddr>,
    #[serde(default)]
    pub options: ZoneOptions,
    #[serde(default)]
    pub update_policy: UpdatePolicy,
    /// Downstream secondaries to NOTIFY on change.
    #[serde(default)]
    pub downstreams: Vec<SocketAddr>,
}

impl Config {
    pub fn load(path: &Path) -> Result<Self> {
        let contents = std::fs::read_to_string(path)
            .map_err(|e| TdnsError::Config(format!("read {}: {}", path.display(), e)))?;
        let config: Config = toml::from_str(&contents)
            .map_err(|e| TdnsError::Config(format!("parse {}: {}", path.display(), e)))?;
        config.validate()?;
        info!(file = %path.display(), zones = config.zones.len(), "configuration loaded");
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        if self.server.udp.is_empty()
            && self.server.tcp.is_empty()
            && self.server.dot.is_empty()
            && self.server.doh.is_empty()
            && self.server.doq.is_empty()
        {
            return Err(TdnsError::Config("no listeners configured".into()));
        }
        for zone in &self.zones {
            let name = Name::parse(&zone.name).map_err(|e| {
                TdnsError::InvalidZoneConfig(zone.name.clone(), e.to_string())
            })?;
            match zone.ztype {
                ZoneType::Primary if zone.file.is_none() && !zone.options.automatic_zone => {
                    return Err(TdnsError::InvalidZoneConfig(
                        name.to_string(),
                        "primary zone without a zone file".into(),
                    ));
                }
                ZoneType::Secondary if zone.primary.is_none() => {
                    return Err(TdnsError::InvalidZoneConfig(
                        name.to_string(),
                        "secondary zone without a primary".into(),
                    ));
                }
                _ => {}
            }
        }
        if self.resolver.enabled && self.resolver.root_hints.is_none() {
            return Err(TdnsError::Config(
                "resolver enabled without a root hints file".into(),
            ));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_minimal_config_parses() {
        let toml_src = r#"
[server]
udp = ["127.0.0.1:5300"]
tcp = ["127.0.0.1:5300"]

[[zones]]
name = "example.com"
type = "primary"
file = "example.com.zone"

[zones.options]
allow-updates = true
online-signing = true

[zones.update-policy.zone]
type = "selfsub"
rrtypes = ["A", "AAAA", "KEY"]
"#;
        let config: Config = toml::from_str(toml_src).unwrap();
        config.validate().unwrap();
        assert_eq!(config.zones.len(), 1);
        let zone = &config.zones[0];
        assert_eq!(zone.ztype, ZoneType::Primary);
        assert!(zone.options.allow_updates);
        assert!(zone.options.online_signing);
        assert_eq!(
            zone.update_policy.zone.ptype,
            crate::update::policy::PolicyType::SelfSub
        );
        assert!(zone
            .update_policy
            .zone
            .rrtypes
            .contains(&crate::dns::enums::RRType::KEY));
    }

    #[test]
    fn test_secondary_without_primary_rejected() {
        let toml_src = r#"
[[zones]]
name = "example.org"
type = "secondary"
"#;
        let config: Config = toml::from_str(toml_src).unwrap();
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_resolver_needs_hints() {
        let toml_src = r#"
[resolver]
enabled = true
"#;
        let config: Config = toml::from_str(toml_src).unwrap();
        assert!(config.validate().is_err());
    }
}
