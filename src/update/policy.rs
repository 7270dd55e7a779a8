//! Per-zone dynamic-update policy.
//!
//! Each zone carries two sub-policies: one for updates to the zone's own
//! authoritative data, one for updates to child delegations. Approval
//! checks every action RR against the allowed type set and the signer
//! identity rule (self / selfsub / none).

use crate::dns::enums::{RRClass, RRType};
use crate::dns::name::Name;
use crate::dns::record::ResourceRecord;
use serde::Deserialize;
use std::collections::HashSet;
use tracing::debug;

#[derive(Copy, Clone, Debug, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PolicyType {
    /// Signer may only touch records owned by its own name.
    #[serde(rename = "self")]
    SelfOnly,
    /// Signer may touch its own name and anything below it.
    SelfSub,
    /// Reject everything.
    #[default]
    None,
}

#[derive(Copy, Clone, Debug, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum KeyUpload {
    #[default]
    Validated,
    Unvalidated,
}

#[derive(Copy, Clone, Debug, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum KeyBootstrap {
    /// Keys only enter the trust store by operator action.
    #[default]
    StrictManual,
    /// Accept a self-signed upload, pending later validation.
    SelfSigned,
    /// Accept and verify over DNSSEC before trusting.
    DnssecValidated,
}

#[derive(Clone, Debug, Default, Deserialize)]
#[serde(default, rename_all = "kebab-case")]
pub struct SubPolicy {
    #[serde(rename = "type")]
    pub ptype: PolicyType,
    pub rrtypes: HashSet<RRType>,
    pub key_upload: KeyUpload,
    pub key_bootstrap: KeyBootstrap,
}

#[derive(Clone, Debug, Default, Deserialize)]
#[serde(default)]
pub struct UpdatePolicy {
    pub zone: SubPolicy,
    pub child: SubPolicy,
}

/// Why approval said no; logged verbatim and mapped to REFUSED.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum PolicyViolation {
    TypeNotAllowed(RRType),
    SignerMismatch { owner: String, signer: String },
    PolicyNone,
    Untrusted,
    ApexNsDeletion,
}

impl std::fmt::Display for PolicyViolation {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            PolicyViolation::TypeNotAllowed(t) => write!(f, "rrtype {} not in allowed set", t),
            PolicyViolation::SignerMismatch { owner, signer } => {
                write!(f, "owner {} not permitted for signer {}", owner, signer)
            }
            PolicyViolation::PolicyNone => f.write_str("policy type is none"),
            PolicyViolation::Untrusted => f.write_str("signer key is not trusted"),
            PolicyViolation::ApexNsDeletion => f.write_str("deleting the apex NS RRset"),
        }
    }
}

impl SubPolicy {
    /// Check one action against this policy. `signer` is the validated
    /// SIG(0) signer name, `trusted` its trust-store standing.
    pub fn approve(
        &self,
        zone_apex: &Name,
        action: &ResourceRecord,
        signer: Option<&Name>,
        trusted: bool,
    ) -> Result<(), PolicyViolation> {
        // removing the whole apex NS RRset would orphan the zone
        if action.rtype == RRType::NS
            && action.class == RRClass::ANY
            && action.name == *zone_apex
        {
            return Err(PolicyViolation::ApexNsDeletion);
        }

        if !self.rrtypes.contains(&action.rtype) {
            return Err(PolicyViolation::TypeNotAllowed(action.rtype));
        }

        match self.ptype {
            PolicyType::None => return Err(PolicyViolation::PolicyNone),
            PolicyType::SelfOnly => {
                let Some(signer) = signer else {
                    return Err(PolicyViolation::Untrusted);
                };
                if action.name != *signer {
                    return Err(PolicyViolation::SignerMismatch {
                        owner: action.name.to_string(),
                        signer: signer.to_string(),
                    });
                }
            }
            PolicyType::SelfSub => {
                let Some(signer) = signer else {
                    return Err(PolicyViolation::Untrusted);
                };
                if !action.name.is_subdomain_of(signer) {
                    return Err(PolicyViolation::SignerMismatch {
                        owner: action.name.to_string(),
                        signer: signer.to_string(),
                    });
                }
            }
        }

        if !trusted {
            return Err(PolicyViolation::Untrusted);
        }
        Ok(())
    }
}

impl UpdatePolicy {
    /// Pick the sub-policy based on whether the update targets a child
    /// delegation or the zone's own data, then approve every action.
    pub fn approve_all(
        &self,
        zone_apex: &Name,
        is_child_update: bool,
        actions: &[ResourceRecord],
        signer: Option<&Name>,
        trusted: bool,
    ) -> Result<(), PolicyViolation> {
        let policy = if is_child_update { &self.child } else { &self.zone };
        for action in actions {
            policy.approve(zone_apex, action, signer, trusted).map_err(|v| {
                debug!(zone = %zone_apex, action = %action.name, violation = %v, "update rejected");
                v
            })?;
        }
        Ok(())
    }

    /// The unvalidated key-upload escape hatch: exactly one KEY add and a
    /// child policy permitting unvalidated upload with a bootstrap mode
    /// other than strict-manual.
    pub fn allows_key_bootstrap(&self, actions: &[ResourceRecord]) -> bool {
        self.child.key_upload == KeyUpload::Unvalidated
            && self.child.key_bootstrap != KeyBootstrap::StrictManual
            && actions.len() == 1
            && actions[0].rtype == RRType::KEY
            && actions[0].class == RRClass::IN
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dns::rdata::{DnskeyData, RData};
    use std::net::Ipv4Addr;

    fn policy(ptype: PolicyType, types: &[RRType]) -> SubPolicy {
        SubPolicy {
            ptype,
            rrtypes: types.iter().copied().collect(),
            ..Default::default()
        }
    }

    fn a_action(owner: &str) -> ResourceRecord {
        ResourceRecord::new(
            Name::parse(owner).unwrap(),
            RRType::A,
            300,
            RData::A(Ipv4Addr::new(192, 0, 2, 12)),
        )
    }

    #[test]
    fn test_self_policy_owner_match() {
        let apex = Name::parse("example.com").unwrap();
        let p = policy(PolicyType::SelfOnly, &[RRType::A, RRType::AAAA]);
        let signer = Name::parse("admin.example.com").unwrap();

        assert!(p.approve(&apex, &a_action("admin.example.com"), Some(&signer), true).is_ok());
        assert!(matches!(
            p.approve(&apex, &a_action("other.example.net"), Some(&signer), true),
            Err(PolicyViolation::SignerMismatch { .. })
        ));
    }

    #[test]
    fn test_selfsub_policy() {
        let apex = Name::parse("example.com").unwrap();
        let p = policy(PolicyType::SelfSub, &[RRType::A]);
        let signer = Name::parse("child.example.com").unwrap();
        assert!(p.approve(&apex, &a_action("host.child.example.com"), Some(&signer), true).is_ok());
        assert!(p.approve(&apex, &a_action("www.example.com"), Some(&signer), true).is_err());
    }

    #[test]
    fn test_type_not_allowed() {
        let apex = Name::parse("example.com").unwrap();
        let p = policy(PolicyType::SelfOnly, &[RRType::AAAA]);
        let signer = Name::parse("admin.example.com").unwrap();
        assert_eq!(
            p.approve(&apex, &a_action("admin.example.com"), Some(&signer), true),
            Err(PolicyViolation::TypeNotAllowed(RRType::A))
        );
    }

    #[test]
    fn test_untrusted_rejected() {
        let apex = Name::parse("example.com").unwrap();
        let p = policy(PolicyType::SelfOnly, &[RRType::A]);
        let signer = Name::parse("admin.example.com").unwrap();
        assert_eq!(
            p.approve(&apex, &a_action("admin.example.com"), Some(&signer), false),
            Err(PolicyViolation::Untrusted)
        );
    }

    #[test]
    fn test_apex_ns_deletion_rejected() {
        let apex = Name::parse("example.com").unwrap();
        let p = policy(PolicyType::SelfSub, &[RRType::NS]);
        let signer = Name::parse("example.com").unwrap();
        let mut action = ResourceRecord::new(apex.clone(), RRType::NS, 0, RData::Empty);
        action.class = RRClass::ANY;
        assert_eq!(
            p.approve(&apex, &action, Some(&signer), true),
            Err(PolicyViolation::ApexNsDeletion)
        );
    }

    #[test]
    fn test_key_bootstrap_detection() {
        let mut up = UpdatePolicy::default();
        up.child.key_upload = KeyUpload::Unvalidated;
        up.child.key_bootstrap = KeyBootstrap::SelfSigned;

        let key = ResourceRecord::new(
            Name::parse("child.example.com").unwrap(),
            RRType::KEY,
            3600,
            RData::Key(DnskeyData {
                flags: 256,
                protocol: 3,
                algorithm: 15,
                public_key: vec![0; 32],
            }),
        );
        assert!(up.allows_key_bootstrap(std::slice::from_ref(&key)));
        // two actions disqualify the special case
        assert!(!up.allows_key_bootstrap(&[key.clone(), key.clone()]));
        // strict-manual disqualifies
        up.child.key_bootstrap = KeyBootstrap::StrictManual;
        assert!(!up.allows_key_bootstrap(std::slice::from_ref(&key)));
    }
}
