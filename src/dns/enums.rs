use serde::{Deserialize, Serialize};

/// DNS RR types understood by this server.
///
/// The private-use types carried for delegation synchronisation (DSYNC,
/// DELEG, HSYNC, HSYNC2, MSIGNER and the legacy NOTIFY RR) keep their
/// assigned private-use code points. Everything else falls through to
/// `Unknown`, whose rdata is stored and forwarded opaquely.
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum RRType {
    A,
    NS,
    CNAME,
    SOA,
    PTR,
    MX,
    TXT,
    AAAA,
    SRV,
    OPT,
    DS,
    SIG,
    KEY,
    RRSIG,
    NSEC,
    DNSKEY,
    NSEC3,
    NSEC3PARAM,
    TLSA,
    CDS,
    CDNSKEY,
    CSYNC,
    ZONEMD,
    SVCB,
    HTTPS,
    DSYNC,
    HSYNC,
    HSYNC2,
    MSIGNER,
    /// Legacy notification-target RR, superseded by DSYNC.
    NOTIFY,
    DELEG,
    AXFR,
    IXFR,
    #[default]
    ANY,
    Unknown(u16),
}

impl From<u16> for RRType {
    fn from(value: u16) -> Self {
        match value {
            1 => RRType::A,
            2 => RRType::NS,
            5 => RRType::CNAME,
            6 => RRType::SOA,
            12 => RRType::PTR,
            15 => RRType::MX,
            16 => RRType::TXT,
            24 => RRType::SIG,
            25 => RRType::KEY,
            28 => RRType::AAAA,
            33 => RRType::SRV,
            41 => RRType::OPT,
            43 => RRType::DS,
            46 => RRType::RRSIG,
            47 => RRType::NSEC,
            48 => RRType::DNSKEY,
            50 => RRType::NSEC3,
            51 => RRType::NSEC3PARAM,
            52 => RRType::TLSA,
            59 => RRType::CDS,
            60 => RRType::CDNSKEY,
            62 => RRType::CSYNC,
            63 => RRType::ZONEMD,
            64 => RRType::SVCB,
            65 => RRType::HTTPS,
            66 => RRType::DSYNC,
            252 => RRType::AXFR,
            254 => RRType::IXFR,
            255 => RRType::ANY,
            0x0F9A => RRType::NOTIFY,
            0x0F9C => RRType::MSIGNER,
            0x0F9D => RRType::HSYNC,
            0x0F9E => RRType::HSYNC2,
            65287 => RRType::DELEG,
            other => RRType::Unknown(other),
        }
    }
}

impl From<RRType> for u16 {
    fn from(value: RRType) -> Self {
        match value {
            RRType::A => 1,
            RRType::NS => 2,
            RRType::CNAME => 5,
            RRType::SOA => 6,
            RRType::PTR => 12,
            RRType::MX => 15,
            RRType::TXT => 16,
            RRType::SIG => 24,
            RRType::KEY => 25,
            RRType::AAAA => 28,
            RRType::SRV => 33,
            RRType::OPT => 41,
            RRType::DS => 43,
            RRType::RRSIG => 46,
            RRType::NSEC => 47,
            RRType::DNSKEY => 48,
            RRType::NSEC3 => 50,
            RRType::NSEC3PARAM => 51,
            RRType::TLSA => 52,
            RRType::CDS => 59,
            RRType::CDNSKEY => 60,
            RRType::CSYNC => 62,
            RRType::ZONEMD => 63,
            RRType::SVCB => 64,
            RRType::HTTPS => 65,
            RRType::DSYNC => 66,
            RRType::AXFR => 252,
            RRType::IXFR => 254,
            RRType::ANY => 255,
            RRType::NOTIFY => 0x0F9A,
            RRType::MSIGNER => 0x0F9C,
            RRType::HSYNC => 0x0F9D,
            RRType::HSYNC2 => 0x0F9E,
            RRType::DELEG => 65287,
            RRType::Unknown(other) => other,
        }
    }
}

impl RRType {
    /// Parse the mnemonic used in master files and config.
    pub fn from_mnemonic(s: &str) -> Option<Self> {
        let t = match s.to_ascii_uppercase().as_str() {
            "A" => RRType::A,
            "NS" => RRType::NS,
            "CNAME" => RRType::CNAME,
            "SOA" => RRType::SOA,
            "PTR" => RRType::PTR,
            "MX" => RRType::MX,
            "TXT" => RRType::TXT,
            "SIG" => RRType::SIG,
            "KEY" => RRType::KEY,
            "AAAA" => RRType::AAAA,
            "SRV" => RRType::SRV,
            "DS" => RRType::DS,
            "RRSIG" => RRType::RRSIG,
            "NSEC" => RRType::NSEC,
            "DNSKEY" => RRType::DNSKEY,
            "NSEC3" => RRType::NSEC3,
            "NSEC3PARAM" => RRType::NSEC3PARAM,
            "TLSA" => RRType::TLSA,
            "CDS" => RRType::CDS,
            "CDNSKEY" => RRType::CDNSKEY,
            "CSYNC" => RRType::CSYNC,
            "ZONEMD" => RRType::ZONEMD,
            "SVCB" => RRType::SVCB,
            "HTTPS" => RRType::HTTPS,
            "DSYNC" => RRType::DSYNC,
            "HSYNC" => RRType::HSYNC,
            "HSYNC2" => RRType::HSYNC2,
            "MSIGNER" => RRType::MSIGNER,
            "NOTIFY" => RRType::NOTIFY,
            "DELEG" => RRType::DELEG,
            "ANY" => RRType::ANY,
            other => {
                // RFC 3597 TYPE12345 syntax
                if let Some(num) = other.strip_prefix("TYPE") {
                    return num.parse::<u16>().ok().map(RRType::from);
                }
                return None;
            }
        };
        Some(t)
    }
}

impl std::fmt::Display for RRType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            RRType::Unknown(code) => write!(f, "TYPE{}", code),
            other => write!(f, "{:?}", other),
        }
    }
}

/// DNS classes. NONE and ANY matter here beyond plain queries: RFC 2136
/// encodes update semantics in the class field (INET=add, NONE=delete
/// exact RR, ANY=delete RRset).
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum RRClass {
    #[default]
    IN,
    CH,
    HS,
    NONE,
    ANY,
    Unknown(u16),
}

impl From<u16> for RRClass {
    fn from(value: u16) -> Self {
        match value {
            1 => RRClass::IN,
            3 => RRClass::CH,
            4 => RRClass::HS,
            254 => RRClass::NONE,
            255 => RRClass::ANY,
            other => RRClass::Unknown(other),
        }
    }
}

impl From<RRClass> for u16 {
    fn from(value: RRClass) -> Self {
        match value {
            RRClass::IN => 1,
            RRClass::CH => 3,
            RRClass::HS => 4,
            RRClass::NONE => 254,
            RRClass::ANY => 255,
            RRClass::Unknown(other) => other,
        }
    }
}

impl std::fmt::Display for RRClass {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            RRClass::Unknown(code) => write!(f, "CLASS{}", code),
            other => write!(f, "{:?}", other),
        }
    }
}

/// DNS opcodes (RFC 1035, 1996, 2136).
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq)]
pub enum Opcode {
    #[default]
    Query,
    Status,
    Notify,
    Update,
    Unknown(u8),
}

impl From<u8> for Opcode {
    fn from(value: u8) -> Self {
        match value {
            0 => Opcode::Query,
            2 => Opcode::Status,
            4 => Opcode::Notify,
            5 => Opcode::Update,
            other => Opcode::Unknown(other),
        }
    }
}

impl From<Opcode> for u8 {
    fn from(value: Opcode) -> Self {
        match value {
            Opcode::Query => 0,
            Opcode::Status => 2,
            Opcode::Notify => 4,
            Opcode::Update => 5,
            Opcode::Unknown(other) => other,
        }
    }
}

/// Response codes, including the RFC 2136 update set and BADSIG (16),
/// which SIG(0) failures surface with.
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq)]
pub enum Rcode {
    #[default]
    NoError,
    FormErr,
    ServFail,
    NXDomain,
    NotImp,
    Refused,
    YXDomain,
    YXRRSet,
    NXRRSet,
    NotAuth,
    NotZone,
    BadSig,
    Unknown(u8),
}

impl From<u8> for Rcode {
    fn from(value: u8) -> Self {
        match value {
            0 => Rcode::NoError,
            1 => Rcode::FormErr,
            2 => Rcode::ServFail,
            3 => Rcode::NXDomain,
            4 => Rcode::NotImp,
            5 => Rcode::Refused,
            6 => Rcode::YXDomain,
            7 => Rcode::YXRRSet,
            8 => Rcode::NXRRSet,
            9 => Rcode::NotAuth,
            10 => Rcode::NotZone,
            16 => Rcode::BadSig,
            other => Rcode::Unknown(other),
        }
    }
}

impl From<Rcode> for u8 {
    fn from(value: Rcode) -> Self {
        match value {
            Rcode::NoError => 0,
            Rcode::FormErr => 1,
            Rcode::ServFail => 2,
            Rcode::NXDomain => 3,
            Rcode::NotImp => 4,
            Rcode::Refused => 5,
            Rcode::YXDomain => 6,
            Rcode::YXRRSet => 7,
            Rcode::NXRRSet => 8,
            Rcode::NotAuth => 9,
            Rcode::NotZone => 10,
            Rcode::BadSig => 16,
            Rcode::Unknown(other) => other,
        }
    }
}

impl Rcode {
    pub fn is_success(self) -> bool {
        matches!(self, Rcode::NoError)
    }
}

impl std::fmt::Display for Rcode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Rcode::NoError => "NOERROR",
            Rcode::FormErr => "FORMERR",
            Rcode::ServFail => "SERVFAIL",
            Rcode::NXDomain => "NXDOMAIN",
            Rcode::NotImp => "NOTIMP",
            Rcode::Refused => "REFUSED",
            Rcode::YXDomain => "YXDOMAIN",
            Rcode::YXRRSet => "YXRRSET",
            Rcode::NXRRSet => "NXRRSET",
            Rcode::NotAuth => "NOTAUTH",
            Rcode::NotZone => "NOTZONE",
            Rcode::BadSig => "BADSIG",
            Rcode::Unknown(code) => return write!(f, "RCODE{}", code),
        };
        f.write_str(s)
    }
}

/// Extended DNS Error codes (RFC 8914) attached via EDNS0.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum EdeCode {
    OtherError,
    DnssecBogus,
    SignatureExpired,
    SignatureNotYetValid,
    DnskeyMissing,
    RrsigsMissing,
    NoZoneKeyBitSet,
    NsecMissing,
    NetworkError,
    Unknown(u16),
}

impl From<u16> for EdeCode {
    fn from(value: u16) -> Self {
        match value {
            0 => EdeCode::OtherError,
            6 => EdeCode::DnssecBogus,
            7 => EdeCode::SignatureExpired,
            8 => EdeCode::SignatureNotYetValid,
            9 => EdeCode::DnskeyMissing,
            10 => EdeCode::RrsigsMissing,
            11 => EdeCode::NoZoneKeyBitSet,
            12 => EdeCode::NsecMissing,
            23 => EdeCode::NetworkError,
            other => EdeCode::Unknown(other),
        }
    }
}

impl From<EdeCode> for u16 {
    fn from(value: EdeCode) -> Self {
        match value {
            EdeCode::OtherError => 0,
            EdeCode::DnssecBogus => 6,
            EdeCode::SignatureExpired => 7,
            EdeCode::SignatureNotYetValid => 8,
            EdeCode::DnskeyMissing => 9,
            EdeCode::RrsigsMissing => 10,
            EdeCode::NoZoneKeyBitSet => 11,
            EdeCode::NsecMissing => 12,
            EdeCode::NetworkError => 23,
            EdeCode::Unknown(other) => other,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_rrtype_roundtrip() {
        for code in [1u16, 2, 6, 28, 46, 48, 62, 66, 0x0F9A, 0x0F9C, 0x0F9D, 0x0F9E, 65287] {
            let t = RRType::from(code);
            assert_ne!(t, RRType::Unknown(code));
            assert_eq!(u16::from(t), code);
        }
        assert_eq!(u16::from(RRType::Unknown(4242)), 4242);
    }

    #[test]
    fn test_rrtype_mnemonic() {
        assert_eq!(RRType::from_mnemonic("dsync"), Some(RRType::DSYNC));
        assert_eq!(RRType::from_mnemonic("HSYNC2"), Some(RRType::HSYNC2));
        assert_eq!(
            RRType::from_mnemonic("TYPE65280"),
            Some(RRType::Unknown(65280))
        );
        assert_eq!(RRType::from_mnemonic("NOSUCH"), None);
    }

    #[test]
    fn test_update_classes() {
        assert_eq!(RRClass::from(254), RRClass::NONE);
        assert_eq!(RRClass::from(255), RRClass::ANY);
        assert_eq!(u16::from(RRClass::NONE), 254);
    }
}
