use crate::dns::enums::{EdeCode, Rcode};
use std::sync::Arc;
use thiserror::Error;

pub type Result<T> = std::result::Result<T, TdnsError>;

/// Unified error type for the whole server.
///
/// The variants follow the operational taxonomy: configuration errors are
/// fatal at startup, refresh/agent errors are logged and leave prior state
/// intact, DNSSEC failures surface to clients as SERVFAIL plus an EDE, and
/// update validation/policy failures map to an Rcode without mutating.
#[derive(Debug, Clone, Error)]
pub enum TdnsError {
    // IO
    #[error("IO error: {0}")]
    Io(String),
    #[error("IO error: {0}")]
    IoError(Arc<std::io::Error>),

    // Configuration (fatal at startup)
    #[error("Invalid bind address: {0}")]
    InvalidBindAddress(String),
    #[error("Invalid zone config for {0}: {1}")]
    InvalidZoneConfig(String, String),
    #[error("Configuration error: {0}")]
    Config(String),

    // Wire / presentation parsing
    #[error("Parse error: {0}")]
    ParseError(String),
    #[error("Zone file error: {0}")]
    ZoneFileError(String),

    // Zone state
    #[error("Zone not found: {0}")]
    ZoneNotFound(String),
    #[error("Zone {0} is frozen")]
    ZoneFrozen(String),
    #[error("Zone {0} has unsaved updates; reload requires force")]
    ZoneDirty(String),
    #[error("Zone {0} missing SOA")]
    MissingSoa(String),

    // Transfers
    #[error("Zone refresh failed for {zone}: {reason}")]
    RefreshError { zone: String, reason: String },

    // Update pipeline
    #[error("Update refused: {0}")]
    PolicyRejected(String),
    #[error("Update validation failed ({rcode}): {reason}")]
    UpdateValidation { rcode: Rcode, reason: String },
    #[error("Update queue unavailable: {0}")]
    QueueError(String),

    // SIG(0) / DNSSEC
    #[error("SIG(0) verification failed: {0}")]
    Sig0Error(String),
    #[error("Unknown SIG(0) key {keyname} (tag {keytag})")]
    UnknownSig0Key { keyname: String, keytag: u16 },
    #[error("DNSSEC failure ({code:?}): {reason}")]
    DnssecError { code: EdeCode, reason: String },
    #[error("Unsupported DNSSEC algorithm: {0}")]
    UnsupportedAlgorithm(u8),
    #[error("Signature verification failed")]
    SignatureVerificationFailed,
    #[error("Signing failed: {0}")]
    SigningError(String),
    #[error("No active {role} for zone {zone}")]
    NoActiveKey { zone: String, role: &'static str },

    // Key store
    #[error("Key store error: {0}")]
    KeyStoreError(String),
    #[error("Key store transaction already open, held by {0}")]
    TxnBusy(String),

    // Combiner
    #[error("Agent error: {0}")]
    AgentError(String),

    // Resolver
    #[error("Operation timed out")]
    Timeout,
    #[error("All servers for {0} failed")]
    ServersExhausted(String),
    #[error("CNAME chain exceeded limit")]
    CnameChainTooLong,
    #[error("Resolution iteration limit reached for {0}")]
    IterationLimit(String),

    #[error("Server is shutting down")]
    Shutdown,
}

impl TdnsError {
    /// Rcode this error maps to when surfaced to a DNS client.
    pub fn rcode(&self) -> Rcode {
        match self {
            TdnsError::PolicyRejected(_) | TdnsError::ZoneFrozen(_) => Rcode::Refused,
            TdnsError::UpdateValidation { rcode, .. } => *rcode,
            TdnsError::Sig0Error(_) | TdnsError::UnknownSig0Key { .. } => Rcode::BadSig,
            TdnsError::ZoneNotFound(_) => Rcode::NotAuth,
            TdnsError::ParseError(_) => Rcode::FormErr,
            _ => Rcode::ServFail,
        }
    }

    /// EDE code when this error rides an EDNS response, if any.
    pub fn ede(&self) -> Option<EdeCode> {
        match self {
            TdnsError::DnssecError { code, .. } => Some(*code),
            TdnsError::SignatureVerificationFailed => Some(EdeCode::DnssecBogus),
            TdnsError::ServersExhausted(_) | TdnsError::Timeout => Some(EdeCode::NetworkError),
            _ => None,
        }
    }
}

impl From<std::io::Error> for TdnsError {
    fn from(err: std::io::Error) -> Self {
        TdnsError::IoError(Arc::new(err))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_rcode_mapping() {
        assert_eq!(
            TdnsError::PolicyRejected("nope".into()).rcode(),
            Rcode::Refused
        );
        assert_eq!(TdnsError::Sig0Error("bad".into()).rcode(), Rcode::BadSig);
        assert_eq!(TdnsError::Timeout.rcode(), Rcode::ServFail);
    }

    #[test]
    fn test_ede_mapping() {
        let err = TdnsError::DnssecError {
            code: EdeCode::SignatureExpired,
            reason: "expired".into(),
        };
        assert_eq!(err.ede(), Some(EdeCode::SignatureExpired));
        assert_eq!(TdnsError::Timeout.ede(), Some(EdeCode::NetworkError));
    }
}
