//! SIG(0) message signatures (RFC 2931).
//!
//! Verification fetches the signer's KEY either from a served zone or
//! from the trust store; the signed data is the SIG rdata prefix
//! followed by the message with the SIG record stripped and arcount
//! decremented, which the parser preserved for us.

use crate::dns::enums::{RRType, Rcode};
use crate::dns::message::Message;
use crate::dns::name::Name;
use crate::dns::rdata::{DnskeyData, RData, RrsigData};
use crate::dns::record::ResourceRecord;
use crate::error::{Result, TdnsError};
use crate::keydb::{ALG_ECDSAP256SHA256, ALG_ED25519, KeyDb, SigningKey};
use crate::zone::store::ZoneStore;
use ring::signature::{self, UnparsedPublicKey};
use std::time::{SystemTime, UNIX_EPOCH};
use tracing::{debug, warn};

pub const ALG_RSASHA256: u8 = 8;
/// Validity window put on outgoing SIG(0) signatures.
const SIG0_FUDGE_SECS: u64 = 300;

/// What validation concluded about an incoming signed update.
#[derive(Clone, Debug)]
pub struct Sig0Outcome {
    pub signer: Name,
    pub keytag: u16,
    pub validated: bool,
    pub trusted: bool,
}

fn now_unix() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or(0)
}

/// Verify raw signature bytes for a DNSSEC/SIG(0) algorithm.
pub fn verify_signature(algorithm: u8, public_key: &[u8], data: &[u8], sig: &[u8]) -> Result<()> {
    match algorithm {
        ALG_ED25519 => UnparsedPublicKey::new(&signature::ED25519, public_key)
            .verify(data, sig)
            .map_err(|_| TdnsError::SignatureVerificationFailed),
        ALG_ECDSAP256SHA256 => {
            UnparsedPublicKey::new(&signature::ECDSA_P256_SHA256_FIXED, public_key)
                .verify(data, sig)
                .map_err(|_| TdnsError::SignatureVerificationFailed)
        }
        ALG_RSASHA256 => {
            let der = rsa_dnskey_to_der(public_key)?;
            UnparsedPublicKey::new(&signature::RSA_PKCS1_2048_8192_SHA256, der)
                .verify(data, sig)
                .map_err(|_| TdnsError::SignatureVerificationFailed)
        }
        other => Err(TdnsError::UnsupportedAlgorithm(other)),
    }
}

/// DNSKEY RSA keys carry (exponent-length, exponent, modulus); ring
/// wants an ASN.1 RSAPublicKey.
fn rsa_dnskey_to_der(raw: &[u8]) -> Result<Vec<u8>> {
    if raw.is_empty() {
        return Err(TdnsError::ParseError("empty RSA key".into()));
    }
    let (exp_len, body) = if raw[0] != 0 {
        (raw[0] as usize, &raw[1..])
    } else {
        if raw.len() < 3 {
            return Err(TdnsError::ParseError("short RSA key".into()));
        }
        (u16::from_be_bytes([raw[1], raw[2]]) as usize, &raw[3..])
    };
    if body.len() <= exp_len {
        return Err(TdnsError::ParseError("short RSA key".into()));
    }
    let (exponent, modulus) = body.split_at(exp_len);

    fn der_integer(bytes: &[u8]) -> Vec<u8> {
        let mut v = bytes.to_vec();
        if v.first().map(|b| b & 0x80 != 0).unwrap_or(false) {
            v.insert(0, 0);
        }
        let mut out = vec![0x02];
        out.extend(der_len(v.len()));
        out.extend(v);
        out
    }
    fn der_len(len: usize) -> Vec<u8> {
        if len < 128 {
            vec![len as u8]
        } else if len < 256 {
            vec![0x81, len as u8]
        } else {
            vec![0x82, (len >> 8) as u8, (len & 0xFF) as u8]
        }
    }

    let mut content = der_integer(modulus);
    content.extend(der_integer(exponent));
    let mut out = vec![0x30];
    out.extend(der_len(content.len()));
    out.extend(content);
    Ok(out)
}

/// Locate candidate KEY rdata for a signer name: a served zone's KEY
/// RRset first, the trust store otherwise. The bool is the trusted
/// standing of each candidate.
fn candidate_keys(
    signer: &Name,
    keytag: u16,
    zones: &ZoneStore,
    keydb: &KeyDb,
) -> Result<Vec<(DnskeyData, bool, bool)>> {
    let mut out = Vec::new();
    if let Some(zone) = zones.find_zone(signer) {
        if let Some(owner) = zone.get_owner(signer) {
            if let Some(set) = owner.get(RRType::KEY) {
                for rr in &set.rrs {
                    if let RData::Key(k) = &rr.rdata {
                        if k.key_tag() == keytag {
                            // a key served from our own zone is trusted
                            out.push((k.clone(), true, true));
                        }
                    }
                }
            }
        }
    }
    if out.is_empty() {
        let mut stored = keydb.sig0_trusted_keys(signer)?;
        // validated+trusted entries first
        stored.sort_by_key(|k| (!k.trusted, !k.validated));
        for k in stored {
            if k.keyid == keytag {
                out.push((k.key, k.validated, k.trusted));
            }
        }
    }
    Ok(out)
}

/// Verify the SIG(0) on `msg`. Returns None when the message carries no
/// SIG(0) at all.
pub fn verify_sig0(
    msg: &Message,
    zones: &ZoneStore,
    keydb: &KeyDb,
) -> Result<Option<Sig0Outcome>> {
    let Some(sig_rr) = &msg.sig0 else {
        return Ok(None);
    };
    let RData::Sig(sig) = &sig_rr.rdata else {
        return Err(TdnsError::UpdateValidation {
            rcode: Rcode::FormErr,
            reason: "SIG(0) record with malformed rdata".into(),
        });
    };
    let preimage = msg.sig0_preimage().ok_or_else(|| TdnsError::UpdateValidation {
        rcode: Rcode::FormErr,
        reason: "SIG(0) without preimage".into(),
    })?;

    let now = now_unix() as u32;
    if now < sig.inception || now > sig.expiration {
        return Err(TdnsError::Sig0Error(format!(
            "signature outside validity window ({}..{})",
            sig.inception, sig.expiration
        )));
    }

    let candidates = candidate_keys(&sig.signer, sig.key_tag, zones, keydb)?;
    if candidates.is_empty() {
        return Err(TdnsError::UnknownSig0Key {
            keyname: sig.signer.to_string(),
            keytag: sig.key_tag,
        });
    }

    let mut signed_data = sig.to_prefix_wire();
    signed_data.extend_from_slice(preimage);

    for (key, validated, trusted) in &candidates {
        if key.algorithm != sig.algorithm {
            continue;
        }
        if verify_signature(sig.algorithm, &key.public_key, &signed_data, &sig.signature).is_ok() {
            debug!(signer = %sig.signer, keytag = sig.key_tag, trusted, "SIG(0) verified");
            return Ok(Some(Sig0Outcome {
                signer: sig.signer.clone(),
                keytag: sig.key_tag,
                validated: *validated,
                trusted: *trusted,
            }));
        }
    }
    warn!(signer = %sig.signer, keytag = sig.key_tag, "SIG(0) verification failed");
    Err(TdnsError::Sig0Error(format!(
        "signature by {} tag {} did not verify",
        sig.signer, sig.key_tag
    )))
}

/// Attach a SIG(0) to an outgoing message (used for DSYNC-addressed
/// updates toward the parent).
pub fn sign_message(msg: &mut Message, key: &SigningKey) -> Result<()> {
    msg.sig0 = None;
    let body = msg.to_bytes();
    let now = now_unix();
    let mut sig = RrsigData {
        type_covered: RRType::from(0u16),
        algorithm: key.algorithm,
        labels: 0,
        original_ttl: 0,
        expiration: (now + SIG0_FUDGE_SECS) as u32,
        inception: (now - SIG0_FUDGE_SECS) as u32,
        key_tag: key.keyid,
        signer: key.name.clone(),
        signature: Vec::new(),
    };
    let mut signed_data = sig.to_prefix_wire();
    signed_data.extend_from_slice(&body);
    sig.signature = key.sign(&signed_data)?;
    msg.sig0 = Some(ResourceRecord::new(
        key.name.clone(),
        RRType::SIG,
        0,
        RData::Sig(sig),
    ));
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dns::enums::Opcode;

    fn signed_update(keydb: &KeyDb, signer: &Name) -> Message {
        let key = keydb.active_sig0_key(signer).unwrap().unwrap();
        let mut msg = Message::with_opcode(
            Opcode::Update,
            Name::parse("example.com").unwrap(),
            RRType::SOA,
        );
        msg.authorities.push(ResourceRecord::new(
            Name::parse("www.example.com").unwrap(),
            RRType::A,
            300,
            RData::A("192.0.2.11".parse().unwrap()),
        ));
        sign_message(&mut msg, &key).unwrap();
        msg
    }

    #[test]
    fn test_sign_then_verify_roundtrip() {
        let keydb = KeyDb::open_in_memory().unwrap();
        let zones = ZoneStore::new();
        let signer = Name::parse("admin.example.com").unwrap();
        let key = keydb.generate_sig0_key(&signer, "active").unwrap();
        let rr = ResourceRecord::new(signer.clone(), RRType::KEY, 3600, RData::Key(key.public.clone()));
        keydb.add_sig0_trust(&rr, true, true, "manual").unwrap();

        let msg = signed_update(&keydb, &signer);
        // simulate the wire: serialize and reparse so the preimage exists
        let parsed = Message::from_bytes(&msg.to_bytes()).unwrap();
        let outcome = verify_sig0(&parsed, &zones, &keydb).unwrap().unwrap();
        assert_eq!(outcome.signer, signer);
        assert!(outcome.trusted);
        assert!(outcome.validated);
    }

    #[test]
    fn test_tampered_message_rejected() {
        let keydb = KeyDb::open_in_memory().unwrap();
        let zones = ZoneStore::new();
        let signer = Name::parse("admin.example.com").unwrap();
        let key = keydb.generate_sig0_key(&signer, "active").unwrap();
        let rr = ResourceRecord::new(signer.clone(), RRType::KEY, 3600, RData::Key(key.public.clone()));
        keydb.add_sig0_trust(&rr, true, true, "manual").unwrap();

        let msg = signed_update(&keydb, &signer);
        let mut bytes = msg.to_bytes();
        // flip a bit in the update section
        let len = bytes.len();
        bytes[len / 2] ^= 0x01;
        if let Ok(parsed) = Message::from_bytes(&bytes) {
            assert!(verify_sig0(&parsed, &zones, &keydb).is_err());
        }
    }

    #[test]
    fn test_unknown_key_named_in_error() {
        let keydb = KeyDb::open_in_memory().unwrap();
        let zones = ZoneStore::new();
        let signer = Name::parse("stranger.example.net").unwrap();
        keydb.generate_sig0_key(&signer, "active").unwrap();

        let msg = signed_update(&keydb, &signer);
        let parsed = Message::from_bytes(&msg.to_bytes()).unwrap();
        // the key never entered the trust store
        match verify_sig0(&parsed, &zones, &keydb) {
            Err(TdnsError::UnknownSig0Key { keyname, .. }) => {
                assert_eq!(keyname, signer.to_string());
            }
            other => panic!("expected UnknownSig0Key, got {:?}", other.map(|_| ())),
        }
    }

    #[test]
    fn test_untrusted_key_verifies_but_flagged() {
        let keydb = KeyDb::open_in_memory().unwrap();
        let zones = ZoneStore::new();
        let signer = Name::parse("child.example.com").unwrap();
        let key = keydb.generate_sig0_key(&signer, "active").unwrap();
        let rr = ResourceRecord::new(signer.clone(), RRType::KEY, 3600, RData::Key(key.public.clone()));
        keydb.add_sig0_trust(&rr, false, false, "key-upload").unwrap();

        let msg = signed_update(&keydb, &signer);
        let parsed = Message::from_bytes(&msg.to_bytes()).unwrap();
        let outcome = verify_sig0(&parsed, &zones, &keydb).unwrap().unwrap();
        assert!(!outcome.trusted);
        assert!(!outcome.validated);
    }
}
