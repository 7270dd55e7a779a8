//! Persistent key and trust stores.
//!
//! SQLite tables back five stores: ChildDnskeys, ChildDelegationData,
//! Sig0TrustStore, Sig0KeyStore and DnssecKeyStore. Access follows a
//! process-wide single-writer discipline: at most one transaction is in
//! flight and `ctx` records who holds it, so a competing `begin` fails
//! with an error naming the holder. In-memory caches front the SQL store
//! for the hot read paths (SIG(0) verification, online signing).

use crate::dns::enums::RRType;
use crate::dns::name::Name;
use crate::dns::rdata::{DnskeyData, RData};
use crate::dns::record::ResourceRecord;
use crate::error::{Result, TdnsError};
use dashmap::DashMap;
use parking_lot::{Mutex, MutexGuard};
use ring::rand::SystemRandom;
use ring::signature::{self, Ed25519KeyPair, KeyPair};
use rusqlite::Connection;
use std::path::Path;
use tracing::{debug, info};

pub const ALG_ECDSAP256SHA256: u8 = 13;
pub const ALG_ED25519: u8 = 15;

/// DNSSEC key lifecycle states.
pub const DNSSEC_STATES: [&str; 6] = [
    "created",
    "published",
    "active",
    "retired",
    "removed",
    "foreign",
];
/// SIG(0) key lifecycle states.
pub const SIG0_STATES: [&str; 3] = ["active", "published", "retired"];

#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
pub enum KeyRole {
    Ksk,
    Zsk,
}

impl KeyRole {
    fn as_str(self) -> &'static str {
        match self {
            KeyRole::Ksk => "KSK",
            KeyRole::Zsk => "ZSK",
        }
    }
}

/// A SIG(0) key as known to the trust store.
#[derive(Clone, Debug)]
pub struct TrustedSig0Key {
    pub name: Name,
    pub keyid: u16,
    pub key: DnskeyData,
    pub validated: bool,
    pub trusted: bool,
}

/// A private key usable for signing, with its public DNSKEY/KEY form.
#[derive(Clone)]
pub struct SigningKey {
    pub name: Name,
    pub keyid: u16,
    pub algorithm: u8,
    pub public: DnskeyData,
    pkcs8: Vec<u8>,
}

impl SigningKey {
    pub fn sign(&self, data: &[u8]) -> Result<Vec<u8>> {
        match self.algorithm {
            ALG_ED25519 => {
                let pair = Ed25519KeyPair::from_pkcs8(&self.pkcs8)
                    .map_err(|e| TdnsError::SigningError(format!("bad Ed25519 key: {}", e)))?;
                Ok(pair.sign(data).as_ref().to_vec())
            }
            ALG_ECDSAP256SHA256 => {
                let rng = SystemRandom::new();
                let pair = signature::EcdsaKeyPair::from_pkcs8(
                    &signature::ECDSA_P256_SHA256_FIXED_SIGNING,
                    &self.pkcs8,
                    &rng,
                )
                .map_err(|e| TdnsError::SigningError(format!("bad ECDSA key: {}", e)))?;
                let sig = pair
                    .sign(&rng, data)
                    .map_err(|e| TdnsError::SigningError(format!("sign: {}", e)))?;
                Ok(sig.as_ref().to_vec())
            }
            other => Err(TdnsError::UnsupportedAlgorithm(other)),
        }
    }
}

impl std::fmt::Debug for SigningKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SigningKey")
            .field("name", &self.name.to_string())
            .field("keyid", &self.keyid)
            .field("algorithm", &self.algorithm)
            .finish()
    }
}

pub struct KeyDb {
    conn: Mutex<Connection>,
    /// Descriptor of the open transaction's holder, if any.
    ctx: Mutex<Option<String>>,
    sig0_trust_cache: DashMap<Name, Vec<TrustedSig0Key>>,
    dnssec_cache: DashMap<(Name, KeyRole), Vec<SigningKey>>,
}

const SCHEMA: &str = r#"
CREATE TABLE IF NOT EXISTS ChildDnskeys (
    zonename TEXT NOT NULL,
    keyid INTEGER NOT NULL,
    trustanchor INTEGER NOT NULL DEFAULT 0,
    keyrr TEXT NOT NULL,
    UNIQUE (zonename, keyid)
);
CREATE TABLE IF NOT EXISTS ChildDelegationData (
    zonename TEXT NOT NULL,
    owner TEXT NOT NULL,
    rrtype INTEGER NOT NULL,
    rr TEXT NOT NULL,
    UNIQUE (zonename, owner, rrtype, rr)
);
CREATE TABLE IF NOT EXISTS Sig0TrustStore (
    zonename TEXT NOT NULL,
    keyid INTEGER NOT NULL,
    validated INTEGER NOT NULL,
    trusted INTEGER NOT NULL,
    source TEXT NOT NULL,
    keyrr TEXT NOT NULL,
    UNIQUE (zonename, keyid)
);
CREATE TABLE IF NOT EXISTS Sig0KeyStore (
    zonename TEXT NOT NULL,
    keyid INTEGER NOT NULL,
    state TEXT NOT NULL,
    algorithm INTEGER NOT NULL,
    privatekey BLOB NOT NULL,
    keyrr TEXT NOT NULL,
    UNIQUE (zonename, keyid)
);
CREATE TABLE IF NOT EXISTS DnssecKeyStore (
    zonename TEXT NOT NULL,
    keyid INTEGER NOT NULL,
    state TEXT NOT NULL,
    keytype TEXT NOT NULL,
    algorithm INTEGER NOT NULL,
    privatekey BLOB NOT NULL,
    keyrr TEXT NOT NULL,
    UNIQUE (zonename, keyid)
);
"#;

impl KeyDb {
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        let conn = Connection::open(path.as_ref())
            .map_err(|e| TdnsError::KeyStoreError(format!("open {}: {}", path.as_ref().display(), e)))?;
        conn.execute_batch(SCHEMA)
            .map_err(|e| TdnsError::KeyStoreError(format!("schema: {}", e)))?;
        info!(path = %path.as_ref().display(), "key store opened");
        Ok(Self {
            conn: Mutex::new(conn),
            ctx: Mutex::new(None),
            sig0_trust_cache: DashMap::new(),
            dnssec_cache: DashMap::new(),
        })
    }

    pub fn open_in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory()
            .map_err(|e| TdnsError::KeyStoreError(format!("open memory db: {}", e)))?;
        conn.execute_batch(SCHEMA)
            .map_err(|e| TdnsError::KeyStoreError(format!("schema: {}", e)))?;
        Ok(Self {
            conn: Mutex::new(conn),
            ctx: Mutex::new(None),
            sig0_trust_cache: DashMap::new(),
            dnssec_cache: DashMap::new(),
        })
    }

    /// Open the single writing transaction. Fails naming the current
    /// holder when one is already in flight.
    pub fn begin(&self, ctx: &str) -> Result<KeyDbTxn<'_>> {
        {
            let mut holder = self.ctx.lock();
            if let Some(current) = holder.as_ref() {
                return Err(TdnsError::TxnBusy(current.clone()));
            }
            *holder = Some(ctx.to_string());
        }
        let conn = self.conn.lock();
        if let Err(e) = conn.execute_batch("BEGIN") {
            *self.ctx.lock() = None;
            return Err(TdnsError::KeyStoreError(format!("begin: {}", e)));
        }
        debug!(ctx, "key store transaction opened");
        Ok(KeyDbTxn {
            db: self,
            conn,
            committed: false,
        })
    }

    fn invalidate_caches(&self) {
        self.sig0_trust_cache.clear();
        self.dnssec_cache.clear();
    }

    // --- Sig0TrustStore -------------------------------------------------

    /// Trust-store entries for a key owner, cache-first.
    pub fn sig0_trusted_keys(&self, name: &Name) -> Result<Vec<TrustedSig0Key>> {
        if let Some(hit) = self.sig0_trust_cache.get(name) {
            return Ok(hit.clone());
        }
        let conn = self.conn.lock();
        let mut stmt = conn
            .prepare("SELECT keyid, validated, trusted, keyrr FROM Sig0TrustStore WHERE zonename = ?1")
            .map_err(sql_err)?;
        let rows = stmt
            .query_map([name.canonical().to_string()], |row| {
                Ok((
                    row.get::<_, u16>(0)?,
                    row.get::<_, bool>(1)?,
                    row.get::<_, bool>(2)?,
                    row.get::<_, String>(3)?,
                ))
            })
            .map_err(sql_err)?;
        let mut keys = Vec::new();
        for row in rows {
            let (keyid, validated, trusted, keyrr) = row.map_err(sql_err)?;
            let key = parse_key_presentation(&keyrr)?;
            keys.push(TrustedSig0Key {
                name: name.clone(),
                keyid,
                key,
                validated,
                trusted,
            });
        }
        self.sig0_trust_cache.insert(name.clone(), keys.clone());
        Ok(keys)
    }

    /// Add (or update) a key in the trust store.
    pub fn add_sig0_trust(
        &self,
        rr: &ResourceRecord,
        validated: bool,
        trusted: bool,
        source: &str,
    ) -> Result<u16> {
        let key = match &rr.rdata {
            RData::Key(k) | RData::Dnskey(k) => k.clone(),
            _ => return Err(TdnsError::KeyStoreError("not a KEY record".into())),
        };
        let keyid = key.key_tag();
        let conn = self.conn.lock();
        conn.execute(
            "INSERT INTO Sig0TrustStore (zonename, keyid, validated, trusted, source, keyrr)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6)
             ON CONFLICT (zonename, keyid)
             DO UPDATE SET validated = ?3, trusted = ?4, source = ?5, keyrr = ?6",
            rusqlite::params![
                rr.name.canonical().to_string(),
                keyid,
                validated,
                trusted,
                source,
                format!("{}", rr.rdata)
            ],
        )
        .map_err(sql_err)?;
        drop(conn);
        self.invalidate_caches();
        info!(key = %rr.name, keyid, validated, trusted, source, "SIG(0) key stored");
        Ok(keyid)
    }

    /// Flip the trusted bit on a stored key.
    pub fn set_sig0_trust(&self, name: &Name, keyid: u16, validated: bool, trusted: bool) -> Result<()> {
        let conn = self.conn.lock();
        let n = conn
            .execute(
                "UPDATE Sig0TrustStore SET validated = ?3, trusted = ?4 WHERE zonename = ?1 AND keyid = ?2",
                rusqlite::params![name.canonical().to_string(), keyid, validated, trusted],
            )
            .map_err(sql_err)?;
        drop(conn);
        if n == 0 {
            return Err(TdnsError::UnknownSig0Key {
                keyname: name.to_string(),
                keytag: keyid,
            });
        }
        self.invalidate_caches();
        Ok(())
    }

    // --- Sig0KeyStore ---------------------------------------------------

    /// Generate a fresh Ed25519 SIG(0) key pair for `name`, stored in the
    /// given state.
    pub fn generate_sig0_key(&self, name: &Name, state: &str) -> Result<SigningKey> {
        debug_assert!(SIG0_STATES.contains(&state));
        let rng = SystemRandom::new();
        let pkcs8 = Ed25519KeyPair::generate_pkcs8(&rng)
            .map_err(|e| TdnsError::KeyStoreError(format!("keygen: {}", e)))?;
        let pair = Ed25519KeyPair::from_pkcs8(pkcs8.as_ref())
            .map_err(|e| TdnsError::KeyStoreError(format!("keygen: {}", e)))?;
        let public = DnskeyData {
            flags: 256,
            protocol: 3,
            algorithm: ALG_ED25519,
            public_key: pair.public_key().as_ref().to_vec(),
        };
        let keyid = public.key_tag();
        let keyrr = format!("{}", RData::Key(public.clone()));
        let conn = self.conn.lock();
        conn.execute(
            "INSERT INTO Sig0KeyStore (zonename, keyid, state, algorithm, privatekey, keyrr)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
            rusqlite::params![name.canonical().to_string(), keyid, state, ALG_ED25519, pkcs8.as_ref(), keyrr],
        )
        .map_err(sql_err)?;
        info!(key = %name, keyid, state, "generated SIG(0) key");
        Ok(SigningKey {
            name: name.clone(),
            keyid,
            algorithm: ALG_ED25519,
            public,
            pkcs8: pkcs8.as_ref().to_vec(),
        })
    }

    /// The active SIG(0) key for a name, if one exists.
    pub fn active_sig0_key(&self, name: &Name) -> Result<Option<SigningKey>> {
        let conn = self.conn.lock();
        let mut stmt = conn
            .prepare(
                "SELECT keyid, algorithm, privatekey, keyrr FROM Sig0KeyStore
                 WHERE zonename = ?1 AND state = 'active' LIMIT 1",
            )
            .map_err(sql_err)?;
        let mut rows = stmt.query([name.canonical().to_string()]).map_err(sql_err)?;
        let Some(row) = rows.next().map_err(sql_err)? else {
            return Ok(None);
        };
        let keyid: u16 = row.get(0).map_err(sql_err)?;
        let algorithm: u8 = row.get(1).map_err(sql_err)?;
        let pkcs8: Vec<u8> = row.get(2).map_err(sql_err)?;
        let keyrr: String = row.get(3).map_err(sql_err)?;
        Ok(Some(SigningKey {
            name: name.clone(),
            keyid,
            algorithm,
            public: parse_key_presentation(&keyrr)?,
            pkcs8,
        }))
    }

    /// Roll the SIG(0) key: retire the active key, generate and activate
    /// a successor. Returns the new key.
    pub fn roll_sig0_key(&self, name: &Name) -> Result<SigningKey> {
        {
            let conn = self.conn.lock();
            conn.execute(
                "UPDATE Sig0KeyStore SET state = 'retired' WHERE zonename = ?1 AND state = 'active'",
                [name.canonical().to_string()],
            )
            .map_err(sql_err)?;
        }
        self.generate_sig0_key(name, "active")
    }

    // --- DnssecKeyStore -------------------------------------------------

    /// Generate a DNSSEC key (Ed25519) for the zone in state `state`.
    pub fn generate_dnssec_key(&self, zone: &Name, role: KeyRole, state: &str) -> Result<SigningKey> {
        debug_assert!(DNSSEC_STATES.contains(&state));
        let rng = SystemRandom::new();
        let pkcs8 = Ed25519KeyPair::generate_pkcs8(&rng)
            .map_err(|e| TdnsError::KeyStoreError(format!("keygen: {}", e)))?;
        let pair = Ed25519KeyPair::from_pkcs8(pkcs8.as_ref())
            .map_err(|e| TdnsError::KeyStoreError(format!("keygen: {}", e)))?;
        let public = DnskeyData {
            flags: match role {
                KeyRole::Ksk => 257,
                KeyRole::Zsk => 256,
            },
            protocol: 3,
            algorithm: ALG_ED25519,
            public_key: pair.public_key().as_ref().to_vec(),
        };
        let keyid = public.key_tag();
        let keyrr = format!("{}", RData::Dnskey(public.clone()));
        let conn = self.conn.lock();
        conn.execute(
            "INSERT INTO DnssecKeyStore (zonename, keyid, state, keytype, algorithm, privatekey, keyrr)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
            rusqlite::params![
                zone.canonical().to_string(),
                keyid,
                state,
                role.as_str(),
                ALG_ED25519,
                pkcs8.as_ref(),
                keyrr
            ],
        )
        .map_err(sql_err)?;
        drop(conn);
        self.invalidate_caches();
        info!(zone = %zone, keyid, role = role.as_str(), state, "generated DNSSEC key");
        Ok(SigningKey {
            name: zone.clone(),
            keyid,
            algorithm: ALG_ED25519,
            public,
            pkcs8: pkcs8.as_ref().to_vec(),
        })
    }

    /// Keys the signer reports as active for the zone and role,
    /// cache-first.
    pub fn active_dnssec_keys(&self, zone: &Name, role: KeyRole) -> Result<Vec<SigningKey>> {
        let cache_key = (zone.clone(), role);
        if let Some(hit) = self.dnssec_cache.get(&cache_key) {
            return Ok(hit.clone());
        }
        let conn = self.conn.lock();
        let mut stmt = conn
            .prepare(
                "SELECT keyid, algorithm, privatekey, keyrr FROM DnssecKeyStore
                 WHERE zonename = ?1 AND keytype = ?2 AND state = 'active'",
            )
            .map_err(sql_err)?;
        let rows = stmt
            .query_map(rusqlite::params![zone.canonical().to_string(), role.as_str()], |row| {
                Ok((
                    row.get::<_, u16>(0)?,
                    row.get::<_, u8>(1)?,
                    row.get::<_, Vec<u8>>(2)?,
                    row.get::<_, String>(3)?,
                ))
            })
            .map_err(sql_err)?;
        let mut keys = Vec::new();
        for row in rows {
            let (keyid, algorithm, pkcs8, keyrr) = row.map_err(sql_err)?;
            keys.push(SigningKey {
                name: zone.clone(),
                keyid,
                algorithm,
                public: parse_key_presentation(&keyrr)?,
                pkcs8,
            });
        }
        drop(stmt);
        drop(conn);
        self.dnssec_cache.insert(cache_key, keys.clone());
        Ok(keys)
    }

    // --- Child data -----------------------------------------------------

    pub fn store_child_dnskey(&self, zone: &Name, key: &DnskeyData, trust_anchor: bool) -> Result<()> {
        let conn = self.conn.lock();
        conn.execute(
            "INSERT INTO ChildDnskeys (zonename, keyid, trustanchor, keyrr)
             VALUES (?1, ?2, ?3, ?4)
             ON CONFLICT (zonename, keyid) DO UPDATE SET trustanchor = ?3, keyrr = ?4",
            rusqlite::params![
                zone.canonical().to_string(),
                key.key_tag(),
                trust_anchor,
                format!("{}", RData::Dnskey(key.clone()))
            ],
        )
        .map_err(sql_err)?;
        Ok(())
    }

    pub fn store_child_delegation_rr(&self, zone: &Name, rr: &ResourceRecord) -> Result<()> {
        let conn = self.conn.lock();
        conn.execute(
            "INSERT OR IGNORE INTO ChildDelegationData (zonename, owner, rrtype, rr)
             VALUES (?1, ?2, ?3, ?4)",
            rusqlite::params![
                zone.canonical().to_string(),
                rr.name.canonical().to_string(),
                u16::from(rr.rtype),
                rr.to_string()
            ],
        )
        .map_err(sql_err)?;
        Ok(())
    }

    pub fn child_delegation_rrs(&self, zone: &Name, rtype: RRType) -> Result<Vec<String>> {
        let conn = self.conn.lock();
        let mut stmt = conn
            .prepare("SELECT rr FROM ChildDelegationData WHERE zonename = ?1 AND rrtype = ?2")
            .map_err(sql_err)?;
        let rows = stmt
            .query_map(rusqlite::params![zone.canonical().to_string(), u16::from(rtype)], |row| {
                row.get::<_, String>(0)
            })
            .map_err(sql_err)?;
        let mut out = Vec::new();
        for row in rows {
            out.push(row.map_err(sql_err)?);
        }
        Ok(out)
    }
}

/// The open transaction. Dropping without `commit` rolls back and frees
/// the holder slot either way.
pub struct KeyDbTxn<'a> {
    db: &'a KeyDb,
    conn: MutexGuard<'a, Connection>,
    committed: bool,
}

impl KeyDbTxn<'_> {
    pub fn execute(&self, sql: &str, params: impl rusqlite::Params) -> Result<usize> {
        self.conn.execute(sql, params).map_err(sql_err)
    }

    pub fn commit(mut self) -> Result<()> {
        self.conn
            .execute_batch("COMMIT")
            .map_err(|e| TdnsError::KeyStoreError(format!("commit: {}", e)))?;
        self.committed = true;
        self.db.invalidate_caches();
        Ok(())
    }
}

impl Drop for KeyDbTxn<'_> {
    fn drop(&mut self) {
        if !self.committed {
            let _ = self.conn.execute_batch("ROLLBACK");
        }
        *self.db.ctx.lock() = None;
    }
}

fn sql_err(e: rusqlite::Error) -> TdnsError {
    TdnsError::KeyStoreError(e.to_string())
}

/// Parse the stored "flags protocol algorithm base64" presentation form.
fn parse_key_presentation(s: &str) -> Result<DnskeyData> {
    let tokens: Vec<&str> = s.split_whitespace().collect();
    match RData::parse_presentation(RRType::KEY, &tokens)? {
        RData::Key(k) => Ok(k),
        _ => Err(TdnsError::KeyStoreError("malformed stored key".into())),
    }
}
