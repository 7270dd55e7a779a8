//! Typed rdata for the record types this server works with.
//!
//! Everything the server does not understand is carried as `Unknown`
//! bytes: owner indexing, serial arithmetic and RRSIG coverage all sit
//! above this enum and never need to look inside. The delegation-sync
//! types (DSYNC, DELEG, HSYNC, HSYNC2, MSIGNER, legacy NOTIFY) get full
//! pack/unpack and presentation support since the sync engines read them.

use crate::dns::enums::RRType;
use crate::dns::name::Name;
use crate::dns::wire::{WireReader, WireWriter};
use crate::error::{Result, TdnsError};
use base64::Engine;
use std::net::{Ipv4Addr, Ipv6Addr};

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SoaData {
    pub mname: Name,
    pub rname: Name,
    pub serial: u32,
    pub refresh: u32,
    pub retry: u32,
    pub expire: u32,
    pub minimum: u32,
}

/// Shared shape of DNSKEY, CDNSKEY and the SIG(0) KEY record.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct DnskeyData {
    pub flags: u16,
    pub protocol: u8,
    pub algorithm: u8,
    pub public_key: Vec<u8>,
}

impl DnskeyData {
    /// RFC 4034 appendix B key tag.
    pub fn key_tag(&self) -> u16 {
        let mut rdata = Vec::with_capacity(4 + self.public_key.len());
        rdata.extend_from_slice(&self.flags.to_be_bytes());
        rdata.push(self.protocol);
        rdata.push(self.algorithm);
        rdata.extend_from_slice(&self.public_key);

        let mut acc: u32 = 0;
        for (i, b) in rdata.iter().enumerate() {
            if i & 1 == 0 {
                acc += (*b as u32) << 8;
            } else {
                acc += *b as u32;
            }
        }
        acc += (acc >> 16) & 0xFFFF;
        (acc & 0xFFFF) as u16
    }

    /// Zone Key bit (bit 7) set: 256 for ZSK, 257 for KSK.
    pub fn is_zone_key(&self) -> bool {
        self.flags & 0x0100 != 0
    }

    /// Secure Entry Point bit, set on KSKs.
    pub fn is_sep(&self) -> bool {
        self.flags & 0x0001 != 0
    }
}

/// Shared shape of RRSIG and the SIG(0) SIG record.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct RrsigData {
    pub type_covered: RRType,
    pub algorithm: u8,
    pub labels: u8,
    pub original_ttl: u32,
    pub expiration: u32,
    pub inception: u32,
    pub key_tag: u16,
    pub signer: Name,
    pub signature: Vec<u8>,
}

impl RrsigData {
    /// The rdata up to but excluding the signature field, signer name in
    /// canonical (lowercased, uncompressed) form. This is the prefix of
    /// the signed data for both RRSIG (RFC 4034) and SIG(0) (RFC 2931).
    pub fn to_prefix_wire(&self) -> Vec<u8> {
        let mut out = Vec::new();
        out.extend_from_slice(&u16::from(self.type_covered).to_be_bytes());
        out.push(self.algorithm);
        out.push(self.labels);
        out.extend_from_slice(&self.original_ttl.to_be_bytes());
        out.extend_from_slice(&self.expiration.to_be_bytes());
        out.extend_from_slice(&self.inception.to_be_bytes());
        out.extend_from_slice(&self.key_tag.to_be_bytes());
        out.extend_from_slice(&self.signer.to_canonical_wire());
        out
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct DsData {
    pub key_tag: u16,
    pub algorithm: u8,
    pub digest_type: u8,
    pub digest: Vec<u8>,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SvcParam {
    pub key: u16,
    pub value: Vec<u8>,
}

pub const SVC_PARAM_ALPN: u16 = 1;
pub const SVC_PARAM_IPV4HINT: u16 = 4;
pub const SVC_PARAM_IPV6HINT: u16 = 6;

/// Shared shape of SVCB, HTTPS and the SVCB-shaped DELEG record.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SvcbData {
    pub priority: u16,
    pub target: Name,
    pub params: Vec<SvcParam>,
}

impl SvcbData {
    /// ALPN identifiers announced in the alpn SvcParam, in wire order.
    pub fn alpn(&self) -> Vec<String> {
        let mut out = Vec::new();
        for p in &self.params {
            if p.key != SVC_PARAM_ALPN {
                continue;
            }
            let mut pos = 0;
            while pos < p.value.len() {
                let len = p.value[pos] as usize;
                pos += 1;
                if pos + len > p.value.len() {
                    break;
                }
                out.push(String::from_utf8_lossy(&p.value[pos..pos + len]).into_owned());
                pos += len;
            }
        }
        out
    }

    /// ipv4hint / ipv6hint addresses.
    pub fn addr_hints(&self) -> Vec<std::net::IpAddr> {
        let mut out = Vec::new();
        for p in &self.params {
            match p.key {
                SVC_PARAM_IPV4HINT => {
                    for chunk in p.value.chunks_exact(4) {
                        out.push(Ipv4Addr::new(chunk[0], chunk[1], chunk[2], chunk[3]).into());
                    }
                }
                SVC_PARAM_IPV6HINT => {
                    for chunk in p.value.chunks_exact(16) {
                        let mut b = [0u8; 16];
                        b.copy_from_slice(chunk);
                        out.push(Ipv6Addr::from(b).into());
                    }
                }
                _ => {}
            }
        }
        out
    }
}

/// DSYNC: advertise the sync target the child should use for a given
/// payload type (CSYNC, CDS, ...). The legacy NOTIFY RR shares this shape.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct DsyncData {
    pub target_type: RRType,
    pub scheme: u8,
    pub port: u16,
    pub target: Name,
}

/// HSYNC: zone-owner intent signalled to a provider agent.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct HsyncData {
    pub state: u8,
    pub nsmgmt: u8,
    pub sign: u8,
    pub identity: Name,
    pub upstream: Name,
}

/// HSYNC2 packs state/nsmgmt/sign into one flag word.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Hsync2Data {
    pub flags: u16,
    pub identity: Name,
    pub upstream: Name,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct MsignerData {
    pub scheme: u8,
    pub target: Name,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct TlsaData {
    pub usage: u8,
    pub selector: u8,
    pub matching: u8,
    pub cert_data: Vec<u8>,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct CsyncData {
    pub serial: u32,
    pub flags: u16,
    pub types: Vec<RRType>,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct NsecData {
    pub next: Name,
    pub types: Vec<RRType>,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum RData {
    A(Ipv4Addr),
    Aaaa(Ipv6Addr),
    Ns(Name),
    Cname(Name),
    Ptr(Name),
    Mx { preference: u16, exchange: Name },
    Txt(Vec<String>),
    Soa(SoaData),
    Srv { priority: u16, weight: u16, port: u16, target: Name },
    Svcb(SvcbData),
    Https(SvcbData),
    Ds(DsData),
    Cds(DsData),
    Dnskey(DnskeyData),
    Cdnskey(DnskeyData),
    Key(DnskeyData),
    Rrsig(RrsigData),
    Sig(RrsigData),
    Nsec(NsecData),
    Csync(CsyncData),
    Tlsa(TlsaData),
    Dsync(DsyncData),
    NotifyRr(DsyncData),
    Hsync(HsyncData),
    Hsync2(Hsync2Data),
    Msigner(MsignerData),
    Deleg(SvcbData),
    /// Empty rdata (class ANY deletes, question-like RRs).
    Empty,
    Unknown(Vec<u8>),
}

fn read_type_bitmap(data: &[u8]) -> Vec<RRType> {
    let mut types = Vec::new();
    let mut pos = 0;
    while pos + 2 <= data.len() {
        let window = data[pos] as u16;
        let len = data[pos + 1] as usize;
        pos += 2;
        if pos + len > data.len() {
            break;
        }
        for (i, byte) in data[pos..pos + len].iter().enumerate() {
            for bit in 0..8 {
                if byte & (0x80 >> bit) != 0 {
                    types.push(RRType::from(window * 256 + (i as u16) * 8 + bit as u16));
                }
            }
        }
        pos += len;
    }
    types
}

fn write_type_bitmap(types: &[RRType], out: &mut Vec<u8>) {
    let mut codes: Vec<u16> = types.iter().map(|t| u16::from(*t)).collect();
    codes.sort_unstable();
    codes.dedup();
    let mut i = 0;
    while i < codes.len() {
        let window = codes[i] / 256;
        let mut bitmap = [0u8; 32];
        let mut max_byte = 0usize;
        while i < codes.len() && codes[i] / 256 == window {
            let low = codes[i] % 256;
            let byte = (low / 8) as usize;
            bitmap[byte] |= 0x80 >> (low % 8);
            max_byte = max_byte.max(byte);
            i += 1;
        }
        out.push(window as u8);
        out.push((max_byte + 1) as u8);
        out.extend_from_slice(&bitmap[..=max_byte]);
    }
}

impl RData {
    /// True when there is no rdata payload at all.
    pub fn is_empty(&self) -> bool {
        matches!(self, RData::Empty) || matches!(self, RData::Unknown(v) if v.is_empty())
    }

    /// Decode `rdlen` bytes of rdata for `rtype`. Unknown types, and any
    /// type whose rdata fails structural checks, fall back to opaque bytes
    /// so the record can still be stored and forwarded.
    pub fn read(rtype: RRType, r: &mut WireReader<'_>, rdlen: usize) -> Result<RData> {
        if rdlen == 0 {
            return Ok(RData::Empty);
        }
        let start = r.pos();
        let end = start + rdlen;
        let parsed = Self::read_typed(rtype, r, rdlen);
        match parsed {
            Ok(rd) if r.pos() == end => Ok(rd),
            _ => {
                // structural mismatch: keep the raw bytes
                r.seek(start);
                Ok(RData::Unknown(r.read_bytes(rdlen)?.to_vec()))
            }
        }
    }

    fn read_typed(rtype: RRType, r: &mut WireReader<'_>, rdlen: usize) -> Result<RData> {
        let end = r.pos() + rdlen;
        let rd = match rtype {
            RRType::A => {
                let b = r.read_bytes(4)?;
                RData::A(Ipv4Addr::new(b[0], b[1], b[2], b[3]))
            }
            RRType::AAAA => {
                let b = r.read_bytes(16)?;
                let mut oct = [0u8; 16];
                oct.copy_from_slice(b);
                RData::Aaaa(Ipv6Addr::from(oct))
            }
            RRType::NS => RData::Ns(r.read_name()?),
            RRType::CNAME => RData::Cname(r.read_name()?),
            RRType::PTR => RData::Ptr(r.read_name()?),
            RRType::MX => RData::Mx {
                preference: r.read_u16()?,
                exchange: r.read_name()?,
            },
            RRType::TXT => {
                let mut strings = Vec::new();
                while r.pos() < end {
                    let len = r.read_u8()? as usize;
                    strings.push(String::from_utf8_lossy(r.read_bytes(len)?).into_owned());
                }
                RData::Txt(strings)
            }
            RRType::SOA => RData::Soa(SoaData {
                mname: r.read_name()?,
                rname: r.read_name()?,
                serial: r.read_u32()?,
                refresh: r.read_u32()?,
                retry: r.read_u32()?,
                expire: r.read_u32()?,
                minimum: r.read_u32()?,
            }),
            RRType::SRV => RData::Srv {
                priority: r.read_u16()?,
                weight: r.read_u16()?,
                port: r.read_u16()?,
                target: r.read_name()?,
            },
            RRType::SVCB | RRType::HTTPS | RRType::DELEG => {
                let priority = r.read_u16()?;
                let target = r.read_name()?;
                let mut params = Vec::new();
                while r.pos() < end {
                    let key = r.read_u16()?;
                    let len = r.read_u16()? as usize;
                    params.push(SvcParam {
                        key,
                        value: r.read_bytes(len)?.to_vec(),
                    });
                }
                let data = SvcbData { priority, target, params };
                match rtype {
                    RRType::SVCB => RData::Svcb(data),
                    RRType::HTTPS => RData::Https(data),
                    _ => RData::Deleg(data),
                }
            }
            RRType::DS | RRType::CDS => {
                let data = DsData {
                    key_tag: r.read_u16()?,
                    algorithm: r.read_u8()?,
                    digest_type: r.read_u8()?,
                    digest: r.read_bytes(end - r.pos())?.to_vec(),
                };
                if rtype == RRType::DS {
                    RData::Ds(data)
                } else {
                    RData::Cds(data)
                }
            }
            RRType::DNSKEY | RRType::CDNSKEY | RRType::KEY => {
                let data = DnskeyData {
                    flags: r.read_u16()?,
                    protocol: r.read_u8()?,
                    algorithm: r.read_u8()?,
                    public_key: r.read_bytes(end - r.pos())?.to_vec(),
                };
                match rtype {
                    RRType::DNSKEY => RData::Dnskey(data),
                    RRType::CDNSKEY => RData::Cdnskey(data),
                    _ => RData::Key(data),
                }
            }
            RRType::RRSIG | RRType::SIG => {
                let data = RrsigData {
                    type_covered: RRType::from(r.read_u16()?),
                    algorithm: r.read_u8()?,
                    labels: r.read_u8()?,
                    original_ttl: r.read_u32()?,
                    expiration: r.read_u32()?,
                    inception: r.read_u32()?,
                    key_tag: r.read_u16()?,
                    signer: r.read_name()?,
                    signature: r.read_bytes(end - r.pos())?.to_vec(),
                };
                if rtype == RRType::RRSIG {
                    RData::Rrsig(data)
                } else {
                    RData::Sig(data)
                }
            }
            RRType::NSEC => {
                let next = r.read_name()?;
                let bitmap = r.read_bytes(end - r.pos())?;
                RData::Nsec(NsecData {
                    next,
                    types: read_type_bitmap(bitmap),
                })
            }
            RRType::CSYNC => {
                let serial = r.read_u32()?;
                let flags = r.read_u16()?;
                let bitmap = r.read_bytes(end - r.pos())?;
                RData::Csync(CsyncData {
                    serial,
                    flags,
                    types: read_type_bitmap(bitmap),
                })
            }
            RRType::TLSA => RData::Tlsa(TlsaData {
                usage: r.read_u8()?,
                selector: r.read_u8()?,
                matching: r.read_u8()?,
                cert_data: r.read_bytes(end - r.pos())?.to_vec(),
            }),
            RRType::DSYNC | RRType::NOTIFY => {
                let data = DsyncData {
                    target_type: RRType::from(r.read_u16()?),
                    scheme: r.read_u8()?,
                    port: r.read_u16()?,
                    target: r.read_name()?,
                };
                if rtype == RRType::DSYNC {
                    RData::Dsync(data)
                } else {
                    RData::NotifyRr(data)
                }
            }
            RRType::HSYNC => RData::Hsync(HsyncData {
                state: r.read_u8()?,
                nsmgmt: r.read_u8()?,
                sign: r.read_u8()?,
                identity: r.read_name()?,
                upstream: r.read_name()?,
            }),
            RRType::HSYNC2 => RData::Hsync2(Hsync2Data {
                flags: r.read_u16()?,
                identity: r.read_name()?,
                upstream: r.read_name()?,
            }),
            RRType::MSIGNER => RData::Msigner(MsignerData {
                scheme: r.read_u8()?,
                target: r.read_name()?,
            }),
            _ => RData::Unknown(r.read_bytes(rdlen)?.to_vec()),
        };
        Ok(rd)
    }

    /// Write the rdata (without the length prefix). Embedded names are
    /// never compressed.
    pub fn write(&self, w: &mut WireWriter) {
        match self {
            RData::A(addr) => w.write_bytes(&addr.octets()),
            RData::Aaaa(addr) => w.write_bytes(&addr.octets()),
            RData::Ns(n) | RData::Cname(n) | RData::Ptr(n) => w.write_name_uncompressed(n),
            RData::Mx { preference, exchange } => {
                w.write_u16(*preference);
                w.write_name_uncompressed(exchange);
            }
            RData::Txt(strings) => {
                for s in strings {
                    w.write_u8(s.len() as u8);
                    w.write_bytes(s.as_bytes());
                }
            }
            RData::Soa(soa) => {
                w.write_name_uncompressed(&soa.mname);
                w.write_name_uncompressed(&soa.rname);
                w.write_u32(soa.serial);
                w.write_u32(soa.refresh);
                w.write_u32(soa.retry);
                w.write_u32(soa.expire);
                w.write_u32(soa.minimum);
            }
            RData::Srv { priority, weight, port, target } => {
                w.write_u16(*priority);
                w.write_u16(*weight);
                w.write_u16(*port);
                w.write_name_uncompressed(target);
            }
            RData::Svcb(d) | RData::Https(d) | RData::Deleg(d) => {
                w.write_u16(d.priority);
                w.write_name_uncompressed(&d.target);
                for p in &d.params {
                    w.write_u16(p.key);
                    w.write_u16(p.value.len() as u16);
                    w.write_bytes(&p.value);
                }
            }
            RData::Ds(d) | RData::Cds(d) => {
                w.write_u16(d.key_tag);
                w.write_u8(d.algorithm);
                w.write_u8(d.digest_type);
                w.write_bytes(&d.digest);
            }
            RData::Dnskey(k) | RData::Cdnskey(k) | RData::Key(k) => {
                w.write_u16(k.flags);
                w.write_u8(k.protocol);
                w.write_u8(k.algorithm);
                w.write_bytes(&k.public_key);
            }
            RData::Rrsig(s) | RData::Sig(s) => {
                w.write_u16(u16::from(s.type_covered));
                w.write_u8(s.algorithm);
                w.write_u8(s.labels);
                w.write_u32(s.original_ttl);
                w.write_u32(s.expiration);
                w.write_u32(s.inception);
                w.write_u16(s.key_tag);
                w.write_name_uncompressed(&s.signer);
                w.write_bytes(&s.signature);
            }
            RData::Nsec(n) => {
                w.write_name_uncompressed(&n.next);
                let mut bitmap = Vec::new();
                write_type_bitmap(&n.types, &mut bitmap);
                w.write_bytes(&bitmap);
            }
            RData::Csync(c) => {
                w.write_u32(c.serial);
                w.write_u16(c.flags);
                let mut bitmap = Vec::new();
                write_type_bitmap(&c.types, &mut bitmap);
                w.write_bytes(&bitmap);
            }
            RData::Tlsa(t) => {
                w.write_u8(t.usage);
                w.write_u8(t.selector);
                w.write_u8(t.matching);
                w.write_bytes(&t.cert_data);
            }
            RData::Dsync(d) | RData::NotifyRr(d) => {
                w.write_u16(u16::from(d.target_type));
                w.write_u8(d.scheme);
                w.write_u16(d.port);
                w.write_name_uncompressed(&d.target);
            }
            RData::Hsync(h) => {
                w.write_u8(h.state);
                w.write_u8(h.nsmgmt);
                w.write_u8(h.sign);
                w.write_name_uncompressed(&h.identity);
                w.write_name_uncompressed(&h.upstream);
            }
            RData::Hsync2(h) => {
                w.write_u16(h.flags);
                w.write_name_uncompressed(&h.identity);
                w.write_name_uncompressed(&h.upstream);
            }
            RData::Msigner(m) => {
                w.write_u8(m.scheme);
                w.write_name_uncompressed(&m.target);
            }
            RData::Empty => {}
            RData::Unknown(bytes) => w.write_bytes(bytes),
        }
    }

    /// Uncompressed rdata bytes, embedded names lowercased, as used for
    /// canonical RRset ordering and signing (RFC 4034 §6.2).
    pub fn to_canonical_wire(&self) -> Vec<u8> {
        let mut lowered = self.clone();
        lowered.fold_names();
        let mut w = WireWriter::new();
        lowered.write(&mut w);
        w.into_bytes()
    }

    fn fold_names(&mut self) {
        match self {
            RData::Ns(n) | RData::Cname(n) | RData::Ptr(n) => n.fold_case(),
            RData::Mx { exchange, .. } => exchange.fold_case(),
            RData::Soa(soa) => {
                soa.mname.fold_case();
                soa.rname.fold_case();
            }
            RData::Srv { target, .. } => target.fold_case(),
            RData::Rrsig(s) | RData::Sig(s) => s.signer.fold_case(),
            RData::Nsec(n) => n.next.fold_case(),
            _ => {}
        }
    }

    /// Parse presentation-format rdata tokens for `rtype`.
    pub fn parse_presentation(rtype: RRType, tokens: &[&str]) -> Result<RData> {
        let err = |msg: &str| TdnsError::ParseError(format!("{} rdata: {}", rtype, msg));
        let need = |n: usize| -> Result<()> {
            if tokens.len() < n {
                Err(err("too few fields"))
            } else {
                Ok(())
            }
        };
        let rd = match rtype {
            RRType::A => {
                need(1)?;
                RData::A(tokens[0].parse().map_err(|_| err("bad address"))?)
            }
            RRType::AAAA => {
                need(1)?;
                RData::Aaaa(tokens[0].parse().map_err(|_| err("bad address"))?)
            }
            RRType::NS => {
                need(1)?;
                RData::Ns(Name::parse(tokens[0])?)
            }
            RRType::CNAME => {
                need(1)?;
                RData::Cname(Name::parse(tokens[0])?)
            }
            RRType::PTR => {
                need(1)?;
                RData::Ptr(Name::parse(tokens[0])?)
            }
            RRType::MX => {
                need(2)?;
                RData::Mx {
                    preference: tokens[0].parse().map_err(|_| err("bad preference"))?,
                    exchange: Name::parse(tokens[1])?,
                }
            }
            RRType::TXT => {
                need(1)?;
                RData::Txt(
                    tokens
                        .iter()
                        .map(|t| t.trim_matches('"').to_string())
                        .collect(),
                )
            }
            RRType::SOA => {
                need(7)?;
                RData::Soa(SoaData {
                    mname: Name::parse(tokens[0])?,
                    rname: Name::parse(tokens[1])?,
                    serial: tokens[2].parse().map_err(|_| err("bad serial"))?,
                    refresh: tokens[3].parse().map_err(|_| err("bad refresh"))?,
                    retry: tokens[4].parse().map_err(|_| err("bad retry"))?,
                    expire: tokens[5].parse().map_err(|_| err("bad expire"))?,
                    minimum: tokens[6].parse().map_err(|_| err("bad minimum"))?,
                })
            }
            RRType::SRV => {
                need(4)?;
                RData::Srv {
                    priority: tokens[0].parse().map_err(|_| err("bad priority"))?,
                    weight: tokens[1].parse().map_err(|_| err("bad weight"))?,
                    port: tokens[2].parse().map_err(|_| err("bad port"))?,
                    target: Name::parse(tokens[3])?,
                }
            }
            RRType::DS | RRType::CDS => {
                need(4)?;
                let data = DsData {
                    key_tag: tokens[0].parse().map_err(|_| err("bad key tag"))?,
                    algorithm: tokens[1].parse().map_err(|_| err("bad algorithm"))?,
                    digest_type: tokens[2].parse().map_err(|_| err("bad digest type"))?,
                    digest: hex::decode(tokens[3..].concat()).map_err(|_| err("bad digest"))?,
                };
                if rtype == RRType::DS {
                    RData::Ds(data)
                } else {
                    RData::Cds(data)
                }
            }
            RRType::DNSKEY | RRType::CDNSKEY | RRType::KEY => {
                need(4)?;
                let data = DnskeyData {
                    flags: tokens[0].parse().map_err(|_| err("bad flags"))?,
                    protocol: tokens[1].parse().map_err(|_| err("bad protocol"))?,
                    algorithm: tokens[2].parse().map_err(|_| err("bad algorithm"))?,
                    public_key: base64::engine::general_purpose::STANDARD
                        .decode(tokens[3..].concat())
                        .map_err(|_| err("bad key data"))?,
                };
                match rtype {
                    RRType::DNSKEY => RData::Dnskey(data),
                    RRType::CDNSKEY => RData::Cdnskey(data),
                    _ => RData::Key(data),
                }
            }
            RRType::RRSIG | RRType::SIG => {
                need(9)?;
                let data = RrsigData {
                    type_covered: RRType::from_mnemonic(tokens[0])
                        .ok_or_else(|| err("bad covered type"))?,
                    algorithm: tokens[1].parse().map_err(|_| err("bad algorithm"))?,
                    labels: tokens[2].parse().map_err(|_| err("bad labels"))?,
                    original_ttl: tokens[3].parse().map_err(|_| err("bad original ttl"))?,
                    expiration: parse_rrsig_time(tokens[4]).ok_or_else(|| err("bad expiration"))?,
                    inception: parse_rrsig_time(tokens[5]).ok_or_else(|| err("bad inception"))?,
                    key_tag: tokens[6].parse().map_err(|_| err("bad key tag"))?,
                    signer: Name::parse(tokens[7])?,
                    signature: base64::engine::general_purpose::STANDARD
                        .decode(tokens[8..].concat())
                        .map_err(|_| err("bad signature"))?,
                };
                if rtype == RRType::RRSIG {
                    RData::Rrsig(data)
                } else {
                    RData::Sig(data)
                }
            }
            RRType::NSEC => {
                need(1)?;
                let mut types = Vec::new();
                for t in &tokens[1..] {
                    types.push(RRType::from_mnemonic(t).ok_or_else(|| err("bad type in bitmap"))?);
                }
                RData::Nsec(NsecData {
                    next: Name::parse(tokens[0])?,
                    types,
                })
            }
            RRType::CSYNC => {
                need(2)?;
                let mut types = Vec::new();
                for t in &tokens[2..] {
                    types.push(RRType::from_mnemonic(t).ok_or_else(|| err("bad type in bitmap"))?);
                }
                RData::Csync(CsyncData {
                    serial: tokens[0].parse().map_err(|_| err("bad serial"))?,
                    flags: tokens[1].parse().map_err(|_| err("bad flags"))?,
                    types,
                })
            }
            RRType::TLSA => {
                need(4)?;
                RData::Tlsa(TlsaData {
                    usage: tokens[0].parse().map_err(|_| err("bad usage"))?,
                    selector: tokens[1].parse().map_err(|_| err("bad selector"))?,
                    matching: tokens[2].parse().map_err(|_| err("bad matching"))?,
                    cert_data: hex::decode(tokens[3..].concat()).map_err(|_| err("bad cert data"))?,
                })
            }
            RRType::DSYNC | RRType::NOTIFY => {
                need(4)?;
                let data = DsyncData {
                    target_type: RRType::from_mnemonic(tokens[0])
                        .ok_or_else(|| err("bad target type"))?,
                    scheme: tokens[1].parse().map_err(|_| err("bad scheme"))?,
                    port: tokens[2].parse().map_err(|_| err("bad port"))?,
                    target: Name::parse(tokens[3])?,
                };
                if rtype == RRType::DSYNC {
                    RData::Dsync(data)
                } else {
                    RData::NotifyRr(data)
                }
            }
            RRType::HSYNC => {
                need(5)?;
                RData::Hsync(HsyncData {
                    state: tokens[0].parse().map_err(|_| err("bad state"))?,
                    nsmgmt: tokens[1].parse().map_err(|_| err("bad nsmgmt"))?,
                    sign: tokens[2].parse().map_err(|_| err("bad sign"))?,
                    identity: Name::parse(tokens[3])?,
                    upstream: Name::parse(tokens[4])?,
                })
            }
            RRType::HSYNC2 => {
                need(3)?;
                RData::Hsync2(Hsync2Data {
                    flags: tokens[0].parse().map_err(|_| err("bad flags"))?,
                    identity: Name::parse(tokens[1])?,
                    upstream: Name::parse(tokens[2])?,
                })
            }
            RRType::MSIGNER => {
                need(2)?;
                RData::Msigner(MsignerData {
                    scheme: tokens[0].parse().map_err(|_| err("bad scheme"))?,
                    target: Name::parse(tokens[1])?,
                })
            }
            RRType::SVCB | RRType::HTTPS | RRType::DELEG => {
                need(2)?;
                let priority = tokens[0].parse().map_err(|_| err("bad priority"))?;
                let target = Name::parse(tokens[1])?;
                let mut params = Vec::new();
                for t in &tokens[2..] {
                    if let Some(list) = t.strip_prefix("alpn=") {
                        let mut value = Vec::new();
                        for id in list.split(',') {
                            value.push(id.len() as u8);
                            value.extend_from_slice(id.as_bytes());
                        }
                        params.push(SvcParam { key: SVC_PARAM_ALPN, value });
                    }
                    // other SvcParams are not needed by the sync engines
                }
                let data = SvcbData { priority, target, params };
                match rtype {
                    RRType::SVCB => RData::Svcb(data),
                    RRType::HTTPS => RData::Https(data),
                    _ => RData::Deleg(data),
                }
            }
            _ => {
                // RFC 3597: \# <len> <hex>
                if tokens.first() == Some(&"\\#") {
                    need(2)?;
                    RData::Unknown(hex::decode(tokens[2..].concat()).map_err(|_| err("bad hex"))?)
                } else {
                    return Err(err("unsupported presentation format"));
                }
            }
        };
        Ok(rd)
    }
}

/// RRSIG timestamps in presentation form: YYYYMMDDHHmmSS or raw seconds.
fn parse_rrsig_time(s: &str) -> Option<u32> {
    if s.len() == 14 && s.chars().all(|c| c.is_ascii_digit()) {
        use chrono::{NaiveDate, NaiveDateTime};
        let y: i32 = s[0..4].parse().ok()?;
        let mo: u32 = s[4..6].parse().ok()?;
        let d: u32 = s[6..8].parse().ok()?;
        let h: u32 = s[8..10].parse().ok()?;
        let mi: u32 = s[10..12].parse().ok()?;
        let sec: u32 = s[12..14].parse().ok()?;
        let dt: NaiveDateTime = NaiveDate::from_ymd_opt(y, mo, d)?.and_hms_opt(h, mi, sec)?;
        Some(dt.and_utc().timestamp() as u32)
    } else {
        s.parse().ok()
    }
}

impl std::fmt::Display for RData {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            RData::A(addr) => write!(f, "{}", addr),
            RData::Aaaa(addr) => write!(f, "{}", addr),
            RData::Ns(n) | RData::Cname(n) | RData::Ptr(n) => write!(f, "{}", n),
            RData::Mx { preference, exchange } => write!(f, "{} {}", preference, exchange),
            RData::Txt(strings) => {
                let quoted: Vec<String> = strings.iter().map(|s| format!("\"{}\"", s)).collect();
                f.write_str(&quoted.join(" "))
            }
            RData::Soa(s) => write!(
                f,
                "{} {} {} {} {} {} {}",
                s.mname, s.rname, s.serial, s.refresh, s.retry, s.expire, s.minimum
            ),
            RData::Srv { priority, weight, port, target } => {
                write!(f, "{} {} {} {}", priority, weight, port, target)
            }
            RData::Svcb(d) | RData::Https(d) | RData::Deleg(d) => {
                write!(f, "{} {}", d.priority, d.target)?;
                let alpn = d.alpn();
                if !alpn.is_empty() {
                    write!(f, " alpn={}", alpn.join(","))?;
                }
                Ok(())
            }
            RData::Ds(d) | RData::Cds(d) => write!(
                f,
                "{} {} {} {}",
                d.key_tag,
                d.algorithm,
                d.digest_type,
                hex::encode_upper(&d.digest)
            ),
            RData::Dnskey(k) | RData::Cdnskey(k) | RData::Key(k) => write!(
                f,
                "{} {} {} {}",
                k.flags,
                k.protocol,
                k.algorithm,
                base64::engine::general_purpose::STANDARD.encode(&k.public_key)
            ),
            RData::Rrsig(s) | RData::Sig(s) => write!(
                f,
                "{} {} {} {} {} {} {} {} {}",
                s.type_covered,
                s.algorithm,
                s.labels,
                s.original_ttl,
                s.expiration,
                s.inception,
                s.key_tag,
                s.signer,
                base64::engine::general_purpose::STANDARD.encode(&s.signature)
            ),
            RData::Nsec(n) => {
                write!(f, "{}", n.next)?;
                for t in &n.types {
                    write!(f, " {}", t)?;
                }
                Ok(())
            }
            RData::Csync(c) => {
                write!(f, "{} {}", c.serial, c.flags)?;
                for t in &c.types {
                    write!(f, " {}", t)?;
                }
                Ok(())
            }
            RData::Tlsa(t) => write!(
                f,
                "{} {} {} {}",
                t.usage,
                t.selector,
                t.matching,
                hex::encode(&t.cert_data)
            ),
            RData::Dsync(d) | RData::NotifyRr(d) => {
                write!(f, "{} {} {} {}", d.target_type, d.scheme, d.port, d.target)
            }
            RData::Hsync(h) => write!(
                f,
                "{} {} {} {} {}",
                h.state, h.nsmgmt, h.sign, h.identity, h.upstream
            ),
            RData::Hsync2(h) => write!(f, "{} {} {}", h.flags, h.identity, h.upstream),
            RData::Msigner(m) => write!(f, "{} {}", m.scheme, m.target),
            RData::Empty => Ok(()),
            RData::Unknown(bytes) => write!(f, "\\# {} {}", bytes.len(), hex::encode(bytes)),
        }
    }
}
