use crate::dns::enums::{RRClass, RRType};
use crate::dns::name::Name;
use crate::dns::rdata::RData;
use crate::dns::wire::{WireReader, WireWriter};
use crate::error::Result;

/// One resource record. Update actions are plain records whose class
/// carries the RFC 2136 semantics (IN=add, NONE=delete exact, ANY=delete
/// RRset).
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ResourceRecord {
    pub name: Name,
    pub rtype: RRType,
    pub class: RRClass,
    pub ttl: u32,
    pub rdata: RData,
}

impl ResourceRecord {
    pub fn new(name: Name, rtype: RRType, ttl: u32, rdata: RData) -> Self {
        Self {
            name,
            rtype,
            class: RRClass::IN,
            ttl,
            rdata,
        }
    }

    /// Equality ignoring TTL and class, the comparison RFC 2136 delete
    /// actions and add-dedup use.
    pub fn rdata_eq(&self, other: &ResourceRecord) -> bool {
        self.name == other.name
            && self.rtype == other.rtype
            && self.rdata.to_canonical_wire() == other.rdata.to_canonical_wire()
    }

    pub fn write(&self, w: &mut WireWriter) {
        w.write_name(&self.name);
        w.write_u16(self.rtype.into());
        w.write_u16(self.class.into());
        w.write_u32(self.ttl);
        let len_at = w.len();
        w.write_u16(0);
        let before = w.len();
        self.rdata.write(w);
        w.patch_u16(len_at, (w.len() - before) as u16);
    }

    /// Uncompressed canonical wire form (owner lowercased, rdata names
    /// lowercased) used in signing buffers.
    pub fn to_canonical_wire(&self, original_ttl: u32) -> Vec<u8> {
        let mut out = self.name.to_canonical_wire();
        out.extend_from_slice(&u16::from(self.rtype).to_be_bytes());
        out.extend_from_slice(&u16::from(self.class).to_be_bytes());
        out.extend_from_slice(&original_ttl.to_be_bytes());
        let rdata = self.rdata.to_canonical_wire();
        out.extend_from_slice(&(rdata.len() as u16).to_be_bytes());
        out.extend_from_slice(&rdata);
        out
    }

    pub fn read(r: &mut WireReader<'_>) -> Result<Self> {
        let name = r.read_name()?;
        let rtype = RRType::from(r.read_u16()?);
        let class = RRClass::from(r.read_u16()?);
        let ttl = r.read_u32()?;
        let rdlen = r.read_u16()? as usize;
        let rdata = RData::read(rtype, r, rdlen)?;
        Ok(Self {
            name,
            rtype,
            class,
            ttl,
            rdata,
        })
    }
}

impl std::fmt::Display for ResourceRecord {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "{}\t{}\t{}\t{}\t{}",
            self.name, self.ttl, self.class, self.rtype, self.rdata
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::net::Ipv4Addr;

    #[test]
    fn test_record_roundtrip() {
        let rr = ResourceRecord::new(
            Name::parse("www.example.com").unwrap(),
            RRType::A,
            300,
            RData::A(Ipv4Addr::new(192, 0, 2, 10)),
        );
        let mut w = WireWriter::new();
        rr.write(&mut w);
        let bytes = w.into_bytes();
        let mut r = WireReader::new(&bytes);
        assert_eq!(ResourceRecord::read(&mut r).unwrap(), rr);
    }

    #[test]
    fn test_rdata_eq_ignores_ttl() {
        let a = ResourceRecord::new(
            Name::parse("www.example.com").unwrap(),
            RRType::A,
            300,
            RData::A(Ipv4Addr::new(192, 0, 2, 10)),
        );
        let mut b = a.clone();
        b.ttl = 600;
        b.class = RRClass::NONE;
        assert!(a.rdata_eq(&b));
    }
}
