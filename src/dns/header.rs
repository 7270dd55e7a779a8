use crate::dns::enums::{Opcode, Rcode};
use crate::dns::wire::{WireReader, WireWriter};
use crate::error::Result;

/// RFC 1035 message header.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct DnsHeader {
    pub id: u16,
    pub qr: bool,
    pub opcode: Opcode,
    pub aa: bool,
    pub tc: bool,
    pub rd: bool,
    pub ra: bool,
    /// AD bit (RFC 4035): answer passed DNSSEC validation.
    pub ad: bool,
    /// CD bit: client asked us not to validate.
    pub cd: bool,
    pub rcode: Rcode,
    pub qdcount: u16,
    pub ancount: u16,
    pub nscount: u16,
    pub arcount: u16,
}

impl DnsHeader {
    pub fn write(&self, w: &mut WireWriter) {
        w.write_u16(self.id);
        let mut flags: u16 = 0;
        if self.qr {
            flags |= 0x8000;
        }
        flags |= (u8::from(self.opcode) as u16 & 0x0F) << 11;
        if self.aa {
            flags |= 0x0400;
        }
        if self.tc {
            flags |= 0x0200;
        }
        if self.rd {
            flags |= 0x0100;
        }
        if self.ra {
            flags |= 0x0080;
        }
        if self.ad {
            flags |= 0x0020;
        }
        if self.cd {
            flags |= 0x0010;
        }
        flags |= u8::from(self.rcode) as u16 & 0x0F;
        w.write_u16(flags);
        w.write_u16(self.qdcount);
        w.write_u16(self.ancount);
        w.write_u16(self.nscount);
        w.write_u16(self.arcount);
    }

    pub fn read(r: &mut WireReader<'_>) -> Result<Self> {
        let id = r.read_u16()?;
        let flags = r.read_u16()?;
        Ok(Self {
            id,
            qr: flags & 0x8000 != 0,
            opcode: Opcode::from(((flags >> 11) & 0x0F) as u8),
            aa: flags & 0x0400 != 0,
            tc: flags & 0x0200 != 0,
            rd: flags & 0x0100 != 0,
            ra: flags & 0x0080 != 0,
            ad: flags & 0x0020 != 0,
            cd: flags & 0x0010 != 0,
            rcode: Rcode::from((flags & 0x0F) as u8),
            qdcount: r.read_u16()?,
            ancount: r.read_u16()?,
            nscount: r.read_u16()?,
            arcount: r.read_u16()?,
        })
    }
}
