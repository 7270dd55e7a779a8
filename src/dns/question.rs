use crate::dns::enums::{RRClass, RRType};
use crate::dns::name::Name;
use crate::dns::wire::{WireReader, WireWriter};
use crate::error::Result;

#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct Question {
    pub qname: Name,
    pub qtype: RRType,
    pub qclass: RRClass,
}

impl Question {
    pub fn new(qname: Name, qtype: RRType) -> Self {
        Self {
            qname,
            qtype,
            qclass: RRClass::IN,
        }
    }

    pub fn write(&self, w: &mut WireWriter) {
        w.write_name(&self.qname);
        w.write_u16(self.qtype.into());
        w.write_u16(self.qclass.into());
    }

    pub fn read(r: &mut WireReader<'_>) -> Result<Self> {
        Ok(Self {
            qname: r.read_name()?,
            qtype: RRType::from(r.read_u16()?),
            qclass: RRClass::from(r.read_u16()?),
        })
    }
}

impl std::fmt::Display for Question {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{} {} {}", self.qname, self.qclass, self.qtype)
    }
}
