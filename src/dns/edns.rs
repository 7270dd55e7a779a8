//! EDNS0 OPT pseudo-record handling (RFC 6891), extended DNS errors
//! (RFC 8914) and the opportunistic transport signal option carried on
//! outbound iterative queries.

use crate::dns::enums::EdeCode;
use crate::dns::name::Name;
use crate::dns::wire::{WireReader, WireWriter};
use crate::error::Result;

/// EDNS0 buffer size this server advertises and accepts.
pub const EDNS_UDP_SIZE: u16 = 4096;

/// Option code for extended DNS errors.
pub const OPT_CODE_EDE: u16 = 15;
/// Experimental option code for the opportunistic transport signal.
pub const OPT_CODE_OTS: u16 = 65023;

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct EdnsOption {
    pub code: u16,
    pub data: Vec<u8>,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct EdnsOpt {
    pub udp_payload_size: u16,
    pub extended_rcode: u8,
    pub version: u8,
    pub flags: u16,
    pub options: Vec<EdnsOption>,
}

impl Default for EdnsOpt {
    fn default() -> Self {
        Self {
            udp_payload_size: EDNS_UDP_SIZE,
            extended_rcode: 0,
            version: 0,
            flags: 0,
            options: Vec::new(),
        }
    }
}

impl EdnsOpt {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn do_flag(&self) -> bool {
        self.flags & 0x8000 != 0
    }

    pub fn set_do_flag(&mut self, value: bool) {
        if value {
            self.flags |= 0x8000;
        } else {
            self.flags &= !0x8000;
        }
    }

    /// Attach an RFC 8914 extended error.
    pub fn set_ede(&mut self, code: EdeCode, text: &str) {
        let mut data = u16::from(code).to_be_bytes().to_vec();
        data.extend_from_slice(text.as_bytes());
        self.options.retain(|o| o.code != OPT_CODE_EDE);
        self.options.push(EdnsOption {
            code: OPT_CODE_EDE,
            data,
        });
    }

    pub fn ede(&self) -> Option<(EdeCode, String)> {
        self.options.iter().find(|o| o.code == OPT_CODE_EDE).map(|o| {
            let code = if o.data.len() >= 2 {
                EdeCode::from(u16::from_be_bytes([o.data[0], o.data[1]]))
            } else {
                EdeCode::OtherError
            };
            let text = String::from_utf8_lossy(o.data.get(2..).unwrap_or(&[])).into_owned();
            (code, text)
        })
    }

    /// Attach the opportunistic transport signal option.
    pub fn set_transport_signal(&mut self) {
        self.options.retain(|o| o.code != OPT_CODE_OTS);
        self.options.push(EdnsOption {
            code: OPT_CODE_OTS,
            data: Vec::new(),
        });
    }

    pub fn has_transport_signal(&self) -> bool {
        self.options.iter().any(|o| o.code == OPT_CODE_OTS)
    }

    /// Serialize as an OPT RR into the additional section.
    pub fn write(&self, w: &mut WireWriter) {
        w.write_name_uncompressed(&Name::root());
        w.write_u16(41); // OPT
        w.write_u16(self.udp_payload_size);
        w.write_u8(self.extended_rcode);
        w.write_u8(self.version);
        w.write_u16(self.flags);
        let len_at = w.len();
        w.write_u16(0);
        let before = w.len();
        for opt in &self.options {
            w.write_u16(opt.code);
            w.write_u16(opt.data.len() as u16);
            w.write_bytes(&opt.data);
        }
        w.patch_u16(len_at, (w.len() - before) as u16);
    }

    /// Parse the OPT RR body after the owner name and type have been read.
    pub fn read_body(r: &mut WireReader<'_>) -> Result<Self> {
        let udp_payload_size = r.read_u16()?;
        let extended_rcode = r.read_u8()?;
        let version = r.read_u8()?;
        let flags = r.read_u16()?;
        let rdlen = r.read_u16()? as usize;
        let end = r.pos() + rdlen;
        let mut options = Vec::new();
        while r.pos() + 4 <= end {
            let code = r.read_u16()?;
            let len = r.read_u16()? as usize;
            options.push(EdnsOption {
                code,
                data: r.read_bytes(len)?.to_vec(),
            });
        }
        r.seek(end);
        Ok(Self {
            udp_payload_size,
            extended_rcode,
            version,
            flags,
            options,
        })
    }
}
