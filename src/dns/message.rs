use crate::dns::edns::EdnsOpt;
use crate::dns::enums::{EdeCode, Opcode, RRType, Rcode};
use crate::dns::header::DnsHeader;
use crate::dns::name::Name;
use crate::dns::question::Question;
use crate::dns::rdata::RData;
use crate::dns::record::ResourceRecord;
use crate::dns::wire::{WireReader, WireWriter};
use crate::error::{Result, TdnsError};

/// A complete DNS message.
///
/// The OPT pseudo-record is lifted out of the additional section into
/// `edns`, and a trailing SIG(0) record is lifted into `sig0` together
/// with the exact preimage bytes RFC 2931 verification needs.
#[derive(Clone, Debug, Default)]
pub struct Message {
    pub header: DnsHeader,
    pub questions: Vec<Question>,
    pub answers: Vec<ResourceRecord>,
    pub authorities: Vec<ResourceRecord>,
    pub additionals: Vec<ResourceRecord>,
    pub edns: Option<EdnsOpt>,
    pub sig0: Option<ResourceRecord>,
    /// Received message bytes up to the SIG(0) record, with arcount
    /// already decremented; the verification buffer suffix.
    sig0_preimage: Option<Vec<u8>>,
}

impl Message {
    /// New query with a random id, RD clear.
    pub fn query(qname: Name, qtype: RRType) -> Self {
        let mut msg = Message {
            header: DnsHeader {
                id: rand::random::<u16>(),
                ..Default::default()
            },
            ..Default::default()
        };
        msg.questions.push(Question::new(qname, qtype));
        msg
    }

    /// New message with the given opcode and zone/question section.
    pub fn with_opcode(opcode: Opcode, qname: Name, qtype: RRType) -> Self {
        let mut msg = Self::query(qname, qtype);
        msg.header.opcode = opcode;
        msg
    }

    /// Start a response to this message: same id/opcode/question, QR set.
    pub fn response(&self) -> Message {
        let mut resp = Message::default();
        resp.header.id = self.header.id;
        resp.header.qr = true;
        resp.header.opcode = self.header.opcode;
        resp.header.rd = self.header.rd;
        resp.header.cd = self.header.cd;
        resp.questions = self.questions.clone();
        if let Some(edns) = &self.edns {
            let mut opt = EdnsOpt::new();
            opt.set_do_flag(edns.do_flag());
            resp.edns = Some(opt);
        }
        resp
    }

    /// Response carrying only an rcode.
    pub fn error_response(&self, rcode: Rcode) -> Message {
        let mut resp = self.response();
        resp.header.rcode = rcode;
        resp
    }

    /// SERVFAIL carrying an extended error.
    pub fn servfail_with_ede(&self, code: EdeCode, text: &str) -> Message {
        let mut resp = self.error_response(Rcode::ServFail);
        resp.edns.get_or_insert_with(EdnsOpt::new).set_ede(code, text);
        resp
    }

    pub fn qname(&self) -> Option<&Name> {
        self.questions.first().map(|q| &q.qname)
    }

    pub fn qtype(&self) -> Option<RRType> {
        self.questions.first().map(|q| q.qtype)
    }

    /// DO bit from EDNS, false without OPT.
    pub fn do_bit(&self) -> bool {
        self.edns.as_ref().map(|e| e.do_flag()).unwrap_or(false)
    }

    pub fn cd_bit(&self) -> bool {
        self.header.cd
    }

    pub fn ensure_edns(&mut self) -> &mut EdnsOpt {
        self.edns.get_or_insert_with(EdnsOpt::new)
    }

    pub fn to_bytes(&self) -> Vec<u8> {
        let mut w = WireWriter::new();
        let mut header = self.header.clone();
        header.qdcount = self.questions.len() as u16;
        header.ancount = self.answers.len() as u16;
        header.nscount = self.authorities.len() as u16;
        header.arcount = self.additionals.len() as u16
            + self.edns.is_some() as u16
            + self.sig0.is_some() as u16;
        header.write(&mut w);
        for q in &self.questions {
            q.write(&mut w);
        }
        for rr in self.answers.iter().chain(&self.authorities).chain(&self.additionals) {
            rr.write(&mut w);
        }
        if let Some(edns) = &self.edns {
            edns.write(&mut w);
        }
        if let Some(sig0) = &self.sig0 {
            sig0.write(&mut w);
        }
        w.into_bytes()
    }

    /// Serialize for UDP: when the full message exceeds `max`, fall back
    /// to header + question with TC set so the client retries over TCP.
    pub fn to_bytes_limited(&self, max: usize) -> Vec<u8> {
        let full = self.to_bytes();
        if full.len() <= max {
            return full;
        }
        let mut truncated = Message {
            header: self.header.clone(),
            questions: self.questions.clone(),
            edns: self.edns.clone(),
            ..Default::default()
        };
        truncated.header.tc = true;
        truncated.to_bytes()
    }

    pub fn from_bytes(buf: &[u8]) -> Result<Self> {
        let mut r = WireReader::new(buf);
        let header = DnsHeader::read(&mut r)?;
        let mut msg = Message {
            header: header.clone(),
            ..Default::default()
        };
        for _ in 0..header.qdcount {
            msg.questions.push(Question::read(&mut r)?);
        }
        for _ in 0..header.ancount {
            msg.answers.push(ResourceRecord::read(&mut r)?);
        }
        for _ in 0..header.nscount {
            msg.authorities.push(ResourceRecord::read(&mut r)?);
        }
        for i in 0..header.arcount {
            let record_start = r.pos();
            // peek for OPT without committing the reader
            let rr = {
                let name = r.read_name()?;
                let rtype = RRType::from(r.read_u16()?);
                if rtype == RRType::OPT {
                    msg.edns = Some(EdnsOpt::read_body(&mut r)?);
                    continue;
                }
                r.seek(record_start);
                let _ = name;
                ResourceRecord::read(&mut r)?
            };
            // a SIG(0) record must be the very last RR of the message
            let is_sig0 = rr.rtype == RRType::SIG
                && i + 1 == header.arcount
                && matches!(&rr.rdata, RData::Sig(sig) if u16::from(sig.type_covered) == 0);
            if is_sig0 {
                msg.sig0_preimage = Some(sig0_preimage(buf, record_start));
                msg.sig0 = Some(rr);
            } else {
                msg.additionals.push(rr);
            }
        }
        Ok(msg)
    }

    /// The byte buffer a SIG(0) signature was computed over, minus the
    /// leading SIG rdata prefix: original message with the SIG RR removed
    /// and arcount decremented (RFC 2931 §3.1).
    pub fn sig0_preimage(&self) -> Option<&[u8]> {
        self.sig0_preimage.as_deref()
    }

    /// Validate basic query shape before routing.
    pub fn check_query(&self) -> Result<()> {
        if self.questions.is_empty() {
            return Err(TdnsError::ParseError("message without question".into()));
        }
        Ok(())
    }
}

fn sig0_preimage(buf: &[u8], sig_start: usize) -> Vec<u8> {
    let mut pre = buf[..sig_start].to_vec();
    // patch arcount (bytes 10-11) down by one
    if pre.len() >= 12 {
        let arcount = u16::from_be_bytes([pre[10], pre[11]]).saturating_sub(1);
        pre[10..12].copy_from_slice(&arcount.to_be_bytes());
    }
    pre
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dns::rdata::RrsigData;
    use std::net::Ipv4Addr;

    #[test]
    fn test_message_roundtrip() {
        let mut msg = Message::query(Name::parse("www.example.com").unwrap(), RRType::A);
        msg.header.rd = true;
        msg.answers.push(ResourceRecord::new(
            Name::parse("www.example.com").unwrap(),
            RRType::A,
            300,
            RData::A(Ipv4Addr::new(192, 0, 2, 10)),
        ));
        msg.ensure_edns().set_do_flag(true);

        let bytes = msg.to_bytes();
        let parsed = Message::from_bytes(&bytes).unwrap();
        assert_eq!(parsed.header.id, msg.header.id);
        assert_eq!(parsed.questions, msg.questions);
        assert_eq!(parsed.answers, msg.answers);
        assert!(parsed.do_bit());
    }

    #[test]
    fn test_sig0_extraction() {
        let mut msg = Message::with_opcode(
            Opcode::Update,
            Name::parse("example.com").unwrap(),
            RRType::SOA,
        );
        msg.sig0 = Some(ResourceRecord::new(
            Name::parse("admin.example.com").unwrap(),
            RRType::SIG,
            0,
            RData::Sig(RrsigData {
                type_covered: RRType::from(0u16),
                algorithm: 15,
                labels: 0,
                original_ttl: 0,
                expiration: 2000000000,
                inception: 1000000000,
                key_tag: 12345,
                signer: Name::parse("admin.example.com").unwrap(),
                signature: vec![0u8; 64],
            }),
        ));
        let bytes = msg.to_bytes();
        let parsed = Message::from_bytes(&bytes).unwrap();
        assert!(parsed.sig0.is_some());
        assert!(parsed.additionals.is_empty());
        let pre = parsed.sig0_preimage().unwrap();
        // preimage is the message up to the SIG RR, arcount reduced to 0
        assert_eq!(u16::from_be_bytes([pre[10], pre[11]]), 0);
    }

    #[test]
    fn test_truncation() {
        let mut msg = Message::query(Name::parse("big.example.com").unwrap(), RRType::TXT);
        for i in 0..200 {
            msg.answers.push(ResourceRecord::new(
                Name::parse("big.example.com").unwrap(),
                RRType::TXT,
                60,
                RData::Txt(vec![format!("padding-{:04}", i)]),
            ));
        }
        let bytes = msg.to_bytes_limited(512);
        assert!(bytes.len() <= 512);
        let parsed = Message::from_bytes(&bytes).unwrap();
        assert!(parsed.header.tc);
        assert!(parsed.answers.is_empty());
    }
}
