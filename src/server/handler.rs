//! The shared message handler every transport feeds into.
//!
//! Classifies by opcode: NOTIFY lands on the refresher queue, UPDATE
//! runs the update pipeline, QUERY goes to the authoritative responder
//! or the IMR, anything else is NOTIMP.

use crate::dns::edns::EDNS_UDP_SIZE;
use crate::dns::enums::{Opcode, RRType, Rcode};
use crate::dns::message::Message;
use crate::error::Result;
use crate::resolver::Imr;
use crate::resolver::cache::ValidationState;
use crate::server::auth::AuthResponder;
use crate::update::pipeline::UpdatePipeline;
use crate::zone::refresh::RefreshRequest;
use crate::zone::store::ZoneStore;
use crate::zone::transfer;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tracing::{debug, warn};

pub struct Handler {
    pub zones: Arc<ZoneStore>,
    pub imr: Option<Arc<Imr>>,
    pub pipeline: UpdatePipeline,
    pub auth: AuthResponder,
    pub refresh_tx: mpsc::Sender<RefreshRequest>,
}

impl Handler {
    /// Handle one message; `stream` is true on connection-oriented
    /// transports where multi-message responses (AXFR) are possible.
    pub async fn handle(&self, bytes: &[u8], src: SocketAddr, stream: bool) -> Vec<Message> {
        let msg = match Message::from_bytes(bytes) {
            Ok(msg) => msg,
            Err(e) => {
                debug!(%src, error = %e, "unparseable message");
                // salvage the id when at least the header arrived
                if bytes.len() >= 12 {
                    let mut resp = Message::default();
                    resp.header.id = u16::from_be_bytes([bytes[0], bytes[1]]);
                    resp.header.qr = true;
                    resp.header.rcode = Rcode::FormErr;
                    return vec![resp];
                }
                return Vec::new();
            }
        };
        if msg.header.qr {
            return Vec::new();
        }

        match msg.header.opcode {
            Opcode::Notify => vec![self.handle_notify(&msg, src).await],
            Opcode::Update => vec![self.pipeline.handle_update(&msg).await],
            Opcode::Query => self.handle_query(msg, src, stream).await,
            _ => vec![msg.error_response(Rcode::NotImp)],
        }
    }

    async fn handle_notify(&self, msg: &Message, src: SocketAddr) -> Message {
        let Some(qname) = msg.qname() else {
            return msg.error_response(Rcode::FormErr);
        };
        if self.zones.get(qname).is_none() {
            debug!(zone = %qname, %src, "NOTIFY for zone we do not serve");
            return msg.error_response(Rcode::Refused);
        }
        let req = RefreshRequest {
            zone: qname.clone(),
            force: false,
        };
        if let Err(e) = self.refresh_tx.send_timeout(req, Duration::from_secs(2)).await {
            warn!(zone = %qname, error = %e, "refresh queue blocked, dropping NOTIFY");
        }
        msg.error_response(Rcode::NoError)
    }

    async fn handle_query(&self, msg: Message, src: SocketAddr, stream: bool) -> Vec<Message> {
        if msg.check_query().is_err() {
            return vec![msg.error_response(Rcode::FormErr)];
        }
        let qname = msg.questions[0].qname.clone();
        let qtype = msg.questions[0].qtype;

        if let Some(zone) = self.zones.find_zone(&qname) {
            match qtype {
                RRType::AXFR | RRType::IXFR if qname == zone.name => {
                    if !stream && qtype == RRType::AXFR {
                        // AXFR needs a stream; nudge the client to TCP
                        let mut resp = msg.response();
                        resp.header.tc = true;
                        return vec![resp];
                    }
                    let built = if qtype == RRType::AXFR {
                        transfer::build_axfr(&zone, &msg)
                    } else {
                        transfer::build_ixfr(&zone, &msg)
                    };
                    return match built {
                        Ok(envelopes) => {
                            debug!(zone = %zone.name, %src, "serving zone transfer");
                            envelopes
                        }
                        Err(e) => {
                            warn!(zone = %zone.name, error = %e, "transfer failed");
                            vec![msg.error_response(e.rcode())]
                        }
                    };
                }
                _ => return vec![self.auth.respond(&msg, &zone)],
            }
        }

        // not ours: iterate when asked and able
        if let Some(imr) = &self.imr {
            if msg.header.rd {
                return vec![self.resolve_recursive(imr, &msg, &qname, qtype).await];
            }
        }
        vec![msg.error_response(Rcode::Refused)]
    }

    async fn resolve_recursive(
        &self,
        imr: &Arc<Imr>,
        msg: &Message,
        qname: &crate::dns::name::Name,
        qtype: RRType,
    ) -> Message {
        let do_bit = msg.do_bit();
        let cd = msg.cd_bit();
        let result = imr.resolve(qname, qtype, do_bit, cd).await;

        let mut resp = msg.response();
        resp.header.ra = true;
        resp.header.rcode = result.rcode;
        resp.answers = result.answers;
        resp.authorities = result.authority;
        if result.state == ValidationState::Secure && !cd {
            resp.header.ad = true;
        }
        if let Some((code, text)) = result.ede {
            resp.ensure_edns().set_ede(code, &text);
        }
        if let Some(edns) = resp.edns.as_mut() {
            edns.udp_payload_size = EDNS_UDP_SIZE;
        }
        resp
    }
}

/// Serialize a handler response for UDP within the client's advertised
/// buffer.
pub fn udp_payload(query_edns_size: Option<u16>, resp: &Message) -> Vec<u8> {
    let limit = query_edns_size.map(|s| s.max(512)).unwrap_or(512) as usize;
    resp.to_bytes_limited(limit)
}

pub fn query_udp_size(bytes: &[u8]) -> Option<u16> {
    Message::from_bytes(bytes)
        .ok()
        .and_then(|m| m.edns.map(|e| e.udp_payload_size))
}

/// Shared helper for stream transports: 2-byte length prefix per
/// message.
pub fn frame(messages: &[Message]) -> Result<Vec<u8>> {
    let mut out = Vec::new();
    for msg in messages {
        let bytes = msg.to_bytes();
        out.extend_from_slice(&(bytes.len() as u16).to_be_bytes());
        out.extend_from_slice(&bytes);
    }
    Ok(out)
}
