//! Zone transfers: outbound AXFR/IXFR service and the inbound AXFR
//! client used by secondaries (RFC 5936, RFC 1995).

use crate::dns::enums::{RRType, Rcode};
use crate::dns::message::Message;
use crate::dns::name::Name;
use crate::dns::rdata::RData;
use crate::dns::record::ResourceRecord;
use crate::error::{Result, TdnsError};
use crate::zone::zone::{Zone, serial_gt};
use std::net::SocketAddr;
use std::time::Duration;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio::time::timeout;
use tracing::{debug, info, warn};

/// Records per outbound envelope.
const ENVELOPE_RRS: usize = 400;
const TRANSFER_TIMEOUT: Duration = Duration::from_secs(30);

/// Build the AXFR response stream for a zone: leading SOA, the rest of
/// the apex, every other owner, trailing SOA. RRSIGs ride along with
/// their covered RRset.
pub fn build_axfr(zone: &Zone, query: &Message) -> Result<Vec<Message>> {
    let soa_set = zone
        .soa_rrset()
        .ok_or_else(|| TdnsError::MissingSoa(zone.name.to_string()))?;

    let mut rrs: Vec<ResourceRecord> = Vec::new();
    rrs.extend(soa_set.all_records());

    if let Some(apex) = zone.get_owner(&zone.name) {
        for rtype in apex.types() {
            if rtype == RRType::SOA {
                continue;
            }
            if let Some(set) = apex.get(rtype) {
                rrs.extend(set.all_records());
            }
        }
    }
    for owner in zone.owners_sorted() {
        if owner.name == zone.name {
            continue;
        }
        for rtype in owner.types() {
            if let Some(set) = owner.get(rtype) {
                rrs.extend(set.all_records());
            }
        }
    }
    // trailing SOA closes the stream
    rrs.extend(soa_set.rrs.iter().cloned());

    let mut envelopes = Vec::new();
    for chunk in rrs.chunks(ENVELOPE_RRS) {
        let mut resp = query.response();
        resp.header.aa = true;
        resp.answers = chunk.to_vec();
        envelopes.push(resp);
    }
    debug!(zone = %zone.name, envelopes = envelopes.len(), records = rrs.len(),
        "built AXFR response");
    Ok(envelopes)
}

/// Serve an IXFR request. Without delta history the reply is either the
/// single-SOA "you are current" form or a full AXFR-style stream.
pub fn build_ixfr(zone: &Zone, query: &Message) -> Result<Vec<Message>> {
    let client_serial = query.authorities.iter().find_map(|rr| match &rr.rdata {
        RData::Soa(soa) => Some(soa.serial),
        _ => None,
    });

    if let Some(client_serial) = client_serial {
        let current = zone.current_serial();
        if !serial_gt(current, client_serial) {
            let soa_set = zone
                .soa_rrset()
                .ok_or_else(|| TdnsError::MissingSoa(zone.name.to_string()))?;
            let mut resp = query.response();
            resp.header.aa = true;
            resp.answers = soa_set.rrs.clone();
            debug!(zone = %zone.name, serial = current, "IXFR client is current");
            return Ok(vec![resp]);
        }
    }
    build_axfr(zone, query)
}

/// Result of an inbound transfer attempt.
pub enum TransferOutcome {
    /// Primary's serial matched what we already have.
    Unchanged(u32),
    /// Full record set at the given serial, trailing SOA removed.
    Records { serial: u32, records: Vec<ResourceRecord> },
}

/// Pull a full zone from `primary` over TCP.
///
/// The first SOA starts the zone. If its serial equals `known_serial`
/// and `force` is false the remainder of the stream is discarded and the
/// zone declared unchanged.
pub async fn pull_axfr(
    zone_name: &Name,
    primary: SocketAddr,
    known_serial: u32,
    force: bool,
) -> Result<TransferOutcome> {
    let refresh_err = |reason: String| TdnsError::RefreshError {
        zone: zone_name.to_string(),
        reason,
    };

    let mut stream = timeout(TRANSFER_TIMEOUT, TcpStream::connect(primary))
        .await
        .map_err(|_| refresh_err("connect timeout".into()))?
        .map_err(|e| refresh_err(format!("connect: {}", e)))?;

    let query = Message::query(zone_name.clone(), RRType::AXFR);
    let query_id = query.header.id;
    let bytes = query.to_bytes();
    stream
        .write_all(&(bytes.len() as u16).to_be_bytes())
        .await
        .map_err(|e| refresh_err(format!("send: {}", e)))?;
    stream
        .write_all(&bytes)
        .await
        .map_err(|e| refresh_err(format!("send: {}", e)))?;

    let mut records: Vec<ResourceRecord> = Vec::new();
    let mut serial: Option<u32> = None;
    let mut soa_seen = 0usize;

    'stream: loop {
        let mut len_buf = [0u8; 2];
        timeout(TRANSFER_TIMEOUT, stream.read_exact(&mut len_buf))
            .await
            .map_err(|_| refresh_err("read timeout".into()))?
            .map_err(|e| refresh_err(format!("read: {}", e)))?;
        let len = u16::from_be_bytes(len_buf) as usize;
        let mut msg_buf = vec![0u8; len];
        timeout(TRANSFER_TIMEOUT, stream.read_exact(&mut msg_buf))
            .await
            .map_err(|_| refresh_err("read timeout".into()))?
            .map_err(|e| refresh_err(format!("read: {}", e)))?;

        let msg = Message::from_bytes(&msg_buf)
            .map_err(|e| refresh_err(format!("parse envelope: {}", e)))?;
        if msg.header.id != query_id {
            return Err(refresh_err("envelope id mismatch".into()));
        }
        if !msg.header.rcode.is_success() {
            return Err(refresh_err(format!("primary answered {}", msg.header.rcode)));
        }

        for rr in msg.answers {
            if rr.rtype == RRType::SOA {
                soa_seen += 1;
                if soa_seen == 1 {
                    let s = match &rr.rdata {
                        RData::Soa(soa) => soa.serial,
                        _ => return Err(refresh_err("malformed leading SOA".into())),
                    };
                    if s == known_serial && !force {
                        info!(zone = %zone_name, serial = s, "zone unchanged, discarding transfer");
                        return Ok(TransferOutcome::Unchanged(s));
                    }
                    serial = Some(s);
                    records.push(rr);
                    continue;
                }
                // trailing SOA terminates the stream
                break 'stream;
            }
            records.push(rr);
        }
        if soa_seen >= 2 {
            break;
        }
    }

    let serial = serial.ok_or_else(|| refresh_err("transfer without SOA".into()))?;
    info!(zone = %zone_name, serial, records = records.len(), "AXFR complete");
    Ok(TransferOutcome::Records { serial, records })
}

/// Apply a completed transfer: fill a fresh zone (the XfrZone phase) and
/// hand it back for an atomic swap into the store.
pub fn ingest_transfer(
    template: &Zone,
    serial: u32,
    records: Vec<ResourceRecord>,
) -> Result<std::sync::Arc<Zone>> {
    let fresh = Zone::new(
        template.name.clone(),
        template.ztype,
        crate::zone::zone::StoreKind::Map,
        template.update_policy.clone(),
    );
    *fresh.options.write() = template.options.read().clone();
    *fresh.primary.write() = *template.primary.read();
    *fresh.file_path.write() = template.file_path.read().clone();
    fresh.sort_records_in(records)?;
    fresh.set_incoming_serial(serial);
    if fresh.soa().is_none() {
        return Err(TdnsError::RefreshError {
            zone: template.name.to_string(),
            reason: "transferred zone has no SOA".into(),
        });
    }
    if fresh.current_serial() != serial {
        warn!(zone = %template.name, "SOA serial differs from envelope serial");
    }
    Ok(std::sync::Arc::new(fresh))
}
