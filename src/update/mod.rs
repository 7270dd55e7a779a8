//! RFC 2136 dynamic updates with SIG(0) authentication.
//!
//! The pipeline runs routing, validation and approval in the responder,
//! then funnels every mutation through one process-wide queue drained by
//! the zone-updater worker, so updates to a zone are totally ordered.

pub mod deferred;
pub mod pipeline;
pub mod policy;
pub mod sig0;
pub mod worker;

use crate::dns::enums::Rcode;
use crate::dns::name::Name;
use crate::dns::record::ResourceRecord;
use tokio::sync::oneshot;

pub use deferred::{DeferredUpdate, Precondition, spawn_deferred_engine};
pub use pipeline::UpdatePipeline;
pub use worker::spawn_update_worker;

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum UpdateCmd {
    ZoneUpdate,
    ChildUpdate,
    TrustStoreUpdate,
    Ping,
    DeferredUpdate,
}

/// One queued mutation. Action class encodes the RFC 2136 semantics:
/// IN adds, NONE deletes the exact RR, ANY deletes the RRset.
#[derive(Debug)]
pub struct UpdateRequest {
    pub cmd: UpdateCmd,
    pub zone_name: Name,
    pub actions: Vec<ResourceRecord>,
    pub validated: bool,
    pub trusted: bool,
    /// Internally sourced updates do not dirty the zone.
    pub internal: bool,
    pub signer: Option<Name>,
    /// Ack channel back to the responder, when someone is waiting.
    pub done: Option<oneshot::Sender<Rcode>>,
}

impl UpdateRequest {
    pub fn new(cmd: UpdateCmd, zone_name: Name, actions: Vec<ResourceRecord>) -> Self {
        Self {
            cmd,
            zone_name,
            actions,
            validated: false,
            trusted: false,
            internal: false,
            signer: None,
            done: None,
        }
    }
}
