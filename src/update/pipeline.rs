//! The update responder: routing, SIG(0) validation, policy approval,
//! and hand-off to the zone-updater queue.

use crate::dns::enums::{Opcode, Rcode};
use crate::dns::message::Message;
use crate::dns::rdata::RData;
use crate::error::TdnsError;
use crate::keydb::KeyDb;
use crate::update::sig0::{self, Sig0Outcome};
use crate::update::{UpdateCmd, UpdateRequest};
use crate::zone::store::ZoneStore;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, oneshot};
use tracing::{debug, info, warn};

const QUEUE_SEND_TIMEOUT: Duration = Duration::from_secs(2);
const APPLY_ACK_TIMEOUT: Duration = Duration::from_secs(5);

pub struct UpdatePipeline {
    zones: Arc<ZoneStore>,
    keydb: Arc<KeyDb>,
    update_tx: mpsc::Sender<UpdateRequest>,
}

impl UpdatePipeline {
    pub fn new(
        zones: Arc<ZoneStore>,
        keydb: Arc<KeyDb>,
        update_tx: mpsc::Sender<UpdateRequest>,
    ) -> Self {
        Self {
            zones,
            keydb,
            update_tx,
        }
    }

    /// Run an UPDATE message through the pipeline and produce the reply.
    pub async fn handle_update(&self, msg: &Message) -> Message {
        if msg.header.opcode != Opcode::Update || msg.questions.is_empty() {
            return msg.error_response(Rcode::FormErr);
        }
        let zone_name = msg.questions[0].qname.clone();

        // (a) routing
        let Some(zone) = self.zones.find_zone(&zone_name) else {
            debug!(zone = %zone_name, "update for zone we do not serve");
            return msg.error_response(Rcode::NotAuth);
        };
        if zone.is_frozen() {
            info!(zone = %zone.name, "update refused: zone frozen");
            return msg.error_response(Rcode::Refused);
        }

        let actions = msg.authorities.clone();
        if actions.is_empty() {
            return msg.error_response(Rcode::FormErr);
        }

        // child update when every action targets a name under a delegation
        let is_child = actions
            .iter()
            .all(|a| zone.find_delegation(&a.name).is_some());
        let options = zone.options.read().clone();
        if is_child && !options.allow_child_updates {
            info!(zone = %zone.name, "update refused: child updates not allowed");
            return msg.error_response(Rcode::Refused);
        }
        if !is_child && !options.allow_updates {
            info!(zone = %zone.name, "update refused: updates not allowed");
            return msg.error_response(Rcode::Refused);
        }

        // (b) validation
        let outcome = match sig0::verify_sig0(msg, &self.zones, &self.keydb) {
            Ok(outcome) => outcome,
            Err(TdnsError::UnknownSig0Key { keyname, keytag }) => {
                // (c) unvalidated key upload: exactly one self-signed KEY
                if zone.update_policy.allows_key_bootstrap(&actions) {
                    return self.bootstrap_key_upload(msg, &actions).await;
                }
                warn!(signer = %keyname, keytag, "update signed by unknown key");
                return msg.error_response(Rcode::BadSig);
            }
            Err(e) => {
                warn!(zone = %zone.name, error = %e, "SIG(0) validation failed");
                return msg.error_response(e.rcode());
            }
        };

        let (signer, validated, trusted) = match &outcome {
            Some(Sig0Outcome {
                signer,
                validated,
                trusted,
                ..
            }) => (Some(signer.clone()), *validated, *trusted),
            None => (None, false, false),
        };

        // (d) approval
        if let Err(violation) = zone.update_policy.approve_all(
            &zone.name,
            is_child,
            &actions,
            signer.as_ref(),
            trusted,
        ) {
            info!(zone = %zone.name, clause = %violation, "update refused by policy");
            return msg.error_response(Rcode::Refused);
        }

        // (e) enqueue for the zone-updater worker
        let mut req = UpdateRequest::new(
            if is_child {
                UpdateCmd::ChildUpdate
            } else {
                UpdateCmd::ZoneUpdate
            },
            zone.name.clone(),
            actions,
        );
        req.validated = validated;
        req.trusted = trusted;
        req.signer = signer;
        let (tx, rx) = oneshot::channel();
        req.done = Some(tx);

        if let Err(e) = self.update_tx.send_timeout(req, QUEUE_SEND_TIMEOUT).await {
            warn!(zone = %zone.name, error = %e, "update queue blocked, dropping update");
            return msg.error_response(Rcode::ServFail);
        }
        match tokio::time::timeout(APPLY_ACK_TIMEOUT, rx).await {
            Ok(Ok(rcode)) => msg.error_response(rcode),
            _ => msg.error_response(Rcode::ServFail),
        }
    }

    /// The bootstrap path: verify the upload against the key it carries
    /// (self-signed), then route it to the trust store pending trust.
    async fn bootstrap_key_upload(
        &self,
        msg: &Message,
        actions: &[crate::dns::record::ResourceRecord],
    ) -> Message {
        let key_rr = &actions[0];
        let RData::Key(key) = &key_rr.rdata else {
            return msg.error_response(Rcode::FormErr);
        };

        // self-signed check: the SIG(0) must verify with the uploaded key
        if let (Some(sig_rr), Some(preimage)) = (&msg.sig0, msg.sig0_preimage()) {
            if let RData::Sig(sig) = &sig_rr.rdata {
                let mut signed = sig.to_prefix_wire();
                signed.extend_from_slice(preimage);
                if sig0::verify_signature(sig.algorithm, &key.public_key, &signed, &sig.signature)
                    .is_err()
                {
                    warn!(key = %key_rr.name, "key upload is not self-signed, refusing");
                    return msg.error_response(Rcode::BadSig);
                }
            }
        }

        let mut req = UpdateRequest::new(
            UpdateCmd::TrustStoreUpdate,
            key_rr.name.clone(),
            vec![key_rr.clone()],
        );
        req.validated = false;
        req.trusted = false;
        let (tx, rx) = oneshot::channel();
        req.done = Some(tx);

        if let Err(e) = self.update_tx.send_timeout(req, QUEUE_SEND_TIMEOUT).await {
            warn!(error = %e, "update queue blocked, dropping key upload");
            return msg.error_response(Rcode::ServFail);
        }
        info!(key = %key_rr.name, "accepted unvalidated key upload");
        match tokio::time::timeout(APPLY_ACK_TIMEOUT, rx).await {
            Ok(Ok(rcode)) => msg.error_response(rcode),
            _ => msg.error_response(Rcode::ServFail),
        }
    }
}
