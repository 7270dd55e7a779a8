//! Core admin operations and the thin JSON-over-HTTP wrapper around
//! them. Every zone and delegation-sync command maps to one core
//! function; the axum layer only deserializes, dispatches and
//! serializes.

use crate::dns::enums::{RRClass, RRType};
use crate::dns::name::Name;
use crate::dns::rdata::{DsyncData, RData};
use crate::dns::record::ResourceRecord;
use crate::error::TdnsError;
use crate::keydb::KeyDb;
use crate::sign;
use crate::update::{UpdateCmd, UpdateRequest};
use crate::zone::notify::NotifyRequest;
use crate::zone::parser::{ZoneFileParser, write_zone_file};
use crate::zone::store::ZoneStore;
use crate::zone::transfer::ingest_transfer;
use crate::zone::zone::Zone;
use axum::extract::State;
use axum::routing::post;
use axum::{Json, Router};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{broadcast, mpsc};
use tokio::task::JoinHandle;
use tracing::{info, warn};

pub struct AdminCtx {
    pub zones: Arc<ZoneStore>,
    pub keydb: Arc<KeyDb>,
    pub update_tx: mpsc::Sender<UpdateRequest>,
    pub notify_tx: mpsc::Sender<NotifyRequest>,
    pub signature_validity: Duration,
    /// Downstream NOTIFY targets per zone, from config.
    pub downstreams: HashMap<Name, Vec<SocketAddr>>,
}

#[derive(Clone, Debug, Deserialize)]
pub struct ZoneCmdRequest {
    pub command: String,
    #[serde(default)]
    pub zone: Option<String>,
    #[serde(default)]
    pub force: bool,
}

#[derive(Clone, Debug, Deserialize)]
pub struct DelegationCmdRequest {
    pub command: String,
    pub zone: String,
    #[serde(default)]
    pub target: Option<String>,
    #[serde(default)]
    pub port: Option<u16>,
}

#[derive(Clone, Debug, Default, Serialize)]
pub struct CommandResponse {
    pub error: bool,
    pub error_msg: String,
    pub msg: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub serial: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub zones: Option<Vec<ZoneInfo>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub chain: Option<Vec<String>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub key: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub nameservers: Option<Vec<String>>,
}

#[derive(Clone, Debug, Serialize)]
pub struct ZoneInfo {
    pub name: String,
    pub r#type: String,
    pub serial: u32,
    pub dirty: bool,
    pub frozen: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl CommandResponse {
    fn ok(msg: impl Into<String>) -> Self {
        Self {
            msg: msg.into(),
            ..Default::default()
        }
    }

    fn err(err: impl std::fmt::Display) -> Self {
        Self {
            error: true,
            error_msg: err.to_string(),
            ..Default::default()
        }
    }
}

impl AdminCtx {
    fn zone(&self, name: &str) -> Result<Arc<Zone>, TdnsError> {
        let name = Name::parse(name)?;
        self.zones
            .get(&name)
            .ok_or_else(|| TdnsError::ZoneNotFound(name.to_string()))
    }

    async fn internal_update(&self, cmd: UpdateCmd, zone: Name, actions: Vec<ResourceRecord>) {
        let mut req = UpdateRequest::new(cmd, zone.clone(), actions);
        req.internal = true;
        req.validated = true;
        req.trusted = true;
        if self.update_tx.send(req).await.is_err() {
            warn!(zone = %zone, "update queue closed, internal update dropped");
        }
    }

    // --- zone commands --------------------------------------------------

    pub async fn zone_command(&self, req: ZoneCmdRequest) -> CommandResponse {
        let result = match req.command.as_str() {
            "list-zones" => return self.list_zones(),
            "bump" | "write-zone" | "sign-zone" | "generate-nsec" | "show-nsec-chain"
            | "freeze" | "thaw" | "reload" => {
                let Some(zone_name) = &req.zone else {
                    return CommandResponse::err("command requires a zone");
                };
                match self.zone(zone_name) {
                    Ok(zone) => self.one_zone_command(&req, zone).await,
                    Err(e) => Err(e),
                }
            }
            other => Err(TdnsError::Config(format!("unknown zone command {:?}", other))),
        };
        result.unwrap_or_else(CommandResponse::err)
    }

    async fn one_zone_command(
        &self,
        req: &ZoneCmdRequest,
        zone: Arc<Zone>,
    ) -> Result<CommandResponse, TdnsError> {
        match req.command.as_str() {
            "bump" => {
                let serial = {
                    let _guard = zone.mu.lock();
                    zone.bump_serial()
                };
                zone.set_dirty(true);
                if let Some(targets) = self.downstreams.get(&zone.name) {
                    let _ = self
                        .notify_tx
                        .send(NotifyRequest {
                            zone: zone.name.clone(),
                            rtype: RRType::SOA,
                            targets: targets.clone(),
                        })
                        .await;
                }
                info!(zone = %zone.name, serial, "serial bumped");
                Ok(CommandResponse {
                    serial: Some(serial),
                    ..CommandResponse::ok("serial bumped")
                })
            }
            "write-zone" => {
                let path = zone
                    .file_path
                    .read()
                    .clone()
                    .ok_or_else(|| TdnsError::ZoneFileError("zone has no file".into()))?;
                let count = write_zone_file(&zone, &path)?;
                zone.set_dirty(false);
                Ok(CommandResponse::ok(format!(
                    "wrote {} records to {}",
                    count,
                    path.display()
                )))
            }
            "sign-zone" => {
                let signed = sign::sign_zone(&zone, &self.keydb, self.signature_validity)?;
                Ok(CommandResponse::ok(format!("signed {} RRsets", signed)))
            }
            "generate-nsec" => {
                let chain = sign::generate_nsec_chain(&zone)?;
                let links = chain.len();
                sign::nsec::install_nsec_chain(&zone, chain);
                Ok(CommandResponse::ok(format!("installed {} NSEC links", links)))
            }
            "show-nsec-chain" => {
                let chain = sign::generate_nsec_chain(&zone)?;
                Ok(CommandResponse {
                    chain: Some(chain.iter().map(|rr| rr.to_string()).collect()),
                    ..CommandResponse::ok("nsec chain")
                })
            }
            "freeze" => {
                zone.options.write().frozen = true;
                Ok(CommandResponse::ok("zone frozen"))
            }
            "thaw" => {
                zone.options.write().frozen = false;
                Ok(CommandResponse::ok("zone thawed"))
            }
            "reload" => self.reload_zone(&zone, req.force),
            _ => unreachable!("dispatched above"),
        }
    }

    fn reload_zone(&self, zone: &Arc<Zone>, force: bool) -> Result<CommandResponse, TdnsError> {
        let options = zone.options.read().clone();
        if options.allow_updates && options.dirty && !force {
            return Err(TdnsError::ZoneDirty(zone.name.to_string()));
        }
        let path = zone
            .file_path
            .read()
            .clone()
            .ok_or_else(|| TdnsError::ZoneFileError("zone has no file".into()))?;

        let mut parser = ZoneFileParser::with_origin(zone.name.clone());
        let parsed = parser.parse_file(&path)?;
        let serial = parsed
            .records
            .iter()
            .find_map(|rr| match &rr.rdata {
                RData::Soa(soa) => Some(soa.serial),
                _ => None,
            })
            .ok_or_else(|| TdnsError::MissingSoa(zone.name.to_string()))?;
        let fresh = ingest_transfer(zone, serial, parsed.records)?;
        self.zones.insert(fresh);
        info!(zone = %zone.name, serial, "zone reloaded");
        Ok(CommandResponse {
            serial: Some(serial),
            ..CommandResponse::ok("zone reloaded")
        })
    }

    fn list_zones(&self) -> CommandResponse {
        let mut infos = Vec::new();
        for name in self.zones.names() {
            if let Some(zone) = self.zones.get(&name) {
                let options = zone.options.read();
                infos.push(ZoneInfo {
                    name: zone.name.to_string(),
                    r#type: format!("{:?}", zone.ztype).to_lowercase(),
                    serial: zone.current_serial(),
                    dirty: options.dirty,
                    frozen: options.frozen,
                    error: zone.error.read().clone(),
                });
            }
        }
        infos.sort_by(|a, b| a.name.cmp(&b.name));
        CommandResponse {
            zones: Some(infos),
            ..CommandResponse::ok("zones")
        }
    }

    // --- delegation-sync commands ---------------------------------------

    pub async fn delegation_command(&self, req: DelegationCmdRequest) -> CommandResponse {
        let zone = match self.zone(&req.zone) {
            Ok(zone) => zone,
            Err(e) => return CommandResponse::err(e),
        };
        let result = match req.command.as_str() {
            "status" => self.delegation_status(&zone),
            "bootstrap-sig0-key" => self.bootstrap_sig0_key(&zone).await,
            "roll-sig0-key" => self.roll_sig0_key(&zone).await,
            "publish-dsync-rrset" => self.publish_dsync(&zone, &req).await,
            "unpublish-dsync-rrset" => self.unpublish_dsync(&zone).await,
            other => Err(TdnsError::Config(format!(
                "unknown delegation command {:?}",
                other
            ))),
        };
        result.unwrap_or_else(CommandResponse::err)
    }

    fn delegation_status(&self, zone: &Arc<Zone>) -> Result<CommandResponse, TdnsError> {
        let ns = zone
            .apex_rrset(RRType::NS)
            .map(|set| {
                set.rrs
                    .iter()
                    .filter_map(|rr| match &rr.rdata {
                        RData::Ns(t) => Some(t.to_string()),
                        _ => None,
                    })
                    .collect::<Vec<_>>()
            })
            .unwrap_or_default();
        let parent = zone.parent.read().parent.clone();
        Ok(CommandResponse {
            nameservers: Some(ns),
            ..CommandResponse::ok(match parent {
                Some(p) => format!("parent {}", p),
                None => "parent not yet discovered".to_string(),
            })
        })
    }

    async fn bootstrap_sig0_key(&self, zone: &Arc<Zone>) -> Result<CommandResponse, TdnsError> {
        let key = self.keydb.generate_sig0_key(&zone.name, "active")?;
        let rr = ResourceRecord::new(
            zone.name.clone(),
            RRType::KEY,
            3600,
            RData::Key(key.public.clone()),
        );
        if !zone.options.read().dont_publish_key {
            self.internal_update(UpdateCmd::ZoneUpdate, zone.name.clone(), vec![rr.clone()])
                .await;
        }
        Ok(CommandResponse {
            key: Some(rr.to_string()),
            ..CommandResponse::ok(format!("SIG(0) key {} bootstrapped", key.keyid))
        })
    }

    async fn roll_sig0_key(&self, zone: &Arc<Zone>) -> Result<CommandResponse, TdnsError> {
        let key = self.keydb.roll_sig0_key(&zone.name)?;
        let mut delete_old = ResourceRecord::new(zone.name.clone(), RRType::KEY, 0, RData::Empty);
        delete_old.class = RRClass::ANY;
        let add_new = ResourceRecord::new(
            zone.name.clone(),
            RRType::KEY,
            3600,
            RData::Key(key.public.clone()),
        );
        if !zone.options.read().dont_publish_key {
            self.internal_update(
                UpdateCmd::ZoneUpdate,
                zone.name.clone(),
                vec![delete_old, add_new.clone()],
            )
            .await;
        }
        Ok(CommandResponse {
            key: Some(add_new.to_string()),
            ..CommandResponse::ok(format!("SIG(0) key rolled to {}", key.keyid))
        })
    }

    async fn publish_dsync(
        &self,
        zone: &Arc<Zone>,
        req: &DelegationCmdRequest,
    ) -> Result<CommandResponse, TdnsError> {
        let target = req
            .target
            .as_deref()
            .ok_or_else(|| TdnsError::Config("publish-dsync-rrset requires a target".into()))?;
        let rr = ResourceRecord::new(
            zone.name.clone(),
            RRType::DSYNC,
            3600,
            RData::Dsync(DsyncData {
                target_type: RRType::CSYNC,
                scheme: 1,
                port: req.port.unwrap_or(53),
                target: Name::parse(target)?,
            }),
        );
        self.internal_update(UpdateCmd::ZoneUpdate, zone.name.clone(), vec![rr.clone()])
            .await;
        Ok(CommandResponse::ok(format!("published {}", rr)))
    }

    async fn unpublish_dsync(&self, zone: &Arc<Zone>) -> Result<CommandResponse, TdnsError> {
        let mut rr = ResourceRecord::new(zone.name.clone(), RRType::DSYNC, 0, RData::Empty);
        rr.class = RRClass::ANY;
        self.internal_update(UpdateCmd::ZoneUpdate, zone.name.clone(), vec![rr])
            .await;
        Ok(CommandResponse::ok("DSYNC RRset withdrawn"))
    }
}

// --- HTTP wrapper -------------------------------------------------------

async fn zone_handler(
    State(ctx): State<Arc<AdminCtx>>,
    Json(req): Json<ZoneCmdRequest>,
) -> Json<CommandResponse> {
    Json(ctx.zone_command(req).await)
}

async fn delegation_handler(
    State(ctx): State<Arc<AdminCtx>>,
    Json(req): Json<DelegationCmdRequest>,
) -> Json<CommandResponse> {
    Json(ctx.delegation_command(req).await)
}

pub fn router(ctx: Arc<AdminCtx>) -> Router {
    Router::new()
        .route("/api/v1/zone", post(zone_handler))
        .route("/api/v1/delegation", post(delegation_handler))
        .with_state(ctx)
}

pub async fn spawn_admin(
    listen: SocketAddr,
    ctx: Arc<AdminCtx>,
    mut shutdown: broadcast::Receiver<()>,
) -> std::io::Result<JoinHandle<()>> {
    let listener = tokio::net::TcpListener::bind(listen).await?;
    info!(%listen, "admin API listening");
    let app = router(ctx);
    Ok(tokio::spawn(async move {
        let serve = axum::serve(listener, app).with_graceful_shutdown(async move {
            let _ = shutdown.recv().await;
        });
        if let Err(e) = serve.await {
            warn!(error = %e, "admin API stopped with error");
        }
    }))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dns::rdata::SoaData;
    use crate::update::policy::UpdatePolicy;
    use crate::zone::zone::{StoreKind, ZoneType};

    fn ctx_with_zone() -> (Arc<AdminCtx>, mpsc::Receiver<UpdateRequest>) {
        let zones = Arc::new(ZoneStore::new());
        let zone = Zone::new(
            Name::parse("example.com").unwrap(),
            ZoneType::Primary,
            StoreKind::Map,
            UpdatePolicy::default(),
        );
        zone.sort_records_in(vec![ResourceRecord::new(
            Name::parse("example.com").unwrap(),
            RRType::SOA,
            3600,
            RData::Soa(SoaData {
                mname: Name::parse("ns1.example.com").unwrap(),
                rname: Name::parse("admin.example.com").unwrap(),
                serial: 41,
                refresh: 3600,
                retry: 900,
                expire: 604800,
                minimum: 86400,
            }),
        )])
        .unwrap();
        zones.insert(Arc::new(zone));

        let (update_tx, update_rx) = mpsc::channel(16);
        let (notify_tx, _notify_rx) = mpsc::channel(16);
        let ctx = Arc::new(AdminCtx {
            zones,
            keydb: Arc::new(KeyDb::open_in_memory().unwrap()),
            update_tx,
            notify_tx,
            signature_validity: Duration::from_secs(14 * 24 * 3600),
            downstreams: HashMap::new(),
        });
        (ctx, update_rx)
    }

    #[tokio::test]
    async fn test_bump_command() {
        let (ctx, _rx) = ctx_with_zone();
        let resp = ctx
            .zone_command(ZoneCmdRequest {
                command: "bump".into(),
                zone: Some("example.com".into()),
                force: false,
            })
            .await;
        assert!(!resp.error);
        assert_eq!(resp.serial, Some(42));
    }

    #[tokio::test]
    async fn test_freeze_blocks_until_thaw() {
        let (ctx, _rx) = ctx_with_zone();
        let resp = ctx
            .zone_command(ZoneCmdRequest {
                command: "freeze".into(),
                zone: Some("example.com".into()),
                force: false,
            })
            .await;
        assert!(!resp.error);
        let zone = ctx.zone("example.com").unwrap();
        assert!(zone.is_frozen());

        ctx.zone_command(ZoneCmdRequest {
            command: "thaw".into(),
            zone: Some("example.com".into()),
            force: false,
        })
        .await;
        assert!(!zone.is_frozen());
    }

    #[tokio::test]
    async fn test_list_zones() {
        let (ctx, _rx) = ctx_with_zone();
        let resp = ctx
            .zone_command(ZoneCmdRequest {
                command: "list-zones".into(),
                zone: None,
                force: false,
            })
            .await;
        let zones = resp.zones.unwrap();
        assert_eq!(zones.len(), 1);
        assert_eq!(zones[0].serial, 41);
        assert_eq!(zones[0].r#type, "primary");
    }

    #[tokio::test]
    async fn test_bootstrap_sig0_key_publishes() {
        let (ctx, mut rx) = ctx_with_zone();
        let resp = ctx
            .delegation_command(DelegationCmdRequest {
                command: "bootstrap-sig0-key".into(),
                zone: "example.com".into(),
                target: None,
                port: None,
            })
            .await;
        assert!(!resp.error, "{}", resp.error_msg);
        assert!(resp.key.is_some());
        // the KEY publication went onto the update queue as internal
        let req = rx.recv().await.unwrap();
        assert!(req.internal);
        assert_eq!(req.actions[0].rtype, RRType::KEY);
    }

    #[tokio::test]
    async fn test_unknown_command() {
        let (ctx, _rx) = ctx_with_zone();
        let resp = ctx
            .zone_command(ZoneCmdRequest {
                command: "explode".into(),
                zone: Some("example.com".into()),
                force: false,
            })
            .await;
        assert!(resp.error);
    }
}
