//! Transport listeners and the shared handler.
//!
//! All five fabrics (UDP, TCP, DoT, DoH, DoQ) feed the same handler.
//! Listeners stop accepting on shutdown and in-flight work drains
//! within the grace window enforced by main.

pub mod auth;
pub mod doh;
pub mod doq;
pub mod dot;
pub mod handler;
pub mod tcp;
pub mod tls;
pub mod udp;

use crate::config::ListenConfig;
use crate::error::{Result, TdnsError};
use handler::Handler;
use std::sync::Arc;
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tracing::{error, info};

/// Bind every configured listener. Individual bind failures are logged;
/// it is fatal when nothing could be bound at all.
pub async fn spawn_listeners(
    cfg: &ListenConfig,
    handler: Arc<Handler>,
    shutdown: &broadcast::Sender<()>,
) -> Result<Vec<JoinHandle<()>>> {
    let mut handles = Vec::new();
    let mut attempted = 0usize;

    for addr in &cfg.udp {
        attempted += 1;
        match udp::spawn_udp(*addr, handler.clone(), shutdown.subscribe()).await {
            Ok(h) => handles.push(h),
            Err(e) => error!(%addr, error = %e, "UDP bind failed"),
        }
    }
    for addr in &cfg.tcp {
        attempted += 1;
        match tcp::spawn_tcp(*addr, handler.clone(), shutdown.subscribe()).await {
            Ok(h) => handles.push(h),
            Err(e) => error!(%addr, error = %e, "TCP bind failed"),
        }
    }

    let needs_tls = !cfg.dot.is_empty() || !cfg.doh.is_empty() || !cfg.doq.is_empty();
    if needs_tls {
        let dot_tls = tls::load_tls_config(
            cfg.tls_cert.as_deref(),
            cfg.tls_key.as_deref(),
            &[b"dot"],
        )?;
        let doh_tls = tls::load_tls_config(
            cfg.tls_cert.as_deref(),
            cfg.tls_key.as_deref(),
            &[b"h2", b"http/1.1"],
        )?;
        let doq_tls = tls::load_tls_config(
            cfg.tls_cert.as_deref(),
            cfg.tls_key.as_deref(),
            &[b"doq"],
        )?;

        for addr in &cfg.dot {
            attempted += 1;
            match dot::spawn_dot(*addr, dot_tls.clone(), handler.clone(), shutdown.subscribe()).await
            {
                Ok(h) => handles.push(h),
                Err(e) => error!(%addr, error = %e, "DoT bind failed"),
            }
        }
        for addr in &cfg.doh {
            attempted += 1;
            match doh::spawn_doh(*addr, doh_tls.clone(), handler.clone(), shutdown.subscribe()).await
            {
                Ok(h) => handles.push(h),
                Err(e) => error!(%addr, error = %e, "DoH bind failed"),
            }
        }
        for addr in &cfg.doq {
            attempted += 1;
            match doq::spawn_doq(*addr, doq_tls.clone(), handler.clone(), shutdown.subscribe()).await
            {
                Ok(h) => handles.push(h),
                Err(e) => error!(%addr, error = %e, "DoQ bind failed"),
            }
        }
    }

    if handles.is_empty() && attempted > 0 {
        return Err(TdnsError::Config(
            "every configured listener failed to bind".into(),
        ));
    }
    info!(listeners = handles.len(), "transport listeners running");
    Ok(handles)
}
