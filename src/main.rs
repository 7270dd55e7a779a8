use clap::Parser;
use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tdns::api::{self, AdminCtx};
use tdns::config::Config;
use tdns::delegation;
use tdns::dns::name::Name;
use tdns::error::Result;
use tdns::keydb::KeyDb;
use tdns::resolver::Imr;
use tdns::server::{self, auth::AuthResponder, handler::Handler};
use tdns::update::{self, pipeline::UpdatePipeline};
use tdns::zone::parser::ZoneFileParser;
use tdns::zone::refresh::RefreshRequest;
use tdns::zone::store::ZoneStore;
use tdns::zone::zone::{Zone, ZoneType};
use tdns::zone::{notify, refresh};
use tokio::sync::{broadcast, mpsc};
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

/// How long in-flight work gets to drain after shutdown is signalled.
const SHUTDOWN_GRACE: Duration = Duration::from_secs(5);

#[derive(Parser, Debug)]
#[command(name = "tdnsd", about = "Authoritative + iterative DNS nameserver")]
struct Args {
    /// Configuration file
    #[arg(short, long, default_value = "tdns.toml")]
    config: PathBuf,
}

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let args = Args::parse();
    if let Err(e) = run(args).await {
        error!(error = %e, "fatal");
        std::process::exit(1);
    }
}

async fn run(args: Args) -> Result<()> {
    let config = Config::load(&args.config)?;

    // the key store must open or the process has no business starting
    let keydb = Arc::new(KeyDb::open(&config.keystore.path)?);

    let zones = Arc::new(ZoneStore::new());
    let mut downstreams: HashMap<Name, Vec<std::net::SocketAddr>> = HashMap::new();
    let mut secondaries: Vec<Name> = Vec::new();
    for zc in &config.zones {
        let name = Name::parse(&zc.name)?;
        let zone = Zone::new(name.clone(), zc.ztype, zc.store, zc.update_policy.clone());
        *zone.options.write() = zc.options.clone();
        *zone.primary.write() = zc.primary;
        if let Some(file) = &zc.file {
            *zone.file_path.write() = Some(file.clone());
            if zc.ztype == ZoneType::Primary {
                let mut parser = ZoneFileParser::with_origin(name.clone());
                let parsed = parser.parse_file(file)?;
                zone.sort_records_in(parsed.records)?;
                zone.set_incoming_serial(zone.current_serial());
                info!(zone = %name, serial = zone.current_serial(), "zone loaded");
            }
        }
        if zc.ztype == ZoneType::Secondary {
            secondaries.push(name.clone());
        }
        if !zc.downstreams.is_empty() {
            downstreams.insert(name.clone(), zc.downstreams.clone());
        }
        zones.insert(Arc::new(zone));
    }

    let (shutdown_tx, _) = broadcast::channel::<()>(1);
    let signature_validity = Duration::from_secs(config.signing.validity_days * 24 * 3600);

    // engine plumbing: bounded channels throughout
    let (update_tx, update_rx) = mpsc::channel(1024);
    let (deferred_tx, deferred_rx) = mpsc::channel(256);
    let (sync_tx, sync_rx) = mpsc::channel(256);
    let (notify_tx, notify_rx) = mpsc::channel(256);
    let (refresh_tx, refresh_rx) = mpsc::channel(256);

    let mut engines = Vec::new();
    engines.push(update::spawn_update_worker(
        update_rx,
        zones.clone(),
        keydb.clone(),
        sync_tx,
        signature_validity,
        shutdown_tx.subscribe(),
    ));
    engines.push(update::spawn_deferred_engine(
        deferred_rx,
        zones.clone(),
        update_tx.clone(),
        shutdown_tx.subscribe(),
    ));
    engines.push(notify::spawn_notifier(notify_rx, shutdown_tx.subscribe()));
    engines.push(refresh::spawn_refresher(
        refresh_rx,
        zones.clone(),
        shutdown_tx.subscribe(),
    ));
    engines.push(delegation::spawn_parent_sync(
        sync_rx,
        zones.clone(),
        keydb.clone(),
        notify_tx.clone(),
        config.delegation_sync.scheme,
        shutdown_tx.subscribe(),
    ));
    // deferred updates are fed by future admin operations; the sender
    // stays alive for the lifetime of the process
    let _deferred_tx = deferred_tx;

    // kick off initial transfers for secondaries
    for name in secondaries {
        let _ = refresh_tx
            .send(RefreshRequest {
                zone: name,
                force: true,
            })
            .await;
    }

    let imr = if config.resolver.enabled {
        let imr = Imr::new(&config.resolver)?;
        imr.prime().await;
        Some(imr)
    } else {
        None
    };

    let handler = Arc::new(Handler {
        zones: zones.clone(),
        imr,
        pipeline: UpdatePipeline::new(zones.clone(), keydb.clone(), update_tx.clone()),
        auth: AuthResponder::new(keydb.clone(), signature_validity),
        refresh_tx: refresh_tx.clone(),
    });

    let listeners = server::spawn_listeners(&config.server, handler, &shutdown_tx).await?;

    if let Some(listen) = config.admin.listen {
        let ctx = Arc::new(AdminCtx {
            zones: zones.clone(),
            keydb: keydb.clone(),
            update_tx: update_tx.clone(),
            notify_tx: notify_tx.clone(),
            signature_validity,
            downstreams,
        });
        match api::spawn_admin(listen, ctx, shutdown_tx.subscribe()).await {
            Ok(handle) => engines.push(handle),
            Err(e) => warn!(%listen, error = %e, "admin API failed to start"),
        }
    }

    info!("tdnsd running");
    tokio::signal::ctrl_c().await.ok();
    info!("shutdown requested, draining");
    let _ = shutdown_tx.send(());

    let drain = async {
        for handle in listeners.into_iter().chain(engines) {
            let _ = handle.await;
        }
    };
    if tokio::time::timeout(SHUTDOWN_GRACE, drain).await.is_err() {
        warn!("grace window elapsed, exiting with tasks still running");
    }
    info!("bye");
    Ok(())
}
