//! Transport-level tests: Do53 query over a live UDP socket, AXFR over
//! TCP against our own listener, and the DoH GET path.

use base64::Engine;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use std::net::{Ipv4Addr, SocketAddr};
use std::sync::Arc;
use std::time::Duration;
use tdns::dns::enums::{RRType, Rcode};
use tdns::dns::message::Message;
use tdns::dns::name::Name;
use tdns::dns::rdata::{RData, SoaData};
use tdns::dns::record::ResourceRecord;
use tdns::keydb::KeyDb;
use tdns::server::auth::AuthResponder;
use tdns::server::handler::Handler;
use tdns::server::{doh, tcp, tls, udp};
use tdns::update::pipeline::UpdatePipeline;
use tdns::update::policy::UpdatePolicy;
use tdns::zone::store::ZoneStore;
use tdns::zone::transfer::{TransferOutcome, pull_axfr};
use tdns::zone::zone::{StoreKind, Zone, ZoneType};
use tokio::net::UdpSocket;
use tokio::sync::{broadcast, mpsc};

fn free_port() -> u16 {
    std::net::TcpListener::bind("127.0.0.1:0")
        .unwrap()
        .local_addr()
        .unwrap()
        .port()
}

fn build_handler() -> Arc<Handler> {
    let zones = Arc::new(ZoneStore::new());
    let keydb = Arc::new(KeyDb::open_in_memory().unwrap());

    let zone = Zone::new(
        Name::parse("example.com").unwrap(),
        ZoneType::Primary,
        StoreKind::Map,
        UpdatePolicy::default(),
    );
    zone.sort_records_in(vec![
        ResourceRecord::new(
            Name::parse("example.com").unwrap(),
            RRType::SOA,
            3600,
            RData::Soa(SoaData {
                mname: Name::parse("ns1.example.com").unwrap(),
                rname: Name::parse("admin.example.com").unwrap(),
                serial: 2024010100,
                refresh: 3600,
                retry: 900,
                expire: 604800,
                minimum: 86400,
            }),
        ),
        ResourceRecord::new(
            Name::parse("example.com").unwrap(),
            RRType::NS,
            3600,
            RData::Ns(Name::parse("ns1.example.com").unwrap()),
        ),
        ResourceRecord::new(
            Name::parse("www.example.com").unwrap(),
            RRType::A,
            300,
            RData::A(Ipv4Addr::new(192, 0, 2, 10)),
        ),
    ])
    .unwrap();
    zones.insert(Arc::new(zone));

    let (update_tx, _update_rx) = mpsc::channel(16);
    let (refresh_tx, _refresh_rx) = mpsc::channel(16);
    Arc::new(Handler {
        zones: zones.clone(),
        imr: None,
        pipeline: UpdatePipeline::new(zones.clone(), keydb.clone(), update_tx),
        auth: AuthResponder::new(keydb, Duration::from_secs(14 * 24 * 3600)),
        refresh_tx,
    })
}

#[tokio::test]
async fn test_do53_udp_query() {
    let port = free_port();
    let addr: SocketAddr = format!("127.0.0.1:{}", port).parse().unwrap();
    let (shutdown_tx, _) = broadcast::channel(1);
    udp::spawn_udp(addr, build_handler(), shutdown_tx.subscribe())
        .await
        .unwrap();

    let client = UdpSocket::bind("127.0.0.1:0").await.unwrap();
    let query = Message::query(Name::parse("www.example.com").unwrap(), RRType::A);
    client.send_to(&query.to_bytes(), addr).await.unwrap();

    let mut buf = vec![0u8; 4096];
    let (n, _) = tokio::time::timeout(Duration::from_secs(3), client.recv_from(&mut buf))
        .await
        .unwrap()
        .unwrap();
    let resp = Message::from_bytes(&buf[..n]).unwrap();
    assert_eq!(resp.header.id, query.header.id);
    assert_eq!(resp.header.rcode, Rcode::NoError);
    assert!(resp.header.aa);
    assert_eq!(resp.answers.len(), 1);
    assert_eq!(resp.answers[0].ttl, 300);
    assert_eq!(resp.answers[0].rdata, RData::A(Ipv4Addr::new(192, 0, 2, 10)));

    let _ = shutdown_tx.send(());
}

#[tokio::test]
async fn test_axfr_over_tcp_roundtrip() {
    let port = free_port();
    let addr: SocketAddr = format!("127.0.0.1:{}", port).parse().unwrap();
    let (shutdown_tx, _) = broadcast::channel(1);
    tcp::spawn_tcp(addr, build_handler(), shutdown_tx.subscribe())
        .await
        .unwrap();

    // our own transfer client against our own listener
    let outcome = pull_axfr(&Name::parse("example.com").unwrap(), addr, 0, false)
        .await
        .unwrap();
    match outcome {
        TransferOutcome::Records { serial, records } => {
            assert_eq!(serial, 2024010100);
            assert!(records.iter().any(|rr| {
                rr.name == Name::parse("www.example.com").unwrap() && rr.rtype == RRType::A
            }));
        }
        TransferOutcome::Unchanged(_) => panic!("expected records"),
    }

    // same serial again: the unchanged short-circuit kicks in
    let outcome = pull_axfr(&Name::parse("example.com").unwrap(), addr, 2024010100, false)
        .await
        .unwrap();
    assert!(matches!(outcome, TransferOutcome::Unchanged(2024010100)));

    let _ = shutdown_tx.send(());
}

#[tokio::test]
async fn test_doh_get_roundtrip() {
    let port = free_port();
    let addr: SocketAddr = format!("127.0.0.1:{}", port).parse().unwrap();
    let (shutdown_tx, _) = broadcast::channel(1);
    let tls_config = tls::load_tls_config(None, None, &[b"h2", b"http/1.1"]).unwrap();
    doh::spawn_doh(addr, tls_config, build_handler(), shutdown_tx.subscribe())
        .await
        .unwrap();

    let query = Message::query(Name::parse("example.com").unwrap(), RRType::SOA);
    let b64 = URL_SAFE_NO_PAD.encode(query.to_bytes());

    let client = reqwest::Client::builder()
        .use_rustls_tls()
        .danger_accept_invalid_certs(true)
        .build()
        .unwrap();
    let resp = client
        .get(format!("https://127.0.0.1:{}/dns-query?dns={}", port, b64))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 200);
    assert_eq!(
        resp.headers()
            .get(reqwest::header::CONTENT_TYPE)
            .unwrap()
            .to_str()
            .unwrap(),
        "application/dns-message"
    );
    let body = resp.bytes().await.unwrap();
    let answer = Message::from_bytes(&body).unwrap();
    assert_eq!(answer.header.rcode, Rcode::NoError);
    assert_eq!(answer.answers.len(), 1);
    assert_eq!(answer.answers[0].rtype, RRType::SOA);

    let _ = shutdown_tx.send(());
}

#[tokio::test]
async fn test_notify_enqueues_refresh() {
    let zones = Arc::new(ZoneStore::new());
    let zone = Zone::new(
        Name::parse("example.org").unwrap(),
        ZoneType::Secondary,
        StoreKind::Map,
        UpdatePolicy::default(),
    );
    zones.insert(Arc::new(zone));

    let keydb = Arc::new(KeyDb::open_in_memory().unwrap());
    let (update_tx, _update_rx) = mpsc::channel(16);
    let (refresh_tx, mut refresh_rx) = mpsc::channel(16);
    let handler = Handler {
        zones: zones.clone(),
        imr: None,
        pipeline: UpdatePipeline::new(zones.clone(), keydb.clone(), update_tx),
        auth: AuthResponder::new(keydb, Duration::from_secs(3600)),
        refresh_tx,
    };

    let mut notify = Message::with_opcode(
        tdns::dns::enums::Opcode::Notify,
        Name::parse("example.org").unwrap(),
        RRType::SOA,
    );
    notify.header.aa = true;
    let src: SocketAddr = "192.0.2.1:53".parse().unwrap();
    let responses = handler.handle(&notify.to_bytes(), src, false).await;
    assert_eq!(responses[0].header.rcode, Rcode::NoError);

    let req = refresh_rx.try_recv().unwrap();
    assert_eq!(req.zone, Name::parse("example.org").unwrap());

    // NOTIFY for an unknown zone is refused
    let stray = Message::with_opcode(
        tdns::dns::enums::Opcode::Notify,
        Name::parse("unknown.example").unwrap(),
        RRType::SOA,
    );
    let responses = handler.handle(&stray.to_bytes(), src, false).await;
    assert_eq!(responses[0].header.rcode, Rcode::Refused);
}
