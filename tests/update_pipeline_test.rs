//! End-to-end update pipeline: SIG(0)-signed updates through routing,
//! validation, approval, the zone-updater worker, and back out via
//! AXFR.

use std::net::Ipv4Addr;
use std::sync::Arc;
use std::time::Duration;
use tdns::dns::enums::{Opcode, RRClass, RRType, Rcode};
use tdns::dns::message::Message;
use tdns::dns::name::Name;
use tdns::dns::rdata::{RData, SoaData};
use tdns::dns::record::ResourceRecord;
use tdns::keydb::KeyDb;
use tdns::update::pipeline::UpdatePipeline;
use tdns::update::policy::{KeyBootstrap, KeyUpload, PolicyType, UpdatePolicy};
use tdns::update::sig0;
use tdns::update::spawn_update_worker;
use tdns::zone::store::ZoneStore;
use tdns::zone::transfer::build_axfr;
use tdns::zone::zone::{StoreKind, Zone, ZoneType};
use tokio::sync::{broadcast, mpsc};

struct Env {
    zones: Arc<ZoneStore>,
    keydb: Arc<KeyDb>,
    pipeline: UpdatePipeline,
    _shutdown: broadcast::Sender<()>,
}

fn soa(serial: u32) -> RData {
    RData::Soa(SoaData {
        mname: Name::parse("ns1.example.com").unwrap(),
        rname: Name::parse("admin.example.com").unwrap(),
        serial,
        refresh: 3600,
        retry: 900,
        expire: 604800,
        minimum: 86400,
    })
}

fn setup(policy: UpdatePolicy) -> Env {
    let zones = Arc::new(ZoneStore::new());
    let keydb = Arc::new(KeyDb::open_in_memory().unwrap());

    let zone = Zone::new(
        Name::parse("example.com").unwrap(),
        ZoneType::Primary,
        StoreKind::Map,
        policy,
    );
    {
        let mut opts = zone.options.write();
        opts.allow_updates = true;
        opts.allow_child_updates = true;
    }
    zone.sort_records_in(vec![
        ResourceRecord::new(Name::parse("example.com").unwrap(), RRType::SOA, 3600, soa(2024010100)),
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
        ResourceRecord::new(
            Name::parse("child.example.com").unwrap(),
            RRType::NS,
            3600,
            RData::Ns(Name::parse("ns1.child.example.com").unwrap()),
        ),
    ])
    .unwrap();
    zones.insert(Arc::new(zone));

    let (update_tx, update_rx) = mpsc::channel(64);
    let (sync_tx, _sync_rx) = mpsc::channel(64);
    let (shutdown_tx, _) = broadcast::channel(1);
    spawn_update_worker(
        update_rx,
        zones.clone(),
        keydb.clone(),
        sync_tx,
        Duration::from_secs(14 * 24 * 3600),
        shutdown_tx.subscribe(),
    );

    let pipeline = UpdatePipeline::new(zones.clone(), keydb.clone(), update_tx);
    Env {
        zones,
        keydb,
        pipeline,
        _shutdown: shutdown_tx,
    }
}

fn selfsub_policy() -> UpdatePolicy {
    let mut policy = UpdatePolicy::default();
    policy.zone.ptype = PolicyType::SelfSub;
    policy.zone.rrtypes = [RRType::A, RRType::AAAA, RRType::KEY].into_iter().collect();
    policy
}

/// Register a trusted SIG(0) key and return it for signing.
fn trusted_key(env: &Env, signer: &str) -> tdns::keydb::SigningKey {
    let name = Name::parse(signer).unwrap();
    let key = env.keydb.generate_sig0_key(&name, "active").unwrap();
    let rr = ResourceRecord::new(name, RRType::KEY, 3600, RData::Key(key.public.clone()));
    env.keydb.add_sig0_trust(&rr, true, true, "manual").unwrap();
    key
}

fn signed_update(key: &tdns::keydb::SigningKey, actions: Vec<ResourceRecord>) -> Message {
    let mut msg = Message::with_opcode(
        Opcode::Update,
        Name::parse("example.com").unwrap(),
        RRType::SOA,
    );
    msg.authorities = actions;
    sig0::sign_message(&mut msg, key).unwrap();
    // through the wire so the verification preimage exists
    Message::from_bytes(&msg.to_bytes()).unwrap()
}

fn zone_serial(env: &Env) -> u32 {
    env.zones
        .get(&Name::parse("example.com").unwrap())
        .unwrap()
        .current_serial()
}

#[tokio::test]
async fn test_signed_update_applies_and_axfr_reflects_it() {
    let env = setup(selfsub_policy());
    let key = trusted_key(&env, "example.com");

    let add = ResourceRecord::new(
        Name::parse("www2.example.com").unwrap(),
        RRType::A,
        300,
        RData::A(Ipv4Addr::new(192, 0, 2, 11)),
    );
    let msg = signed_update(&key, vec![add]);
    let resp = env.pipeline.handle_update(&msg).await;
    assert_eq!(resp.header.rcode, Rcode::NoError);

    // serial advanced exactly once
    assert_eq!(zone_serial(&env), 2024010101);

    // a subsequent AXFR contains the new record
    let zone = env.zones.get(&Name::parse("example.com").unwrap()).unwrap();
    let axfr = build_axfr(&zone, &Message::query(zone.name.clone(), RRType::AXFR)).unwrap();
    let all: Vec<&ResourceRecord> = axfr.iter().flat_map(|m| m.answers.iter()).collect();
    assert!(all.iter().any(|rr| {
        rr.name == Name::parse("www2.example.com").unwrap()
            && rr.rdata == RData::A(Ipv4Addr::new(192, 0, 2, 11))
    }));
    // SOA brackets the stream and carries the bumped serial
    match &all.first().unwrap().rdata {
        RData::Soa(soa) => assert_eq!(soa.serial, 2024010101),
        other => panic!("expected SOA first, got {:?}", other),
    }
}

#[tokio::test]
async fn test_policy_rejection_leaves_zone_untouched() {
    // policy: self only, A/AAAA
    let mut policy = UpdatePolicy::default();
    policy.zone.ptype = PolicyType::SelfOnly;
    policy.zone.rrtypes = [RRType::A, RRType::AAAA].into_iter().collect();
    let env = setup(policy);
    let key = trusted_key(&env, "admin.example.com");

    // owner does not match the signer name
    let add = ResourceRecord::new(
        Name::parse("other.example.com").unwrap(),
        RRType::A,
        300,
        RData::A(Ipv4Addr::new(192, 0, 2, 12)),
    );
    let msg = signed_update(&key, vec![add]);
    let resp = env.pipeline.handle_update(&msg).await;
    assert_eq!(resp.header.rcode, Rcode::Refused);
    assert_eq!(zone_serial(&env), 2024010100);
    assert!(
        env.zones
            .get(&Name::parse("example.com").unwrap())
            .unwrap()
            .get_owner(&Name::parse("other.example.com").unwrap())
            .is_none()
    );
}

#[tokio::test]
async fn test_unsigned_update_refused_under_signer_policy() {
    let env = setup(selfsub_policy());
    let mut msg = Message::with_opcode(
        Opcode::Update,
        Name::parse("example.com").unwrap(),
        RRType::SOA,
    );
    msg.authorities.push(ResourceRecord::new(
        Name::parse("www.example.com").unwrap(),
        RRType::A,
        300,
        RData::A(Ipv4Addr::new(192, 0, 2, 13)),
    ));
    let msg = Message::from_bytes(&msg.to_bytes()).unwrap();
    let resp = env.pipeline.handle_update(&msg).await;
    assert_eq!(resp.header.rcode, Rcode::Refused);
}

#[tokio::test]
async fn test_frozen_zone_refuses_updates() {
    let env = setup(selfsub_policy());
    let key = trusted_key(&env, "example.com");
    env.zones
        .get(&Name::parse("example.com").unwrap())
        .unwrap()
        .options
        .write()
        .frozen = true;

    let add = ResourceRecord::new(
        Name::parse("www.example.com").unwrap(),
        RRType::A,
        300,
        RData::A(Ipv4Addr::new(192, 0, 2, 14)),
    );
    let msg = signed_update(&key, vec![add]);
    let resp = env.pipeline.handle_update(&msg).await;
    assert_eq!(resp.header.rcode, Rcode::Refused);
}

#[tokio::test]
async fn test_unvalidated_key_bootstrap() {
    // child policy permits unvalidated upload with self-signed bootstrap
    let mut policy = selfsub_policy();
    policy.child.ptype = PolicyType::SelfSub;
    policy.child.rrtypes = [RRType::KEY, RRType::NS, RRType::A].into_iter().collect();
    policy.child.key_upload = KeyUpload::Unvalidated;
    policy.child.key_bootstrap = KeyBootstrap::SelfSigned;
    let env = setup(policy);

    // the child's key exists nowhere in our trust store
    let child = Name::parse("child.example.com").unwrap();
    let key = env.keydb.generate_sig0_key(&child, "active").unwrap();
    let key_rr = ResourceRecord::new(
        child.clone(),
        RRType::KEY,
        3600,
        RData::Key(key.public.clone()),
    );

    let msg = signed_update(&key, vec![key_rr]);
    let resp = env.pipeline.handle_update(&msg).await;
    assert_eq!(resp.header.rcode, Rcode::NoError);

    // the key landed in the trust store pending trust
    let stored = env.keydb.sig0_trusted_keys(&child).unwrap();
    assert_eq!(stored.len(), 1);
    assert!(!stored[0].validated);
    assert!(!stored[0].trusted);

    // zone data itself is untouched
    assert_eq!(zone_serial(&env), 2024010100);
}

#[tokio::test]
async fn test_delete_rrset_action() {
    let env = setup(selfsub_policy());
    let key = trusted_key(&env, "example.com");

    let mut del = ResourceRecord::new(
        Name::parse("www.example.com").unwrap(),
        RRType::A,
        0,
        RData::Empty,
    );
    del.class = RRClass::ANY;
    let msg = signed_update(&key, vec![del]);
    let resp = env.pipeline.handle_update(&msg).await;
    assert_eq!(resp.header.rcode, Rcode::NoError);

    let zone = env.zones.get(&Name::parse("example.com").unwrap()).unwrap();
    assert!(zone.get_owner(&Name::parse("www.example.com").unwrap()).is_none());
    assert_eq!(zone.current_serial(), 2024010101);
}
