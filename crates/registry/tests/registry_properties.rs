use chrono::{Duration, Utc};
use peershare_files::{ContentRecord, Fingerprint};
use peershare_registry::{
    Endpoint, HolderDirectory, HolderId, LivenessSweeper, ManualClock, MemoryHolderDirectory,
    MemoryOfferStore, PeerRegistry, RegistryConfig,
};
use std::collections::BTreeSet;
use std::net::IpAddr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;

struct Fixture {
    registry: PeerRegistry,
    clock: Arc<ManualClock>,
}

impl Fixture {
    fn new() -> Self {
        let clock = Arc::new(ManualClock::new(Utc::now()));
        let holders = Arc::new(MemoryHolderDirectory::new());
        holders
            .register_with_id(HolderId(1), "alice", "alice-token")
            .unwrap();
        holders
            .register_with_id(HolderId(2), "bob", "bob-token")
            .unwrap();
        let registry = PeerRegistry::new(
            Arc::new(MemoryOfferStore::new()),
            holders,
            clock.clone(),
            RegistryConfig::default(),
        );
        Self { registry, clock }
    }
}

fn ip(s: &str) -> IpAddr {
    s.parse().unwrap()
}

fn file(byte: u8, name: &str) -> ContentRecord {
    ContentRecord::new(Fingerprint::from_bytes([byte; 32]), name, 1)
}

fn offered_names(registry: &PeerRegistry, holder: HolderId) -> BTreeSet<String> {
    registry
        .search("")
        .unwrap()
        .into_iter()
        .filter(|group| group.peers.iter().any(|p| p.holder_id == holder))
        .map(|group| group.display_name)
        .collect()
}

#[test]
fn end_to_end_announce_then_search() {
    let fx = Fixture::new();
    let fingerprint = Fingerprint::from_hex(&"a".repeat(64)).unwrap();

    let announced = fx
        .registry
        .announce(
            HolderId(1),
            Endpoint::new(ip("10.0.0.5"), 8001, None),
            vec![ContentRecord::new(fingerprint, "x.txt", 10)],
        )
        .unwrap();
    assert_eq!(announced, 1);

    let groups = fx.registry.search("x").unwrap();
    assert_eq!(groups.len(), 1);
    assert_eq!(groups[0].fingerprint.to_hex(), "a".repeat(64));
    assert_eq!(groups[0].display_name, "x.txt");
    assert_eq!(groups[0].size_bytes, 10);
    assert_eq!(groups[0].peers.len(), 1);
    assert_eq!(groups[0].peers[0].ip_address, ip("10.0.0.5"));
    assert_eq!(groups[0].peers[0].port, 8001);
    assert_eq!(groups[0].peers[0].holder_label, "alice");
}

#[test]
fn reannounce_replaces_offer_set() {
    let fx = Fixture::new();
    let endpoint = Endpoint::new(ip("10.0.0.5"), 8001, None);

    fx.registry
        .announce(HolderId(1), endpoint.clone(), vec![file(1, "a.txt"), file(2, "b.txt")])
        .unwrap();
    fx.registry
        .announce(HolderId(1), endpoint, vec![file(2, "b.txt"), file(3, "c.txt")])
        .unwrap();

    let names = offered_names(&fx.registry, HolderId(1));
    let expected: BTreeSet<String> = ["b.txt", "c.txt"].iter().map(|s| s.to_string()).collect();
    assert_eq!(names, expected);
}

#[test]
fn one_offer_per_holder_and_fingerprint() {
    let fx = Fixture::new();
    let shared = file(7, "shared.bin");

    fx.registry
        .announce(HolderId(1), Endpoint::new(ip("10.0.0.5"), 8001, None), vec![shared.clone()])
        .unwrap();
    // Same file from a second endpoint of the same holder moves the offer.
    fx.registry
        .announce(HolderId(1), Endpoint::new(ip("10.0.0.6"), 8002, None), vec![shared.clone()])
        .unwrap();
    fx.registry
        .announce(HolderId(2), Endpoint::new(ip("10.0.0.7"), 8003, None), vec![shared])
        .unwrap();

    let groups = fx.registry.search("shared").unwrap();
    assert_eq!(groups.len(), 1);
    let alice: Vec<_> = groups[0]
        .peers
        .iter()
        .filter(|p| p.holder_id == HolderId(1))
        .collect();
    assert_eq!(alice.len(), 1);
    assert_eq!(alice[0].port, 8002);
    assert_eq!(groups[0].peers.len(), 2);
    assert_eq!(fx.registry.stats().unwrap().offers, 2);
}

#[test]
fn heartbeat_only_touches_liveness() {
    let fx = Fixture::new();
    let endpoint = Endpoint::new(ip("10.0.0.5"), 8001, Some("http://tunnel.example".into()));
    fx.registry
        .announce(HolderId(1), endpoint, vec![file(1, "a.txt"), file(2, "b.txt")])
        .unwrap();
    let before = fx.registry.search("").unwrap();

    fx.clock.advance(Duration::seconds(30));
    let report = fx.registry.heartbeat(HolderId(1), None).unwrap();
    assert_eq!(report.refreshed, 2);
    assert!(!report.needs_reannounce());

    let after = fx.registry.search("").unwrap();
    assert_eq!(before.len(), after.len());
    for (b, a) in before.iter().zip(after.iter()) {
        assert_eq!(b.fingerprint, a.fingerprint);
        assert_eq!(b.peers[0].ip_address, a.peers[0].ip_address);
        assert_eq!(b.peers[0].port, a.peers[0].port);
        assert_eq!(b.peers[0].public_url, a.peers[0].public_url);
        assert_eq!(
            a.peers[0].last_heartbeat - b.peers[0].last_heartbeat,
            Duration::seconds(30)
        );
    }
}

#[test]
fn expired_offer_is_gone_from_search_after_threshold() {
    let fx = Fixture::new();
    fx.registry
        .announce(HolderId(1), Endpoint::new(ip("10.0.0.5"), 8001, None), vec![file(1, "x.txt")])
        .unwrap();

    fx.clock.advance(Duration::seconds(60));
    assert_eq!(fx.registry.search("x").unwrap().len(), 1);

    fx.clock.advance(Duration::seconds(1));
    assert!(fx.registry.search("x").unwrap().is_empty());
    assert_eq!(fx.registry.sweep().unwrap(), 0);
}

#[tokio::test]
async fn search_between_sweeper_ticks_hides_expired_offer() {
    let fx = Fixture::new();
    fx.registry
        .announce(HolderId(1), Endpoint::new(ip("10.0.0.5"), 8001, None), vec![file(1, "x.txt")])
        .unwrap();

    // Default period: the next tick is a minute away.
    let sweeper = LivenessSweeper::spawn(fx.registry.clone());
    tokio::time::sleep(std::time::Duration::from_millis(20)).await;

    fx.clock.advance(Duration::seconds(61));
    assert!(fx.registry.search("x").unwrap().is_empty());

    sweeper.stop().await;
}

#[test]
fn heartbeat_keeps_offer_alive_across_sweeps() {
    let fx = Fixture::new();
    fx.registry
        .announce(HolderId(1), Endpoint::new(ip("10.0.0.5"), 8001, None), vec![file(1, "x.txt")])
        .unwrap();

    for _ in 0..4 {
        fx.clock.advance(Duration::seconds(30));
        fx.registry.heartbeat(HolderId(1), None).unwrap();
        assert_eq!(fx.registry.sweep().unwrap(), 0);
    }
    assert_eq!(fx.registry.search("x").unwrap().len(), 1);
}

#[test]
fn search_groups_keep_arrival_order() {
    let fx = Fixture::new();
    let endpoint = Endpoint::new(ip("10.0.0.5"), 8001, None);
    fx.registry
        .announce(HolderId(1), endpoint.clone(), vec![file(3, "Report-2024.pdf")])
        .unwrap();
    fx.registry
        .announce(
            HolderId(2),
            Endpoint::new(ip("10.0.0.9"), 9000, None),
            vec![file(1, "annual-report.txt")],
        )
        .unwrap();

    let names: Vec<String> = fx
        .registry
        .search("REPORT")
        .unwrap()
        .into_iter()
        .map(|g| g.display_name)
        .collect();
    assert_eq!(names, vec!["Report-2024.pdf", "annual-report.txt"]);
}

#[test]
fn concurrent_search_never_sees_half_replaced_offers() {
    let fx = Fixture::new();
    let endpoint = Endpoint::new(ip("10.0.0.5"), 8001, None);
    let first = vec![file(1, "a.txt"), file(2, "b.txt")];
    let second = vec![file(2, "b.txt"), file(3, "c.txt")];
    fx.registry
        .announce(HolderId(1), endpoint.clone(), first.clone())
        .unwrap();

    let expected_first: BTreeSet<String> = ["a.txt", "b.txt"].iter().map(|s| s.to_string()).collect();
    let expected_second: BTreeSet<String> = ["b.txt", "c.txt"].iter().map(|s| s.to_string()).collect();
    let done = Arc::new(AtomicBool::new(false));

    let readers: Vec<_> = (0..4)
        .map(|_| {
            let registry = fx.registry.clone();
            let done = done.clone();
            let (a, b) = (expected_first.clone(), expected_second.clone());
            thread::spawn(move || {
                let mut observed = 0usize;
                while !done.load(Ordering::SeqCst) {
                    let names = offered_names(&registry, HolderId(1));
                    assert!(names == a || names == b, "torn offer set: {names:?}");
                    observed += 1;
                }
                observed
            })
        })
        .collect();

    for round in 0..500 {
        let files = if round % 2 == 0 { second.clone() } else { first.clone() };
        fx.registry
            .announce(HolderId(1), endpoint.clone(), files)
            .unwrap();
    }
    done.store(true, Ordering::SeqCst);

    for reader in readers {
        assert!(reader.join().expect("reader thread") > 0);
    }
}

#[test]
fn heartbeat_racing_sweep_never_loses_a_refreshed_offer() {
    let fx = Fixture::new();
    let endpoint = Endpoint::new(ip("10.0.0.5"), 8001, None);

    for _ in 0..200 {
        fx.registry
            .announce(HolderId(1), endpoint.clone(), vec![file(1, "x.txt")])
            .unwrap();
        fx.clock.advance(Duration::seconds(61));

        let sweeper = {
            let registry = fx.registry.clone();
            thread::spawn(move || registry.sweep().unwrap())
        };
        let report = fx.registry.heartbeat(HolderId(1), None).unwrap();
        let removed = sweeper.join().expect("sweep thread");

        let offers = fx.registry.stats().unwrap().offers;
        if report.refreshed == 1 {
            // The refresh landed first; the sweep must have kept the offer.
            assert_eq!(removed, 0);
            assert_eq!(offers, 1);
        } else {
            assert_eq!(removed, 1);
            assert_eq!(offers, 0);
        }
    }
}
