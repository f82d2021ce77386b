//! Beacon source against a fake beacon API served by warp

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use forkswap_backend::{sources_from_urls, BeaconSource};
use forkswap_core::error::SourceError;
use forkswap_core::progress::{ProgressClock, ProgressSource, RedundantClock};
use forkswap_core::types::ProgressSample;
use warp::http::StatusCode;
use warp::Filter;

/// Serve a beacon API reporting `slot` and `finalized`
async fn fake_beacon(slot: &'static str, finalized: &'static str) -> SocketAddr {
    let head = warp::path!("eth" / "v1" / "beacon" / "headers" / "head")
        .and(warp::get())
        .map(move || {
            warp::reply::json(&serde_json::json!({
                "data": {
                    "root": "0x00",
                    "canonical": true,
                    "header": { "message": { "slot": slot, "proposer_index": "3" }, "signature": "0x00" }
                }
            }))
        });
    let finality = warp::path!("eth" / "v1" / "beacon" / "states" / "head" / "finality_checkpoints")
        .and(warp::get())
        .map(move || {
            warp::reply::json(&serde_json::json!({
                "execution_optimistic": false,
                "data": {
                    "previous_justified": { "epoch": "0", "root": "0x00" },
                    "current_justified": { "epoch": "0", "root": "0x00" },
                    "finalized": { "epoch": finalized, "root": "0x00" }
                }
            }))
        });
    let (addr, server) = warp::serve(head.or(finality)).bind_ephemeral(([127, 0, 0, 1], 0));
    tokio::spawn(server);
    addr
}

/// Serve a beacon API that answers every request with 503
async fn syncing_beacon() -> SocketAddr {
    let routes = warp::any().map(|| warp::reply::with_status("syncing", StatusCode::SERVICE_UNAVAILABLE));
    let (addr, server) = warp::serve(routes).bind_ephemeral(([127, 0, 0, 1], 0));
    tokio::spawn(server);
    addr
}

/// Serve a beacon API whose head slot is a JSON number instead of a string
async fn garbled_beacon() -> SocketAddr {
    let routes = warp::any().map(|| warp::reply::json(&serde_json::json!({ "data": { "header": { "message": { "slot": 12 } } } })));
    let (addr, server) = warp::serve(routes).bind_ephemeral(([127, 0, 0, 1], 0));
    tokio::spawn(server);
    addr
}

fn source(addr: SocketAddr) -> BeaconSource {
    BeaconSource::new(&format!("http://{addr}"), Duration::from_secs(2)).unwrap()
}

#[tokio::test]
async fn reads_head_slot_and_finality() {
    let addr = fake_beacon("4242", "130").await;
    let beacon = source(addr);
    assert_eq!(beacon.head_slot().await.unwrap(), 4242);
    assert_eq!(beacon.finalized_epoch().await.unwrap(), 130);
}

#[tokio::test]
async fn non_success_status_is_unreachable() {
    let beacon = source(syncing_beacon().await);
    let err = beacon.head_slot().await.unwrap_err();
    assert!(matches!(err, SourceError::Unreachable { .. }), "{err}");
}

#[tokio::test]
async fn unexpected_body_is_malformed() {
    let beacon = source(garbled_beacon().await);
    let err = beacon.head_slot().await.unwrap_err();
    assert!(matches!(err, SourceError::Malformed { .. }), "{err}");
}

#[tokio::test]
async fn non_decimal_slot_is_malformed() {
    let beacon = source(fake_beacon("0x10", "1").await);
    let err = beacon.head_slot().await.unwrap_err();
    assert!(matches!(err, SourceError::Malformed { .. }), "{err}");
}

#[tokio::test]
async fn clock_falls_back_past_dead_and_syncing_nodes() {
    let syncing = syncing_beacon().await;
    let healthy = fake_beacon("97", "1").await;
    let urls = vec![
        // nothing listens on port 1
        "http://127.0.0.1:1".to_string(),
        format!("http://{syncing}"),
        format!("http://{healthy}/"),
    ];
    let sources = sources_from_urls(&urls, Duration::from_secs(2)).unwrap();
    let clock = RedundantClock::new(sources, Duration::from_secs(2), 32);

    assert_eq!(clock.sample().await, Some(ProgressSample { slot: 97, epoch: 3 }));
    assert_eq!(clock.finalized_epoch().await, Some(1));
}

#[tokio::test]
async fn clock_prefers_first_healthy_node() {
    let first = fake_beacon("100", "2").await;
    let second = fake_beacon("105", "2").await;
    let sources: Vec<Arc<dyn ProgressSource>> = vec![Arc::new(source(first)), Arc::new(source(second))];
    let clock = RedundantClock::new(sources, Duration::from_secs(2), 32);
    assert_eq!(clock.current_slot().await, Some(100));
}
