//! Port allocator integration tests

mod common;

use common::*;

use std::sync::Arc;

use wharf::errors::EngineError;
use wharf::ports::{PortAllocator, PortRange};

fn allocator(channel: Arc<ScriptedChannel>, min: u16, max: u16) -> PortAllocator {
    PortAllocator::new(channel, PortRange { min, max })
}

#[tokio::test]
async fn find_free_port_skips_listeners_and_rechecks_the_candidate() {
    let channel = Arc::new(ScriptedChannel::new());
    channel.on(
        "ss -tlnH",
        ok("LISTEN 0 511 0.0.0.0:4000 0.0.0.0:*\nLISTEN 0 511 0.0.0.0:4001 0.0.0.0:*\n"),
    );
    channel.on("sport = :4002", ok(""));

    let ports = allocator(channel.clone(), 4000, 4002);
    let port = ports.find_free_port().await.unwrap();

    assert_eq!(port, 4002);
    assert!(channel
        .commands()
        .iter()
        .any(|c| c.contains("sport = :4002")));
}

#[tokio::test]
async fn exhausted_range_is_an_error_before_anything_else_happens() {
    let channel = Arc::new(ScriptedChannel::new());
    channel.on("ss -tlnH", ok("LISTEN 0 511 0.0.0.0:4000 0.0.0.0:*\n"));

    let ports = allocator(channel.clone(), 4000, 4000);
    let result = ports.find_free_port().await;

    assert!(matches!(result, Err(EngineError::PortExhausted(_))));
}

#[tokio::test]
async fn allocation_race_is_caught_by_the_recheck() {
    let channel = Arc::new(ScriptedChannel::new());
    channel.on("ss -tlnH", ok(""));
    // Someone grabbed the port between the scan and the re-check
    channel.on("sport = :4000", ok("LISTEN 0 511 0.0.0.0:4000 0.0.0.0:*"));

    let ports = allocator(channel.clone(), 4000, 4000);
    let result = ports.find_free_port().await;

    assert!(matches!(result, Err(EngineError::PortExhausted(_))));
}

#[tokio::test]
async fn leases_prevent_double_allocation_until_released() {
    let channel = Arc::new(ScriptedChannel::new());
    channel.on("ss -tlnH", ok(""));
    channel.on("sport = :", ok(""));

    let ports = allocator(channel.clone(), 4000, 4010);
    let first = ports.find_free_port().await.unwrap();
    let second = ports.find_free_port().await.unwrap();
    assert_eq!(first, 4000);
    assert_eq!(second, 4001);

    // A released lease is immediately reusable — leases are a transient
    // cache, not persisted truth
    ports.release(first).await;
    let third = ports.find_free_port().await.unwrap();
    assert_eq!(third, 4000);
}

#[tokio::test]
async fn verify_reports_a_listening_port() {
    let channel = Arc::new(ScriptedChannel::new());
    channel.on("sport = :4500", ok("LISTEN 0 511 0.0.0.0:4500 0.0.0.0:*"));

    let ports = allocator(channel.clone(), 4000, 4999);
    assert!(ports.verify(4500, 1).await.unwrap());
}

#[tokio::test]
async fn verify_gives_up_after_its_attempts() {
    let channel = Arc::new(ScriptedChannel::new());
    channel.on("sport = :4500", ok(""));

    let ports = allocator(channel.clone(), 4000, 4999);
    assert!(!ports.verify(4500, 2).await.unwrap());

    // One probe per attempt
    let probes = channel
        .commands()
        .iter()
        .filter(|c| c.contains("sport = :4500"))
        .count();
    assert_eq!(probes, 2);
}
