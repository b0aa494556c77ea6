// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! E2E tests for adapter registration and event routing.

mod common;

use std::time::Duration;

use common::*;
use parcelyard_protocol::{Command, Event, RegisterAdapter};

#[tokio::test]
async fn test_register_echoes_identity() {
    let ctx = TestContext::new().await;
    let mut client = ctx.client().await;

    client
        .send(&Command::RegisterAdapter(RegisterAdapter {
            adapter_id: Some("dock-7".to_string()),
            capabilities: vec!["scan".to_string()],
        }))
        .await
        .unwrap();

    match next_event(&mut client).await {
        Event::RegisterAck {
            adapter_id, status, ..
        } => {
            assert_eq!(adapter_id, "dock-7");
            assert_eq!(status, "registered");
        }
        other => panic!("Expected register_ack, got {:?}", other),
    }

    let adapters = ctx.engine().adapters();
    assert_eq!(adapters.len(), 1);
    assert_eq!(adapters[0].capabilities, vec!["scan".to_string()]);
}

#[tokio::test]
async fn test_register_without_identity_gets_one() {
    let ctx = TestContext::new().await;
    let mut client = ctx.client().await;

    let assigned = client.register(None, vec![]).await.unwrap();
    assert!(assigned.starts_with("adapter-"));
    assert_eq!(ctx.engine().adapters()[0].adapter_id, assigned);
}

#[tokio::test]
async fn test_anonymous_connection_still_gets_events() {
    let ctx = TestContext::new().await;
    let mut client = ctx.client().await;

    let package_id = ready_package(&mut client, "anon-1").await;
    assert!(ctx.engine().adapters().is_empty());
    assert_eq!(ctx.engine().health().anonymous_connections, 1);
    assert!(ctx.engine().package(&package_id).is_some());
}

#[tokio::test]
async fn test_reregistration_moves_events_to_new_connection() {
    let ctx = TestContext::with_config(fast_config().with_delays(
        Duration::from_millis(300),
        Duration::from_millis(25),
        Duration::from_millis(25),
    ))
    .await;

    let mut first = ctx.adapter("dock-1").await;
    let package_id = receive_package(&mut first, "o1").await;

    // Same identity reconnects before the confirmation fires.
    let mut second = ctx.adapter("dock-1").await;
    assert_eq!(ctx.engine().adapters().len(), 1);

    match next_event(&mut second).await {
        Event::PackageReceived { package_id: pid, .. } => assert_eq!(pid, package_id),
        other => panic!("Expected package_received, got {:?}", other),
    }
    assert_eq!(next_event(&mut second).await.kind(), "package_ready");
    expect_silence(&mut first).await;
}

#[tokio::test]
async fn test_disconnect_unregisters_but_keeps_packages() {
    let ctx = TestContext::new().await;
    let mut adapter = ctx.adapter("dock-9").await;
    let package_id = ready_package(&mut adapter, "o9").await;

    adapter.shutdown().await.unwrap();

    let mut unregistered = false;
    for _ in 0..100 {
        if ctx.engine().adapters().is_empty() {
            unregistered = true;
            break;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    assert!(unregistered, "adapter still registered after disconnect");
    assert!(ctx.engine().package(&package_id).is_some());
}

#[tokio::test]
async fn test_events_for_departed_origin_are_dropped() {
    let ctx = TestContext::with_config(fast_config().with_delays(
        Duration::from_millis(100),
        Duration::from_millis(25),
        Duration::from_millis(25),
    ))
    .await;

    let mut adapter = ctx.adapter("dock-3").await;
    let package_id = receive_package(&mut adapter, "o3").await;
    adapter.shutdown().await.unwrap();

    // The package still progresses with nobody listening.
    let mut ready = false;
    for _ in 0..100 {
        if ctx.engine().package(&package_id).unwrap().status
            == parcelyard_protocol::PackageStatus::ReadyForLoading
        {
            ready = true;
            break;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    assert!(ready);

    // Other adapters are unaffected.
    let mut other = ctx.adapter("dock-4").await;
    receive_package(&mut other, "o4").await;
}
