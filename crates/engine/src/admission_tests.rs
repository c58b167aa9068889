// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use super::*;
use std::time::Duration;

fn name(i: usize) -> ServerName {
    ServerName::new(format!("upstream-{i}"))
}

#[tokio::test]
async fn grants_up_to_capacity() {
    let gate = AdmissionGate::new(3);
    let cancel = CancellationToken::new();

    let a = gate.acquire(&name(1), &cancel).await.unwrap();
    let b = gate.acquire(&name(2), &cancel).await.unwrap();
    let c = gate.acquire(&name(3), &cancel).await.unwrap();
    assert_eq!(gate.in_use(), 3);
    assert_eq!(gate.available(), 0);

    drop(a);
    assert_eq!(gate.available(), 1);
    drop((b, c));
    assert_eq!(gate.available(), 3);
}

#[tokio::test]
async fn capacity_is_clamped_to_valid_range() {
    assert_eq!(AdmissionGate::new(0).capacity(), 1);
    assert_eq!(AdmissionGate::new(15).capacity(), 15);
    assert_eq!(AdmissionGate::new(1000).capacity(), 40);
}

#[tokio::test]
async fn waiters_queue_until_release() {
    let gate = Arc::new(AdmissionGate::new(1));
    let cancel = CancellationToken::new();

    let held = gate.acquire(&name(1), &cancel).await.unwrap();

    let gate2 = Arc::clone(&gate);
    let cancel2 = cancel.clone();
    let waiter = tokio::spawn(async move { gate2.acquire(&name(2), &cancel2).await });

    tokio::time::sleep(Duration::from_millis(50)).await;
    assert!(!waiter.is_finished(), "waiter must block while the slot is held");

    drop(held);
    let slot = tokio::time::timeout(Duration::from_secs(1), waiter)
        .await
        .unwrap()
        .unwrap()
        .unwrap();
    assert_eq!(slot.server().as_str(), "upstream-2");
}

#[tokio::test]
async fn queue_is_fifo() {
    let gate = Arc::new(AdmissionGate::new(1));
    let cancel = CancellationToken::new();
    let held = gate.acquire(&name(0), &cancel).await.unwrap();

    let (order_tx, mut order_rx) = tokio::sync::mpsc::unbounded_channel();
    for i in 1..=5 {
        let gate = Arc::clone(&gate);
        let cancel = cancel.clone();
        let order_tx = order_tx.clone();
        tokio::spawn(async move {
            let slot = gate.acquire(&name(i), &cancel).await.unwrap();
            let _ = order_tx.send(i);
            drop(slot);
        });
        // Stagger spawns so queue order is deterministic.
        tokio::time::sleep(Duration::from_millis(20)).await;
    }

    drop(held);
    let mut order = Vec::new();
    for _ in 1..=5 {
        order.push(
            tokio::time::timeout(Duration::from_secs(2), order_rx.recv())
                .await
                .unwrap()
                .unwrap(),
        );
    }
    assert_eq!(order, vec![1, 2, 3, 4, 5]);
}

#[tokio::test]
async fn pre_cancelled_acquire_consumes_no_slot() {
    let gate = AdmissionGate::new(1);
    let cancel = CancellationToken::new();
    cancel.cancel();

    let err = gate.acquire(&name(1), &cancel).await.unwrap_err();
    assert!(matches!(err, EngineError::Cancelled));
    assert_eq!(gate.available(), 1, "no slot may leak on cancelled acquire");
}

#[tokio::test]
async fn cancellation_while_queued_is_prompt() {
    let gate = Arc::new(AdmissionGate::new(1));
    let cancel = CancellationToken::new();
    let _held = gate.acquire(&name(1), &cancel).await.unwrap();

    let waiter_cancel = CancellationToken::new();
    let gate2 = Arc::clone(&gate);
    let waiter_cancel2 = waiter_cancel.clone();
    let waiter = tokio::spawn(async move { gate2.acquire(&name(2), &waiter_cancel2).await });

    tokio::time::sleep(Duration::from_millis(20)).await;
    let started = std::time::Instant::now();
    waiter_cancel.cancel();
    let result = tokio::time::timeout(Duration::from_millis(100), waiter)
        .await
        .expect("acquire must honour cancellation within 100ms")
        .unwrap();
    assert!(matches!(result, Err(EngineError::Cancelled)));
    assert!(started.elapsed() < Duration::from_millis(100));
}
