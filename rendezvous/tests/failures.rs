mod common;

use std::time::Duration;

use common::{local_config, spawn_server, spawn_server_with_config, within};
use rendezvous::client::BarrierHandle;
use rendezvous::error::ErrorKind;
use rendezvous_config::shared::AbandonPolicy;

const START: &str = "2024-01-01";
const END: &str = "2024-01-02";

async fn wait_until_waiting(handle: &BarrierHandle, n_waiting: usize) {
    within(async {
        while handle.n_waiting().await.unwrap() != n_waiting {
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    })
    .await;
}

#[tokio::test(flavor = "multi_thread")]
async fn timeout_breaks_the_generation_for_everyone() {
    let server = spawn_server(3).await;

    let patient = server.client().await;
    let patient = tokio::spawn(async move {
        patient.get_barrier(START, END).await.unwrap().wait().await
    });

    let impatient = server.client().await;
    let handle = impatient.get_barrier(START, END).await.unwrap();
    wait_until_waiting(&handle, 1).await;

    let err = within(handle.wait_timeout(Duration::from_millis(100)))
        .await
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::BarrierBroken);

    let err = within(patient).await.unwrap().unwrap_err();
    assert_eq!(err.kind(), ErrorKind::BarrierBroken);
    assert!(err.is_broken_barrier());

    // Later arrivals fail fast until the barrier is reset.
    let err = within(handle.wait()).await.unwrap_err();
    assert_eq!(err.kind(), ErrorKind::BarrierBroken);

    server.shutdown().await;
}

#[tokio::test(flavor = "multi_thread")]
async fn server_default_timeout_applies_to_waits_without_one() {
    let mut config = local_config(2);
    config.wait_timeout_ms = Some(100);
    let server = spawn_server_with_config(config).await;

    let client = server.client().await;
    let handle = client.get_barrier(START, END).await.unwrap();

    let err = within(handle.wait()).await.unwrap_err();
    assert_eq!(err.kind(), ErrorKind::BarrierBroken);

    server.shutdown().await;
}

#[tokio::test(flavor = "multi_thread")]
async fn reset_restores_a_broken_barrier() {
    let server = spawn_server(2).await;
    let first = server.client().await;
    let second = server.client().await;
    let a = first.get_barrier(START, END).await.unwrap();
    let b = second.get_barrier(START, END).await.unwrap();

    a.abort().await.unwrap();
    assert!(b.is_broken().await.unwrap());
    assert_eq!(b.wait().await.unwrap_err().kind(), ErrorKind::BarrierBroken);

    b.reset().await.unwrap();
    let status = a.status().await.unwrap();
    assert!(!status.broken);
    assert_eq!(status.n_waiting, 0);

    let (left, right) = within(async { tokio::join!(a.wait(), b.wait()) }).await;
    left.unwrap();
    right.unwrap();

    server.shutdown().await;
}

#[tokio::test(flavor = "multi_thread")]
async fn abort_fails_blocked_waiters() {
    let server = spawn_server(3).await;

    let waiter = server.client().await;
    let waiter = tokio::spawn(async move {
        waiter.get_barrier(START, END).await.unwrap().wait().await
    });

    let controller = server.client().await;
    let handle = controller.get_barrier(START, END).await.unwrap();
    wait_until_waiting(&handle, 1).await;

    handle.abort().await.unwrap();

    let err = within(waiter).await.unwrap().unwrap_err();
    assert_eq!(err.kind(), ErrorKind::BarrierBroken);

    server.shutdown().await;
}

#[tokio::test(flavor = "multi_thread")]
async fn reset_fails_blocked_waiters() {
    let server = spawn_server(3).await;

    let waiter = server.client().await;
    let waiter = tokio::spawn(async move {
        waiter.get_barrier(START, END).await.unwrap().wait().await
    });

    let controller = server.client().await;
    let handle = controller.get_barrier(START, END).await.unwrap();
    wait_until_waiting(&handle, 1).await;

    handle.reset().await.unwrap();

    let err = within(waiter).await.unwrap().unwrap_err();
    assert_eq!(err.kind(), ErrorKind::BarrierBroken);
    assert!(!handle.is_broken().await.unwrap());

    server.shutdown().await;
}

#[tokio::test(flavor = "multi_thread")]
async fn disconnected_waiter_breaks_the_barrier() {
    let server = spawn_server(3).await;

    let leaver = server.client().await;
    let leaver = tokio::spawn(async move {
        leaver.get_barrier(START, END).await.unwrap().wait().await
    });

    let observer = server.client().await;
    let handle = observer.get_barrier(START, END).await.unwrap();
    wait_until_waiting(&handle, 1).await;

    // Dropping the task drops the client and closes its connection.
    leaver.abort();

    within(async {
        while !handle.is_broken().await.unwrap() {
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    })
    .await;

    server.shutdown().await;
}

#[tokio::test(flavor = "multi_thread")]
async fn disconnected_waiter_is_withdrawn_under_withdraw_policy() {
    let mut config = local_config(2);
    config.abandon_policy = AbandonPolicy::Withdraw;
    let server = spawn_server_with_config(config).await;

    let leaver = server.client().await;
    let leaver = tokio::spawn(async move {
        leaver.get_barrier(START, END).await.unwrap().wait().await
    });

    let first = server.client().await;
    let handle = first.get_barrier(START, END).await.unwrap();
    wait_until_waiting(&handle, 1).await;

    leaver.abort();
    wait_until_waiting(&handle, 0).await;
    assert!(!handle.is_broken().await.unwrap());

    let second = server.client().await;
    let other = second.get_barrier(START, END).await.unwrap();
    let (left, right) = within(async { tokio::join!(handle.wait(), other.wait()) }).await;
    left.unwrap();
    right.unwrap();

    server.shutdown().await;
}

#[tokio::test(flavor = "multi_thread")]
async fn server_shutdown_is_reported_as_a_broken_barrier() {
    let server = spawn_server(2).await;
    let client = server.client().await;
    let handle = client.get_barrier(START, END).await.unwrap();

    let waiter = tokio::spawn(async move { handle.wait().await });
    tokio::time::sleep(Duration::from_millis(100)).await;

    server.shutdown().await;

    let err = within(waiter).await.unwrap().unwrap_err();
    assert!(err.is_broken_barrier());
}

#[tokio::test(flavor = "multi_thread")]
async fn cancelled_wait_leaves_the_barrier() {
    let server = spawn_server(2).await;

    let cancelled = server.client().await;
    let handle = cancelled.get_barrier(START, END).await.unwrap();
    let waited = tokio::time::timeout(Duration::from_millis(200), handle.wait()).await;
    assert!(waited.is_err());

    // The cancelled arrival must not stay counted on the server.
    let observer = server.client().await;
    let observed = observer.get_barrier(START, END).await.unwrap();
    within(async {
        while !observed.is_broken().await.unwrap() {
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    })
    .await;
    assert_eq!(observed.n_waiting().await.unwrap(), 0);

    // A retry on a fresh connection cannot release the barrier on its own.
    let retry = server.client().await;
    let err = within(retry.get_barrier(START, END).await.unwrap().wait())
        .await
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::BarrierBroken);

    let err = handle.status().await.unwrap_err();
    assert_eq!(err.kind(), ErrorKind::ConnectionLost);

    server.shutdown().await;
}

#[tokio::test(flavor = "multi_thread")]
async fn cancelled_wait_is_withdrawn_under_withdraw_policy() {
    let mut config = local_config(2);
    config.abandon_policy = AbandonPolicy::Withdraw;
    let server = spawn_server_with_config(config).await;

    let cancelled = server.client().await;
    let handle = cancelled.get_barrier(START, END).await.unwrap();
    let waited = tokio::time::timeout(Duration::from_millis(200), handle.wait()).await;
    assert!(waited.is_err());

    let retry = server.client().await;
    let retried = retry.get_barrier(START, END).await.unwrap();
    wait_until_waiting(&retried, 0).await;

    // The retry alone must stay blocked until a second party arrives.
    let blocked = tokio::spawn(async move { retried.wait().await });
    common::assert_blocked(&blocked).await;

    let other = server.client().await;
    let index = within(other.get_barrier(START, END).await.unwrap().wait())
        .await
        .unwrap();
    assert_eq!(index, 1);
    assert_eq!(within(blocked).await.unwrap().unwrap(), 0);

    server.shutdown().await;
}
