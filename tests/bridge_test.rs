//! Bridge behaviour against a scripted socket driver.
//!
//! Tests:
//! - Bind lifecycle: success, failure, unbind, unbind failure
//! - Credit: one outstanding, reissued only after a handoff
//! - Demand: no handoff without demand, one per unit of demand
//! - Termination: exactly once, cancel unbinds the listener
//! - Dropping the publisher unsubscribed unbinds the listener

mod common;

use common::{local_addr, DriverHandle, Recorder, Seen};
use tcp_sluice::bridge::{self, Binding};
use tcp_sluice::config::BindRequest;
use tcp_sluice::error::BridgeError;
use tcp_sluice::socket::{SocketCommand, SocketEvent};
use tokio::io::{AsyncReadExt, AsyncWriteExt, DuplexStream};

/// Start a bridge and wait for its bind command.
async fn start() -> (Binding<DuplexStream>, DriverHandle) {
    let (driver, handle_rx) = common::scripted();
    let binding = bridge::bind(BindRequest::new(local_addr()), driver);
    let mut driver = handle_rx.await.expect("driver never started");
    assert!(matches!(
        driver.expect_command().await,
        SocketCommand::Bind(request) if request.local_endpoint() == local_addr()
    ));
    (binding, driver)
}

/// Start a bridge, confirm the bind and attach a recorder.
async fn bound() -> (Binding<DuplexStream>, DriverHandle, Recorder) {
    let (binding, mut driver) = start().await;
    driver.send(SocketEvent::BoundAt(local_addr()));
    assert_eq!(driver.expect_command().await, SocketCommand::AcceptCredit(1));

    let recorder = Recorder::default();
    binding.publisher.subscribe(recorder.clone()).unwrap();
    recorder.wait_for_events(1).await;
    (binding, driver, recorder)
}

#[tokio::test]
async fn test_bind_success_issues_one_credit() {
    let (binding, mut driver) = start().await;
    driver.send(SocketEvent::BoundAt(local_addr()));

    assert_eq!(binding.local_addr.wait().await, Ok(local_addr()));
    assert_eq!(driver.expect_command().await, SocketCommand::AcceptCredit(1));
    driver.expect_quiet().await;
    assert!(binding.unbind.wait().await.is_ok());
    assert!(!binding.fully_unbound.is_resolved());
}

#[tokio::test]
async fn test_bind_failure_fails_address_and_stream() {
    let (binding, mut driver) = start().await;
    driver.send(SocketEvent::BindFailed("address in use".into()));

    let expected = BridgeError::BindFailed {
        addr: local_addr(),
        reason: "address in use".into(),
    };
    assert_eq!(binding.local_addr.wait().await, Err(expected.clone()));
    assert_eq!(binding.fully_unbound.wait().await, Ok(()));

    // Subscribing after the failure still delivers the error.
    let recorder = Recorder::default();
    binding.publisher.subscribe(recorder.clone()).unwrap();
    recorder.wait_for_events(2).await;
    assert_eq!(recorder.seen(), vec![Seen::Subscribed, Seen::Error(expected)]);

    // The unbind handle is a no-op.
    let handle = binding.unbind.wait().await.unwrap();
    assert_eq!(handle.unbind().wait().await, Ok(()));
    driver.expect_quiet().await;
}

#[tokio::test]
async fn test_one_demand_one_delivery() {
    let (_binding, mut driver, recorder) = bound().await;

    recorder.request(1);
    let _client = driver.accept(50001);
    recorder.wait_for_events(2).await;
    assert_eq!(recorder.seen(), vec![Seen::Subscribed, Seen::Next(50001)]);

    // Credit goes back out after the handoff.
    assert_eq!(driver.expect_command().await, SocketCommand::AcceptCredit(1));

    // A second connection waits for demand, and no further credit is issued.
    let _client2 = driver.accept(50002);
    driver.expect_quiet().await;
    assert_eq!(recorder.deliveries(), 1);

    recorder.request(1);
    recorder.wait_for_events(3).await;
    assert_eq!(recorder.seen()[2], Seen::Next(50002));
    assert_eq!(driver.expect_command().await, SocketCommand::AcceptCredit(1));
}

#[tokio::test]
async fn test_no_transfer_without_demand() {
    let (_binding, mut driver, recorder) = bound().await;

    let _client = driver.accept(50001);
    driver.expect_quiet().await;
    assert_eq!(recorder.deliveries(), 0);
}

#[tokio::test]
async fn test_bulk_demand_delivers_one_per_accept() {
    let (_binding, mut driver, recorder) = bound().await;
    recorder.request(3);

    let mut clients = Vec::new();
    for (i, port) in [50001u16, 50002, 50003].into_iter().enumerate() {
        clients.push(driver.accept(port));
        recorder.wait_for_events(2 + i).await;
        assert_eq!(driver.expect_command().await, SocketCommand::AcceptCredit(1));
    }
    assert_eq!(
        recorder.seen()[1..],
        [Seen::Next(50001), Seen::Next(50002), Seen::Next(50003)]
    );

    // Demand is used up.
    clients.push(driver.accept(50004));
    driver.expect_quiet().await;
    assert_eq!(recorder.deliveries(), 3);
}

#[tokio::test]
async fn test_demand_before_bind_is_kept() {
    let (binding, mut driver) = start().await;
    let recorder = Recorder::default();
    binding.publisher.subscribe(recorder.clone()).unwrap();
    recorder.wait_for_events(1).await;
    recorder.request(1);

    driver.send(SocketEvent::BoundAt(local_addr()));
    assert_eq!(driver.expect_command().await, SocketCommand::AcceptCredit(1));
    let _client = driver.accept(50001);
    recorder.wait_for_events(2).await;
    assert_eq!(recorder.seen()[1], Seen::Next(50001));
}

#[tokio::test]
async fn test_cancel_before_accept_unbinds() {
    let (binding, mut driver, recorder) = bound().await;

    recorder.cancel();
    assert_eq!(driver.expect_command().await, SocketCommand::Unbind);
    driver.send(SocketEvent::Unbound);

    assert_eq!(binding.fully_unbound.wait().await, Ok(()));
    assert_eq!(recorder.seen(), vec![Seen::Subscribed]);
}

#[tokio::test]
async fn test_cancel_drops_pending_connection() {
    let (binding, mut driver, recorder) = bound().await;
    let mut client = driver.accept(50001);
    driver.expect_quiet().await;

    recorder.cancel();
    assert_eq!(driver.expect_command().await, SocketCommand::Unbind);
    driver.send(SocketEvent::Unbound);
    assert_eq!(binding.fully_unbound.wait().await, Ok(()));

    // The pending connection was closed, never delivered.
    let mut buf = [0u8; 1];
    assert_eq!(client.read(&mut buf).await.unwrap(), 0);
    assert_eq!(recorder.deliveries(), 0);
}

#[tokio::test]
async fn test_unbind_leaves_delivered_connection_alone() {
    let (binding, mut driver, recorder) = bound().await;
    recorder.request(1);
    let mut client = driver.accept(50001);
    recorder.wait_for_events(2).await;
    assert_eq!(driver.expect_command().await, SocketCommand::AcceptCredit(1));

    let handle = binding.unbind.wait().await.unwrap();
    let unbound = handle.unbind();
    assert_eq!(driver.expect_command().await, SocketCommand::Unbind);
    assert!(!unbound.is_resolved());

    driver.send(SocketEvent::Unbound);
    assert_eq!(unbound.wait().await, Ok(()));
    recorder.wait_for_events(3).await;
    assert_eq!(recorder.seen()[2], Seen::Complete);

    // The delivered connection still carries bytes.
    let connection = recorder.take_connection().unwrap();
    let mut io = connection.into_flow().into_inner();
    client.write_all(b"still here").await.unwrap();
    let mut buf = [0u8; 10];
    io.read_exact(&mut buf).await.unwrap();
    assert_eq!(&buf, b"still here");

    // Unbinding again is harmless.
    assert_eq!(handle.unbind().wait().await, Ok(()));
}

#[tokio::test]
async fn test_pending_connection_outlives_unbind() {
    let (binding, mut driver, recorder) = bound().await;
    let _client = driver.accept(50001);
    driver.expect_quiet().await;

    binding.unbind.wait().await.unwrap().unbind();
    assert_eq!(driver.expect_command().await, SocketCommand::Unbind);
    driver.send(SocketEvent::Unbound);
    assert_eq!(binding.fully_unbound.wait().await, Ok(()));

    // Not complete while a connection is still waiting for demand.
    driver.expect_quiet().await;
    assert_eq!(recorder.terminals(), 0);

    recorder.request(1);
    recorder.wait_for_events(3).await;
    assert_eq!(
        recorder.seen(),
        vec![Seen::Subscribed, Seen::Next(50001), Seen::Complete]
    );
    // Closed listeners get no more credit.
    driver.expect_quiet().await;
}

#[tokio::test]
async fn test_accept_failure_is_fatal() {
    let (binding, mut driver, recorder) = bound().await;

    driver.send(SocketEvent::AcceptFailed("too many open files".into()));
    recorder.wait_for_events(2).await;
    assert!(matches!(recorder.seen()[1], Seen::Error(BridgeError::Connection(_))));

    assert_eq!(driver.expect_command().await, SocketCommand::Unbind);
    driver.send(SocketEvent::Unbound);
    assert_eq!(binding.fully_unbound.wait().await, Ok(()));
    assert_eq!(recorder.terminals(), 1);
}

#[tokio::test]
async fn test_unbind_failure_surfaces_on_fully_unbound_only() {
    let (binding, mut driver, recorder) = bound().await;

    binding.unbind.wait().await.unwrap().unbind();
    assert_eq!(driver.expect_command().await, SocketCommand::Unbind);
    driver.send(SocketEvent::UnbindFailed("listener busy".into()));

    assert_eq!(
        binding.fully_unbound.wait().await,
        Err(BridgeError::UnbindFailed("listener busy".into()))
    );
    recorder.wait_for_events(2).await;
    assert_eq!(recorder.seen(), vec![Seen::Subscribed, Seen::Complete]);
}

#[tokio::test]
async fn test_second_subscriber_rejected() {
    let (binding, mut driver, recorder) = bound().await;

    let intruder = Recorder::default();
    assert_eq!(
        binding.publisher.subscribe(intruder.clone()),
        Err(BridgeError::AlreadySubscribed)
    );

    // The first subscriber keeps working.
    recorder.request(1);
    let _client = driver.accept(50001);
    recorder.wait_for_events(2).await;
    assert_eq!(recorder.seen()[1], Seen::Next(50001));
    assert!(intruder.seen().is_empty());
}

#[tokio::test]
async fn test_driver_gone_after_bind_is_connection_error() {
    let (binding, driver) = start().await;
    let DriverHandle { commands, events } = driver;
    drop(commands);

    let recorder = Recorder::default();
    binding.publisher.subscribe(recorder.clone()).unwrap();
    assert!(events.send(SocketEvent::BoundAt(local_addr())));

    recorder.wait_for_events(2).await;
    assert!(matches!(recorder.seen()[1], Seen::Error(BridgeError::Connection(_))));
    assert!(matches!(
        binding.fully_unbound.wait().await,
        Err(BridgeError::UnbindFailed(_))
    ));
}

#[tokio::test]
async fn test_termination_is_exactly_once() {
    let (binding, mut driver, recorder) = bound().await;

    driver.send(SocketEvent::AcceptFailed("reset".into()));
    assert_eq!(driver.expect_command().await, SocketCommand::Unbind);
    driver.send(SocketEvent::Unbound);
    assert_eq!(binding.fully_unbound.wait().await, Ok(()));

    // Bridge is released; late events go nowhere.
    let _ = driver.events.send(SocketEvent::Unbound);
    let _ = driver.events.send(SocketEvent::AcceptFailed("again".into()));
    tokio::time::sleep(common::QUIET).await;
    assert_eq!(recorder.terminals(), 1);
}

#[tokio::test]
async fn test_accept_while_pending_is_connection_error() {
    let (binding, mut driver, recorder) = bound().await;

    let mut first = driver.accept(50001);
    driver.expect_quiet().await;
    let _second = driver.accept(50002);

    recorder.wait_for_events(2).await;
    assert_eq!(recorder.seen().len(), 2);
    assert!(matches!(recorder.seen()[1], Seen::Error(BridgeError::Connection(_))));
    assert_eq!(driver.expect_command().await, SocketCommand::Unbind);

    driver.send(SocketEvent::Unbound);
    assert_eq!(binding.fully_unbound.wait().await, Ok(()));

    // The pending connection was released, not delivered.
    let mut buf = [0u8; 1];
    assert_eq!(first.read(&mut buf).await.unwrap(), 0);
    assert_eq!(recorder.deliveries(), 0);
}

#[tokio::test]
async fn test_credit_rejected_during_handoff_drops_connection() {
    let (binding, mut driver, recorder) = bound().await;
    recorder.request(1);
    driver.commands.close();

    let mut client = driver.accept(50001);
    recorder.wait_for_events(2).await;
    assert!(matches!(recorder.seen()[1], Seen::Error(BridgeError::Connection(_))));

    // Nothing is handed over after the error.
    tokio::time::sleep(common::QUIET).await;
    assert_eq!(recorder.seen().len(), 2);
    assert_eq!(recorder.deliveries(), 0);
    let mut buf = [0u8; 1];
    assert_eq!(client.read(&mut buf).await.unwrap(), 0);
    assert!(matches!(
        binding.fully_unbound.wait().await,
        Err(BridgeError::UnbindFailed(_))
    ));
}

#[tokio::test]
async fn test_dropped_publisher_before_bind_unbinds() {
    let (binding, mut driver) = start().await;
    let Binding {
        publisher,
        fully_unbound,
        ..
    } = binding;
    drop(publisher);

    driver.send(SocketEvent::BoundAt(local_addr()));
    assert_eq!(driver.expect_command().await, SocketCommand::Unbind);
    driver.expect_quiet().await;

    driver.send(SocketEvent::Unbound);
    assert_eq!(fully_unbound.wait().await, Ok(()));
}

#[tokio::test]
async fn test_dropped_publisher_after_bind_unbinds() {
    let (binding, mut driver) = start().await;
    driver.send(SocketEvent::BoundAt(local_addr()));
    assert_eq!(driver.expect_command().await, SocketCommand::AcceptCredit(1));

    let fully_unbound = binding.fully_unbound.clone();
    drop(binding);
    assert_eq!(driver.expect_command().await, SocketCommand::Unbind);

    driver.send(SocketEvent::Unbound);
    assert_eq!(fully_unbound.wait().await, Ok(()));
}
