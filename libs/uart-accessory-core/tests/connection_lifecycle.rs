//! Lifecycle tests for `AccessoryConnection` against the in-memory platform.
//!
//! Each test plays the owner task by hand: it calls `open`/`close`/`send`,
//! answers permission prompts through `MemoryPermissions`, plays the accessory
//! through `MemoryPeer`, and pumps the event queue into `handle_event`.

use std::time::{Duration, Instant};

use tokio::sync::mpsc::error::TryRecvError;
use uart_accessory_core::{
    connection::{AccessoryConnection, ConnectionState},
    error::AccessoryError,
    events::{AccessoryEvent, ConnectionEvent, EventReceiver, EventSender, event_queue},
    memory::{MemoryAccessories, MemoryChannelFactory, MemoryPermissions},
    reader::{ReadTermination, ReaderConfig},
};

type Connection = AccessoryConnection<MemoryAccessories, MemoryPermissions, MemoryChannelFactory>;

const ACCESSORY: &str = "SHINE Android Accessory Emulator";

struct Fixture {
    connection: Connection,
    accessories: MemoryAccessories,
    permissions: MemoryPermissions,
    channels: MemoryChannelFactory,
    events: EventSender<String>,
    rx: EventReceiver<String>,
}

fn fixture_with(attached: &[&str], poll_interval_ms: u64) -> Fixture {
    let accessories = MemoryAccessories::with_attached(attached.iter().copied());
    let permissions = MemoryPermissions::new();
    let channels = MemoryChannelFactory::new();
    let (events, rx) = event_queue();

    let connection = AccessoryConnection::new(
        accessories.clone(),
        permissions.clone(),
        channels.clone(),
        events.clone(),
        ReaderConfig {
            buffer_size: 16384,
            poll_interval_ms,
        },
    );

    Fixture {
        connection,
        accessories,
        permissions,
        channels,
        events,
        rx,
    }
}

fn fixture() -> Fixture {
    fixture_with(&[ACCESSORY], 10)
}

/// Waits for the next queued event, failing the test after a few seconds.
fn next_event(rx: &mut EventReceiver<String>) -> ConnectionEvent<String> {
    let deadline = Instant::now() + Duration::from_secs(5);
    loop {
        match rx.try_recv() {
            Ok(event) => return event,
            Err(TryRecvError::Empty) => {
                assert!(Instant::now() < deadline, "timed out waiting for an event");
                std::thread::sleep(Duration::from_millis(2));
            }
            Err(TryRecvError::Disconnected) => panic!("event queue closed"),
        }
    }
}

#[test]
fn test_open_without_accessory_stays_closed() {
    let mut f = fixture_with(&[], 10);

    let result = f.connection.open();

    assert!(matches!(result, Err(AccessoryError::NoAccessoryFound)));
    assert_eq!(f.connection.state(), ConnectionState::Closed);
    assert!(f.connection.accessory().is_none());
    assert_eq!(f.permissions.request_count(), 0);
    assert_eq!(f.channels.open_count(), 0);
}

#[test]
fn test_open_with_permission_goes_straight_to_open() {
    let mut f = fixture();
    f.permissions.grant(ACCESSORY);

    assert_eq!(f.connection.open().unwrap(), ConnectionState::Open);

    assert_eq!(f.connection.accessory().map(String::as_str), Some(ACCESSORY));
    assert_eq!(f.channels.open_count(), 1);
    assert_eq!(f.permissions.request_count(), 0);
}

#[test]
fn test_first_enumerated_accessory_is_used() {
    let mut f = fixture_with(&["first", "second"], 10);
    f.permissions.grant("first");
    f.permissions.grant("second");

    f.connection.open().unwrap();

    assert_eq!(f.connection.accessory().map(String::as_str), Some("first"));
}

#[test]
fn test_open_without_permission_waits_and_repeated_open_is_ignored() {
    let mut f = fixture();

    assert_eq!(
        f.connection.open().unwrap(),
        ConnectionState::WaitingPermission
    );
    assert_eq!(f.permissions.pending().as_deref(), Some(ACCESSORY));

    assert_eq!(
        f.connection.open().unwrap(),
        ConnectionState::WaitingPermission
    );
    assert_eq!(f.permissions.request_count(), 1);
    assert_eq!(f.channels.open_count(), 0);
}

#[test]
fn test_permission_granted_opens_streams() {
    let mut f = fixture();
    f.connection.open().unwrap();

    assert!(f.permissions.answer(true));
    let event = next_event(&mut f.rx);
    assert!(matches!(
        event,
        ConnectionEvent::PermissionResult { granted: true, .. }
    ));

    assert_eq!(
        f.connection.handle_event(event).unwrap(),
        Some(AccessoryEvent::Opened)
    );
    assert_eq!(f.connection.state(), ConnectionState::Open);
    assert_eq!(f.channels.open_count(), 1);
}

#[test]
fn test_permission_denied_closes_without_channel() {
    let mut f = fixture();
    f.connection.open().unwrap();

    assert!(f.permissions.answer(false));
    let event = next_event(&mut f.rx);

    assert!(matches!(
        f.connection.handle_event(event),
        Err(AccessoryError::PermissionDenied)
    ));
    assert_eq!(f.connection.state(), ConnectionState::Closed);
    assert!(f.connection.accessory().is_none());
    assert_eq!(f.channels.open_count(), 0);
}

#[test]
fn test_close_while_waiting_cancels_request() {
    let mut f = fixture();
    f.connection.open().unwrap();

    f.connection.close().unwrap();

    assert_eq!(f.connection.state(), ConnectionState::Closed);
    assert_eq!(f.permissions.cancel_count(), 1);
    assert!(f.permissions.pending().is_none());
    assert!(!f.permissions.answer(true));
    assert_eq!(f.channels.open_count(), 0);
}

#[test]
fn test_stale_permission_result_is_ignored() {
    let mut f = fixture();
    f.connection.open().unwrap();

    let stale = ConnectionEvent::PermissionResult {
        request: 999,
        accessory: ACCESSORY.to_string(),
        granted: true,
    };
    assert_eq!(f.connection.handle_event(stale).unwrap(), None);
    assert_eq!(
        f.connection.state(),
        ConnectionState::WaitingPermission
    );

    f.connection.close().unwrap();
    let late = ConnectionEvent::PermissionResult {
        request: 1,
        accessory: ACCESSORY.to_string(),
        granted: true,
    };
    assert_eq!(f.connection.handle_event(late).unwrap(), None);
    assert_eq!(f.connection.state(), ConnectionState::Closed);
    assert_eq!(f.channels.open_count(), 0);
}

#[test]
fn test_send_is_a_no_op_unless_open() {
    let mut f = fixture();

    assert!(!f.connection.send(b"hello").unwrap());

    f.connection.open().unwrap();
    assert!(!f.connection.send(b"hello").unwrap());

    assert_eq!(f.channels.open_count(), 0);
    assert!(f.channels.peer().is_none());
}

#[test]
fn test_hello_hey_round_trip() {
    let mut f = fixture();
    f.permissions.grant(ACCESSORY);
    f.connection.open().unwrap();
    let peer = f.channels.peer().unwrap();

    assert!(f.connection.send(b"hello").unwrap());
    assert_eq!(peer.written(), b"hello".to_vec());
    assert_eq!(peer.write_count(), 1);

    assert!(peer.push(b"hey"));
    let event = next_event(&mut f.rx);
    assert!(matches!(&event, ConnectionEvent::DataRead { bytes, .. } if bytes == b"hey"));

    match f.connection.handle_event(event).unwrap() {
        Some(AccessoryEvent::Received { bytes, round_trip }) => {
            assert_eq!(bytes, b"hey".to_vec());
            assert!(round_trip.is_some());
        }
        other => panic!("unexpected event: {other:?}"),
    }
    assert!(f.rx.try_recv().is_err());
}

#[test]
fn test_stream_open_failure_closes() {
    let mut f = fixture();
    f.permissions.grant(ACCESSORY);
    f.channels.fail_next_open();

    assert!(matches!(
        f.connection.open(),
        Err(AccessoryError::StreamOpenFailed(_))
    ));
    assert_eq!(f.connection.state(), ConnectionState::Closed);

    // Next attempt works; nothing is left half-open.
    assert_eq!(f.connection.open().unwrap(), ConnectionState::Open);
}

#[test]
fn test_stream_open_failure_after_grant_closes() {
    let mut f = fixture();
    f.connection.open().unwrap();
    f.channels.fail_next_open();

    f.permissions.answer(true);
    let event = next_event(&mut f.rx);

    let err = f.connection.handle_event(event).unwrap_err();
    assert!(matches!(err, AccessoryError::StreamOpenFailed(_)));
    assert!(err.forces_close());
    assert_eq!(f.connection.state(), ConnectionState::Closed);
}

#[test]
fn test_send_failure_is_not_fatal() {
    let mut f = fixture();
    f.permissions.grant(ACCESSORY);
    f.connection.open().unwrap();
    let peer = f.channels.peer().unwrap();
    peer.fail_writes(true);

    let err = f.connection.send(b"hello").unwrap_err();

    assert!(matches!(err, AccessoryError::SendFailed(_)));
    assert!(!err.forces_close());
    assert_eq!(f.connection.state(), ConnectionState::Open);

    peer.fail_writes(false);
    assert!(f.connection.send(b"again").unwrap());
    assert_eq!(peer.written(), b"again".to_vec());
}

#[test]
fn test_close_failure_still_closes() {
    let mut f = fixture();
    f.permissions.grant(ACCESSORY);
    f.connection.open().unwrap();
    let peer = f.channels.peer().unwrap();
    peer.fail_close(true);

    assert!(matches!(
        f.connection.close(),
        Err(AccessoryError::StreamCloseFailed(_))
    ));
    assert_eq!(f.connection.state(), ConnectionState::Closed);
    assert!(peer.is_closed());
}

#[test]
fn test_close_while_reader_idle_returns_promptly() {
    let mut f = fixture_with(&[ACCESSORY], 20);
    f.permissions.grant(ACCESSORY);
    f.connection.open().unwrap();
    std::thread::sleep(Duration::from_millis(50));

    let started = Instant::now();
    f.connection.close().unwrap();

    assert!(started.elapsed() < Duration::from_secs(1));
    assert!(f.channels.peer().unwrap().is_closed());

    // The cancelled reader reports in, and the report is ignored.
    let event = next_event(&mut f.rx);
    assert!(matches!(
        event,
        ConnectionEvent::ReaderStopped {
            reason: ReadTermination::Cancelled,
            ..
        }
    ));
    assert_eq!(f.connection.handle_event(event).unwrap(), None);
}

#[test]
fn test_end_of_stream_closes_connection() {
    let mut f = fixture();
    f.permissions.grant(ACCESSORY);
    f.connection.open().unwrap();
    let peer = f.channels.peer().unwrap();

    peer.hang_up();
    let event = next_event(&mut f.rx);

    assert!(matches!(
        f.connection.handle_event(event),
        Err(AccessoryError::ReadTerminated(ReadTermination::EndOfStream))
    ));
    assert_eq!(f.connection.state(), ConnectionState::Closed);
    assert!(peer.is_closed());
}

#[test]
fn test_detach_closes_only_the_active_accessory() {
    let mut f = fixture();
    f.permissions.grant(ACCESSORY);
    f.connection.open().unwrap();

    let other = ConnectionEvent::Detached("some other accessory".to_string());
    assert_eq!(f.connection.handle_event(other).unwrap(), None);
    assert_eq!(f.connection.state(), ConnectionState::Open);

    f.accessories.detach(ACCESSORY);
    f.events
        .send(ConnectionEvent::Detached(ACCESSORY.to_string()));
    let event = next_event(&mut f.rx);
    assert_eq!(
        f.connection.handle_event(event).unwrap(),
        Some(AccessoryEvent::Detached)
    );
    assert_eq!(f.connection.state(), ConnectionState::Closed);

    assert!(matches!(
        f.connection.open(),
        Err(AccessoryError::NoAccessoryFound)
    ));
}

#[test]
fn test_detach_while_waiting_cancels_request() {
    let mut f = fixture();
    f.connection.open().unwrap();

    let detached = ConnectionEvent::Detached(ACCESSORY.to_string());
    assert_eq!(
        f.connection.handle_event(detached).unwrap(),
        Some(AccessoryEvent::Detached)
    );
    assert_eq!(f.permissions.cancel_count(), 1);
    assert_eq!(f.connection.state(), ConnectionState::Closed);
}

#[test]
fn test_connection_is_reusable_and_ignores_old_sessions() {
    let mut f = fixture();
    f.permissions.grant(ACCESSORY);

    f.connection.open().unwrap();
    f.connection.close().unwrap();
    assert_eq!(f.connection.open().unwrap(), ConnectionState::Open);
    assert_eq!(f.channels.open_count(), 2);

    let stale = ConnectionEvent::DataRead {
        session: 1,
        bytes: b"old".to_vec(),
    };
    assert_eq!(f.connection.handle_event(stale).unwrap(), None);

    let stale_stop = ConnectionEvent::ReaderStopped {
        session: 1,
        reason: ReadTermination::EndOfStream,
    };
    assert_eq!(f.connection.handle_event(stale_stop).unwrap(), None);
    assert_eq!(f.connection.state(), ConnectionState::Open);
}

#[derive(Debug, Clone, Copy)]
enum Step {
    Open,
    Close,
    Grant,
    Deny,
    Detach,
}

const STEPS: [Step; 5] = [Step::Open, Step::Close, Step::Grant, Step::Deny, Step::Detach];

fn drain(f: &mut Fixture) {
    while let Ok(event) = f.rx.try_recv() {
        let _ = f.connection.handle_event(event);
    }
}

fn apply(f: &mut Fixture, step: Step) {
    match step {
        Step::Open => {
            let _ = f.connection.open();
        }
        Step::Close => {
            let _ = f.connection.close();
        }
        Step::Grant => {
            f.permissions.answer(true);
        }
        Step::Deny => {
            f.permissions.answer(false);
        }
        Step::Detach => {
            f.events
                .send(ConnectionEvent::Detached(ACCESSORY.to_string()));
        }
    }
    drain(f);
}

fn check_invariants(f: &Fixture, before: ConnectionState, trail: &[Step]) {
    let state = f.connection.state();
    assert!(
        before == state || before.can_transition_to(state),
        "{before} -> {state} after {trail:?}"
    );
    assert_eq!(
        f.connection.accessory().is_some(),
        state != ConnectionState::Closed,
        "handle presence in {state} after {trail:?}"
    );
    let channel_open = f.channels.peer().is_some_and(|peer| !peer.is_closed());
    assert_eq!(
        channel_open,
        state == ConnectionState::Open,
        "channel presence in {state} after {trail:?}"
    );
}

#[test]
fn test_every_short_sequence_keeps_invariants() {
    let length = 4;
    let total = STEPS.len().pow(length);

    for index in 0..total {
        let mut f = fixture_with(&[ACCESSORY], 1);
        let mut trail = Vec::with_capacity(length as usize);
        let mut code = index;

        for _ in 0..length {
            let step = STEPS[code % STEPS.len()];
            code /= STEPS.len();
            trail.push(step);

            let before = f.connection.state();
            apply(&mut f, step);
            check_invariants(&f, before, &trail);
        }
    }
}
