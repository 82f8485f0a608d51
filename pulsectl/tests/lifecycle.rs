//! Connection lifecycle: connect, refuse, kill, reconnect, close

mod common;

use std::time::{Duration, Instant};

use common::{connected_pulse, unconnected_pulse};
use pulsectl::{Error, EventAction};

#[test]
fn test_connect_resolves_tristate() {
    let (_server, pulse) = unconnected_pulse();
    assert_eq!(pulse.connected(), None);
    pulse.connect(false, false, None).unwrap();
    assert_eq!(pulse.connected(), Some(true));
}

#[test]
fn test_refused_connection() {
    let (server, pulse) = unconnected_pulse();
    server.refuse_connections(true);
    assert!(matches!(pulse.connect(false, false, None), Err(Error::Connect { .. })));
    assert_eq!(pulse.connected(), Some(false));

    // The client stays reusable once the server comes back.
    server.refuse_connections(false);
    pulse.connect(false, false, None).unwrap();
    assert_eq!(pulse.connected(), Some(true));
    assert_eq!(pulse.sink_list().unwrap().len(), 1);
}

#[test]
fn test_connect_flags_reach_transport() {
    let (server, pulse) = unconnected_pulse();
    pulse.connect(false, false, None).unwrap();
    let flags = server.last_connect_flags().unwrap();
    assert!(!flags.autospawn);
    assert!(!flags.wait_for_daemon);

    pulse.disconnect().unwrap();
    pulse.connect(true, true, None).unwrap();
    let flags = server.last_connect_flags().unwrap();
    assert!(flags.autospawn);
    assert!(flags.wait_for_daemon);
}

#[test]
fn test_query_before_connect() {
    let (_server, pulse) = unconnected_pulse();
    assert!(matches!(pulse.sink_list(), Err(Error::Disconnected)));
}

#[test]
fn test_kill_fails_in_flight_call() {
    let (server, pulse) = connected_pulse();
    server.kill();
    // The failure arrives from dispatch while this call is pumping the
    // loop for its own completion.
    assert!(matches!(pulse.sink_list(), Err(Error::Disconnected)));
    assert_eq!(pulse.connected(), Some(false));
}

#[test]
fn test_reconnect_after_kill() {
    let (server, pulse) = connected_pulse();
    server.kill();
    assert!(matches!(pulse.sink_list(), Err(Error::Disconnected)));

    pulse.connect(false, false, None).unwrap();
    assert_eq!(pulse.sink_list().unwrap().len(), 1);
}

#[test]
fn test_disconnect_then_reconnect() {
    let (_server, pulse) = connected_pulse();
    pulse.disconnect().unwrap();
    assert_eq!(pulse.connected(), Some(false));
    assert!(matches!(pulse.server_info(), Err(Error::Disconnected)));

    pulse.connect(false, false, None).unwrap();
    assert!(pulse.server_info().is_ok());
}

#[test]
fn test_close_is_permanent() {
    let (_server, pulse) = connected_pulse();
    pulse.close();
    assert_eq!(pulse.connected(), Some(false));
    assert!(matches!(pulse.sink_list(), Err(Error::Closed)));
    assert!(matches!(pulse.connect(false, false, None), Err(Error::Closed)));
    // Idempotent.
    pulse.close();
}

#[test]
fn test_listen_timeout_is_bounded() {
    let (_server, pulse) = connected_pulse();
    pulse.event_callback_set(Some(Box::new(|_| EventAction::Continue))).unwrap();

    let start = Instant::now();
    pulse
        .event_listen(Some(Duration::from_millis(50)), true)
        .unwrap();
    let elapsed = start.elapsed();
    assert!(elapsed >= Duration::from_millis(30), "returned too early: {elapsed:?}");
    assert!(elapsed < Duration::from_secs(2), "overslept: {elapsed:?}");
}
