//! Change-notification delivery, masking and callback semantics

mod common;

use std::cell::{Cell, RefCell};
use std::rc::Rc;
use std::time::Duration;

use common::connected_pulse;
use pulsectl::{Error, Event, EventAction, EventFacility, EventMask, EventType, Volume};

const LISTEN_TIMEOUT: Duration = Duration::from_millis(500);

#[test]
fn test_change_event_arrives_after_completion() {
    let (_server, pulse) = connected_pulse();
    pulse.event_mask_set(&[EventMask::Sink]).unwrap();

    let seen: Rc<RefCell<Vec<Event>>> = Rc::new(RefCell::new(Vec::new()));
    let sink = Rc::clone(&seen);
    pulse.event_callback_set(Some(Box::new(move |ev| {
        sink.borrow_mut().push(*ev);
        EventAction::Stop
    }))).unwrap();

    pulse.sink_volume_set(0, &Volume::uniform(2, 0.7)).unwrap();
    // The blocking call returns on its completion; the notification it
    // caused is still queued, not slipped in ahead of the result.
    assert!(seen.borrow().is_empty());

    pulse.event_listen(Some(LISTEN_TIMEOUT), true).unwrap();
    let seen = seen.borrow();
    assert_eq!(seen.len(), 1);
    assert_eq!(seen[0].facility, EventFacility::Sink);
    assert_eq!(seen[0].kind, EventType::Change);
    assert_eq!(seen[0].index, 0);
}

#[test]
fn test_mask_filters_facilities() {
    let (_server, pulse) = connected_pulse();
    pulse.event_mask_set(&[EventMask::Sink]).unwrap();

    let seen: Rc<RefCell<Vec<Event>>> = Rc::new(RefCell::new(Vec::new()));
    let sink = Rc::clone(&seen);
    pulse.event_callback_set(Some(Box::new(move |ev| {
        sink.borrow_mut().push(*ev);
        EventAction::Continue
    }))).unwrap();

    // Source changes are outside the subscribed mask.
    pulse.source_mute(0, true).unwrap();
    pulse.sink_mute(0, true).unwrap();

    pulse
        .event_listen(Some(Duration::from_millis(100)), true)
        .unwrap();
    let seen = seen.borrow();
    assert_eq!(seen.len(), 1);
    assert_eq!(seen[0].facility, EventFacility::Sink);
}

#[test]
fn test_new_and_remove_events() {
    let (_server, pulse) = connected_pulse();
    pulse
        .event_mask_set(&[EventMask::Sink, EventMask::Module])
        .unwrap();

    let seen: Rc<RefCell<Vec<Event>>> = Rc::new(RefCell::new(Vec::new()));
    let sink = Rc::clone(&seen);
    pulse.event_callback_set(Some(Box::new(move |ev| {
        sink.borrow_mut().push(*ev);
        EventAction::Continue
    }))).unwrap();

    let module = pulse
        .module_load("module-null-sink", Some("sink_name=transient"))
        .unwrap();
    pulse.module_unload(module).unwrap();

    pulse
        .event_listen(Some(Duration::from_millis(100)), true)
        .unwrap();
    let kinds: Vec<(EventFacility, EventType)> = seen
        .borrow()
        .iter()
        .map(|ev| (ev.facility, ev.kind))
        .collect();
    assert!(kinds.contains(&(EventFacility::Module, EventType::New)));
    assert!(kinds.contains(&(EventFacility::Sink, EventType::New)));
    assert!(kinds.contains(&(EventFacility::Module, EventType::Remove)));
    assert!(kinds.contains(&(EventFacility::Sink, EventType::Remove)));
}

#[test]
fn test_listen_requires_callback() {
    let (_server, pulse) = connected_pulse();
    assert!(matches!(
        pulse.event_listen(Some(LISTEN_TIMEOUT), true),
        Err(Error::OperationInvalid(_))
    ));
}

#[test]
fn test_blocking_call_from_callback_is_rejected() {
    let (_server, pulse) = connected_pulse();
    pulse.event_mask_set(&[EventMask::Sink]).unwrap();

    let hit_guard = Rc::new(Cell::new(false));
    let flag = Rc::clone(&hit_guard);
    let handle = pulse.clone();
    pulse.event_callback_set(Some(Box::new(move |_| {
        flag.set(matches!(handle.sink_list(), Err(Error::LoopReentrancy)));
        EventAction::Stop
    }))).unwrap();

    pulse.sink_mute(0, true).unwrap();
    pulse.event_listen(Some(LISTEN_TIMEOUT), true).unwrap();
    assert!(hit_guard.get());

    // Outside the callback the same handle works again.
    assert_eq!(pulse.sink_list().unwrap().len(), 1);
}

#[test]
fn test_facade_usable_after_stopped_listen() {
    let (_server, pulse) = connected_pulse();
    pulse.event_mask_set(&[EventMask::Sink]).unwrap();
    pulse
        .event_callback_set(Some(Box::new(|_| EventAction::Stop)))
        .unwrap();

    pulse.sink_mute(0, true).unwrap();
    pulse.event_listen(Some(LISTEN_TIMEOUT), true).unwrap();

    // The stop request ends with the listen it stopped; later calls
    // pump the loop normally again.
    assert_eq!(pulse.connected(), Some(true));
    assert_eq!(pulse.sink_list().unwrap().len(), 1);
    pulse.sink_mute(0, false).unwrap();
}

#[test]
fn test_unknown_event_type_is_delivered() {
    let (server, pulse) = connected_pulse();
    pulse.event_mask_set(&[EventMask::Sink]).unwrap();

    let seen: Rc<RefCell<Vec<Event>>> = Rc::new(RefCell::new(Vec::new()));
    let sink = Rc::clone(&seen);
    pulse
        .event_callback_set(Some(Box::new(move |ev| {
            sink.borrow_mut().push(*ev);
            EventAction::Stop
        })))
        .unwrap();

    // Type bits outside the known new/change/remove range.
    server.emit_event(0x30, 7);
    pulse.event_listen(Some(LISTEN_TIMEOUT), true).unwrap();

    let seen = seen.borrow();
    assert_eq!(seen.len(), 1);
    assert_eq!(seen[0].facility, EventFacility::Sink);
    assert_eq!(seen[0].kind, EventType::Unknown(0x30));
    assert_eq!(seen[0].kind.to_string(), "type.48");
    assert_eq!(seen[0].index, 7);
}

#[test]
fn test_callback_clearing_itself_sticks() {
    let (_server, pulse) = connected_pulse();
    pulse.event_mask_set(&[EventMask::Sink]).unwrap();

    let calls = Rc::new(Cell::new(0usize));
    let count = Rc::clone(&calls);
    let handle = pulse.clone();
    pulse
        .event_callback_set(Some(Box::new(move |_| {
            count.set(count.get() + 1);
            handle.event_callback_set(None).unwrap();
            EventAction::Continue
        })))
        .unwrap();

    pulse.sink_mute(0, true).unwrap();
    pulse.sink_mute(0, false).unwrap();
    pulse
        .event_listen(Some(Duration::from_millis(100)), true)
        .unwrap();

    // The first delivery removed the callback for good; the second
    // queued notification found the slot empty.
    assert_eq!(calls.get(), 1);
    assert!(matches!(
        pulse.event_listen(Some(LISTEN_TIMEOUT), true),
        Err(Error::OperationInvalid(_))
    ));
}

#[test]
fn test_stop_via_external_handle() {
    let (_server, pulse) = connected_pulse();
    pulse.event_mask_set(&[EventMask::Sink]).unwrap();

    let handle = pulse.clone();
    pulse.event_callback_set(Some(Box::new(move |_| {
        handle.event_listen_stop();
        EventAction::Continue
    }))).unwrap();

    pulse.sink_mute(0, true).unwrap();
    pulse.event_listen(Some(LISTEN_TIMEOUT), true).unwrap();
}

#[test]
fn test_close_from_callback_is_deferred() {
    let (_server, pulse) = connected_pulse();
    pulse.event_mask_set(&[EventMask::Sink]).unwrap();

    let handle = pulse.clone();
    pulse.event_callback_set(Some(Box::new(move |_| {
        handle.close();
        EventAction::Continue
    }))).unwrap();

    pulse.sink_mute(0, true).unwrap();
    pulse.event_listen(Some(LISTEN_TIMEOUT), false).unwrap();

    assert_eq!(pulse.connected(), Some(false));
    assert!(matches!(pulse.sink_list(), Err(Error::Closed)));
}

#[test]
fn test_event_iterator_drains_and_times_out() {
    let (_server, pulse) = connected_pulse();
    pulse.event_mask_set(&[EventMask::Sink]).unwrap();

    let mut events = pulse.events(Some(Duration::from_millis(100))).unwrap();
    pulse.sink_mute(0, true).unwrap();
    pulse.sink_mute(0, false).unwrap();

    let first = events.next().unwrap();
    assert_eq!(first.facility, EventFacility::Sink);
    assert_eq!(first.kind, EventType::Change);
    let second = events.next().unwrap();
    assert_eq!(second.facility, EventFacility::Sink);
    // Nothing further within the timeout.
    assert_eq!(events.next(), None);

    // Dropping the iterator frees the callback slot again.
    drop(events);
    pulse
        .event_callback_set(Some(Box::new(|_| EventAction::Continue)))
        .unwrap();
}

#[test]
fn test_callback_and_iterator_conflict() {
    let (_server, pulse) = connected_pulse();
    pulse
        .event_callback_set(Some(Box::new(|_| EventAction::Continue)))
        .unwrap();
    assert!(matches!(
        pulse.events(None),
        Err(Error::CallbackConflict)
    ));

    pulse.event_callback_set(None).unwrap();
    let events = pulse.events(Some(Duration::from_millis(10))).unwrap();
    assert!(matches!(
        pulse.event_callback_set(None),
        Err(Error::CallbackConflict)
    ));
    drop(events);
}

#[test]
fn test_kill_during_listen_raises() {
    let (server, pulse) = connected_pulse();
    pulse.event_mask_set(&[EventMask::All]).unwrap();
    pulse.event_callback_set(Some(Box::new(|_| EventAction::Continue))).unwrap();

    server.kill();
    assert!(matches!(
        pulse.event_listen(Some(LISTEN_TIMEOUT), true),
        Err(Error::Disconnected)
    ));
}

#[test]
fn test_kill_during_listen_without_raise() {
    let (server, pulse) = connected_pulse();
    pulse.event_mask_set(&[EventMask::All]).unwrap();
    pulse.event_callback_set(Some(Box::new(|_| EventAction::Continue))).unwrap();

    server.kill();
    pulse.event_listen(Some(LISTEN_TIMEOUT), false).unwrap();
    assert_eq!(pulse.connected(), Some(false));
}
