//! In-memory server/transport pair for the test-suite
//!
//! `MockServer` holds the server-side entity tables; `MockTransport`
//! implements the [`Transport`] seam against it. Replies are never
//! delivered from inside `submit`: every piece of work is queued and
//! pumped through a mainloop defer event, so completions and change
//! notifications reach the client from loop dispatch exactly as they
//! would over a real socket.

use std::cell::{Cell, RefCell};
use std::collections::VecDeque;
use std::rc::{Rc, Weak};

use pulse_mainloop::{DeferEvent, MainloopApi};
use tracing::{debug, trace};

use crate::command::{Command, Record, Reply};
use crate::subscribe::{
    facility_mask_bit, pack_event, EVENT_CHANGE, EVENT_FACILITY_MASK, EVENT_NEW, EVENT_REMOVE,
    FACILITY_CARD, FACILITY_SERVER, FACILITY_SINK, FACILITY_SINK_INPUT, FACILITY_SOURCE,
    FACILITY_MODULE, FACILITY_SOURCE_OUTPUT,
};
use crate::transport::{
    CallError, ConnectFlags, ContextState, ReplyHandler, StateCallback, SubscribeCallback,
    Transport,
};
use crate::types::{
    CVolume, ChannelMap, RawCardInfo, RawCardProfileInfo, RawClientInfo, RawExtStreamRestore,
    RawModuleInfo, RawPortInfo, RawServerInfo, RawSinkInfo, RawSinkInputInfo, RawSourceInfo,
    RawSourceOutputInfo, SampleSpec, INVALID_INDEX, PortAvailable, VOLUME_NORM,
};

enum Work {
    State(ContextState),
    Execute {
        command: Command,
        handler: ReplyHandler,
        force_fail: bool,
    },
    Event {
        packed: u32,
        index: u32,
    },
}

struct Link {
    state: Cell<ContextState>,
    state_cb: RefCell<Option<StateCallback>>,
    subscribe_cb: RefCell<Option<SubscribeCallback>>,
    mask: Cell<u32>,
    queue: RefCell<VecDeque<Work>>,
    pump: RefCell<Option<DeferEvent>>,
    api: MainloopApi,
    last_error: RefCell<Option<String>>,
}

impl Link {
    fn push(&self, work: Work) {
        self.queue.borrow_mut().push_back(work);
        if let Some(pump) = &*self.pump.borrow() {
            pump.enable(true);
        }
        self.api.wakeup();
    }

    fn set_state(&self, state: ContextState) {
        self.state.set(state);
        if !state.is_good() {
            // The link is gone; nothing queued behind this can complete.
            self.queue.borrow_mut().clear();
        }
        let cb = self.state_cb.borrow_mut().take();
        if let Some(mut cb) = cb {
            cb(state);
            if self.state_cb.borrow().is_none() {
                *self.state_cb.borrow_mut() = Some(cb);
            }
        }
    }

    /// Process one queued item; returns whether more work remains.
    fn step(self: &Rc<Self>, server: &Rc<RefCell<ServerState>>) -> bool {
        let work = self.queue.borrow_mut().pop_front();
        match work {
            None => {}
            Some(Work::State(state)) => self.set_state(state),
            Some(Work::Event { packed, index }) => {
                let cb = self.subscribe_cb.borrow_mut().take();
                if let Some(mut cb) = cb {
                    cb(packed, index);
                    if self.subscribe_cb.borrow().is_none() {
                        *self.subscribe_cb.borrow_mut() = Some(cb);
                    }
                }
            }
            Some(Work::Execute {
                command,
                mut handler,
                force_fail,
            }) => {
                if self.state.get() != ContextState::Ready {
                    handler(Reply::Done { success: false });
                } else if let Command::Subscribe(mask) = command {
                    self.mask.set(mask);
                    handler(Reply::Done { success: true });
                } else {
                    trace!(command = command.name(), "mock server executing");
                    let (replies, events) = {
                        let mut st = server.borrow_mut();
                        execute(&mut st, command, force_fail)
                    };
                    for reply in replies {
                        handler(reply);
                    }
                    broadcast(server, &events);
                }
            }
        }
        !self.queue.borrow().is_empty()
    }
}

fn broadcast(server: &Rc<RefCell<ServerState>>, events: &[(u32, u32)]) {
    let links: Vec<Rc<Link>> = server
        .borrow()
        .links
        .iter()
        .filter_map(Weak::upgrade)
        .collect();
    for link in links {
        if link.state.get() != ContextState::Ready {
            continue;
        }
        for &(packed, index) in events {
            let facility = packed & EVENT_FACILITY_MASK;
            if link.mask.get() & facility_mask_bit(facility) != 0 {
                link.push(Work::Event { packed, index });
            }
        }
    }
}

struct ServerState {
    sinks: Vec<RawSinkInfo>,
    sources: Vec<RawSourceInfo>,
    sink_inputs: Vec<RawSinkInputInfo>,
    source_outputs: Vec<RawSourceOutputInfo>,
    clients: Vec<RawClientInfo>,
    cards: Vec<RawCardInfo>,
    modules: Vec<RawModuleInfo>,
    restore: Vec<RawExtStreamRestore>,
    server: RawServerInfo,
    next_sink: u32,
    next_module: u32,
    links: Vec<Weak<Link>>,
    refuse: bool,
    fail_next: bool,
    reject_next: Option<String>,
    last_connect: Option<ConnectFlags>,
}

/// Handle on the in-memory server shared by every attached transport
#[derive(Clone)]
pub struct MockServer {
    inner: Rc<RefCell<ServerState>>,
}

impl MockServer {
    /// A small but fully populated server: one sink with two ports, one
    /// source, one client-owned playback stream, one client-less record
    /// stream, a card with two profiles and a protocol module.
    pub fn with_defaults() -> Self {
        let stereo = SampleSpec {
            format: 3,
            rate: 44_100,
            channels: 2,
        };
        let analog = RawPortInfo {
            name: "analog-output".into(),
            description: "Analog Output".into(),
            priority: 9_000,
            available: PortAvailable::Yes,
        };
        let hdmi = RawPortInfo {
            name: "hdmi-output".into(),
            description: "HDMI Output".into(),
            priority: 5_000,
            available: PortAvailable::No,
        };
        let state = ServerState {
            sinks: vec![RawSinkInfo {
                index: 0,
                name: "test-sink".into(),
                description: "Test Sink".into(),
                sample_spec: stereo,
                channel_map: ChannelMap::stereo(),
                owner_module: 0,
                volume: CVolume::new(&[VOLUME_NORM / 2, VOLUME_NORM / 2]),
                mute: false,
                monitor_source: 0,
                monitor_source_name: "test-sink.monitor".into(),
                driver: "mock".into(),
                card: 0,
                ports: vec![analog.clone(), hdmi],
                active_port: Some(analog),
                ..Default::default()
            }],
            sources: vec![RawSourceInfo {
                index: 0,
                name: "test-source".into(),
                description: "Test Source".into(),
                sample_spec: stereo,
                channel_map: ChannelMap::stereo(),
                owner_module: 0,
                volume: CVolume::new(&[VOLUME_NORM, VOLUME_NORM]),
                mute: false,
                monitor_of_sink: INVALID_INDEX,
                driver: "mock".into(),
                card: 0,
                ..Default::default()
            }],
            sink_inputs: vec![RawSinkInputInfo {
                index: 0,
                name: "music".into(),
                client: 0,
                sink: 0,
                sample_spec: stereo,
                channel_map: ChannelMap::stereo(),
                volume: CVolume::new(&[VOLUME_NORM, VOLUME_NORM]),
                driver: "mock".into(),
                ..Default::default()
            }],
            source_outputs: vec![RawSourceOutputInfo {
                index: 0,
                name: "recorder".into(),
                client: INVALID_INDEX,
                source: 0,
                sample_spec: stereo,
                channel_map: ChannelMap::stereo(),
                volume: CVolume::new(&[VOLUME_NORM, VOLUME_NORM]),
                driver: "mock".into(),
                ..Default::default()
            }],
            clients: vec![RawClientInfo {
                index: 0,
                name: "music-player".into(),
                owner_module: 0,
                driver: "mock".into(),
            }],
            cards: vec![RawCardInfo {
                index: 0,
                name: "mock-card".into(),
                owner_module: 0,
                driver: "mock".into(),
                profiles: vec![
                    RawCardProfileInfo {
                        name: "output:analog-stereo".into(),
                        description: "Analog Stereo Output".into(),
                        n_sinks: 1,
                        n_sources: 0,
                        priority: 6_000,
                    },
                    RawCardProfileInfo {
                        name: "off".into(),
                        description: "Off".into(),
                        n_sinks: 0,
                        n_sources: 0,
                        priority: 0,
                    },
                ],
                active_profile: Some("output:analog-stereo".into()),
            }],
            modules: vec![RawModuleInfo {
                index: 0,
                name: "module-native-protocol-unix".into(),
                argument: None,
                n_used: 1,
            }],
            restore: Vec::new(),
            server: RawServerInfo {
                user_name: "mock".into(),
                host_name: "mockhost".into(),
                server_version: "17.0-mock".into(),
                server_name: "mock sound server".into(),
                sample_spec: stereo,
                channel_map: ChannelMap::stereo(),
                default_sink_name: Some("test-sink".into()),
                default_source_name: Some("test-source".into()),
                cookie: 0x1234,
            },
            next_sink: 1,
            next_module: 1,
            links: Vec::new(),
            refuse: false,
            fail_next: false,
            reject_next: None,
            last_connect: None,
        };
        Self {
            inner: Rc::new(RefCell::new(state)),
        }
    }

    /// Make subsequent connect attempts resolve to `Failed`
    pub fn refuse_connections(&self, refuse: bool) {
        self.inner.borrow_mut().refuse = refuse;
    }

    /// Complete the next executed operation with `success = false`
    pub fn fail_next_operation(&self) {
        self.inner.borrow_mut().fail_next = true;
    }

    /// Reject the next `submit` synchronously with the given message
    pub fn reject_next_submit(&self, message: &str) {
        self.inner.borrow_mut().reject_next = Some(message.to_string());
    }

    /// Sever every attached connection, as if the server process died
    pub fn kill(&self) {
        debug!("mock server killed");
        let links: Vec<Rc<Link>> = self
            .inner
            .borrow()
            .links
            .iter()
            .filter_map(Weak::upgrade)
            .collect();
        for link in links {
            link.queue.borrow_mut().clear();
            link.push(Work::State(ContextState::Failed));
        }
    }

    /// Number of sinks currently known to the server
    pub fn sink_count(&self) -> usize {
        self.inner.borrow().sinks.len()
    }

    /// Flags carried by the most recent connect attempt
    pub fn last_connect_flags(&self) -> Option<ConnectFlags> {
        self.inner.borrow().last_connect
    }

    /// Queue a raw change notification for every subscribed connection,
    /// bypassing the command surface
    pub fn emit_event(&self, packed: u32, index: u32) {
        broadcast(&self.inner, &[(packed, index)]);
    }
}

/// A [`Transport`] implementation backed by a [`MockServer`]
pub struct MockTransport {
    server: MockServer,
    link: Rc<Link>,
}

impl MockTransport {
    pub fn new(server: &MockServer, api: MainloopApi) -> Self {
        let link = Rc::new(Link {
            state: Cell::new(ContextState::Unconnected),
            state_cb: RefCell::new(None),
            subscribe_cb: RefCell::new(None),
            mask: Cell::new(0),
            queue: RefCell::new(VecDeque::new()),
            pump: RefCell::new(None),
            api: api.clone(),
            last_error: RefCell::new(None),
        });
        let pump_link = Rc::clone(&link);
        let pump_server = Rc::clone(&server.inner);
        let pump = api.defer_new(Box::new(move |me| {
            if !pump_link.step(&pump_server) {
                me.enable(false);
            }
        }));
        pump.enable(false);
        *link.pump.borrow_mut() = Some(pump);
        server.inner.borrow_mut().links.push(Rc::downgrade(&link));
        Self {
            server: server.clone(),
            link,
        }
    }
}

impl Transport for MockTransport {
    fn connect(&mut self, server: Option<&str>, flags: ConnectFlags) -> Result<(), CallError> {
        trace!(?server, ?flags, "mock connect submitted");
        self.server.inner.borrow_mut().last_connect = Some(flags);
        self.link.state.set(ContextState::Connecting);
        let target = if self.server.inner.borrow().refuse {
            ContextState::Failed
        } else {
            ContextState::Ready
        };
        self.link.push(Work::State(target));
        Ok(())
    }

    fn disconnect(&mut self) {
        if self.link.state.get() == ContextState::Terminated {
            return;
        }
        self.link.set_state(ContextState::Terminated);
    }

    fn state(&self) -> ContextState {
        self.link.state.get()
    }

    fn last_error(&self) -> Option<String> {
        self.link.last_error.borrow().clone()
    }

    fn set_state_callback(&mut self, cb: Option<StateCallback>) {
        *self.link.state_cb.borrow_mut() = cb;
    }

    fn set_subscribe_callback(&mut self, cb: Option<SubscribeCallback>) {
        *self.link.subscribe_cb.borrow_mut() = cb;
    }

    fn submit(&mut self, command: Command, handler: ReplyHandler) -> Result<(), CallError> {
        if let Some(msg) = self.server.inner.borrow_mut().reject_next.take() {
            *self.link.last_error.borrow_mut() = Some(msg.clone());
            return Err(CallError(msg));
        }
        if self.link.state.get() != ContextState::Ready {
            let msg = format!("{}: context not connected", command.name());
            *self.link.last_error.borrow_mut() = Some(msg.clone());
            return Err(CallError(msg));
        }
        let force_fail = {
            let mut st = self.server.inner.borrow_mut();
            std::mem::take(&mut st.fail_next)
        };
        self.link.push(Work::Execute {
            command,
            handler,
            force_fail,
        });
        Ok(())
    }
}

fn done(success: bool) -> Vec<Reply> {
    vec![Reply::Done { success }]
}

fn records_done<T>(items: Vec<T>, wrap: impl Fn(T) -> Record) -> Vec<Reply> {
    let mut replies: Vec<Reply> = items.into_iter().map(|i| Reply::Record(wrap(i))).collect();
    replies.push(Reply::Done { success: true });
    replies
}

type Effects = (Vec<Reply>, Vec<(u32, u32)>);

fn execute(st: &mut ServerState, command: Command, force_fail: bool) -> Effects {
    if force_fail {
        return (done(false), Vec::new());
    }
    let mut events = Vec::new();
    let replies = match command {
        Command::GetServerInfo => records_done(vec![st.server.clone()], Record::Server),

        Command::GetSinkInfoList => records_done(st.sinks.clone(), Record::Sink),
        Command::GetSinkInfoByIndex(i) => records_done(
            st.sinks.iter().filter(|s| s.index == i).cloned().collect(),
            Record::Sink,
        ),
        Command::GetSinkInfoByName(n) => records_done(
            st.sinks.iter().filter(|s| s.name == n).cloned().collect(),
            Record::Sink,
        ),
        Command::GetSourceInfoList => records_done(st.sources.clone(), Record::Source),
        Command::GetSourceInfoByIndex(i) => records_done(
            st.sources.iter().filter(|s| s.index == i).cloned().collect(),
            Record::Source,
        ),
        Command::GetSourceInfoByName(n) => records_done(
            st.sources.iter().filter(|s| s.name == n).cloned().collect(),
            Record::Source,
        ),
        Command::GetSinkInputInfoList => records_done(st.sink_inputs.clone(), Record::SinkInput),
        Command::GetSinkInputInfoByIndex(i) => records_done(
            st.sink_inputs
                .iter()
                .filter(|s| s.index == i)
                .cloned()
                .collect(),
            Record::SinkInput,
        ),
        Command::GetSourceOutputInfoList => {
            records_done(st.source_outputs.clone(), Record::SourceOutput)
        }
        Command::GetSourceOutputInfoByIndex(i) => records_done(
            st.source_outputs
                .iter()
                .filter(|s| s.index == i)
                .cloned()
                .collect(),
            Record::SourceOutput,
        ),
        Command::GetClientInfoList => records_done(st.clients.clone(), Record::Client),
        Command::GetClientInfoByIndex(i) => records_done(
            st.clients.iter().filter(|c| c.index == i).cloned().collect(),
            Record::Client,
        ),
        Command::GetCardInfoList => records_done(st.cards.clone(), Record::Card),
        Command::GetCardInfoByIndex(i) => records_done(
            st.cards.iter().filter(|c| c.index == i).cloned().collect(),
            Record::Card,
        ),
        Command::GetCardInfoByName(n) => records_done(
            st.cards.iter().filter(|c| c.name == n).cloned().collect(),
            Record::Card,
        ),
        Command::GetModuleInfoList => records_done(st.modules.clone(), Record::Module),
        Command::GetModuleInfoByIndex(i) => records_done(
            st.modules.iter().filter(|m| m.index == i).cloned().collect(),
            Record::Module,
        ),

        Command::SetSinkVolumeByIndex { index, volume } => {
            mutate(st.sinks.iter_mut().find(|s| s.index == index), &mut events,
                (EVENT_CHANGE, FACILITY_SINK, index), |s| s.volume = volume)
        }
        Command::SetSinkMuteByIndex { index, mute } => {
            mutate(st.sinks.iter_mut().find(|s| s.index == index), &mut events,
                (EVENT_CHANGE, FACILITY_SINK, index), |s| s.mute = mute)
        }
        Command::SetSinkPortByIndex { index, port } => {
            match st.sinks.iter_mut().find(|s| s.index == index) {
                Some(s) => match s.ports.iter().find(|p| p.name == port).cloned() {
                    Some(p) => {
                        s.active_port = Some(p);
                        events.push((pack_event(EVENT_CHANGE, FACILITY_SINK), index));
                        done(true)
                    }
                    None => done(false),
                },
                None => done(false),
            }
        }
        Command::SuspendSinkByIndex { index, suspend: _ } => {
            mutate(st.sinks.iter_mut().find(|s| s.index == index), &mut events,
                (EVENT_CHANGE, FACILITY_SINK, index), |_| ())
        }
        Command::SetSourceVolumeByIndex { index, volume } => {
            mutate(st.sources.iter_mut().find(|s| s.index == index), &mut events,
                (EVENT_CHANGE, FACILITY_SOURCE, index), |s| s.volume = volume)
        }
        Command::SetSourceMuteByIndex { index, mute } => {
            mutate(st.sources.iter_mut().find(|s| s.index == index), &mut events,
                (EVENT_CHANGE, FACILITY_SOURCE, index), |s| s.mute = mute)
        }
        Command::SetSourcePortByIndex { index, port } => {
            match st.sources.iter_mut().find(|s| s.index == index) {
                Some(s) => match s.ports.iter().find(|p| p.name == port).cloned() {
                    Some(p) => {
                        s.active_port = Some(p);
                        events.push((pack_event(EVENT_CHANGE, FACILITY_SOURCE), index));
                        done(true)
                    }
                    None => done(false),
                },
                None => done(false),
            }
        }
        Command::SuspendSourceByIndex { index, suspend: _ } => {
            mutate(st.sources.iter_mut().find(|s| s.index == index), &mut events,
                (EVENT_CHANGE, FACILITY_SOURCE, index), |_| ())
        }

        Command::SetSinkInputVolume { index, volume } => {
            mutate(st.sink_inputs.iter_mut().find(|s| s.index == index), &mut events,
                (EVENT_CHANGE, FACILITY_SINK_INPUT, index), |s| s.volume = volume)
        }
        Command::SetSinkInputMute { index, mute } => {
            mutate(st.sink_inputs.iter_mut().find(|s| s.index == index), &mut events,
                (EVENT_CHANGE, FACILITY_SINK_INPUT, index), |s| s.mute = mute)
        }
        Command::MoveSinkInputByIndex { index, sink_index } => {
            if st.sinks.iter().any(|s| s.index == sink_index) {
                mutate(st.sink_inputs.iter_mut().find(|s| s.index == index), &mut events,
                    (EVENT_CHANGE, FACILITY_SINK_INPUT, index), |s| s.sink = sink_index)
            } else {
                done(false)
            }
        }
        Command::SetSourceOutputVolume { index, volume } => {
            mutate(st.source_outputs.iter_mut().find(|s| s.index == index), &mut events,
                (EVENT_CHANGE, FACILITY_SOURCE_OUTPUT, index), |s| s.volume = volume)
        }
        Command::SetSourceOutputMute { index, mute } => {
            mutate(st.source_outputs.iter_mut().find(|s| s.index == index), &mut events,
                (EVENT_CHANGE, FACILITY_SOURCE_OUTPUT, index), |s| s.mute = mute)
        }
        Command::MoveSourceOutputByIndex {
            index,
            source_index,
        } => {
            if st.sources.iter().any(|s| s.index == source_index) {
                mutate(st.source_outputs.iter_mut().find(|s| s.index == index), &mut events,
                    (EVENT_CHANGE, FACILITY_SOURCE_OUTPUT, index), |s| s.source = source_index)
            } else {
                done(false)
            }
        }

        Command::SetCardProfileByIndex { index, profile } => {
            match st.cards.iter_mut().find(|c| c.index == index) {
                Some(c) if c.profiles.iter().any(|p| p.name == profile) => {
                    c.active_profile = Some(profile);
                    events.push((pack_event(EVENT_CHANGE, FACILITY_CARD), index));
                    done(true)
                }
                _ => done(false),
            }
        }
        Command::SetDefaultSink(name) => {
            if st.sinks.iter().any(|s| s.name == name) {
                st.server.default_sink_name = Some(name);
                events.push((pack_event(EVENT_CHANGE, FACILITY_SERVER), INVALID_INDEX));
                done(true)
            } else {
                done(false)
            }
        }
        Command::SetDefaultSource(name) => {
            if st.sources.iter().any(|s| s.name == name) {
                st.server.default_source_name = Some(name);
                events.push((pack_event(EVENT_CHANGE, FACILITY_SERVER), INVALID_INDEX));
                done(true)
            } else {
                done(false)
            }
        }

        Command::LoadModule { name, argument } => {
            let index = st.next_module;
            st.next_module += 1;
            st.modules.push(RawModuleInfo {
                index,
                name: name.clone(),
                argument: argument.clone(),
                n_used: 0,
            });
            events.push((pack_event(EVENT_NEW, FACILITY_MODULE), index));
            if name == "module-null-sink" {
                let sink_index = st.next_sink;
                st.next_sink += 1;
                let sink_name = argument
                    .as_deref()
                    .and_then(|a| {
                        a.split_whitespace()
                            .find_map(|kv| kv.strip_prefix("sink_name="))
                    })
                    .map(str::to_string)
                    .unwrap_or_else(|| format!("null-sink-{index}"));
                st.sinks.push(RawSinkInfo {
                    index: sink_index,
                    name: sink_name.clone(),
                    description: format!("Null Output {sink_name}"),
                    sample_spec: st.server.sample_spec,
                    channel_map: ChannelMap::stereo(),
                    owner_module: index,
                    volume: CVolume::new(&[VOLUME_NORM, VOLUME_NORM]),
                    driver: "module-null-sink.c".into(),
                    card: INVALID_INDEX,
                    ..Default::default()
                });
                events.push((pack_event(EVENT_NEW, FACILITY_SINK), sink_index));
            }
            let mut replies = vec![Reply::Record(Record::Index(index))];
            replies.push(Reply::Done { success: true });
            replies
        }
        Command::UnloadModule(index) => {
            let existed = st.modules.iter().any(|m| m.index == index);
            if existed {
                st.modules.retain(|m| m.index != index);
                events.push((pack_event(EVENT_REMOVE, FACILITY_MODULE), index));
                let owned: Vec<u32> = st
                    .sinks
                    .iter()
                    .filter(|s| s.owner_module == index)
                    .map(|s| s.index)
                    .collect();
                st.sinks.retain(|s| s.owner_module != index);
                for sink_index in owned {
                    events.push((pack_event(EVENT_REMOVE, FACILITY_SINK), sink_index));
                }
            }
            done(existed)
        }

        // Subscribe is handled on the link, not here.
        Command::Subscribe(_) => done(true),

        Command::ExtStreamRestoreRead => {
            records_done(st.restore.clone(), Record::ExtStreamRestore)
        }
        Command::ExtStreamRestoreWrite {
            entries,
            apply_immediately: _,
        } => {
            for entry in entries {
                match st.restore.iter_mut().find(|r| r.name == entry.name) {
                    Some(slot) => *slot = entry,
                    None => st.restore.push(entry),
                }
            }
            done(true)
        }
        Command::ExtStreamRestoreDelete(names) => {
            st.restore.retain(|r| !names.contains(&r.name));
            done(true)
        }
    };
    (replies, events)
}

fn mutate<T>(
    target: Option<&mut T>,
    events: &mut Vec<(u32, u32)>,
    event: (u32, u32, u32),
    apply: impl FnOnce(&mut T),
) -> Vec<Reply> {
    match target {
        Some(t) => {
            apply(t);
            events.push((pack_event(event.0, event.1), event.2));
            done(true)
        }
        None => done(false),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pulse_mainloop::Mainloop;

    fn pump_until<F: Fn() -> bool>(ml: &Mainloop, cond: F) {
        let start = std::time::Instant::now();
        while !cond() {
            assert!(start.elapsed().as_secs() < 2, "mock pump timed out");
            ml.iterate(true).unwrap();
        }
    }

    #[test]
    fn test_connect_reaches_ready_via_dispatch() {
        let ml = Mainloop::new().unwrap();
        let server = MockServer::with_defaults();
        let mut tr = MockTransport::new(&server, ml.api());
        let seen = Rc::new(RefCell::new(Vec::new()));
        let seen2 = Rc::clone(&seen);
        tr.set_state_callback(Some(Box::new(move |s| seen2.borrow_mut().push(s))));
        tr.connect(None, ConnectFlags::default()).unwrap();
        assert_eq!(tr.state(), ContextState::Connecting);
        pump_until(&ml, || !seen.borrow().is_empty());
        assert_eq!(tr.state(), ContextState::Ready);
    }

    #[test]
    fn test_submit_requires_ready() {
        let ml = Mainloop::new().unwrap();
        let server = MockServer::with_defaults();
        let mut tr = MockTransport::new(&server, ml.api());
        let err = tr
            .submit(Command::GetSinkInfoList, Box::new(|_| {}))
            .unwrap_err();
        assert!(err.0.contains("not connected"));
        assert!(tr.last_error().is_some());
    }

    #[test]
    fn test_list_reply_stream_shape() {
        let ml = Mainloop::new().unwrap();
        let server = MockServer::with_defaults();
        let mut tr = MockTransport::new(&server, ml.api());
        tr.connect(None, ConnectFlags::default()).unwrap();
        pump_until(&ml, || tr.state() == ContextState::Ready);

        let replies = Rc::new(RefCell::new(Vec::new()));
        let sink = Rc::clone(&replies);
        tr.submit(
            Command::GetSinkInfoList,
            Box::new(move |r| sink.borrow_mut().push(r)),
        )
        .unwrap();
        pump_until(&ml, || {
            replies
                .borrow()
                .iter()
                .any(|r| matches!(r, Reply::Done { .. }))
        });
        let replies = replies.borrow();
        assert_eq!(replies.len(), 2);
        assert!(matches!(replies[0], Reply::Record(Record::Sink(_))));
        assert!(matches!(replies[1], Reply::Done { success: true }));
    }
}
