//! The blocking client facade
//!
//! `Pulse` owns a mainloop and a transport and presents every asynchronous
//! server operation as a plain blocking call: submit, then pump the loop
//! until the matching completion token is finished. The facade is a cheap
//! cloneable handle; clones share one connection, which is what lets an
//! event callback hold a handle back to the client it runs under (any
//! blocking call made through it from there fails fast with
//! [`Error::LoopReentrancy`] instead of deadlocking).

use std::cell::{Cell, RefCell};
use std::collections::VecDeque;
use std::rc::Rc;
use std::time::{Duration, Instant};

use pulse_mainloop::{Mainloop, Step};
use pulse_transport::subscribe::{EVENT_FACILITY_MASK, EVENT_TYPE_MASK};
use pulse_transport::{
    Command, ConnectFlags, ContextState, Record, Reply, ReplyHandler, Transport,
};
use tracing::{debug, trace};

use crate::error::{Error, Result};
use crate::event::{Event, EventAction, EventFacility, EventMask, EventType};
use crate::ops::{OperationTracker, Outcome};
use crate::types::{
    CardInfo, ClientInfo, EntityKind, ModuleInfo, ServerInfo, SinkInfo, SinkInputInfo, SourceInfo,
    SourceOutputInfo, StreamRestoreInfo, VolumeEntity,
};
use crate::volume::Volume;

/// Handles one change notification; return [`EventAction::Stop`] to leave
/// the listen loop.
pub type EventCallback = Box<dyn FnMut(&Event) -> EventAction>;

// State reachable from transport callbacks. Kept apart from the facade
// body so the callbacks never hold a strong reference back to it.
struct Shared {
    connected: Cell<Option<bool>>,
    ops: OperationTracker,
    event_cb: RefCell<Option<EventCallback>>,
    // Bumped on every assignment to the callback slot, so dispatch can
    // tell "empty because taken for the call" from "cleared by the user
    // during the call".
    cb_generation: Cell<u64>,
    loop_stop: Cell<bool>,
    // Set while an EventIterator owns the callback slot.
    iterator_active: Cell<bool>,
}

impl Shared {
    fn set_event_cb(&self, cb: Option<EventCallback>) {
        self.cb_generation.set(self.cb_generation.get().wrapping_add(1));
        *self.event_cb.borrow_mut() = cb;
    }
}

struct PulseInner {
    client_name: String,
    server: Option<String>,
    mainloop: Mainloop,
    transport: RefCell<Box<dyn Transport>>,
    shared: Rc<Shared>,
    loop_running: Cell<bool>,
    deferred_close: Cell<bool>,
    closed: Cell<bool>,
}

/// Blocking sound-server client
#[derive(Clone)]
pub struct Pulse {
    inner: Rc<PulseInner>,
}

macro_rules! record_into {
    ($fn_name:ident, $variant:ident, $ty:ty) => {
        fn $fn_name(record: Record) -> Option<$ty> {
            match record {
                Record::$variant(raw) => Some(raw.into()),
                _ => None,
            }
        }
    };
}

record_into!(sink_record, Sink, SinkInfo);
record_into!(source_record, Source, SourceInfo);
record_into!(sink_input_record, SinkInput, SinkInputInfo);
record_into!(source_output_record, SourceOutput, SourceOutputInfo);
record_into!(client_record, Client, ClientInfo);
record_into!(card_record, Card, CardInfo);
record_into!(module_record, Module, ModuleInfo);
record_into!(server_record, Server, ServerInfo);
record_into!(restore_record, ExtStreamRestore, StreamRestoreInfo);

impl Pulse {
    /// Build a client over an already constructed loop and transport.
    ///
    /// `server` is the locator handed to the transport on connect; `None`
    /// selects its default discovery. Nothing touches the wire until
    /// [`connect`](Self::connect).
    pub fn new(
        client_name: &str,
        server: Option<&str>,
        mainloop: Mainloop,
        mut transport: Box<dyn Transport>,
    ) -> Self {
        let shared = Rc::new(Shared {
            connected: Cell::new(None),
            ops: OperationTracker::default(),
            event_cb: RefCell::new(None),
            cb_generation: Cell::new(0),
            loop_stop: Cell::new(false),
            iterator_active: Cell::new(false),
        });

        let st = Rc::clone(&shared);
        transport.set_state_callback(Some(Box::new(move |state| {
            trace!(?state, "context state changed");
            match state {
                ContextState::Ready => st.connected.set(Some(true)),
                ContextState::Failed | ContextState::Terminated => {
                    st.connected.set(Some(false));
                    st.ops.disconnect_all();
                }
                _ => {}
            }
        })));

        let ev = Rc::clone(&shared);
        transport.set_subscribe_callback(Some(Box::new(move |packed, index| {
            let event = Event {
                facility: EventFacility::from_code(packed & EVENT_FACILITY_MASK),
                kind: EventType::from_bits(packed & EVENT_TYPE_MASK),
                index,
            };
            trace!(?event, "change notification");
            // Taken out of the slot for the call so the callback may
            // replace itself through the facade handle it holds.
            let generation = ev.cb_generation.get();
            let cb = ev.event_cb.borrow_mut().take();
            if let Some(mut cb) = cb {
                if cb(&event) == EventAction::Stop {
                    ev.loop_stop.set(true);
                }
                // An unchanged generation means the callback neither
                // cleared nor replaced the slot; put the taken one back.
                if ev.cb_generation.get() == generation && ev.event_cb.borrow().is_none() {
                    *ev.event_cb.borrow_mut() = Some(cb);
                }
            }
        })));

        Self {
            inner: Rc::new(PulseInner {
                client_name: client_name.to_string(),
                server: server.map(str::to_string),
                mainloop,
                transport: RefCell::new(transport),
                shared,
                loop_running: Cell::new(false),
                deferred_close: Cell::new(false),
                closed: Cell::new(false),
            }),
        }
    }

    pub fn name(&self) -> &str {
        &self.inner.client_name
    }

    /// Connection status: `None` while a connect attempt is unresolved,
    /// then `Some(true)` until the link fails or is torn down.
    pub fn connected(&self) -> Option<bool> {
        self.inner.shared.connected.get()
    }

    /// Connect and block until the attempt resolves either way.
    ///
    /// `autospawn` lets the transport start a server instance when none
    /// is running; with `wait` the transport keeps retrying while no
    /// server is reachable instead of failing the attempt outright;
    /// `timeout` bounds the whole attempt. Reconnecting an expired
    /// client is allowed as long as it was not closed.
    pub fn connect(&self, autospawn: bool, wait: bool, timeout: Option<Duration>) -> Result<()> {
        let p = &self.inner;
        p.check_open()?;
        p.check_not_dispatching()?;
        debug!(client = %p.client_name, server = ?p.server, "connecting");
        p.shared.connected.set(None);
        p.shared.loop_stop.set(false);
        let flags = ConnectFlags {
            autospawn,
            wait_for_daemon: wait,
        };
        p.transport
            .borrow_mut()
            .connect(p.server.as_deref(), flags)
            .map_err(|e| Error::Connect {
                reason: Some(e.to_string()),
            })?;
        let deadline = timeout.map(|t| Instant::now() + t);
        p.drive(|| p.shared.connected.get().is_some(), deadline)?;
        match p.shared.connected.get() {
            Some(true) => Ok(()),
            _ => {
                p.shared.connected.set(Some(false));
                Err(Error::Connect {
                    reason: p.transport.borrow().last_error(),
                })
            }
        }
    }

    /// Drop the connection, keeping the client reusable via
    /// [`connect`](Self::connect)
    pub fn disconnect(&self) -> Result<()> {
        let p = &self.inner;
        p.check_not_dispatching()?;
        p.transport.borrow_mut().disconnect();
        p.shared.connected.set(Some(false));
        Ok(())
    }

    /// Tear the client down for good
    ///
    /// Safe to call from inside an event callback: the teardown is then
    /// deferred until the loop hands control back to the blocking caller.
    pub fn close(&self) {
        let p = &self.inner;
        if p.closed.get() {
            return;
        }
        if p.loop_running.get() {
            p.deferred_close.set(true);
            p.shared.loop_stop.set(true);
            p.mainloop.wakeup();
        } else {
            p.teardown();
        }
    }

    // ---------------------------------------------------------------
    // queries
    // ---------------------------------------------------------------

    pub fn server_info(&self) -> Result<ServerInfo> {
        self.inner.one(
            Command::GetServerInfo,
            Error::NotFound("server".into()),
            server_record,
        )
    }

    pub fn sink_list(&self) -> Result<Vec<SinkInfo>> {
        self.inner.list(Command::GetSinkInfoList, sink_record)
    }

    pub fn sink_info(&self, index: u32) -> Result<SinkInfo> {
        self.inner
            .one(Command::GetSinkInfoByIndex(index), Error::Index(index), sink_record)
    }

    pub fn sink_by_name(&self, name: &str) -> Result<SinkInfo> {
        self.inner.one(
            Command::GetSinkInfoByName(name.to_string()),
            Error::NotFound(name.to_string()),
            sink_record,
        )
    }

    pub fn source_list(&self) -> Result<Vec<SourceInfo>> {
        self.inner.list(Command::GetSourceInfoList, source_record)
    }

    pub fn source_info(&self, index: u32) -> Result<SourceInfo> {
        self.inner.one(
            Command::GetSourceInfoByIndex(index),
            Error::Index(index),
            source_record,
        )
    }

    pub fn source_by_name(&self, name: &str) -> Result<SourceInfo> {
        self.inner.one(
            Command::GetSourceInfoByName(name.to_string()),
            Error::NotFound(name.to_string()),
            source_record,
        )
    }

    pub fn sink_input_list(&self) -> Result<Vec<SinkInputInfo>> {
        self.inner
            .list(Command::GetSinkInputInfoList, sink_input_record)
    }

    pub fn sink_input_info(&self, index: u32) -> Result<SinkInputInfo> {
        self.inner.one(
            Command::GetSinkInputInfoByIndex(index),
            Error::Index(index),
            sink_input_record,
        )
    }

    pub fn source_output_list(&self) -> Result<Vec<SourceOutputInfo>> {
        self.inner
            .list(Command::GetSourceOutputInfoList, source_output_record)
    }

    pub fn source_output_info(&self, index: u32) -> Result<SourceOutputInfo> {
        self.inner.one(
            Command::GetSourceOutputInfoByIndex(index),
            Error::Index(index),
            source_output_record,
        )
    }

    pub fn client_list(&self) -> Result<Vec<ClientInfo>> {
        self.inner.list(Command::GetClientInfoList, client_record)
    }

    pub fn client_info(&self, index: u32) -> Result<ClientInfo> {
        self.inner.one(
            Command::GetClientInfoByIndex(index),
            Error::Index(index),
            client_record,
        )
    }

    pub fn card_list(&self) -> Result<Vec<CardInfo>> {
        self.inner.list(Command::GetCardInfoList, card_record)
    }

    pub fn card_info(&self, index: u32) -> Result<CardInfo> {
        self.inner
            .one(Command::GetCardInfoByIndex(index), Error::Index(index), card_record)
    }

    pub fn card_by_name(&self, name: &str) -> Result<CardInfo> {
        self.inner.one(
            Command::GetCardInfoByName(name.to_string()),
            Error::NotFound(name.to_string()),
            card_record,
        )
    }

    pub fn module_list(&self) -> Result<Vec<ModuleInfo>> {
        self.inner.list(Command::GetModuleInfoList, module_record)
    }

    pub fn module_info(&self, index: u32) -> Result<ModuleInfo> {
        self.inner.one(
            Command::GetModuleInfoByIndex(index),
            Error::Index(index),
            module_record,
        )
    }

    /// Resolve the client owning a playback stream, `None` for
    /// client-less streams
    pub fn sink_input_client(&self, stream: &SinkInputInfo) -> Result<Option<ClientInfo>> {
        stream.client.map(|c| self.client_info(c)).transpose()
    }

    /// Resolve the client owning a record stream, `None` for client-less
    /// streams
    pub fn source_output_client(&self, stream: &SourceOutputInfo) -> Result<Option<ClientInfo>> {
        stream.client.map(|c| self.client_info(c)).transpose()
    }

    // ---------------------------------------------------------------
    // mutations
    // ---------------------------------------------------------------

    /// Apply a per-channel volume to any entity kind that carries one
    pub fn volume_set(&self, kind: EntityKind, index: u32, volume: &Volume) -> Result<()> {
        let volume = volume.to_raw();
        let command = match kind {
            EntityKind::Sink => Command::SetSinkVolumeByIndex { index, volume },
            EntityKind::Source => Command::SetSourceVolumeByIndex { index, volume },
            EntityKind::SinkInput => Command::SetSinkInputVolume { index, volume },
            EntityKind::SourceOutput => Command::SetSourceOutputVolume { index, volume },
            kind => {
                return Err(Error::NotSupported {
                    kind,
                    operation: "volume_set",
                })
            }
        };
        self.inner.act(command)
    }

    /// Mute or unmute any entity kind that carries a mute flag
    pub fn mute_set(&self, kind: EntityKind, index: u32, mute: bool) -> Result<()> {
        let command = match kind {
            EntityKind::Sink => Command::SetSinkMuteByIndex { index, mute },
            EntityKind::Source => Command::SetSourceMuteByIndex { index, mute },
            EntityKind::SinkInput => Command::SetSinkInputMute { index, mute },
            EntityKind::SourceOutput => Command::SetSourceOutputMute { index, mute },
            kind => {
                return Err(Error::NotSupported {
                    kind,
                    operation: "mute_set",
                })
            }
        };
        self.inner.act(command)
    }

    /// Select the active port of a sink or source; ports only exist on
    /// device kinds
    pub fn port_set(&self, kind: EntityKind, index: u32, port: &str) -> Result<()> {
        let port = port.to_string();
        let command = match kind {
            EntityKind::Sink => Command::SetSinkPortByIndex { index, port },
            EntityKind::Source => Command::SetSourcePortByIndex { index, port },
            kind => {
                return Err(Error::NotSupported {
                    kind,
                    operation: "port_set",
                })
            }
        };
        self.inner.act(command)
    }

    /// Suspend or resume a sink or source
    pub fn suspend(&self, kind: EntityKind, index: u32, suspend: bool) -> Result<()> {
        let command = match kind {
            EntityKind::Sink => Command::SuspendSinkByIndex { index, suspend },
            EntityKind::Source => Command::SuspendSourceByIndex { index, suspend },
            kind => {
                return Err(Error::NotSupported {
                    kind,
                    operation: "suspend",
                })
            }
        };
        self.inner.act(command)
    }

    /// Move a playback or record stream to another device
    pub fn move_stream(&self, kind: EntityKind, index: u32, device_index: u32) -> Result<()> {
        let command = match kind {
            EntityKind::SinkInput => Command::MoveSinkInputByIndex {
                index,
                sink_index: device_index,
            },
            EntityKind::SourceOutput => Command::MoveSourceOutputByIndex {
                index,
                source_index: device_index,
            },
            kind => {
                return Err(Error::NotSupported {
                    kind,
                    operation: "move_stream",
                })
            }
        };
        self.inner.act(command)
    }

    pub fn sink_volume_set(&self, index: u32, volume: &Volume) -> Result<()> {
        self.volume_set(EntityKind::Sink, index, volume)
    }

    pub fn sink_mute(&self, index: u32, mute: bool) -> Result<()> {
        self.mute_set(EntityKind::Sink, index, mute)
    }

    pub fn sink_port_set(&self, index: u32, port: &str) -> Result<()> {
        self.port_set(EntityKind::Sink, index, port)
    }

    pub fn sink_suspend(&self, index: u32, suspend: bool) -> Result<()> {
        self.suspend(EntityKind::Sink, index, suspend)
    }

    pub fn source_volume_set(&self, index: u32, volume: &Volume) -> Result<()> {
        self.volume_set(EntityKind::Source, index, volume)
    }

    pub fn source_mute(&self, index: u32, mute: bool) -> Result<()> {
        self.mute_set(EntityKind::Source, index, mute)
    }

    pub fn source_port_set(&self, index: u32, port: &str) -> Result<()> {
        self.port_set(EntityKind::Source, index, port)
    }

    pub fn source_suspend(&self, index: u32, suspend: bool) -> Result<()> {
        self.suspend(EntityKind::Source, index, suspend)
    }

    pub fn sink_input_volume_set(&self, index: u32, volume: &Volume) -> Result<()> {
        self.volume_set(EntityKind::SinkInput, index, volume)
    }

    pub fn sink_input_mute(&self, index: u32, mute: bool) -> Result<()> {
        self.mute_set(EntityKind::SinkInput, index, mute)
    }

    /// Move a playback stream to another sink
    pub fn sink_input_move(&self, index: u32, sink_index: u32) -> Result<()> {
        self.move_stream(EntityKind::SinkInput, index, sink_index)
    }

    pub fn source_output_volume_set(&self, index: u32, volume: &Volume) -> Result<()> {
        self.volume_set(EntityKind::SourceOutput, index, volume)
    }

    pub fn source_output_mute(&self, index: u32, mute: bool) -> Result<()> {
        self.mute_set(EntityKind::SourceOutput, index, mute)
    }

    /// Move a record stream to another source
    pub fn source_output_move(&self, index: u32, source_index: u32) -> Result<()> {
        self.move_stream(EntityKind::SourceOutput, index, source_index)
    }

    pub fn card_profile_set(&self, index: u32, profile: &str) -> Result<()> {
        self.inner.act(Command::SetCardProfileByIndex {
            index,
            profile: profile.to_string(),
        })
    }

    pub fn sink_default_set(&self, name: &str) -> Result<()> {
        self.inner.act(Command::SetDefaultSink(name.to_string()))
    }

    pub fn source_default_set(&self, name: &str) -> Result<()> {
        self.inner.act(Command::SetDefaultSource(name.to_string()))
    }

    /// Load a module, returning the index the server assigned
    pub fn module_load(&self, name: &str, argument: Option<&str>) -> Result<u32> {
        let records = self.inner.request(Command::LoadModule {
            name: name.to_string(),
            argument: argument.map(str::to_string),
        })?;
        records
            .into_iter()
            .find_map(|r| match r {
                Record::Index(i) => Some(i),
                _ => None,
            })
            .ok_or_else(|| Error::OperationInvalid("module load returned no index".into()))
    }

    pub fn module_unload(&self, index: u32) -> Result<()> {
        self.inner.act(Command::UnloadModule(index))
    }

    // ---------------------------------------------------------------
    // snapshot-taking volume helpers
    // ---------------------------------------------------------------

    /// Write a full per-channel volume and patch the held snapshot to
    /// match on success, so the record keeps tracking the server
    /// without a refetch
    pub fn volume_apply<E: VolumeEntity>(&self, entity: &mut E, volume: &Volume) -> Result<()> {
        self.volume_set(E::KIND, entity.index(), volume)?;
        *entity.volume_mut() = volume.clone();
        Ok(())
    }

    /// Mute or unmute, patching the held snapshot on success
    pub fn mute_apply<E: VolumeEntity>(&self, entity: &mut E, mute: bool) -> Result<()> {
        self.mute_set(E::KIND, entity.index(), mute)?;
        *entity.mute_mut() = mute;
        Ok(())
    }

    /// Flat (mean) volume of the held snapshot, as a fraction of 100%
    pub fn volume_get_all_chans<E: VolumeEntity>(&self, entity: &E) -> f64 {
        entity.volume().value_flat()
    }

    /// Set every channel of the entity to the same fraction
    pub fn volume_set_all_chans<E: VolumeEntity>(&self, entity: &mut E, value: f64) -> Result<()> {
        let mut volume = entity.volume().clone();
        volume.value_flat_set(value);
        self.volume_apply(entity, &volume)
    }

    /// Shift every channel of the entity by `delta`, clamping at silence
    pub fn volume_change_all_chans<E: VolumeEntity>(&self, entity: &mut E, delta: f64) -> Result<()> {
        let mut volume = entity.volume().clone();
        volume.change_all(delta);
        self.volume_apply(entity, &volume)
    }

    // ---------------------------------------------------------------
    // stream-restore extension
    // ---------------------------------------------------------------

    pub fn stream_restore_read(&self) -> Result<Vec<StreamRestoreInfo>> {
        self.inner
            .list(Command::ExtStreamRestoreRead, restore_record)
    }

    pub fn stream_restore_write(
        &self,
        rules: &[StreamRestoreInfo],
        apply_immediately: bool,
    ) -> Result<()> {
        self.inner.act(Command::ExtStreamRestoreWrite {
            entries: rules.iter().map(StreamRestoreInfo::to_raw).collect(),
            apply_immediately,
        })
    }

    pub fn stream_restore_delete(&self, names: &[&str]) -> Result<()> {
        self.inner.act(Command::ExtStreamRestoreDelete(
            names.iter().map(|n| n.to_string()).collect(),
        ))
    }

    // ---------------------------------------------------------------
    // change notifications
    // ---------------------------------------------------------------

    /// Select which facilities the server reports changes for
    pub fn event_mask_set(&self, masks: &[EventMask]) -> Result<()> {
        let mask = masks.iter().fold(0, |acc, m| acc | m.bit());
        self.inner.act(Command::Subscribe(mask))
    }

    /// Install or clear the event callback. May be called from within the
    /// callback itself to swap handlers. Fails while an [`EventIterator`]
    /// owns the delivery slot.
    pub fn event_callback_set(&self, cb: Option<EventCallback>) -> Result<()> {
        if self.inner.shared.iterator_active.get() {
            return Err(Error::CallbackConflict);
        }
        self.inner.shared.set_event_cb(cb);
        Ok(())
    }

    /// Pull change notifications as a blocking iterator
    ///
    /// The iterator installs an internal queueing callback; `next` drains
    /// the queue and otherwise pumps the loop for up to `timeout` before
    /// yielding `None`. Dropping the iterator releases the callback slot.
    /// Fails with [`Error::CallbackConflict`] while a user callback is
    /// installed.
    pub fn events(&self, timeout: Option<Duration>) -> Result<EventIterator> {
        let p = &self.inner;
        p.check_open()?;
        p.check_not_dispatching()?;
        if p.shared.event_cb.borrow().is_some() {
            return Err(Error::CallbackConflict);
        }
        let queue: Rc<RefCell<VecDeque<Event>>> = Rc::new(RefCell::new(VecDeque::new()));
        let q = Rc::clone(&queue);
        p.shared.set_event_cb(Some(Box::new(move |ev| {
            q.borrow_mut().push_back(*ev);
            EventAction::Continue
        })));
        p.shared.iterator_active.set(true);
        p.shared.loop_stop.set(false);
        Ok(EventIterator {
            pulse: self.clone(),
            queue,
            timeout,
        })
    }

    /// Block dispatching change notifications to the callback
    ///
    /// Returns when the callback asks to stop,
    /// [`event_listen_stop`](Self::event_listen_stop) is called, or
    /// `timeout` expires.
    /// With `raise_on_disconnect` a lost connection surfaces as
    /// [`Error::Disconnected`]; otherwise it just ends the listen.
    pub fn event_listen(&self, timeout: Option<Duration>, raise_on_disconnect: bool) -> Result<()> {
        let p = &self.inner;
        p.check_open()?;
        p.check_not_dispatching()?;
        if p.shared.event_cb.borrow().is_none() {
            return Err(Error::OperationInvalid("no event callback set".into()));
        }
        if p.shared.connected.get() != Some(true) {
            return Err(Error::Disconnected);
        }
        p.shared.loop_stop.set(false);
        let deadline = timeout.map(|t| Instant::now() + t);
        p.drive(|| p.shared.connected.get() == Some(false), deadline)?;
        if raise_on_disconnect && p.shared.connected.get() == Some(false) {
            return Err(Error::Disconnected);
        }
        Ok(())
    }

    /// End a running [`event_listen`](Self::event_listen); callable from
    /// the event callback or any other code holding a handle
    pub fn event_listen_stop(&self) {
        self.inner.shared.loop_stop.set(true);
        self.inner.mainloop.wakeup();
    }
}

impl PulseInner {
    fn check_open(&self) -> Result<()> {
        if self.closed.get() {
            return Err(Error::Closed);
        }
        Ok(())
    }

    fn check_not_dispatching(&self) -> Result<()> {
        if self.loop_running.get() {
            return Err(Error::LoopReentrancy);
        }
        Ok(())
    }

    /// Pump the loop until `done` reports true, a stop is requested or the
    /// deadline passes. The reentrancy flag is held for the whole drive.
    fn drive(&self, mut done: impl FnMut() -> bool, deadline: Option<Instant>) -> Result<()> {
        self.loop_running.set(true);
        let mut first = true;
        let result = (|| loop {
            if done() {
                return Ok(());
            }
            // A stop request is one-shot: consumed by the drive it ends.
            if self.shared.loop_stop.take() {
                return Ok(());
            }
            let timeout = match deadline {
                Some(d) => {
                    let now = Instant::now();
                    // An already expired deadline still gets one
                    // non-blocking pass.
                    if now >= d && !first {
                        return Ok(());
                    }
                    Some(d.saturating_duration_since(now))
                }
                None => None,
            };
            first = false;
            match self.mainloop.prepare(timeout)? {
                Step::Quit(_) => return Ok(()),
                Step::Continue => {}
            }
            self.mainloop.poll()?;
            self.mainloop.dispatch()?;
        })();
        self.loop_running.set(false);
        if self.deferred_close.get() {
            self.deferred_close.set(false);
            self.teardown();
        }
        result
    }

    /// Submit a command and block until its completion token finishes
    fn request(&self, command: Command) -> Result<Vec<Record>> {
        self.check_open()?;
        self.check_not_dispatching()?;
        if self.shared.connected.get() != Some(true) {
            return Err(Error::Disconnected);
        }
        // A stop requested outside any listen must not bleed into this
        // call's pump.
        self.shared.loop_stop.set(false);
        let op = command.name();
        let token = self.shared.ops.begin();
        trace!(op, token, "submitting");

        let records = Rc::new(RefCell::new(Vec::new()));
        let sink = Rc::clone(&records);
        let tracker = Rc::clone(&self.shared);
        let handler: ReplyHandler = Box::new(move |reply| match reply {
            Reply::Record(r) => sink.borrow_mut().push(r),
            Reply::Done { success } => tracker.ops.complete(token, success),
        });
        if let Err(err) = self.transport.borrow_mut().submit(command, handler) {
            self.shared.ops.abandon(token);
            return Err(Error::OperationInvalid(err.to_string()));
        }

        let mut outcome = None;
        self.drive(
            || {
                outcome = self.shared.ops.take_finished(token);
                outcome.is_some()
            },
            None,
        )?;
        let outcome = match outcome.or_else(|| self.shared.ops.take_finished(token)) {
            Some(o) => o,
            None => {
                // Drive ended without a completion (stop or deferred close).
                self.shared.ops.abandon(token);
                return Err(Error::Disconnected);
            }
        };
        match outcome {
            Outcome::Success => Ok(std::mem::take(&mut *records.borrow_mut())),
            Outcome::Failure => Err(Error::OperationFailed { op, token }),
            Outcome::Disconnected => Err(Error::Disconnected),
        }
    }

    fn act(&self, command: Command) -> Result<()> {
        self.request(command).map(|_| ())
    }

    fn list<T>(&self, command: Command, extract: fn(Record) -> Option<T>) -> Result<Vec<T>> {
        Ok(self
            .request(command)?
            .into_iter()
            .filter_map(extract)
            .collect())
    }

    fn one<T>(
        &self,
        command: Command,
        missing: Error,
        extract: fn(Record) -> Option<T>,
    ) -> Result<T> {
        self.list(command, extract)?
            .into_iter()
            .next()
            .ok_or(missing)
    }

    fn teardown(&self) {
        debug!(client = %self.client_name, "closing");
        self.closed.set(true);
        self.transport.borrow_mut().disconnect();
        self.shared.connected.set(Some(false));
        self.shared.ops.disconnect_all();
    }
}

impl Drop for PulseInner {
    fn drop(&mut self) {
        if !self.closed.get() {
            self.teardown();
        }
    }
}

/// Blocking iterator over change notifications
///
/// Produced by [`Pulse::events`]. Each `next` yields a queued event
/// immediately, or pumps the loop for up to the configured timeout and
/// then reports `None`. A lost connection or a stop request also ends
/// the iteration.
pub struct EventIterator {
    pulse: Pulse,
    queue: Rc<RefCell<VecDeque<Event>>>,
    timeout: Option<Duration>,
}

impl Iterator for EventIterator {
    type Item = Event;

    fn next(&mut self) -> Option<Event> {
        if let Some(ev) = self.queue.borrow_mut().pop_front() {
            return Some(ev);
        }
        let p = &self.pulse.inner;
        if p.closed.get() || p.loop_running.get() || p.shared.connected.get() != Some(true) {
            return None;
        }
        if p.shared.loop_stop.take() {
            return None;
        }
        let deadline = self.timeout.map(|t| Instant::now() + t);
        let q = Rc::clone(&self.queue);
        if p.drive(move || !q.borrow().is_empty(), deadline).is_err() {
            return None;
        }
        self.queue.borrow_mut().pop_front()
    }
}

impl Drop for EventIterator {
    fn drop(&mut self) {
        let p = &self.pulse.inner;
        p.shared.iterator_active.set(false);
        p.shared.set_event_cb(None);
    }
}
