// crates/cmrm-rs/src/cla/mod.rs

//! Client abstraction engine.
//!
//! Front-end of the daemon: tracks connected clients and their
//! acquire/release votes, converts client intent into a single control
//! request stream, and multiplexes the modem state back to clients with
//! ordering and filtering guarantees. The engine owns no sockets; the
//! owning event loop feeds decoded messages in and performs the returned
//! [`ClaAction`]s.

mod machine;

use crate::dbg::DbgInfo;
use crate::fsm::Fsm;
use crate::hal::{ModemControl, WakeLock};
use crate::types::{
    ClientEvent, ClientId, EventSet, ModemState, RestartKind, WakeModule, BOOT_WINDOW_MS,
    MAX_CLIENTS,
};
use crate::wire::WireMsg;
use crate::CmrmError;
use alloc::boxed::Box;
use alloc::collections::BTreeMap;
use alloc::string::String;
use alloc::vec::Vec;
use log::{debug, error, warn};

pub use machine::{ClaEvent, ClaState};

use machine::{map_modem_state, ClaCtx};

/// Per-connection client record.
#[derive(Debug, Default)]
pub struct ClientRecord {
    pub registered: bool,
    pub name: String,
    pub events: EventSet,
    pub acquired: bool,
    pub waiting_cold_reset_ack: bool,
    pub waiting_shutdown_ack: bool,
}

/// Socket-side work requested by the engine.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ClaAction {
    /// Write this serialized frame to the client connection.
    Send { client: ClientId, frame: Vec<u8> },
    /// Close the client connection.
    Disconnect(ClientId),
}

/// A notification from the control engine, delivered over the CLA mailbox.
#[derive(Debug, Clone, PartialEq)]
pub enum CtrlNotice {
    /// The request driven by control completed.
    OperationResult(bool),
    /// Pass-through event, already serialized by the sender.
    NotifyClient { event: ClientEvent, frame: Vec<u8> },
    /// New modem state.
    ModemState(ModemState),
}

#[derive(Debug, Clone, Copy)]
pub struct ClaConfig {
    /// Accept `REGISTER_DBG` instead of `REGISTER` (sanity test mode).
    pub sanity_mode: bool,
    /// When false, the modem is treated as pre-acquired by one implicit
    /// holder and never shuts down on release.
    pub enable_fmmo: bool,
}

pub struct ClientAbstraction {
    machine: Fsm<ClaCtx, ClaState, ClaEvent, ()>,
    ctx: ClaCtx,
    next_id: u32,
}

impl ClientAbstraction {
    pub fn new(
        control: Box<dyn ModemControl + Send>,
        wakelock: Box<dyn WakeLock + Send>,
        config: ClaConfig,
        now_ms: u64,
    ) -> Self {
        let mut ctx = ClaCtx {
            control,
            wakelock,
            sanity_mode: config.sanity_mode,
            clients: BTreeMap::new(),
            num_acquired: 0,
            num_waiting_cold_ack: 0,
            num_waiting_shutdown_ack: 0,
            modem_state: ModemState::Unknown,
            real_modem_state: ModemState::Unknown,
            fake_modem_state: false,
            request_in_progress: false,
            reject_requests: false,
            restart_kind: None,
            dbg_info: None,
            actions: Vec::new(),
            ack_deadline: None,
            boot_deadline: Some(now_ms + BOOT_WINDOW_MS),
            now_ms,
        };

        if config.sanity_mode {
            debug!("client abstraction running in sanity test mode");
        }
        if !config.enable_fmmo {
            // Full modem management is off: one implicit holder keeps the
            // modem powered for the daemon's whole life.
            ctx.num_acquired = 1;
        }

        // Held while the boot window runs so clients can connect before
        // the platform is allowed to sleep.
        ctx.wakelock.acquire(WakeModule::Cla);

        Self { machine: machine::build(), ctx, next_id: 0 }
    }

    pub fn state(&self) -> ClaState {
        self.machine.state()
    }

    /// Registers a new connection. The record stays anonymous until the
    /// client sends its registration.
    pub fn client_connected(&mut self, now_ms: u64) -> Result<ClientId, CmrmError> {
        self.ctx.now_ms = now_ms;
        if self.ctx.clients.len() == MAX_CLIENTS {
            return Err(CmrmError::TooManyClients);
        }
        let id = ClientId(self.next_id);
        self.next_id += 1;
        self.ctx.clients.insert(id, ClientRecord::default());
        debug!("new client connection {}", id);
        Ok(id)
    }

    /// Feeds one decoded client message.
    pub fn client_message(&mut self, id: ClientId, msg: WireMsg, now_ms: u64) -> Vec<ClaAction> {
        self.dispatch(now_ms, |cla| cla.handle_msg(id, msg))
    }

    /// Handles a client disconnection (hangup, I/O error, read deadline).
    pub fn client_closed(&mut self, id: ClientId, now_ms: u64) -> Vec<ClaAction> {
        self.dispatch(now_ms, |cla| {
            if cla.ctx.clients.get(&id).is_some_and(|r| !r.registered) {
                debug!("unregistered client {} disconnected", id);
            }
            cla.unregister(id);
        })
    }

    /// Feeds a notification from the control engine.
    pub fn control_notice(&mut self, notice: CtrlNotice, now_ms: u64) -> Vec<ClaAction> {
        self.dispatch(now_ms, |cla| cla.handle_notice(notice))
    }

    /// Fires expired timers.
    pub fn tick(&mut self, now_ms: u64) -> Vec<ClaAction> {
        self.ctx.now_ms = now_ms;

        if self.ctx.boot_deadline.is_some_and(|deadline| now_ms >= deadline) {
            self.ctx.boot_deadline = None;
        }

        if self.ctx.waiting_acks() && self.ctx.ack_deadline.is_some_and(|d| now_ms >= d) {
            self.ctx.ack_deadline = None;
            machine::expire_acks(&mut self.ctx);
            self.machine.notify(&mut self.ctx, ClaEvent::CliAcked, None);
        }

        self.update_wakelock();
        core::mem::take(&mut self.ctx.actions)
    }

    /// Absolute time of the next timer event, if any.
    pub fn next_deadline(&self) -> Option<u64> {
        let ack = if self.ctx.waiting_acks() { self.ctx.ack_deadline } else { None };
        match (ack, self.ctx.boot_deadline) {
            (Some(a), Some(b)) => Some(a.min(b)),
            (a, b) => a.or(b),
        }
    }

    /// Verifies the counter invariants. Exposed for tests.
    pub fn check_counters(&self) {
        let acquired = self.ctx.clients.values().filter(|r| r.acquired).count();
        let cold = self.ctx.clients.values().filter(|r| r.waiting_cold_reset_ack).count();
        let shutdown = self.ctx.clients.values().filter(|r| r.waiting_shutdown_ack).count();
        // The implicit holder is not backed by a client record.
        assert!(self.ctx.num_acquired == acquired || self.ctx.num_acquired == acquired + 1);
        assert_eq!(self.ctx.num_waiting_cold_ack, cold);
        assert_eq!(self.ctx.num_waiting_shutdown_ack, shutdown);
        assert!(cold == 0 || shutdown == 0);
    }

    /// Runs one input inside the acquire/ack bookkeeping wrapper: counter
    /// changes observed across the handler are converted into the FSM
    /// events they imply.
    fn dispatch(&mut self, now_ms: u64, handle: impl FnOnce(&mut Self)) -> Vec<ClaAction> {
        self.ctx.now_ms = now_ms;
        let was_acquired = self.ctx.num_acquired != 0;
        let was_waiting = self.ctx.waiting_acks();

        handle(self);

        self.sync_machine(was_acquired, was_waiting);
        self.update_wakelock();
        core::mem::take(&mut self.ctx.actions)
    }

    /// A client disconnection may complete an outstanding ack round and
    /// drop the last holder at once; exactly one event must fire, and a
    /// completed ack round wins over the release.
    fn sync_machine(&mut self, was_acquired: bool, was_waiting: bool) {
        let mut event = None;

        if was_waiting && !self.ctx.waiting_acks() {
            event = Some(ClaEvent::CliAcked);
        }

        if was_acquired && self.ctx.num_acquired == 0 {
            if event == Some(ClaEvent::CliAcked) {
                // The acked handler must take the shutdown path, not retry
                // a pending restart.
                self.ctx.restart_kind = None;
            } else {
                event = Some(ClaEvent::CliRelease);
            }
        } else if !was_acquired && self.ctx.num_acquired != 0 {
            debug_assert!(event.is_none());
            event = Some(ClaEvent::CliAcquire);
        }

        if let Some(event) = event {
            self.machine.notify(&mut self.ctx, event, None);
        }
    }

    fn update_wakelock(&mut self) {
        let needed = self.ctx.boot_deadline.is_some() || self.ctx.waiting_acks();
        let held = self.ctx.wakelock.is_held_by(WakeModule::Cla);
        if needed && !held {
            self.ctx.wakelock.acquire(WakeModule::Cla);
        } else if !needed && held {
            self.ctx.wakelock.release(WakeModule::Cla);
        }
    }

    /// Removes a client, dropping its votes and outstanding acks.
    fn unregister(&mut self, id: ClientId) {
        let Some(record) = self.ctx.clients.remove(&id) else {
            return;
        };
        if record.registered {
            debug!("[{:<16}]{} client unregistered", record.name, id);
            if record.acquired {
                self.ctx.num_acquired -= 1;
            }
            if record.waiting_cold_reset_ack {
                self.ctx.num_waiting_cold_ack -= 1;
            }
            if record.waiting_shutdown_ack {
                self.ctx.num_waiting_shutdown_ack -= 1;
            }
        }
        self.ctx.actions.push(ClaAction::Disconnect(id));
    }

    fn handle_msg(&mut self, id: ClientId, msg: WireMsg) {
        if !self.ctx.clients.contains_key(&id) {
            // The client was disconnected while this message was queued.
            debug!("{} <= {}() ignored, client already disconnected", id, msg.name());
            return;
        }

        let is_register = matches!(msg, WireMsg::Register { .. } | WireMsg::RegisterDbg { .. });

        // Refuse the registration flavor that does not match the mode.
        let wrong_flavor = match &msg {
            WireMsg::Register { .. } => self.ctx.sanity_mode,
            WireMsg::RegisterDbg { .. } => !self.ctx.sanity_mode,
            _ => false,
        };
        if wrong_flavor {
            error!("{} wrong registration kind, disconnecting the client", id);
            self.unregister(id);
            return;
        }

        if !is_register && !self.ctx.clients[&id].registered {
            error!("{} message from an unregistered client, disconnecting it", id);
            self.unregister(id);
            return;
        }

        match msg {
            WireMsg::Register { name, events } | WireMsg::RegisterDbg { name, events } => {
                if self.ctx.clients[&id].registered {
                    error!("{} duplicate REGISTER message, disconnecting the client", id);
                    self.unregister(id);
                    return;
                }
                {
                    let record = self.ctx.clients.get_mut(&id).unwrap();
                    record.registered = true;
                    record.name = name;
                    record.events = events;
                    debug!("[{:<16}]{} <= REGISTER(0x{:08x})", record.name, id, events.0);
                }

                // Give the newcomer its current-state snapshot.
                if self.ctx.modem_state != ModemState::Unknown {
                    let event = map_modem_state(self.ctx.modem_state);
                    let frame = WireMsg::Event(event).encode().unwrap();
                    self.ctx.notify_single(id, event, &frame);
                }
            }

            WireMsg::Acquire => {
                if !self.ctx.reject_requests {
                    let record = self.ctx.clients.get_mut(&id).unwrap();
                    if record.acquired {
                        warn!("[{:<16}]{} client has already acquired the modem", record.name, id);
                    } else {
                        record.acquired = true;
                        self.ctx.num_acquired += 1;
                    }
                }
            }

            WireMsg::Release => {
                if !self.ctx.reject_requests {
                    let record = self.ctx.clients.get_mut(&id).unwrap();
                    if !record.acquired {
                        warn!(
                            "[{:<16}]{} client did not previously acquire the modem",
                            record.name, id
                        );
                    } else {
                        record.acquired = false;
                        self.ctx.num_acquired -= 1;
                    }
                }
            }

            WireMsg::Restart { cause, debug } => {
                let ignored = if self.ctx.restart_kind.is_some() {
                    Some("other client reset pending")
                } else if self.ctx.real_modem_state != ModemState::Ready {
                    Some("modem off or being restarted")
                } else if self.ctx.reject_requests {
                    Some("modem in a final state")
                } else {
                    None
                };
                if let Some(reason) = ignored {
                    debug!("{} <= RESTART({:?}) ignored: {}", id, cause, reason);
                    return;
                }

                self.ctx.restart_kind = Some(RestartKind::from(cause));
                self.ctx.dbg_info = debug.map(|mut dbg| {
                    dbg.truncate();
                    dbg
                });
                self.machine.notify(&mut self.ctx, ClaEvent::CliRestart, None);
            }

            WireMsg::Shutdown => {
                self.ctx.reject_requests = true;
                for record in self.ctx.clients.values_mut() {
                    record.acquired = false;
                }
                self.ctx.num_acquired = 0;
            }

            WireMsg::NvmBackup => {
                self.ctx.restart_kind = Some(RestartKind::BackupNvm);
                self.machine.notify(&mut self.ctx, ClaEvent::CliRestart, None);
            }

            WireMsg::AckColdReset => {
                let record = self.ctx.clients.get_mut(&id).unwrap();
                if !record.waiting_cold_reset_ack {
                    warn!("[{:<16}]{} not waiting for client cold reset ack", record.name, id);
                } else {
                    record.waiting_cold_reset_ack = false;
                    self.ctx.num_waiting_cold_ack -= 1;
                }
            }

            WireMsg::AckShutdown => {
                let record = self.ctx.clients.get_mut(&id).unwrap();
                if !record.waiting_shutdown_ack {
                    warn!("[{:<16}]{} not waiting for client shutdown ack", record.name, id);
                } else {
                    record.waiting_shutdown_ack = false;
                    self.ctx.num_waiting_shutdown_ack -= 1;
                }
            }

            WireMsg::NotifyDbg(dbg) => {
                self.ctx.notify_all(&WireMsg::DbgEvent(dbg));
            }

            WireMsg::Event(_) | WireMsg::DbgEvent(_) => {
                error!("{} event message received from a client, disconnecting it", id);
                self.unregister(id);
            }
        }
    }

    fn handle_notice(&mut self, notice: CtrlNotice) {
        match notice {
            CtrlNotice::OperationResult(success) => {
                debug!("->operation_result({})", if success { "success" } else { "failure" });
                self.ctx.request_in_progress = false;
                let event = if success { ClaEvent::Success } else { ClaEvent::Failure };
                self.machine.notify(&mut self.ctx, event, None);
            }

            CtrlNotice::NotifyClient { event, frame } => {
                // Pass-through: does not touch the state machine.
                debug!("->notify_client({})", event.name());
                self.ctx.notify_all_serialized(event, &frame);
            }

            CtrlNotice::ModemState(state) => self.handle_modem_state(state),
        }
    }

    fn handle_modem_state(&mut self, state: ModemState) {
        // A platform reboot is handled as unresponsive, except that the
        // out-of-service event is suppressed: the platform is going down
        // anyway.
        let (state, send_cli_msg) = if state == ModemState::PlatformReboot {
            (ModemState::Unresponsive, false)
        } else {
            (state, true)
        };

        self.ctx.real_modem_state = state;

        if state == ModemState::Ready || state == ModemState::Off {
            self.ctx.restart_kind = None;
        } else if state == ModemState::Unresponsive {
            self.ctx.reject_requests = true;
        }

        if self.ctx.fake_modem_state {
            debug!(
                "->modem_state({}) [faking {}]",
                state, self.ctx.modem_state
            );
        } else {
            debug!("->modem_state({})", state);
        }

        // Out of service is terminal: control must not report anything on
        // top of it.
        assert!(self.ctx.modem_state != ModemState::Unresponsive);

        let mut filter_state = self.ctx.fake_modem_state;
        if self.ctx.fake_modem_state {
            if state == ModemState::Unresponsive {
                self.ctx.fake_modem_state = false;
                filter_state = false;
            } else if self.ctx.modem_state == state {
                // The real state caught up with the presented one: the
                // faking window closes.
                self.ctx.fake_modem_state = false;
            }
        }

        if !filter_state && self.ctx.modem_state != state {
            let event = map_modem_state(state);
            if send_cli_msg
                && (self.ctx.modem_state == ModemState::Unknown
                    || event != map_modem_state(self.ctx.modem_state))
            {
                // Only tell clients when the externally visible event
                // actually changes (or was never published).
                self.ctx.notify_all(&WireMsg::Event(event));
            }

            self.ctx.modem_state = state;

            let fsm_event = match state {
                ModemState::Off => ClaEvent::MdmOff,
                ModemState::Unresponsive => ClaEvent::MdmUnresp,
                ModemState::Busy => ClaEvent::MdmBusy,
                ModemState::Ready => ClaEvent::MdmReady,
                ModemState::Unknown | ModemState::PlatformReboot => unreachable!(),
            };
            self.machine.notify(&mut self.ctx, fsm_event, None);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dbg::DbgKind;
    use alloc::format;
    use alloc::rc::Rc;
    use alloc::vec;
    use core::cell::RefCell;

    #[derive(Clone, Default)]
    struct Calls(Rc<RefCell<Vec<String>>>);

    unsafe impl Send for Calls {}

    impl Calls {
        fn take(&self) -> Vec<String> {
            core::mem::take(&mut *self.0.borrow_mut())
        }
    }

    struct FakeControl(Calls);

    impl ModemControl for FakeControl {
        fn start(&mut self) {
            self.0 .0.borrow_mut().push(String::from("start"));
        }
        fn stop(&mut self) {
            self.0 .0.borrow_mut().push(String::from("stop"));
        }
        fn restart(&mut self, kind: RestartKind, debug: Option<DbgInfo>) {
            self.0
                 .0
                .borrow_mut()
                .push(format!("restart({:?},{})", kind, debug.is_some()));
        }
    }

    #[derive(Clone, Default)]
    struct FakeWakeLock(Rc<RefCell<[i32; WakeModule::COUNT]>>);

    unsafe impl Send for FakeWakeLock {}

    impl WakeLock for FakeWakeLock {
        fn acquire(&self, module: WakeModule) {
            self.0.borrow_mut()[module as usize] += 1;
        }
        fn release(&self, module: WakeModule) {
            let mut counts = self.0.borrow_mut();
            if counts[module as usize] > 0 {
                counts[module as usize] -= 1;
            }
        }
        fn is_held_by(&self, module: WakeModule) -> bool {
            self.0.borrow()[module as usize] > 0
        }
        fn is_held(&self) -> bool {
            self.0.borrow().iter().any(|c| *c > 0)
        }
    }

    struct Fixture {
        cla: ClientAbstraction,
        calls: Calls,
        wakelock: FakeWakeLock,
    }

    fn fixture_with(config: ClaConfig) -> Fixture {
        let calls = Calls::default();
        let wakelock = FakeWakeLock::default();
        let cla = ClientAbstraction::new(
            Box::new(FakeControl(calls.clone())),
            Box::new(wakelock.clone()),
            config,
            0,
        );
        Fixture { cla, calls, wakelock }
    }

    fn fixture() -> Fixture {
        fixture_with(ClaConfig { sanity_mode: false, enable_fmmo: true })
    }

    fn register(f: &mut Fixture, name: &str, events: &[ClientEvent], now: u64) -> ClientId {
        let id = f.cla.client_connected(now).unwrap();
        f.cla.client_message(
            id,
            WireMsg::Register { name: String::from(name), events: EventSet::of(events) },
            now,
        );
        id
    }

    fn sent_events(actions: &[ClaAction], client: ClientId) -> Vec<WireMsg> {
        actions
            .iter()
            .filter_map(|action| match action {
                ClaAction::Send { client: c, frame } if *c == client => {
                    Some(crate::wire::decode_frame(frame).unwrap())
                }
                _ => None,
            })
            .collect()
    }

    /// Walks the engine from `Off` to `Up` with one holder, mirroring the
    /// notifications control emits during a boot.
    fn bring_up(f: &mut Fixture, id: ClientId, now: u64) {
        let actions = f.cla.client_message(id, WireMsg::Acquire, now);
        assert!(actions.is_empty());
        assert_eq!(f.cla.state(), ClaState::Starting);
        assert_eq!(f.calls.take(), vec![String::from("start")]);

        f.cla.control_notice(CtrlNotice::OperationResult(true), now + 1);
        f.cla.control_notice(CtrlNotice::ModemState(ModemState::Ready), now + 2);
        assert_eq!(f.cla.state(), ClaState::Up);
        f.cla.check_counters();
    }

    #[test]
    fn initial_off_report_moves_to_off_and_snapshots_registrations() {
        let mut f = fixture();
        let c1 = register(&mut f, "c1", &[ClientEvent::MdmDown, ClientEvent::MdmUp], 0);
        // No state known yet: registration gets no snapshot.
        assert_eq!(f.cla.state(), ClaState::Initial);

        let actions = f.cla.control_notice(CtrlNotice::ModemState(ModemState::Off), 1);
        assert_eq!(f.cla.state(), ClaState::Off);
        assert_eq!(sent_events(&actions, c1), vec![WireMsg::Event(ClientEvent::MdmDown)]);

        // A late client gets its snapshot with the registration.
        let c2 = f.cla.client_connected(2).unwrap();
        let actions = f.cla.client_message(
            c2,
            WireMsg::Register {
                name: String::from("c2"),
                events: EventSet::of(&[ClientEvent::MdmDown]),
            },
            2,
        );
        assert_eq!(sent_events(&actions, c2), vec![WireMsg::Event(ClientEvent::MdmDown)]);
    }

    #[test]
    fn acquire_starts_the_modem_and_up_is_published() {
        let mut f = fixture();
        let c1 = register(&mut f, "c1", &[ClientEvent::MdmDown, ClientEvent::MdmUp], 0);
        f.cla.control_notice(CtrlNotice::ModemState(ModemState::Off), 1);

        f.cla.client_message(c1, WireMsg::Acquire, 2);
        assert_eq!(f.cla.state(), ClaState::Starting);
        assert_eq!(f.calls.take(), vec![String::from("start")]);

        f.cla.control_notice(CtrlNotice::OperationResult(true), 3);
        let actions = f.cla.control_notice(CtrlNotice::ModemState(ModemState::Ready), 4);
        assert_eq!(f.cla.state(), ClaState::Up);
        assert_eq!(sent_events(&actions, c1), vec![WireMsg::Event(ClientEvent::MdmUp)]);
        f.cla.check_counters();
    }

    #[test]
    fn state_event_is_sent_only_when_the_mapped_event_changes() {
        let mut f = fixture();
        let c1 = register(&mut f, "c1", &[ClientEvent::MdmDown, ClientEvent::MdmUp], 0);
        let actions = f.cla.control_notice(CtrlNotice::ModemState(ModemState::Off), 1);
        assert_eq!(sent_events(&actions, c1).len(), 1);

        f.cla.client_message(c1, WireMsg::Acquire, 2);
        // Busy maps to MDM_DOWN as well: no new client event.
        let actions = f.cla.control_notice(CtrlNotice::ModemState(ModemState::Busy), 3);
        assert_eq!(sent_events(&actions, c1), vec![]);
    }

    #[test]
    fn release_shuts_down_with_down_before_shutdown_order() {
        let mut f = fixture();
        let c1 = register(
            &mut f,
            "c1",
            &[ClientEvent::MdmDown, ClientEvent::MdmUp, ClientEvent::MdmShutdown],
            0,
        );
        f.cla.control_notice(CtrlNotice::ModemState(ModemState::Off), 1);
        bring_up(&mut f, c1, 2);

        let actions = f.cla.client_message(c1, WireMsg::Release, 10);
        // Shutdown is acked by c1, so CLA waits.
        assert_eq!(f.cla.state(), ClaState::AckWaitingShutdown);
        let events = sent_events(&actions, c1);
        assert_eq!(
            events,
            vec![
                WireMsg::Event(ClientEvent::MdmDown),
                WireMsg::Event(ClientEvent::MdmShutdown)
            ]
        );
        f.cla.check_counters();

        let _ = f.cla.client_message(c1, WireMsg::AckShutdown, 11);
        assert_eq!(f.cla.state(), ClaState::Stopping);
        assert_eq!(f.calls.take(), vec![String::from("stop")]);

        f.cla.control_notice(CtrlNotice::OperationResult(true), 12);
        assert_eq!(f.cla.state(), ClaState::Off);
        f.cla.control_notice(CtrlNotice::ModemState(ModemState::Off), 13);
        assert_eq!(f.cla.state(), ClaState::Off);
        f.cla.check_counters();
    }

    #[test]
    fn restart_collects_cold_reset_acks_then_restarts() {
        let mut f = fixture();
        let c1 = register(
            &mut f,
            "c1",
            &[ClientEvent::MdmDown, ClientEvent::MdmUp, ClientEvent::MdmColdReset],
            0,
        );
        f.cla.control_notice(CtrlNotice::ModemState(ModemState::Off), 1);
        bring_up(&mut f, c1, 2);

        let actions = f.cla.client_message(
            c1,
            WireMsg::Restart { cause: crate::types::RestartCause::MdmErr, debug: None },
            10,
        );
        assert_eq!(f.cla.state(), ClaState::AckWaitingCold);
        let events = sent_events(&actions, c1);
        assert_eq!(
            events,
            vec![
                WireMsg::Event(ClientEvent::MdmDown),
                WireMsg::Event(ClientEvent::MdmColdReset)
            ]
        );
        f.cla.check_counters();

        let _ = f.cla.client_message(c1, WireMsg::AckColdReset, 11);
        assert_eq!(f.cla.state(), ClaState::Starting);
        assert_eq!(f.calls.take(), vec![String::from("restart(Restart,false)")]);
        f.cla.check_counters();
    }

    #[test]
    fn ack_timeout_promotes_outstanding_acks() {
        let mut f = fixture();
        let c1 = register(&mut f, "c1", &[ClientEvent::MdmColdReset], 0);
        f.cla.control_notice(CtrlNotice::ModemState(ModemState::Off), 1);
        bring_up(&mut f, c1, 2);

        f.cla.client_message(
            c1,
            WireMsg::Restart { cause: crate::types::RestartCause::MdmErr, debug: None },
            10,
        );
        assert_eq!(f.cla.state(), ClaState::AckWaitingCold);
        let deadline = f.cla.next_deadline().unwrap();
        assert_eq!(deadline, 10 + crate::types::ACK_TIMEOUT_MS);

        // No ack: the deadline fires and the restart proceeds anyway.
        f.cla.tick(deadline);
        assert_eq!(f.cla.state(), ClaState::Starting);
        assert_eq!(f.calls.take(), vec![String::from("restart(Restart,false)")]);
        f.cla.check_counters();
    }

    #[test]
    fn disconnect_collapses_last_ack_and_last_holder_into_one_event() {
        let mut f = fixture();
        let mask = [ClientEvent::MdmDown, ClientEvent::MdmColdReset];
        let c1 = register(&mut f, "c1", &mask, 0);
        let c2 = register(&mut f, "c2", &mask, 0);
        f.cla.control_notice(CtrlNotice::ModemState(ModemState::Off), 1);
        bring_up(&mut f, c1, 2);
        f.cla.client_message(c2, WireMsg::Acquire, 3);

        f.cla.client_message(
            c1,
            WireMsg::Restart { cause: crate::types::RestartCause::MdmErr, debug: None },
            10,
        );
        assert_eq!(f.cla.state(), ClaState::AckWaitingCold);
        f.calls.take();

        // First client leaves: one ack outstanding, one holder left.
        f.cla.client_closed(c1, 11);
        assert_eq!(f.cla.state(), ClaState::AckWaitingCold);
        f.cla.check_counters();

        // Second client leaves: last ack and last holder vanish together.
        // Exactly one acked event fires and it takes the shutdown path.
        f.cla.client_closed(c2, 12);
        assert_eq!(f.cla.state(), ClaState::Stopping);
        assert_eq!(f.calls.take(), vec![String::from("stop")]);
        f.cla.check_counters();
    }

    #[test]
    fn modem_busy_in_up_runs_the_restart_procedure() {
        let mut f = fixture();
        let c1 = register(
            &mut f,
            "c1",
            &[ClientEvent::MdmDown, ClientEvent::MdmUp, ClientEvent::MdmColdReset],
            0,
        );
        f.cla.control_notice(CtrlNotice::ModemState(ModemState::Off), 1);
        bring_up(&mut f, c1, 2);

        let actions = f.cla.control_notice(CtrlNotice::ModemState(ModemState::Busy), 10);
        assert_eq!(f.cla.state(), ClaState::AckWaitingCold);
        let events = sent_events(&actions, c1);
        assert_eq!(
            events,
            vec![
                WireMsg::Event(ClientEvent::MdmDown),
                WireMsg::Event(ClientEvent::MdmColdReset)
            ]
        );

        let _ = f.cla.client_message(c1, WireMsg::AckColdReset, 11);
        assert_eq!(f.cla.state(), ClaState::Starting);
        assert_eq!(f.calls.take(), vec![String::from("restart(Restart,false)")]);
    }

    #[test]
    fn oos_is_terminal_and_suppressed_for_platform_reboot() {
        let mut f = fixture();
        let c1 = register(&mut f, "c1", &[ClientEvent::MdmDown, ClientEvent::MdmOos], 0);
        f.cla.control_notice(CtrlNotice::ModemState(ModemState::Off), 1);
        bring_up(&mut f, c1, 2);

        f.cla.control_notice(CtrlNotice::ModemState(ModemState::Busy), 10);
        f.cla.client_message(c1, WireMsg::AckColdReset, 11);
        f.calls.take();

        // Recovery fails: control reports the modem unresponsive.
        let actions =
            f.cla.control_notice(CtrlNotice::ModemState(ModemState::Unresponsive), 12);
        assert_eq!(sent_events(&actions, c1), vec![WireMsg::Event(ClientEvent::MdmOos)]);
        assert_eq!(f.cla.state(), ClaState::Off);

        // Acquire requests are rejected from now on.
        f.cla.client_message(c1, WireMsg::Acquire, 13);
        assert_eq!(f.cla.state(), ClaState::Off);
        assert!(f.calls.take().is_empty());
    }

    #[test]
    fn platform_reboot_does_not_publish_oos() {
        let mut f = fixture();
        let c1 = register(&mut f, "c1", &[ClientEvent::MdmDown, ClientEvent::MdmOos], 0);
        f.cla.control_notice(CtrlNotice::ModemState(ModemState::Off), 1);
        bring_up(&mut f, c1, 2);

        f.cla.control_notice(CtrlNotice::ModemState(ModemState::Busy), 10);
        f.cla.client_message(c1, WireMsg::AckColdReset, 11);

        let actions =
            f.cla.control_notice(CtrlNotice::ModemState(ModemState::PlatformReboot), 12);
        assert_eq!(sent_events(&actions, c1), vec![]);
        assert_eq!(f.cla.state(), ClaState::Off);
    }

    #[test]
    fn duplicate_register_disconnects_the_client() {
        let mut f = fixture();
        let c1 = register(&mut f, "c1", &[ClientEvent::MdmDown], 0);
        let actions = f.cla.client_message(
            c1,
            WireMsg::Register { name: String::from("again"), events: EventSet::EMPTY },
            1,
        );
        assert!(actions.contains(&ClaAction::Disconnect(c1)));
    }

    #[test]
    fn wrong_registration_flavor_disconnects_the_client() {
        let mut f = fixture_with(ClaConfig { sanity_mode: true, enable_fmmo: true });
        let c1 = f.cla.client_connected(0).unwrap();
        let actions = f.cla.client_message(
            c1,
            WireMsg::Register { name: String::from("c1"), events: EventSet::EMPTY },
            1,
        );
        assert!(actions.contains(&ClaAction::Disconnect(c1)));

        // The debug flavor is the accepted one in sanity mode.
        let c2 = f.cla.client_connected(2).unwrap();
        let actions = f.cla.client_message(
            c2,
            WireMsg::RegisterDbg { name: String::from("sanity"), events: EventSet::EMPTY },
            3,
        );
        assert!(!actions.contains(&ClaAction::Disconnect(c2)));
    }

    #[test]
    fn command_before_registration_disconnects_the_client() {
        let mut f = fixture();
        let c1 = f.cla.client_connected(0).unwrap();
        let actions = f.cla.client_message(c1, WireMsg::Acquire, 1);
        assert!(actions.contains(&ClaAction::Disconnect(c1)));
    }

    #[test]
    fn implicit_holder_starts_the_modem_without_clients() {
        let mut f = fixture_with(ClaConfig { sanity_mode: false, enable_fmmo: false });
        f.cla.control_notice(CtrlNotice::ModemState(ModemState::Off), 1);
        assert_eq!(f.cla.state(), ClaState::Starting);
        assert_eq!(f.calls.take(), vec![String::from("start")]);
    }

    #[test]
    fn boot_window_holds_the_wakelock() {
        let mut f = fixture();
        assert!(f.wakelock.is_held_by(WakeModule::Cla));
        assert_eq!(f.cla.next_deadline(), Some(BOOT_WINDOW_MS));

        f.cla.tick(BOOT_WINDOW_MS);
        assert!(!f.wakelock.is_held_by(WakeModule::Cla));
        assert_eq!(f.cla.next_deadline(), None);
    }

    #[test]
    fn notify_dbg_is_fanned_out_to_interested_clients() {
        let mut f = fixture();
        let c1 = register(&mut f, "c1", &[ClientEvent::MdmDbgInfo], 0);
        let c2 = register(&mut f, "c2", &[ClientEvent::MdmDown], 0);

        let dbg = DbgInfo::event(DbgKind::Stats);
        let actions = f.cla.client_message(c1, WireMsg::NotifyDbg(dbg.clone()), 1);
        assert_eq!(sent_events(&actions, c1), vec![WireMsg::DbgEvent(dbg)]);
        assert_eq!(sent_events(&actions, c2), vec![]);
    }

    #[test]
    fn shutdown_request_drops_all_votes() {
        let mut f = fixture();
        let c1 = register(&mut f, "c1", &[ClientEvent::MdmDown], 0);
        f.cla.control_notice(CtrlNotice::ModemState(ModemState::Off), 1);
        bring_up(&mut f, c1, 2);

        f.cla.client_message(c1, WireMsg::Shutdown, 10);
        // Dropping the last vote starts the shutdown procedure.
        assert_eq!(f.cla.state(), ClaState::Stopping);
        assert_eq!(f.calls.take(), vec![String::from("stop")]);
        f.cla.check_counters();

        // And the daemon refuses new acquisitions.
        f.cla.client_message(c1, WireMsg::Acquire, 11);
        f.cla.check_counters();
        assert!(f.calls.take().is_empty());
    }
}
