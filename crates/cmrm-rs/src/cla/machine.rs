// crates/cmrm-rs/src/cla/machine.rs

//! Transition table and operations of the client abstraction.

use super::{ClaAction, ClientRecord};
use crate::dbg::{DbgInfo, DbgKind};
use crate::fsm::{Entry, Fsm, FsmTag, Verdict};
use crate::hal::{ModemControl, WakeLock};
use crate::types::{
    ClientEvent, ClientId, ModemState, RestartKind, WakeModule, ACK_TIMEOUT_MS,
};
use crate::wire::WireMsg;
use alloc::boxed::Box;
use alloc::collections::BTreeMap;
use alloc::format;
use alloc::vec::Vec;
use log::{debug, error, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ClaState {
    Initial,
    Off,
    Starting,
    Up,
    AckWaitingCold,
    AckWaitingShutdown,
    Stopping,
}

impl FsmTag for ClaState {
    const COUNT: usize = 7;

    fn index(self) -> usize {
        self as usize
    }

    fn name(self) -> &'static str {
        match self {
            ClaState::Initial => "INITIAL",
            ClaState::Off => "OFF",
            ClaState::Starting => "STARTING",
            ClaState::Up => "UP",
            ClaState::AckWaitingCold => "WAITING C ACK",
            ClaState::AckWaitingShutdown => "WAITING S ACK",
            ClaState::Stopping => "STOPPING",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ClaEvent {
    Success,
    Failure,
    MdmOff,
    MdmUnresp,
    MdmBusy,
    MdmReady,
    CliAcquire,
    CliRelease,
    CliRestart,
    CliAcked,
}

impl FsmTag for ClaEvent {
    const COUNT: usize = 10;

    fn index(self) -> usize {
        self as usize
    }

    fn name(self) -> &'static str {
        match self {
            ClaEvent::Success => "CTRL: success",
            ClaEvent::Failure => "CTRL: failure",
            ClaEvent::MdmOff => "CTRL: mdm off",
            ClaEvent::MdmUnresp => "CTRL: mdm unresp",
            ClaEvent::MdmBusy => "CTRL: mdm busy",
            ClaEvent::MdmReady => "CTRL: mdm ready",
            ClaEvent::CliAcquire => "CLI : acquire",
            ClaEvent::CliRelease => "CLI : release",
            ClaEvent::CliRestart => "CLI : restart",
            ClaEvent::CliAcked => "CLI : acked",
        }
    }
}

/// Maps a modem state to the event shown to clients.
pub(super) fn map_modem_state(state: ModemState) -> ClientEvent {
    match state {
        ModemState::Off | ModemState::Busy | ModemState::Unknown => ClientEvent::MdmDown,
        ModemState::Ready => ClientEvent::MdmUp,
        ModemState::Unresponsive | ModemState::PlatformReboot => ClientEvent::MdmOos,
    }
}

pub(super) struct ClaCtx {
    pub control: Box<dyn ModemControl + Send>,
    pub wakelock: Box<dyn WakeLock + Send>,
    pub sanity_mode: bool,

    pub clients: BTreeMap<ClientId, ClientRecord>,
    pub num_acquired: usize,
    pub num_waiting_cold_ack: usize,
    pub num_waiting_shutdown_ack: usize,

    /// State last shown to clients.
    pub modem_state: ModemState,
    /// State last reported by control.
    pub real_modem_state: ModemState,
    /// While set, `modem_state` deliberately lags `real_modem_state` to
    /// sequence a multi-step transition without client-visible artifacts.
    pub fake_modem_state: bool,
    pub request_in_progress: bool,

    pub reject_requests: bool,
    pub restart_kind: Option<RestartKind>,
    pub dbg_info: Option<DbgInfo>,

    pub actions: Vec<ClaAction>,
    pub ack_deadline: Option<u64>,
    pub boot_deadline: Option<u64>,
    pub now_ms: u64,
}

impl ClaCtx {
    pub fn waiting_acks(&self) -> bool {
        self.num_waiting_cold_ack != 0 || self.num_waiting_shutdown_ack != 0
    }

    /// Sends an event to one client if its registration mask allows it,
    /// recording the expected acknowledgement for disruptive events.
    pub fn notify_single(&mut self, id: ClientId, event: ClientEvent, frame: &[u8]) {
        let Some(record) = self.clients.get_mut(&id) else {
            return;
        };
        if !record.events.contains(event) {
            return;
        }
        debug!("[{:<16}]{} => {}()", record.name, id, event.name());

        if event == ClientEvent::MdmColdReset {
            assert_eq!(self.num_waiting_shutdown_ack, 0);
            record.waiting_cold_reset_ack = true;
            self.num_waiting_cold_ack += 1;
        } else if event == ClientEvent::MdmShutdown {
            assert_eq!(self.num_waiting_cold_ack, 0);
            record.waiting_shutdown_ack = true;
            self.num_waiting_shutdown_ack += 1;
        }

        self.actions.push(ClaAction::Send { client: id, frame: frame.to_vec() });
    }

    /// Broadcasts a pre-serialized event to every registered client whose
    /// mask allows it.
    pub fn notify_all_serialized(&mut self, event: ClientEvent, frame: &[u8]) {
        debug!("notifying {} to up to {} client(s)", event.name(), self.clients.len());
        let ids: Vec<ClientId> = self.clients.keys().copied().collect();
        for id in ids {
            self.notify_single(id, event, frame);
        }
    }

    pub fn notify_all(&mut self, msg: &WireMsg) {
        let event = match msg {
            WireMsg::Event(event) => *event,
            WireMsg::DbgEvent(_) => ClientEvent::MdmDbgInfo,
            other => panic!("not a client event: {}", other.name()),
        };
        let frame = msg.encode().expect("event serialization cannot fail");
        self.notify_all_serialized(event, &frame);
    }

    fn start_ack_timer(&mut self) {
        self.ack_deadline = Some(self.now_ms + ACK_TIMEOUT_MS);

        if !self.wakelock.is_held_by(WakeModule::Cla) {
            self.wakelock.acquire(WakeModule::Cla);
        }
    }

    pub fn start_shutdown_procedure(&mut self) -> Verdict<ClaState> {
        // MDM_DOWN then MDM_SHUTDOWN, atomically before any later MDM_UP.
        if !self.fake_modem_state {
            self.notify_all(&WireMsg::Event(ClientEvent::MdmDown));
        }
        self.notify_all(&WireMsg::Event(ClientEvent::MdmShutdown));

        self.fake_modem_state = true;
        self.modem_state = ModemState::Off;

        if self.num_waiting_shutdown_ack == 0 {
            assert!(!self.request_in_progress);
            self.request_in_progress = true;
            self.control.stop();
            Verdict::Move(ClaState::Stopping)
        } else {
            self.start_ack_timer();
            Verdict::Move(ClaState::AckWaitingShutdown)
        }
    }

    pub fn start_restart_procedure(&mut self) -> Verdict<ClaState> {
        if self.modem_state != ModemState::Busy {
            self.notify_all(&WireMsg::Event(ClientEvent::MdmDown));

            assert!(!self.fake_modem_state);
            self.modem_state = ModemState::Busy;
            self.fake_modem_state = true;
        }

        self.notify_all(&WireMsg::Event(ClientEvent::MdmColdReset));

        if self.num_waiting_cold_ack == 0 {
            assert!(!self.request_in_progress);
            self.request_in_progress = true;
            let kind = self.restart_kind.unwrap_or(RestartKind::Restart);
            self.control.restart(kind, self.dbg_info.clone());
            Verdict::Move(ClaState::Starting)
        } else {
            self.start_ack_timer();
            Verdict::Move(ClaState::AckWaitingCold)
        }
    }
}

type V = Verdict<ClaState>;

fn client_acquire(ctx: &mut ClaCtx, _arg: &mut Option<()>) -> V {
    assert!(!ctx.request_in_progress);
    ctx.request_in_progress = true;
    ctx.control.start();
    Verdict::Move(ClaState::Starting)
}

fn mdm_busy(ctx: &mut ClaCtx, _arg: &mut Option<()>) -> V {
    ctx.restart_kind = Some(RestartKind::Restart);
    ctx.start_restart_procedure()
}

fn check_pending_up(ctx: &mut ClaCtx, _arg: &mut Option<()>) -> V {
    // A request is still running or the modem is not up yet: wait.
    if ctx.request_in_progress || ctx.modem_state != ModemState::Ready {
        return Verdict::Stay;
    }

    if ctx.num_acquired == 0 {
        return ctx.start_shutdown_procedure();
    }

    if ctx.restart_kind.is_some() {
        return ctx.start_restart_procedure();
    }

    Verdict::Move(ClaState::Up)
}

fn check_pending_down(ctx: &mut ClaCtx, _arg: &mut Option<()>) -> V {
    if ctx.request_in_progress || ctx.modem_state != ModemState::Off {
        return Verdict::Stay;
    }

    if ctx.num_acquired > 0 {
        ctx.request_in_progress = true;
        ctx.control.start();
        Verdict::Move(ClaState::Starting)
    } else {
        Verdict::Move(ClaState::Off)
    }
}

fn client_release(ctx: &mut ClaCtx, _arg: &mut Option<()>) -> V {
    ctx.start_shutdown_procedure()
}

fn client_restart(ctx: &mut ClaCtx, _arg: &mut Option<()>) -> V {
    ctx.start_restart_procedure()
}

fn client_acked_cold(ctx: &mut ClaCtx, _arg: &mut Option<()>) -> V {
    if ctx.modem_state == ModemState::Unresponsive {
        Verdict::Move(ClaState::Off)
    } else if ctx.num_acquired == 0 {
        ctx.start_shutdown_procedure()
    } else if ctx.restart_kind.is_some() {
        assert!(!ctx.request_in_progress);
        ctx.request_in_progress = true;
        let kind = ctx.restart_kind.unwrap_or(RestartKind::Restart);
        ctx.control.restart(kind, ctx.dbg_info.clone());
        Verdict::Move(ClaState::Starting)
    } else {
        assert!(!ctx.request_in_progress);
        assert_eq!(ctx.real_modem_state, ModemState::Busy);
        ctx.request_in_progress = true;
        ctx.control.restart(RestartKind::Restart, None);
        Verdict::Move(ClaState::Starting)
    }
}

fn client_acked_shtdwn(ctx: &mut ClaCtx, _arg: &mut Option<()>) -> V {
    if ctx.num_acquired == 0 {
        assert!(!ctx.request_in_progress);
        ctx.request_in_progress = true;
        ctx.control.stop();
        Verdict::Move(ClaState::Stopping)
    } else if ctx.restart_kind.is_some() {
        ctx.start_restart_procedure()
    } else if ctx.real_modem_state == ModemState::Ready {
        // Even if a new client acquired the modem before the last ack,
        // still shut it down: clients were already told MDM_DOWN.
        assert!(!ctx.request_in_progress);
        ctx.request_in_progress = true;
        ctx.control.stop();
        Verdict::Move(ClaState::Stopping)
    } else {
        ctx.fake_modem_state = false;
        ctx.modem_state = ctx.real_modem_state;
        assert_eq!(ctx.real_modem_state, ModemState::Busy);
        assert!(!ctx.request_in_progress);
        ctx.request_in_progress = true;
        ctx.control.restart(RestartKind::Restart, None);
        Verdict::Move(ClaState::Starting)
    }
}

fn check_failure(ctx: &mut ClaCtx, _arg: &mut Option<()>) -> V {
    if ctx.modem_state != ModemState::Unresponsive {
        let state_txt = format!("{}", ctx.modem_state);
        let dbg = DbgInfo::event(DbgKind::Error)
            .with_data(&["mismatch between CLA and control", &state_txt]);
        ctx.notify_all(&WireMsg::DbgEvent(dbg));
        panic!("wrong modem state notification received from control");
    }
    Verdict::Stay
}

fn invalid(_ctx: &mut ClaCtx, _arg: &mut Option<()>) -> V {
    panic!("transition not supported");
}

fn failsafe(_ctx: &mut ClaCtx, _arg: &mut Option<()>) -> V {
    error!("client abstraction failsafe reached");
    panic!("not implemented");
}

fn on_transition(_ctx: &mut ClaCtx, _prev: ClaState, next: ClaState, _event: ClaEvent) {
    assert!(next != ClaState::Initial);
}

const fn op(f: crate::fsm::FsmOp<ClaCtx, ClaState, ()>) -> Entry<ClaCtx, ClaState, ()> {
    Entry { forced: None, op: Some(f) }
}

const fn none() -> Entry<ClaCtx, ClaState, ()> {
    Entry { forced: None, op: None }
}

const fn forced(state: ClaState) -> Entry<ClaCtx, ClaState, ()> {
    Entry { forced: Some(state), op: None }
}

#[rustfmt::skip]
static TABLE: [Entry<ClaCtx, ClaState, ()>; ClaState::COUNT * ClaEvent::COUNT] = [
    //                    INITIAL                 OFF                 STARTING               UP                   WAITING C ACK         WAITING S ACK            STOPPING
    /* CTRL: success */   op(invalid),            op(invalid),        op(check_pending_up),  op(invalid),         op(invalid),          op(invalid),             op(check_pending_down),
    /* CTRL: failure */   op(invalid),            op(check_failure),  op(invalid),           op(invalid),         op(invalid),          op(invalid),             forced(ClaState::Off),
    /* CTRL: mdm off */   op(check_pending_down), op(invalid),        op(invalid),           op(invalid),         op(invalid),          op(invalid),             op(check_pending_down),
    /* CTRL: unresp  */   op(invalid),            forced(ClaState::Off), forced(ClaState::Off), op(invalid),      none(),               op(invalid),             none(),
    /* CTRL: busy    */   op(invalid),            op(invalid),        none(),                op(mdm_busy),        none(),               none(),                  none(),
    /* CTRL: ready   */   op(check_pending_up),   op(invalid),        op(check_pending_up),  op(invalid),         op(invalid),          op(invalid),             op(invalid),
    /* CLI : acquire */   none(),                 op(client_acquire), none(),                op(invalid),         none(),               none(),                  none(),
    /* CLI : release */   none(),                 op(check_failure),  none(),                op(client_release),  none(),               none(),                  none(),
    /* CLI : restart */   none(),                 op(invalid),        none(),                op(client_restart),  op(invalid),          none(),                  op(invalid),
    /* CLI : acked   */   none(),                 op(invalid),        op(invalid),           op(invalid),         op(client_acked_cold), op(client_acked_shtdwn), op(invalid),
];

pub(super) fn build() -> Fsm<ClaCtx, ClaState, ClaEvent, ()> {
    Fsm::new(&TABLE, ClaState::Initial, "CLA", None, Some(on_transition), failsafe)
}

/// Warns about every ack still outstanding and clears the bookkeeping.
/// Used when the ack deadline fires.
pub(super) fn expire_acks(ctx: &mut ClaCtx) {
    for (id, record) in ctx.clients.iter_mut() {
        if record.waiting_cold_reset_ack {
            record.waiting_cold_reset_ack = false;
            warn!("[{:<16}]{} time-out waiting for COLD_RESET ack", record.name, id);
        }
        if record.waiting_shutdown_ack {
            record.waiting_shutdown_ack = false;
            warn!("[{:<16}]{} time-out waiting for SHUTDOWN ack", record.name, id);
        }
    }
    ctx.num_waiting_cold_ack = 0;
    ctx.num_waiting_shutdown_ack = 0;
}
