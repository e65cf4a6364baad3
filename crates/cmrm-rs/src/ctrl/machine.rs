// crates/cmrm-rs/src/ctrl/machine.rs

//! Transition table and operations of the control engine.

use super::{CtrlPlugins, INTENT_CORE_DUMP_COMPLETE, INTENT_CORE_DUMP_WARNING,
            INTENT_MODEM_COLD_RESET, INTENT_MODEM_OOS, INTENT_PLATFORM_REBOOT,
            INTENT_TLV_APPLY_ERROR, INTENT_TLV_APPLY_SUCCESS};
use crate::dbg::{DbgInfo, DbgKind};
use crate::fsm::{Entry, Fsm, FsmTag, Verdict};
use crate::hal::{
    ClientNotifier, CoreDump, Customization, Escalation, FwElector, FwUpload, HalEvent, ModemHal,
    PlatformNotifier, WatchdogFeed,
};
use crate::types::{ClientEvent, ModemState, RecoveryStep, ResetKind, RESET_LATENCY_MS};
use crate::wire::bridge::IntentParam;
use alloc::boxed::Box;
use log::{debug, error, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CtrlState {
    Initial,
    Down,
    Packaging,
    Flashing,
    Customizing,
    Up,
    Waiting,
    Dumping,
}

impl FsmTag for CtrlState {
    const COUNT: usize = 8;

    fn index(self) -> usize {
        self as usize
    }

    fn name(self) -> &'static str {
        match self {
            CtrlState::Initial => "INITIAL",
            CtrlState::Down => "DOWN",
            CtrlState::Packaging => "PACKAGING",
            CtrlState::Flashing => "FLASHING",
            CtrlState::Customizing => "CUSTOMIZING",
            CtrlState::Up => "UP",
            CtrlState::Waiting => "WAITING",
            CtrlState::Dumping => "DUMPING",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CtrlEvent {
    CliStart,
    CliStop,
    CliReset,
    CliUpdate,
    CliNvmBackup,
    HalMdmOff,
    HalMdmRun,
    HalMdmBusy,
    HalMdmNeedReset,
    HalMdmFlash,
    HalMdmDump,
    HalMdmUnresponsive,
    NvmSuccess,
    FwSuccess,
    DumpSuccess,
    Failure,
    Timeout,
}

impl FsmTag for CtrlEvent {
    const COUNT: usize = 17;

    fn index(self) -> usize {
        self as usize
    }

    fn name(self) -> &'static str {
        match self {
            CtrlEvent::CliStart => "CLI: start",
            CtrlEvent::CliStop => "CLI: stop",
            CtrlEvent::CliReset => "CLI: reset",
            CtrlEvent::CliUpdate => "CLI: update",
            CtrlEvent::CliNvmBackup => "CLI: backup",
            CtrlEvent::HalMdmOff => "HAL: off",
            CtrlEvent::HalMdmRun => "HAL: run",
            CtrlEvent::HalMdmBusy => "HAL: busy",
            CtrlEvent::HalMdmNeedReset => "HAL: need_reset",
            CtrlEvent::HalMdmFlash => "HAL: flash",
            CtrlEvent::HalMdmDump => "HAL: dump",
            CtrlEvent::HalMdmUnresponsive => "HAL: unresp",
            CtrlEvent::NvmSuccess => "OP : nvm ok",
            CtrlEvent::FwSuccess => "OP : fw ok",
            CtrlEvent::DumpSuccess => "OP : dump ok",
            CtrlEvent::Failure => "OP : err",
            CtrlEvent::Timeout => "OP : timeout",
        }
    }
}

/// Event payload: a HAL event carrying nodes or a failure record, or a
/// debug record attached to a client reset.
#[derive(Debug)]
pub enum CtrlArg {
    Hal(HalEvent),
    Dbg(DbgInfo),
}

/// The client request currently driven by the engine.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ClientRequest {
    #[default]
    None,
    Reset,
    Stop,
    Start,
}

/// Transient request/flashing bookkeeping, cleared by the failsafe.
#[derive(Default)]
pub(super) struct RequestState {
    pub client_request: ClientRequest,
    pub fw_ready: bool,
    pub hal_evt: Option<HalEvent>,
    pub waiting_hal_busy_reason: bool,
    pub flash_done: bool,
    pub run_ipc: bool,
}

/// Debug-report bookkeeping for the next executed reset.
#[derive(Default)]
pub(super) struct DbgReport {
    pub do_not_report: bool,
    pub reset_initiated_by_cla: bool,
    pub evt: Option<DbgInfo>,
}

pub(super) struct CtrlCtx {
    pub hal: Box<dyn ModemHal + Send>,
    pub upload: Box<dyn FwUpload + Send>,
    pub customization: Box<dyn Customization + Send>,
    pub dump: Box<dyn CoreDump + Send>,
    pub elector: Box<dyn FwElector + Send>,
    pub escalation: Box<dyn Escalation + Send>,
    pub clients: Box<dyn ClientNotifier + Send>,
    pub notifier: Box<dyn PlatformNotifier + Send>,
    pub watchdog: Box<dyn WatchdogFeed + Send>,

    pub inst_id: u32,
    pub watchdog_timeout_ms: u64,
    pub is_mdm_oos: bool,
    pub req: RequestState,
    pub dbg: DbgReport,
    pub timer_deadline: Option<u64>,
    pub now_ms: u64,
}

impl CtrlCtx {
    pub fn new(plugins: CtrlPlugins, inst_id: u32, watchdog_timeout_ms: u64) -> Self {
        Self {
            hal: plugins.hal,
            upload: plugins.upload,
            customization: plugins.customization,
            dump: plugins.dump,
            elector: plugins.elector,
            escalation: plugins.escalation,
            clients: plugins.clients,
            notifier: plugins.notifier,
            watchdog: plugins.watchdog,
            inst_id,
            watchdog_timeout_ms,
            is_mdm_oos: false,
            req: RequestState::default(),
            dbg: DbgReport::default(),
            timer_deadline: None,
            now_ms: 0,
        }
    }

    fn inst_param(&self) -> [IntentParam; 1] {
        [IntentParam::int("instId", self.inst_id as i32)]
    }

    fn broadcast(&mut self, intent: &str) {
        let params = self.inst_param();
        self.notifier.broadcast_intent(intent, &params);
    }

    fn notify_op_result_if_needed(&mut self, success: bool) {
        if self.req.client_request != ClientRequest::None {
            self.req.client_request = ClientRequest::None;
            self.clients.notify_operation_result(success);
        }
    }

    /// Reports the stored debug record (synthesizing an APIMR record for a
    /// client-API reset without one) and clears the report bookkeeping.
    fn notify_dbg_info(&mut self, report: bool) {
        if report && !self.dbg.do_not_report {
            if self.dbg.evt.is_none() && self.dbg.reset_initiated_by_cla {
                self.dbg.evt = Some(DbgInfo::event(DbgKind::Apimr));
            }
            match self.dbg.evt.take() {
                Some(evt) => self.clients.notify_client(ClientEvent::MdmDbgInfo, Some(evt)),
                None => warn!("no debug information to report for this reset"),
            }
        }
        self.dbg.do_not_report = false;
        self.dbg.reset_initiated_by_cla = false;
        self.dbg.evt = None;
    }
}

/// Moves the debug record out of the event payload, if it carries one.
fn take_dbg(arg: &mut Option<CtrlArg>) -> Option<DbgInfo> {
    match arg.take() {
        Some(CtrlArg::Dbg(dbg)) => Some(dbg),
        Some(CtrlArg::Hal(HalEvent::NeedReset(dbg)))
        | Some(CtrlArg::Hal(HalEvent::Unresponsive(dbg))) => dbg,
        other => {
            *arg = other;
            None
        }
    }
}

/// Stores the payload's debug record for the next executed reset. An
/// already-stored record is replaced only when `overwrite` is set.
fn store_dbg(ctx: &mut CtrlCtx, arg: &mut Option<CtrlArg>, overwrite: bool) {
    if let Some(dbg) = take_dbg(arg) {
        if ctx.dbg.evt.is_none() || overwrite {
            ctx.dbg.evt = Some(dbg);
        }
    }
}

type V = Verdict<CtrlState>;

fn mdm_flash(ctx: &mut CtrlCtx) -> V {
    if ctx.req.hal_evt.is_some() && ctx.req.fw_ready {
        let Some(HalEvent::Flash { nodes }) = ctx.req.hal_evt.take() else {
            panic!("stored HAL event is not a flash event");
        };
        ctx.upload.flash(&nodes);
        ctx.req.fw_ready = false;
        Verdict::Move(CtrlState::Flashing)
    } else {
        Verdict::Stay
    }
}

fn flash_evt(ctx: &mut CtrlCtx, arg: &mut Option<CtrlArg>) -> V {
    assert!(ctx.req.hal_evt.is_none());
    let Some(CtrlArg::Hal(evt)) = arg.take() else {
        panic!("flash event without HAL payload");
    };
    ctx.req.hal_evt = Some(evt);
    mdm_flash(ctx)
}

fn fw_ready_evt(ctx: &mut CtrlCtx, _arg: &mut Option<CtrlArg>) -> V {
    ctx.req.fw_ready = true;
    mdm_flash(ctx)
}

fn mdm_cfg(ctx: &mut CtrlCtx) -> V {
    if ctx.req.flash_done && ctx.req.run_ipc {
        ctx.req.flash_done = false;
        ctx.req.run_ipc = false;

        let tlvs = ctx.elector.tlv_list();
        if !tlvs.is_empty() {
            ctx.customization.send(&tlvs);
            Verdict::Move(CtrlState::Customizing)
        } else {
            ctx.notify_op_result_if_needed(true);
            ctx.clients.notify_modem_state(ModemState::Ready);
            Verdict::Move(CtrlState::Up)
        }
    } else {
        Verdict::Stay
    }
}

fn run_evt_initial(ctx: &mut CtrlCtx, _arg: &mut Option<CtrlArg>) -> V {
    ctx.req.run_ipc = true;
    ctx.req.flash_done = true;
    mdm_cfg(ctx)
}

fn run_evt(ctx: &mut CtrlCtx, _arg: &mut Option<CtrlArg>) -> V {
    ctx.req.run_ipc = true;
    mdm_cfg(ctx)
}

fn flash_success_evt(ctx: &mut CtrlCtx, _arg: &mut Option<CtrlArg>) -> V {
    if !ctx.req.run_ipc {
        ctx.hal.boot();
    }
    ctx.elector.notify_fw_flashed(true);
    ctx.req.flash_done = true;
    mdm_cfg(ctx)
}

fn mdm_stop(ctx: &mut CtrlCtx, _arg: &mut Option<CtrlArg>) -> V {
    ctx.hal.shutdown();
    Verdict::Move(CtrlState::Waiting)
}

fn mdm_restart(ctx: &mut CtrlCtx, report_dbg_info: bool, backup: bool) -> V {
    ctx.notify_dbg_info(report_dbg_info);

    let fw_path = ctx.elector.fw_path();
    ctx.upload.package(&fw_path);
    ctx.hal.reset(if backup { ResetKind::BackupNvm } else { ResetKind::Cold });
    ctx.broadcast(INTENT_MODEM_COLD_RESET);

    Verdict::Move(CtrlState::Packaging)
}

fn set_oos(ctx: &mut CtrlCtx) -> V {
    assert!(!ctx.is_mdm_oos);

    ctx.notify_dbg_info(true);
    ctx.clients.notify_modem_state(ModemState::Unresponsive);
    ctx.notify_op_result_if_needed(false);
    ctx.is_mdm_oos = true;
    ctx.broadcast(INTENT_MODEM_OOS);

    Verdict::Move(CtrlState::Down)
}

fn platform_reboot(ctx: &mut CtrlCtx) -> V {
    ctx.notify_dbg_info(true);

    ctx.clients
        .notify_client(ClientEvent::MdmDbgInfo, Some(DbgInfo::full(DbgKind::PlatformReboot)));
    ctx.clients.notify_modem_state(ModemState::PlatformReboot);
    ctx.notify_op_result_if_needed(false);
    ctx.is_mdm_oos = true;

    ctx.broadcast(INTENT_PLATFORM_REBOOT);
    ctx.notifier.request_reboot();

    Verdict::Move(CtrlState::Down)
}

fn escalation(ctx: &mut CtrlCtx, arg: &mut Option<CtrlArg>) -> V {
    store_dbg(ctx, arg, true);

    match ctx.escalation.next_step(ctx.now_ms) {
        RecoveryStep::WarmReset => panic!("warm reset recovery is not implemented"),
        RecoveryStep::ColdReset => mdm_restart(ctx, true, false),
        RecoveryStep::PlatformReboot => platform_reboot(ctx),
        RecoveryStep::OutOfService => set_oos(ctx),
    }
}

fn requested_operation(ctx: &mut CtrlCtx, arg: &mut Option<CtrlArg>) -> V {
    store_dbg(ctx, arg, true);

    match ctx.req.client_request {
        ClientRequest::None => Verdict::Move(CtrlState::Waiting),
        ClientRequest::Reset | ClientRequest::Start => escalation(ctx, arg),
        ClientRequest::Stop => mdm_stop(ctx, arg),
    }
}

fn accept_stop(ctx: &mut CtrlCtx, _arg: &mut Option<CtrlArg>) -> V {
    assert_eq!(ctx.req.client_request, ClientRequest::None);
    ctx.req.client_request = ClientRequest::Stop;
    Verdict::Stay
}

fn accept_reset(ctx: &mut CtrlCtx, _arg: &mut Option<CtrlArg>) -> V {
    assert_eq!(ctx.req.client_request, ClientRequest::None);
    ctx.req.client_request = ClientRequest::Reset;
    Verdict::Stay
}

fn request_start(ctx: &mut CtrlCtx, _arg: &mut Option<CtrlArg>) -> V {
    assert_eq!(ctx.req.client_request, ClientRequest::None);
    ctx.req.client_request = ClientRequest::Start;

    if ctx.is_mdm_oos {
        ctx.notify_op_result_if_needed(false);
        Verdict::Stay
    } else {
        let fw_path = ctx.elector.fw_path();
        ctx.upload.package(&fw_path);
        ctx.hal.power_on();
        Verdict::Move(CtrlState::Packaging)
    }
}

fn request_reset(ctx: &mut CtrlCtx, arg: &mut Option<CtrlArg>) -> V {
    store_dbg(ctx, arg, false);
    assert_eq!(ctx.req.client_request, ClientRequest::None);
    ctx.req.client_request = ClientRequest::Reset;

    if ctx.req.waiting_hal_busy_reason {
        Verdict::Stay
    } else {
        escalation(ctx, &mut None)
    }
}

fn request_reset_timer(ctx: &mut CtrlCtx, arg: &mut Option<CtrlArg>) -> V {
    store_dbg(ctx, arg, false);
    assert_eq!(ctx.req.client_request, ClientRequest::None);
    ctx.req.client_request = ClientRequest::Reset;

    // Give a near-simultaneous HAL event a chance to arrive first and
    // supersede this reset, so the modem is not reset twice.
    ctx.dbg.reset_initiated_by_cla = true;
    assert!(ctx.timer_deadline.is_none());
    ctx.timer_deadline = Some(ctx.now_ms + RESET_LATENCY_MS);

    Verdict::Stay
}

fn request_update(ctx: &mut CtrlCtx, _arg: &mut Option<CtrlArg>) -> V {
    assert_eq!(ctx.req.client_request, ClientRequest::None);
    ctx.dbg.do_not_report = true;
    ctx.req.client_request = ClientRequest::Reset;

    if ctx.req.waiting_hal_busy_reason {
        Verdict::Stay
    } else {
        mdm_restart(ctx, false, false)
    }
}

fn request_backup(ctx: &mut CtrlCtx, _arg: &mut Option<CtrlArg>) -> V {
    assert_eq!(ctx.req.client_request, ClientRequest::None);
    ctx.req.client_request = ClientRequest::Reset;
    mdm_restart(ctx, false, true)
}

fn request_stop(ctx: &mut CtrlCtx, arg: &mut Option<CtrlArg>) -> V {
    assert_eq!(ctx.req.client_request, ClientRequest::None);
    ctx.req.client_request = ClientRequest::Stop;

    if ctx.req.waiting_hal_busy_reason {
        Verdict::Stay
    } else {
        mdm_stop(ctx, arg)
    }
}

// The customization worker reports through the shared firmware-success
// event, which is what routes `FwSuccess` in `Customizing` here.
fn reset_after_tlv(ctx: &mut CtrlCtx, _arg: &mut Option<CtrlArg>) -> V {
    ctx.broadcast(INTENT_TLV_APPLY_SUCCESS);
    ctx.elector.notify_tlv_applied(true);
    ctx.clients
        .notify_client(ClientEvent::MdmDbgInfo, Some(DbgInfo::bare(DbgKind::TlvSuccess)));

    mdm_restart(ctx, false, false)
}

fn pack_failure(ctx: &mut CtrlCtx, _arg: &mut Option<CtrlArg>) -> V {
    debug!("packaging failure");
    ctx.elector.notify_fw_flashed(false);
    Verdict::Fault
}

fn flash_failure(ctx: &mut CtrlCtx, _arg: &mut Option<CtrlArg>) -> V {
    debug!("flashing failure");
    ctx.elector.notify_fw_flashed(false);
    Verdict::Fault
}

fn custo_failure(ctx: &mut CtrlCtx, _arg: &mut Option<CtrlArg>) -> V {
    debug!("customization failure");
    ctx.broadcast(INTENT_TLV_APPLY_ERROR);
    ctx.elector.notify_tlv_applied(false);
    ctx.clients
        .notify_client(ClientEvent::MdmDbgInfo, Some(DbgInfo::bare(DbgKind::TlvFailure)));
    Verdict::Fault
}

fn fw_flash_failure(ctx: &mut CtrlCtx, arg: &mut Option<CtrlArg>) -> V {
    store_dbg(ctx, arg, true);
    set_oos(ctx)
}

fn notify_off(ctx: &mut CtrlCtx, _arg: &mut Option<CtrlArg>) -> V {
    ctx.notify_op_result_if_needed(true);
    ctx.clients.notify_modem_state(ModemState::Off);
    Verdict::Move(CtrlState::Down)
}

fn notify_unresp(ctx: &mut CtrlCtx, arg: &mut Option<CtrlArg>) -> V {
    store_dbg(ctx, arg, true);

    match ctx.escalation.last_step(ctx.now_ms) {
        RecoveryStep::PlatformReboot => platform_reboot(ctx),
        RecoveryStep::OutOfService => set_oos(ctx),
        step => panic!("invalid last escalation step {:?}", step),
    }
}

fn notify_busy(ctx: &mut CtrlCtx, _arg: &mut Option<CtrlArg>) -> V {
    ctx.clients.notify_modem_state(ModemState::Busy);
    Verdict::Stay
}

fn dump_start(ctx: &mut CtrlCtx, arg: &mut Option<CtrlArg>) -> V {
    let Some(CtrlArg::Hal(HalEvent::Dump { nodes })) = arg.take() else {
        panic!("dump event without node list");
    };

    // The dump supersedes the debug report of the reset that follows.
    ctx.dbg.do_not_report = true;

    ctx.clients
        .notify_client(ClientEvent::MdmDbgInfo, Some(DbgInfo::event(DbgKind::DumpStart)));
    ctx.broadcast(INTENT_CORE_DUMP_WARNING);

    let fw_path = ctx.elector.fw_path();
    ctx.dump.read(&nodes, &fw_path);

    Verdict::Move(CtrlState::Dumping)
}

fn dump_end(ctx: &mut CtrlCtx, arg: &mut Option<CtrlArg>) -> V {
    ctx.broadcast(INTENT_CORE_DUMP_COMPLETE);
    requested_operation(ctx, arg)
}

fn dump_error(ctx: &mut CtrlCtx, _arg: &mut Option<CtrlArg>) -> V {
    error!("core dump interrupted by HAL event");
    ctx.dump.stop();

    ctx.clients.notify_client(
        ClientEvent::MdmDbgInfo,
        Some(DbgInfo::full(DbgKind::Error).with_data(&["dump link error"])),
    );

    requested_operation(ctx, &mut None)
}

fn unhandled(_ctx: &mut CtrlCtx, _arg: &mut Option<CtrlArg>) -> V {
    panic!("transition not handled");
}

fn invalid(_ctx: &mut CtrlCtx, _arg: &mut Option<CtrlArg>) -> V {
    panic!("transition not supported");
}

fn failsafe(ctx: &mut CtrlCtx, arg: &mut Option<CtrlArg>) -> V {
    error!("************* FAILSAFE *****************");
    ctx.notify_op_result_if_needed(false);
    ctx.req = RequestState::default();
    request_stop(ctx, arg)
}

fn pre_op(ctx: &mut CtrlCtx, event: CtrlEvent) {
    match event {
        CtrlEvent::HalMdmBusy => ctx.req.waiting_hal_busy_reason = true,
        CtrlEvent::HalMdmNeedReset
        | CtrlEvent::HalMdmFlash
        | CtrlEvent::HalMdmDump
        | CtrlEvent::HalMdmUnresponsive => {
            assert!(ctx.req.waiting_hal_busy_reason);
            ctx.req.waiting_hal_busy_reason = false;
        }
        _ => {}
    }
}

fn on_transition(ctx: &mut CtrlCtx, prev: CtrlState, next: CtrlState, _event: CtrlEvent) {
    assert!(next != CtrlState::Initial);

    // Exit of a stable state: the control thread is working again.
    if prev == CtrlState::Up || prev == CtrlState::Down {
        ctx.watchdog.arm(ctx.watchdog_timeout_ms);
    }
    if prev == CtrlState::Up {
        ctx.timer_deadline = None;
    }

    if next == CtrlState::Up || next == CtrlState::Down {
        ctx.watchdog.disarm();
    }
}

const fn op(f: crate::fsm::FsmOp<CtrlCtx, CtrlState, CtrlArg>) -> Entry<CtrlCtx, CtrlState, CtrlArg> {
    Entry { forced: None, op: Some(f) }
}

const fn none() -> Entry<CtrlCtx, CtrlState, CtrlArg> {
    Entry { forced: None, op: None }
}

const fn forced_op(
    state: CtrlState,
    f: crate::fsm::FsmOp<CtrlCtx, CtrlState, CtrlArg>,
) -> Entry<CtrlCtx, CtrlState, CtrlArg> {
    Entry { forced: Some(state), op: Some(f) }
}

#[rustfmt::skip]
static TABLE: [Entry<CtrlCtx, CtrlState, CtrlArg>; CtrlState::COUNT * CtrlEvent::COUNT] = [
    //                 INITIAL               DOWN               PACKAGING           FLASHING               CUSTOMIZING          UP                                       WAITING                  DUMPING
    /* CLI: start  */  op(invalid),          op(request_start), op(invalid),        op(invalid),           op(invalid),         op(invalid),                             op(invalid),             op(invalid),
    /* CLI: stop   */  op(invalid),          op(invalid),       op(invalid),        op(invalid),           op(invalid),         op(request_stop),                        op(request_stop),        op(accept_stop),
    /* CLI: reset  */  op(invalid),          op(request_start), op(invalid),        op(invalid),           op(invalid),         op(request_reset_timer),                 op(request_reset),       op(accept_reset),
    /* CLI: update */  op(invalid),          op(request_start), op(invalid),        op(invalid),           op(invalid),         op(request_update),                      op(request_update),      op(accept_reset),
    /* CLI: backup */  op(invalid),          op(invalid),       op(invalid),        op(invalid),           op(invalid),         op(request_backup),                      op(invalid),             none(),
    /* HAL: off    */  op(notify_off),       none(),            op(escalation),     op(unhandled),         op(unhandled),       op(unhandled),                           op(notify_off),          op(invalid),
    /* HAL: run    */  op(run_evt_initial),  op(mdm_stop),      op(escalation),     op(run_evt),           op(unhandled),       op(invalid),                             op(escalation),          op(invalid),
    /* HAL: busy   */  op(invalid),          none(),            op(notify_busy),    none(),                none(),              forced_op(CtrlState::Waiting, notify_busy), none(),               op(dump_error),
    /* HAL: n_rst  */  op(invalid),          op(unhandled),     op(escalation),     op(escalation),        op(escalation),      op(invalid),                             op(requested_operation), op(invalid),
    /* HAL: flash  */  op(invalid),          op(unhandled),     op(flash_evt),      op(invalid),           op(unhandled),       op(invalid),                             op(requested_operation), op(invalid),
    /* HAL: dump   */  op(invalid),          op(dump_start),    op(dump_start),     op(dump_start),        op(dump_start),      op(invalid),                             op(dump_start),          op(invalid),
    /* HAL: unresp */  op(invalid),          op(invalid),       op(notify_unresp),  op(fw_flash_failure),  op(invalid),         op(invalid),                             op(notify_unresp),       op(invalid),
    /* OP : nvm ok */  op(invalid),          op(unhandled),     op(unhandled),      op(unhandled),         op(unhandled),       op(unhandled),                           op(unhandled),           op(invalid),
    /* OP : fw ok  */  op(invalid),          op(unhandled),     op(fw_ready_evt),   op(flash_success_evt), op(reset_after_tlv), op(unhandled),                           op(unhandled),           op(invalid),
    /* OP : dump ok*/  op(invalid),          op(unhandled),     op(unhandled),      op(unhandled),         op(unhandled),       op(unhandled),                           op(unhandled),           op(dump_end),
    /* OP : err    */  op(invalid),          op(failsafe),      op(pack_failure),   op(flash_failure),     op(custo_failure),   op(failsafe),                            op(failsafe),            op(requested_operation),
    /* OP : timeout*/  op(invalid),          op(invalid),       op(invalid),        op(invalid),           op(invalid),         op(escalation),                          op(invalid),             op(invalid),
];

pub(super) fn build() -> Fsm<CtrlCtx, CtrlState, CtrlEvent, CtrlArg> {
    Fsm::new(
        &TABLE,
        CtrlState::Initial,
        "CTRL",
        Some(pre_op),
        Some(on_transition),
        failsafe,
    )
}
