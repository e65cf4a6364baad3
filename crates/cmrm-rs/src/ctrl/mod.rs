// crates/cmrm-rs/src/ctrl/mod.rs

//! Modem control engine.
//!
//! Drives the modem through its physical lifecycle: firmware packaging,
//! flashing, customization, run, dump and the recovery paths. Consumes
//! requests from the client abstraction and events from the HAL and the
//! asynchronous workers; consults the escalation ladder on failure. The
//! engine owns its collaborators as trait objects and never blocks; the
//! owning event loop supplies the monotonic time and sleeps until
//! [`ControlEngine::next_deadline`].

mod machine;

use crate::dbg::DbgInfo;
use crate::fsm::Fsm;
use crate::hal::{
    ClientNotifier, CoreDump, Customization, Escalation, FwElector, FwUpload, HalEvent, ModemHal,
    PlatformNotifier, WatchdogFeed,
};
use crate::types::RestartKind;
use alloc::boxed::Box;
use log::debug;

pub use machine::{CtrlEvent, CtrlState};

use machine::{CtrlArg, CtrlCtx};

/// Intent broadcast when the modem goes through a cold reset.
pub const INTENT_MODEM_COLD_RESET: &str = "cmrm.intent.MODEM_COLD_RESET";
/// Intent broadcast when the modem is declared out of service.
pub const INTENT_MODEM_OOS: &str = "cmrm.intent.MODEM_OUT_OF_SERVICE";
/// Intent broadcast when a platform reboot is initiated.
pub const INTENT_PLATFORM_REBOOT: &str = "cmrm.intent.PLATFORM_REBOOT";
/// Intent broadcast when a core dump read starts.
pub const INTENT_CORE_DUMP_WARNING: &str = "cmrm.intent.CORE_DUMP_WARNING";
/// Intent broadcast when a core dump read completes.
pub const INTENT_CORE_DUMP_COMPLETE: &str = "cmrm.intent.CORE_DUMP_COMPLETE";
/// Intent broadcast when a customization TLV was applied.
pub const INTENT_TLV_APPLY_SUCCESS: &str = "cmrm.intent.MODEM_TLV_APPLY_SUCCESS";
/// Intent broadcast when a customization TLV failed to apply.
pub const INTENT_TLV_APPLY_ERROR: &str = "cmrm.intent.MODEM_TLV_APPLY_ERROR";

/// A request from the client abstraction.
#[derive(Debug, Clone, PartialEq)]
pub enum CtrlRequest {
    Start,
    Stop,
    Restart { kind: RestartKind, debug: Option<DbgInfo> },
}

/// Completion event from an asynchronous worker (upload, customization,
/// dump, NVM backup).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WorkerEvent {
    NvmSuccess,
    FwSuccess,
    DumpSuccess,
    Failure,
}

/// Collaborators handed to the engine at construction.
pub struct CtrlPlugins {
    pub hal: Box<dyn ModemHal + Send>,
    pub upload: Box<dyn FwUpload + Send>,
    pub customization: Box<dyn Customization + Send>,
    pub dump: Box<dyn CoreDump + Send>,
    pub elector: Box<dyn FwElector + Send>,
    pub escalation: Box<dyn Escalation + Send>,
    pub clients: Box<dyn ClientNotifier + Send>,
    pub notifier: Box<dyn PlatformNotifier + Send>,
    pub watchdog: Box<dyn WatchdogFeed + Send>,
}

pub struct ControlEngine {
    machine: Fsm<CtrlCtx, CtrlState, CtrlEvent, CtrlArg>,
    ctx: CtrlCtx,
}

impl ControlEngine {
    pub fn new(plugins: CtrlPlugins, inst_id: u32, watchdog_timeout_ms: u64) -> Self {
        Self {
            machine: machine::build(),
            ctx: CtrlCtx::new(plugins, inst_id, watchdog_timeout_ms),
        }
    }

    pub fn state(&self) -> CtrlState {
        self.machine.state()
    }

    pub fn is_out_of_service(&self) -> bool {
        self.ctx.is_mdm_oos
    }

    /// Arms the watchdog so the engine cannot stay in `Initial` forever.
    /// Called by the owning loop right before it starts polling.
    pub fn start_supervision(&mut self) {
        self.ctx.watchdog.arm(self.ctx.watchdog_timeout_ms);
    }

    /// Feeds a client-abstraction request.
    pub fn request(&mut self, request: CtrlRequest, now_ms: u64) {
        self.ctx.now_ms = now_ms;
        debug!("->request({:?})", request);
        match request {
            CtrlRequest::Start => self.machine.notify(&mut self.ctx, CtrlEvent::CliStart, None),
            CtrlRequest::Stop => self.machine.notify(&mut self.ctx, CtrlEvent::CliStop, None),
            CtrlRequest::Restart { kind: RestartKind::Restart, debug } => {
                self.machine
                    .notify(&mut self.ctx, CtrlEvent::CliReset, debug.map(CtrlArg::Dbg));
            }
            CtrlRequest::Restart { kind: RestartKind::Update, .. } => {
                // Update and backup resets never report debug records.
                self.machine.notify(&mut self.ctx, CtrlEvent::CliUpdate, None);
            }
            CtrlRequest::Restart { kind: RestartKind::BackupNvm, .. } => {
                self.machine.notify(&mut self.ctx, CtrlEvent::CliNvmBackup, None);
            }
        }
    }

    /// Feeds a HAL event.
    pub fn hal_event(&mut self, event: HalEvent, now_ms: u64) {
        self.ctx.now_ms = now_ms;
        debug!("->hal_event({})", event.name());
        let fsm_event = match &event {
            HalEvent::Off => CtrlEvent::HalMdmOff,
            HalEvent::Run => CtrlEvent::HalMdmRun,
            HalEvent::Busy => CtrlEvent::HalMdmBusy,
            HalEvent::NeedReset(_) => CtrlEvent::HalMdmNeedReset,
            HalEvent::Flash { .. } => CtrlEvent::HalMdmFlash,
            HalEvent::Dump { .. } => CtrlEvent::HalMdmDump,
            HalEvent::Unresponsive(_) => CtrlEvent::HalMdmUnresponsive,
        };
        let payload = match &event {
            HalEvent::Off | HalEvent::Run | HalEvent::Busy => None,
            _ => Some(CtrlArg::Hal(event)),
        };
        self.machine.notify(&mut self.ctx, fsm_event, payload);
    }

    /// Feeds a worker completion event.
    pub fn worker_event(&mut self, event: WorkerEvent, now_ms: u64) {
        self.ctx.now_ms = now_ms;
        debug!("->worker_event({:?})", event);
        let fsm_event = match event {
            WorkerEvent::NvmSuccess => CtrlEvent::NvmSuccess,
            WorkerEvent::FwSuccess => CtrlEvent::FwSuccess,
            WorkerEvent::DumpSuccess => CtrlEvent::DumpSuccess,
            WorkerEvent::Failure => CtrlEvent::Failure,
        };
        self.machine.notify(&mut self.ctx, fsm_event, None);
    }

    /// Fires the reset-latency timer when its deadline passed.
    pub fn tick(&mut self, now_ms: u64) {
        self.ctx.now_ms = now_ms;
        if let Some(deadline) = self.ctx.timer_deadline {
            if now_ms >= deadline {
                self.ctx.timer_deadline = None;
                self.machine.notify(&mut self.ctx, CtrlEvent::Timeout, None);
            }
        }
    }

    /// Absolute time of the next timer event, if any.
    pub fn next_deadline(&self) -> Option<u64> {
        self.ctx.timer_deadline
    }
}
