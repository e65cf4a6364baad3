// crates/cmrm-rs/src/hal.rs

//! Collaborator seams of the resource manager.
//!
//! Every external module the engines drive (modem hardware, firmware
//! upload, customization, core dump, firmware election, platform
//! notification, persistence, wakelock, watchdog) and both directions of
//! the CLA <-> CTRL request/event plane are expressed as object-safe
//! traits. The engines own boxed trait objects; concrete implementations
//! live in the platform crate or in test fixtures.

use crate::dbg::DbgInfo;
use crate::types::{ClientEvent, ModemState, RecoveryStep, ResetKind, RestartKind, WakeModule};
use crate::wire::bridge::IntentParam;
use alloc::string::String;
use alloc::vec::Vec;

/// An event reported by the modem HAL to the control engine.
///
/// `NeedReset` and `Unresponsive` may carry the debug record describing
/// the failure; `Flash` and `Dump` carry the device nodes to operate on.
#[derive(Debug, Clone, PartialEq)]
pub enum HalEvent {
    /// Modem is powered off.
    Off,
    /// Modem firmware is running.
    Run,
    /// Modem is down and the HAL will report the reason with a follow-up
    /// event.
    Busy,
    /// Modem requested a reset.
    NeedReset(Option<DbgInfo>),
    /// Modem is ready to be flashed on the given nodes.
    Flash { nodes: Vec<String> },
    /// Modem exposes a core dump on the given nodes.
    Dump { nodes: Vec<String> },
    /// Modem stopped answering the HAL.
    Unresponsive(Option<DbgInfo>),
}

impl HalEvent {
    pub fn name(&self) -> &'static str {
        match self {
            HalEvent::Off => "HAL_MDM_OFF",
            HalEvent::Run => "HAL_MDM_RUN",
            HalEvent::Busy => "HAL_MDM_BUSY",
            HalEvent::NeedReset(_) => "HAL_MDM_NEED_RESET",
            HalEvent::Flash { .. } => "HAL_MDM_FLASH",
            HalEvent::Dump { .. } => "HAL_MDM_DUMP",
            HalEvent::Unresponsive(_) => "HAL_MDM_UNRESPONSIVE",
        }
    }
}

/// Modem hardware control. Commands are asynchronous kick-offs; completion
/// is reported back through [`HalEvent`]s.
pub trait ModemHal {
    fn power_on(&mut self);
    fn boot(&mut self);
    fn shutdown(&mut self);
    fn reset(&mut self, kind: ResetKind);
}

/// Firmware packaging and flashing. Completion is reported back as worker
/// events (`FwSuccess` / `Failure`).
pub trait FwUpload {
    /// Prepares the firmware image found at `fw_path` for injection.
    fn package(&mut self, fw_path: &str);
    /// Flashes the packaged firmware through the given device nodes.
    fn flash(&mut self, nodes: &[String]);
}

/// Modem customization (TLV injection). Completion is reported back as a
/// worker event.
pub trait Customization {
    fn send(&mut self, tlvs: &[String]);
}

/// Core dump retrieval. Completion is reported back as a worker event.
pub trait CoreDump {
    fn read(&mut self, nodes: &[String], fw_path: &str);
    fn stop(&mut self);
}

/// Firmware elector: decides which firmware and TLV files apply and records
/// flash/customization outcomes.
pub trait FwElector {
    fn fw_path(&self) -> String;
    /// TLV files to apply after boot; empty means no customization round.
    fn tlv_list(&self) -> Vec<String>;
    fn notify_fw_flashed(&mut self, success: bool);
    fn notify_tlv_applied(&mut self, success: bool);
}

/// Escalation recovery ladder.
pub trait Escalation {
    /// Next recovery step for a misbehaving modem.
    fn next_step(&mut self, now_ms: u64) -> RecoveryStep;
    /// Forces the ladder to its platform-reboot tier (used when the modem
    /// is unresponsive) and returns the resulting step.
    fn last_step(&mut self, now_ms: u64) -> RecoveryStep;
}

/// Host property store: two small key/value pairs persisted across daemon
/// restarts, namespaced by instance id.
pub trait PropertyStore {
    fn get(&self, key: &str) -> Option<String>;
    fn set(&mut self, key: &str, value: &str);
}

/// Coarse platform notifications published through the host bridge.
pub trait PlatformNotifier {
    fn broadcast_intent(&mut self, name: &str, params: &[IntentParam]);
    fn start_service(&mut self, package: &str, class: &str);
    /// Requests a platform reboot. Implementations retry until the request
    /// is accepted by the host.
    fn request_reboot(&mut self);
}

/// Multi-voter keep-awake vote.
pub trait WakeLock {
    fn acquire(&self, module: WakeModule);
    fn release(&self, module: WakeModule);
    fn is_held_by(&self, module: WakeModule) -> bool;
    fn is_held(&self) -> bool;
}

/// Watchdog feed used by the control engine around its non-stable states.
pub trait WatchdogFeed {
    fn arm(&mut self, timeout_ms: u64);
    fn disarm(&mut self);
}

/// CTRL -> CLA notifications. Implementations enqueue; the client
/// abstraction consumes on its own thread.
pub trait ClientNotifier {
    /// Pass-through event forwarded to registered clients.
    fn notify_client(&mut self, event: ClientEvent, debug: Option<DbgInfo>);
    /// New modem state to multiplex to clients.
    fn notify_modem_state(&mut self, state: ModemState);
    /// Completion of the client request currently driven by CTRL.
    fn notify_operation_result(&mut self, success: bool);
}

/// CLA -> CTRL requests. Implementations enqueue; the control engine
/// consumes on its own thread.
pub trait ModemControl {
    fn start(&mut self);
    fn stop(&mut self);
    fn restart(&mut self, kind: RestartKind, debug: Option<DbgInfo>);
}
