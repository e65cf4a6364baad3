#![cfg_attr(not(feature = "std"), no_std)]

//! Platform-agnostic core of the cellular modem resource manager.
//!
//! The two engines at the heart of the daemon live here: the client
//! abstraction ([`cla::ClientAbstraction`]) arbitrating client votes and
//! multiplexing modem state, and the control engine
//! ([`ctrl::ControlEngine`]) driving the modem lifecycle. Both are pure
//! state machines fed by their owning event loops; sockets, threads and
//! timers belong to the platform crate.

// 'alloc' is used for dynamic allocation (e.g., Vec<u8> in frames).
extern crate alloc;

// --- Foundation Modules ---
pub mod types;
pub mod error;
pub mod dbg;
pub mod fsm;

// --- Wire Formats ---
pub mod wire;

// --- Collaborator Seams ---
pub mod hal;

// --- Engines ---
pub mod cla;
pub mod ctrl;
pub mod escalation;

/// Keys of the host property store.
pub mod keys {
    /// Platform reboots performed by the escalation ladder, persisted so a
    /// crash during the reboot does not reset the ladder.
    pub const REBOOT_COUNTER: &str = "reboot_counter";
    /// Governs the registration gating (sanity vs normal mode).
    pub const SANITY_MODE: &str = "sanity_mode";
    /// Debug override: disables the ladder, every recovery is a cold reset.
    pub const DBG_DISABLE_ESCALATION: &str = "dbg_disable_escalation";
}

// --- Top-level Exports ---
pub use cla::{ClaAction, ClaConfig, ClientAbstraction, CtrlNotice};
pub use ctrl::{ControlEngine, CtrlPlugins, CtrlRequest, WorkerEvent};
pub use dbg::{DbgInfo, DbgKind};
pub use error::CmrmError;
pub use escalation::{EscalationConfig, EscalationLadder};
pub use hal::HalEvent;
pub use types::{
    ClientEvent, ClientId, EventSet, ModemState, RecoveryStep, ResetKind, RestartCause,
    RestartKind, WakeModule,
};
pub use wire::WireMsg;
