// crates/cmrm-rs-linux/src/lib.rs
#![cfg(target_os = "linux")]

//! Linux front-end of the cellular modem resource manager.
//!
//! Hosts the two long-lived event loops (client abstraction and control)
//! around the engines of `cmrm-rs`, the wakelock arbiter and watchdog
//! worker threads, the host notification bridge (daemon and client
//! library), and the daemon bootstrap.

pub mod bootstrap;
pub mod bridge;
pub mod cla_loop;
pub mod client;
pub mod config;
pub mod ctrl_loop;
pub mod framing;
pub mod mailbox;
pub mod properties;
pub mod sim;
pub mod wakelock;
pub mod watchdog;

use std::sync::OnceLock;
use std::time::Instant;

static EPOCH: OnceLock<Instant> = OnceLock::new();

/// Milliseconds elapsed on the process-wide monotonic clock. This is the
/// time base fed to the core engines.
pub fn now_ms() -> u64 {
    EPOCH.get_or_init(Instant::now).elapsed().as_millis() as u64
}

pub use cla_loop::{ClaHandle, ClaInput, ClaLoop};
pub use client::ModemClient;
pub use config::DaemonConfig;
pub use ctrl_loop::{CtrlHandle, CtrlInput};
pub use properties::FileProperties;
pub use wakelock::WakeHandle;
pub use watchdog::{Watchdog, WatchdogHandle};
