// crates/cmrm-rs-linux/src/bridge/mod.rs

//! Host notification bridge.
//!
//! The bridge daemon ([`daemon::BridgeDaemon`], shipped as `cmrm-bridged`)
//! accepts a handful of local clients and forwards their coarse
//! notifications (wakelock votes, intents, service starts) to a single
//! host-notifier peer over an acknowledged, one-in-flight channel. The
//! client library ([`client::BridgeClient`]) is what the resource manager
//! itself uses to talk to the daemon.

pub mod client;
pub mod daemon;

/// Deadline for one blocking socket operation on the client side.
pub const SOCKET_DEADLINE_MS: u64 = 500;

/// Intent requesting a platform reboot from the host.
pub const INTENT_REBOOT: &str = "system.intent.REBOOT";

pub use client::{BridgeClient, BridgeNotifier};
pub use daemon::{BridgeDaemon, BridgePaths, ShutdownHandle};
