// crates/cmrm-rs-linux/src/wakelock.rs

//! Wakelock arbiter.
//!
//! Reference-counted keep-awake votes per module, aggregated into a single
//! external acquire/release edge. A worker thread forwards the aggregate
//! to the host through the notification bridge: the external vote follows
//! the committed-vs-desired comparison, so rapid internal churn collapses
//! into at most one bridge message per edge. A bridge disconnect
//! implicitly releases the external vote; the worker reconnects every
//! [`BRIDGE_RECONNECT_MS`] until the bridge is back.

use crate::bridge::client::BridgeClient;
use cmrm_rs::hal::WakeLock;
use cmrm_rs::types::{WakeModule, BRIDGE_RECONNECT_MS};
use crossbeam_channel::{Receiver, RecvTimeoutError, Sender};
use log::debug;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use std::thread::JoinHandle;
use std::time::Duration;

enum WakeCmd {
    Update,
    Quit,
}

struct Inner {
    counts: Mutex<[u32; WakeModule::COUNT]>,
    tx: Sender<WakeCmd>,
}

/// Clonable voting handle. All clones share the same counters and worker.
#[derive(Clone)]
pub struct WakeHandle(Arc<Inner>);

impl WakeHandle {
    /// Spawns the arbiter and its bridge-forwarding worker.
    pub fn spawn(bridge_socket: &Path) -> (Self, JoinHandle<()>) {
        let (tx, rx) = crossbeam_channel::unbounded();
        let inner = Arc::new(Inner {
            counts: Mutex::new([0; WakeModule::COUNT]),
            tx,
        });

        let worker_inner = Arc::clone(&inner);
        let path = bridge_socket.to_path_buf();
        let handle = std::thread::Builder::new()
            .name("cmrm-wakelock".to_string())
            .spawn(move || wakelock_loop(worker_inner, rx, path))
            .expect("cannot spawn the wakelock thread");

        (Self(inner), handle)
    }

    /// Asks the worker to exit once pending updates are flushed.
    pub fn shutdown(&self) {
        let _ = self.0.tx.send(WakeCmd::Quit);
    }
}

impl WakeLock for WakeHandle {
    fn acquire(&self, module: WakeModule) {
        self.0.counts.lock().unwrap()[module as usize] += 1;
        let _ = self.0.tx.send(WakeCmd::Update);
    }

    fn release(&self, module: WakeModule) {
        {
            let mut counts = self.0.counts.lock().unwrap();
            if counts[module as usize] > 0 {
                counts[module as usize] -= 1;
            }
        }
        let _ = self.0.tx.send(WakeCmd::Update);
    }

    fn is_held_by(&self, module: WakeModule) -> bool {
        self.0.counts.lock().unwrap()[module as usize] > 0
    }

    fn is_held(&self) -> bool {
        self.0.counts.lock().unwrap().iter().any(|count| *count > 0)
    }
}

fn wakelock_loop(inner: Arc<Inner>, rx: Receiver<WakeCmd>, path: PathBuf) {
    let held = |inner: &Inner| inner.counts.lock().unwrap().iter().any(|c| *c > 0);

    let mut client: Option<BridgeClient> = None;
    let mut committed = false;
    let mut update = true;

    loop {
        if client.is_none() {
            if let Ok(connected) = BridgeClient::connect(&path) {
                client = Some(connected);
                // The bridge counts votes per connection: a fresh one
                // holds nothing yet.
                committed = false;
                update = true;
            }
        }

        if update {
            update = false;
            let mut lost = false;
            if let Some(conn) = client.as_mut() {
                let desired = held(&inner);
                if desired != committed {
                    match conn.wakelock(desired) {
                        Ok(()) => {
                            debug!("[WAKELOCK] {}", if desired { "acquired" } else { "released" });
                            committed = desired;
                        }
                        Err(_) => lost = true,
                    }
                }
            }
            if lost {
                client = None;
                committed = false;
            }
        }

        let timeout = if client.is_some() {
            Duration::from_secs(60)
        } else {
            Duration::from_millis(BRIDGE_RECONNECT_MS)
        };
        match rx.recv_timeout(timeout) {
            Ok(WakeCmd::Update) => update = true,
            Ok(WakeCmd::Quit) | Err(RecvTimeoutError::Disconnected) => break,
            Err(RecvTimeoutError::Timeout) => {}
        }
    }

    if committed {
        debug!("[WAKELOCK] released");
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn detached() -> (WakeHandle, JoinHandle<()>) {
        // No bridge behind this path: the worker idles on reconnects.
        let dir = tempfile::tempdir().unwrap();
        WakeHandle::spawn(&dir.path().join("no-bridge.sock"))
    }

    #[test]
    fn aggregate_follows_any_positive_count() {
        let (wakelock, worker) = detached();

        assert!(!wakelock.is_held());
        wakelock.acquire(WakeModule::Cla);
        wakelock.acquire(WakeModule::WatchdogPing);
        assert!(wakelock.is_held());
        assert!(wakelock.is_held_by(WakeModule::Cla));
        assert!(!wakelock.is_held_by(WakeModule::WatchdogRequest));

        wakelock.release(WakeModule::Cla);
        assert!(!wakelock.is_held_by(WakeModule::Cla));
        assert!(wakelock.is_held());
        wakelock.release(WakeModule::WatchdogPing);
        assert!(!wakelock.is_held());

        wakelock.shutdown();
        worker.join().unwrap();
    }

    #[test]
    fn votes_are_counted_per_module() {
        let (wakelock, worker) = detached();

        wakelock.acquire(WakeModule::Cla);
        wakelock.acquire(WakeModule::Cla);
        wakelock.release(WakeModule::Cla);
        assert!(wakelock.is_held_by(WakeModule::Cla));
        wakelock.release(WakeModule::Cla);
        assert!(!wakelock.is_held_by(WakeModule::Cla));

        wakelock.shutdown();
        worker.join().unwrap();
    }

    #[test]
    fn release_without_acquire_does_not_underflow() {
        let (wakelock, worker) = detached();

        wakelock.release(WakeModule::Cla);
        assert!(!wakelock.is_held_by(WakeModule::Cla));
        wakelock.acquire(WakeModule::Cla);
        assert!(wakelock.is_held_by(WakeModule::Cla));

        wakelock.shutdown();
        worker.join().unwrap();
    }
}
