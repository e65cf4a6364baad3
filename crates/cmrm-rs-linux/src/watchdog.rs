// crates/cmrm-rs-linux/src/watchdog.rs

//! Watchdog worker.
//!
//! Two independent timers on one thread:
//!
//! - a request timer armed by the control engine around its non-stable
//!   states (re-arming with a new id overwrites, `Stop` with a stale id is
//!   ignored);
//! - a periodic ping of the supervised control loop, which must answer
//!   with a `Pong` carrying the ping id within [`MAX_PING_ELAPSED_MS`].
//!
//! Either timer expiring means the control thread wedged; the daemon
//! aborts. The watchdog holds its own wakelock vote whenever a timer is
//! armed or a pong is outstanding, so the platform cannot sleep under a
//! supervised operation.

use cmrm_rs::hal::{WakeLock, WatchdogFeed};
use cmrm_rs::types::{WakeModule, MAX_PING_ELAPSED_MS};
use crossbeam_channel::{Receiver, RecvTimeoutError, Sender};
use log::{debug, error};
use std::thread::JoinHandle;
use std::time::{Duration, Instant};

pub const MAX_REQ_ID: i32 = i32::MAX;

/// Next timer id in sequence, wrapping at [`MAX_REQ_ID`].
pub fn next_id(id: i32) -> i32 {
    if id < MAX_REQ_ID { id + 1 } else { 0 }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WatchdogMsg {
    /// Arms (or overwrites) the request timer.
    Start { id: i32, timeout_ms: u64 },
    /// Disarms the request timer. Ignored if `id` is stale.
    Stop { id: i32 },
    /// Answer of the supervised consumer to a ping.
    Pong { id: i32 },
    Quit,
}

struct Timer {
    id: i32,
    armed: bool,
    deadline: Instant,
    waiting_pong: bool,
}

pub struct Watchdog {
    tx: Sender<WatchdogMsg>,
    handle: Option<JoinHandle<()>>,
}

impl Watchdog {
    /// Spawns the watchdog. `ping` is invoked on the watchdog thread to
    /// deliver a ping to the supervised consumer, which answers through
    /// [`Watchdog::sender`].
    pub fn spawn<W, P>(ping_period_ms: u64, wakelock: W, ping: P) -> Self
    where
        W: WakeLock + Send + 'static,
        P: Fn(i32) + Send + 'static,
    {
        Self::spawn_with_expiry(ping_period_ms, wakelock, ping, |what| {
            error!("watchdog expiration: {}", what);
            std::process::abort();
        })
    }

    /// Same as [`Watchdog::spawn`] with a custom expiration handler.
    pub fn spawn_with_expiry<W, P, E>(
        ping_period_ms: u64,
        wakelock: W,
        ping: P,
        expired: E,
    ) -> Self
    where
        W: WakeLock + Send + 'static,
        P: Fn(i32) + Send + 'static,
        E: Fn(&str) + Send + 'static,
    {
        assert!(ping_period_ms > 0);
        let (tx, rx) = crossbeam_channel::unbounded();
        let handle = std::thread::Builder::new()
            .name("cmrm-watchdog".to_string())
            .spawn(move || watchdog_loop(rx, ping_period_ms, wakelock, ping, expired))
            .expect("cannot spawn the watchdog thread");
        Self { tx, handle: Some(handle) }
    }

    pub fn sender(&self) -> Sender<WatchdogMsg> {
        self.tx.clone()
    }

    pub fn stop(mut self) {
        let _ = self.tx.send(WatchdogMsg::Quit);
        if let Some(handle) = self.handle.take() {
            let _ = handle.join();
        }
    }
}

fn watchdog_loop<W, P, E>(
    rx: Receiver<WatchdogMsg>,
    ping_period_ms: u64,
    wakelock: W,
    ping: P,
    expired: E,
) where
    W: WakeLock,
    P: Fn(i32),
    E: Fn(&str),
{
    let mut ping_timer = Timer {
        id: -1,
        armed: true,
        deadline: Instant::now() + Duration::from_millis(ping_period_ms),
        waiting_pong: false,
    };
    let mut req_timer = Timer {
        id: -1,
        armed: false,
        deadline: Instant::now(),
        waiting_pong: false,
    };

    loop {
        let now = Instant::now();
        // The ping timer is always armed; the request timer only when the
        // control engine is mid-operation.
        let mut deadline = ping_timer.deadline;
        if req_timer.armed {
            deadline = deadline.min(req_timer.deadline);
        }

        match rx.recv_timeout(deadline.saturating_duration_since(now)) {
            Ok(WatchdogMsg::Start { id, timeout_ms }) => {
                // A pending request is simply overwritten by the new one.
                if req_timer.id < MAX_REQ_ID {
                    assert_eq!(id, next_id(req_timer.id));
                }

                let held = wakelock.is_held_by(WakeModule::WatchdogRequest);
                assert_eq!(req_timer.armed, held);
                if !held {
                    wakelock.acquire(WakeModule::WatchdogRequest);
                }

                req_timer.id = id;
                req_timer.armed = true;
                req_timer.deadline = Instant::now() + Duration::from_millis(timeout_ms);
                debug!("watchdog armed, id: {}", id);
            }
            Ok(WatchdogMsg::Stop { id }) => {
                assert!(req_timer.armed);
                if req_timer.id != id {
                    continue;
                }
                wakelock.release(WakeModule::WatchdogRequest);
                req_timer.armed = false;
                debug!("watchdog disarmed, id: {}", id);
            }
            Ok(WatchdogMsg::Pong { id }) => {
                assert!(ping_timer.waiting_pong);
                assert_eq!(ping_timer.id, id);
                wakelock.release(WakeModule::WatchdogPing);
                ping_timer.waiting_pong = false;
                ping_timer.deadline = Instant::now() + Duration::from_millis(ping_period_ms);
            }
            Ok(WatchdogMsg::Quit) => break,
            Err(RecvTimeoutError::Disconnected) => break,
            Err(RecvTimeoutError::Timeout) => {
                let now = Instant::now();
                if req_timer.armed && now >= req_timer.deadline {
                    wakelock.release(WakeModule::WatchdogRequest);
                    req_timer.armed = false;
                    expired("answer not received");
                } else if now >= ping_timer.deadline {
                    if ping_timer.waiting_pong {
                        wakelock.release(WakeModule::WatchdogPing);
                        ping_timer.waiting_pong = false;
                        ping_timer.deadline = now + Duration::from_millis(ping_period_ms);
                        expired("PONG not received");
                    } else {
                        wakelock.acquire(WakeModule::WatchdogPing);
                        ping_timer.id = next_id(ping_timer.id);
                        ping_timer.waiting_pong = true;
                        ping_timer.deadline = now + Duration::from_millis(MAX_PING_ELAPSED_MS);
                        ping(ping_timer.id);
                    }
                }
            }
        }
    }
}

/// Request-timer front-end for the control engine: hands out sequential
/// ids and addresses the stop at the last armed one.
pub struct WatchdogHandle {
    tx: Sender<WatchdogMsg>,
    last_id: i32,
}

impl WatchdogHandle {
    pub fn new(tx: Sender<WatchdogMsg>) -> Self {
        Self { tx, last_id: -1 }
    }
}

impl WatchdogFeed for WatchdogHandle {
    fn arm(&mut self, timeout_ms: u64) {
        self.last_id = next_id(self.last_id);
        let _ = self.tx.send(WatchdogMsg::Start { id: self.last_id, timeout_ms });
    }

    fn disarm(&mut self) {
        let _ = self.tx.send(WatchdogMsg::Stop { id: self.last_id });
    }
}
