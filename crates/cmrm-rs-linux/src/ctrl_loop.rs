// crates/cmrm-rs-linux/src/ctrl_loop.rs

//! Control thread.
//!
//! One mailbox carries everything that can reach the control engine:
//! requests from the client abstraction, HAL events, worker completions,
//! and watchdog pings. The loop drains it with a timeout matching the
//! engine's next deadline and answers pings inline, which is exactly what
//! the watchdog supervises.

use crate::now_ms;
use crate::watchdog::WatchdogMsg;
use cmrm_rs::hal::ModemControl;
use cmrm_rs::{ControlEngine, CtrlRequest, DbgInfo, HalEvent, RestartKind, WorkerEvent};
use crossbeam_channel::{Receiver, RecvTimeoutError, Sender};
use std::thread::JoinHandle;
use std::time::Duration;

#[derive(Debug)]
pub enum CtrlInput {
    Request(CtrlRequest),
    Hal(HalEvent),
    Worker(WorkerEvent),
    Ping(i32),
    Quit,
}

/// Enqueuing front-end of the control loop. Clones freely.
#[derive(Clone)]
pub struct CtrlHandle(Sender<CtrlInput>);

impl CtrlHandle {
    pub fn new(tx: Sender<CtrlInput>) -> Self {
        Self(tx)
    }

    pub fn hal_event(&self, event: HalEvent) {
        let _ = self.0.send(CtrlInput::Hal(event));
    }

    pub fn worker_event(&self, event: WorkerEvent) {
        let _ = self.0.send(CtrlInput::Worker(event));
    }

    /// Watchdog ping, answered inline by the control loop.
    pub fn ping(&self, id: i32) {
        let _ = self.0.send(CtrlInput::Ping(id));
    }

    pub fn quit(&self) {
        let _ = self.0.send(CtrlInput::Quit);
    }
}

impl ModemControl for CtrlHandle {
    fn start(&mut self) {
        let _ = self.0.send(CtrlInput::Request(CtrlRequest::Start));
    }

    fn stop(&mut self) {
        let _ = self.0.send(CtrlInput::Request(CtrlRequest::Stop));
    }

    fn restart(&mut self, kind: RestartKind, debug: Option<DbgInfo>) {
        let _ = self.0.send(CtrlInput::Request(CtrlRequest::Restart { kind, debug }));
    }
}

pub fn run(mut engine: ControlEngine, rx: Receiver<CtrlInput>, watchdog: Sender<WatchdogMsg>) {
    // The watchdog keeps the engine from sitting in Initial forever.
    engine.start_supervision();

    loop {
        let input = match engine.next_deadline() {
            Some(deadline) => {
                let timeout = deadline.saturating_sub(now_ms());
                rx.recv_timeout(Duration::from_millis(timeout))
            }
            None => rx.recv().map_err(|_| RecvTimeoutError::Disconnected),
        };

        match input {
            Ok(CtrlInput::Request(request)) => engine.request(request, now_ms()),
            Ok(CtrlInput::Hal(event)) => engine.hal_event(event, now_ms()),
            Ok(CtrlInput::Worker(event)) => engine.worker_event(event, now_ms()),
            Ok(CtrlInput::Ping(id)) => {
                let _ = watchdog.send(WatchdogMsg::Pong { id });
            }
            Ok(CtrlInput::Quit) | Err(RecvTimeoutError::Disconnected) => break,
            Err(RecvTimeoutError::Timeout) => engine.tick(now_ms()),
        }
    }
}

pub fn spawn(
    engine: ControlEngine,
    rx: Receiver<CtrlInput>,
    watchdog: Sender<WatchdogMsg>,
) -> JoinHandle<()> {
    std::thread::Builder::new()
        .name("cmrm-ctrl".to_string())
        .spawn(move || run(engine, rx, watchdog))
        .expect("cannot spawn the control thread")
}
