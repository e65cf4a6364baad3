// crates/cmrm-rs-linux/src/bootstrap.rs

//! Daemon assembly.
//!
//! Wires the property store, wakelock arbiter, watchdog, modem plugins,
//! and the two engine threads together. The simulated plugin set stands
//! in for the hardware-adjacent collaborators; a production build swaps
//! [`sim`] for its platform plugins here.

use crate::bridge::BridgeNotifier;
use crate::cla_loop::ClaLoop;
use crate::config::DaemonConfig;
use crate::ctrl_loop::{self, CtrlHandle, CtrlInput};
use crate::properties::FileProperties;
use crate::sim::{self, SimConfig};
use crate::wakelock::WakeHandle;
use crate::watchdog::{Watchdog, WatchdogHandle};
use crate::now_ms;
use cmrm_rs::cla::ClaConfig;
use cmrm_rs::hal::{PropertyStore, WakeLock};
use cmrm_rs::{ControlEngine, CtrlPlugins, EscalationConfig, EscalationLadder};
use log::info;
use std::io;
use std::thread::JoinHandle;

/// A running daemon instance.
pub struct Daemon {
    pub ctrl: CtrlHandle,
    cla: crate::cla_loop::ClaHandle,
    wakelock: WakeHandle,
    watchdog: Option<Watchdog>,
    threads: Vec<JoinHandle<()>>,
}

pub fn start(config: &DaemonConfig) -> io::Result<Daemon> {
    let properties = FileProperties::open(&config.properties_path, config.instance_id);

    // The persisted flag wins over the configuration file, so a device can
    // be flipped into sanity mode without rewriting its config.
    let sanity_mode = properties
        .get(cmrm_rs::keys::SANITY_MODE)
        .map(|value| value == "true")
        .unwrap_or(config.sanity_mode);

    info!(
        "starting resource manager instance {} ({} mode)",
        config.instance_id,
        if sanity_mode { "sanity" } else { "normal" }
    );

    let (wakelock, wakelock_thread) = WakeHandle::spawn(&config.bridge_socket);

    let escalation_config = EscalationConfig {
        warm_reset: config.escalation.warm_reset,
        cold_reset: config.escalation.cold_reset,
        reboot: config.escalation.reboot,
        stability_timeout_ms: if sanity_mode {
            config.escalation.timeout_sanity_ms
        } else {
            config.escalation.timeout_ms
        },
    };
    let escalation = EscalationLadder::new(escalation_config, Box::new(properties), now_ms());

    let (ctrl_tx, ctrl_rx) = crossbeam_channel::unbounded::<CtrlInput>();
    let ctrl = CtrlHandle::new(ctrl_tx);

    let (cla_loop, cla) = ClaLoop::build(
        &config.cla_socket,
        Box::new(ctrl.clone()),
        Box::new(wakelock.clone()),
        ClaConfig { sanity_mode, enable_fmmo: config.cla.enable_fmmo },
    )?;

    let ping_ctrl = ctrl.clone();
    let watchdog = Watchdog::spawn(config.ping_period_ms, wakelock.clone(), move |id| {
        ping_ctrl.ping(id);
    });

    let sim_config = SimConfig { fw_path: config.fw_path.clone(), ..SimConfig::default() };
    let modem = sim::SimModem::new(ctrl.clone(), &sim_config);
    modem.announce();

    let plugins = CtrlPlugins {
        hal: Box::new(modem),
        upload: Box::new(sim::SimUpload::new(ctrl.clone())),
        customization: Box::new(sim::SimCustomization::new(ctrl.clone())),
        dump: Box::new(sim::SimDump::new(ctrl.clone())),
        elector: Box::new(sim::SimElector::new(&sim_config)),
        escalation: Box::new(escalation),
        clients: Box::new(cla.clone()),
        notifier: Box::new(BridgeNotifier::new(&config.bridge_socket)),
        watchdog: Box::new(WatchdogHandle::new(watchdog.sender())),
    };
    let engine = ControlEngine::new(plugins, config.instance_id, config.watchdog_timeout_ms);

    let ctrl_thread = ctrl_loop::spawn(engine, ctrl_rx, watchdog.sender());
    let cla_thread = cla_loop.spawn();

    Ok(Daemon {
        ctrl,
        cla,
        wakelock,
        watchdog: Some(watchdog),
        threads: vec![wakelock_thread, ctrl_thread, cla_thread],
    })
}

impl Daemon {
    /// Stops every thread and joins them.
    pub fn stop(mut self) {
        self.cla.quit();
        self.ctrl.quit();
        if let Some(watchdog) = self.watchdog.take() {
            watchdog.stop();
        }
        self.wakelock.shutdown();
        for thread in self.threads.drain(..) {
            let _ = thread.join();
        }
    }

    /// Blocks until every daemon thread exits.
    pub fn wait(mut self) {
        for thread in self.threads.drain(..) {
            let _ = thread.join();
        }
    }

    pub fn wakelock(&self) -> &dyn WakeLock {
        &self.wakelock
    }
}
