// crates/cmrm-rs-linux/src/sim.rs

//! Simulated modem plugin set.
//!
//! Stands in for the hardware-adjacent collaborators (HAL, firmware
//! upload, customization, dump, elector) by answering every command with
//! the events a healthy modem would produce, delivered through the
//! control mailbox. Used by the sanity tooling and the integration tests;
//! production deployments replace these with real plugins.

use crate::ctrl_loop::CtrlHandle;
use cmrm_rs::hal::{CoreDump, Customization, FwElector, FwUpload, ModemHal};
use cmrm_rs::{HalEvent, ResetKind, WorkerEvent};
use log::debug;
use std::sync::{Arc, Mutex};

#[derive(Debug, Clone)]
pub struct SimConfig {
    pub fw_path: String,
    pub flash_nodes: Vec<String>,
    /// TLVs reported by the elector until they are applied once.
    pub tlvs: Vec<String>,
}

impl Default for SimConfig {
    fn default() -> Self {
        Self {
            fw_path: String::from("/lib/firmware/modem/sim.fls"),
            flash_nodes: vec![String::from("/dev/sim/flash0")],
            tlvs: Vec::new(),
        }
    }
}

pub struct SimModem {
    ctrl: CtrlHandle,
    flash_nodes: Vec<String>,
}

impl SimModem {
    pub fn new(ctrl: CtrlHandle, config: &SimConfig) -> Self {
        Self { ctrl, flash_nodes: config.flash_nodes.clone() }
    }

    /// Initial probe: the simulated modem powers up off.
    pub fn announce(&self) {
        self.ctrl.hal_event(HalEvent::Off);
    }

    fn begin_flash_cycle(&self) {
        self.ctrl.hal_event(HalEvent::Busy);
        self.ctrl.hal_event(HalEvent::Flash { nodes: self.flash_nodes.clone() });
    }
}

impl ModemHal for SimModem {
    fn power_on(&mut self) {
        debug!("sim: power_on");
        self.begin_flash_cycle();
    }

    fn boot(&mut self) {
        debug!("sim: boot");
        self.ctrl.hal_event(HalEvent::Run);
    }

    fn shutdown(&mut self) {
        debug!("sim: shutdown");
        self.ctrl.hal_event(HalEvent::Off);
    }

    fn reset(&mut self, kind: ResetKind) {
        debug!("sim: reset({:?})", kind);
        self.begin_flash_cycle();
    }
}

pub struct SimUpload {
    ctrl: CtrlHandle,
}

impl SimUpload {
    pub fn new(ctrl: CtrlHandle) -> Self {
        Self { ctrl }
    }
}

impl FwUpload for SimUpload {
    fn package(&mut self, fw_path: &str) {
        debug!("sim: packaging {}", fw_path);
        self.ctrl.worker_event(WorkerEvent::FwSuccess);
    }

    fn flash(&mut self, nodes: &[String]) {
        debug!("sim: flashing through {:?}", nodes);
        self.ctrl.worker_event(WorkerEvent::FwSuccess);
    }
}

pub struct SimCustomization {
    ctrl: CtrlHandle,
}

impl SimCustomization {
    pub fn new(ctrl: CtrlHandle) -> Self {
        Self { ctrl }
    }
}

impl Customization for SimCustomization {
    fn send(&mut self, tlvs: &[String]) {
        debug!("sim: applying {} tlv(s)", tlvs.len());
        self.ctrl.worker_event(WorkerEvent::FwSuccess);
    }
}

pub struct SimDump {
    ctrl: CtrlHandle,
}

impl SimDump {
    pub fn new(ctrl: CtrlHandle) -> Self {
        Self { ctrl }
    }
}

impl CoreDump for SimDump {
    fn read(&mut self, nodes: &[String], _fw_path: &str) {
        debug!("sim: reading dump from {:?}", nodes);
        self.ctrl.worker_event(WorkerEvent::DumpSuccess);
    }

    fn stop(&mut self) {
        debug!("sim: dump stopped");
    }
}

pub struct SimElector {
    fw_path: String,
    tlvs: Arc<Mutex<Vec<String>>>,
}

impl SimElector {
    pub fn new(config: &SimConfig) -> Self {
        Self {
            fw_path: config.fw_path.clone(),
            tlvs: Arc::new(Mutex::new(config.tlvs.clone())),
        }
    }
}

impl FwElector for SimElector {
    fn fw_path(&self) -> String {
        self.fw_path.clone()
    }

    fn tlv_list(&self) -> Vec<String> {
        self.tlvs.lock().unwrap().clone()
    }

    fn notify_fw_flashed(&mut self, success: bool) {
        debug!("sim: firmware flash reported {}", success);
    }

    fn notify_tlv_applied(&mut self, success: bool) {
        debug!("sim: tlv apply reported {}", success);
        if success {
            // Applied TLVs are not offered again on the follow-up boot.
            self.tlvs.lock().unwrap().clear();
        }
    }
}
