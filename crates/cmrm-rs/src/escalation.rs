// crates/cmrm-rs/src/escalation.rs

//! Escalation recovery ladder.
//!
//! Each call to [`Escalation::next_step`] consumes one attempt of the
//! current tier (warm resets, then cold resets, then platform reboots,
//! then out-of-service). A stability window arms on every call: when it
//! expires before the next call, the modem is deemed healthy and the
//! ladder drops back to its lowest tier. The reboot tier is counted in a
//! persisted property so a crash during the reboot itself does not reset
//! the ladder.

use crate::hal::{Escalation, PropertyStore};
use crate::keys;
use crate::types::RecoveryStep;
use alloc::boxed::Box;
use alloc::format;
use log::{debug, info, warn};

const IDX_WARM: usize = 0;
const IDX_COLD: usize = 1;
const IDX_REBOOT: usize = 2;
const IDX_OOS: usize = 3;

/// Tier sizes and stability window of the ladder.
#[derive(Debug, Clone, Copy)]
pub struct EscalationConfig {
    pub warm_reset: i32,
    pub cold_reset: i32,
    pub reboot: i32,
    pub stability_timeout_ms: u64,
}

pub struct EscalationLadder {
    cfg: [i32; 4],
    stability_timeout_ms: u64,
    store: Box<dyn PropertyStore + Send>,

    idx: usize,
    counter: i32,
    deadline_ms: u64,
    disabled: bool,
}

impl EscalationLadder {
    pub fn new(
        config: EscalationConfig,
        store: Box<dyn PropertyStore + Send>,
        now_ms: u64,
    ) -> Self {
        assert!(config.warm_reset >= 0 && config.cold_reset >= 0 && config.reboot >= 0);

        let disabled = store
            .get(keys::DBG_DISABLE_ESCALATION)
            .map(|v| v == "true")
            .unwrap_or(false);

        let mut ladder = Self {
            cfg: [config.warm_reset, config.cold_reset, config.reboot, 0],
            stability_timeout_ms: config.stability_timeout_ms,
            store,
            idx: IDX_WARM,
            counter: config.warm_reset,
            deadline_ms: now_ms + config.stability_timeout_ms,
            disabled,
        };

        if ladder.disabled {
            info!("escalation disabled, every request recovers with a cold reset");
        } else if ladder.counter <= 0 {
            ladder.go_next_step();
        }
        ladder
    }

    fn go_next_step(&mut self) {
        loop {
            self.idx += 1;
            assert!(self.idx <= IDX_OOS, "invalid escalation level reached");
            if self.cfg[self.idx] > 0 || self.idx == IDX_OOS {
                break;
            }
        }
        self.counter = self.cfg[self.idx];
    }

    fn persisted_reboot_count(&self) -> i32 {
        self.store
            .get(keys::REBOOT_COUNTER)
            .and_then(|v| v.parse().ok())
            .unwrap_or(0)
    }

    fn update_reboot_counter(&mut self) {
        let count = self.persisted_reboot_count();
        if count >= self.cfg[IDX_REBOOT] {
            warn!("modem OUT OF SERVICE state reached");
            self.idx = IDX_OOS;
        } else {
            self.store.set(keys::REBOOT_COUNTER, &format!("{}", count + 1));
        }
    }

    fn step(&self) -> RecoveryStep {
        match self.idx {
            // No dedicated warm-reset path exists: the warm tier recovers
            // with a cold reset.
            IDX_WARM | IDX_COLD => RecoveryStep::ColdReset,
            IDX_REBOOT => RecoveryStep::PlatformReboot,
            IDX_OOS => RecoveryStep::OutOfService,
            _ => unreachable!(),
        }
    }
}

impl Escalation for EscalationLadder {
    fn next_step(&mut self, now_ms: u64) -> RecoveryStep {
        if self.disabled {
            debug!("->next_step() level: {}", RecoveryStep::ColdReset);
            return RecoveryStep::ColdReset;
        }

        if self.idx != IDX_OOS {
            if now_ms >= self.deadline_ms {
                debug!(
                    "escalation recovery reset, modem was stable during at least {} ms",
                    self.stability_timeout_ms
                );
                self.idx = IDX_WARM;
                self.counter = self.cfg[self.idx];
                self.store.set(keys::REBOOT_COUNTER, "0");
            }

            if self.counter <= 0 {
                self.go_next_step();
            }

            if self.idx != IDX_REBOOT {
                self.counter -= 1;
            } else {
                self.update_reboot_counter();
            }

            self.deadline_ms = now_ms + self.stability_timeout_ms;
        }

        if self.idx != IDX_OOS {
            debug!("->next_step() level: {}, remaining: {}", self.step(), self.counter);
        } else {
            debug!("->next_step() level: {}", self.step());
        }
        self.step()
    }

    fn last_step(&mut self, _now_ms: u64) -> RecoveryStep {
        self.idx = IDX_REBOOT;
        self.update_reboot_counter();
        debug!("->last_step() level: {}", self.step());
        self.step()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use alloc::collections::BTreeMap;
    use alloc::rc::Rc;
    use alloc::string::String;
    use core::cell::RefCell;

    #[derive(Clone, Default)]
    struct MemStore(Rc<RefCell<BTreeMap<String, String>>>);

    // Test-only store, never crosses threads.
    unsafe impl Send for MemStore {}

    impl PropertyStore for MemStore {
        fn get(&self, key: &str) -> Option<String> {
            self.0.borrow().get(key).cloned()
        }

        fn set(&mut self, key: &str, value: &str) {
            self.0.borrow_mut().insert(String::from(key), String::from(value));
        }
    }

    fn config() -> EscalationConfig {
        EscalationConfig {
            warm_reset: 1,
            cold_reset: 2,
            reboot: 2,
            stability_timeout_ms: 50,
        }
    }

    #[test]
    fn ladder_walks_cold_cold_cold_reboot_reboot_oos() {
        let store = MemStore::default();
        let mut ladder = EscalationLadder::new(config(), Box::new(store.clone()), 0);

        let expected = [
            RecoveryStep::ColdReset,
            RecoveryStep::ColdReset,
            RecoveryStep::ColdReset,
            RecoveryStep::PlatformReboot,
            RecoveryStep::PlatformReboot,
            RecoveryStep::OutOfService,
        ];
        for (i, want) in expected.iter().enumerate() {
            // Never let the stability window expire.
            assert_eq!(ladder.next_step(i as u64), *want, "call {}", i + 1);
            if i == 4 {
                assert_eq!(store.get(keys::REBOOT_COUNTER).as_deref(), Some("2"));
            }
        }
        // OOS is terminal.
        assert_eq!(ladder.next_step(6), RecoveryStep::OutOfService);
    }

    #[test]
    fn stability_window_resets_the_ladder() {
        let store = MemStore::default();
        let mut ladder = EscalationLadder::new(config(), Box::new(store.clone()), 0);

        assert_eq!(ladder.next_step(10), RecoveryStep::ColdReset);
        assert_eq!(ladder.next_step(20), RecoveryStep::ColdReset);
        // Quiet for longer than the stability window: back to the lowest
        // tier, persisted counter cleared.
        assert_eq!(ladder.next_step(20 + 60), RecoveryStep::ColdReset);
        assert_eq!(store.get(keys::REBOOT_COUNTER).as_deref(), Some("0"));
        assert_eq!(ladder.next_step(90), RecoveryStep::ColdReset);
        assert_eq!(ladder.next_step(100), RecoveryStep::ColdReset);
        assert_eq!(ladder.next_step(110), RecoveryStep::PlatformReboot);
    }

    #[test]
    fn persisted_reboot_count_survives_a_restart() {
        let mut store = MemStore::default();
        store.set(keys::REBOOT_COUNTER, "2");
        let mut ladder = EscalationLadder::new(config(), Box::new(store), 0);

        // warm + cold tiers first, then the reboot tier finds the budget
        // already exhausted.
        assert_eq!(ladder.next_step(1), RecoveryStep::ColdReset);
        assert_eq!(ladder.next_step(2), RecoveryStep::ColdReset);
        assert_eq!(ladder.next_step(3), RecoveryStep::ColdReset);
        assert_eq!(ladder.next_step(4), RecoveryStep::OutOfService);
    }

    #[test]
    fn last_step_forces_the_reboot_tier() {
        let store = MemStore::default();
        let mut ladder = EscalationLadder::new(config(), Box::new(store.clone()), 0);

        assert_eq!(ladder.last_step(0), RecoveryStep::PlatformReboot);
        assert_eq!(store.get(keys::REBOOT_COUNTER).as_deref(), Some("1"));
        assert_eq!(ladder.last_step(0), RecoveryStep::PlatformReboot);
        // Budget of 2 exhausted: the forced step degrades to out of service.
        assert_eq!(ladder.last_step(0), RecoveryStep::OutOfService);
    }

    #[test]
    fn empty_warm_tier_is_skipped() {
        let store = MemStore::default();
        let cfg = EscalationConfig { warm_reset: 0, cold_reset: 1, ..config() };
        let mut ladder = EscalationLadder::new(cfg, Box::new(store), 0);

        assert_eq!(ladder.next_step(1), RecoveryStep::ColdReset);
        assert_eq!(ladder.next_step(2), RecoveryStep::PlatformReboot);
    }

    #[test]
    fn debug_override_always_returns_cold_reset() {
        let mut store = MemStore::default();
        store.set(keys::DBG_DISABLE_ESCALATION, "true");
        let mut ladder = EscalationLadder::new(config(), Box::new(store.clone()), 0);

        for i in 0..10 {
            assert_eq!(ladder.next_step(i), RecoveryStep::ColdReset);
        }
        assert_eq!(store.get(keys::REBOOT_COUNTER), None);
    }
}
