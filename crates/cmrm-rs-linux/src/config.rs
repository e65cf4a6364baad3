// crates/cmrm-rs-linux/src/config.rs

//! Daemon configuration, loaded from a TOML file at startup. There is no
//! hot reload: a configuration change requires a daemon restart.

use cmrm_rs::EscalationConfig;
use serde::Deserialize;
use std::fmt;
use std::fs;
use std::path::{Path, PathBuf};

#[derive(Debug)]
pub enum ConfigError {
    Io(std::io::Error),
    Parse(toml::de::Error),
}

impl fmt::Display for ConfigError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConfigError::Io(err) => write!(f, "cannot read configuration: {}", err),
            ConfigError::Parse(err) => write!(f, "invalid configuration: {}", err),
        }
    }
}

impl std::error::Error for ConfigError {}

impl From<std::io::Error> for ConfigError {
    fn from(err: std::io::Error) -> Self {
        ConfigError::Io(err)
    }
}

impl From<toml::de::Error> for ConfigError {
    fn from(err: toml::de::Error) -> Self {
        ConfigError::Parse(err)
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct DaemonConfig {
    #[serde(default)]
    pub instance_id: u32,
    /// Listening socket for modem clients.
    pub cla_socket: PathBuf,
    /// Client socket of the host notification bridge.
    pub bridge_socket: PathBuf,
    /// Backing file of the host property store.
    pub properties_path: PathBuf,
    /// Firmware image handed to the upload plugin.
    #[serde(default = "default_fw_path")]
    pub fw_path: String,
    #[serde(default)]
    pub sanity_mode: bool,
    #[serde(default = "default_watchdog_timeout_ms")]
    pub watchdog_timeout_ms: u64,
    #[serde(default = "default_ping_period_ms")]
    pub ping_period_ms: u64,
    pub escalation: EscalationSection,
    #[serde(default)]
    pub cla: ClaSection,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct EscalationSection {
    /// Warm-reset attempts; optional, the tier is skipped when zero.
    #[serde(default)]
    pub warm_reset: i32,
    pub cold_reset: i32,
    pub reboot: i32,
    pub timeout_ms: u64,
    #[serde(default = "default_sanity_timeout_ms")]
    pub timeout_sanity_ms: u64,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ClaSection {
    /// When false, the modem is treated as pre-acquired by one implicit
    /// holder.
    #[serde(default = "default_true")]
    pub enable_fmmo: bool,
}

impl Default for ClaSection {
    fn default() -> Self {
        Self { enable_fmmo: true }
    }
}

fn default_fw_path() -> String {
    String::from("/lib/firmware/modem/modem.fls")
}

fn default_watchdog_timeout_ms() -> u64 {
    300_000
}

fn default_ping_period_ms() -> u64 {
    60_000
}

fn default_sanity_timeout_ms() -> u64 {
    50
}

fn default_true() -> bool {
    true
}

impl DaemonConfig {
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let text = fs::read_to_string(path)?;
        Ok(toml::from_str(&text)?)
    }

    /// Escalation configuration for the active mode: sanity runs use the
    /// short stability window.
    pub fn escalation_config(&self) -> EscalationConfig {
        EscalationConfig {
            warm_reset: self.escalation.warm_reset,
            cold_reset: self.escalation.cold_reset,
            reboot: self.escalation.reboot,
            stability_timeout_ms: if self.sanity_mode {
                self.escalation.timeout_sanity_ms
            } else {
                self.escalation.timeout_ms
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn write_config(text: &str) -> tempfile::NamedTempFile {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(text.as_bytes()).unwrap();
        file
    }

    #[test]
    fn minimal_config_loads_with_defaults() {
        let file = write_config(
            r#"
            cla_socket = "/run/cmrm/cla.sock"
            bridge_socket = "/run/cmrm/bridge.sock"
            properties_path = "/var/lib/cmrm/props"

            [escalation]
            cold_reset = 5
            reboot = 2
            timeout_ms = 1200000
            "#,
        );
        let config = DaemonConfig::load(file.path()).unwrap();
        assert_eq!(config.instance_id, 0);
        assert!(!config.sanity_mode);
        assert!(config.cla.enable_fmmo);
        assert_eq!(config.watchdog_timeout_ms, 300_000);
        assert_eq!(config.escalation.warm_reset, 0);
        assert_eq!(config.escalation_config().stability_timeout_ms, 1_200_000);
    }

    #[test]
    fn sanity_mode_selects_the_short_stability_window() {
        let file = write_config(
            r#"
            cla_socket = "/tmp/cla.sock"
            bridge_socket = "/tmp/bridge.sock"
            properties_path = "/tmp/props"
            sanity_mode = true

            [escalation]
            cold_reset = 2
            reboot = 1
            timeout_ms = 600000
            timeout_sanity_ms = 75
            "#,
        );
        let config = DaemonConfig::load(file.path()).unwrap();
        assert_eq!(config.escalation_config().stability_timeout_ms, 75);
    }

    #[test]
    fn unknown_keys_are_rejected() {
        let file = write_config(
            r#"
            cla_socket = "/tmp/cla.sock"
            bridge_socket = "/tmp/bridge.sock"
            properties_path = "/tmp/props"
            no_such_key = 1

            [escalation]
            cold_reset = 2
            reboot = 1
            timeout_ms = 600000
            "#,
        );
        assert!(matches!(DaemonConfig::load(file.path()), Err(ConfigError::Parse(_))));
    }
}
