// crates/cmrm-rs/src/types.rs

use crate::CmrmError;
use core::fmt;

/// Maximum number of clients the client abstraction accepts.
pub const MAX_CLIENTS: usize = 16;
/// Maximum number of clients the host notification bridge accepts.
pub const BRIDGE_MAX_CLIENTS: usize = 3;
/// Maximum size of a serialized frame (header included). Anything larger
/// disconnects the peer.
pub const MAX_FRAME_SIZE: usize = 2048;
/// Maximum length of a client name, in bytes.
pub const NAME_MAX: usize = 64;

/// Maximum time the client abstraction waits for all clients to acknowledge
/// a cold reset or a shutdown, in milliseconds.
pub const ACK_TIMEOUT_MS: u64 = 1000;
/// Wakelock hold at daemon boot, giving clients time to connect.
pub const BOOT_WINDOW_MS: u64 = 2000;
/// The time the control engine waits for a HAL reset before acting on a
/// client reset request received in the `Up` state.
pub const RESET_LATENCY_MS: u64 = 100;

/// Maximum time allowed to drain one message from a client socket.
pub const CLIENT_MSG_DEADLINE_MS: u64 = 500;
/// Maximum time allowed to write one message to the host notifier.
pub const NOTIFIER_MSG_DEADLINE_MS: u64 = 1000;
/// Maximum time the bridge waits for the host notifier to ack a message.
pub const NOTIFIER_ACK_DEADLINE_MS: u64 = 5000;
/// Send attempts for a queued bridge message before it is dropped.
pub const BRIDGE_MAX_RETRIES: u32 = 3;
/// Reconnection period while the host notifier socket is down.
pub const BRIDGE_RECONNECT_MS: u64 = 500;

/// Maximum time between a watchdog PING and the supervised thread's PONG.
pub const MAX_PING_ELAPSED_MS: u64 = 10_000;

/// Modem state as reported by the control engine to the client abstraction.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ModemState {
    /// Modem state is not known yet (daemon start).
    Unknown,
    /// Modem is unavailable, a client needs to acquire it.
    Off,
    /// Modem is unavailable and is being recovered.
    Busy,
    /// Modem is available for clients to use.
    Ready,
    /// Modem is unresponsive and unrecoverable.
    Unresponsive,
    /// Modem is unresponsive and a platform reboot was initiated.
    PlatformReboot,
}

impl fmt::Display for ModemState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let txt = match self {
            ModemState::Unknown => "UNKNOWN",
            ModemState::Off => "OFF",
            ModemState::Busy => "BUSY",
            ModemState::Ready => "READY",
            ModemState::Unresponsive => "UNRESPONSIVE",
            ModemState::PlatformReboot => "PLATFORM_REBOOT",
        };
        write!(f, "{}", txt)
    }
}

/// Events forwarded to clients. The discriminants are the wire kind ids and
/// the bit positions of the registration bitmap.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u32)]
pub enum ClientEvent {
    MdmDown = 0,
    MdmOn = 1,
    MdmUp = 2,
    MdmOos = 3,
    MdmColdReset = 4,
    MdmShutdown = 5,
    MdmDbgInfo = 6,
}

impl ClientEvent {
    pub const COUNT: u32 = 7;

    pub fn name(self) -> &'static str {
        match self {
            ClientEvent::MdmDown => "MDM_DOWN",
            ClientEvent::MdmOn => "MDM_ON",
            ClientEvent::MdmUp => "MDM_UP",
            ClientEvent::MdmOos => "MDM_OOS",
            ClientEvent::MdmColdReset => "MDM_COLD_RESET",
            ClientEvent::MdmShutdown => "MDM_SHUTDOWN",
            ClientEvent::MdmDbgInfo => "MDM_DBG_INFO",
        }
    }
}

impl TryFrom<u32> for ClientEvent {
    type Error = CmrmError;

    fn try_from(value: u32) -> Result<Self, CmrmError> {
        match value {
            0 => Ok(ClientEvent::MdmDown),
            1 => Ok(ClientEvent::MdmOn),
            2 => Ok(ClientEvent::MdmUp),
            3 => Ok(ClientEvent::MdmOos),
            4 => Ok(ClientEvent::MdmColdReset),
            5 => Ok(ClientEvent::MdmShutdown),
            6 => Ok(ClientEvent::MdmDbgInfo),
            v => Err(CmrmError::InvalidEvent(v)),
        }
    }
}

/// Set of client events a client registered for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct EventSet(pub u32);

impl EventSet {
    pub const EMPTY: EventSet = EventSet(0);

    pub fn of(events: &[ClientEvent]) -> Self {
        let mut set = EventSet(0);
        for evt in events {
            set.insert(*evt);
        }
        set
    }

    pub fn insert(&mut self, event: ClientEvent) {
        self.0 |= 1 << event as u32;
    }

    pub fn contains(self, event: ClientEvent) -> bool {
        self.0 & (1 << event as u32) != 0
    }
}

/// Restart cause sent by a client with a RESTART request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u32)]
pub enum RestartCause {
    /// The client detected a modem error.
    MdmErr = 0,
    /// The client requests a restart to apply a firmware update.
    ApplyUpdate = 1,
}

impl TryFrom<u32> for RestartCause {
    type Error = CmrmError;

    fn try_from(value: u32) -> Result<Self, CmrmError> {
        match value {
            0 => Ok(RestartCause::MdmErr),
            1 => Ok(RestartCause::ApplyUpdate),
            v => Err(CmrmError::InvalidRestartCause(v)),
        }
    }
}

/// Kind of restart requested by the client abstraction to control.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RestartKind {
    /// Plain modem restart (error recovery).
    Restart,
    /// Restart to apply a firmware update.
    Update,
    /// Restart with an NVM backup request.
    BackupNvm,
}

impl From<RestartCause> for RestartKind {
    fn from(cause: RestartCause) -> Self {
        match cause {
            RestartCause::MdmErr => RestartKind::Restart,
            RestartCause::ApplyUpdate => RestartKind::Update,
        }
    }
}

/// Kind of hardware reset requested from the HAL.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResetKind {
    /// Full power-cycle followed by a firmware re-flash.
    Cold,
    /// Cold reset with an NVM backup performed first.
    BackupNvm,
}

/// Next step of the escalation recovery ladder.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum RecoveryStep {
    /// Reserved: configured but reported as `ColdReset` (no dedicated
    /// recovery path exists).
    WarmReset,
    ColdReset,
    PlatformReboot,
    OutOfService,
}

impl fmt::Display for RecoveryStep {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let txt = match self {
            RecoveryStep::WarmReset => "WARM_RESET",
            RecoveryStep::ColdReset => "COLD_RESET",
            RecoveryStep::PlatformReboot => "PLATFORM_REBOOT",
            RecoveryStep::OutOfService => "OUT_OF_SERVICE",
        };
        write!(f, "{}", txt)
    }
}

/// Identifier of a connected client, stable for the lifetime of the
/// connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct ClientId(pub u32);

impl fmt::Display for ClientId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// Modules allowed to vote on the shared wakelock.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WakeModule {
    /// Client abstraction (boot window and ack rounds).
    Cla = 0,
    /// Watchdog request timer.
    WatchdogRequest = 1,
    /// Watchdog ping round-trip.
    WatchdogPing = 2,
}

impl WakeModule {
    pub const COUNT: usize = 3;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn event_set_bit_positions_follow_wire_ids() {
        let set = EventSet::of(&[ClientEvent::MdmDown, ClientEvent::MdmColdReset]);
        assert_eq!(set.0, (1 << 0) | (1 << 4));
        assert!(set.contains(ClientEvent::MdmDown));
        assert!(set.contains(ClientEvent::MdmColdReset));
        assert!(!set.contains(ClientEvent::MdmUp));
    }

    #[test]
    fn client_event_round_trips_through_wire_id() {
        for id in 0..ClientEvent::COUNT {
            let evt = ClientEvent::try_from(id).unwrap();
            assert_eq!(evt as u32, id);
        }
        assert!(ClientEvent::try_from(ClientEvent::COUNT).is_err());
    }

    #[test]
    fn restart_cause_maps_to_restart_kind() {
        assert_eq!(RestartKind::from(RestartCause::MdmErr), RestartKind::Restart);
        assert_eq!(RestartKind::from(RestartCause::ApplyUpdate), RestartKind::Update);
    }
}
