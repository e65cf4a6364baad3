// crates/cmrm-rs-linux/src/bridge/client.rs

//! Client side of the host notification bridge.

use super::{INTENT_REBOOT, SOCKET_DEADLINE_MS};
use cmrm_rs::hal::PlatformNotifier;
use cmrm_rs::wire::bridge::{BridgeCommand, IntentParam};
use log::{debug, warn};
use std::io::{self, Write};
use std::os::unix::net::UnixStream;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// A persistent connection to the bridge daemon.
pub struct BridgeClient {
    stream: UnixStream,
}

impl BridgeClient {
    pub fn connect(path: &Path) -> io::Result<Self> {
        let stream = UnixStream::connect(path)?;
        stream.set_write_timeout(Some(Duration::from_millis(SOCKET_DEADLINE_MS)))?;
        Ok(Self { stream })
    }

    fn send(&mut self, cmd: &BridgeCommand) -> io::Result<()> {
        let frame = cmd
            .encode()
            .map_err(|err| io::Error::new(io::ErrorKind::InvalidData, err.to_string()))?;
        debug!("=> bridge {}", cmd.name());
        self.stream.write_all(&frame)
    }

    /// Votes the external wakelock on or off. The bridge counts votes per
    /// connection; a disconnect implicitly drops them.
    pub fn wakelock(&mut self, acquire: bool) -> io::Result<()> {
        self.send(if acquire {
            &BridgeCommand::WakelockAcquire
        } else {
            &BridgeCommand::WakelockRelease
        })
    }

    pub fn broadcast_intent(&mut self, name: &str, params: &[IntentParam]) -> io::Result<()> {
        self.send(&BridgeCommand::BroadcastIntent {
            name: name.to_string(),
            params: params.to_vec(),
        })
    }

    pub fn start_service(&mut self, package: &str, class: &str) -> io::Result<()> {
        self.send(&BridgeCommand::StartService {
            package: package.to_string(),
            class: class.to_string(),
        })
    }
}

/// Connects, sends one intent, and drops the connection. Used for
/// sporadic notifications that do not warrant a held connection.
pub fn broadcast_intent_oneshot(
    path: &Path,
    name: &str,
    params: &[IntentParam],
) -> io::Result<()> {
    BridgeClient::connect(path)?.broadcast_intent(name, params)
}

/// [`PlatformNotifier`] backed by one-shot bridge connections.
pub struct BridgeNotifier {
    path: PathBuf,
}

impl BridgeNotifier {
    pub fn new(path: &Path) -> Self {
        Self { path: path.to_path_buf() }
    }
}

impl PlatformNotifier for BridgeNotifier {
    fn broadcast_intent(&mut self, name: &str, params: &[IntentParam]) {
        if let Err(err) = broadcast_intent_oneshot(&self.path, name, params) {
            warn!("cannot broadcast {}: {}", name, err);
        }
    }

    fn start_service(&mut self, package: &str, class: &str) {
        let result = BridgeClient::connect(&self.path)
            .and_then(|mut client| client.start_service(package, class));
        if let Err(err) = result {
            warn!("cannot start service {}/{}: {}", package, class, err);
        }
    }

    fn request_reboot(&mut self) {
        // The platform is expected to go down once the request is in; keep
        // knocking until the bridge takes it.
        let params = [IntentParam::int("nowait", 1)];
        loop {
            match broadcast_intent_oneshot(&self.path, INTENT_REBOOT, &params) {
                Ok(()) => return,
                Err(err) => {
                    warn!("reboot request not accepted yet: {}", err);
                    std::thread::sleep(Duration::from_millis(SOCKET_DEADLINE_MS));
                }
            }
        }
    }
}
