// crates/cmrm-rs-linux/src/client.rs

//! Blocking convenience client for the resource manager socket.
//!
//! Used by the sanity tooling and the integration tests. One call per
//! protocol request; events are pulled with [`ModemClient::next_event`].

use cmrm_rs::dbg::DbgInfo;
use cmrm_rs::types::{EventSet, RestartCause};
use cmrm_rs::wire::{self, WireMsg, HEADER_SIZE};
use std::io::{self, Read, Write};
use std::os::unix::net::UnixStream;
use std::path::Path;
use std::time::{Duration, Instant};

pub struct ModemClient {
    stream: UnixStream,
}

impl ModemClient {
    pub fn connect(path: &Path) -> io::Result<Self> {
        let stream = UnixStream::connect(path)?;
        stream.set_write_timeout(Some(Duration::from_millis(500)))?;
        Ok(Self { stream })
    }

    /// Connects, retrying until the daemon has bound its socket or
    /// `timeout` elapses.
    pub fn connect_retry(path: &Path, timeout: Duration) -> io::Result<Self> {
        let deadline = Instant::now() + timeout;
        loop {
            match Self::connect(path) {
                Ok(client) => return Ok(client),
                Err(err) => {
                    if Instant::now() >= deadline {
                        return Err(err);
                    }
                    std::thread::sleep(Duration::from_millis(10));
                }
            }
        }
    }

    fn send(&mut self, msg: &WireMsg) -> io::Result<()> {
        let frame = msg
            .encode()
            .map_err(|err| io::Error::new(io::ErrorKind::InvalidData, err.to_string()))?;
        self.stream.write_all(&frame)
    }

    pub fn register(&mut self, name: &str, events: EventSet) -> io::Result<()> {
        self.send(&WireMsg::Register { name: name.to_string(), events })
    }

    pub fn register_dbg(&mut self, name: &str, events: EventSet) -> io::Result<()> {
        self.send(&WireMsg::RegisterDbg { name: name.to_string(), events })
    }

    pub fn acquire(&mut self) -> io::Result<()> {
        self.send(&WireMsg::Acquire)
    }

    pub fn release(&mut self) -> io::Result<()> {
        self.send(&WireMsg::Release)
    }

    pub fn restart(&mut self, cause: RestartCause, debug: Option<DbgInfo>) -> io::Result<()> {
        self.send(&WireMsg::Restart { cause, debug })
    }

    pub fn shutdown(&mut self) -> io::Result<()> {
        self.send(&WireMsg::Shutdown)
    }

    pub fn nvm_backup(&mut self) -> io::Result<()> {
        self.send(&WireMsg::NvmBackup)
    }

    pub fn ack_cold_reset(&mut self) -> io::Result<()> {
        self.send(&WireMsg::AckColdReset)
    }

    pub fn ack_shutdown(&mut self) -> io::Result<()> {
        self.send(&WireMsg::AckShutdown)
    }

    pub fn notify_dbg(&mut self, debug: DbgInfo) -> io::Result<()> {
        self.send(&WireMsg::NotifyDbg(debug))
    }

    /// Blocks until the next event arrives or `timeout` elapses.
    pub fn next_event(&mut self, timeout: Duration) -> io::Result<WireMsg> {
        self.stream.set_read_timeout(Some(timeout))?;

        let mut header = [0u8; HEADER_SIZE];
        self.stream.read_exact(&mut header)?;
        let size = wire::read_u32(&header[0..4]) as usize;
        let kind = wire::read_u32(&header[4..8]);

        let mut payload = vec![0u8; size];
        self.stream.read_exact(&mut payload)?;

        WireMsg::decode(kind, &payload)
            .map_err(|err| io::Error::new(io::ErrorKind::InvalidData, err.to_string()))
    }
}
