// crates/cmrm-rs-linux/src/bridge/daemon.rs

//! The notification bridge daemon.
//!
//! One poll loop over the client listening socket, the notifier listening
//! socket, up to [`BRIDGE_MAX_CLIENTS`] client connections, and the single
//! host-notifier peer. Client frames are read in two stages (header, then
//! payload) under a per-message deadline. Outbound traffic to the notifier
//! is strictly one message in flight: each frame carries a monotonically
//! increasing id that the peer echoes back as its acknowledgement.
//!
//! The wakelock is not queued: the daemon compares the state committed to
//! the peer against the aggregate desired by its clients whenever either
//! side changes, and a delta message wins over queued intents because it
//! collapses. Queued intents carry a retry budget; the wakelock delta
//! gives up after the same budget and re-arms on the next state edge.

use crate::framing::{FrameRead, HEADER_SIZE};
use cmrm_rs::types::{
    BRIDGE_MAX_CLIENTS, BRIDGE_MAX_RETRIES, NOTIFIER_ACK_DEADLINE_MS, NOTIFIER_MSG_DEADLINE_MS,
};
use cmrm_rs::wire::bridge::BridgeCommand;
use cmrm_rs::wire::read_u32;
use log::{debug, error, info, warn};
use mio::net::{UnixListener, UnixStream};
use mio::{Events, Interest, Poll, Token, Waker};
use std::collections::VecDeque;
use std::io::{self, Read, Write};
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

const TOKEN_WAKER: Token = Token(0);
const TOKEN_CLIENT_LISTENER: Token = Token(1);
const TOKEN_NOTIFIER_LISTENER: Token = Token(2);
const TOKEN_NOTIFIER: Token = Token(3);
const TOKEN_CLIENT_BASE: usize = 8;

#[derive(Debug, Clone)]
pub struct BridgePaths {
    /// Listening socket for bridge clients (the resource manager, ...).
    pub clients: PathBuf,
    /// Listening socket the host notifier connects to.
    pub notifier: PathBuf,
}

/// Wakes the daemon loop and asks it to exit.
#[derive(Clone)]
pub struct ShutdownHandle {
    waker: Arc<Waker>,
    stop: Arc<AtomicBool>,
}

impl ShutdownHandle {
    pub fn shutdown(&self) {
        self.stop.store(true, Ordering::SeqCst);
        let _ = self.waker.wake();
    }
}

struct ClientConn {
    stream: UnixStream,
    read: FrameRead,
    wakelock_cnt: i32,
}

/// What the in-flight notifier message is.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum InFlight {
    Wakelock(bool),
    Intent,
}

struct SendState {
    frame: Vec<u8>,
    sent: usize,
    msg_id: u32,
    source: InFlight,
    deadline: Instant,
}

struct AckState {
    msg_id: u32,
    source: InFlight,
    buf: [u8; 4],
    got: usize,
    deadline: Instant,
}

struct NotifierConn {
    stream: UnixStream,
    committed_wakelock: bool,
    sending: Option<SendState>,
    waiting_ack: Option<AckState>,
}

struct QueuedMsg {
    msg_id: u32,
    kind: u32,
    frame: Vec<u8>,
    retries: u32,
}

pub struct BridgeDaemon {
    poll: Poll,
    client_listener: UnixListener,
    notifier_listener: UnixListener,
    clients: [Option<ClientConn>; BRIDGE_MAX_CLIENTS],
    peer: Option<NotifierConn>,
    queue: VecDeque<QueuedMsg>,
    msg_count: u32,
    wakelock_retries: u32,
    /// Desired value the daemon gave up on; cleared on the next edge.
    wakelock_given_up: Option<bool>,
    stop: Arc<AtomicBool>,
    shutdown: ShutdownHandle,
}

impl BridgeDaemon {
    pub fn bind(paths: &BridgePaths) -> io::Result<Self> {
        let _ = std::fs::remove_file(&paths.clients);
        let _ = std::fs::remove_file(&paths.notifier);

        let poll = Poll::new()?;
        let mut client_listener = UnixListener::bind(&paths.clients)?;
        let mut notifier_listener = UnixListener::bind(&paths.notifier)?;

        poll.registry()
            .register(&mut client_listener, TOKEN_CLIENT_LISTENER, Interest::READABLE)?;
        poll.registry()
            .register(&mut notifier_listener, TOKEN_NOTIFIER_LISTENER, Interest::READABLE)?;

        let stop = Arc::new(AtomicBool::new(false));
        let shutdown = ShutdownHandle {
            waker: Arc::new(Waker::new(poll.registry(), TOKEN_WAKER)?),
            stop: Arc::clone(&stop),
        };

        info!(
            "bridge listening on {} (clients) and {} (notifier)",
            paths.clients.display(),
            paths.notifier.display()
        );

        Ok(Self {
            poll,
            client_listener,
            notifier_listener,
            clients: Default::default(),
            peer: None,
            queue: VecDeque::new(),
            msg_count: 0,
            wakelock_retries: 0,
            wakelock_given_up: None,
            stop,
            shutdown,
        })
    }

    pub fn shutdown_handle(&self) -> ShutdownHandle {
        self.shutdown.clone()
    }

    /// Aggregate wakelock wanted by the connected clients.
    fn desired_wakelock(&self) -> bool {
        self.clients
            .iter()
            .flatten()
            .any(|client| client.wakelock_cnt > 0)
    }

    fn next_timeout(&self) -> Option<Duration> {
        let mut deadline: Option<Instant> = None;
        let mut consider = |candidate: Option<Instant>| {
            if let Some(c) = candidate {
                deadline = Some(deadline.map_or(c, |d| d.min(c)));
            }
        };

        for client in self.clients.iter().flatten() {
            consider(client.read.deadline());
        }
        if let Some(peer) = &self.peer {
            consider(peer.sending.as_ref().map(|s| s.deadline));
            consider(peer.waiting_ack.as_ref().map(|a| a.deadline));
        }

        deadline.map(|d| d.saturating_duration_since(Instant::now()))
    }

    pub fn run(mut self) -> io::Result<()> {
        let mut events = Events::with_capacity(32);

        while !self.stop.load(Ordering::SeqCst) {
            self.pump_notifier();

            let timeout = self.next_timeout();
            self.poll.poll(&mut events, timeout)?;

            for event in events.iter() {
                match event.token() {
                    TOKEN_WAKER => {}
                    TOKEN_CLIENT_LISTENER => self.accept_clients(),
                    TOKEN_NOTIFIER_LISTENER => self.accept_notifier(),
                    TOKEN_NOTIFIER => {
                        if event.is_readable() {
                            self.notifier_readable();
                        }
                        if event.is_writable() {
                            self.notifier_writable();
                        }
                    }
                    Token(token) => {
                        let idx = token - TOKEN_CLIENT_BASE;
                        if event.is_error() || event.is_read_closed() {
                            self.remove_client(idx, "disconnected");
                        } else if event.is_readable() {
                            self.client_readable(idx);
                        }
                    }
                }
            }

            self.enforce_deadlines();
        }
        Ok(())
    }

    fn accept_clients(&mut self) {
        loop {
            match self.client_listener.accept() {
                Ok((mut stream, _)) => {
                    let Some(idx) = self.clients.iter().position(Option::is_none) else {
                        error!("too many clients connected, rejecting connection");
                        continue;
                    };
                    let token = Token(TOKEN_CLIENT_BASE + idx);
                    if let Err(err) =
                        self.poll.registry().register(&mut stream, token, Interest::READABLE)
                    {
                        error!("cannot register client connection: {}", err);
                        continue;
                    }
                    debug!("client connected in slot {}", idx);
                    self.clients[idx] =
                        Some(ClientConn { stream, read: FrameRead::new(), wakelock_cnt: 0 });
                }
                Err(err) if err.kind() == io::ErrorKind::WouldBlock => break,
                Err(err) => {
                    error!("error accepting client connection: {}", err);
                    break;
                }
            }
        }
    }

    fn accept_notifier(&mut self) {
        loop {
            match self.notifier_listener.accept() {
                Ok((mut stream, _)) => {
                    if self.peer.is_some() {
                        error!("too many notifiers connected, rejecting connection");
                        continue;
                    }
                    if let Err(err) = self.poll.registry().register(
                        &mut stream,
                        TOKEN_NOTIFIER,
                        Interest::READABLE,
                    ) {
                        error!("cannot register notifier connection: {}", err);
                        continue;
                    }
                    debug!("host notifier connected");
                    // A fresh peer holds nothing: the committed state is
                    // re-derived, which re-sends a pending wakelock.
                    self.peer = Some(NotifierConn {
                        stream,
                        committed_wakelock: false,
                        sending: None,
                        waiting_ack: None,
                    });
                }
                Err(err) if err.kind() == io::ErrorKind::WouldBlock => break,
                Err(err) => {
                    error!("error accepting notifier connection: {}", err);
                    break;
                }
            }
        }
    }

    fn client_readable(&mut self, idx: usize) {
        loop {
            let Some(client) = self.clients[idx].as_mut() else {
                return;
            };
            match client.read.advance(&mut client.stream) {
                Ok(Some((kind, payload))) => self.client_frame(idx, kind, payload),
                Ok(None) => return,
                Err(err) => {
                    let reason = if err.kind() == io::ErrorKind::InvalidData {
                        "sent an oversized frame"
                    } else {
                        "read error"
                    };
                    self.remove_client(idx, reason);
                    return;
                }
            }
        }
    }

    fn client_frame(&mut self, idx: usize, kind: u32, payload: Vec<u8>) {
        debug!("client msg: {}", BridgeCommand::name_of(kind));
        match BridgeCommand::decode(kind, &payload) {
            Ok(BridgeCommand::WakelockAcquire) => {
                if let Some(client) = self.clients[idx].as_mut() {
                    client.wakelock_cnt += 1;
                }
            }
            Ok(BridgeCommand::WakelockRelease) => {
                let released = self.clients[idx]
                    .as_mut()
                    .map(|client| {
                        client.wakelock_cnt -= 1;
                        client.wakelock_cnt
                    })
                    .unwrap_or(0);
                if released < 0 {
                    self.remove_client(idx, "released an unacquired wakelock");
                }
            }
            Ok(_) => {
                // Forwarded verbatim, with the ack id assigned now.
                let msg_id = self.msg_count;
                self.msg_count = self.msg_count.wrapping_add(1);

                let mut frame = Vec::with_capacity(4 + HEADER_SIZE + payload.len());
                frame.extend_from_slice(&msg_id.to_be_bytes());
                frame.extend_from_slice(&(payload.len() as u32).to_be_bytes());
                frame.extend_from_slice(&kind.to_be_bytes());
                frame.extend_from_slice(&payload);
                self.queue.push_back(QueuedMsg { msg_id, kind, frame, retries: 0 });
            }
            Err(err) => {
                warn!("invalid client message ({})", err);
                self.remove_client(idx, "sent an invalid message");
            }
        }
    }

    fn remove_client(&mut self, idx: usize, reason: &str) {
        if let Some(mut client) = self.clients[idx].take() {
            warn!("client in slot {} {}, disconnected", idx, reason);
            let _ = self.poll.registry().deregister(&mut client.stream);
            // Its wakelock votes die with it; the aggregate is re-derived
            // on the next pump.
        }
    }

    /// Starts or continues the outbound traffic to the notifier.
    fn pump_notifier(&mut self) {
        let desired = self.desired_wakelock();

        // A state edge re-arms a given-up wakelock delta.
        if self.wakelock_given_up.is_some_and(|v| v != desired) {
            self.wakelock_given_up = None;
            self.wakelock_retries = 0;
        }

        let Some(peer) = self.peer.as_mut() else {
            return;
        };
        if peer.sending.is_some() || peer.waiting_ack.is_some() {
            return;
        }

        let send = if desired != peer.committed_wakelock && self.wakelock_given_up.is_none() {
            // The wakelock delta collapses, so it jumps the queue.
            let msg_id = self.msg_count;
            self.msg_count = self.msg_count.wrapping_add(1);
            let cmd = if desired {
                BridgeCommand::WakelockAcquire
            } else {
                BridgeCommand::WakelockRelease
            };
            let frame = cmd.encode_with_id(msg_id).expect("wakelock frame cannot fail");
            Some(SendState {
                frame,
                sent: 0,
                msg_id,
                source: InFlight::Wakelock(desired),
                deadline: Instant::now() + Duration::from_millis(NOTIFIER_MSG_DEADLINE_MS),
            })
        } else {
            self.queue.front().map(|msg| SendState {
                frame: msg.frame.clone(),
                sent: 0,
                msg_id: msg.msg_id,
                source: InFlight::Intent,
                deadline: Instant::now() + Duration::from_millis(NOTIFIER_MSG_DEADLINE_MS),
            })
        };

        if let Some(send) = send {
            debug!(
                "sending message {} to notifier (id {})",
                match send.source {
                    InFlight::Wakelock(true) => "WAKE_ACQUIRE",
                    InFlight::Wakelock(false) => "WAKE_RELEASE",
                    InFlight::Intent => BridgeCommand::name_of(read_u32(&send.frame[8..12])),
                },
                send.msg_id
            );
            peer.sending = Some(send);
            self.notifier_writable();
        }
    }

    fn notifier_writable(&mut self) {
        enum Outcome {
            Sent { msg_id: u32, source: InFlight },
            WouldBlock,
            Failed,
        }

        let outcome = {
            let Some(peer) = self.peer.as_mut() else {
                return;
            };
            let Some(send) = peer.sending.as_mut() else {
                return;
            };
            loop {
                match peer.stream.write(&send.frame[send.sent..]) {
                    Ok(0) => break Outcome::Failed,
                    Ok(n) => {
                        send.sent += n;
                        if send.sent == send.frame.len() {
                            break Outcome::Sent { msg_id: send.msg_id, source: send.source };
                        }
                    }
                    Err(err) if err.kind() == io::ErrorKind::WouldBlock => {
                        break Outcome::WouldBlock;
                    }
                    Err(err) if err.kind() == io::ErrorKind::Interrupted => {}
                    Err(_) => break Outcome::Failed,
                }
            }
        };

        match outcome {
            Outcome::Sent { msg_id, source } => {
                debug!("... message sent, waiting ack {}", msg_id);
                let peer = self.peer.as_mut().unwrap();
                peer.sending = None;
                peer.waiting_ack = Some(AckState {
                    msg_id,
                    source,
                    buf: [0; 4],
                    got: 0,
                    deadline: Instant::now() + Duration::from_millis(NOTIFIER_ACK_DEADLINE_MS),
                });
                let _ = self.poll.registry().reregister(
                    &mut peer.stream,
                    TOKEN_NOTIFIER,
                    Interest::READABLE,
                );
            }
            Outcome::WouldBlock => {
                let peer = self.peer.as_mut().unwrap();
                let _ = self.poll.registry().reregister(
                    &mut peer.stream,
                    TOKEN_NOTIFIER,
                    Interest::READABLE | Interest::WRITABLE,
                );
            }
            Outcome::Failed => self.drop_peer("write error"),
        }
    }

    fn notifier_readable(&mut self) {
        enum Outcome {
            Pending,
            Acked(InFlight),
            Drop(&'static str),
        }

        let outcome = {
            let Some(peer) = self.peer.as_mut() else {
                return;
            };
            match peer.waiting_ack.as_mut() {
                None => {
                    // Bytes outside an ack window mean a confused peer.
                    let mut scratch = [0u8; 16];
                    match peer.stream.read(&mut scratch) {
                        Ok(0) | Err(_) => Outcome::Drop("disconnected"),
                        Ok(_) => Outcome::Drop("sent unexpected bytes"),
                    }
                }
                Some(ack) => loop {
                    match peer.stream.read(&mut ack.buf[ack.got..]) {
                        Ok(0) => break Outcome::Drop("disconnected while acking"),
                        Ok(n) => {
                            ack.got += n;
                            if ack.got == 4 {
                                let reply = u32::from_be_bytes(ack.buf);
                                if reply != ack.msg_id {
                                    error!(
                                        "mismatch in ack ({:#010x} instead of {:#010x})",
                                        reply, ack.msg_id
                                    );
                                    break Outcome::Drop("ack mismatch");
                                }
                                debug!("... message {} acked", reply);
                                break Outcome::Acked(ack.source);
                            }
                        }
                        Err(err) if err.kind() == io::ErrorKind::WouldBlock => {
                            break Outcome::Pending;
                        }
                        Err(err) if err.kind() == io::ErrorKind::Interrupted => {}
                        Err(_) => break Outcome::Drop("read error"),
                    }
                },
            }
        };

        match outcome {
            Outcome::Pending => {}
            Outcome::Acked(source) => {
                let peer = self.peer.as_mut().unwrap();
                peer.waiting_ack = None;
                match source {
                    InFlight::Wakelock(value) => {
                        peer.committed_wakelock = value;
                        self.wakelock_retries = 0;
                        self.wakelock_given_up = None;
                    }
                    InFlight::Intent => {
                        self.queue.pop_front();
                    }
                }
            }
            Outcome::Drop(reason) => self.drop_peer(reason),
        }
    }

    /// Drops the notifier peer and charges the in-flight message's retry
    /// budget.
    fn drop_peer(&mut self, reason: &str) {
        let Some(mut peer) = self.peer.take() else {
            return;
        };
        warn!("notifier {}, dropped", reason);
        let _ = self.poll.registry().deregister(&mut peer.stream);

        let in_flight = peer
            .sending
            .map(|s| s.source)
            .or(peer.waiting_ack.map(|a| a.source));

        match in_flight {
            Some(InFlight::Intent) => {
                if let Some(front) = self.queue.front_mut() {
                    front.retries += 1;
                    if front.retries >= BRIDGE_MAX_RETRIES {
                        error!(
                            "message {} dropped due to max retries",
                            BridgeCommand::name_of(front.kind)
                        );
                        self.queue.pop_front();
                    }
                }
            }
            Some(InFlight::Wakelock(value)) => {
                self.wakelock_retries += 1;
                if self.wakelock_retries >= BRIDGE_MAX_RETRIES {
                    error!(
                        "wakelock {} dropped due to max retries",
                        if value { "acquire" } else { "release" }
                    );
                    self.wakelock_given_up = Some(value);
                }
            }
            None => {}
        }
    }

    fn enforce_deadlines(&mut self) {
        let now = Instant::now();

        for idx in 0..self.clients.len() {
            let expired = self.clients[idx]
                .as_ref()
                .and_then(|client| client.read.deadline())
                .is_some_and(|deadline| now >= deadline);
            if expired {
                self.remove_client(idx, "exceeded the message read deadline");
            }
        }

        let expired = self.peer.as_ref().is_some_and(|peer| {
            peer.sending.as_ref().is_some_and(|s| now >= s.deadline)
                || peer.waiting_ack.as_ref().is_some_and(|a| now >= a.deadline)
        });
        if expired {
            self.drop_peer("timed out");
        }
    }
}

/// Binds and runs a bridge daemon on a background thread. Returns the
/// shutdown handle and the thread handle.
pub fn spawn(paths: &BridgePaths) -> io::Result<(ShutdownHandle, std::thread::JoinHandle<()>)> {
    let daemon = BridgeDaemon::bind(paths)?;
    let shutdown = daemon.shutdown_handle();
    let handle = std::thread::Builder::new()
        .name("cmrm-bridged".to_string())
        .spawn(move || {
            if let Err(err) = daemon.run() {
                error!("bridge daemon stopped: {}", err);
            }
        })?;
    Ok((shutdown, handle))
}

/// Removes the daemon's socket files.
pub fn cleanup(paths: &BridgePaths) {
    let _ = std::fs::remove_file(&paths.clients);
    let _ = std::fs::remove_file(&paths.notifier);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn a_state_edge_rearms_a_given_up_wakelock() {
        let dir = tempfile::tempdir().unwrap();
        let paths = BridgePaths {
            clients: dir.path().join("clients.sock"),
            notifier: dir.path().join("notifier.sock"),
        };
        let mut daemon = BridgeDaemon::bind(&paths).unwrap();

        // No client votes, so the desired state is "released". Giving up
        // on that same value sticks across pumps.
        assert!(!daemon.desired_wakelock());
        daemon.wakelock_retries = BRIDGE_MAX_RETRIES;
        daemon.wakelock_given_up = Some(false);
        daemon.pump_notifier();
        assert_eq!(daemon.wakelock_given_up, Some(false));

        // A give-up recorded for the opposite value is a state edge: it
        // clears and the retry budget re-arms.
        daemon.wakelock_given_up = Some(true);
        daemon.pump_notifier();
        assert_eq!(daemon.wakelock_given_up, None);
        assert_eq!(daemon.wakelock_retries, 0);
    }
}
