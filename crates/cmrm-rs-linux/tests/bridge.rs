// crates/cmrm-rs-linux/tests/bridge.rs

//! End-to-end tests of the host notification bridge: a real daemon, a
//! real client, and a scripted notifier peer over Unix sockets.

use cmrm_rs::wire::bridge::IntentParam;
use cmrm_rs_linux::bridge::daemon::{self, BridgePaths};
use cmrm_rs_linux::bridge::BridgeClient;
use std::io::{Read, Write};
use std::os::unix::net::UnixStream;
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};

const WAKE_ACQUIRE: u32 = 0;
const WAKE_RELEASE: u32 = 1;
const BROADCAST_INTENT: u32 = 3;

struct World {
    paths: BridgePaths,
    shutdown: cmrm_rs_linux::bridge::ShutdownHandle,
    thread: Option<std::thread::JoinHandle<()>>,
    _dir: tempfile::TempDir,
}

impl World {
    fn start() -> Self {
        let dir = tempfile::tempdir().unwrap();
        let paths = BridgePaths {
            clients: dir.path().join("bridge-clients.sock"),
            notifier: dir.path().join("bridge-notifier.sock"),
        };
        let (shutdown, thread) = daemon::spawn(&paths).unwrap();
        Self { paths, shutdown, thread: Some(thread), _dir: dir }
    }

    fn client(&self) -> BridgeClient {
        connect_retry(&self.paths.clients)
    }

    fn notifier(&self) -> Notifier {
        let deadline = Instant::now() + Duration::from_secs(5);
        loop {
            match UnixStream::connect(&self.paths.notifier) {
                Ok(stream) => {
                    stream.set_read_timeout(Some(Duration::from_millis(50))).unwrap();
                    return Notifier { stream, buffer: Vec::new() };
                }
                Err(_) if Instant::now() < deadline => {
                    std::thread::sleep(Duration::from_millis(5));
                }
                Err(err) => panic!("cannot connect the notifier: {}", err),
            }
        }
    }
}

impl Drop for World {
    fn drop(&mut self) {
        self.shutdown.shutdown();
        if let Some(thread) = self.thread.take() {
            let _ = thread.join();
        }
    }
}

fn connect_retry(path: &Path) -> BridgeClient {
    let deadline = Instant::now() + Duration::from_secs(5);
    loop {
        match BridgeClient::connect(path) {
            Ok(client) => return client,
            Err(_) if Instant::now() < deadline => std::thread::sleep(Duration::from_millis(5)),
            Err(err) => panic!("cannot connect the bridge client: {}", err),
        }
    }
}

/// Scripted notifier peer: reads `msg_id || size || kind || payload`
/// frames and acks on demand.
struct Notifier {
    stream: UnixStream,
    buffer: Vec<u8>,
}

impl Notifier {
    /// Reads the next message within `timeout`, or `None`.
    fn read_message(&mut self, timeout: Duration) -> Option<(u32, u32, Vec<u8>)> {
        let deadline = Instant::now() + timeout;
        loop {
            if self.buffer.len() >= 12 {
                let size = u32::from_be_bytes(self.buffer[4..8].try_into().unwrap()) as usize;
                if self.buffer.len() >= 12 + size {
                    let msg_id = u32::from_be_bytes(self.buffer[0..4].try_into().unwrap());
                    let kind = u32::from_be_bytes(self.buffer[8..12].try_into().unwrap());
                    let payload = self.buffer[12..12 + size].to_vec();
                    self.buffer.drain(..12 + size);
                    return Some((msg_id, kind, payload));
                }
            }
            if Instant::now() >= deadline {
                return None;
            }
            let mut chunk = [0u8; 256];
            match self.stream.read(&mut chunk) {
                Ok(0) => return None,
                Ok(n) => self.buffer.extend_from_slice(&chunk[..n]),
                Err(err)
                    if err.kind() == std::io::ErrorKind::WouldBlock
                        || err.kind() == std::io::ErrorKind::TimedOut => {}
                Err(_) => return None,
            }
        }
    }

    fn ack(&mut self, msg_id: u32) {
        self.stream.write_all(&msg_id.to_be_bytes()).unwrap();
    }
}

#[test]
fn wakelock_votes_reach_the_notifier() {
    let world = World::start();
    let mut client = world.client();
    let mut notifier = world.notifier();

    client.wakelock(true).unwrap();
    let (id, kind, payload) = notifier.read_message(Duration::from_secs(5)).unwrap();
    assert_eq!(kind, WAKE_ACQUIRE);
    assert!(payload.is_empty());
    notifier.ack(id);

    client.wakelock(false).unwrap();
    let (id, kind, _) = notifier.read_message(Duration::from_secs(5)).unwrap();
    assert_eq!(kind, WAKE_RELEASE);
    notifier.ack(id);
}

#[test]
fn intents_are_delivered_one_at_a_time_in_order() {
    let world = World::start();
    let mut client = world.client();

    // Queued before the notifier even connects.
    client
        .broadcast_intent("cmrm.intent.MODEM_COLD_RESET", &[IntentParam::int("instId", 0)])
        .unwrap();
    client
        .broadcast_intent("cmrm.intent.CORE_DUMP_WARNING", &[IntentParam::int("instId", 0)])
        .unwrap();

    let mut notifier = world.notifier();
    let (first_id, kind, _) = notifier.read_message(Duration::from_secs(5)).unwrap();
    assert_eq!(kind, BROADCAST_INTENT);

    // Strict one-in-flight: nothing else until the ack.
    assert!(notifier.read_message(Duration::from_millis(200)).is_none());
    notifier.ack(first_id);

    let (second_id, kind, _) = notifier.read_message(Duration::from_secs(5)).unwrap();
    assert_eq!(kind, BROADCAST_INTENT);
    assert!(second_id > first_id);
    notifier.ack(second_id);
}

#[test]
fn notifier_crash_before_ack_gives_up_after_three_attempts() {
    let world = World::start();
    let mut client = world.client();

    client.wakelock(true).unwrap();

    // Three delivery attempts, each cut before the ack.
    for _ in 0..3 {
        let mut notifier = world.notifier();
        let (_, kind, _) = notifier.read_message(Duration::from_secs(5)).unwrap();
        assert_eq!(kind, WAKE_ACQUIRE);
        drop(notifier);
        // Let the daemon observe the hangup before the next connection.
        std::thread::sleep(Duration::from_millis(50));
    }

    // Budget exhausted: the delta was dropped, a fresh peer gets nothing.
    let mut notifier = world.notifier();
    assert!(notifier.read_message(Duration::from_millis(300)).is_none());

    // The next state edges re-derive the desired state and re-send.
    client.wakelock(false).unwrap();
    assert!(notifier.read_message(Duration::from_millis(200)).is_none());
    client.wakelock(true).unwrap();
    let (id, kind, _) = notifier.read_message(Duration::from_secs(5)).unwrap();
    assert_eq!(kind, WAKE_ACQUIRE);
    notifier.ack(id);
}

#[test]
fn reconnect_rederives_the_committed_wakelock() {
    let world = World::start();
    let mut client = world.client();
    let mut notifier = world.notifier();

    client.wakelock(true).unwrap();
    let (id, kind, _) = notifier.read_message(Duration::from_secs(5)).unwrap();
    assert_eq!(kind, WAKE_ACQUIRE);
    notifier.ack(id);

    // The peer goes away after committing: a fresh peer starts from
    // "released" and receives the acquire again.
    drop(notifier);
    std::thread::sleep(Duration::from_millis(50));
    let mut notifier = world.notifier();
    let (id, kind, _) = notifier.read_message(Duration::from_secs(5)).unwrap();
    assert_eq!(kind, WAKE_ACQUIRE);
    notifier.ack(id);
}

#[test]
fn release_without_acquire_disconnects_the_client() {
    let world = World::start();

    let mut raw = {
        let deadline = Instant::now() + Duration::from_secs(5);
        loop {
            match UnixStream::connect(&world.paths.clients) {
                Ok(stream) => break stream,
                Err(_) if Instant::now() < deadline => {
                    std::thread::sleep(Duration::from_millis(5))
                }
                Err(err) => panic!("cannot connect: {}", err),
            }
        }
    };

    // WAKE_RELEASE with no prior acquire.
    raw.write_all(&[0, 0, 0, 0, 0, 0, 0, 1]).unwrap();

    raw.set_read_timeout(Some(Duration::from_secs(5))).unwrap();
    let mut scratch = [0u8; 1];
    match raw.read(&mut scratch) {
        Ok(0) => {}
        other => panic!("expected a disconnection, got {:?}", other),
    }
}

#[test]
fn mismatched_ack_drops_the_peer_and_redelivers() {
    let world = World::start();
    let mut client = world.client();

    client
        .broadcast_intent("cmrm.intent.MODEM_OUT_OF_SERVICE", &[IntentParam::int("instId", 1)])
        .unwrap();

    let mut notifier = world.notifier();
    let (id, _, _) = notifier.read_message(Duration::from_secs(5)).unwrap();
    notifier.ack(id.wrapping_add(7));
    std::thread::sleep(Duration::from_millis(50));

    // The confused peer is dropped; a new one gets the same intent again.
    let mut notifier = world.notifier();
    let (retry_id, kind, payload) = notifier.read_message(Duration::from_secs(5)).unwrap();
    assert_eq!(kind, BROADCAST_INTENT);
    assert_eq!(retry_id, id);
    assert!(!payload.is_empty());
    notifier.ack(retry_id);
}
