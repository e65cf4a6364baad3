// crates/cmrm-rs-linux/src/cla_loop.rs

//! Client abstraction thread.
//!
//! One poll over the listening socket, every client connection, and the
//! control mailbox. All engine transitions happen here; the public entry
//! points ([`ClaHandle`]) only enqueue. Engine deadlines (ack round, boot
//! window) become the poll timeout; per-client read deadlines disconnect
//! clients that stall mid-message.

use crate::framing::{FrameRead, write_frame};
use crate::mailbox::{mailbox, MailboxSender};
use crate::now_ms;
use cmrm_rs::cla::{ClaAction, ClaConfig, ClientAbstraction, CtrlNotice};
use cmrm_rs::hal::{ClientNotifier, ModemControl, WakeLock};
use cmrm_rs::types::{ClientId, CLIENT_MSG_DEADLINE_MS, MAX_CLIENTS};
use cmrm_rs::{ClientEvent, DbgInfo, ModemState, WireMsg};
use log::{debug, error, warn};
use mio::net::{UnixListener, UnixStream};
use mio::{Events, Interest, Poll, Token};
use std::collections::{HashMap, VecDeque};
use std::io;
use std::path::Path;
use std::thread::JoinHandle;
use std::time::{Duration, Instant};

const TOKEN_WAKER: Token = Token(0);
const TOKEN_LISTENER: Token = Token(1);
const TOKEN_CLIENT_BASE: usize = 8;

/// Input of the client abstraction thread.
#[derive(Debug)]
pub enum ClaInput {
    Notice(CtrlNotice),
    Quit,
}

/// CTRL -> CLA notification front-end: serializes pass-through events and
/// enqueues everything onto the CLA mailbox.
#[derive(Clone)]
pub struct ClaHandle(MailboxSender<ClaInput>);

impl ClaHandle {
    pub fn quit(&self) {
        self.0.send(ClaInput::Quit);
    }
}

impl ClientNotifier for ClaHandle {
    fn notify_client(&mut self, event: ClientEvent, debug: Option<DbgInfo>) {
        let msg = match debug {
            Some(dbg) => WireMsg::DbgEvent(dbg),
            None => WireMsg::Event(event),
        };
        match msg.encode() {
            Ok(frame) => self.0.send(ClaInput::Notice(CtrlNotice::NotifyClient { event, frame })),
            Err(err) => error!("cannot serialize {}: {}", msg.name(), err),
        }
    }

    fn notify_modem_state(&mut self, state: ModemState) {
        self.0.send(ClaInput::Notice(CtrlNotice::ModemState(state)));
    }

    fn notify_operation_result(&mut self, success: bool) {
        self.0.send(ClaInput::Notice(CtrlNotice::OperationResult(success)));
    }
}

struct Conn {
    stream: UnixStream,
    id: ClientId,
    read: FrameRead,
}

pub struct ClaLoop {
    poll: Poll,
    engine: ClientAbstraction,
    listener: UnixListener,
    rx: crossbeam_channel::Receiver<ClaInput>,
    conns: HashMap<Token, Conn>,
    tokens: HashMap<ClientId, Token>,
    next_token: usize,
}

impl ClaLoop {
    /// Binds the client socket and builds the engine. Returns the loop and
    /// the handle the control engine notifies through.
    pub fn build(
        socket: &Path,
        control: Box<dyn ModemControl + Send>,
        wakelock: Box<dyn WakeLock + Send>,
        config: ClaConfig,
    ) -> io::Result<(Self, ClaHandle)> {
        let _ = std::fs::remove_file(socket);
        let poll = Poll::new()?;
        let mut listener = UnixListener::bind(socket)?;
        poll.registry().register(&mut listener, TOKEN_LISTENER, Interest::READABLE)?;

        let (tx, rx) = mailbox(poll.registry(), TOKEN_WAKER)?;
        let engine = ClientAbstraction::new(control, wakelock, config, now_ms());

        debug!("client abstraction listening on {}", socket.display());
        Ok((
            Self {
                poll,
                engine,
                listener,
                rx,
                conns: HashMap::new(),
                tokens: HashMap::new(),
                next_token: TOKEN_CLIENT_BASE,
            },
            ClaHandle(tx),
        ))
    }

    pub fn spawn(self) -> JoinHandle<()> {
        std::thread::Builder::new()
            .name("cmrm-cla".to_string())
            .spawn(move || {
                if let Err(err) = self.run() {
                    error!("client abstraction loop stopped: {}", err);
                }
            })
            .expect("cannot spawn the client abstraction thread")
    }

    pub fn run(mut self) -> io::Result<()> {
        let mut events = Events::with_capacity(64);

        loop {
            let timeout = self.next_timeout();
            self.poll.poll(&mut events, timeout)?;

            for event in events.iter() {
                match event.token() {
                    TOKEN_WAKER => {
                        while let Ok(input) = self.rx.try_recv() {
                            match input {
                                ClaInput::Notice(notice) => {
                                    let actions = self.engine.control_notice(notice, now_ms());
                                    self.perform(actions);
                                }
                                ClaInput::Quit => return Ok(()),
                            }
                        }
                    }
                    TOKEN_LISTENER => self.accept(),
                    token => {
                        if event.is_error() || event.is_read_closed() {
                            self.peer_closed(token);
                        } else if event.is_readable() {
                            self.readable(token);
                        }
                    }
                }
            }

            let actions = self.engine.tick(now_ms());
            self.perform(actions);
            self.enforce_read_deadlines();
        }
    }

    fn next_timeout(&self) -> Option<Duration> {
        let now = now_ms();
        let mut deadline = self
            .engine
            .next_deadline()
            .map(|d| Duration::from_millis(d.saturating_sub(now)));

        let next_read = self
            .conns
            .values()
            .filter_map(|conn| conn.read.deadline())
            .min()
            .map(|d| d.saturating_duration_since(Instant::now()));
        if let Some(read) = next_read {
            deadline = Some(deadline.map_or(read, |d| d.min(read)));
        }
        deadline
    }

    fn accept(&mut self) {
        loop {
            match self.listener.accept() {
                Ok((mut stream, _)) => {
                    if self.conns.len() == MAX_CLIENTS {
                        warn!("all client slots in use, rejecting connection");
                        continue;
                    }
                    let id = match self.engine.client_connected(now_ms()) {
                        Ok(id) => id,
                        Err(err) => {
                            warn!("connection rejected: {}", err);
                            continue;
                        }
                    };
                    let token = Token(self.next_token);
                    self.next_token += 1;
                    if let Err(err) =
                        self.poll.registry().register(&mut stream, token, Interest::READABLE)
                    {
                        error!("cannot register client connection: {}", err);
                        let actions = self.engine.client_closed(id, now_ms());
                        self.perform(actions);
                        continue;
                    }
                    self.conns.insert(token, Conn { stream, id, read: FrameRead::new() });
                    self.tokens.insert(id, token);
                }
                Err(err) if err.kind() == io::ErrorKind::WouldBlock => break,
                Err(err) => {
                    error!("failure to accept client connection: {}", err);
                    break;
                }
            }
        }
    }

    fn readable(&mut self, token: Token) {
        loop {
            let Some(conn) = self.conns.get_mut(&token) else {
                return;
            };
            match conn.read.advance(&mut conn.stream) {
                Ok(Some((kind, payload))) => {
                    let id = conn.id;
                    match WireMsg::decode(kind, &payload) {
                        Ok(msg) => {
                            let actions = self.engine.client_message(id, msg, now_ms());
                            self.perform(actions);
                        }
                        Err(err) => {
                            warn!("invalid message from {} ({}), disconnecting it", id, err);
                            self.drop_peer(token);
                            return;
                        }
                    }
                }
                Ok(None) => return,
                Err(err) => {
                    debug!("client {} read error: {}", conn.id, err);
                    self.drop_peer(token);
                    return;
                }
            }
        }
    }

    /// Disconnection initiated by the peer or by an I/O error: tell the
    /// engine, then close.
    fn drop_peer(&mut self, token: Token) {
        if let Some(conn) = self.conns.get(&token) {
            let id = conn.id;
            let actions = self.engine.client_closed(id, now_ms());
            self.close(token);
            self.perform(actions);
        }
    }

    fn peer_closed(&mut self, token: Token) {
        self.drop_peer(token);
    }

    /// Closes the socket without informing the engine (used for
    /// engine-requested disconnects, where the record is already gone).
    fn close(&mut self, token: Token) {
        if let Some(mut conn) = self.conns.remove(&token) {
            let _ = self.poll.registry().deregister(&mut conn.stream);
            self.tokens.remove(&conn.id);
        }
    }

    fn perform(&mut self, actions: Vec<ClaAction>) {
        let mut queue: VecDeque<ClaAction> = actions.into();
        while let Some(action) = queue.pop_front() {
            match action {
                ClaAction::Send { client, frame } => {
                    let Some(&token) = self.tokens.get(&client) else {
                        continue;
                    };
                    let Some(conn) = self.conns.get_mut(&token) else {
                        continue;
                    };
                    if let Err(err) =
                        write_frame(&mut conn.stream, &frame, CLIENT_MSG_DEADLINE_MS)
                    {
                        warn!("failure to send message to client {}: {}", client, err);
                        self.close(token);
                        queue.extend(self.engine.client_closed(client, now_ms()));
                    }
                }
                ClaAction::Disconnect(client) => {
                    if let Some(&token) = self.tokens.get(&client) {
                        self.close(token);
                    }
                }
            }
        }
    }

    fn enforce_read_deadlines(&mut self) {
        let now = Instant::now();
        let stale: Vec<Token> = self
            .conns
            .iter()
            .filter(|(_, conn)| conn.read.deadline().is_some_and(|d| now >= d))
            .map(|(token, _)| *token)
            .collect();
        for token in stale {
            if let Some(conn) = self.conns.get(&token) {
                warn!("client {} exceeded the message read deadline", conn.id);
            }
            self.drop_peer(token);
        }
    }
}
