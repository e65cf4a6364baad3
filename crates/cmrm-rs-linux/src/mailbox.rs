// crates/cmrm-rs-linux/src/mailbox.rs

//! Channel endpoint that can wake a socket poll loop.
//!
//! A plain channel cannot be polled together with sockets, so the sender
//! side pairs a `crossbeam-channel` sender with a `mio::Waker`: every send
//! nudges the loop out of its `poll` call, which then drains the receiver.

use crossbeam_channel::{Receiver, Sender};
use std::io;
use std::sync::Arc;

pub struct MailboxSender<T> {
    tx: Sender<T>,
    waker: Arc<mio::Waker>,
}

impl<T> Clone for MailboxSender<T> {
    fn clone(&self) -> Self {
        Self { tx: self.tx.clone(), waker: Arc::clone(&self.waker) }
    }
}

impl<T> MailboxSender<T> {
    /// Enqueues a message and wakes the owning loop. Errors are ignored:
    /// a closed mailbox means the loop is shutting down.
    pub fn send(&self, msg: T) {
        if self.tx.send(msg).is_ok() {
            let _ = self.waker.wake();
        }
    }
}

/// Creates a mailbox whose sends wake `registry` with `token`.
pub fn mailbox<T>(
    registry: &mio::Registry,
    token: mio::Token,
) -> io::Result<(MailboxSender<T>, Receiver<T>)> {
    let waker = Arc::new(mio::Waker::new(registry, token)?);
    let (tx, rx) = crossbeam_channel::unbounded();
    Ok((MailboxSender { tx, waker }, rx))
}
