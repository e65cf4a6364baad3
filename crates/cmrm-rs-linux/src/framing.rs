// crates/cmrm-rs-linux/src/framing.rs

//! Staged, deadline-bounded frame I/O over non-blocking Unix streams.
//!
//! Both framed channels of the system (client <-> CLA and bridge client
//! <-> bridge daemon) start their frames with a `size(u32 BE) ||
//! kind(u32 BE)` header. The reader consumes the header and payload in
//! stages so a poll loop can resume a partial frame, and exposes the
//! deadline by which the current frame must complete.

use cmrm_rs::types::{CLIENT_MSG_DEADLINE_MS, MAX_FRAME_SIZE};
use cmrm_rs::wire::read_u32;
use std::io::{self, Read, Write};
use std::time::{Duration, Instant};

/// Size of the `size || kind` header.
pub const HEADER_SIZE: usize = 8;

enum ReadStage {
    Idle,
    Header,
    Payload,
}

/// Incremental reader for one framed connection.
pub struct FrameRead {
    stage: ReadStage,
    header: [u8; HEADER_SIZE],
    payload: Vec<u8>,
    got: usize,
    deadline: Instant,
}

impl FrameRead {
    pub fn new() -> Self {
        Self {
            stage: ReadStage::Idle,
            header: [0; HEADER_SIZE],
            payload: Vec::new(),
            got: 0,
            deadline: Instant::now(),
        }
    }

    /// Deadline of the partially read frame, if one is in progress.
    pub fn deadline(&self) -> Option<Instant> {
        match self.stage {
            ReadStage::Idle => None,
            _ => Some(self.deadline),
        }
    }

    /// Reads at most one frame from `stream`. Returns `Ok(Some((kind,
    /// payload)))` when a frame completed and `Ok(None)` when the stream
    /// has no more bytes for now. An oversized frame is an
    /// `InvalidData` error; the peer must be disconnected.
    pub fn advance<S: Read>(&mut self, stream: &mut S) -> io::Result<Option<(u32, Vec<u8>)>> {
        loop {
            match self.stage {
                ReadStage::Idle => {
                    self.stage = ReadStage::Header;
                    self.got = 0;
                    self.deadline = Instant::now() + Duration::from_millis(CLIENT_MSG_DEADLINE_MS);
                }
                ReadStage::Header => {
                    match stream.read(&mut self.header[self.got..]) {
                        Ok(0) => return Err(io::ErrorKind::UnexpectedEof.into()),
                        Ok(n) => self.got += n,
                        Err(err) if err.kind() == io::ErrorKind::WouldBlock => return Ok(None),
                        Err(err) if err.kind() == io::ErrorKind::Interrupted => {}
                        Err(err) => return Err(err),
                    }
                    if self.got == HEADER_SIZE {
                        let size = read_u32(&self.header[0..4]) as usize;
                        if HEADER_SIZE + size > MAX_FRAME_SIZE {
                            return Err(io::Error::new(
                                io::ErrorKind::InvalidData,
                                "oversized frame",
                            ));
                        }
                        self.payload = vec![0; size];
                        self.got = 0;
                        self.stage = ReadStage::Payload;
                    }
                }
                ReadStage::Payload => {
                    if self.got < self.payload.len() {
                        match stream.read(&mut self.payload[self.got..]) {
                            Ok(0) => return Err(io::ErrorKind::UnexpectedEof.into()),
                            Ok(n) => self.got += n,
                            Err(err) if err.kind() == io::ErrorKind::WouldBlock => return Ok(None),
                            Err(err) if err.kind() == io::ErrorKind::Interrupted => {}
                            Err(err) => return Err(err),
                        }
                    }
                    if self.got == self.payload.len() {
                        let kind = read_u32(&self.header[4..8]);
                        self.stage = ReadStage::Idle;
                        return Ok(Some((kind, std::mem::take(&mut self.payload))));
                    }
                }
            }
        }
    }
}

impl Default for FrameRead {
    fn default() -> Self {
        Self::new()
    }
}

/// Writes a whole frame to a non-blocking stream, spinning on
/// `WouldBlock` until `deadline_ms` elapses. Peers that cannot take a
/// frame within the deadline are treated as faulty.
pub fn write_frame<S: Write>(stream: &mut S, frame: &[u8], deadline_ms: u64) -> io::Result<()> {
    let deadline = Instant::now() + Duration::from_millis(deadline_ms);
    let mut sent = 0;
    while sent < frame.len() {
        match stream.write(&frame[sent..]) {
            Ok(0) => return Err(io::ErrorKind::WriteZero.into()),
            Ok(n) => sent += n,
            Err(err) if err.kind() == io::ErrorKind::WouldBlock => {
                if Instant::now() >= deadline {
                    return Err(io::ErrorKind::TimedOut.into());
                }
                std::thread::sleep(Duration::from_millis(1));
            }
            Err(err) if err.kind() == io::ErrorKind::Interrupted => {}
            Err(err) => return Err(err),
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Reader fed one byte at a time, interleaved with `WouldBlock`.
    struct Trickle {
        data: Vec<u8>,
        pos: usize,
        starve: bool,
    }

    impl Read for Trickle {
        fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
            if self.pos == self.data.len() {
                return Err(io::ErrorKind::WouldBlock.into());
            }
            self.starve = !self.starve;
            if self.starve {
                return Err(io::ErrorKind::WouldBlock.into());
            }
            buf[0] = self.data[self.pos];
            self.pos += 1;
            Ok(1)
        }
    }

    #[test]
    fn split_reads_reassemble_the_frame() {
        let mut frame = vec![0, 0, 0, 3, 0, 0, 0, 9];
        frame.extend_from_slice(b"abc");
        let mut stream = Trickle { data: frame, pos: 0, starve: false };

        let mut read = FrameRead::new();
        let mut result = None;
        for _ in 0..64 {
            if let Some(done) = read.advance(&mut stream).unwrap() {
                result = Some(done);
                break;
            }
        }
        let (kind, payload) = result.expect("frame never completed");
        assert_eq!(kind, 9);
        assert_eq!(payload, b"abc");
        assert!(read.deadline().is_none());
    }

    #[test]
    fn oversized_frame_is_an_error() {
        let huge = (MAX_FRAME_SIZE as u32).to_be_bytes();
        let mut data = huge.to_vec();
        data.extend_from_slice(&[0, 0, 0, 0]);
        let mut stream = Trickle { data, pos: 0, starve: false };

        let mut read = FrameRead::new();
        let err = loop {
            match read.advance(&mut stream) {
                Ok(Some(_)) => panic!("oversized frame accepted"),
                Ok(None) => {}
                Err(err) => break err,
            }
        };
        assert_eq!(err.kind(), io::ErrorKind::InvalidData);
    }

    #[test]
    fn hangup_is_reported_as_eof() {
        struct Closed;
        impl Read for Closed {
            fn read(&mut self, _buf: &mut [u8]) -> io::Result<usize> {
                Ok(0)
            }
        }
        let mut read = FrameRead::new();
        let err = read.advance(&mut Closed).unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::UnexpectedEof);
    }
}
