// crates/cmrm-rs/src/wire/mod.rs

//! Client <-> client-abstraction wire format.
//!
//! A frame is `len(u32 BE, payload only) || kind(u32 BE) || payload`. The
//! payload is a sequence of typed items, each
//! `len(u32 BE) || tag(u32 BE: Int | String) || bytes`. Requests and
//! events share one kind space; the client <-> CLA channel carries no
//! message id (only the host-bridge channel does, see [`bridge`]).

pub mod bridge;

use crate::dbg::{DbgInfo, DbgKind, MAX_DBG_DATA, MAX_DBG_LEN};
use crate::types::{ClientEvent, EventSet, RestartCause, MAX_FRAME_SIZE, NAME_MAX};
use crate::CmrmError;
use alloc::string::String;
use alloc::vec::Vec;

/// Size of the `len || kind` frame header.
pub const HEADER_SIZE: usize = 8;

/// Payload item data-type tags.
pub const TAG_INT: u32 = 0;
pub const TAG_STRING: u32 = 1;

// Request kinds continue the event kind space (events occupy 0..=6).
const KIND_REGISTER: u32 = 7;
const KIND_REGISTER_DBG: u32 = 8;
const KIND_ACQUIRE: u32 = 9;
const KIND_RELEASE: u32 = 10;
const KIND_RESTART: u32 = 11;
const KIND_SHUTDOWN: u32 = 12;
const KIND_NVM_BACKUP: u32 = 13;
const KIND_ACK_COLD_RESET: u32 = 14;
const KIND_ACK_SHUTDOWN: u32 = 15;
const KIND_NOTIFY_DBG: u32 = 16;

/// A message of the client channel: requests from clients, events to them.
#[derive(Debug, Clone, PartialEq)]
pub enum WireMsg {
    Register { name: String, events: EventSet },
    RegisterDbg { name: String, events: EventSet },
    Acquire,
    Release,
    Restart { cause: RestartCause, debug: Option<DbgInfo> },
    Shutdown,
    NvmBackup,
    AckColdReset,
    AckShutdown,
    NotifyDbg(DbgInfo),
    /// A payload-less event (`MDM_DBG_INFO` is carried by [`WireMsg::DbgEvent`]).
    Event(ClientEvent),
    /// The `MDM_DBG_INFO` event and its record.
    DbgEvent(DbgInfo),
}

impl WireMsg {
    pub fn kind(&self) -> u32 {
        match self {
            WireMsg::Register { .. } => KIND_REGISTER,
            WireMsg::RegisterDbg { .. } => KIND_REGISTER_DBG,
            WireMsg::Acquire => KIND_ACQUIRE,
            WireMsg::Release => KIND_RELEASE,
            WireMsg::Restart { .. } => KIND_RESTART,
            WireMsg::Shutdown => KIND_SHUTDOWN,
            WireMsg::NvmBackup => KIND_NVM_BACKUP,
            WireMsg::AckColdReset => KIND_ACK_COLD_RESET,
            WireMsg::AckShutdown => KIND_ACK_SHUTDOWN,
            WireMsg::NotifyDbg(_) => KIND_NOTIFY_DBG,
            WireMsg::Event(evt) => *evt as u32,
            WireMsg::DbgEvent(_) => ClientEvent::MdmDbgInfo as u32,
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            WireMsg::Register { .. } => "REGISTER",
            WireMsg::RegisterDbg { .. } => "REGISTER_DBG",
            WireMsg::Acquire => "ACQUIRE",
            WireMsg::Release => "RELEASE",
            WireMsg::Restart { .. } => "RESTART",
            WireMsg::Shutdown => "SHUTDOWN",
            WireMsg::NvmBackup => "NVM_BACKUP",
            WireMsg::AckColdReset => "ACK_COLD_RESET",
            WireMsg::AckShutdown => "ACK_SHUTDOWN",
            WireMsg::NotifyDbg(_) => "NOTIFY_DBG",
            WireMsg::Event(evt) => evt.name(),
            WireMsg::DbgEvent(_) => ClientEvent::MdmDbgInfo.name(),
        }
    }

    /// Serializes the message into a complete frame (header included).
    pub fn encode(&self) -> Result<Vec<u8>, CmrmError> {
        let mut w = PayloadWriter::new();
        match self {
            WireMsg::Register { name, events } | WireMsg::RegisterDbg { name, events } => {
                if name.len() > NAME_MAX {
                    return Err(CmrmError::ProtocolViolation("client name too long"));
                }
                w.put_str(name);
                w.put_int(events.0 as i32);
            }
            WireMsg::Restart { cause, debug } => {
                w.put_int(*cause as i32);
                if let Some(debug) = debug {
                    put_dbg(&mut w, debug)?;
                }
            }
            WireMsg::NotifyDbg(debug) | WireMsg::DbgEvent(debug) => {
                put_dbg(&mut w, debug)?;
            }
            WireMsg::Event(evt) => {
                debug_assert!(*evt != ClientEvent::MdmDbgInfo);
            }
            WireMsg::Acquire
            | WireMsg::Release
            | WireMsg::Shutdown
            | WireMsg::NvmBackup
            | WireMsg::AckColdReset
            | WireMsg::AckShutdown => {}
        }
        w.into_frame(self.kind())
    }

    /// Deserializes a message from its kind and payload bytes.
    pub fn decode(kind: u32, payload: &[u8]) -> Result<Self, CmrmError> {
        let mut r = PayloadReader::new(payload);
        let msg = match kind {
            KIND_REGISTER | KIND_REGISTER_DBG => {
                let name = r.str_item()?;
                if name.len() > NAME_MAX {
                    return Err(CmrmError::ProtocolViolation("client name too long"));
                }
                let events = EventSet(r.int_item()? as u32);
                if kind == KIND_REGISTER {
                    WireMsg::Register { name, events }
                } else {
                    WireMsg::RegisterDbg { name, events }
                }
            }
            KIND_ACQUIRE => WireMsg::Acquire,
            KIND_RELEASE => WireMsg::Release,
            KIND_RESTART => {
                let cause = RestartCause::try_from(r.int_item()? as u32)?;
                let debug = if r.done() { None } else { Some(read_dbg(&mut r)?) };
                WireMsg::Restart { cause, debug }
            }
            KIND_SHUTDOWN => WireMsg::Shutdown,
            KIND_NVM_BACKUP => WireMsg::NvmBackup,
            KIND_ACK_COLD_RESET => WireMsg::AckColdReset,
            KIND_ACK_SHUTDOWN => WireMsg::AckShutdown,
            KIND_NOTIFY_DBG => WireMsg::NotifyDbg(read_dbg(&mut r)?),
            kind if kind == ClientEvent::MdmDbgInfo as u32 => WireMsg::DbgEvent(read_dbg(&mut r)?),
            kind if kind < ClientEvent::COUNT => WireMsg::Event(ClientEvent::try_from(kind)?),
            other => return Err(CmrmError::InvalidKind(other)),
        };
        r.finish()?;
        Ok(msg)
    }
}

/// Deserializes one complete frame (header included).
pub fn decode_frame(buf: &[u8]) -> Result<WireMsg, CmrmError> {
    if buf.len() < HEADER_SIZE {
        return Err(CmrmError::BufferTooShort);
    }
    let len = read_u32(&buf[0..4]) as usize;
    let kind = read_u32(&buf[4..8]);
    if HEADER_SIZE + len > MAX_FRAME_SIZE {
        return Err(CmrmError::FrameTooLarge(HEADER_SIZE + len));
    }
    if buf.len() != HEADER_SIZE + len {
        return Err(CmrmError::TruncatedFrame);
    }
    WireMsg::decode(kind, &buf[HEADER_SIZE..])
}

fn put_dbg(w: &mut PayloadWriter, debug: &DbgInfo) -> Result<(), CmrmError> {
    if debug.data.len() > MAX_DBG_DATA {
        return Err(CmrmError::ProtocolViolation("too many debug data strings"));
    }
    w.put_int(debug.kind as i32);
    w.put_int(debug.ap_log_size);
    w.put_int(debug.bp_log_size);
    w.put_int(debug.bp_log_time);
    for data in &debug.data {
        if data.len() > MAX_DBG_LEN {
            return Err(CmrmError::ProtocolViolation("debug data string too long"));
        }
        w.put_str(data);
    }
    Ok(())
}

fn read_dbg(r: &mut PayloadReader<'_>) -> Result<DbgInfo, CmrmError> {
    let kind = DbgKind::try_from(r.int_item()? as u32)?;
    let ap_log_size = r.int_item()?;
    let bp_log_size = r.int_item()?;
    let bp_log_time = r.int_item()?;
    let mut data = Vec::new();
    while !r.done() {
        if data.len() == MAX_DBG_DATA {
            return Err(CmrmError::ProtocolViolation("too many debug data strings"));
        }
        let item = r.str_item()?;
        if item.len() > MAX_DBG_LEN {
            return Err(CmrmError::ProtocolViolation("debug data string too long"));
        }
        data.push(item);
    }
    Ok(DbgInfo { kind, ap_log_size, bp_log_size, bp_log_time, data })
}

/// Reads a big-endian u32 from the first four bytes of `buf`.
pub fn read_u32(buf: &[u8]) -> u32 {
    u32::from_be_bytes([buf[0], buf[1], buf[2], buf[3]])
}

/// Incremental payload serializer producing the typed-item encoding.
pub(crate) struct PayloadWriter {
    buf: Vec<u8>,
}

impl PayloadWriter {
    pub fn new() -> Self {
        Self { buf: Vec::new() }
    }

    fn put_u32(&mut self, value: u32) {
        self.buf.extend_from_slice(&value.to_be_bytes());
    }

    pub fn put_int(&mut self, value: i32) {
        self.put_u32(4);
        self.put_u32(TAG_INT);
        self.put_u32(value as u32);
    }

    pub fn put_str(&mut self, value: &str) {
        self.put_u32(value.len() as u32);
        self.put_u32(TAG_STRING);
        self.buf.extend_from_slice(value.as_bytes());
    }

    /// Prepends the `len || kind` header and returns the complete frame.
    pub fn into_frame(self, kind: u32) -> Result<Vec<u8>, CmrmError> {
        let total = HEADER_SIZE + self.buf.len();
        if total > MAX_FRAME_SIZE {
            return Err(CmrmError::FrameTooLarge(total));
        }
        let mut frame = Vec::with_capacity(total);
        frame.extend_from_slice(&(self.buf.len() as u32).to_be_bytes());
        frame.extend_from_slice(&kind.to_be_bytes());
        frame.extend_from_slice(&self.buf);
        Ok(frame)
    }

    /// Prepends a `msg_id || len || kind` header (host-bridge framing).
    pub fn into_notifier_frame(self, msg_id: u32, kind: u32) -> Result<Vec<u8>, CmrmError> {
        let total = 12 + self.buf.len();
        if total > MAX_FRAME_SIZE {
            return Err(CmrmError::FrameTooLarge(total));
        }
        let mut frame = Vec::with_capacity(total);
        frame.extend_from_slice(&msg_id.to_be_bytes());
        frame.extend_from_slice(&(self.buf.len() as u32).to_be_bytes());
        frame.extend_from_slice(&kind.to_be_bytes());
        frame.extend_from_slice(&self.buf);
        Ok(frame)
    }
}

/// Incremental payload parser over the typed-item encoding.
pub(crate) struct PayloadReader<'a> {
    buf: &'a [u8],
    pos: usize,
}

impl<'a> PayloadReader<'a> {
    pub fn new(buf: &'a [u8]) -> Self {
        Self { buf, pos: 0 }
    }

    pub fn done(&self) -> bool {
        self.pos == self.buf.len()
    }

    /// Current read position, usable with [`PayloadReader::rewind`] to
    /// retry a parse with a different item type.
    pub(crate) fn position(&self) -> usize {
        self.pos
    }

    pub(crate) fn rewind(&mut self, pos: usize) {
        self.pos = pos;
    }

    pub fn finish(self) -> Result<(), CmrmError> {
        if self.done() { Ok(()) } else { Err(CmrmError::TrailingBytes) }
    }

    fn u32(&mut self) -> Result<u32, CmrmError> {
        if self.pos + 4 > self.buf.len() {
            return Err(CmrmError::TruncatedFrame);
        }
        let value = read_u32(&self.buf[self.pos..self.pos + 4]);
        self.pos += 4;
        Ok(value)
    }

    fn item(&mut self) -> Result<(u32, &'a [u8]), CmrmError> {
        let len = self.u32()? as usize;
        let tag = self.u32()?;
        if self.pos + len > self.buf.len() {
            return Err(CmrmError::TruncatedFrame);
        }
        let bytes = &self.buf[self.pos..self.pos + len];
        self.pos += len;
        Ok((tag, bytes))
    }

    pub fn int_item(&mut self) -> Result<i32, CmrmError> {
        let (tag, bytes) = self.item()?;
        if tag != TAG_INT {
            return Err(CmrmError::InvalidTag(tag));
        }
        if bytes.len() != 4 {
            return Err(CmrmError::InvalidItemLength(bytes.len() as u32));
        }
        Ok(read_u32(bytes) as i32)
    }

    pub fn str_item(&mut self) -> Result<String, CmrmError> {
        let (tag, bytes) = self.item()?;
        if tag != TAG_STRING {
            return Err(CmrmError::InvalidTag(tag));
        }
        core::str::from_utf8(bytes)
            .map(String::from)
            .map_err(|_| CmrmError::InvalidString)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use alloc::vec;

    fn corpus() -> Vec<WireMsg> {
        vec![
            WireMsg::Register {
                name: String::from("ril"),
                events: EventSet::of(&[ClientEvent::MdmDown, ClientEvent::MdmUp]),
            },
            WireMsg::RegisterDbg {
                name: String::from("sanity"),
                events: EventSet(0x7F),
            },
            WireMsg::Acquire,
            WireMsg::Release,
            WireMsg::Restart { cause: RestartCause::MdmErr, debug: None },
            WireMsg::Restart {
                cause: RestartCause::ApplyUpdate,
                debug: Some(DbgInfo::event(DbgKind::Apimr)),
            },
            WireMsg::Shutdown,
            WireMsg::NvmBackup,
            WireMsg::AckColdReset,
            WireMsg::AckShutdown,
            WireMsg::NotifyDbg(
                DbgInfo::full(DbgKind::Error).with_data(&["dump link error", "hsi"]),
            ),
            WireMsg::Event(ClientEvent::MdmDown),
            WireMsg::Event(ClientEvent::MdmUp),
            WireMsg::Event(ClientEvent::MdmOos),
            WireMsg::Event(ClientEvent::MdmColdReset),
            WireMsg::Event(ClientEvent::MdmShutdown),
            WireMsg::DbgEvent(DbgInfo::bare(DbgKind::TlvSuccess)),
        ]
    }

    #[test]
    fn codec_is_a_bijection_on_valid_messages() {
        for msg in corpus() {
            let frame = msg.encode().unwrap();
            let back = decode_frame(&frame).unwrap();
            assert_eq!(back, msg, "round trip failed for {}", msg.name());
        }
    }

    #[test]
    fn header_is_big_endian_and_excludes_itself() {
        let frame = WireMsg::Acquire.encode().unwrap();
        assert_eq!(frame, vec![0, 0, 0, 0, 0, 0, 0, 9]);
    }

    #[test]
    fn register_payload_layout() {
        let msg = WireMsg::Register {
            name: String::from("at"),
            events: EventSet(0x11),
        };
        let frame = msg.encode().unwrap();
        // name item: len=2, tag=String, "at"; bitmap item: len=4, tag=Int.
        let expected_payload = [
            0, 0, 0, 2, 0, 0, 0, 1, b'a', b't', 0, 0, 0, 4, 0, 0, 0, 0, 0, 0, 0, 0x11,
        ];
        assert_eq!(&frame[8..], &expected_payload);
        assert_eq!(read_u32(&frame[0..4]) as usize, expected_payload.len());
    }

    #[test]
    fn oversized_frame_is_rejected() {
        let mut frame = vec![0u8; MAX_FRAME_SIZE + 12];
        frame[0..4].copy_from_slice(&((MAX_FRAME_SIZE + 4) as u32).to_be_bytes());
        assert_eq!(
            decode_frame(&frame),
            Err(CmrmError::FrameTooLarge(HEADER_SIZE + MAX_FRAME_SIZE + 4))
        );
    }

    #[test]
    fn truncated_payload_is_rejected() {
        let mut frame = WireMsg::NotifyDbg(DbgInfo::event(DbgKind::Stats)).encode().unwrap();
        frame.truncate(frame.len() - 2);
        frame[3] -= 2;
        assert!(decode_frame(&frame).is_err());
    }

    #[test]
    fn trailing_bytes_are_rejected() {
        let mut frame = WireMsg::Acquire.encode().unwrap();
        frame[3] += 1;
        frame.push(0);
        assert_eq!(decode_frame(&frame), Err(CmrmError::TrailingBytes));
    }

    #[test]
    fn unknown_kind_is_rejected() {
        let frame = [0, 0, 0, 0, 0, 0, 0, 99];
        assert_eq!(decode_frame(&frame), Err(CmrmError::InvalidKind(99)));
    }

    #[test]
    fn negative_log_sizes_survive_the_round_trip() {
        let msg = WireMsg::NotifyDbg(DbgInfo::full(DbgKind::Info));
        let frame = msg.encode().unwrap();
        match decode_frame(&frame).unwrap() {
            WireMsg::NotifyDbg(dbg) => {
                assert_eq!(dbg.ap_log_size, -1);
                assert_eq!(dbg.bp_log_time, -1);
            }
            other => panic!("unexpected message {:?}", other),
        }
    }

    #[test]
    fn dbg_data_over_limit_is_rejected() {
        let mut dbg = DbgInfo::event(DbgKind::Error);
        dbg.data = (0..MAX_DBG_DATA + 1).map(|i| alloc::format!("{}", i)).collect();
        assert!(WireMsg::NotifyDbg(dbg).encode().is_err());
    }
}
