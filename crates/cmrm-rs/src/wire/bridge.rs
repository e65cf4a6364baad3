// crates/cmrm-rs/src/wire/bridge.rs

//! Host notification bridge wire format.
//!
//! Bridge clients send `size(u32 BE) || kind(u32 BE) || payload`. The
//! bridge daemon prepends a monotonically increasing `msg_id(u32 BE)` when
//! forwarding a message to the host notifier, and the notifier replies
//! with the same `msg_id` as a 4-byte acknowledgement. Intent parameters
//! are name-prefix packed: `"instId%d"` with value `1` serializes as one
//! string item `"instId"` followed by one int item `1`.

use super::{PayloadReader, PayloadWriter};
use crate::types::MAX_FRAME_SIZE;
use crate::CmrmError;
use alloc::string::String;
use alloc::vec::Vec;

/// Size of the `size || kind` client-side header.
pub const CLIENT_HEADER_SIZE: usize = 8;
/// Size of the `msg_id || size || kind` notifier-side header.
pub const NOTIFIER_HEADER_SIZE: usize = 12;

const KIND_WAKELOCK_ACQUIRE: u32 = 0;
const KIND_WAKELOCK_RELEASE: u32 = 1;
const KIND_START_SERVICE: u32 = 2;
const KIND_BROADCAST_INTENT: u32 = 3;
/// First invalid command kind.
pub const KIND_COUNT: u32 = 4;

/// A typed intent parameter value.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum IntentValue {
    Int(i32),
    Str(String),
}

/// One named intent parameter.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IntentParam {
    pub name: String,
    pub value: IntentValue,
}

impl IntentParam {
    pub fn int(name: &str, value: i32) -> Self {
        Self { name: String::from(name), value: IntentValue::Int(value) }
    }

    pub fn str(name: &str, value: &str) -> Self {
        Self { name: String::from(name), value: IntentValue::Str(String::from(value)) }
    }
}

/// A command of the bridge channel.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BridgeCommand {
    WakelockAcquire,
    WakelockRelease,
    StartService { package: String, class: String },
    BroadcastIntent { name: String, params: Vec<IntentParam> },
}

impl BridgeCommand {
    pub fn kind(&self) -> u32 {
        match self {
            BridgeCommand::WakelockAcquire => KIND_WAKELOCK_ACQUIRE,
            BridgeCommand::WakelockRelease => KIND_WAKELOCK_RELEASE,
            BridgeCommand::StartService { .. } => KIND_START_SERVICE,
            BridgeCommand::BroadcastIntent { .. } => KIND_BROADCAST_INTENT,
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            BridgeCommand::WakelockAcquire => "WAKE_ACQUIRE",
            BridgeCommand::WakelockRelease => "WAKE_RELEASE",
            BridgeCommand::StartService { .. } => "START_SERVICE",
            BridgeCommand::BroadcastIntent { .. } => "BROADCAST_INTENT",
        }
    }

    pub fn name_of(kind: u32) -> &'static str {
        match kind {
            KIND_WAKELOCK_ACQUIRE => "WAKE_ACQUIRE",
            KIND_WAKELOCK_RELEASE => "WAKE_RELEASE",
            KIND_START_SERVICE => "START_SERVICE",
            KIND_BROADCAST_INTENT => "BROADCAST_INTENT",
            _ => "INVALID",
        }
    }

    fn payload(&self) -> Result<PayloadWriter, CmrmError> {
        let mut w = PayloadWriter::new();
        match self {
            BridgeCommand::WakelockAcquire | BridgeCommand::WakelockRelease => {}
            BridgeCommand::StartService { package, class } => {
                w.put_str(package);
                w.put_str(class);
            }
            BridgeCommand::BroadcastIntent { name, params } => {
                w.put_str(name);
                for param in params {
                    w.put_str(&param.name);
                    match &param.value {
                        IntentValue::Int(value) => w.put_int(*value),
                        IntentValue::Str(value) => w.put_str(value),
                    }
                }
            }
        }
        Ok(w)
    }

    /// Serializes a client-side frame (`size || kind || payload`).
    pub fn encode(&self) -> Result<Vec<u8>, CmrmError> {
        self.payload()?.into_frame(self.kind())
    }

    /// Serializes a notifier-side frame (`msg_id || size || kind || payload`).
    pub fn encode_with_id(&self, msg_id: u32) -> Result<Vec<u8>, CmrmError> {
        self.payload()?.into_notifier_frame(msg_id, self.kind())
    }

    /// Deserializes a command from its kind and payload bytes. Wakelock
    /// commands must carry an empty payload.
    pub fn decode(kind: u32, payload: &[u8]) -> Result<Self, CmrmError> {
        if payload.len() + CLIENT_HEADER_SIZE > MAX_FRAME_SIZE {
            return Err(CmrmError::FrameTooLarge(payload.len() + CLIENT_HEADER_SIZE));
        }
        let mut r = PayloadReader::new(payload);
        let cmd = match kind {
            KIND_WAKELOCK_ACQUIRE | KIND_WAKELOCK_RELEASE => {
                if !payload.is_empty() {
                    return Err(CmrmError::ProtocolViolation("wakelock message carries data"));
                }
                if kind == KIND_WAKELOCK_ACQUIRE {
                    BridgeCommand::WakelockAcquire
                } else {
                    BridgeCommand::WakelockRelease
                }
            }
            KIND_START_SERVICE => BridgeCommand::StartService {
                package: r.str_item()?,
                class: r.str_item()?,
            },
            KIND_BROADCAST_INTENT => {
                let name = r.str_item()?;
                let mut params = Vec::new();
                while !r.done() {
                    let pname = r.str_item()?;
                    // The value tag decides the parameter type.
                    let save = r.position();
                    let value = match r.int_item() {
                        Ok(value) => IntentValue::Int(value),
                        Err(CmrmError::InvalidTag(_)) => {
                            r.rewind(save);
                            IntentValue::Str(r.str_item()?)
                        }
                        Err(err) => return Err(err),
                    };
                    params.push(IntentParam { name: pname, value });
                }
                BridgeCommand::BroadcastIntent { name, params }
            }
            other => return Err(CmrmError::InvalidBridgeCommand(other)),
        };
        r.finish()?;
        Ok(cmd)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use alloc::vec;

    #[test]
    fn wakelock_frames_have_no_payload() {
        let frame = BridgeCommand::WakelockAcquire.encode().unwrap();
        assert_eq!(frame, vec![0, 0, 0, 0, 0, 0, 0, 0]);
        let frame = BridgeCommand::WakelockRelease.encode().unwrap();
        assert_eq!(frame, vec![0, 0, 0, 0, 0, 0, 0, 1]);
    }

    #[test]
    fn notifier_frame_prepends_the_message_id() {
        let frame = BridgeCommand::WakelockAcquire.encode_with_id(0x0102_0304).unwrap();
        assert_eq!(frame[0..4], [1, 2, 3, 4]);
        assert_eq!(&frame[4..], &BridgeCommand::WakelockAcquire.encode().unwrap()[..]);
    }

    #[test]
    fn intent_params_are_name_prefix_packed() {
        let cmd = BridgeCommand::BroadcastIntent {
            name: String::from("cmrm.intent.MODEM_COLD_RESET"),
            params: vec![IntentParam::int("instId", 1)],
        };
        let frame = cmd.encode().unwrap();
        let decoded = BridgeCommand::decode(
            super::super::read_u32(&frame[4..8]),
            &frame[CLIENT_HEADER_SIZE..],
        )
        .unwrap();
        assert_eq!(decoded, cmd);
    }

    #[test]
    fn commands_round_trip() {
        let corpus = vec![
            BridgeCommand::WakelockAcquire,
            BridgeCommand::WakelockRelease,
            BridgeCommand::StartService {
                package: String::from("com.host.telephony"),
                class: String::from("NotifierService"),
            },
            BridgeCommand::BroadcastIntent {
                name: String::from("cmrm.intent.CORE_DUMP_WARNING"),
                params: vec![IntentParam::int("instId", 2), IntentParam::str("link", "hsi")],
            },
        ];
        for cmd in corpus {
            let frame = cmd.encode().unwrap();
            let kind = super::super::read_u32(&frame[4..8]);
            let decoded = BridgeCommand::decode(kind, &frame[CLIENT_HEADER_SIZE..]).unwrap();
            assert_eq!(decoded, cmd);
        }
    }

    #[test]
    fn wakelock_with_payload_is_a_violation() {
        assert!(matches!(
            BridgeCommand::decode(0, &[0, 0, 0, 0]),
            Err(CmrmError::ProtocolViolation(_))
        ));
    }

    #[test]
    fn unknown_command_is_rejected() {
        assert_eq!(
            BridgeCommand::decode(KIND_COUNT, &[]),
            Err(CmrmError::InvalidBridgeCommand(KIND_COUNT))
        );
    }
}
