// crates/cmrm-rs/src/error.rs

use core::fmt;

/// Portable, descriptive error type for the resource manager core.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CmrmError {
    /// The provided buffer is too small for the operation.
    BufferTooShort,
    /// A frame declares a size above the allowed maximum.
    FrameTooLarge(usize),
    /// A frame ended before its declared payload did.
    TruncatedFrame,
    /// A frame carried bytes after its last payload item.
    TrailingBytes,
    /// A value in the frame is not a valid message kind.
    InvalidKind(u32),
    /// A payload item carries an unknown data-type tag.
    InvalidTag(u32),
    /// A payload item has a length inconsistent with its tag.
    InvalidItemLength(u32),
    /// A string payload item is not valid UTF-8.
    InvalidString,
    /// A value in the frame is not a valid client event.
    InvalidEvent(u32),
    /// A value in the frame is not a valid restart cause.
    InvalidRestartCause(u32),
    /// A value in the frame is not a valid debug-info kind.
    InvalidDbgKind(u32),
    /// A value in the frame is not a valid bridge command.
    InvalidBridgeCommand(u32),
    /// The peer broke the protocol (wrong registration, duplicate
    /// registration, message from an unregistered client, ...).
    ProtocolViolation(&'static str),
    /// All client slots are in use.
    TooManyClients,
    /// The collaborator rejected the operation.
    OperationFailed(&'static str),
}

impl fmt::Display for CmrmError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::BufferTooShort => write!(f, "Buffer is too short"),
            Self::FrameTooLarge(size) => write!(f, "Frame of {} bytes exceeds maximum", size),
            Self::TruncatedFrame => write!(f, "Frame truncated before end of payload"),
            Self::TrailingBytes => write!(f, "Frame carries trailing bytes"),
            Self::InvalidKind(v) => write!(f, "Invalid message kind: {}", v),
            Self::InvalidTag(v) => write!(f, "Invalid payload data-type tag: {}", v),
            Self::InvalidItemLength(v) => write!(f, "Invalid payload item length: {}", v),
            Self::InvalidString => write!(f, "Payload string is not valid UTF-8"),
            Self::InvalidEvent(v) => write!(f, "Invalid client event: {}", v),
            Self::InvalidRestartCause(v) => write!(f, "Invalid restart cause: {}", v),
            Self::InvalidDbgKind(v) => write!(f, "Invalid debug-info kind: {}", v),
            Self::InvalidBridgeCommand(v) => write!(f, "Invalid bridge command: {}", v),
            Self::ProtocolViolation(s) => write!(f, "Protocol violation: {}", s),
            Self::TooManyClients => write!(f, "All client slots are in use"),
            Self::OperationFailed(s) => write!(f, "Operation failed: {}", s),
        }
    }
}

#[cfg(feature = "std")]
impl std::error::Error for CmrmError {}
