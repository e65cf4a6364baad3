// crates/cmrm-rs/src/dbg.rs

use crate::CmrmError;
use alloc::string::String;
use alloc::vec::Vec;

/// Maximum number of data strings in a debug-info record.
pub const MAX_DBG_DATA: usize = 10;
/// Maximum length of one debug-info data string, in bytes. Bounded so a
/// full record always fits one wire frame.
pub const MAX_DBG_LEN: usize = 128;

/// Log-size sentinel: use the platform default size.
pub const DBG_DEFAULT_LOG_SIZE: i32 = -1;
/// Log-size sentinel: do not collect this log.
pub const DBG_DEFAULT_NO_LOG: i32 = 0;
/// Log-time sentinel: use the platform default window.
pub const DBG_DEFAULT_LOG_TIME: i32 = -1;

/// Kind of a diagnostic event forwarded to clients.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u32)]
pub enum DbgKind {
    Stats = 0,
    Info = 1,
    Error = 2,
    PlatformReboot = 3,
    DumpStart = 4,
    DumpEnd = 5,
    /// Reset requested through the client API without attached debug data.
    Apimr = 6,
    SelfReset = 7,
    FwSuccess = 8,
    FwFailure = 9,
    TlvNone = 10,
    TlvSuccess = 11,
    TlvFailure = 12,
    NvmBackupSuccess = 13,
    NvmBackupFailure = 14,
}

impl DbgKind {
    pub fn name(self) -> &'static str {
        match self {
            DbgKind::Stats => "STATS",
            DbgKind::Info => "INFO",
            DbgKind::Error => "ERROR",
            DbgKind::PlatformReboot => "PLATFORM_REBOOT",
            DbgKind::DumpStart => "DUMP_START",
            DbgKind::DumpEnd => "DUMP_END",
            DbgKind::Apimr => "APIMR",
            DbgKind::SelfReset => "SELF_RESET",
            DbgKind::FwSuccess => "FW_SUCCESS",
            DbgKind::FwFailure => "FW_FAILURE",
            DbgKind::TlvNone => "TLV_NONE",
            DbgKind::TlvSuccess => "TLV_SUCCESS",
            DbgKind::TlvFailure => "TLV_FAILURE",
            DbgKind::NvmBackupSuccess => "NVM_BACKUP_SUCCESS",
            DbgKind::NvmBackupFailure => "NVM_BACKUP_FAILURE",
        }
    }
}

impl TryFrom<u32> for DbgKind {
    type Error = CmrmError;

    fn try_from(value: u32) -> Result<Self, CmrmError> {
        Ok(match value {
            0 => DbgKind::Stats,
            1 => DbgKind::Info,
            2 => DbgKind::Error,
            3 => DbgKind::PlatformReboot,
            4 => DbgKind::DumpStart,
            5 => DbgKind::DumpEnd,
            6 => DbgKind::Apimr,
            7 => DbgKind::SelfReset,
            8 => DbgKind::FwSuccess,
            9 => DbgKind::FwFailure,
            10 => DbgKind::TlvNone,
            11 => DbgKind::TlvSuccess,
            12 => DbgKind::TlvFailure,
            13 => DbgKind::NvmBackupSuccess,
            14 => DbgKind::NvmBackupFailure,
            v => return Err(CmrmError::InvalidDbgKind(v)),
        })
    }
}

/// Diagnostic event: a kind tag, log-sizing hints, and free-form data
/// strings. Forwarded as `MDM_DBG_INFO` to interested clients.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DbgInfo {
    pub kind: DbgKind,
    pub ap_log_size: i32,
    pub bp_log_size: i32,
    pub bp_log_time: i32,
    pub data: Vec<String>,
}

impl DbgInfo {
    /// Event with AP logs at the default size and no BP logs.
    pub fn event(kind: DbgKind) -> Self {
        Self {
            kind,
            ap_log_size: DBG_DEFAULT_LOG_SIZE,
            bp_log_size: DBG_DEFAULT_NO_LOG,
            bp_log_time: DBG_DEFAULT_NO_LOG,
            data: Vec::new(),
        }
    }

    /// Event with AP and BP logs at the default size and window.
    pub fn full(kind: DbgKind) -> Self {
        Self {
            kind,
            ap_log_size: DBG_DEFAULT_LOG_SIZE,
            bp_log_size: DBG_DEFAULT_LOG_SIZE,
            bp_log_time: DBG_DEFAULT_LOG_TIME,
            data: Vec::new(),
        }
    }

    /// Event with no log collection at all.
    pub fn bare(kind: DbgKind) -> Self {
        Self {
            kind,
            ap_log_size: DBG_DEFAULT_NO_LOG,
            bp_log_size: DBG_DEFAULT_NO_LOG,
            bp_log_time: DBG_DEFAULT_NO_LOG,
            data: Vec::new(),
        }
    }

    pub fn with_data(mut self, data: &[&str]) -> Self {
        self.data = data.iter().map(|s| String::from(*s)).collect();
        self
    }

    /// Clamps the record to the wire limits: at most [`MAX_DBG_DATA`]
    /// strings of at most [`MAX_DBG_LEN`] bytes each.
    pub fn truncate(&mut self) {
        self.data.truncate(MAX_DBG_DATA);
        for s in &mut self.data {
            if s.len() > MAX_DBG_LEN {
                let mut cut = MAX_DBG_LEN;
                while !s.is_char_boundary(cut) {
                    cut -= 1;
                }
                s.truncate(cut);
            }
        }
    }
}
