//! Payloads of the monitor and capability commands.

use std::fmt;

use bytes::Bytes;
use nfdbg_frame::{PayloadReader, PayloadWriter};

use crate::error::{Result, SessionError};

const MAX_INFO_LEN: usize = 256;

/// Which side of a ping a party is.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PingSource {
    /// The device's boot loader answered; no managed code is running.
    BootLoader,
    /// The managed runtime answered and can host a debugging session.
    Runtime,
    /// The debugging client.
    Host,
}

impl PingSource {
    pub fn code(self) -> u32 {
        match self {
            PingSource::BootLoader => 0,
            PingSource::Runtime => 1,
            PingSource::Host => 2,
        }
    }

    pub fn from_code(code: u32) -> Option<Self> {
        match code {
            0 => Some(PingSource::BootLoader),
            1 => Some(PingSource::Runtime),
            2 => Some(PingSource::Host),
            _ => None,
        }
    }
}

impl fmt::Display for PingSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            PingSource::BootLoader => "boot loader",
            PingSource::Runtime => "runtime",
            PingSource::Host => "host",
        })
    }
}

/// Decoded reply to `MONITOR_PING`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PingReply {
    pub source: PingSource,
    pub flags: u32,
}

impl PingReply {
    pub(crate) fn request(flags: u32) -> Bytes {
        PayloadWriter::new()
            .write_u32(PingSource::Host.code())
            .write_u32(flags)
            .finish()
    }

    pub fn decode(payload: &[u8]) -> Result<Self> {
        let mut r = PayloadReader::new(payload);
        let code = r.read_u32()?;
        let flags = r.read_u32()?;
        let source = PingSource::from_code(code)
            .ok_or_else(|| SessionError::Protocol(format!("unknown ping source {code:#x}")))?;
        Ok(Self { source, flags })
    }

    pub fn encode(&self) -> Bytes {
        PayloadWriter::new()
            .write_u32(self.source.code())
            .write_u32(self.flags)
            .finish()
    }
}

/// Four-part runtime version.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct RuntimeVersion {
    pub major: u16,
    pub minor: u16,
    pub build: u16,
    pub revision: u16,
}

impl fmt::Display for RuntimeVersion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}.{}.{}.{}",
            self.major, self.minor, self.build, self.revision
        )
    }
}

/// What the runtime told us it supports when the debugging session opened.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Capabilities {
    pub flags: u32,
    pub version: RuntimeVersion,
}

impl Capabilities {
    /// True if every bit of `mask` is set.
    pub fn contains(&self, mask: u32) -> bool {
        self.flags & mask == mask
    }

    pub fn decode(payload: &[u8]) -> Result<Self> {
        let mut r = PayloadReader::new(payload);
        let flags = r.read_u32()?;
        let version = RuntimeVersion {
            major: r.read_u16()?,
            minor: r.read_u16()?,
            build: r.read_u16()?,
            revision: r.read_u16()?,
        };
        Ok(Self { flags, version })
    }

    pub fn encode(&self) -> Bytes {
        PayloadWriter::new()
            .write_u32(self.flags)
            .write_u16(self.version.major)
            .write_u16(self.version.minor)
            .write_u16(self.version.build)
            .write_u16(self.version.revision)
            .finish()
    }
}

/// Identification strings from `MONITOR_TARGET_INFO`.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TargetInfo {
    pub target_name: String,
    pub platform_name: String,
    pub platform_info: String,
    pub runtime_version: String,
}

impl TargetInfo {
    pub fn decode(payload: &[u8]) -> Result<Self> {
        let mut r = PayloadReader::new(payload);
        let info = Self {
            target_name: read_info(&mut r, "target name")?,
            platform_name: read_info(&mut r, "platform name")?,
            platform_info: read_info(&mut r, "platform info")?,
            runtime_version: read_info(&mut r, "runtime version")?,
        };
        Ok(info)
    }

    pub fn encode(&self) -> Bytes {
        PayloadWriter::new()
            .write_string(&self.target_name)
            .write_string(&self.platform_name)
            .write_string(&self.platform_info)
            .write_string(&self.runtime_version)
            .finish()
    }
}

fn read_info(r: &mut PayloadReader<'_>, field: &str) -> Result<String> {
    let value = r.read_string()?;
    if value.len() > MAX_INFO_LEN {
        return Err(SessionError::Protocol(format!(
            "{field} exceeds maximum length ({} > {MAX_INFO_LEN})",
            value.len()
        )));
    }
    Ok(value)
}

/// How `MONITOR_REBOOT` restarts the device.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RebootOption {
    /// Full hardware reboot.
    Normal,
    /// Reboot and stay in the boot loader.
    EnterBootLoader,
    /// Restart the runtime only.
    RuntimeOnly,
    /// Detach the debugger and keep running.
    StopDebugger,
}

impl RebootOption {
    pub fn bits(self) -> u32 {
        match self {
            RebootOption::Normal => 0x0,
            RebootOption::EnterBootLoader => 0x1,
            RebootOption::RuntimeOnly => 0x2,
            RebootOption::StopDebugger => 0x4,
        }
    }

    pub(crate) fn request(self) -> Bytes {
        PayloadWriter::new().write_u32(self.bits()).finish()
    }
}
