//! Debugging and control client for devices running a managed embedded runtime.
//!
//! nfdbg talks to a device over TCP (the virtual device) or a serial port,
//! frames commands with a checksummed wire format, correlates replies by
//! sequence number and exposes the device's values as lazily fetched,
//! cached handles.
//!
//! # Crate Structure
//!
//! - [`transport`]: Byte-stream endpoints (TCP, serial, in-memory)
//! - [`frame`]: Wire framing, resynchronization and the command catalog
//! - [`session`]: Request/reply sessions, device lifecycle and registry
//! - [`runtime`]: Remote values (behind the `runtime` feature)

/// Re-export transport types.
pub mod transport {
    pub use nfdbg_transport::*;
}

/// Re-export frame types.
pub mod frame {
    pub use nfdbg_frame::*;
}

/// Re-export session and device types.
pub mod session {
    pub use nfdbg_session::*;
}

/// Re-export runtime value types (requires `runtime` feature).
#[cfg(feature = "runtime")]
pub mod runtime {
    pub use nfdbg_runtime::*;
}

pub use nfdbg_session::{Device, DeviceConfig, DeviceState, PortRegistry, Session, SessionError};
pub use nfdbg_transport::{ConnectResult, Transport};
