//! Request/reply sessions and device connection management.
//!
//! A [`Session`] multiplexes concurrent requests over one connected transport
//! and routes unsolicited frames to listeners. A [`Device`] owns a transport
//! and drives it through connect, debugging-session setup and disconnect.
//! [`PortRegistry`] keeps the devices a client knows about.

pub mod config;
pub mod device;
pub mod engine;
pub mod error;
pub mod messages;
mod pending;
pub mod registry;
pub mod sim;
pub mod subscription;

use std::sync::{Mutex, MutexGuard, PoisonError};

pub use config::{DeviceConfig, RetryPolicy, SessionConfig};
pub use device::{Device, DeviceState};
pub use engine::Session;
pub use error::{Result, SessionError};
pub use messages::{
    Capabilities, PingReply, PingSource, RebootOption, RuntimeVersion, TargetInfo,
};
pub use registry::PortRegistry;
pub use sim::{Response, SimulatedDevice};
pub use subscription::SubscriptionId;

pub(crate) fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}
