//! Byte-stream transport contract for talking to a debuggable device.
//!
//! This is the lowest layer of nfdbg. A [`Transport`] opens, reads, writes
//! and closes one endpoint and carries no protocol logic. Providers:
//! - [`TcpIpPort`]: TCP, usually the virtual device on loopback
//! - [`SerialPort`]: a tty device node (Unix)
//! - [`MemoryTransport`]: an in-process pair for simulated devices

pub mod error;
pub mod memory;
pub mod tcp;
pub mod traits;

#[cfg(unix)]
pub mod serial;
#[cfg(unix)]
mod sys;

use std::sync::{Arc, Mutex, MutexGuard, PoisonError, Weak};

pub use error::{Result, TransportError};
pub use memory::{MemoryPeer, MemoryTransport};
pub use tcp::{instance_id_for_port, TcpConfig, TcpIpPort, TCPIP_PORT_TYPE};
pub use traits::{ConnectResult, DeviceRegistry, ReadOutcome, Transport};

#[cfg(unix)]
pub use serial::{SerialConfig, SerialPort};

/// Non-owning link from a transport back to the registry that manages it.
#[derive(Clone, Default)]
pub(crate) struct RegistryLink(Option<Weak<dyn DeviceRegistry>>);

impl RegistryLink {
    pub(crate) fn new(registry: &Arc<dyn DeviceRegistry>) -> Self {
        Self(Some(Arc::downgrade(registry)))
    }

    pub(crate) fn dispose(&self, instance_id: &str) {
        if let Some(registry) = self.0.as_ref().and_then(Weak::upgrade) {
            registry.dispose_device(instance_id);
        }
    }
}

/// Lock a mutex, recovering the data if a panicking thread poisoned it.
pub(crate) fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}
