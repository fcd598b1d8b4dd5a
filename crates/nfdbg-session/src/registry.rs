use std::collections::HashMap;
use std::sync::{Arc, Mutex, Weak};

use nfdbg_transport::{instance_id_for_port, DeviceRegistry, TcpConfig, TcpIpPort};
use tracing::debug;

use crate::config::DeviceConfig;
use crate::device::Device;
use crate::lock;

/// Devices known to this client, keyed by transport instance id.
///
/// Transports created here carry a link back to the registry so that a
/// forced disconnect removes the device.
pub struct PortRegistry {
    me: Weak<PortRegistry>,
    devices: Mutex<HashMap<String, Arc<Device>>>,
}

impl PortRegistry {
    pub fn new() -> Arc<Self> {
        Arc::new_cyclic(|me| Self {
            me: me.clone(),
            devices: Mutex::new(HashMap::new()),
        })
    }

    /// Instance id of the TCP endpoint on `port`.
    pub fn tcp_instance_id(port: u16) -> String {
        instance_id_for_port(port)
    }

    /// Add a device. If one with the same instance id is already registered,
    /// that one is kept and returned.
    pub fn register(&self, device: Arc<Device>) -> Arc<Device> {
        let mut devices = lock(&self.devices);
        let entry = devices
            .entry(device.instance_id().to_owned())
            .or_insert_with(|| {
                debug!(instance_id = %device.instance_id(), "device registered");
                Arc::clone(&device)
            });
        Arc::clone(entry)
    }

    /// The device for a TCP port, created on first use.
    pub fn tcp_device(&self, port: u16, tcp: TcpConfig, config: DeviceConfig) -> Arc<Device> {
        if let Some(device) = self.lookup(&instance_id_for_port(port)) {
            return device;
        }
        let mut transport = TcpIpPort::for_port(port).with_tcp_config(tcp);
        if let Some(handle) = self.handle() {
            transport = transport.with_registry(&handle);
        }
        self.register(Arc::new(Device::with_config(Arc::new(transport), config)))
    }

    /// The device for a serial device node, created on first use.
    #[cfg(unix)]
    pub fn serial_device(
        &self,
        path: impl AsRef<std::path::Path>,
        serial: nfdbg_transport::SerialConfig,
        config: DeviceConfig,
    ) -> Arc<Device> {
        let path = path.as_ref();
        if let Some(device) = self.lookup(&path.display().to_string()) {
            return device;
        }
        let mut transport = nfdbg_transport::SerialPort::with_config(path, serial);
        if let Some(handle) = self.handle() {
            transport = transport.with_registry(&handle);
        }
        self.register(Arc::new(Device::with_config(Arc::new(transport), config)))
    }

    pub fn lookup(&self, instance_id: &str) -> Option<Arc<Device>> {
        lock(&self.devices).get(instance_id).cloned()
    }

    /// Registered instance ids, sorted.
    pub fn instance_ids(&self) -> Vec<String> {
        let mut ids: Vec<String> = lock(&self.devices).keys().cloned().collect();
        ids.sort();
        ids
    }

    pub fn len(&self) -> usize {
        lock(&self.devices).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// This registry as the capability transports call back into.
    pub fn handle(&self) -> Option<Arc<dyn DeviceRegistry>> {
        self.me.upgrade().map(|me| me as Arc<dyn DeviceRegistry>)
    }
}

impl DeviceRegistry for PortRegistry {
    fn dispose_device(&self, instance_id: &str) {
        let removed = lock(&self.devices).remove(instance_id);
        if removed.is_some() {
            debug!(%instance_id, "device disposed");
        }
        // Dropped outside the lock: the last handle may close a session.
        drop(removed);
    }
}

impl std::fmt::Debug for PortRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PortRegistry")
            .field("devices", &self.instance_ids())
            .finish()
    }
}
