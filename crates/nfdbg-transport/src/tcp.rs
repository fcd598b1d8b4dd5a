use std::io::{ErrorKind, Read, Write};
use std::net::{IpAddr, Ipv4Addr, Shutdown, SocketAddr, TcpStream};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use bytes::Bytes;
use tracing::{debug, info, warn};

use crate::error::{Result, TransportError};
use crate::traits::{is_fatal, is_timeout, ConnectResult, DeviceRegistry, ReadOutcome, Transport};
use crate::{lock, RegistryLink};

/// Instance id prefix for TCP endpoints: `TcpIp:<port>`.
pub const TCPIP_PORT_TYPE: &str = "TcpIp:";

/// Configuration for [`TcpIpPort`].
#[derive(Debug, Clone)]
pub struct TcpConfig {
    /// Host to connect to. The virtual device listens on loopback.
    pub host: IpAddr,
    /// Maximum time to wait for the TCP connection to be established.
    pub connect_timeout: Duration,
    /// Read timeout applied to the socket; a read returns `TimedOut` after it.
    pub read_timeout: Duration,
}

impl Default for TcpConfig {
    fn default() -> Self {
        Self {
            host: IpAddr::V4(Ipv4Addr::LOCALHOST),
            connect_timeout: Duration::from_secs(2),
            read_timeout: Duration::from_millis(100),
        }
    }
}

/// TCP transport to a device (typically the virtual device on loopback).
pub struct TcpIpPort {
    instance_id: String,
    port: u16,
    config: TcpConfig,
    stream: Mutex<Option<Arc<TcpStream>>>,
    registry: RegistryLink,
}

impl TcpIpPort {
    /// Create a port from an instance id of the form `TcpIp:<port>`.
    pub fn new(instance_id: impl Into<String>) -> Result<Self> {
        Self::with_config(instance_id, TcpConfig::default())
    }

    /// Create a port from an instance id with explicit configuration.
    pub fn with_config(instance_id: impl Into<String>, config: TcpConfig) -> Result<Self> {
        let instance_id = instance_id.into();
        let port = parse_port(&instance_id)?;
        Ok(Self {
            instance_id,
            port,
            config,
            stream: Mutex::new(None),
            registry: RegistryLink::default(),
        })
    }

    /// Create a port for a TCP port number.
    pub fn for_port(port: u16) -> Self {
        Self {
            instance_id: instance_id_for_port(port),
            port,
            config: TcpConfig::default(),
            stream: Mutex::new(None),
            registry: RegistryLink::default(),
        }
    }

    /// Replace the socket settings.
    pub fn with_tcp_config(mut self, config: TcpConfig) -> Self {
        self.config = config;
        self
    }

    /// Attach the registry notified on forced disconnect.
    pub fn with_registry(mut self, registry: &Arc<dyn DeviceRegistry>) -> Self {
        self.registry = RegistryLink::new(registry);
        self
    }

    /// TCP port number this endpoint connects to.
    pub fn port(&self) -> u16 {
        self.port
    }

    fn current(&self) -> Result<Arc<TcpStream>> {
        lock(&self.stream)
            .as_ref()
            .cloned()
            .ok_or(TransportError::NotConnected)
    }

    /// Drop the stream, but only if it is still the one the caller used.
    fn release(&self, used: &Arc<TcpStream>) {
        let mut guard = lock(&self.stream);
        if guard.as_ref().is_some_and(|s| Arc::ptr_eq(s, used)) {
            if let Some(stream) = guard.take() {
                let _ = stream.shutdown(Shutdown::Both);
            }
            debug!(instance_id = %self.instance_id, "tcp stream released after failure");
        }
    }
}

impl Transport for TcpIpPort {
    fn instance_id(&self) -> &str {
        &self.instance_id
    }

    fn connect(&self) -> ConnectResult {
        let mut guard = lock(&self.stream);
        if guard.is_some() {
            return ConnectResult::Connected;
        }

        let addr = SocketAddr::new(self.config.host, self.port);
        let stream = match TcpStream::connect_timeout(&addr, self.config.connect_timeout) {
            Ok(stream) => stream,
            Err(err) => {
                debug!(instance_id = %self.instance_id, %addr, error = %err, "tcp connect failed");
                return ConnectResult::from_open_error(&err);
            }
        };

        if let Err(err) = stream.set_read_timeout(Some(self.config.read_timeout)) {
            warn!(instance_id = %self.instance_id, error = %err, "failed to set read timeout");
            return ConnectResult::ExceptionOccurred;
        }
        let _ = stream.set_nodelay(true);

        *guard = Some(Arc::new(stream));
        info!(instance_id = %self.instance_id, %addr, "connected to tcp device");
        ConnectResult::Connected
    }

    fn disconnect(&self, force: bool) {
        debug!(instance_id = %self.instance_id, force, "closing tcp device");

        if let Some(stream) = lock(&self.stream).take() {
            let _ = stream.shutdown(Shutdown::Both);
        }

        if force {
            self.registry.dispose(&self.instance_id);
        }
    }

    fn is_connected(&self) -> bool {
        lock(&self.stream).is_some()
    }

    fn send(&self, buffer: &[u8]) -> Result<usize> {
        let stream = self.current()?;
        match (&*stream).write_all(buffer) {
            Ok(()) => Ok(buffer.len()),
            Err(err) => {
                if is_fatal(&err) {
                    self.release(&stream);
                }
                Err(err.into())
            }
        }
    }

    fn read(&self, max_bytes: usize) -> Result<ReadOutcome> {
        if max_bytes == 0 {
            return Err(std::io::Error::new(ErrorKind::InvalidInput, "zero-length read").into());
        }
        let stream = self.current()?;
        let mut buf = vec![0u8; max_bytes];

        let read = loop {
            match (&*stream).read(&mut buf) {
                Err(err) if err.kind() == ErrorKind::Interrupted => continue,
                other => break other,
            }
        };

        match read {
            Ok(0) => {
                self.release(&stream);
                Ok(ReadOutcome::Closed)
            }
            Ok(n) => {
                buf.truncate(n);
                Ok(ReadOutcome::Data(Bytes::from(buf)))
            }
            Err(err) if is_timeout(&err) => Ok(ReadOutcome::TimedOut),
            Err(err) => {
                if is_fatal(&err) {
                    self.release(&stream);
                }
                Err(err.into())
            }
        }
    }

    fn available_bytes(&self) -> i64 {
        let Ok(stream) = self.current() else {
            return -1;
        };
        available(&stream)
    }
}

impl std::fmt::Debug for TcpIpPort {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TcpIpPort")
            .field("instance_id", &self.instance_id)
            .field("connected", &self.is_connected())
            .finish()
    }
}

#[cfg(unix)]
fn available(stream: &TcpStream) -> i64 {
    use std::os::fd::AsRawFd;
    crate::sys::bytes_available(stream.as_raw_fd())
        .map(|n| n as i64)
        .unwrap_or(0)
}

#[cfg(not(unix))]
fn available(_stream: &TcpStream) -> i64 {
    0
}

/// Build the instance id for a TCP port number.
pub fn instance_id_for_port(port: u16) -> String {
    format!("{TCPIP_PORT_TYPE}{port}")
}

fn parse_port(instance_id: &str) -> Result<u16> {
    instance_id
        .strip_prefix(TCPIP_PORT_TYPE)
        .and_then(|suffix| suffix.parse::<u16>().ok())
        .ok_or_else(|| TransportError::InvalidInstanceId(instance_id.to_string()))
}
