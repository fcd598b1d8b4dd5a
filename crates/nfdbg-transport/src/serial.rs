use std::fs::{File, OpenOptions};
use std::io::{ErrorKind, Read, Write};
use std::os::fd::AsRawFd;
use std::os::unix::fs::OpenOptionsExt;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use bytes::Bytes;
use tracing::{debug, info, warn};

use crate::error::{Result, TransportError};
use crate::traits::{is_fatal, is_timeout, ConnectResult, DeviceRegistry, ReadOutcome, Transport};
use crate::{lock, RegistryLink};

/// Configuration for [`SerialPort`].
#[derive(Debug, Clone)]
pub struct SerialConfig {
    /// Line speed. nanoFramework targets default to 921600 on most boards.
    pub baud_rate: u32,
    /// Read timeout; rounded up to tenths of a second by the tty driver.
    pub read_timeout: Duration,
}

impl Default for SerialConfig {
    fn default() -> Self {
        Self {
            baud_rate: 115_200,
            read_timeout: Duration::from_millis(100),
        }
    }
}

/// Serial transport over a tty device node (`/dev/ttyACM0`, `/dev/cu.usbmodem1`, ...).
///
/// The instance id is the device path.
pub struct SerialPort {
    instance_id: String,
    path: PathBuf,
    config: SerialConfig,
    file: Mutex<Option<Arc<File>>>,
    registry: RegistryLink,
}

impl SerialPort {
    /// Create a serial port for a device path with default settings.
    pub fn new(path: impl AsRef<Path>) -> Self {
        Self::with_config(path, SerialConfig::default())
    }

    /// Create a serial port for a device path with explicit settings.
    pub fn with_config(path: impl AsRef<Path>, config: SerialConfig) -> Self {
        let path = path.as_ref().to_path_buf();
        Self {
            instance_id: path.display().to_string(),
            path,
            config,
            file: Mutex::new(None),
            registry: RegistryLink::default(),
        }
    }

    /// Attach the registry notified on forced disconnect.
    pub fn with_registry(mut self, registry: &Arc<dyn DeviceRegistry>) -> Self {
        self.registry = RegistryLink::new(registry);
        self
    }

    /// The device node this port opens.
    pub fn path(&self) -> &Path {
        &self.path
    }

    fn current(&self) -> Result<Arc<File>> {
        lock(&self.file)
            .as_ref()
            .cloned()
            .ok_or(TransportError::NotConnected)
    }

    fn release(&self, used: &Arc<File>) {
        let mut guard = lock(&self.file);
        if guard.as_ref().is_some_and(|f| Arc::ptr_eq(f, used)) {
            guard.take();
            debug!(instance_id = %self.instance_id, "serial device released after failure");
        }
    }

    fn open(&self) -> std::io::Result<File> {
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .custom_flags(libc::O_NOCTTY)
            .open(&self.path)?;
        crate::sys::configure_raw_tty(file.as_raw_fd(), self.config.baud_rate, self.config.read_timeout)?;
        Ok(file)
    }
}

impl Transport for SerialPort {
    fn instance_id(&self) -> &str {
        &self.instance_id
    }

    fn connect(&self) -> ConnectResult {
        let mut guard = lock(&self.file);
        if guard.is_some() {
            return ConnectResult::Connected;
        }

        match self.open() {
            Ok(file) => {
                *guard = Some(Arc::new(file));
                info!(
                    instance_id = %self.instance_id,
                    baud_rate = self.config.baud_rate,
                    "opened serial device"
                );
                ConnectResult::Connected
            }
            Err(err) if err.kind() == ErrorKind::NotFound => {
                debug!(instance_id = %self.instance_id, "serial device not present");
                ConnectResult::NotConnected
            }
            Err(err) => {
                warn!(instance_id = %self.instance_id, error = %err, "failed to open serial device");
                ConnectResult::from_open_error(&err)
            }
        }
    }

    fn disconnect(&self, force: bool) {
        debug!(instance_id = %self.instance_id, force, "closing serial device");
        lock(&self.file).take();

        if force {
            self.registry.dispose(&self.instance_id);
        }
    }

    fn is_connected(&self) -> bool {
        lock(&self.file).is_some()
    }

    fn send(&self, buffer: &[u8]) -> Result<usize> {
        let file = self.current()?;
        match (&*file).write_all(buffer) {
            Ok(()) => Ok(buffer.len()),
            Err(err) => {
                if is_fatal(&err) {
                    self.release(&file);
                }
                Err(err.into())
            }
        }
    }

    fn read(&self, max_bytes: usize) -> Result<ReadOutcome> {
        if max_bytes == 0 {
            return Err(std::io::Error::new(ErrorKind::InvalidInput, "zero-length read").into());
        }
        let file = self.current()?;
        let mut buf = vec![0u8; max_bytes];

        let read = loop {
            match (&*file).read(&mut buf) {
                Err(err) if err.kind() == ErrorKind::Interrupted => continue,
                other => break other,
            }
        };

        match read {
            // With VMIN = 0 the tty driver reports an elapsed VTIME as a zero-length read.
            Ok(0) => Ok(ReadOutcome::TimedOut),
            Ok(n) => {
                buf.truncate(n);
                Ok(ReadOutcome::Data(Bytes::from(buf)))
            }
            Err(err) if is_timeout(&err) => Ok(ReadOutcome::TimedOut),
            Err(err) => {
                // A yanked USB CDC device surfaces as EIO.
                if is_fatal(&err) || err.raw_os_error() == Some(libc::EIO) {
                    self.release(&file);
                    return Ok(ReadOutcome::Closed);
                }
                Err(err.into())
            }
        }
    }

    fn available_bytes(&self) -> i64 {
        let Ok(file) = self.current() else {
            return -1;
        };
        crate::sys::bytes_available(file.as_raw_fd())
            .map(|n| n as i64)
            .unwrap_or(0)
    }
}

impl std::fmt::Debug for SerialPort {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SerialPort")
            .field("instance_id", &self.instance_id)
            .field("baud_rate", &self.config.baud_rate)
            .field("connected", &self.is_connected())
            .finish()
    }
}
