//! In-process transport pair.
//!
//! [`MemoryTransport`] is the host side and behaves like any other
//! [`Transport`]; [`MemoryPeer`] is the far end and plays the device. Dropping
//! the peer looks like the device vanishing.

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use bytes::{Bytes, BytesMut};
use crossbeam_channel::{unbounded, Receiver, RecvTimeoutError, Sender};
use tracing::debug;

use crate::error::{Result, TransportError};
use crate::traits::{ConnectResult, DeviceRegistry, ReadOutcome, Transport};
use crate::{lock, RegistryLink};

const DEFAULT_READ_TIMEOUT: Duration = Duration::from_millis(20);

struct Shared {
    connected: AtomicBool,
    peer_alive: AtomicBool,
    connect_result: Mutex<ConnectResult>,
    connect_attempts: AtomicUsize,
    opens: AtomicUsize,
    sends: AtomicUsize,
}

/// Host end of an in-memory link.
pub struct MemoryTransport {
    instance_id: String,
    read_timeout: Duration,
    shared: Arc<Shared>,
    to_peer: Sender<Bytes>,
    from_peer: Receiver<Bytes>,
    leftover: Mutex<BytesMut>,
    registry: RegistryLink,
}

/// Device end of an in-memory link.
pub struct MemoryPeer {
    shared: Arc<Shared>,
    to_host: Sender<Bytes>,
    from_host: Receiver<Bytes>,
}

impl MemoryTransport {
    /// Create a connected-on-demand host transport and its device end.
    pub fn pair(instance_id: impl Into<String>) -> (MemoryTransport, MemoryPeer) {
        let (to_peer, from_host) = unbounded();
        let (to_host, from_peer) = unbounded();
        let shared = Arc::new(Shared {
            connected: AtomicBool::new(false),
            peer_alive: AtomicBool::new(true),
            connect_result: Mutex::new(ConnectResult::Connected),
            connect_attempts: AtomicUsize::new(0),
            opens: AtomicUsize::new(0),
            sends: AtomicUsize::new(0),
        });

        let transport = MemoryTransport {
            instance_id: instance_id.into(),
            read_timeout: DEFAULT_READ_TIMEOUT,
            shared: Arc::clone(&shared),
            to_peer,
            from_peer,
            leftover: Mutex::new(BytesMut::new()),
            registry: RegistryLink::default(),
        };
        let peer = MemoryPeer {
            shared,
            to_host,
            from_host,
        };
        (transport, peer)
    }

    /// Override how long [`Transport::read`] waits for data.
    pub fn with_read_timeout(mut self, timeout: Duration) -> Self {
        self.read_timeout = timeout;
        self
    }

    /// Attach the registry notified on forced disconnect.
    pub fn with_registry(mut self, registry: &Arc<dyn DeviceRegistry>) -> Self {
        self.registry = RegistryLink::new(registry);
        self
    }

    fn mark_closed(&self) {
        if self.shared.connected.swap(false, Ordering::SeqCst) {
            debug!(instance_id = %self.instance_id, "memory peer hung up");
        }
    }
}

impl Transport for MemoryTransport {
    fn instance_id(&self) -> &str {
        &self.instance_id
    }

    fn connect(&self) -> ConnectResult {
        if self.shared.connected.load(Ordering::SeqCst) {
            return ConnectResult::Connected;
        }
        self.shared.connect_attempts.fetch_add(1, Ordering::SeqCst);

        if !self.shared.peer_alive.load(Ordering::SeqCst) {
            return ConnectResult::NotConnected;
        }

        let result = *lock(&self.shared.connect_result);
        if result.is_connected() {
            self.shared.opens.fetch_add(1, Ordering::SeqCst);
            self.shared.connected.store(true, Ordering::SeqCst);
        }
        result
    }

    fn disconnect(&self, force: bool) {
        self.shared.connected.store(false, Ordering::SeqCst);
        lock(&self.leftover).clear();
        while self.from_peer.try_recv().is_ok() {}

        if force {
            self.registry.dispose(&self.instance_id);
        }
    }

    fn is_connected(&self) -> bool {
        self.shared.connected.load(Ordering::SeqCst)
    }

    fn send(&self, buffer: &[u8]) -> Result<usize> {
        if !self.is_connected() {
            return Err(TransportError::NotConnected);
        }
        if self.to_peer.send(Bytes::copy_from_slice(buffer)).is_err() {
            self.mark_closed();
            return Err(TransportError::NotConnected);
        }
        self.shared.sends.fetch_add(1, Ordering::SeqCst);
        Ok(buffer.len())
    }

    fn read(&self, max_bytes: usize) -> Result<ReadOutcome> {
        if !self.is_connected() {
            return Err(TransportError::NotConnected);
        }
        if max_bytes == 0 {
            return Err(
                std::io::Error::new(std::io::ErrorKind::InvalidInput, "zero-length read").into(),
            );
        }

        {
            let mut leftover = lock(&self.leftover);
            if !leftover.is_empty() {
                let take = max_bytes.min(leftover.len());
                return Ok(ReadOutcome::Data(leftover.split_to(take).freeze()));
            }
        }

        match self.from_peer.recv_timeout(self.read_timeout) {
            Ok(mut chunk) => {
                if chunk.len() > max_bytes {
                    let rest = chunk.split_off(max_bytes);
                    lock(&self.leftover).extend_from_slice(&rest);
                }
                if chunk.is_empty() {
                    Ok(ReadOutcome::TimedOut)
                } else {
                    Ok(ReadOutcome::Data(chunk))
                }
            }
            Err(RecvTimeoutError::Timeout) => Ok(ReadOutcome::TimedOut),
            Err(RecvTimeoutError::Disconnected) => {
                self.mark_closed();
                Ok(ReadOutcome::Closed)
            }
        }
    }

    fn available_bytes(&self) -> i64 {
        if !self.is_connected() {
            return -1;
        }
        let queued: usize = lock(&self.leftover).len();
        (queued + self.from_peer.len()) as i64
    }
}

impl std::fmt::Debug for MemoryTransport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MemoryTransport")
            .field("instance_id", &self.instance_id)
            .field("connected", &self.is_connected())
            .finish()
    }
}

impl MemoryPeer {
    /// Choose what the host's next `connect` returns.
    pub fn set_connect_result(&self, result: ConnectResult) {
        *lock(&self.shared.connect_result) = result;
    }

    /// Whether the host currently holds the link open.
    pub fn host_connected(&self) -> bool {
        self.shared.connected.load(Ordering::SeqCst)
    }

    /// Connect attempts made by the host while it was not connected.
    pub fn connect_attempts(&self) -> usize {
        self.shared.connect_attempts.load(Ordering::SeqCst)
    }

    /// Times the host actually opened the link.
    pub fn opens(&self) -> usize {
        self.shared.opens.load(Ordering::SeqCst)
    }

    /// Buffers written by the host.
    pub fn sends(&self) -> usize {
        self.shared.sends.load(Ordering::SeqCst)
    }

    /// Push bytes toward the host.
    pub fn send(&self, bytes: &[u8]) -> bool {
        self.to_host.send(Bytes::copy_from_slice(bytes)).is_ok()
    }

    /// Wait up to `timeout` for the next buffer the host wrote.
    pub fn recv(&self, timeout: Duration) -> Option<Bytes> {
        self.from_host.recv_timeout(timeout).ok()
    }

    /// Drop the device end, as if the device was unplugged.
    pub fn hang_up(self) {}
}

impl Drop for MemoryPeer {
    fn drop(&mut self) {
        self.shared.peer_alive.store(false, Ordering::SeqCst);
    }
}
