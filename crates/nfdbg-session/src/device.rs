//! Connection lifecycle of one device.

use std::sync::{Arc, Mutex};
use std::thread;

use bytes::Bytes;
use nfdbg_frame::commands::{
    DEBUGGING_EXECUTION_QUERY_CAPABILITIES, MONITOR_MESSAGE, MONITOR_PING, MONITOR_REBOOT,
    MONITOR_TARGET_INFO,
};
use nfdbg_frame::command_name;
use nfdbg_transport::{ConnectResult, Transport};
use tracing::{debug, info, warn};

use crate::config::DeviceConfig;
use crate::engine::Session;
use crate::error::{Result, SessionError};
use crate::lock;
use crate::messages::{Capabilities, PingReply, PingSource, RebootOption, TargetInfo};

/// Connection state of a [`Device`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DeviceState {
    Disconnected,
    Connecting,
    Connected,
}

type OutputHandler = dyn Fn(&str) + Send + Sync;

struct Link {
    state: DeviceState,
    session: Option<Arc<Session>>,
    // Set once the runtime has accepted a debugging session on `session`.
    debugging: Option<Capabilities>,
}

/// A debuggable device reachable over one transport.
pub struct Device {
    transport: Arc<dyn Transport>,
    config: DeviceConfig,
    // Serializes connect and disconnect so each is idempotent under races.
    lifecycle: Mutex<()>,
    link: Mutex<Link>,
    output: Arc<Mutex<Vec<Arc<OutputHandler>>>>,
}

impl Device {
    pub fn new(transport: Arc<dyn Transport>) -> Self {
        Self::with_config(transport, DeviceConfig::default())
    }

    pub fn with_config(transport: Arc<dyn Transport>, config: DeviceConfig) -> Self {
        Self {
            transport,
            config,
            lifecycle: Mutex::new(()),
            link: Mutex::new(Link {
                state: DeviceState::Disconnected,
                session: None,
                debugging: None,
            }),
            output: Arc::new(Mutex::new(Vec::new())),
        }
    }

    pub fn instance_id(&self) -> &str {
        self.transport.instance_id()
    }

    pub fn config(&self) -> &DeviceConfig {
        &self.config
    }

    pub fn transport(&self) -> &Arc<dyn Transport> {
        &self.transport
    }

    /// Current state. A session lost to the transport reads as disconnected.
    pub fn state(&self) -> DeviceState {
        let link = lock(&self.link);
        match &link.session {
            Some(session) if !session.is_open() => DeviceState::Disconnected,
            _ => link.state,
        }
    }

    pub fn is_connected(&self) -> bool {
        self.state() == DeviceState::Connected
    }

    /// True while the runtime hosts a debugging session on the live link.
    pub fn is_debugging_session_established(&self) -> bool {
        self.capabilities().is_some()
    }

    /// Capabilities negotiated by [`establish_debugging_session`](Self::establish_debugging_session).
    pub fn capabilities(&self) -> Option<Capabilities> {
        let link = lock(&self.link);
        match &link.session {
            Some(session) if session.is_open() => link.debugging,
            _ => None,
        }
    }

    /// The live session, or [`SessionError::NotConnected`].
    pub fn session(&self) -> Result<Arc<Session>> {
        let link = lock(&self.link);
        match &link.session {
            Some(session) if session.is_open() => Ok(Arc::clone(session)),
            _ => Err(SessionError::NotConnected),
        }
    }

    /// Open the transport and start a session.
    ///
    /// Returns `Connected` without reopening anything when already connected.
    pub fn connect(&self) -> ConnectResult {
        let _lifecycle = lock(&self.lifecycle);
        if self.session().is_ok() {
            return ConnectResult::Connected;
        }
        self.reset_link(DeviceState::Connecting);

        let result = self.transport.connect();
        if !result.is_connected() {
            warn!(instance_id = %self.instance_id(), %result, "connect failed");
            self.reset_link(DeviceState::Disconnected);
            return result;
        }

        match Session::start(Arc::clone(&self.transport), self.config.session.clone()) {
            Ok(session) => {
                self.attach_output(&session);
                let mut link = lock(&self.link);
                link.session = Some(session);
                link.state = DeviceState::Connected;
                info!(instance_id = %self.instance_id(), "device connected");
                ConnectResult::Connected
            }
            Err(err) => {
                warn!(instance_id = %self.instance_id(), %err, "could not start session");
                self.transport.disconnect(false);
                self.reset_link(DeviceState::Disconnected);
                ConnectResult::ExceptionOccurred
            }
        }
    }

    /// [`connect`](Self::connect) under the configured retry policy.
    ///
    /// Access denials are final and never retried.
    pub fn connect_with_retry(&self) -> ConnectResult {
        let policy = self.config.connect_retry;
        let attempts = policy.attempts();
        let mut result = ConnectResult::NotConnected;
        for attempt in 1..=attempts {
            result = self.connect();
            if result.is_connected() || !result.is_retryable() {
                return result;
            }
            if attempt < attempts {
                debug!(
                    instance_id = %self.instance_id(),
                    attempt,
                    %result,
                    "retrying connect"
                );
                thread::sleep(policy.delay);
            }
        }
        result
    }

    /// [`connect_with_retry`](Self::connect_with_retry) as a `Result`, for
    /// callers that treat any failure to connect as an error.
    pub fn ensure_connected(&self) -> Result<()> {
        match self.connect_with_retry() {
            ConnectResult::Connected => Ok(()),
            failed => Err(SessionError::ConnectFailed(failed)),
        }
    }

    /// Close the session and the transport. `force` also removes the device
    /// from the registry that manages its transport. Safe from any state.
    pub fn disconnect(&self, force: bool) {
        let _lifecycle = lock(&self.lifecycle);
        let session = {
            let mut link = lock(&self.link);
            link.state = DeviceState::Disconnected;
            link.debugging = None;
            link.session.take()
        };
        if let Some(session) = session {
            session.close();
        }
        self.transport.disconnect(force);
        debug!(instance_id = %self.instance_id(), force, "device disconnected");
    }

    /// Send a request on the live session with its default timeout.
    pub fn request(&self, command: u32, payload: &[u8]) -> Result<Bytes> {
        self.session()?.request(command, payload)
    }

    /// Like [`request`](Self::request), resending after timeouts under the
    /// configured policy. Only for commands that are safe to repeat.
    pub fn request_with_retry(&self, command: u32, payload: &[u8]) -> Result<Bytes> {
        let policy = self.config.request_retry;
        let attempts = policy.attempts();
        let mut attempt = 1;
        loop {
            match self.request(command, payload) {
                Err(err) if err.is_timeout() && attempt < attempts => {
                    debug!(
                        command = command_name(command),
                        attempt,
                        "request timed out, retrying"
                    );
                    attempt += 1;
                    thread::sleep(policy.delay);
                }
                other => return other,
            }
        }
    }

    /// Ask who is answering: boot loader or runtime.
    pub fn ping(&self) -> Result<PingReply> {
        let reply = self.request(MONITOR_PING, &PingReply::request(0))?;
        PingReply::decode(&reply)
    }

    /// Open a debugging session with the runtime and record its capabilities.
    ///
    /// Returns the recorded capabilities without a round trip if a debugging
    /// session is already established on the current link.
    pub fn establish_debugging_session(&self) -> Result<Capabilities> {
        let session = self.session()?;
        if let Some(capabilities) = self.capabilities() {
            return Ok(capabilities);
        }

        let ping = PingReply::decode(&session.request(MONITOR_PING, &PingReply::request(0))?)?;
        if ping.source != PingSource::Runtime {
            return Err(SessionError::Protocol(format!(
                "{} answered the ping; a debugging session needs the runtime",
                ping.source
            )));
        }

        let reply = session.request(DEBUGGING_EXECUTION_QUERY_CAPABILITIES, &[])?;
        let capabilities = Capabilities::decode(&reply)?;

        let mut link = lock(&self.link);
        match &link.session {
            Some(current) if Arc::ptr_eq(current, &session) && session.is_open() => {
                link.debugging = Some(capabilities);
            }
            _ => return Err(SessionError::Disconnected),
        }
        drop(link);

        info!(
            instance_id = %self.instance_id(),
            version = %capabilities.version,
            flags = capabilities.flags,
            "debugging session established"
        );
        Ok(capabilities)
    }

    pub fn target_info(&self) -> Result<TargetInfo> {
        let reply = self.request(MONITOR_TARGET_INFO, &[])?;
        TargetInfo::decode(&reply)
    }

    /// Restart the device. Any debugging session ends.
    pub fn reboot(&self, option: RebootOption) -> Result<()> {
        self.request(MONITOR_REBOOT, &option.request())?;
        lock(&self.link).debugging = None;
        info!(instance_id = %self.instance_id(), ?option, "device rebooting");
        Ok(())
    }

    /// Receive text the device program writes to its debug output.
    ///
    /// Handlers stay registered across reconnects.
    pub fn on_device_output<F>(&self, handler: F)
    where
        F: Fn(&str) + Send + Sync + 'static,
    {
        lock(&self.output).push(Arc::new(handler));
    }

    fn attach_output(&self, session: &Session) {
        let handlers = Arc::clone(&self.output);
        session.subscribe_command(MONITOR_MESSAGE, move |frame| {
            let text = String::from_utf8_lossy(&frame.payload);
            let snapshot: Vec<Arc<OutputHandler>> = lock(&handlers).clone();
            for handler in snapshot {
                handler(&text);
            }
        });
    }

    fn reset_link(&self, state: DeviceState) {
        let stale = {
            let mut link = lock(&self.link);
            link.state = state;
            link.debugging = None;
            link.session.take()
        };
        if let Some(session) = stale {
            session.close();
        }
    }
}

impl Drop for Device {
    fn drop(&mut self) {
        let session = lock(&self.link).session.take();
        if let Some(session) = session {
            session.close();
        }
    }
}

impl std::fmt::Debug for Device {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Device")
            .field("instance_id", &self.instance_id())
            .field("state", &self.state())
            .field("debugging", &self.is_debugging_session_established())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use nfdbg_transport::{MemoryPeer, MemoryTransport};

    use super::*;
    use crate::config::RetryPolicy;
    use crate::sim::{Response, SimulatedDevice};

    fn quick_retry() -> RetryPolicy {
        RetryPolicy {
            max_attempts: 3,
            delay: Duration::from_millis(1),
        }
    }

    fn device_with(peer_setup: impl FnOnce(&MemoryPeer)) -> (Device, MemoryPeer) {
        let (transport, peer) = MemoryTransport::pair("mem:device");
        peer_setup(&peer);
        let config = DeviceConfig {
            connect_retry: quick_retry(),
            request_retry: quick_retry(),
            ..DeviceConfig::default()
        };
        (Device::with_config(Arc::new(transport), config), peer)
    }

    fn runtime_device() -> (Device, SimulatedDevice) {
        let (device, peer) = device_with(|_| {});
        let sim = SimulatedDevice::spawn(peer, |frame| match frame.command {
            MONITOR_PING => Response::Reply(
                PingReply {
                    source: PingSource::Runtime,
                    flags: 0,
                }
                .encode(),
            ),
            DEBUGGING_EXECUTION_QUERY_CAPABILITIES => Response::Reply(
                Capabilities {
                    flags: 0x5,
                    version: crate::messages::RuntimeVersion {
                        major: 1,
                        minor: 9,
                        build: 0,
                        revision: 0,
                    },
                }
                .encode(),
            ),
            MONITOR_TARGET_INFO => Response::Reply(
                TargetInfo {
                    target_name: "SIM".into(),
                    platform_name: "host".into(),
                    platform_info: "loopback".into(),
                    runtime_version: "1.9.0.0".into(),
                }
                .encode(),
            ),
            MONITOR_REBOOT => Response::Reply(Bytes::new()),
            _ => Response::Silent,
        });
        (device, sim)
    }

    #[test]
    fn connect_is_idempotent() {
        let (device, peer) = device_with(|_| {});
        assert_eq!(device.connect(), ConnectResult::Connected);
        assert_eq!(device.connect(), ConnectResult::Connected);
        assert_eq!(device.state(), DeviceState::Connected);
        assert_eq!(peer.opens(), 1);
    }

    #[test]
    fn disconnect_is_idempotent_from_any_state() {
        let (device, peer) = device_with(|_| {});
        device.disconnect(false);
        assert_eq!(device.state(), DeviceState::Disconnected);

        device.connect();
        device.disconnect(false);
        device.disconnect(true);
        assert_eq!(device.state(), DeviceState::Disconnected);
        assert!(!peer.host_connected());
        assert!(matches!(device.ping(), Err(SessionError::NotConnected)));
    }

    #[test]
    fn unauthorized_is_never_retried() {
        let (device, peer) = device_with(|p| p.set_connect_result(ConnectResult::Unauthorized));
        assert_eq!(device.connect_with_retry(), ConnectResult::Unauthorized);
        assert_eq!(peer.connect_attempts(), 1);
        assert_eq!(device.state(), DeviceState::Disconnected);
    }

    #[test]
    fn ensure_connected_reports_the_failure() {
        let (device, _peer) = device_with(|p| p.set_connect_result(ConnectResult::Unauthorized));
        assert!(matches!(
            device.ensure_connected(),
            Err(SessionError::ConnectFailed(ConnectResult::Unauthorized))
        ));

        let (device, _peer) = device_with(|_| {});
        device.ensure_connected().unwrap();
        assert!(device.is_connected());
    }

    #[test]
    fn transient_failures_are_retried_up_to_the_limit() {
        let (device, peer) =
            device_with(|p| p.set_connect_result(ConnectResult::ExceptionOccurred));
        assert_eq!(device.connect_with_retry(), ConnectResult::ExceptionOccurred);
        assert_eq!(peer.connect_attempts(), 3);
    }

    #[test]
    fn requests_without_connection_fail_fast() {
        let (device, _peer) = device_with(|_| {});
        assert!(matches!(
            device.request(MONITOR_PING, &[]),
            Err(SessionError::NotConnected)
        ));
        assert!(matches!(
            device.establish_debugging_session(),
            Err(SessionError::NotConnected)
        ));
    }

    #[test]
    fn establishes_debugging_session_with_runtime() {
        let (device, sim) = runtime_device();
        assert!(device.connect().is_connected());
        assert!(!device.is_debugging_session_established());

        let caps = device.establish_debugging_session().unwrap();
        assert_eq!(caps.flags, 0x5);
        assert_eq!(caps.version.to_string(), "1.9.0.0");
        assert!(device.is_debugging_session_established());

        // Second call is answered from the recorded state.
        assert_eq!(device.establish_debugging_session().unwrap(), caps);
        assert_eq!(sim.request_count(DEBUGGING_EXECUTION_QUERY_CAPABILITIES), 1);
    }

    #[test]
    fn boot_loader_cannot_host_debugging() {
        let (device, peer) = device_with(|_| {});
        let _sim = SimulatedDevice::spawn(peer, |_| {
            Response::Reply(
                PingReply {
                    source: PingSource::BootLoader,
                    flags: 0,
                }
                .encode(),
            )
        });
        device.connect();

        assert_eq!(device.ping().unwrap().source, PingSource::BootLoader);
        assert!(matches!(
            device.establish_debugging_session(),
            Err(SessionError::Protocol(_))
        ));
        assert!(!device.is_debugging_session_established());
    }

    #[test]
    fn disconnect_clears_debugging_state() {
        let (device, _sim) = runtime_device();
        device.connect();
        device.establish_debugging_session().unwrap();

        device.disconnect(false);
        assert!(!device.is_debugging_session_established());
        assert_eq!(device.capabilities(), None);
    }

    #[test]
    fn lost_link_reads_as_disconnected_and_reconnects() {
        let (transport, peer) = MemoryTransport::pair("mem:flaky");
        let device = Device::new(Arc::new(transport));
        device.connect();
        peer.hang_up();

        let deadline = std::time::Instant::now() + Duration::from_secs(2);
        while device.state() != DeviceState::Disconnected {
            assert!(std::time::Instant::now() < deadline);
            thread::sleep(Duration::from_millis(5));
        }
        assert!(matches!(device.session(), Err(SessionError::NotConnected)));
        // The peer is gone for good, so reopening fails cleanly.
        assert_eq!(device.connect(), ConnectResult::NotConnected);
    }

    #[test]
    fn target_info_and_reboot() {
        let (device, sim) = runtime_device();
        device.connect();
        device.establish_debugging_session().unwrap();

        let info = device.target_info().unwrap();
        assert_eq!(info.target_name, "SIM");
        assert_eq!(info.platform_info, "loopback");

        device.reboot(RebootOption::RuntimeOnly).unwrap();
        assert!(!device.is_debugging_session_established());
        let reboot = sim
            .requests()
            .into_iter()
            .find(|f| f.command == MONITOR_REBOOT)
            .unwrap();
        assert_eq!(reboot.payload.as_ref(), &[2, 0, 0, 0]);
    }

    #[test]
    fn request_retry_only_on_timeout() {
        let (transport, peer) = MemoryTransport::pair("mem:retry");
        let config = DeviceConfig {
            session: crate::config::SessionConfig {
                default_timeout: Duration::from_millis(40),
                ..Default::default()
            },
            request_retry: quick_retry(),
            ..DeviceConfig::default()
        };
        let device = Device::with_config(Arc::new(transport), config);
        let sim = SimulatedDevice::spawn(peer, |_| Response::Silent);
        device.connect();

        let err = device.request_with_retry(MONITOR_TARGET_INFO, &[]).unwrap_err();
        assert!(err.is_timeout());
        assert_eq!(sim.request_count(MONITOR_TARGET_INFO), 3);
    }

    #[test]
    fn device_output_reaches_handlers_across_reconnects() {
        let (device, sim) = runtime_device();
        let (tx, rx) = crossbeam_channel::unbounded();
        device.on_device_output(move |text| {
            let _ = tx.send(text.to_owned());
        });

        device.connect();
        assert!(sim.notify(MONITOR_MESSAGE, b"hello\n"));
        assert_eq!(rx.recv_timeout(Duration::from_secs(2)).unwrap(), "hello\n");

        device.disconnect(false);
        device.connect();
        assert!(sim.notify(MONITOR_MESSAGE, b"again"));
        assert_eq!(rx.recv_timeout(Duration::from_secs(2)).unwrap(), "again");
    }
}
