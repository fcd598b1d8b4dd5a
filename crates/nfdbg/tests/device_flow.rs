use std::collections::HashMap;
use std::io::{Read, Write};
use std::net::{TcpListener, TcpStream};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use bytes::{BufMut, Bytes, BytesMut};
use nfdbg::frame::commands::*;
use nfdbg::frame::{encode_frame, FrameDecoder, PayloadReader};
use nfdbg::runtime::{DataType, Handle, Primitive, ValueHeap, ValueKind};
use nfdbg::session::{
    Capabilities, PingReply, PingSource, Response, RuntimeVersion, SimulatedDevice, TargetInfo,
};
use nfdbg::transport::{MemoryTransport, TcpConfig};
use nfdbg::{ConnectResult, Device, DeviceConfig, DeviceState, PortRegistry, SessionError};

fn wait_until(mut cond: impl FnMut() -> bool) {
    let deadline = Instant::now() + Duration::from_secs(3);
    while !cond() {
        assert!(Instant::now() < deadline, "condition not reached");
        thread::sleep(Duration::from_millis(5));
    }
}

fn ping_reply(source: PingSource) -> Bytes {
    PingReply { source, flags: 0 }.encode()
}

fn capabilities() -> Bytes {
    Capabilities {
        flags: 0x1,
        version: RuntimeVersion {
            major: 1,
            minor: 12,
            build: 0,
            revision: 4,
        },
    }
    .encode()
}

fn target_info() -> TargetInfo {
    TargetInfo {
        target_name: "ESP32_REV0".into(),
        platform_name: "ESP32".into(),
        platform_info: "simulated".into(),
        runtime_version: "1.12.0.4".into(),
    }
}

/// A runtime that knows a few primitive values by handle.
fn simulated_runtime(values: HashMap<u32, i32>) -> (Device, SimulatedDevice) {
    let (transport, peer) = MemoryTransport::pair("mem:flow");
    let sim = SimulatedDevice::spawn(peer, move |frame| match frame.command {
        MONITOR_PING => Response::Reply(ping_reply(PingSource::Runtime)),
        DEBUGGING_EXECUTION_QUERY_CAPABILITIES => Response::Reply(capabilities()),
        DEBUGGING_VALUE_FETCH => {
            let handle = PayloadReader::new(&frame.payload).read_u32().unwrap_or(0);
            match values.get(&handle) {
                Some(v) => {
                    let mut reply = BytesMut::new();
                    reply.put_u8(ValueKind::Primitive.code());
                    reply.put_u8(DataType::I4.code());
                    reply.put_i32_le(*v);
                    Response::Reply(reply.freeze())
                }
                None => Response::Silent,
            }
        }
        _ => Response::Silent,
    });
    (Device::new(Arc::new(transport)), sim)
}

#[test]
fn connect_attach_and_read_values() {
    let (device, sim) = simulated_runtime(HashMap::from([(0x10, 7), (0x11, -3)]));

    assert_eq!(device.connect(), ConnectResult::Connected);
    assert_eq!(device.connect(), ConnectResult::Connected);
    let heap = ValueHeap::attach(&device).unwrap();
    assert!(device.is_debugging_session_established());
    assert_eq!(device.capabilities().unwrap().version.to_string(), "1.12.0.4");

    let a = heap.value(Handle(0x10), ValueKind::Primitive);
    let b = heap.value(Handle(0x11), ValueKind::Primitive);
    assert_eq!(a.primitive().unwrap(), Primitive::I4(7));
    assert_eq!(b.primitive().unwrap(), Primitive::I4(-3));
    assert_eq!(a.primitive().unwrap(), Primitive::I4(7));
    assert_eq!(sim.request_count(DEBUGGING_VALUE_FETCH), 2);

    // The device drops value 0x10; the next read goes back to it.
    let mut notice = BytesMut::new();
    notice.put_u32_le(1);
    notice.put_u32_le(0x10);
    assert!(sim.notify(DEBUGGING_VALUE_INVALIDATED, &notice));
    wait_until(|| !a.is_cached());
    assert_eq!(a.primitive().unwrap(), Primitive::I4(7));
    assert_eq!(sim.request_count(DEBUGGING_VALUE_FETCH), 3);
}

#[test]
fn disconnect_fails_value_reads_and_reconnect_starts_fresh() {
    let (device, sim) = simulated_runtime(HashMap::from([(1, 1)]));
    device.connect();
    let heap = ValueHeap::attach(&device).unwrap();
    let value = heap.value(Handle(1), ValueKind::Primitive);

    device.disconnect(false);
    assert_eq!(device.state(), DeviceState::Disconnected);
    assert!(!device.is_debugging_session_established());
    assert!(matches!(
        value.primitive(),
        Err(nfdbg::runtime::RuntimeError::Session(SessionError::Disconnected))
    ));

    assert!(device.connect().is_connected());
    let fresh = ValueHeap::attach(&device).unwrap();
    assert_eq!(
        fresh.value(Handle(1), ValueKind::Primitive).primitive().unwrap(),
        Primitive::I4(1)
    );
    assert_eq!(sim.request_count(DEBUGGING_EXECUTION_QUERY_CAPABILITIES), 2);
}

#[test]
fn disconnect_evicts_values_already_fetched() {
    let (device, sim) = simulated_runtime(HashMap::from([(1, 42)]));
    device.connect();
    let heap = ValueHeap::attach(&device).unwrap();
    let value = heap.value(Handle(1), ValueKind::Primitive);
    assert_eq!(value.primitive().unwrap(), Primitive::I4(42));
    assert!(value.is_cached());

    device.disconnect(false);

    assert!(heap.is_empty());
    assert!(!value.is_cached());
    assert!(matches!(
        value.primitive(),
        Err(nfdbg::runtime::RuntimeError::Session(SessionError::Disconnected))
    ));
    assert_eq!(sim.request_count(DEBUGGING_VALUE_FETCH), 1);
}

#[test]
fn device_output_is_delivered_as_text() {
    let (device, sim) = simulated_runtime(HashMap::new());
    let (tx, rx) = crossbeam_channel::unbounded();
    device.on_device_output(move |text| {
        let _ = tx.send(text.to_string());
    });
    device.connect();

    assert!(sim.notify(MONITOR_MESSAGE, b"hello from device"));
    assert_eq!(
        rx.recv_timeout(Duration::from_secs(2)).unwrap(),
        "hello from device"
    );
}

/// Serves one TCP connection the way the virtual device does, until the
/// client hangs up or `replies` runs out.
fn serve_virtual_device(listener: TcpListener, replies: usize) -> thread::JoinHandle<()> {
    thread::spawn(move || {
        let (mut stream, _) = listener.accept().unwrap();
        let mut decoder = FrameDecoder::new();
        let mut buf = [0u8; 1024];
        let mut answered = 0;
        while answered < replies {
            let n = match stream.read(&mut buf) {
                Ok(0) | Err(_) => return,
                Ok(n) => n,
            };
            for frame in decoder.decode(&buf[..n]) {
                let payload = match frame.command {
                    MONITOR_PING => ping_reply(PingSource::Runtime),
                    MONITOR_TARGET_INFO => target_info().encode(),
                    _ => continue,
                };
                reply(&mut stream, frame.command, frame.sequence, &payload);
                answered += 1;
            }
        }
    })
}

fn reply(stream: &mut TcpStream, command: u32, sequence: u16, payload: &[u8]) {
    let mut out = BytesMut::new();
    encode_frame(command, sequence, payload, &mut out).unwrap();
    stream.write_all(&out).unwrap();
}

#[test]
fn talks_to_a_virtual_device_over_tcp() {
    let listener = TcpListener::bind("127.0.0.1:0").unwrap();
    let port = listener.local_addr().unwrap().port();
    let server = serve_virtual_device(listener, 2);

    let registry = PortRegistry::new();
    let device = registry.tcp_device(port, TcpConfig::default(), DeviceConfig::default());
    assert_eq!(device.instance_id(), PortRegistry::tcp_instance_id(port));

    assert!(device.connect().is_connected());
    assert_eq!(device.ping().unwrap().source, PingSource::Runtime);
    assert_eq!(device.target_info().unwrap(), target_info());

    // The server closes after two replies; the link drop is noticed.
    server.join().unwrap();
    wait_until(|| device.state() == DeviceState::Disconnected);
    assert!(matches!(device.ping(), Err(SessionError::NotConnected)));

    device.disconnect(true);
    assert!(registry.is_empty());
}

#[test]
fn refused_tcp_connection_leaves_device_disconnected() {
    let port = {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        listener.local_addr().unwrap().port()
    };
    let registry = PortRegistry::new();
    let device = registry.tcp_device(port, TcpConfig::default(), DeviceConfig::default());

    assert!(!device.connect().is_connected());
    assert_eq!(device.state(), DeviceState::Disconnected);
    assert!(matches!(device.ping(), Err(SessionError::NotConnected)));
}
