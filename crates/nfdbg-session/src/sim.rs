//! Scriptable device for exercising a session without hardware.
//!
//! [`SimulatedDevice`] sits on the far end of a
//! [`MemoryTransport`](nfdbg_transport::MemoryTransport) pair, decodes every
//! request the host writes and answers through a responder closure.

use std::sync::atomic::{AtomicBool, AtomicU16, Ordering};
use std::sync::{Arc, Mutex};
use std::thread::{self, JoinHandle};
use std::time::Duration;

use bytes::{Bytes, BytesMut};
use nfdbg_frame::{command_name, Frame, FrameDecoder};
use nfdbg_transport::MemoryPeer;
use tracing::{trace, warn};

use crate::lock;

const POLL: Duration = Duration::from_millis(10);

/// What the simulated device does with one request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Response {
    /// Reply with this payload under the request's command and sequence.
    Reply(Bytes),
    /// Send these frames verbatim.
    Frames(Vec<Frame>),
    /// Say nothing.
    Silent,
}

type Responder = dyn Fn(&Frame) -> Response + Send + Sync;

/// A device played by a background thread.
pub struct SimulatedDevice {
    peer: Arc<MemoryPeer>,
    requests: Arc<Mutex<Vec<Frame>>>,
    stop: Arc<AtomicBool>,
    next_sequence: AtomicU16,
    worker: Option<JoinHandle<()>>,
}

impl SimulatedDevice {
    /// Start answering requests arriving on `peer`.
    pub fn spawn<F>(peer: MemoryPeer, responder: F) -> Self
    where
        F: Fn(&Frame) -> Response + Send + Sync + 'static,
    {
        let peer = Arc::new(peer);
        let requests = Arc::new(Mutex::new(Vec::new()));
        let stop = Arc::new(AtomicBool::new(false));
        let responder: Box<Responder> = Box::new(responder);

        let worker = {
            let (peer, requests, stop) =
                (Arc::clone(&peer), Arc::clone(&requests), Arc::clone(&stop));
            thread::Builder::new()
                .name("nfdbg-sim".into())
                .spawn(move || serve(&peer, &requests, &stop, &*responder))
                .map_err(|err| warn!(%err, "could not start simulated device"))
                .ok()
        };

        Self {
            peer,
            requests,
            stop,
            next_sequence: AtomicU16::new(0),
            worker,
        }
    }

    /// Push an unsolicited frame to the host.
    pub fn notify(&self, command: u32, payload: &[u8]) -> bool {
        let sequence = self.next_sequence.fetch_add(1, Ordering::Relaxed);
        send_frame(&self.peer, &Frame::new(command, sequence, Bytes::copy_from_slice(payload)))
    }

    /// Push raw bytes, framed or not.
    pub fn send_raw(&self, bytes: &[u8]) -> bool {
        self.peer.send(bytes)
    }

    /// Every request received so far, in arrival order.
    pub fn requests(&self) -> Vec<Frame> {
        lock(&self.requests).clone()
    }

    /// Requests received for one command.
    pub fn request_count(&self, command: u32) -> usize {
        lock(&self.requests)
            .iter()
            .filter(|f| f.command == command)
            .count()
    }

    /// Unplug the device.
    pub fn hang_up(self) {}
}

impl Drop for SimulatedDevice {
    fn drop(&mut self) {
        self.stop.store(true, Ordering::SeqCst);
        if let Some(worker) = self.worker.take() {
            let _ = worker.join();
        }
    }
}

fn serve(peer: &MemoryPeer, requests: &Mutex<Vec<Frame>>, stop: &AtomicBool, responder: &Responder) {
    let mut decoder = FrameDecoder::new();
    while !stop.load(Ordering::SeqCst) {
        let Some(bytes) = peer.recv(POLL) else {
            // A dropped host makes `recv` return at once.
            if !peer.host_connected() {
                thread::sleep(POLL);
            }
            continue;
        };
        for frame in decoder.decode(&bytes) {
            trace!(
                command = command_name(frame.command),
                sequence = frame.sequence,
                "simulated device received request"
            );
            lock(requests).push(frame.clone());
            match responder(&frame) {
                Response::Reply(payload) => {
                    send_frame(peer, &Frame::new(frame.command, frame.sequence, payload));
                }
                Response::Frames(frames) => {
                    for reply in &frames {
                        send_frame(peer, reply);
                    }
                }
                Response::Silent => {}
            }
        }
    }
}

fn send_frame(peer: &MemoryPeer, frame: &Frame) -> bool {
    let mut buf = BytesMut::with_capacity(frame.wire_size());
    frame.encode(&mut buf).is_ok() && peer.send(&buf)
}
