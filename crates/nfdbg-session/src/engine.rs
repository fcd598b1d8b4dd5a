//! Request/reply correlation over one transport.
//!
//! A [`Session`] owns the receive side of a connected [`Transport`]: a single
//! named thread reads, decodes frames and routes each one either to the
//! caller waiting on its sequence number or to the notification listeners.
//! Callers block only on their own one-shot slot, so any number of threads
//! may have requests in flight at once.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use bytes::{Bytes, BytesMut};
use crossbeam_channel::{bounded, unbounded, Receiver, RecvTimeoutError};
use nfdbg_frame::{
    command_name, encode_frame, is_unsolicited, Frame, FrameDecoder, FrameError, HEADER_SIZE,
    TRAILER_SIZE,
};
use nfdbg_transport::{ReadOutcome, Transport, TransportError};
use tracing::{debug, info, trace, warn};

use crate::config::SessionConfig;
use crate::error::{Result, SessionError};
use crate::lock;
use crate::pending::PendingTable;
use crate::subscription::{Subscribers, SubscriptionId};

/// Pause after a transient read error before trying again.
const ERROR_BACKOFF: Duration = Duration::from_millis(10);

type CloseHook = Box<dyn FnOnce() + Send>;

/// A live request/reply session with one device.
pub struct Session {
    shared: Arc<Shared>,
    worker: Mutex<Option<JoinHandle<()>>>,
}

struct Shared {
    transport: Arc<dyn Transport>,
    config: SessionConfig,
    open: AtomicBool,
    pending: Mutex<PendingTable>,
    subscribers: Subscribers,
    // One writer at a time so frames never interleave on the wire.
    send_lock: Mutex<()>,
    close_hooks: Mutex<Vec<CloseHook>>,
}

impl Session {
    /// Start a session over an already connected transport.
    ///
    /// Spawns the receive loop; the session stays open until [`close`](Self::close)
    /// or until the transport goes away.
    pub fn start(transport: Arc<dyn Transport>, config: SessionConfig) -> Result<Arc<Session>> {
        if !transport.is_connected() {
            return Err(SessionError::NotConnected);
        }

        let instance_id = transport.instance_id().to_owned();
        let shared = Arc::new(Shared {
            transport,
            config,
            open: AtomicBool::new(true),
            pending: Mutex::new(PendingTable::new()),
            subscribers: Subscribers::default(),
            send_lock: Mutex::new(()),
            close_hooks: Mutex::new(Vec::new()),
        });

        let loop_shared = Arc::clone(&shared);
        let worker = thread::Builder::new()
            .name(format!("nfdbg-rx {instance_id}"))
            .spawn(move || receive_loop(loop_shared))
            .map_err(TransportError::Io)?;

        info!(%instance_id, "session started");
        Ok(Arc::new(Session {
            shared,
            worker: Mutex::new(Some(worker)),
        }))
    }

    /// Identity of the underlying transport.
    pub fn instance_id(&self) -> &str {
        self.shared.transport.instance_id()
    }

    /// False once the session has been closed or lost its transport.
    pub fn is_open(&self) -> bool {
        self.shared.is_open()
    }

    /// Configuration this session was started with.
    pub fn config(&self) -> &SessionConfig {
        &self.shared.config
    }

    /// Requests currently awaiting a reply.
    pub fn pending_count(&self) -> usize {
        lock(&self.shared.pending).len()
    }

    /// Send a request and wait for its reply with the default timeout.
    pub fn request(&self, command: u32, payload: &[u8]) -> Result<Bytes> {
        self.send_request(command, payload, self.shared.config.default_timeout)
    }

    /// Send a request and block until its reply arrives or `timeout` elapses.
    ///
    /// A timeout fails only this request. A late reply is not matched to
    /// anything and goes to the notification listeners. Nothing is resent.
    pub fn send_request(&self, command: u32, payload: &[u8], timeout: Duration) -> Result<Bytes> {
        let shared = &self.shared;
        let max = shared.config.max_payload_size;
        if payload.len() > max {
            return Err(FrameError::PayloadTooLarge {
                size: payload.len(),
                max,
            }
            .into());
        }

        let (completion, slot) = bounded(1);
        let sequence = {
            let mut pending = lock(&shared.pending);
            // Checked under the table lock so teardown cannot miss this entry.
            if !shared.is_open() {
                return Err(SessionError::NotConnected);
            }
            pending
                .register(command, timeout, completion)
                .ok_or_else(|| SessionError::Protocol("no free sequence numbers".into()))?
        };

        let mut buf = BytesMut::with_capacity(HEADER_SIZE + payload.len() + TRAILER_SIZE);
        if let Err(err) = encode_frame(command, sequence, payload, &mut buf) {
            shared.forget(sequence);
            return Err(err.into());
        }

        trace!(
            command = command_name(command),
            sequence,
            len = payload.len(),
            "sending request"
        );
        let sent = {
            let _writer = lock(&shared.send_lock);
            shared.transport.send(&buf)
        };
        if let Err(err) = sent {
            shared.forget(sequence);
            if !shared.transport.is_connected() {
                shared.shutdown("send failed");
            }
            return Err(err.into());
        }

        match slot.recv_timeout(timeout) {
            Ok(result) => result,
            Err(RecvTimeoutError::Timeout) => {
                if shared.forget(sequence).is_none() {
                    // The receive loop settled the slot right at the deadline.
                    if let Ok(result) = slot.try_recv() {
                        return result;
                    }
                }
                debug!(
                    command = command_name(command),
                    sequence,
                    ?timeout,
                    "request timed out"
                );
                Err(SessionError::Timeout {
                    command,
                    sequence,
                    after: timeout,
                })
            }
            Err(RecvTimeoutError::Disconnected) => Err(SessionError::Disconnected),
        }
    }

    /// Call `handler` for every unmatched frame `predicate` accepts.
    ///
    /// Handlers run on the receive thread in decode order and must not block
    /// on a request to the same session.
    pub fn subscribe<P, H>(&self, predicate: P, handler: H) -> SubscriptionId
    where
        P: Fn(&Frame) -> bool + Send + Sync + 'static,
        H: Fn(&Frame) + Send + Sync + 'static,
    {
        self.shared
            .subscribers
            .add(Box::new(predicate), Box::new(handler))
    }

    /// Listen for one command code.
    pub fn subscribe_command<H>(&self, command: u32, handler: H) -> SubscriptionId
    where
        H: Fn(&Frame) + Send + Sync + 'static,
    {
        self.subscribe(move |frame| frame.command == command, handler)
    }

    /// Receive matching frames on a channel instead of a callback.
    ///
    /// The channel disconnects when the session closes.
    pub fn subscribe_channel<P>(&self, predicate: P) -> (SubscriptionId, Receiver<Frame>)
    where
        P: Fn(&Frame) -> bool + Send + Sync + 'static,
    {
        let (tx, rx) = unbounded();
        let id = self.subscribe(predicate, move |frame| {
            let _ = tx.send(frame.clone());
        });
        (id, rx)
    }

    /// Remove a listener. Returns false if it was already gone.
    pub fn unsubscribe(&self, id: SubscriptionId) -> bool {
        self.shared.subscribers.remove(id)
    }

    /// Run `hook` once when the session closes, whatever the cause.
    ///
    /// Runs immediately on the calling thread if the session is already
    /// closed. Hooks run after outstanding requests have been failed.
    pub fn on_close<F>(&self, hook: F)
    where
        F: FnOnce() + Send + 'static,
    {
        let mut hooks = lock(&self.shared.close_hooks);
        if self.shared.is_open() {
            hooks.push(Box::new(hook));
        } else {
            drop(hooks);
            hook();
        }
    }

    /// End the session: fail outstanding requests with
    /// [`SessionError::Disconnected`], release the transport and stop the
    /// receive loop. Safe to call more than once and from a listener.
    pub fn close(&self) {
        self.shared.shutdown("closed by host");
        let worker = lock(&self.worker).take();
        if let Some(worker) = worker {
            if worker.thread().id() != thread::current().id() && worker.join().is_err() {
                warn!(instance_id = %self.instance_id(), "receive loop panicked");
            }
        }
    }
}

impl Drop for Session {
    fn drop(&mut self) {
        self.close();
    }
}

impl std::fmt::Debug for Session {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Session")
            .field("instance_id", &self.instance_id())
            .field("open", &self.is_open())
            .field("pending", &self.pending_count())
            .finish()
    }
}

impl Shared {
    fn is_open(&self) -> bool {
        self.open.load(Ordering::SeqCst)
    }

    fn forget(&self, sequence: u16) -> Option<()> {
        lock(&self.pending).remove(sequence).map(|_| ())
    }

    fn route(&self, frame: Frame) {
        let unmatched = lock(&self.pending).complete(frame);
        if let Some(frame) = unmatched {
            if !is_unsolicited(frame.command) {
                debug!(
                    command = command_name(frame.command),
                    sequence = frame.sequence,
                    "frame matches no outstanding request"
                );
            }
            self.subscribers.dispatch(&frame);
        }
    }

    fn shutdown(&self, reason: &str) {
        if !self.open.swap(false, Ordering::SeqCst) {
            return;
        }
        let drained = lock(&self.pending).drain_disconnected();
        self.subscribers.clear();
        self.transport.disconnect(false);
        info!(
            instance_id = %self.transport.instance_id(),
            reason,
            drained,
            "session closed"
        );

        let hooks = std::mem::take(&mut *lock(&self.close_hooks));
        for hook in hooks {
            hook();
        }
    }
}

fn receive_loop(shared: Arc<Shared>) {
    let mut decoder = FrameDecoder::with_config(shared.config.frame_config());
    let chunk = shared.config.read_chunk_size.max(1);

    while shared.is_open() {
        match shared.transport.read(chunk) {
            Ok(ReadOutcome::Data(bytes)) => {
                for frame in decoder.decode(&bytes) {
                    shared.route(frame);
                }
            }
            Ok(ReadOutcome::TimedOut) => {
                let expired = lock(&shared.pending).expire(Instant::now());
                if expired > 0 {
                    debug!(expired, "expired overdue requests");
                }
            }
            Ok(ReadOutcome::Closed) => {
                shared.shutdown("device closed the stream");
            }
            Err(err) => {
                if !shared.is_open() {
                    break;
                }
                if !shared.transport.is_connected() {
                    warn!(%err, "read failed on a dead transport");
                    shared.shutdown("read failed");
                } else {
                    warn!(%err, "read failed");
                    thread::sleep(ERROR_BACKOFF);
                }
            }
        }
    }

    let stats = decoder.stats();
    debug!(
        frames = stats.frames,
        discarded_bytes = stats.discarded_bytes,
        checksum_failures = stats.checksum_failures,
        stalled_headers = stats.stalled_headers,
        "receive loop stopped"
    );
}
