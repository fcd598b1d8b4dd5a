use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, Weak};

use bytes::Bytes;
use nfdbg_frame::commands::{DEBUGGING_VALUE_FETCH, DEBUGGING_VALUE_INVALIDATED};
use nfdbg_frame::{PayloadReader, PayloadWriter};
use nfdbg_session::{Device, Session, SessionError, SubscriptionId};
use tracing::{debug, trace, warn};

use crate::error::Result;
use crate::kind::{Handle, ValueKind};
use crate::lock;
use crate::value::RuntimeValue;

/// The values one debugging session has seen, keyed by handle.
///
/// A heap listens for invalidation notices from the device and evicts the
/// named handles. It empties itself when the session closes. Values hold only
/// a weak link back, so dropping the heap detaches them.
pub struct ValueHeap {
    me: Weak<ValueHeap>,
    session: Arc<Session>,
    values: Mutex<HashMap<Handle, RuntimeValue>>,
    fetches: AtomicU64,
    subscription: SubscriptionId,
}

impl ValueHeap {
    /// A heap over an open session.
    pub fn new(session: Arc<Session>) -> Arc<Self> {
        Arc::new_cyclic(|me: &Weak<ValueHeap>| {
            let listener = me.clone();
            let subscription = session.subscribe_command(DEBUGGING_VALUE_INVALIDATED, move |frame| {
                if let Some(heap) = listener.upgrade() {
                    heap.on_invalidated(&frame.payload);
                }
            });
            let closer = me.clone();
            session.on_close(move || {
                if let Some(heap) = closer.upgrade() {
                    debug!("session closed; evicting values");
                    heap.clear();
                }
            });
            Self {
                me: me.clone(),
                session,
                values: Mutex::new(HashMap::new()),
                fetches: AtomicU64::new(0),
                subscription,
            }
        })
    }

    /// A heap for a device, opening its debugging session if needed.
    pub fn attach(device: &Device) -> Result<Arc<Self>> {
        device.establish_debugging_session()?;
        Ok(Self::new(device.session()?))
    }

    pub fn session(&self) -> &Arc<Session> {
        &self.session
    }

    /// The value for `handle`, recorded on first sight. No I/O.
    ///
    /// A handle seen again with a different kind was reused by the device;
    /// the old value is replaced.
    pub fn value(&self, handle: Handle, kind: ValueKind) -> RuntimeValue {
        let mut values = lock(&self.values);
        if let Some(existing) = values.get(&handle) {
            if existing.kind() == kind {
                return existing.clone();
            }
            debug!(%handle, old = %existing.kind(), new = %kind, "handle reused with new kind");
            existing.invalidate();
        }
        let value = RuntimeValue::new(handle, kind, self.me.clone());
        values.insert(handle, value.clone());
        value
    }

    /// The value recorded for `handle`, if any.
    pub fn get(&self, handle: Handle) -> Option<RuntimeValue> {
        lock(&self.values).get(&handle).cloned()
    }

    /// Evict a handle. Values already handed out lose their cached contents.
    pub fn invalidate(&self, handle: Handle) -> bool {
        let removed = lock(&self.values).remove(&handle);
        match removed {
            Some(value) => {
                value.invalidate();
                true
            }
            None => false,
        }
    }

    /// Evict everything.
    pub fn clear(&self) {
        let drained: Vec<RuntimeValue> = lock(&self.values).drain().map(|(_, v)| v).collect();
        for value in &drained {
            value.invalidate();
        }
        if !drained.is_empty() {
            debug!(evicted = drained.len(), "value heap cleared");
        }
    }

    pub fn len(&self) -> usize {
        lock(&self.values).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Fetch requests sent so far.
    pub fn fetch_count(&self) -> u64 {
        self.fetches.load(Ordering::Relaxed)
    }

    pub(crate) fn fetch(&self, handle: Handle) -> Result<Bytes> {
        if !self.session.is_open() {
            self.clear();
            return Err(SessionError::Disconnected.into());
        }
        self.fetches.fetch_add(1, Ordering::Relaxed);
        trace!(%handle, "fetching value");
        let payload = PayloadWriter::new().write_u32(handle.0).finish();
        match self.session.request(DEBUGGING_VALUE_FETCH, &payload) {
            Ok(reply) => Ok(reply),
            Err(SessionError::NotConnected) => {
                self.clear();
                Err(SessionError::Disconnected.into())
            }
            Err(err) => Err(err.into()),
        }
    }

    fn on_invalidated(&self, payload: &[u8]) {
        let mut r = PayloadReader::new(payload);
        let handles = r.read_u32().and_then(|count| {
            (0..count)
                .map(|_| r.read_u32().map(Handle))
                .collect::<std::result::Result<Vec<_>, _>>()
        });
        match handles {
            Ok(handles) => {
                let evicted = handles.into_iter().filter(|h| self.invalidate(*h)).count();
                debug!(evicted, "device invalidated values");
            }
            Err(err) => warn!(%err, "malformed invalidation notice"),
        }
    }
}

impl Drop for ValueHeap {
    fn drop(&mut self) {
        // Cached objects may reference each other; emptying the slots breaks
        // those cycles.
        self.clear();
        self.session.unsubscribe(self.subscription);
    }
}

impl std::fmt::Debug for ValueHeap {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ValueHeap")
            .field("session", &self.session.instance_id())
            .field("values", &self.len())
            .field("fetches", &self.fetch_count())
            .finish()
    }
}
