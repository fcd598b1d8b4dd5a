use std::collections::BTreeMap;
use std::hash::{Hash, Hasher};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, Weak};

use nfdbg_session::SessionError;
use tracing::trace;

use crate::decode::Reply;
use crate::error::{Result, RuntimeError};
use crate::heap::ValueHeap;
use crate::kind::{Handle, KindTraits, ValueKind};
use crate::lock;
use crate::primitive::Primitive;

/// Elements of a fetched array.
#[derive(Debug, Clone)]
pub enum ArrayElements {
    /// Scalar elements stored inline in the reply.
    Inline(Vec<Primitive>),
    /// Elements that are themselves remote values.
    Values(Vec<RuntimeValue>),
}

/// Contents of an array value.
#[derive(Debug, Clone)]
pub struct ArrayContents {
    /// Element type code; a scalar data type code for inline arrays.
    pub element_type: u8,
    pub elements: ArrayElements,
}

impl ArrayContents {
    pub fn len(&self) -> usize {
        match &self.elements {
            ArrayElements::Inline(items) => items.len(),
            ArrayElements::Values(items) => items.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Field table of a value type or class instance.
#[derive(Debug, Clone)]
pub struct ObjectContents {
    pub type_token: u32,
    /// Field values keyed by field token.
    pub fields: BTreeMap<u32, RuntimeValue>,
}

impl ObjectContents {
    pub fn field(&self, token: u32) -> Option<&RuntimeValue> {
        self.fields.get(&token)
    }
}

type Slot<T> = Mutex<Option<Arc<T>>>;

/// Per-kind payload of a value. Kinds with contents carry a cache slot.
enum ValueBody {
    Null,
    Reference,
    Primitive(Slot<Primitive>),
    ValueType(Slot<ObjectContents>),
    Class(Slot<ObjectContents>),
    Array(Slot<ArrayContents>),
    Reflection(Slot<u32>),
}

impl ValueBody {
    fn new(kind: ValueKind) -> Self {
        match kind {
            ValueKind::Null => ValueBody::Null,
            ValueKind::Reference => ValueBody::Reference,
            ValueKind::Primitive => ValueBody::Primitive(Mutex::new(None)),
            ValueKind::ValueType => ValueBody::ValueType(Mutex::new(None)),
            ValueKind::Class => ValueBody::Class(Mutex::new(None)),
            ValueKind::Array => ValueBody::Array(Mutex::new(None)),
            ValueKind::Reflection => ValueBody::Reflection(Mutex::new(None)),
        }
    }

    fn kind(&self) -> ValueKind {
        match self {
            ValueBody::Null => ValueKind::Null,
            ValueBody::Reference => ValueKind::Reference,
            ValueBody::Primitive(_) => ValueKind::Primitive,
            ValueBody::ValueType(_) => ValueKind::ValueType,
            ValueBody::Class(_) => ValueKind::Class,
            ValueBody::Array(_) => ValueKind::Array,
            ValueBody::Reflection(_) => ValueKind::Reflection,
        }
    }

    fn is_cached(&self) -> bool {
        match self {
            ValueBody::Null | ValueBody::Reference => true,
            ValueBody::Primitive(slot) => lock(slot).is_some(),
            ValueBody::ValueType(slot) | ValueBody::Class(slot) => lock(slot).is_some(),
            ValueBody::Array(slot) => lock(slot).is_some(),
            ValueBody::Reflection(slot) => lock(slot).is_some(),
        }
    }

    fn clear(&self) {
        match self {
            ValueBody::Null | ValueBody::Reference => {}
            ValueBody::Primitive(slot) => *lock(slot) = None,
            ValueBody::ValueType(slot) | ValueBody::Class(slot) => *lock(slot) = None,
            ValueBody::Array(slot) => *lock(slot) = None,
            ValueBody::Reflection(slot) => *lock(slot) = None,
        }
    }
}

struct ValueInner {
    handle: Handle,
    heap: Weak<ValueHeap>,
    body: ValueBody,
    // Bumped on every invalidation so a fetch that raced one is not cached.
    epoch: AtomicU64,
}

/// A value living on the device, seen through one debugging session.
///
/// Creating one performs no I/O. Contents are fetched on first access and
/// cached until the device invalidates the handle. Two values are equal when
/// they name the same handle in the same heap.
#[derive(Clone)]
pub struct RuntimeValue {
    inner: Arc<ValueInner>,
}

impl RuntimeValue {
    pub(crate) fn new(handle: Handle, kind: ValueKind, heap: Weak<ValueHeap>) -> Self {
        Self {
            inner: Arc::new(ValueInner {
                handle,
                heap,
                body: ValueBody::new(kind),
                epoch: AtomicU64::new(0),
            }),
        }
    }

    pub fn handle(&self) -> Handle {
        self.inner.handle
    }

    pub fn kind(&self) -> ValueKind {
        self.inner.body.kind()
    }

    pub fn traits(&self) -> KindTraits {
        self.kind().traits()
    }

    pub fn is_reference(&self) -> bool {
        self.traits().is_reference
    }

    pub fn is_null(&self) -> bool {
        self.traits().is_null
    }

    pub fn is_primitive(&self) -> bool {
        self.traits().is_primitive
    }

    pub fn is_value_type(&self) -> bool {
        self.traits().is_value_type
    }

    pub fn is_array(&self) -> bool {
        self.traits().is_array
    }

    pub fn is_reflection(&self) -> bool {
        self.traits().is_reflection
    }

    /// True once contents are held locally. Kinds without contents always are.
    pub fn is_cached(&self) -> bool {
        self.inner.body.is_cached()
    }

    /// The heap this value belongs to, while its session lives.
    pub fn heap(&self) -> Option<Arc<ValueHeap>> {
        self.inner.heap.upgrade()
    }

    /// Scalar contents of a primitive value.
    pub fn primitive(&self) -> Result<Primitive> {
        match &self.inner.body {
            ValueBody::Primitive(slot) => {
                let value = self.materialize(slot, |reply, _| reply.primitive())?;
                Ok(*value)
            }
            _ => Err(self.mismatch(ValueKind::Primitive)),
        }
    }

    /// Field table of a value type or class instance.
    pub fn object(&self) -> Result<Arc<ObjectContents>> {
        match &self.inner.body {
            ValueBody::ValueType(slot) | ValueBody::Class(slot) => {
                self.materialize(slot, |reply, heap| reply.object(heap))
            }
            _ => Err(self.mismatch(ValueKind::Class)),
        }
    }

    /// One field of a value type or class instance.
    pub fn field(&self, token: u32) -> Result<Option<RuntimeValue>> {
        Ok(self.object()?.field(token).cloned())
    }

    pub fn array(&self) -> Result<Arc<ArrayContents>> {
        match &self.inner.body {
            ValueBody::Array(slot) => self.materialize(slot, |reply, heap| reply.array(heap)),
            _ => Err(self.mismatch(ValueKind::Array)),
        }
    }

    /// Metadata token of a reflection value.
    pub fn metadata_token(&self) -> Result<u32> {
        match &self.inner.body {
            ValueBody::Reflection(slot) => {
                let token = self.materialize(slot, |reply, _| reply.reflection())?;
                Ok(*token)
            }
            _ => Err(self.mismatch(ValueKind::Reflection)),
        }
    }

    /// Forget cached contents; the next access fetches again.
    pub fn invalidate(&self) {
        self.inner.epoch.fetch_add(1, Ordering::SeqCst);
        self.inner.body.clear();
    }

    fn mismatch(&self, expected: ValueKind) -> RuntimeError {
        RuntimeError::KindMismatch {
            handle: self.handle(),
            expected,
            actual: self.kind(),
        }
    }

    fn materialize<T>(
        &self,
        slot: &Slot<T>,
        decode: impl FnOnce(Reply<'_>, &ValueHeap) -> Result<T>,
    ) -> Result<Arc<T>> {
        let heap = self.heap().ok_or(SessionError::Disconnected)?;
        // Contents never outlive the session they were fetched through.
        if !heap.session().is_open() {
            heap.clear();
            return Err(SessionError::Disconnected.into());
        }
        if let Some(cached) = lock(slot).as_ref() {
            return Ok(Arc::clone(cached));
        }

        let epoch = self.inner.epoch.load(Ordering::SeqCst);
        // No lock is held across the round trip: the receive loop must stay
        // free to deliver the reply and any invalidation.
        let payload = heap.fetch(self.handle())?;
        let reply = Reply::open(self.handle(), self.kind(), &payload)?;
        let value = Arc::new(decode(reply, &heap)?);

        let mut cached = lock(slot);
        if let Some(existing) = cached.as_ref() {
            return Ok(Arc::clone(existing));
        }
        if self.inner.epoch.load(Ordering::SeqCst) == epoch {
            *cached = Some(Arc::clone(&value));
        } else {
            trace!(handle = %self.handle(), "value invalidated during fetch; not caching");
        }
        Ok(value)
    }

    #[cfg(test)]
    pub(crate) fn strong_count(&self) -> usize {
        Arc::strong_count(&self.inner)
    }

    fn heap_ptr(&self) -> *const ValueHeap {
        self.inner.heap.as_ptr()
    }
}

impl PartialEq for RuntimeValue {
    fn eq(&self, other: &Self) -> bool {
        self.handle() == other.handle() && std::ptr::eq(self.heap_ptr(), other.heap_ptr())
    }
}

impl Eq for RuntimeValue {}

impl Hash for RuntimeValue {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.handle().hash(state);
        self.heap_ptr().hash(state);
    }
}

impl std::fmt::Debug for RuntimeValue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RuntimeValue")
            .field("handle", &self.handle())
            .field("kind", &self.kind())
            .field("cached", &self.is_cached())
            .finish()
    }
}
