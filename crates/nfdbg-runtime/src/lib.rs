//! Values living on a debugged device.
//!
//! A [`RuntimeValue`] names a device-side object by [`Handle`] and knows its
//! [`ValueKind`]. Its contents are fetched through the session on first
//! access and cached. A [`ValueHeap`] per session hands out values, so the
//! same handle always maps to the same cache, and evicts handles the device
//! reports as invalidated.

mod decode;
pub mod error;
pub mod heap;
pub mod kind;
pub mod primitive;
pub mod value;

use std::sync::{Mutex, MutexGuard, PoisonError};

pub use error::{Result, RuntimeError};
pub use heap::ValueHeap;
pub use kind::{Handle, KindTraits, ValueKind};
pub use primitive::{DataType, Primitive};
pub use value::{ArrayContents, ArrayElements, ObjectContents, RuntimeValue};

pub(crate) fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}
