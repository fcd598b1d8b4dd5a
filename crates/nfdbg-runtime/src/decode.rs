//! Reply layouts of `DEBUGGING_VALUE_FETCH`.
//!
//! Every reply starts with the kind code, then:
//! - primitive: data type code, scalar
//! - array: element type code, `u32` count, then inline scalars when the
//!   element type is a scalar type, else `count` × (kind code, `u32` handle)
//! - value type / class: `u32` type token, `u32` field count, then
//!   `count` × (`u32` field token, kind code, `u32` handle)
//! - reflection: `u32` metadata token

use std::collections::BTreeMap;

use nfdbg_frame::PayloadReader;

use crate::error::{Result, RuntimeError};
use crate::heap::ValueHeap;
use crate::kind::{Handle, ValueKind};
use crate::primitive::{DataType, Primitive};
use crate::value::{ArrayContents, ArrayElements, ObjectContents, RuntimeValue};

// Smallest encoding of one array element / field, used to reject counts the
// payload cannot possibly hold before allocating for them.
const MIN_REF_SIZE: usize = 5;
const MIN_FIELD_SIZE: usize = 9;

pub(crate) struct Reply<'a> {
    handle: Handle,
    r: PayloadReader<'a>,
}

impl<'a> Reply<'a> {
    /// Check the leading kind code against what the value was created as.
    pub(crate) fn open(handle: Handle, expected: ValueKind, payload: &'a [u8]) -> Result<Self> {
        let mut reply = Self {
            handle,
            r: PayloadReader::new(payload),
        };
        let code = reply.u8()?;
        match ValueKind::from_code(code) {
            Some(kind) if kind == expected => Ok(reply),
            Some(kind) => Err(RuntimeError::malformed(
                handle,
                format!("reply describes a {kind}, value is a {expected}"),
            )),
            None => Err(RuntimeError::malformed(
                handle,
                format!("unknown kind code {code:#04x}"),
            )),
        }
    }

    pub(crate) fn primitive(mut self) -> Result<Primitive> {
        let ty = self.data_type()?;
        let value = self.scalar(ty)?;
        self.finish()?;
        Ok(value)
    }

    pub(crate) fn array(mut self, heap: &ValueHeap) -> Result<ArrayContents> {
        let element_type = self.u8()?;
        let count = self.u32()? as usize;
        let elements = match DataType::from_code(element_type) {
            Some(ty) => {
                self.check_count(count, ty.size())?;
                let items = (0..count)
                    .map(|_| self.scalar(ty))
                    .collect::<Result<Vec<_>>>()?;
                ArrayElements::Inline(items)
            }
            None => {
                self.check_count(count, MIN_REF_SIZE)?;
                let items = (0..count)
                    .map(|_| self.reference(heap))
                    .collect::<Result<Vec<_>>>()?;
                ArrayElements::Values(items)
            }
        };
        self.finish()?;
        Ok(ArrayContents {
            element_type,
            elements,
        })
    }

    pub(crate) fn object(mut self, heap: &ValueHeap) -> Result<ObjectContents> {
        let type_token = self.u32()?;
        let count = self.u32()? as usize;
        self.check_count(count, MIN_FIELD_SIZE)?;

        let mut fields = BTreeMap::new();
        for _ in 0..count {
            let token = self.u32()?;
            let value = self.reference(heap)?;
            if fields.insert(token, value).is_some() {
                return Err(RuntimeError::malformed(
                    self.handle,
                    format!("field token {token:#010x} appears twice"),
                ));
            }
        }
        self.finish()?;
        Ok(ObjectContents { type_token, fields })
    }

    pub(crate) fn reflection(mut self) -> Result<u32> {
        let token = self.u32()?;
        self.finish()?;
        Ok(token)
    }

    fn reference(&mut self, heap: &ValueHeap) -> Result<RuntimeValue> {
        let code = self.u8()?;
        let kind = ValueKind::from_code(code).ok_or_else(|| {
            RuntimeError::malformed(self.handle, format!("unknown kind code {code:#04x}"))
        })?;
        let handle = Handle(self.u32()?);
        Ok(heap.value(handle, kind))
    }

    fn data_type(&mut self) -> Result<DataType> {
        let code = self.u8()?;
        DataType::from_code(code).ok_or_else(|| {
            RuntimeError::malformed(self.handle, format!("unknown data type {code:#04x}"))
        })
    }

    fn scalar(&mut self, ty: DataType) -> Result<Primitive> {
        Primitive::read(ty, &mut self.r).map_err(|err| RuntimeError::malformed(self.handle, err))
    }

    fn u8(&mut self) -> Result<u8> {
        self.r
            .read_u8()
            .map_err(|err| RuntimeError::malformed(self.handle, err))
    }

    fn u32(&mut self) -> Result<u32> {
        self.r
            .read_u32()
            .map_err(|err| RuntimeError::malformed(self.handle, err))
    }

    fn check_count(&self, count: usize, each: usize) -> Result<()> {
        if count.saturating_mul(each) > self.r.remaining() {
            return Err(RuntimeError::malformed(
                self.handle,
                format!(
                    "{count} entries cannot fit in {} remaining bytes",
                    self.r.remaining()
                ),
            ));
        }
        Ok(())
    }

    fn finish(&self) -> Result<()> {
        match self.r.remaining() {
            0 => Ok(()),
            extra => Err(RuntimeError::malformed(
                self.handle,
                format!("{extra} unexpected trailing bytes"),
            )),
        }
    }
}
