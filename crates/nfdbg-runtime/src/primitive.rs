use std::fmt;

use nfdbg_frame::{PayloadError, PayloadReader};

/// Scalar element types, numbered as in ECMA-335 element type codes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DataType {
    Boolean,
    Char,
    I1,
    U1,
    I2,
    U2,
    I4,
    U4,
    I8,
    U8,
    R4,
    R8,
}

impl DataType {
    pub const fn code(self) -> u8 {
        match self {
            DataType::Boolean => 0x02,
            DataType::Char => 0x03,
            DataType::I1 => 0x04,
            DataType::U1 => 0x05,
            DataType::I2 => 0x06,
            DataType::U2 => 0x07,
            DataType::I4 => 0x08,
            DataType::U4 => 0x09,
            DataType::I8 => 0x0A,
            DataType::U8 => 0x0B,
            DataType::R4 => 0x0C,
            DataType::R8 => 0x0D,
        }
    }

    pub fn from_code(code: u8) -> Option<Self> {
        Some(match code {
            0x02 => DataType::Boolean,
            0x03 => DataType::Char,
            0x04 => DataType::I1,
            0x05 => DataType::U1,
            0x06 => DataType::I2,
            0x07 => DataType::U2,
            0x08 => DataType::I4,
            0x09 => DataType::U4,
            0x0A => DataType::I8,
            0x0B => DataType::U8,
            0x0C => DataType::R4,
            0x0D => DataType::R8,
            _ => return None,
        })
    }

    /// Encoded width in bytes.
    pub const fn size(self) -> usize {
        match self {
            DataType::Boolean | DataType::I1 | DataType::U1 => 1,
            DataType::Char | DataType::I2 | DataType::U2 => 2,
            DataType::I4 | DataType::U4 | DataType::R4 => 4,
            DataType::I8 | DataType::U8 | DataType::R8 => 8,
        }
    }
}

/// A decoded scalar.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Primitive {
    Boolean(bool),
    /// A UTF-16 code unit.
    Char(u16),
    I1(i8),
    U1(u8),
    I2(i16),
    U2(u16),
    I4(i32),
    U4(u32),
    I8(i64),
    U8(u64),
    R4(f32),
    R8(f64),
}

impl Primitive {
    pub fn data_type(&self) -> DataType {
        match self {
            Primitive::Boolean(_) => DataType::Boolean,
            Primitive::Char(_) => DataType::Char,
            Primitive::I1(_) => DataType::I1,
            Primitive::U1(_) => DataType::U1,
            Primitive::I2(_) => DataType::I2,
            Primitive::U2(_) => DataType::U2,
            Primitive::I4(_) => DataType::I4,
            Primitive::U4(_) => DataType::U4,
            Primitive::I8(_) => DataType::I8,
            Primitive::U8(_) => DataType::U8,
            Primitive::R4(_) => DataType::R4,
            Primitive::R8(_) => DataType::R8,
        }
    }

    /// Read one fixed-width little-endian scalar of type `ty`.
    pub fn read(ty: DataType, r: &mut PayloadReader<'_>) -> Result<Self, PayloadError> {
        Ok(match ty {
            DataType::Boolean => Primitive::Boolean(r.read_u8()? != 0),
            DataType::Char => Primitive::Char(r.read_u16()?),
            DataType::I1 => Primitive::I1(r.read_u8()? as i8),
            DataType::U1 => Primitive::U1(r.read_u8()?),
            DataType::I2 => Primitive::I2(r.read_u16()? as i16),
            DataType::U2 => Primitive::U2(r.read_u16()?),
            DataType::I4 => Primitive::I4(r.read_u32()? as i32),
            DataType::U4 => Primitive::U4(r.read_u32()?),
            DataType::I8 => Primitive::I8(r.read_u64()? as i64),
            DataType::U8 => Primitive::U8(r.read_u64()?),
            DataType::R4 => Primitive::R4(f32::from_bits(r.read_u32()?)),
            DataType::R8 => Primitive::R8(f64::from_bits(r.read_u64()?)),
        })
    }

    /// Integer view of integral and boolean scalars.
    pub fn as_i128(&self) -> Option<i128> {
        match *self {
            Primitive::Boolean(b) => Some(i128::from(b)),
            Primitive::Char(c) => Some(i128::from(c)),
            Primitive::I1(v) => Some(i128::from(v)),
            Primitive::U1(v) => Some(i128::from(v)),
            Primitive::I2(v) => Some(i128::from(v)),
            Primitive::U2(v) => Some(i128::from(v)),
            Primitive::I4(v) => Some(i128::from(v)),
            Primitive::U4(v) => Some(i128::from(v)),
            Primitive::I8(v) => Some(i128::from(v)),
            Primitive::U8(v) => Some(i128::from(v)),
            Primitive::R4(_) | Primitive::R8(_) => None,
        }
    }

    pub fn as_f64(&self) -> Option<f64> {
        match *self {
            Primitive::R4(v) => Some(f64::from(v)),
            Primitive::R8(v) => Some(v),
            _ => None,
        }
    }
}

impl fmt::Display for Primitive {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match *self {
            Primitive::Boolean(b) => write!(f, "{b}"),
            Primitive::Char(c) => match char::from_u32(u32::from(c)) {
                Some(ch) => write!(f, "'{ch}'"),
                None => write!(f, "'\\u{{{c:04x}}}'"),
            },
            Primitive::R4(v) => write!(f, "{v}"),
            Primitive::R8(v) => write!(f, "{v}"),
            ref other => match other.as_i128() {
                Some(v) => write!(f, "{v}"),
                None => Ok(()),
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn read(ty: DataType, bytes: &[u8]) -> Primitive {
        let mut r = PayloadReader::new(bytes);
        let value = Primitive::read(ty, &mut r).unwrap();
        assert_eq!(r.remaining(), 0, "{ty:?} must consume {} bytes", ty.size());
        value
    }

    #[test]
    fn scalars_decode_little_endian() {
        assert_eq!(read(DataType::Boolean, &[1]), Primitive::Boolean(true));
        assert_eq!(read(DataType::I1, &[0xFF]), Primitive::I1(-1));
        assert_eq!(read(DataType::U2, &[0x34, 0x12]), Primitive::U2(0x1234));
        assert_eq!(read(DataType::I4, &[0xFE, 0xFF, 0xFF, 0xFF]), Primitive::I4(-2));
        assert_eq!(
            read(DataType::U8, &[1, 0, 0, 0, 0, 0, 0, 0x80]),
            Primitive::U8(0x8000_0000_0000_0001)
        );
        assert_eq!(read(DataType::R4, &1.5f32.to_le_bytes()), Primitive::R4(1.5));
        assert_eq!(read(DataType::R8, &(-0.25f64).to_le_bytes()), Primitive::R8(-0.25));
    }

    #[test]
    fn widths_match_codes() {
        for code in 0x02..=0x0D {
            let ty = DataType::from_code(code).unwrap();
            assert_eq!(ty.code(), code);
            assert!(matches!(ty.size(), 1 | 2 | 4 | 8));
        }
        assert_eq!(DataType::from_code(0x12), None);
    }

    #[test]
    fn short_scalar_is_an_error() {
        let mut r = PayloadReader::new(&[0, 0]);
        assert!(Primitive::read(DataType::I4, &mut r).is_err());
    }

    #[test]
    fn display() {
        assert_eq!(Primitive::Char(u16::from(b'A')).to_string(), "'A'");
        assert_eq!(Primitive::I2(-7).to_string(), "-7");
        assert_eq!(Primitive::Boolean(false).to_string(), "false");
    }
}
