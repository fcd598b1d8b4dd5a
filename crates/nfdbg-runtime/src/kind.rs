use std::fmt;

/// Device-assigned identifier of a remote value.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Handle(pub u32);

impl fmt::Display for Handle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{:08x}", self.0)
    }
}

impl From<u32> for Handle {
    fn from(raw: u32) -> Self {
        Handle(raw)
    }
}

/// Kind of a remote value, as tagged on the wire.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ValueKind {
    Null,
    Reference,
    Primitive,
    ValueType,
    Class,
    Array,
    Reflection,
}

/// Structural facts about a kind. Fixed per kind; never state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct KindTraits {
    pub is_reference: bool,
    pub is_null: bool,
    pub is_primitive: bool,
    pub is_value_type: bool,
    pub is_array: bool,
    pub is_reflection: bool,
}

const NONE: KindTraits = KindTraits {
    is_reference: false,
    is_null: false,
    is_primitive: false,
    is_value_type: false,
    is_array: false,
    is_reflection: false,
};

impl ValueKind {
    pub const ALL: [ValueKind; 7] = [
        ValueKind::Null,
        ValueKind::Reference,
        ValueKind::Primitive,
        ValueKind::ValueType,
        ValueKind::Class,
        ValueKind::Array,
        ValueKind::Reflection,
    ];

    pub const fn traits(self) -> KindTraits {
        match self {
            ValueKind::Null => KindTraits {
                is_null: true,
                ..NONE
            },
            ValueKind::Reference => KindTraits {
                is_reference: true,
                ..NONE
            },
            ValueKind::Primitive => KindTraits {
                is_primitive: true,
                ..NONE
            },
            ValueKind::ValueType => KindTraits {
                is_value_type: true,
                ..NONE
            },
            ValueKind::Class => NONE,
            ValueKind::Array => KindTraits {
                is_array: true,
                ..NONE
            },
            ValueKind::Reflection => KindTraits {
                is_reflection: true,
                ..NONE
            },
        }
    }

    /// Whether values of this kind have contents behind their handle.
    pub const fn is_fetchable(self) -> bool {
        !matches!(self, ValueKind::Null | ValueKind::Reference)
    }

    pub const fn code(self) -> u8 {
        match self {
            ValueKind::Null => 0,
            ValueKind::Reference => 1,
            ValueKind::Primitive => 2,
            ValueKind::ValueType => 3,
            ValueKind::Class => 4,
            ValueKind::Array => 5,
            ValueKind::Reflection => 6,
        }
    }

    pub fn from_code(code: u8) -> Option<Self> {
        Self::ALL.into_iter().find(|kind| kind.code() == code)
    }
}

impl fmt::Display for ValueKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            ValueKind::Null => "null",
            ValueKind::Reference => "reference",
            ValueKind::Primitive => "primitive",
            ValueKind::ValueType => "value type",
            ValueKind::Class => "class",
            ValueKind::Array => "array",
            ValueKind::Reflection => "reflection",
        })
    }
}
