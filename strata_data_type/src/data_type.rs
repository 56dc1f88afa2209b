//! Types and functions for representing field element types.

use std::{fmt, str::FromStr};

use serde::{de::Error as _, Deserialize, Deserializer, Serialize, Serializer};

use crate::error::UnknownTypeError;

/// Fixed-width integer types, used by raw file reads such as `$i32 off`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum IntType {
    /// 8 bit unsigned int
    U8,
    /// 8 bit signed int
    I8,
    /// 16 bit unsigned int
    U16,
    /// 16 bit signed int
    I16,
    /// 32 bit unsigned int
    U32,
    /// 32 bit signed int
    I32,
    /// 64 bit unsigned int
    U64,
    /// 64 bit signed int
    I64,
}

impl IntType {
    /// All int types, in declaration order.
    pub fn all() -> &'static [IntType] {
        &[
            Self::U8,
            Self::I8,
            Self::U16,
            Self::I16,
            Self::U32,
            Self::I32,
            Self::U64,
            Self::I64,
        ]
    }

    /// The size of the int in bytes.
    pub fn size(&self) -> usize {
        match self {
            Self::U8 => 1,
            Self::I8 => 1,
            Self::U16 => 2,
            Self::I16 => 2,
            Self::U32 => 4,
            Self::I32 => 4,
            Self::U64 => 8,
            Self::I64 => 8,
        }
    }

    /// Return true if the int type is signed.
    pub fn is_signed(&self) -> bool {
        matches!(self, Self::I8 | Self::I16 | Self::I32 | Self::I64)
    }

    /// Decode a little endian value, sign or zero extending it to 64 bits.
    ///
    /// `bytes` must be at least [IntType::size] bytes long; extra bytes are ignored.
    pub fn decode(&self, bytes: &[u8]) -> i64 {
        match self {
            Self::U8 => bytes[0] as i64,
            Self::I8 => bytes[0] as i8 as i64,
            Self::U16 => u16::from_le_bytes([bytes[0], bytes[1]]) as i64,
            Self::I16 => i16::from_le_bytes([bytes[0], bytes[1]]) as i64,
            Self::U32 => u32::from_le_bytes(le_array(bytes)) as i64,
            Self::I32 => i32::from_le_bytes(le_array(bytes)) as i64,
            Self::U64 => u64::from_le_bytes(le_array(bytes)) as i64,
            Self::I64 => i64::from_le_bytes(le_array(bytes)),
        }
    }
}

fn le_array<const N: usize>(bytes: &[u8]) -> [u8; N] {
    let mut array = [0; N];
    array.copy_from_slice(&bytes[..N]);
    array
}

impl FromStr for IntType {
    type Err = UnknownTypeError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "u8" => Ok(Self::U8),
            "i8" => Ok(Self::I8),
            "u16" => Ok(Self::U16),
            "i16" => Ok(Self::I16),
            "u32" => Ok(Self::U32),
            "i32" => Ok(Self::I32),
            "u64" => Ok(Self::U64),
            "i64" => Ok(Self::I64),
            _ => Err(UnknownTypeError {
                name: s.to_string(),
            }),
        }
    }
}

impl fmt::Display for IntType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            IntType::U8 => write!(f, "u8"),
            IntType::I8 => write!(f, "i8"),
            IntType::U16 => write!(f, "u16"),
            IntType::I16 => write!(f, "i16"),
            IntType::U32 => write!(f, "u32"),
            IntType::I32 => write!(f, "i32"),
            IntType::U64 => write!(f, "u64"),
            IntType::I64 => write!(f, "i64"),
        }
    }
}

/// The builtin scalar element types.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum BuiltinType {
    /// Padding byte, contributes size but no value.
    Pad,
    /// A single 8 bit character.
    Char,
    /// A fixed-width integer.
    Int(IntType),
    /// 32 bit float
    F32,
    /// 64 bit float
    F64,
}

impl BuiltinType {
    /// The size of one element in bytes.
    pub fn size(&self) -> usize {
        match self {
            Self::Pad | Self::Char => 1,
            Self::Int(int_type) => int_type.size(),
            Self::F32 => 4,
            Self::F64 => 8,
        }
    }

    /// Whether element previews should be joined with `", "`.
    ///
    /// Characters and padding are shown as a contiguous run instead.
    pub fn is_separated(&self) -> bool {
        !matches!(self, Self::Pad | Self::Char)
    }

    /// Return the int type if this is an integer type.
    pub fn int_type(&self) -> Option<IntType> {
        match self {
            Self::Int(int_type) => Some(*int_type),
            _ => None,
        }
    }
}

impl FromStr for BuiltinType {
    type Err = UnknownTypeError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pad" => Ok(Self::Pad),
            "char" => Ok(Self::Char),
            "f32" => Ok(Self::F32),
            "f64" => Ok(Self::F64),
            _ => s.parse().map(Self::Int),
        }
    }
}

impl fmt::Display for BuiltinType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            BuiltinType::Pad => write!(f, "pad"),
            BuiltinType::Char => write!(f, "char"),
            BuiltinType::Int(int_type) => write!(f, "{}", int_type),
            BuiltinType::F32 => write!(f, "f32"),
            BuiltinType::F64 => write!(f, "f64"),
        }
    }
}

impl Serialize for BuiltinType {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_str(&self.to_string())
    }
}

impl<'de> Deserialize<'de> for BuiltinType {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        let s = String::deserialize(deserializer)?;
        s.parse().map_err(D::Error::custom)
    }
}

/// The type of a struct field: a builtin scalar or a reference to a struct definition.
///
/// Type names that are not builtin are assumed to name a struct. Whether that struct
/// actually exists is only known once the schema is consulted.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum FieldType {
    /// A builtin scalar type.
    Builtin(BuiltinType),
    /// A symbolic reference to a struct definition.
    Struct(String),
}

impl FieldType {
    /// Parse a type name. This never fails, unknown names become struct references.
    pub fn from_name(name: &str) -> Self {
        match name.parse() {
            Ok(builtin) => Self::Builtin(builtin),
            Err(_) => Self::Struct(name.to_string()),
        }
    }

    /// Return the builtin type, if any.
    pub fn builtin(&self) -> Option<BuiltinType> {
        match self {
            Self::Builtin(builtin) => Some(*builtin),
            Self::Struct(_) => None,
        }
    }

    /// Return the referenced struct name, if any.
    pub fn struct_name(&self) -> Option<&str> {
        match self {
            Self::Builtin(_) => None,
            Self::Struct(name) => Some(name),
        }
    }
}

impl fmt::Display for FieldType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FieldType::Builtin(builtin) => write!(f, "{}", builtin),
            FieldType::Struct(name) => write!(f, "{}", name),
        }
    }
}

impl Serialize for FieldType {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_str(&self.to_string())
    }
}

impl<'de> Deserialize<'de> for FieldType {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        let s = String::deserialize(deserializer)?;
        if s.is_empty() {
            return Err(D::Error::custom("field type name must not be empty"));
        }
        Ok(Self::from_name(&s))
    }
}
