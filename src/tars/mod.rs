//! Tars/Jce tagged binary codec.
//!
//! Every value is preceded by a head byte carrying `(tag << 4) | type`.
//! Tags of 15 and above spill into a second byte:
//!
//! ```text
//! tag < 15:   ┌──────┬──────┐          tag >= 15: ┌──────┬──────┐┌──────┐
//!             │ tag  │ type │                     │ 0xF  │ type ││ tag  │
//!             │ 4bit │ 4bit │                     │ 4bit │ 4bit ││ 8bit │
//!             └──────┴──────┘                     └──────┴──────┘└──────┘
//! ```
//!
//! Integers are written in the narrowest width that holds them and zero is
//! written as the payload-less [`TarsType::Zero`] marker. A decoder that
//! does not know a tag skips it using only the declared type, which keeps
//! older readers compatible with newer writers.
//!
//! Two levels of API are provided:
//!
//! - [`TaggedValue`] / [`TarsFields`] for schema-less data,
//! - [`TarsStruct`] for records with a static field schema.

pub mod reader;
pub mod schema;
pub mod uni;
pub mod writer;

use std::collections::BTreeMap;

use bytes::Bytes;

use crate::error::{Result, TarsError};

pub use reader::TarsReader;
pub use schema::{FieldKind, FieldSpec, Fields, TarsStruct};
pub use uni::UniPacket;
pub use writer::TarsWriter;

/// Wire type codes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum TarsType {
    Byte = 0,
    Short = 1,
    Int = 2,
    Long = 3,
    Float = 4,
    Double = 5,
    String1 = 6,
    String4 = 7,
    Map = 8,
    List = 9,
    StructBegin = 10,
    StructEnd = 11,
    Zero = 12,
    SimpleList = 13,
}

impl TarsType {
    /// Decode a type nibble.
    pub fn from_u8(code: u8) -> std::result::Result<Self, TarsError> {
        Ok(match code {
            0 => TarsType::Byte,
            1 => TarsType::Short,
            2 => TarsType::Int,
            3 => TarsType::Long,
            4 => TarsType::Float,
            5 => TarsType::Double,
            6 => TarsType::String1,
            7 => TarsType::String4,
            8 => TarsType::Map,
            9 => TarsType::List,
            10 => TarsType::StructBegin,
            11 => TarsType::StructEnd,
            12 => TarsType::Zero,
            13 => TarsType::SimpleList,
            other => return Err(TarsError::UnknownType(other)),
        })
    }

    /// Short name used in error messages.
    pub fn name(self) -> &'static str {
        match self {
            TarsType::Byte => "byte",
            TarsType::Short => "short",
            TarsType::Int => "int",
            TarsType::Long => "long",
            TarsType::Float => "float",
            TarsType::Double => "double",
            TarsType::String1 | TarsType::String4 => "string",
            TarsType::Map => "map",
            TarsType::List => "list",
            TarsType::StructBegin => "struct",
            TarsType::StructEnd => "struct-end",
            TarsType::Zero => "zero",
            TarsType::SimpleList => "simple-list",
        }
    }
}

/// Fields of a struct keyed by tag, iterated in tag order.
pub type TarsFields = BTreeMap<u8, TaggedValue>;

/// A decoded value of any shape.
///
/// Integer variants compare by numeric value regardless of width, so a
/// value that was narrowed on the wire still equals its original: the
/// integer `0` decodes as [`TaggedValue::Zero`], which equals `Int(0)`.
#[derive(Debug, Clone)]
pub enum TaggedValue {
    Byte(i8),
    Short(i16),
    Int(i32),
    Long(i64),
    Float(f32),
    Double(f64),
    String(String),
    List(Vec<TaggedValue>),
    Map(Vec<(TaggedValue, TaggedValue)>),
    Struct(TarsFields),
    Zero,
    SimpleList(Bytes),
}

impl TaggedValue {
    /// Integer value for any integer-family variant.
    pub fn as_i64(&self) -> Option<i64> {
        match *self {
            TaggedValue::Byte(v) => Some(v as i64),
            TaggedValue::Short(v) => Some(v as i64),
            TaggedValue::Int(v) => Some(v as i64),
            TaggedValue::Long(v) => Some(v),
            TaggedValue::Zero => Some(0),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            TaggedValue::String(s) => Some(s),
            _ => None,
        }
    }

    /// Name of the variant's shape, for error messages.
    pub fn kind_name(&self) -> &'static str {
        match self {
            TaggedValue::Byte(_) => "byte",
            TaggedValue::Short(_) => "short",
            TaggedValue::Int(_) => "int",
            TaggedValue::Long(_) => "long",
            TaggedValue::Float(_) => "float",
            TaggedValue::Double(_) => "double",
            TaggedValue::String(_) => "string",
            TaggedValue::List(_) => "list",
            TaggedValue::Map(_) => "map",
            TaggedValue::Struct(_) => "struct",
            TaggedValue::Zero => "zero",
            TaggedValue::SimpleList(_) => "simple-list",
        }
    }
}

impl PartialEq for TaggedValue {
    fn eq(&self, other: &Self) -> bool {
        use TaggedValue::*;
        match (self, other) {
            (Float(a), Float(b)) => a.to_bits() == b.to_bits(),
            (Double(a), Double(b)) => a.to_bits() == b.to_bits(),
            (String(a), String(b)) => a == b,
            (List(a), List(b)) => a == b,
            (Map(a), Map(b)) => a == b,
            (Struct(a), Struct(b)) => a == b,
            (SimpleList(a), SimpleList(b)) => a == b,
            (a, b) => match (a.as_i64(), b.as_i64()) {
                (Some(x), Some(y)) => x == y,
                _ => false,
            },
        }
    }
}

impl From<i32> for TaggedValue {
    fn from(v: i32) -> Self {
        TaggedValue::Int(v)
    }
}

impl From<i64> for TaggedValue {
    fn from(v: i64) -> Self {
        TaggedValue::Long(v)
    }
}

impl From<&str> for TaggedValue {
    fn from(v: &str) -> Self {
        TaggedValue::String(v.to_string())
    }
}

impl From<String> for TaggedValue {
    fn from(v: String) -> Self {
        TaggedValue::String(v)
    }
}

impl From<Vec<u8>> for TaggedValue {
    fn from(v: Vec<u8>) -> Self {
        TaggedValue::SimpleList(Bytes::from(v))
    }
}

/// Encode top-level struct fields (no begin/end markers), in tag order.
pub fn encode_fields(fields: &TarsFields) -> Bytes {
    let mut w = TarsWriter::new();
    for (&tag, value) in fields {
        w.write_value(tag, value);
    }
    w.freeze()
}

/// Decode top-level struct fields until the input is exhausted.
pub fn decode_fields(data: &[u8]) -> Result<TarsFields> {
    let mut r = TarsReader::new(data);
    Ok(r.read_fields_to_end()?)
}

/// Encode a typed record.
pub fn to_bytes<T: TarsStruct>(value: &T) -> Bytes {
    let mut w = TarsWriter::new();
    value.write_fields(&mut w);
    w.freeze()
}

/// Decode a typed record, skipping unknown tags and filling defaults.
pub fn from_bytes<T: TarsStruct>(data: &[u8]) -> Result<T> {
    let mut r = TarsReader::new(data);
    let fields = r.read_schema_to_end(T::FIELDS)?;
    Ok(T::from_fields(Fields::new(fields))?)
}
