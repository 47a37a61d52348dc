//! Static field schemas for typed Tars records.
//!
//! A record type declares its fields once as a `const` table of
//! [`FieldSpec`]s. Decoding keeps only the tags the table names, checks
//! each one against its declared kind, skips everything else and fills
//! missing optional fields with the kind's zero value.
//!
//! # Example
//!
//! ```
//! use sso_wire::tars::{self, FieldKind, FieldSpec, Fields, TarsStruct, TarsWriter};
//! use sso_wire::error::TarsError;
//!
//! #[derive(Debug, PartialEq)]
//! struct Ping {
//!     id: i64,
//!     note: String,
//! }
//!
//! impl TarsStruct for Ping {
//!     const FIELDS: &'static [FieldSpec] = &[
//!         FieldSpec::required(0, "id", FieldKind::Integer),
//!         FieldSpec::optional(1, "note", FieldKind::String),
//!     ];
//!
//!     fn write_fields(&self, w: &mut TarsWriter) {
//!         w.write_i64(0, self.id);
//!         w.write_string(1, &self.note);
//!     }
//!
//!     fn from_fields(f: Fields) -> Result<Self, TarsError> {
//!         Ok(Self { id: f.i64(0)?, note: f.string(1)? })
//!     }
//! }
//!
//! let ping = Ping { id: 7, note: "hi".into() };
//! let bytes = tars::to_bytes(&ping);
//! assert_eq!(tars::from_bytes::<Ping>(&bytes).unwrap(), ping);
//! ```

use bytes::Bytes;

use super::{TarsFields, TaggedValue, TarsWriter};
use crate::error::TarsError;

type Result<T> = std::result::Result<T, TarsError>;

/// Declared shape of a schema field.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FieldKind {
    /// Any integer width, including the zero marker.
    Integer,
    Float,
    Double,
    String,
    /// Raw bytes: a simple list, or a list of byte values.
    Bytes,
    List,
    Map,
    Struct,
}

impl FieldKind {
    fn name(self) -> &'static str {
        match self {
            FieldKind::Integer => "integer",
            FieldKind::Float => "float",
            FieldKind::Double => "double",
            FieldKind::String => "string",
            FieldKind::Bytes => "bytes",
            FieldKind::List => "list",
            FieldKind::Map => "map",
            FieldKind::Struct => "struct",
        }
    }

    fn accepts(self, value: &TaggedValue) -> bool {
        match (self, value) {
            (FieldKind::Integer, v) => v.as_i64().is_some(),
            (FieldKind::Float, TaggedValue::Float(_) | TaggedValue::Zero) => true,
            (FieldKind::Double, TaggedValue::Double(_) | TaggedValue::Zero) => true,
            (FieldKind::String, TaggedValue::String(_)) => true,
            (FieldKind::Bytes, TaggedValue::SimpleList(_)) => true,
            (FieldKind::Bytes, TaggedValue::List(items)) => {
                items.iter().all(|i| i.as_i64().is_some())
            }
            (FieldKind::List, TaggedValue::List(_)) => true,
            (FieldKind::Map, TaggedValue::Map(_)) => true,
            (FieldKind::Struct, TaggedValue::Struct(_)) => true,
            _ => false,
        }
    }

    fn default_value(self) -> TaggedValue {
        match self {
            FieldKind::Integer => TaggedValue::Zero,
            FieldKind::Float => TaggedValue::Float(0.0),
            FieldKind::Double => TaggedValue::Double(0.0),
            FieldKind::String => TaggedValue::String(String::new()),
            FieldKind::Bytes => TaggedValue::SimpleList(Bytes::new()),
            FieldKind::List => TaggedValue::List(Vec::new()),
            FieldKind::Map => TaggedValue::Map(Vec::new()),
            FieldKind::Struct => TaggedValue::Struct(TarsFields::new()),
        }
    }
}

/// One entry of a record's field table.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FieldSpec {
    pub tag: u8,
    pub name: &'static str,
    pub kind: FieldKind,
    pub required: bool,
}

impl FieldSpec {
    pub const fn required(tag: u8, name: &'static str, kind: FieldKind) -> Self {
        Self {
            tag,
            name,
            kind,
            required: true,
        }
    }

    pub const fn optional(tag: u8, name: &'static str, kind: FieldKind) -> Self {
        Self {
            tag,
            name,
            kind,
            required: false,
        }
    }

    pub(crate) fn check(&self, value: &TaggedValue) -> Result<()> {
        if self.kind.accepts(value) {
            Ok(())
        } else {
            Err(TarsError::TypeMismatch {
                tag: self.tag,
                expected: self.kind.name(),
                found: value.kind_name(),
            })
        }
    }
}

/// Fill absent optional fields with their default, failing on absent
/// required ones.
pub(crate) fn apply_defaults(schema: &[FieldSpec], fields: &mut TarsFields) -> Result<()> {
    for spec in schema {
        if fields.contains_key(&spec.tag) {
            continue;
        }
        if spec.required {
            return Err(TarsError::MissingField(spec.tag));
        }
        fields.insert(spec.tag, spec.kind.default_value());
    }
    Ok(())
}

/// Project a decoded field map through `schema`.
pub(crate) fn project(schema: &[FieldSpec], mut raw: TarsFields) -> Result<TarsFields> {
    raw.retain(|tag, _| schema.iter().any(|f| f.tag == *tag));
    for (tag, value) in &raw {
        if let Some(spec) = schema.iter().find(|f| f.tag == *tag) {
            spec.check(value)?;
        }
    }
    apply_defaults(schema, &mut raw)?;
    Ok(raw)
}

/// A record with a static field schema.
pub trait TarsStruct: Sized {
    /// Field table, in tag order.
    const FIELDS: &'static [FieldSpec];

    /// Write every field, in tag order, without struct markers.
    fn write_fields(&self, w: &mut TarsWriter);

    /// Build the record from schema-checked fields.
    fn from_fields(fields: Fields) -> Result<Self>;
}

/// Schema-checked fields handed to [`TarsStruct::from_fields`].
#[derive(Debug, Clone, Default)]
pub struct Fields {
    inner: TarsFields,
}

impl Fields {
    pub fn new(inner: TarsFields) -> Self {
        Self { inner }
    }

    pub fn into_inner(self) -> TarsFields {
        self.inner
    }

    pub fn value(&self, tag: u8) -> Option<&TaggedValue> {
        self.inner.get(&tag)
    }

    fn get(&self, tag: u8) -> Result<&TaggedValue> {
        self.inner.get(&tag).ok_or(TarsError::MissingField(tag))
    }

    fn mismatch(tag: u8, expected: &'static str, found: &TaggedValue) -> TarsError {
        TarsError::TypeMismatch {
            tag,
            expected,
            found: found.kind_name(),
        }
    }

    pub fn i64(&self, tag: u8) -> Result<i64> {
        let v = self.get(tag)?;
        v.as_i64().ok_or_else(|| Self::mismatch(tag, "integer", v))
    }

    pub fn i32(&self, tag: u8) -> Result<i32> {
        let v = self.i64(tag)?;
        i32::try_from(v).map_err(|_| TarsError::InvalidLength(v))
    }

    pub fn u32(&self, tag: u8) -> Result<u32> {
        let v = self.i64(tag)?;
        u32::try_from(v).map_err(|_| TarsError::InvalidLength(v))
    }

    pub fn bool(&self, tag: u8) -> Result<bool> {
        Ok(self.i64(tag)? != 0)
    }

    pub fn f64(&self, tag: u8) -> Result<f64> {
        match self.get(tag)? {
            TaggedValue::Double(v) => Ok(*v),
            TaggedValue::Float(v) => Ok(*v as f64),
            TaggedValue::Zero => Ok(0.0),
            other => Err(Self::mismatch(tag, "double", other)),
        }
    }

    pub fn string(&self, tag: u8) -> Result<String> {
        match self.get(tag)? {
            TaggedValue::String(s) => Ok(s.clone()),
            other => Err(Self::mismatch(tag, "string", other)),
        }
    }

    pub fn bytes(&self, tag: u8) -> Result<Bytes> {
        match self.get(tag)? {
            TaggedValue::SimpleList(b) => Ok(b.clone()),
            TaggedValue::List(items) => items
                .iter()
                .map(|i| i.as_i64().map(|b| b as u8))
                .collect::<Option<Vec<u8>>>()
                .map(Bytes::from)
                .ok_or(TarsError::TypeMismatch {
                    tag,
                    expected: "bytes",
                    found: "list",
                }),
            other => Err(Self::mismatch(tag, "bytes", other)),
        }
    }

    /// Decode a nested record through its own schema.
    pub fn structure<T: TarsStruct>(&self, tag: u8) -> Result<T> {
        match self.get(tag)? {
            TaggedValue::Struct(raw) => T::from_fields(Fields::new(project(T::FIELDS, raw.clone())?)),
            other => Err(Self::mismatch(tag, "struct", other)),
        }
    }

    /// Decode a list of nested records.
    pub fn struct_list<T: TarsStruct>(&self, tag: u8) -> Result<Vec<T>> {
        match self.get(tag)? {
            TaggedValue::List(items) => items
                .iter()
                .map(|item| match item {
                    TaggedValue::Struct(raw) => {
                        T::from_fields(Fields::new(project(T::FIELDS, raw.clone())?))
                    }
                    other => Err(Self::mismatch(tag, "struct", other)),
                })
                .collect(),
            other => Err(Self::mismatch(tag, "list", other)),
        }
    }

    /// Decode a `map<string, bytes>` field.
    pub fn bytes_map(&self, tag: u8) -> Result<Vec<(String, Bytes)>> {
        match self.get(tag)? {
            TaggedValue::Map(entries) => entries
                .iter()
                .map(|(k, v)| match (k, v) {
                    (TaggedValue::String(k), TaggedValue::SimpleList(v)) => Ok((k.clone(), v.clone())),
                    (TaggedValue::String(_), other) => Err(Self::mismatch(tag, "bytes", other)),
                    (other, _) => Err(Self::mismatch(tag, "string", other)),
                })
                .collect(),
            other => Err(Self::mismatch(tag, "map", other)),
        }
    }

    /// Decode a `map<string, string>` field.
    pub fn string_map(&self, tag: u8) -> Result<Vec<(String, String)>> {
        match self.get(tag)? {
            TaggedValue::Map(entries) => entries
                .iter()
                .map(|(k, v)| match (k, v) {
                    (TaggedValue::String(k), TaggedValue::String(v)) => Ok((k.clone(), v.clone())),
                    (_, other) => Err(Self::mismatch(tag, "string", other)),
                })
                .collect(),
            other => Err(Self::mismatch(tag, "map", other)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tars::{self, TarsReader};

    #[derive(Debug, Clone, PartialEq)]
    struct Profile {
        uin: i64,
        nick: String,
        level: i32,
        avatar: Bytes,
    }

    impl TarsStruct for Profile {
        const FIELDS: &'static [FieldSpec] = &[
            FieldSpec::required(0, "uin", FieldKind::Integer),
            FieldSpec::required(1, "nick", FieldKind::String),
            FieldSpec::optional(3, "level", FieldKind::Integer),
            FieldSpec::optional(5, "avatar", FieldKind::Bytes),
        ];

        fn write_fields(&self, w: &mut TarsWriter) {
            w.write_i64(0, self.uin);
            w.write_string(1, &self.nick);
            w.write_i32(3, self.level);
            w.write_bytes(5, &self.avatar);
        }

        fn from_fields(f: Fields) -> Result<Self> {
            Ok(Self {
                uin: f.i64(0)?,
                nick: f.string(1)?,
                level: f.i32(3)?,
                avatar: f.bytes(5)?,
            })
        }
    }

    #[derive(Debug, PartialEq)]
    struct Wrapper {
        owner: Profile,
        friends: Vec<Profile>,
    }

    impl TarsStruct for Wrapper {
        const FIELDS: &'static [FieldSpec] = &[
            FieldSpec::required(0, "owner", FieldKind::Struct),
            FieldSpec::optional(1, "friends", FieldKind::List),
        ];

        fn write_fields(&self, w: &mut TarsWriter) {
            w.write_struct(0, &self.owner);
            w.write_struct_list(1, &self.friends);
        }

        fn from_fields(f: Fields) -> Result<Self> {
            Ok(Self {
                owner: f.structure(0)?,
                friends: f.struct_list(1)?,
            })
        }
    }

    fn profile() -> Profile {
        Profile {
            uin: 123_456_789,
            nick: "alice".into(),
            level: 0,
            avatar: Bytes::from_static(b"\x89PNG"),
        }
    }

    #[test]
    fn test_typed_roundtrip() {
        let p = profile();
        assert_eq!(tars::from_bytes::<Profile>(&tars::to_bytes(&p)).unwrap(), p);
    }

    #[test]
    fn test_nested_typed_roundtrip() {
        let w = Wrapper {
            owner: profile(),
            friends: vec![profile(), Profile { uin: 1, ..profile() }],
        };
        assert_eq!(tars::from_bytes::<Wrapper>(&tars::to_bytes(&w)).unwrap(), w);
    }

    #[test]
    fn test_unknown_tags_interleaved() {
        let p = profile();
        let plain = tars::to_bytes(&p);

        let mut w = TarsWriter::new();
        w.write_string(200, "leading unknown");
        w.write_i64(0, p.uin);
        w.write_value(
            2,
            &TaggedValue::Map(vec![(TaggedValue::from("k"), TaggedValue::Int(1))]),
        );
        w.write_string(1, &p.nick);
        w.write_value(
            4,
            &TaggedValue::Struct([(0u8, TaggedValue::List(vec![TaggedValue::Zero]))].into_iter().collect()),
        );
        w.write_i32(3, p.level);
        w.write_f64(14, 9.5);
        w.write_bytes(5, &p.avatar);
        w.write_bytes(30, b"trailing unknown");
        let extended = w.freeze();

        let from_plain = tars::from_bytes::<Profile>(&plain).unwrap();
        let from_extended = tars::from_bytes::<Profile>(&extended).unwrap();
        assert_eq!(from_plain, from_extended);
        assert_eq!(from_extended, p);
    }

    #[test]
    fn test_unknown_tags_in_nested_struct() {
        let mut inner = TarsWriter::new();
        inner.write_i64(0, 5);
        inner.write_string(9, "ignored");
        inner.write_string(1, "bob");
        let inner = tars::decode_fields(&inner.freeze()).unwrap();

        let mut outer = TarsWriter::new();
        outer.write_value(0, &TaggedValue::Struct(inner));
        let decoded = tars::from_bytes::<Wrapper>(&outer.freeze()).unwrap();

        assert_eq!(decoded.owner.uin, 5);
        assert_eq!(decoded.owner.nick, "bob");
        assert!(decoded.friends.is_empty());
    }

    #[test]
    fn test_missing_optional_gets_default() {
        let mut w = TarsWriter::new();
        w.write_i64(0, 1);
        w.write_string(1, "x");
        let p = tars::from_bytes::<Profile>(&w.freeze()).unwrap();
        assert_eq!(p.level, 0);
        assert!(p.avatar.is_empty());
    }

    #[test]
    fn test_missing_required_fails() {
        let mut w = TarsWriter::new();
        w.write_string(1, "no uin");
        let err = tars::from_bytes::<Profile>(&w.freeze()).unwrap_err();
        assert!(matches!(
            err,
            crate::error::WireError::Tars(TarsError::MissingField(0))
        ));
    }

    #[test]
    fn test_wrong_type_for_known_tag() {
        let mut w = TarsWriter::new();
        w.write_string(0, "not a number");
        w.write_string(1, "x");
        let bytes = w.freeze();
        let mut r = TarsReader::new(&bytes);
        assert!(matches!(
            r.read_schema_to_end(Profile::FIELDS),
            Err(TarsError::TypeMismatch { tag: 0, .. })
        ));
    }

    #[test]
    fn test_bytes_from_plain_list() {
        let fields: TarsFields = [(
            0u8,
            TaggedValue::List(vec![TaggedValue::Byte(1), TaggedValue::Zero, TaggedValue::Byte(-1)]),
        )]
        .into_iter()
        .collect();
        assert_eq!(Fields::new(fields).bytes(0).unwrap(), Bytes::from_static(&[1, 0, 0xFF]));
    }
}
