//! `RequestPacket` envelope ("UniPacket", version 3).
//!
//! Service calls such as `StatSvc.register` wrap their Tars record in this
//! envelope. The record travels in the `buffer` field as a serialized
//! `map<string, bytes>`, keyed by the record's name.

use bytes::Bytes;

use super::{FieldKind, FieldSpec, Fields, TarsStruct, TarsWriter, TaggedValue};
use crate::error::{Result, TarsError};

/// Envelope version using a flat `map<string, bytes>` body.
pub const UNI_VERSION: i16 = 3;

/// The Jce `RequestPacket`.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct UniPacket {
    pub version: i16,
    pub packet_type: i8,
    pub message_type: i32,
    pub request_id: i32,
    pub servant_name: String,
    pub func_name: String,
    pub buffer: Bytes,
    pub timeout: i32,
    pub context: Vec<(String, String)>,
    pub status: Vec<(String, String)>,
}

impl TarsStruct for UniPacket {
    const FIELDS: &'static [FieldSpec] = &[
        FieldSpec::required(1, "version", FieldKind::Integer),
        FieldSpec::optional(2, "packet_type", FieldKind::Integer),
        FieldSpec::optional(3, "message_type", FieldKind::Integer),
        FieldSpec::optional(4, "request_id", FieldKind::Integer),
        FieldSpec::required(5, "servant_name", FieldKind::String),
        FieldSpec::required(6, "func_name", FieldKind::String),
        FieldSpec::required(7, "buffer", FieldKind::Bytes),
        FieldSpec::optional(8, "timeout", FieldKind::Integer),
        FieldSpec::optional(9, "context", FieldKind::Map),
        FieldSpec::optional(10, "status", FieldKind::Map),
    ];

    fn write_fields(&self, w: &mut TarsWriter) {
        w.write_i16(1, self.version);
        w.write_i8(2, self.packet_type);
        w.write_i32(3, self.message_type);
        w.write_i32(4, self.request_id);
        w.write_string(5, &self.servant_name);
        w.write_string(6, &self.func_name);
        w.write_bytes(7, &self.buffer);
        w.write_i32(8, self.timeout);
        w.write_value(9, &string_map(&self.context));
        w.write_value(10, &string_map(&self.status));
    }

    fn from_fields(f: Fields) -> std::result::Result<Self, TarsError> {
        Ok(Self {
            version: f.i64(1)? as i16,
            packet_type: f.i64(2)? as i8,
            message_type: f.i32(3)?,
            request_id: f.i32(4)?,
            servant_name: f.string(5)?,
            func_name: f.string(6)?,
            buffer: f.bytes(7)?,
            timeout: f.i32(8)?,
            context: f.string_map(9)?,
            status: f.string_map(10)?,
        })
    }
}

fn string_map(entries: &[(String, String)]) -> TaggedValue {
    TaggedValue::Map(
        entries
            .iter()
            .map(|(k, v)| (TaggedValue::from(k.as_str()), TaggedValue::from(v.as_str())))
            .collect(),
    )
}

impl UniPacket {
    /// Start an envelope for `servant.func`.
    pub fn new(servant_name: impl Into<String>, func_name: impl Into<String>, request_id: i32) -> Self {
        Self {
            version: UNI_VERSION,
            request_id,
            servant_name: servant_name.into(),
            func_name: func_name.into(),
            ..Default::default()
        }
    }

    /// Set the body to a single named record.
    pub fn with_record<T: TarsStruct>(mut self, name: &str, record: &T) -> Self {
        let mut inner = TarsWriter::new();
        inner.write_struct(0, record);
        let map = TaggedValue::Map(vec![(
            TaggedValue::from(name),
            TaggedValue::SimpleList(inner.freeze()),
        )]);
        let mut w = TarsWriter::new();
        w.write_value(0, &map);
        self.buffer = w.freeze();
        self
    }

    /// Extract the record stored under `name`.
    pub fn record<T: TarsStruct>(&self, name: &str) -> Result<T> {
        let body = super::decode_fields(&self.buffer)?;
        let entries = Fields::new(body).bytes_map(0)?;
        let (_, raw) = entries
            .into_iter()
            .find(|(k, _)| k == name)
            .ok_or_else(|| TarsError::MissingEntry(name.to_string()))?;

        Ok(Fields::new(super::decode_fields(&raw)?).structure(0)?)
    }

    pub fn encode(&self) -> Bytes {
        super::to_bytes(self)
    }

    pub fn decode(data: &[u8]) -> Result<Self> {
        super::from_bytes(data)
    }
}
