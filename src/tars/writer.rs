//! Tars encoder.

use bytes::{BufMut, Bytes, BytesMut};

use super::{TarsStruct, TarsType, TaggedValue};

/// Strings longer than this use the 4-byte length form.
pub const STRING1_MAX: usize = u8::MAX as usize;

/// Append-only Tars encoder over a `BytesMut`.
#[derive(Debug, Default)]
pub struct TarsWriter {
    buf: BytesMut,
}

impl TarsWriter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            buf: BytesMut::with_capacity(capacity),
        }
    }

    /// Bytes written so far.
    #[inline]
    pub fn len(&self) -> usize {
        self.buf.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.buf.is_empty()
    }

    pub fn freeze(self) -> Bytes {
        self.buf.freeze()
    }

    /// Write a head byte (two bytes when `tag >= 15`).
    pub fn write_head(&mut self, tag: u8, ty: TarsType) {
        if tag < 15 {
            self.buf.put_u8((tag << 4) | ty as u8);
        } else {
            self.buf.put_u8(0xF0 | ty as u8);
            self.buf.put_u8(tag);
        }
    }

    pub fn write_i8(&mut self, tag: u8, v: i8) {
        if v == 0 {
            self.write_head(tag, TarsType::Zero);
        } else {
            self.write_head(tag, TarsType::Byte);
            self.buf.put_i8(v);
        }
    }

    pub fn write_i16(&mut self, tag: u8, v: i16) {
        if let Ok(narrow) = i8::try_from(v) {
            self.write_i8(tag, narrow);
        } else {
            self.write_head(tag, TarsType::Short);
            self.buf.put_i16(v);
        }
    }

    pub fn write_i32(&mut self, tag: u8, v: i32) {
        if let Ok(narrow) = i16::try_from(v) {
            self.write_i16(tag, narrow);
        } else {
            self.write_head(tag, TarsType::Int);
            self.buf.put_i32(v);
        }
    }

    pub fn write_i64(&mut self, tag: u8, v: i64) {
        if let Ok(narrow) = i32::try_from(v) {
            self.write_i32(tag, narrow);
        } else {
            self.write_head(tag, TarsType::Long);
            self.buf.put_i64(v);
        }
    }

    pub fn write_bool(&mut self, tag: u8, v: bool) {
        self.write_i8(tag, v as i8);
    }

    pub fn write_f32(&mut self, tag: u8, v: f32) {
        self.write_head(tag, TarsType::Float);
        self.buf.put_f32(v);
    }

    pub fn write_f64(&mut self, tag: u8, v: f64) {
        self.write_head(tag, TarsType::Double);
        self.buf.put_f64(v);
    }

    pub fn write_string(&mut self, tag: u8, s: &str) {
        let bytes = s.as_bytes();
        if bytes.len() > STRING1_MAX {
            self.write_head(tag, TarsType::String4);
            self.buf.put_u32(bytes.len() as u32);
        } else {
            self.write_head(tag, TarsType::String1);
            self.buf.put_u8(bytes.len() as u8);
        }
        self.buf.put_slice(bytes);
    }

    /// Write raw bytes as a simple list.
    pub fn write_bytes(&mut self, tag: u8, bytes: &[u8]) {
        self.write_head(tag, TarsType::SimpleList);
        self.write_head(0, TarsType::Byte);
        self.write_i32(0, bytes.len() as i32);
        self.buf.put_slice(bytes);
    }

    /// Write a nested record between struct markers.
    pub fn write_struct<T: TarsStruct>(&mut self, tag: u8, value: &T) {
        self.write_head(tag, TarsType::StructBegin);
        value.write_fields(self);
        self.write_head(0, TarsType::StructEnd);
    }

    /// Write a list of nested records.
    pub fn write_struct_list<T: TarsStruct>(&mut self, tag: u8, items: &[T]) {
        self.write_head(tag, TarsType::List);
        self.write_i32(0, items.len() as i32);
        for item in items {
            self.write_struct(0, item);
        }
    }

    /// Write any schema-less value.
    pub fn write_value(&mut self, tag: u8, value: &TaggedValue) {
        match value {
            TaggedValue::Byte(v) => self.write_i8(tag, *v),
            TaggedValue::Short(v) => self.write_i16(tag, *v),
            TaggedValue::Int(v) => self.write_i32(tag, *v),
            TaggedValue::Long(v) => self.write_i64(tag, *v),
            TaggedValue::Float(v) => self.write_f32(tag, *v),
            TaggedValue::Double(v) => self.write_f64(tag, *v),
            TaggedValue::String(s) => self.write_string(tag, s),
            TaggedValue::List(items) => {
                self.write_head(tag, TarsType::List);
                self.write_i32(0, items.len() as i32);
                for item in items {
                    self.write_value(0, item);
                }
            }
            TaggedValue::Map(entries) => {
                self.write_head(tag, TarsType::Map);
                self.write_i32(0, entries.len() as i32);
                for (k, v) in entries {
                    self.write_value(0, k);
                    self.write_value(1, v);
                }
            }
            TaggedValue::Struct(fields) => {
                self.write_head(tag, TarsType::StructBegin);
                for (&field_tag, v) in fields {
                    self.write_value(field_tag, v);
                }
                self.write_head(0, TarsType::StructEnd);
            }
            TaggedValue::Zero => self.write_head(tag, TarsType::Zero),
            TaggedValue::SimpleList(bytes) => self.write_bytes(tag, bytes),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn written(f: impl FnOnce(&mut TarsWriter)) -> Vec<u8> {
        let mut w = TarsWriter::new();
        f(&mut w);
        w.freeze().to_vec()
    }

    #[test]
    fn test_head_small_and_large_tag() {
        assert_eq!(written(|w| w.write_head(3, TarsType::Int)), vec![0x32]);
        assert_eq!(written(|w| w.write_head(14, TarsType::Long)), vec![0xE3]);
        assert_eq!(written(|w| w.write_head(15, TarsType::Long)), vec![0xF3, 15]);
        assert_eq!(written(|w| w.write_head(200, TarsType::Byte)), vec![0xF0, 200]);
    }

    #[test]
    fn test_integer_narrowing() {
        assert_eq!(written(|w| w.write_i64(0, 0)), vec![0x0C]);
        assert_eq!(written(|w| w.write_i64(0, 1)), vec![0x00, 1]);
        assert_eq!(written(|w| w.write_i64(1, 300)), vec![0x11, 0x01, 0x2C]);
        assert_eq!(
            written(|w| w.write_i64(2, 70_000)),
            vec![0x22, 0x00, 0x01, 0x11, 0x70]
        );
        assert_eq!(written(|w| w.write_i64(0, i64::MAX)).len(), 9);
    }

    #[test]
    fn test_string_size_classes() {
        let short = written(|w| w.write_string(0, &"a".repeat(255)));
        assert_eq!(short[0], 0x06);
        assert_eq!(short[1], 255);
        assert_eq!(short.len(), 2 + 255);

        let long = written(|w| w.write_string(0, &"a".repeat(256)));
        assert_eq!(long[0], 0x07);
        assert_eq!(&long[1..5], &[0, 0, 1, 0]);
        assert_eq!(long.len(), 5 + 256);
    }

    #[test]
    fn test_simple_list_layout() {
        assert_eq!(
            written(|w| w.write_bytes(1, b"ab")),
            vec![0x1D, 0x00, 0x00, 2, b'a', b'b']
        );
        assert_eq!(written(|w| w.write_bytes(1, b"")), vec![0x1D, 0x00, 0x0C]);
    }

    #[test]
    fn test_struct_markers() {
        let value = TaggedValue::Struct(
            [(0u8, TaggedValue::Int(1))].into_iter().collect(),
        );
        assert_eq!(
            written(|w| w.write_value(2, &value)),
            vec![0x2A, 0x00, 1, 0x0B]
        );
    }
}
