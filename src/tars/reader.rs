//! Tars decoder.
//!
//! The reader borrows its input and never panics on malformed data: every
//! length is bounds-checked and every failure is a [`TarsError`].

use bytes::Bytes;

use super::{FieldSpec, TarsFields, TarsType, TaggedValue};
use crate::error::TarsError;

type Result<T> = std::result::Result<T, TarsError>;

/// Deepest struct/list/map nesting accepted before giving up.
pub const MAX_DEPTH: usize = 64;

/// Cursor over an encoded buffer.
#[derive(Debug, Clone)]
pub struct TarsReader<'a> {
    data: &'a [u8],
    pos: usize,
}

impl<'a> TarsReader<'a> {
    pub fn new(data: &'a [u8]) -> Self {
        Self { data, pos: 0 }
    }

    #[inline]
    pub fn position(&self) -> usize {
        self.pos
    }

    #[inline]
    pub fn remaining(&self) -> usize {
        self.data.len() - self.pos
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.remaining() == 0
    }

    fn take(&mut self, n: usize) -> Result<&'a [u8]> {
        if n > self.remaining() {
            return Err(TarsError::UnexpectedEof);
        }
        let slice = &self.data[self.pos..self.pos + n];
        self.pos += n;
        Ok(slice)
    }

    fn take_array<const N: usize>(&mut self) -> Result<[u8; N]> {
        let mut out = [0u8; N];
        out.copy_from_slice(self.take(N)?);
        Ok(out)
    }

    /// Read the next head without consuming it.
    pub fn peek_head(&self) -> Result<(u8, TarsType)> {
        self.clone().read_head()
    }

    /// Read a head: `(tag, type)`.
    pub fn read_head(&mut self) -> Result<(u8, TarsType)> {
        let [b] = self.take_array::<1>()?;
        let ty = TarsType::from_u8(b & 0x0F)?;
        let mut tag = b >> 4;
        if tag == 15 {
            let [t] = self.take_array::<1>()?;
            tag = t;
        }
        Ok((tag, ty))
    }

    /// Read an integer payload of type `ty`.
    pub fn read_int_of(&mut self, tag: u8, ty: TarsType) -> Result<i64> {
        Ok(match ty {
            TarsType::Zero => 0,
            TarsType::Byte => i8::from_be_bytes(self.take_array()?) as i64,
            TarsType::Short => i16::from_be_bytes(self.take_array()?) as i64,
            TarsType::Int => i32::from_be_bytes(self.take_array()?) as i64,
            TarsType::Long => i64::from_be_bytes(self.take_array()?),
            other => {
                return Err(TarsError::TypeMismatch {
                    tag,
                    expected: "integer",
                    found: other.name(),
                })
            }
        })
    }

    /// Read a full integer field (head included).
    pub fn read_int(&mut self) -> Result<i64> {
        let (tag, ty) = self.read_head()?;
        self.read_int_of(tag, ty)
    }

    fn read_length(&mut self) -> Result<usize> {
        let len = self.read_int()?;
        if len < 0 || len as u64 > self.remaining() as u64 {
            return Err(TarsError::InvalidLength(len));
        }
        Ok(len as usize)
    }

    /// Read the payload of a value whose head has already been consumed.
    pub fn read_value(&mut self, tag: u8, ty: TarsType) -> Result<TaggedValue> {
        self.read_value_at(tag, ty, 0)
    }

    fn read_value_at(&mut self, tag: u8, ty: TarsType, depth: usize) -> Result<TaggedValue> {
        if depth > MAX_DEPTH {
            return Err(TarsError::NestingTooDeep(MAX_DEPTH));
        }
        Ok(match ty {
            TarsType::Zero => TaggedValue::Zero,
            TarsType::Byte => TaggedValue::Byte(i8::from_be_bytes(self.take_array()?)),
            TarsType::Short => TaggedValue::Short(i16::from_be_bytes(self.take_array()?)),
            TarsType::Int => TaggedValue::Int(i32::from_be_bytes(self.take_array()?)),
            TarsType::Long => TaggedValue::Long(i64::from_be_bytes(self.take_array()?)),
            TarsType::Float => TaggedValue::Float(f32::from_be_bytes(self.take_array()?)),
            TarsType::Double => TaggedValue::Double(f64::from_be_bytes(self.take_array()?)),
            TarsType::String1 => {
                let [len] = self.take_array::<1>()?;
                self.read_string(len as usize)?
            }
            TarsType::String4 => {
                let len = u32::from_be_bytes(self.take_array()?);
                self.read_string(len as usize)?
            }
            TarsType::List => {
                let count = self.read_length()?;
                let mut items = Vec::with_capacity(count);
                for _ in 0..count {
                    let (item_tag, item_ty) = self.read_head()?;
                    items.push(self.read_value_at(item_tag, item_ty, depth + 1)?);
                }
                TaggedValue::List(items)
            }
            TarsType::Map => {
                let count = self.read_length()?;
                let mut entries = Vec::with_capacity(count);
                for _ in 0..count {
                    let (kt, kty) = self.read_head()?;
                    let key = self.read_value_at(kt, kty, depth + 1)?;
                    let (vt, vty) = self.read_head()?;
                    let value = self.read_value_at(vt, vty, depth + 1)?;
                    entries.push((key, value));
                }
                TaggedValue::Map(entries)
            }
            TarsType::StructBegin => TaggedValue::Struct(self.read_fields_until_end(depth + 1)?),
            TarsType::SimpleList => {
                let (inner_tag, inner_ty) = self.read_head()?;
                if inner_ty != TarsType::Byte {
                    return Err(TarsError::TypeMismatch {
                        tag: inner_tag,
                        expected: "byte",
                        found: inner_ty.name(),
                    });
                }
                let len = self.read_length()?;
                TaggedValue::SimpleList(Bytes::copy_from_slice(self.take(len)?))
            }
            TarsType::StructEnd => {
                return Err(TarsError::TypeMismatch {
                    tag,
                    expected: "value",
                    found: "struct-end",
                })
            }
        })
    }

    fn read_string(&mut self, len: usize) -> Result<TaggedValue> {
        let raw = self.take(len)?;
        let s = std::str::from_utf8(raw).map_err(|_| TarsError::Utf8)?;
        Ok(TaggedValue::String(s.to_string()))
    }

    /// Skip the payload of a value of type `ty` without decoding it.
    pub fn skip_field(&mut self, ty: TarsType) -> Result<()> {
        self.skip_at(ty, 0)
    }

    fn skip_at(&mut self, ty: TarsType, depth: usize) -> Result<()> {
        if depth > MAX_DEPTH {
            return Err(TarsError::NestingTooDeep(MAX_DEPTH));
        }
        match ty {
            TarsType::Zero | TarsType::StructEnd => {}
            TarsType::Byte => {
                self.take(1)?;
            }
            TarsType::Short => {
                self.take(2)?;
            }
            TarsType::Int | TarsType::Float => {
                self.take(4)?;
            }
            TarsType::Long | TarsType::Double => {
                self.take(8)?;
            }
            TarsType::String1 => {
                let [len] = self.take_array::<1>()?;
                self.take(len as usize)?;
            }
            TarsType::String4 => {
                let len = u32::from_be_bytes(self.take_array()?);
                self.take(len as usize)?;
            }
            TarsType::List => {
                let count = self.read_length()?;
                for _ in 0..count {
                    let (_, item_ty) = self.read_head()?;
                    self.skip_at(item_ty, depth + 1)?;
                }
            }
            TarsType::Map => {
                let count = self.read_length()?;
                for _ in 0..count * 2 {
                    let (_, item_ty) = self.read_head()?;
                    self.skip_at(item_ty, depth + 1)?;
                }
            }
            TarsType::StructBegin => self.skip_to_struct_end(depth + 1)?,
            TarsType::SimpleList => {
                self.read_head()?;
                let len = self.read_length()?;
                self.take(len)?;
            }
        }
        Ok(())
    }

    fn skip_to_struct_end(&mut self, depth: usize) -> Result<()> {
        loop {
            let (_, ty) = self.read_head()?;
            if ty == TarsType::StructEnd {
                return Ok(());
            }
            self.skip_at(ty, depth)?;
        }
    }

    /// Read the fields of a nested struct up to and including its end
    /// marker.
    fn read_fields_until_end(&mut self, depth: usize) -> Result<TarsFields> {
        let mut fields = TarsFields::new();
        loop {
            let (tag, ty) = self.read_head()?;
            if ty == TarsType::StructEnd {
                return Ok(fields);
            }
            let value = self.read_value_at(tag, ty, depth)?;
            fields.insert(tag, value);
        }
    }

    /// Read top-level fields until the input is exhausted.
    ///
    /// A stray struct-end marker also terminates, so the body of a nested
    /// struct can be handed to this method directly.
    pub fn read_fields_to_end(&mut self) -> Result<TarsFields> {
        let mut fields = TarsFields::new();
        while !self.is_empty() {
            let (tag, ty) = self.read_head()?;
            if ty == TarsType::StructEnd {
                break;
            }
            let value = self.read_value_at(tag, ty, 1)?;
            fields.insert(tag, value);
        }
        Ok(fields)
    }

    /// Read top-level fields, keeping only tags named in `schema`.
    ///
    /// Unknown tags are skipped by declared type. Missing tags are filled
    /// with the field's default, or fail with [`TarsError::MissingField`]
    /// when the field is required.
    pub fn read_schema_to_end(&mut self, schema: &[FieldSpec]) -> Result<TarsFields> {
        let mut fields = TarsFields::new();
        while !self.is_empty() {
            let (tag, ty) = self.read_head()?;
            if ty == TarsType::StructEnd {
                break;
            }
            match schema.iter().find(|f| f.tag == tag) {
                Some(spec) => {
                    let value = self.read_value_at(tag, ty, 1)?;
                    spec.check(&value)?;
                    fields.insert(tag, value);
                }
                None => self.skip_at(ty, 1)?,
            }
        }
        super::schema::apply_defaults(schema, &mut fields)?;
        Ok(fields)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tars::TarsWriter;

    #[test]
    fn test_read_two_byte_head() {
        let mut r = TarsReader::new(&[0xF2, 0x20, 0, 0, 0, 9]);
        assert_eq!(r.read_head().unwrap(), (0x20, TarsType::Int));
        assert_eq!(r.read_int_of(0x20, TarsType::Int).unwrap(), 9);
        assert!(r.is_empty());
    }

    #[test]
    fn test_peek_does_not_consume() {
        let r = TarsReader::new(&[0x1C]);
        assert_eq!(r.peek_head().unwrap(), (1, TarsType::Zero));
        assert_eq!(r.position(), 0);
    }

    #[test]
    fn test_truncated_input() {
        let mut r = TarsReader::new(&[0x02, 0x00]);
        let (tag, ty) = r.read_head().unwrap();
        assert_eq!(r.read_value(tag, ty), Err(TarsError::UnexpectedEof));
    }

    #[test]
    fn test_negative_list_length() {
        // list head, length byte -1
        let mut r = TarsReader::new(&[0x09, 0x00, 0xFF]);
        let (tag, ty) = r.read_head().unwrap();
        assert_eq!(r.read_value(tag, ty), Err(TarsError::InvalidLength(-1)));
    }

    #[test]
    fn test_oversized_length_rejected_before_alloc() {
        let mut r = TarsReader::new(&[0x09, 0x02, 0x7F, 0xFF, 0xFF, 0xFF]);
        let (tag, ty) = r.read_head().unwrap();
        assert!(matches!(
            r.read_value(tag, ty),
            Err(TarsError::InvalidLength(_))
        ));
    }

    #[test]
    fn test_unknown_type_code() {
        let mut r = TarsReader::new(&[0x0E]);
        assert_eq!(r.read_head(), Err(TarsError::UnknownType(14)));
    }

    #[test]
    fn test_skip_every_type() {
        let mut w = TarsWriter::new();
        w.write_i8(0, 1);
        w.write_i16(1, 1000);
        w.write_i32(2, 100_000);
        w.write_i64(3, 1 << 40);
        w.write_f32(4, 1.0);
        w.write_f64(5, 1.0);
        w.write_string(6, "short");
        w.write_string(7, &"long".repeat(100));
        w.write_value(
            8,
            &TaggedValue::Map(vec![(TaggedValue::Int(1), TaggedValue::from("v"))]),
        );
        w.write_value(9, &TaggedValue::List(vec![TaggedValue::Zero, TaggedValue::Int(9)]));
        w.write_value(
            10,
            &TaggedValue::Struct([(3u8, TaggedValue::from("nested"))].into_iter().collect()),
        );
        w.write_i32(11, 0);
        w.write_bytes(12, b"raw bytes");
        w.write_string(13, "end");
        let bytes = w.freeze();

        let mut r = TarsReader::new(&bytes);
        for _ in 0..13 {
            let (_, ty) = r.read_head().unwrap();
            r.skip_field(ty).unwrap();
        }
        let (tag, ty) = r.read_head().unwrap();
        assert_eq!(tag, 13);
        assert_eq!(r.read_value(tag, ty).unwrap(), TaggedValue::from("end"));
        assert!(r.is_empty());
    }

    #[test]
    fn test_nesting_limit() {
        let mut data = vec![0x0A; MAX_DEPTH + 2];
        data.extend(std::iter::repeat(0x0B).take(MAX_DEPTH + 2));
        let mut r = TarsReader::new(&data);
        assert_eq!(
            r.read_fields_to_end(),
            Err(TarsError::NestingTooDeep(MAX_DEPTH))
        );
    }
}
