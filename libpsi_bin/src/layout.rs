//! Fixed-width field access at byte offsets.
//!
//! Binary headers are described as tables of [`Field`] entries (name, offset, kind and
//! element count). A [`FieldReader`] or [`FieldWriter`] then moves values in and out of a
//! raw byte buffer using those entries, so the layout of a format is data rather than a
//! sequence of pointer casts. All numeric fields are little endian.
use byteorder::{ByteOrder, LittleEndian};

use super::error::LayoutError;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FieldKind {
    I16,
    U16,
    I32,
    U32,
    F32,
    /// Fixed-width character field of the given byte length
    Text(usize),
}

impl FieldKind {
    /// Width of one element in bytes
    pub const fn width(&self) -> usize {
        match self {
            Self::I16 | Self::U16 => 2,
            Self::I32 | Self::U32 | Self::F32 => 4,
            Self::Text(len) => *len,
        }
    }
}

/// One entry of a layout table
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Field {
    pub name: &'static str,
    pub offset: usize,
    pub kind: FieldKind,
    pub count: usize,
}

impl Field {
    pub const fn scalar(name: &'static str, offset: usize, kind: FieldKind) -> Self {
        Self {
            name,
            offset,
            kind,
            count: 1,
        }
    }

    pub const fn array(name: &'static str, offset: usize, kind: FieldKind, count: usize) -> Self {
        Self {
            name,
            offset,
            kind,
            count,
        }
    }

    pub const fn text(name: &'static str, offset: usize, len: usize) -> Self {
        Self::scalar(name, offset, FieldKind::Text(len))
    }

    /// Total number of bytes covered by the field
    pub const fn span(&self) -> usize {
        self.kind.width() * self.count
    }

    /// First byte past the field
    pub const fn end(&self) -> usize {
        self.offset + self.span()
    }

    fn element_range(&self, index: usize, len: usize) -> Result<std::ops::Range<usize>, LayoutError> {
        let width = self.kind.width();
        let start = self.offset + index * width;
        if index >= self.count || start + width > len {
            return Err(LayoutError::OutOfBounds {
                name: self.name,
                offset: start,
                width,
                len,
            });
        }
        Ok(start..start + width)
    }
}

/// A numeric value that can live in a [`Field`]
pub trait FieldValue: Sized + Copy {
    const KIND: FieldKind;
    fn decode(bytes: &[u8]) -> Self;
    fn encode(self, bytes: &mut [u8]);
}

impl FieldValue for i16 {
    const KIND: FieldKind = FieldKind::I16;
    fn decode(bytes: &[u8]) -> Self {
        LittleEndian::read_i16(bytes)
    }
    fn encode(self, bytes: &mut [u8]) {
        LittleEndian::write_i16(bytes, self)
    }
}

impl FieldValue for u16 {
    const KIND: FieldKind = FieldKind::U16;
    fn decode(bytes: &[u8]) -> Self {
        LittleEndian::read_u16(bytes)
    }
    fn encode(self, bytes: &mut [u8]) {
        LittleEndian::write_u16(bytes, self)
    }
}

impl FieldValue for i32 {
    const KIND: FieldKind = FieldKind::I32;
    fn decode(bytes: &[u8]) -> Self {
        LittleEndian::read_i32(bytes)
    }
    fn encode(self, bytes: &mut [u8]) {
        LittleEndian::write_i32(bytes, self)
    }
}

impl FieldValue for u32 {
    const KIND: FieldKind = FieldKind::U32;
    fn decode(bytes: &[u8]) -> Self {
        LittleEndian::read_u32(bytes)
    }
    fn encode(self, bytes: &mut [u8]) {
        LittleEndian::write_u32(bytes, self)
    }
}

impl FieldValue for f32 {
    const KIND: FieldKind = FieldKind::F32;
    fn decode(bytes: &[u8]) -> Self {
        LittleEndian::read_f32(bytes)
    }
    fn encode(self, bytes: &mut [u8]) {
        LittleEndian::write_f32(bytes, self)
    }
}

/// Read-only view of a buffer addressed through layout fields
#[derive(Debug, Clone, Copy)]
pub struct FieldReader<'a> {
    buffer: &'a [u8],
}

impl<'a> FieldReader<'a> {
    pub fn new(buffer: &'a [u8]) -> Self {
        Self { buffer }
    }

    /// Read the first element of a field
    pub fn get<T: FieldValue>(&self, field: &Field) -> Result<T, LayoutError> {
        self.get_at(field, 0)
    }

    /// Read element `index` of an array field
    pub fn get_at<T: FieldValue>(&self, field: &Field, index: usize) -> Result<T, LayoutError> {
        if field.kind != T::KIND {
            return Err(LayoutError::KindMismatch(field.name));
        }
        let range = field.element_range(index, self.buffer.len())?;
        Ok(T::decode(&self.buffer[range]))
    }

    /// Read every element of an array field
    pub fn get_array<T: FieldValue>(&self, field: &Field) -> Result<Vec<T>, LayoutError> {
        (0..field.count).map(|idx| self.get_at(field, idx)).collect()
    }

    /// Read a character field. The string ends at the first NUL and trailing blanks are
    /// removed.
    pub fn text(&self, field: &Field) -> Result<String, LayoutError> {
        self.text_at(field, 0)
    }

    pub fn text_at(&self, field: &Field, index: usize) -> Result<String, LayoutError> {
        if !matches!(field.kind, FieldKind::Text(_)) {
            return Err(LayoutError::KindMismatch(field.name));
        }
        let range = field.element_range(index, self.buffer.len())?;
        let raw = &self.buffer[range];
        let raw = match raw.iter().position(|b| *b == 0) {
            Some(end) => &raw[..end],
            None => raw,
        };
        Ok(String::from_utf8_lossy(raw).trim_end().to_string())
    }
}

/// Mutable view of a buffer addressed through layout fields
#[derive(Debug)]
pub struct FieldWriter<'a> {
    buffer: &'a mut [u8],
}

impl<'a> FieldWriter<'a> {
    pub fn new(buffer: &'a mut [u8]) -> Self {
        Self { buffer }
    }

    pub fn put<T: FieldValue>(&mut self, field: &Field, value: T) -> Result<(), LayoutError> {
        self.put_at(field, 0, value)
    }

    pub fn put_at<T: FieldValue>(
        &mut self,
        field: &Field,
        index: usize,
        value: T,
    ) -> Result<(), LayoutError> {
        if field.kind != T::KIND {
            return Err(LayoutError::KindMismatch(field.name));
        }
        let range = field.element_range(index, self.buffer.len())?;
        value.encode(&mut self.buffer[range]);
        Ok(())
    }

    /// Write a slice into an array field. Missing trailing elements are left untouched.
    pub fn put_array<T: FieldValue>(&mut self, field: &Field, values: &[T]) -> Result<(), LayoutError> {
        if values.len() > field.count {
            return Err(LayoutError::TooManyElements {
                name: field.name,
                count: values.len(),
                max: field.count,
            });
        }
        for (idx, value) in values.iter().enumerate() {
            self.put_at(field, idx, *value)?;
        }
        Ok(())
    }

    /// Write a character field, truncated to the field width and padded with blanks
    pub fn put_text(&mut self, field: &Field, value: &str) -> Result<(), LayoutError> {
        self.put_text_at(field, 0, value)
    }

    pub fn put_text_at(&mut self, field: &Field, index: usize, value: &str) -> Result<(), LayoutError> {
        if !matches!(field.kind, FieldKind::Text(_)) {
            return Err(LayoutError::KindMismatch(field.name));
        }
        let range = field.element_range(index, self.buffer.len())?;
        let target = &mut self.buffer[range];
        target.fill(b' ');
        let bytes = value.as_bytes();
        let n = bytes.len().min(target.len());
        target[..n].copy_from_slice(&bytes[..n]);
        Ok(())
    }
}
