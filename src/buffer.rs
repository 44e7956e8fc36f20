//! Growable little-endian byte store with a cursor.
//!
//! Writes and reads share one cursor. `written` is the high-water mark, so a
//! buffer can be filled, rewound with [`Buffer::seek`], patched in place and
//! read back without losing its length.

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum BufferError {
    #[error("unexpected end of data: need {needed} byte(s) at offset {offset}, have {available}")]
    UnexpectedEof {
        offset: usize,
        needed: usize,
        available: usize,
    },
}

#[derive(Debug, Clone, Default)]
pub struct Buffer {
    data: Vec<u8>,
    cursor: usize,
    written: usize,
}

macro_rules! put_get_le {
    ($($put:ident, $get:ident => $ty:ty;)*) => {
        $(
            pub fn $put(&mut self, v: $ty) {
                self.put_bytes(&v.to_le_bytes());
            }

            pub fn $get(&mut self) -> Result<$ty, BufferError> {
                let bytes = self.take(std::mem::size_of::<$ty>())?;
                let mut raw = [0u8; std::mem::size_of::<$ty>()];
                raw.copy_from_slice(bytes);
                Ok(<$ty>::from_le_bytes(raw))
            }
        )*
    };
}

impl Buffer {
    pub fn new() -> Self {
        Buffer::default()
    }

    /// Wrap existing bytes for reading; the cursor starts at 0.
    pub fn from_bytes(data: Vec<u8>) -> Self {
        let written = data.len();
        Buffer { data, cursor: 0, written }
    }

    pub fn position(&self) -> usize {
        self.cursor
    }

    /// High-water mark of everything written so far.
    pub fn written(&self) -> usize {
        self.written
    }

    pub fn remaining(&self) -> usize {
        self.written.saturating_sub(self.cursor)
    }

    pub fn seek(&mut self, offset: usize) {
        self.cursor = offset;
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.data[..self.written]
    }

    pub fn into_bytes(mut self) -> Vec<u8> {
        self.data.truncate(self.written);
        self.data
    }

    put_get_le! {
        put_u16, get_u16 => u16;
        put_u32, get_u32 => u32;
        put_i32, get_i32 => i32;
        put_f32, get_f32 => f32;
        put_f64, get_f64 => f64;
    }

    pub fn put_u8(&mut self, v: u8) {
        self.put_bytes(&[v]);
    }

    pub fn get_u8(&mut self) -> Result<u8, BufferError> {
        Ok(self.take(1)?[0])
    }

    /// Write at the cursor, overwriting or growing as needed.
    pub fn put_bytes(&mut self, bytes: &[u8]) {
        let end = self.cursor + bytes.len();
        if end > self.data.len() {
            self.data.resize(end, 0);
        }
        self.data[self.cursor..end].copy_from_slice(bytes);
        self.cursor = end;
        self.written = self.written.max(end);
    }

    pub fn get_bytes(&mut self, len: usize) -> Result<Vec<u8>, BufferError> {
        self.take(len).map(<[u8]>::to_vec)
    }

    /// Zero-pad the cursor up to a multiple of `alignment`.
    pub fn align(&mut self, alignment: usize) {
        let padding = padding_for(self.cursor, alignment);
        self.put_bytes(&vec![0; padding]);
    }

    fn take(&mut self, len: usize) -> Result<&[u8], BufferError> {
        if self.remaining() < len {
            return Err(BufferError::UnexpectedEof {
                offset: self.cursor,
                needed: len,
                available: self.remaining(),
            });
        }
        let start = self.cursor;
        self.cursor += len;
        Ok(&self.data[start..self.cursor])
    }
}

/// Bytes needed to bring `offset` up to a multiple of `alignment`.
pub fn padding_for(offset: usize, alignment: usize) -> usize {
    (alignment - offset % alignment) % alignment
}
