//! Bounds-checked cursor helpers over [`bytes`] for length-prefixed payloads.

use bytes::{Buf, BufMut, BytesMut};

use crate::error::{CodecError, CodecResult};

/// Reads big-endian values off a byte slice, failing instead of panicking on short input.
#[derive(Debug)]
pub struct ByteReader<'a> {
    buf: &'a [u8],
}

impl<'a> ByteReader<'a> {
    pub fn new(buf: &'a [u8]) -> Self {
        Self { buf }
    }

    pub fn remaining(&self) -> usize {
        self.buf.remaining()
    }

    fn ensure(&self, what: &'static str, needed: usize) -> CodecResult<()> {
        if self.buf.remaining() < needed {
            return Err(CodecError::Truncated {
                what,
                needed,
                available: self.buf.remaining(),
            });
        }
        Ok(())
    }

    pub fn read_u32(&mut self, what: &'static str) -> CodecResult<u32> {
        self.ensure(what, 4)?;
        Ok(self.buf.get_u32())
    }

    pub fn read_i32(&mut self, what: &'static str) -> CodecResult<i32> {
        self.ensure(what, 4)?;
        Ok(self.buf.get_i32())
    }

    pub fn read_u64(&mut self, what: &'static str) -> CodecResult<u64> {
        self.ensure(what, 8)?;
        Ok(self.buf.get_u64())
    }

    /// Borrows the next `len` bytes.
    pub fn read_bytes(&mut self, what: &'static str, len: usize) -> CodecResult<&'a [u8]> {
        self.ensure(what, len)?;
        let (head, tail) = self.buf.split_at(len);
        self.buf = tail;
        Ok(head)
    }

    pub fn read_array<const N: usize>(&mut self, what: &'static str) -> CodecResult<[u8; N]> {
        let mut out = [0u8; N];
        out.copy_from_slice(self.read_bytes(what, N)?);
        Ok(out)
    }

    /// Reads a `u32` length prefix followed by that many bytes.
    pub fn read_vec(&mut self, what: &'static str) -> CodecResult<&'a [u8]> {
        let len = self.read_u32(what)? as usize;
        self.read_bytes(what, len)
    }

    /// Asserts the input has been fully consumed.
    pub fn finish(self, what: &'static str) -> CodecResult<()> {
        if !self.buf.is_empty() {
            return Err(CodecError::TrailingBytes {
                what,
                count: self.buf.len(),
            });
        }
        Ok(())
    }
}

/// Big-endian writer with `u32` length-prefixed vectors.
#[derive(Debug, Default)]
pub struct ByteWriter {
    buf: BytesMut,
}

impl ByteWriter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_capacity(cap: usize) -> Self {
        Self {
            buf: BytesMut::with_capacity(cap),
        }
    }

    pub fn put_u32(&mut self, v: u32) {
        self.buf.put_u32(v);
    }

    pub fn put_i32(&mut self, v: i32) {
        self.buf.put_i32(v);
    }

    pub fn put_u64(&mut self, v: u64) {
        self.buf.put_u64(v);
    }

    pub fn put_slice(&mut self, bytes: &[u8]) {
        self.buf.put_slice(bytes);
    }

    /// Writes `bytes` behind a `u32` length prefix.
    pub fn put_vec(&mut self, what: &'static str, bytes: &[u8]) -> CodecResult<()> {
        let len = u32::try_from(bytes.len()).map_err(|_| CodecError::CountOverflow {
            what,
            count: bytes.len(),
        })?;
        self.buf.put_u32(len);
        self.buf.put_slice(bytes);
        Ok(())
    }

    pub fn len(&self) -> usize {
        self.buf.len()
    }

    pub fn is_empty(&self) -> bool {
        self.buf.is_empty()
    }

    pub fn into_vec(self) -> Vec<u8> {
        self.buf.to_vec()
    }
}
