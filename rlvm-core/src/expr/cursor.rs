use rlvm_nls::Encoding;

use super::tokenize::MAX_DEPTH;
use crate::error::{Error, Result};

/// Read position inside a parameter's bytes.
///
/// `base` is the offset of `data[0]` in the scenario's instruction stream,
/// so errors point at absolute positions.
#[derive(Debug, Clone)]
pub struct ByteCursor<'a> {
    data: &'a [u8],
    pos: usize,
    base: usize,
    depth: usize,
    encoding: Encoding,
}

impl<'a> ByteCursor<'a> {
    pub fn new(data: &'a [u8], encoding: Encoding) -> Self {
        Self::with_base(data, 0, encoding)
    }

    pub fn with_base(data: &'a [u8], base: usize, encoding: Encoding) -> Self {
        Self {
            data,
            pos: 0,
            base,
            depth: 0,
            encoding,
        }
    }

    #[inline]
    pub fn encoding(&self) -> Encoding {
        self.encoding
    }

    #[inline]
    pub fn position(&self) -> usize {
        self.pos
    }

    #[inline]
    pub fn set_position(&mut self, pos: usize) {
        self.pos = pos;
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.pos >= self.data.len()
    }

    #[inline]
    pub fn rest(&self) -> &'a [u8] {
        self.data.get(self.pos..).unwrap_or(&[])
    }

    #[inline]
    pub fn peek(&self) -> Option<u8> {
        self.data.get(self.pos).copied()
    }

    #[inline]
    pub fn peek_at(&self, n: usize) -> Option<u8> {
        self.data.get(self.pos + n).copied()
    }

    pub fn skip(&mut self, n: usize) -> Result<()> {
        if self.pos + n > self.data.len() {
            return Err(self.error("unexpected end of parameter data"));
        }
        self.pos += n;
        Ok(())
    }

    pub fn next_u8(&mut self) -> Result<u8> {
        let b = self
            .peek()
            .ok_or_else(|| self.error("unexpected end of parameter data"))?;
        self.pos += 1;
        Ok(b)
    }

    pub fn take(&mut self, n: usize) -> Result<&'a [u8]> {
        let bytes = self
            .data
            .get(self.pos..self.pos + n)
            .ok_or_else(|| self.error("unexpected end of parameter data"))?;
        self.pos += n;
        Ok(bytes)
    }

    pub fn read_i32(&mut self) -> Result<i32> {
        let b = self.take(4)?;
        Ok(i32::from_le_bytes([b[0], b[1], b[2], b[3]]))
    }

    pub fn read_i16(&mut self) -> Result<i16> {
        let b = self.take(2)?;
        Ok(i16::from_le_bytes([b[0], b[1]]))
    }

    pub fn expect(&mut self, want: u8) -> Result<()> {
        match self.peek() {
            Some(b) if b == want => {
                self.pos += 1;
                Ok(())
            }
            Some(b) => Err(self.error(format!(
                "expected {:?}, found 0x{:02x}",
                want as char, b
            ))),
            None => Err(self.error(format!("expected {:?}, found end", want as char))),
        }
    }

    /// Enters one level of parentheses, indices or bundles.
    pub fn descend(&mut self) -> Result<()> {
        if self.depth >= MAX_DEPTH {
            return Err(self.error(format!("nested deeper than {} levels", MAX_DEPTH)));
        }
        self.depth += 1;
        Ok(())
    }

    pub fn ascend(&mut self) {
        self.depth = self.depth.saturating_sub(1);
    }

    pub fn error(&self, reason: impl Into<String>) -> Error {
        Error::malformed(self.base + self.pos, reason)
    }
}
