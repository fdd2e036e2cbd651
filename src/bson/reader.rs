//! A cursor over a raw BSON byte buffer, used by the document decoder.

use super::value::DecodeError;

pub(super) struct Reader<'a> {
    buf: &'a [u8],
    pos: usize,
}

impl<'a> Reader<'a> {
    pub(super) fn new(buf: &'a [u8]) -> Self {
        Self { buf, pos: 0 }
    }

    pub(super) fn position(&self) -> usize {
        self.pos
    }

    pub(super) fn remaining(&self) -> usize {
        self.buf.len() - self.pos
    }

    fn take(&mut self, n: usize) -> Result<&'a [u8], DecodeError> {
        if self.remaining() < n {
            return Err(DecodeError::UnexpectedEof);
        }
        let slice = &self.buf[self.pos..self.pos + n];
        self.pos += n;
        Ok(slice)
    }

    pub(super) fn read_u8(&mut self) -> Result<u8, DecodeError> {
        Ok(self.take(1)?[0])
    }

    pub(super) fn read_i32(&mut self) -> Result<i32, DecodeError> {
        let bytes: [u8; 4] = self.take(4)?.try_into().unwrap();
        Ok(i32::from_le_bytes(bytes))
    }

    pub(super) fn read_i64(&mut self) -> Result<i64, DecodeError> {
        let bytes: [u8; 8] = self.take(8)?.try_into().unwrap();
        Ok(i64::from_le_bytes(bytes))
    }

    pub(super) fn read_u64(&mut self) -> Result<u64, DecodeError> {
        let bytes: [u8; 8] = self.take(8)?.try_into().unwrap();
        Ok(u64::from_le_bytes(bytes))
    }

    pub(super) fn read_f64(&mut self) -> Result<f64, DecodeError> {
        let bytes: [u8; 8] = self.take(8)?.try_into().unwrap();
        Ok(f64::from_le_bytes(bytes))
    }

    pub(super) fn read_bytes(&mut self, n: usize) -> Result<&'a [u8], DecodeError> {
        self.take(n)
    }

    /// Reads a NUL-terminated C string (used for element keys and regex fields).
    pub(super) fn read_cstring(&mut self) -> Result<String, DecodeError> {
        let start = self.pos;
        loop {
            let b = self.read_u8()?;
            if b == 0 {
                break;
            }
        }
        let bytes = &self.buf[start..self.pos - 1];
        String::from_utf8(bytes.to_vec()).map_err(|_| DecodeError::InvalidUtf8)
    }

    /// Reads a length-prefixed UTF-8 string (the BSON "string" element payload), including its
    /// trailing NUL.
    pub(super) fn read_string(&mut self) -> Result<String, DecodeError> {
        let len = self.read_i32()?;
        if len < 1 {
            return Err(DecodeError::InvalidLength);
        }
        let bytes = self.read_bytes(len as usize)?;
        let (content, nul) = bytes.split_at(bytes.len() - 1);
        if nul != [0] {
            return Err(DecodeError::MissingNulTerminator);
        }
        String::from_utf8(content.to_vec()).map_err(|_| DecodeError::InvalidUtf8)
    }
}
