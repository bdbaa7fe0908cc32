//! Bounds-checked read position over an immutable payload.
//!
//! All integers on the wire are little-endian. A read that would run past
//! the end of the buffer fails with [`ProtocolError::Truncated`] and leaves
//! the position untouched.

use crate::error::ProtocolError;

/// Read cursor over one captured payload.
#[derive(Debug, Clone, Copy)]
pub struct Cursor<'a> {
    buf: &'a [u8],
    pos: usize,
}

impl<'a> Cursor<'a> {
    pub fn new(buf: &'a [u8]) -> Self {
        Self { buf, pos: 0 }
    }

    /// Current offset from the start of the buffer.
    pub fn position(&self) -> usize {
        self.pos
    }

    /// Bytes left between the position and the end of the buffer.
    pub fn remaining(&self) -> usize {
        self.buf.len() - self.pos
    }

    pub fn is_at_end(&self) -> bool {
        self.pos >= self.buf.len()
    }

    fn array<const N: usize>(&self, field: &'static str) -> Result<[u8; N], ProtocolError> {
        let available = self.remaining();
        if available < N {
            return Err(ProtocolError::truncated(field, N, available));
        }
        let mut out = [0u8; N];
        out.copy_from_slice(&self.buf[self.pos..self.pos + N]);
        Ok(out)
    }

    pub fn read_u32(&mut self, field: &'static str) -> Result<u32, ProtocolError> {
        let bytes = self.array::<4>(field)?;
        self.pos += 4;
        Ok(u32::from_le_bytes(bytes))
    }

    pub fn read_i32(&mut self, field: &'static str) -> Result<i32, ProtocolError> {
        let bytes = self.array::<4>(field)?;
        self.pos += 4;
        Ok(i32::from_le_bytes(bytes))
    }

    /// Reads an `i32` without moving the position.
    pub fn peek_i32(&self, field: &'static str) -> Result<i32, ProtocolError> {
        self.array::<4>(field).map(i32::from_le_bytes)
    }

    /// Returns the next `n` bytes and advances past them.
    pub fn take(&mut self, n: usize, field: &'static str) -> Result<&'a [u8], ProtocolError> {
        let available = self.remaining();
        if available < n {
            return Err(ProtocolError::truncated(field, n, available));
        }
        let start = self.pos;
        self.pos += n;
        Ok(&self.buf[start..start + n])
    }

    pub fn skip(&mut self, n: usize, field: &'static str) -> Result<(), ProtocolError> {
        self.take(n, field).map(|_| ())
    }

    /// Reads a zero-terminated string.
    ///
    /// A missing terminator is tolerated: the string then covers the rest of
    /// the buffer and the cursor stops at the end. Invalid UTF-8 sequences
    /// are replaced rather than rejected.
    pub fn read_cstring(&mut self) -> String {
        let rest = &self.buf[self.pos..];
        match rest.iter().position(|&b| b == 0) {
            Some(nul) => {
                self.pos += nul + 1;
                String::from_utf8_lossy(&rest[..nul]).into_owned()
            }
            None => {
                self.pos = self.buf.len();
                String::from_utf8_lossy(rest).into_owned()
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_read_integers_little_endian() {
        let buf = [0x01, 0x00, 0x00, 0x00, 0xff, 0xff, 0xff, 0xff];
        let mut cursor = Cursor::new(&buf);
        assert_eq!(cursor.read_u32("a").unwrap(), 1);
        assert_eq!(cursor.read_i32("b").unwrap(), -1);
        assert!(cursor.is_at_end());
    }

    #[test]
    fn test_short_read_keeps_position() {
        let buf = [1, 2, 3, 4, 5, 6];
        let mut cursor = Cursor::new(&buf);
        cursor.read_u32("first").unwrap();

        let err = cursor.read_u32("second").unwrap_err();
        assert!(matches!(
            err,
            ProtocolError::Truncated {
                field: "second",
                needed: 4,
                available: 2
            }
        ));
        assert_eq!(cursor.position(), 4);
    }

    #[test]
    fn test_peek_does_not_advance() {
        let buf = 42i32.to_le_bytes();
        let cursor = Cursor::new(&buf);
        assert_eq!(cursor.peek_i32("len").unwrap(), 42);
        assert_eq!(cursor.position(), 0);
    }

    #[test]
    fn test_take_and_skip() {
        let buf = b"abcdef";
        let mut cursor = Cursor::new(buf);
        cursor.skip(2, "pad").unwrap();
        assert_eq!(cursor.take(3, "body").unwrap(), b"cde");
        assert!(cursor.take(2, "tail").is_err());
        assert_eq!(cursor.remaining(), 1);
    }

    #[test]
    fn test_cstring_terminated() {
        let buf = b"test.coll\0rest";
        let mut cursor = Cursor::new(buf);
        assert_eq!(cursor.read_cstring(), "test.coll");
        assert_eq!(cursor.position(), 10);
    }

    #[test]
    fn test_cstring_empty() {
        let mut cursor = Cursor::new(b"\0x");
        assert_eq!(cursor.read_cstring(), "");
        assert_eq!(cursor.position(), 1);
    }

    #[test]
    fn test_cstring_unterminated_stops_at_end() {
        let buf = b"db.partial";
        let mut cursor = Cursor::new(buf);
        assert_eq!(cursor.read_cstring(), "db.partial");
        assert_eq!(cursor.position(), buf.len());
        assert!(cursor.is_at_end());

        // Nothing left: an empty string, position unchanged
        assert_eq!(cursor.read_cstring(), "");
        assert_eq!(cursor.position(), buf.len());
    }

    #[test]
    fn test_cstring_invalid_utf8_is_lossy() {
        let mut cursor = Cursor::new(&[b'a', 0xff, b'b', 0]);
        assert_eq!(cursor.read_cstring(), "a\u{fffd}b");
    }
}
