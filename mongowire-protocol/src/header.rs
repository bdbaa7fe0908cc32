//! Standard message header.
//!
//! Header layout (16 bytes, little-endian):
//!
//! ```text
//! +----------------+------------+-------------+---------+
//! | message_length | request_id | response_to | op_code |
//! |    4 bytes     |  4 bytes   |   4 bytes   | 4 bytes |
//! +----------------+------------+-------------+---------+
//! ```

use crate::cursor::Cursor;
use crate::error::ProtocolError;
use crate::opcode::OpCode;
use bytes::BufMut;
use serde::Serialize;

/// Size of the message header in bytes.
pub const HEADER_SIZE: usize = 16;

/// Header common to every wire message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct MessageHeader {
    /// Total message size, header included.
    pub message_length: i32,
    /// Identifier for this message.
    pub request_id: u32,
    /// Request id this message answers, zero for requests.
    pub response_to: u32,
    pub op_code: OpCode,
}

impl MessageHeader {
    pub fn new(request_id: u32, op_code: OpCode) -> Self {
        Self {
            message_length: 0,
            request_id,
            response_to: 0,
            op_code,
        }
    }

    /// Reads the header at the cursor.
    ///
    /// Any 16 bytes form a valid header; fewer fail without consuming.
    pub fn read(cursor: &mut Cursor<'_>) -> Result<Self, ProtocolError> {
        let available = cursor.remaining();
        if available < HEADER_SIZE {
            return Err(ProtocolError::Truncated {
                field: "header",
                needed: HEADER_SIZE,
                available,
            });
        }

        let message_length = cursor.read_i32("message_length")?;
        let request_id = cursor.read_u32("request_id")?;
        let response_to = cursor.read_u32("response_to")?;
        let op_code = OpCode::from(cursor.read_u32("op_code")?);

        Ok(Self {
            message_length,
            request_id,
            response_to,
            op_code,
        })
    }

    /// Writes the header in wire order.
    pub fn write<B: BufMut>(&self, buf: &mut B) {
        buf.put_i32_le(self.message_length);
        buf.put_u32_le(self.request_id);
        buf.put_u32_le(self.response_to);
        buf.put_u32_le(self.op_code.code());
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bytes::BytesMut;

    #[test]
    fn test_header_roundtrip() {
        let header = MessageHeader {
            message_length: 58,
            request_id: 7,
            response_to: 3,
            op_code: OpCode::Insert,
        };
        let mut buf = BytesMut::new();
        header.write(&mut buf);
        assert_eq!(buf.len(), HEADER_SIZE);

        let mut cursor = Cursor::new(&buf);
        let decoded = MessageHeader::read(&mut cursor).unwrap();
        assert_eq!(decoded, header);
        assert_eq!(cursor.position(), HEADER_SIZE);
    }

    #[test]
    fn test_any_sixteen_bytes_parse() {
        let buf = [0xffu8; HEADER_SIZE];
        let mut cursor = Cursor::new(&buf);
        let header = MessageHeader::read(&mut cursor).unwrap();
        assert_eq!(header.message_length, -1);
        assert_eq!(header.op_code, OpCode::Unknown(u32::MAX));
    }

    #[test]
    fn test_short_header() {
        let buf = [0u8; 15];
        let mut cursor = Cursor::new(&buf);
        let err = MessageHeader::read(&mut cursor).unwrap_err();
        assert!(matches!(
            err,
            ProtocolError::Truncated {
                field: "header",
                needed: 16,
                available: 15
            }
        ));
        assert_eq!(cursor.position(), 0);
    }
}
