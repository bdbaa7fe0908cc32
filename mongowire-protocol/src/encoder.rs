//! Message encoder.
//!
//! Produces request messages in the same layout the parser reads. The
//! analyzer never writes to the wire; this exists for replaying captured
//! records, tests and benchmarks.

use crate::document::DocumentField;
use crate::error::ProtocolError;
use crate::header::{MessageHeader, HEADER_SIZE};
use crate::message::Operation;
use crate::opcode::OpCode;
use bson::Document;
use bytes::{BufMut, BytesMut};

/// Encodes an operation as a complete message with a correct length.
pub fn encode_message(request_id: u32, operation: &Operation) -> Result<BytesMut, ProtocolError> {
    let op_code = match operation {
        Operation::Update(_) => OpCode::Update,
        Operation::Insert(_) => OpCode::Insert,
        Operation::Query(_) => OpCode::Query,
    };

    let mut body = BytesMut::new();
    match operation {
        Operation::Update(op) => {
            body.put_i32_le(0);
            put_cstring(&mut body, &op.full_collection_name);
            body.put_u32_le(op.flags);
            put_field(&mut body, op.selector.as_ref())?;
            if op.selector.is_some() {
                put_field(&mut body, op.update.as_ref())?;
            }
        }
        Operation::Insert(op) => {
            body.put_u32_le(op.flags);
            put_cstring(&mut body, &op.full_collection_name);
            for doc in &op.documents {
                put_document(&mut body, doc)?;
            }
        }
        Operation::Query(op) => {
            body.put_u32_le(op.flags);
            put_cstring(&mut body, &op.full_collection_name);
            body.put_u32_le(op.number_to_skip);
            body.put_i32_le(op.number_to_return);
            put_field(&mut body, op.query.as_ref())?;
            if op.query.is_some() {
                put_field(&mut body, op.return_fields_selector.as_ref())?;
            }
        }
    }

    let header = MessageHeader {
        message_length: (HEADER_SIZE + body.len()) as i32,
        request_id,
        response_to: 0,
        op_code,
    };
    let mut buf = BytesMut::with_capacity(HEADER_SIZE + body.len());
    header.write(&mut buf);
    buf.put_slice(&body);
    Ok(buf)
}

fn put_cstring(buf: &mut BytesMut, s: &str) {
    buf.put_slice(s.as_bytes());
    buf.put_u8(0);
}

fn put_document(buf: &mut BytesMut, doc: &Document) -> Result<(), ProtocolError> {
    let mut bytes = Vec::new();
    doc.to_writer(&mut bytes)?;
    buf.put_slice(&bytes);
    Ok(())
}

/// Absent and malformed fields have no bytes to reproduce and are skipped.
fn put_field(buf: &mut BytesMut, field: Option<&DocumentField>) -> Result<(), ProtocolError> {
    match field {
        Some(DocumentField::Decoded(doc)) => put_document(buf, doc),
        _ => Ok(()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::message::{InsertOperation, QueryOperation, UpdateOperation};
    use crate::parser::parse_message;
    use bson::doc;

    #[test]
    fn test_update_roundtrip() {
        let op = Operation::Update(UpdateOperation {
            full_collection_name: "inventory.items".into(),
            flags: 3,
            selector: Some(DocumentField::Decoded(doc! { "sku": "abc" })),
            update: Some(DocumentField::Decoded(doc! { "$inc": { "qty": -1 } })),
        });
        let encoded = encode_message(11, &op).unwrap();

        let outcome = parse_message(&encoded).unwrap();
        assert_eq!(outcome.header().request_id, 11);
        assert_eq!(outcome.header().message_length as usize, encoded.len());
        assert_eq!(outcome.into_operation().unwrap(), op);
    }

    #[test]
    fn test_insert_roundtrip() {
        let op = Operation::Insert(InsertOperation {
            flags: 0,
            full_collection_name: "mydb.orders".into(),
            documents: vec![doc! { "n": 1 }, doc! { "n": 2, "tags": ["a", "b"] }],
            malformed: 0,
        });
        let encoded = encode_message(1, &op).unwrap();
        assert_eq!(parse_message(&encoded).unwrap().into_operation().unwrap(), op);
    }

    #[test]
    fn test_query_roundtrip() {
        let op = Operation::Query(QueryOperation {
            flags: 0,
            full_collection_name: "test.coll".into(),
            number_to_skip: 20,
            number_to_return: -5,
            query: Some(DocumentField::Decoded(doc! { "status": "open" })),
            return_fields_selector: Some(DocumentField::Decoded(doc! { "_id": 0 })),
        });
        let encoded = encode_message(2, &op).unwrap();
        assert_eq!(parse_message(&encoded).unwrap().into_operation().unwrap(), op);
    }

    #[test]
    fn test_header_fields() {
        let op = Operation::Insert(InsertOperation {
            flags: 1,
            full_collection_name: "a.b".into(),
            documents: vec![],
            malformed: 0,
        });
        let encoded = encode_message(9, &op).unwrap();
        // header + flags + "a.b\0"
        assert_eq!(encoded.len(), 16 + 4 + 4);
        assert_eq!(&encoded[12..16], &2002u32.to_le_bytes());
    }
}
