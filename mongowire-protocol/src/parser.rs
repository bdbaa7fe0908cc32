//! Request parser: header, opcode dispatch and per-opcode assembly.
//!
//! Body layouts (after the 16-byte header):
//!
//! ```text
//! OP_UPDATE  i32 ZERO | cstring ns | u32 flags | doc selector | doc update
//! OP_INSERT  u32 flags | cstring ns | doc*
//! OP_QUERY   u32 flags | cstring ns | u32 skip | i32 return | doc query | [doc fields]
//! ```
//!
//! Fixed-width fields before the first document are mandatory: running out
//! of bytes there aborts the parse. Once documents start, a document that
//! does not fit ends the record early and the partial record is returned.

use crate::cursor::Cursor;
use crate::document::{extract_document, BsonDecoder, DocumentDecoder, DocumentField};
use crate::error::ProtocolError;
use crate::header::MessageHeader;
use crate::message::{InsertOperation, Operation, ParseOutcome, QueryOperation, UpdateOperation};
use crate::opcode::OpCode;

/// Parser configuration and document decoder.
#[derive(Debug, Clone)]
pub struct MessageParser<D = BsonDecoder> {
    decoder: D,
    return_fields_selector: bool,
}

impl MessageParser<BsonDecoder> {
    pub fn new() -> Self {
        Self::with_decoder(BsonDecoder)
    }
}

impl Default for MessageParser<BsonDecoder> {
    fn default() -> Self {
        Self::new()
    }
}

impl<D: DocumentDecoder> MessageParser<D> {
    pub fn with_decoder(decoder: D) -> Self {
        Self {
            decoder,
            return_fields_selector: true,
        }
    }

    /// Whether OP_QUERY assembly tries the optional trailing selector.
    pub fn with_return_fields_selector(mut self, enabled: bool) -> Self {
        self.return_fields_selector = enabled;
        self
    }

    /// Parses one captured payload.
    pub fn parse(&self, buf: &[u8]) -> Result<ParseOutcome, ProtocolError> {
        let mut cursor = Cursor::new(buf);
        let header = MessageHeader::read(&mut cursor)?;

        let operation = match header.op_code {
            OpCode::Update => Operation::Update(self.read_update(&mut cursor)?),
            OpCode::Insert => Operation::Insert(self.read_insert(&mut cursor)?),
            OpCode::Query => Operation::Query(self.read_query(&mut cursor)?),
            _ => return Ok(ParseOutcome::Unhandled { header }),
        };

        Ok(ParseOutcome::Operation { header, operation })
    }

    fn read_update(&self, cursor: &mut Cursor<'_>) -> Result<UpdateOperation, ProtocolError> {
        cursor.skip(4, "ZERO")?;
        let full_collection_name = cursor.read_cstring();
        let flags = cursor.read_u32("flags")?;

        let mut op = UpdateOperation {
            full_collection_name,
            flags,
            selector: None,
            update: None,
        };

        match extract_document(cursor, &self.decoder) {
            Ok(selector) => op.selector = Some(selector),
            Err(reason) => {
                tracing::debug!("update selector unavailable: {}", reason);
                return Ok(op);
            }
        }
        match extract_document(cursor, &self.decoder) {
            Ok(update) => op.update = Some(update),
            Err(reason) => tracing::debug!("update document unavailable: {}", reason),
        }

        Ok(op)
    }

    fn read_insert(&self, cursor: &mut Cursor<'_>) -> Result<InsertOperation, ProtocolError> {
        let flags = cursor.read_u32("flags")?;
        let full_collection_name = cursor.read_cstring();

        let mut op = InsertOperation {
            flags,
            full_collection_name,
            documents: Vec::new(),
            malformed: 0,
        };

        // Fewer than 4 bytes cannot hold a length prefix; treat them as padding
        while cursor.remaining() >= 4 {
            match extract_document(cursor, &self.decoder) {
                Ok(DocumentField::Decoded(doc)) => op.documents.push(doc),
                Ok(DocumentField::Malformed { .. }) => op.malformed += 1,
                Err(reason) => {
                    tracing::debug!(
                        "insert stopped after {} document(s): {}",
                        op.documents.len() + op.malformed,
                        reason
                    );
                    break;
                }
            }
        }

        Ok(op)
    }

    fn read_query(&self, cursor: &mut Cursor<'_>) -> Result<QueryOperation, ProtocolError> {
        let flags = cursor.read_u32("flags")?;
        let full_collection_name = cursor.read_cstring();
        let number_to_skip = cursor.read_u32("number_to_skip")?;
        let number_to_return = cursor.read_i32("number_to_return")?;

        let mut op = QueryOperation {
            flags,
            full_collection_name,
            number_to_skip,
            number_to_return,
            query: None,
            return_fields_selector: None,
        };

        match extract_document(cursor, &self.decoder) {
            Ok(query) => op.query = Some(query),
            Err(reason) => {
                tracing::debug!("query document unavailable: {}", reason);
                return Ok(op);
            }
        }

        if self.return_fields_selector && cursor.remaining() >= 4 {
            op.return_fields_selector = extract_document(cursor, &self.decoder).ok();
        }

        Ok(op)
    }
}

/// Parses a payload with the default BSON decoder.
pub fn parse_message(buf: &[u8]) -> Result<ParseOutcome, ProtocolError> {
    MessageParser::new().parse(buf)
}
