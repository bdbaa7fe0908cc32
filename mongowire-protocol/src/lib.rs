//! # mongowire-protocol
//!
//! Passive decoder for the MongoDB legacy wire protocol.
//!
//! This crate provides:
//! - A bounds-checked little-endian cursor
//! - Length-validated extraction of embedded BSON documents
//! - Message header and opcode decoding
//! - Assembly of OP_UPDATE, OP_INSERT and OP_QUERY records
//! - An encoder producing messages in the same layout
//!
//! Parsing never panics and never reads past the end of its input; a
//! truncated payload yields either an error or a partial record.

pub mod cursor;
pub mod document;
pub mod encoder;
pub mod error;
pub mod header;
pub mod message;
pub mod opcode;
pub mod parser;

pub use cursor::Cursor;
pub use document::{BsonDecoder, DecodeError, DocumentDecoder, DocumentField, Unavailable};
pub use encoder::encode_message;
pub use error::ProtocolError;
pub use header::{MessageHeader, HEADER_SIZE};
pub use message::{
    InsertOperation, Namespace, Operation, OperationKind, ParseOutcome, QueryOperation,
    UpdateOperation,
};
pub use opcode::OpCode;
pub use parser::{parse_message, MessageParser};

/// Default port of the monitored database server.
pub const DEFAULT_PORT: u16 = 27017;
