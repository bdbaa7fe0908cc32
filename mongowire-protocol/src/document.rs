//! Embedded document extraction.
//!
//! Every document on the wire starts with its own total length as an
//! `i32`. The extractor peeks that length, checks the buffer can hold the
//! whole document, and only then consumes exactly that many bytes and hands
//! them to a [`DocumentDecoder`].

use crate::cursor::Cursor;
use bson::Document;
use serde::Serialize;
use thiserror::Error;

/// Converts an exact-length document slice into a document value.
pub trait DocumentDecoder: Send + Sync {
    fn decode(&self, bytes: &[u8]) -> Result<Document, DecodeError>;
}

/// Rejection reported by a [`DocumentDecoder`].
#[derive(Debug, Clone, Error, PartialEq, Eq)]
#[error("{0}")]
pub struct DecodeError(pub String);

/// Smallest well-formed BSON document: length prefix plus terminator.
const MIN_BSON_LEN: usize = 5;

/// Decoder backed by the `bson` crate.
#[derive(Debug, Clone, Copy, Default)]
pub struct BsonDecoder;

impl DocumentDecoder for BsonDecoder {
    fn decode(&self, bytes: &[u8]) -> Result<Document, DecodeError> {
        if bytes.len() < MIN_BSON_LEN {
            return Err(DecodeError(format!(
                "{} bytes is shorter than the smallest document",
                bytes.len()
            )));
        }
        Document::from_reader(bytes).map_err(|e| DecodeError(e.to_string()))
    }
}

/// A document-valued field whose bytes were fully present.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum DocumentField {
    Decoded(Document),
    /// The slice was complete but the decoder rejected it.
    Malformed { len: usize, reason: String },
}

impl DocumentField {
    pub fn as_document(&self) -> Option<&Document> {
        match self {
            DocumentField::Decoded(doc) => Some(doc),
            DocumentField::Malformed { .. } => None,
        }
    }

    pub fn is_malformed(&self) -> bool {
        matches!(self, DocumentField::Malformed { .. })
    }
}

/// Why no document could be taken at the current position.
///
/// The cursor is left where it was in every case.
#[derive(Debug, Clone, Copy, Error, PartialEq, Eq)]
pub enum Unavailable {
    #[error("no room for a length prefix ({available} bytes left)")]
    NoLength { available: usize },

    #[error("declared length {declared} exceeds the {available} bytes left")]
    Overrun { declared: i32, available: usize },

    #[error("declared length {0} is not positive")]
    InvalidLength(i32),
}

/// Extracts and decodes the document at the cursor.
pub fn extract_document<D>(
    cursor: &mut Cursor<'_>,
    decoder: &D,
) -> Result<DocumentField, Unavailable>
where
    D: DocumentDecoder + ?Sized,
{
    let available = cursor.remaining();
    let declared = cursor
        .peek_i32("document length")
        .map_err(|_| Unavailable::NoLength { available })?;

    // Short but positive lengths go to the decoder; zero would never advance
    if declared <= 0 {
        return Err(Unavailable::InvalidLength(declared));
    }
    if declared as usize > available {
        return Err(Unavailable::Overrun {
            declared,
            available,
        });
    }

    let slice = cursor
        .take(declared as usize, "document")
        .map_err(|_| Unavailable::Overrun {
            declared,
            available,
        })?;

    Ok(match decoder.decode(slice) {
        Ok(doc) => DocumentField::Decoded(doc),
        Err(e) => DocumentField::Malformed {
            len: slice.len(),
            reason: e.0,
        },
    })
}
