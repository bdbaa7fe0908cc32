//! Protocol error types.

use thiserror::Error;

/// Errors that abort the parse of a single buffer.
///
/// Document-level problems never surface here: a truncated or malformed
/// document degrades only the affected field of the operation record.
#[derive(Debug, Error)]
pub enum ProtocolError {
    #[error("truncated {field}: need {needed} bytes, {available} available")]
    Truncated {
        field: &'static str,
        needed: usize,
        available: usize,
    },

    #[error("document encoding failed: {0}")]
    Encode(#[from] bson::ser::Error),
}

impl ProtocolError {
    pub(crate) fn truncated(field: &'static str, needed: usize, available: usize) -> Self {
        ProtocolError::Truncated {
            field,
            needed,
            available,
        }
    }

    /// Returns whether the buffer ended before a mandatory field.
    pub fn is_truncated(&self) -> bool {
        matches!(self, ProtocolError::Truncated { .. })
    }

    /// Short stable label, used as a metrics dimension.
    pub fn kind(&self) -> &'static str {
        match self {
            ProtocolError::Truncated { .. } => "truncated",
            ProtocolError::Encode(_) => "encode",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_truncated_display() {
        let err = ProtocolError::truncated("header", 16, 9);
        let msg = err.to_string();
        assert!(msg.contains("header"));
        assert!(msg.contains("16"));
        assert!(msg.contains('9'));
        assert!(err.is_truncated());
        assert_eq!(err.kind(), "truncated");
    }
}
