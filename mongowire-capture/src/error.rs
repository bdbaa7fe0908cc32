//! Capture error types.

use thiserror::Error;

/// Errors raised while reading a capture stream or decoding a frame.
#[derive(Debug, Error)]
pub enum CaptureError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("invalid pcap magic: {0:#010x}")]
    InvalidMagic(u32),

    #[error("unsupported link type: {0}")]
    UnsupportedLinkType(u32),

    #[error("record too large: {size} bytes (max {max})")]
    RecordTooLarge { size: u32, max: u32 },

    #[error("capture stream ended inside {0}")]
    UnexpectedEof(&'static str),

    #[error("malformed {layer} frame: {reason}")]
    Malformed { layer: &'static str, reason: String },
}

impl CaptureError {
    pub(crate) fn malformed(layer: &'static str, reason: impl Into<String>) -> Self {
        CaptureError::Malformed {
            layer,
            reason: reason.into(),
        }
    }

    /// Whether the error concerns one frame only; the stream stays usable.
    pub fn is_frame_local(&self) -> bool {
        matches!(self, CaptureError::Malformed { .. })
    }
}
