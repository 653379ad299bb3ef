// Wire protocol - full-document gossip
//
// Every frame is the JSON serialization of a whole Document. There are no
// deltas and no envelopes; timestamps travel as plain numbers.

use crate::document::{Document, DocumentError};
use thiserror::Error;

/// Errors that can occur during encoding/decoding
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum CodecError {
    #[error("Failed to encode document: {0}")]
    EncodeError(String),

    #[error("Failed to decode document: {0}")]
    DecodeError(String),

    #[error("Invalid document: {0}")]
    InvalidDocument(#[from] DocumentError),
}

/// Codec for documents on the wire
pub struct DocumentCodec;

impl DocumentCodec {
    /// Encode a document as a single-line JSON frame
    pub fn encode(document: &Document) -> Result<String, CodecError> {
        serde_json::to_string(document).map_err(|e| CodecError::EncodeError(e.to_string()))
    }

    /// Decode and validate a frame
    pub fn decode(payload: &str) -> Result<Document, CodecError> {
        let document: Document =
            serde_json::from_str(payload).map_err(|e| CodecError::DecodeError(e.to_string()))?;
        document.validate()?;
        Ok(document)
    }
}
