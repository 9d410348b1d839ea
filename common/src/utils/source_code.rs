use base64::{engine::general_purpose::STANDARD, Engine as _};
use thiserror::Error;

use crate::error::AppError;

/// Largest decoded submission the workers accept.
pub const MAX_SOURCE_BYTES: usize = 1024 * 1024;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum SourceCodeError {
    #[error("'code' field is not in a valid format")]
    InvalidFormat,
    #[error("Source code size exceeds {limit} bytes")]
    TooLarge { limit: usize },
    #[error("Empty source file")]
    Empty,
}

impl From<SourceCodeError> for AppError {
    fn from(err: SourceCodeError) -> Self {
        AppError::Validation(err.to_string())
    }
}

/// Decodes a base64 submission into source text.
///
/// The payload must be strict standard base64, decode to at most `max_bytes`
/// bytes of UTF-8, and contain something other than whitespace.
pub fn decode_source_code(encoded: &str, max_bytes: usize) -> Result<String, SourceCodeError> {
    let decoded = STANDARD
        .decode(encoded)
        .map_err(|_| SourceCodeError::InvalidFormat)?;

    if decoded.len() > max_bytes {
        return Err(SourceCodeError::TooLarge { limit: max_bytes });
    }

    let source = String::from_utf8(decoded).map_err(|_| SourceCodeError::InvalidFormat)?;

    if source.trim().is_empty() {
        return Err(SourceCodeError::Empty);
    }

    Ok(source)
}
