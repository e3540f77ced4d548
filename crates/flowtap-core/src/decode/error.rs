use thiserror::Error;

/// Errors returned while decoding a single frame.
///
/// These never stop the pipeline; the frame is skipped and counted.
#[derive(Debug, Error)]
pub enum DecodeError {
    #[error("packet slice error: {0}")]
    Slice(String),
    #[error("frame too short: need {needed} bytes, got {actual}")]
    TooShort { needed: usize, actual: usize },
}
