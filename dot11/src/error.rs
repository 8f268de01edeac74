//! Error types for dot11

use thiserror::Error;

/// Errors from parsing captured frames
#[derive(Error, Debug)]
pub enum Dot11Error {
    #[error("Radiotap error: {message}")]
    Radiotap { message: String },

    #[error("Frame error: {message}")]
    Frame { message: String },

    #[error("Unsupported link type: {0}")]
    UnsupportedLinkType(i32),
}

impl Dot11Error {
    pub(crate) fn radiotap(message: impl Into<String>) -> Self {
        Self::Radiotap { message: message.into() }
    }

    pub(crate) fn frame(message: impl Into<String>) -> Self {
        Self::Frame { message: message.into() }
    }
}

/// Result type alias for dot11 operations
pub type Result<T> = std::result::Result<T, Dot11Error>;
