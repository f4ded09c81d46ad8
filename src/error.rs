//! Error types for the optimization pipeline

use std::fmt;

use thiserror::Error;

/// Pipeline stage a [`Error::PassFailure`] originated from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Pass {
    Weld,
    Simplify,
    Resample,
    Texture,
    Compression,
    Cleanup,
}

impl fmt::Display for Pass {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Pass::Weld => "weld",
            Pass::Simplify => "simplify",
            Pass::Resample => "resample",
            Pass::Texture => "texture",
            Pass::Compression => "compression",
            Pass::Cleanup => "cleanup",
        };
        f.write_str(name)
    }
}

/// Main error type for gltf_shrink operations
#[derive(Error, Debug)]
pub enum Error {
    #[error("invalid container: {0}")]
    InvalidFormat(String),

    #[error("failed to decode scene: {0}")]
    Decode(String),

    #[error("{pass} pass failed: {reason}")]
    PassFailure { pass: Pass, reason: String },

    #[error("failed to encode scene: {0}")]
    Encode(String),

    #[error("invalid settings: {0}")]
    InvalidSettings(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl Error {
    pub(crate) fn pass(pass: Pass, reason: impl Into<String>) -> Self {
        Error::PassFailure {
            pass,
            reason: reason.into(),
        }
    }
}

/// Result type alias for gltf_shrink operations
pub type Result<T> = std::result::Result<T, Error>;
