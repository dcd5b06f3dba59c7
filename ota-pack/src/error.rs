//! Error types for OTA packaging

use std::path::PathBuf;
use thiserror::Error;

/// Result type alias for packaging operations
pub type Result<T> = std::result::Result<T, PackError>;

/// Failures raised while decoding or checking a packed header
#[derive(Error, Debug, PartialEq, Eq)]
pub enum HeaderError {
    #[error("Invalid magic: expected {expected:02x?}, found {found:02x?}")]
    BadMagic { expected: [u8; 4], found: [u8; 4] },

    #[error("Unsupported header version: {0}")]
    UnsupportedVersion(u8),

    #[error("Header truncated: {len} bytes (expected at least {needed})")]
    Truncated { len: usize, needed: usize },

    #[error("Header CRC32 mismatch: stored 0x{stored:08x}, calculated 0x{calculated:08x}")]
    CrcMismatch { stored: u32, calculated: u32 },

    #[error("Payload MD5 mismatch: stored {stored}, calculated {calculated}")]
    Md5Mismatch { stored: String, calculated: String },

    #[error("Payload length mismatch: header says {expected} bytes, found {actual}")]
    LengthMismatch { expected: u32, actual: usize },

    #[error("Unknown {field} code: {code}")]
    UnknownCode { field: &'static str, code: u8 },

    #[error("Firmware version is {len} bytes (max {max})")]
    VersionTooLong { len: usize, max: usize },

    #[error("{0}")]
    Invalid(String),
}

/// Main error type for the packaging pipeline
///
/// Every variant is terminal. Nothing retries; the pipeline stops at the first
/// failing stage and the binary exits with code 2.
#[derive(Error, Debug)]
pub enum PackError {
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("Base file {path} unreadable: {reason}")]
    BaseFileUnreadable { path: PathBuf, reason: String },

    #[error("Delta generation failed: {0:#}")]
    DeltaGenerationFailed(anyhow::Error),

    #[error("Compression failed: {0:#}")]
    CompressionFailed(anyhow::Error),

    #[error("Header encoding failed: {0}")]
    HeaderEncodingFailed(#[source] HeaderError),

    #[error("I/O failure on {path}: {source}")]
    IoFailure {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Signing failed: {0:#}")]
    SigningFailed(anyhow::Error),

    #[error("Invalid key material: {0}")]
    InvalidKeyMaterial(String),

    #[error("Encryption failed: {0}")]
    EncryptionFailed(String),
}

impl PackError {
    /// Create an invalid configuration error
    pub fn invalid_config(msg: impl Into<String>) -> Self {
        Self::InvalidConfig(msg.into())
    }

    /// Wrap an I/O error with the path it happened on
    pub fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::IoFailure {
            path: path.into(),
            source,
        }
    }

    /// Create a base file error
    pub fn base_unreadable(path: impl Into<PathBuf>, reason: impl Into<String>) -> Self {
        Self::BaseFileUnreadable {
            path: path.into(),
            reason: reason.into(),
        }
    }

    /// Short name of the error kind, used in log lines
    pub fn kind(&self) -> &'static str {
        match self {
            Self::InvalidConfig(_) => "InvalidConfig",
            Self::BaseFileUnreadable { .. } => "BaseFileUnreadable",
            Self::DeltaGenerationFailed(_) => "DeltaGenerationFailed",
            Self::CompressionFailed(_) => "CompressionFailed",
            Self::HeaderEncodingFailed(_) => "HeaderEncodingFailed",
            Self::IoFailure { .. } => "IOFailure",
            Self::SigningFailed(_) => "SigningFailed",
            Self::InvalidKeyMaterial(_) => "InvalidKeyMaterial",
            Self::EncryptionFailed(_) => "EncryptionFailed",
        }
    }
}

impl From<HeaderError> for PackError {
    fn from(err: HeaderError) -> Self {
        Self::HeaderEncodingFailed(err)
    }
}
