//! Wire codes for the fields of the OTA header

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::HeaderError;

/// Header layout version
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum HeaderVersion {
    /// Original layout, no base image check
    #[default]
    V1 = 1,
    /// Adds the base image check length and CRC32 used by delta updates
    V2 = 2,
}

/// Payload compression
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CompressionType {
    None = 0,
    #[default]
    Xz = 1,
}

/// Payload delta encoding
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DeltaType {
    #[default]
    None = 0,
    /// ddelta binary patch against the running firmware
    #[serde(rename = "ddelta")]
    BinaryDelta = 1,
}

/// Whole-artifact encryption
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EncryptionType {
    #[default]
    None = 0,
    Aes128 = 1,
}

impl HeaderVersion {
    pub fn code(self) -> u8 {
        self as u8
    }
}

impl CompressionType {
    pub fn code(self) -> u8 {
        self as u8
    }

    /// File suffix appended by the compression stage
    pub fn suffix(self) -> Option<&'static str> {
        match self {
            Self::None => None,
            Self::Xz => Some("xz"),
        }
    }
}

impl DeltaType {
    pub fn code(self) -> u8 {
        self as u8
    }

    pub fn is_active(self) -> bool {
        self != Self::None
    }
}

impl EncryptionType {
    pub fn code(self) -> u8 {
        self as u8
    }
}

impl TryFrom<u8> for HeaderVersion {
    type Error = HeaderError;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        match value {
            1 => Ok(Self::V1),
            2 => Ok(Self::V2),
            other => Err(HeaderError::UnsupportedVersion(other)),
        }
    }
}

impl TryFrom<u8> for CompressionType {
    type Error = HeaderError;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        match value {
            0 => Ok(Self::None),
            1 => Ok(Self::Xz),
            code => Err(HeaderError::UnknownCode {
                field: "compression",
                code,
            }),
        }
    }
}

impl TryFrom<u8> for DeltaType {
    type Error = HeaderError;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        match value {
            0 => Ok(Self::None),
            1 => Ok(Self::BinaryDelta),
            code => Err(HeaderError::UnknownCode {
                field: "delta",
                code,
            }),
        }
    }
}

impl TryFrom<u8> for EncryptionType {
    type Error = HeaderError;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        match value {
            0 => Ok(Self::None),
            1 => Ok(Self::Aes128),
            code => Err(HeaderError::UnknownCode {
                field: "encryption",
                code,
            }),
        }
    }
}

impl FromStr for CompressionType {
    type Err = HeaderError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "none" => Ok(Self::None),
            "xz" => Ok(Self::Xz),
            _ => Err(HeaderError::Invalid(format!("unknown compression type: {s}"))),
        }
    }
}

impl FromStr for DeltaType {
    type Err = HeaderError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "none" => Ok(Self::None),
            "ddelta" => Ok(Self::BinaryDelta),
            _ => Err(HeaderError::Invalid(format!("unknown delta type: {s}"))),
        }
    }
}

impl FromStr for EncryptionType {
    type Err = HeaderError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "none" => Ok(Self::None),
            "aes128" => Ok(Self::Aes128),
            _ => Err(HeaderError::Invalid(format!("unknown encryption type: {s}"))),
        }
    }
}

impl fmt::Display for HeaderVersion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "v{}", self.code())
    }
}

impl fmt::Display for CompressionType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::None => "none",
            Self::Xz => "xz",
        };
        write!(f, "{}", name)
    }
}

impl fmt::Display for DeltaType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::None => "none",
            Self::BinaryDelta => "ddelta",
        };
        write!(f, "{}", name)
    }
}

impl fmt::Display for EncryptionType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::None => "none",
            Self::Aes128 => "aes128",
        };
        write!(f, "{}", name)
    }
}
