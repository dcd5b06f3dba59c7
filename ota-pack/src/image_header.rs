//! OTA image header structures and serialization
//!
//! The header is read by the bootloader's custom OTA path
//! (`bootloader_custom_ota_header_t`), so the layout is fixed:
//!
//! | Field                         | V1 offset | V2 offset | Size |
//! |-------------------------------|-----------|-----------|------|
//! | Magic `"ESP\0"`               | 0         | 0         | 4    |
//! | Header version                | 4         | 4         | 1    |
//! | compress (lo) / delta (hi)    | 5         | 5         | 1    |
//! | Encryption type               | 6         | 6         | 1    |
//! | Reserved                      | 7         | 7         | 1    |
//! | Firmware version, NUL padded  | 8         | 8         | 32   |
//! | Payload length (u32 LE)       | 40        | 40        | 4    |
//! | Payload MD5, zero padded      | 44        | 44        | 32   |
//! | Base check length (u32 LE)    | -         | 76        | 4    |
//! | Base check CRC32 (u32 LE)     | -         | 80        | 4    |
//! | Header CRC32 (u32 LE)         | 76        | 84        | 4    |
//!
//! The MD5 slot is twice the digest size; the upper 16 bytes are always zero.

use std::io::{self, Cursor, Read, Write};
use std::path::Path;

use byteorder::{LittleEndian, ReadBytesExt, WriteBytesExt};

use crate::config::{FIRMWARE_VERSION_MAX, PackageConfig};
use crate::crc::{calculate_crc32, calculate_md5, to_hex};
use crate::error::{HeaderError, PackError, Result};
use crate::image_types::{CompressionType, DeltaType, EncryptionType, HeaderVersion};

/// Magic string at offset 0
pub const HEADER_MAGIC: [u8; 4] = *b"ESP\0";

/// Width of the firmware version field
pub const FIRMWARE_VERSION_LEN: usize = 32;

/// Width of the slot holding the 16-byte MD5 digest
pub const MD5_SLOT_LEN: usize = 32;

/// Number of leading base image bytes covered by the V2 base check
pub const BASE_CHECK_LEN: u32 = 4096;

/// Bytes shared by both layouts, up to and including the MD5 slot
const COMMON_LEN: usize = 8 + FIRMWARE_VERSION_LEN + 4 + MD5_SLOT_LEN;

/// Total V1 header size
pub const HEADER_V1_SIZE: usize = COMMON_LEN + 4;

/// Total V2 header size
pub const HEADER_V2_SIZE: usize = COMMON_LEN + 8 + 4;

/// Fields both layouts carry
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HeaderFields {
    pub compression: CompressionType,
    pub delta: DeltaType,
    pub encryption: EncryptionType,
    pub firmware_version: String,
    pub payload_len: u32,
    pub payload_md5: [u8; 16],
}

/// Header layout 1
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HeaderV1 {
    pub fields: HeaderFields,
}

/// Header layout 2, used for delta updates
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HeaderV2 {
    pub fields: HeaderFields,
    pub base_check_len: u32,
    pub base_crc32: u32,
}

/// A decoded or to-be-encoded header, tagged by layout
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Header {
    V1(HeaderV1),
    V2(HeaderV2),
}

/// Check values over the start of the base image a delta applies to
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct BaseCheck {
    pub len: u32,
    pub crc32: u32,
}

impl BaseCheck {
    /// CRC32 over the first [`BASE_CHECK_LEN`] bytes of `path`.
    ///
    /// A base image shorter than [`BASE_CHECK_LEN`] is rejected: the device
    /// checks exactly that many bytes of the running image, so a shorter
    /// checksum could never match.
    pub fn from_file(path: &Path) -> Result<Self> {
        let file = std::fs::File::open(path)
            .map_err(|e| PackError::base_unreadable(path, e.to_string()))?;

        let mut head = Vec::with_capacity(BASE_CHECK_LEN as usize);
        file.take(BASE_CHECK_LEN as u64)
            .read_to_end(&mut head)
            .map_err(|e| PackError::base_unreadable(path, e.to_string()))?;

        if head.len() < BASE_CHECK_LEN as usize {
            return Err(PackError::base_unreadable(
                path,
                format!(
                    "only {} bytes, base check needs {}",
                    head.len(),
                    BASE_CHECK_LEN
                ),
            ));
        }

        Ok(Self {
            len: BASE_CHECK_LEN,
            crc32: calculate_crc32(&head),
        })
    }
}

impl HeaderFields {
    /// Fields for a payload of `payload_len` bytes, taken from the configuration
    pub fn new(config: &PackageConfig, payload_len: u32, payload_md5: [u8; 16]) -> Self {
        Self {
            compression: config.compression,
            delta: config.delta,
            encryption: config.recorded_encryption(),
            firmware_version: config.firmware_version.clone(),
            payload_len,
            payload_md5,
        }
    }

    fn write_common<W: Write>(&self, version: HeaderVersion, writer: &mut W) -> io::Result<()> {
        writer.write_all(&HEADER_MAGIC)?;
        writer.write_u8(version.code())?;
        writer.write_u8((self.delta.code() << 4) | (self.compression.code() & 0x0f))?;
        writer.write_u8(self.encryption.code())?;
        // Reserved
        writer.write_u8(0)?;

        let mut version_field = [0u8; FIRMWARE_VERSION_LEN];
        let bytes = self.firmware_version.as_bytes();
        version_field[..bytes.len()].copy_from_slice(bytes);
        writer.write_all(&version_field)?;

        writer.write_u32::<LittleEndian>(self.payload_len)?;

        let mut md5_slot = [0u8; MD5_SLOT_LEN];
        md5_slot[..16].copy_from_slice(&self.payload_md5);
        writer.write_all(&md5_slot)?;

        Ok(())
    }

    fn read_common(
        cursor: &mut Cursor<&[u8]>,
        expected: HeaderVersion,
    ) -> std::result::Result<Self, HeaderError> {
        let mut magic = [0u8; 4];
        cursor.read_exact(&mut magic).map_err(truncated)?;
        if magic != HEADER_MAGIC {
            return Err(HeaderError::BadMagic {
                expected: HEADER_MAGIC,
                found: magic,
            });
        }

        let version = cursor.read_u8().map_err(truncated)?;
        if version != expected.code() {
            return Err(HeaderError::UnsupportedVersion(version));
        }

        let nibbles = cursor.read_u8().map_err(truncated)?;
        let compression = CompressionType::try_from(nibbles & 0x0f)?;
        let delta = DeltaType::try_from(nibbles >> 4)?;
        let encryption = EncryptionType::try_from(cursor.read_u8().map_err(truncated)?)?;
        let _reserved = cursor.read_u8().map_err(truncated)?;

        let mut version_field = [0u8; FIRMWARE_VERSION_LEN];
        cursor.read_exact(&mut version_field).map_err(truncated)?;
        let end = version_field
            .iter()
            .position(|&b| b == 0)
            .unwrap_or(FIRMWARE_VERSION_LEN);
        let firmware_version = String::from_utf8_lossy(&version_field[..end]).into_owned();

        let payload_len = cursor.read_u32::<LittleEndian>().map_err(truncated)?;

        let mut md5_slot = [0u8; MD5_SLOT_LEN];
        cursor.read_exact(&mut md5_slot).map_err(truncated)?;
        let mut payload_md5 = [0u8; 16];
        payload_md5.copy_from_slice(&md5_slot[..16]);

        Ok(Self {
            compression,
            delta,
            encryption,
            firmware_version,
            payload_len,
            payload_md5,
        })
    }

    fn check(&self) -> std::result::Result<(), HeaderError> {
        if self.firmware_version.len() > FIRMWARE_VERSION_MAX {
            return Err(HeaderError::VersionTooLong {
                len: self.firmware_version.len(),
                max: FIRMWARE_VERSION_MAX,
            });
        }
        // The field is NUL terminated on the wire.
        if self.firmware_version.contains('\0') {
            return Err(HeaderError::Invalid(format!(
                "firmware version {:?} contains a NUL byte",
                self.firmware_version
            )));
        }
        Ok(())
    }
}

fn truncated(_: io::Error) -> HeaderError {
    HeaderError::Invalid("unexpected end of header".to_string())
}

/// Append the CRC32 of everything written so far
fn seal(mut buffer: Vec<u8>) -> Vec<u8> {
    let crc = calculate_crc32(&buffer);
    buffer.extend_from_slice(&crc.to_le_bytes());
    buffer
}

/// Compare the stored CRC32 at `crc_offset` against the bytes before it
fn check_crc(data: &[u8], crc_offset: usize) -> std::result::Result<(), HeaderError> {
    let stored = u32::from_le_bytes([
        data[crc_offset],
        data[crc_offset + 1],
        data[crc_offset + 2],
        data[crc_offset + 3],
    ]);
    let calculated = calculate_crc32(&data[..crc_offset]);
    if stored != calculated {
        return Err(HeaderError::CrcMismatch { stored, calculated });
    }
    Ok(())
}

fn ensure_len(data: &[u8], needed: usize) -> std::result::Result<(), HeaderError> {
    if data.len() < needed {
        return Err(HeaderError::Truncated {
            len: data.len(),
            needed,
        });
    }
    Ok(())
}

impl HeaderV1 {
    pub fn encode(&self) -> std::result::Result<Vec<u8>, HeaderError> {
        self.fields.check()?;
        let mut buffer = Vec::with_capacity(HEADER_V1_SIZE);
        self.fields
            .write_common(HeaderVersion::V1, &mut buffer)
            .map_err(|e| HeaderError::Invalid(e.to_string()))?;
        Ok(seal(buffer))
    }

    pub fn decode(data: &[u8]) -> std::result::Result<Self, HeaderError> {
        ensure_len(data, HEADER_V1_SIZE)?;
        let mut cursor = Cursor::new(data);
        let fields = HeaderFields::read_common(&mut cursor, HeaderVersion::V1)?;
        check_crc(data, HEADER_V1_SIZE - 4)?;
        Ok(Self { fields })
    }
}

impl HeaderV2 {
    pub fn encode(&self) -> std::result::Result<Vec<u8>, HeaderError> {
        self.fields.check()?;
        let mut buffer = Vec::with_capacity(HEADER_V2_SIZE);
        let write = |buffer: &mut Vec<u8>| -> io::Result<()> {
            self.fields.write_common(HeaderVersion::V2, buffer)?;
            buffer.write_u32::<LittleEndian>(self.base_check_len)?;
            buffer.write_u32::<LittleEndian>(self.base_crc32)
        };
        write(&mut buffer).map_err(|e| HeaderError::Invalid(e.to_string()))?;
        Ok(seal(buffer))
    }

    pub fn decode(data: &[u8]) -> std::result::Result<Self, HeaderError> {
        ensure_len(data, HEADER_V2_SIZE)?;
        let mut cursor = Cursor::new(data);
        let fields = HeaderFields::read_common(&mut cursor, HeaderVersion::V2)?;
        let base_check_len = cursor.read_u32::<LittleEndian>().map_err(truncated)?;
        let base_crc32 = cursor.read_u32::<LittleEndian>().map_err(truncated)?;
        check_crc(data, HEADER_V2_SIZE - 4)?;
        Ok(Self {
            fields,
            base_check_len,
            base_crc32,
        })
    }
}

impl Header {
    /// Build the header for `payload` as configured
    pub fn for_payload(config: &PackageConfig, payload: &[u8]) -> Result<Self> {
        let payload_len = u32::try_from(payload.len()).map_err(|_| {
            PackError::from(HeaderError::Invalid(format!(
                "payload of {} bytes does not fit the u32 length field",
                payload.len()
            )))
        })?;
        Self::new(config, payload_len, calculate_md5(payload))
    }

    /// Build the header for a payload known by its length and MD5.
    ///
    /// For a V2 delta header this reads the base file to fill the base check.
    pub fn new(config: &PackageConfig, payload_len: u32, payload_md5: [u8; 16]) -> Result<Self> {
        config.validate()?;
        let fields = HeaderFields::new(config, payload_len, payload_md5);

        let header = match config.header_version {
            HeaderVersion::V1 => Header::V1(HeaderV1 { fields }),
            HeaderVersion::V2 => {
                let base = match (&config.base_file, config.delta.is_active()) {
                    (Some(path), true) => BaseCheck::from_file(path)?,
                    (None, true) => {
                        return Err(PackError::invalid_config(
                            "delta type requires a base file",
                        ));
                    }
                    (_, false) => BaseCheck::default(),
                };
                Header::V2(HeaderV2 {
                    fields,
                    base_check_len: base.len,
                    base_crc32: base.crc32,
                })
            }
        };

        Ok(header)
    }

    /// Serialize the header, CRC32 included
    pub fn encode(&self) -> std::result::Result<Vec<u8>, HeaderError> {
        match self {
            Header::V1(h) => h.encode(),
            Header::V2(h) => h.encode(),
        }
    }

    /// Parse a header from the start of `data`, checking magic and CRC32
    pub fn decode(data: &[u8]) -> std::result::Result<Self, HeaderError> {
        ensure_len(data, 5)?;
        if data[..4] != HEADER_MAGIC {
            let mut found = [0u8; 4];
            found.copy_from_slice(&data[..4]);
            return Err(HeaderError::BadMagic {
                expected: HEADER_MAGIC,
                found,
            });
        }

        match HeaderVersion::try_from(data[4])? {
            HeaderVersion::V1 => HeaderV1::decode(data).map(Header::V1),
            HeaderVersion::V2 => HeaderV2::decode(data).map(Header::V2),
        }
    }

    pub fn version(&self) -> HeaderVersion {
        match self {
            Header::V1(_) => HeaderVersion::V1,
            Header::V2(_) => HeaderVersion::V2,
        }
    }

    pub fn fields(&self) -> &HeaderFields {
        match self {
            Header::V1(h) => &h.fields,
            Header::V2(h) => &h.fields,
        }
    }

    /// Encoded size, which is also the payload offset
    pub fn size(&self) -> usize {
        size_of_version(self.version())
    }

    /// Base image check, present only in V2
    pub fn base_check(&self) -> Option<BaseCheck> {
        match self {
            Header::V1(_) => None,
            Header::V2(h) => Some(BaseCheck {
                len: h.base_check_len,
                crc32: h.base_crc32,
            }),
        }
    }

    /// Check the payload that follows the header against its length and MD5.
    ///
    /// Trailing bytes after the payload (such as a signature block) are
    /// ignored, as the bootloader does.
    pub fn verify_payload(&self, image: &[u8]) -> std::result::Result<(), HeaderError> {
        let fields = self.fields();
        let start = self.size();
        let end = start + fields.payload_len as usize;
        if image.len() < end {
            return Err(HeaderError::LengthMismatch {
                expected: fields.payload_len,
                actual: image.len().saturating_sub(start),
            });
        }

        let calculated = calculate_md5(&image[start..end]);
        if calculated != fields.payload_md5 {
            return Err(HeaderError::Md5Mismatch {
                stored: to_hex(&fields.payload_md5),
                calculated: to_hex(&calculated),
            });
        }
        Ok(())
    }

    /// Get a summary of the header information
    pub fn summary(&self) -> String {
        let fields = self.fields();
        let mut summary = format!(
            "Header: {} ({} bytes)\n\
             Firmware version: {}\n\
             Compression: {} Delta: {} Encryption: {}\n\
             Payload: {} bytes, MD5 {}",
            self.version(),
            self.size(),
            if fields.firmware_version.is_empty() {
                "<none>"
            } else {
                &fields.firmware_version
            },
            fields.compression,
            fields.delta,
            fields.encryption,
            fields.payload_len,
            to_hex(&fields.payload_md5),
        );
        if let Some(base) = self.base_check() {
            summary += &format!(
                "\nBase check: {} bytes, CRC32 0x{:08x}",
                base.len, base.crc32
            );
        }
        summary
    }
}

/// Encoded header size for a layout
pub fn size_of_version(version: HeaderVersion) -> usize {
    match version {
        HeaderVersion::V1 => HEADER_V1_SIZE,
        HeaderVersion::V2 => HEADER_V2_SIZE,
    }
}

/// Encode the header for a payload of `payload_len` bytes with digest `payload_md5`
pub fn encode(config: &PackageConfig, payload_len: u32, payload_md5: [u8; 16]) -> Result<Vec<u8>> {
    let header = Header::new(config, payload_len, payload_md5)?;
    Ok(header.encode()?)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::NamedTempFile;

    fn fields() -> HeaderFields {
        HeaderFields {
            compression: CompressionType::Xz,
            delta: DeltaType::None,
            encryption: EncryptionType::None,
            firmware_version: "1.0.0".to_string(),
            payload_len: 1000,
            payload_md5: [0xab; 16],
        }
    }

    #[test]
    fn test_sizes() {
        assert_eq!(HEADER_V1_SIZE, 80);
        assert_eq!(HEADER_V2_SIZE, 88);
    }

    #[test]
    fn test_v1_layout() {
        let bytes = HeaderV1 { fields: fields() }.encode().unwrap();
        assert_eq!(bytes.len(), HEADER_V1_SIZE);
        assert_eq!(&bytes[0..4], b"ESP\0");
        assert_eq!(bytes[4], 1);
        assert_eq!(bytes[5], 0x01);
        assert_eq!(bytes[6], 0);
        assert_eq!(bytes[7], 0);
        assert_eq!(&bytes[8..13], b"1.0.0");
        assert!(bytes[13..40].iter().all(|&b| b == 0));
        assert_eq!(u32::from_le_bytes(bytes[40..44].try_into().unwrap()), 1000);
        assert_eq!(&bytes[44..60], &[0xab; 16]);
        assert!(bytes[60..76].iter().all(|&b| b == 0));
        assert_eq!(
            u32::from_le_bytes(bytes[76..80].try_into().unwrap()),
            calculate_crc32(&bytes[..76])
        );
    }

    #[test]
    fn test_nibble_packing() {
        let mut f = fields();
        f.compression = CompressionType::None;
        f.delta = DeltaType::BinaryDelta;
        let bytes = HeaderV2 {
            fields: f,
            base_check_len: BASE_CHECK_LEN,
            base_crc32: 0xdeadbeef,
        }
        .encode()
        .unwrap();
        assert_eq!(bytes[5], 0x10);
        assert_eq!(u32::from_le_bytes(bytes[76..80].try_into().unwrap()), 4096);
        assert_eq!(
            u32::from_le_bytes(bytes[80..84].try_into().unwrap()),
            0xdeadbeef
        );
    }

    #[test]
    fn test_roundtrip_both_layouts() {
        let v1 = Header::V1(HeaderV1 { fields: fields() });
        assert_eq!(Header::decode(&v1.encode().unwrap()).unwrap(), v1);

        let v2 = Header::V2(HeaderV2 {
            fields: fields(),
            base_check_len: 0,
            base_crc32: 0,
        });
        assert_eq!(Header::decode(&v2.encode().unwrap()).unwrap(), v2);
    }

    #[test]
    fn test_decode_rejects_corruption() {
        let mut bytes = HeaderV1 { fields: fields() }.encode().unwrap();
        bytes[10] ^= 0xff;
        assert!(matches!(
            Header::decode(&bytes),
            Err(HeaderError::CrcMismatch { .. })
        ));

        let mut bytes = HeaderV1 { fields: fields() }.encode().unwrap();
        bytes[0] = b'X';
        assert!(matches!(
            Header::decode(&bytes),
            Err(HeaderError::BadMagic { .. })
        ));

        let mut bytes = HeaderV1 { fields: fields() }.encode().unwrap();
        bytes[4] = 3;
        assert_eq!(
            Header::decode(&bytes),
            Err(HeaderError::UnsupportedVersion(3))
        );

        let bytes = HeaderV2 {
            fields: fields(),
            base_check_len: 0,
            base_crc32: 0,
        }
        .encode()
        .unwrap();
        assert!(matches!(
            Header::decode(&bytes[..HEADER_V2_SIZE - 1]),
            Err(HeaderError::Truncated { .. })
        ));
    }

    #[test]
    fn test_version_too_long() {
        let mut f = fields();
        f.firmware_version = "x".repeat(32);
        assert!(matches!(
            HeaderV1 { fields: f }.encode(),
            Err(HeaderError::VersionTooLong { len: 32, max: 31 })
        ));
    }

    #[test]
    fn test_version_with_nul_rejected() {
        let mut f = fields();
        f.firmware_version = "1.0\0rc1".to_string();
        assert!(matches!(
            HeaderV1 { fields: f }.encode(),
            Err(HeaderError::Invalid(_))
        ));

        let config = PackageConfig::new("app.bin").firmware_version("1.0\0rc1");
        assert!(matches!(
            encode(&config, 5, calculate_md5(b"12345")),
            Err(PackError::InvalidConfig(_))
        ));
    }

    #[test]
    fn test_v1_delta_sets_high_nibble() {
        let config = PackageConfig::new("app.bin")
            .compression(CompressionType::None)
            .delta(DeltaType::BinaryDelta, "old.bin");
        let bytes = encode(&config, 5, calculate_md5(b"12345")).unwrap();
        assert_eq!(bytes.len(), HEADER_V1_SIZE);
        assert_eq!(bytes[4], 1);
        assert_eq!(bytes[5], 0x10);

        let header = Header::decode(&bytes).unwrap();
        assert_eq!(header.fields().delta, DeltaType::BinaryDelta);
        assert_eq!(header.base_check(), None);
    }

    #[test]
    fn test_encryption_forced_off_without_key() {
        let config = PackageConfig::new("app.bin").encryption(EncryptionType::Aes128);
        let bytes = encode(&config, 7, calculate_md5(b"payload")).unwrap();
        assert_eq!(bytes[6], 0);

        let config = config.encryption_key("key.bin");
        let bytes = encode(&config, 7, calculate_md5(b"payload")).unwrap();
        assert_eq!(bytes[6], 1);
    }

    #[test]
    fn test_v2_without_delta_zero_base_check() {
        let config = PackageConfig::new("app.bin").header_version(HeaderVersion::V2);
        let bytes = encode(&config, 10, calculate_md5(&[0u8; 10])).unwrap();
        assert_eq!(bytes.len(), HEADER_V2_SIZE);
        assert_eq!(&bytes[76..84], &[0u8; 8]);
    }

    #[test]
    fn test_v2_delta_base_check() {
        let mut base = NamedTempFile::new().unwrap();
        let content: Vec<u8> = (0..5000u32).map(|i| (i % 251) as u8).collect();
        base.write_all(&content).unwrap();

        let config = PackageConfig::new("app.bin")
            .header_version(HeaderVersion::V2)
            .delta(DeltaType::BinaryDelta, base.path());
        let header = Header::for_payload(&config, b"patch").unwrap();
        assert_eq!(
            header.base_check(),
            Some(BaseCheck {
                len: 4096,
                crc32: calculate_crc32(&content[..4096]),
            })
        );
    }

    #[test]
    fn test_v2_delta_short_base_rejected() {
        let mut base = NamedTempFile::new().unwrap();
        base.write_all(&[1u8; 100]).unwrap();

        let config = PackageConfig::new("app.bin")
            .header_version(HeaderVersion::V2)
            .delta(DeltaType::BinaryDelta, base.path());
        assert!(matches!(
            Header::for_payload(&config, b"patch"),
            Err(PackError::BaseFileUnreadable { .. })
        ));
    }

    #[test]
    fn test_verify_payload() {
        let payload = b"firmware payload";
        let config = PackageConfig::new("app.bin").compression(CompressionType::None);
        let header = Header::for_payload(&config, payload).unwrap();
        let mut image = header.encode().unwrap();
        image.extend_from_slice(payload);
        image.extend_from_slice(&[0xff; 64]);
        assert!(header.verify_payload(&image).is_ok());

        let last = image.len() - 65;
        image[last] ^= 1;
        assert!(matches!(
            header.verify_payload(&image),
            Err(HeaderError::Md5Mismatch { .. })
        ));

        assert!(matches!(
            header.verify_payload(&image[..HEADER_V1_SIZE + 3]),
            Err(HeaderError::LengthMismatch { .. })
        ));
    }

    #[test]
    fn test_summary() {
        let header = Header::V2(HeaderV2 {
            fields: fields(),
            base_check_len: 4096,
            base_crc32: 0x1234,
        });
        let summary = header.summary();
        assert!(summary.contains("1.0.0"));
        assert!(summary.contains("xz"));
        assert!(summary.contains("0x00001234"));
    }
}
