//! CRC32 and MD5 helpers shared by the header codec and the verifier

/// Calculate the CRC32 (IEEE, seed 0) of a byte slice
///
/// This is the same checksum the bootloader computes with
/// `esp_rom_crc32_le(0, ..)`.
pub fn calculate_crc32(data: &[u8]) -> u32 {
    crc32fast::hash(data)
}

/// Raw MD5 digest of a byte slice
pub fn calculate_md5(data: &[u8]) -> [u8; 16] {
    md5::compute(data).0
}

/// Lowercase hex rendering of a digest
pub fn to_hex(bytes: &[u8]) -> String {
    bytes.iter().map(|b| format!("{b:02x}")).collect()
}
