//! Compression interface
//!
//! Every payload compressor implements this trait. Only the xz encoder is
//! wired up today, since it is the only format the bootloader can unpack.

use crate::image_types::CompressionType;

/// Compression interface trait
pub trait CompressionInterface {
    /// Compress data
    fn compress(&self, data: &[u8]) -> anyhow::Result<Vec<u8>>;

    /// Decompress data, mainly for verification
    fn decompress(&self, compressed_data: &[u8]) -> anyhow::Result<Vec<u8>>;

    /// Header code of this compressor
    fn get_compression_type(&self) -> CompressionType;

    /// Compressor name
    fn get_name(&self) -> &'static str;
}
