//! xz compressor
//!
//! Produces the same container as `xz --check=crc32 --lzma2=dict=64KiB`: the
//! bootloader's decoder only has room for a 64 KiB dictionary and only
//! understands CRC32 block checks.

use std::io::{Read, Write};

use anyhow::Context;
use liblzma::read::XzDecoder;
use liblzma::stream::{Check, Filters, LzmaOptions, Stream};
use liblzma::write::XzEncoder;

use super::traits::CompressionInterface;
use crate::image_types::CompressionType;

/// Dictionary size the device-side decoder is built for
pub const XZ_DICT_SIZE: u32 = 64 * 1024;

/// Default xz preset
pub const XZ_DEFAULT_PRESET: u32 = 6;

#[derive(Debug, Clone)]
pub struct XzCompressor {
    preset: u32,
    dict_size: u32,
}

impl Default for XzCompressor {
    fn default() -> Self {
        Self {
            preset: XZ_DEFAULT_PRESET,
            dict_size: XZ_DICT_SIZE,
        }
    }
}

impl XzCompressor {
    pub fn with_preset(preset: u32) -> Self {
        Self {
            preset,
            ..Default::default()
        }
    }

    fn stream(&self) -> anyhow::Result<Stream> {
        let mut options = LzmaOptions::new_preset(self.preset)
            .with_context(|| format!("invalid xz preset {}", self.preset))?;
        options.dict_size(self.dict_size);

        let mut filters = Filters::new();
        filters.lzma2(&options);

        Stream::new_stream_encoder(&filters, Check::Crc32).context("failed to initialize xz encoder")
    }
}

impl CompressionInterface for XzCompressor {
    fn compress(&self, data: &[u8]) -> anyhow::Result<Vec<u8>> {
        let mut encoder = XzEncoder::new_stream(Vec::new(), self.stream()?);
        encoder.write_all(data).context("xz compression failed")?;
        encoder.finish().context("failed to finish xz stream")
    }

    fn decompress(&self, compressed_data: &[u8]) -> anyhow::Result<Vec<u8>> {
        let mut decoder = XzDecoder::new(compressed_data);
        let mut out = Vec::new();
        decoder
            .read_to_end(&mut out)
            .context("xz decompression failed")?;
        Ok(out)
    }

    fn get_compression_type(&self) -> CompressionType {
        CompressionType::Xz
    }

    fn get_name(&self) -> &'static str {
        "xz"
    }
}
