//! # ota-pack
//!
//! Packs an application binary into the artifact the custom OTA bootloader
//! consumes: an optional delta against the running firmware, optional xz
//! compression, a fixed header carrying version, flags, length and digests,
//! then optional secure boot signing and AES-128 encryption.
//!
//! ## Example
//!
//! ```no_run
//! use ota_pack::{PackageConfig, PackagingPipeline, Toolbox};
//!
//! let config = PackageConfig::new("build/hello-world.bin").firmware_version("1.0.0");
//! let report = PackagingPipeline::new(config, Toolbox::default())?.run()?;
//! println!("{}", report.output.display());
//! # Ok::<(), ota_pack::PackError>(())
//! ```

pub mod cli;
pub mod compression;
pub mod config;
pub mod crc;
pub mod crypto;
pub mod error;
pub mod image_header;
pub mod image_types;
pub mod pipeline;
pub mod shell;
pub mod stage;
mod utils;

#[macro_use]
extern crate log;

pub use config::{PackageConfig, ProjectFile, ToolCommand, ToolCommands};
pub use error::{HeaderError, PackError, Result};
pub use image_header::{Header, HeaderFields, HeaderV1, HeaderV2};
pub use image_types::{CompressionType, DeltaType, EncryptionType, HeaderVersion};
pub use pipeline::{PackReport, PackagingPipeline};
pub use stage::{ExternalTool, StageRunner, ToolRequest, Toolbox};

/// Current version of ota-pack
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
