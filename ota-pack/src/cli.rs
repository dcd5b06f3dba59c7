//! Command line interface for ota-pack

use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, bail};
use clap::{Args as ClapArgs, Parser, Subcommand, ValueEnum};
use colored::Colorize;

use crate::config::{self, DEFAULT_WORK_DIR, PackageConfig, ProjectFile};
use crate::crc::to_hex;
use crate::crypto;
use crate::image_header::Header;
use crate::image_types::{CompressionType, DeltaType, EncryptionType, HeaderVersion};
use crate::pipeline::PackagingPipeline;
use crate::stage::Toolbox;
use crate::utils::display_size;
use crate::VERSION;

/// Project file picked up from the current directory when `--config` is absent
pub const DEFAULT_PROJECT_FILE: &str = ".ota-pack.toml";

/// Command line arguments for ota-pack
#[derive(Parser, Debug)]
#[command(name = "ota-pack")]
#[command(version = VERSION)]
#[command(about = "Pack firmware into compressed, signed and encrypted OTA images", long_about = None)]
#[command(args_conflicts_with_subcommands = true, disable_version_flag = true)]
pub struct Args {
    /// Print version
    #[arg(long, action = clap::ArgAction::Version)]
    pub version: Option<bool>,

    #[command(subcommand)]
    pub command: Option<Commands>,

    /// Packing options when no subcommand is given
    #[command(flatten)]
    pub pack: PackArgs,

    /// Verbose output
    #[arg(long, global = true)]
    pub verbose: bool,

    /// Quiet mode - only output errors
    #[arg(short, long, global = true)]
    pub quiet: bool,
}

/// Available commands
#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Pack a firmware image (default)
    Pack(PackArgs),
    /// Print the header of a packed image
    Info(InfoArgs),
    /// Check header CRC32, payload length and payload MD5 of a packed image
    Verify(VerifyArgs),
}

/// Arguments for packing an image
#[derive(ClapArgs, Debug, Default, Clone)]
pub struct PackArgs {
    /// Header layout version [default: 1]
    #[arg(short = 'V', long, value_enum)]
    pub header_version: Option<HeaderVersionArg>,

    /// Firmware compression type [default: xz]
    #[arg(short = 'c', long, value_enum)]
    pub compress_type: Option<CompressionArg>,

    /// Firmware delta type [default: none]
    #[arg(short = 'd', long, value_enum)]
    pub delta_type: Option<DeltaArg>,

    /// Encryption type for the packed firmware [default: none]
    #[arg(short = 'e', long, value_enum)]
    pub encryption_type: Option<EncryptionArg>,

    /// The base firmware, only needed for delta packing
    #[arg(short = 'b', long)]
    pub base_file: Option<PathBuf>,

    /// The new firmware [default: app named by flasher_args.json]
    #[arg(short = 'i', long)]
    pub in_file: Option<PathBuf>,

    /// Key used to sign the packed image for secure boot
    #[arg(long)]
    pub sign_key: Option<PathBuf>,

    /// Key file used to encrypt the packed image
    #[arg(long, alias = "encry-key")]
    pub encrypt_key: Option<PathBuf>,

    /// Firmware version string, at most 31 bytes
    #[arg(short = 'v', long, alias = "ver")]
    pub firmware_version: Option<String>,

    /// Work directory, recreated on every run [default: custom_ota_binaries]
    #[arg(short = 'o', long)]
    pub out_dir: Option<PathBuf>,

    /// Directory holding flasher_args.json
    #[arg(long, default_value = ".")]
    pub build_dir: PathBuf,

    /// TOML project file
    #[arg(long)]
    pub config: Option<PathBuf>,
}

/// Arguments for printing header information
#[derive(ClapArgs, Debug)]
pub struct InfoArgs {
    /// Packed image file to examine
    pub image_file: PathBuf,

    /// Print in JSON format
    #[arg(long)]
    pub json: bool,

    /// Decrypt with this key file first
    #[arg(long)]
    pub encrypt_key: Option<PathBuf>,
}

/// Arguments for verifying an image
#[derive(ClapArgs, Debug)]
pub struct VerifyArgs {
    /// Packed image file to verify
    pub image_file: PathBuf,

    /// Decrypt with this key file first
    #[arg(long)]
    pub encrypt_key: Option<PathBuf>,
}

#[derive(ValueEnum, Clone, Copy, Debug, PartialEq)]
pub enum HeaderVersionArg {
    #[value(name = "1")]
    V1,
    #[value(name = "2")]
    V2,
}

#[derive(ValueEnum, Clone, Copy, Debug, PartialEq)]
pub enum CompressionArg {
    None,
    Xz,
}

#[derive(ValueEnum, Clone, Copy, Debug, PartialEq)]
pub enum DeltaArg {
    None,
    Ddelta,
}

#[derive(ValueEnum, Clone, Copy, Debug, PartialEq)]
pub enum EncryptionArg {
    None,
    Aes128,
}

impl From<HeaderVersionArg> for HeaderVersion {
    fn from(arg: HeaderVersionArg) -> Self {
        match arg {
            HeaderVersionArg::V1 => Self::V1,
            HeaderVersionArg::V2 => Self::V2,
        }
    }
}

impl From<CompressionArg> for CompressionType {
    fn from(arg: CompressionArg) -> Self {
        match arg {
            CompressionArg::None => Self::None,
            CompressionArg::Xz => Self::Xz,
        }
    }
}

impl From<DeltaArg> for DeltaType {
    fn from(arg: DeltaArg) -> Self {
        match arg {
            DeltaArg::None => Self::None,
            DeltaArg::Ddelta => Self::BinaryDelta,
        }
    }
}

impl From<EncryptionArg> for EncryptionType {
    fn from(arg: EncryptionArg) -> Self {
        match arg {
            EncryptionArg::None => Self::None,
            EncryptionArg::Aes128 => Self::Aes128,
        }
    }
}

impl Args {
    /// Install the logger; `RUST_LOG` overrides the flag-derived level
    pub fn init_logger(&self) {
        let level = if self.quiet {
            log::LevelFilter::Error
        } else if self.verbose {
            log::LevelFilter::Debug
        } else {
            log::LevelFilter::Info
        };

        let _ = env_logger::Builder::new()
            .filter_level(level)
            .format_timestamp(None)
            .format_target(false)
            .parse_default_env()
            .try_init();
    }
}

impl PackArgs {
    /// Load the project file named by `--config`, or the default one if present
    pub fn project_file(&self) -> crate::Result<ProjectFile> {
        match &self.config {
            Some(path) => ProjectFile::load(path),
            None => {
                let path = Path::new(DEFAULT_PROJECT_FILE);
                if path.is_file() {
                    ProjectFile::load(path)
                } else {
                    Ok(ProjectFile::default())
                }
            }
        }
    }

    /// Merge flags over the project file over built-in defaults
    pub fn resolve(self, file: &ProjectFile) -> crate::Result<PackageConfig> {
        let source_file = match self.in_file.or_else(|| file.in_file.clone()) {
            Some(path) => path,
            None => config::default_source_file(&self.build_dir)?,
        };

        let mut config = PackageConfig::new(source_file);
        config.header_version = self
            .header_version
            .map(HeaderVersion::from)
            .or(file.header_version)
            .unwrap_or_default();
        config.compression = self
            .compress_type
            .map(CompressionType::from)
            .or(file.compress_type)
            .unwrap_or_default();
        config.delta = self
            .delta_type
            .map(DeltaType::from)
            .or(file.delta_type)
            .unwrap_or_default();
        config.encryption = self
            .encryption_type
            .map(EncryptionType::from)
            .or(file.encryption_type)
            .unwrap_or_default();
        config.base_file = self.base_file.or_else(|| file.base_file.clone());
        config.sign_key = self.sign_key.or_else(|| file.sign_key.clone());
        config.encryption_key = self.encrypt_key.or_else(|| file.encrypt_key.clone());
        config.firmware_version = self
            .firmware_version
            .or_else(|| file.firmware_version.clone())
            .unwrap_or_default();
        config.work_dir = self
            .out_dir
            .or_else(|| file.out_dir.clone())
            .unwrap_or_else(|| PathBuf::from(DEFAULT_WORK_DIR));

        Ok(config)
    }
}

/// Main CLI handler
pub fn run_cli(args: Args) -> anyhow::Result<()> {
    let quiet = args.quiet;

    match args.command {
        Some(Commands::Pack(pack_args)) => handle_pack(pack_args, quiet),
        Some(Commands::Info(info_args)) => handle_info(info_args),
        Some(Commands::Verify(verify_args)) => handle_verify(verify_args, quiet),
        None => handle_pack(args.pack, quiet),
    }
}

fn handle_pack(args: PackArgs, quiet: bool) -> anyhow::Result<()> {
    let file = args.project_file()?;
    let tools = Toolbox::from_commands(&file.tools, !quiet);
    let config = args.resolve(&file)?;

    info!("src file is: {}", config.source_file.display());

    let pipeline = PackagingPipeline::new(config, tools)?;
    debug!("stages: {}", pipeline.stages().join(" -> "));

    let report = pipeline.run()?;

    if !quiet {
        for artifact in &report.artifacts {
            eprintln!("  {}", artifact.display());
        }
        let size = fs::metadata(&report.output).map(|m| m.len()).unwrap_or(0);
        println!(
            "{}",
            format!(
                "OTA image created: {} ({})",
                report.output.display(),
                display_size(size)
            )
            .green()
            .bold()
        );
    }

    Ok(())
}

/// Read an image, decrypting it first when a key is given
fn read_image(path: &Path, key: Option<&Path>) -> anyhow::Result<Vec<u8>> {
    let mut data =
        fs::read(path).with_context(|| format!("failed to read {}", path.display()))?;

    if let Some(key_path) = key {
        let material =
            fs::read(key_path).with_context(|| format!("failed to read {}", key_path.display()))?;
        let key = crypto::derive_key(&material)?;
        crypto::decrypt_ecb(&key, &mut data)?;
        let plain_len = crypto::unpad(&data)?.len();
        data.truncate(plain_len);
    }

    Ok(data)
}

fn handle_info(args: InfoArgs) -> anyhow::Result<()> {
    let image = read_image(&args.image_file, args.encrypt_key.as_deref())?;
    let header = Header::decode(&image)?;

    if args.json {
        let fields = header.fields();
        let base = header.base_check();
        let value = serde_json::json!({
            "header_version": header.version().code(),
            "header_size": header.size(),
            "compression": fields.compression.to_string(),
            "delta": fields.delta.to_string(),
            "encryption": fields.encryption.to_string(),
            "firmware_version": fields.firmware_version,
            "payload_length": fields.payload_len,
            "payload_md5": to_hex(&fields.payload_md5),
            "base_check_length": base.map(|b| b.len),
            "base_check_crc32": base.map(|b| format!("0x{:08x}", b.crc32)),
        });
        println!("{}", serde_json::to_string_pretty(&value)?);
    } else {
        println!("{}", header.summary());
        println!("File size: {}", display_size(image.len() as u64));
    }

    Ok(())
}

fn handle_verify(args: VerifyArgs, quiet: bool) -> anyhow::Result<()> {
    let image = read_image(&args.image_file, args.encrypt_key.as_deref())?;

    let header = match Header::decode(&image) {
        Ok(header) => header,
        Err(e) => bail!("{}: {}", args.image_file.display(), e),
    };
    if !quiet {
        eprintln!("Header CRC32 - OK");
    }

    header.verify_payload(&image)?;
    if !quiet {
        eprintln!(
            "Payload MD5 {} - OK",
            to_hex(&header.fields().payload_md5)
        );
        println!("{}", "Image verification successful".green());
    }

    Ok(())
}
