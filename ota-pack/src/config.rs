//! Packaging configuration
//!
//! [`PackageConfig`] is the immutable input of one pipeline run. It is built
//! from an optional TOML project file ([`ProjectFile`]) with command line
//! flags layered on top.

use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::error::{PackError, Result};
use crate::image_types::{CompressionType, DeltaType, EncryptionType, HeaderVersion};

/// Longest firmware version string that still leaves room for a terminating NUL
pub const FIRMWARE_VERSION_MAX: usize = 31;

/// Working directory every run recreates
pub const DEFAULT_WORK_DIR: &str = "custom_ota_binaries";

/// File written by the ESP-IDF build that names the application binary
pub const FLASHER_ARGS_FILE: &str = "flasher_args.json";

/// Configuration of one packaging run
#[derive(Debug, Clone, PartialEq)]
pub struct PackageConfig {
    pub header_version: HeaderVersion,
    pub compression: CompressionType,
    pub delta: DeltaType,
    pub encryption: EncryptionType,
    pub firmware_version: String,
    pub source_file: PathBuf,
    pub base_file: Option<PathBuf>,
    pub sign_key: Option<PathBuf>,
    pub encryption_key: Option<PathBuf>,
    pub work_dir: PathBuf,
}

impl PackageConfig {
    /// Create a configuration for `source_file` with the tool's defaults:
    /// V1 header, xz compression, no delta, no signing, no encryption.
    pub fn new(source_file: impl Into<PathBuf>) -> Self {
        Self {
            header_version: HeaderVersion::default(),
            compression: CompressionType::default(),
            delta: DeltaType::default(),
            encryption: EncryptionType::default(),
            firmware_version: String::new(),
            source_file: source_file.into(),
            base_file: None,
            sign_key: None,
            encryption_key: None,
            work_dir: PathBuf::from(DEFAULT_WORK_DIR),
        }
    }

    pub fn header_version(mut self, version: HeaderVersion) -> Self {
        self.header_version = version;
        self
    }

    pub fn compression(mut self, compression: CompressionType) -> Self {
        self.compression = compression;
        self
    }

    pub fn delta(mut self, delta: DeltaType, base_file: impl Into<PathBuf>) -> Self {
        self.delta = delta;
        self.base_file = Some(base_file.into());
        self
    }

    pub fn encryption(mut self, encryption: EncryptionType) -> Self {
        self.encryption = encryption;
        self
    }

    pub fn encryption_key(mut self, key: impl Into<PathBuf>) -> Self {
        self.encryption_key = Some(key.into());
        self
    }

    pub fn sign_key(mut self, key: impl Into<PathBuf>) -> Self {
        self.sign_key = Some(key.into());
        self
    }

    pub fn firmware_version(mut self, version: impl Into<String>) -> Self {
        self.firmware_version = version.into();
        self
    }

    pub fn work_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.work_dir = dir.into();
        self
    }

    /// Encryption type as it is recorded in the header.
    ///
    /// Encryption only counts as active when a key was actually supplied.
    pub fn recorded_encryption(&self) -> EncryptionType {
        match self.encryption_key {
            Some(_) => self.encryption,
            None => EncryptionType::None,
        }
    }

    /// Whether the delta stage runs for this configuration
    pub fn runs_delta(&self) -> bool {
        self.header_version == HeaderVersion::V2 && self.delta.is_active()
    }

    /// Whether the encryption stage runs for this configuration.
    ///
    /// The type picks the stage: a key with type `none` encrypts nothing.
    pub fn runs_encryption(&self) -> bool {
        self.encryption_key.is_some() && self.encryption == EncryptionType::Aes128
    }

    /// Check the combination of options before anything touches the disk
    pub fn validate(&self) -> Result<()> {
        if self.firmware_version.len() > FIRMWARE_VERSION_MAX {
            return Err(PackError::invalid_config(format!(
                "firmware version '{}' is {} bytes (max {})",
                self.firmware_version,
                self.firmware_version.len(),
                FIRMWARE_VERSION_MAX
            )));
        }

        if self.firmware_version.contains('\0') {
            return Err(PackError::invalid_config(format!(
                "firmware version {:?} contains a NUL byte",
                self.firmware_version
            )));
        }

        // V1 records the delta type only; the payload is packed as given.
        if self.runs_delta() && self.base_file.is_none() {
            return Err(PackError::invalid_config(
                "delta type requires a base file",
            ));
        }

        if self.source_file.file_name().is_none() {
            return Err(PackError::invalid_config(format!(
                "source file '{}' has no file name",
                self.source_file.display()
            )));
        }

        Ok(())
    }

    /// Base name of the source file, the root of every artifact name
    pub fn source_base_name(&self) -> String {
        self.source_file
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default()
    }
}

/// Command line template of a process-backed tool
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct ToolCommand {
    pub program: String,
    /// Arguments; `${input}`, `${base}`, `${output}` and `${key}` are substituted
    pub args: Vec<String>,
    /// Extra environment for the child process only
    #[serde(default)]
    pub env: BTreeMap<String, String>,
    /// Directory holding the tool's shared libraries
    #[serde(default)]
    pub lib_dir: Option<PathBuf>,
    #[serde(default)]
    pub workdir: Option<PathBuf>,
}

impl ToolCommand {
    pub fn new(program: impl Into<String>, args: &[&str]) -> Self {
        Self {
            program: program.into(),
            args: args.iter().map(|a| a.to_string()).collect(),
            env: BTreeMap::new(),
            lib_dir: None,
            workdir: None,
        }
    }

    /// `ddelta_generate <base> <new> <patch>`
    pub fn default_delta() -> Self {
        Self::new("ddelta_generate", &["${base}", "${input}", "${output}"])
    }

    /// `espsecure.py sign_data --version 2 ...`
    pub fn default_sign() -> Self {
        Self::new(
            "espsecure.py",
            &[
                "sign_data",
                "--version",
                "2",
                "--keyfile",
                "${key}",
                "--output",
                "${output}",
                "${input}",
            ],
        )
    }
}

/// External tool command lines
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
#[serde(default)]
pub struct ToolCommands {
    pub delta: ToolCommand,
    pub sign: ToolCommand,
}

impl Default for ToolCommands {
    fn default() -> Self {
        Self {
            delta: ToolCommand::default_delta(),
            sign: ToolCommand::default_sign(),
        }
    }
}

/// Optional TOML project file, e.g. `.ota-pack.toml`
///
/// ```toml
/// header_version = "v2"
/// compress_type = "xz"
/// delta_type = "ddelta"
/// base_file = "old/app.bin"
/// firmware_version = "1.2.0"
///
/// [tools.delta]
/// program = "ddelta_generate"
/// args = ["${base}", "${input}", "${output}"]
/// lib_dir = "tools/ddelta/lib"
/// ```
#[derive(Serialize, Deserialize, Debug, Clone, Default, PartialEq)]
#[serde(default)]
pub struct ProjectFile {
    pub header_version: Option<HeaderVersion>,
    pub compress_type: Option<CompressionType>,
    pub delta_type: Option<DeltaType>,
    pub encryption_type: Option<EncryptionType>,
    pub base_file: Option<PathBuf>,
    pub in_file: Option<PathBuf>,
    pub sign_key: Option<PathBuf>,
    pub encrypt_key: Option<PathBuf>,
    pub firmware_version: Option<String>,
    pub out_dir: Option<PathBuf>,
    pub tools: ToolCommands,
}

impl ProjectFile {
    pub fn load(path: &Path) -> Result<Self> {
        let content = fs::read_to_string(path).map_err(|e| PackError::io(path, e))?;
        Self::parse(&content).map_err(|e| {
            PackError::invalid_config(format!("{}: {}", path.display(), e))
        })
    }

    pub fn parse(content: &str) -> std::result::Result<Self, toml::de::Error> {
        toml::from_str(content)
    }
}

#[derive(Deserialize)]
struct FlasherArgs {
    app: FlasherApp,
}

#[derive(Deserialize)]
struct FlasherApp {
    file: String,
}

/// Locate the application binary named by `flasher_args.json` in `build_dir`
pub fn default_source_file(build_dir: &Path) -> Result<PathBuf> {
    let args_path = build_dir.join(FLASHER_ARGS_FILE);
    let content = fs::read_to_string(&args_path).map_err(|e| {
        PackError::invalid_config(format!(
            "no input file given and {} is unreadable: {}",
            args_path.display(),
            e
        ))
    })?;

    let args: FlasherArgs = serde_json::from_str(&content).map_err(|e| {
        PackError::invalid_config(format!("{}: {}", args_path.display(), e))
    })?;

    let app = build_dir.join(&args.app.file);
    if !app.exists() {
        return Err(PackError::invalid_config(format!(
            "application binary {} named by {} not found",
            app.display(),
            FLASHER_ARGS_FILE
        )));
    }

    debug!("source file from {}: {}", FLASHER_ARGS_FILE, app.display());
    Ok(app)
}
