//! The packaging pipeline
//!
//! ```text
//! source -> (patch) -> (.xz) -> .packed -> (.signed) -> (.encrypted)
//! ```
//!
//! Each step reads the artifact the previous one left in [`PackContext`] and
//! writes a new file into the work directory. Nothing is modified in place,
//! and the first failing step stops the run.

use std::fs;
use std::path::{Path, PathBuf};

use crate::config::PackageConfig;
use crate::crypto;
use crate::error::{PackError, Result};
use crate::image_header::Header;
use crate::stage::{StageKind, StageRunner, ToolRequest, Toolbox};
use crate::utils::{display_size, recreate_dir, write_artifact};

/// State shared by the steps of one run
pub struct PackContext {
    pub config: PackageConfig,
    pub tools: Toolbox,
    /// Artifact the next step consumes
    pub current: PathBuf,
    /// Name chain of the artifact, `<source>[.xz][.packed]...`
    pub name: String,
    /// Every file the run produced, in order
    pub artifacts: Vec<PathBuf>,
    pub header: Option<Header>,
}

impl PackContext {
    fn next_path(&mut self, suffix: Option<&str>) -> Result<PathBuf> {
        let suffix = suffix.ok_or_else(|| {
            PackError::invalid_config("step writes an artifact but has no suffix")
        })?;
        self.name = format!("{}.{}", self.name, suffix);
        Ok(self.config.work_dir.join(&self.name))
    }

    fn produced(&mut self, path: PathBuf) {
        if let Ok(meta) = fs::metadata(&path) {
            info!("{}: {}", path.display(), display_size(meta.len()));
        }
        self.artifacts.push(path.clone());
        self.current = path;
    }
}

pub trait Step {
    fn name(&self) -> &'static str;

    /// Suffix this step appends to the artifact name chain, if any
    fn suffix(&self, _config: &PackageConfig) -> Option<&'static str> {
        None
    }

    fn run(&mut self, ctx: &mut PackContext) -> Result<()>;
}

/// Binary patch of the source against the base image
pub struct Delta;

impl Step for Delta {
    fn name(&self) -> &'static str {
        "delta"
    }

    fn run(&mut self, ctx: &mut PackContext) -> Result<()> {
        let base = ctx
            .config
            .base_file
            .clone()
            .ok_or_else(|| PackError::invalid_config("delta type requires a base file"))?;
        if !base.is_file() {
            return Err(PackError::base_unreadable(&base, "not a file"));
        }

        let output = ctx
            .config
            .work_dir
            .join(format!("{}.patch", ctx.config.source_base_name()));
        let input = ctx.current.clone();
        let request = ToolRequest {
            input: &input,
            output: &output,
            base: Some(&base),
            key: None,
        };
        let patch = StageRunner::run(StageKind::Delta, ctx.tools.delta.as_mut(), &request)?;
        ctx.produced(patch);
        Ok(())
    }
}

pub struct Compress;

impl Step for Compress {
    fn name(&self) -> &'static str {
        "compress"
    }

    fn suffix(&self, config: &PackageConfig) -> Option<&'static str> {
        config.compression.suffix()
    }

    fn run(&mut self, ctx: &mut PackContext) -> Result<()> {
        let output = ctx.next_path(self.suffix(&ctx.config))?;
        let input = ctx.current.clone();
        let request = ToolRequest {
            input: &input,
            output: &output,
            base: None,
            key: None,
        };
        let compressed =
            StageRunner::run(StageKind::Compress, ctx.tools.compressor.as_mut(), &request)?;
        ctx.produced(compressed);
        Ok(())
    }
}

/// Prepend the OTA header to the payload
pub struct Pack;

impl Step for Pack {
    fn name(&self) -> &'static str {
        "pack"
    }

    fn suffix(&self, _config: &PackageConfig) -> Option<&'static str> {
        Some("packed")
    }

    fn run(&mut self, ctx: &mut PackContext) -> Result<()> {
        let payload = fs::read(&ctx.current).map_err(|e| PackError::io(&ctx.current, e))?;
        let header = Header::for_payload(&ctx.config, &payload)?;
        let header_bytes = header.encode()?;

        let mut image = Vec::with_capacity(header_bytes.len() + payload.len());
        image.extend_from_slice(&header_bytes);
        image.extend_from_slice(&payload);

        let output = ctx.next_path(self.suffix(&ctx.config))?;
        write_artifact(&output, &image).map_err(|e| PackError::io(&output, e))?;
        debug!("header:\n{}", header.summary());

        ctx.header = Some(header);
        ctx.produced(output);
        Ok(())
    }
}

pub struct Sign;

impl Step for Sign {
    fn name(&self) -> &'static str {
        "sign"
    }

    fn suffix(&self, _config: &PackageConfig) -> Option<&'static str> {
        Some("signed")
    }

    fn run(&mut self, ctx: &mut PackContext) -> Result<()> {
        let key = ctx
            .config
            .sign_key
            .clone()
            .ok_or_else(|| PackError::invalid_config("signing requires a key"))?;
        let output = ctx.next_path(self.suffix(&ctx.config))?;
        let input = ctx.current.clone();
        let request = ToolRequest {
            input: &input,
            output: &output,
            base: None,
            key: Some(&key),
        };
        let signed = StageRunner::run(StageKind::Sign, ctx.tools.signer.as_mut(), &request)?;
        ctx.produced(signed);
        Ok(())
    }
}

/// AES-128-ECB over the PKCS#7 padded artifact
pub struct Encrypt;

impl Encrypt {
    fn load_key(path: &Path) -> Result<[u8; crypto::AES128_KEY_SIZE]> {
        let material = fs::read(path).map_err(|e| {
            PackError::InvalidKeyMaterial(format!("cannot read {}: {}", path.display(), e))
        })?;
        debug!("key file {}: {} bytes", path.display(), material.len());
        crypto::derive_key(&material)
    }
}

impl Step for Encrypt {
    fn name(&self) -> &'static str {
        "encrypt"
    }

    fn suffix(&self, _config: &PackageConfig) -> Option<&'static str> {
        Some("encrypted")
    }

    fn run(&mut self, ctx: &mut PackContext) -> Result<()> {
        let key_path = ctx
            .config
            .encryption_key
            .clone()
            .ok_or_else(|| PackError::invalid_config("encryption requires a key"))?;
        let key = Self::load_key(&key_path)?;

        let plain = fs::read(&ctx.current).map_err(|e| PackError::io(&ctx.current, e))?;
        let encrypted = crypto::encrypt_artifact(&key, &plain)?;
        debug!(
            "encrypt: {} bytes padded to {}",
            plain.len(),
            encrypted.len()
        );

        let output = ctx.next_path(self.suffix(&ctx.config))?;
        write_artifact(&output, &encrypted).map_err(|e| {
            PackError::EncryptionFailed(format!("failed to write {}: {}", output.display(), e))
        })?;
        ctx.produced(output);
        Ok(())
    }
}

/// Outcome of a successful run
#[derive(Debug, Clone)]
pub struct PackReport {
    /// The artifact to ship
    pub output: PathBuf,
    /// Every produced file in order, ending with `output`
    pub artifacts: Vec<PathBuf>,
    pub header: Header,
    pub stages: Vec<&'static str>,
}

pub struct PackagingPipeline {
    ctx: PackContext,
    steps: Vec<Box<dyn Step>>,
}

impl PackagingPipeline {
    /// Validate `config` and plan the steps it calls for
    pub fn new(config: PackageConfig, tools: Toolbox) -> Result<Self> {
        config.validate()?;

        let mut steps: Vec<Box<dyn Step>> = vec![];
        if config.runs_delta() {
            steps.push(Box::new(Delta));
        }
        if config.compression.suffix().is_some() {
            steps.push(Box::new(Compress));
        }
        steps.push(Box::new(Pack));
        if config.sign_key.is_some() {
            steps.push(Box::new(Sign));
        }
        if config.runs_encryption() {
            steps.push(Box::new(Encrypt));
        }

        let ctx = PackContext {
            current: config.source_file.clone(),
            name: config.source_base_name(),
            config,
            tools,
            artifacts: vec![],
            header: None,
        };

        Ok(Self { ctx, steps })
    }

    /// Names of the planned steps, in execution order
    pub fn stages(&self) -> Vec<&'static str> {
        self.steps.iter().map(|s| s.name()).collect()
    }

    /// Path the final artifact will have
    pub fn planned_output(&self) -> PathBuf {
        let mut name = self.ctx.name.clone();
        for suffix in self.steps.iter().filter_map(|s| s.suffix(&self.ctx.config)) {
            name = format!("{name}.{suffix}");
        }
        self.ctx.config.work_dir.join(name)
    }

    pub fn run(mut self) -> Result<PackReport> {
        let source = &self.ctx.config.source_file;
        if !source.is_file() {
            return Err(PackError::io(
                source,
                std::io::Error::new(std::io::ErrorKind::NotFound, "source file not found"),
            ));
        }

        if self.ctx.config.encryption != crate::image_types::EncryptionType::None
            && self.ctx.config.encryption_key.is_none()
        {
            warn!(
                "encryption type {} requested without a key, header records none",
                self.ctx.config.encryption
            );
        }
        if self.ctx.config.encryption == crate::image_types::EncryptionType::None
            && self.ctx.config.encryption_key.is_some()
        {
            warn!("encryption key given with encryption type none, image is not encrypted");
        }

        recreate_dir(&self.ctx.config.work_dir)?;
        info!(
            "packing {} into {}",
            source.display(),
            self.ctx.config.work_dir.display()
        );

        let stages = self.stages();
        for step in &mut self.steps {
            debug!("step: {}", step.name());
            if let Err(err) = step.run(&mut self.ctx) {
                error!("{} step failed [{}]: {}", step.name(), err.kind(), err);
                return Err(err);
            }
        }

        let header = self
            .ctx
            .header
            .take()
            .ok_or_else(|| PackError::invalid_config("pipeline finished without a header"))?;

        Ok(PackReport {
            output: self.ctx.current,
            artifacts: self.ctx.artifacts,
            header,
            stages,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::image_types::{CompressionType, DeltaType, EncryptionType, HeaderVersion};

    #[test]
    fn test_plan_minimal() {
        let config = PackageConfig::new("build/app.bin")
            .compression(CompressionType::None)
            .work_dir("out");
        let pipeline = PackagingPipeline::new(config, Toolbox::default()).unwrap();
        assert_eq!(pipeline.stages(), ["pack"]);
        assert_eq!(pipeline.planned_output(), PathBuf::from("out/app.bin.packed"));
    }

    #[test]
    fn test_plan_full() {
        let config = PackageConfig::new("build/app.bin")
            .header_version(HeaderVersion::V2)
            .delta(DeltaType::BinaryDelta, "old.bin")
            .sign_key("sign.pem")
            .encryption(EncryptionType::Aes128)
            .encryption_key("aes.key")
            .work_dir("out");
        let pipeline = PackagingPipeline::new(config, Toolbox::default()).unwrap();
        assert_eq!(
            pipeline.stages(),
            ["delta", "compress", "pack", "sign", "encrypt"]
        );
        assert_eq!(
            pipeline.planned_output(),
            PathBuf::from("out/app.bin.xz.packed.signed.encrypted")
        );
    }

    #[test]
    fn test_plan_rejects_invalid_config() {
        let config = PackageConfig::new("app.bin").firmware_version("0123456789abcdef0123456789abcdef");
        assert!(matches!(
            PackagingPipeline::new(config, Toolbox::default()),
            Err(PackError::InvalidConfig(_))
        ));
    }
}
