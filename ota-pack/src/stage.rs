//! External transforms and the runner that drives them
//!
//! Delta generation, compression and signing are opaque to the packer. Each
//! is an [`ExternalTool`] that turns an input file into an output file. The
//! [`StageRunner`] runs one of them for a named stage and turns any failure
//! into that stage's error.

use std::fs;
use std::path::{Path, PathBuf};

use anyhow::anyhow;

use crate::compression::CompressionInterface;
use crate::config::ToolCommands;
use crate::error::{PackError, Result};
use crate::shell::CommandTool;

/// Files handed to an external tool
#[derive(Debug, Clone, Copy)]
pub struct ToolRequest<'a> {
    pub input: &'a Path,
    pub output: &'a Path,
    /// Base image for delta generation
    pub base: Option<&'a Path>,
    /// Signing key
    pub key: Option<&'a Path>,
}

/// A transform invoked as a unit: read `input`, write `output`
pub trait ExternalTool {
    fn name(&self) -> &str;

    fn run(&mut self, request: &ToolRequest<'_>) -> anyhow::Result<()>;
}

/// Pipeline stages backed by an external tool
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StageKind {
    Delta,
    Compress,
    Sign,
}

impl StageKind {
    pub fn name(self) -> &'static str {
        match self {
            Self::Delta => "delta",
            Self::Compress => "compress",
            Self::Sign => "sign",
        }
    }

    fn fail(self, err: anyhow::Error) -> PackError {
        match self {
            Self::Delta => PackError::DeltaGenerationFailed(err),
            Self::Compress => PackError::CompressionFailed(err),
            Self::Sign => PackError::SigningFailed(err),
        }
    }
}

/// Runs one external transform and checks its contract
///
/// There are no retries. The tools are deterministic, so running one again on
/// the same input cannot change the outcome.
pub struct StageRunner;

impl StageRunner {
    pub fn run(
        kind: StageKind,
        tool: &mut dyn ExternalTool,
        request: &ToolRequest<'_>,
    ) -> Result<PathBuf> {
        let output = request.output;
        info!(
            "{} stage: {} -> {} ({})",
            kind.name(),
            request.input.display(),
            output.display(),
            tool.name()
        );

        if output.exists() {
            fs::remove_file(output).map_err(|e| PackError::io(output, e))?;
        }

        let result = tool.run(request).and_then(|()| {
            if output.is_file() {
                Ok(())
            } else {
                Err(anyhow!(
                    "{} exited successfully but wrote no {}",
                    tool.name(),
                    output.display()
                ))
            }
        });

        match result {
            Ok(()) => Ok(output.to_path_buf()),
            Err(err) => {
                if output.exists() {
                    // A partial output must never feed the next stage.
                    let _ = fs::remove_file(output);
                }
                error!("{} stage failed: {:#}", kind.name(), err);
                Err(kind.fail(err))
            }
        }
    }
}

/// In-process compressor exposed through the [`ExternalTool`] seam
pub struct CompressorTool {
    inner: Box<dyn CompressionInterface>,
}

impl CompressorTool {
    pub fn new(inner: Box<dyn CompressionInterface>) -> Self {
        Self { inner }
    }
}

impl ExternalTool for CompressorTool {
    fn name(&self) -> &str {
        self.inner.get_name()
    }

    fn run(&mut self, request: &ToolRequest<'_>) -> anyhow::Result<()> {
        let data = fs::read(request.input)
            .map_err(|e| anyhow!("failed to read {}: {e}", request.input.display()))?;
        let compressed = self.inner.compress(&data)?;
        crate::utils::write_durable(request.output, &compressed)?;
        debug!(
            "{}: {} -> {} bytes",
            self.inner.get_name(),
            data.len(),
            compressed.len()
        );
        Ok(())
    }
}

/// The external tools one pipeline run may call
pub struct Toolbox {
    pub delta: Box<dyn ExternalTool>,
    pub compressor: Box<dyn ExternalTool>,
    pub signer: Box<dyn ExternalTool>,
}

impl Toolbox {
    /// Process-backed delta and signing tools, in-process xz compression
    pub fn from_commands(commands: &ToolCommands, print_cmd: bool) -> Self {
        Self {
            delta: Box::new(
                CommandTool::new("delta", commands.delta.clone()).print_cmd(print_cmd),
            ),
            compressor: Box::new(CompressorTool::new(Box::new(
                crate::compression::XzCompressor::default(),
            ))),
            signer: Box::new(CommandTool::new("sign", commands.sign.clone()).print_cmd(print_cmd)),
        }
    }
}

impl Default for Toolbox {
    fn default() -> Self {
        Self::from_commands(&ToolCommands::default(), true)
    }
}
