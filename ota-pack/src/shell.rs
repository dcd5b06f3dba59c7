use std::{
    ffi::{OsStr, OsString},
    path::{Path, PathBuf},
    process::{Command, Stdio},
};

use anyhow::{Result, anyhow, bail};
use colored::Colorize;

use crate::config::ToolCommand;
use crate::stage::{ExternalTool, ToolRequest};

#[cfg(target_os = "macos")]
const LIBRARY_PATH_VAR: &str = "DYLD_LIBRARY_PATH";
#[cfg(windows)]
const LIBRARY_PATH_VAR: &str = "PATH";
#[cfg(not(any(target_os = "macos", windows)))]
const LIBRARY_PATH_VAR: &str = "LD_LIBRARY_PATH";

pub trait Shell {
    fn exec(&mut self, print_cmd: bool) -> Result<()>;
}

impl Shell for Command {
    fn exec(&mut self, print_cmd: bool) -> Result<()> {
        if print_cmd {
            let mut cmd_str = self.get_program().to_string_lossy().to_string();

            for arg in self.get_args() {
                cmd_str += " ";
                cmd_str += arg.to_string_lossy().as_ref();
            }

            println!("{}", cmd_str.purple().bold());
        }

        let status = self
            .stdin(Stdio::null())
            .stdout(Stdio::inherit())
            .stderr(Stdio::inherit())
            .status()
            .map_err(|e| anyhow!("failed to start {:?}: {e}", self.get_program()))?;

        if !status.success() {
            bail!("{:?} failed with status: {status}", self.get_program());
        }

        Ok(())
    }
}

/// An external program driven by a [`ToolCommand`] template
///
/// The library search path and any extra variables go to the child process
/// only; the packer never touches its own environment.
#[derive(Debug, Clone)]
pub struct CommandTool {
    name: String,
    command: ToolCommand,
    print_cmd: bool,
}

impl CommandTool {
    pub fn new(name: impl Into<String>, command: ToolCommand) -> Self {
        Self {
            name: name.into(),
            command,
            print_cmd: true,
        }
    }

    pub fn print_cmd(mut self, print_cmd: bool) -> Self {
        self.print_cmd = print_cmd;
        self
    }

    fn value_replace_with_var(&self, value: &str, request: &ToolRequest<'_>) -> Result<OsString> {
        let mut out = value.to_string();
        let vars: [(&str, Option<&Path>); 4] = [
            ("${input}", Some(request.input)),
            ("${output}", Some(request.output)),
            ("${base}", request.base),
            ("${key}", request.key),
        ];

        for (var, path) in vars {
            if !out.contains(var) {
                continue;
            }
            let path = path.ok_or_else(|| {
                anyhow!("{} argument '{}' needs {} but none was given", self.name, value, var)
            })?;
            out = out.replace(var, &path.display().to_string());
        }

        Ok(out.into())
    }

    /// Build the process for one request without running it
    pub fn command(&self, request: &ToolRequest<'_>) -> Result<Command> {
        let mut cmd = Command::new(&self.command.program);

        if let Some(dir) = &self.command.workdir {
            cmd.current_dir(dir);
        }

        for arg in &self.command.args {
            cmd.arg(self.value_replace_with_var(arg, request)?);
        }

        for (key, value) in &self.command.env {
            cmd.env(key, value);
        }

        if let Some(lib_dir) = &self.command.lib_dir {
            cmd.env(LIBRARY_PATH_VAR, library_path(lib_dir)?);
        }

        Ok(cmd)
    }
}

/// `lib_dir` prepended to the search path inherited from the parent
fn library_path(lib_dir: &Path) -> Result<OsString> {
    let mut paths: Vec<PathBuf> = vec![lib_dir.to_path_buf()];
    if let Some(existing) = std::env::var_os(LIBRARY_PATH_VAR) {
        paths.extend(std::env::split_paths(&existing));
    }
    Ok(std::env::join_paths(paths)?)
}

impl ExternalTool for CommandTool {
    fn name(&self) -> &str {
        &self.name
    }

    fn run(&mut self, request: &ToolRequest<'_>) -> Result<()> {
        let mut cmd = self.command(request)?;
        debug!(
            "{}: {:?} {:?}",
            self.name,
            cmd.get_program(),
            cmd.get_args().collect::<Vec<&OsStr>>()
        );
        cmd.exec(self.print_cmd)
    }
}
