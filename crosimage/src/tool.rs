// SPDX-FileCopyrightText: 2025 Andrew Gunnerson
// SPDX-License-Identifier: GPL-3.0-only

//! Discovery and execution of the external programs that the image routines
//! delegate to (partition table inspection, loop devices, and mounting).

use std::{
    fmt, io,
    path::{Path, PathBuf},
    process::{Command, ExitStatus, Output, Stdio},
    sync::Arc,
};

use bstr::ByteSlice;
use thiserror::Error;
use tracing::{debug, trace};

use crate::{config::Config, util::DebugString};

#[derive(Debug, Error)]
pub enum Error {
    #[error("Tool not found: {0}")]
    NotFound(String),
    #[error("Failed to spawn command: {0}")]
    CommandSpawn(DebugString, #[source] io::Error),
    #[error("Command failed with {status}: {command}: {stderr}")]
    CommandFailed {
        command: DebugString,
        status: ExitStatus,
        stderr: String,
    },
}

type Result<T> = std::result::Result<T, Error>;

/// External programs known to this crate. The actual program names come from
/// [`crate::config::ToolNames`].
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Tool {
    Cgpt,
    Parted,
    Losetup,
    Mount,
    Umount,
    DumpKernelConfig,
}

impl fmt::Display for Tool {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Cgpt => "cgpt",
            Self::Parted => "parted",
            Self::Losetup => "losetup",
            Self::Mount => "mount",
            Self::Umount => "umount",
            Self::DumpKernelConfig => "dump_kernel_config",
        };

        f.write_str(s)
    }
}

/// Process execution seam. [`SystemRunner`] runs real programs, but anything
/// that needs to observe or fake command invocations can implement this.
pub trait CommandRunner: Send + Sync {
    /// Locate an executable, searching `dirs` before `PATH`.
    fn find(&self, name: &str, dirs: &[PathBuf]) -> Option<PathBuf>;

    /// Run a command to completion, capturing stdout and stderr.
    fn output(&self, command: &mut Command) -> io::Result<Output>;
}

/// [`CommandRunner`] that spawns real processes.
#[derive(Clone, Copy, Debug, Default)]
pub struct SystemRunner;

impl CommandRunner for SystemRunner {
    fn find(&self, name: &str, dirs: &[PathBuf]) -> Option<PathBuf> {
        dirs.iter()
            .find_map(|d| which::which_in(name, Some(d), d).ok())
            .or_else(|| which::which(name).ok())
    }

    fn output(&self, command: &mut Command) -> io::Result<Output> {
        command
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .output()
    }
}

/// Resolves [`Tool`]s according to the config and runs them through a
/// [`CommandRunner`].
#[derive(Clone)]
pub struct ToolSet {
    config: Config,
    runner: Arc<dyn CommandRunner>,
}

impl fmt::Debug for ToolSet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ToolSet")
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

impl ToolSet {
    pub fn new(config: Config, runner: Arc<dyn CommandRunner>) -> Self {
        Self { config, runner }
    }

    pub fn system(config: Config) -> Self {
        Self::new(config, Arc::new(SystemRunner))
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    fn name(&self, tool: Tool) -> &str {
        let names = &self.config.tools;

        match tool {
            Tool::Cgpt => &names.cgpt,
            Tool::Parted => &names.parted,
            Tool::Losetup => &names.losetup,
            Tool::Mount => &names.mount,
            Tool::Umount => &names.umount,
            Tool::DumpKernelConfig => &names.dump_kernel_config,
        }
    }

    /// Find the executable for a tool. Directories from the config take
    /// priority over `PATH`.
    pub fn find(&self, tool: Tool) -> Option<PathBuf> {
        let path = self.runner.find(self.name(tool), &self.config.tool_dirs);
        trace!("Resolved {tool} to {path:?}");
        path
    }

    pub fn has(&self, tool: Tool) -> bool {
        self.find(tool).is_some()
    }

    /// Create a command for an unprivileged tool.
    pub fn command(&self, tool: Tool) -> Result<Command> {
        let path = self
            .find(tool)
            .ok_or_else(|| Error::NotFound(self.name(tool).to_owned()))?;

        Ok(Command::new(path))
    }

    /// Create a command for a tool that needs elevated privileges. The tool is
    /// wrapped in the configured privilege helper, if any.
    pub fn privileged_command(&self, tool: Tool) -> Result<Command> {
        let path = self
            .find(tool)
            .ok_or_else(|| Error::NotFound(self.name(tool).to_owned()))?;

        Ok(self.wrap_privileged(&path))
    }

    fn wrap_privileged(&self, program: &Path) -> Command {
        match self.config.privilege_helper.split_first() {
            Some((helper, helper_args)) => {
                let mut command = Command::new(helper);
                command.args(helper_args);
                command.arg(program);
                command
            }
            None => Command::new(program),
        }
    }

    /// Run a command without checking its exit status.
    pub fn run_unchecked(&self, command: &mut Command) -> Result<Output> {
        let command_str = DebugString::from_command(command);
        debug!("Running: {command_str}");

        self.runner
            .output(command)
            .map_err(|e| Error::CommandSpawn(command_str, e))
    }

    /// Run a command and return its stdout. A non-zero exit status is an
    /// error.
    pub fn run(&self, command: &mut Command) -> Result<Vec<u8>> {
        let output = self.run_unchecked(command)?;

        if !output.status.success() {
            return Err(Error::CommandFailed {
                command: DebugString::from_command(command),
                status: output.status,
                stderr: output.stderr.trim().to_str_lossy().into_owned(),
            });
        }

        Ok(output.stdout)
    }
}
