// SPDX-FileCopyrightText: 2025 Andrew Gunnerson
// SPDX-License-Identifier: GPL-3.0-only

use std::{
    env, fs, io,
    path::{Path, PathBuf},
};

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Environment variable consulted when no config file is passed explicitly.
pub const CONFIG_ENV_VAR: &str = "CROSIMAGE_CONFIG";

#[derive(Debug, Error)]
pub enum Error {
    #[error("Failed to read config: {0:?}")]
    Read(PathBuf, #[source] io::Error),
    #[error("Failed to parse config: {0:?}")]
    Parse(PathBuf, #[source] toml_edit::de::Error),
}

type Result<T> = std::result::Result<T, Error>;

/// Names (or paths) of the external programs that are invoked.
#[derive(Clone, Debug, PartialEq, Eq, Deserialize, Serialize)]
#[serde(default, deny_unknown_fields)]
pub struct ToolNames {
    pub cgpt: String,
    pub parted: String,
    pub losetup: String,
    pub mount: String,
    pub umount: String,
    pub dump_kernel_config: String,
}

impl Default for ToolNames {
    fn default() -> Self {
        Self {
            cgpt: "cgpt".into(),
            parted: "parted".into(),
            losetup: "losetup".into(),
            mount: "mount".into(),
            umount: "umount".into(),
            dump_kernel_config: "dump_kernel_config".into(),
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Deserialize, Serialize)]
#[serde(default, deny_unknown_fields)]
pub struct Config {
    /// Command prefix for operations that need elevated privileges (loop
    /// devices and mounts). An empty list runs them directly.
    pub privilege_helper: Vec<String>,
    /// Directories searched for tools before `PATH`.
    pub tool_dirs: Vec<PathBuf>,
    /// Whether to report progress while streaming extents.
    pub progress: bool,
    pub tools: ToolNames,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            privilege_helper: vec!["sudo".into()],
            tool_dirs: vec![],
            progress: false,
            tools: ToolNames::default(),
        }
    }
}

impl Config {
    pub fn parse(data: &str, path: &Path) -> Result<Self> {
        toml_edit::de::from_str(data).map_err(|e| Error::Parse(path.to_owned(), e))
    }

    pub fn from_file(path: &Path) -> Result<Self> {
        let data = fs::read_to_string(path).map_err(|e| Error::Read(path.to_owned(), e))?;

        Self::parse(&data, path)
    }

    /// Load the config from `path`, falling back to [`CONFIG_ENV_VAR`] and
    /// then to the built-in defaults.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        if let Some(p) = path {
            return Self::from_file(p);
        }

        match env::var_os(CONFIG_ENV_VAR) {
            Some(p) if !p.is_empty() => Self::from_file(Path::new(&p)),
            _ => Ok(Self::default()),
        }
    }
}
