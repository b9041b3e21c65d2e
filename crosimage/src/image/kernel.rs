// SPDX-FileCopyrightText: 2025 Andrew Gunnerson
// SPDX-License-Identifier: GPL-3.0-only

//! Classification of kernel partitions by the boot mode they are signed for.

use std::{
    convert::Infallible,
    fmt,
    fs::{self, File},
    io,
    path::{Path, PathBuf},
};

use thiserror::Error;
use tracing::{debug, warn};

use crate::{
    format::{
        cmdline::KernelCmdline,
        keyblock::{HEADER_SIZE, KEY_BLOCK_MAGIC, KeyBlockFlags, KeyBlockHeader},
    },
    stream::ReadFullExt,
    tool::{Tool, ToolSet},
};

#[derive(Debug, Error)]
pub enum Error {
    #[error("Failed to open kernel: {0:?}")]
    Open(PathBuf, #[source] io::Error),
    #[error("Failed to read kernel: {0:?}")]
    Read(PathBuf, #[source] io::Error),
}

type Result<T> = std::result::Result<T, Error>;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum BootType {
    /// Not a signed kernel.
    Invalid,
    /// Normal boot from internal storage.
    Ssd,
    /// Recovery image kernel.
    Recovery,
    /// Recovery-mode kernel for booting from removable media.
    Usb,
    /// Factory install shim.
    FactoryInstall,
    /// Signed for neither normal nor recovery boot.
    Unknown,
}

impl fmt::Display for BootType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Invalid => "invalid",
            Self::Ssd => "ssd",
            Self::Recovery => "recovery",
            Self::Usb => "usb",
            Self::FactoryInstall => "factory_install",
            Self::Unknown => "unknown",
        };

        f.write_str(s)
    }
}

/// Classify a kernel from its key block header. `cmdline` is only called for
/// recovery kernels that are valid with the developer switch on, which need
/// the embedded kernel command line to tell recovery and USB kernels apart.
pub fn classify<E>(
    header: &KeyBlockHeader,
    cmdline: impl FnOnce() -> std::result::Result<Option<KernelCmdline>, E>,
) -> std::result::Result<BootType, E> {
    if !header.has_valid_magic() {
        return Ok(BootType::Invalid);
    }

    let flags = header.flags;

    if flags.contains(KeyBlockFlags::RECOVERY_0) {
        return Ok(BootType::Ssd);
    } else if !flags.contains(KeyBlockFlags::RECOVERY_1) {
        return Ok(BootType::Unknown);
    }

    let developer = flags & (KeyBlockFlags::DEVELOPER_0 | KeyBlockFlags::DEVELOPER_1);
    if developer == KeyBlockFlags::DEVELOPER_0 {
        return Ok(BootType::FactoryInstall);
    }

    let boot_type = match cmdline()? {
        Some(c) if c.has_arg("cros_recovery") && c.has_arg("kern_b_hash") => BootType::Recovery,
        Some(c) => {
            debug!("Command line is not a recovery image's: {c:?}");
            BootType::Usb
        }
        None => {
            debug!("No kernel command line found");
            BootType::Usb
        }
    };

    Ok(boot_type)
}

/// [`classify`] for when the command line is already known or not needed.
pub fn classify_with_cmdline(header: &KeyBlockHeader, cmdline: Option<&KernelCmdline>) -> BootType {
    let result = classify::<Infallible>(header, || Ok(cmdline.cloned()));

    match result {
        Ok(t) => t,
        Err(e) => match e {},
    }
}

/// Decode the key block header from the start of `data`. Data too short to
/// hold the magic yields [`None`]. Anything longer is zero padded, so a
/// truncated header can still be classified by its magic.
pub fn parse_header(data: &[u8]) -> Option<KeyBlockHeader> {
    if data.len() < KEY_BLOCK_MAGIC.len() {
        return None;
    }

    let mut buf = [0u8; HEADER_SIZE];
    let n = data.len().min(HEADER_SIZE);
    buf[..n].copy_from_slice(&data[..n]);

    KeyBlockHeader::from_bytes(&buf)
}

/// Extract the kernel command line from a kernel partition image.
/// `dump_kernel_config` is used when available. Otherwise, or if it fails, the
/// partition is scanned for printable strings, which is only best-effort.
pub fn kernel_cmdline(tools: &ToolSet, path: &Path) -> Result<Option<KernelCmdline>> {
    if tools.has(Tool::DumpKernelConfig) {
        let result = tools
            .command(Tool::DumpKernelConfig)
            .and_then(|mut c| tools.run(c.arg(path)));

        match result {
            Ok(stdout) => return Ok(Some(KernelCmdline::new(&stdout))),
            Err(e) => warn!("Falling back to string scan: {e}"),
        }
    } else {
        debug!("{} not found; scanning for printable strings", Tool::DumpKernelConfig);
    }

    let data = fs::read(path).map_err(|e| Error::Read(path.to_owned(), e))?;

    Ok(KernelCmdline::scan(&data))
}

/// Classify the kernel partition image at `path`.
pub fn classify_file(tools: &ToolSet, path: &Path) -> Result<BootType> {
    let mut file = File::open(path).map_err(|e| Error::Open(path.to_owned(), e))?;

    let mut buf = [0u8; HEADER_SIZE];
    let n = file
        .read_full(&mut buf)
        .map_err(|e| Error::Read(path.to_owned(), e))?;

    let Some(header) = parse_header(&buf[..n]) else {
        debug!("Kernel is too short to contain a key block: {path:?}");
        return Ok(BootType::Invalid);
    };

    debug!("Key block header: {header:?}");

    classify(&header, || kernel_cmdline(tools, path))
}
