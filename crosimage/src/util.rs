// SPDX-FileCopyrightText: 2023-2025 Andrew Gunnerson
// SPDX-License-Identifier: GPL-3.0-only

use std::{fmt, path::Path, process::Command};

use num_traits::PrimInt;

/// Size of a disk sector. All partition offsets and sizes reported by the
/// partitioning tools are in units of this size.
pub const SECTOR_SIZE: u64 = 512;

/// A small wrapper to format a number as a size in bytes.
#[derive(Clone, Copy)]
pub struct NumBytes<T: PrimInt>(pub T);

impl<T: PrimInt + fmt::Debug> fmt::Debug for NumBytes<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.0 == T::one() {
            write!(f, "<{:?} byte>", self.0)
        } else {
            write!(f, "<{:?} bytes>", self.0)
        }
    }
}

/// A small wrapper to format a number as a count of sectors.
#[derive(Clone, Copy)]
pub struct NumSectors(pub u64);

impl fmt::Debug for NumSectors {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.0 == 1 {
            write!(f, "<1 sector>")
        } else {
            write!(f, "<{} sectors>", self.0)
        }
    }
}

/// Convert a sector count to a byte count. Returns [`None`] on overflow.
pub fn sectors_to_bytes(sectors: u64) -> Option<u64> {
    sectors.checked_mul(SECTOR_SIZE)
}

/// Get the non-empty parent of a path. If the path has no parent in the string,
/// then `.` is returned. This does not perform any filesystem operations.
pub fn parent_path(path: &Path) -> &Path {
    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() {
            return parent;
        }
    }

    Path::new(".")
}

/// A wrapper around a string that is formatted with [`fmt::Debug`] and
/// [`fmt::Display`] as-is. Used for showing commands in error messages.
#[derive(Clone, PartialEq, Eq)]
pub struct DebugString(String);

impl DebugString {
    /// Render a command as a shell-like string. This is not a precise
    /// conversion, but sufficient for logging.
    pub fn from_command(command: &Command) -> Self {
        let mut s = command.get_program().to_string_lossy().into_owned();

        for arg in command.get_args() {
            s.push(' ');
            s.push_str(&arg.to_string_lossy());
        }

        Self(s)
    }
}

impl fmt::Debug for DebugString {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl fmt::Display for DebugString {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parent_of_bare_file_name() {
        assert_eq!(parent_path(Path::new("chromiumos_image.bin")), Path::new("."));
        assert_eq!(parent_path(Path::new("out/image.bin")), Path::new("out"));
        assert_eq!(parent_path(Path::new("/image.bin")), Path::new("/"));
    }

    #[test]
    fn sector_conversion() {
        assert_eq!(sectors_to_bytes(4096), Some(2 * 1024 * 1024));
        assert_eq!(sectors_to_bytes(u64::MAX), None);
    }

    #[test]
    fn command_rendering() {
        let mut command = Command::new("losetup");
        command.args(["--show", "-f", "disk.bin"]);

        assert_eq!(
            DebugString::from_command(&command).to_string(),
            "losetup --show -f disk.bin",
        );
    }

    #[test]
    fn size_formatting() {
        assert_eq!(format!("{:?}", NumBytes(1u64)), "<1 byte>");
        assert_eq!(format!("{:?}", NumBytes(512u64)), "<512 bytes>");
        assert_eq!(format!("{:?}", NumSectors(8)), "<8 sectors>");
    }
}
