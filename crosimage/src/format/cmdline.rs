// SPDX-FileCopyrightText: 2025 Andrew Gunnerson
// SPDX-License-Identifier: GPL-3.0-only

//! Kernel command lines embedded in kernel partitions.

use std::fmt;

use bstr::ByteSlice;
use memchr::memmem;

/// Minimum run length for [`printable_strings`], matching `strings(1)`.
pub const MIN_STRING_LEN: usize = 4;

/// A kernel command line, as a list of whitespace-separated arguments.
#[derive(Clone, PartialEq, Eq)]
pub struct KernelCmdline(String);

impl fmt::Debug for KernelCmdline {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(&self.0, f)
    }
}

impl fmt::Display for KernelCmdline {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl KernelCmdline {
    pub fn new(data: &[u8]) -> Self {
        Self(data.trim().to_str_lossy().into_owned())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Iterate over the arguments. Quoting is not supported.
    pub fn args(&self) -> impl Iterator<Item = &str> {
        self.0.split_ascii_whitespace()
    }

    /// Check if an argument named `key` is present, either bare (`key`) or
    /// with a value (`key=value`).
    pub fn has_arg(&self, key: &str) -> bool {
        self.args()
            .any(|a| a.split_once('=').map_or(a, |(k, _)| k) == key)
    }

    /// Best-effort extraction from raw partition data by looking for printable
    /// strings. The first string that looks like a recovery command line, one
    /// with both `root=` and `cros_recovery`, is returned.
    ///
    /// This can both miss the real command line and pick up unrelated text,
    /// so it should only be used when the config cannot be dumped properly.
    pub fn scan(data: &[u8]) -> Option<Self> {
        printable_strings(data, MIN_STRING_LEN)
            .find(|s| {
                memmem::find(s, b"root=").is_some() && memmem::find(s, b"cros_recovery").is_some()
            })
            .map(Self::new)
    }
}

/// Find runs of at least `min_len` printable ASCII characters (including tabs),
/// similar to `strings(1)`.
pub fn printable_strings(data: &[u8], min_len: usize) -> impl Iterator<Item = &[u8]> {
    let min_len = min_len.max(1);

    data.split(|b| !is_printable(*b))
        .filter(move |s| s.len() >= min_len)
}

fn is_printable(b: u8) -> bool {
    b == b'\t' || (b' '..=b'~').contains(&b)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn argument_lookup() {
        let cmdline = KernelCmdline::new(
            b"  cros_recovery root=/dev/dm-0 kern_b_hash=0123abcd dm_verity.dev_wait=1\n",
        );

        assert!(cmdline.has_arg("cros_recovery"));
        assert!(cmdline.has_arg("kern_b_hash"));
        assert!(cmdline.has_arg("root"));
        assert!(!cmdline.has_arg("kern_b"));
        assert!(!cmdline.has_arg("dm_verity"));
        assert_eq!(cmdline.args().count(), 4);
    }

    #[test]
    fn strings_scan() {
        let mut data = vec![0u8; 64];
        data.extend_from_slice(b"abc\0loglevel=7\x01\xff");
        data.extend_from_slice(b"root=/dev/sda3 cros_recovery kern_b_hash=ff\0");
        data.extend_from_slice(b"root=/dev/sda5 cros_recovery\0");

        assert_eq!(
            printable_strings(&data, MIN_STRING_LEN).collect::<Vec<_>>(),
            [
                &b"loglevel=7"[..],
                b"root=/dev/sda3 cros_recovery kern_b_hash=ff",
                b"root=/dev/sda5 cros_recovery",
            ],
        );

        let cmdline = KernelCmdline::scan(&data).unwrap();
        assert_eq!(cmdline.as_str(), "root=/dev/sda3 cros_recovery kern_b_hash=ff");
    }

    #[test]
    fn strings_scan_requires_both_markers() {
        assert_eq!(KernelCmdline::scan(b"\0root=/dev/sda3 quiet\0cros_recovery\0"), None);
    }
}
