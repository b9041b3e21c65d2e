// SPDX-FileCopyrightText: 2025 Andrew Gunnerson
// SPDX-License-Identifier: GPL-3.0-only

//! Parser for the key block that prefaces a verified boot kernel partition.
//! Only the fixed-size prefix is decoded. The embedded public key and the
//! signatures are never parsed or verified.

use std::{
    fmt,
    io::{self, Read},
    mem,
};

use bitflags::bitflags;
use bstr::ByteSlice;
use thiserror::Error;
use zerocopy::{FromBytes, little_endian};
use zerocopy_derive::{FromBytes, Immutable, IntoBytes, KnownLayout, Unaligned};

use crate::stream::FromReader;

pub const KEY_BLOCK_MAGIC: [u8; 8] = *b"CHROMEOS";

/// Offset of [`RawKeyBlockHeader::key_block_flags`] from the start of the
/// partition.
pub const FLAGS_OFFSET: usize = 72;

/// Number of bytes needed to decode a [`KeyBlockHeader`].
pub const HEADER_SIZE: usize = mem::size_of::<RawKeyBlockHeader>();

#[derive(Debug, Error)]
pub enum Error {
    #[error("Failed to read key block data: {0}")]
    DataRead(&'static str, #[source] io::Error),
}

type Result<T> = std::result::Result<T, Error>;

bitflags! {
    /// Boot modes that a kernel key block is valid for.
    #[repr(transparent)]
    #[derive(Clone, Copy, Debug, PartialEq, Eq)]
    pub struct KeyBlockFlags: u64 {
        /// Valid when the developer switch is off.
        const DEVELOPER_0 = 1 << 0;
        /// Valid when the developer switch is on.
        const DEVELOPER_1 = 1 << 1;
        /// Valid when not booting in recovery mode.
        const RECOVERY_0 = 1 << 2;
        /// Valid when booting in recovery mode.
        const RECOVERY_1 = 1 << 3;

        const _ = !0;
    }
}

/// Raw on-disk layout for a signature or checksum descriptor.
#[derive(Clone, Copy, FromBytes, IntoBytes, KnownLayout, Immutable, Unaligned)]
#[repr(C, packed)]
struct RawSignature {
    /// Offset of the signature data, relative to the start of this struct.
    sig_offset: little_endian::U64,
    sig_size: little_endian::U64,
    /// Number of bytes of data covered by the signature.
    data_size: little_endian::U64,
}

/// Raw on-disk layout for the fixed part of the key block header.
#[derive(Clone, Copy, FromBytes, IntoBytes, KnownLayout, Immutable, Unaligned)]
#[repr(C, packed)]
struct RawKeyBlockHeader {
    /// Magic value. This should be equal to [`KEY_BLOCK_MAGIC`].
    magic: [u8; 8],
    header_version_major: little_endian::U32,
    header_version_minor: little_endian::U32,
    /// Size of the key block, including the data key and signatures.
    key_block_size: little_endian::U64,
    key_block_signature: RawSignature,
    key_block_checksum: RawSignature,
    /// Raw [`KeyBlockFlags`].
    key_block_flags: little_endian::U64,
}

const _: () = assert!(mem::offset_of!(RawKeyBlockHeader, key_block_flags) == FLAGS_OFFSET);
const _: () = assert!(HEADER_SIZE == 80);

impl fmt::Debug for RawKeyBlockHeader {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RawKeyBlockHeader")
            .field("magic", &self.magic.as_bstr())
            .field("header_version_major", &self.header_version_major.get())
            .field("header_version_minor", &self.header_version_minor.get())
            .field("key_block_size", &self.key_block_size.get())
            .field("key_block_flags", &self.key_block_flags.get())
            .finish_non_exhaustive()
    }
}

#[derive(Clone, Copy, PartialEq, Eq)]
pub struct KeyBlockHeader {
    pub magic: [u8; 8],
    pub version_major: u32,
    pub version_minor: u32,
    pub key_block_size: u64,
    pub flags: KeyBlockFlags,
}

impl fmt::Debug for KeyBlockHeader {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("KeyBlockHeader")
            .field("magic", &self.magic.as_bstr())
            .field("version_major", &self.version_major)
            .field("version_minor", &self.version_minor)
            .field("key_block_size", &self.key_block_size)
            .field("flags", &self.flags)
            .finish()
    }
}

impl KeyBlockHeader {
    /// Whether the magic matches. Any other field is meaningless if this is
    /// false.
    pub fn has_valid_magic(&self) -> bool {
        self.magic == KEY_BLOCK_MAGIC
    }

    /// Decode a header from the first [`HEADER_SIZE`] bytes of `data`. Returns
    /// [`None`] if `data` is too short.
    pub fn from_bytes(data: &[u8]) -> Option<Self> {
        let (raw, _) = RawKeyBlockHeader::read_from_prefix(data).ok()?;
        Some(raw.into())
    }
}

impl From<RawKeyBlockHeader> for KeyBlockHeader {
    fn from(raw: RawKeyBlockHeader) -> Self {
        Self {
            magic: raw.magic,
            version_major: raw.header_version_major.get(),
            version_minor: raw.header_version_minor.get(),
            key_block_size: raw.key_block_size.get(),
            flags: KeyBlockFlags::from_bits_retain(raw.key_block_flags.get()),
        }
    }
}

impl<R: Read> FromReader<R> for KeyBlockHeader {
    type Error = Error;

    fn from_reader(mut reader: R) -> Result<Self> {
        let raw = RawKeyBlockHeader::read_from_io(&mut reader)
            .map_err(|e| Error::DataRead("KeyBlock::header", e))?;

        Ok(raw.into())
    }
}
