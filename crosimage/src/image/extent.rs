// SPDX-FileCopyrightText: 2025 Andrew Gunnerson
// SPDX-License-Identifier: GPL-3.0-only

//! Streaming of raw sector ranges out of an image.

use std::{
    fs::File,
    io::{self, Write},
    path::{Path, PathBuf},
    sync::atomic::AtomicBool,
};

use thiserror::Error;
use tracing::{debug, warn};

use crate::{
    stream::{self, SectionReader},
    util::{NumBytes, SECTOR_SIZE},
};

/// Number of sectors that offsets and counts must both be multiples of for the
/// large block size to be used.
pub const ALIGNMENT: u64 = 4096;

#[derive(Debug, Error)]
pub enum Error {
    #[error("Failed to open image: {0:?}")]
    Open(PathBuf, #[source] io::Error),
    #[error("Extent is out of range: {0:?}")]
    OutOfRange(BlockLayout),
    #[error("Failed to seek to {offset:?} in image: {image:?}")]
    Seek {
        image: PathBuf,
        offset: NumBytes<u64>,
        #[source]
        source: io::Error,
    },
    #[error("Failed to copy extent from image: {0:?}")]
    Copy(PathBuf, #[source] io::Error),
}

type Result<T> = std::result::Result<T, Error>;

/// A `(block size, skip, count)` triple describing a byte range. The range
/// starts at `skip * block_size` and spans `count * block_size` bytes.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct BlockLayout {
    pub block_size: u64,
    pub skip: u64,
    pub count: u64,
}

impl BlockLayout {
    /// One sector per block.
    pub fn unoptimized(offset: u64, count: u64) -> Self {
        Self {
            block_size: SECTOR_SIZE,
            skip: offset,
            count,
        }
    }

    /// Like [`Self::unoptimized`], but if both `offset` and `count` are
    /// multiples of [`ALIGNMENT`] sectors, then [`ALIGNMENT`] sectors are
    /// moved per block instead. The described byte range is identical.
    pub fn aligned(offset: u64, count: u64) -> Self {
        if offset % ALIGNMENT == 0 && count % ALIGNMENT == 0 {
            Self {
                block_size: SECTOR_SIZE * ALIGNMENT,
                skip: offset / ALIGNMENT,
                count: count / ALIGNMENT,
            }
        } else {
            Self::unoptimized(offset, count)
        }
    }

    pub fn byte_offset(&self) -> Option<u64> {
        self.skip.checked_mul(self.block_size)
    }

    pub fn byte_len(&self) -> Option<u64> {
        self.count.checked_mul(self.block_size)
    }
}

/// Open `image` for reading only the bytes described by `layout`.
pub fn open_layout(image: &Path, layout: &BlockLayout) -> Result<SectionReader<File>> {
    let (offset, len) = layout
        .byte_offset()
        .zip(layout.byte_len())
        .ok_or(Error::OutOfRange(*layout))?;

    debug!(
        "Reading {:?} at {:?} from {image:?} using {layout:?}",
        NumBytes(len),
        NumBytes(offset),
    );

    let file = File::open(image).map_err(|e| Error::Open(image.to_owned(), e))?;

    SectionReader::new(file, offset, len).map_err(|e| Error::Seek {
        image: image.to_owned(),
        offset: NumBytes(offset),
        source: e,
    })
}

/// Write the bytes described by `layout` from `image` to `writer`. `inspect`
/// is called with the running byte total after every block.
///
/// If the image ends before the range does, the available bytes are written
/// and a warning is logged. Returns the number of bytes written.
pub fn dump_layout_inspect(
    image: &Path,
    layout: &BlockLayout,
    writer: impl Write,
    inspect: impl FnMut(u64),
    cancel_signal: &AtomicBool,
) -> Result<u64> {
    let len = layout.byte_len().ok_or(Error::OutOfRange(*layout))?;
    let reader = open_layout(image, layout)?;

    let copied = stream::copy_blocks_inspect(
        reader,
        writer,
        layout.block_size,
        layout.count,
        inspect,
        cancel_signal,
    )
    .map_err(|e| Error::Copy(image.to_owned(), e))?;

    if copied != len {
        warn!(
            "Image ended early: read {:?} of {:?} from {image:?}",
            NumBytes(copied),
            NumBytes(len),
        );
    }

    Ok(copied)
}

pub fn dump_layout(
    image: &Path,
    layout: &BlockLayout,
    writer: impl Write,
    cancel_signal: &AtomicBool,
) -> Result<u64> {
    dump_layout_inspect(image, layout, writer, |_| {}, cancel_signal)
}

/// Write `count` sectors starting at sector `offset` of `image` to `writer`.
/// Aligned extents are read in large blocks.
pub fn dump_extent_inspect(
    image: &Path,
    offset: u64,
    count: u64,
    writer: impl Write,
    inspect: impl FnMut(u64),
    cancel_signal: &AtomicBool,
) -> Result<u64> {
    let layout = BlockLayout::aligned(offset, count);

    dump_layout_inspect(image, &layout, writer, inspect, cancel_signal)
}

pub fn dump_extent(
    image: &Path,
    offset: u64,
    count: u64,
    writer: impl Write,
    cancel_signal: &AtomicBool,
) -> Result<u64> {
    dump_extent_inspect(image, offset, count, writer, |_| {}, cancel_signal)
}
