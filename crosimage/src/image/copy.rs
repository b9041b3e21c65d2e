// SPDX-FileCopyrightText: 2025 Andrew Gunnerson
// SPDX-License-Identifier: GPL-3.0-only

//! In-place copying of a partition's contents into another partition slot.

use std::{
    fs::{File, OpenOptions},
    io::{self, Seek, SeekFrom, Write},
    path::{Path, PathBuf},
    sync::atomic::AtomicBool,
};

use thiserror::Error;
use tracing::{debug, info, warn};

use crate::{
    image::{
        extent::{self, BlockLayout},
        locate::{self, Locator},
    },
    stream,
    util::{NumBytes, NumSectors},
};

#[derive(Debug, Error)]
pub enum Error {
    #[error("Failed to locate partition")]
    Locate(#[from] locate::Error),
    #[error("Destination partition is too small: {src_sectors:?} > {dst_sectors:?}")]
    DestinationTooSmall {
        src_sectors: NumSectors,
        dst_sectors: NumSectors,
    },
    #[error("Destination offset is out of range: {0:?}")]
    OutOfRange(BlockLayout),
    #[error("Failed to read source partition")]
    Source(#[from] extent::Error),
    #[error("Failed to open destination image: {0:?}")]
    DestinationOpen(PathBuf, #[source] io::Error),
    #[error("Failed to seek to {1:?} in destination image: {0:?}")]
    DestinationSeek(PathBuf, NumBytes<u64>, #[source] io::Error),
    #[error("Failed to copy partition data into: {0:?}")]
    Copy(PathBuf, #[source] io::Error),
}

type Result<T> = std::result::Result<T, Error>;

/// Writer that forces file data to disk after every write, like opening the
/// file with `O_SYNC`.
struct SyncWriter<'a>(&'a File);

impl Write for SyncWriter<'_> {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        let n = self.0.write(buf)?;
        self.0.sync_data()?;
        Ok(n)
    }

    fn flush(&mut self) -> io::Result<()> {
        self.0.sync_data()
    }
}

/// Copy partition `src_part` of `src_image` over the start of partition
/// `dst_part` of `dst_image`. `inspect` is called with the running byte
/// total. Returns the number of bytes written.
///
/// Both partitions are resolved before either image is opened. Nothing is
/// written if the source is larger than the destination. Bytes in the
/// destination partition past the end of the source are left untouched and
/// the destination image is never truncated.
pub fn copy_partition_inspect(
    locator: &Locator,
    src_image: &Path,
    src_part: u32,
    dst_image: &Path,
    dst_part: u32,
    inspect: impl FnMut(u64),
    cancel_signal: &AtomicBool,
) -> Result<u64> {
    let src = locator.geometry(src_image, src_part)?;
    let dst = locator.geometry(dst_image, dst_part)?;

    if src.size > dst.size {
        return Err(Error::DestinationTooSmall {
            src_sectors: NumSectors(src.size),
            dst_sectors: NumSectors(dst.size),
        });
    }

    let src_layout = BlockLayout::aligned(src.offset, src.size);

    // The destination block size only considers the destination offset and
    // the source length. The source offset can be unaligned while both of
    // those are aligned. The output is still correct because the source is
    // read through its own layout and only the write side uses this one.
    let dst_layout = BlockLayout::aligned(dst.offset, src.size);
    let dst_offset = dst_layout
        .byte_offset()
        .ok_or(Error::OutOfRange(dst_layout))?;

    debug!(
        "Copying {src_image:?}#{src_part} ({src_layout:?}) \
        to {dst_image:?}#{dst_part} ({dst_layout:?})"
    );

    let reader = extent::open_layout(src_image, &src_layout)?;

    let file = OpenOptions::new()
        .write(true)
        .open(dst_image)
        .map_err(|e| Error::DestinationOpen(dst_image.to_owned(), e))?;
    (&file)
        .seek(SeekFrom::Start(dst_offset))
        .map_err(|e| Error::DestinationSeek(dst_image.to_owned(), NumBytes(dst_offset), e))?;

    let mut writer = SyncWriter(&file);
    let copied = stream::copy_blocks_inspect(
        reader,
        &mut writer,
        dst_layout.block_size,
        dst_layout.count,
        inspect,
        cancel_signal,
    )
    .and_then(|n| writer.flush().map(|_| n))
    .map_err(|e| Error::Copy(dst_image.to_owned(), e))?;

    if dst_layout.byte_len() != Some(copied) {
        warn!(
            "Source image ended early: copied {:?} of {:?}",
            NumBytes(copied),
            NumSectors(src.size),
        );
    }

    info!(
        "Copied {:?} from partition {src_part} of {src_image:?} \
        to partition {dst_part} of {dst_image:?}",
        NumBytes(copied),
    );

    Ok(copied)
}

pub fn copy_partition(
    locator: &Locator,
    src_image: &Path,
    src_part: u32,
    dst_image: &Path,
    dst_part: u32,
    cancel_signal: &AtomicBool,
) -> Result<u64> {
    copy_partition_inspect(
        locator,
        src_image,
        src_part,
        dst_image,
        dst_part,
        |_| {},
        cancel_signal,
    )
}

#[cfg(test)]
mod tests {
    use std::io::Cursor;

    use super::*;

    #[test]
    fn sync_writer_writes_through() {
        let file = tempfile::tempfile().unwrap();
        let mut writer = SyncWriter(&file);

        io::copy(&mut Cursor::new(b"foobar"), &mut writer).unwrap();
        writer.flush().unwrap();

        assert_eq!(file.metadata().unwrap().len(), 6);
    }
}
