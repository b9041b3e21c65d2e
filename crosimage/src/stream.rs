// SPDX-FileCopyrightText: 2023-2025 Andrew Gunnerson
// SPDX-License-Identifier: GPL-3.0-only

use std::{
    io::{self, Read, Seek, SeekFrom, Write},
    sync::atomic::{AtomicBool, Ordering},
};

use num_traits::ToPrimitive;

/// Common function for reading a structure from a reader.
pub trait FromReader<R: Read>: Sized {
    type Error;

    fn from_reader(reader: R) -> Result<Self, Self::Error>;
}

/// Extensions for readers to fill buffers without treating EOF as an error.
pub trait ReadFullExt {
    /// Read as many bytes as possible into `buf`, stopping only at EOF. Unlike
    /// [`Read::read_exact`], reaching EOF early is not an error. Returns the
    /// number of bytes read.
    fn read_full(&mut self, buf: &mut [u8]) -> io::Result<usize>;
}

impl<R: Read> ReadFullExt for R {
    fn read_full(&mut self, mut buf: &mut [u8]) -> io::Result<usize> {
        let mut total = 0;

        while !buf.is_empty() {
            match self.read(buf) {
                Ok(0) => break,
                Ok(n) => {
                    total += n;
                    buf = &mut buf[n..];
                }
                Err(e) if e.kind() == io::ErrorKind::Interrupted => {}
                Err(e) => return Err(e),
            }
        }

        Ok(total)
    }
}

/// A reader wrapper that only allows reading a specific section of a file.
pub struct SectionReader<R> {
    inner: R,
    start: u64,
    size: u64,
    pos: u64,
}

impl<R: Read + Seek> SectionReader<R> {
    pub fn new(mut inner: R, start: u64, size: u64) -> io::Result<Self> {
        inner.seek(SeekFrom::Start(start))?;

        Ok(Self {
            inner,
            start,
            size,
            pos: 0,
        })
    }

    pub fn into_inner(self) -> R {
        self.inner
    }
}

impl<R: Read + Seek> Read for SectionReader<R> {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        let to_read = self.size.saturating_sub(self.pos).min(buf.len() as u64) as usize;
        let n = self.inner.read(&mut buf[..to_read])?;
        self.pos += n as u64;
        Ok(n)
    }
}

impl<R: Read + Seek> Seek for SectionReader<R> {
    fn seek(&mut self, pos: SeekFrom) -> io::Result<u64> {
        let (base, delta) = match pos {
            SeekFrom::Start(o) => (0, o.to_i64()),
            SeekFrom::End(o) => (self.size, Some(o)),
            SeekFrom::Current(o) => (self.pos, Some(o)),
        };

        self.pos = base
            .to_i64()
            .zip(delta)
            .and_then(|(b, d)| b.checked_add(d))
            .and_then(|p| p.to_u64())
            .ok_or_else(|| {
                io::Error::new(
                    io::ErrorKind::InvalidInput,
                    "Offset would be before the start of the section",
                )
            })?;

        let raw_pos = self.inner.seek(SeekFrom::Start(self.start + self.pos))?;
        Ok(raw_pos - self.start)
    }
}

/// Returns an I/O error with the [`io::ErrorKind::Interrupted`] type if
/// `cancel_signal` is true. This should be called frequently in I/O loops for
/// cancellation to be responsive.
#[inline]
pub fn check_cancel(cancel_signal: &AtomicBool) -> io::Result<()> {
    if cancel_signal.load(Ordering::SeqCst) {
        return Err(io::Error::new(
            io::ErrorKind::Interrupted,
            "Received cancel signal",
        ));
    }

    Ok(())
}

/// Copy up to `count` blocks of `block_size` bytes from `reader` to `writer`,
/// invoking `inspect` with the running byte total after every block. Copying
/// stops early without error if `reader` reaches EOF, in which case the final
/// block may be partial. If `writer` reaches EOF, an error is returned. The
/// operation is cancelled on the next block if `cancel_signal` is set to
/// `true`. Returns the number of bytes copied.
pub fn copy_blocks_inspect(
    mut reader: impl Read,
    mut writer: impl Write,
    block_size: u64,
    count: u64,
    mut inspect: impl FnMut(u64),
    cancel_signal: &AtomicBool,
) -> io::Result<u64> {
    let block_size = block_size.to_usize().filter(|s| *s > 0).ok_or_else(|| {
        io::Error::new(
            io::ErrorKind::InvalidInput,
            format!("Invalid block size: {block_size}"),
        )
    })?;
    let mut buf = vec![0u8; block_size];
    let mut copied = 0;

    for _ in 0..count {
        check_cancel(cancel_signal)?;

        let n = reader.read_full(&mut buf)?;
        if n == 0 {
            break;
        }

        writer.write_all(&buf[..n])?;
        copied += n as u64;

        inspect(copied);

        if n < block_size {
            break;
        }
    }

    Ok(copied)
}

/// Copy up to `count` blocks of `block_size` bytes from `reader` to `writer`.
pub fn copy_blocks(
    reader: impl Read,
    writer: impl Write,
    block_size: u64,
    count: u64,
    cancel_signal: &AtomicBool,
) -> io::Result<u64> {
    copy_blocks_inspect(reader, writer, block_size, count, |_| {}, cancel_signal)
}
