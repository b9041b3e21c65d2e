// SPDX-FileCopyrightText: 2025 Andrew Gunnerson
// SPDX-License-Identifier: GPL-3.0-only

//! Partition-level operations on raw disk images.
//!
//! Partitions are always addressed by `(image, partition number)`. The
//! [`locate::Locator`] resolves that pair to a [`PartitionGeometry`] before any
//! byte of the image is read, mapped, mounted, or written.

use crate::util;

pub mod access;
pub mod copy;
pub mod extent;
pub mod kernel;
pub mod locate;

/// Location of a partition within an image. Both values are in sectors of
/// [`util::SECTOR_SIZE`] bytes.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct PartitionGeometry {
    pub offset: u64,
    pub size: u64,
}

impl PartitionGeometry {
    pub fn byte_offset(&self) -> Option<u64> {
        util::sectors_to_bytes(self.offset)
    }

    pub fn byte_size(&self) -> Option<u64> {
        util::sectors_to_bytes(self.size)
    }
}
