/*
 * SPDX-FileCopyrightText: 2025 Andrew Gunnerson
 * SPDX-License-Identifier: GPL-3.0-only
 */

use std::{
    fs,
    path::{Path, PathBuf},
    sync::atomic::AtomicBool,
};

use assert_matches::assert_matches;
use crosimage::{
    format::manifest::MANIFEST_FILE_NAME,
    image::{
        copy::{self, Error},
        locate::{self, Locator, ManifestStrategy},
    },
    util::SECTOR_SIZE,
};
use tempfile::TempDir;

struct TestImage {
    _dir: TempDir,
    path: PathBuf,
    data: Vec<u8>,
}

impl TestImage {
    /// Create an image of `sectors` sectors filled with `fill`, along with a
    /// manifest describing `partitions` as `(number, start, size)`.
    fn new(sectors: u64, fill: u8, partitions: &[(u32, u64, u64)]) -> Self {
        let dir = tempfile::tempdir().unwrap();

        let manifest = partitions
            .iter()
            .map(|(n, start, size)| format!("#  {start:>11} {size:>11} {n:>7}  Label: \"P{n}\"\n"))
            .collect::<String>();
        fs::write(dir.path().join(MANIFEST_FILE_NAME), manifest).unwrap();

        let data = (0..sectors * SECTOR_SIZE)
            .map(|i| fill.wrapping_add((i / SECTOR_SIZE) as u8))
            .collect::<Vec<_>>();
        let path = dir.path().join("chromiumos_image.bin");
        fs::write(&path, &data).unwrap();

        Self {
            _dir: dir,
            path,
            data,
        }
    }

    fn current(&self) -> Vec<u8> {
        fs::read(&self.path).unwrap()
    }

    fn sectors(&self, start: u64, count: u64) -> &[u8] {
        &self.data[(start * SECTOR_SIZE) as usize..((start + count) * SECTOR_SIZE) as usize]
    }
}

fn locator() -> Locator {
    Locator::with_strategies(vec![Box::new(ManifestStrategy)])
}

fn copy_partition(src: &Path, src_part: u32, dst: &Path, dst_part: u32) -> Result<u64, Error> {
    let cancel_signal = AtomicBool::new(false);

    copy::copy_partition(&locator(), src, src_part, dst, dst_part, &cancel_signal)
}

#[test]
fn destination_too_small() {
    let src = TestImage::new(32, 0x10, &[(3, 8, 4)]);
    let dst = TestImage::new(32, 0x80, &[(6, 16, 2)]);

    assert_matches!(
        copy_partition(&src.path, 3, &dst.path, 6),
        Err(Error::DestinationTooSmall { src_sectors, dst_sectors })
            if src_sectors.0 == 4 && dst_sectors.0 == 2
    );
    assert!(dst.current() == dst.data, "Destination was modified");
}

#[test]
fn copy_into_larger_slot() {
    let src = TestImage::new(32, 0x10, &[(3, 8, 4)]);
    let dst = TestImage::new(32, 0x80, &[(5, 16, 6)]);

    let n = copy_partition(&src.path, 3, &dst.path, 5).unwrap();
    assert_eq!(n, 4 * SECTOR_SIZE);

    let mut expected = dst.data.clone();
    let start = (16 * SECTOR_SIZE) as usize;
    expected[start..start + n as usize].copy_from_slice(src.sectors(8, 4));

    let current = dst.current();
    assert_eq!(current.len(), dst.data.len());
    assert!(current == expected, "Unexpected destination contents");
}

#[test]
fn copy_with_aligned_destination_and_unaligned_source() {
    // Destination offset and length are multiples of the alignment, but the
    // source offset is not.
    let src = TestImage::new(8 + 4096, 0x01, &[(2, 8, 4096)]);
    let dst = TestImage::new(8192 + 16, 0x40, &[(4, 4096, 4096)]);

    copy_partition(&src.path, 2, &dst.path, 4).unwrap();

    let current = dst.current();
    let start = (4096 * SECTOR_SIZE) as usize;
    let end = (8192 * SECTOR_SIZE) as usize;

    assert!(current[start..end] == *src.sectors(8, 4096), "Copied data mismatch");
    assert!(current[..start] == dst.data[..start], "Data before slot modified");
    assert!(current[end..] == dst.data[end..], "Data after slot modified");
}

#[test]
fn copy_within_same_image() {
    let image = TestImage::new(32, 0x20, &[(1, 4, 2), (2, 10, 2)]);

    copy_partition(&image.path, 1, &image.path, 2).unwrap();

    let current = image.current();
    assert!(current[10 * 512..12 * 512] == *image.sectors(4, 2));
    assert!(current[4 * 512..6 * 512] == *image.sectors(4, 2));
}

#[test]
fn missing_partition() {
    let src = TestImage::new(32, 0x10, &[(3, 8, 4)]);
    let dst = TestImage::new(32, 0x80, &[(5, 16, 6)]);

    assert_matches!(
        copy_partition(&src.path, 3, &dst.path, 9),
        Err(Error::Locate(locate::Error::PartitionNotFound { partition: 9, .. }))
    );
    assert!(dst.current() == dst.data);
}
