/*
 * SPDX-FileCopyrightText: 2025 Andrew Gunnerson
 * SPDX-License-Identifier: GPL-3.0-only
 */

use std::{fs, io, path::Path, sync::atomic::AtomicBool};

use crosimage::{
    image::extent::{self, ALIGNMENT, BlockLayout},
    util::SECTOR_SIZE,
};

/// Write an image of `sectors` sectors filled with a non-repeating-per-block
/// pattern so that any misplaced block shows up as a mismatch.
fn write_image(path: &Path, sectors: u64) -> Vec<u8> {
    let data = (0..sectors * SECTOR_SIZE)
        .map(|i| (i % 251) as u8 ^ (i / SECTOR_SIZE) as u8)
        .collect::<Vec<_>>();
    fs::write(path, &data).unwrap();
    data
}

fn dump(path: &Path, layout: &BlockLayout) -> Vec<u8> {
    let cancel_signal = AtomicBool::new(false);
    let mut output = vec![];

    extent::dump_layout(path, layout, &mut output, &cancel_signal).unwrap();

    output
}

#[test]
fn aligned_and_unoptimized_paths_match() {
    let temp_dir = tempfile::tempdir().unwrap();
    let path = temp_dir.path().join("image.bin");
    let data = write_image(&path, 8192 + 4096 + 64);

    let (offset, count) = (8192, 4096);
    let aligned = BlockLayout::aligned(offset, count);
    let unoptimized = BlockLayout::unoptimized(offset, count);
    assert_eq!(aligned.block_size, SECTOR_SIZE * ALIGNMENT);
    assert_eq!(unoptimized.block_size, SECTOR_SIZE);

    let a = dump(&path, &aligned);
    let u = dump(&path, &unoptimized);

    assert_eq!(a.len() as u64, count * SECTOR_SIZE);
    assert!(a == u, "Aligned and unoptimized output differ");

    let start = (offset * SECTOR_SIZE) as usize;
    assert!(a == data[start..start + a.len()], "Output is not the requested extent");
}

#[test]
fn unaligned_extent() {
    let temp_dir = tempfile::tempdir().unwrap();
    let path = temp_dir.path().join("image.bin");
    let data = write_image(&path, 64);
    let cancel_signal = AtomicBool::new(false);

    let mut output = vec![];
    let mut totals = vec![];
    let n = extent::dump_extent_inspect(
        &path,
        3,
        5,
        &mut output,
        |t| totals.push(t),
        &cancel_signal,
    )
    .unwrap();

    assert_eq!(n, 5 * SECTOR_SIZE);
    assert_eq!(output, &data[3 * 512..8 * 512]);
    assert_eq!(totals, [512, 1024, 1536, 2048, 2560]);
}

#[test]
fn missing_image() {
    let cancel_signal = AtomicBool::new(false);

    let err = extent::dump_extent(
        Path::new("/nonexistent/image.bin"),
        0,
        1,
        io::sink(),
        &cancel_signal,
    )
    .unwrap_err();

    assert!(matches!(err, extent::Error::Open(_, _)));
}
