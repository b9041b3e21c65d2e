/*
 * SPDX-FileCopyrightText: 2025 Andrew Gunnerson
 * SPDX-License-Identifier: GPL-3.0-only
 */

use std::{
    io::{BufWriter, Write},
    path::{Path, PathBuf},
    sync::atomic::AtomicBool,
};

use anyhow::{Context, Result, bail};
use clap::{Parser, Subcommand};
use tracing::info;

use crate::{
    image::{access::ImageTools, kernel},
    tool::ToolSet,
    tracker::TempTracker,
};

/// Dump a kernel partition to a tracked temporary file and return its path.
fn extract_kernel(
    tools: &ToolSet,
    tracker: &TempTracker,
    image: &Path,
    partition: u32,
    cancel_signal: &AtomicBool,
) -> Result<PathBuf> {
    let (file, path) = tracker
        .create_file()
        .context("Failed to create temporary file")?;
    let mut writer = BufWriter::new(file);

    ImageTools::new(tools.clone())
        .dump_partition(image, partition, &mut writer, cancel_signal)
        .with_context(|| format!("Failed to dump partition {partition} of {image:?}"))?;
    writer
        .flush()
        .with_context(|| format!("Failed to write kernel: {path:?}"))?;

    Ok(path)
}

fn boot_type_subcommand(
    cli: &BootTypeCli,
    tools: &ToolSet,
    cancel_signal: &AtomicBool,
) -> Result<()> {
    let tracker = TempTracker::new(tools.clone());

    let path = match (&cli.input, &cli.image, cli.partition) {
        (Some(input), _, _) => input.clone(),
        (None, Some(image), Some(partition)) => {
            extract_kernel(tools, &tracker, image, partition, cancel_signal)?
        }
        _ => bail!("Either --input or both --image and --partition are required"),
    };

    let boot_type = kernel::classify_file(tools, &path)
        .with_context(|| format!("Failed to classify kernel: {path:?}"))?;
    info!("Boot type of {path:?}: {boot_type}");

    println!("{boot_type}");

    tracker.cleanup_all();

    Ok(())
}

pub fn kernel_main(cli: &KernelCli, tools: &ToolSet, cancel_signal: &AtomicBool) -> Result<()> {
    match &cli.command {
        KernelCommand::BootType(c) => boot_type_subcommand(c, tools, cancel_signal),
    }
}

/// Print the boot mode that a kernel partition is signed for.
///
/// One of: invalid, ssd, recovery, usb, factory_install, unknown.
#[derive(Debug, Parser)]
pub struct BootTypeCli {
    /// Path to a kernel partition image.
    #[arg(
        short,
        long,
        value_name = "FILE",
        value_parser,
        required_unless_present = "image",
        conflicts_with = "image"
    )]
    pub input: Option<PathBuf>,

    /// Path to a disk image containing the kernel partition.
    #[arg(long, value_name = "FILE", value_parser, requires = "partition")]
    pub image: Option<PathBuf>,

    /// Kernel partition number within the disk image.
    #[arg(short, long, value_name = "NUM", requires = "image")]
    pub partition: Option<u32>,
}

#[derive(Debug, Subcommand)]
pub enum KernelCommand {
    BootType(BootTypeCli),
}

/// Inspect kernel partitions.
#[derive(Debug, Parser)]
pub struct KernelCli {
    #[command(subcommand)]
    pub command: KernelCommand,
}
