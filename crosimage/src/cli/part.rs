/*
 * SPDX-FileCopyrightText: 2025 Andrew Gunnerson
 * SPDX-License-Identifier: GPL-3.0-only
 */

use std::{
    fs::File,
    io::{self, BufWriter, Write},
    path::{Path, PathBuf},
    sync::atomic::AtomicBool,
};

use anyhow::{Context, Result, bail};
use clap::{Parser, Subcommand};
use tracing::info;

use crate::{
    cli::{status, warning},
    image::{access::ImageTools, copy},
    tool::ToolSet,
    util::NumBytes,
};

/// Bytes between progress messages.
const PROGRESS_INTERVAL: u64 = 64 * 1024 * 1024;

/// Returns a callback for the `*_inspect` functions that logs the running total
/// every [`PROGRESS_INTERVAL`] bytes.
pub(crate) fn progress_logger(enabled: bool) -> impl FnMut(u64) {
    let mut next = PROGRESS_INTERVAL;

    move |total| {
        if enabled && total >= next {
            info!("Processed {:?}", NumBytes(total));
            next = total.saturating_add(PROGRESS_INTERVAL);
        }
    }
}

fn offset_subcommand(cli: &PartitionArgs, tools: &ToolSet) -> Result<()> {
    let image_tools = ImageTools::new(tools.clone());
    let offset = image_tools
        .locator()
        .offset(&cli.image, cli.partition)
        .context("Failed to get partition offset")?;

    println!("{offset}");

    Ok(())
}

fn size_subcommand(cli: &PartitionArgs, tools: &ToolSet) -> Result<()> {
    let image_tools = ImageTools::new(tools.clone());
    let size = image_tools
        .locator()
        .size(&cli.image, cli.partition)
        .context("Failed to get partition size")?;

    println!("{size}");

    Ok(())
}

fn dump_subcommand(cli: &DumpCli, tools: &ToolSet, cancel_signal: &AtomicBool) -> Result<()> {
    let image_tools = ImageTools::new(tools.clone());
    let progress = progress_logger(tools.config().progress);

    let mut writer: Box<dyn Write> = match &cli.output {
        Some(path) => File::create(path)
            .map(|f| Box::new(BufWriter::new(f)) as Box<dyn Write>)
            .with_context(|| format!("Failed to open for writing: {path:?}"))?,
        None => Box::new(BufWriter::new(io::stdout().lock())),
    };

    let n = image_tools
        .dump_partition_inspect(
            &cli.part.image,
            cli.part.partition,
            &mut writer,
            progress,
            cancel_signal,
        )
        .with_context(|| {
            format!(
                "Failed to dump partition {} of {:?}",
                cli.part.partition, cli.part.image,
            )
        })?;
    writer.flush().context("Failed to flush output")?;

    if let Some(path) = &cli.output {
        status!("Wrote {:?} to {path:?}", NumBytes(n));
    }

    Ok(())
}

fn map_subcommand(cli: &PartitionArgs, tools: &ToolSet) -> Result<()> {
    let image_tools = ImageTools::new(tools.clone());
    let device = image_tools
        .map_partition(&cli.image, cli.partition)
        .context("Failed to map partition")?;

    println!("{}", device.display());

    Ok(())
}

fn unmap_subcommand(cli: &UnmapCli, tools: &ToolSet) -> Result<()> {
    ImageTools::new(tools.clone()).unmap_partition(&cli.device);

    Ok(())
}

fn mount_subcommand(cli: &MountCli, tools: &ToolSet) -> Result<()> {
    let image_tools = ImageTools::new(tools.clone());

    image_tools
        .mount_partition(
            &cli.part.image,
            cli.part.partition,
            &cli.mount_point,
            cli.options.as_deref(),
        )
        .context("Failed to mount partition")?;

    status!("Mounted at {:?}. Use `part unmount` to release it", cli.mount_point);

    Ok(())
}

fn unmount_subcommand(cli: &UnmountCli, tools: &ToolSet) -> Result<()> {
    ImageTools::new(tools.clone())
        .unmount_partition(&cli.mount_point)
        .context("Failed to unmount partition")?;

    Ok(())
}

fn copy_subcommand(cli: &CopyCli, tools: &ToolSet, cancel_signal: &AtomicBool) -> Result<()> {
    let image_tools = ImageTools::new(tools.clone());

    if same_file(&cli.src, &cli.dst) && cli.src_part == cli.dst_part {
        warning!("Source and destination are the same partition");
    }

    let n = copy::copy_partition_inspect(
        image_tools.locator(),
        &cli.src,
        cli.src_part,
        &cli.dst,
        cli.dst_part,
        progress_logger(tools.config().progress),
        cancel_signal,
    )
    .with_context(|| {
        format!(
            "Failed to copy partition {} of {:?} to partition {} of {:?}",
            cli.src_part, cli.src, cli.dst_part, cli.dst,
        )
    })?;

    status!("Copied {:?}", NumBytes(n));

    Ok(())
}

fn same_file(a: &Path, b: &Path) -> bool {
    match (a.canonicalize(), b.canonicalize()) {
        (Ok(a), Ok(b)) => a == b,
        _ => a == b,
    }
}

fn check_subcommand(cli: &PartitionArgs, tools: &ToolSet) -> Result<()> {
    let image_tools = ImageTools::new(tools.clone());
    let locator = image_tools.locator();

    if !locator.has_tools(&cli.image) {
        bail!("No partition tools available for: {:?}", cli.image);
    }

    let geometry = locator
        .cross_check(&cli.image, cli.partition)
        .context("Failed to cross-check partition")?;

    let available = locator.available_strategies(&cli.image);
    if available.len() < 2 {
        warning!("Only one backend is available: {}", available.join(", "));
    } else {
        status!("Backends agree: {}", available.join(", "));
    }
    println!("offset={} size={}", geometry.offset, geometry.size);

    Ok(())
}

pub fn part_main(cli: &PartCli, tools: &ToolSet, cancel_signal: &AtomicBool) -> Result<()> {
    match &cli.command {
        PartCommand::Offset(c) => offset_subcommand(c, tools),
        PartCommand::Size(c) => size_subcommand(c, tools),
        PartCommand::Dump(c) => dump_subcommand(c, tools, cancel_signal),
        PartCommand::Map(c) => map_subcommand(c, tools),
        PartCommand::Unmap(c) => unmap_subcommand(c, tools),
        PartCommand::Mount(c) => mount_subcommand(c, tools),
        PartCommand::Unmount(c) => unmount_subcommand(c, tools),
        PartCommand::Copy(c) => copy_subcommand(c, tools, cancel_signal),
        PartCommand::Check(c) => check_subcommand(c, tools),
    }
}

#[derive(Debug, Parser)]
pub struct PartitionArgs {
    /// Path to disk image.
    #[arg(short, long, value_name = "FILE", value_parser)]
    pub image: PathBuf,

    /// Partition number (1-based).
    #[arg(short, long, value_name = "NUM")]
    pub partition: u32,
}

/// Write the raw contents of a partition.
#[derive(Debug, Parser)]
pub struct DumpCli {
    #[command(flatten)]
    pub part: PartitionArgs,

    /// Path to output file.
    ///
    /// If unset, the data is written to stdout.
    #[arg(short, long, value_name = "FILE", value_parser)]
    pub output: Option<PathBuf>,
}

/// Detach a loop device created by `part map`.
#[derive(Debug, Parser)]
pub struct UnmapCli {
    /// Path to loop device.
    #[arg(value_name = "DEVICE", value_parser)]
    pub device: PathBuf,
}

/// Loop-mount a partition.
#[derive(Debug, Parser)]
pub struct MountCli {
    #[command(flatten)]
    pub part: PartitionArgs,

    /// Directory to mount at.
    #[arg(short, long, value_name = "DIR", value_parser)]
    pub mount_point: PathBuf,

    /// Extra mount options.
    ///
    /// If unset, the partition is mounted read-only.
    #[arg(long, value_name = "OPTIONS")]
    pub options: Option<String>,
}

/// Unmount a partition mounted by `part mount`.
#[derive(Debug, Parser)]
pub struct UnmountCli {
    /// Directory to unmount.
    #[arg(value_name = "DIR", value_parser)]
    pub mount_point: PathBuf,
}

/// Copy a partition into a partition slot of another image.
///
/// The destination image is modified in place.
#[derive(Debug, Parser)]
pub struct CopyCli {
    /// Path to source image.
    #[arg(long, value_name = "FILE", value_parser)]
    pub src: PathBuf,

    /// Source partition number.
    #[arg(long, value_name = "NUM")]
    pub src_part: u32,

    /// Path to destination image.
    #[arg(long, value_name = "FILE", value_parser)]
    pub dst: PathBuf,

    /// Destination partition number.
    #[arg(long, value_name = "NUM")]
    pub dst_part: u32,
}

#[derive(Debug, Subcommand)]
pub enum PartCommand {
    /// Print the starting sector of a partition.
    Offset(PartitionArgs),
    /// Print the size of a partition in sectors.
    Size(PartitionArgs),
    Dump(DumpCli),
    /// Map a partition to a loop device and print the device path.
    Map(PartitionArgs),
    Unmap(UnmapCli),
    Mount(MountCli),
    Unmount(UnmountCli),
    Copy(CopyCli),
    /// Check that every available partition backend agrees on a partition.
    Check(PartitionArgs),
}

/// Inspect and manipulate partitions in disk images.
#[derive(Debug, Parser)]
pub struct PartCli {
    #[command(subcommand)]
    pub command: PartCommand,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn progress_disabled() {
        let mut progress = progress_logger(false);
        progress(PROGRESS_INTERVAL * 4);
    }

    #[test]
    fn parse_copy_args() {
        let cli = PartCli::try_parse_from([
            "part", "copy", "--src", "a.bin", "--src-part", "3", "--dst", "b.bin", "--dst-part",
            "5",
        ])
        .unwrap();

        match cli.command {
            PartCommand::Copy(c) => {
                assert_eq!(c.src, Path::new("a.bin"));
                assert_eq!(c.src_part, 3);
                assert_eq!(c.dst_part, 5);
            }
            c => panic!("Unexpected command: {c:?}"),
        }
    }
}
