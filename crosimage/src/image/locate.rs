// SPDX-FileCopyrightText: 2025 Andrew Gunnerson
// SPDX-License-Identifier: GPL-3.0-only

//! Resolve partition numbers to sector offsets and sizes.
//!
//! Several backends can answer the question. They are tried in a fixed
//! priority order and the first one that is *available* is authoritative: if
//! it says that the partition does not exist, the lookup fails without
//! consulting the remaining backends.

use std::{
    fs::File,
    io::{self, BufReader},
    num::ParseIntError,
    path::{Path, PathBuf},
    process::Command,
};

use thiserror::Error;
use tracing::debug;

use crate::{
    format::{
        manifest::{self, MANIFEST_FILE_NAME, Manifest},
        parted,
    },
    image::PartitionGeometry,
    stream::FromReader,
    tool::{self, Tool, ToolSet},
    util,
};

#[derive(Debug, Error)]
pub enum QueryError {
    #[error("Tool error")]
    Tool(#[from] tool::Error),
    #[error("Invalid number in cgpt output: {0:?}")]
    CgptOutput(String, #[source] ParseIntError),
    #[error("Failed to parse parted output")]
    Parted(#[from] parted::Error),
    #[error("Failed to open manifest: {0:?}")]
    ManifestOpen(PathBuf, #[source] io::Error),
    #[error("Failed to parse manifest: {0:?}")]
    Manifest(PathBuf, #[source] manifest::Error),
}

#[derive(Debug, Error)]
pub enum Error {
    #[error("No partition tool available (cgpt, parted, or unpack_partitions.sh) for: {0:?}")]
    ToolUnavailable(PathBuf),
    #[error("Partition {partition} not found in image: {image:?}")]
    PartitionNotFound { image: PathBuf, partition: u32 },
    #[error("Failed to look up partition {partition} in {image:?} using {strategy}")]
    Query {
        strategy: &'static str,
        image: PathBuf,
        partition: u32,
        #[source]
        source: QueryError,
    },
    #[error(
        "Partition {partition} in {image:?}: {first} reports {first_geometry:?}, \
        but {second} reports {second_geometry:?}"
    )]
    Mismatch {
        image: PathBuf,
        partition: u32,
        first: &'static str,
        first_geometry: Option<PartitionGeometry>,
        second: &'static str,
        second_geometry: Option<PartitionGeometry>,
    },
}

type Result<T> = std::result::Result<T, Error>;

/// One way of reading an image's partition table.
pub trait LocateStrategy: Send + Sync {
    /// Short name for logging.
    fn name(&self) -> &'static str;

    /// Whether this strategy can be used for `image` at all.
    fn is_available(&self, image: &Path) -> bool;

    /// Look up a partition. [`None`] means that the partition does not exist.
    fn try_resolve(
        &self,
        image: &Path,
        partition: u32,
    ) -> std::result::Result<Option<PartitionGeometry>, QueryError>;
}

/// Message that `cgpt show -i` prints when the partition number exceeds the
/// number of entries in the GPT.
const CGPT_INVALID_PARTITION: &str = "invalid partition number";

/// Queries the GPT directly with `cgpt show`.
pub struct CgptStrategy {
    tools: ToolSet,
}

impl CgptStrategy {
    pub fn new(tools: ToolSet) -> Self {
        Self { tools }
    }

    /// Query one field of a GPT entry. [`None`] means that the partition
    /// number is beyond the end of the entry array.
    fn query(
        &self,
        image: &Path,
        partition: u32,
        field: &str,
    ) -> std::result::Result<Option<u64>, QueryError> {
        let mut command = self.tools.command(Tool::Cgpt)?;
        command
            .arg("show")
            .arg("-i")
            .arg(partition.to_string())
            .arg(field)
            .arg(image);

        let stdout = match self.tools.run(&mut command) {
            Ok(stdout) => stdout,
            Err(tool::Error::CommandFailed { stderr, .. })
                if stderr.contains(CGPT_INVALID_PARTITION) =>
            {
                debug!("cgpt has no entry {partition}: {stderr}");
                return Ok(None);
            }
            Err(e) => return Err(e.into()),
        };
        let value = String::from_utf8_lossy(&stdout).trim().to_owned();

        value
            .parse::<u64>()
            .map(Some)
            .map_err(|e| QueryError::CgptOutput(value, e))
    }
}

impl LocateStrategy for CgptStrategy {
    fn name(&self) -> &'static str {
        "cgpt"
    }

    fn is_available(&self, _image: &Path) -> bool {
        self.tools.has(Tool::Cgpt)
    }

    fn try_resolve(
        &self,
        image: &Path,
        partition: u32,
    ) -> std::result::Result<Option<PartitionGeometry>, QueryError> {
        let Some(offset) = self.query(image, partition, "-b")? else {
            return Ok(None);
        };
        let Some(size) = self.query(image, partition, "-s")? else {
            return Ok(None);
        };

        // Unused GPT entries report zeros.
        if size == 0 {
            return Ok(None);
        }

        Ok(Some(PartitionGeometry { offset, size }))
    }
}

/// Uses `parted`'s machine-readable output with sector units.
pub struct PartedStrategy {
    tools: ToolSet,
}

impl PartedStrategy {
    pub fn new(tools: ToolSet) -> Self {
        Self { tools }
    }

    fn print_command(&self, image: &Path) -> std::result::Result<Command, QueryError> {
        let mut command = self.tools.command(Tool::Parted)?;
        command.arg("-m").arg(image).args(["unit", "s", "print"]);

        Ok(command)
    }
}

impl LocateStrategy for PartedStrategy {
    fn name(&self) -> &'static str {
        "parted"
    }

    fn is_available(&self, _image: &Path) -> bool {
        self.tools.has(Tool::Parted)
    }

    fn try_resolve(
        &self,
        image: &Path,
        partition: u32,
    ) -> std::result::Result<Option<PartitionGeometry>, QueryError> {
        let stdout = self.tools.run(&mut self.print_command(image)?)?;
        let output = String::from_utf8_lossy(&stdout);

        // Absence is checked separately so that it is never confused with a
        // row that exists, but fails to parse.
        if !parted::has_partition(&output, partition) {
            return Ok(None);
        }

        let entry = parted::find_partition(&output, partition)?;

        Ok(entry.map(|e| PartitionGeometry {
            offset: e.start,
            size: e.size,
        }))
    }
}

/// Reads the layout table of the `unpack_partitions.sh` script that sits next
/// to images produced by the image build.
#[derive(Clone, Copy, Debug, Default)]
pub struct ManifestStrategy;

impl ManifestStrategy {
    pub fn manifest_path(image: &Path) -> PathBuf {
        util::parent_path(image).join(MANIFEST_FILE_NAME)
    }
}

impl LocateStrategy for ManifestStrategy {
    fn name(&self) -> &'static str {
        MANIFEST_FILE_NAME
    }

    fn is_available(&self, image: &Path) -> bool {
        Self::manifest_path(image).is_file()
    }

    fn try_resolve(
        &self,
        image: &Path,
        partition: u32,
    ) -> std::result::Result<Option<PartitionGeometry>, QueryError> {
        let path = Self::manifest_path(image);
        let file = File::open(&path).map_err(|e| QueryError::ManifestOpen(path.clone(), e))?;
        let manifest = Manifest::from_reader(BufReader::new(file))
            .map_err(|e| QueryError::Manifest(path.clone(), e))?;

        let entry = manifest
            .find(partition)
            .map_err(|e| QueryError::Manifest(path, e))?;

        Ok(entry.map(|e| PartitionGeometry {
            offset: e.start,
            size: e.size,
        }))
    }
}

/// Ordered list of [`LocateStrategy`] backends.
pub struct Locator {
    strategies: Vec<Box<dyn LocateStrategy>>,
}

impl Locator {
    /// The default chain: cgpt, then parted, then the manifest file.
    pub fn new(tools: &ToolSet) -> Self {
        Self::with_strategies(vec![
            Box::new(CgptStrategy::new(tools.clone())),
            Box::new(PartedStrategy::new(tools.clone())),
            Box::new(ManifestStrategy),
        ])
    }

    pub fn with_strategies(strategies: Vec<Box<dyn LocateStrategy>>) -> Self {
        Self { strategies }
    }

    /// Names of the strategies that can be used for `image`, in priority
    /// order.
    pub fn available_strategies(&self, image: &Path) -> Vec<&'static str> {
        self.strategies
            .iter()
            .filter(|s| s.is_available(image))
            .map(|s| s.name())
            .collect()
    }

    /// Whether any backend can inspect `image`.
    pub fn has_tools(&self, image: &Path) -> bool {
        self.strategies.iter().any(|s| s.is_available(image))
    }

    fn resolve_with(
        strategy: &dyn LocateStrategy,
        image: &Path,
        partition: u32,
    ) -> Result<Option<PartitionGeometry>> {
        strategy
            .try_resolve(image, partition)
            .map_err(|e| Error::Query {
                strategy: strategy.name(),
                image: image.to_owned(),
                partition,
                source: e,
            })
    }

    /// Look up the offset and size of a partition.
    pub fn geometry(&self, image: &Path, partition: u32) -> Result<PartitionGeometry> {
        let strategy = self
            .strategies
            .iter()
            .find(|s| s.is_available(image))
            .ok_or_else(|| Error::ToolUnavailable(image.to_owned()))?;

        let geometry = Self::resolve_with(strategy.as_ref(), image, partition)?.ok_or_else(|| {
            Error::PartitionNotFound {
                image: image.to_owned(),
                partition,
            }
        })?;

        debug!(
            "Partition {partition} of {image:?} via {}: offset={:?}, size={:?}",
            strategy.name(),
            util::NumSectors(geometry.offset),
            util::NumSectors(geometry.size),
        );

        Ok(geometry)
    }

    /// Starting sector of a partition.
    pub fn offset(&self, image: &Path, partition: u32) -> Result<u64> {
        self.geometry(image, partition).map(|g| g.offset)
    }

    /// Size of a partition in sectors.
    pub fn size(&self, image: &Path, partition: u32) -> Result<u64> {
        self.geometry(image, partition).map(|g| g.size)
    }

    /// Resolve the partition with every available backend and make sure they
    /// all agree. Returns the agreed upon geometry.
    pub fn cross_check(&self, image: &Path, partition: u32) -> Result<PartitionGeometry> {
        let mut first: Option<(&'static str, Option<PartitionGeometry>)> = None;

        for strategy in self.strategies.iter().filter(|s| s.is_available(image)) {
            let geometry = Self::resolve_with(strategy.as_ref(), image, partition)?;

            match first {
                None => first = Some((strategy.name(), geometry)),
                Some((name, expected)) if expected != geometry => {
                    return Err(Error::Mismatch {
                        image: image.to_owned(),
                        partition,
                        first: name,
                        first_geometry: expected,
                        second: strategy.name(),
                        second_geometry: geometry,
                    });
                }
                Some(_) => {}
            }
        }

        match first {
            None => Err(Error::ToolUnavailable(image.to_owned())),
            Some((_, Some(geometry))) => Ok(geometry),
            Some((_, None)) => Err(Error::PartitionNotFound {
                image: image.to_owned(),
                partition,
            }),
        }
    }
}
