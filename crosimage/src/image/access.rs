// SPDX-FileCopyrightText: 2025 Andrew Gunnerson
// SPDX-License-Identifier: GPL-3.0-only

use std::{
    io::Write,
    path::{Path, PathBuf},
    sync::atomic::AtomicBool,
};

use bstr::ByteSlice;
use thiserror::Error;
use tracing::{debug, info, warn};

use crate::{
    image::{
        PartitionGeometry,
        extent::{self, BlockLayout},
        locate::{self, Locator},
    },
    tool::{self, Tool, ToolSet},
    util::NumBytes,
};

#[derive(Debug, Error)]
pub enum Error {
    #[error("Failed to locate partition")]
    Locate(#[from] locate::Error),
    #[error("Partition geometry is out of range: {0:?}")]
    OutOfRange(PartitionGeometry),
    #[error("Failed to read partition {partition} of {image:?}")]
    Dump {
        image: PathBuf,
        partition: u32,
        #[source]
        source: extent::Error,
    },
    #[error("Failed to map partition {partition} of {image:?}")]
    Map {
        image: PathBuf,
        partition: u32,
        #[source]
        source: tool::Error,
    },
    #[error("losetup did not report a device for partition {partition} of {image:?}")]
    NoDevice { image: PathBuf, partition: u32 },
    #[error("Failed to mount partition {partition} of {image:?} at {mount_point:?}")]
    Mount {
        image: PathBuf,
        partition: u32,
        mount_point: PathBuf,
        #[source]
        source: tool::Error,
    },
    #[error("Failed to unmount {0:?}")]
    Unmount(PathBuf, #[source] tool::Error),
}

type Result<T> = std::result::Result<T, Error>;

/// Partition-level operations on top of a [`Locator`].
pub struct ImageTools {
    tools: ToolSet,
    locator: Locator,
}

impl ImageTools {
    /// Use the default locator chain for `tools`.
    pub fn new(tools: ToolSet) -> Self {
        let locator = Locator::new(&tools);
        Self::with_locator(tools, locator)
    }

    pub fn with_locator(tools: ToolSet, locator: Locator) -> Self {
        Self { tools, locator }
    }

    pub fn locator(&self) -> &Locator {
        &self.locator
    }

    /// Resolve a partition and convert its geometry to bytes.
    fn byte_range(&self, image: &Path, partition: u32) -> Result<(u64, u64)> {
        let geometry = self.locator.geometry(image, partition)?;

        geometry
            .byte_offset()
            .zip(geometry.byte_size())
            .ok_or(Error::OutOfRange(geometry))
    }

    /// Write the contents of a partition to `writer`. `inspect` is called with
    /// the running byte total. Returns the number of bytes written.
    pub fn dump_partition_inspect(
        &self,
        image: &Path,
        partition: u32,
        writer: impl Write,
        inspect: impl FnMut(u64),
        cancel_signal: &AtomicBool,
    ) -> Result<u64> {
        let geometry = self.locator.geometry(image, partition)?;
        let layout = BlockLayout::aligned(geometry.offset, geometry.size);

        extent::dump_layout_inspect(image, &layout, writer, inspect, cancel_signal).map_err(|e| {
            Error::Dump {
                image: image.to_owned(),
                partition,
                source: e,
            }
        })
    }

    pub fn dump_partition(
        &self,
        image: &Path,
        partition: u32,
        writer: impl Write,
        cancel_signal: &AtomicBool,
    ) -> Result<u64> {
        self.dump_partition_inspect(image, partition, writer, |_| {}, cancel_signal)
    }

    /// Create a loop device covering exactly the partition's bytes. The device
    /// must be released with [`Self::unmap_partition`].
    pub fn map_partition(&self, image: &Path, partition: u32) -> Result<PathBuf> {
        let (offset, size) = self.byte_range(image, partition)?;
        let map_err = |e| Error::Map {
            image: image.to_owned(),
            partition,
            source: e,
        };

        let mut command = self.tools.privileged_command(Tool::Losetup).map_err(map_err)?;
        command
            .arg("--show")
            .arg("-f")
            .arg("-o")
            .arg(offset.to_string())
            .arg("--sizelimit")
            .arg(size.to_string())
            .arg(image);

        let stdout = self.tools.run(&mut command).map_err(map_err)?;
        let device = stdout.trim();

        if device.is_empty() {
            return Err(Error::NoDevice {
                image: image.to_owned(),
                partition,
            });
        }

        let device = PathBuf::from(device.to_os_str_lossy().into_owned());
        info!("Mapped partition {partition} of {image:?} to {device:?}");

        Ok(device)
    }

    /// Detach a loop device. Failures are logged, not returned.
    pub fn unmap_partition(&self, device: &Path) {
        let result = self
            .tools
            .privileged_command(Tool::Losetup)
            .and_then(|mut c| self.tools.run(c.arg("-d").arg(device)));

        match result {
            Ok(_) => debug!("Unmapped {device:?}"),
            Err(e) => warn!("Failed to unmap {device:?}: {e}"),
        }
    }

    /// Loop-mount a partition at `mount_point`. `options` are appended to the
    /// loop options and default to `ro`.
    pub fn mount_partition(
        &self,
        image: &Path,
        partition: u32,
        mount_point: &Path,
        options: Option<&str>,
    ) -> Result<()> {
        let (offset, size) = self.byte_range(image, partition)?;
        let options = options.filter(|o| !o.is_empty()).unwrap_or("ro");
        let mount_err = |e| Error::Mount {
            image: image.to_owned(),
            partition,
            mount_point: mount_point.to_owned(),
            source: e,
        };

        debug!(
            "Mounting {:?} at {:?} of {image:?} with options {options:?}",
            NumBytes(size),
            NumBytes(offset),
        );

        let mut command = self.tools.privileged_command(Tool::Mount).map_err(mount_err)?;
        command
            .arg("-o")
            .arg(format!("loop,offset={offset},sizelimit={size},{options}"))
            .arg(image)
            .arg(mount_point);

        self.tools.run(&mut command).map_err(mount_err)?;
        info!("Mounted partition {partition} of {image:?} at {mount_point:?}");

        Ok(())
    }

    /// Unmount a partition and detach its loop device.
    pub fn unmount_partition(&self, mount_point: &Path) -> Result<()> {
        unmount(&self.tools, mount_point)
            .map_err(|e| Error::Unmount(mount_point.to_owned(), e))?;
        info!("Unmounted {mount_point:?}");

        Ok(())
    }
}

/// Run `umount -d` on `mount_point`.
pub(crate) fn unmount(tools: &ToolSet, mount_point: &Path) -> std::result::Result<(), tool::Error> {
    let mut command = tools.privileged_command(Tool::Umount)?;
    command.arg("-d").arg(mount_point);

    tools.run(&mut command).map(|_| ())
}

#[cfg(test)]
mod tests {
    use std::{fs, sync::Arc};

    use assert_matches::assert_matches;

    use super::*;
    use crate::{
        config::Config,
        format::manifest::MANIFEST_FILE_NAME,
        tool::testing::FakeRunner,
    };

    struct Fixture {
        _dir: tempfile::TempDir,
        image: PathBuf,
    }

    /// An image with partition 3 at sector 4 spanning 2 sectors.
    fn fixture() -> Fixture {
        let dir = tempfile::tempdir().unwrap();
        fs::write(
            dir.path().join(MANIFEST_FILE_NAME),
            "#            4           2       3  Label: \"ROOT-A\"\n",
        )
        .unwrap();

        let image = dir.path().join("image.bin");
        let mut data = vec![0u8; 4096];
        data[2048..3072].fill(0x5a);
        fs::write(&image, data).unwrap();

        Fixture { _dir: dir, image }
    }

    fn image_tools(runner: FakeRunner) -> (ImageTools, Arc<FakeRunner>) {
        let runner = Arc::new(runner);
        let config = Config::default();
        let tools = ToolSet::new(config, runner.clone());

        (ImageTools::new(tools), runner)
    }

    #[test]
    fn dump() {
        let f = fixture();
        let (image_tools, _) = image_tools(FakeRunner::default());
        let cancel_signal = AtomicBool::new(false);

        let mut output = vec![];
        let n = image_tools
            .dump_partition(&f.image, 3, &mut output, &cancel_signal)
            .unwrap();

        assert_eq!(n, 1024);
        assert_eq!(output, [0x5a; 1024]);

        assert_matches!(
            image_tools.dump_partition(&f.image, 4, &mut output, &cancel_signal),
            Err(Error::Locate(locate::Error::PartitionNotFound { partition: 4, .. }))
        );
    }

    #[test]
    fn map_and_unmap() {
        let f = fixture();
        let runner = FakeRunner::with_tools(&["losetup"]).respond("losetup", 0, b"/dev/loop7\n");
        let (image_tools, runner) = image_tools(runner);

        let device = image_tools.map_partition(&f.image, 3).unwrap();
        assert_eq!(device, Path::new("/dev/loop7"));

        image_tools.unmap_partition(&device);

        let image = f.image.to_string_lossy();
        assert_eq!(
            runner.invocations(),
            [
                vec![
                    "sudo",
                    "/fake/bin/losetup",
                    "--show",
                    "-f",
                    "-o",
                    "2048",
                    "--sizelimit",
                    "1024",
                    &*image,
                ],
                vec!["sudo", "/fake/bin/losetup", "-d", "/dev/loop7"],
            ],
        );
    }

    #[test]
    fn unmap_failure_is_not_fatal() {
        let runner = FakeRunner::with_tools(&["losetup"]).respond("losetup", 1, b"");
        let (image_tools, runner) = image_tools(runner);

        image_tools.unmap_partition(Path::new("/dev/loop9"));
        assert_eq!(runner.invocations().len(), 1);
    }

    #[test]
    fn mount_options() {
        let f = fixture();
        let runner = FakeRunner::with_tools(&["mount", "umount"]);
        let (image_tools, runner) = image_tools(runner);
        let mount_point = Path::new("/mnt/root");

        image_tools
            .mount_partition(&f.image, 3, mount_point, None)
            .unwrap();
        image_tools
            .mount_partition(&f.image, 3, mount_point, Some("rw"))
            .unwrap();
        image_tools.unmount_partition(mount_point).unwrap();

        let invocations = runner.invocations();
        assert_eq!(invocations[0][3], "loop,offset=2048,sizelimit=1024,ro");
        assert_eq!(invocations[1][3], "loop,offset=2048,sizelimit=1024,rw");
        assert_eq!(invocations[2], ["sudo", "/fake/bin/umount", "-d", "/mnt/root"]);
    }

    #[test]
    fn mount_failure() {
        let f = fixture();
        let runner = FakeRunner::with_tools(&["mount"]).respond("mount", 32, b"");
        let (image_tools, _) = image_tools(runner);

        assert_matches!(
            image_tools.mount_partition(&f.image, 3, Path::new("/mnt"), None),
            Err(Error::Mount {
                source: tool::Error::CommandFailed { .. },
                ..
            })
        );
    }
}
