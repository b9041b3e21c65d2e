// SPDX-FileCopyrightText: 2025 Andrew Gunnerson
// SPDX-License-Identifier: GPL-3.0-only

//! Best-effort cleanup of temporary mount points and files.

use std::{
    collections::HashSet,
    fs::{self, File},
    io,
    path::{Path, PathBuf},
    sync::Mutex,
};

use tempfile::{NamedTempFile, TempDir};
use tracing::{debug, warn};

use crate::{image::access, tool::ToolSet};

/// Registry of paths to tear down when an operation finishes.
///
/// Directories are unmounted (detaching any loop device) and then removed.
/// Anything else is deleted. Every path is handled independently and
/// failures are only logged. The registry is drained when the tracker is
/// dropped, so registering a resource immediately after creating it is
/// enough to have it cleaned up on both success and error paths.
pub struct TempTracker {
    tools: ToolSet,
    entries: Mutex<Vec<PathBuf>>,
}

impl TempTracker {
    pub fn new(tools: ToolSet) -> Self {
        Self {
            tools,
            entries: Mutex::new(vec![]),
        }
    }

    /// Add paths to the pending set. Duplicates are allowed.
    pub fn register<I, P>(&self, paths: I)
    where
        I: IntoIterator<Item = P>,
        P: Into<PathBuf>,
    {
        let mut entries = self.entries.lock().unwrap();

        for path in paths {
            let path = path.into();
            debug!("Registered for cleanup: {path:?}");
            entries.push(path);
        }
    }

    /// Snapshot of the pending paths in registration order.
    pub fn pending(&self) -> Vec<PathBuf> {
        self.entries.lock().unwrap().clone()
    }

    /// Create a temporary directory, for example a mount point, and register
    /// it.
    pub fn create_dir(&self) -> io::Result<PathBuf> {
        let path = TempDir::with_prefix("crosimage.")?.keep();
        self.register([&path]);

        Ok(path)
    }

    /// Create a temporary file and register it.
    pub fn create_file(&self) -> io::Result<(File, PathBuf)> {
        let (file, path) = NamedTempFile::with_prefix("crosimage.")?
            .keep()
            .map_err(|e| e.error)?;
        self.register([&path]);

        Ok((file, path))
    }

    /// Drain the pending set and tear down every entry. Each distinct path is
    /// handled once. Registrations made afterwards start a new set. Returns
    /// the paths that were processed.
    pub fn cleanup_all(&self) -> Vec<PathBuf> {
        let entries = std::mem::take(&mut *self.entries.lock().unwrap());

        let mut seen = HashSet::new();
        let paths = entries
            .into_iter()
            .filter(|p| seen.insert(p.clone()))
            .collect::<Vec<_>>();

        for path in &paths {
            self.cleanup_one(path);
        }

        paths
    }

    fn cleanup_one(&self, path: &Path) {
        let Ok(metadata) = fs::symlink_metadata(path) else {
            debug!("Already gone: {path:?}");
            return;
        };

        if metadata.is_dir() {
            if let Err(e) = access::unmount(&self.tools, path) {
                debug!("Not unmounted: {path:?}: {e}");
            }

            // Not recursive so that the contents of a directory that is still
            // mounted are never deleted.
            if let Err(e) = fs::remove_dir(path) {
                warn!("Failed to remove directory: {path:?}: {e}");
            }
        } else if let Err(e) = fs::remove_file(path) {
            warn!("Failed to remove file: {path:?}: {e}");
        }
    }
}

impl Drop for TempTracker {
    fn drop(&mut self) {
        if self.entries.get_mut().is_ok_and(|e| !e.is_empty()) {
            self.cleanup_all();
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::*;
    use crate::{config::Config, tool::testing::FakeRunner};

    fn tracker(runner: FakeRunner) -> (TempTracker, Arc<FakeRunner>) {
        let runner = Arc::new(runner);
        let config = Config {
            privilege_helper: vec![],
            ..Default::default()
        };

        (TempTracker::new(ToolSet::new(config, runner.clone())), runner)
    }

    #[test]
    fn drain_twice_is_noop() {
        let (tracker, runner) = tracker(FakeRunner::with_tools(&["umount"]));
        let dir = tracker.create_dir().unwrap();

        assert_eq!(tracker.cleanup_all(), [dir.clone()]);
        assert!(!dir.exists());
        assert_eq!(runner.invocations().len(), 1);

        assert!(tracker.cleanup_all().is_empty());
        assert_eq!(runner.invocations().len(), 1);
    }

    #[test]
    fn duplicates_cleaned_once() {
        let temp_dir = tempfile::tempdir().unwrap();
        let a = temp_dir.path().join("a");
        let b = temp_dir.path().join("b");
        fs::write(&a, b"").unwrap();
        fs::write(&b, b"").unwrap();

        let (tracker, _) = tracker(FakeRunner::default());
        tracker.register([&b, &a, &b, &a]);
        assert_eq!(tracker.pending().len(), 4);

        assert_eq!(tracker.cleanup_all(), [b.clone(), a.clone()]);
        assert!(!a.exists());
        assert!(!b.exists());
    }

    #[test]
    fn failures_do_not_stop_cleanup() {
        let temp_dir = tempfile::tempdir().unwrap();
        let busy = temp_dir.path().join("busy");
        fs::create_dir(&busy).unwrap();
        fs::write(busy.join("keep"), b"data").unwrap();
        let file = temp_dir.path().join("file");
        fs::write(&file, b"").unwrap();

        // umount fails and the directory is not empty.
        let runner = FakeRunner::with_tools(&["umount"]).respond("umount", 1, b"");
        let (tracker, runner) = tracker(runner);
        tracker.register([&busy, &temp_dir.path().join("missing"), &file]);

        assert_eq!(tracker.cleanup_all().len(), 3);
        assert!(busy.join("keep").exists());
        assert!(!file.exists());
        assert_eq!(
            runner.invocations(),
            [vec![
                "/fake/bin/umount".to_owned(),
                "-d".to_owned(),
                busy.to_string_lossy().into_owned(),
            ]],
        );
    }

    #[test]
    fn drained_on_drop() {
        let (tracker, _) = tracker(FakeRunner::default());
        let (_, path) = tracker.create_file().unwrap();
        assert!(path.exists());

        drop(tracker);
        assert!(!path.exists());
    }

    #[test]
    fn registrations_after_drain_start_fresh() {
        let (tracker, _) = tracker(FakeRunner::default());
        tracker.register(["/nonexistent/a"]);
        tracker.cleanup_all();

        tracker.register(["/nonexistent/b"]);
        assert_eq!(tracker.pending(), [PathBuf::from("/nonexistent/b")]);
    }
}
