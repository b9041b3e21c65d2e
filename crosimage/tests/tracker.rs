/*
 * SPDX-FileCopyrightText: 2025 Andrew Gunnerson
 * SPDX-License-Identifier: GPL-3.0-only
 */

use std::{
    collections::BTreeSet,
    fs, io,
    os::unix::process::ExitStatusExt,
    path::{Path, PathBuf},
    process::{Command, ExitStatus, Output},
    sync::{Arc, Mutex},
};

use crosimage::{
    config::Config,
    tool::{CommandRunner, ToolSet},
    tracker::TempTracker,
};

/// Records the last argument of every `umount` invocation and fails them all,
/// as if nothing was mounted.
#[derive(Default)]
struct UmountRecorder {
    unmounted: Mutex<Vec<PathBuf>>,
}

impl CommandRunner for UmountRecorder {
    fn find(&self, name: &str, _dirs: &[PathBuf]) -> Option<PathBuf> {
        (name == "umount").then(|| Path::new("/usr/bin/umount").to_owned())
    }

    fn output(&self, command: &mut Command) -> io::Result<Output> {
        let target = command.get_args().last().map(PathBuf::from).unwrap();
        self.unmounted.lock().unwrap().push(target);

        Ok(Output {
            status: ExitStatus::from_raw(32 << 8),
            stdout: vec![],
            stderr: b"umount: not mounted.\n".to_vec(),
        })
    }
}

fn tracker() -> (TempTracker, Arc<UmountRecorder>) {
    let runner = Arc::new(UmountRecorder::default());
    let config = Config {
        privilege_helper: vec![],
        ..Default::default()
    };

    (TempTracker::new(ToolSet::new(config, runner.clone())), runner)
}

#[test]
fn cleaned_set_matches_registered_set() {
    let temp_dir = tempfile::tempdir().unwrap();
    let mut paths = vec![];

    for name in ["d1", "d2"] {
        let path = temp_dir.path().join(name);
        fs::create_dir(&path).unwrap();
        paths.push(path);
    }
    for name in ["f1", "f2", "f3"] {
        let path = temp_dir.path().join(name);
        fs::write(&path, name).unwrap();
        paths.push(path);
    }

    let (tracker, runner) = tracker();

    // Shuffled order with duplicates.
    tracker.register([&paths[3], &paths[0], &paths[3], &paths[4]]);
    tracker.register([&paths[1], &paths[2], &paths[0], &paths[2]]);

    let cleaned = tracker.cleanup_all();
    assert_eq!(cleaned.len(), paths.len());
    assert_eq!(
        cleaned.into_iter().collect::<BTreeSet<_>>(),
        paths.iter().cloned().collect::<BTreeSet<_>>(),
    );

    for path in &paths {
        assert!(!path.exists(), "Not cleaned up: {path:?}");
    }

    // Each directory is unmounted exactly once.
    let mut unmounted = runner.unmounted.lock().unwrap().clone();
    unmounted.sort();
    assert_eq!(unmounted, [paths[0].clone(), paths[1].clone()]);
}

#[test]
fn second_drain_is_noop() {
    let (tracker, runner) = tracker();
    let dir = tracker.create_dir().unwrap();
    let (_, file) = tracker.create_file().unwrap();
    assert_eq!(tracker.pending(), [dir.clone(), file.clone()]);

    assert_eq!(tracker.cleanup_all().len(), 2);
    assert!(!dir.exists());
    assert!(!file.exists());

    assert!(tracker.cleanup_all().is_empty());
    assert_eq!(runner.unmounted.lock().unwrap().len(), 1);
}
