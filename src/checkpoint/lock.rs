use std::fs::{File, OpenOptions};
use std::io::{ErrorKind, Write};
use std::path::{Path, PathBuf};

use log::warn;

use crate::error::{Error, Result};

pub const LOCK_FILE: &str = ".training.lock";

/// Advisory lock on a checkpoint directory, held for the lifetime of a
/// training run. The lock file is created exclusively and removed on drop.
#[derive(Debug)]
pub struct DirLock {
    path: PathBuf,
    _file: File,
}

impl DirLock {
    pub fn acquire(dir: &Path) -> Result<DirLock> {
        let path = dir.join(LOCK_FILE);
        let mut file = match OpenOptions::new().write(true).create_new(true).open(&path) {
            Ok(f) => f,
            Err(e) if e.kind() == ErrorKind::AlreadyExists => {
                return Err(Error::DirectoryLocked(dir.to_path_buf()))
            }
            Err(e) => return Err(Error::io(&path, e)),
        };
        // Owner pid, for whoever has to clear a stale lock by hand.
        let _ = writeln!(file, "{}", std::process::id());
        Ok(DirLock { path, _file: file })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl Drop for DirLock {
    fn drop(&mut self) {
        if let Err(e) = std::fs::remove_file(&self.path) {
            warn!("could not remove lock file {}: {e}", self.path.display());
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn second_acquire_fails_until_release() {
        let dir = tempfile::tempdir().unwrap();
        let lock = DirLock::acquire(dir.path()).unwrap();
        assert!(lock.path().exists());
        assert!(matches!(DirLock::acquire(dir.path()), Err(Error::DirectoryLocked(_))));
        drop(lock);
        assert!(!dir.path().join(LOCK_FILE).exists());
        assert!(DirLock::acquire(dir.path()).is_ok());
    }
}
