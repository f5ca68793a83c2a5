//! Repo directory bootstrap.
//!
//! A repo is the directory backing one DataNode slice. It holds the
//! cask files, a `VERSION` file for the on-disk layout revision, and a
//! `repo.lock` that prevents two processes from opening the same store.

use std::fs::{self, File, OpenOptions};
use std::io::{Read, Write};
use std::path::{Path, PathBuf};

use fs2::FileExt;

use crate::error::{DataNodeError, DataNodeResult};

const LOCK_FILE_NAME: &str = "repo.lock";
const VERSION_FILE_NAME: &str = "VERSION";

/// The current on-disk layout version.
const REPO_VERSION: u32 = 1;

/// An exclusive hold on a repo directory.
///
/// The flock is released when this is dropped.
#[derive(Debug)]
pub(crate) struct RepoLock {
    _file: File,
}

pub(crate) fn open_repo(path: &Path) -> DataNodeResult<RepoLock> {
    match fs::metadata(path) {
        Ok(meta) if !meta.is_dir() => {
            return Err(DataNodeError::InvalidRepo {
                path: path.to_path_buf(),
                reason: "not a directory".to_string(),
            });
        }
        Ok(_) => {}
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
            fs::create_dir_all(path)?;
        }
        Err(e) => return Err(e.into()),
    }

    let lock = acquire_lock(path)?;

    let version = read_version(path)?;
    if version > REPO_VERSION {
        return Err(DataNodeError::InvalidRepo {
            path: path.to_path_buf(),
            reason: format!("unsupported layout version {}", version),
        });
    }
    write_version(path, REPO_VERSION)?;

    Ok(lock)
}

fn acquire_lock(path: &Path) -> DataNodeResult<RepoLock> {
    let lock_path = path.join(LOCK_FILE_NAME);
    let file = OpenOptions::new()
        .create(true)
        .write(true)
        .truncate(false)
        .open(&lock_path)?;

    file.try_lock_exclusive()
        .map_err(|_| DataNodeError::RepoLocked {
            path: path.to_path_buf(),
        })?;

    Ok(RepoLock { _file: file })
}

fn read_version(path: &Path) -> DataNodeResult<u32> {
    let version_path = path.join(VERSION_FILE_NAME);
    match File::open(&version_path) {
        Ok(mut f) => {
            let mut contents = String::new();
            f.read_to_string(&mut contents)?;
            contents
                .trim()
                .parse()
                .map_err(|_| DataNodeError::InvalidRepo {
                    path: path.to_path_buf(),
                    reason: "invalid version file".to_string(),
                })
        }
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(0),
        Err(e) => Err(e.into()),
    }
}

fn write_version(path: &Path, version: u32) -> DataNodeResult<()> {
    let version_path = path.join(VERSION_FILE_NAME);
    let mut f = File::create(version_path)?;
    write!(f, "{}", version)?;
    Ok(())
}

pub(crate) fn vlog_path(repo: &Path, cask_id: u32) -> PathBuf {
    repo.join(format!("{:08}.vlog", cask_id))
}

pub(crate) fn hint_path(repo: &Path, cask_id: u32) -> PathBuf {
    repo.join(format!("{:08}.hint", cask_id))
}
