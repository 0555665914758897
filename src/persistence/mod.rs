//! Crash-safe file primitives shared by the spool queue and the file store.
//!
//! Both keep one small file per record. A record is replaced atomically by
//! writing `<path>.<uuid>.tmp`, fsyncing it, renaming it over `<path>` and then
//! fsyncing the parent directory; without the directory fsync the rename may
//! not survive a power loss even though the contents did.
//!
//! Every write gets its own temp file, so concurrent writers to one path never
//! truncate or unlink each other's data. Leftovers from a crash end in `.tmp`
//! and are skipped by every directory scan.

use std::fs::{File, OpenOptions};
use std::io::{self, Write};
use std::path::{Path, PathBuf};

use uuid::Uuid;

/// Syncs a directory so that entries created, renamed or removed in it are
/// durable.
pub fn fsync_dir(dir_path: &Path) -> io::Result<()> {
    let dir = OpenOptions::new().read(true).open(dir_path)?;
    dir.sync_all()
}

const TEMP_SUFFIX: &str = "tmp";

/// A fresh temp path next to `path`: `<path>.<uuid>.tmp`.
pub fn temp_path_for(path: &Path) -> PathBuf {
    let mut name = path.as_os_str().to_owned();
    name.push(format!(".{}.{}", Uuid::new_v4().simple(), TEMP_SUFFIX));
    PathBuf::from(name)
}

/// Whether `path` is a temp file written by [`temp_path_for`].
pub fn is_temp_file(path: &Path) -> bool {
    path.extension().is_some_and(|e| e == TEMP_SUFFIX)
}

/// Removes leftover temp files for `path` (`<path>.*.tmp`). Missing files are
/// ignored.
pub fn remove_temp_files_for(path: &Path) -> io::Result<usize> {
    let (Some(parent), Some(name)) = (path.parent(), path.file_name().and_then(|n| n.to_str()))
    else {
        return Ok(0);
    };
    let prefix = format!("{name}.");

    let entries = match std::fs::read_dir(parent) {
        Ok(entries) => entries,
        Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(0),
        Err(e) => return Err(e),
    };

    let mut removed = 0;
    for entry in entries {
        let candidate = entry?.path();
        let ours = candidate
            .file_name()
            .and_then(|n| n.to_str())
            .is_some_and(|n| n.starts_with(&prefix));
        if ours && is_temp_file(&candidate) && std::fs::remove_file(&candidate).is_ok() {
            removed += 1;
        }
    }
    Ok(removed)
}

/// Atomically replaces `path` with `bytes`, creating parent directories.
///
/// # Errors
///
/// Returns an error if any IO operation fails. On error the previous
/// contents of `path` (if any) are left intact.
pub fn write_atomic(path: &Path, bytes: &[u8]) -> io::Result<()> {
    let parent = path
        .parent()
        .ok_or_else(|| io::Error::new(io::ErrorKind::InvalidInput, "path has no parent"))?;
    std::fs::create_dir_all(parent)?;

    let tmp_path = temp_path_for(path);
    {
        let mut file: File = OpenOptions::new()
            .write(true)
            .create(true)
            .truncate(true)
            .open(&tmp_path)?;
        file.write_all(bytes)?;
        file.sync_all()?;
    }

    if let Err(e) = std::fs::rename(&tmp_path, path) {
        let _ = std::fs::remove_file(&tmp_path);
        return Err(e);
    }
    fsync_dir(parent)
}

/// Creates an empty marker file. Idempotent: an existing marker is left alone.
///
/// Empty files make creation itself the atomic step, so no temp file is
/// needed.
pub fn create_marker(path: &Path) -> io::Result<()> {
    if path.exists() {
        return Ok(());
    }

    OpenOptions::new()
        .write(true)
        .create(true)
        .truncate(true)
        .open(path)?;

    if let Some(parent) = path.parent() {
        fsync_dir(parent)?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn write_atomic_creates_parents_and_replaces() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("a/b/doc.json");

        write_atomic(&path, b"first").unwrap();
        assert_eq!(std::fs::read(&path).unwrap(), b"first");

        write_atomic(&path, b"second").unwrap();
        assert_eq!(std::fs::read(&path).unwrap(), b"second");

        let names: Vec<_> = std::fs::read_dir(path.parent().unwrap())
            .unwrap()
            .map(|e| e.unwrap().file_name())
            .collect();
        assert_eq!(names, vec![std::ffi::OsString::from("doc.json")]);
    }

    #[test]
    fn temp_paths_are_unique_and_recognisable() {
        let path = Path::new("/x/job.json");
        let a = temp_path_for(path);
        let b = temp_path_for(path);

        assert_ne!(a, b);
        assert!(a.to_str().unwrap().starts_with("/x/job.json."));
        assert!(is_temp_file(&a));
        assert!(!is_temp_file(path));
    }

    #[test]
    fn concurrent_writers_never_fail_or_tear() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("doc.json");
        let bodies: Vec<Vec<u8>> = (0..8u8).map(|i| vec![b'a' + i; 4096]).collect();

        std::thread::scope(|scope| {
            for body in &bodies {
                let path = &path;
                scope.spawn(move || {
                    for _ in 0..25 {
                        write_atomic(path, body).unwrap();
                    }
                });
            }
        });

        let contents = std::fs::read(&path).unwrap();
        assert!(bodies.contains(&contents));
        assert_eq!(remove_temp_files_for(&path).unwrap(), 0);
    }

    #[test]
    fn leftover_temp_files_are_removed() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("doc.json");
        std::fs::write(temp_path_for(&path), b"garbage from a crash").unwrap();
        std::fs::write(dir.path().join("other.json.1.tmp"), b"x").unwrap();

        write_atomic(&path, b"good").unwrap();
        assert_eq!(remove_temp_files_for(&path).unwrap(), 1);
        assert_eq!(std::fs::read(&path).unwrap(), b"good");
        assert!(dir.path().join("other.json.1.tmp").exists());
    }

    #[test]
    fn create_marker_is_idempotent() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("job.json.done");

        create_marker(&path).unwrap();
        create_marker(&path).unwrap();
        assert!(path.exists());
        assert_eq!(std::fs::metadata(&path).unwrap().len(), 0);
    }

    #[test]
    fn fsync_dir_fails_on_nonexistent() {
        assert!(fsync_dir(Path::new("/nonexistent/path/that/does/not/exist")).is_err());
    }
}
