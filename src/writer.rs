//! Sandboxed file writing for received transfers.
//!
//! The path check is lexical: `.` and `..` are folded without touching the
//! filesystem, then the result must still start with the canonical base
//! directory. It defends against traversal in attacker-supplied names, not
//! against symlink races; the writer only ever opens the validated,
//! normalized path.

use std::fs::{File, OpenOptions};
use std::io::{Seek, SeekFrom, Write};
use std::path::{Component, Path, PathBuf};

use thiserror::Error;

#[derive(Debug, Error)]
pub enum WriterError {
    #[error("path escapes the destination directory")]
    PathTraversal,
    #[error("could not create parent directories: {0}")]
    CreateDirFailed(#[source] std::io::Error),
    #[error("could not open file for writing: {0}")]
    OpenFailed(#[source] std::io::Error),
    #[error("no file is open")]
    NotOpen,
    #[error("write failed: {0}")]
    WriteFailed(#[source] std::io::Error),
}

/// Fold `.` and `..` components without resolving symlinks or requiring the
/// path to exist. A `..` that climbs past the root survives as a literal
/// component, which can never match a base-directory prefix.
pub fn lexical_normalize(path: &Path) -> PathBuf {
    let mut normalized = PathBuf::new();
    for component in path.components() {
        match component {
            Component::CurDir => {}
            Component::ParentDir => {
                let last_is_normal = matches!(
                    normalized.components().next_back(),
                    Some(Component::Normal(_))
                );
                if last_is_normal {
                    normalized.pop();
                } else {
                    // climbing past the root; keep the `..` so the prefix
                    // check can never match
                    normalized.push("..");
                }
            }
            other => normalized.push(other.as_os_str()),
        }
    }
    normalized
}

/// True iff `requested`, lexically normalized, stays under `base_dir`.
/// `base_dir` must exist (it is canonicalized); `requested` must be
/// absolute - callers build it by joining onto the canonical base, so a
/// relative path here is a caller bug and is rejected.
pub fn is_path_safe(requested: &Path, base_dir: &Path) -> bool {
    let canonical_base = match base_dir.canonicalize() {
        Ok(p) => p,
        Err(_) => return false,
    };
    if !requested.is_absolute() {
        return false;
    }
    lexical_normalize(requested).starts_with(&canonical_base)
}

/// Stateful sink for one incoming file at a time.
///
/// Abstracted as a trait so the receiver state machine can be tested without
/// filesystem I/O. Not thread-safe; one instance per connection.
pub trait FileWriter: Send {
    /// Close any previous file, validate `relative_path` against the base
    /// directory, create parent directories, and open the target truncated.
    fn begin_file(&mut self, relative_path: &str, expected_size: u64) -> Result<(), WriterError>;

    /// Seek to `offset` and write `data`. Chunks may arrive at any offset;
    /// the writer does not reorder or fill gaps.
    fn write_chunk(&mut self, offset: u64, data: &[u8]) -> Result<(), WriterError>;

    /// Integrity check: whether the bytes written equal `declared_size`.
    /// Closes the file either way.
    fn finish_file(&mut self, declared_size: u64) -> bool;

    /// Idempotent close.
    fn close(&mut self);

    fn bytes_written(&self) -> u64;
}

/// The real thing: writes under `base_dir`, rejecting paths that escape it.
pub struct DiskWriter {
    base_dir: PathBuf,
    file: Option<File>,
    bytes_written: u64,
}

impl DiskWriter {
    pub fn new(base_dir: PathBuf) -> DiskWriter {
        DiskWriter {
            base_dir,
            file: None,
            bytes_written: 0,
        }
    }
}

impl FileWriter for DiskWriter {
    fn begin_file(&mut self, relative_path: &str, _expected_size: u64) -> Result<(), WriterError> {
        self.close();

        let base = self
            .base_dir
            .canonicalize()
            .map_err(WriterError::OpenFailed)?;
        let target = base.join(relative_path);
        if !is_path_safe(&target, &base) {
            return Err(WriterError::PathTraversal);
        }
        let target = lexical_normalize(&target);

        if let Some(parent) = target.parent() {
            std::fs::create_dir_all(parent).map_err(WriterError::CreateDirFailed)?;
        }
        let file = OpenOptions::new()
            .write(true)
            .create(true)
            .truncate(true)
            .open(&target)
            .map_err(WriterError::OpenFailed)?;

        self.file = Some(file);
        self.bytes_written = 0;
        Ok(())
    }

    fn write_chunk(&mut self, offset: u64, data: &[u8]) -> Result<(), WriterError> {
        let file = self.file.as_mut().ok_or(WriterError::NotOpen)?;
        file.seek(SeekFrom::Start(offset))
            .map_err(WriterError::WriteFailed)?;
        file.write_all(data).map_err(WriterError::WriteFailed)?;
        self.bytes_written += data.len() as u64;
        Ok(())
    }

    fn finish_file(&mut self, declared_size: u64) -> bool {
        let valid = self.file.is_some() && self.bytes_written == declared_size;
        self.close();
        valid
    }

    fn close(&mut self) {
        self.file = None;
    }

    fn bytes_written(&self) -> u64 {
        self.bytes_written
    }
}
