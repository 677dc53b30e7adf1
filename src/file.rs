use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use filetime::FileTime;
use walkdir::WalkDir;

/// What a [`FileInfo`] points at.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum FileKind {
    Directory,
    Regular,
    /// Symlinks, sockets, devices — anything that is neither a plain
    /// file nor a directory.
    #[default]
    Other,
}

/// A value record describing one filesystem entry.
///
/// Freely copyable plain data. `valid` is false when the path could not
/// be stat'ed at construction (or last [`sync`](FileInfo::sync)) time;
/// the other fields are then left at their defaults.
#[derive(Debug, Clone, Default)]
pub struct FileInfo {
    path: PathBuf,
    name: String,
    ext: String,
    kind: FileKind,
    size: u64,
    valid: bool,
}

impl FileInfo {
    /// Stat `path` and build a record for it.
    pub fn from_path(path: impl AsRef<Path>) -> Self {
        let path = path.as_ref().to_path_buf();
        let mut info = Self {
            path,
            ..Self::default()
        };
        info.sync();
        info
    }

    /// Adapt an entry surfaced by the directory enumerator.
    pub(crate) fn from_entry(entry: &walkdir::DirEntry) -> Self {
        let path = entry.path().to_path_buf();
        let ty = entry.file_type();
        let kind = if ty.is_dir() {
            FileKind::Directory
        } else if ty.is_file() {
            FileKind::Regular
        } else {
            FileKind::Other
        };
        let size = match kind {
            FileKind::Directory => 0,
            _ => entry.metadata().map(|m| m.len()).unwrap_or(0),
        };
        Self {
            name: entry.file_name().to_string_lossy().into_owned(),
            ext: ext_of(&path),
            kind,
            size,
            valid: true,
            path,
        }
    }

    /// Build a record with an explicit leaf name, bypassing the stat of
    /// the name component. Used by the walker to surface `.` and `..`.
    pub(crate) fn with_name(path: impl AsRef<Path>, name: &str) -> Self {
        let mut info = Self::from_path(path);
        info.name = name.to_string();
        info.ext = String::new();
        info
    }

    /// Record a new size after an in-memory mutation; the writer keeps
    /// its snapshot's record coherent without touching disk.
    pub(crate) fn set_size(&mut self, size: u64) {
        self.size = size;
    }

    /// Re-stat the path, refreshing kind, size and validity.
    pub fn sync(&mut self) {
        match fs::metadata(&self.path) {
            Ok(meta) => {
                self.kind = if meta.is_dir() {
                    FileKind::Directory
                } else if meta.is_file() {
                    FileKind::Regular
                } else {
                    FileKind::Other
                };
                self.size = if meta.is_dir() { 0 } else { meta.len() };
                self.name = self
                    .path
                    .file_name()
                    .map(|n| n.to_string_lossy().into_owned())
                    .unwrap_or_default();
                self.ext = ext_of(&self.path);
                self.valid = true;
            }
            Err(_) => {
                self.valid = false;
            }
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Leaf name of the entry.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Extension without the leading dot; empty when there is none.
    pub fn ext(&self) -> &str {
        &self.ext
    }

    pub fn kind(&self) -> FileKind {
        self.kind
    }

    /// Size in bytes; 0 for directories.
    pub fn size(&self) -> u64 {
        self.size
    }

    pub fn is_valid(&self) -> bool {
        self.valid
    }

    pub fn is_dir(&self) -> bool {
        self.kind == FileKind::Directory
    }

    pub fn is_regular(&self) -> bool {
        self.kind == FileKind::Regular
    }

    /// Last-write time in nanoseconds since the Unix epoch.
    pub fn modified_ns(&self) -> io::Result<i64> {
        let meta = fs::metadata(&self.path)?;
        let mtime = FileTime::from_last_modification_time(&meta);
        Ok(mtime.unix_seconds() * 1_000_000_000 + i64::from(mtime.nanoseconds()))
    }

    /// Delete a regular file. Refuses directories.
    pub fn remove_file(target: &FileInfo) -> io::Result<()> {
        if target.is_dir() {
            return Err(io::Error::new(
                io::ErrorKind::InvalidInput,
                "target is a directory",
            ));
        }
        fs::remove_file(&target.path)
    }

    /// Delete a directory tree, returning how many entries it held.
    pub fn remove_dir_all(target: &FileInfo) -> io::Result<usize> {
        if !target.is_dir() {
            return Err(io::Error::new(
                io::ErrorKind::InvalidInput,
                "target is not a directory",
            ));
        }
        let count = WalkDir::new(&target.path)
            .min_depth(1)
            .into_iter()
            .filter_map(|e| e.ok())
            .count();
        fs::remove_dir_all(&target.path)?;
        Ok(count)
    }
}

fn ext_of(path: &Path) -> String {
    path.extension()
        .map(|e| e.to_string_lossy().into_owned())
        .unwrap_or_default()
}
