use crate::file::FileInfo;

/// An immutable in-memory copy of a file's bytes at a point in time.
///
/// Snapshots are produced by
/// [`FileReader::snapshot`](crate::reader::FileReader::snapshot) and
/// consumed by [`FileWriter`](crate::writer::FileWriter), which mutates
/// a derived copy and commits it back. `last_modified` is the file's
/// last-write time in nanoseconds since the Unix epoch, captured at
/// snapshot time.
#[derive(Debug, Clone, Default)]
pub struct Snapshot {
    pub(crate) file: FileInfo,
    pub(crate) content: Vec<u8>,
    pub(crate) last_modified: i64,
    pub(crate) dirty: bool,
}

impl Snapshot {
    pub fn file(&self) -> &FileInfo {
        &self.file
    }

    pub fn content(&self) -> &[u8] {
        &self.content
    }

    pub fn last_modified(&self) -> i64 {
        self.last_modified
    }

    pub fn is_dirty(&self) -> bool {
        self.dirty
    }

    pub fn len(&self) -> usize {
        self.content.len()
    }

    pub fn is_empty(&self) -> bool {
        self.content.is_empty()
    }
}
