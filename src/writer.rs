//! Snapshot-staged file writing.
//!
//! A [`FileWriter`] owns a mutable copy of a file derived from a
//! [`Snapshot`] and accumulates edits in memory — by byte offset, row
//! number, literal range, or regex substitution — before a durable
//! [`commit`](FileWriter::commit). Commit truncates the target and
//! rewrites it in place; it is not crash-atomic. Callers who need a
//! safety net should [`backup`](FileWriter::backup) first.

use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use filetime::FileTime;
use thiserror::Error;
use tracing::debug;

use crate::cache;
use crate::file::FileInfo;
use crate::reader::{row_offsets_of, FileReader, SearchOptions};
use crate::snapshot::Snapshot;

pub const DEFAULT_BACKUP_SUFFIX: &str = ".bak";

#[derive(Error, Debug)]
pub enum WriterError {
    #[error("writer is not usable for {path}")]
    Invalid { path: PathBuf },

    #[error("source file does not exist: {0}")]
    SourceMissing(PathBuf),

    #[error("pattern failed to compile: {0}")]
    PatternCompile(#[from] regex::Error),

    #[error("could not write {path}: {source}")]
    WriteFailed {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("I/O error: {0}")]
    Io(#[from] io::Error),
}

/// Accumulates edits on a snapshot and commits them to the file.
///
/// Mutating methods return `&mut Self` so edits chain. After every
/// mutation the writer refreshes the snapshot's dirty flag, timestamp,
/// size and row-offset index. A failed commit leaves the in-memory
/// snapshot intact so the caller may retry.
#[derive(Debug)]
pub struct FileWriter {
    snap: Snapshot,
    row_offsets: Vec<usize>,
    valid: bool,
}

impl FileWriter {
    /// Take ownership of a snapshot and stage edits against it.
    pub fn new(snap: Snapshot) -> Self {
        let row_offsets = row_offsets_of(&snap.content);
        let valid = snap.file.is_valid();
        Self {
            snap,
            row_offsets,
            valid,
        }
    }

    /// Open a reader on `path`, snapshot it, and stage edits against
    /// that snapshot. The writer is invalid when the path cannot be
    /// read; mutations then act on an empty buffer and commit fails.
    pub fn open(path: impl AsRef<Path>) -> Self {
        let mut reader = FileReader::open(path.as_ref());
        match reader.snapshot() {
            Ok(snap) => Self::new(snap),
            Err(_) => Self {
                snap: Snapshot {
                    file: FileInfo::from_path(path.as_ref()),
                    content: Vec::new(),
                    last_modified: 0,
                    dirty: false,
                },
                row_offsets: vec![0],
                valid: false,
            },
        }
    }

    pub fn is_valid(&self) -> bool {
        self.valid
    }

    pub fn file(&self) -> &FileInfo {
        &self.snap.file
    }

    pub fn snapshot(&self) -> &Snapshot {
        &self.snap
    }

    /// Current buffer contents.
    pub fn content(&self) -> &[u8] {
        &self.snap.content
    }

    pub fn row_offsets(&self) -> &[usize] {
        &self.row_offsets
    }

    /// Replace the buffer with the contents of another file, keeping
    /// the target file record.
    pub fn copy(&mut self, source: impl AsRef<Path>) -> Result<&mut Self, WriterError> {
        let source = source.as_ref();
        if !source.exists() {
            return Err(WriterError::SourceMissing(source.to_path_buf()));
        }
        self.snap.content = fs::read(source)?;
        self.touch();
        Ok(self)
    }

    /// Append bytes to the end of the buffer.
    pub fn append(&mut self, content: impl AsRef<[u8]>) -> &mut Self {
        self.snap.content.extend_from_slice(content.as_ref());
        self.touch();
        self
    }

    /// Insert bytes at `offset`. Offsets past the end clamp to the end.
    pub fn insert(&mut self, offset: usize, content: impl AsRef<[u8]>) -> &mut Self {
        let offset = offset.min(self.snap.content.len());
        self.snap
            .content
            .splice(offset..offset, content.as_ref().iter().copied());
        self.touch();
        self
    }

    /// Replace the entire buffer.
    pub fn write(&mut self, content: impl AsRef<[u8]>) -> &mut Self {
        self.snap.content = content.as_ref().to_vec();
        self.touch();
        self
    }

    /// Overwrite the byte region starting at `offset`: erases as many
    /// bytes as the new content holds (clamped to the end of the
    /// buffer), then inserts the new bytes — the region becomes the
    /// new bytes.
    pub fn write_at(&mut self, offset: usize, content: impl AsRef<[u8]>) -> &mut Self {
        let content = content.as_ref();
        let len = self.snap.content.len();
        let offset = offset.min(len);
        let end = (offset + content.len()).min(len);
        self.snap.content.splice(offset..end, content.iter().copied());
        self.touch();
        self
    }

    /// Erase the byte range `[from, to)`, clamped to the buffer.
    pub fn delete_range(&mut self, from: usize, to: usize) -> &mut Self {
        let len = self.snap.content.len();
        let from = from.min(len);
        let to = to.clamp(from, len);
        self.snap.content.drain(from..to);
        self.touch();
        self
    }

    /// Erase row `row` — the bytes from its start offset up to the
    /// start of the next row (or the end of the buffer for the last
    /// row). Out-of-range rows are a no-op.
    pub fn delete_row(&mut self, row: usize) -> &mut Self {
        if row >= self.row_offsets.len() {
            return self;
        }
        let start = self.row_offsets[row];
        let end = self
            .row_offsets
            .get(row + 1)
            .copied()
            .unwrap_or(self.snap.content.len());
        self.snap.content.drain(start..end);
        self.touch();
        self
    }

    /// Insert `line` at the start of row `row`, appending a trailing
    /// newline if the line lacks one. Rows past the end append at the
    /// end of the buffer.
    pub fn insert_row(&mut self, row: usize, line: &str) -> &mut Self {
        let offset = self
            .row_offsets
            .get(row)
            .copied()
            .unwrap_or(self.snap.content.len());
        let mut bytes = line.as_bytes().to_vec();
        if !bytes.ends_with(b"\n") {
            bytes.push(b'\n');
        }
        self.snap.content.splice(offset..offset, bytes);
        self.touch();
        self
    }

    /// Substitute every occurrence of `pattern` with `template`
    /// (`$n`/`${name}` expand to captures).
    pub fn replace_all(
        &mut self,
        pattern: &str,
        template: &str,
        options: SearchOptions,
    ) -> Result<&mut Self, WriterError> {
        let re = cache::get_or_compile(pattern, options.case_insensitive)?;
        let replaced = re
            .replace_all(&self.snap.content, template.as_bytes())
            .into_owned();
        self.snap.content = replaced;
        self.touch();
        Ok(self)
    }

    /// Substitute only the `nth` occurrence of `pattern`. Negative
    /// `nth` counts from the end (`-1` is the last occurrence); any
    /// value is brought into range modulo the match count. No matches
    /// is a no-op.
    pub fn replace(
        &mut self,
        pattern: &str,
        template: &str,
        nth: isize,
        options: SearchOptions,
    ) -> Result<&mut Self, WriterError> {
        let re = cache::get_or_compile(pattern, options.case_insensitive)?;
        let matches = FileReader::from_snapshot(self.snap.clone()).find_with(&re);
        if matches.is_empty() {
            return Ok(self);
        }

        let count = matches.len() as isize;
        let idx = ((nth % count) + count) % count;
        let range = &matches[idx as usize].range;
        let (start, end) = (range.start_byte, range.end_byte);

        let replaced = re
            .replace(&self.snap.content[start..end], template.as_bytes())
            .into_owned();
        self.snap.content.splice(start..end, replaced);
        self.touch();
        Ok(self)
    }

    /// Truncate the target file and write the full buffer, then
    /// re-stat the file record and clear the dirty flag.
    pub fn commit(&mut self) -> Result<(), WriterError> {
        if !self.valid {
            return Err(self.invalid());
        }
        let path = self.snap.file.path().to_path_buf();
        self.write_to(&path)?;
        let _ = filetime::set_file_mtime(&path, FileTime::now());
        self.snap.file.sync();
        self.snap.dirty = false;
        debug!(path = %path.display(), bytes = self.snap.content.len(), "committed");
        Ok(())
    }

    /// Write the buffer to `<path>.bak` — or, when that already
    /// exists, to `<path>.(<last_modified_ns>).bak`. Returns the path
    /// written.
    pub fn backup(&mut self) -> Result<PathBuf, WriterError> {
        self.backup_with(DEFAULT_BACKUP_SUFFIX)
    }

    /// [`backup`](Self::backup) with a custom suffix.
    pub fn backup_with(&mut self, suffix: &str) -> Result<PathBuf, WriterError> {
        if !self.valid {
            return Err(self.invalid());
        }
        let base = self.snap.file.path();
        let mut target = append_suffix(base, suffix);
        if target.exists() {
            target = append_suffix(base, &format!(".({}){}", self.snap.last_modified, suffix));
        }
        self.write_to(&target)?;
        self.snap.dirty = false;
        Ok(target)
    }

    /// Write the buffer to an arbitrary path, creating or truncating.
    pub fn flush(&mut self, path: impl AsRef<Path>) -> Result<(), WriterError> {
        self.write_to(path.as_ref())
    }

    fn write_to(&self, path: &Path) -> Result<(), WriterError> {
        fs::write(path, &self.snap.content).map_err(|source| WriterError::WriteFailed {
            path: path.to_path_buf(),
            source,
        })
    }

    fn invalid(&self) -> WriterError {
        WriterError::Invalid {
            path: self.snap.file.path().to_path_buf(),
        }
    }

    fn touch(&mut self) {
        self.snap.dirty = true;
        self.snap.last_modified = now_ns();
        let size = self.snap.content.len() as u64;
        self.snap.file.set_size(size);
        self.row_offsets = row_offsets_of(&self.snap.content);
    }
}

fn now_ns() -> i64 {
    let now = FileTime::now();
    now.unix_seconds() * 1_000_000_000 + i64::from(now.nanoseconds())
}

fn append_suffix(path: &Path, suffix: &str) -> PathBuf {
    let mut os = path.as_os_str().to_os_string();
    os.push(suffix);
    PathBuf::from(os)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;

    fn writer_for(dir: &Path, name: &str, content: &[u8]) -> FileWriter {
        let path = dir.join(name);
        fs::write(&path, content).unwrap();
        FileWriter::open(&path)
    }

    #[test]
    fn append_insert_delete_chain() {
        let dir = tempfile::tempdir().unwrap();
        let mut writer = writer_for(dir.path(), "chain.txt", b"bcd");

        writer.insert(0, "a").append("ef").delete_range(2, 4);
        assert_eq!(writer.content(), b"abef");
        assert!(writer.snapshot().is_dirty());
    }

    #[test]
    fn write_replaces_whole_buffer() {
        let dir = tempfile::tempdir().unwrap();
        let mut writer = writer_for(dir.path(), "whole.txt", b"old old old");

        writer.write("new");
        assert_eq!(writer.content(), b"new");
        assert_eq!(writer.file().size(), 3);
    }

    #[test]
    fn write_at_overwrites_region() {
        let dir = tempfile::tempdir().unwrap();
        let mut writer = writer_for(dir.path(), "region.txt", b"0123456789");

        writer.write_at(2, "XY");
        assert_eq!(writer.content(), b"01XY456789");

        // Overwrite running past the end erases to the end only.
        writer.write_at(8, "abcd");
        assert_eq!(writer.content(), b"01XY4567abcd");
    }

    #[test]
    fn row_operations() {
        let dir = tempfile::tempdir().unwrap();
        let mut writer = writer_for(dir.path(), "rows.txt", b"x\n");

        writer.insert_row(0, "hdr");
        assert_eq!(writer.content(), b"hdr\nx\n");

        writer.delete_row(0);
        assert_eq!(writer.content(), b"x\n");

        // Out-of-range rows: delete is a no-op, insert appends.
        writer.delete_row(9);
        assert_eq!(writer.content(), b"x\n");
        writer.insert_row(9, "tail");
        assert_eq!(writer.content(), b"x\ntail\n");
    }

    #[test]
    fn insert_row_keeps_existing_newline() {
        let dir = tempfile::tempdir().unwrap();
        let mut writer = writer_for(dir.path(), "nl.txt", b"b\n");

        writer.insert_row(0, "a\n");
        assert_eq!(writer.content(), b"a\nb\n");
    }

    #[test]
    fn replace_all_substitutes_globally() {
        let dir = tempfile::tempdir().unwrap();
        let mut writer = writer_for(dir.path(), "all.txt", b"foo bar foo");

        writer
            .replace_all("foo", "qux", SearchOptions::default())
            .unwrap();
        assert_eq!(writer.content(), b"qux bar qux");
    }

    #[test]
    fn replace_all_expands_capture_templates() {
        let dir = tempfile::tempdir().unwrap();
        let mut writer = writer_for(dir.path(), "tmpl.txt", b"a=1 b=2");

        writer
            .replace_all(r"(\w)=(\d)", "$2:$1", SearchOptions::default())
            .unwrap();
        assert_eq!(writer.content(), b"1:a 2:b");
    }

    #[test]
    fn replace_targets_nth_occurrence() {
        let dir = tempfile::tempdir().unwrap();
        let mut writer = writer_for(dir.path(), "nth.txt", b"foo bar foo");

        writer
            .replace("foo", "qux", 1, SearchOptions::default())
            .unwrap();
        assert_eq!(writer.content(), b"foo bar qux");
    }

    #[test]
    fn replace_negative_counts_from_end() {
        let dir = tempfile::tempdir().unwrap();
        let mut writer = writer_for(dir.path(), "neg.txt", b"foo bar foo");

        writer
            .replace("foo", "qux", -1, SearchOptions::default())
            .unwrap();
        assert_eq!(writer.content(), b"foo bar qux");

        let mut writer = writer_for(dir.path(), "neg2.txt", b"foo bar foo");
        writer
            .replace("foo", "qux", -2, SearchOptions::default())
            .unwrap();
        assert_eq!(writer.content(), b"qux bar foo");
    }

    #[test]
    fn replace_with_longer_text_touches_only_the_match() {
        let dir = tempfile::tempdir().unwrap();
        let mut writer = writer_for(dir.path(), "longer.txt", b"ab cd ab");

        writer
            .replace("ab", "wxyz", 0, SearchOptions::default())
            .unwrap();
        assert_eq!(writer.content(), b"wxyz cd ab");
    }

    #[test]
    fn replace_without_match_is_noop() {
        let dir = tempfile::tempdir().unwrap();
        let mut writer = writer_for(dir.path(), "miss.txt", b"abc");

        writer
            .replace("zzz", "x", 0, SearchOptions::default())
            .unwrap();
        assert_eq!(writer.content(), b"abc");
    }

    #[test]
    fn commit_writes_and_resyncs() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("commit.txt");
        fs::write(&path, b"before").unwrap();

        let mut writer = FileWriter::open(&path);
        writer.write("after, longer than before");
        writer.commit().unwrap();

        assert_eq!(fs::read(&path).unwrap(), b"after, longer than before");
        assert!(!writer.snapshot().is_dirty());
        assert_eq!(writer.file().size(), 25);
    }

    #[test]
    fn backup_uses_suffix_then_timestamped_fallback() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("orig.txt");
        fs::write(&path, b"data").unwrap();

        let mut writer = FileWriter::open(&path);
        let first = writer.backup().unwrap();
        assert_eq!(first, dir.path().join("orig.txt.bak"));

        let second = writer.backup().unwrap();
        assert_ne!(second, first);
        let name = second.file_name().unwrap().to_string_lossy().into_owned();
        assert!(name.starts_with("orig.txt.("));
        assert!(name.ends_with(").bak"));
        assert_eq!(fs::read(&second).unwrap(), b"data");
    }

    #[test]
    fn flush_writes_arbitrary_path() {
        let dir = tempfile::tempdir().unwrap();
        let mut writer = writer_for(dir.path(), "src.txt", b"payload");

        let target = dir.path().join("elsewhere.txt");
        writer.flush(&target).unwrap();
        assert_eq!(fs::read(&target).unwrap(), b"payload");
    }

    #[test]
    fn copy_requires_existing_source() {
        let dir = tempfile::tempdir().unwrap();
        let mut writer = writer_for(dir.path(), "dst.txt", b"old");

        let err = writer.copy(dir.path().join("nope.txt")).unwrap_err();
        assert!(matches!(err, WriterError::SourceMissing(_)));

        let source = dir.path().join("src2.txt");
        fs::write(&source, b"fresh").unwrap();
        writer.copy(&source).unwrap();
        assert_eq!(writer.content(), b"fresh");
        // The target record is preserved.
        assert_eq!(writer.file().name(), "dst.txt");
    }

    #[test]
    fn invalid_writer_refuses_commit() {
        let mut writer = FileWriter::open("/no/such/file.txt");
        assert!(!writer.is_valid());
        assert!(matches!(writer.commit(), Err(WriterError::Invalid { .. })));
    }

    #[test]
    fn failed_commit_keeps_snapshot() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("gone.txt");
        fs::write(&path, b"alive").unwrap();

        let mut writer = FileWriter::open(&path);
        writer.write("edited");
        fs::remove_dir_all(dir.path()).unwrap();

        assert!(writer.commit().is_err());
        assert_eq!(writer.content(), b"edited");
        assert!(writer.snapshot().is_dirty());
    }
}
