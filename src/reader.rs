//! Block-oriented buffered file reading with literal/regex search and a
//! byte → (row, column) index.
//!
//! A [`FileReader`] owns one file's byte buffer for its lifetime. The
//! buffer usually holds the whole file; [`load`](FileReader::load) can
//! re-window it to a sub-range for block-at-a-time access. The reader
//! also owns the row-offset index used to translate byte offsets into
//! line/column points, and is the only producer of [`Snapshot`]s.

use std::fs::File;
use std::io::{self, Read, Seek, SeekFrom};
use std::path::PathBuf;

use memchr::memmem;
use regex::bytes::Regex;
use thiserror::Error;

use crate::cache;
use crate::file::FileInfo;
use crate::snapshot::Snapshot;

/// Default stride for block traversal and the parser-source adapter.
pub const DEFAULT_BLOCK_SIZE: usize = 4096;

/// A byte position expressed as line and column (both 0-based byte
/// counts; columns are not code-point aware).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Point {
    pub row: usize,
    pub column: usize,
}

/// A byte span with its line/column endpoints.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MatchRange {
    pub start_byte: usize,
    pub end_byte: usize,
    pub start_point: Point,
    pub end_point: Point,
}

/// One search hit: the overall range plus any capture-group ranges.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MatchResult {
    pub range: MatchRange,
    pub captures: Vec<MatchRange>,
}

/// Options accepted by [`FileReader::find`].
///
/// The case-insensitive flag applies to regex mode only; literal search
/// is byte-exact.
#[derive(Debug, Clone, Copy, Default)]
pub struct SearchOptions {
    pub case_insensitive: bool,
}

#[derive(Error, Debug)]
pub enum ReaderError {
    #[error("reader is not usable for {path}")]
    Invalid { path: PathBuf },

    #[error("pattern failed to compile: {0}")]
    PatternCompile(#[from] regex::Error),

    #[error("I/O error reading {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
}

/// Block-wise random-access reader over one file.
pub struct FileReader {
    file: FileInfo,
    handle: Option<File>,
    buf: Vec<u8>,
    /// Absolute file offset of `buf[0]`.
    buf_start: usize,
    /// Cursor used by the stream-style `next`/`prev` accessors.
    pos: usize,
    row_offsets: Vec<usize>,
    /// Stride for `next`/`prev`, the block cursor and the parser
    /// adapter.
    pub default_block_size: usize,
    /// Reverses the traversal direction of `next`/`prev`.
    pub read_reverse: bool,
    /// Set for readers built from a [`Snapshot`]; disables disk access.
    snapshot_mode: bool,
    /// Timestamp carried over from the originating snapshot.
    snap_modified: i64,
    valid: bool,
}

impl FileReader {
    /// Stat `path` and read the whole file into the buffer.
    pub fn open(path: impl AsRef<std::path::Path>) -> Self {
        Self::from_file(FileInfo::from_path(path))
    }

    /// Build a reader for an already-stat'ed record.
    ///
    /// The reader is invalid when the record is invalid or names a
    /// directory; every operation then degrades per its contract
    /// instead of panicking.
    pub fn from_file(file: FileInfo) -> Self {
        let valid = file.is_valid() && !file.is_dir();
        let mut reader = Self {
            file,
            handle: None,
            buf: Vec::new(),
            buf_start: 0,
            pos: 0,
            row_offsets: vec![0],
            default_block_size: DEFAULT_BLOCK_SIZE,
            read_reverse: false,
            snapshot_mode: false,
            snap_modified: 0,
            valid,
        };
        if reader.valid && reader.sync().is_err() {
            reader.valid = false;
        }
        reader
    }

    /// Seed the buffer from a snapshot. The reader never touches disk:
    /// `sync` and `load` serve the snapshot bytes, and `snapshot()`
    /// clones them back out.
    pub fn from_snapshot(snap: Snapshot) -> Self {
        let row_offsets = row_offsets_of(&snap.content);
        Self {
            file: snap.file,
            handle: None,
            buf: snap.content,
            buf_start: 0,
            pos: 0,
            row_offsets,
            default_block_size: DEFAULT_BLOCK_SIZE,
            read_reverse: false,
            snapshot_mode: true,
            snap_modified: snap.last_modified,
            valid: true,
        }
    }

    pub fn is_valid(&self) -> bool {
        self.valid
    }

    pub fn file(&self) -> &FileInfo {
        &self.file
    }

    /// File size in bytes. In snapshot mode this is the snapshot
    /// length.
    pub fn size(&self) -> usize {
        if self.snapshot_mode {
            self.buf.len()
        } else {
            self.file.size() as usize
        }
    }

    /// Absolute byte offsets of the first character of each row.
    pub fn row_offsets(&self) -> &[usize] {
        &self.row_offsets
    }

    /// Reload the full buffer from disk and rebuild the row index.
    ///
    /// Snapshot-mode readers return the existing buffer untouched.
    /// Fails when the file has disappeared or cannot be read; the
    /// reader is then marked invalid.
    pub fn sync(&mut self) -> Result<&[u8], ReaderError> {
        if !self.valid {
            return Err(self.invalid());
        }
        if self.snapshot_mode {
            return Ok(&self.buf);
        }

        self.file.sync();
        if !self.file.is_valid() {
            self.valid = false;
            return Err(self.invalid());
        }

        let path = self.file.path().to_path_buf();
        let res = (|| -> io::Result<()> {
            if self.handle.is_none() {
                self.handle = Some(File::open(&path)?);
            }
            let handle = self.handle.as_mut().expect("handle was just initialized above");
            handle.seek(SeekFrom::Start(0))?;
            self.buf.clear();
            handle.read_to_end(&mut self.buf)?;
            Ok(())
        })();
        if let Err(source) = res {
            self.valid = false;
            return Err(ReaderError::Io { path, source });
        }

        self.buf_start = 0;
        self.row_offsets = row_offsets_of(&self.buf);
        Ok(&self.buf)
    }

    /// Re-window the buffer to the byte range `[from, to)`.
    ///
    /// Returns `None` when the range is out of bounds, inverted, or
    /// empty at the origin (`to == 0`). Snapshot-mode readers always
    /// return the full snapshot buffer.
    pub fn load(&mut self, from: usize, to: usize) -> Option<&[u8]> {
        if !self.valid {
            return None;
        }
        if self.snapshot_mode {
            return Some(&self.buf);
        }
        let size = self.size();
        if from > size || to > size || to == 0 || from > to {
            return None;
        }

        let len = to - from;
        let res = (|| -> io::Result<()> {
            let handle = self
                .handle
                .as_mut()
                .ok_or_else(|| io::Error::from(io::ErrorKind::NotFound))?;
            handle.seek(SeekFrom::Start(from as u64))?;
            self.buf.resize(len, 0);
            handle.read_exact(&mut self.buf)?;
            Ok(())
        })();
        if res.is_err() {
            self.buf.clear();
            self.buf_start = 0;
            return None;
        }

        self.buf_start = from;
        Some(&self.buf)
    }

    fn covers(&self, from: usize, to: usize) -> bool {
        !self.buf.is_empty() && from >= self.buf_start && to <= self.buf_start + self.buf.len()
    }

    /// A view of the byte range `[from, to)`, re-windowing the buffer
    /// if it does not already cover the range.
    pub fn get(&mut self, from: usize, to: usize) -> Option<&[u8]> {
        if !self.valid {
            return None;
        }
        let size = self.size();
        if from > size || to > size || from > to {
            return None;
        }
        if from == to {
            return Some(&[]);
        }
        if !self.covers(from, to) {
            self.load(from, to)?;
        }
        let off = from - self.buf_start;
        Some(&self.buf[off..off + (to - from)])
    }

    /// Up to `default_block_size` bytes starting at `pos`, clamped to
    /// the end of the file.
    pub fn read_block_at(&mut self, pos: usize) -> Option<&[u8]> {
        if !self.valid {
            return None;
        }
        let size = self.size();
        if pos >= size {
            return None;
        }
        let len = self.default_block_size.max(1).min(size - pos);
        if !self.covers(pos, pos + len) {
            self.load(pos, pos + len)?;
        }
        let off = pos - self.buf_start;
        Some(&self.buf[off..off + len])
    }

    /// Stream-style accessor: the next block in traversal order,
    /// advancing the internal cursor by the returned length. With
    /// `read_reverse` set, traversal runs back-to-front (seat the
    /// cursor with [`reset`](Self::reset) first). Returns `None` at
    /// the boundary.
    pub fn next(&mut self) -> Option<&[u8]> {
        let size = self.size();
        if !self.valid || size == 0 {
            return None;
        }
        let bs = self.default_block_size.max(1);
        let (start, end) = if self.read_reverse {
            if self.pos == 0 {
                return None;
            }
            let len = bs.min(self.pos);
            (self.pos - len, self.pos)
        } else {
            if self.pos >= size {
                return None;
            }
            let len = bs.min(size - self.pos);
            (self.pos, self.pos + len)
        };
        if !self.covers(start, end) {
            self.load(start, end)?;
        }
        self.pos = if self.read_reverse { start } else { end };
        let off = start - self.buf_start;
        Some(&self.buf[off..off + (end - start)])
    }

    /// The mirror of [`next`](Self::next): steps the cursor back and
    /// returns the block it passed over.
    pub fn prev(&mut self) -> Option<&[u8]> {
        let size = self.size();
        if !self.valid || size == 0 {
            return None;
        }
        let bs = self.default_block_size.max(1);
        let (start, end) = if self.read_reverse {
            if self.pos >= size {
                return None;
            }
            let len = bs.min(size - self.pos);
            (self.pos, self.pos + len)
        } else {
            if self.pos == 0 {
                return None;
            }
            let len = bs.min(self.pos);
            (self.pos - len, self.pos)
        };
        if !self.covers(start, end) {
            self.load(start, end)?;
        }
        self.pos = if self.read_reverse { end } else { start };
        let off = start - self.buf_start;
        Some(&self.buf[off..off + (end - start)])
    }

    /// Drop the buffer and seat the cursor at the start of traversal
    /// (the end of the file when reversed). Snapshot-mode readers keep
    /// their buffer, which is the only copy of the data.
    pub fn reset(&mut self) {
        if !self.snapshot_mode {
            self.buf = Vec::new();
            self.buf_start = 0;
        }
        self.pos = if self.read_reverse { self.size() } else { 0 };
    }

    /// A bidirectional block cursor starting at byte 0.
    pub fn blocks(&mut self) -> BlockCursor<'_> {
        self.blocks_at(0)
    }

    /// A block cursor starting at `pos` (clamped to the file size).
    pub fn blocks_at(&mut self, pos: usize) -> BlockCursor<'_> {
        let pos = pos.min(self.size());
        BlockCursor { reader: self, pos }
    }

    /// Find occurrences of `pattern`: literal byte search when `regex`
    /// is false, regex search otherwise.
    ///
    /// Literal matches are the non-overlapping left-to-right
    /// occurrences; each match resumes past the previous match's end.
    /// Regex search honors `options.case_insensitive` and makes
    /// progress over zero-length matches by advancing one byte. An
    /// unloadable buffer yields zero matches rather than an error.
    pub fn find(
        &mut self,
        pattern: &str,
        regex: bool,
        options: SearchOptions,
    ) -> Result<Vec<MatchResult>, ReaderError> {
        if pattern.is_empty() {
            return Ok(Vec::new());
        }
        if regex {
            let re = cache::get_or_compile(pattern, options.case_insensitive)?;
            Ok(self.find_with(&re))
        } else {
            if self.ensure_whole_file().is_err() {
                return Ok(Vec::new());
            }
            let needle = pattern.as_bytes();
            let mut results = Vec::new();
            for start in memmem::find_iter(&self.buf, needle) {
                results.push(MatchResult {
                    range: self.range_at(start, start + needle.len()),
                    captures: Vec::new(),
                });
            }
            Ok(results)
        }
    }

    /// Search with a caller-compiled pattern (see [`crate::cache`]).
    pub fn find_with(&mut self, re: &Regex) -> Vec<MatchResult> {
        if self.ensure_whole_file().is_err() || self.buf.is_empty() {
            return Vec::new();
        }

        let hay = &self.buf;
        let mut locs = re.capture_locations();
        let mut results = Vec::new();
        let mut start = 0usize;
        while start <= hay.len() {
            let m = match re.captures_read_at(&mut locs, hay, start) {
                Some(m) => m,
                None => break,
            };
            let mut captures = Vec::new();
            for i in 1..locs.len() {
                if let Some((cs, ce)) = locs.get(i) {
                    captures.push(self.range_at(cs, ce));
                }
            }
            results.push(MatchResult {
                range: self.range_at(m.start(), m.end()),
                captures,
            });
            // Zero-length matches must not stall the scan.
            start = if m.end() == m.start() {
                m.end() + 1
            } else {
                m.end()
            };
        }
        results
    }

    /// Translate a byte offset into a (row, column) point via the
    /// row-offset index. Defined for offsets up to and including the
    /// file size; columns are byte counts.
    pub fn point_at(&self, offset: usize) -> Point {
        point_in(&self.row_offsets, offset)
    }

    fn range_at(&self, start: usize, end: usize) -> MatchRange {
        MatchRange {
            start_byte: start,
            end_byte: end,
            start_point: self.point_at(start),
            end_point: self.point_at(end),
        }
    }

    /// Capture a fresh [`Snapshot`] of the file. Disk-mode readers
    /// re-sync first; snapshot-mode readers clone their buffer and
    /// retain the originating timestamp.
    pub fn snapshot(&mut self) -> Result<Snapshot, ReaderError> {
        if !self.valid {
            return Err(self.invalid());
        }
        if self.snapshot_mode {
            return Ok(Snapshot {
                file: self.file.clone(),
                content: self.buf.clone(),
                last_modified: self.snap_modified,
                dirty: false,
            });
        }
        self.sync()?;
        let last_modified = self.file.modified_ns().unwrap_or(0);
        Ok(Snapshot {
            file: self.file.clone(),
            content: self.buf.clone(),
            last_modified,
            dirty: false,
        })
    }

    /// A streaming-source callback for an incremental parser: given a
    /// byte index, the buffer-resident slice starting there, capped at
    /// `default_block_size` (empty at or past end-of-file).
    ///
    /// The buffer must cover the whole file when the callback is built;
    /// call [`sync`](Self::sync) first (or use
    /// [`SyntaxParser::parse_reader`](crate::syntax::SyntaxParser::parse_reader),
    /// which does).
    pub fn parse_source<'r>(&'r self) -> impl Fn(usize, tree_sitter::Point) -> &'r [u8] + 'r {
        let buf: &'r [u8] = &self.buf;
        let stride = self.default_block_size.max(1);
        move |byte, _point| {
            if byte >= buf.len() {
                &[]
            } else {
                &buf[byte..buf.len().min(byte + stride)]
            }
        }
    }

    fn ensure_whole_file(&mut self) -> Result<(), ReaderError> {
        if !self.valid {
            return Err(self.invalid());
        }
        if self.snapshot_mode {
            return Ok(());
        }
        if self.buf_start != 0 || self.buf.len() != self.size() {
            self.sync()?;
        }
        Ok(())
    }

    fn invalid(&self) -> ReaderError {
        ReaderError::Invalid {
            path: self.file.path().to_path_buf(),
        }
    }
}

/// Bidirectional cursor over a reader's blocks.
///
/// `next_block` reads the block at the cursor and advances by the
/// block stride; `prev_block` steps back first (saturating at 0) and
/// reads there. Both return `None` at their boundary.
pub struct BlockCursor<'r> {
    reader: &'r mut FileReader,
    pos: usize,
}

impl<'r> BlockCursor<'r> {
    pub fn position(&self) -> usize {
        self.pos
    }

    pub fn at_end(&self) -> bool {
        self.pos >= self.reader.size()
    }

    pub fn next_block(&mut self) -> Option<&[u8]> {
        let size = self.reader.size();
        if self.pos >= size {
            return None;
        }
        let pos = self.pos;
        self.pos = (pos + self.reader.default_block_size.max(1)).min(size);
        self.reader.read_block_at(pos)
    }

    pub fn prev_block(&mut self) -> Option<&[u8]> {
        if self.pos == 0 {
            return None;
        }
        self.pos = self.pos.saturating_sub(self.reader.default_block_size.max(1));
        self.reader.read_block_at(self.pos)
    }
}

pub(crate) fn row_offsets_of(content: &[u8]) -> Vec<usize> {
    let mut offsets = Vec::with_capacity(content.len() / 50 + 1);
    offsets.push(0);
    for (i, b) in content.iter().enumerate() {
        if *b == b'\n' {
            offsets.push(i + 1);
        }
    }
    offsets
}

pub(crate) fn point_in(row_offsets: &[usize], offset: usize) -> Point {
    if row_offsets.is_empty() {
        return Point {
            row: 0,
            column: offset,
        };
    }
    let idx = row_offsets.partition_point(|&o| o <= offset);
    if idx == 0 {
        return Point {
            row: 0,
            column: offset,
        };
    }
    let row = idx - 1;
    Point {
        row,
        column: offset - row_offsets[row],
    }
}
