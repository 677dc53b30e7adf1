//! bulkedit: parallel, syntax-aware bulk transformation of files in a
//! directory tree.
//!
//! # Architecture
//!
//! Four subsystems cooperate on every file:
//!
//! - [`DirWalker`] enumerates a directory tree and dispatches a
//!   per-entry action, synchronously or fanned out over a
//!   [`ThreadPool`].
//! - [`FileReader`] gives block-oriented, random-access and search
//!   access to one file, plus a byte → (row, column) index and a
//!   streaming-source adapter for an incremental parser.
//! - [`FileWriter`] accumulates edits on an in-memory [`Snapshot`] —
//!   by byte offset, row number, literal range or regex substitution —
//!   and commits them durably, with backup.
//! - [`transform`] layers declarative, verified match-and-replace
//!   rules over reader and writer.
//!
//! # Safety
//!
//! - Staged changes verify expected before-text before applying
//! - Commit leaves the in-memory snapshot intact on failure
//! - Cooperative cancellation across parallel walks via a shared
//!   abort flag
//!
//! # Example
//!
//! ```no_run
//! use bulkedit::{DirWalker, FileReader, FileWriter, Flow, SearchOptions, WalkStatus};
//!
//! let walker = DirWalker::new("src");
//! walker.walk(|status, file| {
//!     if status == WalkStatus::Opened && file.ext() == "rs" {
//!         let mut reader = FileReader::open(file.path());
//!         if let Ok(snap) = reader.snapshot() {
//!             let mut writer = FileWriter::new(snap);
//!             let _ = writer
//!                 .replace_all("0\\.1\\.0", "0.2.0", SearchOptions::default())
//!                 .and_then(|w| Ok(w.commit()?));
//!         }
//!     }
//!     Flow::Continue
//! });
//! ```

pub mod cache;
pub mod file;
pub mod pool;
pub mod reader;
pub mod snapshot;
pub mod syntax;
pub mod transform;
pub mod walker;
pub mod writer;

// Re-exports
pub use file::{FileInfo, FileKind};
pub use pool::ThreadPool;
pub use reader::{
    BlockCursor, FileReader, MatchRange, MatchResult, Point, ReaderError, SearchOptions,
    DEFAULT_BLOCK_SIZE,
};
pub use snapshot::Snapshot;
pub use syntax::{CapturedNode, QueryEngine, QueryMatch, SyntaxError, SyntaxParser};
pub use walker::{DirWalker, Flow, WalkError, WalkStatus};
pub use writer::{FileWriter, WriterError, DEFAULT_BACKUP_SUFFIX};
