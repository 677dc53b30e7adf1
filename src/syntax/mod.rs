//! Structural access to file contents through an incremental parser.
//!
//! The caller supplies the grammar ([`tree_sitter::Language`]); this
//! module owns parser and query handling. Parsing consumes bytes
//! through the reader's streaming-source adapter
//! ([`FileReader::parse_source`](crate::reader::FileReader::parse_source)),
//! so a file never needs to be re-materialized as a `String` to be
//! parsed.

mod errors;
mod parser;
mod query;

pub use errors::SyntaxError;
pub use parser::SyntaxParser;
pub use query::{CapturedNode, QueryEngine, QueryMatch};
